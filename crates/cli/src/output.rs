//! Output formatting utilities

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use rightsize_lib::{AnalysisReport, Recommendation, Severity};
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for the recommendations table
#[derive(Tabled)]
struct RecommendationRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Workload")]
    workload: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Current Limit")]
    current_limit: String,
    #[tabled(rename = "Recommended")]
    recommended_limit: String,
    #[tabled(rename = "Current Request")]
    current_request: String,
    #[tabled(rename = "New Request")]
    recommended_request: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Severity")]
    severity: String,
}

impl From<&Recommendation> for RecommendationRow {
    fn from(rec: &Recommendation) -> Self {
        Self {
            namespace: rec.namespace.clone(),
            workload: rec.workload_name.clone(),
            kind: rec.workload_kind.clone(),
            container: rec.container.clone(),
            current_limit: rec.current_limit.to_string(),
            recommended_limit: rec.recommended_limit.to_string(),
            current_request: rec.current_request.to_string(),
            recommended_request: rec.recommended_request.to_string(),
            change: format_change(rec),
            severity: color_severity(rec.severity),
        }
    }
}

/// Render a report in the requested format
pub fn render_report(report: &AnalysisReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report).context("Failed to serialize report"),
        OutputFormat::Table => {
            if report.recommendations.is_empty() {
                return Ok("No recommendations".yellow().to_string());
            }
            let rows: Vec<RecommendationRow> = report.recommendations.iter().map(RecommendationRow::from).collect();
            Ok(Table::new(rows).with(Style::rounded()).to_string())
        }
    }
}

/// Write rendered output to a file, or stdout when no path is given
pub fn write_output(rendered: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, format!("{rendered}\n"))
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            print_success(&format!("Report written to {}", path.display()));
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

/// Signed percent change; `N/A` when there was no limit to compare against
pub fn format_change(rec: &Recommendation) -> String {
    if !rec.current_limit.is_set() {
        return "N/A".to_string();
    }
    let formatted = format!("{:+.1}%", rec.percent_change);
    if rec.percent_change < 0.0 {
        formatted.green().to_string()
    } else if rec.percent_change > 0.0 {
        formatted.red().to_string()
    } else {
        formatted
    }
}

/// Color severity based on value
pub fn color_severity(severity: Severity) -> String {
    let label = severity.as_str();
    match severity {
        Severity::Critical => label.red().bold().to_string(),
        Severity::Warning => label.yellow().to_string(),
        Severity::Info => label.blue().to_string(),
    }
}

/// Color a unified diff line by line
pub fn colorize_diff(diff: &str) -> String {
    diff.lines()
        .map(|line| {
            if line.starts_with("+++") || line.starts_with("---") {
                line.bold().to_string()
            } else if line.starts_with('+') {
                line.green().to_string()
            } else if line.starts_with('-') {
                line.red().to_string()
            } else if line.starts_with("@@") {
                line.cyan().to_string()
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rightsize_lib::ResourceQuantity;
    use std::collections::BTreeMap;

    fn recommendation(current: ResourceQuantity, percent_change: f64) -> Recommendation {
        Recommendation {
            namespace: "media".to_string(),
            workload_name: "plex".to_string(),
            workload_kind: "Deployment".to_string(),
            container: "app".to_string(),
            current_limit: current,
            current_request: ResourceQuantity::unset(),
            recommended_limit: ResourceQuantity::mebibytes(150.0),
            recommended_request: ResourceQuantity::unset(),
            percent_change,
            severity: Severity::from_change(percent_change),
            request_lowered: false,
            labels: BTreeMap::new(),
            history: vec![],
            manifest_path: None,
        }
    }

    #[test]
    fn test_format_change() {
        colored::control::set_override(false);
        assert_eq!(format_change(&recommendation(ResourceQuantity::mebibytes(200.0), -25.0)), "-25.0%");
        assert_eq!(format_change(&recommendation(ResourceQuantity::mebibytes(100.0), 50.0)), "+50.0%");
        assert_eq!(format_change(&recommendation(ResourceQuantity::unset(), 0.0)), "N/A");
    }

    #[test]
    fn test_render_table_lists_recommendations() {
        colored::control::set_override(false);
        let report = AnalysisReport {
            recommendations: vec![recommendation(ResourceQuantity::mebibytes(200.0), -25.0)],
            ..Default::default()
        };

        let table = render_report(&report, OutputFormat::Table).unwrap();
        assert!(table.contains("Namespace"));
        assert!(table.contains("plex"));
        assert!(table.contains("200Mi"));
        assert!(table.contains("150Mi"));
        assert!(table.contains("N/A"));
        assert!(table.contains("warning") || table.contains("info"));
    }

    #[test]
    fn test_render_json_omits_history() {
        let mut rec = recommendation(ResourceQuantity::mebibytes(200.0), -25.0);
        rec.history = vec![];
        let report = AnalysisReport {
            recommendations: vec![rec],
            workloads_total: 1,
            ..Default::default()
        };

        let json = render_report(&report, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["workloads_total"], 1);
        assert_eq!(value["recommendations"][0]["workload_name"], "plex");
        assert!(value["recommendations"][0].get("history").is_none());
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        write_output("hello", Some(&path)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_colorize_diff_keeps_lines() {
        colored::control::set_override(false);
        let diff = "--- a\n+++ b\n@@ -1 +1 @@\n-old\n+new";
        assert_eq!(colorize_diff(diff), diff);
    }
}
