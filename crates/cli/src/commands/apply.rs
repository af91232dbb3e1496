//! Apply command: write recommendations back to GitOps manifests

use anyhow::{bail, Context, Result};
use inquire::{Confirm, InquireError};
use rightsize_lib::manifest::{generate_diff, ManifestLocator, ManifestUpdater};
use rightsize_lib::{AnalyzerConfig, Recommendation};
use std::path::Path;

use super::analyze::run_analysis;
use crate::output::{colorize_diff, print_error, print_info, print_success, print_warning};

/// What happened to one manifest file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Applied,
    Declined,
    Failed,
}

/// Analyze one cluster, then patch each matching manifest after confirmation
pub async fn run(config: &AnalyzerConfig, context: Option<&str>) -> Result<()> {
    let Some(repo) = config.repo_path.as_deref() else {
        bail!("--repo (or RIGHTSIZE_REPO_PATH) is required for apply");
    };

    let run = run_analysis(config, context).await?;
    for warning in &run.report.warnings {
        print_warning(warning);
    }
    if run.report.recommendations.is_empty() {
        print_info("No recommendations to apply");
        return Ok(());
    }

    let locator = ManifestLocator::new(repo);
    let plan = locator.plan(run.report.recommendations);
    for (rec, reason) in &plan.skipped {
        print_warning(&format!("Skipping {}/{} ({}): {}", rec.namespace, rec.workload_name, rec.container, reason));
    }

    let updater = ManifestUpdater::new();
    let mut applied = 0usize;
    let mut declined = 0usize;
    let mut failed = 0usize;

    for (path, recs) in &plan.files {
        match apply_file(&updater, repo, path, recs)? {
            FileOutcome::Applied => applied += 1,
            FileOutcome::Declined => declined += 1,
            FileOutcome::Failed => failed += 1,
        }
    }

    println!();
    println!(
        "Applied {}, skipped {}, failed {} ({} recommendations without a manifest)",
        applied,
        declined,
        failed,
        plan.skipped.len()
    );
    Ok(())
}

fn apply_file(updater: &ManifestUpdater, repo: &Path, path: &Path, recs: &[Recommendation]) -> Result<FileOutcome> {
    let display = path.strip_prefix(repo).unwrap_or(path).display().to_string();
    println!();
    print_info(&format!("Manifest: {}", display));
    for line in describe_changes(recs) {
        println!("  {}", line);
    }

    let original = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", display))?;
    let updated = match updater.update(path, recs) {
        Ok(updated) => updated,
        Err(e) => {
            print_error(&format!("{}: {}", display, e));
            return Ok(FileOutcome::Failed);
        }
    };

    println!("{}", colorize_diff(&generate_diff(&display, &original, &updated)));

    if !confirm()? {
        print_info("Skipped");
        return Ok(FileOutcome::Declined);
    }

    match updater.apply_changes(path, &updated) {
        Ok(()) => {
            print_success("Changes applied");
            Ok(FileOutcome::Applied)
        }
        Err(e) => {
            print_error(&e.to_string());
            Ok(FileOutcome::Failed)
        }
    }
}

/// Peak and request-lowering notes printed ahead of a file's diff
pub fn describe_changes(recs: &[Recommendation]) -> Vec<String> {
    let mut lines = Vec::new();
    for rec in recs {
        lines.push(format!(
            "{}/{}: peak {:.0}Mi, limit {} -> {}",
            rec.workload_name,
            rec.container,
            rec.peak_mib(),
            rec.current_limit,
            rec.recommended_limit
        ));
        if rec.request_lowered {
            lines.push(format!(
                "Request ({}) will be lowered to match recommended limit ({})",
                rec.current_request, rec.recommended_limit
            ));
        }
    }
    lines
}

/// Cancelling the prompt counts as a no
fn confirm() -> Result<bool> {
    match Confirm::new("Apply these changes?")
        .with_default(false)
        .with_help_message("The manifest is only written when you answer yes")
        .prompt()
    {
        Ok(answer) => Ok(answer),
        Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => Ok(false),
        Err(e) => Err(e).context("Failed to read confirmation"),
    }
}
