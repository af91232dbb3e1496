//! Line-oriented memory patching of deployment manifests
//!
//! The manifest is never parsed as YAML; comments, key order and quoting all
//! survive untouched. A scanner tracks where it is relative to `containers:`,
//! the current container entry, `resources:` and `limits:`/`requests:`, using
//! indentation only to notice when a block has ended.

use crate::error::ManifestError;
use crate::models::Recommendation;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Limits,
    Requests,
}

/// Geometry of the `containers:` block being scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    /// Indent of the `containers:` key
    at: usize,
    /// Indent at which container entries start (list dash or map key)
    entry: Option<usize>,
}

/// Position of the scanner within the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Outside,
    InContainers {
        block: Block,
    },
    InContainer {
        block: Block,
        name: Option<String>,
    },
    InResources {
        block: Block,
        name: Option<String>,
        resources_at: usize,
    },
    InTier {
        block: Block,
        name: Option<String>,
        resources_at: usize,
        tier: Tier,
        tier_at: usize,
    },
}

impl State {
    fn block(&self) -> Option<Block> {
        match self {
            State::Outside => None,
            State::InContainers { block }
            | State::InContainer { block, .. }
            | State::InResources { block, .. }
            | State::InTier { block, .. } => Some(*block),
        }
    }

    /// Pop every block that a line at `indent` falls outside of
    fn close(self, indent: usize, is_list_item: bool) -> State {
        let state = match self {
            State::InTier {
                block,
                name,
                resources_at,
                tier_at,
                ..
            } if indent <= tier_at => State::InResources {
                block,
                name,
                resources_at,
            },
            other => other,
        };
        let state = match state {
            State::InResources {
                block,
                name,
                resources_at,
            } if indent <= resources_at => State::InContainer { block, name },
            other => other,
        };
        match state.block() {
            // YAML allows sequence items at the same indent as their parent key
            Some(block) if indent <= block.at && !(is_list_item && indent == block.at) => State::Outside,
            _ => state,
        }
    }

    /// Transition on a line nested below the current container entry
    fn descend(self, trimmed: &str, indent: usize) -> State {
        let key = key_of(trimmed);
        let bare = value_of(trimmed).is_none();
        match self {
            State::InContainer { block, name }
            | State::InResources { block, name, .. }
            | State::InTier { block, name, .. }
                if key == Some("resources") && bare =>
            {
                State::InResources {
                    block,
                    name,
                    resources_at: indent,
                }
            }
            State::InResources {
                block,
                name,
                resources_at,
            } if indent > resources_at && matches!(key, Some("limits") | Some("requests")) => State::InTier {
                block,
                name,
                resources_at,
                tier: if key == Some("limits") { Tier::Limits } else { Tier::Requests },
                tier_at: indent,
            },
            other => other,
        }
    }
}

/// Rewrites memory limits and lowered requests in manifest files
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestUpdater;

impl ManifestUpdater {
    pub fn new() -> Self {
        Self
    }

    /// Read `path` and return its patched text; nothing is written
    pub fn update(&self, path: &Path, recommendations: &[Recommendation]) -> Result<String, ManifestError> {
        let original = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            action: "read",
            path: path.to_path_buf(),
            source,
        })?;

        patch_manifest(&original, recommendations).ok_or_else(|| ManifestError::NoMatchingSection(path.to_path_buf()))
    }

    /// Persist patched text; only called after the user confirmed the diff
    pub fn apply_changes(&self, path: &Path, updated: &str) -> Result<(), ManifestError> {
        std::fs::write(path, updated).map_err(|source| ManifestError::Io {
            action: "write",
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Patch manifest text, or `None` when no recommended container was found
///
/// Limits always take the recommended value. Requests change only when the
/// recommendation lowered them.
pub fn patch_manifest(text: &str, recommendations: &[Recommendation]) -> Option<String> {
    let by_container: HashMap<&str, &Recommendation> =
        recommendations.iter().map(|r| (r.container.as_str(), r)).collect();

    let raw_lines: Vec<&str> = text.split('\n').collect();
    let mut state = State::Outside;
    let mut matched = false;
    let mut lines: Vec<String> = Vec::with_capacity(raw_lines.len());

    for (i, raw) in raw_lines.iter().enumerate() {
        let body = raw.strip_suffix('\r').unwrap_or(raw);
        let trimmed = body.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            lines.push(raw.to_string());
            continue;
        }

        let indent = body.len() - body.trim_start().len();
        let is_list_item = trimmed.starts_with('-');
        state = state.close(indent, is_list_item);

        if key_of(trimmed) == Some("containers") && value_of(trimmed).is_none() {
            state = State::InContainers {
                block: Block { at: indent, entry: None },
            };
            lines.push(raw.to_string());
            continue;
        }

        let Some(block) = state.block() else {
            lines.push(raw.to_string());
            continue;
        };
        let entry_at = block.entry.unwrap_or(indent);

        if indent == entry_at {
            let name = if is_list_item {
                list_entry_name(&raw_lines[i..], indent)
            } else if value_of(trimmed).is_none() {
                key_of(trimmed).map(str::to_string)
            } else {
                None
            };
            state = State::InContainer {
                block: Block {
                    entry: Some(entry_at),
                    ..block
                },
                name,
            };
            if is_list_item {
                // The dash line may itself open `resources:`
                let item = trimmed.trim_start_matches('-').trim_start();
                state = state.descend(item, indent + (trimmed.len() - item.len()));
            }
        } else if indent > entry_at {
            if let State::InTier {
                name: Some(name),
                tier,
                tier_at,
                ..
            } = &state
            {
                let rec = by_container.get(name.as_str());
                if let (Some(rec), Some("memory"), true) = (rec, key_of(trimmed), indent > *tier_at) {
                    let target = match tier {
                        Tier::Limits => rec.recommended_limit.manifest_value(),
                        Tier::Requests if rec.request_lowered => rec.recommended_request.manifest_value(),
                        Tier::Requests => None,
                    };
                    if *tier == Tier::Limits {
                        matched = true;
                    }
                    if let Some(value) = target {
                        matched = true;
                        lines.push(rewrite_memory(raw, &value));
                        continue;
                    }
                }
            }
            state = state.descend(trimmed, indent);
        }

        lines.push(raw.to_string());
    }

    matched.then(|| lines.join("\n"))
}

/// Name of a list-form container entry starting at `entry[0]`
///
/// `name:` may follow `resources:` or any other key, so the whole entry is
/// searched rather than only the lines already seen.
fn list_entry_name(entry: &[&str], indent: usize) -> Option<String> {
    let first = entry.first()?.trim();
    let item = first.trim_start_matches('-').trim_start();
    if key_of(item) == Some("name") {
        return value_of(item).map(str::to_string);
    }
    let keys_at = indent + (first.len() - item.len());

    for raw in &entry[1..] {
        let body = raw.strip_suffix('\r').unwrap_or(raw);
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let at = body.len() - body.trim_start().len();
        if at <= indent {
            break;
        }
        if at == keys_at && key_of(trimmed) == Some("name") {
            return value_of(trimmed).map(str::to_string);
        }
    }
    None
}

/// Key of a `key: value` or `key:` line, quotes removed
fn key_of(trimmed: &str) -> Option<&str> {
    let (key, _) = trimmed.split_once(':')?;
    let key = key.trim().trim_matches(|c| c == '"' || c == '\'');
    (!key.is_empty() && !key.contains(' ')).then_some(key)
}

/// Value of a `key: value` line, comments and quotes removed; `None` for bare keys
fn value_of(trimmed: &str) -> Option<&str> {
    let (_, rest) = trimmed.split_once(':')?;
    let rest = match rest.find(" #") {
        Some(i) => &rest[..i],
        None => rest,
    };
    let value = rest.trim().trim_matches(|c| c == '"' || c == '\'');
    (!value.is_empty()).then_some(value)
}

/// Replace the value of a `memory:` line, keeping indent, comment and line ending
fn rewrite_memory(raw: &str, value: &str) -> String {
    let (body, ending) = match raw.strip_suffix('\r') {
        Some(body) => (body, "\r"),
        None => (raw, ""),
    };
    let indent = &body[..body.len() - body.trim_start().len()];
    let comment = body.find(" #").map(|i| &body[i..]).unwrap_or("");
    format!("{indent}memory: {value}{comment}{ending}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceQuantity, Severity};
    use std::collections::BTreeMap;

    fn rec(container: &str, limit: f64, request: Option<f64>) -> Recommendation {
        Recommendation {
            namespace: "apps".to_string(),
            workload_name: "web".to_string(),
            workload_kind: "Deployment".to_string(),
            container: container.to_string(),
            current_limit: ResourceQuantity::mebibytes(128.0),
            current_request: ResourceQuantity::mebibytes(200.0),
            recommended_limit: ResourceQuantity::mebibytes(limit),
            recommended_request: ResourceQuantity::mebibytes(request.unwrap_or(200.0)),
            percent_change: 17.0,
            severity: Severity::Info,
            request_lowered: request.is_some(),
            labels: BTreeMap::new(),
            history: vec![],
            manifest_path: None,
        }
    }

    const APP_TEMPLATE: &str = "\
spec:
  values:
    controllers:
      main:
        containers:
          app:
            image:
              repository: ghcr.io/example/web
            resources:
              requests:
                cpu: 10m
                memory: 200Mi
              limits:
                memory: 128Mi # tuned by hand
          metrics:
            resources:
              limits:
                memory: 64Mi
    service:
      main:
        ports:
          http:
            port: 8080
";

    #[test]
    fn test_patches_limit_and_lowered_request() {
        let patched = patch_manifest(APP_TEMPLATE, &[rec("app", 150.0, Some(150.0))]).unwrap();
        assert!(patched.contains("                memory: 150Mi\n              limits:"));
        assert!(patched.contains("                memory: 150Mi # tuned by hand"));
        // Sibling container is left alone
        assert!(patched.contains("                memory: 64Mi"));
        assert!(patched.contains("                cpu: 10m"));
        assert_eq!(patched.lines().count(), APP_TEMPLATE.lines().count());
    }

    #[test]
    fn test_request_untouched_unless_lowered() {
        let patched = patch_manifest(APP_TEMPLATE, &[rec("app", 300.0, None)]).unwrap();
        assert!(patched.contains("memory: 200Mi"));
        assert!(patched.contains("memory: 300Mi # tuned by hand"));
    }

    #[test]
    fn test_later_container_is_patched_independently() {
        let patched = patch_manifest(APP_TEMPLATE, &[rec("metrics", 32.0, None)]).unwrap();
        assert!(patched.contains("memory: 128Mi # tuned by hand"));
        assert!(patched.contains("                memory: 32Mi"));
    }

    #[test]
    fn test_list_form_containers() {
        let manifest = "\
spec:
  template:
    spec:
      containers:
      - name: sidecar
        resources:
          limits:
            memory: 32Mi
      - image: nginx
        name: web
        env:
        - name: MODE
          value: prod
        resources:
          limits:
            memory: 512Mi
          requests:
            memory: 512Mi
      volumes:
      - name: data
";
        let patched = patch_manifest(manifest, &[rec("web", 150.0, Some(150.0))]).unwrap();
        assert!(patched.contains("            memory: 32Mi"));
        assert_eq!(patched.matches("            memory: 150Mi").count(), 2);
        assert!(patched.contains("      - name: data"));
    }

    #[test]
    fn test_list_entry_name_after_resources() {
        let manifest = "\
containers:
  - resources:
      limits:
        memory: 256Mi
    image: nginx
    name: web
  - name: sidecar
    resources:
      limits:
        memory: 32Mi
";
        let patched = patch_manifest(manifest, &[rec("web", 150.0, None)]).unwrap();
        assert!(patched.contains("        memory: 150Mi"));
        assert!(patched.contains("        memory: 32Mi"));
    }

    #[test]
    fn test_scanner_leaves_container_block() {
        let state = State::InTier {
            block: Block { at: 4, entry: Some(6) },
            name: Some("app".to_string()),
            resources_at: 8,
            tier: Tier::Limits,
            tier_at: 10,
        };
        let state = state.close(10, false);
        assert!(matches!(state, State::InResources { resources_at: 8, .. }));
        assert!(matches!(state.clone().close(6, false), State::InContainer { .. }));
        assert_eq!(state.close(4, false), State::Outside);
    }

    #[test]
    fn test_no_matching_container() {
        assert!(patch_manifest(APP_TEMPLATE, &[rec("worker", 150.0, None)]).is_none());
        assert!(patch_manifest("kind: ConfigMap\ndata:\n  memory: 1Gi\n", &[rec("app", 150.0, None)]).is_none());
    }

    #[test]
    fn test_patch_is_idempotent() {
        let recs = [rec("app", 150.0, Some(150.0))];
        let once = patch_manifest(APP_TEMPLATE, &recs).unwrap();
        let twice = patch_manifest(&once, &recs).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_crlf_preserved() {
        let manifest = APP_TEMPLATE.replace('\n', "\r\n");
        let patched = patch_manifest(&manifest, &[rec("app", 150.0, None)]).unwrap();
        assert!(patched.contains("memory: 150Mi # tuned by hand\r\n"));
        assert_eq!(patched.matches("\r\n").count(), manifest.matches("\r\n").count());
    }

    #[test]
    fn test_update_reads_and_apply_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("helmrelease.yaml");
        std::fs::write(&path, APP_TEMPLATE).unwrap();

        let updater = ManifestUpdater::new();
        let patched = updater.update(&path, &[rec("app", 150.0, None)]).unwrap();
        // Nothing is written until apply_changes
        assert_eq!(std::fs::read_to_string(&path).unwrap(), APP_TEMPLATE);

        updater.apply_changes(&path, &patched).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), patched);

        let err = updater.update(&path, &[rec("worker", 150.0, None)]).unwrap_err();
        assert!(matches!(err, ManifestError::NoMatchingSection(_)));

        let missing = updater.update(&dir.path().join("nope.yaml"), &[]).unwrap_err();
        assert!(matches!(missing, ManifestError::Io { action: "read", .. }));
    }
}
