//! Find the GitOps manifest that deploys a recommended workload

use crate::error::ManifestError;
use crate::models::{Recommendation, INSTANCE_LABEL};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Release manifest file name searched for under `clusters/`
pub const RELEASE_FILE: &str = "helmrelease.yaml";

/// Chart source manifest expected next to the release
pub const SOURCE_FILE: &str = "ocirepository.yaml";

/// Marker of the only chart family whose values layout the updater understands
pub const SUPPORTED_CHART_MARKER: &str = "bjw-s";

/// Recommendations grouped by the file they patch
#[derive(Debug, Default)]
pub struct ApplyPlan {
    pub files: BTreeMap<PathBuf, Vec<Recommendation>>,
    /// Recommendations with no usable manifest, and why
    pub skipped: Vec<(Recommendation, ManifestError)>,
}

/// Walks a manifest repository laid out as `clusters/.../<namespace>/<app>/`
#[derive(Debug, Clone)]
pub struct ManifestLocator {
    repo_root: PathBuf,
}

impl ManifestLocator {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Release manifest for a recommendation
    pub fn locate(&self, rec: &Recommendation) -> Result<PathBuf, ManifestError> {
        let instance = rec
            .labels
            .get(INSTANCE_LABEL)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ManifestError::NotFound(format!(
                    "{}/{} has no {INSTANCE_LABEL} label",
                    rec.namespace, rec.workload_name
                ))
            })?;

        let clusters = self.repo_root.join("clusters");
        if !clusters.is_dir() {
            return Err(ManifestError::NotFound(format!(
                "manifest directory {} does not exist",
                clusters.display()
            )));
        }

        let namespace_segment = format!("/{}/", rec.namespace);
        let instance_segment = format!("/{instance}/");

        let release = WalkDir::new(&clusters)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == RELEASE_FILE)
            .map(|entry| entry.into_path())
            .find(|path| {
                let normalized = path.to_string_lossy().replace('\\', "/");
                normalized.contains(&namespace_segment) && normalized.contains(&instance_segment)
            })
            .ok_or_else(|| {
                ManifestError::NotFound(format!(
                    "no {RELEASE_FILE} found for {}/{instance}",
                    rec.namespace
                ))
            })?;

        ensure_supported(&release)?;
        Ok(release)
    }

    /// Locate every recommendation, grouping by target file
    pub fn plan(&self, recommendations: Vec<Recommendation>) -> ApplyPlan {
        let mut plan = ApplyPlan::default();
        for rec in recommendations {
            match self.locate(&rec) {
                Ok(path) => {
                    let rec = rec.with_manifest_path(path.display().to_string());
                    plan.files.entry(path).or_default().push(rec);
                }
                Err(e) => plan.skipped.push((rec, e)),
            }
        }
        plan
    }
}

/// Only app-template releases have the `containers: <name>:` layout we patch
fn ensure_supported(release: &Path) -> Result<(), ManifestError> {
    let source = release.with_file_name(SOURCE_FILE);
    let content = std::fs::read_to_string(&source).map_err(|_| {
        ManifestError::Unsupported(format!(
            "{} has no {SOURCE_FILE}; only {SUPPORTED_CHART_MARKER} app-template releases are supported",
            release.display()
        ))
    })?;

    if content.contains(SUPPORTED_CHART_MARKER) {
        Ok(())
    } else {
        Err(ManifestError::Unsupported(format!(
            "{} is not a {SUPPORTED_CHART_MARKER} app-template release",
            release.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceQuantity, Severity};
    use std::fs;
    use tempfile::TempDir;

    fn rec(namespace: &str, instance: Option<&str>) -> Recommendation {
        Recommendation {
            namespace: namespace.to_string(),
            workload_name: instance.unwrap_or("orphan").to_string(),
            workload_kind: "Deployment".to_string(),
            container: "app".to_string(),
            current_limit: ResourceQuantity::mebibytes(128.0),
            current_request: ResourceQuantity::unset(),
            recommended_limit: ResourceQuantity::mebibytes(150.0),
            recommended_request: ResourceQuantity::unset(),
            percent_change: 17.1875,
            severity: Severity::Info,
            request_lowered: false,
            labels: instance
                .map(|i| BTreeMap::from([(INSTANCE_LABEL.to_string(), i.to_string())]))
                .unwrap_or_default(),
            history: vec![],
            manifest_path: None,
        }
    }

    fn release(root: &Path, namespace: &str, app: &str, source: Option<&str>) -> PathBuf {
        let dir = root.join("clusters/main/apps").join(namespace).join(app).join("app");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(RELEASE_FILE), "kind: HelmRelease\n").unwrap();
        if let Some(source) = source {
            fs::write(dir.join(SOURCE_FILE), source).unwrap();
        }
        dir.join(RELEASE_FILE)
    }

    const APP_TEMPLATE_SOURCE: &str = "url: oci://ghcr.io/bjw-s/helm/app-template\n";

    #[test]
    fn test_locate_by_namespace_and_instance() {
        let repo = TempDir::new().unwrap();
        let expected = release(repo.path(), "media", "plex", Some(APP_TEMPLATE_SOURCE));
        release(repo.path(), "default", "plex", Some(APP_TEMPLATE_SOURCE));

        let locator = ManifestLocator::new(repo.path());
        assert_eq!(locator.locate(&rec("media", Some("plex"))).unwrap(), expected);
    }

    #[test]
    fn test_missing_label_and_missing_release() {
        let repo = TempDir::new().unwrap();
        release(repo.path(), "media", "plex", Some(APP_TEMPLATE_SOURCE));
        let locator = ManifestLocator::new(repo.path());

        assert!(matches!(locator.locate(&rec("media", None)), Err(ManifestError::NotFound(_))));
        assert!(matches!(
            locator.locate(&rec("media", Some("sonarr"))),
            Err(ManifestError::NotFound(_))
        ));

        let empty = TempDir::new().unwrap();
        assert!(matches!(
            ManifestLocator::new(empty.path()).locate(&rec("media", Some("plex"))),
            Err(ManifestError::NotFound(_))
        ));
    }

    #[test]
    fn test_non_app_template_is_unsupported() {
        let repo = TempDir::new().unwrap();
        release(repo.path(), "db", "postgres", Some("url: oci://registry-1.docker.io/bitnamicharts/postgresql\n"));
        release(repo.path(), "cache", "redis", None);
        let locator = ManifestLocator::new(repo.path());

        assert!(matches!(
            locator.locate(&rec("db", Some("postgres"))),
            Err(ManifestError::Unsupported(_))
        ));
        assert!(matches!(
            locator.locate(&rec("cache", Some("redis"))),
            Err(ManifestError::Unsupported(_))
        ));
    }

    #[test]
    fn test_plan_groups_by_file() {
        let repo = TempDir::new().unwrap();
        let plex = release(repo.path(), "media", "plex", Some(APP_TEMPLATE_SOURCE));
        let locator = ManifestLocator::new(repo.path());

        let mut sidecar = rec("media", Some("plex"));
        sidecar.container = "sidecar".to_string();
        let plan = locator.plan(vec![rec("media", Some("plex")), sidecar, rec("media", None)]);

        assert_eq!(plan.files.len(), 1);
        assert_eq!(plan.files[&plex].len(), 2);
        assert_eq!(plan.files[&plex][0].manifest_path.as_deref(), Some(plex.display().to_string().as_str()));
        assert_eq!(plan.skipped.len(), 1);
    }
}
