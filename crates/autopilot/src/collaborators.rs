//! Collaborator traits (spec.md §6): the seams the orchestrator depends
//! on for everything that isn't page automation — loading a service
//! catalog and profile, writing screenshots, and promoting a reviewed
//! draft into the live catalog. Production wiring plugs real
//! filesystem/registry-backed implementations in; tests use the
//! in-memory stand-ins below.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AutopilotError;
use crate::model::DraftCatalog;

/// One dimension override consumed by the runner orchestrator: the
/// human-readable key it must locate plus the value to fill it with.
/// `primary_css` mirrors a catalog-sourced selector hint (locator tier 1);
/// `required` controls whether an exhausted retry fails the run or merely
/// skips the dimension (spec.md §4.2/§4.9).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileDimension {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub primary_css: Option<String>,
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// One service entry: where its configure page lives, how the
/// orchestrator recognizes and opens its card (phase 1 of §2's control
/// flow), and the dimensions to fill once it's open.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileService {
    pub service_id: String,
    pub configure_url: String,
    pub card_title: String,
    pub configure_button_label: String,
    pub dimensions: Vec<ProfileDimension>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileGroup {
    pub group_id: String,
    pub services: Vec<ProfileService>,
}

/// The tree a `ProfileLoader` ultimately resolves to, consumed only by the
/// runner orchestrator (spec.md §6: "Profile loader provides a
/// ProfileDocument tree consumed by runner orchestrator only"). Parsing
/// this from the on-disk profile JSON is the out-of-scope profile
/// loader's job; the core only walks the resolved tree.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProfileDocument {
    pub groups: Vec<ProfileGroup>,
}

/// Loads a group/service catalog definition by group id.
#[async_trait]
pub trait CatalogLoader: Send + Sync {
    async fn load_group(&self, group_id: &str) -> Result<Value, AutopilotError>;
}

/// Loads the browser profile directory a run should launch with.
#[async_trait]
pub trait ProfileLoader: Send + Sync {
    async fn resolve_profile(&self, profile_name: &str) -> Result<PathBuf, AutopilotError>;
}

/// Allocates the path a failure screenshot should be written to and
/// ensures its parent directory exists. Naming follows spec.md §6's
/// failure screenshot template: `<dir>/<run_id>_<group>_<service>_<step>_<epoch_ms>.png`.
/// The caller (run orchestrator) performs the actual pixel capture via
/// `BrowserDriver::screenshot` against the returned path.
#[async_trait]
pub trait ScreenshotWriter: Send + Sync {
    async fn allocate(
        &self,
        run_id: &str,
        group_slug: &str,
        service_slug: &str,
        step_slug: &str,
        epoch_ms: i64,
    ) -> Result<PathBuf, AutopilotError>;
}

/// Promotes a reviewed draft catalog into the live catalog store.
#[async_trait]
pub trait Promoter: Send + Sync {
    async fn promote(&self, draft: &DraftCatalog) -> Result<(), AutopilotError>;
}

/// Filesystem-backed promoter: writes a reviewed draft into the live
/// catalog path `config/data/services/<service_id>.json`, the only write
/// spec.md §6 permits outside `.../generated/`. As simple and
/// path-safety-critical a contract as `ScreenshotWriter`'s, so it gets the
/// same treatment: a real minimal implementation rather than a test
/// double only. Refuses a `service_id` that would resolve outside the
/// catalog root.
pub struct FsPromoter {
    root: PathBuf,
}

impl FsPromoter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Promoter for FsPromoter {
    async fn promote(&self, draft: &DraftCatalog) -> Result<(), AutopilotError> {
        let catalog_dir = self.root.join("config/data/services");
        let path = catalog_dir.join(format!("{}.json", draft.service_id));
        if path.parent() != Some(catalog_dir.as_path()) {
            return Err(AutopilotError::Resolution(format!(
                "refusing to promote outside config/data/services: {}",
                path.display()
            )));
        }

        tokio::fs::create_dir_all(&catalog_dir)
            .await
            .map_err(|e| AutopilotError::ArtifactWrite {
                path: catalog_dir.display().to_string(),
                source: e,
            })?;
        let body = serde_json::to_vec_pretty(draft).map_err(|e| AutopilotError::ArtifactWrite {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| AutopilotError::ArtifactWrite {
                path: path.display().to_string(),
                source: e,
            })?;
        Ok(())
    }
}

/// Filesystem-backed screenshot writer rooted at a configured screenshots
/// directory (the run's `<screenshotsDir>` per spec.md §6). Every segment
/// is slugified before joining into a path, since `group_slug`/`service_slug`
/// may ultimately trace back to scanned page content.
pub struct FsScreenshotWriter {
    root: PathBuf,
}

impl FsScreenshotWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ScreenshotWriter for FsScreenshotWriter {
    async fn allocate(
        &self,
        run_id: &str,
        group_slug: &str,
        service_slug: &str,
        step_slug: &str,
        epoch_ms: i64,
    ) -> Result<PathBuf, AutopilotError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AutopilotError::ArtifactWrite {
                path: self.root.display().to_string(),
                source: e,
            })?;

        let filename = format!(
            "{}_{}_{}_{}_{}.png",
            sanitize_path_component(run_id),
            sanitize_path_component(group_slug),
            sanitize_path_component(service_slug),
            sanitize_path_component(step_slug),
            epoch_ms
        );
        Ok(self.root.join(filename))
    }
}

/// Strips path separators and parent-directory references from a value
/// destined to become a filesystem path component.
fn sanitize_path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '.' { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// In-memory catalog loader for tests: a fixed map of group id to the raw
/// JSON document that would otherwise be read from the catalog store.
#[derive(Default)]
pub struct InMemoryCatalogLoader {
    groups: HashMap<String, Value>,
}

impl InMemoryCatalogLoader {
    pub fn new(groups: HashMap<String, Value>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl CatalogLoader for InMemoryCatalogLoader {
    async fn load_group(&self, group_id: &str) -> Result<Value, AutopilotError> {
        self.groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| AutopilotError::Resolution(format!("no catalog entry for group '{group_id}'")))
    }
}

/// In-memory profile loader for tests: returns a fixed directory regardless
/// of the requested profile name.
pub struct FixedProfileLoader {
    path: PathBuf,
}

impl FixedProfileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ProfileLoader for FixedProfileLoader {
    async fn resolve_profile(&self, _profile_name: &str) -> Result<PathBuf, AutopilotError> {
        Ok(self.path.clone())
    }
}

/// In-memory promoter for tests: records every draft it was asked to
/// promote instead of writing anywhere.
#[derive(Default)]
pub struct RecordingPromoter {
    promoted: Mutex<Vec<DraftCatalog>>,
}

impl RecordingPromoter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn promoted(&self) -> Vec<DraftCatalog> {
        self.promoted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Promoter for RecordingPromoter {
    async fn promote(&self, draft: &DraftCatalog) -> Result<(), AutopilotError> {
        self.promoted.lock().unwrap().push(draft.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_path_component_strips_traversal() {
        assert_eq!(sanitize_path_component("../../etc/passwd"), "_________etc_passwd");
        assert_eq!(sanitize_path_component("ec2"), "ec2");
        assert_eq!(sanitize_path_component(""), "unknown");
    }

    #[tokio::test]
    async fn fs_screenshot_writer_allocates_under_root_with_spec_naming() {
        let tmp = std::env::temp_dir().join(format!("autopilot-test-{}", std::process::id()));
        let writer = FsScreenshotWriter::new(&tmp);
        let path = writer
            .allocate("run_20260101_000000", "compute", "ec2", "instance_type", 1_700_000_000_000)
            .await
            .unwrap();
        assert!(path.starts_with(&tmp));
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "run_20260101_000000_compute_ec2_instance_type_1700000000000.png"
        );
        let _ = tokio::fs::remove_dir_all(&tmp).await;
    }

    fn sample_draft(service_id: &str) -> DraftCatalog {
        DraftCatalog {
            service_id: service_id.to_string(),
            schema_version: DraftCatalog::SCHEMA_VERSION.to_string(),
            generated_at: "2026-01-01T00:00:00Z".into(),
            source: "https://example.test".into(),
            region_used: None,
            ui_mapping: crate::model::UiMapping {
                search_terms: vec![],
                card_title: "x".into(),
                configure_button_label: "Configure".into(),
            },
            gate_controls: vec![],
            sections: vec![],
            geo_sections: None,
            exploration_meta: None,
        }
    }

    #[tokio::test]
    async fn fs_promoter_writes_under_catalog_dir() {
        let tmp = std::env::temp_dir().join(format!("autopilot-promoter-test-{}", std::process::id()));
        let promoter = FsPromoter::new(&tmp);
        promoter.promote(&sample_draft("ec2")).await.unwrap();
        let path = tmp.join("config/data/services/ec2.json");
        assert!(tokio::fs::try_exists(&path).await.unwrap());
        let _ = tokio::fs::remove_dir_all(&tmp).await;
    }

    #[tokio::test]
    async fn fs_promoter_refuses_traversal_in_service_id() {
        let tmp = std::env::temp_dir().join(format!("autopilot-promoter-test-2-{}", std::process::id()));
        let promoter = FsPromoter::new(&tmp);
        let result = promoter.promote(&sample_draft("../../etc/passwd")).await;
        assert!(result.is_err());
    }
}
