//! Entities shared across the exploration and locator/interaction
//! subsystems: dimensions, gate controls, exploration states, and the
//! result trees produced by a run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sentinel used for an unresolved CSS selector, section, or similar field.
pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    Text,
    Select,
    Combobox,
    Toggle,
    Radio,
    InstanceSearch,
    Unknown,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Number => "NUMBER",
            FieldType::Text => "TEXT",
            FieldType::Select => "SELECT",
            FieldType::Combobox => "COMBOBOX",
            FieldType::Toggle => "TOGGLE",
            FieldType::Radio => "RADIO",
            FieldType::InstanceSearch => "INSTANCE_SEARCH",
            FieldType::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

impl FieldType {
    /// The weight used in the confidence formula (`overall = min(label,
    /// section) * 0.6 + field_type_conf * 0.4`). Unknown carries the lowest
    /// confidence since it means no detection tier matched cleanly.
    pub fn confidence(&self) -> f64 {
        match self {
            FieldType::Unknown => 0.3,
            FieldType::InstanceSearch => 0.7,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    Toggle,
    Radio,
    Select,
    Combobox,
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    AriaLabel,
    AriaLabelledby,
    LabelFor,
    LabelWrap,
    Heuristic,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    P6RepeatableRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionStatus {
    Ok,
    ReviewRequired,
    Conflict,
}

impl fmt::Display for DimensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DimensionStatus::Ok => "OK",
            DimensionStatus::ReviewRequired => "REVIEW_REQUIRED",
            DimensionStatus::Conflict => "CONFLICT",
        };
        write!(f, "{s}")
    }
}

/// Per-dimension confidence record. `overall` is derived, never set
/// directly; use `Confidence::new` to compute it per the invariant in
/// spec §3: `overall = min(label, section) * 0.6 + field_type_conf * 0.4`,
/// rounded to 3 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub label: f64,
    pub section: f64,
    pub overall: f64,
}

impl Confidence {
    pub fn new(label: f64, section: f64, field_type_conf: f64) -> Self {
        let overall = label.min(section) * 0.6 + field_type_conf * 0.4;
        let overall = (overall * 1000.0).round() / 1000.0;
        Self {
            label,
            section,
            overall,
        }
    }

    /// Status threshold mapping from §3: OK if overall >= 0.75,
    /// REVIEW_REQUIRED if 0.5 <= overall < 0.75, CONFLICT otherwise.
    /// Callers additionally force CONFLICT on duplicate aria_label and
    /// at least REVIEW_REQUIRED on an unresolved section, per the
    /// dedup/confidence pipeline in the synthesizer.
    pub fn status(&self) -> DimensionStatus {
        if self.overall >= 0.75 {
            DimensionStatus::Ok
        } else if self.overall >= 0.5 {
            DimensionStatus::ReviewRequired
        } else {
            DimensionStatus::Conflict
        }
    }
}

/// A reference to a paired unit dimension merged into a base dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSibling {
    pub default_value: Option<String>,
    pub options: Vec<String>,
    pub aria_label: Option<String>,
}

/// A configurable form field discovered on the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    pub key: String,
    pub label_visible: String,
    pub aria_label: Option<String>,
    pub field_type: FieldType,
    pub section: String,
    pub css_selector: String,
    pub options: Vec<String>,
    pub default_value: Option<String>,
    pub unit: Option<String>,
    pub unit_sibling: Option<UnitSibling>,
    pub required: bool,
    pub pattern_type: Option<PatternType>,
    pub label_source: LabelSource,
    pub confidence: Confidence,
    pub status: DimensionStatus,
    pub discovered_in_state: String,
    /// Disambiguation suffix assigned when two UNKNOWN-selector dimensions
    /// collide on cleaned key during dedup (§4.7 step 1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disambiguation_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_button_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_note: Option<String>,
}

/// A control capable of revealing new fields when actuated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateControl {
    pub key: String,
    pub aria_label: Option<String>,
    pub gate_type: GateType,
    pub default_state: Option<String>,
    pub css_selector: String,
    pub options: Vec<String>,
    pub sections_gated: Vec<String>,
}

/// How a state was entered: via which gate control, which action, and
/// from which prior state. Every state except S0 has `from_state: Some`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnteredVia {
    pub gate_control: Option<String>,
    pub action: Option<String>,
    pub from_state: Option<String>,
}

impl EnteredVia {
    pub fn root() -> Self {
        Self {
            gate_control: None,
            action: None,
            from_state: None,
        }
    }
}

/// A node in the exploration graph: a fingerprint plus the action sequence
/// that reproduces it from S0. States are stored flat in `StateTracker`;
/// ancestry is reconstructed by following `entered_via.from_state` rather
/// than by parent pointers (see DESIGN.md: cyclic graphs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub state_id: String,
    pub entered_via: EnteredVia,
    pub fingerprint: String,
    pub sequence: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionOutcome {
    Filled,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionResult {
    pub key: String,
    pub status: DimensionOutcome,
    pub error_detail: Option<String>,
    pub screenshot_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
}

impl RunStatus {
    /// Worst-of rule from §3/P-status-monotone: failed > partial_success >
    /// success. Applied identically at every level of the result tree
    /// (dimension -> service -> group -> run).
    pub fn worst(statuses: impl IntoIterator<Item = RunStatus>) -> RunStatus {
        statuses.into_iter().max().unwrap_or(RunStatus::Success)
    }
}

impl From<DimensionOutcome> for RunStatus {
    fn from(o: DimensionOutcome) -> Self {
        match o {
            DimensionOutcome::Filled => RunStatus::Success,
            DimensionOutcome::Skipped => RunStatus::PartialSuccess,
            DimensionOutcome::Failed => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub filled: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl Metrics {
    pub fn merge(&mut self, other: &Metrics) {
        self.filled += other.filled;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    pub fn record(&mut self, outcome: DimensionOutcome) {
        match outcome {
            DimensionOutcome::Filled => self.filled += 1,
            DimensionOutcome::Skipped => self.skipped += 1,
            DimensionOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResult {
    pub service_id: String,
    pub dimensions: Vec<DimensionResult>,
    pub metrics: Metrics,
    pub status: RunStatus,
}

impl ServiceResult {
    pub fn finalize(service_id: String, dimensions: Vec<DimensionResult>) -> Self {
        let mut metrics = Metrics::default();
        for d in &dimensions {
            metrics.record(d.status);
        }
        let status = RunStatus::worst(dimensions.iter().map(|d| RunStatus::from(d.status)));
        Self {
            service_id,
            dimensions,
            metrics,
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResult {
    pub group_id: String,
    pub services: Vec<ServiceResult>,
    pub metrics: Metrics,
    pub status: RunStatus,
}

impl GroupResult {
    pub fn finalize(group_id: String, services: Vec<ServiceResult>) -> Self {
        let mut metrics = Metrics::default();
        for s in &services {
            metrics.merge(&s.metrics);
        }
        let status = RunStatus::worst(services.iter().map(|s| s.status));
        Self {
            group_id,
            services,
            metrics,
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub groups: Vec<GroupResult>,
    pub metrics: Metrics,
    pub status: RunStatus,
}

impl RunResult {
    pub fn finalize(run_id: String, groups: Vec<GroupResult>) -> Self {
        let mut metrics = Metrics::default();
        for g in &groups {
            metrics.merge(&g.metrics);
        }
        let status = RunStatus::worst(groups.iter().map(|g| g.status));
        Self {
            run_id,
            groups,
            metrics,
            status,
        }
    }
}

/// Exit codes per spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    PreflightFailure = 1,
    PartialSuccess = 2,
    BrowserLaunchFailure = 3,
    ArtifactWriteFailure = 4,
    Interrupted = 5,
}

impl RunResult {
    pub fn exit_code(&self) -> ExitCode {
        match self.status {
            RunStatus::Success => ExitCode::Success,
            RunStatus::PartialSuccess => ExitCode::PartialSuccess,
            RunStatus::Failed => ExitCode::PartialSuccess,
        }
    }
}

/// UI mapping metadata copied into the draft catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiMapping {
    pub search_terms: Vec<String>,
    pub card_title: String,
    pub configure_button_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftSection {
    pub key: String,
    pub label: String,
    pub state_id: String,
    pub entered_via: EnteredVia,
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRegion {
    pub key: String,
    pub label: String,
    pub aws_section_heading: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoSections {
    pub template_dimensions: Vec<Dimension>,
    pub regions: Vec<GeoRegion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplorationMeta {
    pub activated_toggles: Vec<String>,
    pub exploration_states: u32,
    pub exploration_budget_hit: bool,
    pub screenshots: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftCatalog {
    pub service_id: String,
    pub schema_version: String,
    pub generated_at: String,
    pub source: String,
    pub region_used: Option<String>,
    pub ui_mapping: UiMapping,
    pub gate_controls: Vec<GateControl>,
    pub sections: Vec<DraftSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_sections: Option<GeoSections>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exploration_meta: Option<ExplorationMeta>,
}

impl DraftCatalog {
    pub const SCHEMA_VERSION: &'static str = "2.0";
}

/// Label/selector/fingerprint cleaning shared by the scanner, synthesizer,
/// and explorer. Mirrors the teacher's `normalize` helper but keeps case
/// for cleaned *keys* (only whitespace/punctuation collapse), since key
/// equality drives dedup and must match dimension provenance exactly.
pub fn clean_key(label: &str) -> String {
    label.trim().split_whitespace().collect::<Vec<_>>().join(" ")
}

pub type SectionMap<V> = HashMap<String, V>;

/// Escapes a value for embedding in a CSS attribute-selector string.
/// Shared by the scanner (selector derivation) and the locator (tier-1/2
/// selector construction).
pub fn escape_css_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_overall_matches_spec_formula() {
        let c = Confidence::new(0.9, 0.8, 1.0);
        // min(0.9, 0.8) * 0.6 + 1.0 * 0.4 = 0.48 + 0.4 = 0.88
        assert!((c.overall - 0.88).abs() < 5e-4);
        assert_eq!(c.status(), DimensionStatus::Ok);
    }

    #[test]
    fn confidence_rounds_to_three_decimals() {
        let c = Confidence::new(0.333_333_3, 0.666_666_6, 0.5);
        assert_eq!(c.overall, 0.4);
    }

    #[test]
    fn status_thresholds_follow_spec_boundaries() {
        assert_eq!(Confidence::new(1.0, 1.0, 1.0).status(), DimensionStatus::Ok);
        assert_eq!(
            Confidence::new(0.75, 0.75, 0.75).status(),
            DimensionStatus::Ok
        );
        assert_eq!(
            Confidence::new(0.5, 0.5, 0.5).status(),
            DimensionStatus::ReviewRequired
        );
        assert_eq!(
            Confidence::new(0.0, 0.0, 0.0).status(),
            DimensionStatus::Conflict
        );
    }

    #[test]
    fn field_type_confidence_weights() {
        assert_eq!(FieldType::Unknown.confidence(), 0.3);
        assert_eq!(FieldType::InstanceSearch.confidence(), 0.7);
        assert_eq!(FieldType::Number.confidence(), 1.0);
        assert_eq!(FieldType::Select.confidence(), 1.0);
    }

    #[test]
    fn run_status_worst_of_is_monotone() {
        assert_eq!(
            RunStatus::worst([RunStatus::Success, RunStatus::PartialSuccess]),
            RunStatus::PartialSuccess
        );
        assert_eq!(
            RunStatus::worst([
                RunStatus::Success,
                RunStatus::PartialSuccess,
                RunStatus::Failed
            ]),
            RunStatus::Failed
        );
        assert_eq!(RunStatus::worst(std::iter::empty()), RunStatus::Success);
    }

    #[test]
    fn run_result_status_rolls_up_through_group_and_service() {
        let dim_ok = DimensionResult {
            key: "a".into(),
            status: DimensionOutcome::Filled,
            error_detail: None,
            screenshot_path: None,
        };
        let dim_skipped = DimensionResult {
            key: "b".into(),
            status: DimensionOutcome::Skipped,
            error_detail: None,
            screenshot_path: None,
        };
        let svc_success = ServiceResult::finalize("svc-a".into(), vec![dim_ok.clone()]);
        let svc_partial = ServiceResult::finalize("svc-b".into(), vec![dim_skipped.clone()]);
        assert_eq!(svc_success.status, RunStatus::Success);
        assert_eq!(svc_partial.status, RunStatus::PartialSuccess);

        let group_a = GroupResult::finalize("group-a".into(), vec![svc_success.clone()]);
        let group_b = GroupResult::finalize("group-b".into(), vec![svc_partial]);
        let run = RunResult::finalize(
            "run_1".into(),
            vec![group_a.clone(), group_b.clone()],
        );
        assert_eq!(run.status, RunStatus::PartialSuccess);

        let dim_failed = DimensionResult {
            key: "c".into(),
            status: DimensionOutcome::Failed,
            error_detail: Some("boom".into()),
            screenshot_path: None,
        };
        let svc_failed = ServiceResult::finalize("svc-c".into(), vec![dim_failed]);
        let group_c = GroupResult::finalize("group-c".into(), vec![svc_failed]);
        let run_with_failure =
            RunResult::finalize("run_2".into(), vec![group_a, group_b, group_c]);
        assert_eq!(run_with_failure.status, RunStatus::Failed);
    }

    #[test]
    fn clean_key_collapses_whitespace() {
        assert_eq!(clean_key("  EBS   Storage  "), "EBS Storage");
    }

    #[test]
    fn escape_css_value_escapes_quotes_and_backslashes() {
        assert_eq!(escape_css_value(r#"a"b\c"#), r#"a\"b\\c"#);
    }
}
