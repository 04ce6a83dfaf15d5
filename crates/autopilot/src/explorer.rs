//! State-graph explorer (spec.md §4.7): a BFS walker over gate-actuated
//! states, plus the dimension-recording pipeline (dedup, unit merge,
//! repeatable-row detection, confidence/status) that turns the raw
//! per-state scans into the set the synthesizer (§4.8) builds a draft
//! from.
//!
//! `StateTracker` owns a flat `Vec<State>` plus a fingerprint->state_id
//! map rather than a parent-pointer tree, per §9's explicit guidance:
//! ancestry is reconstructed by following `entered_via.from_state`, and
//! a state is reproduced by replaying its `sequence` from a freshly
//! restored base rather than by cloning page state.

use std::collections::{HashMap, HashSet, VecDeque};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::driver::{BrowserDriver, ClickOptions, WaitMode};
use crate::errors::AutopilotError;
use crate::model::{
    clean_key, Confidence, Dimension, EnteredVia, FieldType, GateControl, GateType, LabelSource,
    PatternType, State, UNKNOWN,
};
use crate::scanner::{self, Inventory};

pub struct StateTracker {
    pub states: Vec<State>,
    pub visited_fingerprints: HashMap<String, String>,
    pub activated_toggles: Vec<String>,
    pub budget_hit: bool,
    pub current_state: String,
    pub gate_controls_status: HashMap<String, String>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            states: Vec::new(),
            visited_fingerprints: HashMap::new(),
            activated_toggles: Vec::new(),
            budget_hit: false,
            current_state: String::new(),
            gate_controls_status: HashMap::new(),
        }
    }

    fn next_state_id(&self) -> String {
        format!("S{}", self.states.len())
    }

    fn at_budget(&self, max_states: u32) -> bool {
        self.states.len() as u32 >= max_states
    }
}

/// A field scanned from one state, still carrying raw label/selector
/// metadata; not yet passed through the dedup pipeline.
#[derive(Debug, Clone)]
struct RawDimension {
    dimension: Dimension,
}

/// Content-addressed digest over the set of visible headings and field
/// labels, per spec.md §4.7. Uses `blake3` (already a teacher dependency)
/// truncated to 16 hex chars, per SPEC_FULL.md §9(b)'s "any stable hash
/// with equivalent avalanche" allowance.
pub fn fingerprint(inventories: &[Inventory]) -> String {
    let mut tokens: Vec<String> = Vec::new();
    for inv in inventories {
        tokens.push(format!("section:{}", inv.section));
        for el in &inv.elements {
            let field_token = el.aria_label.clone().unwrap_or_else(|| el.label_visible.clone());
            tokens.push(format!("field:{field_token}"));
        }
    }
    tokens.sort();
    tokens.dedup();
    let joined = tokens.join("\n");
    blake3::hash(joined.as_bytes()).to_hex()[..16].to_string()
}

#[derive(Debug, Clone)]
enum ActionKind {
    Click,
    Select(String),
}

#[derive(Debug, Clone)]
struct Action {
    gate_key: String,
    selector: String,
    kind: ActionKind,
}

impl Action {
    fn descriptor(&self) -> String {
        match &self.kind {
            ActionKind::Click => "click".to_string(),
            ActionKind::Select(v) => format!("select:{v}"),
        }
    }

    async fn apply(&self, driver: &dyn BrowserDriver) -> Result<(), AutopilotError> {
        let Some(el) = driver.query(&self.selector).await? else {
            return Err(AutopilotError::ElementNotVisible(self.selector.clone()));
        };
        match &self.kind {
            ActionKind::Click => {
                el.click(ClickOptions::default()).await?;
            }
            ActionKind::Select(value) => {
                el.select_option(Some(value), None).await?;
            }
        }
        Ok(())
    }
}

fn actions_for_gate(gate: &GateControl, cap: u32) -> Vec<Action> {
    match gate.gate_type {
        GateType::Toggle => vec![Action {
            gate_key: gate.key.clone(),
            selector: gate.css_selector.clone(),
            kind: ActionKind::Click,
        }],
        GateType::Radio | GateType::Select | GateType::Combobox => gate
            .options
            .iter()
            .filter(|opt| Some(opt.as_str()) != gate.default_state.as_deref())
            .take(cap as usize)
            .map(|opt| Action {
                gate_key: gate.key.clone(),
                selector: gate.css_selector.clone(),
                kind: ActionKind::Select(opt.clone()),
            })
            .collect(),
    }
}

/// Restores the page to `configure_url` and replays `sequence`. Returns
/// `Ok(false)` (not an error) when any step can't find its target, so
/// callers skip the branch instead of aborting exploration.
async fn restore_and_replay(
    driver: &dyn BrowserDriver,
    configure_url: &str,
    gates: &[GateControl],
    sequence: &[String],
) -> Result<bool, AutopilotError> {
    driver.goto(configure_url, WaitMode::Load).await?;
    expand_sections(driver).await?;
    for descriptor in sequence {
        let Some(action) = resolve_descriptor(gates, descriptor) else {
            return Ok(false);
        };
        if action.apply(driver).await.is_err() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn resolve_descriptor(gates: &[GateControl], descriptor: &str) -> Option<Action> {
    let (gate_key, kind) = if let Some(value) = descriptor.strip_prefix("select:") {
        let gate = gates.iter().find(|g| {
            actions_for_gate(g, u32::MAX)
                .iter()
                .any(|a| a.descriptor() == format!("select:{value}"))
        })?;
        (gate.key.clone(), ActionKind::Select(value.to_string()))
    } else {
        let gate = gates.iter().find(|g| matches!(g.gate_type, GateType::Toggle))?;
        (gate.key.clone(), ActionKind::Click)
    };
    let gate = gates.iter().find(|g| g.key == gate_key)?;
    Some(Action {
        gate_key,
        selector: gate.css_selector.clone(),
        kind,
    })
}

/// Converts one scanned element into a raw `Dimension`, with placeholder
/// label/section confidence sub-scores derived from provenance (spec.md
/// §3 names the overall formula but not these sub-scores; the mapping
/// below is this implementation's resolved Open Question, recorded in
/// DESIGN.md).
fn label_confidence(source: LabelSource) -> f64 {
    match source {
        LabelSource::AriaLabel => 1.0,
        LabelSource::AriaLabelledby => 0.9,
        LabelSource::LabelFor => 0.85,
        LabelSource::LabelWrap => 0.75,
        LabelSource::Heuristic => 0.55,
        LabelSource::None => 0.2,
    }
}

fn to_dimension(scanned: &scanner::ScannedElement, state_id: &str, options: Vec<String>) -> Dimension {
    let section_conf = if scanned.section == UNKNOWN { 0.3 } else { 1.0 };
    let confidence = Confidence::new(
        label_confidence(scanned.label_source),
        section_conf,
        scanned.field_type.confidence(),
    );
    let status = confidence.status();
    Dimension {
        key: clean_key(&scanned.label_visible),
        label_visible: scanned.label_visible.clone(),
        aria_label: scanned.aria_label.clone(),
        field_type: scanned.field_type,
        section: scanned.section.clone(),
        css_selector: scanned.css_selector.clone(),
        options,
        default_value: scanned.default_value.clone(),
        unit: None,
        unit_sibling: None,
        required: scanned.required,
        pattern_type: None,
        label_source: scanned.label_source,
        confidence,
        status,
        discovered_in_state: state_id.to_string(),
        disambiguation_index: None,
        semantic_role: None,
        row_fields: None,
        add_button_label: None,
        review_note: None,
    }
}

async fn scan_and_record(
    driver: &dyn BrowserDriver,
    state_id: &str,
    collected: &mut Vec<RawDimension>,
) -> Result<Vec<Inventory>, AutopilotError> {
    let inventories = scanner::scan(driver).await?;
    for inv in &inventories {
        for el in &inv.elements {
            let options = if matches!(
                el.field_type,
                FieldType::Select | FieldType::Combobox | FieldType::Radio
            ) {
                match driver.query(&el.css_selector).await {
                    Ok(Some(handle)) => crate::options::scan_options(driver, &handle, el.field_type)
                        .await
                        .unwrap_or_default(),
                    _ => Vec::new(),
                }
            } else {
                Vec::new()
            };
            collected.push(RawDimension {
                dimension: to_dimension(el, state_id, options),
            });
        }
    }
    Ok(inventories)
}

/// Discovers and expands collapsed sections (spec.md §2 phase 3), so
/// gate controls and dimensions hidden behind an accordion/disclosure
/// widget are visible before scanning. Idempotent: only actuates a
/// trigger whose `aria-expanded` is explicitly `"false"`, so a repeat
/// call (e.g. after `restore_and_replay`'s fresh navigation) never
/// toggles an already-expanded section shut.
pub async fn expand_sections(driver: &dyn BrowserDriver) -> Result<(), AutopilotError> {
    let triggers = driver
        .query_all("[data-accordion-trigger], summary, [aria-expanded]")
        .await?;
    for trigger in triggers {
        if !trigger.is_visible().await? {
            continue;
        }
        if trigger.get_attribute("aria-expanded").await?.as_deref() == Some("false") {
            let _ = trigger.click(ClickOptions::default()).await;
        }
    }
    Ok(())
}

/// Selector matching any control capable of gating other fields: the
/// element kinds spec.md §3 lists for `GateControl::gate_type`
/// (TOGGLE/RADIO/SELECT/COMBOBOX).
const GATE_SELECTOR: &str =
    "input[type=checkbox], [role=switch], input[type=radio], [role=radio], select, [role=combobox]";

/// Builds the gate-control set the BFS driver actuates, by scanning the
/// currently-rendered state (normally S0, after section expansion) for
/// toggle/radio/select/combobox controls and enumerating each one's
/// options via the options scanner (spec.md §4.6). Same-selector
/// duplicates (e.g. every radio in a group resolving to the group's own
/// selector) are collapsed to a single `GateControl`.
pub async fn discover_gate_controls(
    driver: &dyn BrowserDriver,
) -> Result<Vec<GateControl>, AutopilotError> {
    let candidates = driver.query_all(GATE_SELECTOR).await?;
    let mut seen_selectors: HashSet<String> = HashSet::new();
    let mut gates = Vec::new();

    for el in candidates {
        if !el.is_visible().await? {
            continue;
        }
        let field_type = crate::locator::detect_field_type(driver, &el).await?;
        let gate_type = match field_type {
            FieldType::Toggle => GateType::Toggle,
            FieldType::Radio => GateType::Radio,
            FieldType::Select => GateType::Select,
            FieldType::Combobox => GateType::Combobox,
            _ => continue,
        };

        let css_selector = scanner::derive_selector(el.as_ref()).await?;
        if css_selector != UNKNOWN && !seen_selectors.insert(css_selector.clone()) {
            continue;
        }

        let (label_visible, _source) = scanner::derive_label(driver, el.as_ref()).await?;
        let aria_label = el.get_attribute("aria-label").await?;
        let section = el
            .get_attribute("section")
            .await?
            .map(|s| scanner::clean_section_name(&s))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let default_state = el
            .get_attribute("aria-checked")
            .await?
            .or(el.get_attribute("checked").await?)
            .or(el.get_attribute("value").await?);
        let options = crate::options::scan_options(driver, &el, field_type).await?;

        gates.push(GateControl {
            key: clean_key(&label_visible),
            aria_label,
            gate_type,
            default_state,
            css_selector,
            options,
            sections_gated: vec![section],
        });
    }

    Ok(gates)
}

pub struct ExplorationOutput {
    pub tracker: StateTracker,
    pub dimensions: Vec<Dimension>,
}

/// BFS driver over gate-actuated states (spec.md §4.7), followed by the
/// toggle-exhaustion, radio-card, and select-sampling sweeps, then the
/// dimension-recording pipeline (dedup -> unit merge -> repeatable-row ->
/// confidence/status).
pub async fn explore(
    driver: &dyn BrowserDriver,
    configure_url: &str,
    gates: &[GateControl],
    cfg: &RunConfig,
) -> Result<ExplorationOutput, AutopilotError> {
    let mut tracker = StateTracker::new();
    let mut raw: Vec<RawDimension> = Vec::new();

    driver.goto(configure_url, WaitMode::Load).await?;
    expand_sections(driver).await?;
    let base_inventories = scan_and_record(driver, "S0", &mut raw).await?;
    let s0_fp = fingerprint(&base_inventories);
    let s0 = State {
        state_id: "S0".to_string(),
        entered_via: EnteredVia::root(),
        fingerprint: s0_fp.clone(),
        sequence: Vec::new(),
    };
    tracker.visited_fingerprints.insert(s0_fp, s0.state_id.clone());
    tracker.current_state = s0.state_id.clone();
    tracker.states.push(s0);

    let mut queue: VecDeque<(Vec<String>, String)> = VecDeque::new();
    queue.push_back((Vec::new(), "S0".to_string()));

    'bfs: while let Some((sequence, from_state)) = queue.pop_front() {
        for gate in gates {
            for action in actions_for_gate(gate, cfg.max_options_per_select) {
                if tracker.at_budget(cfg.max_states) {
                    tracker.budget_hit = true;
                    warn!(event_type = "budget_hit", max_states = cfg.max_states, "exploration budget reached");
                    break 'bfs;
                }

                if !restore_and_replay(driver, configure_url, gates, &sequence).await? {
                    continue;
                }
                if action.apply(driver).await.is_err() {
                    continue;
                }
                if matches!(gate.gate_type, GateType::Toggle) {
                    tracker.activated_toggles.push(gate.key.clone());
                }

                let inventories = scan_and_record(driver, &tracker.next_state_id(), &mut raw).await?;
                let fp = fingerprint(&inventories);

                if let Some(existing) = tracker.visited_fingerprints.get(&fp) {
                    debug!(state = %existing, "fingerprint already visited, dropping branch");
                } else {
                    let new_sequence: Vec<String> =
                        sequence.iter().cloned().chain(std::iter::once(action.descriptor())).collect();
                    let state_id = tracker.next_state_id();
                    let state = State {
                        state_id: state_id.clone(),
                        entered_via: EnteredVia {
                            gate_control: Some(gate.key.clone()),
                            action: Some(action.descriptor()),
                            from_state: Some(from_state.clone()),
                        },
                        fingerprint: fp.clone(),
                        sequence: new_sequence.clone(),
                    };
                    tracker.visited_fingerprints.insert(fp, state_id.clone());
                    // Re-tag the dimensions just scanned under this state's
                    // real id (they were scanned before we knew it).
                    retag_last_scan(&mut raw, &state_id, inventories_dim_count(&inventories));
                    tracker.states.push(state);
                    tracing::info!(event_type = "state_recorded", state = %state_id, "new state recorded");
                    queue.push_back((new_sequence, state_id));
                }
            }
        }
    }

    if !tracker.budget_hit {
        run_toggle_exhaustion_sweep(driver, configure_url, &mut tracker, &mut raw, cfg).await?;
        run_radio_card_sweep(driver, configure_url, &mut tracker, &mut raw, cfg).await?;
        run_select_sampling_sweep(driver, configure_url, &mut tracker, &mut raw, cfg).await?;
    }

    let dimensions = raw.into_iter().map(|r| r.dimension).collect();
    let dimensions = run_dedup_pipeline(driver, dimensions).await?;

    Ok(ExplorationOutput { tracker, dimensions })
}

/// The scanner doesn't know a state's id until after the fingerprint
/// lookup; fix up the trailing N freshly-pushed raw dimensions in place.
fn retag_last_scan(raw: &mut [RawDimension], state_id: &str, count: usize) {
    let len = raw.len();
    for r in raw[len.saturating_sub(count)..].iter_mut() {
        r.dimension.discovered_in_state = state_id.to_string();
    }
}

fn inventories_dim_count(inventories: &[Inventory]) -> usize {
    inventories.iter().map(|i| i.elements.len()).sum()
}

/// Up to 100 iterations: find the first visible unchecked switch/checkbox,
/// click it ON, scan, restore it OFF; stops when no candidates remain.
async fn run_toggle_exhaustion_sweep(
    driver: &dyn BrowserDriver,
    configure_url: &str,
    tracker: &mut StateTracker,
    raw: &mut Vec<RawDimension>,
    cfg: &RunConfig,
) -> Result<(), AutopilotError> {
    driver.goto(configure_url, WaitMode::Load).await?;
    expand_sections(driver).await?;
    for _ in 0..100 {
        if tracker.at_budget(cfg.max_states) {
            tracker.budget_hit = true;
            break;
        }
        let candidates = driver.query_all("[role=switch], [role=checkbox], input[type=checkbox]").await?;
        let mut target = None;
        for c in candidates {
            if c.is_visible().await?
                && c.get_attribute("aria-checked")
                    .await?
                    .or(c.get_attribute("checked").await?)
                    .map(|v| v != "true")
                    .unwrap_or(true)
            {
                target = Some(c);
                break;
            }
        }
        let Some(target) = target else { break };
        target.click(ClickOptions::default()).await?;
        let inventories = scan_and_record(driver, &tracker.next_state_id(), raw).await?;
        record_if_unseen(tracker, raw, &inventories, None, "toggle_exhaustion");
        target.click(ClickOptions::default()).await?;
    }
    Ok(())
}

/// Radios grouped by `name`; for each group and each non-default option,
/// select it and scan. Radios are never restored.
async fn run_radio_card_sweep(
    driver: &dyn BrowserDriver,
    configure_url: &str,
    tracker: &mut StateTracker,
    raw: &mut Vec<RawDimension>,
    cfg: &RunConfig,
) -> Result<(), AutopilotError> {
    driver.goto(configure_url, WaitMode::Load).await?;
    expand_sections(driver).await?;
    let radios = driver.query_all("[role=radio], input[type=radio]").await?;
    let mut seen_groups: HashSet<String> = HashSet::new();
    for radio in &radios {
        let Some(name) = radio.get_attribute("name").await? else { continue };
        if !seen_groups.insert(name.clone()) {
            continue;
        }
        let group = driver.query_all(&format!("input[name=\"{name}\"]")).await?;
        for option in group {
            if tracker.at_budget(cfg.max_states) {
                tracker.budget_hit = true;
                return Ok(());
            }
            let is_default = option
                .get_attribute("checked")
                .await?
                .map(|v| v == "true")
                .unwrap_or(false);
            if is_default {
                continue;
            }
            option.click(ClickOptions::default()).await?;
            let inventories = scan_and_record(driver, &tracker.next_state_id(), raw).await?;
            record_if_unseen(tracker, raw, &inventories, None, "radio_card");
        }
    }
    Ok(())
}

/// For each visible select/combobox, samples the first
/// `maxOptionsPerSelect` non-default options, selecting and scanning.
async fn run_select_sampling_sweep(
    driver: &dyn BrowserDriver,
    configure_url: &str,
    tracker: &mut StateTracker,
    raw: &mut Vec<RawDimension>,
    cfg: &RunConfig,
) -> Result<(), AutopilotError> {
    driver.goto(configure_url, WaitMode::Load).await?;
    expand_sections(driver).await?;
    let controls = driver.query_all("select, [role=combobox]").await?;
    for control in controls {
        if !control.is_visible().await? {
            continue;
        }
        let options = control.list_options().await.unwrap_or_default();
        let default = control.get_attribute("value").await?;
        let sampled: Vec<&String> = options
            .iter()
            .filter(|o| Some(*o) != default.as_ref())
            .take(cfg.max_options_per_select as usize)
            .collect();
        for opt in sampled {
            if tracker.at_budget(cfg.max_states) {
                tracker.budget_hit = true;
                return Ok(());
            }
            if control.select_option(Some(opt), None).await.is_err() {
                continue;
            }
            let inventories = scan_and_record(driver, &tracker.next_state_id(), raw).await?;
            record_if_unseen(tracker, raw, &inventories, None, "select_sampling");
        }
    }
    Ok(())
}

fn record_if_unseen(
    tracker: &mut StateTracker,
    raw: &mut [RawDimension],
    inventories: &[Inventory],
    from_state: Option<String>,
    sweep_name: &str,
) {
    let fp = fingerprint(inventories);
    if tracker.visited_fingerprints.contains_key(&fp) {
        return;
    }
    let state_id = tracker.next_state_id();
    tracker.visited_fingerprints.insert(fp.clone(), state_id.clone());
    retag_last_scan(raw, &state_id, inventories_dim_count(inventories));
    tracker.states.push(State {
        state_id: state_id.clone(),
        entered_via: EnteredVia {
            gate_control: None,
            action: Some(sweep_name.to_string()),
            from_state: from_state.or_else(|| Some("S0".to_string())),
        },
        fingerprint: fp,
        sequence: Vec::new(),
    });
    tracing::info!(event_type = "state_recorded", state = %state_id, sweep = sweep_name, "sweep state recorded");
}

// ---------------------------------------------------------------------
// Dimension recording pipeline (§4.7 steps 1-4).
// ---------------------------------------------------------------------

static UNIT_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^Unit\s+(.+)$").unwrap());
static UNIT_TAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(GB|TB|MB|KB|GiB|TiB|MiB|vCPUs?|Hours?|Months?|Years?|Requests?|IOPS|Mbps|Gbps)(/.*)?$").unwrap()
});

async fn run_dedup_pipeline(
    driver: &dyn BrowserDriver,
    dimensions: Vec<Dimension>,
) -> Result<Vec<Dimension>, AutopilotError> {
    let deduped = dedup_by_selector(dimensions);
    let mut merged = merge_unit_selectors(deduped);
    mark_repeatable_rows(driver, &mut merged).await?;
    let mut finalized = apply_confidence_and_conflicts(merged);
    finalized.sort_by(|a, b| a.discovered_in_state.cmp(&b.discovered_in_state));
    Ok(finalized)
}

/// Step 1: same css_selector merges; UNKNOWN-selector dimensions dedup by
/// cleaned key instead, with a monotonic `disambiguation_index` on
/// collision.
fn dedup_by_selector(dimensions: Vec<Dimension>) -> Vec<Dimension> {
    let mut by_selector: Vec<Dimension> = Vec::new();
    let mut unknown_key_counts: HashMap<String, u32> = HashMap::new();

    for dim in dimensions {
        if dim.css_selector != UNKNOWN {
            if let Some(existing) = by_selector.iter_mut().find(|d| d.css_selector == dim.css_selector) {
                merge_into(existing, dim);
                continue;
            }
            by_selector.push(dim);
        } else {
            let count = unknown_key_counts.entry(dim.key.clone()).or_insert(0);
            let mut dim = dim;
            if *count > 0 {
                dim.disambiguation_index = Some(*count);
            }
            *count += 1;
            by_selector.push(dim);
        }
    }
    by_selector
}

fn merge_into(existing: &mut Dimension, incoming: Dimension) {
    for opt in incoming.options {
        if !existing.options.contains(&opt) {
            existing.options.push(opt);
        }
    }
    if existing.unit.is_none() {
        existing.unit = incoming.unit;
    }
    if existing.default_value.is_none() {
        existing.default_value = incoming.default_value;
    }
    if existing.unit_sibling.is_none() {
        existing.unit_sibling = incoming.unit_sibling;
    }
    if existing.semantic_role.is_none() {
        existing.semantic_role = incoming.semantic_role;
    }
    if existing.pattern_type.is_none() {
        existing.pattern_type = incoming.pattern_type;
    }
    if matches!(existing.field_type, FieldType::Unknown) {
        existing.field_type = incoming.field_type;
    }
    existing.required = existing.required || incoming.required;
}

/// Step 2: a SELECT/RADIO/COMBOBOX whose key matches `^Unit\s+(.+)$` and
/// whose trailing phrase is a recognized unit tail merges into the
/// same-section dimension whose key is the longest prefix of the cleaned
/// base phrase.
fn merge_unit_selectors(dimensions: Vec<Dimension>) -> Vec<Dimension> {
    let mut unit_indices: Vec<usize> = Vec::new();
    for (i, d) in dimensions.iter().enumerate() {
        if matches!(d.field_type, FieldType::Select | FieldType::Radio | FieldType::Combobox) {
            if let Some(caps) = UNIT_KEY_RE.captures(&d.key) {
                let tail = &caps[1];
                if UNIT_TAIL_RE.is_match(tail) {
                    unit_indices.push(i);
                }
            }
        }
    }

    let mut consumed: HashSet<usize> = HashSet::new();
    let mut result = dimensions.clone();

    for &unit_idx in &unit_indices {
        let unit_dim = dimensions[unit_idx].clone();
        let base_phrase = UNIT_KEY_RE.captures(&unit_dim.key).unwrap()[1].to_string();

        let mut best_match: Option<usize> = None;
        let mut best_len = 0usize;
        for (i, d) in dimensions.iter().enumerate() {
            if i == unit_idx || consumed.contains(&i) || d.section != unit_dim.section {
                continue;
            }
            if base_phrase.starts_with(&d.key) && d.key.len() > best_len {
                best_match = Some(i);
                best_len = d.key.len();
            }
        }

        if let Some(base_idx) = best_match {
            if let Some(base) = result.iter_mut().find(|d| d.key == dimensions[base_idx].key && d.section == dimensions[base_idx].section) {
                base.unit = unit_dim.default_value.clone();
                base.unit_sibling = Some(crate::model::UnitSibling {
                    default_value: unit_dim.default_value.clone(),
                    options: unit_dim.options.clone(),
                    aria_label: unit_dim.aria_label.clone(),
                });
            }
            consumed.insert(unit_idx);
        }
    }

    result
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !consumed.contains(i))
        .map(|(_, d)| d)
        .collect()
}

/// Step 4: confidence already computed per-dimension at scan time;
/// duplicate `aria_label` forces CONFLICT, and an unresolved section
/// forces at least REVIEW_REQUIRED.
fn apply_confidence_and_conflicts(mut dimensions: Vec<Dimension>) -> Vec<Dimension> {
    let mut aria_label_counts: HashMap<String, u32> = HashMap::new();
    for d in &dimensions {
        if let Some(label) = &d.aria_label {
            *aria_label_counts.entry(label.clone()).or_insert(0) += 1;
        }
    }

    for d in &mut dimensions {
        if let Some(label) = &d.aria_label {
            if aria_label_counts.get(label).copied().unwrap_or(0) > 1 {
                d.status = crate::model::DimensionStatus::Conflict;
                d.review_note = Some(format!("duplicate aria_label '{label}' across dimensions"));
            }
        }
        if d.section == UNKNOWN && d.status == crate::model::DimensionStatus::Ok {
            d.status = crate::model::DimensionStatus::ReviewRequired;
        }
    }
    dimensions
}

/// Step 3: repeatable-row detection (P6). Marks every field in a section
/// containing a button whose visible text starts with "Add " with
/// `pattern_type=P6_REPEATABLE_ROW` and records `add_button_label`, scoped
/// to the button's own section so an "Add " button in one section never
/// marks fields belonging to another.
pub async fn mark_repeatable_rows(
    driver: &dyn BrowserDriver,
    dimensions: &mut [Dimension],
) -> Result<(), AutopilotError> {
    let buttons = driver.query_all("button").await?;
    let mut add_button_by_section: HashMap<String, String> = HashMap::new();
    for b in buttons {
        if !b.is_visible().await? {
            continue;
        }
        let text = b.text_content().await?;
        if text.trim_start().starts_with("Add ") {
            let raw_section = b
                .get_attribute("section")
                .await?
                .unwrap_or_else(|| UNKNOWN.to_string());
            let section = scanner::clean_section_name(&raw_section);
            add_button_by_section
                .entry(section)
                .or_insert_with(|| text.trim().to_string());
        }
    }
    if add_button_by_section.is_empty() {
        return Ok(());
    }

    for d in dimensions.iter_mut() {
        if let Some(label) = add_button_by_section.get(&d.section) {
            d.pattern_type = Some(PatternType::P6RepeatableRow);
            d.add_button_label = Some(label.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{DomFixture, FixtureKind, FixtureNode, GateEffect, GateTrigger, RecordingDriver};
    use crate::model::GateControl;

    fn toggle_fixture() -> (DomFixture, Vec<GateControl>) {
        let gate = FixtureNode::new("toggle-1", "#toggle-1", FixtureKind::Switch)
            .with_aria_label("Enable advanced options")
            .with_role("switch")
            .with_section("General");
        let a = FixtureNode::new("field-a", "#field-a", FixtureKind::NumberInput)
            .with_aria_label("Advanced Value A")
            .with_section("General");
        let b = FixtureNode::new("field-b", "#field-b", FixtureKind::TextInput)
            .with_aria_label("Advanced Value B")
            .with_section("General");
        let c = FixtureNode::new("field-c", "#field-c", FixtureKind::TextInput)
            .with_aria_label("Advanced Value C")
            .with_section("General");
        let fixture = DomFixture::new(
            vec![gate, a, b, c],
            vec![GateEffect {
                gate_node_id: "toggle-1".into(),
                trigger: GateTrigger::Toggle,
                reveals: vec!["field-a".into(), "field-b".into(), "field-c".into()],
            }],
        )
        .with_base_visible(&["toggle-1"]);

        let gates = vec![GateControl {
            key: "Enable advanced options".into(),
            aria_label: Some("Enable advanced options".into()),
            gate_type: GateType::Toggle,
            default_state: None,
            css_selector: "#toggle-1".into(),
            options: Vec::new(),
            sections_gated: vec!["General".into()],
        }];
        (fixture, gates)
    }

    #[tokio::test]
    async fn single_toggle_yields_two_states_and_reveals_fields() {
        let (fixture, gates) = toggle_fixture();
        let driver = RecordingDriver::new(fixture);
        let cfg = RunConfig::default();

        let output = explore(&driver, "https://example.test/configure", &gates, &cfg)
            .await
            .unwrap();

        assert_eq!(output.tracker.states.len(), 2);
        assert!(output.tracker.states[1].entered_via.from_state.is_some());

        let keys: HashSet<&str> = output.dimensions.iter().map(|d| d.key.as_str()).collect();
        assert!(keys.contains("Advanced Value A"));
        assert!(keys.contains("Advanced Value B"));
        assert!(keys.contains("Advanced Value C"));
        // S0 is the toggle-off state: a/b/c are hidden, so only S1's scan
        // contributes dimensions (the switch itself isn't a scannable field).
        assert_eq!(output.dimensions.len(), 3);
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive_to_change() {
        let inv_a = vec![Inventory {
            section: "General".to_string(),
            elements: vec![],
        }];
        let fp1 = fingerprint(&inv_a);
        let fp2 = fingerprint(&inv_a);
        assert_eq!(fp1, fp2);

        let inv_b = vec![Inventory {
            section: "Other".to_string(),
            elements: vec![],
        }];
        assert_ne!(fp1, fingerprint(&inv_b));
    }

    #[test]
    fn unit_merge_collapses_into_base_dimension() {
        let base = Dimension {
            key: "EBS Storage".into(),
            label_visible: "EBS Storage".into(),
            aria_label: Some("EBS Storage".into()),
            field_type: FieldType::Number,
            section: "Storage".into(),
            css_selector: "#ebs".into(),
            options: vec![],
            default_value: Some("100".into()),
            unit: None,
            unit_sibling: None,
            required: false,
            pattern_type: None,
            label_source: LabelSource::AriaLabel,
            confidence: Confidence::new(1.0, 1.0, 1.0),
            status: crate::model::DimensionStatus::Ok,
            discovered_in_state: "S0".into(),
            disambiguation_index: None,
            semantic_role: None,
            row_fields: None,
            add_button_label: None,
            review_note: None,
        };
        let unit = Dimension {
            key: "Unit EBS Storage".into(),
            label_visible: "Unit EBS Storage".into(),
            aria_label: Some("Unit EBS Storage".into()),
            field_type: FieldType::Select,
            section: "Storage".into(),
            css_selector: "#ebs-unit".into(),
            options: vec!["GB".into(), "TB".into()],
            default_value: Some("GB".into()),
            unit: None,
            unit_sibling: None,
            required: false,
            pattern_type: None,
            label_source: LabelSource::AriaLabel,
            confidence: Confidence::new(1.0, 1.0, 1.0),
            status: crate::model::DimensionStatus::Ok,
            discovered_in_state: "S0".into(),
            disambiguation_index: None,
            semantic_role: None,
            row_fields: None,
            add_button_label: None,
            review_note: None,
        };

        let result = merge_unit_selectors(vec![base, unit]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].key, "EBS Storage");
        assert_eq!(result[0].unit.as_deref(), Some("GB"));
        assert_eq!(result[0].unit_sibling.as_ref().unwrap().options, vec!["GB", "TB"]);
    }

    fn bare_dimension(key: &str, section: &str) -> Dimension {
        Dimension {
            key: key.into(),
            label_visible: key.into(),
            aria_label: Some(key.into()),
            field_type: FieldType::Text,
            section: section.into(),
            css_selector: format!("#{key}"),
            options: vec![],
            default_value: None,
            unit: None,
            unit_sibling: None,
            required: false,
            pattern_type: None,
            label_source: LabelSource::AriaLabel,
            confidence: Confidence::new(1.0, 1.0, 1.0),
            status: crate::model::DimensionStatus::Ok,
            discovered_in_state: "S0".into(),
            disambiguation_index: None,
            semantic_role: None,
            row_fields: None,
            add_button_label: None,
            review_note: None,
        }
    }

    #[tokio::test]
    async fn repeatable_row_marking_is_scoped_to_its_own_section() {
        let add_button = FixtureNode::new("add-row", "button", FixtureKind::Button)
            .with_text("Add Rule")
            .with_section("Rules");
        let fixture = DomFixture::new(vec![add_button], vec![]).with_base_visible(&["add-row"]);
        let driver = RecordingDriver::new(fixture);

        let mut dimensions = vec![
            bare_dimension("Rule Name", "Rules"),
            bare_dimension("Storage Size", "Storage"),
        ];

        mark_repeatable_rows(&driver, &mut dimensions).await.unwrap();

        let rule = dimensions.iter().find(|d| d.key == "Rule Name").unwrap();
        assert_eq!(rule.pattern_type, Some(PatternType::P6RepeatableRow));
        assert_eq!(rule.add_button_label.as_deref(), Some("Add Rule"));

        let storage = dimensions.iter().find(|d| d.key == "Storage Size").unwrap();
        assert_eq!(storage.pattern_type, None);
        assert_eq!(storage.add_button_label, None);
    }
}
