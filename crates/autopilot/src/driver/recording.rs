//! In-memory DOM fixture + [`RecordingDriver`], a `BrowserDriver` fake used
//! by tests (`test-support` feature) to exercise the locator, scanner,
//! explorer, and orchestrator without a real browser.
//!
//! A fixture is a flat list of [`FixtureNode`]s plus a list of
//! [`GateEffect`]s describing which nodes a gate's actuation reveals or
//! hides. `goto` resets visibility to the fixture's base set; clicking or
//! selecting an option on a gate node looks up the matching effect and
//! applies it to the driver's current visible-id set.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::errors::AutopilotError;

use super::{BoundingBox, BrowserDriver, ClickOptions, ElementHandle, ElementState, WaitMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureKind {
    NumberInput,
    TextInput,
    Checkbox,
    Radio,
    Select,
    Textarea,
    Combobox,
    Spinbutton,
    Switch,
    Listbox,
    Heading,
    Button,
    Text,
}

fn fixture_kind_tag(kind: FixtureKind) -> &'static str {
    match kind {
        FixtureKind::NumberInput | FixtureKind::TextInput | FixtureKind::Checkbox | FixtureKind::Radio => "input",
        FixtureKind::Select => "select",
        FixtureKind::Textarea => "textarea",
        FixtureKind::Combobox | FixtureKind::Spinbutton | FixtureKind::Switch | FixtureKind::Listbox => "div",
        FixtureKind::Heading => "h2",
        FixtureKind::Button => "button",
        FixtureKind::Text => "span",
    }
}

fn fixture_kind_input_type(kind: FixtureKind) -> Option<&'static str> {
    match kind {
        FixtureKind::NumberInput => Some("number"),
        FixtureKind::TextInput => Some("text"),
        FixtureKind::Checkbox => Some("checkbox"),
        FixtureKind::Radio => Some("radio"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct FixtureNode {
    pub id: String,
    pub css_selector: String,
    pub kind: FixtureKind,
    pub role: Option<String>,
    pub aria_label: Option<String>,
    pub aria_labelledby: Option<String>,
    pub label_for_text: Option<String>,
    pub label_wrap_text: Option<String>,
    pub heuristic_text: Option<String>,
    pub text: String,
    pub section: String,
    pub bbox: BoundingBox,
    pub options: Vec<String>,
    pub default_value: Option<String>,
    pub name_group: Option<String>,
    pub checked: bool,
    pub required: bool,
    /// Raw `id` attribute, distinct from the fixture's internal `id`
    /// (which doubles as its css_selector-matching key in tests).
    pub dom_id: Option<String>,
    pub data_testid: Option<String>,
    pub data_id: Option<String>,
    pub data_automation_id: Option<String>,
    pub aria_controls: Option<String>,
}

impl FixtureNode {
    pub fn new(id: &str, css_selector: &str, kind: FixtureKind) -> Self {
        Self {
            id: id.to_string(),
            css_selector: css_selector.to_string(),
            kind,
            role: None,
            aria_label: None,
            aria_labelledby: None,
            label_for_text: None,
            label_wrap_text: None,
            heuristic_text: None,
            text: String::new(),
            section: "UNKNOWN".to_string(),
            bbox: BoundingBox::default(),
            options: Vec::new(),
            default_value: None,
            name_group: None,
            checked: false,
            required: false,
            dom_id: None,
            data_testid: None,
            data_id: None,
            data_automation_id: None,
            aria_controls: None,
        }
    }

    pub fn with_aria_label(mut self, v: &str) -> Self {
        self.aria_label = Some(v.to_string());
        self
    }

    pub fn with_section(mut self, v: &str) -> Self {
        self.section = v.to_string();
        self
    }

    pub fn with_options(mut self, opts: &[&str]) -> Self {
        self.options = opts.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    pub fn with_bbox(mut self, x: f64, y: f64, w: f64, h: f64) -> Self {
        self.bbox = BoundingBox {
            x,
            y,
            width: w,
            height: h,
        };
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_dom_id(mut self, id: &str) -> Self {
        self.dom_id = Some(id.to_string());
        self
    }

    pub fn with_data_testid(mut self, v: &str) -> Self {
        self.data_testid = Some(v.to_string());
        self
    }

    pub fn with_name_group(mut self, v: &str) -> Self {
        self.name_group = Some(v.to_string());
        self
    }

    pub fn with_required(mut self, v: bool) -> Self {
        self.required = v;
        self
    }
}

#[derive(Debug, Clone)]
pub enum GateTrigger {
    Toggle,
    Select(String),
}

#[derive(Debug, Clone)]
pub struct GateEffect {
    pub gate_node_id: String,
    pub trigger: GateTrigger,
    pub reveals: Vec<String>,
}

#[derive(Clone)]
pub struct DomFixture {
    pub nodes: Vec<FixtureNode>,
    pub gates: Vec<GateEffect>,
    pub base_visible: HashSet<String>,
}

impl DomFixture {
    pub fn new(nodes: Vec<FixtureNode>, gates: Vec<GateEffect>) -> Self {
        let base_visible = nodes.iter().map(|n| n.id.clone()).collect();
        Self {
            nodes,
            gates,
            base_visible,
        }
    }

    /// Restricts the base-visible set explicitly (for fixtures where some
    /// nodes start hidden pending a gate).
    pub fn with_base_visible(mut self, ids: &[&str]) -> Self {
        self.base_visible = ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

struct RecordingState {
    fixture: DomFixture,
    visible: HashSet<String>,
}

pub struct RecordingDriver {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingDriver {
    pub fn new(fixture: DomFixture) -> Self {
        let visible = fixture.base_visible.clone();
        Self {
            state: Arc::new(Mutex::new(RecordingState { fixture, visible })),
        }
    }

    fn handle(&self, id: String) -> Arc<dyn ElementHandle> {
        Arc::new(RecordingHandle {
            id,
            state: self.state.clone(),
        })
    }
}

struct RecordingHandle {
    id: String,
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingHandle {
    async fn node(&self) -> Option<FixtureNode> {
        let st = self.state.lock().await;
        st.fixture.nodes.iter().find(|n| n.id == self.id).cloned()
    }
}

#[async_trait]
impl ElementHandle for RecordingHandle {
    async fn click(&self, _opts: ClickOptions) -> Result<(), AutopilotError> {
        let mut st = self.state.lock().await;
        let effects: Vec<GateEffect> = st
            .fixture
            .gates
            .iter()
            .filter(|g| g.gate_node_id == self.id && matches!(g.trigger, GateTrigger::Toggle))
            .cloned()
            .collect();
        for effect in effects {
            let currently_on = effect.reveals.iter().all(|id| st.visible.contains(id));
            if currently_on {
                for id in &effect.reveals {
                    st.visible.remove(id);
                }
            } else {
                for id in &effect.reveals {
                    st.visible.insert(id.clone());
                }
            }
        }
        if let Some(node) = st.fixture.nodes.iter_mut().find(|n| n.id == self.id) {
            if matches!(node.kind, FixtureKind::Checkbox | FixtureKind::Switch | FixtureKind::Radio) {
                node.checked = !node.checked;
            }
        }
        Ok(())
    }

    async fn fill(&self, _text: &str) -> Result<(), AutopilotError> {
        Ok(())
    }

    async fn select_option(
        &self,
        label: Option<&str>,
        value: Option<&str>,
    ) -> Result<(), AutopilotError> {
        let chosen = label.or(value).unwrap_or_default().to_string();
        let mut st = self.state.lock().await;
        let all_gate_values: Vec<String> = st
            .fixture
            .gates
            .iter()
            .filter(|g| g.gate_node_id == self.id)
            .filter_map(|g| match &g.trigger {
                GateTrigger::Select(v) => Some(v.clone()),
                _ => None,
            })
            .collect();
        // Hide every other value's reveal set before showing the chosen one.
        for v in &all_gate_values {
            if *v != chosen {
                if let Some(effect) = st.fixture.gates.iter().find(|g| {
                    g.gate_node_id == self.id && matches!(&g.trigger, GateTrigger::Select(x) if x == v)
                }) {
                    for id in effect.reveals.clone() {
                        st.visible.remove(&id);
                    }
                }
            }
        }
        if let Some(effect) = st.fixture.gates.iter().find(|g| {
            g.gate_node_id == self.id && matches!(&g.trigger, GateTrigger::Select(x) if *x == chosen)
        }) {
            for id in effect.reveals.clone() {
                st.visible.insert(id);
            }
        }
        Ok(())
    }

    async fn bounding_box(&self) -> Result<Option<BoundingBox>, AutopilotError> {
        Ok(self.node().await.map(|n| n.bbox))
    }

    async fn is_visible(&self) -> Result<bool, AutopilotError> {
        let st = self.state.lock().await;
        Ok(st.visible.contains(&self.id))
    }

    async fn text_content(&self) -> Result<String, AutopilotError> {
        Ok(self.node().await.map(|n| n.text).unwrap_or_default())
    }

    async fn get_attribute(&self, name: &str) -> Result<Option<String>, AutopilotError> {
        let Some(node) = self.node().await else {
            return Ok(None);
        };
        Ok(match name {
            "aria-label" => node.aria_label,
            "aria-labelledby" => node.aria_labelledby,
            "aria-labelledby-text" => node.aria_labelledby,
            "label-for-text" => node.label_for_text,
            "label-wrap-text" => node.label_wrap_text,
            "heuristic-text" => node.heuristic_text,
            "aria-checked" | "checked" => Some(node.checked.to_string()),
            "name" => node.name_group,
            "value" => node.default_value,
            "id" => node.dom_id,
            "data-testid" => node.data_testid,
            "data-id" => node.data_id,
            "data-automation-id" => node.data_automation_id,
            "aria-controls" => node.aria_controls,
            "role" => node.role,
            "required" => Some(node.required.to_string()),
            "section" => Some(node.section),
            "__tag" => Some(fixture_kind_tag(node.kind).to_string()),
            "type" => fixture_kind_input_type(node.kind).map(|s| s.to_string()),
            _ => None,
        })
    }

    async fn scroll_into_view_if_needed(&self) -> Result<(), AutopilotError> {
        Ok(())
    }

    async fn wait_for_state(
        &self,
        state: ElementState,
        _timeout: Duration,
    ) -> Result<(), AutopilotError> {
        let visible = self.is_visible().await?;
        match state {
            ElementState::Visible if !visible => {
                Err(AutopilotError::ElementNotVisible(self.id.clone()))
            }
            ElementState::Hidden if visible => {
                Err(AutopilotError::Timeout(format!("{} still visible", self.id)))
            }
            _ => Ok(()),
        }
    }

    async fn list_options(&self) -> Result<Vec<String>, AutopilotError> {
        Ok(self.node().await.map(|n| n.options).unwrap_or_default())
    }

    fn debug_id(&self) -> String {
        self.id.clone()
    }
}

#[async_trait]
impl BrowserDriver for RecordingDriver {
    async fn goto(&self, _url: &str, _wait_mode: WaitMode) -> Result<(), AutopilotError> {
        let mut st = self.state.lock().await;
        st.visible = st.fixture.base_visible.clone();
        Ok(())
    }

    async fn query(&self, selector: &str) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
        let st = self.state.lock().await;
        let found_id = st
            .fixture
            .nodes
            .iter()
            .find(|n| n.css_selector == selector)
            .map(|n| n.id.clone());
        drop(st);
        Ok(found_id.map(|id| self.handle(id)))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Arc<dyn ElementHandle>>, AutopilotError> {
        let st = self.state.lock().await;
        let ids: Vec<String> = if selector == "input, select, textarea, [role=combobox], [role=spinbutton]"
            || selector.contains("input, select")
        {
            st.fixture
                .nodes
                .iter()
                .filter(|n| {
                    matches!(
                        n.kind,
                        FixtureKind::NumberInput
                            | FixtureKind::TextInput
                            | FixtureKind::Select
                            | FixtureKind::Combobox
                            | FixtureKind::Spinbutton
                            | FixtureKind::Textarea
                    )
                })
                .map(|n| n.id.clone())
                .collect()
        } else {
            st.fixture
                .nodes
                .iter()
                .filter(|n| n.css_selector == selector || selector_group_matches(n, selector))
                .map(|n| n.id.clone())
                .collect()
        };
        drop(st);
        Ok(ids.into_iter().map(|id| self.handle(id)).collect())
    }

    async fn by_role(
        &self,
        role: &str,
        name: Option<&str>,
        exact: bool,
    ) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
        let st = self.state.lock().await;
        let found = st.fixture.nodes.iter().find(|n| {
            n.role.as_deref() == Some(role)
                && match name {
                    None => true,
                    Some(want) => text_matches(n.aria_label.as_deref().unwrap_or(&n.text), want, exact),
                }
        });
        let found_id = found.map(|n| n.id.clone());
        drop(st);
        Ok(found_id.map(|id| self.handle(id)))
    }

    async fn by_label(
        &self,
        text: &str,
        exact: bool,
    ) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
        let st = self.state.lock().await;
        let found = st.fixture.nodes.iter().find(|n| {
            n.aria_label
                .as_deref()
                .map(|l| text_matches(l, text, exact))
                .unwrap_or(false)
                || n.label_for_text
                    .as_deref()
                    .map(|l| text_matches(l, text, exact))
                    .unwrap_or(false)
        });
        let found_id = found.map(|n| n.id.clone());
        drop(st);
        Ok(found_id.map(|id| self.handle(id)))
    }

    async fn by_text(
        &self,
        text: &str,
        exact: bool,
    ) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
        let st = self.state.lock().await;
        let found = st
            .fixture
            .nodes
            .iter()
            .find(|n| text_matches(&n.text, text, exact));
        let found_id = found.map(|n| n.id.clone());
        drop(st);
        Ok(found_id.map(|id| self.handle(id)))
    }

    async fn evaluate(&self, _script: &str, _args: Value) -> Result<Value, AutopilotError> {
        Ok(Value::Null)
    }

    async fn screenshot(&self, _path: &Path) -> Result<(), AutopilotError> {
        Ok(())
    }

    async fn keyboard(&self, _chord: &str) -> Result<(), AutopilotError> {
        Ok(())
    }

    async fn wait(&self, _ms: u64) -> Result<(), AutopilotError> {
        Ok(())
    }

    async fn viewport(&self) -> Result<(u32, u32), AutopilotError> {
        Ok((1280, 800))
    }
}

fn text_matches(haystack: &str, needle: &str, exact: bool) -> bool {
    if exact {
        haystack.eq_ignore_ascii_case(needle)
    } else {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}

fn selector_group_matches(node: &FixtureNode, selector: &str) -> bool {
    if let Some(name) = selector
        .strip_prefix("input[name=\"")
        .and_then(|s| s.strip_suffix("\"]"))
    {
        return node.name_group.as_deref() == Some(name) && node.kind == FixtureKind::Radio;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toggle_fixture() -> DomFixture {
        let base = FixtureNode::new("toggle-1", "#toggle-1", FixtureKind::Switch)
            .with_aria_label("Enable advanced options")
            .with_section("General")
            .with_role("switch");
        let hidden_a = FixtureNode::new("field-a", "#field-a", FixtureKind::NumberInput)
            .with_aria_label("Advanced Value A")
            .with_section("General");
        let hidden_b = FixtureNode::new("field-b", "#field-b", FixtureKind::TextInput)
            .with_aria_label("Advanced Value B")
            .with_section("General");
        let hidden_c = FixtureNode::new("field-c", "#field-c", FixtureKind::Select)
            .with_aria_label("Advanced Value C")
            .with_section("General")
            .with_options(&["x", "y"]);
        let fixture = DomFixture::new(
            vec![base, hidden_a, hidden_b, hidden_c],
            vec![GateEffect {
                gate_node_id: "toggle-1".into(),
                trigger: GateTrigger::Toggle,
                reveals: vec!["field-a".into(), "field-b".into(), "field-c".into()],
            }],
        )
        .with_base_visible(&["toggle-1"]);
        fixture
    }

    #[tokio::test]
    async fn toggle_reveals_and_restores() {
        let driver = RecordingDriver::new(toggle_fixture());
        let handle = driver.query("#toggle-1").await.unwrap().unwrap();
        assert!(!driver.query("#field-a").await.unwrap().unwrap().is_visible().await.unwrap());
        handle.click(ClickOptions::default()).await.unwrap();
        assert!(driver.query("#field-a").await.unwrap().unwrap().is_visible().await.unwrap());
        handle.click(ClickOptions::default()).await.unwrap();
        assert!(!driver.query("#field-a").await.unwrap().unwrap().is_visible().await.unwrap());
    }

    #[tokio::test]
    async fn goto_resets_to_base_state() {
        let driver = RecordingDriver::new(toggle_fixture());
        let handle = driver.query("#toggle-1").await.unwrap().unwrap();
        handle.click(ClickOptions::default()).await.unwrap();
        assert!(driver.query("#field-a").await.unwrap().unwrap().is_visible().await.unwrap());
        driver.goto("https://example.test/configure", WaitMode::Load).await.unwrap();
        assert!(!driver.query("#field-a").await.unwrap().unwrap().is_visible().await.unwrap());
    }
}
