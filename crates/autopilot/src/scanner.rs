//! DOM scanner (spec.md §4.5): produces an ordered list of inventories,
//! each pairing a section name with its visible interactive elements,
//! carrying label provenance and a derived stable CSS selector.
//!
//! No direct teacher analogue exists for DOM scanning (the teacher walks
//! accessibility trees, not a DOM); this follows the general
//! "build inventories from a queried adapter" shape the teacher uses in
//! its tree-walking code (label derivation, provenance tagging), adapted
//! to the DOM-specific rules spec.md §4.5 specifies exactly.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::driver::BrowserDriver;
use crate::errors::AutopilotError;
use crate::locator::detect_field_type;
use crate::model::{escape_css_value, FieldType, LabelSource};

/// Selector used to enumerate candidate interactive controls, matching
/// the tag/role set spec.md §4.3 tier 5 names for proximity scanning.
pub const INTERACTIVE_SELECTOR: &str =
    "input, select, textarea, [role=combobox], [role=spinbutton], [role=switch], [role=radio], [role=listbox]";

/// Closed list of selectors a heading/legend/accordion-trigger can match,
/// descended in document order to discover sections (spec.md §4.5).
pub const SECTION_HEADING_SELECTORS: &[&str] = &[
    "h1",
    "h2",
    "h3",
    "h4",
    "legend",
    "[role=heading]",
    "[data-accordion-trigger]",
    "summary",
];

/// Exact-match blocklist of noisy section names (spec.md §4.5).
const SECTION_BLOCKLIST: &[&str] = &[
    "", "Details", "More", "More options", "Options", "Settings", "Advanced",
];

static SHORT_NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}$").unwrap());
static PAGE_TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)pricing calculator$").unwrap());
/// Volatile generated-id pattern a framework rewrites across renders;
/// ids matching this are never used for `tag[id=...]` selector derivation.
static VOLATILE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^formField\d+-\d+-\d+$").unwrap());

#[derive(Debug, Clone)]
pub struct ScannedElement {
    pub css_selector: String,
    pub label_visible: String,
    pub label_source: LabelSource,
    pub aria_label: Option<String>,
    pub field_type: FieldType,
    pub section: String,
    pub required: bool,
    pub default_value: Option<String>,
    pub name_group: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Inventory {
    pub section: String,
    pub elements: Vec<ScannedElement>,
}

/// Scans the page's currently-visible interactive elements, grouping them
/// by section in first-appearance order.
pub async fn scan(driver: &dyn BrowserDriver) -> Result<Vec<Inventory>, AutopilotError> {
    let candidates = driver.query_all(INTERACTIVE_SELECTOR).await?;
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<ScannedElement>> = std::collections::HashMap::new();

    for el in candidates {
        if !el.is_visible().await? {
            continue;
        }
        let raw_section = el.get_attribute("section").await?.unwrap_or_else(|| "UNKNOWN".to_string());
        let section = clean_section_name(&raw_section);

        let (label_visible, label_source) = derive_label(driver, el.as_ref()).await?;
        let css_selector = derive_selector(el.as_ref()).await?;
        let field_type = detect_field_type(driver, &el).await?;
        let aria_label = el.get_attribute("aria-label").await?;
        let required = el
            .get_attribute("required")
            .await?
            .map(|v| v == "true")
            .unwrap_or(false);
        let default_value = el.get_attribute("value").await?;
        let name_group = el.get_attribute("name").await?;

        let scanned = ScannedElement {
            css_selector,
            label_visible,
            label_source,
            aria_label,
            field_type,
            section: section.clone(),
            required,
            default_value,
            name_group,
        };

        if !groups.contains_key(&section) {
            order.push(section.clone());
        }
        groups.entry(section).or_default().push(scanned);
    }

    Ok(order
        .into_iter()
        .map(|section| {
            let elements = groups.remove(&section).unwrap_or_default();
            Inventory { section, elements }
        })
        .collect())
}

/// Label priority chain per spec.md §4.5: aria-label, aria-labelledby
/// (joined), `label[for=id]`, wrapping label minus own text, nearest
/// heuristic text, else none/UNKNOWN.
pub(crate) async fn derive_label(
    _driver: &dyn BrowserDriver,
    el: &dyn crate::driver::ElementHandle,
) -> Result<(String, LabelSource), AutopilotError> {
    if let Some(v) = el.get_attribute("aria-label").await? {
        if !v.trim().is_empty() {
            return Ok((v, LabelSource::AriaLabel));
        }
    }
    if let Some(v) = el.get_attribute("aria-labelledby-text").await? {
        if !v.trim().is_empty() {
            return Ok((v, LabelSource::AriaLabelledby));
        }
    }
    if let Some(v) = el.get_attribute("label-for-text").await? {
        if !v.trim().is_empty() {
            return Ok((v, LabelSource::LabelFor));
        }
    }
    if let Some(v) = el.get_attribute("label-wrap-text").await? {
        if !v.trim().is_empty() {
            return Ok((v, LabelSource::LabelWrap));
        }
    }
    if let Some(v) = el.get_attribute("heuristic-text").await? {
        if !v.trim().is_empty() {
            return Ok((v, LabelSource::Heuristic));
        }
    }
    Ok((crate::model::UNKNOWN.to_string(), LabelSource::None))
}

/// Stable CSS selector derivation per spec.md §4.5's priority list. All
/// attribute values are escape-encoded for CSS embedding.
pub async fn derive_selector(el: &dyn crate::driver::ElementHandle) -> Result<String, AutopilotError> {
    if let Some(id) = el.get_attribute("id").await? {
        if !id.is_empty() && !VOLATILE_ID_RE.is_match(&id) {
            let tag = el.get_attribute("__tag").await?.unwrap_or_else(|| "*".to_string());
            return Ok(format!("{tag}[id=\"{}\"]", escape_css_value(&id)));
        }
    }
    if let Some(v) = el.get_attribute("aria-label").await? {
        if !v.is_empty() {
            return Ok(format!("[aria-label=\"{}\"]", escape_css_value(&v)));
        }
    }
    for attr in ["data-testid", "data-id", "data-automation-id"] {
        if let Some(v) = el.get_attribute(attr).await? {
            if !v.is_empty() {
                return Ok(format!("[{attr}=\"{}\"]", escape_css_value(&v)));
            }
        }
    }
    if let Some(v) = el.get_attribute("name").await? {
        if !v.is_empty() {
            return Ok(format!("[name=\"{}\"]", escape_css_value(&v)));
        }
    }
    if let Some(v) = el.get_attribute("aria-labelledby").await? {
        if !v.is_empty() {
            return Ok(format!("[aria-labelledby=\"{}\"]", escape_css_value(&v)));
        }
    }
    if let Some(v) = el.get_attribute("aria-controls").await? {
        if !v.is_empty() {
            return Ok(format!("[aria-controls=\"{}\"]", escape_css_value(&v)));
        }
    }
    if let (Some(role), Some(label)) = (
        el.get_attribute("role").await?,
        el.get_attribute("aria-label").await?,
    ) {
        if !role.is_empty() && !label.is_empty() {
            return Ok(format!(
                "[role=\"{}\"][aria-label=\"{}\"]",
                escape_css_value(&role),
                escape_css_value(&label)
            ));
        }
    }
    Ok(crate::model::UNKNOWN.to_string())
}

/// Filters section-name noise per spec.md §4.5: exact-match blocklist,
/// short-numeric pattern, page-title pattern, and length bounds [3, 120].
pub fn clean_section_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if SECTION_BLOCKLIST.contains(&trimmed)
        || SHORT_NUMERIC_RE.is_match(trimmed)
        || PAGE_TITLE_RE.is_match(trimmed)
        || trimmed.len() < 3
        || trimmed.len() > 120
    {
        return crate::model::UNKNOWN.to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{DomFixture, FixtureKind, FixtureNode, RecordingDriver};

    #[test]
    fn noisy_section_names_fall_back_to_unknown() {
        assert_eq!(clean_section_name(""), "UNKNOWN");
        assert_eq!(clean_section_name("42"), "UNKNOWN");
        assert_eq!(clean_section_name("AWS Pricing Calculator"), "UNKNOWN");
        assert_eq!(clean_section_name("ab"), "UNKNOWN");
        assert_eq!(clean_section_name(&"x".repeat(200)), "UNKNOWN");
    }

    #[test]
    fn legitimate_section_names_pass_through() {
        assert_eq!(clean_section_name("Storage configuration"), "Storage configuration");
    }

    #[tokio::test]
    async fn scan_groups_by_section_in_first_appearance_order() {
        let a = FixtureNode::new("a", "#a", FixtureKind::NumberInput)
            .with_aria_label("EBS Storage")
            .with_section("Storage");
        let b = FixtureNode::new("b", "#b", FixtureKind::TextInput)
            .with_aria_label("Instance Name")
            .with_section("Compute");
        let c = FixtureNode::new("c", "#c", FixtureKind::TextInput)
            .with_aria_label("Instance Count")
            .with_section("Compute");
        let driver = RecordingDriver::new(DomFixture::new(vec![a, b, c], vec![]));

        let inventories = scan(&driver).await.unwrap();
        assert_eq!(inventories.len(), 2);
        assert_eq!(inventories[0].section, "Storage");
        assert_eq!(inventories[1].section, "Compute");
        assert_eq!(inventories[1].elements.len(), 2);
    }

    #[tokio::test]
    async fn selector_prefers_id_over_aria_label() {
        let node = FixtureNode::new("x", "#x", FixtureKind::TextInput)
            .with_aria_label("Region")
            .with_dom_id("region-select");
        let driver = RecordingDriver::new(DomFixture::new(vec![node], vec![]));
        let handle = driver.query("#x").await.unwrap().unwrap();
        let selector = derive_selector(handle.as_ref()).await.unwrap();
        assert_eq!(selector, "input[id=\"region-select\"]");
    }

    #[tokio::test]
    async fn volatile_id_is_skipped_in_favor_of_aria_label() {
        let node = FixtureNode::new("y", "#y", FixtureKind::TextInput)
            .with_aria_label("Region")
            .with_dom_id("formField12-3-4");
        let driver = RecordingDriver::new(DomFixture::new(vec![node], vec![]));
        let handle = driver.query("#y").await.unwrap().unwrap();
        let selector = derive_selector(handle.as_ref()).await.unwrap();
        assert_eq!(selector, "[aria-label=\"Region\"]");
    }
}
