//! Tiered element-resolution pipeline (spec.md §4.3). Strategy tiers are a
//! closed enum dispatched in a fixed order — the teacher's `Selector` +
//! ordered-dispatch idiom (`selector.rs`/`locator.rs`), grounded here in
//! the DOM-specific tiers spec.md §4.3 names rather than the teacher's
//! accessibility-tree selector language.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::driver::{find_in_page_chord, BrowserDriver, ElementHandle, ElementState};
use crate::errors::AutopilotError;
use crate::model::{escape_css_value, FieldType};

/// Ordered locator tiers, tried in sequence and stopped at first success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorStrategy {
    CatalogCss(String),
    AriaLabel,
    LabelFor,
    RoleName,
    TextProximity,
    FindInPage,
}

/// Roles tried in order for the role+name tier (spec.md §4.3 tier 4).
const ROLE_ORDER: &[&str] = &[
    "spinbutton",
    "combobox",
    "textbox",
    "switch",
    "checkbox",
    "radio",
];

/// Selectors tried in order for the find-in-page tier's proximity scan,
/// per spec.md §4.3 tier 6.
const FIND_IN_PAGE_PRIORITY: &[&str] = &[
    "input[type=number]",
    "input[type=text]",
    "select",
    "[role=combobox]",
    "[role=spinbutton]",
    "[role=switch]",
    "[role=radio]",
    "[role=listbox]",
    "textarea",
    "[contenteditable=true]",
];

const PROXIMITY_BAND_PX: f64 = 100.0;
const FIND_IN_PAGE_BAND_PX: f64 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateStatus {
    Found,
    Failed,
    Skipped,
}

pub struct LocateOptions<'a> {
    pub primary_css: Option<&'a str>,
    pub required: bool,
    pub screenshot_dir: Option<PathBuf>,
}

pub struct LocateResult {
    pub element: Option<Arc<dyn ElementHandle>>,
    pub field_type: FieldType,
    pub strategy: Option<LocatorStrategy>,
    pub status: LocateStatus,
}

/// Resolves `dimension_key`/`aria_label` to a concrete control. Tiers 2-6
/// use `dimension_key` (the human label) as the search text; tier 1 uses
/// `opts.primary_css` when the catalog provides one.
pub async fn find_element(
    driver: &dyn BrowserDriver,
    dimension_key: &str,
    opts: LocateOptions<'_>,
) -> Result<LocateResult, AutopilotError> {
    if let Some(css) = opts.primary_css {
        if let Some(el) = driver.query(css).await? {
            if el
                .wait_for_state(ElementState::Visible, Duration::from_secs(2))
                .await
                .is_ok()
            {
                let field_type = detect_field_type(driver, &el).await?;
                return Ok(LocateResult {
                    element: Some(el),
                    field_type,
                    strategy: Some(LocatorStrategy::CatalogCss(css.to_string())),
                    status: LocateStatus::Found,
                });
            }
        }
    }

    // Tier 2: aria-label substring, case-insensitive, via an attribute
    // selector rather than byLabel so it only ever matches the `aria-label`
    // attribute itself (not a wrapping/associated `<label>`).
    let aria_selector = format!("[aria-label*=\"{}\" i]", escape_css_value(dimension_key));
    if let Some(el) = driver.query(&aria_selector).await? {
        if el.is_visible().await? {
            let field_type = detect_field_type(driver, &el).await?;
            return Ok(LocateResult {
                element: Some(el),
                field_type,
                strategy: Some(LocatorStrategy::AriaLabel),
                status: LocateStatus::Found,
            });
        }
    }

    // Tier 3: `label[for=...]` association, via the adapter's
    // byLabel-equivalent (covers associated and wrapping labels).
    if let Some(el) = driver.by_label(dimension_key, false).await? {
        if el.is_visible().await? {
            let field_type = detect_field_type(driver, &el).await?;
            return Ok(LocateResult {
                element: Some(el),
                field_type,
                strategy: Some(LocatorStrategy::LabelFor),
                status: LocateStatus::Found,
            });
        }
    }

    for role in ROLE_ORDER {
        if let Some(el) = driver.by_role(role, Some(dimension_key), false).await? {
            if el.is_visible().await? {
                let field_type = detect_field_type(driver, &el).await?;
                return Ok(LocateResult {
                    element: Some(el),
                    field_type,
                    strategy: Some(LocatorStrategy::RoleName),
                    status: LocateStatus::Found,
                });
            }
        }
    }

    if let Some(el) = text_proximity(driver, dimension_key).await? {
        let field_type = detect_field_type(driver, &el).await?;
        return Ok(LocateResult {
            element: Some(el),
            field_type,
            strategy: Some(LocatorStrategy::TextProximity),
            status: LocateStatus::Found,
        });
    }

    if let Some(el) = find_in_page(driver, dimension_key).await? {
        let field_type = detect_field_type(driver, &el).await?;
        return Ok(LocateResult {
            element: Some(el),
            field_type,
            strategy: Some(LocatorStrategy::FindInPage),
            status: LocateStatus::Found,
        });
    }

    warn!(
        event_type = "locator_not_found",
        dimension = dimension_key,
        "all locator tiers exhausted"
    );
    if let Some(dir) = &opts.screenshot_dir {
        let path = dir.join(format!("{}.png", crate::slug::slugify(dimension_key)));
        let _ = driver.screenshot(&path).await;
    }

    Ok(LocateResult {
        element: None,
        field_type: FieldType::Unknown,
        strategy: None,
        status: if opts.required {
            LocateStatus::Failed
        } else {
            LocateStatus::Skipped
        },
    })
}

/// Tier 5: find the label's text node, then the nearest interactive input
/// within |Δy| <= 100px of its bounding box.
async fn text_proximity(
    driver: &dyn BrowserDriver,
    label: &str,
) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
    let Some(text_el) = driver.by_text(label, false).await? else {
        return Ok(None);
    };
    let Some(text_box) = text_el.bounding_box().await? else {
        return Ok(None);
    };

    let candidates = driver
        .query_all("input, select, textarea, [role=combobox], [role=spinbutton]")
        .await?;

    let mut best: Option<(f64, Arc<dyn ElementHandle>)> = None;
    for cand in candidates {
        if !cand.is_visible().await? {
            continue;
        }
        let Some(bbox) = cand.bounding_box().await? else {
            continue;
        };
        let dy = bbox.delta_y(&text_box);
        if dy <= PROXIMITY_BAND_PX && best.as_ref().map(|(d, _)| dy < *d).unwrap_or(true) {
            best = Some((dy, cand));
        }
    }
    Ok(best.map(|(_, el)| el))
}

/// Tier 6: OS find-in-page fallback. Presses the appropriate chord,
/// captures the selection rectangle, then scans a ±150px vertical band
/// ordered by [`FIND_IN_PAGE_PRIORITY`], ties broken by |Δy|.
async fn find_in_page(
    driver: &dyn BrowserDriver,
    label: &str,
) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
    driver.keyboard(find_in_page_chord()).await?;
    let selection = driver
        .evaluate(
            "window.__autopilotFindInPage && window.__autopilotFindInPage(arguments[0])",
            serde_json::json!(label),
        )
        .await?;
    let Some(sel_y) = selection.get("y").and_then(|v| v.as_f64()) else {
        return Ok(None);
    };
    let sel_box = crate::driver::BoundingBox {
        x: selection.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0),
        y: sel_y,
        width: selection.get("width").and_then(|v| v.as_f64()).unwrap_or(0.0),
        height: selection.get("height").and_then(|v| v.as_f64()).unwrap_or(0.0),
    };

    let mut ranked: Vec<(usize, f64, Arc<dyn ElementHandle>)> = Vec::new();
    for (priority, selector) in FIND_IN_PAGE_PRIORITY.iter().enumerate() {
        for cand in driver.query_all(selector).await? {
            if !cand.is_visible().await? {
                continue;
            }
            let Some(bbox) = cand.bounding_box().await? else {
                continue;
            };
            let dy = bbox.delta_y(&sel_box);
            if dy <= FIND_IN_PAGE_BAND_PX {
                ranked.push((priority, dy, cand));
            }
        }
    }
    ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.partial_cmp(&b.1).unwrap()));
    Ok(ranked.into_iter().next().map(|(_, _, el)| el))
}

/// Field-type detection from the resolved element (spec.md §4.3's closed
/// mapping). Relies on `tag`/`type`/`role` attributes the driver surfaces.
pub async fn detect_field_type(
    _driver: &dyn BrowserDriver,
    el: &Arc<dyn ElementHandle>,
) -> Result<FieldType, AutopilotError> {
    let tag = el.get_attribute("__tag").await?.unwrap_or_default();
    let input_type = el.get_attribute("type").await?.unwrap_or_default();
    let role = el.get_attribute("role").await?.unwrap_or_default();

    Ok(match (tag.as_str(), input_type.as_str(), role.as_str()) {
        (_, "number", _) => FieldType::Number,
        (_, "text" | "tel" | "email", _) => FieldType::Text,
        (_, "checkbox", _) => FieldType::Toggle,
        (_, "radio", _) => FieldType::Radio,
        ("select", ..) => FieldType::Select,
        ("textarea", ..) => FieldType::Text,
        (_, _, "combobox") => FieldType::Combobox,
        (_, _, "spinbutton") => FieldType::Number,
        (_, _, "switch") => FieldType::Toggle,
        (_, _, "radio") => FieldType::Radio,
        (_, _, "listbox") => FieldType::Select,
        _ => FieldType::Text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{DomFixture, FixtureKind, FixtureNode, RecordingDriver};

    fn fixture() -> DomFixture {
        let label = FixtureNode::new("lbl", "#lbl", FixtureKind::Text)
            .with_text("EBS Storage")
            .with_bbox(0.0, 100.0, 200.0, 20.0);
        let input = FixtureNode::new("input", "#input", FixtureKind::NumberInput)
            .with_bbox(220.0, 105.0, 80.0, 20.0);
        DomFixture::new(vec![label, input], vec![])
    }

    #[tokio::test]
    async fn text_proximity_tier_finds_nearby_input() {
        let driver = RecordingDriver::new(fixture());
        let result = find_element(
            &driver,
            "EBS Storage",
            LocateOptions {
                primary_css: None,
                required: true,
                screenshot_dir: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(result.status, LocateStatus::Found);
        assert_eq!(result.strategy, Some(LocatorStrategy::TextProximity));
    }

    #[tokio::test]
    async fn aria_label_tier_resolves_before_proximity() {
        let node = FixtureNode::new("aria", "[aria-label*=\"EBS Storage\" i]", FixtureKind::NumberInput)
            .with_aria_label("EBS Storage");
        let fx = DomFixture::new(vec![node], vec![]);
        let driver = RecordingDriver::new(fx);
        let result = find_element(
            &driver,
            "EBS Storage",
            LocateOptions {
                primary_css: None,
                required: true,
                screenshot_dir: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(result.status, LocateStatus::Found);
        assert_eq!(result.strategy, Some(LocatorStrategy::AriaLabel));
    }

    #[tokio::test]
    async fn missing_optional_dimension_is_skipped_not_failed() {
        let driver = RecordingDriver::new(DomFixture::new(vec![], vec![]));
        let result = find_element(
            &driver,
            "Nonexistent Field",
            LocateOptions {
                primary_css: None,
                required: false,
                screenshot_dir: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(result.status, LocateStatus::Skipped);
    }

    #[tokio::test]
    async fn missing_required_dimension_fails() {
        let driver = RecordingDriver::new(DomFixture::new(vec![], vec![]));
        let result = find_element(
            &driver,
            "Nonexistent Field",
            LocateOptions {
                primary_css: None,
                required: true,
                screenshot_dir: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(result.status, LocateStatus::Failed);
    }

    #[test]
    fn role_order_matches_spec() {
        assert_eq!(
            ROLE_ORDER,
            &["spinbutton", "combobox", "textbox", "switch", "checkbox", "radio"]
        );
    }
}
