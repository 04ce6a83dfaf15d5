//! Options scanner (spec.md §4.6): enumerates choices for select,
//! combobox, and radio controls.

use std::sync::Arc;

use crate::driver::{BrowserDriver, ElementHandle};
use crate::errors::AutopilotError;
use crate::model::FieldType;

const MAX_OPTIONS: usize = 50;
const TRUNCATED_SENTINEL: &str = "TRUNCATED";
const MAX_SCROLL_ROUNDS: u32 = 10;

/// `scanOptions(selector) -> string[]`. Detects the control's type from
/// `field_type` (already resolved by the locator/scanner) and dispatches
/// to the matching enumeration strategy. Truncates to 50 entries plus the
/// `"TRUNCATED"` sentinel when the collected list would otherwise exceed
/// that bound.
pub async fn scan_options(
    driver: &dyn BrowserDriver,
    element: &Arc<dyn ElementHandle>,
    field_type: FieldType,
) -> Result<Vec<String>, AutopilotError> {
    let raw = match field_type {
        FieldType::Select => element.list_options().await?,
        FieldType::Combobox => scan_combobox_options(driver, element).await?,
        FieldType::Radio => scan_radio_options(driver, element).await?,
        _ => Vec::new(),
    };
    Ok(truncate(raw))
}

fn truncate(mut options: Vec<String>) -> Vec<String> {
    if options.len() > MAX_OPTIONS {
        options.truncate(MAX_OPTIONS);
        options.push(TRUNCATED_SENTINEL.to_string());
    }
    options
}

/// Clicks to open, follows `aria-controls` to the listbox if no
/// `role=listbox` is directly visible (else falls back to native
/// options), then scrolls up to 10 rounds, appending unseen option texts
/// until the count stabilizes, and presses Escape to close.
async fn scan_combobox_options(
    driver: &dyn BrowserDriver,
    element: &Arc<dyn ElementHandle>,
) -> Result<Vec<String>, AutopilotError> {
    element
        .click(crate::driver::ClickOptions {
            force: false,
            timeout: None,
        })
        .await?;

    let listbox = if let Some(listbox) = driver.query("[role=listbox]").await? {
        if listbox.is_visible().await? {
            Some(listbox)
        } else {
            None
        }
    } else {
        None
    };

    let listbox = match listbox {
        Some(lb) => Some(lb),
        None => {
            if let Some(controls_id) = element.get_attribute("aria-controls").await? {
                driver.query(&format!("#{controls_id}")).await?
            } else {
                None
            }
        }
    };

    let Some(listbox) = listbox else {
        let fallback = element.list_options().await?;
        driver.keyboard("Escape").await?;
        return Ok(fallback);
    };

    let mut seen: Vec<String> = Vec::new();
    for _ in 0..MAX_SCROLL_ROUNDS {
        let options = driver.query_all("[role=option]").await?;
        let mut grew = false;
        for opt in options {
            if !opt.is_visible().await? {
                continue;
            }
            let text = opt.text_content().await?;
            if !text.is_empty() && !seen.contains(&text) {
                seen.push(text);
                grew = true;
            }
        }
        if !grew {
            break;
        }
        let _ = listbox.scroll_into_view_if_needed().await;
    }

    driver.keyboard("Escape").await?;
    Ok(seen)
}

/// Enumerates descendant `input[type=radio]` within the group, labeling
/// each by aria-label > associated label > wrapping label minus self >
/// value > positional "Option N" fallback.
async fn scan_radio_options(
    driver: &dyn BrowserDriver,
    element: &Arc<dyn ElementHandle>,
) -> Result<Vec<String>, AutopilotError> {
    let Some(group_name) = element.get_attribute("name").await? else {
        return Ok(Vec::new());
    };
    let members = driver
        .query_all(&format!("input[name=\"{group_name}\"]"))
        .await?;

    let mut labels = Vec::with_capacity(members.len());
    for (idx, member) in members.iter().enumerate() {
        let label = if let Some(v) = member.get_attribute("aria-label").await? {
            v
        } else if let Some(v) = member.get_attribute("label-for-text").await? {
            v
        } else if let Some(v) = member.get_attribute("label-wrap-text").await? {
            v
        } else if let Some(v) = member.get_attribute("value").await? {
            v
        } else {
            format!("Option {}", idx + 1)
        };
        labels.push(label);
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{DomFixture, FixtureKind, FixtureNode, RecordingDriver};

    #[tokio::test]
    async fn select_enumerates_native_options() {
        let node = FixtureNode::new("s", "#s", FixtureKind::Select).with_options(&["GB", "TB"]);
        let driver = RecordingDriver::new(DomFixture::new(vec![node], vec![]));
        let handle = driver.query("#s").await.unwrap().unwrap();
        let options = scan_options(&driver, &handle, FieldType::Select).await.unwrap();
        assert_eq!(options, vec!["GB".to_string(), "TB".to_string()]);
    }

    #[tokio::test]
    async fn truncates_beyond_fifty_entries() {
        let many: Vec<String> = (0..60).map(|i| format!("opt-{i}")).collect();
        let node = FixtureNode::new("s", "#s", FixtureKind::Select)
            .with_options(&many.iter().map(|s| s.as_str()).collect::<Vec<_>>());
        let driver = RecordingDriver::new(DomFixture::new(vec![node], vec![]));
        let handle = driver.query("#s").await.unwrap().unwrap();
        let options = scan_options(&driver, &handle, FieldType::Select).await.unwrap();
        assert_eq!(options.len(), 51);
        assert_eq!(options.last().unwrap(), "TRUNCATED");
    }

    #[tokio::test]
    async fn radio_group_labels_by_aria_label() {
        let opt_a = FixtureNode::new("r-a", "#r-a", FixtureKind::Radio)
            .with_aria_label("Small")
            .with_name_group("size");
        let opt_b = FixtureNode::new("r-b", "#r-b", FixtureKind::Radio)
            .with_aria_label("Large")
            .with_name_group("size");
        let driver = RecordingDriver::new(DomFixture::new(vec![opt_a, opt_b], vec![]));
        let handle = driver.query("#r-a").await.unwrap().unwrap();
        let options = scan_options(&driver, &handle, FieldType::Radio).await.unwrap();
        assert_eq!(options, vec!["Small".to_string(), "Large".to_string()]);
    }
}
