//! Fills a resolved control according to its field type (spec.md §4.4).
//! Every fill operation here is expected to be wrapped in `with_retry` by
//! the orchestrator, not internally, so retry counts stay observable at
//! the call site.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::driver::{BrowserDriver, ElementHandle};
use crate::errors::AutopilotError;
use crate::model::FieldType;

const COMBOBOX_SETTLE_MS: u64 = 300;

/// Fills `element` with `value` according to `field_type`. `driver` is
/// used for the handful of strategies that need page-level calls (custom
/// dropdown option matching, keyboard fallback).
pub async fn fill(
    driver: &dyn BrowserDriver,
    element: &Arc<dyn ElementHandle>,
    field_type: FieldType,
    value: &str,
) -> Result<(), AutopilotError> {
    match field_type {
        FieldType::Number | FieldType::Text => fill_text_like(element, value).await,
        FieldType::Toggle => fill_toggle(element, value).await,
        FieldType::Radio => fill_radio(driver, element, value).await,
        FieldType::Select => fill_select(driver, element, value).await,
        FieldType::Combobox => fill_combobox(driver, element, value).await,
        FieldType::InstanceSearch => fill_instance_search(driver, element, value).await,
        FieldType::Unknown => Err(AutopilotError::AutomationFatal(
            "cannot fill a field of unknown type".into(),
        )),
    }
}

async fn fill_text_like(element: &Arc<dyn ElementHandle>, value: &str) -> Result<(), AutopilotError> {
    element
        .click(crate::driver::ClickOptions {
            force: false,
            timeout: None,
        })
        .await?;
    element.fill("").await?;
    element.fill(value).await
}

/// Desired state is true unless `value` parses as an explicit falsy
/// string ("false", "0", "off", "no"); clicks only when it differs from
/// the control's current `aria-checked`/`checked` state.
async fn fill_toggle(element: &Arc<dyn ElementHandle>, value: &str) -> Result<(), AutopilotError> {
    let desired = !matches!(value.trim().to_lowercase().as_str(), "false" | "0" | "off" | "no" | "");
    let current = element
        .get_attribute("aria-checked")
        .await?
        .or(element.get_attribute("checked").await?)
        .map(|v| v == "true")
        .unwrap_or(false);

    if current != desired {
        element
            .click(crate::driver::ClickOptions {
                force: false,
                timeout: None,
            })
            .await?;
    }
    Ok(())
}

/// Selects the radio option within the group whose accessible name or
/// value matches `value` case-insensitively.
async fn fill_radio(
    driver: &dyn BrowserDriver,
    element: &Arc<dyn ElementHandle>,
    value: &str,
) -> Result<(), AutopilotError> {
    let Some(group_name) = element.get_attribute("name").await? else {
        return element
            .click(crate::driver::ClickOptions {
                force: false,
                timeout: None,
            })
            .await;
    };
    let group = driver
        .query_all(&format!("input[name=\"{group_name}\"]"))
        .await?;

    for candidate in &group {
        let label = candidate
            .get_attribute("aria-label")
            .await?
            .or(candidate.get_attribute("value").await?)
            .unwrap_or_default();
        if label.eq_ignore_ascii_case(value) {
            return candidate
                .click(crate::driver::ClickOptions {
                    force: false,
                    timeout: None,
                })
                .await;
        }
    }

    element
        .click(crate::driver::ClickOptions {
            force: false,
            timeout: None,
        })
        .await
}

/// Native `selectOption` by label then by value; falls back to the
/// custom-dropdown path (click to open, match a visible `role=option`,
/// then ArrowDown+Enter if still closed) per spec.md §4.4.
async fn fill_select(
    driver: &dyn BrowserDriver,
    element: &Arc<dyn ElementHandle>,
    value: &str,
) -> Result<(), AutopilotError> {
    if element.select_option(Some(value), None).await.is_ok() {
        return Ok(());
    }
    if element.select_option(None, Some(value)).await.is_ok() {
        return Ok(());
    }

    element
        .click(crate::driver::ClickOptions {
            force: false,
            timeout: None,
        })
        .await?;

    if click_custom_option(driver, value).await? {
        return Ok(());
    }

    driver.keyboard("ArrowDown").await?;
    driver.keyboard("Enter").await?;
    Ok(())
}

/// Clicks a visible `role=option` candidate matching `value` by, in order:
/// exact accessible name, substring containment, or normalized-token
/// equality against `[role=option]`/`[data-value]` candidates.
async fn click_custom_option(driver: &dyn BrowserDriver, value: &str) -> Result<bool, AutopilotError> {
    if let Some(exact) = driver.by_role("option", Some(value), true).await? {
        exact
            .click(crate::driver::ClickOptions {
                force: false,
                timeout: None,
            })
            .await?;
        return Ok(true);
    }
    if let Some(contains) = driver.by_role("option", Some(value), false).await? {
        contains
            .click(crate::driver::ClickOptions {
                force: false,
                timeout: None,
            })
            .await?;
        return Ok(true);
    }

    let normalized_value = normalize_token(value);
    for candidate in driver.query_all("[role=option], [data-value]").await? {
        if !candidate.is_visible().await? {
            continue;
        }
        let text = candidate.text_content().await.unwrap_or_default();
        let data_value = candidate.get_attribute("data-value").await?.unwrap_or_default();
        if normalize_token(&text) == normalized_value || normalize_token(&data_value) == normalized_value {
            candidate
                .click(crate::driver::ClickOptions {
                    force: false,
                    timeout: None,
                })
                .await?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn normalize_token(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Click, fill, wait for the listbox to settle, then prefer a `role=option`
/// whose name contains the value; else press Enter. Verifies the input's
/// final value contains the target (case-insensitive), failing otherwise.
async fn fill_combobox(
    driver: &dyn BrowserDriver,
    element: &Arc<dyn ElementHandle>,
    value: &str,
) -> Result<(), AutopilotError> {
    element
        .click(crate::driver::ClickOptions {
            force: false,
            timeout: None,
        })
        .await?;
    element.fill(value).await?;
    sleep(Duration::from_millis(COMBOBOX_SETTLE_MS)).await;

    if let Some(option) = driver.by_role("option", Some(value), false).await? {
        option
            .click(crate::driver::ClickOptions {
                force: false,
                timeout: None,
            })
            .await?;
    } else {
        driver.keyboard("Enter").await?;
    }

    verify_final_value(element, value).await
}

/// Same shape as the combobox path, but the final-value verification is
/// skipped and the first non-header option is chosen when none matches.
async fn fill_instance_search(
    driver: &dyn BrowserDriver,
    element: &Arc<dyn ElementHandle>,
    value: &str,
) -> Result<(), AutopilotError> {
    element
        .click(crate::driver::ClickOptions {
            force: false,
            timeout: None,
        })
        .await?;
    element.fill(value).await?;
    sleep(Duration::from_millis(COMBOBOX_SETTLE_MS)).await;

    if let Some(option) = driver.by_role("option", Some(value), false).await? {
        option
            .click(crate::driver::ClickOptions {
                force: false,
                timeout: None,
            })
            .await?;
        return Ok(());
    }

    for candidate in driver.query_all("[role=option]").await? {
        if !candidate.is_visible().await? {
            continue;
        }
        let role = candidate.get_attribute("role").await?.unwrap_or_default();
        if role == "option" {
            candidate
                .click(crate::driver::ClickOptions {
                    force: false,
                    timeout: None,
                })
                .await?;
            return Ok(());
        }
    }
    Ok(())
}

async fn verify_final_value(
    element: &Arc<dyn ElementHandle>,
    expected: &str,
) -> Result<(), AutopilotError> {
    let current = element
        .get_attribute("value")
        .await?
        .or(Some(element.text_content().await?))
        .unwrap_or_default();
    if current.to_lowercase().contains(&expected.to_lowercase()) {
        Ok(())
    } else {
        Err(AutopilotError::LocatorNotFound(format!(
            "combobox final value {current:?} does not contain {expected:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::recording::{DomFixture, FixtureKind, FixtureNode, RecordingDriver};

    #[tokio::test]
    async fn toggle_clicks_only_when_state_differs() {
        let node = FixtureNode::new("t", "#t", FixtureKind::Switch);
        let driver = RecordingDriver::new(DomFixture::new(vec![node], vec![]));
        let handle = driver.query("#t").await.unwrap().unwrap();

        fill(&driver, &handle, FieldType::Toggle, "true").await.unwrap();
        assert_eq!(handle.get_attribute("checked").await.unwrap(), Some("true".into()));

        fill(&driver, &handle, FieldType::Toggle, "true").await.unwrap();
        assert_eq!(handle.get_attribute("checked").await.unwrap(), Some("true".into()));

        fill(&driver, &handle, FieldType::Toggle, "false").await.unwrap();
        assert_eq!(handle.get_attribute("checked").await.unwrap(), Some("false".into()));
    }

    #[tokio::test]
    async fn combobox_fails_when_final_value_does_not_match() {
        let node = FixtureNode::new("c", "#c", FixtureKind::Combobox);
        let driver = RecordingDriver::new(DomFixture::new(vec![node], vec![]));
        let handle = driver.query("#c").await.unwrap().unwrap();
        let result = fill(&driver, &handle, FieldType::Combobox, "us-east-1").await;
        assert!(result.is_err());
    }
}
