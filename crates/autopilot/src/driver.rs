//! Browser driver adapter (spec.md §4.1): the primitives every other
//! component depends on, plus two implementations:
//!
//! - [`WsBridgeDriver`] talks to an external browser-driving process over
//!   a `tokio-tungstenite` WebSocket using an id-correlated
//!   request/response protocol, grounded directly in the teacher's
//!   `extension_bridge.rs` bridge pattern (pending map of `oneshot`
//!   senders keyed by request id, guarded by `tokio::sync::Mutex`,
//!   repurposed from a Chrome-extension bridge to a generic "whatever
//!   engine speaks this JSON protocol" bridge, since spec.md §6 does not
//!   prescribe an engine).
//! - [`recording::RecordingDriver`] (behind the `test-support` feature)
//!   fakes the primitives against an in-memory DOM fixture so the rest of
//!   the pipeline can be exercised deterministically in tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::errors::AutopilotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Visible,
    Hidden,
    Attached,
    Detached,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    /// Vertical distance from this box's vertical center to `other`'s.
    pub fn delta_y(&self, other: &BoundingBox) -> f64 {
        (self.center_y() - other.center_y()).abs()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClickOptions {
    pub force: bool,
    pub timeout: Option<Duration>,
}

/// A resolved handle to a concrete DOM element. Implementations are
/// driver-specific (a remote id for `WsBridgeDriver`, an index into a
/// fixture vector for `RecordingDriver`).
#[async_trait]
pub trait ElementHandle: Send + Sync {
    async fn click(&self, opts: ClickOptions) -> Result<(), AutopilotError>;
    async fn fill(&self, text: &str) -> Result<(), AutopilotError>;
    async fn select_option(
        &self,
        label: Option<&str>,
        value: Option<&str>,
    ) -> Result<(), AutopilotError>;
    async fn bounding_box(&self) -> Result<Option<BoundingBox>, AutopilotError>;
    async fn is_visible(&self) -> Result<bool, AutopilotError>;
    async fn text_content(&self) -> Result<String, AutopilotError>;
    async fn get_attribute(&self, name: &str) -> Result<Option<String>, AutopilotError>;
    async fn scroll_into_view_if_needed(&self) -> Result<(), AutopilotError>;
    async fn wait_for_state(
        &self,
        state: ElementState,
        timeout: Duration,
    ) -> Result<(), AutopilotError>;
    /// Native `<option>` text content for a `SELECT` element. Combobox and
    /// radio option enumeration (spec.md §4.6) instead drive the page
    /// through `query`/`query_all`/`keyboard` on [`BrowserDriver`].
    async fn list_options(&self) -> Result<Vec<String>, AutopilotError>;
    /// Opaque selector/id string used for logging and for re-deriving a
    /// stable css selector where the scanner needs one.
    fn debug_id(&self) -> String;
}

/// The primitives spec.md §4.1 names. All methods may suspend; per the
/// concurrency model (spec.md §5) exactly one is ever in flight per page.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, url: &str, wait_mode: WaitMode) -> Result<(), AutopilotError>;
    async fn query(&self, selector: &str) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError>;
    async fn query_all(&self, selector: &str) -> Result<Vec<Arc<dyn ElementHandle>>, AutopilotError>;
    async fn by_role(
        &self,
        role: &str,
        name: Option<&str>,
        exact: bool,
    ) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError>;
    async fn by_label(
        &self,
        text: &str,
        exact: bool,
    ) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError>;
    async fn by_text(
        &self,
        text: &str,
        exact: bool,
    ) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError>;
    async fn evaluate(&self, script: &str, args: Value) -> Result<Value, AutopilotError>;
    async fn screenshot(&self, path: &Path) -> Result<(), AutopilotError>;
    async fn keyboard(&self, chord: &str) -> Result<(), AutopilotError>;
    async fn wait(&self, ms: u64) -> Result<(), AutopilotError>;
    async fn viewport(&self) -> Result<(u32, u32), AutopilotError>;
}

/// OS-appropriate find-in-page chord per spec.md §4.3 tier 6.
pub fn find_in_page_chord() -> &'static str {
    if cfg!(target_os = "macos") {
        "Meta+F"
    } else {
        "Control+F"
    }
}

// ---------------------------------------------------------------------
// WsBridgeDriver: JSON-over-WebSocket adapter.
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WsRequest {
    id: String,
    action: String,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct WsResponse {
    id: String,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<WsErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct WsErrorPayload {
    kind: String,
    message: String,
}

type PendingMap = HashMap<String, oneshot::Sender<Result<Value, WsErrorPayload>>>;

struct WsBridgeInner {
    sink: Mutex<
        futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    >,
    pending: Arc<Mutex<PendingMap>>,
}

impl WsBridgeInner {
    async fn call(&self, action: &str, params: Value) -> Result<Value, AutopilotError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let req = WsRequest {
            id: id.clone(),
            action: action.to_string(),
            params,
        };
        let payload = serde_json::to_string(&req)
            .map_err(|e| AutopilotError::AutomationFatal(format!("encode request: {e}")))?;

        {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(payload))
                .await
                .map_err(|e| AutopilotError::NavigationFailed(format!("ws send failed: {e}")))?;
        }

        match rx.await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(err)) => Err(classify_remote_error(&err)),
            Err(_) => Err(AutopilotError::NavigationFailed(
                "driver bridge closed before responding".into(),
            )),
        }
    }
}

fn classify_remote_error(err: &WsErrorPayload) -> AutopilotError {
    match err.kind.as_str() {
        "ElementNotVisible" => AutopilotError::ElementNotVisible(err.message.clone()),
        "Timeout" => AutopilotError::Timeout(err.message.clone()),
        "NavigationFailed" => AutopilotError::NavigationFailed(err.message.clone()),
        "StaleElement" => AutopilotError::StaleElement(err.message.clone()),
        "BrowserCrash" => AutopilotError::BrowserCrash(err.message.clone()),
        other => AutopilotError::AutomationFatal(format!("{other}: {}", err.message)),
    }
}

/// Drives a page through a remote process that speaks the bridge's JSON
/// protocol over WebSocket. The spec does not prescribe which engine runs
/// behind this protocol (spec.md §6, "Driver assumptions").
pub struct WsBridgeDriver {
    inner: Arc<WsBridgeInner>,
}

impl WsBridgeDriver {
    pub async fn connect(addr: &str) -> Result<Self, AutopilotError> {
        let (ws, _resp) = connect_async(addr)
            .await
            .map_err(|e| AutopilotError::BrowserCrash(format!("connect to driver bridge: {e}")))?;
        let (sink, mut stream) = ws.split();
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let Ok(Message::Text(text)) = msg else { continue };
                let Ok(resp) = serde_json::from_str::<WsResponse>(&text) else {
                    continue;
                };
                if let Some(tx) = reader_pending.lock().await.remove(&resp.id) {
                    let outcome = if resp.ok {
                        Ok(resp.result)
                    } else {
                        Err(resp.error.unwrap_or(WsErrorPayload {
                            kind: "AutomationFatal".into(),
                            message: "unknown remote error".into(),
                        }))
                    };
                    let _ = tx.send(outcome);
                }
            }
        });

        Ok(Self {
            inner: Arc::new(WsBridgeInner {
                sink: Mutex::new(sink),
                pending,
            }),
        })
    }

    fn handle(&self, remote_id: String) -> Arc<dyn ElementHandle> {
        Arc::new(WsElementHandle {
            remote_id,
            inner: self.inner.clone(),
        })
    }
}

struct WsElementHandle {
    remote_id: String,
    inner: Arc<WsBridgeInner>,
}

#[async_trait]
impl ElementHandle for WsElementHandle {
    async fn click(&self, opts: ClickOptions) -> Result<(), AutopilotError> {
        self.inner
            .call(
                "click",
                serde_json::json!({ "id": self.remote_id, "force": opts.force }),
            )
            .await?;
        Ok(())
    }

    async fn fill(&self, text: &str) -> Result<(), AutopilotError> {
        self.inner
            .call("fill", serde_json::json!({ "id": self.remote_id, "text": text }))
            .await?;
        Ok(())
    }

    async fn select_option(
        &self,
        label: Option<&str>,
        value: Option<&str>,
    ) -> Result<(), AutopilotError> {
        self.inner
            .call(
                "selectOption",
                serde_json::json!({ "id": self.remote_id, "label": label, "value": value }),
            )
            .await?;
        Ok(())
    }

    async fn bounding_box(&self) -> Result<Option<BoundingBox>, AutopilotError> {
        let v = self
            .inner
            .call("boundingBox", serde_json::json!({ "id": self.remote_id }))
            .await?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(BoundingBox {
            x: v["x"].as_f64().unwrap_or_default(),
            y: v["y"].as_f64().unwrap_or_default(),
            width: v["width"].as_f64().unwrap_or_default(),
            height: v["height"].as_f64().unwrap_or_default(),
        }))
    }

    async fn is_visible(&self) -> Result<bool, AutopilotError> {
        let v = self
            .inner
            .call("isVisible", serde_json::json!({ "id": self.remote_id }))
            .await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    async fn text_content(&self) -> Result<String, AutopilotError> {
        let v = self
            .inner
            .call("textContent", serde_json::json!({ "id": self.remote_id }))
            .await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    async fn get_attribute(&self, name: &str) -> Result<Option<String>, AutopilotError> {
        let v = self
            .inner
            .call(
                "getAttribute",
                serde_json::json!({ "id": self.remote_id, "name": name }),
            )
            .await?;
        Ok(v.as_str().map(|s| s.to_string()))
    }

    async fn scroll_into_view_if_needed(&self) -> Result<(), AutopilotError> {
        self.inner
            .call("scrollIntoViewIfNeeded", serde_json::json!({ "id": self.remote_id }))
            .await?;
        Ok(())
    }

    async fn wait_for_state(
        &self,
        state: ElementState,
        timeout: Duration,
    ) -> Result<(), AutopilotError> {
        let state_str = match state {
            ElementState::Visible => "visible",
            ElementState::Hidden => "hidden",
            ElementState::Attached => "attached",
            ElementState::Detached => "detached",
        };
        self.inner
            .call(
                "waitForState",
                serde_json::json!({
                    "id": self.remote_id,
                    "state": state_str,
                    "timeoutMs": timeout.as_millis() as u64,
                }),
            )
            .await?;
        Ok(())
    }

    async fn list_options(&self) -> Result<Vec<String>, AutopilotError> {
        let v = self
            .inner
            .call("listOptions", serde_json::json!({ "id": self.remote_id }))
            .await?;
        Ok(v.as_array()
            .map(|arr| arr.iter().filter_map(|e| e.as_str().map(String::from)).collect())
            .unwrap_or_default())
    }

    fn debug_id(&self) -> String {
        self.remote_id.clone()
    }
}

#[async_trait]
impl BrowserDriver for WsBridgeDriver {
    async fn goto(&self, url: &str, wait_mode: WaitMode) -> Result<(), AutopilotError> {
        let mode = match wait_mode {
            WaitMode::Load => "load",
            WaitMode::DomContentLoaded => "domcontentloaded",
            WaitMode::NetworkIdle => "networkidle",
        };
        self.inner
            .call("goto", serde_json::json!({ "url": url, "waitMode": mode }))
            .await?;
        Ok(())
    }

    async fn query(&self, selector: &str) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
        let v = self
            .inner
            .call("query", serde_json::json!({ "selector": selector }))
            .await?;
        Ok(v.as_str().map(|id| self.handle(id.to_string())))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Arc<dyn ElementHandle>>, AutopilotError> {
        let v = self
            .inner
            .call("queryAll", serde_json::json!({ "selector": selector }))
            .await?;
        Ok(v.as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|e| e.as_str())
                    .map(|id| self.handle(id.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn by_role(
        &self,
        role: &str,
        name: Option<&str>,
        exact: bool,
    ) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
        let v = self
            .inner
            .call(
                "byRole",
                serde_json::json!({ "role": role, "name": name, "exact": exact }),
            )
            .await?;
        Ok(v.as_str().map(|id| self.handle(id.to_string())))
    }

    async fn by_label(
        &self,
        text: &str,
        exact: bool,
    ) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
        let v = self
            .inner
            .call("byLabel", serde_json::json!({ "text": text, "exact": exact }))
            .await?;
        Ok(v.as_str().map(|id| self.handle(id.to_string())))
    }

    async fn by_text(
        &self,
        text: &str,
        exact: bool,
    ) -> Result<Option<Arc<dyn ElementHandle>>, AutopilotError> {
        let v = self
            .inner
            .call("byText", serde_json::json!({ "text": text, "exact": exact }))
            .await?;
        Ok(v.as_str().map(|id| self.handle(id.to_string())))
    }

    async fn evaluate(&self, script: &str, args: Value) -> Result<Value, AutopilotError> {
        self.inner
            .call("evaluate", serde_json::json!({ "script": script, "args": args }))
            .await
    }

    async fn screenshot(&self, path: &Path) -> Result<(), AutopilotError> {
        self.inner
            .call(
                "screenshot",
                serde_json::json!({ "path": path.to_string_lossy() }),
            )
            .await?;
        Ok(())
    }

    async fn keyboard(&self, chord: &str) -> Result<(), AutopilotError> {
        self.inner
            .call("keyboard", serde_json::json!({ "chord": chord }))
            .await?;
        Ok(())
    }

    async fn wait(&self, ms: u64) -> Result<(), AutopilotError> {
        self.inner.call("wait", serde_json::json!({ "ms": ms })).await?;
        Ok(())
    }

    async fn viewport(&self) -> Result<(u32, u32), AutopilotError> {
        let v = self.inner.call("viewport", Value::Null).await?;
        Ok((
            v["width"].as_u64().unwrap_or(1280) as u32,
            v["height"].as_u64().unwrap_or(800) as u32,
        ))
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod recording;
