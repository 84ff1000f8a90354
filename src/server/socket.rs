//! Page socket: messages from a test page routed to its browser runner

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use super::ServerState;

/// Message sent by the client script running in a test page
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PageMessage {
    /// Heartbeat
    Ping,
    TestsStart,
    TestResult {
        name: String,
        passed: bool,
        #[serde(default)]
        error: Option<String>,
    },
    /// The page finished running its tests
    AllTestResults,
    BrowserConsole { method: String, text: String },
}

/// What a browser runner sees of its page
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrowserEvent {
    Connected,
    Page(PageMessage),
    Disconnected,
}

/// Routes page events to the runner owning a launcher id
#[derive(Clone, Default)]
pub struct BrowserRegistry {
    senders: Arc<Mutex<HashMap<usize, mpsc::UnboundedSender<BrowserEvent>>>>,
}

impl BrowserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `launcher_id`; a previous registration is replaced
    pub fn register(&self, launcher_id: usize) -> mpsc::UnboundedReceiver<BrowserEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(launcher_id, tx);
        rx
    }

    pub fn unregister(&self, launcher_id: usize) {
        self.lock().remove(&launcher_id);
    }

    pub fn contains(&self, launcher_id: usize) -> bool {
        self.lock().contains_key(&launcher_id)
    }

    /// Deliver an event; false when nobody listens for `launcher_id`
    pub fn send(&self, launcher_id: usize, event: BrowserEvent) -> bool {
        match self.lock().get(&launcher_id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<usize, mpsc::UnboundedSender<BrowserEvent>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(super) async fn socket_handler(
    ws: WebSocketUpgrade,
    Path(launcher_id): Path<usize>,
    State(state): State<ServerState>,
) -> Response {
    if !state.registry.contains(launcher_id) {
        return (StatusCode::NOT_FOUND, "unknown launcher").into_response();
    }
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, launcher_id, registry))
}

async fn handle_socket(mut socket: WebSocket, launcher_id: usize, registry: BrowserRegistry) {
    debug!(launcher_id, "page connected");
    if !registry.send(launcher_id, BrowserEvent::Connected) {
        return;
    }

    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let page_message = match serde_json::from_str::<PageMessage>(text.as_str()) {
            Ok(page_message) => page_message,
            Err(e) => {
                debug!(launcher_id, error = %e, "ignoring page message");
                continue;
            }
        };
        if !registry.send(launcher_id, BrowserEvent::Page(page_message)) {
            return;
        }
    }

    debug!(launcher_id, "page disconnected");
    registry.send(launcher_id, BrowserEvent::Disconnected);
}
