//! Plain WebSocket endpoint for automation tools.
//!
//! Each text message carries one JSON request, answered with one JSON
//! response on the same socket. Hub events are pushed to every client as
//! `{"event": ..., "data": ...}`.

use crate::error::{Result, SyncError};
use crate::events::{Event, RawClientInfo};
use crate::hub::{BroadcastHub, MediaRequest, Transport, SOURCE_RAW};
use crate::pubsub::DeviceRegistry;
use crate::types::ClientId;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

/// Version reported by `get_status`
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

struct RawClient {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Message>,
}

/// Open raw protocol connections
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<ClientId, RawClient>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, RawClient>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, addr: SocketAddr, tx: mpsc::UnboundedSender<Message>) -> ClientId {
        let id = Uuid::new_v4();
        self.lock().insert(id, RawClient { addr, tx });
        id
    }

    fn remove(&self, id: &ClientId) {
        self.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connected clients as reported in `devices_updated`
    pub fn list(&self) -> Vec<RawClientInfo> {
        let mut clients: Vec<_> = self
            .lock()
            .values()
            .map(|client| RawClientInfo {
                id: format!("streamerbot_{}", client.addr),
                kind: "streamerbot".to_string(),
                remote_address: client.addr.to_string(),
                connected: true,
            })
            .collect();
        clients.sort_by(|a, b| a.id.cmp(&b.id));
        clients
    }
}

impl Transport for ClientRegistry {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn emit(&self, event: &Event) {
        let text = match event.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize '{}': {}", event.name(), e);
                return;
            }
        };
        for client in self.lock().values() {
            // a closed channel means the client task is already cleaning up
            let _ = client.tx.send(Message::Text(text.clone()));
        }
    }
}

/// Answers raw protocol requests
#[derive(Clone)]
pub struct RawRequestHandler {
    hub: BroadcastHub,
    devices: DeviceRegistry,
}

impl RawRequestHandler {
    /// `devices` is the pub/sub registry counted by `get_status`
    pub fn new(hub: BroadcastHub, devices: DeviceRegistry) -> Self {
        Self { hub, devices }
    }

    /// Answer one request message
    ///
    /// Never fails: every problem becomes a `{"status": "error"}` response
    /// and the connection stays open.
    pub async fn handle_request(&self, text: &str) -> Value {
        let request: Value = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(_) => return error("Invalid JSON format"),
        };

        let result = match request.get("action").and_then(Value::as_str) {
            Some("trigger_animation") => self.trigger_animation(&request).await,
            Some("get_status") => self.get_status().await,
            _ => {
                let action = match request.get("action") {
                    Some(Value::String(action)) => action.clone(),
                    Some(other) => other.to_string(),
                    None => "null".to_string(),
                };
                return error(format!("Unknown action type: {}", action));
            }
        };

        result.unwrap_or_else(|e| {
            tracing::error!("Raw protocol error: {}", e);
            error(format!("Server error: {}", e))
        })
    }

    async fn trigger_animation(&self, request: &Value) -> Result<Value> {
        let Some(animation) = request
            .get("animation")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
        else {
            return Ok(error("Missing animation parameter"));
        };
        let instant = request.get("instant").and_then(Value::as_bool).unwrap_or(true);
        let force_refresh = request
            .get("force_refresh")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let source = request
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or(SOURCE_RAW);

        let media_request = MediaRequest::new(animation, source)
            .refresh_page(force_refresh)
            .instant(instant);

        match self.hub.apply(media_request).await {
            Ok(change) => {
                tracing::info!("Raw client changed animation to {}", change.media);
                Ok(json!({
                    "status": "success",
                    "message": format!("Animation changed to {}", change.media),
                    "animation": change.media,
                    "instant": instant,
                    "force_refresh": force_refresh,
                    "media_type": change.media_type,
                }))
            }
            Err(SyncError::MediaNotFound { name, available }) => {
                tracing::warn!("Raw client requested unknown media '{}'", name);
                Ok(json!({
                    "status": "error",
                    "message": format!("Animation file not found: {}", name),
                    "available_media": available,
                }))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_status(&self) -> Result<Value> {
        Ok(json!({
            "status": "success",
            "current_animation": self.hub.current_media().await?,
            "connected_devices": self.devices.len(),
            "server_version": SERVER_VERSION,
        }))
    }
}

fn error(message: impl Into<String>) -> Value {
    json!({ "status": "error", "message": message.into() })
}

/// Raw protocol WebSocket server
pub struct RawProtocolServer {
    listener: TcpListener,
    clients: ClientRegistry,
    handler: RawRequestHandler,
}

impl RawProtocolServer {
    /// Bind the listening socket
    pub async fn bind(
        addr: SocketAddr,
        clients: ClientRegistry,
        handler: RawRequestHandler,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Raw WebSocket server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            clients,
            handler,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the task is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let clients = self.clients.clone();
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_client(stream, addr, clients, handler).await {
                            tracing::debug!("Raw client {} ended with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => tracing::warn!("Raw server accept failed: {}", e),
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    clients: ClientRegistry,
    handler: RawRequestHandler,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                tracing::debug!("Failed to send to raw client: {}", e);
                break;
            }
        }
    });

    let id = clients.add(addr, tx.clone());
    tracing::info!("Raw WebSocket client connected: {}", addr);

    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                tracing::debug!("Raw request from {}: {}", addr, text);
                let response = handler.handle_request(&text).await;
                if tx.send(Message::Text(response.to_string())).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!("Raw client {} error: {}", addr, e);
                break;
            }
            _ => {}
        }
    }

    clients.remove(&id);
    drop(tx);
    write_handle.abort();
    tracing::info!("Raw WebSocket client disconnected: {}", addr);
    Ok(())
}
