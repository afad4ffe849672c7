//! Room-based WebSocket server for browser displays and the admin page.
//!
//! Every session joins `all` plus the room of its device kind. Events are
//! fanned out through one broadcast channel and filtered per session by the
//! rooms it has joined; a session that falls behind skips messages rather
//! than slowing down the others.

use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::catalog::is_video_file;
use crate::events::{
    DeviceInfo, DevicesInfo, ErrorInfo, Event, InfoMessage, StatusInfo, VideoControl,
};
use crate::hub::{BroadcastHub, MediaRequest, Transport, SOURCE_PUBSUB};
use crate::raw_server::ClientRegistry;
use crate::types::ClientId;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use uuid::Uuid;

/// Slow sessions that fall this far behind skip messages
const BROADCAST_CAPACITY: usize = 1024;

/// Room every session is in
pub const ROOM_ALL: &str = "all";

/// Scene names understood by `scene_change` when the sender brings no mapping
const DEFAULT_SCENE_ANIMATIONS: &[(&str, &str)] = &[
    ("gaming", "anim1.html"),
    ("chatting", "anim2.html"),
    ("brb", "anim3.html"),
    ("be right back", "anim3.html"),
    ("starting soon", "anim1.html"),
    ("ending soon", "anim2.html"),
];

/// Kind of browser client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Tv,
    Admin,
}

impl DeviceKind {
    /// Room name and wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Tv => "tv",
            DeviceKind::Admin => "admin",
        }
    }

    /// Detect the kind from the upgrade request
    ///
    /// Admin when the path contains `/admin`, the query has `type=admin`, or
    /// the page that opened the socket lives under `/admin`.
    pub fn detect(path: &str, query: Option<&str>, referer: Option<&str>) -> Self {
        let admin_query = query
            .map(|q| q.split('&').any(|pair| pair == "type=admin"))
            .unwrap_or(false);
        let admin_referer = referer.map(|r| r.contains("/admin")).unwrap_or(false);
        if path.contains("/admin") || admin_query || admin_referer {
            DeviceKind::Admin
        } else {
            DeviceKind::Tv
        }
    }
}

#[derive(Debug, Clone)]
struct Device {
    kind: DeviceKind,
    user_agent: String,
    connected_at: f64,
}

/// Connected pub/sub sessions
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<Mutex<HashMap<ClientId, Device>>>,
}

impl DeviceRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, Device>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, id: ClientId, kind: DeviceKind, user_agent: impl Into<String>, connected_at: f64) {
        self.lock().insert(
            id,
            Device {
                kind,
                user_agent: user_agent.into(),
                connected_at,
            },
        );
    }

    pub fn remove(&self, id: &ClientId) -> Option<DeviceKind> {
        self.lock().remove(id).map(|device| device.kind)
    }

    /// Change the kind of a known session
    pub fn set_kind(&self, id: &ClientId, kind: DeviceKind) -> bool {
        match self.lock().get_mut(id) {
            Some(device) => {
                device.kind = kind;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn admin_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|device| device.kind == DeviceKind::Admin)
            .count()
    }

    pub fn tv_devices(&self) -> Vec<DeviceInfo> {
        let mut devices: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, device)| device.kind == DeviceKind::Tv)
            .map(|(id, device)| DeviceInfo {
                id: id.to_string(),
                kind: device.kind.as_str().to_string(),
                user_agent: device.user_agent.clone(),
                connected_at: device.connected_at,
            })
            .collect();
        devices.sort_by(|a, b| a.connected_at.total_cmp(&b.connected_at));
        devices
    }
}

/// Serialized event and the room it is addressed to
#[derive(Debug)]
pub struct Outbound {
    /// `None` reaches every session
    pub room: Option<String>,
    pub text: String,
}

/// Fan-out side of the pub/sub transport
#[derive(Clone)]
pub struct PubSubBroadcaster {
    sender: broadcast::Sender<Arc<Outbound>>,
    devices: DeviceRegistry,
    raw_clients: ClientRegistry,
}

impl PubSubBroadcaster {
    /// `raw_clients` is only read, to include raw connections in
    /// `devices_updated`
    pub fn new(raw_clients: ClientRegistry) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            sender,
            devices: DeviceRegistry::default(),
            raw_clients,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Outbound>> {
        self.sender.subscribe()
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    fn dispatch(&self, room: Option<String>, event: &Event) {
        match event.to_json() {
            Ok(text) => {
                // no receivers is fine
                let _ = self.sender.send(Arc::new(Outbound { room, text }));
            }
            Err(e) => tracing::error!("Failed to serialize '{}': {}", event.name(), e),
        }
    }

    /// Every connected client across both transports
    pub fn devices_info(&self) -> DevicesInfo {
        let tv_devices = self.devices.tv_devices();
        let streamerbot_devices = self.raw_clients.list();
        DevicesInfo {
            tv_count: tv_devices.len(),
            admin_count: self.devices.admin_count(),
            streamerbot_count: streamerbot_devices.len(),
            total_count: self.devices.len() + streamerbot_devices.len(),
            tv_devices,
            streamerbot_devices,
        }
    }

    /// Broadcast `devices_updated`
    pub fn announce_devices(&self) {
        self.emit(&Event::DevicesUpdated(self.devices_info()));
    }
}

impl Transport for PubSubBroadcaster {
    fn name(&self) -> &'static str {
        "pubsub"
    }

    fn emit(&self, event: &Event) {
        self.dispatch(None, event);
    }
}

/// Message sent by a browser client
#[derive(Debug, Deserialize)]
struct ClientMessage {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
struct TriggerData {
    #[serde(default)]
    animation: Option<String>,
    #[serde(default)]
    instant: Option<bool>,
    #[serde(default)]
    force_refresh: Option<bool>,
}

impl TriggerData {
    fn named(animation: &str) -> Self {
        Self {
            animation: Some(animation.to_string()),
            ..Self::default()
        }
    }
}

/// Automation event forwarded through the pub/sub socket
#[derive(Debug, Default, Deserialize)]
struct StreamerbotEvent {
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    data: Value,
}

struct Shared {
    hub: BroadcastHub,
    broadcaster: PubSubBroadcaster,
    clock: Arc<dyn Clock>,
}

/// Pub/sub WebSocket server
pub struct PubSubServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl PubSubServer {
    pub async fn bind(
        addr: SocketAddr,
        hub: BroadcastHub,
        broadcaster: PubSubBroadcaster,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Pub/sub server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                hub,
                broadcaster,
                clock,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept sessions until the task is dropped
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_session(stream, addr, shared).await {
                            tracing::debug!("Pub/sub session {} ended with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => tracing::warn!("Pub/sub accept failed: {}", e),
            }
        }
    }
}

/// What the upgrade request told us about the client
#[derive(Debug, Default)]
struct Handshake {
    kind: Option<DeviceKind>,
    user_agent: Option<String>,
}

impl Handshake {
    fn from_request(request: &Request) -> Self {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let referer = header("referer");
        Self {
            kind: Some(DeviceKind::detect(
                request.uri().path(),
                request.uri().query(),
                referer.as_deref(),
            )),
            user_agent: header("user-agent"),
        }
    }
}

/// Per-session state
struct Session {
    id: ClientId,
    rooms: HashSet<String>,
    tx: mpsc::UnboundedSender<Message>,
}

impl Session {
    fn send(&self, event: &Event) {
        match event.to_json() {
            Ok(text) => {
                let _ = self.tx.send(Message::Text(text));
            }
            Err(e) => tracing::error!("Failed to serialize '{}': {}", event.name(), e),
        }
    }

    fn wants(&self, outbound: &Outbound) -> bool {
        outbound
            .room
            .as_ref()
            .map_or(true, |room| self.rooms.contains(room))
    }
}

async fn serve_session(stream: TcpStream, addr: SocketAddr, shared: Arc<Shared>) -> Result<()> {
    let mut handshake = Handshake::default();
    let ws_stream = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            handshake = Handshake::from_request(request);
            Ok(response)
        },
    )
    .await?;

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                tracing::debug!("Failed to send to pub/sub session: {}", e);
                break;
            }
        }
    });

    let kind = handshake.kind.unwrap_or(DeviceKind::Tv);
    let mut session = Session {
        id: Uuid::new_v4(),
        rooms: [ROOM_ALL.to_string(), kind.as_str().to_string()].into(),
        tx,
    };
    let mut events = shared.broadcaster.subscribe();

    shared.broadcaster.devices().add(
        session.id,
        kind,
        handshake.user_agent.unwrap_or_else(|| "Unknown".to_string()),
        shared.clock.unix_timestamp(),
    );
    tracing::info!("Client connected: {} from {} (type: {})", session.id, addr, kind.as_str());
    shared.broadcaster.announce_devices();

    match status(&shared.hub, Some("Connected to scenesync server")).await {
        Ok(info) => session.send(&Event::Status(info)),
        Err(e) => tracing::warn!("Could not build status for {}: {}", session.id, e),
    }

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => handle_message(&shared, &mut session, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!("Pub/sub session {} error: {}", session.id, e);
                    break;
                }
                Some(Ok(_)) => {}
            },
            outbound = events.recv() => match outbound {
                Ok(outbound) => {
                    if session.wants(&outbound)
                        && session.tx.send(Message::Text(outbound.text.clone())).is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Pub/sub session {} skipped {} messages", session.id, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    let kind = shared.broadcaster.devices().remove(&session.id);
    tracing::info!(
        "Client disconnected: {} (type: {})",
        session.id,
        kind.map_or("unknown", |k| k.as_str())
    );
    shared.broadcaster.announce_devices();
    drop(session);
    write_handle.abort();
    Ok(())
}

async fn handle_message(shared: &Shared, session: &mut Session, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!("Undecodable message from {}: {}", session.id, e);
            session.send(&error_event("Invalid JSON format", None));
            return;
        }
    };
    let room = || message.data.get("room").and_then(Value::as_str).map(str::to_string);

    match message.event.as_str() {
        "join" => match room() {
            Some(room) => {
                tracing::debug!("{} joined room {}", session.id, room);
                session.rooms.insert(room);
            }
            None => session.send(&error_event("Missing room field", None)),
        },
        "leave" => match room() {
            Some(room) if room != ROOM_ALL => {
                session.rooms.remove(&room);
            }
            Some(_) => {}
            None => session.send(&error_event("Missing room field", None)),
        },
        "register_admin" => {
            if shared.broadcaster.devices().set_kind(&session.id, DeviceKind::Admin) {
                session.rooms.remove(DeviceKind::Tv.as_str());
                session.rooms.insert(DeviceKind::Admin.as_str().to_string());
                tracing::debug!("Client {} registered as admin dashboard", session.id);
                shared.broadcaster.announce_devices();
            }
        }
        "get_status" => match status(&shared.hub, None).await {
            Ok(info) => session.send(&Event::Status(info)),
            Err(e) => session.send(&error_event(e.to_string(), None)),
        },
        "trigger_animation" => {
            let data: TriggerData = serde_json::from_value(message.data).unwrap_or_default();
            trigger_animation(shared, session, data).await;
        }
        "scene_change" => scene_change(shared, session, &message.data).await,
        "streamerbot_event" => {
            let event: StreamerbotEvent = serde_json::from_value(message.data).unwrap_or_default();
            streamerbot_event(shared, session, event).await;
        }
        "video_control" => video_control(shared, session, &message.data).await,
        "video_seek" => video_seek(shared, &message.data),
        "video_volume" => video_volume(shared, session, &message.data),
        other => {
            tracing::debug!("Unknown event '{}' from {}", other, session.id);
            session.send(&error_event(format!("Unknown event: {}", other), None));
        }
    }
}

async fn trigger_animation(shared: &Shared, session: &Session, data: TriggerData) {
    let Some(animation) = data.animation.filter(|name| !name.trim().is_empty()) else {
        session.send(&error_event("Missing animation field", None));
        return;
    };

    let mut request = MediaRequest::new(animation.trim(), SOURCE_PUBSUB)
        .refresh_page(data.force_refresh.unwrap_or(true));
    if let Some(instant) = data.instant {
        request = request.instant(instant);
    }

    match shared.hub.apply(request).await {
        Ok(change) => tracing::info!(
            "Animation changed from {:?} to '{}' via pub/sub",
            change.previous,
            change.media
        ),
        Err(SyncError::MediaNotFound { name, available }) => {
            session.send(&error_event(
                format!("Media file '{}' not found", name),
                Some(available),
            ));
        }
        Err(e) => {
            tracing::error!("Pub/sub trigger failed: {}", e);
            session.send(&error_event(e.to_string(), None));
        }
    }
}

/// Map a scene name to an animation and trigger it
///
/// The sender's `animation_mapping` (lowercase scene names) wins over the
/// built-in names.
async fn scene_change(shared: &Shared, session: &Session, data: &Value) {
    let scene = data.get("scene_name").and_then(Value::as_str).unwrap_or_default();
    let key = scene.to_lowercase();
    let animation = data
        .get("animation_mapping")
        .and_then(|mapping| mapping.get(key.as_str()))
        .and_then(Value::as_str)
        .or_else(|| {
            DEFAULT_SCENE_ANIMATIONS
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, animation)| *animation)
        });

    match animation {
        Some(animation) => trigger_animation(shared, session, TriggerData::named(animation)).await,
        None => session.send(&info_event(format!("No animation mapping for scene '{}'", scene))),
    }
}

async fn streamerbot_event(shared: &Shared, session: &Session, event: StreamerbotEvent) {
    let event_type = event.event_type.unwrap_or_default();
    tracing::info!("StreamerBot event received: {}", event_type);

    match event_type.as_str() {
        "scene_change" => scene_change(shared, session, &event.data).await,
        "trigger_animation" => {
            let data: TriggerData = serde_json::from_value(event.data).unwrap_or_default();
            trigger_animation(shared, session, data).await;
        }
        "custom_animation" => {
            if let Some(animation) = event.data.get("animation").and_then(Value::as_str) {
                trigger_animation(shared, session, TriggerData::named(animation)).await;
            }
        }
        other => session.send(&info_event(format!("Unhandled StreamerBot event: {}", other))),
    }
}

/// Relay a playback command while a video is showing
async fn video_control(shared: &Shared, session: &Session, data: &Value) {
    let Some(action) = data
        .get("action")
        .and_then(Value::as_str)
        .filter(|action| !action.is_empty())
    else {
        session.send(&error_event("Missing action for video control", None));
        return;
    };

    match shared.hub.current_media().await {
        Ok(Some(current)) if !is_video_file(&current) => {
            session.send(&error_event("Current media is not a video file", None));
            return;
        }
        Ok(_) => {}
        Err(e) => {
            session.send(&error_event(format!("Video control error: {}", e), None));
            return;
        }
    }

    let value = data.get("value").cloned().unwrap_or(Value::Null);
    tracing::debug!("Video control: {} ({})", action, value);
    relay_video(
        shared,
        data,
        VideoControl {
            action: action.to_string(),
            value,
            message: format!("Video control: {}", action),
        },
    );
}

fn video_seek(shared: &Shared, data: &Value) {
    let time = data.get("time").cloned().unwrap_or_else(|| Value::from(0));
    let shown = time.as_str().map_or_else(|| time.to_string(), str::to_string);
    tracing::debug!("Video seek to {}s", shown);
    relay_video(
        shared,
        data,
        VideoControl {
            action: "seek".to_string(),
            message: format!("Video seek to {}s", shown),
            value: time,
        },
    );
}

fn video_volume(shared: &Shared, session: &Session, data: &Value) {
    let volume = match data.get("volume") {
        None => Some(0.5),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    let Some(volume) = volume.filter(|v| v.is_finite()) else {
        session.send(&error_event("Video volume error: volume must be a number", None));
        return;
    };

    let volume = volume.clamp(0.0, 1.0);
    let percent = (volume * 100.0) as u32;
    tracing::debug!("Video volume set to {}%", percent);
    relay_video(
        shared,
        data,
        VideoControl {
            action: "volume".to_string(),
            value: Value::from(volume),
            message: format!("Video volume set to {}%", percent),
        },
    );
}

/// Video commands reach everyone unless the sender names a room
fn relay_video(shared: &Shared, data: &Value, control: VideoControl) {
    let room = data.get("room").and_then(Value::as_str).map(str::to_string);
    shared.broadcaster.dispatch(room, &Event::VideoControl(control));
}

async fn status(hub: &BroadcastHub, message: Option<&str>) -> Result<StatusInfo> {
    let current = hub.current_media().await?;
    let media_type = match current.as_deref() {
        Some(name) => hub.media_kind(name).await?,
        None => None,
    };
    let listing = hub.media_listing().await?;
    Ok(StatusInfo {
        message: message.map(str::to_string),
        media_type,
        current_animation: current,
        available_animations: listing.animations,
        available_videos: listing.videos,
        available_media: listing.all,
    })
}

fn info_event(message: impl Into<String>) -> Event {
    Event::Info(InfoMessage {
        message: message.into(),
    })
}

fn error_event(message: impl Into<String>, available_media: Option<Vec<String>>) -> Event {
    Event::Error(ErrorInfo {
        message: message.into(),
        available_media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::hub::tests::hub_in;
    use crate::hub::SOURCE_API;
    use serde_json::json;

    fn shared_in(dir: &std::path::Path) -> Shared {
        let (hub, _, _) = hub_in(dir);
        Shared {
            hub,
            broadcaster: PubSubBroadcaster::new(ClientRegistry::new()),
            clock: Arc::new(SystemClock),
        }
    }

    fn tv_session() -> (Session, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            id: Uuid::new_v4(),
            rooms: [ROOM_ALL.to_string(), "tv".to_string()].into(),
            tx,
        };
        (session, rx)
    }

    fn reply(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        match rx.try_recv().unwrap() {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected {:?}", other),
        }
    }

    fn fanned_out(rx: &mut broadcast::Receiver<Arc<Outbound>>) -> (Option<String>, Value) {
        let outbound = rx.try_recv().unwrap();
        (outbound.room.clone(), serde_json::from_str(&outbound.text).unwrap())
    }

    #[tokio::test]
    async fn video_control_requires_a_playing_video() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_in(dir.path());
        let mut fanout = shared.broadcaster.subscribe();
        let (mut session, mut rx) = tv_session();

        handle_message(&shared, &mut session, r#"{"event":"video_control","data":{}}"#).await;
        assert_eq!(reply(&mut rx)["data"]["message"], "Missing action for video control");

        let pause = r#"{"event":"video_control","data":{"action":"pause"}}"#;
        handle_message(&shared, &mut session, pause).await;
        assert_eq!(reply(&mut rx)["data"]["message"], "Current media is not a video file");
        assert!(fanout.try_recv().is_err());

        shared.hub.set_current_media("clip.mp4", SOURCE_API).await.unwrap();
        handle_message(&shared, &mut session, pause).await;
        let (room, event) = fanned_out(&mut fanout);
        assert_eq!(room, None);
        assert_eq!(event["event"], "video_control");
        assert_eq!(event["data"]["action"], "pause");
        assert!(event["data"]["value"].is_null());
        assert_eq!(event["data"]["message"], "Video control: pause");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn seek_and_volume_are_relayed_as_video_control() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_in(dir.path());
        let mut fanout = shared.broadcaster.subscribe();
        let (mut session, mut rx) = tv_session();

        let seek = r#"{"event":"video_seek","data":{"time":12.5,"room":"stage"}}"#;
        handle_message(&shared, &mut session, seek).await;
        let (room, event) = fanned_out(&mut fanout);
        assert_eq!(room.as_deref(), Some("stage"));
        assert_eq!(event["data"]["action"], "seek");
        assert_eq!(event["data"]["value"], 12.5);
        assert_eq!(event["data"]["message"], "Video seek to 12.5s");

        for (data, value, message) in [
            (r#"{"volume":1.7}"#, 1.0, "Video volume set to 100%"),
            (r#"{"volume":"0.25"}"#, 0.25, "Video volume set to 25%"),
            (r#"{"volume":-3}"#, 0.0, "Video volume set to 0%"),
            ("{}", 0.5, "Video volume set to 50%"),
        ] {
            let text = format!(r#"{{"event":"video_volume","data":{}}}"#, data);
            handle_message(&shared, &mut session, &text).await;
            let (_, event) = fanned_out(&mut fanout);
            assert_eq!(event["data"]["action"], "volume");
            assert_eq!(event["data"]["value"], value);
            assert_eq!(event["data"]["message"], message);
        }

        handle_message(&shared, &mut session, r#"{"event":"video_volume","data":{"volume":"loud"}}"#)
            .await;
        assert_eq!(reply(&mut rx)["event"], "error");
        assert!(fanout.try_recv().is_err());
    }

    #[tokio::test]
    async fn streamerbot_events_trigger_media() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared_in(dir.path());
        let (mut session, mut rx) = tv_session();
        let send = |event_type: &str, data: Value| {
            json!({"event": "streamerbot_event", "data": {"event_type": event_type, "data": data}})
                .to_string()
        };

        let custom = send("custom_animation", json!({"animation": "anim3.html"}));
        handle_message(&shared, &mut session, &custom).await;
        assert_eq!(shared.hub.current_media().await.unwrap().as_deref(), Some("anim3.html"));

        let mapped = send(
            "scene_change",
            json!({"scene_name": "Intro", "animation_mapping": {"intro": "clip.mp4"}}),
        );
        handle_message(&shared, &mut session, &mapped).await;
        assert_eq!(shared.hub.current_media().await.unwrap().as_deref(), Some("clip.mp4"));

        let builtin = send("scene_change", json!({"scene_name": "Gaming"}));
        handle_message(&shared, &mut session, &builtin).await;
        assert_eq!(shared.hub.current_media().await.unwrap().as_deref(), Some("anim1.html"));
        assert!(rx.try_recv().is_err());

        let unmapped = send("scene_change", json!({"scene_name": "Gameplay"}));
        handle_message(&shared, &mut session, &unmapped).await;
        let info = reply(&mut rx);
        assert_eq!(info["event"], "info");
        assert_eq!(info["data"]["message"], "No animation mapping for scene 'Gameplay'");

        handle_message(&shared, &mut session, &send("follow", json!({}))).await;
        assert_eq!(reply(&mut rx)["data"]["message"], "Unhandled StreamerBot event: follow");
    }

    #[test]
    fn device_kind_detection() {
        assert_eq!(DeviceKind::detect("/", None, None), DeviceKind::Tv);
        assert_eq!(DeviceKind::detect("/admin", None, None), DeviceKind::Admin);
        assert_eq!(
            DeviceKind::detect("/ws", Some("v=2&type=admin"), None),
            DeviceKind::Admin
        );
        assert_eq!(
            DeviceKind::detect("/ws", Some("type=tv"), Some("http://host:8080/admin/media")),
            DeviceKind::Admin
        );
        assert_eq!(
            DeviceKind::detect("/ws", Some("type=administrator"), None),
            DeviceKind::Tv
        );
    }

    #[test]
    fn devices_info_counts_both_transports() {
        let broadcaster = PubSubBroadcaster::new(ClientRegistry::new());
        let devices = broadcaster.devices();
        let tv = Uuid::new_v4();
        let admin = Uuid::new_v4();
        devices.add(tv, DeviceKind::Tv, "TV browser", 1.0);
        devices.add(admin, DeviceKind::Tv, "Admin browser", 2.0);
        assert!(devices.set_kind(&admin, DeviceKind::Admin));

        let info = broadcaster.devices_info();
        assert_eq!(info.tv_count, 1);
        assert_eq!(info.tv_devices[0].user_agent, "TV browser");
        assert_eq!(info.admin_count, 1);
        assert_eq!(info.streamerbot_count, 0);
        assert_eq!(info.total_count, 2);

        assert_eq!(devices.remove(&admin), Some(DeviceKind::Admin));
        assert!(!devices.set_kind(&admin, DeviceKind::Tv));
    }

    #[tokio::test]
    async fn room_events_only_reach_members() {
        let broadcaster = PubSubBroadcaster::new(ClientRegistry::new());
        let mut rx = broadcaster.subscribe();
        let (tx, _keep) = mpsc::unbounded_channel();
        let session = Session {
            id: Uuid::new_v4(),
            rooms: [ROOM_ALL.to_string(), "tv".to_string()].into(),
            tx,
        };

        broadcaster.dispatch(Some("admin".to_string()), &error_event("admins only", None));
        broadcaster.emit(&error_event("everyone", None));

        let first = rx.recv().await.unwrap();
        assert!(!session.wants(&first));
        let second = rx.recv().await.unwrap();
        assert!(session.wants(&second));
        assert!(second.text.contains("everyone"));
    }
}
