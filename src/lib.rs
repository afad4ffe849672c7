//! Keeps a shared "now playing" media pointer in sync for a set of displays
//!
//! Browser displays show one animation or video at a time. This library owns
//! the pointer to that media and changes it on request from several sources:
//!
//! - OBS program scene switches, through a user-maintained scene mapping
//! - A trigger file dropped by external tools
//! - A raw JSON WebSocket protocol for automation tools
//! - Browser clients on the room-based pub/sub WebSocket
//!
//! Every change is persisted before it is announced, and every transport sees
//! the same sequence of events.
//!
//! # Quick Start
//!
//! ```no_run
//! use scenesync::{
//!     BroadcastHub, ClientRegistry, DirectoryCatalog, PubSubBroadcaster, StateStore,
//!     SystemClock, Transport, SOURCE_API,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let raw_clients = ClientRegistry::new();
//!     let pubsub = PubSubBroadcaster::new(raw_clients.clone());
//!     let store = StateStore::new(
//!         "data/state.json",
//!         "data/config/obs_current_scene.json",
//!         Some("anim1.html".to_string()),
//!     );
//!     let transports: Vec<Arc<dyn Transport>> = vec![Arc::new(pubsub), Arc::new(raw_clients)];
//!     let hub = BroadcastHub::new(
//!         store,
//!         Arc::new(DirectoryCatalog::new("animations", "videos")),
//!         transports,
//!         Arc::new(SystemClock),
//!     );
//!
//!     let change = hub.set_current_media("anim3.html", SOURCE_API).await?;
//!     println!("{:?} -> {}", change.previous, change.media);
//!     Ok(())
//! }
//! ```
//!
//! # Following OBS
//!
//! ```no_run
//! use scenesync::{
//!     ClientRegistry, ConnectionSupervisor, ObsWebSocketConnector, PubSubBroadcaster,
//!     StateStore, SystemClock,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = StateStore::new("data/state.json", "data/config/obs_current_scene.json", None);
//!     let pubsub = PubSubBroadcaster::new(ClientRegistry::new());
//!     let supervisor = ConnectionSupervisor::new(
//!         Arc::new(ObsWebSocketConnector),
//!         "data/config/obs_settings.json",
//!         store,
//!         Arc::new(pubsub),
//!         Arc::new(SystemClock),
//!     );
//!
//!     supervisor.enable_persistent_connection().await;
//!     let mut transitions = supervisor.subscribe_transitions();
//!     while let Ok(state) = transitions.recv().await {
//!         println!("OBS connection: {}", state);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Hub**: the only place the current media changes
//! - **Store**: atomic JSON persistence of media and scene state
//! - **Pollers**: trigger file and scene file watchers
//! - **Supervisor**: OBS connection lifecycle, backoff and health checks
//! - **Connection/Protocol**: obs-websocket v5 framing and handshake
//! - **Pub/sub and raw servers**: the two live transports

mod backoff;
mod catalog;
mod clock;
mod config;
mod connection;
mod error;
mod events;
mod hub;
mod mapping;
mod obs;
mod poller;
mod protocol;
mod pubsub;
mod raw_server;
mod store;
mod subscription;
mod supervisor;
mod types;

// Public exports
pub use backoff::{Backoff, BackoffStep};
pub use catalog::{is_video_file, DirectoryCatalog, MediaCatalog};
pub use clock::{Clock, SystemClock};
pub use config::{Config, DEFAULT_MEDIA, DEFAULT_PORT};
pub use connection::auth_secret;
pub use error::{Result, SyncError};
pub use events::{
    AnimationChanged, AnimationStopped, DeviceInfo, DevicesInfo, ErrorInfo, Event, InfoMessage,
    PageRefresh, RawClientInfo, SceneChanged, StatusInfo, VideoControl,
};
pub use hub::{
    BroadcastHub, MediaChange, MediaListing, MediaRequest, Transport, SOURCE_API,
    SOURCE_FILE_TRIGGER, SOURCE_PUBSUB, SOURCE_RAW, SOURCE_SCENE,
};
pub use mapping::{resolve, SceneMappingTable};
pub use obs::{ObsClient, ObsConnector, ObsSession, ObsVersion, ObsWebSocketConnector};
pub use poller::{
    ChangeSourcePoller, FileTriggerPoller, PollerConfig, PollerHandle, SceneFilePoller,
};
pub use pubsub::{DeviceKind, DeviceRegistry, PubSubBroadcaster, PubSubServer};
pub use raw_server::{ClientRegistry, RawProtocolServer, RawRequestHandler, SERVER_VERSION};
pub use store::StateStore;
pub use subscription::{EventReceiver, ObsEvent, SceneChange};
pub use supervisor::{
    ConnectionSupervisor, ConnectionTest, DisconnectOutcome, SupervisorStatus, HEALTH_INTERVAL,
};
pub use types::{
    ClientId, ConnectionState, MediaKind, MediaState, ObsSettings, SceneMapping, SceneName,
    SceneState,
};
