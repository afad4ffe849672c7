//! scenesync server binary.
//!
//! # Usage
//!
//! ```bash
//! # Serve from the current directory on ports 8080 (pub/sub) and 8081 (raw)
//! scenesync
//!
//! # Different base directory and port
//! ATA_BASE_DIR=/srv/tv PORT=9000 scenesync --log-level debug
//! ```

use clap::Parser;
use scenesync::{
    BroadcastHub, ClientRegistry, Config, ConnectionSupervisor, DirectoryCatalog,
    FileTriggerPoller, ObsWebSocketConnector, PollerConfig, PollerHandle, PubSubBroadcaster,
    PubSubServer, RawProtocolServer, RawRequestHandler, SceneFilePoller, SceneMappingTable,
    StateStore, SystemClock, Transport,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Now-playing media sync server
#[derive(Parser, Debug)]
#[command(name = "scenesync")]
#[command(about = "Keeps display media in sync with OBS scenes, file triggers and WebSocket clients")]
#[command(version)]
struct Args {
    /// Directory holding animations/, videos/ and data/
    #[arg(long, env = "ATA_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// Pub/sub port; the raw protocol listens on PORT + 1
    #[arg(short, long, env = "PORT", default_value_t = scenesync::DEFAULT_PORT)]
    port: u16,

    /// Address to bind both servers to
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// File poll interval in milliseconds
    #[arg(long, default_value = "100")]
    poll_interval_ms: u64,

    /// Delay between noticing a file change and reading it, in milliseconds
    #[arg(long, default_value = "0")]
    debounce_ms: u64,

    /// Forget the recorded OBS scene before the scene poller starts
    #[arg(long)]
    reset_scene: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tungstenite=warn", args.log_level)));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = Config::new(&args.base_dir, args.host, args.port).with_poll(PollerConfig {
        interval: Duration::from_millis(args.poll_interval_ms),
        debounce: Duration::from_millis(args.debounce_ms),
    });

    tracing::info!("scenesync {} starting in {}", scenesync::SERVER_VERSION, config.base_dir.display());

    if let Err(e) = config.ensure_dirs().await {
        tracing::error!("Cannot create data directories: {}", e);
        return Err(e.into());
    }

    let clock = Arc::new(SystemClock);
    let store = StateStore::new(config.state_file(), config.scene_file(), config.default_media.clone());
    if let Err(e) = store.ensure_state_file().await {
        tracing::error!("Cannot initialize {}: {}", config.state_file().display(), e);
    }
    if args.reset_scene {
        if let Err(e) = store.clear_scene().await {
            tracing::warn!("Cannot clear recorded scene: {}", e);
        }
    }

    let raw_clients = ClientRegistry::new();
    let pubsub = PubSubBroadcaster::new(raw_clients.clone());
    let transports: Vec<Arc<dyn Transport>> =
        vec![Arc::new(pubsub.clone()), Arc::new(raw_clients.clone())];
    let hub = BroadcastHub::new(
        store.clone(),
        Arc::new(DirectoryCatalog::new(&config.animations_dir, &config.videos_dir)),
        transports,
        clock.clone(),
    );

    let pubsub_server =
        PubSubServer::bind(config.pubsub_addr, hub.clone(), pubsub.clone(), clock.clone()).await?;
    let raw_server = RawProtocolServer::bind(
        config.raw_addr,
        raw_clients,
        RawRequestHandler::new(hub.clone(), pubsub.devices().clone()),
    )
    .await?;
    let pubsub_task = tokio::spawn(pubsub_server.run());
    let raw_task = tokio::spawn(raw_server.run());

    let trigger_poller = PollerHandle::spawn(FileTriggerPoller::new(
        config.trigger_file(),
        hub.clone(),
        config.poll,
        clock.clone(),
    ));
    let scene_poller = PollerHandle::spawn(
        SceneFilePoller::new(
            config.scene_file(),
            SceneMappingTable::new(config.mappings_file()),
            hub.clone(),
            config.poll,
            clock.clone(),
        )
        .seed_from_disk()
        .await,
    );

    let supervisor = ConnectionSupervisor::new(
        Arc::new(ObsWebSocketConnector),
        config.settings_file(),
        store,
        Arc::new(pubsub),
        clock,
    );
    if tokio::fs::try_exists(config.settings_file()).await.unwrap_or(false) {
        supervisor.enable_persistent_connection().await;
    } else {
        tracing::info!("No OBS settings found, scene sync idle");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    trigger_poller.stop().await;
    scene_poller.stop().await;
    supervisor.shutdown().await;
    pubsub_task.abort();
    raw_task.abort();

    Ok(())
}
