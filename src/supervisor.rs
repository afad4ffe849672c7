//! Keeps the OBS connection alive while the user wants it.
//!
//! One [`ConnectionSupervisor`] owns the session, a reconnect task driven by
//! [`Backoff`] and a health monitor that checks the session every ten
//! seconds. Program scene switches pushed by OBS are written to the scene
//! file, where the scene poller picks them up, and announced to pub/sub
//! clients as `scene_changed`.

use crate::backoff::{Backoff, BackoffStep, MAX_ATTEMPTS};
use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::events::{Event, SceneChanged};
use crate::hub::Transport;
use crate::obs::{ObsConnector, ObsSession, ObsVersion};
use crate::store::{read_json, StateStore};
use crate::subscription::{EventReceiver, SceneChange};
use crate::types::{ConnectionState, ObsSettings};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Interval between health checks
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Connection state, retry counter and intent flags
///
/// Only ever touched behind the supervisor's state mutex, which is never
/// held across an `.await`.
#[derive(Debug)]
pub struct SupervisorState {
    connection: ConnectionState,
    backoff: Backoff,
    should_be_connected: bool,
    auto_reconnect_enabled: bool,
    monitor: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            backoff: Backoff::default(),
            should_be_connected: false,
            auto_reconnect_enabled: true,
            monitor: None,
            reconnect: None,
        }
    }
}

impl SupervisorState {
    pub fn mark_connecting(&mut self) {
        self.connection = ConnectionState::Connecting;
    }

    /// Connected; the retry counter starts over
    pub fn mark_connected(&mut self) {
        self.connection = ConnectionState::Connected;
        self.backoff.reset();
    }

    pub fn mark_disconnected(&mut self) {
        self.connection = ConnectionState::Disconnected;
    }

    pub fn schedule_reconnect(&mut self) {
        if self.connection != ConnectionState::Connected {
            self.connection = ConnectionState::ReconnectScheduled;
        }
    }

    fn monitor_running(&self) -> bool {
        is_running(&self.monitor)
    }

    fn reconnect_pending(&self) -> bool {
        is_running(&self.reconnect)
    }
}

fn is_running(handle: &Option<JoinHandle<()>>) -> bool {
    handle.as_ref().is_some_and(|h| !h.is_finished())
}

/// Result of [`ConnectionSupervisor::disconnect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectOutcome {
    /// Socket closed, reconnects still allowed
    Temporary,
    /// Socket closed and auto-reconnect turned off
    Permanent,
    /// Settings keep the integration enabled; nothing was done
    Refused,
}

/// Snapshot for status endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub should_be_connected: bool,
    pub auto_reconnect_enabled: bool,
    pub reconnect_attempt: u32,
    pub max_reconnect_attempts: u32,
    pub monitor_running: bool,
    pub reconnect_pending: bool,
}

/// Outcome of a one-shot connection test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub message: String,
}

struct ActiveSession {
    session: Arc<dyn ObsSession>,
    forwarder: JoinHandle<()>,
}

struct SupervisorInner {
    connector: Arc<dyn ObsConnector>,
    settings_path: PathBuf,
    store: StateStore,
    telemetry: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    state: Mutex<SupervisorState>,
    session: Mutex<Option<ActiveSession>>,
    /// Serializes connect attempts
    connect_lock: tokio::sync::Mutex<()>,
    transitions: broadcast::Sender<ConnectionState>,
}

/// Supervisor for the OBS connection
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ConnectionSupervisor {
    /// Create an idle supervisor
    ///
    /// `settings_path` points at `obs_settings.json`. Scene switches are
    /// recorded in `store` and announced through `telemetry`.
    pub fn new(
        connector: Arc<dyn ObsConnector>,
        settings_path: impl Into<PathBuf>,
        store: StateStore,
        telemetry: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (transitions, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(SupervisorInner {
                connector,
                settings_path: settings_path.into(),
                store,
                telemetry,
                clock,
                state: Mutex::new(SupervisorState::default()),
                session: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                transitions,
            }),
        }
    }

    /// Connect now and keep trying in the background on failure
    ///
    /// Records the intent to stay connected. Fails with
    /// [`SyncError::ConfigurationMissing`] when no settings are on disk, in
    /// which case no reconnect is scheduled.
    pub async fn connect(&self) -> Result<()> {
        self.inner.lock_state().should_be_connected = true;

        match try_connect(self.inner.clone()).await {
            Ok(()) => Ok(()),
            Err(SyncError::ConfigurationMissing) => Err(SyncError::ConfigurationMissing),
            Err(e) => {
                tracing::warn!("Failed to connect to OBS: {}", e);
                spawn_reconnect(&self.inner);
                Err(e)
            }
        }
    }

    /// Turn auto-reconnect on and connect if needed
    ///
    /// Returns whether a session is up when this call returns.
    pub async fn enable_persistent_connection(&self) -> bool {
        {
            let mut state = self.inner.lock_state();
            state.auto_reconnect_enabled = true;
            state.should_be_connected = true;
            if state.connection == ConnectionState::Connected {
                drop(state);
                start_monitor(&self.inner);
                return true;
            }
        }
        tracing::info!("Persistent OBS connection enabled");

        match self.connect().await {
            Ok(()) => true,
            Err(SyncError::ConfigurationMissing) => {
                tracing::info!("OBS settings not configured, integration idle");
                false
            }
            Err(_) => false,
        }
    }

    /// Close the session
    ///
    /// A temporary disconnect only drops the socket; the health monitor
    /// reconnects on its next tick. A permanent one also clears the intent
    /// flags, but is refused while the settings file keeps the integration
    /// enabled, unless `force` is set.
    pub async fn disconnect(&self, permanent: bool, force: bool) -> DisconnectOutcome {
        if permanent && !force {
            match read_json::<ObsSettings>(&self.inner.settings_path).await {
                Ok(Some(settings)) if settings.enabled => {
                    tracing::warn!("Refusing permanent disconnect: OBS integration is enabled in settings");
                    return DisconnectOutcome::Refused;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Refusing permanent disconnect, settings unreadable: {}", e);
                    return DisconnectOutcome::Refused;
                }
            }
        }

        if permanent {
            self.inner.stop_background_tasks();
        }
        self.inner.teardown().await;
        self.inner.transition(SupervisorState::mark_disconnected);

        if permanent {
            tracing::info!("OBS disconnected permanently");
            DisconnectOutcome::Permanent
        } else {
            tracing::info!("OBS disconnected temporarily");
            DisconnectOutcome::Temporary
        }
    }

    /// Stop every background task and close the session
    pub async fn shutdown(&self) {
        self.inner.stop_background_tasks();
        self.inner.teardown().await;
        self.inner.transition(SupervisorState::mark_disconnected);
    }

    pub fn status(&self) -> SupervisorStatus {
        let state = self.inner.lock_state();
        SupervisorStatus {
            state: state.connection,
            connected: state.connection == ConnectionState::Connected,
            should_be_connected: state.should_be_connected,
            auto_reconnect_enabled: state.auto_reconnect_enabled,
            reconnect_attempt: state.backoff.attempt(),
            max_reconnect_attempts: MAX_ATTEMPTS,
            monitor_running: state.monitor_running(),
            reconnect_pending: state.reconnect_pending(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock_state().connection
    }

    /// Subscribe to connection state transitions
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.transitions.subscribe()
    }

    /// Connect once with the stored settings, report, and hang up
    ///
    /// Leaves the supervised session alone.
    pub async fn test_connection(&self) -> ConnectionTest {
        let settings = match self.inner.load_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                return ConnectionTest {
                    success: false,
                    message: e.to_string(),
                }
            }
        };

        let started = Instant::now();
        let outcome: Result<ObsVersion> = async {
            let session = self.inner.connector.connect(&settings).await?;
            let version = session.version().await;
            session.close().await;
            version
        }
        .await;

        match outcome {
            Ok(version) => ConnectionTest {
                success: true,
                message: format!(
                    "Connected to OBS {} (obs-websocket {}) in {} ms",
                    version.obs_version,
                    version.websocket_version,
                    started.elapsed().as_millis()
                ),
            },
            Err(e) => ConnectionTest {
                success: false,
                message: format!("Connection to {} failed: {}", settings.url(), e),
            },
        }
    }

    /// Current program scene
    ///
    /// Asks OBS when connected, otherwise falls back to the last recorded
    /// scene.
    pub async fn current_scene(&self) -> Result<Option<String>> {
        if let Some(session) = self.inner.session() {
            return session.current_scene().await;
        }
        Ok(self
            .inner
            .store
            .scene_state()
            .await?
            .and_then(|state| state.current_scene))
    }

    /// Every scene OBS knows about
    pub async fn scene_list(&self) -> Result<Vec<String>> {
        match self.inner.session() {
            Some(session) => session.scene_list().await,
            None => Err(SyncError::ConnectionClosed),
        }
    }
}

impl SupervisorInner {
    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` and publish the new state if it changed
    fn transition(&self, f: impl FnOnce(&mut SupervisorState)) {
        let (before, after) = {
            let mut state = self.lock_state();
            let before = state.connection;
            f(&mut state);
            (before, state.connection)
        };
        if before != after {
            tracing::debug!("OBS connection {} -> {}", before, after);
            let _ = self.transitions.send(after);
        }
    }

    fn session(&self) -> Option<Arc<dyn ObsSession>> {
        self.lock_session().as_ref().map(|active| active.session.clone())
    }

    async fn load_settings(&self) -> Result<ObsSettings> {
        match read_json::<ObsSettings>(&self.settings_path).await {
            Ok(Some(settings)) => Ok(settings),
            Ok(None) => Err(SyncError::ConfigurationMissing),
            Err(e) => {
                tracing::warn!("Could not read OBS settings: {}", e);
                Err(SyncError::ConfigurationMissing)
            }
        }
    }

    async fn teardown(&self) {
        let active = self.lock_session().take();
        if let Some(active) = active {
            active.forwarder.abort();
            active.session.close().await;
        }
    }

    fn stop_background_tasks(&self) {
        let mut state = self.lock_state();
        state.should_be_connected = false;
        state.auto_reconnect_enabled = false;
        for handle in [state.monitor.take(), state.reconnect.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    async fn record_scene(&self, change: SceneChange) {
        tracing::info!("OBS scene changed to '{}'", change.scene_name);
        if let Err(e) = self.store.update_scene(&change.scene_name).await {
            tracing::error!("Failed to record OBS scene '{}': {}", change.scene_name, e);
        }
        self.telemetry.emit(&Event::SceneChanged(SceneChanged {
            scene_name: change.scene_name,
            timestamp: self.clock.unix_timestamp(),
        }));
    }
}

/// One connect attempt, serialized with every other attempt
///
/// Boxed so the monitor task it may spawn can call back into it.
fn try_connect(inner: Arc<SupervisorInner>) -> BoxFuture<'static, Result<()>> {
    async move {
        let _guard = inner.connect_lock.lock().await;
        if inner.lock_state().connection == ConnectionState::Connected {
            return Ok(());
        }

        let settings = inner.load_settings().await?;
        inner.transition(SupervisorState::mark_connecting);
        tracing::info!("Connecting to OBS at {}", settings.url());

        let (session, version) = match open_session(&inner, &settings).await {
            Ok(opened) => opened,
            Err(e) => {
                inner.transition(SupervisorState::mark_disconnected);
                return Err(e);
            }
        };
        tracing::info!(
            "Connected to OBS {} (obs-websocket {})",
            version.obs_version,
            version.websocket_version
        );

        let events = EventReceiver::new(session.events());
        let forwarder = tokio::spawn(forward_events(inner.clone(), events));
        let previous = inner.lock_session().replace(ActiveSession {
            session: session.clone(),
            forwarder,
        });
        if let Some(stale) = previous {
            stale.forwarder.abort();
            stale.session.close().await;
        }

        inner.transition(SupervisorState::mark_connected);
        if inner.lock_state().auto_reconnect_enabled {
            start_monitor(&inner);
        }

        match session.current_scene().await {
            Ok(Some(scene)) => {
                if let Err(e) = inner.store.update_scene(&scene).await {
                    tracing::error!("Failed to record initial OBS scene: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not read current OBS scene: {}", e),
        }
        Ok(())
    }
    .boxed()
}

async fn open_session(
    inner: &SupervisorInner,
    settings: &ObsSettings,
) -> Result<(Arc<dyn ObsSession>, ObsVersion)> {
    let session = inner.connector.connect(settings).await?;
    match session.version().await {
        Ok(version) => Ok((session, version)),
        Err(e) => {
            session.close().await;
            Err(e)
        }
    }
}

async fn forward_events(inner: Arc<SupervisorInner>, mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        match SceneChange::decode(&event) {
            Ok(Some(change)) => inner.record_scene(change).await,
            Ok(None) => tracing::trace!("Ignoring OBS event {}", event.event_type),
            Err(e) => tracing::warn!("Dropping OBS event: {}", e),
        }
    }
    tracing::debug!("OBS event stream ended");
}

fn spawn_reconnect(inner: &Arc<SupervisorInner>) {
    let mut state = inner.lock_state();
    if state.reconnect_pending() || !state.should_be_connected {
        return;
    }
    state.reconnect = Some(tokio::spawn(reconnect_loop(inner.clone())));
}

async fn reconnect_loop(inner: Arc<SupervisorInner>) {
    loop {
        let step = {
            let mut state = inner.lock_state();
            if !state.should_be_connected || state.connection == ConnectionState::Connected {
                break;
            }
            state.backoff.next_step()
        };

        match step {
            BackoffStep::Retry { attempt, delay } => {
                inner.transition(SupervisorState::schedule_reconnect);
                tracing::info!(
                    "Reconnecting to OBS in {}s (attempt {}/{})",
                    delay.as_secs(),
                    attempt,
                    MAX_ATTEMPTS
                );
                inner.clock.sleep(delay).await;

                {
                    let state = inner.lock_state();
                    if !state.should_be_connected || state.connection == ConnectionState::Connected {
                        break;
                    }
                }

                match try_connect(inner.clone()).await {
                    Ok(()) => break,
                    Err(SyncError::ConfigurationMissing) => {
                        tracing::warn!("OBS settings disappeared, giving up reconnect");
                        inner.transition(SupervisorState::mark_disconnected);
                        break;
                    }
                    Err(e) if e.is_connection_error() => {
                        tracing::warn!("Reconnect attempt {} failed: {}", attempt, e);
                    }
                    Err(e) => {
                        tracing::error!("Reconnect attempt {} failed unexpectedly: {}", attempt, e);
                    }
                }
            }
            BackoffStep::Cooldown(cooldown) => {
                tracing::warn!(
                    "{} reconnect attempts failed, waiting {}s before trying again",
                    MAX_ATTEMPTS,
                    cooldown.as_secs()
                );
                inner.clock.sleep(cooldown).await;
            }
        }
    }
    tracing::debug!("OBS reconnect task finished");
}

fn start_monitor(inner: &Arc<SupervisorInner>) {
    let mut state = inner.lock_state();
    if state.monitor_running() {
        return;
    }
    state.monitor = Some(tokio::spawn(monitor_loop(inner.clone())));
}

async fn monitor_loop(inner: Arc<SupervisorInner>) {
    tracing::info!("OBS health monitor started");
    loop {
        inner.clock.sleep(HEALTH_INTERVAL).await;

        let (enabled, connection, should_connect, reconnect_pending) = {
            let state = inner.lock_state();
            (
                state.auto_reconnect_enabled,
                state.connection,
                state.should_be_connected,
                state.reconnect_pending(),
            )
        };
        if !enabled {
            break;
        }

        match connection {
            ConnectionState::Connected => {
                let Some(session) = inner.session() else {
                    inner.transition(SupervisorState::mark_disconnected);
                    continue;
                };
                if let Err(e) = session.version().await {
                    tracing::warn!("OBS health check failed: {}", e);
                    inner.teardown().await;
                    inner.transition(SupervisorState::mark_disconnected);
                    if let Err(e) = try_connect(inner.clone()).await {
                        tracing::warn!("Reconnect after failed health check: {}", e);
                    }
                }
            }
            ConnectionState::Connecting => {}
            ConnectionState::Disconnected | ConnectionState::ReconnectScheduled => {
                // the reconnect task owns retries while it runs
                if should_connect && !reconnect_pending {
                    if let Err(e) = try_connect(inner.clone()).await {
                        tracing::debug!("Health monitor reconnect failed: {}", e);
                    }
                }
            }
        }
    }
    tracing::info!("OBS health monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::tests::RecordingTransport;
    use crate::store::write_json_atomic;
    use crate::subscription::ObsEvent;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSession {
        events: broadcast::Sender<ObsEvent>,
        alive: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ObsSession for FakeSession {
        async fn version(&self) -> Result<ObsVersion> {
            if self.alive.load(Ordering::SeqCst) {
                Ok(ObsVersion {
                    obs_version: "30.0.0".to_string(),
                    websocket_version: "5.3.0".to_string(),
                })
            } else {
                Err(SyncError::ConnectionClosed)
            }
        }

        async fn current_scene(&self) -> Result<Option<String>> {
            Ok(Some("Starting".to_string()))
        }

        async fn scene_list(&self) -> Result<Vec<String>> {
            Ok(vec!["Starting".to_string(), "BRB".to_string()])
        }

        fn events(&self) -> broadcast::Receiver<ObsEvent> {
            self.events.subscribe()
        }

        async fn close(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        sessions: Mutex<Vec<Arc<FakeSession>>>,
        attempts: AtomicUsize,
        refuse: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ObsConnector for FakeConnector {
        async fn connect(&self, _settings: &ObsSettings) -> Result<Arc<dyn ObsSession>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(SyncError::ConnectionFailure("connection refused".to_string()));
            }
            let (events, _) = broadcast::channel(16);
            let session = Arc::new(FakeSession {
                events,
                alive: std::sync::atomic::AtomicBool::new(true),
            });
            self.sessions.lock().unwrap().push(session.clone());
            Ok(session)
        }
    }

    /// Clock whose sleeps never finish, so background loops stay parked
    struct ParkedClock;

    impl Clock for ParkedClock {
        fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
            futures_util::future::pending().boxed()
        }

        fn unix_timestamp(&self) -> f64 {
            1_700_000_000.0
        }
    }

    /// Clock whose health ticks fire one at a time on [`TickClock::tick`]
    ///
    /// Backoff sleeps never finish, so only the monitor makes progress.
    struct TickClock {
        ticks: Arc<tokio::sync::Semaphore>,
    }

    impl TickClock {
        fn new() -> Self {
            Self {
                ticks: Arc::new(tokio::sync::Semaphore::new(0)),
            }
        }

        fn tick(&self) {
            self.ticks.add_permits(1);
        }
    }

    impl Clock for TickClock {
        fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
            if duration != HEALTH_INTERVAL {
                return futures_util::future::pending().boxed();
            }
            let ticks = self.ticks.clone();
            async move {
                if let Ok(permit) = ticks.acquire_owned().await {
                    permit.forget();
                }
            }
            .boxed()
        }

        fn unix_timestamp(&self) -> f64 {
            1_700_000_000.0
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition reached in time");
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        settings: PathBuf,
        store: StateStore,
        telemetry: Arc<RecordingTransport>,
        connector: Arc<FakeConnector>,
        supervisor: ConnectionSupervisor,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(ParkedClock))
    }

    fn fixture_with(clock: Arc<dyn Clock>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("obs_settings.json");
        let store = StateStore::new(
            dir.path().join("state.json"),
            dir.path().join("obs_current_scene.json"),
            None,
        );
        let telemetry = Arc::new(RecordingTransport::default());
        let connector = Arc::new(FakeConnector::default());
        let supervisor = ConnectionSupervisor::new(
            connector.clone(),
            settings.clone(),
            store.clone(),
            telemetry.clone(),
            clock,
        );
        Fixture {
            _dir: dir,
            settings,
            store,
            telemetry,
            connector,
            supervisor,
        }
    }

    async fn write_settings(path: &std::path::Path, enabled: bool) {
        write_json_atomic(path, &json!({"host": "localhost", "port": 4455, "enabled": enabled}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn connect_without_settings_stays_idle() {
        let f = fixture();
        let err = f.supervisor.connect().await.unwrap_err();
        assert!(matches!(err, SyncError::ConfigurationMissing));
        let status = f.supervisor.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(!status.reconnect_pending);
        assert_eq!(f.connector.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_records_initial_scene_and_starts_monitor() {
        let f = fixture();
        write_settings(&f.settings, true).await;

        f.supervisor.connect().await.unwrap();
        let status = f.supervisor.status();
        assert!(status.connected);
        assert!(status.monitor_running);
        assert_eq!(status.reconnect_attempt, 0);

        let scene = f.store.scene_state().await.unwrap().unwrap();
        assert_eq!(scene.current_scene.as_deref(), Some("Starting"));
        assert_eq!(f.supervisor.scene_list().await.unwrap().len(), 2);

        f.supervisor.shutdown().await;
        assert!(!f.supervisor.status().monitor_running);
    }

    #[tokio::test]
    async fn scene_events_reach_store_and_telemetry() {
        let f = fixture();
        write_settings(&f.settings, true).await;
        f.supervisor.connect().await.unwrap();

        let session = f.connector.sessions.lock().unwrap()[0].clone();
        session
            .events
            .send(ObsEvent::new("CurrentProgramSceneChanged", json!({"sceneName": "BRB"})))
            .unwrap();
        session
            .events
            .send(ObsEvent::new("CurrentProgramSceneChanged", json!({"sceneUuid": "x"})))
            .unwrap();

        for _ in 0..100 {
            if !f.telemetry.events().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let events = f.telemetry.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::SceneChanged(e) => assert_eq!(e.scene_name, "BRB"),
            other => panic!("unexpected {:?}", other),
        }
        let scene = f.store.scene_state().await.unwrap().unwrap();
        assert_eq!(scene.current_scene.as_deref(), Some("BRB"));
        f.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn permanent_disconnect_respects_enabled_flag() {
        let f = fixture();
        write_settings(&f.settings, true).await;
        f.supervisor.connect().await.unwrap();

        assert_eq!(
            f.supervisor.disconnect(true, false).await,
            DisconnectOutcome::Refused
        );
        assert!(f.supervisor.status().connected);

        assert_eq!(
            f.supervisor.disconnect(true, true).await,
            DisconnectOutcome::Permanent
        );
        let status = f.supervisor.status();
        assert!(!status.connected);
        assert!(!status.should_be_connected);
        assert!(!status.auto_reconnect_enabled);
    }

    #[tokio::test]
    async fn permanent_disconnect_allowed_when_disabled() {
        let f = fixture();
        write_settings(&f.settings, false).await;
        f.supervisor.connect().await.unwrap();

        assert_eq!(
            f.supervisor.disconnect(true, false).await,
            DisconnectOutcome::Permanent
        );
        assert!(!f.supervisor.status().connected);
    }

    #[tokio::test]
    async fn temporary_disconnect_keeps_intent() {
        let f = fixture();
        write_settings(&f.settings, true).await;
        f.supervisor.connect().await.unwrap();

        assert_eq!(
            f.supervisor.disconnect(false, false).await,
            DisconnectOutcome::Temporary
        );
        let status = f.supervisor.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.should_be_connected);
        f.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_leaves_supervised_session_alone() {
        let f = fixture();
        write_settings(&f.settings, true).await;

        let result = f.supervisor.test_connection().await;
        assert!(result.success, "{}", result.message);
        assert!(result.message.contains("30.0.0"));
        assert_eq!(f.supervisor.connection_state(), ConnectionState::Disconnected);

        std::fs::remove_file(&f.settings).unwrap();
        assert!(!f.supervisor.test_connection().await.success);
    }

    #[tokio::test]
    async fn failed_health_check_reconnects_on_the_same_tick() {
        let clock = Arc::new(TickClock::new());
        let f = fixture_with(clock.clone());
        write_settings(&f.settings, true).await;
        f.supervisor.connect().await.unwrap();
        let mut transitions = f.supervisor.subscribe_transitions();

        let first = f.connector.sessions.lock().unwrap()[0].clone();
        first.alive.store(false, Ordering::SeqCst);
        clock.tick();
        wait_until(|| {
            f.connector.attempts.load(Ordering::SeqCst) == 2 && f.supervisor.status().connected
        })
        .await;

        let mut seen = Vec::new();
        while let Ok(state) = transitions.try_recv() {
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected
            ]
        );
        let status = f.supervisor.status();
        assert!(!status.reconnect_pending);
        assert!(status.monitor_running);
        f.supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn monitor_retries_once_per_tick_while_disconnected() {
        let clock = Arc::new(TickClock::new());
        let f = fixture_with(clock.clone());
        write_settings(&f.settings, true).await;
        f.supervisor.connect().await.unwrap();
        assert_eq!(
            f.supervisor.disconnect(false, false).await,
            DisconnectOutcome::Temporary
        );
        f.connector.refuse.store(true, Ordering::SeqCst);

        for expected in [2, 3] {
            clock.tick();
            wait_until(|| {
                f.connector.attempts.load(Ordering::SeqCst) == expected
                    && f.supervisor.connection_state() == ConnectionState::Disconnected
            })
            .await;
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            assert_eq!(f.connector.attempts.load(Ordering::SeqCst), expected);
            assert!(!f.supervisor.status().reconnect_pending);
        }

        f.connector.refuse.store(false, Ordering::SeqCst);
        clock.tick();
        wait_until(|| f.supervisor.status().connected).await;
        assert_eq!(f.connector.attempts.load(Ordering::SeqCst), 4);
        f.supervisor.shutdown().await;
    }

    #[test]
    fn state_transitions() {
        let mut state = SupervisorState::default();
        state.backoff.next_step();
        state.mark_connecting();
        state.mark_disconnected();
        state.schedule_reconnect();
        assert_eq!(state.connection, ConnectionState::ReconnectScheduled);
        state.mark_connected();
        assert_eq!(state.backoff.attempt(), 0);
        state.schedule_reconnect();
        assert_eq!(state.connection, ConnectionState::Connected);
    }
}
