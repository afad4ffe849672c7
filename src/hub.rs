//! The single place where the current media changes.
//!
//! File triggers, scene mappings, the raw protocol and pub/sub clients all
//! funnel through [`BroadcastHub`]. Each accepted change is written to
//! `state.json` first and only then emitted to every transport, so a client
//! that reloads after receiving the event always reads the new value.

use crate::catalog::MediaCatalog;
use crate::clock::Clock;
use crate::error::{Result, SyncError};
use crate::events::{AnimationChanged, AnimationStopped, Event, PageRefresh};
use crate::store::StateStore;
use crate::types::MediaKind;
use std::sync::Arc;

/// Source tag for HTTP/API callers
pub const SOURCE_API: &str = "api";
/// Source tag for the trigger file poller
pub const SOURCE_FILE_TRIGGER: &str = "file_trigger";
/// Source tag for scene-mapping matches
pub const SOURCE_SCENE: &str = "obs_scene";
/// Default source tag for raw protocol clients
pub const SOURCE_RAW: &str = "streamerbot_websocket";
/// Source tag for pub/sub clients
pub const SOURCE_PUBSUB: &str = "websocket";

/// A live-update delivery mechanism
///
/// Emission is fire-and-forget: implementations queue the event for their
/// clients and return without waiting for delivery.
pub trait Transport: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Queue `event` for every client of this transport
    fn emit(&self, event: &Event);
}

/// Request to change the current media
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub name: String,
    pub source: String,
    /// Ask displays to reload; `false` suppresses `page_refresh`
    pub refresh_page: bool,
    /// Passed through to clients when the caller specified it
    pub instant: Option<bool>,
}

impl MediaRequest {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            refresh_page: true,
            instant: None,
        }
    }

    pub fn refresh_page(mut self, refresh: bool) -> Self {
        self.refresh_page = refresh;
        self
    }

    pub fn instant(mut self, instant: bool) -> Self {
        self.instant = Some(instant);
        self
    }
}

/// Outcome of an accepted media change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChange {
    pub media: String,
    pub media_type: MediaKind,
    pub previous: Option<String>,
}

/// Media names grouped by kind, each list sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaListing {
    pub animations: Vec<String>,
    pub videos: Vec<String>,
    pub all: Vec<String>,
}

/// Choke-point for media changes
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    store: StateStore,
    catalog: Arc<dyn MediaCatalog>,
    transports: Vec<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    /// Held across persist + emit so events leave in persisted order
    change_lock: tokio::sync::Mutex<()>,
}

impl BroadcastHub {
    pub fn new(
        store: StateStore,
        catalog: Arc<dyn MediaCatalog>,
        transports: Vec<Arc<dyn Transport>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                catalog,
                transports,
                clock,
                change_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Kind of `name`, or `None` when the catalog does not know it
    pub async fn media_kind(&self, name: &str) -> Result<Option<MediaKind>> {
        let name = name.to_string();
        self.query_catalog(move |catalog| catalog.lookup(&name)).await
    }

    /// Every name the catalog offers
    pub async fn media_listing(&self) -> Result<MediaListing> {
        self.query_catalog(|catalog| MediaListing {
            animations: catalog.animations(),
            videos: catalog.videos(),
            all: catalog.all_media(),
        })
        .await
    }

    /// Run `f` on the blocking pool; directory catalogs scan the disk
    async fn query_catalog<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn MediaCatalog) -> T + Send + 'static,
        T: Send + 'static,
    {
        let catalog = self.inner.catalog.clone();
        tokio::task::spawn_blocking(move || f(catalog.as_ref()))
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))
    }

    /// Media currently playing
    pub async fn current_media(&self) -> Result<Option<String>> {
        self.inner.store.current_media().await
    }

    /// Switch every display to `name`
    ///
    /// Returns [`SyncError::MediaNotFound`] with the valid names when the
    /// catalog does not know `name`; nothing is written or emitted then.
    pub async fn set_current_media(&self, name: &str, source: &str) -> Result<MediaChange> {
        self.apply(MediaRequest::new(name, source)).await
    }

    /// Switch every display according to `request`
    pub async fn apply(&self, request: MediaRequest) -> Result<MediaChange> {
        let name = request.name.clone();
        let found = self
            .query_catalog(move |catalog| catalog.lookup(&name).ok_or_else(|| catalog.all_media()))
            .await?;
        let media_type = match found {
            Ok(kind) => kind,
            Err(available) => {
                tracing::debug!(
                    "[{}] Requested media '{}' not in catalog",
                    request.source,
                    request.name
                );
                return Err(SyncError::MediaNotFound {
                    name: request.name,
                    available,
                });
            }
        };

        let _guard = self.inner.change_lock.lock().await;

        let previous = match self.inner.store.set_media(Some(request.name.clone())).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::error!(
                    "CRITICAL: failed to persist media '{}' from {}: {}",
                    request.name,
                    request.source,
                    e
                );
                return Err(e);
            }
        };

        let message = format!(
            "Media changed to '{}' ({}) via {}",
            request.name, media_type, request.source
        );
        self.emit(&Event::AnimationChanged(AnimationChanged {
            previous_animation: previous.clone(),
            current_animation: request.name.clone(),
            media_type,
            message,
            refresh_page: request.refresh_page,
            instant: request.instant,
            source: request.source.clone(),
        }));

        if request.refresh_page {
            let reason = if request.source == SOURCE_FILE_TRIGGER {
                "file_trigger"
            } else {
                "media_changed"
            };
            self.emit(&Event::PageRefresh(PageRefresh {
                reason: reason.to_string(),
                new_media: request.name.clone(),
                media_type,
                source: request.source.clone(),
            }));
        }

        tracing::info!(
            "[{}] Broadcast media change: '{:?}' -> '{}' ({})",
            request.source.to_uppercase(),
            previous,
            request.name,
            media_type
        );

        Ok(MediaChange {
            media: request.name,
            media_type,
            previous,
        })
    }

    /// Clear the current media on every display
    pub async fn stop(&self) -> Result<Option<String>> {
        let _guard = self.inner.change_lock.lock().await;
        let previous = self.inner.store.set_media(None).await.map_err(|e| {
            tracing::error!("CRITICAL: failed to persist stop: {}", e);
            e
        })?;

        self.emit(&Event::AnimationStopped(AnimationStopped {
            message: "All animations stopped".to_string(),
            timestamp: self.inner.clock.unix_timestamp(),
        }));
        tracing::info!("All animations stopped (was {:?})", previous);
        Ok(previous)
    }

    fn emit(&self, event: &Event) {
        for transport in &self.inner.transports {
            tracing::debug!("Emitting '{}' on {}", event.name(), transport.name());
            transport.emit(event);
        }
    }
}
