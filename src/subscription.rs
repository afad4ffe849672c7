use crate::error::{Result, SyncError};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// v5 program scene event
pub const CURRENT_PROGRAM_SCENE_CHANGED: &str = "CurrentProgramSceneChanged";

/// v4 program scene event
pub const SWITCH_SCENES: &str = "SwitchScenes";

/// Event pushed by OBS, payload not yet interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct ObsEvent {
    pub event_type: String,
    pub data: Value,
}

impl ObsEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Program scene switch, normalized across protocol versions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneChange {
    pub scene_name: String,
}

/// Payload shapes OBS has used for a scene name
#[derive(Deserialize)]
#[serde(untagged)]
enum ScenePayload {
    Current {
        #[serde(rename = "sceneName")]
        scene_name: String,
    },
    Legacy {
        #[serde(rename = "scene-name")]
        scene_name: String,
    },
    Program {
        #[serde(rename = "currentProgramSceneName")]
        scene_name: String,
    },
    Named {
        name: String,
    },
}

impl ScenePayload {
    fn into_name(self) -> String {
        match self {
            ScenePayload::Current { scene_name }
            | ScenePayload::Legacy { scene_name }
            | ScenePayload::Program { scene_name } => scene_name,
            ScenePayload::Named { name } => name,
        }
    }
}

impl SceneChange {
    /// Interpret `event` as a scene switch
    ///
    /// `Ok(None)` for event types that are not scene switches,
    /// [`SyncError::MalformedEvent`] for scene switches without a usable
    /// scene name.
    pub fn decode(event: &ObsEvent) -> Result<Option<Self>> {
        if event.event_type != CURRENT_PROGRAM_SCENE_CHANGED && event.event_type != SWITCH_SCENES {
            return Ok(None);
        }

        let payload = ScenePayload::deserialize(&event.data).map_err(|_| {
            SyncError::MalformedEvent(format!(
                "{} without a scene name: {}",
                event.event_type, event.data
            ))
        })?;

        let scene_name = payload.into_name().trim().to_string();
        if scene_name.is_empty() {
            return Err(SyncError::MalformedEvent(format!(
                "{} with an empty scene name",
                event.event_type
            )));
        }
        Ok(Some(Self { scene_name }))
    }
}

/// Receiver for OBS events
pub struct EventReceiver {
    rx: broadcast::Receiver<ObsEvent>,
}

impl EventReceiver {
    /// Create a new event receiver
    pub(crate) fn new(rx: broadcast::Receiver<ObsEvent>) -> Self {
        Self { rx }
    }

    /// Receive the next event
    ///
    /// Returns `None` once the connection is gone. Events dropped because
    /// this receiver fell behind are logged and skipped.
    pub async fn recv(&mut self) -> Option<ObsEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("OBS event receiver lagged by {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
