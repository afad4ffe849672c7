use crate::connection::Connection;
use crate::error::{Result, SyncError};
use crate::protocol::Request;
use crate::subscription::{EventReceiver, ObsEvent};
use crate::types::ObsSettings;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Versions reported by `GetVersion`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObsVersion {
    pub obs_version: String,
    #[serde(rename = "obsWebSocketVersion")]
    pub websocket_version: String,
}

/// Opens sessions to an OBS instance
#[async_trait]
pub trait ObsConnector: Send + Sync + 'static {
    async fn connect(&self, settings: &ObsSettings) -> Result<Arc<dyn ObsSession>>;
}

/// One identified OBS session
#[async_trait]
pub trait ObsSession: Send + Sync + 'static {
    /// `GetVersion`, doubles as the liveness check
    async fn version(&self) -> Result<ObsVersion>;

    /// Current program scene, if OBS reports one
    async fn current_scene(&self) -> Result<Option<String>>;

    /// Names of every scene
    async fn scene_list(&self) -> Result<Vec<String>>;

    /// Subscribe to events pushed by OBS
    fn events(&self) -> broadcast::Receiver<ObsEvent>;

    async fn close(&self);
}

/// Connector speaking obs-websocket v5
#[derive(Debug, Clone, Default)]
pub struct ObsWebSocketConnector;

#[async_trait]
impl ObsConnector for ObsWebSocketConnector {
    async fn connect(&self, settings: &ObsSettings) -> Result<Arc<dyn ObsSession>> {
        let client = ObsClient::connect(settings).await?;
        Ok(Arc::new(client))
    }
}

/// Client for a single OBS instance
///
/// Wraps an identified [`Connection`] with the handful of requests used to
/// follow the program scene.
pub struct ObsClient {
    url: String,
    connection: Arc<Connection>,
}

impl ObsClient {
    /// Connect and identify using `settings`
    pub async fn connect(settings: &ObsSettings) -> Result<Self> {
        let url = settings.url();
        let connection = Connection::connect(&url, &settings.password).await?;

        Ok(Self {
            url,
            connection: Arc::new(connection),
        })
    }

    /// Get the URL this client is connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to events, skipping over lag
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.connection.subscribe())
    }

    async fn call(&self, request_type: &str) -> Result<serde_json::Value> {
        if self.connection.is_closed() {
            return Err(SyncError::ConnectionClosed);
        }
        let response = self.connection.send_request(Request::new(request_type)).await?;
        Ok(response.data())
    }
}

#[derive(Deserialize)]
struct CurrentScene {
    #[serde(rename = "currentProgramSceneName", default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct SceneList {
    #[serde(default)]
    scenes: Vec<SceneEntry>,
}

#[derive(Deserialize)]
struct SceneEntry {
    #[serde(rename = "sceneName")]
    scene_name: String,
}

#[async_trait]
impl ObsSession for ObsClient {
    async fn version(&self) -> Result<ObsVersion> {
        let data = self.call("GetVersion").await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn current_scene(&self) -> Result<Option<String>> {
        let data = self.call("GetCurrentProgramScene").await?;
        let scene: CurrentScene = serde_json::from_value(data)?;
        Ok(scene.name.filter(|name| !name.trim().is_empty()))
    }

    async fn scene_list(&self) -> Result<Vec<String>> {
        let data = self.call("GetSceneList").await?;
        let list: SceneList = serde_json::from_value(data)?;
        Ok(list.scenes.into_iter().map(|s| s.scene_name).collect())
    }

    fn events(&self) -> broadcast::Receiver<ObsEvent> {
        self.connection.subscribe()
    }

    async fn close(&self) {
        tracing::debug!("Closing OBS session to {}", self.url);
        self.connection.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_payload_decodes() {
        let version: ObsVersion = serde_json::from_value(json!({
            "obsVersion": "30.1.2",
            "obsWebSocketVersion": "5.4.2",
            "rpcVersion": 1,
            "availableRequests": []
        }))
        .unwrap();
        assert_eq!(version.obs_version, "30.1.2");
        assert_eq!(version.websocket_version, "5.4.2");
    }

    #[test]
    fn scene_list_payload_decodes() {
        let list: SceneList = serde_json::from_value(json!({
            "currentProgramSceneName": "Live",
            "scenes": [{"sceneName": "BRB", "sceneIndex": 1}, {"sceneName": "Live", "sceneIndex": 0}]
        }))
        .unwrap();
        let names: Vec<_> = list.scenes.into_iter().map(|s| s.scene_name).collect();
        assert_eq!(names, vec!["BRB", "Live"]);
    }
}
