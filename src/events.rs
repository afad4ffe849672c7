//! Events pushed to live clients.
//!
//! Every event is serialized as `{"event": "<name>", "data": {...}}` on both
//! transports.

use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event delivered to transport clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    AnimationChanged(AnimationChanged),
    PageRefresh(PageRefresh),
    SceneChanged(SceneChanged),
    AnimationStopped(AnimationStopped),
    DevicesUpdated(DevicesInfo),
    VideoControl(VideoControl),
    Status(StatusInfo),
    Info(InfoMessage),
    Error(ErrorInfo),
}

impl Event {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Event::AnimationChanged(_) => "animation_changed",
            Event::PageRefresh(_) => "page_refresh",
            Event::SceneChanged(_) => "scene_changed",
            Event::AnimationStopped(_) => "animation_stopped",
            Event::DevicesUpdated(_) => "devices_updated",
            Event::VideoControl(_) => "video_control",
            Event::Status(_) => "status",
            Event::Info(_) => "info",
            Event::Error(_) => "error",
        }
    }

    /// Serialize to the wire format
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// The current media changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationChanged {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous_animation: Option<String>,
    pub current_animation: String,
    pub media_type: MediaKind,
    pub message: String,
    pub refresh_page: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub instant: Option<bool>,
    pub source: String,
}

/// Displays should reload their page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRefresh {
    pub reason: String,
    pub new_media: String,
    pub media_type: MediaKind,
    pub source: String,
}

/// OBS switched program scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneChanged {
    pub scene_name: String,
    pub timestamp: f64,
}

/// Playback was cleared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationStopped {
    pub message: String,
    pub timestamp: f64,
}

/// Playback command relayed to video displays
///
/// `value` is passed through untouched: a seek position in seconds, a
/// volume in `0.0..=1.0`, or whatever the sender attached to a custom
/// action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoControl {
    pub action: String,
    #[serde(default)]
    pub value: Value,
    pub message: String,
}

/// One connected pub/sub client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub user_agent: String,
    pub connected_at: f64,
}

/// One connected raw protocol client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawClientInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub remote_address: String,
    pub connected: bool,
}

/// Summary of every connected client across both transports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicesInfo {
    pub tv_devices: Vec<DeviceInfo>,
    pub tv_count: usize,
    pub admin_count: usize,
    pub streamerbot_devices: Vec<RawClientInfo>,
    pub streamerbot_count: usize,
    pub total_count: usize,
}

/// Status snapshot sent to a single pub/sub client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    pub current_animation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_type: Option<MediaKind>,
    pub available_animations: Vec<String>,
    #[serde(default)]
    pub available_videos: Vec<String>,
    #[serde(default)]
    pub available_media: Vec<String>,
}

/// Informational reply sent to a single pub/sub client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoMessage {
    pub message: String,
}

/// Error reply sent to a single pub/sub client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub available_media: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_name_and_data_envelope() {
        let event = Event::SceneChanged(SceneChanged {
            scene_name: "BRB".to_string(),
            timestamp: 12.5,
        });
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "scene_changed");
        assert_eq!(value["data"]["scene_name"], "BRB");
        assert_eq!(event.name(), "scene_changed");
    }

    #[test]
    fn animation_changed_omits_absent_previous() {
        let event = Event::AnimationChanged(AnimationChanged {
            previous_animation: None,
            current_animation: "anim3.html".to_string(),
            media_type: MediaKind::Animation,
            message: "Media changed".to_string(),
            refresh_page: true,
            instant: None,
            source: "api".to_string(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert!(value["data"].get("previous_animation").is_none());
        assert_eq!(value["data"]["media_type"], "animation");
    }

    #[test]
    fn video_control_keeps_null_value() {
        let event = Event::VideoControl(VideoControl {
            action: "pause".to_string(),
            value: Value::Null,
            message: "Video control: pause".to_string(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "video_control");
        assert!(value["data"]["value"].is_null());
        assert!(value["data"].as_object().unwrap().contains_key("value"));
    }
}
