//! obs-websocket v5 message structures.
//!
//! Every frame is `{"op": <opcode>, "d": {...}}`; the shape of `d` depends on
//! the opcode.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// RPC version this client speaks
pub const RPC_VERSION: u32 = 1;

/// `EventSubscription::Scenes`, which carries `CurrentProgramSceneChanged`
pub const EVENT_SUBSCRIPTION_SCENES: u32 = 1 << 2;

/// Opcodes used by this client
pub mod op {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

/// Raw frame before the payload is interpreted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

/// Op 0, sent by OBS right after the socket opens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    #[serde(default)]
    pub obs_web_socket_version: Option<String>,
    pub rpc_version: u32,
    #[serde(default)]
    pub authentication: Option<AuthChallenge>,
}

/// Salt and challenge used to derive the identify secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

/// Op 1, the client's reply to Hello
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    pub event_subscriptions: u32,
}

/// Op 2
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

/// Op 5
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub event_type: String,
    #[serde(default)]
    pub event_data: Option<Value>,
}

/// Op 6
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

/// Op 7
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

/// Result block of a request response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Decoded incoming frame
#[derive(Debug, Clone)]
pub enum Incoming {
    Hello(Hello),
    Identified(Identified),
    Event(EventMessage),
    RequestResponse(RequestResponse),
    /// Opcode this client does not handle
    Other(u8),
}

impl Incoming {
    /// Decode a text frame
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        let frame: Frame = serde_json::from_str(text)?;
        Ok(match frame.op {
            op::HELLO => Incoming::Hello(serde_json::from_value(frame.d)?),
            op::IDENTIFIED => Incoming::Identified(serde_json::from_value(frame.d)?),
            op::EVENT => Incoming::Event(serde_json::from_value(frame.d)?),
            op::REQUEST_RESPONSE => Incoming::RequestResponse(serde_json::from_value(frame.d)?),
            other => Incoming::Other(other),
        })
    }
}

impl Request {
    /// Create a new request with a fresh id
    pub fn new(request_type: impl Into<String>) -> Self {
        Self {
            request_type: request_type.into(),
            request_id: Uuid::new_v4().to_string(),
            request_data: None,
        }
    }

    /// Serialize as an op 6 frame
    pub fn to_frame(&self) -> serde_json::Result<String> {
        frame(op::REQUEST, self)
    }
}

impl Identify {
    /// Serialize as an op 1 frame
    pub fn to_frame(&self) -> serde_json::Result<String> {
        frame(op::IDENTIFY, self)
    }
}

impl RequestResponse {
    /// Check if OBS reported the request as failed
    pub fn has_error(&self) -> bool {
        !self.request_status.result
    }

    /// Response data, or an empty object
    pub fn data(&self) -> Value {
        self.response_data
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

fn frame<T: Serialize>(op: u8, d: &T) -> serde_json::Result<String> {
    serde_json::to_string(&serde_json::json!({ "op": op, "d": d }))
}
