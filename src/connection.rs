use crate::error::{Result, SyncError};
use crate::protocol::{
    Hello, Identify, Incoming, Request, RequestResponse, EVENT_SUBSCRIPTION_SCENES, RPC_VERSION,
};
use crate::subscription::ObsEvent;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connection state
struct ConnectionState {
    /// Pending requests waiting for responses, keyed by request id
    pending_requests: HashMap<String, oneshot::Sender<RequestResponse>>,
    /// Channel for sending outgoing messages
    ws_tx: mpsc::UnboundedSender<Message>,
}

/// Identified obs-websocket v5 connection
pub struct Connection {
    state: Arc<Mutex<ConnectionState>>,
    /// Event fan-out, outside the mutex so subscribing never blocks
    event_tx: broadcast::Sender<ObsEvent>,
    closed: Arc<AtomicBool>,
}

/// Secret sent in Identify when OBS asks for authentication
///
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn auth_secret(password: &str, salt: &str, challenge: &str) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{}{}", password, salt).as_bytes()));
    BASE64.encode(Sha256::digest(format!("{}{}", secret, challenge).as_bytes()))
}

impl Connection {
    /// Connect to `url` and complete the Hello/Identify handshake
    pub async fn connect(url: &str, password: &str) -> Result<Self> {
        tracing::info!("Connecting to OBS at {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| SyncError::ConnectionFailure(format!("{}: {}", url, e)))?;
        let (mut write, mut read) = ws_stream.split();

        timeout(HANDSHAKE_TIMEOUT, Self::handshake(&mut write, &mut read, password))
            .await
            .map_err(|_| SyncError::Timeout)??;

        let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, _) = broadcast::channel(100);
        let closed = Arc::new(AtomicBool::new(false));

        let state = Arc::new(Mutex::new(ConnectionState {
            pending_requests: HashMap::new(),
            ws_tx,
        }));

        // Forward outgoing messages to the socket
        let write_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::debug!("Failed to send message to OBS: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
        });

        let state_clone = state.clone();
        let event_tx_clone = event_tx.clone();
        let closed_clone = closed.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        Self::handle_message(&state_clone, &event_tx_clone, &text).await;
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!("OBS closed the connection: {:?}", frame);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("OBS WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Dropping the senders fails every waiting request
            closed_clone.store(true, Ordering::SeqCst);
            state_clone.lock().await.pending_requests.clear();
            write_handle.abort();
        });

        Ok(Self {
            state,
            event_tx,
            closed,
        })
    }

    async fn handshake(
        write: &mut SplitSink<WsStream, Message>,
        read: &mut SplitStream<WsStream>,
        password: &str,
    ) -> Result<()> {
        let hello = loop {
            match Self::next_frame(read).await? {
                Incoming::Hello(hello) => break hello,
                other => tracing::debug!("Ignoring {:?} before Hello", other),
            }
        };
        tracing::debug!(
            "OBS hello: websocket {:?}, rpc {}",
            hello.obs_web_socket_version,
            hello.rpc_version
        );

        let identify = Self::identify_for(&hello, password);
        write.send(Message::Text(identify.to_frame()?)).await?;

        loop {
            match Self::next_frame(read).await? {
                Incoming::Identified(identified) => {
                    tracing::debug!("Identified with rpc {}", identified.negotiated_rpc_version);
                    return Ok(());
                }
                other => tracing::debug!("Ignoring {:?} before Identified", other),
            }
        }
    }

    fn identify_for(hello: &Hello, password: &str) -> Identify {
        let authentication = hello
            .authentication
            .as_ref()
            .map(|auth| auth_secret(password, &auth.salt, &auth.challenge));
        Identify {
            rpc_version: RPC_VERSION,
            authentication,
            event_subscriptions: EVENT_SUBSCRIPTION_SCENES,
        }
    }

    /// Next decodable frame during the handshake
    async fn next_frame(read: &mut SplitStream<WsStream>) -> Result<Incoming> {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match Incoming::parse(&text) {
                    Ok(incoming) => return Ok(incoming),
                    Err(e) => tracing::warn!("Undecodable frame from OBS: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} ({})", f.reason, u16::from(f.code)))
                        .unwrap_or_else(|| "connection closed".to_string());
                    return Err(SyncError::Authentication(reason));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(SyncError::ConnectionClosed),
            }
        }
    }

    async fn handle_message(
        state: &Arc<Mutex<ConnectionState>>,
        event_tx: &broadcast::Sender<ObsEvent>,
        text: &str,
    ) {
        tracing::trace!("Received: {}", text);

        match Incoming::parse(text) {
            Ok(Incoming::RequestResponse(response)) => {
                let mut state = state.lock().await;
                if let Some(tx) = state.pending_requests.remove(&response.request_id) {
                    let _ = tx.send(response);
                } else {
                    tracing::debug!("Response for unknown request {}", response.request_id);
                }
            }
            Ok(Incoming::Event(event)) => {
                let data = event
                    .event_data
                    .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
                let _ = event_tx.send(ObsEvent::new(event.event_type, data));
            }
            Ok(Incoming::Other(op)) => tracing::debug!("Ignoring frame with opcode {}", op),
            Ok(other) => tracing::debug!("Ignoring {:?}", other),
            Err(e) => tracing::warn!("Undecodable frame from OBS: {}", e),
        }
    }

    /// Send a request and wait for the response
    pub async fn send_request(&self, request: Request) -> Result<RequestResponse> {
        if self.is_closed() {
            return Err(SyncError::ConnectionClosed);
        }

        let request_id = request.request_id.clone();
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;
            state.pending_requests.insert(request_id.clone(), tx);

            let json = request.to_frame()?;
            tracing::trace!("Sending: {}", json);

            state
                .ws_tx
                .send(Message::Text(json))
                .map_err(|_| SyncError::ConnectionClosed)?;
        }

        let response = match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(SyncError::ConnectionClosed),
            Err(_) => {
                self.state.lock().await.pending_requests.remove(&request_id);
                return Err(SyncError::Timeout);
            }
        };

        if response.has_error() {
            return Err(SyncError::Obs {
                request_type: response.request_type,
                code: response.request_status.code,
                comment: response.request_status.comment.unwrap_or_default(),
            });
        }

        Ok(response)
    }

    /// Subscribe to OBS events
    pub fn subscribe(&self) -> broadcast::Receiver<ObsEvent> {
        self.event_tx.subscribe()
    }

    /// Check if the socket has gone away
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Ask the writer to close the socket
    pub async fn close(&self) {
        let state = self.state.lock().await;
        let _ = state.ws_tx.send(Message::Close(None));
    }
}
