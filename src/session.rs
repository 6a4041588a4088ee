//! Duplex session transport to the Live API.
//!
//! The WebSocket is split once at connect time: the write half lives
//! behind an `Arc<Mutex<..>>` so the outbound pump and the tool bridge
//! can send concurrently without interleaving frames, and the read half
//! is drained by a background task that decodes every server message
//! into `TurnEvent`s for the demultiplexer.

use crate::events::{MediaItem, ToolCallResponse, TurnEvent};
use crate::protocol::{
    self, ClientMessage, Content, FunctionDeclaration, GenerationConfig, Part,
    PrebuiltVoiceConfig, ServerMessage, Setup, SpeechConfig, ToolSpec, VoiceConfig,
};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Live API WebSocket endpoint; the API key rides as a query parameter.
const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const SETUP_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CHANNEL_CAPACITY: usize = 100;

type WsSink = Arc<Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Error type for session transport operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("setup not acknowledged")]
    SetupNotComplete,

    #[error("timed out waiting for the server")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Session configuration, supplied once at connect time.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    /// Prebuilt voice used for spoken replies.
    pub voice: String,
    pub system_instruction: String,
    /// Callable tools declared to the model.
    pub tools: Vec<FunctionDeclaration>,
    pub code_execution: bool,
    pub google_search: bool,
}

/// Send surface shared by the streaming tasks. The session implements
/// it; the tests substitute a recorder.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn send_item(&self, item: &MediaItem) -> Result<()>;
    async fn send_tool_response(&self, response: &ToolCallResponse) -> Result<()>;
}

/// One live session. Owns the receive stream; senders clone the handle.
pub struct LiveSession {
    handle: SessionHandle,
    events: mpsc::Receiver<Result<TurnEvent>>,
    _reader: JoinHandle<()>,
}

/// Clonable write half of a session. All sends funnel through one
/// mutex-guarded sink, so interleaved calls from the outbound pump and
/// the tool bridge cannot corrupt frames.
#[derive(Clone)]
pub struct SessionHandle {
    writer: WsSink,
}

impl LiveSession {
    /// Connect, send the setup message, and wait for the server's
    /// acknowledgment.
    pub async fn connect(api_key: &str, config: &SessionConfig) -> Result<Self> {
        let url = format!("{LIVE_ENDPOINT}?key={api_key}");
        info!(model = %config.model, "connecting to Live API");

        let (ws, _resp) = connect_async(&url).await?;
        let (sink, stream) = ws.split();
        let handle = SessionHandle {
            writer: Arc::new(Mutex::new(sink)),
        };

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(stream, event_tx, ready_tx));

        handle
            .send(&ClientMessage::Setup(setup_message(config)))
            .await?;

        match tokio::time::timeout(SETUP_TIMEOUT, ready_rx).await {
            Ok(Ok(())) => info!("session setup complete"),
            Ok(Err(_)) => return Err(SessionError::SetupNotComplete),
            Err(_) => return Err(SessionError::Timeout),
        }

        Ok(Self {
            handle,
            events: event_rx,
            _reader: reader,
        })
    }

    /// Split into the write handle and the decoded event stream.
    pub fn into_parts(self) -> (SessionHandle, mpsc::Receiver<Result<TurnEvent>>) {
        (self.handle, self.events)
    }
}

impl SessionHandle {
    async fn send(&self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        debug!(bytes = json.len(), "sending client message");
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(json.into()))
            .await
            .map_err(SessionError::WebSocket)
    }

    /// Close the transport. Safe to call after a transport failure; the
    /// error from a doomed socket is reported, not compounded.
    pub async fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.close().await.map_err(SessionError::WebSocket)
    }
}

#[async_trait]
impl MediaSink for SessionHandle {
    async fn send_item(&self, item: &MediaItem) -> Result<()> {
        self.send(&ClientMessage::from_media(item)).await
    }

    async fn send_tool_response(&self, response: &ToolCallResponse) -> Result<()> {
        self.send(&ClientMessage::from_tool_response(response)).await
    }
}

fn setup_message(config: &SessionConfig) -> Setup {
    let tool_spec = ToolSpec {
        function_declarations: config.tools.clone(),
        code_execution: config.code_execution.then(|| json!({})),
        google_search: config.google_search.then(|| json!({})),
    };
    Setup {
        model: config.model.clone(),
        generation_config: Some(GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice.clone(),
                    },
                },
            }),
        }),
        system_instruction: Some(Content {
            role: Some("SYSTEM".to_string()),
            parts: vec![Part {
                text: Some(config.system_instruction.clone()),
            }],
        }),
        tools: Some(vec![tool_spec]),
    }
}

/// Drain the socket until it closes, decoding each frame into events.
/// The first setup acknowledgment resolves `ready`; everything after
/// goes to the demultiplexer. Ends when the socket or the receiver side
/// goes away, flagging transport failures so the group can fail fast.
async fn read_loop(
    mut stream: WsStream,
    events: mpsc::Sender<Result<TurnEvent>>,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if !dispatch_payload(text.as_str(), &events, &mut ready).await {
                    break;
                }
            }
            // The service occasionally delivers JSON in binary frames.
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    if !dispatch_payload(text, &events, &mut ready).await {
                        break;
                    }
                }
                Err(_) => debug!(bytes = bytes.len(), "ignoring non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "server closed the connection");
                let _ = events.send(Err(SessionError::ConnectionClosed)).await;
                break;
            }
            // Ping/pong and frames we never send.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(error = %e, "WebSocket receive failed");
                let _ = events.send(Err(SessionError::WebSocket(e))).await;
                break;
            }
            None => {
                let _ = events.send(Err(SessionError::ConnectionClosed)).await;
                break;
            }
        }
    }
    debug!("session reader stopped");
}

/// Returns false once the event receiver is gone and reading is moot.
async fn dispatch_payload(
    text: &str,
    events: &mpsc::Sender<Result<TurnEvent>>,
    ready: &mut Option<oneshot::Sender<()>>,
) -> bool {
    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::SetupComplete { .. }) => {
            if let Some(tx) = ready.take() {
                let _ = tx.send(());
            }
        }
        Ok(ServerMessage::GoAway { .. }) => {
            warn!("server requested disconnection");
        }
        Ok(msg) => {
            for event in protocol::decode(msg) {
                if events.send(Ok(event)).await.is_err() {
                    return false;
                }
            }
        }
        Err(e) => {
            warn!(error = %e, raw = %text, "unparseable server message skipped");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_tools(tools: Vec<FunctionDeclaration>) -> SessionConfig {
        SessionConfig {
            model: "models/test-live".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "Be brief.".to_string(),
            tools,
            code_execution: true,
            google_search: true,
        }
    }

    #[test]
    fn setup_message_carries_the_full_configuration() {
        let config = config_with_tools(vec![FunctionDeclaration {
            name: "lookup".to_string(),
            description: "Find things".to_string(),
            parameters: None,
        }]);
        let value =
            serde_json::to_value(ClientMessage::Setup(setup_message(&config))).unwrap();

        let setup = &value["setup"];
        assert_eq!(setup["model"], "models/test-live");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Zephyr"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be brief.");
        let tools = &setup["tools"][0];
        assert_eq!(tools["functionDeclarations"][0]["name"], "lookup");
        assert!(tools.get("codeExecution").is_some());
        assert!(tools.get("googleSearch").is_some());
    }

    #[test]
    fn disabled_capabilities_are_omitted_from_setup() {
        let mut config = config_with_tools(vec![]);
        config.code_execution = false;
        config.google_search = false;
        let value =
            serde_json::to_value(ClientMessage::Setup(setup_message(&config))).unwrap();

        let tools = &value["setup"]["tools"][0];
        assert!(tools.get("codeExecution").is_none());
        assert!(tools.get("googleSearch").is_none());
        assert!(tools.get("functionDeclarations").is_none());
    }
}
