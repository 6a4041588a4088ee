//! Value types carried between the streaming tasks.
//!
//! Everything here is immutable once constructed: the queues move these
//! by value and no type carries behavior.

use serde_json::Value;

/// One unit of captured local input. Produced by exactly one capture
/// task and forwarded exactly once to the session.
#[derive(Debug, Clone)]
pub enum MediaItem {
    /// Raw PCM from the microphone (16 kHz mono S16LE).
    Audio(Vec<u8>),
    /// An encoded still frame from the camera or screen.
    Frame { mime_type: String, data: Vec<u8> },
    /// A complete typed message that ends the user's turn.
    Text(String),
}

/// A single part of a model turn, decided once at the transport boundary.
#[derive(Debug, Clone)]
pub enum ResponsePart {
    /// PCM audio to play (24 kHz mono S16LE).
    Audio(Vec<u8>),
    /// Text fragment, printed as it arrives.
    Text(String),
    /// The model wants a local tool invoked.
    ToolCall(ToolCallRequest),
    /// Diagnostic payloads, display only.
    Metadata(ServerMetadata),
}

/// What the session hands to the demultiplexer.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Part(ResponsePart),
    /// Turn boundary. The server emits the same marker for interrupted
    /// and normally completed turns.
    TurnComplete,
}

/// A tool invocation requested by the model. Arguments pass through
/// opaquely; the executor owns their meaning.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: serde_json::Map<String, Value>,
}

/// Result of a tool invocation, correlated to its request by `id` and
/// returned on the same session it arrived on.
#[derive(Debug, Clone)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub result: Value,
}

/// Server-side diagnostics interleaved into a turn.
#[derive(Debug, Clone)]
pub enum ServerMetadata {
    /// Code the model ran via the built-in code-execution capability.
    ExecutableCode(String),
    /// Output of that execution.
    CodeExecutionResult(String),
    /// Rendered search grounding for the answer.
    SearchGrounding(String),
}

/// How a streaming task ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEnd {
    /// The user typed the quit sentinel.
    Quit,
    /// A frame source stopped yielding frames.
    SourceDry,
    /// A queue this task was serving closed while the group unwinds.
    QueueClosed,
}
