//! Wire shapes of the Live API WebSocket protocol.
//!
//! Client messages are externally tagged: the variant name is the single
//! top-level key on the wire ({"setup": ...}, {"realtimeInput": ...}).
//! Server messages arrive the same way and are matched untagged, since
//! the server may attach extra top-level fields such as usage metadata.
//!
//! `decode` is the only place dynamic server JSON becomes the closed
//! `TurnEvent` union; nothing downstream inspects raw JSON.

use crate::events::{ResponsePart, ServerMetadata, ToolCallRequest, ToolCallResponse, TurnEvent};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// PCM rate of audio we send.
pub const SEND_SAMPLE_RATE: u32 = 16000;
/// PCM rate of audio the service returns.
pub const RECEIVE_SAMPLE_RATE: u32 = 24000;
/// MIME tag for outbound microphone chunks.
pub const AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// Session setup, sent once immediately after connecting.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// One entry of the setup `tools` list: the declared functions plus the
/// built-in capabilities enabled for the session.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_declarations: Vec<FunctionDeclaration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_execution: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_search: Option<serde_json::Value>,
}

/// A callable tool as declared to the model. `parameters` holds the
/// translated executor schema and is omitted for parameterless tools.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// A chunk of realtime input (audio or a video frame).
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaBlob>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    /// Base64-encoded payload.
    pub data: String,
    pub mime_type: String,
}

/// A complete typed turn from the user.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMsg {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: serde_json::Value,
}

/// Message sent from client to server.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
    ToolResponse(ToolResponseMsg),
}

impl ClientMessage {
    /// Convert one captured item into its wire message. This is the
    /// single conversion point shared by the outbound pump and the text
    /// producer.
    pub fn from_media(item: &crate::events::MediaItem) -> Self {
        use crate::events::MediaItem;
        match item {
            MediaItem::Audio(pcm) => ClientMessage::RealtimeInput(RealtimeInput {
                audio: Some(MediaBlob {
                    data: BASE64.encode(pcm),
                    mime_type: AUDIO_MIME.to_string(),
                }),
                video: None,
            }),
            MediaItem::Frame { mime_type, data } => ClientMessage::RealtimeInput(RealtimeInput {
                audio: None,
                video: Some(MediaBlob {
                    data: BASE64.encode(data),
                    mime_type: mime_type.clone(),
                }),
            }),
            MediaItem::Text(text) => ClientMessage::ClientContent(ClientContent {
                turns: vec![Content {
                    role: Some("user".to_string()),
                    parts: vec![Part {
                        text: Some(text.clone()),
                    }],
                }],
                turn_complete: true,
            }),
        }
    }

    /// Wrap a tool result for the return trip. The result rides inside a
    /// `{"result": ...}` object, correlated by the request id.
    pub fn from_tool_response(response: &ToolCallResponse) -> Self {
        ClientMessage::ToolResponse(ToolResponseMsg {
            function_responses: vec![FunctionResponse {
                id: response.id.clone(),
                name: response.name.clone(),
                response: json!({ "result": response.result }),
            }],
        })
    }
}

/// Server -> client messages. Matched untagged because the server may
/// attach extra top-level fields alongside the main key; the catch-all
/// `ServerContent` variant therefore has to come last.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    SetupComplete {
        #[serde(rename = "setupComplete")]
        setup_complete: serde_json::Value,
    },
    ToolCall {
        #[serde(rename = "toolCall")]
        tool_call: ToolCallMsg,
    },
    ToolCallCancellation {
        #[serde(rename = "toolCallCancellation")]
        tool_call_cancellation: serde_json::Value,
    },
    GoAway {
        #[serde(rename = "goAway")]
        go_away: serde_json::Value,
    },
    ServerContent {
        #[serde(rename = "serverContent")]
        server_content: ServerContent,
    },
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: Option<bool>,
    #[serde(default)]
    pub interrupted: Option<bool>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<PartNode>,
}

/// One part of a model turn as it appears on the wire. Exactly one of
/// the fields is normally set.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PartNode {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub executable_code: Option<ExecutableCode>,
    #[serde(default)]
    pub code_execution_result: Option<CodeExecutionResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub data: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableCode {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionResult {
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub search_entry_point: Option<SearchEntryPoint>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchEntryPoint {
    #[serde(default)]
    pub rendered_content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMsg {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// Flatten one server message into demultiplexer events, in wire order.
/// Audio payloads are base64-decoded here; a payload that fails to
/// decode is dropped with a warning rather than ending the stream.
pub fn decode(msg: ServerMessage) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    match msg {
        // Handled during the connect handshake, nothing to route.
        ServerMessage::SetupComplete { .. } => {}
        ServerMessage::ServerContent { server_content } => {
            if server_content.interrupted == Some(true) {
                debug!("generation interrupted by user activity");
            }
            if let Some(turn) = server_content.model_turn {
                for part in turn.parts {
                    if let Some(text) = part.text {
                        if !text.is_empty() {
                            events.push(TurnEvent::Part(ResponsePart::Text(text)));
                        }
                    }
                    if let Some(inline) = part.inline_data {
                        match BASE64.decode(inline.data.as_bytes()) {
                            Ok(pcm) if !pcm.is_empty() => {
                                events.push(TurnEvent::Part(ResponsePart::Audio(pcm)));
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, mime = ?inline.mime_type, "undecodable inline payload dropped");
                            }
                        }
                    }
                    if let Some(code) = part.executable_code {
                        events.push(TurnEvent::Part(ResponsePart::Metadata(
                            ServerMetadata::ExecutableCode(code.code),
                        )));
                    }
                    if let Some(result) = part.code_execution_result {
                        events.push(TurnEvent::Part(ResponsePart::Metadata(
                            ServerMetadata::CodeExecutionResult(result.output),
                        )));
                    }
                }
            }
            if let Some(grounding) = server_content.grounding_metadata {
                if let Some(entry) = grounding.search_entry_point {
                    events.push(TurnEvent::Part(ResponsePart::Metadata(
                        ServerMetadata::SearchGrounding(entry.rendered_content),
                    )));
                }
            }
            if server_content.turn_complete == Some(true) {
                events.push(TurnEvent::TurnComplete);
            }
        }
        ServerMessage::ToolCall { tool_call } => {
            for call in tool_call.function_calls {
                events.push(TurnEvent::Part(ResponsePart::ToolCall(ToolCallRequest {
                    id: call.id,
                    name: call.name,
                    args: call.args,
                })));
            }
        }
        // No in-flight cancellation support; the bridge has no way to
        // retract a call already handed to the executor.
        ServerMessage::ToolCallCancellation { .. } => {
            warn!("ignoring tool call cancellation");
        }
        // The reader reacts to this before decoding.
        ServerMessage::GoAway { .. } => {}
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MediaItem;

    #[test]
    fn audio_item_becomes_realtime_input() {
        let msg = ClientMessage::from_media(&MediaItem::Audio(vec![1, 2, 3]));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value["realtimeInput"]["audio"]["mimeType"],
            "audio/pcm;rate=16000"
        );
        assert_eq!(
            value["realtimeInput"]["audio"]["data"],
            BASE64.encode([1u8, 2, 3])
        );
        assert!(value["realtimeInput"].get("video").is_none());
    }

    #[test]
    fn frame_item_becomes_realtime_video() {
        let msg = ClientMessage::from_media(&MediaItem::Frame {
            mime_type: "image/jpeg".to_string(),
            data: vec![0xFF, 0xD8],
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["realtimeInput"]["video"]["mimeType"], "image/jpeg");
        assert!(value["realtimeInput"].get("audio").is_none());
    }

    #[test]
    fn text_item_becomes_a_complete_turn() {
        let msg = ClientMessage::from_media(&MediaItem::Text("hello".to_string()));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["clientContent"]["turnComplete"], true);
        assert_eq!(value["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(
            value["clientContent"]["turns"][0]["parts"][0]["text"],
            "hello"
        );
    }

    #[test]
    fn tool_response_wraps_the_result_verbatim() {
        let msg = ClientMessage::from_tool_response(&ToolCallResponse {
            id: "42".to_string(),
            name: "lookup".to_string(),
            result: json!({"rows": [1, 2]}),
        });
        let value = serde_json::to_value(&msg).unwrap();
        let responses = &value["toolResponse"]["functionResponses"];
        assert_eq!(responses.as_array().unwrap().len(), 1);
        assert_eq!(responses[0]["id"], "42");
        assert_eq!(responses[0]["name"], "lookup");
        assert_eq!(responses[0]["response"]["result"], json!({"rows": [1, 2]}));
    }

    #[test]
    fn decode_routes_parts_in_wire_order() {
        let raw = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "text": "thinking" },
                        { "inlineData": { "data": BASE64.encode([9u8, 9]), "mimeType": "audio/pcm" } }
                    ]
                },
                "turnComplete": true
            }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let events = decode(msg);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            TurnEvent::Part(ResponsePart::Text(t)) if t == "thinking"
        ));
        assert!(matches!(
            &events[1],
            TurnEvent::Part(ResponsePart::Audio(pcm)) if pcm == &[9u8, 9]
        ));
        assert!(matches!(events[2], TurnEvent::TurnComplete));
    }

    #[test]
    fn decode_emits_one_request_per_function_call() {
        let raw = json!({
            "toolCall": {
                "functionCalls": [
                    { "id": "a", "name": "first", "args": { "q": "x" } },
                    { "id": "b", "name": "second" }
                ]
            }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let events = decode(msg);
        assert_eq!(events.len(), 2);
        match &events[0] {
            TurnEvent::Part(ResponsePart::ToolCall(req)) => {
                assert_eq!(req.id, "a");
                assert_eq!(req.name, "first");
                assert_eq!(req.args["q"], "x");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match &events[1] {
            TurnEvent::Part(ResponsePart::ToolCall(req)) => {
                assert_eq!(req.id, "b");
                assert!(req.args.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decode_surfaces_code_execution_and_grounding_as_metadata() {
        let raw = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "executableCode": { "code": "print(1)" } },
                        { "codeExecutionResult": { "output": "1" } }
                    ]
                },
                "groundingMetadata": {
                    "searchEntryPoint": { "renderedContent": "<chips>" }
                }
            }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let events = decode(msg);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            TurnEvent::Part(ResponsePart::Metadata(ServerMetadata::ExecutableCode(c))) if c == "print(1)"
        ));
        assert!(matches!(
            &events[1],
            TurnEvent::Part(ResponsePart::Metadata(ServerMetadata::CodeExecutionResult(o))) if o == "1"
        ));
        assert!(matches!(
            &events[2],
            TurnEvent::Part(ResponsePart::Metadata(ServerMetadata::SearchGrounding(r))) if r == "<chips>"
        ));
    }

    #[test]
    fn extra_top_level_fields_do_not_break_parsing() {
        let raw = json!({
            "serverContent": { "turnComplete": true },
            "usageMetadata": { "totalTokenCount": 7 }
        });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        let events = decode(msg);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TurnEvent::TurnComplete));
    }

    #[test]
    fn setup_complete_parses_ahead_of_server_content() {
        let raw = json!({ "setupComplete": {} });
        let msg: ServerMessage = serde_json::from_value(raw).unwrap();
        assert!(matches!(msg, ServerMessage::SetupComplete { .. }));
        assert!(decode(msg).is_empty());
    }
}
