//! Session bootstrap and the orchestrating task group.
//!
//! One run is one session: discover tools, open the transport, start
//! every streaming task under a single group with fail-fast semantics,
//! and release the transport on every exit path.

use crate::events::TaskEnd;
use crate::frame::{CameraSource, FrameSource, ScreenSource};
use crate::mcp::{McpExecutor, McpSettings, ToolDef};
use crate::pipeline;
use crate::protocol::FunctionDeclaration;
use crate::session::{LiveSession, SessionConfig};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, info};

pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-live-preview";
pub const DEFAULT_VOICE: &str = "Zephyr";
/// Application name shown to the audio server.
pub const APP_NAME: &str = "parley";

/// Which pixels, if any, to stream alongside the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CaptureMode {
    Camera,
    Screen,
    None,
}

pub struct AppConfig {
    pub api_key: String,
    pub mode: CaptureMode,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub mcp_settings: Option<McpSettings>,
}

/// Translate executor-declared tool schemas into the session's function
/// declarations. Tools without parameters omit the parameters block
/// entirely; the executor's `required` list rides through verbatim.
pub fn declare_tools(tools: &[ToolDef]) -> Vec<FunctionDeclaration> {
    tools
        .iter()
        .map(|tool| {
            let schema = tool.input_schema.as_object();
            let properties = schema
                .and_then(|s| s.get("properties"))
                .and_then(|p| p.as_object())
                .filter(|p| !p.is_empty());

            let parameters = properties.map(|props| {
                let kind = schema
                    .and_then(|s| s.get("type"))
                    .cloned()
                    .unwrap_or_else(|| json!("object"));
                let mut declared = serde_json::Map::new();
                for (name, prop) in props {
                    declared.insert(
                        name.clone(),
                        json!({
                            "type": prop.get("type").cloned().unwrap_or_else(|| json!("string")),
                            "description": "",
                        }),
                    );
                }
                let mut parameters = json!({ "type": kind, "properties": declared });
                if let Some(required) = schema.and_then(|s| s.get("required")) {
                    parameters["required"] = required.clone();
                }
                parameters
            });

            FunctionDeclaration {
                name: tool.name.clone(),
                description: tool.description.clone().unwrap_or_default(),
                parameters,
            }
        })
        .collect()
}

/// Run one full session until the user quits or a task fails.
pub async fn run(config: AppConfig) -> Result<()> {
    // Tool executor first: its declarations go into session setup. An
    // unreachable executor degrades to an empty tool set (logged inside
    // connect), it does not stop the session.
    let executor = match &config.mcp_settings {
        Some(settings) => McpExecutor::connect(settings).await,
        None => McpExecutor::empty(),
    };
    info!(tools = executor.tools().len(), "tool set declared");

    let session_config = SessionConfig {
        model: config.model.clone(),
        voice: config.voice.clone(),
        system_instruction: config.system_instruction.clone(),
        tools: declare_tools(executor.tools()),
        code_execution: true,
        google_search: true,
    };
    let session = LiveSession::connect(&config.api_key, &session_config).await?;
    let (handle, events) = session.into_parts();

    let (out_tx, out_rx) = pipeline::outbound_queue();
    let (audio_tx, audio_rx) = pipeline::inbound_audio_queue();
    let (call_tx, call_rx) = async_channel::unbounded();

    let mut group: JoinSet<Result<TaskEnd>> = JoinSet::new();

    let lines = pipeline::spawn_stdin_lines();
    group.spawn(pipeline::text_input(lines, handle.clone()));
    group.spawn(pipeline::outbound_pump(out_rx, handle.clone()));
    group.spawn(pipeline::capture_audio(APP_NAME, out_tx.clone()));
    match config.mode {
        CaptureMode::Camera => {
            group.spawn(pipeline::capture_frames(
                || Ok(Box::new(CameraSource::open()?) as Box<dyn FrameSource>),
                out_tx.clone(),
                pipeline::FRAME_INTERVAL,
            ));
        }
        CaptureMode::Screen => {
            group.spawn(pipeline::capture_frames(
                || Ok(Box::new(ScreenSource::open()?) as Box<dyn FrameSource>),
                out_tx.clone(),
                pipeline::FRAME_INTERVAL,
            ));
        }
        CaptureMode::None => {}
    }
    group.spawn(pipeline::demux(
        events,
        audio_tx,
        audio_rx.clone(),
        call_tx,
    ));
    group.spawn(pipeline::tool_bridge(call_rx, executor, handle.clone()));
    group.spawn(pipeline::play_audio(APP_NAME, audio_rx));
    // Producers hold the remaining senders; the pump must see the queue
    // close once they are gone.
    drop(out_tx);

    let outcome = supervise(&mut group).await;

    // Teardown happens on every path: cancel whatever is left, then
    // release the transport exactly once.
    group.shutdown().await;
    if let Err(e) = handle.close().await {
        debug!(error = %e, "session close during teardown failed");
    }
    outcome
}

/// Fail-fast supervision: the first task error cancels every sibling;
/// the quit sentinel does the same without surfacing an error. A dry
/// frame source only ends its own task.
async fn supervise(group: &mut JoinSet<Result<TaskEnd>>) -> Result<()> {
    while let Some(joined) = group.join_next().await {
        match joined {
            Ok(Ok(TaskEnd::Quit)) => {
                info!("quit requested, shutting down");
                return Ok(());
            }
            Ok(Ok(TaskEnd::SourceDry)) => continue,
            Ok(Ok(TaskEnd::QueueClosed)) => continue,
            Ok(Err(e)) => return Err(e),
            Err(e) if e.is_cancelled() => continue,
            Err(e) => return Err(e).context("streaming task panicked"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, schema: serde_json::Value) -> ToolDef {
        ToolDef {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: schema,
        }
    }

    #[test]
    fn parameterized_tools_translate_with_required_verbatim() {
        let declared = declare_tools(&[tool(
            "lookup",
            json!({
                "type": "object",
                "properties": {
                    "q": { "type": "string", "description": "query" },
                    "limit": { "type": "integer" }
                },
                "required": ["q"]
            }),
        )]);

        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].name, "lookup");
        assert_eq!(declared[0].description, "lookup tool");

        let parameters = declared[0].parameters.as_ref().unwrap();
        assert_eq!(parameters["type"], "object");
        assert_eq!(parameters["properties"]["q"]["type"], "string");
        // Property descriptions are not carried over, only types.
        assert_eq!(parameters["properties"]["q"]["description"], "");
        assert_eq!(parameters["properties"]["limit"]["type"], "integer");
        assert_eq!(parameters["required"], json!(["q"]));
    }

    #[test]
    fn parameterless_tools_omit_the_parameters_block() {
        let declared = declare_tools(&[
            tool("ping", json!({ "type": "object", "properties": {} })),
            tool("reset", json!({ "type": "object" })),
        ]);
        assert!(declared[0].parameters.is_none());
        assert!(declared[1].parameters.is_none());
    }

    #[test]
    fn missing_description_becomes_empty() {
        let declared = declare_tools(&[ToolDef {
            name: "bare".to_string(),
            description: None,
            input_schema: json!({ "type": "object" }),
        }]);
        assert_eq!(declared[0].description, "");
    }
}
