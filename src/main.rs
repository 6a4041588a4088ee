//! parley - real-time voice assistant for the Gemini Live API
//!
//! Streams microphone audio (plus camera or screen frames) to the model
//! over one duplex session, plays the spoken replies, and bridges the
//! model's tool calls to local MCP servers.

#![forbid(unsafe_code)]

/// Session orchestration and the task group
pub mod app;
/// Microphone capture and speaker playback
pub mod audio;
/// Value types carried on the queues
pub mod events;
/// Screen and camera frame sources
pub mod frame;
/// MCP tool-executor client
pub mod mcp;
/// Producer/consumer task bodies and the queues
pub mod pipeline;
/// Live API wire shapes
pub mod protocol;
/// Duplex session transport
pub mod session;

use anyhow::Context;
use app::{AppConfig, CaptureMode};
use clap::Parser;
use std::path::Path;
use tracing::warn;

const SYSTEM_INSTRUCTION_FILE: &str = "system_instruction.txt";
const MCP_CONFIG_FILE: &str = "mcp_config.json";
const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful real-time assistant.";

#[derive(Debug, Parser)]
#[command(name = "parley", about = "Real-time voice assistant with tool calling")]
struct Cli {
    /// Pixels to stream alongside the microphone.
    #[arg(long, value_enum, default_value = "screen")]
    mode: CaptureMode,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let api_key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY is not set")?;

    // Optional local override; the built-in default is not an error path.
    let system_instruction = std::fs::read_to_string(SYSTEM_INSTRUCTION_FILE)
        .unwrap_or_else(|_| DEFAULT_SYSTEM_INSTRUCTION.to_string());

    let mcp_settings = match mcp::McpSettings::load(Path::new(MCP_CONFIG_FILE)) {
        Ok(settings) => Some(settings),
        Err(e) => {
            warn!(error = %e, "no usable tool server descriptor, continuing without tools");
            None
        }
    };

    app::run(AppConfig {
        api_key,
        mode: cli.mode,
        model: app::DEFAULT_MODEL.to_string(),
        voice: app::DEFAULT_VOICE.to_string(),
        system_instruction,
        mcp_settings,
    })
    .await
}
