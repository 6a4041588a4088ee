//! The streaming pipeline: every long-running task in the session group,
//! plus the two queues that couple them.
//!
//! Topology: capture producers feed one bounded queue that the outbound
//! pump drains toward the session; the demultiplexer fans the session's
//! turn events out to the playback queue, the console, and the tool
//! bridge. The bounded queue is the only backpressure point: a full
//! queue suspends producers instead of dropping frames.
//!
//! Device loops (microphone, frames, speaker) run on dedicated threads
//! that own their handles end to end; an async shim awaits each thread's
//! outcome so a device failure still fails the whole group.

use crate::audio::{AudioCapturer, AudioPlayer};
use crate::events::{
    MediaItem, ResponsePart, ServerMetadata, TaskEnd, ToolCallRequest, ToolCallResponse,
    TurnEvent,
};
use crate::frame::FrameSource;
use crate::mcp::ToolDispatch;
use crate::session::{self, MediaSink};

use anyhow::{Context, Result};
use async_channel::{Receiver, Sender};
use std::io::Write as _;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Capacity of the outbound queue shared by the capture producers.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 5;
/// Self-throttle between image captures.
pub const FRAME_INTERVAL: Duration = Duration::from_secs(1);
const QUIT_SENTINEL: &str = "q";

/// Bounded multi-producer queue from the capture tasks to the pump.
pub fn outbound_queue() -> (Sender<MediaItem>, Receiver<MediaItem>) {
    async_channel::bounded(OUTBOUND_QUEUE_CAPACITY)
}

/// Unbounded queue of PCM payloads awaiting playback. The receiver is
/// cloned: one side plays, the demultiplexer's side drains.
pub fn inbound_audio_queue() -> (Sender<Vec<u8>>, Receiver<Vec<u8>>) {
    async_channel::unbounded()
}

/// Run a blocking device loop on its own thread and await its outcome.
/// The thread owns its device handle end to end; the async side only
/// observes the result, so a failure still tears the group down.
async fn offload<F>(label: &'static str, body: F) -> Result<TaskEnd>
where
    F: FnOnce() -> Result<TaskEnd> + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();
    std::thread::spawn(move || {
        let _ = done_tx.send(body());
    });
    match done_rx.await {
        Ok(Ok(end)) => Ok(end),
        Ok(Err(e)) => {
            error!(task = label, error = ?e, "device loop failed");
            Err(e)
        }
        Err(_) => anyhow::bail!("{label} thread exited without reporting"),
    }
}

/// Microphone producer. Runs at device-buffer cadence: the only pacing
/// is the blocking read itself, so the hardware buffer cannot overflow
/// while the queue has room.
pub async fn capture_audio(app_name: &'static str, out: Sender<MediaItem>) -> Result<TaskEnd> {
    offload("microphone", move || {
        let mut capturer = AudioCapturer::open(app_name)?;
        loop {
            let chunk = capturer.read_chunk()?;
            if out.send_blocking(MediaItem::Audio(chunk)).is_err() {
                return Ok(TaskEnd::QueueClosed);
            }
        }
    })
    .await
}

/// Image producer for the camera or screen: one grab, a fixed pause,
/// one queue push. A source that stops yielding frames ends the task
/// cleanly without ending the session.
pub async fn capture_frames<F>(
    open: F,
    out: Sender<MediaItem>,
    interval: Duration,
) -> Result<TaskEnd>
where
    F: FnOnce() -> Result<Box<dyn FrameSource>> + Send + 'static,
{
    offload("frame capture", move || {
        let mut source = open()?;
        loop {
            let frame = match source.grab()? {
                Some(frame) => frame,
                None => {
                    info!("frame source exhausted, stopping image capture");
                    return Ok(TaskEnd::SourceDry);
                }
            };
            std::thread::sleep(interval);
            let item = MediaItem::Frame {
                mime_type: frame.mime_type.to_string(),
                data: frame.data,
            };
            if out.send_blocking(item).is_err() {
                return Ok(TaskEnd::QueueClosed);
            }
        }
    })
    .await
}

/// Start the blocking stdin reader that feeds the text producer. Lives
/// on its own thread so an idle prompt never stalls the runtime.
pub fn spawn_stdin_lines() -> Receiver<String> {
    let (tx, rx) = async_channel::unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        loop {
            print!("message > ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                // EOF closes the channel, which the producer reads as quit.
                Ok(0) => break,
                Ok(_) => {
                    let line = line.trim_end_matches(['\r', '\n']).to_string();
                    if tx.send_blocking(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}

/// Text producer. Each line becomes a complete user turn, sent straight
/// on the session so a typed message never stalls behind backpressured
/// frames. The quit sentinel ends the whole group.
pub async fn text_input<S>(lines: Receiver<String>, sink: S) -> Result<TaskEnd>
where
    S: MediaSink + 'static,
{
    loop {
        let Ok(line) = lines.recv().await else {
            info!("text input closed, treating as quit");
            return Ok(TaskEnd::Quit);
        };
        if line.eq_ignore_ascii_case(QUIT_SENTINEL) {
            return Ok(TaskEnd::Quit);
        }
        // An empty line still ends the turn; the service rejects empty text.
        let text = if line.is_empty() { ".".to_string() } else { line };
        if let Err(e) = sink.send_item(&MediaItem::Text(text)).await {
            error!(error = %e, "failed to send text turn");
            return Err(e.into());
        }
    }
}

/// Forward queued capture items to the session, exactly once, in
/// arrival order.
pub async fn outbound_pump<S>(queue: Receiver<MediaItem>, sink: S) -> Result<TaskEnd>
where
    S: MediaSink + 'static,
{
    loop {
        let Ok(item) = queue.recv().await else {
            return Ok(TaskEnd::QueueClosed);
        };
        if let Err(e) = sink.send_item(&item).await {
            error!(error = %e, "failed to forward captured item to the session");
            return Err(e.into());
        }
    }
}

/// Route each part of a model turn as it arrives, and flush stale
/// playback on every turn boundary.
///
/// Audio buffered for a superseded turn must not play late, and the
/// server signals interruption and normal completion with the same
/// marker, so the inbound queue is drained unconditionally on every
/// boundary.
pub async fn demux(
    mut events: mpsc::Receiver<session::Result<TurnEvent>>,
    audio_tx: Sender<Vec<u8>>,
    audio_drain: Receiver<Vec<u8>>,
    calls: Sender<ToolCallRequest>,
) -> Result<TaskEnd> {
    while let Some(event) = events.recv().await {
        match event {
            Ok(TurnEvent::Part(part)) => route_part(part, &audio_tx, &calls).await?,
            Ok(TurnEvent::TurnComplete) => {
                let mut flushed = 0usize;
                while audio_drain.try_recv().is_ok() {
                    flushed += 1;
                }
                if flushed > 0 {
                    debug!(flushed, "dropped unplayed audio at turn boundary");
                }
            }
            Err(e) => {
                error!(error = %e, "session receive failed");
                return Err(e.into());
            }
        }
    }
    Ok(TaskEnd::QueueClosed)
}

async fn route_part(
    part: ResponsePart,
    audio_tx: &Sender<Vec<u8>>,
    calls: &Sender<ToolCallRequest>,
) -> Result<()> {
    match part {
        ResponsePart::Audio(pcm) => {
            // Unbounded: routing never waits on playback.
            audio_tx
                .send(pcm)
                .await
                .ok()
                .context("inbound audio queue closed")?;
        }
        ResponsePart::Text(text) => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        ResponsePart::ToolCall(request) => {
            debug!(id = %request.id, name = %request.name, "forwarding tool call");
            // Handed off, not awaited: later parts of the same turn keep
            // routing while the executor works.
            calls
                .send(request)
                .await
                .ok()
                .context("tool bridge queue closed")?;
        }
        ResponsePart::Metadata(meta) => print_metadata(&meta),
    }
    Ok(())
}

fn print_metadata(meta: &ServerMetadata) {
    match meta {
        ServerMetadata::ExecutableCode(code) => {
            println!("-------------------------------");
            println!("``` python\n{code}\n```");
            println!("-------------------------------");
        }
        ServerMetadata::CodeExecutionResult(output) => {
            println!("-------------------------------");
            println!("```\n{output}\n```");
            println!("-------------------------------");
        }
        ServerMetadata::SearchGrounding(rendered) => println!("{rendered}"),
    }
}

/// Serve tool-call requests one at a time: invoke the executor, then
/// send the correlated response on the session before taking the next
/// request. A failed invocation ends the session; there is no retry.
pub async fn tool_bridge<S, T>(
    calls: Receiver<ToolCallRequest>,
    executor: T,
    sink: S,
) -> Result<TaskEnd>
where
    S: MediaSink + 'static,
    T: ToolDispatch + 'static,
{
    loop {
        let Ok(request) = calls.recv().await else {
            return Ok(TaskEnd::QueueClosed);
        };
        info!(id = %request.id, name = %request.name, "invoking tool");
        let result = match executor.call(&request.name, request.args.clone()).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, id = %request.id, name = %request.name, "tool invocation failed");
                return Err(e.into());
            }
        };
        println!("{result}");

        let response = ToolCallResponse {
            id: request.id,
            name: request.name,
            result,
        };
        if let Err(e) = sink.send_tool_response(&response).await {
            error!(error = %e, "failed to send tool response");
            return Err(e.into());
        }
    }
}

/// Playback consumer: one blocking write per payload, in queue order.
pub async fn play_audio(app_name: &'static str, queue: Receiver<Vec<u8>>) -> Result<TaskEnd> {
    offload("speaker", move || {
        let mut player = AudioPlayer::open(app_name)?;
        loop {
            match queue.recv_blocking() {
                Ok(pcm) => player.write(&pcm)?,
                Err(_) => return Ok(TaskEnd::QueueClosed),
            }
        }
    })
    .await
}
