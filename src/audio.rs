//! Microphone capture and speaker playback over PulseAudio.
//!
//! Both directions use the simple blocking API. The pipeline runs each
//! device loop on a dedicated thread, so the handles never cross an
//! await point.

use crate::protocol::{RECEIVE_SAMPLE_RATE, SEND_SAMPLE_RATE};
use anyhow::{Context, Result};
use libpulse_binding as pulse;
use libpulse_simple_binding as psimple;
use tracing::info;

/// Samples per microphone chunk, matching the device buffer cadence.
pub const CHUNK_SAMPLES: usize = 1024;
const CHANNELS: u8 = 1;
const BYTES_PER_SAMPLE: usize = 2;

fn spec(rate: u32) -> pulse::sample::Spec {
    pulse::sample::Spec {
        format: pulse::sample::Format::S16le,
        channels: CHANNELS,
        rate,
    }
}

/// Blocking microphone source (16 kHz mono S16LE).
pub struct AudioCapturer {
    stream: psimple::Simple,
}

impl AudioCapturer {
    pub fn open(app_name: &str) -> Result<Self> {
        let stream = psimple::Simple::new(
            None, // default server
            app_name,
            pulse::stream::Direction::Record,
            None, // default input device
            "microphone",
            &spec(SEND_SAMPLE_RATE),
            None, // default channel map
            None, // default buffering attributes
        )
        .context("failed to open PulseAudio capture stream")?;

        info!(rate = SEND_SAMPLE_RATE, chunk = CHUNK_SAMPLES, "microphone open");
        Ok(Self { stream })
    }

    /// Read one chunk, blocking until the device fills it.
    pub fn read_chunk(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; CHUNK_SAMPLES * BYTES_PER_SAMPLE];
        self.stream
            .read(&mut buf)
            .context("microphone read failed")?;
        Ok(buf)
    }
}

/// Blocking speaker sink (24 kHz mono S16LE).
pub struct AudioPlayer {
    stream: psimple::Simple,
}

impl AudioPlayer {
    pub fn open(app_name: &str) -> Result<Self> {
        let stream = psimple::Simple::new(
            None,
            app_name,
            pulse::stream::Direction::Playback,
            None, // default output device
            "playback",
            &spec(RECEIVE_SAMPLE_RATE),
            None,
            None,
        )
        .context("failed to open PulseAudio playback stream")?;

        info!(rate = RECEIVE_SAMPLE_RATE, "speaker open");
        Ok(Self { stream })
    }

    /// Write one payload, blocking until the device accepts it.
    pub fn write(&mut self, pcm: &[u8]) -> Result<()> {
        self.stream.write(pcm).context("speaker write failed")
    }
}
