//! The audio framer task.
//!
//! The header is a single big-endian codec id with two sentinel
//! values: `0` means the server disabled audio (a normal outcome,
//! e.g. Android < 11), `1` means capture configuration failed on the
//! device. Frames follow the same `pts ‖ size ‖ data` layout as
//! video, but there is no configuration-packet merging — audio
//! codecs do not use the H.26x CSD convention.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::codec::{self, AudioCodec, AUDIO_CONFIG_ERROR, AUDIO_DISABLED};
use super::{read_u32_be, read_u64_be, FrameSource};
use crate::decoder::{submit_frame, CodecConfig, Decoder, SubmitPolicy};
use crate::error::CoreError;
use crate::events::{Event, EventSink};

/// Upper bound on a single compressed audio frame.
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Run the audio stream until it closes or the task is stopped.
///
/// Returns `Ok` for both sentinel outcomes; the corresponding event
/// has already been emitted by then.
pub fn run_audio_stream(
    source: &mut impl FrameSource,
    decoder: &mut dyn Decoder,
    sample_rate: u32,
    channels: u32,
    running: &AtomicBool,
    events: &dyn EventSink,
) -> Result<(), CoreError> {
    // ── Header phase ─────────────────────────────────────────────
    let codec_id = read_u32_be(source)?;

    match codec_id {
        AUDIO_DISABLED => {
            info!("audio disabled by server");
            events.on_event(Event::AudioDisabled);
            return Ok(());
        }
        AUDIO_CONFIG_ERROR => {
            events.on_event(Event::Error("audio configuration failed on device".into()));
            return Ok(());
        }
        _ => {}
    }

    let audio_codec = AudioCodec::from_id(codec_id).unwrap_or_else(|| {
        warn!("unknown audio codec id 0x{codec_id:08x}, assuming opus");
        AudioCodec::Opus
    });
    info!(
        codec = audio_codec.name(),
        sample_rate, channels, "audio stream configured"
    );

    decoder.init(&CodecConfig::Audio {
        codec: audio_codec,
        sample_rate,
        channels,
    })?;
    decoder.start()?;

    // ── Frame phase ──────────────────────────────────────────────
    let mut frame = Vec::new();

    while running.load(Ordering::Acquire) {
        let raw_pts = read_u64_be(source)?;
        let frame_size = read_u32_be(source)? as usize;

        if frame_size == 0 || frame_size > MAX_FRAME_SIZE {
            return Err(CoreError::Protocol(format!(
                "invalid audio frame size {frame_size}"
            )));
        }

        frame.resize(frame_size, 0);
        source.read_exact(&mut frame)?;

        if codec::is_config_packet(raw_pts) {
            debug!(bytes = frame_size, "audio codec config packet");
        }

        let pts = codec::pts_value(raw_pts);
        submit_frame(decoder, &[&frame], pts, 0, SubmitPolicy::Audio, running)?;
    }

    debug!("audio task stopping");
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
