//! The decoder capability port.
//!
//! The core never links a platform codec SDK; it drives whatever the
//! application hands it through the [`Decoder`] trait. The calling
//! convention mirrors hardware codec APIs: borrow an input buffer
//! from the decoder's pool, fill it in place, submit it back with
//! `{pts, size, flags}`. Output draining and rendering stay entirely
//! on the decoder's side of the boundary.
//!
//! A decoder is only ever driven by one framer thread, so the trait
//! requires `Send` but not `Sync`, and at most one
//! `acquire_input`/`submit_input` pair is in flight per stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::error::CoreError;
use crate::scrcpy::codec::{AudioCodec, VideoCodec};

// ── Flags ────────────────────────────────────────────────────────

/// Input buffer carries codec-specific data (SPS/PPS/VPS) rather
/// than a frame. The only flag meaningful at this boundary.
pub const BUFFER_FLAG_CODEC_DATA: u32 = 8;

// ── Configuration ────────────────────────────────────────────────

/// Parameters handed to [`Decoder::init`].
#[derive(Debug, Clone)]
pub enum CodecConfig {
    Video {
        codec: VideoCodec,
        width: u32,
        height: u32,
        /// Opaque platform render-target token, passed through
        /// untouched.
        surface: String,
    },
    Audio {
        codec: AudioCodec,
        sample_rate: u32,
        channels: u32,
    },
}

// ── InputBuffer ──────────────────────────────────────────────────

/// A borrowed slot in the decoder's input pool.
#[derive(Debug)]
pub struct InputBuffer {
    /// Pool index; echoed back in `submit_input`.
    pub index: u32,
    /// Writable bytes behind this slot.
    pub capacity: usize,
}

// ── Decoder ──────────────────────────────────────────────────────

/// A platform video or audio decoder.
pub trait Decoder: Send {
    /// Configure the codec. Must be called before `start`.
    fn init(&mut self, config: &CodecConfig) -> Result<(), CoreError>;

    /// Begin decoding; the input pool becomes available.
    fn start(&mut self) -> Result<(), CoreError>;

    /// Borrow a free input buffer, waiting up to `timeout`.
    ///
    /// Fails with [`CoreError::WouldBlock`] when the pool stays
    /// empty; anything else is [`CoreError::DecoderFatal`].
    fn acquire_input(&mut self, timeout: Duration) -> Result<InputBuffer, CoreError>;

    /// The writable memory behind an acquired buffer.
    fn input_data(&mut self, buffer: &InputBuffer) -> &mut [u8];

    /// Hand a filled buffer to the codec.
    fn submit_input(
        &mut self,
        buffer: InputBuffer,
        pts: i64,
        size: usize,
        flags: u32,
    ) -> Result<(), CoreError>;

    /// Stop decoding. Idempotent, never fails.
    fn stop(&mut self);

    /// Free all codec resources. Idempotent, never fails.
    fn release(&mut self);
}

// ── Backpressure submit helper ───────────────────────────────────

/// How long a frame may wait for an input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitPolicy {
    /// Bounded: retry ~5 s, then drop the frame. One lost video
    /// frame beats stalling the whole session.
    Video,
    /// Unbounded: audio frames are never dropped here, but the stall
    /// is logged periodically.
    Audio,
}

const ACQUIRE_SLICE: Duration = Duration::from_millis(10);
const VIDEO_ACQUIRE_ATTEMPTS: u32 = 500;
const AUDIO_LOG_EVERY: u32 = 500;

/// Acquire → fill → submit, with the per-stream backpressure policy.
///
/// `parts` are concatenated into the acquired buffer, which is how a
/// held configuration packet rides in front of its frame without an
/// intermediate allocation. Returns `Ok(true)` when the frame was
/// submitted, `Ok(false)` when it was dropped (pool exhausted,
/// undersized buffer) or the task is shutting down.
pub(crate) fn submit_frame(
    decoder: &mut dyn Decoder,
    parts: &[&[u8]],
    pts: i64,
    flags: u32,
    policy: SubmitPolicy,
    running: &AtomicBool,
) -> Result<bool, CoreError> {
    let total: usize = parts.iter().map(|part| part.len()).sum();

    let mut attempts = 0u32;
    let buffer = loop {
        if !running.load(Ordering::Acquire) {
            return Ok(false);
        }
        match decoder.acquire_input(ACQUIRE_SLICE) {
            Ok(buffer) => break buffer,
            Err(CoreError::WouldBlock) => {
                attempts += 1;
                match policy {
                    SubmitPolicy::Video => {
                        if attempts >= VIDEO_ACQUIRE_ATTEMPTS {
                            warn!(
                                attempts,
                                bytes = total,
                                "decoder input pool exhausted, dropping frame"
                            );
                            return Ok(false);
                        }
                    }
                    SubmitPolicy::Audio => {
                        if attempts % AUDIO_LOG_EVERY == 0 {
                            warn!(attempts, "audio decoder input pool still empty");
                        }
                    }
                }
            }
            Err(e) => return Err(e),
        }
    };

    if buffer.capacity < total {
        warn!(
            capacity = buffer.capacity,
            needed = total,
            "decoder input buffer too small, dropping frame"
        );
        return Ok(false);
    }

    let data = decoder.input_data(&buffer);
    let mut offset = 0;
    for part in parts {
        data[offset..offset + part.len()].copy_from_slice(part);
        offset += part.len();
    }

    decoder.submit_input(buffer, pts, total, flags)?;
    Ok(true)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingDecoder;

    #[test]
    fn scatter_parts_land_contiguously() {
        let mut decoder = RecordingDecoder::with_pool(4, 4096);
        let running = AtomicBool::new(true);

        let submitted = submit_frame(
            &mut decoder,
            &[b"abc", b"defg"],
            42,
            0,
            SubmitPolicy::Video,
            &running,
        )
        .unwrap();
        assert!(submitted);

        let frames = decoder.submitted();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, b"abcdefg");
        assert_eq!(frames[0].pts, 42);
    }

    #[test]
    fn video_policy_drops_when_pool_stays_empty() {
        let mut decoder = RecordingDecoder::with_pool(0, 4096);
        let running = AtomicBool::new(true);

        let submitted = submit_frame(
            &mut decoder,
            &[b"frame"],
            0,
            0,
            SubmitPolicy::Video,
            &running,
        )
        .unwrap();
        assert!(!submitted, "frame should be dropped, not submitted");
        assert!(decoder.submitted().is_empty());
        assert!(decoder.acquire_attempts() >= VIDEO_ACQUIRE_ATTEMPTS as u64);
    }

    #[test]
    fn stop_flag_aborts_retry_loop() {
        let mut decoder = RecordingDecoder::with_pool(0, 4096);
        let running = AtomicBool::new(false);

        let submitted = submit_frame(
            &mut decoder,
            &[b"frame"],
            0,
            0,
            SubmitPolicy::Audio,
            &running,
        )
        .unwrap();
        assert!(!submitted);
    }

    #[test]
    fn undersized_buffer_drops_frame() {
        let mut decoder = RecordingDecoder::with_pool(4, 8);
        let running = AtomicBool::new(true);

        let submitted = submit_frame(
            &mut decoder,
            &[&[0u8; 64]],
            0,
            0,
            SubmitPolicy::Video,
            &running,
        )
        .unwrap();
        assert!(!submitted);
    }
}
