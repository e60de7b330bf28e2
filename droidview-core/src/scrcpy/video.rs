//! The video framer task.
//!
//! Parses the stream header, configures the decoder, then loops over
//! length-prefixed frames. Configuration packets (SPS/PPS/VPS) are
//! not submitted on their own: the framer holds the latest one and
//! prepends it to the next real frame, because some hardware
//! decoders only accept codec data when it shares an input buffer
//! with the first IDR frame. The combined submission uses the
//! frame's own PTS and leaves the codec-data flag clear.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use super::codec::{self, VideoCodec};
use super::{read_u32_be, read_u64_be, read_u8, FrameSource};
use crate::decoder::{submit_frame, CodecConfig, Decoder, SubmitPolicy};
use crate::error::CoreError;
use crate::events::{Event, EventSink, VideoConfig};

/// Upper bound on a single compressed video frame.
const MAX_FRAME_SIZE: usize = 20 * 1024 * 1024;

/// Fixed width of the NUL-padded device name field.
const DEVICE_NAME_LEN: usize = 64;

/// Run the video stream until it closes, the task is stopped, or an
/// error ends it. The caller emits the terminal `disconnected`
/// event; errors other than [`CoreError::StreamClosed`] are reported
/// by the caller too.
pub fn run_video_stream(
    source: &mut impl FrameSource,
    decoder: &mut dyn Decoder,
    surface: &str,
    running: &AtomicBool,
    events: &dyn EventSink,
) -> Result<(), CoreError> {
    // ── Header phase ─────────────────────────────────────────────
    let _dummy = read_u8(source)?;

    let mut name_bytes = [0u8; DEVICE_NAME_LEN];
    source.read_exact(&mut name_bytes)?;
    let device_name = parse_device_name(&name_bytes);

    let codec_id = read_u32_be(source)?;
    let width = read_u32_be(source)?;
    let height = read_u32_be(source)?;

    let codec = VideoCodec::from_id(codec_id).ok_or_else(|| {
        CoreError::Protocol(format!("unknown video codec id 0x{codec_id:08x}"))
    })?;
    info!(
        codec = codec.name(),
        width, height, device_name, "video stream configured"
    );

    events.on_event(Event::VideoConfig(VideoConfig {
        codec_id,
        codec_type: codec.name().to_string(),
        width,
        height,
        device_name,
    }));

    decoder.init(&CodecConfig::Video {
        codec,
        width,
        height,
        surface: surface.to_string(),
    })?;
    decoder.start()?;

    // ── Frame phase ──────────────────────────────────────────────
    let mut pending_config: Vec<u8> = Vec::new();
    let mut frame = Vec::new();
    let mut frame_count: u64 = 0;
    let mut first_frame_seen = false;

    while running.load(Ordering::Acquire) {
        let raw_pts = read_u64_be(source)?;
        let frame_size = read_u32_be(source)? as usize;

        if frame_size == 0 || frame_size > MAX_FRAME_SIZE {
            return Err(CoreError::Protocol(format!(
                "invalid video frame size {frame_size}"
            )));
        }

        frame.resize(frame_size, 0);
        source.read_exact(&mut frame)?;

        if codec::is_config_packet(raw_pts) {
            // Hold for the next real frame.
            debug!(bytes = frame_size, "codec config packet buffered");
            if !pending_config.is_empty() {
                warn!("replacing unconsumed codec config packet");
            }
            pending_config.clear();
            pending_config.extend_from_slice(&frame);
            continue;
        }

        let pts = codec::pts_value(raw_pts);
        let submitted = if pending_config.is_empty() {
            submit_frame(decoder, &[&frame], pts, 0, SubmitPolicy::Video, running)?
        } else {
            submit_frame(
                decoder,
                &[&pending_config, &frame],
                pts,
                0,
                SubmitPolicy::Video,
                running,
            )?
        };
        pending_config.clear();

        if submitted {
            frame_count += 1;
            if !first_frame_seen {
                first_frame_seen = true;
                info!("first video frame submitted");
                events.on_event(Event::FirstFrame);
            }
        }
    }

    debug!(frame_count, "video task stopping");
    Ok(())
}

/// UTF-8 up to the first NUL of the fixed-width name field.
fn parse_device_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrcpy::feed::ByteFeed;
    use crate::testing::{CollectingSink, RecordingDecoder};

    fn header(device: &str, codec_id: u32, width: u32, height: u32) -> Vec<u8> {
        let mut bytes = vec![0u8]; // dummy
        let mut name = [0u8; DEVICE_NAME_LEN];
        name[..device.len()].copy_from_slice(device.as_bytes());
        bytes.extend_from_slice(&name);
        bytes.extend_from_slice(&codec_id.to_be_bytes());
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes
    }

    fn frame(raw_pts: u64, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&raw_pts.to_be_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn run(
        stream: Vec<u8>,
        decoder: &mut RecordingDecoder,
    ) -> (Result<(), CoreError>, CollectingSink) {
        let mut source = ByteFeed::new(stream);
        let sink = CollectingSink::new();
        let running = AtomicBool::new(true);
        let result = run_video_stream(&mut source, decoder, "surface-1", &running, &sink);
        (result, sink)
    }

    #[test]
    fn header_emits_video_config() {
        let stream = header("Pixel", 0, 1920, 1080);
        let mut decoder = RecordingDecoder::with_pool(4, 1 << 16);
        let (result, sink) = run(stream, &mut decoder);

        // Stream ends right after the header: clean close.
        assert!(matches!(result, Err(CoreError::StreamClosed)));

        let configs = sink.tagged("video_config");
        assert_eq!(configs.len(), 1);
        match &configs[0] {
            Event::VideoConfig(config) => {
                assert_eq!(config.codec_type, "h264");
                assert_eq!(config.width, 1920);
                assert_eq!(config.height, 1080);
                assert_eq!(config.device_name, "Pixel");
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Decoder saw the same parameters plus the surface token.
        match decoder.config() {
            Some(CodecConfig::Video {
                codec,
                width,
                height,
                surface,
            }) => {
                assert_eq!(*codec, VideoCodec::H264);
                assert_eq!((*width, *height), (1920, 1080));
                assert_eq!(surface, "surface-1");
            }
            other => panic!("unexpected decoder config {other:?}"),
        }
        assert!(decoder.started());
    }

    #[test]
    fn unknown_codec_fails_stream() {
        let stream = header("Pixel", 0xBAD0_BAD0, 640, 480);
        let mut decoder = RecordingDecoder::with_pool(4, 1 << 16);
        let (result, sink) = run(stream, &mut decoder);

        assert!(matches!(result, Err(CoreError::Protocol(_))));
        assert!(sink.tagged("video_config").is_empty());
    }

    #[test]
    fn config_packet_merges_into_next_frame() {
        let mut stream = header("Pixel", 0, 1280, 720);
        let sps = vec![0xAAu8; 30];
        let idr = vec![0xBBu8; 1000];
        stream.extend(frame(codec::PACKET_FLAG_CONFIG | 555, &sps));
        stream.extend(frame(777, &idr));

        let mut decoder = RecordingDecoder::with_pool(4, 1 << 16);
        let (result, sink) = run(stream, &mut decoder);
        assert!(matches!(result, Err(CoreError::StreamClosed)));

        // Exactly one submission: config + frame in one buffer, the
        // frame's PTS, codec-data flag clear.
        let submitted = decoder.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].data.len(), 1030);
        assert_eq!(&submitted[0].data[..30], &sps[..]);
        assert_eq!(&submitted[0].data[30..], &idr[..]);
        assert_eq!(submitted[0].pts, 777);
        assert_eq!(submitted[0].flags, 0);

        assert_eq!(sink.tagged("first_frame").len(), 1);
    }

    #[test]
    fn key_frame_bit_masked_off_pts() {
        let mut stream = header("Pixel", 0, 640, 480);
        stream.extend(frame(codec::PACKET_FLAG_KEY_FRAME | 42, &[1, 2, 3]));

        let mut decoder = RecordingDecoder::with_pool(4, 1 << 16);
        let (_, _) = run(stream, &mut decoder);

        assert_eq!(decoder.submitted().len(), 1);
        assert_eq!(decoder.submitted()[0].pts, 42);
    }

    #[test]
    fn zero_and_oversized_frames_are_protocol_errors() {
        for size in [0u32, (MAX_FRAME_SIZE as u32) + 1] {
            let mut stream = header("Pixel", 0, 640, 480);
            stream.extend_from_slice(&100u64.to_be_bytes());
            stream.extend_from_slice(&size.to_be_bytes());

            let mut decoder = RecordingDecoder::with_pool(4, 1 << 16);
            let (result, _) = run(stream, &mut decoder);
            assert!(
                matches!(result, Err(CoreError::Protocol(_))),
                "size {size} should fail the stream"
            );
        }
    }

    #[test]
    fn saturated_pool_drops_frames_and_continues() {
        let mut stream = header("Pixel", 0, 640, 480);
        for i in 0..10u64 {
            stream.extend(frame(i, &[0xCC; 100]));
        }

        // One slot, never recycled: the first frame takes it, the
        // other nine exhaust the retry window and are dropped.
        let mut decoder = RecordingDecoder::with_pool(1, 1 << 16).without_recycling();
        let (result, _) = run(stream, &mut decoder);

        assert!(matches!(result, Err(CoreError::StreamClosed)));
        assert_eq!(decoder.submitted().len(), 1);
        assert!(decoder.acquire_attempts() > 9 * 400);
    }

    #[test]
    fn decoder_init_failure_surfaces() {
        let stream = header("Pixel", 0, 640, 480);
        let mut decoder = RecordingDecoder::failing_init();
        let mut source = ByteFeed::new(stream);
        let sink = CollectingSink::new();
        let running = AtomicBool::new(true);
        let result = run_video_stream(&mut source, &mut decoder, "", &running, &sink);
        assert!(matches!(result, Err(CoreError::DecoderInit(_))));
    }

    #[test]
    fn device_name_parsing() {
        let mut bytes = [0u8; DEVICE_NAME_LEN];
        bytes[..5].copy_from_slice(b"Pixel");
        assert_eq!(parse_device_name(&bytes), "Pixel");

        let full = [b'x'; DEVICE_NAME_LEN];
        assert_eq!(parse_device_name(&full).len(), DEVICE_NAME_LEN);
    }
}
