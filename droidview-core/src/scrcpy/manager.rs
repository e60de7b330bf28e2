//! Stream lifecycle orchestration.
//!
//! [`StreamManager`] spawns one thread per configured media stream
//! (video, audio, control-feedback), owns the decoders for the
//! duration, and fans events out to the application's sink. The
//! tasks catch their own errors — a dead decoder or a protocol
//! violation ends one stream and never tears down the ADB session.
//!
//! [`stop`](StreamManager::stop) closes the three streams first,
//! which wakes any framer blocked on its ring buffer, then joins the
//! threads; shutdown latency is bounded by one decoder retry slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use super::audio::run_audio_stream;
use super::control::run_control_stream;
use super::input::ControlMessage;
use super::video::run_video_stream;
use super::StreamReader;
use crate::adb::session::AdbSession;
use crate::decoder::Decoder;
use crate::error::CoreError;
use crate::events::{Event, EventSink, StreamKind};

// ── StreamConfig ─────────────────────────────────────────────────

/// Which streams to run and with what parameters.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream id carrying scrcpy video, if any.
    pub video_stream: Option<i32>,
    /// Stream id carrying scrcpy audio, if any.
    pub audio_stream: Option<i32>,
    /// Stream id carrying device control feedback, if any.
    pub control_stream: Option<i32>,
    /// Opaque render-target token handed to the video decoder.
    pub surface: String,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            video_stream: None,
            audio_stream: None,
            control_stream: None,
            surface: String::new(),
            audio_sample_rate: 48_000,
            audio_channels: 2,
        }
    }
}

// ── StreamManager ────────────────────────────────────────────────

struct Shared {
    running: AtomicBool,
    session: Arc<AdbSession>,
    sink: Arc<dyn EventSink>,
    /// A session-fatal failure is reported as a single terminal
    /// `error` event even though every framer observes it.
    fatal_reported: AtomicBool,
}

/// Running media streams for one session.
pub struct StreamManager {
    config: StreamConfig,
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl StreamManager {
    /// Spawn framer threads for every stream named in `config`.
    /// Decoders are owned by their framer thread until `stop`.
    pub fn start(
        session: Arc<AdbSession>,
        config: StreamConfig,
        video_decoder: Option<Box<dyn Decoder>>,
        audio_decoder: Option<Box<dyn Decoder>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, CoreError> {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            session: Arc::clone(&session),
            sink,
            fatal_reported: AtomicBool::new(false),
        });
        let mut workers = Vec::new();

        if let Some(stream_id) = config.video_stream {
            let mut decoder = video_decoder.ok_or_else(|| {
                CoreError::DecoderInit("video stream configured without a decoder".into())
            })?;
            let shared = Arc::clone(&shared);
            let surface = config.surface.clone();
            workers.push(thread::Builder::new().name("scrcpy-video".into()).spawn(
                move || {
                    let mut source = StreamReader::new(Arc::clone(&shared.session), stream_id);
                    let result = run_video_stream(
                        &mut source,
                        decoder.as_mut(),
                        &surface,
                        &shared.running,
                        shared.sink.as_ref(),
                    );
                    decoder.stop();
                    decoder.release();
                    finish_task(&shared, StreamKind::Video, result);
                },
            )?);
        }

        if let Some(stream_id) = config.audio_stream {
            let mut decoder = audio_decoder.ok_or_else(|| {
                CoreError::DecoderInit("audio stream configured without a decoder".into())
            })?;
            let shared = Arc::clone(&shared);
            let (sample_rate, channels) = (config.audio_sample_rate, config.audio_channels);
            workers.push(thread::Builder::new().name("scrcpy-audio".into()).spawn(
                move || {
                    let mut source = StreamReader::new(Arc::clone(&shared.session), stream_id);
                    let result = run_audio_stream(
                        &mut source,
                        decoder.as_mut(),
                        sample_rate,
                        channels,
                        &shared.running,
                        shared.sink.as_ref(),
                    );
                    decoder.stop();
                    decoder.release();
                    finish_task(&shared, StreamKind::Audio, result);
                },
            )?);
        }

        if let Some(stream_id) = config.control_stream {
            let shared = Arc::clone(&shared);
            workers.push(thread::Builder::new().name("scrcpy-control".into()).spawn(
                move || {
                    let mut source = StreamReader::new(Arc::clone(&shared.session), stream_id);
                    let result =
                        run_control_stream(&mut source, &shared.running, shared.sink.as_ref());
                    finish_task(&shared, StreamKind::Control, result);
                },
            )?);
        }

        info!(
            video = ?config.video_stream,
            audio = ?config.audio_stream,
            control = ?config.control_stream,
            "stream manager started"
        );
        Ok(Self {
            config,
            shared,
            workers,
        })
    }

    /// Pass application control bytes (key, touch, scroll events,
    /// already encoded) through to the device.
    pub fn send_control(&self, data: &[u8]) -> Result<(), CoreError> {
        let stream_id = self
            .config
            .control_stream
            .ok_or(CoreError::UnknownStream(0))?;
        self.shared.session.stream_write(stream_id, data)
    }

    /// Encode and send one typed control message.
    pub fn send_message(&self, message: &ControlMessage) -> Result<(), CoreError> {
        self.send_control(&message.to_bytes())
    }

    /// Whether any framer is still running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop all framers and join their threads. Each started stream
    /// emits exactly one `disconnected` event on the way out.
    /// Idempotent.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("stopping stream manager");

        // Closing the streams wakes framers blocked on their ring
        // buffers; the flag handles ones inside a decoder retry loop.
        for stream_id in [
            self.config.video_stream,
            self.config.audio_stream,
            self.config.control_stream,
        ]
        .into_iter()
        .flatten()
        {
            self.shared.session.close_stream(stream_id);
        }

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Shared task epilogue: translate the task's exit into events.
///
/// `StreamClosed` while we are still supposed to be running means
/// the stream died under the task — if the whole session is gone
/// that is the session-fatal case, reported once; an isolated stream
/// closure is already a clean shutdown from this layer's view.
fn finish_task(shared: &Shared, kind: StreamKind, result: Result<(), CoreError>) {
    let running = shared.running.load(Ordering::Acquire);
    match result {
        Ok(()) => {}
        Err(CoreError::StreamClosed) => {
            if running
                && shared.session.is_closed()
                && !shared.fatal_reported.swap(true, Ordering::AcqRel)
            {
                shared
                    .sink
                    .on_event(Event::Error("connection to device lost".into()));
            }
        }
        Err(e) => {
            warn!(stream = kind.as_str(), "stream task failed: {e}");
            if running {
                shared.sink.on_event(Event::Error(format!(
                    "{} stream error: {e}",
                    kind.as_str()
                )));
            }
        }
    }
    shared.sink.on_event(Event::Disconnected(kind));
}
