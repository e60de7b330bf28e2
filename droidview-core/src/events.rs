//! String-tagged events emitted to the embedding application.
//!
//! Events carry a UTF-8 payload; structured payloads are JSON with
//! stable field names so non-Rust hosts can parse them without
//! sharing types.

use serde::Serialize;

// ── StreamKind ───────────────────────────────────────────────────

/// Which media stream an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Control,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Control => "control",
        }
    }
}

// ── VideoConfig ──────────────────────────────────────────────────

/// Payload of the `video_config` event.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    pub codec_id: u32,
    pub codec_type: String,
    pub width: u32,
    pub height: u32,
    pub device_name: String,
}

// ── Event ────────────────────────────────────────────────────────

/// Everything the core reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Video stream header parsed; decoder is being configured.
    VideoConfig(VideoConfig),
    /// The server disabled audio capture.
    AudioDisabled,
    /// First video frame reached the decoder.
    FirstFrame,
    /// Device clipboard content.
    Clipboard(String),
    /// A media stream terminated ("video" / "audio" / "control").
    Disconnected(StreamKind),
    /// Human-readable failure description.
    Error(String),
}

impl Event {
    /// The stable string tag of this event.
    pub fn tag(&self) -> &'static str {
        match self {
            Event::VideoConfig(_) => "video_config",
            Event::AudioDisabled => "audio_disabled",
            Event::FirstFrame => "first_frame",
            Event::Clipboard(_) => "clipboard",
            Event::Disconnected(_) => "disconnected",
            Event::Error(_) => "error",
        }
    }

    /// The UTF-8 payload (JSON for structured events, empty where
    /// the tag alone carries the meaning).
    pub fn payload(&self) -> String {
        match self {
            Event::VideoConfig(config) => serde_json::to_string(config).unwrap_or_default(),
            Event::AudioDisabled | Event::FirstFrame => String::new(),
            Event::Clipboard(text) => text.clone(),
            Event::Disconnected(kind) => kind.as_str().to_string(),
            Event::Error(message) => message.clone(),
        }
    }
}

// ── EventSink ────────────────────────────────────────────────────

/// Receives events from the stream tasks. Implementations must be
/// cheap and non-blocking; they are called from the framer threads.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: Event);
}

impl<F> EventSink for F
where
    F: Fn(Event) + Send + Sync,
{
    fn on_event(&self, event: Event) {
        self(event)
    }
}

// ── Tests ────────────────────────────────────────────────────────
