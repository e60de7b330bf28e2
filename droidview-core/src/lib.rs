//! droidview-core — the native core of a mobile screen-mirroring
//! client.
//!
//! Speaks the ADB wire protocol over TCP (session multiplexing, RSA
//! challenge/response authentication), parses the scrcpy v2 media
//! framing, and hands compressed frames to pluggable decoders with
//! per-stream backpressure.
//!
//! ```text
//! TCP ─► AdbSession ─► ring buffers ─► framer tasks ─► Decoder port
//!                 ◄─── sender queue ◄── send_control ◄── application
//! ```

pub mod adb;
pub mod api;
pub mod decoder;
pub mod error;
pub mod events;
pub mod scrcpy;
pub mod testing;

pub use adb::channel::TcpChannel;
pub use adb::keys::AdbKeyPair;
pub use adb::session::{AdbSession, WaitAuthCallback};
pub use api::{Bridge, KeyPaths, SessionId};
pub use decoder::{CodecConfig, Decoder, InputBuffer, BUFFER_FLAG_CODEC_DATA};
pub use error::CoreError;
pub use events::{Event, EventSink, StreamKind, VideoConfig};
pub use scrcpy::codec::{AudioCodec, VideoCodec};
pub use scrcpy::input::{ControlMessage, KeyAction, Position, TouchAction};
pub use scrcpy::manager::{StreamConfig, StreamManager};
