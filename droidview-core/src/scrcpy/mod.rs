//! scrcpy v2 stream layer.
//!
//! Three independent framer tasks — video, audio, control — each
//! parse one ADB stream's byte sequence:
//!
//! ```text
//! video:   dummy(1) ‖ device_name(64) ‖ codec(4) ‖ w(4) ‖ h(4)
//!          then repeating  pts(8) ‖ size(4) ‖ data(size)
//! audio:   codec(4)  [0 = disabled, 1 = error]
//!          then repeating  pts(8) ‖ size(4) ‖ data(size)
//! control: device messages (clipboard, clipboard ack, UHID output)
//! ```
//!
//! Multi-byte integers in this layer are big-endian, unlike the ADB
//! framing underneath. [`manager::StreamManager`] owns the task
//! threads and the decoders.

pub mod audio;
pub mod codec;
pub mod control;
pub mod input;
pub mod manager;
pub mod video;

use std::sync::Arc;

use crate::adb::session::AdbSession;
use crate::error::CoreError;

// ── FrameSource ──────────────────────────────────────────────────

/// Blocking byte source a framer task reads from.
///
/// The production implementation is [`StreamReader`]; tests feed
/// canned bytes instead.
pub trait FrameSource {
    /// Fill `buf` completely or fail; [`CoreError::StreamClosed`]
    /// signals a clean end of stream.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), CoreError>;
}

/// Reads one logical stream of an [`AdbSession`].
pub struct StreamReader {
    session: Arc<AdbSession>,
    stream_id: i32,
}

impl StreamReader {
    pub fn new(session: Arc<AdbSession>, stream_id: i32) -> Self {
        Self { session, stream_id }
    }
}

impl FrameSource for StreamReader {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), CoreError> {
        self.session
            .stream_read(self.stream_id, buf, None, true)
            .map(|_| ())
    }
}

// ── Read helpers ─────────────────────────────────────────────────

pub(crate) fn read_u8(source: &mut impl FrameSource) -> Result<u8, CoreError> {
    let mut buf = [0u8; 1];
    source.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16_be(source: &mut impl FrameSource) -> Result<u16, CoreError> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

pub(crate) fn read_u32_be(source: &mut impl FrameSource) -> Result<u32, CoreError> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn read_u64_be(source: &mut impl FrameSource) -> Result<u64, CoreError> {
    let mut buf = [0u8; 8];
    source.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

// ── Test sources ─────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod feed {
    use super::FrameSource;
    use crate::error::CoreError;

    /// Canned bytes; reads past the end yield `StreamClosed`.
    pub struct ByteFeed {
        data: Vec<u8>,
        position: usize,
    }

    impl ByteFeed {
        pub fn new(data: Vec<u8>) -> Self {
            Self { data, position: 0 }
        }
    }

    impl FrameSource for ByteFeed {
        fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), CoreError> {
            if self.position + buf.len() > self.data.len() {
                return Err(CoreError::StreamClosed);
            }
            buf.copy_from_slice(&self.data[self.position..self.position + buf.len()]);
            self.position += buf.len();
            Ok(())
        }
    }
}
