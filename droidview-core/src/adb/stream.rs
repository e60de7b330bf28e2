//! Per-stream bookkeeping for one multiplexed ADB channel.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;

use super::ring::{self, RingHandle, RingReader, RingWriter};

/// Default receive-queue capacity per stream. 16 MiB gives roughly
/// 320 ms of headroom at 50 MiB/s video.
pub const STREAM_BUFFER_CAPACITY: usize = 16 * 1024 * 1024;

// ── AdbStream ────────────────────────────────────────────────────

/// One logical stream inside an ADB session.
///
/// `local_id` is chosen by this endpoint and unique among open
/// streams; its sign bit doubles as the "multi-send allowed" marker
/// (negative = single-send). `remote_id` is assigned by the peer in
/// its first OKAY and stays zero until then.
pub struct AdbStream {
    pub local_id: i32,
    remote_id: AtomicI32,
    /// Set once the peer closes or the owner reaps the stream; never
    /// clears.
    closed: AtomicBool,
    /// Outbound flow-control observability: set on every peer OKAY.
    /// Writers do not block on it.
    can_write: AtomicBool,
    /// Whether we already sent CLSE for this stream.
    clse_sent: AtomicBool,
    /// Producer half, touched only by the session receive loop.
    pub(crate) writer: Mutex<RingWriter>,
    /// Consumer half, shared by API readers.
    pub(crate) reader: Mutex<RingReader>,
    /// Lock-free view for close/len from the registry.
    ring: RingHandle,
}

impl AdbStream {
    pub fn new(local_id: i32, remote_id: i32) -> Self {
        let (writer, reader) = ring::spsc(STREAM_BUFFER_CAPACITY);
        let ring = writer.handle();
        Self {
            local_id,
            remote_id: AtomicI32::new(remote_id),
            closed: AtomicBool::new(false),
            can_write: AtomicBool::new(false),
            clse_sent: AtomicBool::new(false),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            ring,
        }
    }

    /// Streams opened with a positive id may send repeatedly without
    /// waiting for OKAY.
    pub fn multi_send(&self) -> bool {
        self.local_id > 0
    }

    pub fn remote_id(&self) -> i32 {
        self.remote_id.load(Ordering::Acquire)
    }

    pub fn set_remote_id(&self, id: i32) {
        self.remote_id.store(id, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the stream closed and wake any blocked reader.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.ring.close();
    }

    pub fn can_write(&self) -> bool {
        self.can_write.load(Ordering::Acquire)
    }

    pub fn set_can_write(&self) {
        self.can_write.store(true, Ordering::Release);
    }

    /// Returns `true` exactly once — the caller that wins sends CLSE.
    pub fn take_clse_duty(&self) -> bool {
        !self.clse_sent.swap(true, Ordering::AcqRel)
    }

    /// Bytes currently buffered for the reader.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_bit_marks_single_send() {
        let multi = AdbStream::new(5, 0);
        assert!(multi.multi_send());

        let single = AdbStream::new(-5, 0);
        assert!(!single.multi_send());
    }

    #[test]
    fn closed_is_terminal() {
        let stream = AdbStream::new(1, 9);
        assert!(!stream.is_closed());
        stream.mark_closed();
        assert!(stream.is_closed());
        stream.mark_closed();
        assert!(stream.is_closed());
    }

    #[test]
    fn clse_duty_taken_once() {
        let stream = AdbStream::new(1, 9);
        assert!(stream.take_clse_duty());
        assert!(!stream.take_clse_duty());
    }

    #[test]
    fn remote_id_starts_zero() {
        let stream = AdbStream::new(3, 0);
        assert_eq!(stream.remote_id(), 0);
        stream.set_remote_id(12);
        assert_eq!(stream.remote_id(), 12);
    }
}
