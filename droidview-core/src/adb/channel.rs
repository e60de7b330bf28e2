//! Blocking TCP byte channel used by the ADB session.
//!
//! The channel presents exactly the primitives the multiplexer needs:
//! a blocking `write`, a blocking `read_exact` with an optional
//! deadline, and an idempotent `close` that shuts the socket down in
//! both directions so any reader blocked in a syscall returns
//! promptly.
//!
//! Reads go through an internal 64 KiB buffer to coalesce the many
//! small header reads the protocol produces; reads at least as large
//! as the buffer bypass it and land directly in the caller's slice.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::CoreError;

/// Size of the internal read-side coalescing buffer.
const READ_BUFFER_SIZE: usize = 64 * 1024;

// ── TcpChannel ───────────────────────────────────────────────────

/// A byte-stream transport over one TCP connection.
///
/// Reading is exclusive to one thread at a time (the receive loop);
/// writing is serialized by the session's sender thread. `close` may
/// be called from any thread, any number of times.
pub struct TcpChannel {
    stream: TcpStream,
    closed: AtomicBool,
    reader: Mutex<ReadBuffer>,
}

struct ReadBuffer {
    buf: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl ReadBuffer {
    fn available(&self) -> usize {
        self.tail - self.head
    }
}

impl TcpChannel {
    /// Connect to the given endpoint and disable Nagle's algorithm —
    /// header-sized writes must not wait behind payload coalescing.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, CoreError> {
        let stream = TcpStream::connect(addr)?;
        let _ = stream.set_nodelay(true);
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self {
            stream,
            closed: AtomicBool::new(false),
            reader: Mutex::new(ReadBuffer {
                buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
                head: 0,
                tail: 0,
            }),
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write the whole buffer or fail with `TransportBroken`.
    pub fn write(&self, data: &[u8]) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::TransportBroken("write on closed channel"));
        }
        (&self.stream)
            .write_all(data)
            .map_err(|_| CoreError::TransportBroken("write failed"))
    }

    /// Fill `dst` entirely or fail.
    ///
    /// `timeout = None` waits indefinitely. `timeout = Some(ZERO)` is
    /// non-blocking: fails with [`CoreError::WouldBlock`] if the
    /// socket has nothing ready. A read interrupted by `close`
    /// fails with `TransportBroken`.
    pub fn read_exact(&self, dst: &mut [u8], timeout: Option<Duration>) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::TransportBroken("read on closed channel"));
        }

        let mut reader = self.reader.lock().unwrap();

        if timeout == Some(Duration::ZERO) {
            return self.read_nonblocking(&mut reader, dst);
        }

        let start = Instant::now();
        let deadline = timeout.map(|d| start + d);
        let mut offset = 0;

        while offset < dst.len() {
            // 1. Serve from the coalescing buffer.
            let available = reader.available();
            if available > 0 {
                let n = available.min(dst.len() - offset);
                dst[offset..offset + n].copy_from_slice(&reader.buf[reader.head..reader.head + n]);
                reader.head += n;
                offset += n;
                continue;
            }

            // 2. Buffer empty: refill, or bypass for large reads.
            let needed = dst.len() - offset;
            self.arm_deadline(deadline, start)?;
            if needed >= READ_BUFFER_SIZE {
                let n = self.raw_read(&mut dst[offset..], start)?;
                offset += n;
            } else {
                reader.head = 0;
                reader.tail = 0;
                let n = {
                    let buf = &mut reader.buf;
                    self.raw_read(buf, start)?
                };
                reader.tail = n;
            }
        }

        Ok(())
    }

    /// Mark the channel closed and shut the socket down in both
    /// directions, waking any blocked reader or writer. Safe to call
    /// from any thread, more than once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("closing transport channel");
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    /// One read syscall, with error mapping shared by both paths.
    fn raw_read(&self, dst: &mut [u8], started: Instant) -> Result<usize, CoreError> {
        match (&self.stream).read(dst) {
            Ok(0) => Err(CoreError::TransportBroken("peer closed connection")),
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(CoreError::Timeout {
                    phase: "read",
                    elapsed: started.elapsed(),
                })
            }
            Err(_) if self.is_closed() => Err(CoreError::TransportBroken("channel closed")),
            Err(_) => Err(CoreError::TransportBroken("read failed")),
        }
    }

    /// Apply the remaining time budget as the socket read timeout.
    fn arm_deadline(&self, deadline: Option<Instant>, started: Instant) -> Result<(), CoreError> {
        match deadline {
            None => {
                let _ = self.stream.set_read_timeout(None);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(CoreError::Timeout {
                        phase: "read",
                        elapsed: started.elapsed(),
                    });
                }
                let _ = self.stream.set_read_timeout(Some(deadline - now));
            }
        }
        Ok(())
    }

    /// Non-blocking variant: serve buffered bytes, then poll the
    /// socket without waiting.
    fn read_nonblocking(&self, reader: &mut ReadBuffer, dst: &mut [u8]) -> Result<(), CoreError> {
        let mut offset = 0;
        while offset < dst.len() {
            let available = reader.available();
            if available > 0 {
                let n = available.min(dst.len() - offset);
                dst[offset..offset + n].copy_from_slice(&reader.buf[reader.head..reader.head + n]);
                reader.head += n;
                offset += n;
                continue;
            }

            let _ = self.stream.set_nonblocking(true);
            reader.head = 0;
            reader.tail = 0;
            let result = (&self.stream).read(&mut reader.buf);
            let _ = self.stream.set_nonblocking(false);

            match result {
                Ok(0) => return Err(CoreError::TransportBroken("peer closed connection")),
                Ok(n) => reader.tail = n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Err(CoreError::WouldBlock);
                }
                Err(_) => return Err(CoreError::TransportBroken("read failed")),
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
