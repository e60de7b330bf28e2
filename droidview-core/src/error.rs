//! Domain-specific error types for the droidview core.
//!
//! All fallible operations return `Result<T, CoreError>`.
//! No panics on invalid input — every error is typed and recoverable,
//! and callers can pattern-match on the kind to decide whether the
//! session, a single stream, or only the current frame is affected.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the droidview core.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport errors ─────────────────────────────────────────
    /// The socket was closed unexpectedly or a read/write failed.
    /// Fatal to the session.
    #[error("transport broken: {0}")]
    TransportBroken(&'static str),

    /// A non-blocking operation found no data ready.
    #[error("operation would block")]
    WouldBlock,

    /// A bounded wait elapsed. The string names the phase.
    #[error("timeout during {phase} after {elapsed:?}")]
    Timeout {
        phase: &'static str,
        elapsed: Duration,
    },

    /// The underlying I/O layer reported an error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // ── Stream errors ────────────────────────────────────────────
    /// The logical stream was closed locally or by the peer.
    /// Surfaced to readers as a clean end-of-stream.
    #[error("stream closed")]
    StreamClosed,

    /// No stream with the given id is registered on the session.
    #[error("unknown stream id {0}")]
    UnknownStream(i32),

    /// The peer closed the stream immediately after it was opened.
    #[error("stream refused: {0}")]
    StreamRefused(String),

    // ── Protocol errors ──────────────────────────────────────────
    /// The peer violated the wire protocol (oversized frame, bad
    /// codec id, unexpected command). Fatal to the owning stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer returned something other than CNXN after the
    /// public key was sent. Fatal to the session.
    #[error("authentication rejected: {0}")]
    AuthFailed(String),

    /// Key generation, loading, or signing failed.
    #[error("key error: {0}")]
    Key(String),

    // ── Decoder errors ───────────────────────────────────────────
    /// The platform decoder could not be configured.
    #[error("decoder init failed: {0}")]
    DecoderInit(String),

    /// The platform decoder failed after start. The owning media
    /// stream terminates; the session continues.
    #[error("decoder failure: {0}")]
    DecoderFatal(String),

    /// The decoder's input pool stayed empty past the retry window.
    /// Not fatal; the offending frame is dropped.
    #[error("decoder input pool exhausted")]
    BufferPoolExhausted,

    // ── Surface errors ───────────────────────────────────────────
    /// No session with the given id is registered on the bridge.
    #[error("unknown session id {0}")]
    UnknownSession(u64),
}

impl CoreError {
    /// Whether this error tears down the whole session rather than
    /// just the stream or frame it was raised on.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::TransportBroken(_) | CoreError::AuthFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let e = CoreError::Timeout {
            phase: "connect",
            elapsed: Duration::from_secs(10),
        };
        assert!(e.to_string().contains("connect"));

        let e = CoreError::UnknownStream(42);
        assert!(e.to_string().contains("42"));
    }

    #[test]
    fn session_fatal_classification() {
        assert!(CoreError::TransportBroken("peer closed").is_session_fatal());
        assert!(CoreError::AuthFailed("no CNXN".into()).is_session_fatal());
        assert!(!CoreError::StreamClosed.is_session_fatal());
        assert!(!CoreError::BufferPoolExhausted.is_session_fatal());
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: CoreError = io_err.into();
        assert!(matches!(e, CoreError::Io(_)));
    }
}
