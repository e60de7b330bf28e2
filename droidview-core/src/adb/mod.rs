//! ADB client session layer.
//!
//! Speaks the ADB wire protocol over a byte transport and presents
//! multiplexed logical streams to the rest of the core.
//!
//! ```text
//!            ┌────────────────────── AdbSession ─────────────────────┐
//!  TCP ──►   │ recv loop ──► per-stream ring buffers ──► stream_read │
//!  TCP ◄──   │ sender    ◄── bounded frame queue     ◄── stream_write│
//!            └───────────────────────────────────────────────────────┘
//! ```
//!
//! The handshake (CNXN + RSA challenge/response) lives in
//! [`session`]; key material in [`keys`]; the fixed 24-byte framing
//! in [`wire`].

pub mod channel;
pub mod keys;
pub mod ring;
pub mod session;
pub mod stream;
pub mod sync;
pub mod wire;

pub use channel::TcpChannel;
pub use keys::AdbKeyPair;
pub use session::{AdbSession, WaitAuthCallback};
