//! The control-feedback framer task.
//!
//! Parses device-originated control messages. Only the clipboard
//! carries data the application wants; acknowledgement and UHID
//! output messages are consumed to keep the stream in sync, and
//! unknown message types are skipped so newer servers do not kill
//! the stream.
//!
//! This task never writes: outbound control events (touch, keys,
//! clipboard set) go straight from the application to the control
//! stream via `send_control`.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::{read_u16_be, read_u32_be, read_u64_be, read_u8, FrameSource};
use crate::error::CoreError;
use crate::events::{Event, EventSink};

/// Device message types.
const MSG_CLIPBOARD: u8 = 0;
const MSG_ACK_CLIPBOARD: u8 = 1;
const MSG_UHID_OUTPUT: u8 = 2;

/// Ceiling on device clipboard text we accept.
const MAX_CLIPBOARD_LEN: usize = 100_000;

/// Run the control-feedback stream until it closes or the task is
/// stopped.
pub fn run_control_stream(
    source: &mut impl FrameSource,
    running: &AtomicBool,
    events: &dyn EventSink,
) -> Result<(), CoreError> {
    while running.load(Ordering::Acquire) {
        let message_type = read_u8(source)?;

        match message_type {
            MSG_CLIPBOARD => {
                let len = read_u32_be(source)? as usize;
                if len == 0 {
                    continue;
                }
                if len > MAX_CLIPBOARD_LEN {
                    // A length this large means the framing can't be
                    // trusted any more.
                    return Err(CoreError::Protocol(format!(
                        "clipboard length {len} out of range"
                    )));
                }
                let mut text = vec![0u8; len];
                source.read_exact(&mut text)?;
                debug!(bytes = len, "device clipboard received");
                events.on_event(Event::Clipboard(
                    String::from_utf8_lossy(&text).into_owned(),
                ));
            }
            MSG_ACK_CLIPBOARD => {
                let _sequence = read_u64_be(source)?;
            }
            MSG_UHID_OUTPUT => {
                let _uhid_id = read_u16_be(source)?;
                let len = read_u16_be(source)? as usize;
                if len > 0 {
                    let mut discard = vec![0u8; len];
                    source.read_exact(&mut discard)?;
                }
            }
            other => {
                // Forward compatibility: newer servers may add types.
                warn!("unknown device message type {other}, skipping");
            }
        }
    }

    debug!("control task stopping");
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────
