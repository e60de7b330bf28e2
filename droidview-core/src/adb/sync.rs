//! File push over the ADB `sync:` sub-protocol.
//!
//! Inside a `sync:` stream, requests are 8-byte chunk headers
//! (4 ASCII id bytes + little-endian u32 argument) followed by chunk
//! data:
//!
//! ```text
//! SEND <len>   then "<remote_path>,<mode>"
//! DATA <len>   then <len> file bytes          (repeated)
//! DONE <mtime> file complete, mtime in seconds
//! QUIT 0       end of sync session
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use super::session::AdbSession;
use super::wire::sync_header;
use crate::error::CoreError;

/// Regular file, rw-rw-rw- (0o100666), the mode adbd expects for a
/// plain push.
const PUSH_FILE_MODE: u32 = 33206;

/// File payload per DATA chunk. Stays under the 10 KiB the daemon's
/// sync buffer is sized for, minus the 8-byte chunk header.
const DATA_CHUNK: usize = 10_240 - 8;

/// Push a byte buffer to `remote_path` on the device.
///
/// `progress` is called with a 0–100 percentage each time it
/// advances. Blocks until the daemon acknowledges by closing the
/// stream.
pub fn push_file(
    session: &AdbSession,
    data: &[u8],
    remote_path: &str,
    mut progress: impl FnMut(u32),
) -> Result<(), CoreError> {
    let stream_id = session.open("sync:", true)?;
    debug!(stream_id, remote_path, "sync stream open");

    let result = push_on_stream(session, stream_id, data, remote_path, &mut progress);

    session.wait_stream_closed(stream_id);
    session.close_stream(stream_id);
    result?;
    info!(remote_path, bytes = data.len(), "push complete");
    Ok(())
}

fn push_on_stream(
    session: &AdbSession,
    stream_id: i32,
    data: &[u8],
    remote_path: &str,
    progress: &mut impl FnMut(u32),
) -> Result<(), CoreError> {
    let send_spec = format!("{remote_path},{PUSH_FILE_MODE}");
    session.stream_write(stream_id, &sync_header(b"SEND", send_spec.len() as u32))?;
    session.stream_write(stream_id, send_spec.as_bytes())?;

    let mut sent = 0usize;
    let mut last_percent = 0u32;
    for chunk in data.chunks(DATA_CHUNK) {
        session.stream_write(stream_id, &sync_header(b"DATA", chunk.len() as u32))?;
        session.stream_write(stream_id, chunk)?;

        sent += chunk.len();
        let percent = if data.is_empty() {
            100
        } else {
            (sent * 100 / data.len()) as u32
        };
        if percent != last_percent {
            last_percent = percent;
            progress(percent);
        }
    }

    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    session.stream_write(stream_id, &sync_header(b"DONE", mtime))?;
    session.stream_write(stream_id, &sync_header(b"QUIT", 0))?;
    Ok(())
}
