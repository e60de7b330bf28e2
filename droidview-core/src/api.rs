//! The application-facing surface.
//!
//! [`Bridge`] owns every live session behind typed [`SessionId`]
//! handles, so host-language glue never passes raw pointers or
//! process-global integers around. Decoders cross this boundary as
//! boxed [`Decoder`](crate::decoder::Decoder) trait objects and are
//! given back (released) when their stream stops.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::adb::channel::TcpChannel;
use crate::adb::keys::AdbKeyPair;
use crate::adb::session::{AdbSession, WaitAuthCallback};
use crate::adb::sync;
use crate::decoder::Decoder;
use crate::error::CoreError;
use crate::events::EventSink;
use crate::scrcpy::manager::{StreamConfig, StreamManager};

// ── Handles & key locations ──────────────────────────────────────

/// Opaque handle to an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Where the ADB key pair lives on disk.
#[derive(Debug, Clone)]
pub struct KeyPaths {
    pub public_key: PathBuf,
    pub private_key: PathBuf,
}

impl KeyPaths {
    /// The conventional `adbkey` / `adbkey.pub` pair inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            public_key: dir.join("adbkey.pub"),
            private_key: dir.join("adbkey"),
        }
    }
}

// ── Bridge ───────────────────────────────────────────────────────

struct SessionEntry {
    session: Arc<AdbSession>,
    streams: Option<StreamManager>,
}

/// Registry of live sessions; one per connected device.
#[derive(Default)]
pub struct Bridge {
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_id: AtomicU64,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Session lifecycle ────────────────────────────────────────

    /// Connect to `endpoint` (`"host:port"`), load or generate the
    /// key pair, run the ADB handshake, and register the session.
    ///
    /// `on_wait_auth` fires once if the device asks the user to
    /// confirm our key on screen.
    pub fn session_open(
        &self,
        endpoint: &str,
        keys: &KeyPaths,
        on_wait_auth: Option<WaitAuthCallback>,
    ) -> Result<SessionId, CoreError> {
        let key_pair = AdbKeyPair::load_or_generate(&keys.public_key, &keys.private_key)?;
        let channel = TcpChannel::connect(endpoint)?;
        let session = AdbSession::connect(channel, &key_pair, on_wait_auth)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions.lock().unwrap().insert(
            id,
            SessionEntry {
                session,
                streams: None,
            },
        );
        info!(endpoint, session = id, "session open");
        Ok(SessionId(id))
    }

    /// Stop any running streams and tear the session down.
    /// Idempotent; closing an unknown id is a no-op.
    pub fn session_close(&self, id: SessionId) {
        let entry = self.sessions.lock().unwrap().remove(&id.0);
        if let Some(mut entry) = entry {
            if let Some(mut streams) = entry.streams.take() {
                streams.stop();
            }
            entry.session.close();
            info!(session = id.0, "session closed");
        }
    }

    // ── Streams ──────────────────────────────────────────────────

    /// Open a logical stream; returns its id within the session.
    pub fn stream_open(
        &self,
        id: SessionId,
        destination: &str,
        multi_send: bool,
    ) -> Result<i32, CoreError> {
        self.session(id)?.open(destination, multi_send)
    }

    pub fn stream_read(
        &self,
        id: SessionId,
        stream_id: i32,
        buf: &mut [u8],
        timeout: Option<Duration>,
        exact: bool,
    ) -> Result<usize, CoreError> {
        self.session(id)?.stream_read(stream_id, buf, timeout, exact)
    }

    pub fn stream_write(
        &self,
        id: SessionId,
        stream_id: i32,
        data: &[u8],
    ) -> Result<(), CoreError> {
        self.session(id)?.stream_write(stream_id, data)
    }

    pub fn stream_close(&self, id: SessionId, stream_id: i32) -> Result<(), CoreError> {
        self.session(id)?.close_stream(stream_id);
        Ok(())
    }

    // ── Media streams ────────────────────────────────────────────

    /// Start the scrcpy framer tasks over already-open streams.
    /// Replaces (stopping) any previous set for the session.
    pub fn start_streams(
        &self,
        id: SessionId,
        config: StreamConfig,
        video_decoder: Option<Box<dyn Decoder>>,
        audio_decoder: Option<Box<dyn Decoder>>,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), CoreError> {
        // Stop a previous manager outside the registry lock; its
        // join must not block other bridge calls.
        let (session, previous) = {
            let mut sessions = self.sessions.lock().unwrap();
            let entry = sessions
                .get_mut(&id.0)
                .ok_or(CoreError::UnknownSession(id.0))?;
            (Arc::clone(&entry.session), entry.streams.take())
        };
        if let Some(mut previous) = previous {
            previous.stop();
        }

        let manager = StreamManager::start(session, config, video_decoder, audio_decoder, sink)?;

        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions
            .get_mut(&id.0)
            .ok_or(CoreError::UnknownSession(id.0))?;
        entry.streams = Some(manager);
        Ok(())
    }

    /// Stop the framer tasks, leaving the session usable.
    pub fn stop_streams(&self, id: SessionId) -> Result<(), CoreError> {
        let manager = {
            let mut sessions = self.sessions.lock().unwrap();
            let entry = sessions
                .get_mut(&id.0)
                .ok_or(CoreError::UnknownSession(id.0))?;
            entry.streams.take()
        };
        if let Some(mut manager) = manager {
            manager.stop();
        }
        Ok(())
    }

    /// Forward encoded control events (keys, touches) to the device.
    pub fn send_control(&self, id: SessionId, data: &[u8]) -> Result<(), CoreError> {
        let sessions = self.sessions.lock().unwrap();
        let entry = sessions.get(&id.0).ok_or(CoreError::UnknownSession(id.0))?;
        match &entry.streams {
            Some(manager) => manager.send_control(data),
            None => Err(CoreError::UnknownStream(0)),
        }
    }

    // ── Device helpers ───────────────────────────────────────────

    /// Run a one-shot shell command, returning its output.
    pub fn shell_command(&self, id: SessionId, command: &str) -> Result<String, CoreError> {
        self.session(id)?.shell_command(command)
    }

    /// Switch adbd to TCP listening mode.
    pub fn tcpip_restart(&self, id: SessionId, port: u16) -> Result<String, CoreError> {
        self.session(id)?.tcpip_restart(port)
    }

    /// Open a forward to a device TCP port.
    pub fn tcp_forward(&self, id: SessionId, port: u16) -> Result<i32, CoreError> {
        self.session(id)?.tcp_forward(port)
    }

    /// Open a forward to a device abstract unix socket.
    pub fn local_socket_forward(&self, id: SessionId, name: &str) -> Result<i32, CoreError> {
        self.session(id)?.local_socket_forward(name)
    }

    /// Push a file to the device over `sync:`.
    pub fn push_file(
        &self,
        id: SessionId,
        data: &[u8],
        remote_path: &str,
        progress: impl FnMut(u32),
    ) -> Result<(), CoreError> {
        sync::push_file(&*self.session(id)?, data, remote_path, progress)
    }

    // ── Internal ─────────────────────────────────────────────────

    fn session(&self, id: SessionId) -> Result<Arc<AdbSession>, CoreError> {
        self.sessions
            .lock()
            .unwrap()
            .get(&id.0)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or(CoreError::UnknownSession(id.0))
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let entries: Vec<SessionEntry> = self.sessions.lock().unwrap().drain().map(|(_, e)| e).collect();
        for mut entry in entries {
            if let Some(mut streams) = entry.streams.take() {
                streams.stop();
            }
            entry.session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_errors() {
        let bridge = Bridge::new();
        let bogus = SessionId(99);
        assert!(matches!(
            bridge.stream_open(bogus, "shell:", true),
            Err(CoreError::UnknownSession(99))
        ));
        assert!(matches!(
            bridge.stop_streams(bogus),
            Err(CoreError::UnknownSession(99))
        ));
        // Closing an unknown session is a quiet no-op.
        bridge.session_close(bogus);
    }

    #[test]
    fn key_paths_in_dir() {
        let paths = KeyPaths::in_dir(Path::new("/tmp/keys"));
        assert!(paths.public_key.ends_with("adbkey.pub"));
        assert!(paths.private_key.ends_with("adbkey"));
    }
}
