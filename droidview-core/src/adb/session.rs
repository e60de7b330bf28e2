//! The ADB session multiplexer.
//!
//! One session owns the transport and exactly two worker threads:
//!
//! - the **receive loop** reads one frame at a time and routes WRTE
//!   payloads straight into the destination stream's ring buffer
//!   (at most two contiguous copies, no intermediate allocation);
//! - the **sender** drains a bounded queue of encoded frames in FIFO
//!   order, so writes from any thread never interleave.
//!
//! Streams are multiplexed the ADB way: OPEN/OKAY establishes
//! a pair of ids, WRTE carries data, CLSE tears down. Outbound flow
//! control is deliberately relaxed: the canonical protocol wants one
//! WRTE per OKAY, but this implementation never blocks on OKAY —
//! received OKAYs only update the stream's `can_write` marker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::channel::TcpChannel;
use super::keys::AdbKeyPair;
use super::stream::AdbStream;
use super::wire::{
    self, AdbCommand, AdbHeader, AdbMessage, AUTH_TYPE_RSA_PUBLIC, AUTH_TYPE_SIGNATURE,
    CONNECT_MAX_DATA, HEADER_LENGTH,
};
use crate::error::CoreError;

// ── Constants ────────────────────────────────────────────────────

/// Wait for the device's first reply to CNXN.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Wait for the verdict on our signature.
const SIGNATURE_TIMEOUT: Duration = Duration::from_secs(5);
/// Wait for CNXN after sending the public key; generous because the
/// user has to tap a confirmation dialog on the device.
const AUTH_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Sender queue caps. Enqueue beyond either drops the frame with a
/// warning; unbounded growth would be worse than a lost frame.
const MAX_QUEUE_FRAMES: usize = 5_000;
const MAX_QUEUE_BYTES: usize = 50 * 1024 * 1024;

/// How often parked waiters re-check registry state.
const WAIT_BEAT: Duration = Duration::from_millis(100);

/// Callback fired once when the device is waiting for the user to
/// confirm our key on screen.
pub type WaitAuthCallback = Box<dyn FnOnce() + Send>;

// ── AdbSession ───────────────────────────────────────────────────

/// An authenticated ADB connection with its worker threads.
///
/// All methods take `&self`; callers share the session behind an
/// `Arc`. [`close`](Self::close) is the universal cancellation
/// primitive and is safe to call from any thread, including the
/// session's own workers.
pub struct AdbSession {
    channel: TcpChannel,
    closed: AtomicBool,
    max_payload: AtomicU32,
    next_local_id: AtomicI32,
    streams: Mutex<HashMap<i32, Arc<AdbStream>>>,
    send_tx: SyncSender<Vec<u8>>,
    queued_bytes: AtomicUsize,
    /// Parking lot for `open()` and close-waiters.
    registry_lock: Mutex<()>,
    registry_cv: Condvar,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl AdbSession {
    /// Perform the CNXN/AUTH handshake on `channel` and start the
    /// worker threads.
    ///
    /// If the device does not know our key, the signed challenge is
    /// rejected; we then send the public-key blob, fire
    /// `on_wait_auth` once, and wait up to 30 s for the user to
    /// confirm on screen. Cancelling by closing the channel from
    /// another thread unblocks the wait.
    pub fn connect(
        channel: TcpChannel,
        keys: &AdbKeyPair,
        on_wait_auth: Option<WaitAuthCallback>,
    ) -> Result<Arc<Self>, CoreError> {
        match Self::handshake(&channel, keys, on_wait_auth) {
            Ok(max_payload) => Self::spawn(channel, max_payload),
            Err(e) => {
                channel.close();
                Err(e)
            }
        }
    }

    fn handshake(
        channel: &TcpChannel,
        keys: &AdbKeyPair,
        on_wait_auth: Option<WaitAuthCallback>,
    ) -> Result<u32, CoreError> {
        channel.write(&wire::connect_frame())?;
        let mut message = read_message(channel, Some(CONNECT_TIMEOUT), "connect response")?;

        if message.command() == Some(AdbCommand::Auth) {
            debug!("device sent AUTH challenge, signing token");
            let signature = keys.sign_token(&message.payload)?;
            channel.write(&wire::auth_frame(AUTH_TYPE_SIGNATURE, &signature))?;

            let need_public_key =
                match read_message(channel, Some(SIGNATURE_TIMEOUT), "signature response") {
                    Ok(reply) if reply.command() == Some(AdbCommand::Auth) => true,
                    Ok(reply) => {
                        message = reply;
                        false
                    }
                    // No verdict in time: assume the key is unknown
                    // and continue with the public-key path.
                    Err(CoreError::Timeout { .. }) => true,
                    Err(e) => return Err(e),
                };

            if need_public_key {
                info!("device does not know our key, sending public key");
                channel.write(&wire::auth_frame(
                    AUTH_TYPE_RSA_PUBLIC,
                    keys.public_key_blob(),
                ))?;
                if let Some(callback) = on_wait_auth {
                    callback();
                }
                message = read_message(channel, Some(AUTH_CONFIRM_TIMEOUT), "auth confirmation")?;
                if message.command() != Some(AdbCommand::Connect) {
                    return Err(CoreError::AuthFailed(format!(
                        "expected CNXN after public key, got 0x{:08x}",
                        message.command
                    )));
                }
            }
        }

        if message.command() != Some(AdbCommand::Connect) {
            return Err(CoreError::Protocol(format!(
                "expected CNXN or AUTH, got 0x{:08x}",
                message.command
            )));
        }

        // Effective payload cap is the smaller of the two
        // advertisements; the chunker stays 128 bytes under it.
        let advertised = message.arg1;
        let max_payload = if advertised == 0 {
            CONNECT_MAX_DATA
        } else {
            advertised.min(CONNECT_MAX_DATA)
        };
        info!(max_payload, "ADB session authenticated");
        Ok(max_payload)
    }

    fn spawn(channel: TcpChannel, max_payload: u32) -> Result<Arc<Self>, CoreError> {
        let (send_tx, send_rx) = mpsc::sync_channel(MAX_QUEUE_FRAMES);
        let session = Arc::new(Self {
            channel,
            closed: AtomicBool::new(false),
            max_payload: AtomicU32::new(max_payload),
            next_local_id: AtomicI32::new(1),
            streams: Mutex::new(HashMap::new()),
            send_tx,
            queued_bytes: AtomicUsize::new(0),
            registry_lock: Mutex::new(()),
            registry_cv: Condvar::new(),
            handles: Mutex::new(Vec::new()),
        });

        let sender = {
            let session = Arc::clone(&session);
            thread::Builder::new()
                .name("adb-send".into())
                .spawn(move || session.send_loop(send_rx))?
        };
        let receiver = {
            let session = Arc::clone(&session);
            thread::Builder::new()
                .name("adb-recv".into())
                .spawn(move || session.recv_loop())?
        };
        session.handles.lock().unwrap().extend([sender, receiver]);
        Ok(session)
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Negotiated maximum WRTE payload.
    pub fn max_payload(&self) -> u32 {
        self.max_payload.load(Ordering::Acquire)
    }

    /// Whether the given stream is gone or has seen CLSE.
    pub fn is_stream_closed(&self, local_id: i32) -> bool {
        match self.streams.lock().unwrap().get(&local_id) {
            Some(stream) => stream.is_closed(),
            None => true,
        }
    }

    // ── Stream lifecycle ─────────────────────────────────────────

    /// Open a stream to `destination` (e.g. `"shell:"`,
    /// `"localabstract:scrcpy"`). Returns the local stream id.
    ///
    /// `multi_send` marks the stream as allowed to issue WRTEs
    /// without waiting for OKAYs; single-send streams get a negated
    /// id so the marker survives on the wire.
    pub fn open(&self, destination: &str, multi_send: bool) -> Result<i32, CoreError> {
        if self.is_closed() {
            return Err(CoreError::TransportBroken("session closed"));
        }

        let id = self.next_local_id.fetch_add(1, Ordering::SeqCst);
        let local_id = if multi_send { id } else { -id };
        self.enqueue_frame(wire::open_frame(local_id, destination));
        debug!(local_id, destination, "OPEN sent");

        // The receive loop binds the stream when the peer's first
        // OKAY (or CLSE, for a refusal) arrives.
        let mut guard = self.registry_lock.lock().unwrap();
        loop {
            let found = self.streams.lock().unwrap().get(&local_id).cloned();
            if let Some(stream) = found {
                drop(guard);
                if stream.is_closed() {
                    self.streams.lock().unwrap().remove(&local_id);
                    return Err(CoreError::StreamRefused(destination.to_string()));
                }
                return Ok(local_id);
            }
            if self.is_closed() {
                return Err(CoreError::TransportBroken("session closed"));
            }
            let (next, _) = self.registry_cv.wait_timeout(guard, WAIT_BEAT).unwrap();
            guard = next;
        }
    }

    /// Read from a stream's receive queue.
    ///
    /// With `exact = true` the call returns only once `buf` is full,
    /// failing with [`CoreError::StreamClosed`] or a timeout
    /// otherwise. With `exact = false` it returns as soon as any
    /// bytes are available. `timeout = None` waits indefinitely;
    /// `Some(ZERO)` never blocks.
    pub fn stream_read(
        &self,
        local_id: i32,
        buf: &mut [u8],
        timeout: Option<Duration>,
        exact: bool,
    ) -> Result<usize, CoreError> {
        let stream = self
            .streams
            .lock()
            .unwrap()
            .get(&local_id)
            .cloned()
            .ok_or(CoreError::StreamClosed)?;

        let mut reader = stream.reader.lock().unwrap();
        let start = Instant::now();
        let mut total = 0;

        while total < buf.len() {
            let remaining = match timeout {
                None => None,
                Some(limit) => {
                    let elapsed = start.elapsed();
                    if elapsed >= limit && limit != Duration::ZERO {
                        if !exact && total > 0 {
                            break;
                        }
                        return Err(CoreError::Timeout {
                            phase: "stream read",
                            elapsed,
                        });
                    }
                    Some(if limit == Duration::ZERO {
                        Duration::ZERO
                    } else {
                        limit - elapsed
                    })
                }
            };

            if !reader.wait_for_data(1, remaining) {
                if reader.is_closed() {
                    if !exact && total > 0 {
                        break;
                    }
                    return Err(CoreError::StreamClosed);
                }
                if !exact {
                    break;
                }
                if timeout == Some(Duration::ZERO) {
                    return Err(CoreError::WouldBlock);
                }
                return Err(CoreError::Timeout {
                    phase: "stream read",
                    elapsed: start.elapsed(),
                });
            }

            let copied = reader.copy_to(&mut buf[total..]);
            if copied == 0 && reader.is_closed() {
                if !exact && total > 0 {
                    break;
                }
                return Err(CoreError::StreamClosed);
            }
            total += copied;

            if !exact && total > 0 {
                break;
            }
        }

        Ok(total)
    }

    /// Write to a stream, chunked so no single WRTE payload exceeds
    /// the negotiated maximum minus 128 bytes of margin.
    pub fn stream_write(&self, local_id: i32, data: &[u8]) -> Result<(), CoreError> {
        let stream = self
            .streams
            .lock()
            .unwrap()
            .get(&local_id)
            .cloned()
            .ok_or(CoreError::UnknownStream(local_id))?;
        if stream.is_closed() {
            return Err(CoreError::StreamClosed);
        }

        let chunk = (self.max_payload().saturating_sub(128)).max(1) as usize;
        for part in data.chunks(chunk) {
            self.enqueue_frame(wire::write_frame(stream.local_id, stream.remote_id(), part));
        }
        Ok(())
    }

    /// Reap a stream: send our CLSE (if not already sent), close the
    /// ring so blocked readers wake, and drop the registry entry.
    /// Idempotent; closing an unknown id is a no-op.
    pub fn close_stream(&self, local_id: i32) {
        let stream = self.streams.lock().unwrap().remove(&local_id);
        if let Some(stream) = stream {
            if stream.take_clse_duty() {
                self.enqueue_frame(wire::close_frame(stream.local_id, stream.remote_id()));
            }
            stream.mark_closed();
            self.notify_registry();
            debug!(local_id, "stream closed");
        }
    }

    /// Block until the peer closes the stream or the session dies.
    pub fn wait_stream_closed(&self, local_id: i32) {
        let mut guard = self.registry_lock.lock().unwrap();
        while !self.is_stream_closed(local_id) && !self.is_closed() {
            let (next, _) = self.registry_cv.wait_timeout(guard, WAIT_BEAT).unwrap();
            guard = next;
        }
    }

    /// Drain whatever the stream's receive queue still holds.
    /// Useful after the peer closed a one-shot stream (`shell:<cmd>`,
    /// `tcpip:<port>`) whose full output is the result.
    pub fn read_all_buffered(&self, local_id: i32) -> Vec<u8> {
        let stream = match self.streams.lock().unwrap().get(&local_id).cloned() {
            Some(stream) => stream,
            None => return Vec::new(),
        };
        let mut reader = stream.reader.lock().unwrap();
        let mut out = Vec::with_capacity(reader.len());
        loop {
            let region = reader.read_region();
            if region.is_empty() {
                break;
            }
            let n = region.len();
            out.extend_from_slice(region);
            reader.consume(n);
        }
        out
    }

    // ── Device helpers ───────────────────────────────────────────

    /// Run a one-shot shell command and return its combined output.
    pub fn shell_command(&self, command: &str) -> Result<String, CoreError> {
        let id = self.open(&format!("shell:{command}"), true)?;
        self.wait_stream_closed(id);
        let output = self.read_all_buffered(id);
        self.close_stream(id);
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Open an interactive shell stream.
    pub fn interactive_shell(&self) -> Result<i32, CoreError> {
        self.open("shell:", true)
    }

    /// Ask adbd to restart listening on TCP. Returns the daemon's
    /// status message.
    pub fn tcpip_restart(&self, port: u16) -> Result<String, CoreError> {
        let id = self.open(&format!("tcpip:{port}"), false)?;
        self.wait_stream_closed(id);
        let output = self.read_all_buffered(id);
        self.close_stream(id);
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Forward to a TCP port on the device.
    pub fn tcp_forward(&self, port: u16) -> Result<i32, CoreError> {
        let id = self.open(&format!("tcp:{port}"), true)?;
        if self.is_stream_closed(id) {
            self.close_stream(id);
            return Err(CoreError::StreamRefused(format!("tcp:{port}")));
        }
        Ok(id)
    }

    /// Forward to an abstract unix socket on the device (scrcpy's
    /// server listens on one).
    pub fn local_socket_forward(&self, name: &str) -> Result<i32, CoreError> {
        let id = self.open(&format!("localabstract:{name}"), true)?;
        if self.is_stream_closed(id) {
            self.close_stream(id);
            return Err(CoreError::StreamRefused(format!("localabstract:{name}")));
        }
        Ok(id)
    }

    // ── Shutdown ─────────────────────────────────────────────────

    /// Tear the session down: close the transport (unblocking the
    /// receive loop), close every stream's ring buffer (waking
    /// blocked readers with `StreamClosed`), stop the sender, and
    /// join both workers. Idempotent; callable from the workers
    /// themselves, in which case the calling thread is detached
    /// instead of joined.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("closing ADB session");

        self.channel.close();
        {
            let streams = self.streams.lock().unwrap();
            for stream in streams.values() {
                stream.mark_closed();
            }
        }
        self.notify_registry();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                // A worker closing its own session cannot join itself.
                continue;
            }
            let _ = handle.join();
        }
    }

    // ── Internal: sender ─────────────────────────────────────────

    /// Queue a frame for the sender thread, dropping with a warning
    /// when the queue is saturated.
    fn enqueue_frame(&self, frame: Vec<u8>) {
        if self.is_closed() {
            return;
        }
        if self.queued_bytes.load(Ordering::Relaxed) > MAX_QUEUE_BYTES {
            warn!("send queue over byte budget, dropping frame");
            return;
        }
        let len = frame.len();
        match self.send_tx.try_send(frame) {
            Ok(()) => {
                self.queued_bytes.fetch_add(len, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                warn!("send queue full, dropping frame");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn send_loop(&self, rx: Receiver<Vec<u8>>) {
        debug!("sender thread started");
        loop {
            match rx.recv_timeout(WAIT_BEAT) {
                Ok(frame) => {
                    self.queued_bytes.fetch_sub(frame.len(), Ordering::Relaxed);
                    if let Err(e) = self.channel.write(&frame) {
                        if !self.is_closed() {
                            error!("send failed: {e}");
                            self.close();
                        }
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_closed() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("sender thread exited");
    }

    // ── Internal: receive loop ───────────────────────────────────

    fn recv_loop(&self) {
        debug!("receive thread started");
        let mut scratch = vec![0u8; 4096];

        while !self.is_closed() {
            let mut header_bytes = [0u8; HEADER_LENGTH];
            if self.channel.read_exact(&mut header_bytes, None).is_err() {
                break;
            }
            let header = AdbHeader::from_bytes(&header_bytes);

            if let Err(e) = self.dispatch(&header, &mut scratch) {
                if !self.is_closed() {
                    error!("receive loop error: {e}");
                }
                break;
            }
        }

        if !self.is_closed() {
            error!("transport broken, tearing down session");
        } else {
            debug!("receive thread exited");
        }
        self.close();
    }

    fn dispatch(&self, header: &AdbHeader, scratch: &mut [u8]) -> Result<(), CoreError> {
        let payload_len = header.payload_length as usize;
        let command = match header.command() {
            Some(command) => command,
            None => {
                warn!(
                    "unknown command tag 0x{:08x}, skipping {payload_len} payload bytes",
                    header.command
                );
                return self.drain_payload(payload_len, scratch);
            }
        };

        match command {
            AdbCommand::Write | AdbCommand::Okay | AdbCommand::Close => {
                let local_id = header.arg1 as i32;
                let remote_id = header.arg0 as i32;
                // A refusal CLSE may be the first frame naming this
                // stream; the binding must already read as closed by
                // the time an open() waiter can observe it.
                let close = command == AdbCommand::Close;
                let stream = self.lookup_or_bind(local_id, remote_id, close);
                match command {
                    AdbCommand::Write => self.handle_write(&stream, payload_len, scratch)?,
                    AdbCommand::Okay => {
                        if stream.remote_id() == 0 {
                            stream.set_remote_id(remote_id);
                        }
                        stream.set_can_write();
                    }
                    AdbCommand::Close => {
                        debug!(local_id, "peer closed stream");
                        stream.mark_closed();
                        self.notify_registry();
                    }
                    _ => unreachable!(),
                }
            }
            AdbCommand::Open => {
                // Devices do not normally originate OPEN towards a
                // client; log the destination and ignore it.
                let n = payload_len.min(scratch.len());
                self.channel.read_exact(&mut scratch[..n], None)?;
                self.drain_payload(payload_len - n, scratch)?;
                warn!(
                    "ignoring peer OPEN to {:?}",
                    String::from_utf8_lossy(&scratch[..n.saturating_sub(1)])
                );
            }
            AdbCommand::Connect | AdbCommand::Auth => {
                // Late CNXN/AUTH after the handshake: nothing to do.
                debug!("ignoring post-handshake 0x{:08x}", header.command);
                self.drain_payload(payload_len, scratch)?;
            }
        }
        Ok(())
    }

    /// Route a stream command, creating a fresh binding when the id
    /// is unknown. That is how a local `open()` completes (the peer's
    /// first OKAY lands here first) and how peer-originated streams
    /// appear. With `closed` the new binding starts out terminal.
    fn lookup_or_bind(&self, local_id: i32, remote_id: i32, closed: bool) -> Arc<AdbStream> {
        let stream = {
            let mut streams = self.streams.lock().unwrap();
            match streams.get(&local_id) {
                Some(stream) => return Arc::clone(stream),
                None => {
                    let stream = Arc::new(AdbStream::new(local_id, remote_id));
                    if closed {
                        stream.mark_closed();
                    }
                    streams.insert(local_id, Arc::clone(&stream));
                    stream
                }
            }
        };
        debug!(local_id, remote_id, "new stream binding");
        self.notify_registry();
        stream
    }

    /// The zero-copy WRTE path: payload bytes land directly in the
    /// destination ring buffer. A full ring must still consume the
    /// bytes — blocking here would stall every stream on the
    /// session — so the overflow is drained and dropped.
    fn handle_write(
        &self,
        stream: &Arc<AdbStream>,
        payload_len: usize,
        scratch: &mut [u8],
    ) -> Result<(), CoreError> {
        let mut remaining = payload_len;
        let mut warned = false;
        {
            let mut writer = stream.writer.lock().unwrap();
            while remaining > 0 {
                if writer.is_closed() {
                    self.drain_payload(remaining, scratch)?;
                    break;
                }
                let region = writer.write_region();
                if region.is_empty() {
                    if !warned {
                        warned = true;
                        warn!(
                            local_id = stream.local_id,
                            remaining, "stream buffer full, dropping payload"
                        );
                    }
                    let n = remaining.min(scratch.len());
                    self.channel.read_exact(&mut scratch[..n], None)?;
                    remaining -= n;
                    continue;
                }
                let n = remaining.min(region.len());
                self.channel.read_exact(&mut region[..n], None)?;
                writer.commit(n);
                remaining -= n;
            }
        }

        // One OKAY per processed WRTE, unless the stream is already
        // gone.
        if !stream.is_closed() {
            self.enqueue_frame(wire::okay_frame(stream.local_id, stream.remote_id()));
        }
        Ok(())
    }

    fn drain_payload(&self, mut remaining: usize, scratch: &mut [u8]) -> Result<(), CoreError> {
        while remaining > 0 {
            let n = remaining.min(scratch.len());
            self.channel.read_exact(&mut scratch[..n], None)?;
            remaining -= n;
        }
        Ok(())
    }

    fn notify_registry(&self) {
        let _guard = self.registry_lock.lock().unwrap();
        self.registry_cv.notify_all();
    }
}

impl Drop for AdbSession {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Handshake helpers ────────────────────────────────────────────

/// Read one complete ADB message directly from the channel. Only
/// used during the handshake, before the receive loop exists.
fn read_message(
    channel: &TcpChannel,
    timeout: Option<Duration>,
    phase: &'static str,
) -> Result<AdbMessage, CoreError> {
    let mut header_bytes = [0u8; HEADER_LENGTH];
    channel
        .read_exact(&mut header_bytes, timeout)
        .map_err(|e| rephase(e, phase))?;
    let header = AdbHeader::from_bytes(&header_bytes);

    let mut payload = vec![0u8; header.payload_length as usize];
    if !payload.is_empty() {
        channel
            .read_exact(&mut payload, timeout)
            .map_err(|e| rephase(e, phase))?;
    }
    Ok(AdbMessage {
        command: header.command,
        arg0: header.arg0,
        arg1: header.arg1,
        payload,
    })
}

/// Tag channel-level timeouts with the handshake phase they occurred
/// in, so error messages name the step that stalled.
fn rephase(e: CoreError, phase: &'static str) -> CoreError {
    match e {
        CoreError::Timeout { elapsed, .. } => CoreError::Timeout { phase, elapsed },
        other => other,
    }
}
