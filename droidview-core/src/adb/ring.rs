//! Single-producer / single-consumer byte FIFO backing each logical
//! stream's receive queue.
//!
//! ## Design
//!
//! - Indices are monotonic `AtomicU64` counters; the storage slot is
//!   `index & (capacity - 1)`, so capacity is rounded up to a power of
//!   two. `len = head - tail` with no modulo ambiguity.
//! - The hot path (`write_region` / `commit` / `read_region` /
//!   `consume`) uses only atomics: release store on index publication,
//!   acquire load on the opposite index.
//! - The blocking slow path (`wait_for_data`) parks on a mutex +
//!   condvar. The waiter sets a flag before parking and the writer
//!   checks it after publishing `head`, with a sequentially-consistent
//!   fence on both sides between the store and the load. That fence
//!   pairing is what prevents the lost-wakeup race.
//!
//! The buffer is split into [`RingWriter`] and [`RingReader`] halves
//! so exclusive access to each end is enforced by `&mut self` instead
//! of a lock; [`RingHandle`] is a cheap shared view for `close` and
//! observation from other threads.

use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Smallest capacity ever allocated; tiny requests are rounded up.
const MIN_CAPACITY: usize = 4096;

// ── Shared state ─────────────────────────────────────────────────

struct RingShared {
    data: *mut u8,
    capacity: usize,
    mask: u64,
    /// Advanced by the producer only.
    head: AtomicU64,
    /// Advanced by the consumer only.
    tail: AtomicU64,
    closed: AtomicBool,
    /// Set by a consumer about to park; checked by the producer after
    /// publishing `head`.
    waiting: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

// The raw pointer is only ever turned into disjoint slices: the
// producer touches [tail, head + free) and the consumer [tail, head).
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

impl Drop for RingShared {
    fn drop(&mut self) {
        // Reconstruct the allocation made in `spsc`.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.data,
                self.capacity,
            )));
        }
    }
}

impl RingShared {
    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head - tail) as usize
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.cond.notify_all();
    }
}

/// Create a ring with at least `capacity` bytes (rounded up to a
/// power of two, minimum 4 KiB) and return its two halves.
pub fn spsc(capacity: usize) -> (RingWriter, RingReader) {
    let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
    let data = Box::into_raw(vec![0u8; capacity].into_boxed_slice()) as *mut u8;
    let shared = Arc::new(RingShared {
        data,
        capacity,
        mask: capacity as u64 - 1,
        head: AtomicU64::new(0),
        tail: AtomicU64::new(0),
        closed: AtomicBool::new(false),
        waiting: AtomicBool::new(false),
        lock: Mutex::new(()),
        cond: Condvar::new(),
    });
    (
        RingWriter {
            shared: Arc::clone(&shared),
        },
        RingReader { shared },
    )
}

// ── RingWriter ───────────────────────────────────────────────────

/// Producer half. Owned by exactly one thread at a time.
pub struct RingWriter {
    shared: Arc<RingShared>,
}

impl RingWriter {
    /// The largest contiguous writable region at `head`.
    ///
    /// May be shorter than total free space when `head` is near the
    /// wrap point; empty when the buffer is full. Updates no state.
    pub fn write_region(&mut self) -> &mut [u8] {
        let s = &self.shared;
        let head = s.head.load(Ordering::Relaxed);
        let tail = s.tail.load(Ordering::Acquire);

        let used = (head - tail) as usize;
        if used >= s.capacity {
            return &mut [];
        }

        let slot = (head & s.mask) as usize;
        let free = s.capacity - used;
        let contiguous = s.capacity - slot;
        let len = free.min(contiguous);
        unsafe { std::slice::from_raw_parts_mut(s.data.add(slot), len) }
    }

    /// Publish `written` bytes and wake a parked consumer if any.
    pub fn commit(&mut self, written: usize) {
        let s = &self.shared;
        let head = s.head.load(Ordering::Relaxed);
        s.head.store(head + written as u64, Ordering::Release);

        // Store head, then fence, then load the waiting flag. The
        // consumer does the mirror image before parking.
        fence(Ordering::SeqCst);
        if s.waiting.load(Ordering::Acquire) {
            let _guard = s.lock.lock().unwrap();
            s.waiting.store(false, Ordering::Relaxed);
            s.cond.notify_all();
        }
    }

    /// Close the ring; the consumer's blocked wait returns.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A shared observation/close handle.
    pub fn handle(&self) -> RingHandle {
        RingHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

// ── RingReader ───────────────────────────────────────────────────

/// Consumer half. Owned by exactly one thread at a time.
pub struct RingReader {
    shared: Arc<RingShared>,
}

impl RingReader {
    /// The largest contiguous readable region at `tail`; empty when
    /// the buffer is empty. Updates no state.
    pub fn read_region(&self) -> &[u8] {
        let s = &self.shared;
        let tail = s.tail.load(Ordering::Relaxed);
        let head = s.head.load(Ordering::Acquire);

        let used = (head - tail) as usize;
        if used == 0 {
            return &[];
        }

        let slot = (tail & s.mask) as usize;
        let contiguous = s.capacity - slot;
        let len = used.min(contiguous);
        unsafe { std::slice::from_raw_parts(s.data.add(slot), len) }
    }

    /// Release `consumed` bytes back to the producer.
    pub fn consume(&mut self, consumed: usize) {
        let s = &self.shared;
        let tail = s.tail.load(Ordering::Relaxed);
        s.tail.store(tail + consumed as u64, Ordering::Release);
    }

    /// Copy up to `dst.len()` bytes out, advancing `tail`. Returns
    /// the number of bytes copied (0 when empty).
    pub fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let region = self.read_region();
            if region.is_empty() {
                break;
            }
            let n = region.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&region[..n]);
            self.consume(n);
            copied += n;
        }
        copied
    }

    /// Block until at least `needed` bytes are queued.
    ///
    /// Returns `true` when the data is there, `false` on timeout or
    /// close (distinguish via [`is_closed`](Self::is_closed)).
    /// `timeout = None` waits indefinitely; `Some(ZERO)` is a pure
    /// poll.
    pub fn wait_for_data(&self, needed: usize, timeout: Option<Duration>) -> bool {
        let s = &self.shared;
        let needed = needed.max(1);

        // Fast path: no lock.
        if s.len() >= needed {
            return true;
        }
        if s.is_closed() {
            return false;
        }
        if timeout == Some(Duration::ZERO) {
            return false;
        }

        let deadline = timeout.map(|d| Instant::now() + d);
        let mut guard = s.lock.lock().unwrap();

        // Announce intent to park, then re-check: a producer that
        // published between our fast check and the flag store will
        // observe the flag after its fence and skip no wakeup.
        s.waiting.store(true, Ordering::Release);
        fence(Ordering::SeqCst);
        if s.len() >= needed || s.is_closed() {
            s.waiting.store(false, Ordering::Relaxed);
            return s.len() >= needed;
        }

        loop {
            if s.len() >= needed {
                s.waiting.store(false, Ordering::Relaxed);
                return true;
            }
            if s.is_closed() {
                s.waiting.store(false, Ordering::Relaxed);
                return s.len() >= needed;
            }

            match deadline {
                None => {
                    guard = s.cond.wait(guard).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        s.waiting.store(false, Ordering::Relaxed);
                        return false;
                    }
                    let (next, _timed_out) = s.cond.wait_timeout(guard, deadline - now).unwrap();
                    guard = next;
                }
            }
            // Parked consumers re-announce before the next check so a
            // producer commit between wakeup and re-park is not lost.
            s.waiting.store(true, Ordering::Release);
            fence(Ordering::SeqCst);
        }
    }

    /// Close the ring from the consumer side.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Bytes currently queued.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── RingHandle ───────────────────────────────────────────────────

/// Shared, cloneable view of a ring: close and observe only. Used by
/// the stream registry, which must be able to close a ring while the
/// producer and consumer halves are busy on other threads.
#[derive(Clone)]
pub struct RingHandle {
    shared: Arc<RingShared>,
}

impl RingHandle {
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn capacity_rounds_to_power_of_two() {
        let (mut writer, _reader) = spsc(5000);
        assert_eq!(writer.write_region().len(), 8192);

        let (mut small, _reader) = spsc(1);
        assert_eq!(small.write_region().len(), MIN_CAPACITY);
    }

    #[test]
    fn write_then_read_preserves_bytes() {
        let (mut writer, mut reader) = spsc(4096);

        let region = writer.write_region();
        region[..5].copy_from_slice(b"abcde");
        writer.commit(5);

        assert_eq!(reader.len(), 5);
        let mut out = [0u8; 5];
        assert_eq!(reader.copy_to(&mut out), 5);
        assert_eq!(&out, b"abcde");
        assert!(reader.is_empty());
    }

    #[test]
    fn region_shortens_at_wrap_but_data_survives() {
        let (mut writer, mut reader) = spsc(4096);
        let cap = writer.write_region().len();

        // Park head three quarters of the way in.
        let pre = cap - cap / 4;
        writer.commit(pre);
        let mut sink = vec![0u8; pre];
        assert_eq!(reader.copy_to(&mut sink), pre);

        // Write half a buffer: must arrive as two contiguous regions.
        let payload: Vec<u8> = (0..cap / 2).map(|i| (i % 251) as u8).collect();
        let mut written = 0;
        while written < payload.len() {
            let region = writer.write_region();
            assert!(!region.is_empty());
            let n = region.len().min(payload.len() - written);
            region[..n].copy_from_slice(&payload[written..written + n]);
            writer.commit(n);
            written += n;
        }

        let mut out = vec![0u8; payload.len()];
        assert_eq!(reader.copy_to(&mut out), payload.len());
        assert_eq!(out, payload);
    }

    #[test]
    fn full_ring_reports_empty_region() {
        let (mut writer, mut reader) = spsc(4096);
        let cap = writer.write_region().len();
        writer.commit(cap);
        assert!(writer.write_region().is_empty());

        // Draining makes room again.
        let mut sink = vec![0u8; 100];
        reader.copy_to(&mut sink);
        assert_eq!(writer.write_region().len(), 100);
    }

    /// Concurrent producer and consumer preserve byte order across
    /// many wraps.
    #[test]
    fn spsc_ordering_under_concurrency() {
        const TOTAL: usize = 1 << 20;
        let (mut writer, mut reader) = spsc(4096);

        let producer = thread::spawn(move || {
            let mut sent = 0usize;
            while sent < TOTAL {
                let region = writer.write_region();
                if region.is_empty() {
                    thread::yield_now();
                    continue;
                }
                let n = region.len().min(TOTAL - sent);
                for (i, slot) in region[..n].iter_mut().enumerate() {
                    *slot = ((sent + i) % 251) as u8;
                }
                writer.commit(n);
                sent += n;
            }
        });

        let mut received = 0usize;
        let mut chunk = vec![0u8; 1500];
        while received < TOTAL {
            if !reader.wait_for_data(1, Some(Duration::from_secs(5))) {
                panic!("producer stalled at {received}");
            }
            let n = reader.copy_to(&mut chunk);
            for (i, &byte) in chunk[..n].iter().enumerate() {
                assert_eq!(byte, ((received + i) % 251) as u8, "at {}", received + i);
            }
            received += n;
        }

        producer.join().unwrap();
    }

    #[test]
    fn wait_for_data_times_out() {
        let (_writer, reader) = spsc(4096);
        let start = Instant::now();
        assert!(!reader.wait_for_data(1, Some(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(45));
        assert!(!reader.is_closed());
    }

    #[test]
    fn wait_for_data_zero_timeout_polls() {
        let (mut writer, reader) = spsc(4096);
        assert!(!reader.wait_for_data(1, Some(Duration::ZERO)));
        writer.write_region()[0] = 1;
        writer.commit(1);
        assert!(reader.wait_for_data(1, Some(Duration::ZERO)));
    }

    #[test]
    fn close_wakes_blocked_waiter() {
        let (writer, reader) = spsc(4096);
        let handle = writer.handle();

        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.close();
        });

        let start = Instant::now();
        assert!(!reader.wait_for_data(1, None));
        assert!(reader.is_closed());
        assert!(start.elapsed() < Duration::from_secs(2));
        closer.join().unwrap();
    }

    #[test]
    fn commit_wakes_blocked_waiter() {
        let (mut writer, reader) = spsc(4096);

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let region = writer.write_region();
            region[..3].copy_from_slice(b"xyz");
            writer.commit(3);
            writer
        });

        assert!(reader.wait_for_data(3, Some(Duration::from_secs(5))));
        assert_eq!(reader.len(), 3);
        producer.join().unwrap();
    }

    #[test]
    fn data_remains_readable_after_close() {
        let (mut writer, mut reader) = spsc(4096);
        writer.write_region()[..4].copy_from_slice(b"tail");
        writer.commit(4);
        writer.close();

        // Drain what was queued before the close.
        assert!(reader.wait_for_data(4, Some(Duration::ZERO)));
        let mut out = [0u8; 4];
        assert_eq!(reader.copy_to(&mut out), 4);
        assert_eq!(&out, b"tail");
        assert!(!reader.wait_for_data(1, Some(Duration::from_millis(10))));
    }
}
