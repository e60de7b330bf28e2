//! Test doubles shared by unit and integration tests.
//!
//! Kept in the library proper (not behind `cfg(test)`) so the
//! `tests/` directory and downstream consumers can drive the core
//! without a platform codec SDK.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::decoder::{CodecConfig, Decoder, InputBuffer};
use crate::error::CoreError;
use crate::events::{Event, EventSink};

// ── RecordingDecoder ─────────────────────────────────────────────

/// A frame submitted to a [`RecordingDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedFrame {
    pub index: u32,
    pub data: Vec<u8>,
    pub pts: i64,
    pub flags: u32,
}

/// In-memory [`Decoder`] that records every call.
///
/// The input pool has a fixed number of slots; `acquire_input`
/// reports `WouldBlock` immediately (without honoring the timeout)
/// when the pool is empty, which lets backpressure tests run the
/// whole retry window in microseconds.
pub struct RecordingDecoder {
    slots: Vec<Vec<u8>>,
    free: VecDeque<u32>,
    submitted: Vec<SubmittedFrame>,
    config: Option<CodecConfig>,
    started: bool,
    stopped: bool,
    released: bool,
    acquire_attempts: u64,
    fail_init: bool,
    /// When set, submitted buffers are recycled back into the pool.
    recycle: bool,
}

impl RecordingDecoder {
    /// A decoder with `slots` input buffers of `capacity` bytes each.
    pub fn with_pool(slots: usize, capacity: usize) -> Self {
        Self {
            slots: (0..slots).map(|_| vec![0u8; capacity]).collect(),
            free: (0..slots as u32).collect(),
            submitted: Vec::new(),
            config: None,
            started: false,
            stopped: false,
            released: false,
            acquire_attempts: 0,
            fail_init: false,
            recycle: true,
        }
    }

    /// A decoder whose `init` always fails.
    pub fn failing_init() -> Self {
        let mut decoder = Self::with_pool(0, 0);
        decoder.fail_init = true;
        decoder
    }

    /// Stop recycling submitted buffers, so the pool drains and
    /// stays empty — the saturation case.
    pub fn without_recycling(mut self) -> Self {
        self.recycle = false;
        self
    }

    pub fn submitted(&self) -> &[SubmittedFrame] {
        &self.submitted
    }

    pub fn acquire_attempts(&self) -> u64 {
        self.acquire_attempts
    }

    pub fn config(&self) -> Option<&CodecConfig> {
        self.config.as_ref()
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn released(&self) -> bool {
        self.released
    }
}

impl Decoder for RecordingDecoder {
    fn init(&mut self, config: &CodecConfig) -> Result<(), CoreError> {
        if self.fail_init {
            return Err(CoreError::DecoderInit("test decoder refuses init".into()));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), CoreError> {
        self.started = true;
        Ok(())
    }

    fn acquire_input(&mut self, _timeout: Duration) -> Result<InputBuffer, CoreError> {
        self.acquire_attempts += 1;
        match self.free.pop_front() {
            Some(index) => Ok(InputBuffer {
                index,
                capacity: self.slots[index as usize].len(),
            }),
            None => Err(CoreError::WouldBlock),
        }
    }

    fn input_data(&mut self, buffer: &InputBuffer) -> &mut [u8] {
        &mut self.slots[buffer.index as usize]
    }

    fn submit_input(
        &mut self,
        buffer: InputBuffer,
        pts: i64,
        size: usize,
        flags: u32,
    ) -> Result<(), CoreError> {
        let data = self.slots[buffer.index as usize][..size].to_vec();
        self.submitted.push(SubmittedFrame {
            index: buffer.index,
            data,
            pts,
            flags,
        });
        if self.recycle {
            self.free.push_back(buffer.index);
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn release(&mut self) {
        self.released = true;
    }
}

// ── CollectingSink ───────────────────────────────────────────────

/// An [`EventSink`] that stores every event for later assertions.
#[derive(Default, Clone)]
pub struct CollectingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Events with the given tag, in arrival order.
    pub fn tagged(&self, tag: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| event.tag() == tag)
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn on_event(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}
