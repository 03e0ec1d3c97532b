//! Test doubles for the platform seams.
//!
//! These fakes generate predictable time, link, memory, and transport
//! behavior without touching real hardware or the network. They are shared by
//! the unit tests and the restart-simulation integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::clock::{MonotonicClock, WallClock};
use crate::transport::{
    HttpRequest, HttpResponse, LinkMonitor, MemoryGauge, TransportClient, TransportError,
};

/// Manually advanced uptime clock.
///
/// `sleep_ms` advances the clock instead of blocking, so spacing waits are
/// observable as elapsed fake time.
#[derive(Debug, Clone, Default)]
pub struct FakeMonotonicClock {
    now_ms: Arc<AtomicU32>,
    slept_ms: Arc<AtomicU32>,
}

impl FakeMonotonicClock {
    /// Creates a clock starting at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u32) -> Self {
        let clock = Self::default();
        clock.now_ms.store(start_ms, Ordering::SeqCst);
        clock
    }

    /// Advances the clock by `ms`.
    pub fn advance(&self, ms: u32) {
        // fetch_update would also work; wrapping add keeps wrap tests honest.
        let now = self.now_ms.load(Ordering::SeqCst);
        self.now_ms.store(now.wrapping_add(ms), Ordering::SeqCst);
    }

    /// Total milliseconds spent in `sleep_ms`.
    #[must_use]
    pub fn total_slept_ms(&self) -> u32 {
        self.slept_ms.load(Ordering::SeqCst)
    }
}

impl MonotonicClock for FakeMonotonicClock {
    fn now_ms(&self) -> u32 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u32) {
        self.slept_ms.fetch_add(ms, Ordering::SeqCst);
        self.advance(ms);
    }
}

/// Settable wall clock; epoch zero means "never synced".
#[derive(Debug, Clone, Default)]
pub struct FakeWallClock {
    epoch: Arc<AtomicU64>,
}

impl FakeWallClock {
    /// Creates a clock reporting `epoch_secs` (zero for unsynced).
    #[must_use]
    pub fn new(epoch_secs: u64) -> Self {
        let clock = Self::default();
        clock.epoch.store(epoch_secs, Ordering::SeqCst);
        clock
    }

    /// Sets the reported epoch; zero reverts to unsynced.
    pub fn set(&self, epoch_secs: u64) {
        self.epoch.store(epoch_secs, Ordering::SeqCst);
    }
}

impl WallClock for FakeWallClock {
    fn now_epoch(&self) -> Option<u64> {
        match self.epoch.load(Ordering::SeqCst) {
            0 => None,
            epoch => Some(epoch),
        }
    }
}

/// Settable link state.
#[derive(Debug, Clone)]
pub struct FakeLinkMonitor {
    connected: Arc<AtomicBool>,
}

impl FakeLinkMonitor {
    /// Creates a monitor with the given initial state.
    #[must_use]
    pub fn new(connected: bool) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(connected)),
        }
    }

    /// Sets the link state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl LinkMonitor for FakeLinkMonitor {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Settable memory gauge.
#[derive(Debug, Clone)]
pub struct FakeMemoryGauge {
    free: Arc<AtomicU32>,
    largest_block: Arc<AtomicU32>,
}

impl FakeMemoryGauge {
    /// Creates a gauge reporting ample memory.
    #[must_use]
    pub fn ample() -> Self {
        Self::new(u32::MAX, u32::MAX)
    }

    /// Creates a gauge with the given readings.
    #[must_use]
    pub fn new(free: u32, largest_block: u32) -> Self {
        Self {
            free: Arc::new(AtomicU32::new(free)),
            largest_block: Arc::new(AtomicU32::new(largest_block)),
        }
    }

    /// Sets the readings.
    pub fn set(&self, free: u32, largest_block: u32) {
        self.free.store(free, Ordering::SeqCst);
        self.largest_block.store(largest_block, Ordering::SeqCst);
    }
}

impl MemoryGauge for FakeMemoryGauge {
    fn free_bytes(&self) -> u32 {
        self.free.load(Ordering::SeqCst)
    }

    fn largest_free_block_bytes(&self) -> u32 {
        self.largest_block.load(Ordering::SeqCst)
    }
}

/// One request as recorded by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Method wire form.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Request body.
    pub body: String,
    /// Content type header value.
    pub content_type: String,
    /// Whether the encrypted transport was requested.
    pub secure: bool,
}

/// Transport that replays a scripted sequence of responses.
///
/// Each `perform` consumes the next scripted entry and records the request.
/// An exhausted script fails the request, which keeps "no network call
/// expected" assertions honest.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Result<HttpResponse, TransportError>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedTransport {
    /// Creates a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response with the given status and body.
    pub fn push_response(&self, status: u16, body: &str) {
        self.script
            .lock()
            .expect("transport script lock poisoned")
            .push_back(Ok(HttpResponse {
                status,
                body: body.to_string(),
            }));
    }

    /// Queues a transport-level failure.
    pub fn push_error(&self, error: TransportError) {
        self.script
            .lock()
            .expect("transport script lock poisoned")
            .push_back(Err(error));
    }

    /// Requests performed so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("transport request log lock poisoned")
            .clone()
    }

    /// Number of requests performed so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .expect("transport request log lock poisoned")
            .len()
    }
}

impl TransportClient for ScriptedTransport {
    fn perform(&mut self, request: &HttpRequest<'_>) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .expect("transport request log lock poisoned")
            .push(RecordedRequest {
                method: request.method.as_str().to_string(),
                url: request.url.to_string(),
                body: request.body.to_string(),
                content_type: request.content_type.to_string(),
                secure: request.secure,
            });

        self.script
            .lock()
            .expect("transport script lock poisoned")
            .pop_front()
            .unwrap_or(Err(TransportError::RequestFailed))
    }
}
