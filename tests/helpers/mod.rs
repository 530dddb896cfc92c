//! Shared mock transports and sinks for integration tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wavepipe::stream::{BitDepth, ChannelLayout, Fetcher, HardwareSink};
use wavepipe::{Error, Result};

/// Install the env-filtered tracing subscriber for test output
///
/// Safe to call from every test; only the first call in the process wins.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Observable side of a [`MockFetcher`], kept by the test
pub struct FetcherProbe {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl FetcherProbe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Fetcher serving a fixed payload in bounded chunks
///
/// With `complete_at_end` set it reports completion once the payload is
/// exhausted; otherwise it keeps the connection open and returns zero-byte
/// reads, modelling a stalled live stream.
pub struct MockFetcher {
    payload: Vec<u8>,
    position: usize,
    chunk: usize,
    complete_at_end: bool,
    opened: bool,
    probe: Arc<FetcherProbe>,
}

impl MockFetcher {
    pub fn new(payload: Vec<u8>, chunk: usize) -> (Self, Arc<FetcherProbe>) {
        let probe = Arc::new(FetcherProbe {
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        (
            Self {
                payload,
                position: 0,
                chunk,
                complete_at_end: true,
                opened: false,
                probe: Arc::clone(&probe),
            },
            probe,
        )
    }

    pub fn endless(payload: Vec<u8>, chunk: usize) -> (Self, Arc<FetcherProbe>) {
        let (mut fetcher, probe) = Self::new(payload, chunk);
        fetcher.complete_at_end = false;
        (fetcher, probe)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn open(&mut self, uri: &str) -> Result<u64> {
        if uri == "mock://refused" {
            return Err(Error::Transport("connection refused".to_string()));
        }
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        self.opened = true;
        self.position = 0;
        Ok(self.payload.len() as u64)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.opened {
            return Ok(0);
        }
        let remaining = &self.payload[self.position..];
        let n = remaining.len().min(buf.len()).min(self.chunk);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }

    fn is_complete(&self) -> bool {
        self.opened && self.complete_at_end && self.position >= self.payload.len()
    }

    async fn close(&mut self) {
        if self.opened {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
            self.opened = false;
        }
    }
}

/// Hardware sink recording everything written to it
pub struct MockSink {
    written: Mutex<Vec<u8>>,
    locked: AtomicBool,
    refuse_lock: AtomicBool,
    accept_limit: AtomicUsize,
    flushes: AtomicUsize,
    configured: AtomicBool,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            written: Mutex::new(Vec::new()),
            locked: AtomicBool::new(false),
            refuse_lock: AtomicBool::new(false),
            accept_limit: AtomicUsize::new(usize::MAX),
            flushes: AtomicUsize::new(0),
            configured: AtomicBool::new(false),
        })
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn refuse_lock(&self, refuse: bool) {
        self.refuse_lock.store(refuse, Ordering::SeqCst);
    }

    /// Accept at most `limit` bytes per write call
    pub fn set_accept_limit(&self, limit: usize) {
        self.accept_limit.store(limit, Ordering::SeqCst);
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HardwareSink for MockSink {
    fn configure(&self, _rate_hz: u32, _depth: BitDepth, _layout: ChannelLayout) -> Result<()> {
        self.configured.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, pcm: &[u8], _source_depth: BitDepth) -> Result<usize> {
        let accepted = pcm.len().min(self.accept_limit.load(Ordering::SeqCst));
        self.written.lock().unwrap().extend_from_slice(&pcm[..accepted]);
        Ok(accepted)
    }

    fn flush_to_silence(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn try_lock(&self) -> bool {
        if self.refuse_lock.load(Ordering::SeqCst) {
            return false;
        }
        !self.locked.swap(true, Ordering::SeqCst)
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}

/// Interleaved little-endian i16 ramp, `samples` samples long
pub fn pcm_ramp(samples: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let sample = ((i as i32 % 2000) - 1000) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}
