//! Network reader stage
//!
//! Pulls bytes for the current URI through the injected `Fetcher` capability
//! into an output ring buffer. The worker owns the connection lifecycle:
//! `Start` (re)establishes it, completion or `StopGracefully` closes it, and
//! once the connection is closed and the buffer drained the worker stops
//! itself, a self-initiated terminal transition distinct from a
//! command-driven stop.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::control::{control_channel, Command, TaskEvent, WarningCode, WorkerLink};
use crate::error::Result;
use crate::ring_buffer::RingBuffer;
use crate::worker::{WorkerHandle, WorkerState};

/// Network transport capability
///
/// Yields a byte stream of unknown total length for a URI. Implementations
/// wrap whatever transport the host provides; the pipeline only sees these
/// five operations.
#[async_trait]
pub trait Fetcher: Send {
    /// Open the resource and return its content length
    async fn open(&mut self, uri: &str) -> Result<u64>;

    /// Read available bytes into `buf`; 0 means no data right now
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Whether the transport reported end-of-data
    fn is_complete(&self) -> bool;

    /// Tear the connection down
    async fn close(&mut self);
}

/// Worker streaming fetched bytes into its output ring buffer
pub struct HttpStreamer {
    output: Arc<RingBuffer>,
    fetcher: Arc<Mutex<Box<dyn Fetcher>>>,
    uri: Option<String>,
    config: Config,
    handle: WorkerHandle,
}

impl HttpStreamer {
    /// Create a reader stage with an `http_buffer_size`-byte output buffer
    pub fn new(fetcher: Box<dyn Fetcher>, config: &Config) -> Result<Self> {
        Ok(Self {
            output: Arc::new(RingBuffer::new(config.http_buffer_size)?),
            fetcher: Arc::new(Mutex::new(fetcher)),
            uri: None,
            config: config.clone(),
            handle: WorkerHandle::new(),
        })
    }

    /// Set the current URI and start streaming it
    pub async fn start_with_uri(&mut self, uri: &str) -> Result<()> {
        self.uri = Some(uri.to_string());
        self.start().await
    }

    /// Spawn the reader worker (idempotent) and send `Start` for the
    /// current URI
    pub async fn start(&mut self) -> Result<()> {
        if !self.handle.is_running() {
            let (control, link) = control_channel(self.config.channel_capacity);
            let task = tokio::spawn(read_task(
                Arc::clone(&self.output),
                Arc::clone(&self.fetcher),
                self.config.clone(),
                link,
            ));
            self.handle.install(control, task);
        }

        self.handle
            .send_command(Command::Start {
                uri: self.uri.clone(),
            })
            .await
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.handle.send_command(command).await
    }

    /// Close the connection and discard buffered output
    pub async fn stop(&mut self) -> Result<()> {
        self.handle.mark_stopping();
        self.handle.send_command(Command::Stop).await
    }

    /// Close the connection but let buffered output drain before stopping
    pub async fn stop_gracefully(&mut self) -> Result<()> {
        self.handle.mark_stopping();
        self.handle.send_command(Command::StopGracefully).await
    }

    pub fn poll_events(&mut self) -> Vec<TaskEvent> {
        self.handle.poll_events()
    }

    pub fn state(&self) -> WorkerState {
        self.handle.state()
    }

    pub fn warning(&self) -> Option<WarningCode> {
        self.handle.warning()
    }

    /// Drain fetched bytes from the output buffer
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.output.try_read(buf)
    }

    /// Fetched bytes waiting in the output buffer
    pub fn available(&self) -> usize {
        self.output.available()
    }
}

/// Open the resource; a failed open or non-positive content length is
/// treated as "no data available", not a worker fault
async fn establish_connection(fetcher: &mut Box<dyn Fetcher>, uri: Option<&str>) -> bool {
    fetcher.close().await;

    let Some(uri) = uri else {
        return false;
    };
    if uri.is_empty() {
        return false;
    }

    match fetcher.open(uri).await {
        Ok(content_length) if content_length > 0 => true,
        Ok(_) => {
            debug!(uri, "No content length; closing connection");
            fetcher.close().await;
            false
        }
        Err(e) => {
            debug!(uri, error = %e, "Failed to open connection");
            fetcher.close().await;
            false
        }
    }
}

async fn read_task(
    output: Arc<RingBuffer>,
    fetcher: Arc<Mutex<Box<dyn Fetcher>>>,
    config: Config,
    mut link: WorkerLink,
) {
    link.events.lifecycle(TaskEvent::Starting).await;

    let quantum = config.http_buffer_size;
    if quantum == 0 {
        link.events.warning(WarningCode::NoMemory).await;
        link.events.lifecycle(TaskEvent::Stopped).await;
        return;
    }
    let mut scratch = vec![0u8; quantum];

    // The fetcher is held for the whole worker lifecycle; the owner only
    // reaches it between lifecycles.
    let mut fetcher = fetcher.lock().await;

    link.events.lifecycle(TaskEvent::Started).await;
    debug!("Network reader started");

    let poll_window = config.command_poll_interval();
    let mut connected = false;
    let mut current_uri: Option<String> = None;
    let mut drain_deadline: Option<Instant> = None;

    loop {
        if let Some(command) = link.commands.poll(poll_window).await {
            match command {
                Command::Start { uri } => {
                    if uri.is_some() {
                        current_uri = uri;
                    }
                    output.reset();
                    connected = establish_connection(&mut fetcher, current_uri.as_deref()).await;
                }
                Command::Stop => {
                    if connected {
                        fetcher.close().await;
                    }
                    break;
                }
                Command::StopGracefully => {
                    // Stop accepting new data; buffered output drains below.
                    if connected {
                        fetcher.close().await;
                        connected = false;
                    }
                    drain_deadline = Some(Instant::now() + config.max_drain());
                }
                _ => {}
            }
        }

        if connected {
            let mut faulted = false;
            let want = output.free().min(scratch.len());
            if want > 0 {
                match fetcher.read(&mut scratch[..want]).await {
                    Ok(0) => {}
                    Ok(received) => {
                        output.write(&scratch[..received]);
                    }
                    Err(e) => {
                        warn!(error = %e, "Transport read failed");
                        link.events.warning(WarningCode::Transport).await;
                        faulted = true;
                    }
                }
            }

            if fetcher.is_complete() {
                fetcher.close().await;
                connected = false;
            }

            // A faulted iteration keeps the warning flag raised; the next
            // clean one reports Running and clears it.
            if !faulted {
                link.events.status(TaskEvent::Running);
            }
        } else if output.available() > 0 {
            // Connection closed but buffered bytes remain for downstream.
            link.events.status(TaskEvent::Idle);
        } else {
            // No connection and nothing buffered: stop ourselves.
            break;
        }

        if let Some(deadline) = drain_deadline {
            if Instant::now() >= deadline {
                warn!("Reader drain exceeded max_drain, hard-stopping");
                break;
            }
        }
    }

    link.events.lifecycle(TaskEvent::Stopping).await;
    output.reset();
    link.events.lifecycle(TaskEvent::Stopped).await;
    debug!("Network reader stopped");
}
