//! Decode stage: transform boundary between two ring buffers
//!
//! Moves bytes from its input ring buffer through a pluggable `Transform`
//! into its output ring buffer. The identity copy is the minimal conforming
//! transform; a real codec replaces it with format-aware decode producing
//! PCM. Transfer sizing, graceful drain, and stop semantics live here;
//! the codec itself stays outside this module.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::control::{control_channel, Command, TaskEvent, WarningCode, WorkerLink};
use crate::error::Result;
use crate::ring_buffer::RingBuffer;
use crate::worker::{WorkerHandle, WorkerState};

/// Codec transform boundary
///
/// `process` consumes one chunk of encoded input and appends the decoded
/// bytes to `out` (cleared by the caller). Output length may differ from
/// input length.
pub trait Transform: Send + Sync {
    fn process(&self, input: &[u8], out: &mut Vec<u8>);
}

/// Identity transform: byte-for-byte copy
pub struct PassThrough;

impl Transform for PassThrough {
    fn process(&self, input: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(input);
    }
}

/// Worker transforming bytes from an input ring buffer into an output one
pub struct DecodeStreamer {
    input: Arc<RingBuffer>,
    output: Arc<RingBuffer>,
    transform: Arc<dyn Transform>,
    config: Config,
    handle: WorkerHandle,
}

impl DecodeStreamer {
    /// Create a decode stage with `transfer_buffer_size`-byte input and
    /// output buffers
    pub fn new(transform: Arc<dyn Transform>, config: &Config) -> Result<Self> {
        Ok(Self {
            input: Arc::new(RingBuffer::new(config.transfer_buffer_size)?),
            output: Arc::new(RingBuffer::new(config.transfer_buffer_size)?),
            transform,
            config: config.clone(),
            handle: WorkerHandle::new(),
        })
    }

    /// Spawn the decode worker
    ///
    /// Idempotent: a second call while the worker is live is a no-op. The
    /// buffers are already empty at this point (fresh construction, or reset
    /// by the previous lifecycle's exit), so no explicit `Start` is needed
    /// and bytes written immediately after this call are never discarded.
    pub async fn start(&mut self) -> Result<()> {
        if self.handle.is_running() {
            return Ok(());
        }

        let (control, link) = control_channel(self.config.channel_capacity);
        let task = tokio::spawn(decode_task(
            Arc::clone(&self.input),
            Arc::clone(&self.output),
            Arc::clone(&self.transform),
            self.config.clone(),
            link,
        ));
        self.handle.install(control, task);
        Ok(())
    }

    /// Deliver a command to the worker
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.handle.send_command(command).await
    }

    /// Stop immediately, discarding buffered content
    pub async fn stop(&mut self) -> Result<()> {
        self.handle.mark_stopping();
        self.handle.send_command(Command::Stop).await
    }

    /// Drain both buffers, then stop
    pub async fn stop_gracefully(&mut self) -> Result<()> {
        self.handle.mark_stopping();
        self.handle.send_command(Command::StopGracefully).await
    }

    /// Drain pending worker events and update the owner-side state
    pub fn poll_events(&mut self) -> Vec<TaskEvent> {
        self.handle.poll_events()
    }

    pub fn state(&self) -> WorkerState {
        self.handle.state()
    }

    pub fn warning(&self) -> Option<WarningCode> {
        self.handle.warning()
    }

    /// Direct feed: push encoded bytes into the input buffer
    pub fn write(&self, buf: &[u8]) -> usize {
        self.input.write(buf)
    }

    /// Drain decoded bytes from the output buffer
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.output.try_read(buf)
    }

    /// Free space in the input buffer (upstream hop sizing)
    pub fn input_free(&self) -> usize {
        self.input.free()
    }

    /// Decoded bytes waiting in the output buffer
    pub fn output_available(&self) -> usize {
        self.output.available()
    }
}

async fn decode_task(
    input: Arc<RingBuffer>,
    output: Arc<RingBuffer>,
    transform: Arc<dyn Transform>,
    config: Config,
    mut link: WorkerLink,
) {
    link.events.lifecycle(TaskEvent::Starting).await;

    let quantum = config.transfer_buffer_size;
    if quantum == 0 {
        link.events.warning(WarningCode::NoMemory).await;
        link.events.lifecycle(TaskEvent::Stopped).await;
        return;
    }
    let mut scratch = vec![0u8; quantum];
    let mut staged: Vec<u8> = Vec::with_capacity(quantum);

    link.events.lifecycle(TaskEvent::Started).await;
    debug!("Decode worker started");

    let poll_window = config.command_poll_interval();
    let mut stopping = false;
    let mut drain_deadline: Option<Instant> = None;

    loop {
        if let Some(command) = link.commands.poll(poll_window).await {
            match command {
                Command::Start { .. } => {
                    input.reset();
                    output.reset();
                }
                Command::Stop => break,
                Command::StopGracefully => {
                    stopping = true;
                    drain_deadline = Some(Instant::now() + config.max_drain());
                }
                _ => {}
            }
        }

        let bytes_to_read = output.free().min(input.available()).min(scratch.len());
        if bytes_to_read > 0 {
            let bytes_read = input.read(&mut scratch[..bytes_to_read], Duration::ZERO).await;
            if bytes_read > 0 {
                staged.clear();
                transform.process(&scratch[..bytes_read], &mut staged);
                if !staged.is_empty() {
                    output.write(&staged);
                }
            }
        }

        if input.available() > 0 || output.available() > 0 {
            link.events.status(TaskEvent::Running);
        } else {
            link.events.status(TaskEvent::Idle);
        }

        if stopping && input.available() == 0 && output.available() == 0 {
            break;
        }
        if let Some(deadline) = drain_deadline {
            if Instant::now() >= deadline {
                warn!("Decode drain exceeded max_drain, hard-stopping");
                break;
            }
        }
    }

    link.events.lifecycle(TaskEvent::Stopping).await;
    input.reset();
    output.reset();
    link.events.lifecycle(TaskEvent::Stopped).await;
    debug!("Decode worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerState;

    fn test_config() -> Config {
        Config {
            transfer_buffer_size: 256,
            command_poll_interval_ms: 1,
            max_drain_ms: 500,
            ..Config::default()
        }
    }

    async fn wait_until<F: FnMut() -> bool>(mut cond: F) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn passes_bytes_through_unchanged() {
        let mut decoder = DecodeStreamer::new(Arc::new(PassThrough), &test_config()).unwrap();
        decoder.start().await.unwrap();

        let payload: Vec<u8> = (0u8..200).collect();
        assert_eq!(decoder.write(&payload), 200);

        wait_until(|| decoder.output_available() == 200).await;

        let mut out = vec![0u8; 256];
        assert_eq!(decoder.read(&mut out), 200);
        assert_eq!(&out[..200], &payload[..]);

        decoder.stop().await.unwrap();
        wait_until(|| {
            let _ = decoder.poll_events();
            decoder.state() == WorkerState::Stopped
        })
        .await;
    }

    #[tokio::test]
    async fn graceful_stop_drains_first() {
        let mut decoder = DecodeStreamer::new(Arc::new(PassThrough), &test_config()).unwrap();
        decoder.start().await.unwrap();

        decoder.write(&[5u8; 64]);
        wait_until(|| decoder.output_available() == 64).await;

        decoder.stop_gracefully().await.unwrap();

        // Not drained yet: worker must keep running.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let _ = decoder.poll_events();
        assert_ne!(decoder.state(), WorkerState::Stopped);

        let mut out = vec![0u8; 64];
        assert_eq!(decoder.read(&mut out), 64);

        wait_until(|| {
            let _ = decoder.poll_events();
            decoder.state() == WorkerState::Stopped
        })
        .await;
    }

    #[tokio::test]
    async fn immediate_stop_discards_buffered_content() {
        let mut decoder = DecodeStreamer::new(Arc::new(PassThrough), &test_config()).unwrap();
        decoder.start().await.unwrap();

        decoder.write(&[1u8; 100]);
        wait_until(|| decoder.output_available() > 0).await;

        decoder.stop().await.unwrap();
        wait_until(|| {
            let _ = decoder.poll_events();
            decoder.state() == WorkerState::Stopped
        })
        .await;

        assert_eq!(decoder.output_available(), 0);
        assert_eq!(decoder.input_free(), 256);
    }

    #[tokio::test]
    async fn restart_after_stop() {
        let mut decoder = DecodeStreamer::new(Arc::new(PassThrough), &test_config()).unwrap();
        decoder.start().await.unwrap();
        decoder.stop().await.unwrap();
        wait_until(|| {
            let _ = decoder.poll_events();
            decoder.state() == WorkerState::Stopped
        })
        .await;

        decoder.start().await.unwrap();
        decoder.write(&[3u8; 16]);
        wait_until(|| decoder.output_available() == 16).await;
        decoder.stop().await.unwrap();
    }
}
