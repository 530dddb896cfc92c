//! Hardware sink stage
//!
//! Feeds bytes from an input ring buffer to an exclusive audio sink. The
//! owner acquires the sink lock and pushes the stream configuration *before*
//! the worker spawns, so acquisition failure surfaces as a `start()` error
//! rather than a worker warning. The sink lock is released by `poll_events`
//! when the owner observes the worker's `Stopped` event.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::control::{control_channel, Command, TaskEvent, WarningCode, WorkerLink};
use crate::error::{Error, Result};
use crate::ring_buffer::RingBuffer;
use crate::worker::{WorkerHandle, WorkerState};

/// Sample width of the PCM stream handed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitDepth {
    Bits16,
    Bits32,
}

impl BitDepth {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            BitDepth::Bits16 => 2,
            BitDepth::Bits32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

/// Exclusive audio output device
///
/// `write` accepts `source_depth` PCM and performs any bit-depth expansion
/// the hardware needs; a short accept count means the device ran out of DMA
/// space within its own timeout.
#[async_trait]
pub trait HardwareSink: Send + Sync {
    /// Push the stream format to the device
    fn configure(&self, rate_hz: u32, depth: BitDepth, layout: ChannelLayout) -> Result<()>;

    /// Write PCM bytes, returning how many were accepted
    async fn write(&self, pcm: &[u8], source_depth: BitDepth) -> Result<usize>;

    /// Overwrite the device buffer with silence
    fn flush_to_silence(&self);

    /// Attempt to take exclusive ownership; false if another client holds it
    fn try_lock(&self) -> bool;

    /// Release exclusive ownership
    fn unlock(&self);
}

/// Worker draining its input buffer into a locked hardware sink
pub struct SinkSpeaker {
    input: Arc<RingBuffer>,
    sink: Arc<dyn HardwareSink>,
    rate_hz: u32,
    depth: BitDepth,
    layout: ChannelLayout,
    config: Config,
    handle: WorkerHandle,
    sink_locked: bool,
}

impl SinkSpeaker {
    pub fn new(
        sink: Arc<dyn HardwareSink>,
        rate_hz: u32,
        depth: BitDepth,
        layout: ChannelLayout,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            input: Arc::new(RingBuffer::new(config.transfer_buffer_size)?),
            sink,
            rate_hz,
            depth,
            layout,
            config: config.clone(),
            handle: WorkerHandle::new(),
            sink_locked: false,
        })
    }

    /// Acquire the sink, push the stream format, and spawn the player
    ///
    /// Fails without spawning if the sink is held by another client or
    /// rejects the configuration.
    pub async fn start(&mut self) -> Result<()> {
        if self.handle.is_running() {
            return Ok(());
        }

        if !self.sink_locked {
            if !self.sink.try_lock() {
                return Err(Error::AudioOutput(
                    "audio sink is held by another client".to_string(),
                ));
            }
            self.sink_locked = true;
        }
        if let Err(e) = self.sink.configure(self.rate_hz, self.depth, self.layout) {
            self.sink.unlock();
            self.sink_locked = false;
            return Err(e);
        }

        let (control, link) = control_channel(self.config.channel_capacity);
        let task = tokio::spawn(player_task(
            Arc::clone(&self.input),
            Arc::clone(&self.sink),
            self.depth,
            self.config.clone(),
            link,
        ));
        self.handle.install(control, task);
        Ok(())
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.handle.send_command(command).await
    }

    /// Silence the device and stop, discarding buffered input
    pub async fn stop(&mut self) -> Result<()> {
        self.handle.mark_stopping();
        self.handle.send_command(Command::Stop).await
    }

    /// Stop after the buffered input has been played out
    pub async fn stop_gracefully(&mut self) -> Result<()> {
        self.handle.mark_stopping();
        self.handle.send_command(Command::StopGracefully).await
    }

    /// Drain worker events; on `Stopped` the sink lock is released and any
    /// leftover input discarded
    pub fn poll_events(&mut self) -> Vec<TaskEvent> {
        let events = self.handle.poll_events();
        if events.contains(&TaskEvent::Stopped) {
            if self.sink_locked {
                self.sink.unlock();
                self.sink_locked = false;
            }
            self.input.reset();
        }
        events
    }

    pub fn state(&self) -> WorkerState {
        self.handle.state()
    }

    pub fn warning(&self) -> Option<WarningCode> {
        self.handle.warning()
    }

    /// Queue PCM bytes for playback; returns how many fit
    pub fn write(&self, pcm: &[u8]) -> usize {
        self.input.write(pcm)
    }

    pub fn free(&self) -> usize {
        self.input.free()
    }

    pub fn has_buffered_data(&self) -> bool {
        self.input.available() > 0
    }

    /// Feed a whole PCM block, chunked to the buffer's free space
    ///
    /// Yields between chunks while the buffer is full; gives up if the
    /// player stops underneath it. Returns how many bytes were queued.
    pub async fn play(&mut self, pcm: &[u8]) -> usize {
        let mut written = 0;
        while written < pcm.len() {
            written += self.input.write(&pcm[written..]);
            if written < pcm.len() {
                self.poll_events();
                if !self.handle.is_running() {
                    break;
                }
                sleep(self.config.command_poll_interval()).await;
            }
        }
        written
    }
}

impl Drop for SinkSpeaker {
    fn drop(&mut self) {
        if self.sink_locked {
            self.sink.unlock();
        }
    }
}

async fn player_task(
    input: Arc<RingBuffer>,
    sink: Arc<dyn HardwareSink>,
    depth: BitDepth,
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
    let mut pcm = vec![0u8; quantum];

    link.events.lifecycle(TaskEvent::Started).await;
    debug!("Speaker player started");

    let poll_window = config.command_poll_interval();
    let mut stopping = false;
    let mut drain_deadline: Option<Instant> = None;

    loop {
        if let Some(command) = link.commands.poll(poll_window).await {
            match command {
                Command::Stop => break,
                Command::StopGracefully => {
                    stopping = true;
                    drain_deadline = Some(Instant::now() + config.max_drain());
                }
                _ => {}
            }
        }

        let bytes_read = input.try_read(&mut pcm);
        if bytes_read > 0 {
            match sink.write(&pcm[..bytes_read], depth).await {
                Ok(accepted) if accepted == bytes_read => {
                    link.events.status(TaskEvent::Running);
                }
                Ok(accepted) => {
                    // Device DMA stalled inside its own timeout window; the
                    // unaccepted tail is dropped, playback continues. No
                    // Running report this iteration so the warning flag
                    // stays raised until a clean write.
                    warn!(
                        requested = bytes_read,
                        accepted, "audio sink accepted a short write"
                    );
                    link.events.warning(WarningCode::Timeout).await;
                }
                Err(e) => {
                    warn!("audio sink write failed: {e}");
                    link.events.warning(WarningCode::Timeout).await;
                }
            }
        } else {
            link.events.status(TaskEvent::Idle);
        }

        if stopping {
            if input.available() == 0 {
                break;
            }
            if let Some(deadline) = drain_deadline {
                if Instant::now() >= deadline {
                    warn!("Speaker drain exceeded max_drain, hard-stopping");
                    break;
                }
            }
        }
    }

    sink.flush_to_silence();
    link.events.lifecycle(TaskEvent::Stopping).await;
    input.reset();
    link.events.lifecycle(TaskEvent::Stopped).await;
    debug!("Speaker player stopped");
}
