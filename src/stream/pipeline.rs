//! Pipeline: one reader + one decoder feeding a mixer role
//!
//! Binds an `HttpStreamer` and a `DecodeStreamer` to a mixer input role and
//! runs the transfer loop that moves bytes reader -> decoder -> mixer, each
//! hop bounded by downstream free space so no buffer is ever overrun.
//!
//! The watch step runs every iteration: the pipeline drains the reader's and
//! decoder's event queues and updates its activity flags *before* evaluating
//! the stop condition. When the reader reports `Stopped` (either commanded or
//! its own end-of-stream transition) the pipeline forwards `StopGracefully`
//! to the decoder so buffered audio drains; once the decoder reports
//! `Stopped` too, the pipeline exits.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::control::{control_channel, Command, TaskEvent, WarningCode, WorkerLink};
use crate::error::Result;
use crate::ring_buffer::RingBuffer;
use crate::stream::decode::DecodeStreamer;
use crate::stream::http::HttpStreamer;
use crate::stream::mixer::CombineStreamer;
use crate::worker::{WorkerHandle, WorkerState};

/// Which mixer input this pipeline's decoder output feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRole {
    Media,
    Announcement,
}

/// Reader + decoder pair bound to one mixer role
pub struct Pipeline {
    role: PipelineRole,
    reader: Arc<Mutex<HttpStreamer>>,
    decoder: Arc<Mutex<DecodeStreamer>>,
    mixer_input: Arc<RingBuffer>,
    config: Config,
    handle: WorkerHandle,
}

impl Pipeline {
    /// Bind a reader and decoder to the given mixer role
    pub fn new(
        role: PipelineRole,
        reader: HttpStreamer,
        decoder: DecodeStreamer,
        mixer: &CombineStreamer,
        config: &Config,
    ) -> Self {
        Self {
            role,
            reader: Arc::new(Mutex::new(reader)),
            decoder: Arc::new(Mutex::new(decoder)),
            mixer_input: mixer.role_input(role),
            config: config.clone(),
            handle: WorkerHandle::new(),
        }
    }

    pub fn role(&self) -> PipelineRole {
        self.role
    }

    /// Start the reader and decoder, then spawn the transfer loop
    ///
    /// Idempotent while the transfer loop is live.
    pub async fn start(&mut self, uri: &str) -> Result<()> {
        if self.handle.is_running() {
            return Ok(());
        }

        {
            let mut reader = self.reader.lock().await;
            reader.start_with_uri(uri).await?;
        }
        {
            let mut decoder = self.decoder.lock().await;
            decoder.start().await?;
        }

        let (control, link) = control_channel(self.config.channel_capacity);
        let task = tokio::spawn(transfer_task(
            Arc::clone(&self.reader),
            Arc::clone(&self.decoder),
            Arc::clone(&self.mixer_input),
            self.config.clone(),
            link,
        ));
        self.handle.install(control, task);
        Ok(())
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.handle.send_command(command).await
    }

    /// Stop immediately; `Stop` is propagated to the reader and decoder
    /// before the transfer loop exits
    pub async fn stop(&mut self) -> Result<()> {
        self.handle.mark_stopping();
        self.handle.send_command(Command::Stop).await
    }

    /// Stop the reader gracefully and exit once both upstreams have drained
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

    /// Inner reader handle; only lockable while the transfer loop is not
    /// running (the loop holds the lock for its lifetime)
    pub fn reader(&self) -> Arc<Mutex<HttpStreamer>> {
        Arc::clone(&self.reader)
    }

    /// Inner decoder handle; same locking caveat as `reader`
    pub fn decoder(&self) -> Arc<Mutex<DecodeStreamer>> {
        Arc::clone(&self.decoder)
    }
}

async fn transfer_task(
    reader: Arc<Mutex<HttpStreamer>>,
    decoder: Arc<Mutex<DecodeStreamer>>,
    mixer_input: Arc<RingBuffer>,
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
    let mut transfer_buf = vec![0u8; quantum];

    // Owned for the lifetime of the loop; the pipeline is the sole owner of
    // its reader and decoder while running.
    let mut reader = reader.lock().await;
    let mut decoder = decoder.lock().await;

    link.events.lifecycle(TaskEvent::Started).await;
    debug!("Pipeline transfer loop started");

    let poll_window = config.command_poll_interval();
    let mut reading = true;
    let mut decoding = true;
    let mut decoder_drain_requested = false;
    let mut stop_deadline: Option<Instant> = None;

    loop {
        if let Some(command) = link.commands.poll(poll_window).await {
            match command {
                Command::Stop => {
                    let _ = reader.send_command(Command::Stop).await;
                    let _ = decoder.send_command(Command::Stop).await;
                    break;
                }
                Command::StopGracefully => {
                    let _ = reader.send_command(Command::StopGracefully).await;
                    stop_deadline = Some(Instant::now() + config.max_drain());
                }
                _ => {}
            }
        }

        let mut bytes_moved = 0;

        // Decoder output -> mixer role input.
        let want = mixer_input.free().min(transfer_buf.len());
        if want > 0 {
            let bytes_read = decoder.read(&mut transfer_buf[..want]);
            if bytes_read > 0 {
                bytes_moved += mixer_input.write(&transfer_buf[..bytes_read]);
            }
        }

        // Reader output -> decoder input.
        let want = decoder.input_free().min(transfer_buf.len());
        if want > 0 {
            let bytes_read = reader.read(&mut transfer_buf[..want]);
            if bytes_read > 0 {
                bytes_moved += decoder.write(&transfer_buf[..bytes_read]);
            }
        }

        // Watch step: fold upstream events into the activity flags every
        // iteration, before the stop condition is evaluated.
        for event in reader.poll_events() {
            if event == TaskEvent::Stopped {
                reading = false;
            }
        }
        if !reading && !decoder_drain_requested {
            // Upstream finished; let the decoder drain what is buffered.
            let _ = decoder.send_command(Command::StopGracefully).await;
            decoder_drain_requested = true;
        }
        for event in decoder.poll_events() {
            if event == TaskEvent::Stopped {
                decoding = false;
            }
        }

        if reading || decoding {
            if bytes_moved > 0 || reader.available() > 0 || decoder.output_available() > 0 {
                link.events.status(TaskEvent::Running);
            } else {
                link.events.status(TaskEvent::Idle);
            }
        }

        if !reading && !decoding {
            break;
        }

        if let Some(deadline) = stop_deadline {
            if Instant::now() >= deadline {
                warn!("Pipeline drain exceeded max_drain, hard-stopping upstreams");
                let _ = reader.send_command(Command::Stop).await;
                let _ = decoder.send_command(Command::Stop).await;
                break;
            }
        }
    }

    link.events.lifecycle(TaskEvent::Stopping).await;
    link.events.lifecycle(TaskEvent::Stopped).await;
    debug!("Pipeline transfer loop stopped");
}
