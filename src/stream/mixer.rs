//! Combining mixer stage
//!
//! Merges the media and announcement ring buffers into one output stream of
//! 16-bit little-endian PCM. Media samples pass through a Q15 fixed-point
//! ducking gain; when both streams carry data the sum is scaled by a one-bit
//! shift to avoid clipping. The shift is a fixed approximation, not a
//! normalized mix: an announcement mixed over media plays 6 dB quieter than
//! one played alone, and that loudness behavior is kept as-is.
//!
//! The mixer has no graceful stop distinct from `Stop`; it has no notion of
//! upstream end-of-stream; the pipelines feeding it own that decision.

use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::control::{control_channel, Command, TaskEvent, WarningCode, WorkerLink};
use crate::error::Result;
use crate::ring_buffer::RingBuffer;
use crate::worker::{WorkerHandle, WorkerState};

/// Q15 unity gain. Held in i32 so unity itself is representable; the
/// multiply path is skipped entirely at unity, keeping passthrough
/// bit-exact.
const GAIN_UNITY: i32 = 1 << 15;

/// Quantize a [0.0, 1.0] ratio to Q15
fn q15_from_ratio(ratio: f32) -> i32 {
    (ratio.clamp(0.0, 1.0) * GAIN_UNITY as f32) as i32
}

/// Scale 16-bit LE samples in place by a Q15 gain
fn apply_gain(buf: &mut [u8], gain: i32) {
    for sample in buf.chunks_exact_mut(2) {
        let s = i16::from_le_bytes([sample[0], sample[1]]) as i32;
        let scaled = ((s * gain) >> 15) as i16;
        sample.copy_from_slice(&scaled.to_le_bytes());
    }
}

/// Sum two equal-length 16-bit LE sample runs into `out`, shifting the sum
/// right by one bit to avoid overflow
fn mix_into(media: &[u8], announcement: &[u8], out: &mut [u8]) {
    for ((m, a), o) in media
        .chunks_exact(2)
        .zip(announcement.chunks_exact(2))
        .zip(out.chunks_exact_mut(2))
    {
        let ms = i16::from_le_bytes([m[0], m[1]]) as i32;
        let an = i16::from_le_bytes([a[0], a[1]]) as i32;
        let mixed = ((ms + an) >> 1) as i16;
        o.copy_from_slice(&mixed.to_le_bytes());
    }
}

/// Worker merging media and announcement streams, with ducking and media
/// pause control
pub struct CombineStreamer {
    media: Arc<RingBuffer>,
    announcement: Arc<RingBuffer>,
    output: Arc<RingBuffer>,
    config: Config,
    handle: WorkerHandle,
}

impl CombineStreamer {
    /// Create a mixer with `transfer_buffer_size`-byte input and output
    /// buffers
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            media: Arc::new(RingBuffer::new(config.transfer_buffer_size)?),
            announcement: Arc::new(RingBuffer::new(config.transfer_buffer_size)?),
            output: Arc::new(RingBuffer::new(config.transfer_buffer_size)?),
            config: config.clone(),
            handle: WorkerHandle::new(),
        })
    }

    /// Spawn the mixing worker (idempotent)
    pub async fn start(&mut self) -> Result<()> {
        if self.handle.is_running() {
            return Ok(());
        }

        let (control, link) = control_channel(self.config.channel_capacity);
        let task = tokio::spawn(combine_task(
            Arc::clone(&self.media),
            Arc::clone(&self.announcement),
            Arc::clone(&self.output),
            self.config.clone(),
            link,
        ));
        self.handle.install(control, task);
        Ok(())
    }

    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.handle.send_command(command).await
    }

    /// Stop immediately, discarding all buffered content
    pub async fn stop(&mut self) -> Result<()> {
        self.handle.mark_stopping();
        self.handle.send_command(Command::Stop).await
    }

    /// Set the media ducking gain
    pub async fn duck(&self, ratio: f32) -> Result<()> {
        self.handle.send_command(Command::Duck { ratio }).await
    }

    pub async fn pause_media(&self) -> Result<()> {
        self.handle.send_command(Command::PauseMedia).await
    }

    pub async fn resume_media(&self) -> Result<()> {
        self.handle.send_command(Command::ResumeMedia).await
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

    /// Direct feed into the media input, honoring free space
    pub fn write_media(&self, buf: &[u8]) -> usize {
        self.media.write(buf)
    }

    /// Direct feed into the announcement input, honoring free space
    pub fn write_announcement(&self, buf: &[u8]) -> usize {
        self.announcement.write(buf)
    }

    pub fn media_free(&self) -> usize {
        self.media.free()
    }

    pub fn announcement_free(&self) -> usize {
        self.announcement.free()
    }

    /// Drain mixed bytes from the output buffer
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.output.try_read(buf)
    }

    /// Mixed bytes waiting in the output buffer
    pub fn output_available(&self) -> usize {
        self.output.available()
    }

    /// Shared handle to the input ring buffer for one pipeline role
    ///
    /// Each role's buffer is single-producer: exactly one pipeline may feed
    /// a given role at a time.
    pub(crate) fn role_input(&self, role: super::pipeline::PipelineRole) -> Arc<RingBuffer> {
        match role {
            super::pipeline::PipelineRole::Media => Arc::clone(&self.media),
            super::pipeline::PipelineRole::Announcement => Arc::clone(&self.announcement),
        }
    }
}

async fn combine_task(
    media: Arc<RingBuffer>,
    announcement: Arc<RingBuffer>,
    output: Arc<RingBuffer>,
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
    let mut media_buf = vec![0u8; quantum];
    let mut announcement_buf = vec![0u8; quantum];
    let mut combination_buf = vec![0u8; quantum];

    link.events.lifecycle(TaskEvent::Started).await;
    debug!("Mixer started");

    let poll_window = config.command_poll_interval();
    let mut gain = GAIN_UNITY;
    let mut transfer_media = true;

    loop {
        if let Some(command) = link.commands.poll(poll_window).await {
            match command {
                Command::Stop => break,
                Command::Duck { ratio } => {
                    gain = q15_from_ratio(ratio);
                    debug!(ratio, gain, "Ducking gain updated");
                }
                Command::PauseMedia => transfer_media = false,
                Command::ResumeMedia => transfer_media = true,
                _ => {}
            }
        }

        let media_available = if transfer_media { media.available() } else { 0 };
        let announcement_available = announcement.available();
        let output_free = output.free();

        if output_free > 0 && media_available + announcement_available > 0 {
            // Narrow the transfer only by streams that currently hold data,
            // so a silent stream never starves the other; then align down to
            // whole 16-bit samples.
            let mut bytes_to_read = output_free.min(quantum);
            if media_available > 0 {
                bytes_to_read = bytes_to_read.min(media_available);
            }
            if announcement_available > 0 {
                bytes_to_read = bytes_to_read.min(announcement_available);
            }
            bytes_to_read &= !1;

            let mut media_bytes_read = 0;
            if media_available > 0 && bytes_to_read > 0 {
                media_bytes_read = media.try_read(&mut media_buf[..bytes_to_read]);
                if media_bytes_read > 0 && gain < GAIN_UNITY {
                    apply_gain(&mut media_buf[..media_bytes_read], gain);
                }
            }

            let mut announcement_bytes_read = 0;
            if announcement_available > 0 && bytes_to_read > 0 {
                announcement_bytes_read =
                    announcement.try_read(&mut announcement_buf[..bytes_to_read]);
            }

            let bytes_written = if media_bytes_read > 0 && announcement_bytes_read > 0 {
                let len = media_bytes_read.min(announcement_bytes_read);
                mix_into(
                    &media_buf[..len],
                    &announcement_buf[..len],
                    &mut combination_buf[..len],
                );
                output.write(&combination_buf[..len])
            } else if media_bytes_read > 0 {
                output.write(&media_buf[..media_bytes_read])
            } else if announcement_bytes_read > 0 {
                output.write(&announcement_buf[..announcement_bytes_read])
            } else {
                0
            };

            if bytes_written > 0 {
                link.events.status(TaskEvent::Running);
            } else if output.available() == 0 {
                link.events.status(TaskEvent::Idle);
            }
        } else if output.available() == 0 {
            link.events.status(TaskEvent::Idle);
        }
    }

    link.events.lifecycle(TaskEvent::Stopping).await;
    media.reset();
    announcement.reset();
    output.reset();
    link.events.lifecycle(TaskEvent::Stopped).await;
    debug!("Mixer stopped");
}
