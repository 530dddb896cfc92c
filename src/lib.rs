//! wavepipe: concurrent byte-stream audio pipeline
//!
//! A set of cooperating worker stages that move audio bytes from a network
//! fetcher through decode and mixing to an exclusive hardware sink. Each
//! stage runs as a tokio task with a bounded command/event channel pair and
//! hands bytes to the next stage through a fixed-capacity ring buffer, so
//! memory use is bounded end to end.
//!
//! Stages:
//! - [`stream::HttpStreamer`] pulls bytes through a [`stream::Fetcher`]
//! - [`stream::DecodeStreamer`] applies a [`stream::Transform`] in between
//! - [`stream::CombineStreamer`] mixes media and announcement PCM
//! - [`stream::Pipeline`] binds a reader + decoder to one mixer role
//! - [`stream::SinkSpeaker`] drains mixed PCM into a [`stream::HardwareSink`]

pub mod config;
pub mod control;
pub mod error;
pub mod ring_buffer;
pub mod stream;
pub mod worker;

pub use config::Config;
pub use control::{Command, TaskEvent, WarningCode};
pub use error::{Error, Result};
pub use ring_buffer::RingBuffer;
pub use worker::WorkerState;
