//! Streaming pipeline stages
//!
//! Each stage is an independent worker moving bytes between fixed-capacity
//! ring buffers: the network reader feeds the decoder, the decoder feeds the
//! mixer through its pipeline, and the mixer's combined output drains into
//! the hardware sink.

pub mod decode;
pub mod http;
pub mod mixer;
pub mod pipeline;
pub mod speaker;

pub use decode::{DecodeStreamer, PassThrough, Transform};
pub use http::{Fetcher, HttpStreamer};
pub use mixer::CombineStreamer;
pub use pipeline::{Pipeline, PipelineRole};
pub use speaker::{BitDepth, ChannelLayout, HardwareSink, SinkSpeaker};
