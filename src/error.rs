//! Error types for wavepipe
//!
//! Defines crate-wide error types using thiserror for clear error propagation.
//! Worker-internal faults never surface here; they are reported to the owner
//! as `TaskEvent::Warning` via the event queue. This type covers the
//! owner-facing API surface: configuration, setup, and command delivery.

use thiserror::Error;

/// Main error type for wavepipe
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ring buffer construction errors
    #[error("Buffer error: {0}")]
    Buffer(String),

    /// Network transport (fetcher) errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Command or event channel errors (worker gone)
    #[error("Channel error: {0}")]
    Channel(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the wavepipe Error
pub type Result<T> = std::result::Result<T, Error>;
