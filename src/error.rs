//! Structured error kinds for the engine.
//!
//! `anyhow` is still used at the CLI boundary (`main.rs`) to attach context
//! and print a single diagnostic line, but every fallible operation inside
//! the engine itself returns `EngineError` so callers can match on the kind
//! of failure (e.g. treat `PrematureEof` as a captured worker exception but
//! `ServerUnavailable` as an immediate, unrecoverable startup failure).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unable to connect to audio server, is it running?")]
    ServerUnavailable,

    #[error("failed registering port '{name}': {reason}")]
    PortRegistration { name: String, reason: String },

    #[error("failed connecting port '{from}' to '{to}': {reason}")]
    Connect {
        from: String,
        to: String,
        reason: String,
    },

    #[error("playback file sample rate {file_rate} does not match engine sample rate {engine_rate}")]
    SampleRateMismatch { file_rate: u32, engine_rate: u32 },

    #[error("playback file has {file_channels} channel(s), expected {expected_channels}")]
    ChannelMismatch {
        file_channels: usize,
        expected_channels: usize,
    },

    #[error("premature end of file reading {path:?}: requested {requested} frames, got {actual}")]
    PrematureEof {
        path: PathBuf,
        requested: usize,
        actual: usize,
    },

    #[error("short write to {path:?}: requested {requested} frames, wrote {actual}")]
    ShortWrite {
        path: PathBuf,
        requested: usize,
        actual: usize,
    },

    #[error("unable to obtain port buffer for '{port}'")]
    BufferAcquire { port: String },

    #[error("a Reactor instance is already active")]
    SingletonViolation,

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed decoding {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },
}
