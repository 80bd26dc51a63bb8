//! Error types for the statesonic-audio crate.

use crate::graph::NodeId;
use thiserror::Error;

/// Errors raised by audio backends and the context manager.
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio backend is available in this build or on this platform.
    #[error("Audio output is not supported: {0}")]
    Unsupported(String),

    /// The audio context has been closed.
    #[error("Audio context is closed")]
    Closed,

    /// Resuming a suspended context failed (typically an autoplay block).
    #[error("Failed to resume audio context: {0}")]
    ResumeFailed(String),

    /// Creating an audio node failed.
    #[error("Failed to create {kind} node: {reason}")]
    NodeCreation { kind: &'static str, reason: String },

    /// A node id does not refer to a live node.
    #[error("Unknown audio node: {0}")]
    UnknownNode(NodeId),

    /// The operation does not apply to this kind of node.
    #[error("Node {0} does not support this operation")]
    InvalidTarget(NodeId),

    /// Audio device or stream error.
    #[error("Audio device error: {0}")]
    Device(String),

    /// WAV encoding error.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AudioError.
pub type Result<T> = std::result::Result<T, AudioError>;
