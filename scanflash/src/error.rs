//! Error types for scanflash.

use crate::upgrade::Phase;
use std::io;
use thiserror::Error;

/// Result type for scanflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for scanflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Transport failure: write error, closed port or a dead reader.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No acknowledgment arrived in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Malformed image, frame or parameter.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// CRC-32 checksum mismatch in a decoded frame.
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Checksum carried by the frame.
        expected: u32,
        /// Checksum computed over the payload.
        actual: u32,
    },

    /// The device answered with something the session cannot accept.
    #[error("Unexpected acknowledgment: {0}")]
    UnexpectedAcknowledgment(String),

    /// The state machine was asked for a transition it does not allow.
    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition {
        /// Phase the session was in.
        from: Phase,
        /// Phase that was requested.
        to: Phase,
    },

    /// The operator aborted the session.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The upgrade session ended in the `Failed` state.
    #[error("upgrade failed during {phase} ({chunks_written}/{total_chunks} chunks written): {source}")]
    Failed {
        /// Last phase reached before the failure.
        phase: Phase,
        /// Chunks acknowledged before the failure.
        chunks_written: usize,
        /// Chunks the image was split into.
        total_chunks: usize,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the innermost cause, looking through [`Error::Failed`].
    pub fn root(&self) -> &Self {
        match self {
            Self::Failed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the phase a failed session stopped in, if any.
    pub fn failed_phase(&self) -> Option<Phase> {
        match self {
            Self::Failed { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Whether the root cause is an acknowledgment timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout(_))
    }

    /// Whether the root cause is an operator cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled(_))
    }
}
