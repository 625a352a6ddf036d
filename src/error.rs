// src/error.rs
//! Fatal error classes for one engine invocation.
//!
//! Most failures in the engine degrade gracefully: a file that cannot be
//! scanned is counted, a corrupt cache is discarded, a maintenance target
//! that fails is reported next to its siblings. The variants here are the
//! ones that end the request with a nonzero exit and no response document.

use std::path::PathBuf;

/// Errors that abort a whole request.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The request document could not be decoded, or named an unknown command.
    #[error("malformed request: {reason}")]
    Protocol {
        /// What was wrong with the request.
        reason: String,
    },

    /// The autoload tables could not be built or published.
    #[error("autoload generation failed: {reason}")]
    Generation {
        /// What stopped generation.
        reason: String,
    },

    /// An I/O error at a path the engine cannot work without.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The offending path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The engine process exited without a usable response.
    #[error("engine exited with {status}: {stderr}")]
    EngineFailed {
        /// Exit status as reported by the OS.
        status: String,
        /// Captured diagnostic stream.
        stderr: String,
    },
}

impl EngineError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        EngineError::Protocol { reason: reason.into() }
    }

    pub fn generation(reason: impl Into<String>) -> Self {
        EngineError::Generation { reason: reason.into() }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Protocol { .. } => 2,
            EngineError::Generation { .. } | EngineError::Io { .. } | EngineError::EngineFailed { .. } => 1,
        }
    }
}

/// Exit code for any error chain; typed engine errors keep their own code.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EngineError>())
        .map(EngineError::exit_code)
        .unwrap_or(1)
}
