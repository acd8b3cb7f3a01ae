//! Error types for segue-engine
//!
//! Pipeline failures reach callers twice: as an `Err` from the engine
//! operation and as an [`EngineEvent::Error`](segue_common::EngineEvent)
//! broadcast. Neither path panics or ends the process.

use segue_common::events::{ErrorDomain, PipelineId};
use thiserror::Error;

/// Main error type for segue-engine
#[derive(Error, Debug)]
pub enum Error {
    /// A pipeline could not be built for this url
    #[error("Cannot play {url}: {reason}")]
    Construction {
        url: String,
        reason: String,
        domain: ErrorDomain,
        code: i32,
    },

    /// A live pipeline failed
    #[error("{pipeline_id} failed ({domain}/{code}): {message}")]
    Runtime {
        pipeline_id: PipelineId,
        domain: ErrorDomain,
        code: i32,
        message: String,
    },

    /// The preload slot holds a different track than the one requested
    #[error("Preloaded {preloaded} does not match requested {requested}")]
    PreloadMismatch { preloaded: String, requested: String },

    /// Operation not valid in the current engine state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request parameter
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Settings loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// The engine runtime task has ended
    #[error("Engine runtime is gone")]
    EngineGone,
}

impl From<segue_common::Error> for Error {
    fn from(err: segue_common::Error) -> Self {
        match err {
            segue_common::Error::Io(e) => Error::Io(e),
            other => Error::Config(other.to_string()),
        }
    }
}

impl Error {
    /// Domain and code to report in an error event
    pub fn domain_and_code(&self) -> (ErrorDomain, i32) {
        use segue_common::events::{core_codes, resource_codes};
        match self {
            Error::Construction { domain, code, .. } | Error::Runtime { domain, code, .. } => {
                (*domain, *code)
            }
            Error::Io(_) => (ErrorDomain::Resource, resource_codes::OPEN_READ),
            _ => (ErrorDomain::Core, core_codes::FAILED),
        }
    }
}

/// Convenience Result type using segue-engine Error
pub type Result<T> = std::result::Result<T, Error>;
