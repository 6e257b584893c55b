//! Error taxonomy for the engine's control surface.
//!
//! Only three things can actually fail here: building the processing
//! context, decoding an input source, and handing the engine a value it
//! cannot clamp into range. Everything else is expressed as a ramp toward
//! whatever the caller asked for.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The processing context or a real-time unit failed to register.
    /// Fatal: `initialize` releases partial resources and must be re-invoked
    /// after the cause is corrected.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The input could not be parsed. Recoverable: prior engine state is
    /// left intact.
    #[error("decode failed: {0}")]
    Decode(String),

    /// Parameter misuse that cannot be clamped into range, such as a stale
    /// tone handle or an exhausted voice pool.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<hound::Error> for EngineError {
    fn from(err: hound::Error) -> Self {
        EngineError::Decode(err.to_string())
    }
}
