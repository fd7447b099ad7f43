//! Runtime error taxonomy.
//!
//! Host-visible failures are typed `Result`s; anything a script must be
//! able to observe travels the other path — it is delivered to the owning
//! coroutine as a resumed error value (see `runner`). A stale resume is
//! neither: it is silently dropped by design.

use thiserror::Error;

use ember_value::CodecError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// Dispatch could not resolve a receiver for a native call.
    #[error("no instance found")]
    NoInstance,

    /// A bounded wait expired without resolution.
    #[error("timeout")]
    Timeout,

    /// A native call rejected its arguments.
    #[error("{0}")]
    BadArgument(String),

    /// A native handler failed.
    #[error("{0}")]
    NativeFailure(String),

    /// The embedded VM reported an unrecoverable error (script syntax or
    /// runtime failure).
    #[error("vm failure: {0}")]
    VmFailure(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl RuntimeError {
    pub fn bad_argument(message: impl Into<String>) -> Self {
        RuntimeError::BadArgument(message.into())
    }

    pub fn native(message: impl Into<String>) -> Self {
        RuntimeError::NativeFailure(message.into())
    }
}
