//! Core error type for APDU framing and transport
//!
//! Higher layers wrap this error transparently so that transport failures reach the
//! caller unchanged.

use crate::transport::TransportError;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport failed to carry the exchange
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid command length
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Response shorter than a status word
    #[error("Incomplete response: {0} byte(s)")]
    IncompleteResponse(usize),

    /// Parse error when processing a frame
    #[error("Parse error: {0}")]
    Parse(&'static str),

    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new parse error
    pub const fn parse(message: &'static str) -> Self {
        Self::Parse(message)
    }

    /// Whether the error originates from the transport, looking through context layers
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Context { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

/// Extension trait for Result with APDU Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}
