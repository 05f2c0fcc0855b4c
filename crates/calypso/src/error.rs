//! Session engine errors

use calypso_apdu_core::StatusWord;
use derive_more::Display;
use iso7816_tlv::TlvError;
use thiserror::Error;

use crate::commands::CommandKind;

/// Result type for Calypso session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a status word the card or SAM reported as a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FailureKind {
    /// Access to the file or record is forbidden
    #[display("access forbidden")]
    AccessForbidden,
    /// The targeted data could not be accessed
    #[display("data access")]
    DataAccess,
    /// Record, offset or counter value out of bounds
    #[display("data out of bounds")]
    DataOutOfBounds,
    /// A parameter of the command was rejected
    #[display("illegal parameter")]
    IllegalParameter,
    /// The security context does not allow the command
    #[display("security context")]
    SecurityContext,
    /// A cryptographic check failed
    #[display("security data")]
    SecurityData,
    /// The card's own session buffer overflowed
    #[display("session buffer overflow")]
    SessionBufferOverflow,
    /// The application is terminated
    #[display("terminated")]
    Terminated,
    /// A SAM counter reached its limit
    #[display("counter overflow")]
    CounterOverflow,
}

/// Error type for Calypso session operations
#[derive(Debug, Error)]
pub enum Error {
    /// Transport or framing error, propagated unchanged
    #[error(transparent)]
    Apdu(#[from] calypso_apdu_core::Error),

    /// A command parameter is out of range; nothing was sent
    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Rejected value
        value: usize,
    },

    /// The status word is not known for this command
    #[error("{command}: unknown status word {status}")]
    UnknownStatus {
        /// Command that received the status
        command: CommandKind,
        /// Status word received
        status: StatusWord,
    },

    /// The status word is a known failure for this command
    #[error("{command} failed ({failure}): {message} [{status}]")]
    CommandFailed {
        /// Command that failed
        command: CommandKind,
        /// Failure classification
        failure: FailureKind,
        /// Status word received
        status: StatusWord,
        /// Description of the status word
        message: &'static str,
    },

    /// Operation not allowed in the current session state
    #[error("Illegal state: {0}")]
    IllegalState(&'static str),

    /// The prepared modifications do not fit in the card session buffer
    #[error("Session buffer overflow: {required} required, {capacity} available")]
    SessionBufferOverflow {
        /// Units the pending commands need
        required: usize,
        /// Units left in the session buffer
        capacity: usize,
    },

    /// The SAM rejected the card's closing signature
    #[error("Session authentication failed: card signature rejected by the SAM")]
    AuthenticationFailed,

    /// The SAM could not be reached to verify the card's closing signature
    #[error("Session authentication not verified: {0}")]
    AuthenticationNotVerified(#[source] Box<Self>),

    /// The session KVC is not in the authorized list
    #[error("Unauthorized KVC: {0:#04X}")]
    UnauthorizedKvc(u8),

    /// No SAM could be allocated
    #[error("No SAM resource available")]
    NoSamResourceAvailable,

    /// A response does not have the expected layout
    #[error("Invalid response: {0}")]
    InvalidResponse(&'static str),

    /// The file type byte of a select response is unknown
    #[error("Unknown file type: {0:#04X}")]
    UnknownFileType(u8),

    /// BER-TLV decoding error
    #[error("TLV error: {0}")]
    Tlv(TlvError),
}

impl Error {
    /// Create a new invalid parameter error
    pub const fn invalid_parameter(name: &'static str, value: usize) -> Self {
        Self::InvalidParameter { name, value }
    }

    /// Status word carried by a card or SAM rejection, if any
    pub const fn status(&self) -> Option<StatusWord> {
        match self {
            Self::UnknownStatus { status, .. } | Self::CommandFailed { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Whether the error was raised by the reader channel rather than a device answer
    pub fn is_io(&self) -> bool {
        match self {
            Self::Apdu(e) => e.is_transport(),
            Self::AuthenticationNotVerified(source) => source.is_io(),
            _ => false,
        }
    }
}

impl From<TlvError> for Error {
    fn from(error: TlvError) -> Self {
        Self::Tlv(error)
    }
}

impl From<calypso_apdu_core::TransportError> for Error {
    fn from(error: calypso_apdu_core::TransportError) -> Self {
        Self::Apdu(error.into())
    }
}
