//! Calypso secure session engine
//!
//! Drives a Calypso card and a SAM through secure sessions:
//!
//! - [`PoCommand`] frames card commands for every card revision, and [`commands::parse`]
//!   interprets status words with one table per command
//! - [`FileModel`] mirrors the card files from the responses received
//! - [`SessionBufferAccountant`] keeps modifications within the card session buffer
//! - [`SessionDigest`] mirrors every session exchange in the SAM
//! - [`SamResourcePool`] shares SAMs between transactions
//! - [`PoTransaction`] opens, feeds, closes and cancels sessions
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod buffer;
pub mod card;
pub mod commands;
pub mod constants;
pub mod digest;
mod error;
pub mod file;
pub mod pool;
pub mod settings;
pub mod transaction;

pub use buffer::{BufferBudget, SessionBufferAccountant};
pub use card::{CalypsoCard, CalypsoSam, PoRevision, SamRevision, StartupInfo, TransmissionMode};
pub use commands::{CommandKind, PoCommand, SamCommand};
pub use digest::{SessionDigest, SessionKey};
pub use error::{Error, FailureKind, Result};
pub use file::{ElementaryFile, FileModel, FileType};
pub use pool::{AllocationMode, PoolConfig, SamIdentifier, SamResource, SamResourcePool};
pub use settings::{
    AccessLevel, ChannelControl, ModificationMode, RatificationMode, SecuritySettings,
};
pub use transaction::{CommandBatch, PoTransaction, SessionState};
