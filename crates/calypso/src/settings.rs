//! Session security settings

use derive_more::Display;

use crate::pool::{AllocationMode, SamIdentifier, SamResourcePool};

/// Session access level, selecting the session key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum AccessLevel {
    /// Personalization
    #[display("perso")]
    Personalization,
    /// Reloading
    #[display("load")]
    Load,
    /// Validation and debit
    #[display("debit")]
    Debit,
}

impl AccessLevel {
    /// All levels, in key order
    pub const ALL: [Self; 3] = [Self::Personalization, Self::Load, Self::Debit];

    /// Position of the level in KIF and KVC triplets
    pub const fn index(self) -> usize {
        match self {
            Self::Personalization => 0,
            Self::Load => 1,
            Self::Debit => 2,
        }
    }

    /// Key index carried by Open Secure Session
    pub const fn session_key(self) -> u8 {
        self.index() as u8 + 1
    }
}

/// How modifications that overflow the card session buffer are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModificationMode {
    /// All modifications go through a single session; overflowing is an error
    #[default]
    Atomic,
    /// Overflowing closes the session and opens a new one transparently
    Multiple,
}

/// How the final Close Secure Session is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatificationMode {
    /// Ask the card to ratify at closing, followed by a ratification frame in contactless mode
    #[default]
    CloseRatified,
    /// Leave the session unratified until the next command
    CloseNotRatified,
}

/// What to do with the card channel once a `process_*` call is over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelControl {
    /// Keep the channel open
    #[default]
    KeepOpen,
    /// Close the channel, whatever the outcome
    CloseAfter,
}

/// Security settings of a card transaction
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    pool: SamResourcePool,
    kif: [u8; 3],
    kvc: [Option<u8>; 3],
    key_record: [u8; 3],
    authorized_kvc: Option<Vec<u8>>,
    modification_mode: ModificationMode,
    ratification_mode: RatificationMode,
    allocation_mode: AllocationMode,
    sam_filter: Option<SamIdentifier>,
}

impl SecuritySettings {
    /// Default KIF of the perso, load and debit keys
    pub const DEFAULT_KIF: [u8; 3] = [0x21, 0x27, 0x30];

    /// Create settings allocating SAMs from the given pool
    pub const fn new(pool: SamResourcePool) -> Self {
        Self {
            pool,
            kif: Self::DEFAULT_KIF,
            kvc: [None; 3],
            key_record: [0; 3],
            authorized_kvc: None,
            modification_mode: ModificationMode::Atomic,
            ratification_mode: RatificationMode::CloseRatified,
            allocation_mode: AllocationMode::Blocking,
            sam_filter: None,
        }
    }

    /// Set the KIF used when the card does not report one
    pub const fn with_default_kif(mut self, level: AccessLevel, kif: u8) -> Self {
        self.kif[level.index()] = kif;
        self
    }

    /// Set the KVC used when the card does not report one
    pub const fn with_default_kvc(mut self, level: AccessLevel, kvc: u8) -> Self {
        self.kvc[level.index()] = Some(kvc);
        self
    }

    /// Set the key record number passed to Digest Init
    pub const fn with_default_key_record(mut self, level: AccessLevel, record: u8) -> Self {
        self.key_record[level.index()] = record;
        self
    }

    /// Only accept sessions whose KVC is in the list
    pub fn with_authorized_kvcs(mut self, kvcs: impl IntoIterator<Item = u8>) -> Self {
        self.authorized_kvc = Some(kvcs.into_iter().collect());
        self
    }

    /// Set the modification mode
    pub const fn with_modification_mode(mut self, mode: ModificationMode) -> Self {
        self.modification_mode = mode;
        self
    }

    /// Set the ratification mode
    pub const fn with_ratification_mode(mut self, mode: RatificationMode) -> Self {
        self.ratification_mode = mode;
        self
    }

    /// Set how SAMs are allocated
    pub const fn with_allocation_mode(mut self, mode: AllocationMode) -> Self {
        self.allocation_mode = mode;
        self
    }

    /// Restrict allocation to SAMs matching the filter
    pub fn with_sam_filter(mut self, filter: SamIdentifier) -> Self {
        self.sam_filter = Some(filter);
        self
    }

    /// SAM pool
    pub const fn pool(&self) -> &SamResourcePool {
        &self.pool
    }

    /// Default KIF of a level
    pub const fn default_kif(&self, level: AccessLevel) -> u8 {
        self.kif[level.index()]
    }

    /// Default KVC of a level
    pub const fn default_kvc(&self, level: AccessLevel) -> Option<u8> {
        self.kvc[level.index()]
    }

    /// Key record number of a level
    pub const fn default_key_record(&self, level: AccessLevel) -> u8 {
        self.key_record[level.index()]
    }

    /// Whether a session KVC is accepted
    pub fn is_kvc_authorized(&self, kvc: u8) -> bool {
        self.authorized_kvc
            .as_ref()
            .is_none_or(|authorized| authorized.contains(&kvc))
    }

    /// Modification mode
    pub const fn modification_mode(&self) -> ModificationMode {
        self.modification_mode
    }

    /// Ratification mode
    pub const fn ratification_mode(&self) -> RatificationMode {
        self.ratification_mode
    }

    /// SAM allocation mode
    pub const fn allocation_mode(&self) -> AllocationMode {
        self.allocation_mode
    }

    /// SAM filter
    pub const fn sam_filter(&self) -> Option<&SamIdentifier> {
        self.sam_filter.as_ref()
    }
}
