//! SAM resource pool
//!
//! SAM readers are registered once and shared between transactions. A resource is held
//! by exactly one transaction at a time and goes back to the pool when it is freed or
//! dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use calypso_apdu_core::{CardTransport, Response};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::card::{CalypsoSam, SamRevision};
use crate::commands::{self, SamCommand};
use crate::{Error, Result};

/// Allocation behaviour when no SAM is free
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationMode {
    /// Wait for a SAM to be freed, up to the pool timeout
    #[default]
    Blocking,
    /// Fail immediately
    NonBlocking,
}

/// Criteria a SAM must meet to be allocated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamIdentifier {
    revision: Option<SamRevision>,
    serial_prefix: Option<Vec<u8>>,
    group: Option<String>,
}

impl SamIdentifier {
    /// Match any SAM
    pub const fn new() -> Self {
        Self {
            revision: None,
            serial_prefix: None,
            group: None,
        }
    }

    /// Require a SAM revision
    pub const fn with_revision(mut self, revision: SamRevision) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Require the serial number to start with the given bytes
    pub fn with_serial_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.serial_prefix = Some(prefix.into());
        self
    }

    /// Require the reader to belong to a group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    fn matches_group(&self, group: Option<&str>) -> bool {
        self.group
            .as_deref()
            .is_none_or(|wanted| group == Some(wanted))
    }

    /// Whether an identified SAM meets the revision and serial number criteria
    pub fn matches(&self, sam: &CalypsoSam) -> bool {
        self.revision.is_none_or(|revision| revision == sam.revision)
            && self
                .serial_prefix
                .as_deref()
                .is_none_or(|prefix| sam.serial_number.starts_with(prefix))
    }
}

/// Pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// How long a blocking allocation waits for a free SAM
    pub blocking_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            blocking_timeout: Duration::from_millis(1000),
        }
    }
}

impl PoolConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the blocking allocation timeout
    pub const fn with_blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct Slot {
    reader: String,
    group: Option<String>,
    /// `None` while the SAM is allocated or being selected
    transport: Option<Box<dyn CardTransport>>,
    /// Identity found by the last selection
    sam: Option<CalypsoSam>,
}

impl Slot {
    /// Whether the slot is free and may hold a SAM matching the filter
    fn is_candidate(&self, filter: Option<&SamIdentifier>) -> bool {
        self.transport.is_some()
            && filter.is_none_or(|filter| {
                filter.matches_group(self.group.as_deref())
                    && self.sam.as_ref().is_none_or(|sam| filter.matches(sam))
            })
    }
}

#[derive(Debug)]
struct Shared {
    config: PoolConfig,
    slots: Mutex<Vec<Slot>>,
    released: Condvar,
}

/// Shared pool of SAM readers
#[derive(Debug, Clone)]
pub struct SamResourcePool {
    shared: Arc<Shared>,
}

impl SamResourcePool {
    /// Create an empty pool
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                slots: Mutex::new(Vec::new()),
                released: Condvar::new(),
            }),
        }
    }

    /// Add a SAM reader to the pool
    pub fn register(
        &self,
        reader: impl Into<String>,
        group: Option<&str>,
        transport: impl CardTransport + 'static,
    ) {
        let reader = reader.into();
        debug!(%reader, ?group, "SAM reader registered");
        self.shared.slots.lock().push(Slot {
            reader,
            group: group.map(str::to_owned),
            transport: Some(Box::new(transport)),
            sam: None,
        });
        self.shared.released.notify_all();
    }

    /// Number of SAM readers currently free
    pub fn available(&self) -> usize {
        self.shared
            .slots
            .lock()
            .iter()
            .filter(|slot| slot.transport.is_some())
            .count()
    }

    /// Allocate a SAM matching the filter, or any SAM without one
    ///
    /// The selection handshake runs without holding the pool lock, so other callers are
    /// never kept waiting by a reader being selected. Readers whose last identity does not
    /// match the filter are skipped without a handshake.
    pub fn allocate(
        &self,
        mode: AllocationMode,
        filter: Option<&SamIdentifier>,
    ) -> Result<SamResource> {
        let deadline = Instant::now() + self.shared.config.blocking_timeout;
        let mut slots = self.shared.slots.lock();
        // Slots already selected since the last wake-up
        let mut tried = Vec::new();

        loop {
            let candidate = slots
                .iter()
                .enumerate()
                .find(|(index, slot)| !tried.contains(index) && slot.is_candidate(filter))
                .map(|(index, _)| index);
            let Some(index) = candidate else {
                match mode {
                    AllocationMode::NonBlocking => {
                        warn!("No SAM resource available");
                        return Err(Error::NoSamResourceAvailable);
                    }
                    AllocationMode::Blocking => {
                        if self
                            .shared
                            .released
                            .wait_until(&mut slots, deadline)
                            .timed_out()
                        {
                            warn!(
                                timeout = ?self.shared.config.blocking_timeout,
                                "No SAM resource freed in time"
                            );
                            return Err(Error::NoSamResourceAvailable);
                        }
                        tried.clear();
                        continue;
                    }
                }
            };
            tried.push(index);

            let Some(mut transport) = slots[index].transport.take() else {
                continue;
            };
            let identified = MutexGuard::unlocked(&mut slots, || identify(transport.as_mut()));

            let slot = &mut slots[index];
            match identified {
                Ok(sam) if filter.is_none_or(|filter| filter.matches(&sam)) => {
                    slot.sam = Some(sam);
                    debug!(reader = %slot.reader, revision = %sam.revision, "SAM allocated");
                    return Ok(SamResource {
                        shared: Arc::clone(&self.shared),
                        index,
                        reader: slot.reader.clone(),
                        sam,
                        transport: Some(transport),
                        diversifier: None,
                    });
                }
                Ok(sam) => slot.sam = Some(sam),
                Err(error) => {
                    warn!(reader = %slot.reader, %error, "SAM selection failed");
                    slot.sam = None;
                }
            }
            slot.transport = Some(transport);
            self.shared.released.notify_all();
        }
    }

    /// Give a SAM back to the pool
    pub fn free(&self, resource: SamResource) {
        drop(resource);
    }
}

/// Reconnect if needed and identify the SAM from its ATR
fn identify(transport: &mut dyn CardTransport) -> Result<CalypsoSam> {
    if !transport.is_connected() {
        transport.reset()?;
    }
    let atr = transport
        .atr()
        .ok_or(Error::InvalidResponse("SAM reader did not report an ATR"))?;
    CalypsoSam::from_atr(&atr)
}

/// Exclusive access to one SAM
#[derive(Debug)]
pub struct SamResource {
    shared: Arc<Shared>,
    index: usize,
    reader: String,
    sam: CalypsoSam,
    transport: Option<Box<dyn CardTransport>>,
    diversifier: Option<Bytes>,
}

impl SamResource {
    /// Name of the SAM reader
    pub fn reader(&self) -> &str {
        &self.reader
    }

    /// Identified SAM
    pub const fn sam(&self) -> &CalypsoSam {
        &self.sam
    }

    /// Send a command and check its status
    pub fn execute(&mut self, command: &SamCommand) -> Result<Response> {
        let apdu = command.to_apdu(self.sam.revision);
        let transport = self
            .transport
            .as_mut()
            .ok_or(Error::IllegalState("SAM resource already released"))?;
        let response = transport.transmit(&apdu)?;
        let outcome = commands::parse(command.kind(), &response)?;
        if let Some(warning) = outcome.warning {
            debug!(command = %command.kind(), warning, "SAM command succeeded with a warning");
        }
        Ok(response)
    }

    /// Select the card serial number as key diversifier, once per card
    pub fn select_diversifier(&mut self, diversifier: &[u8]) -> Result<()> {
        if self.diversifier.as_deref() == Some(diversifier) {
            return Ok(());
        }
        let diversifier = Bytes::copy_from_slice(diversifier);
        self.execute(&SamCommand::SelectDiversifier {
            diversifier: diversifier.clone(),
        })?;
        self.diversifier = Some(diversifier);
        Ok(())
    }

    /// Get a terminal challenge
    pub fn get_challenge(&mut self, length: u8) -> Result<Bytes> {
        let response = self.execute(&SamCommand::get_challenge(length)?)?;
        if response.data().len() != usize::from(length) {
            return Err(Error::InvalidResponse("challenge length mismatch"));
        }
        Ok(Bytes::copy_from_slice(response.data()))
    }

    /// Read the parameters of a key
    pub fn read_key_parameters(&mut self, kif: u8, kvc: u8) -> Result<Bytes> {
        let response = self.execute(&SamCommand::ReadKeyParameters { kif, kvc })?;
        Ok(Bytes::copy_from_slice(response.data()))
    }
}

impl Drop for SamResource {
    fn drop(&mut self) {
        let Some(transport) = self.transport.take() else {
            return;
        };
        if let Some(slot) = self.shared.slots.lock().get_mut(self.index) {
            slot.transport = Some(transport);
        }
        self.shared.released.notify_all();
        debug!(reader = %self.reader, "SAM freed");
    }
}
