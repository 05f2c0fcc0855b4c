//! Session digest mirrored in the SAM
//!
//! The SAM computes the session MAC over every card frame exchanged while the session
//! is open. Frames are logged as they go and sent to the SAM with Digest Update when
//! the session is closed, just before Digest Close.

use std::ops::Range;

use bytes::Bytes;
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::card::PoRevision;
use crate::commands::SamCommand;
use crate::pool::SamResource;
use crate::{Error, FailureKind, Result};

/// Key selecting the session digest in the SAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionKey {
    /// Key identifier
    pub kif: u8,
    /// Key version
    pub kvc: u8,
    /// Key record number, used when the KIF is 0xFF
    pub record: u8,
}

/// Running session digest
#[derive(Debug)]
pub struct SessionDigest {
    key: SessionKey,
    signature_len: u8,
    seed: Bytes,
    /// The only copy of the session frames, wiped on drop
    log: Zeroizing<Vec<u8>>,
    /// Frame boundaries in `log`
    frames: Vec<Range<usize>>,
    /// Frames already sent to the SAM
    sent: usize,
}

impl SessionDigest {
    /// Start a digest from the Open Secure Session response data
    pub fn init(
        sam: &mut SamResource,
        revision: PoRevision,
        key: SessionKey,
        seed: Bytes,
    ) -> Result<Self> {
        let command = SamCommand::digest_init(
            revision.is_extended(),
            key.kif,
            key.kvc,
            key.record,
            seed.clone(),
        )?;
        sam.execute(&command)?;
        debug!(kif = key.kif, kvc = key.kvc, "Session digest started");

        Ok(Self {
            key,
            signature_len: if revision.is_extended() { 8 } else { 4 },
            seed,
            log: Zeroizing::new(Vec::new()),
            frames: Vec::new(),
            sent: 0,
        })
    }

    /// Record one card exchange, request first
    pub fn update(&mut self, request: &[u8], response: &[u8]) {
        trace!(
            request = %hex::encode_upper(request),
            response = %hex::encode_upper(response),
            "Digest update"
        );
        for frame in [request, response] {
            let start = self.log.len();
            self.log.extend_from_slice(frame);
            self.frames.push(start..self.log.len());
        }
    }

    /// Session key in use
    pub const fn key(&self) -> SessionKey {
        self.key
    }

    /// Open Secure Session data the digest was started with
    pub fn seed(&self) -> &[u8] {
        &self.seed
    }

    /// Every frame recorded so far, in transmission order
    pub fn log(&self) -> &[u8] {
        &self.log
    }

    /// Send the recorded frames and get the SAM half of the session signature
    pub fn close(&mut self, sam: &mut SamResource) -> Result<Bytes> {
        while let Some(frame) = self.frames.get(self.sent).cloned() {
            let data = Bytes::copy_from_slice(&self.log[frame]);
            sam.execute(&SamCommand::digest_update(data)?)?;
            self.sent += 1;
        }
        let response = sam.execute(&SamCommand::digest_close(self.signature_len)?)?;
        let signature = response.data();
        if signature.len() != usize::from(self.signature_len) {
            return Err(Error::InvalidResponse("SAM signature length mismatch"));
        }
        Ok(Bytes::copy_from_slice(signature))
    }

    /// Check the card half of the session signature
    pub fn authenticate(&self, sam: &mut SamResource, card_signature: &[u8]) -> Result<()> {
        let command = SamCommand::digest_authenticate(Bytes::copy_from_slice(card_signature))?;
        match sam.execute(&command) {
            Ok(_) => {
                debug!("Card signature verified");
                Ok(())
            }
            Err(error) if error.is_io() => {
                warn!(%error, "Card signature could not be verified");
                Err(Error::AuthenticationNotVerified(Box::new(error)))
            }
            Err(Error::CommandFailed {
                failure: FailureKind::SecurityData,
                ..
            }) => {
                warn!("Card signature rejected by the SAM");
                Err(Error::AuthenticationFailed)
            }
            Err(error) => Err(error),
        }
    }
}
