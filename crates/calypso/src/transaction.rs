//! Secure session transaction
//!
//! [`PoTransaction`] drives a card through a secure session: it allocates a SAM, opens
//! the card session, feeds every exchange to the SAM digest and closes the session with
//! mutual authentication. Commands are queued in a [`CommandBatch`] and sent by the
//! `process_*` call that consumes it.
//!
//! In [`ModificationMode::Multiple`] a batch that does not fit in the card session
//! buffer is spread over several sessions, closed and reopened transparently.

use std::ops::Range;

use bytes::Bytes;
use calypso_apdu_core::{CardTransport, Response};
use tracing::{debug, instrument, warn};

use crate::buffer::SessionBufferAccountant;
use crate::card::{CalypsoCard, TransmissionMode};
use crate::commands::{self, OpenSessionResponse, PoCommand, ReadMode};
use crate::constants::DIGEST_FRAME_MAX;
use crate::digest::{SessionDigest, SessionKey};
use crate::pool::SamResource;
use crate::settings::{
    AccessLevel, ChannelControl, ModificationMode, RatificationMode, SecuritySettings,
};
use crate::{Error, Result};

/// KIF value meaning the card did not report a key identifier
const KIF_UNDEFINED: u8 = 0xFF;

/// Secure session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session open
    #[default]
    Closed,
    /// A session is open at the given level
    Open(AccessLevel),
}

/// Commands queued for one `process_*` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[must_use]
pub struct CommandBatch {
    commands: Vec<PoCommand>,
}

impl CommandBatch {
    /// Create an empty batch
    pub const fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Add a command, builder style
    pub fn with(mut self, command: PoCommand) -> Self {
        self.commands.push(command);
        self
    }

    /// Add a command
    pub fn push(&mut self, command: PoCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Queued commands
    pub fn commands(&self) -> &[PoCommand] {
        &self.commands
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl FromIterator<PoCommand> for CommandBatch {
    fn from_iter<I: IntoIterator<Item = PoCommand>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

impl Extend<PoCommand> for CommandBatch {
    fn extend<I: IntoIterator<Item = PoCommand>>(&mut self, iter: I) {
        self.commands.extend(iter);
    }
}

/// A transaction with one card
#[derive(Debug)]
pub struct PoTransaction<T: CardTransport> {
    transport: T,
    card: CalypsoCard,
    settings: Option<SecuritySettings>,
    state: SessionState,
    sam: Option<SamResource>,
    digest: Option<SessionDigest>,
    buffer: SessionBufferAccountant,
    /// The card holds an open session that Close Secure Session has not ended yet
    card_session: bool,
}

impl<T: CardTransport> PoTransaction<T> {
    /// Create a transaction without security settings, limited to plain exchanges
    pub fn new(transport: T, card: CalypsoCard) -> Self {
        let buffer = SessionBufferAccountant::new(card.buffer_budget());
        Self {
            transport,
            card,
            settings: None,
            state: SessionState::Closed,
            sam: None,
            digest: None,
            buffer,
            card_session: false,
        }
    }

    /// Set the security settings needed to open secure sessions
    pub fn with_security_settings(mut self, settings: SecuritySettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Session state
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The card and what is known of its files
    pub const fn card(&self) -> &CalypsoCard {
        &self.card
    }

    /// Security settings, if any
    pub const fn security_settings(&self) -> Option<&SecuritySettings> {
        self.settings.as_ref()
    }

    /// Session buffer use
    pub const fn buffer(&self) -> &SessionBufferAccountant {
        &self.buffer
    }

    /// Digest of the current session cycle
    pub const fn digest(&self) -> Option<&SessionDigest> {
        self.digest.as_ref()
    }

    /// Card transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Consume the transaction and return the card transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Open a secure session and send the batch inside it
    ///
    /// A leading one-record read is performed by Open Secure Session itself. In atomic
    /// mode the whole batch must fit in the session buffer, which is checked before
    /// anything is sent.
    #[instrument(skip(self, batch), fields(commands = batch.len()))]
    pub fn process_opening(&mut self, level: AccessLevel, batch: CommandBatch) -> Result<()> {
        if self.state != SessionState::Closed {
            warn!("Session already open");
            return Err(Error::IllegalState("a secure session is already open"));
        }
        let settings = self
            .settings
            .as_ref()
            .ok_or(Error::IllegalState("no security settings for a secure session"))?;

        let mut commands = batch.commands;
        let inline = match commands.first() {
            Some(&PoCommand::ReadRecords {
                sfi,
                first_record,
                mode: ReadMode::One,
                ..
            }) if sfi != 0 && first_record <= self.card.revision().max_open_record() => {
                commands.remove(0);
                Some((sfi, first_record))
            }
            _ => None,
        };

        self.buffer = SessionBufferAccountant::new(self.card.buffer_budget());
        let cycles = self.buffer.plan(&commands, settings.modification_mode())?;
        check_session_frames(&self.card, &commands)?;

        let mut sam = settings
            .pool()
            .allocate(settings.allocation_mode(), settings.sam_filter())?;
        // The SAM goes back to the pool with `sam` if the opening fails
        let digest = self.open_cycle(&mut sam, level, inline)?;
        self.sam = Some(sam);
        self.digest = Some(digest);
        self.state = SessionState::Open(level);

        self.run_cycles(level, &commands, cycles)
    }

    /// Send a batch inside the open session
    #[instrument(skip(self, batch), fields(commands = batch.len()))]
    pub fn process_po_commands_in_session(&mut self, batch: CommandBatch) -> Result<()> {
        let SessionState::Open(level) = self.state else {
            return Err(Error::IllegalState("no secure session open"));
        };
        let mode = self.modification_mode();
        let cycles = self.buffer.plan(&batch.commands, mode)?;
        check_session_frames(&self.card, &batch.commands)?;
        self.run_cycles(level, &batch.commands, cycles)
    }

    /// Send a last batch and close the session
    ///
    /// The session is closed afterwards whatever the outcome, and the SAM is released.
    #[instrument(skip(self, batch), fields(commands = batch.len()))]
    pub fn process_closing(&mut self, batch: CommandBatch, channel: ChannelControl) -> Result<()> {
        let SessionState::Open(level) = self.state else {
            return Err(Error::IllegalState("no secure session open"));
        };
        let mode = self.modification_mode();
        let cycles = self.buffer.plan(&batch.commands, mode)?;
        check_session_frames(&self.card, &batch.commands)?;

        let ratified = self
            .settings
            .as_ref()
            .is_none_or(|settings| settings.ratification_mode() == RatificationMode::CloseRatified);
        let result = self
            .run_cycles(level, &batch.commands, cycles)
            .and_then(|()| self.close_cycle(ratified, ratified));
        if result.is_err() {
            self.abort_card_session();
        }
        self.end_session();
        if result.is_ok() {
            debug!("Secure session closed");
        }

        let released = self.release_channel(channel);
        result.and(released)
    }

    /// Abort the open session without authentication
    #[instrument(skip(self))]
    pub fn process_cancel(&mut self, channel: ChannelControl) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(Error::IllegalState("no secure session open"));
        }
        let abort = PoCommand::AbortSession;
        let result = self
            .transmit(&abort)
            .and_then(|(_, response)| commands::parse(abort.kind(), &response).map(drop));
        self.end_session();
        if result.is_ok() {
            debug!("Secure session aborted");
        }

        let released = self.release_channel(channel);
        result.and(released)
    }

    /// Send a batch outside any secure session
    #[instrument(skip(self, batch), fields(commands = batch.len()))]
    pub fn process_po_commands(&mut self, batch: CommandBatch, channel: ChannelControl) -> Result<()> {
        if self.state != SessionState::Closed {
            return Err(Error::IllegalState("a secure session is open"));
        }
        let result = batch
            .commands
            .iter()
            .try_for_each(|command| self.exchange(command));
        let released = self.release_channel(channel);
        result.and(released)
    }

    fn modification_mode(&self) -> ModificationMode {
        self.settings
            .as_ref()
            .map(SecuritySettings::modification_mode)
            .unwrap_or_default()
    }

    /// Open Secure Session, key checks and digest start
    fn open_cycle(
        &mut self,
        sam: &mut SamResource,
        level: AccessLevel,
        inline: Option<(u8, u8)>,
    ) -> Result<SessionDigest> {
        let settings = self
            .settings
            .as_ref()
            .ok_or(Error::IllegalState("no security settings for a secure session"))?;
        let revision = self.card.revision();

        sam.select_diversifier(self.card.serial_number())?;
        let challenge = sam.get_challenge(revision.challenge_len() as u8)?;

        let (sfi, record) = inline.unwrap_or_default();
        let open = PoCommand::open_session(level, sfi, record, challenge)?;
        let (_, response) = transmit(&mut self.transport, &self.card, &open)?;
        commands::parse(open.kind(), &response)?;
        self.card_session = true;
        let opened = OpenSessionResponse::parse(revision, response.data())?;
        self.card.set_df_ratified(opened.ratified);

        let kif = match opened.kif {
            Some(kif) if kif != KIF_UNDEFINED => kif,
            _ => settings.default_kif(level),
        };
        let kvc = opened
            .kvc
            .or(settings.default_kvc(level))
            .ok_or(Error::IllegalState("session KVC unknown"))?;
        if !settings.is_kvc_authorized(kvc) {
            warn!(kvc, "Session key version not authorized");
            return Err(Error::UnauthorizedKvc(kvc));
        }

        let key = SessionKey {
            kif,
            kvc,
            record: settings.default_key_record(level),
        };
        let digest = SessionDigest::init(sam, revision, key, opened.data)?;

        if inline.is_some() && !opened.record_data.is_empty() {
            self.card
                .files_mut()
                .set_record(sfi, record, &opened.record_data);
        }
        debug!(%level, ratified = opened.ratified, kif, kvc, "Secure session opened");
        Ok(digest)
    }

    /// Send planned cycles, closing and reopening the session between them
    fn run_cycles(
        &mut self,
        level: AccessLevel,
        commands: &[PoCommand],
        cycles: Vec<Range<usize>>,
    ) -> Result<()> {
        for (index, cycle) in cycles.into_iter().enumerate() {
            if index > 0 {
                self.split(level)?;
            }
            for command in &commands[cycle] {
                self.exchange(command)?;
            }
        }
        Ok(())
    }

    /// Close the current cycle and open a new one on the same SAM
    fn split(&mut self, level: AccessLevel) -> Result<()> {
        debug!(used = self.buffer.used(), "Session buffer full, starting a new session");
        self.close_cycle(true, false)?;
        self.buffer.reset();

        let mut sam = self
            .sam
            .take()
            .ok_or(Error::IllegalState("no SAM allocated"))?;
        let result = self.open_cycle(&mut sam, level, None);
        self.sam = Some(sam);
        self.digest = Some(result?);
        Ok(())
    }

    /// Digest close, Close Secure Session and card signature check
    fn close_cycle(&mut self, ratification_asked: bool, ratify: bool) -> Result<()> {
        let mut sam = self
            .sam
            .take()
            .ok_or(Error::IllegalState("no SAM allocated"))?;
        let result = self.close_with(&mut sam, ratification_asked, ratify);
        self.sam = Some(sam);
        result
    }

    fn close_with(
        &mut self,
        sam: &mut SamResource,
        ratification_asked: bool,
        ratify: bool,
    ) -> Result<()> {
        let mut digest = self
            .digest
            .take()
            .ok_or(Error::IllegalState("no session digest"))?;
        let signature = digest.close(sam)?;

        let close = PoCommand::close_session(ratification_asked, signature)?;
        let (_, response) = self.transmit(&close)?;
        self.card_session = false;
        commands::parse(close.kind(), &response)?;
        let card_signature = card_signature(&response, self.card.revision().signature_len())?;

        if ratify && self.card.transmission_mode() == TransmissionMode::Contactless {
            // The card may already have left the field
            match self.transmit(&PoCommand::Ratification) {
                Ok((_, response)) => debug!(status = %response.status(), "Ratification sent"),
                Err(error) => debug!(%error, "Ratification not acknowledged"),
            }
        }

        digest.authenticate(sam, &card_signature)
    }

    /// Send one command, account for it in session and update the file model
    fn exchange(&mut self, command: &PoCommand) -> Result<()> {
        if self.state != SessionState::Closed {
            self.buffer.charge(command)?;
        }
        let (request, response) = self.transmit(command)?;
        if let Some(digest) = self.digest.as_mut() {
            let frame = response.to_bytes();
            if frame.len() > DIGEST_FRAME_MAX {
                warn!(length = frame.len(), "Response too long for the session digest");
                return Err(Error::InvalidResponse("response too long for the session digest"));
            }
            digest.update(&request, &frame);
        }

        let outcome = commands::parse(command.kind(), &response)?;
        if let Some(warning) = outcome.warning {
            debug!(command = %command.kind(), warning, "Command succeeded with a warning");
        }
        self.card.files_mut().apply(command, &response)
    }

    fn transmit(&mut self, command: &PoCommand) -> Result<(Bytes, Response)> {
        transmit(&mut self.transport, &self.card, command)
    }

    /// Abort a card session that a failed closing left open
    fn abort_card_session(&mut self) {
        if !self.card_session {
            return;
        }
        let abort = PoCommand::AbortSession;
        match self.transmit(&abort) {
            Ok((_, response)) => debug!(status = %response.status(), "Card session aborted"),
            Err(error) => warn!(%error, "Card session abort failed"),
        }
    }

    /// Back to `Closed`, forgetting the digest and releasing the SAM
    fn end_session(&mut self) {
        self.state = SessionState::Closed;
        self.card_session = false;
        self.digest = None;
        self.buffer.reset();
        if let Some(sam) = self.sam.take() {
            match self.settings.as_ref() {
                Some(settings) => settings.pool().free(sam),
                None => drop(sam),
            }
        }
    }

    fn release_channel(&mut self, channel: ChannelControl) -> Result<()> {
        if channel == ChannelControl::CloseAfter {
            self.transport.close_channel()?;
            debug!("Card channel closed");
        }
        Ok(())
    }
}

/// Frame and send a command, returning the exact request bytes with the response
fn transmit<T: CardTransport>(
    transport: &mut T,
    card: &CalypsoCard,
    command: &PoCommand,
) -> Result<(Bytes, Response)> {
    let apdu = command.to_apdu(card.revision())?;
    let response = transport.transmit(&apdu)?;
    Ok((apdu.to_bytes(), response))
}

/// Every frame a command can exchange in session must fit in one Digest Update
///
/// Reads with Le 00 have no known bound and are checked when their answer arrives.
fn check_session_frames(card: &CalypsoCard, commands: &[PoCommand]) -> Result<()> {
    for command in commands {
        let apdu = command.to_apdu(card.revision())?;
        let response = apdu
            .le
            .filter(|&le| le != 0)
            .map_or(0, |le| usize::from(le) + 2);
        let longest = apdu.command_length().max(response);
        if longest > DIGEST_FRAME_MAX {
            warn!(command = %command.kind(), longest, "Frame too long for the session digest");
            return Err(Error::invalid_parameter("session frame length", longest));
        }
    }
    Ok(())
}

/// The card half of the session signature ends the Close Secure Session data
fn card_signature(response: &Response, length: usize) -> Result<Bytes> {
    let data = response.data();
    let start = data
        .len()
        .checked_sub(length)
        .ok_or(Error::InvalidResponse("close session response too short"))?;
    Ok(Bytes::copy_from_slice(&data[start..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::PoRevision;
    use crate::pool::tests::{ATR_C1, QueuedReader, pool};
    use hex_literal::hex;

    const SERIAL: [u8; 8] = hex!("0000000011223344");
    const OPEN_RESPONSE: [u8; 39] = hex!(
        "030490980030791D00112233445566778899AABBCCDDEEFF00112233445566778899AABBCC9000"
    );

    fn card() -> CalypsoCard {
        CalypsoCard::new(PoRevision::Rev3_1, Bytes::from_static(&SERIAL))
    }

    #[test]
    fn test_batch_builder() {
        let mut batch = CommandBatch::new().with(PoCommand::select_lid(0x2010));
        batch.push(PoCommand::read_record(0x07, 1).unwrap());
        batch.extend([PoCommand::increase(0x10, 1, 1).unwrap()]);
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());
        assert_eq!(batch.commands()[0], PoCommand::select_lid(0x2010));
        assert!(CommandBatch::new().is_empty());
    }

    #[test]
    fn test_session_calls_need_open_session() {
        let reader = QueuedReader::new(&[]);
        let commands = std::sync::Arc::clone(&reader.commands);
        let mut transaction = PoTransaction::new(reader, card());

        assert!(matches!(
            transaction.process_po_commands_in_session(CommandBatch::new()),
            Err(Error::IllegalState(_))
        ));
        assert!(matches!(
            transaction.process_closing(CommandBatch::new(), ChannelControl::KeepOpen),
            Err(Error::IllegalState(_))
        ));
        assert!(matches!(
            transaction.process_cancel(ChannelControl::KeepOpen),
            Err(Error::IllegalState(_))
        ));
        // No security settings
        assert!(matches!(
            transaction.process_opening(AccessLevel::Debit, CommandBatch::new()),
            Err(Error::IllegalState(_))
        ));
        assert!(commands.lock().is_empty());
        assert_eq!(transaction.state(), SessionState::Closed);
    }

    #[test]
    fn test_plain_exchange() {
        let reader = QueuedReader::new(&[])
            .with_response(&hex!("11223344556677889000"))
            .with_response(&hex!("6A82"));
        let commands = std::sync::Arc::clone(&reader.commands);
        let mut transaction = PoTransaction::new(reader, card());

        let batch = CommandBatch::new().with(PoCommand::read_record(0x07, 1).unwrap());
        transaction
            .process_po_commands(batch, ChannelControl::KeepOpen)
            .unwrap();
        let file = transaction.card().files().file_by_sfi(0x07).unwrap();
        assert_eq!(file.record(1), Some(&hex!("1122334455667788")[..]));

        // A failed read leaves the model untouched
        let batch = CommandBatch::new().with(PoCommand::read_record(0x08, 1).unwrap());
        assert!(transaction
            .process_po_commands(batch, ChannelControl::CloseAfter)
            .is_err());
        assert!(transaction.card().files().file_by_sfi(0x08).is_none());

        let commands = commands.lock();
        assert_eq!(commands[0].as_ref(), hex!("00B2013C00"));
        assert_eq!(commands[1].as_ref(), hex!("00B2014400"));
        // Nothing is charged outside a session
        assert_eq!(transaction.buffer().used(), 0);
    }

    #[test]
    fn test_open_and_close() {
        let sam_reader = QueuedReader::new(&ATR_C1)
            .with_response(&hex!("9000"))
            .with_response(&hex!("C1C2C3C49000"))
            .with_response(&hex!("9000"))
            .with_response(&hex!("9000"))
            .with_response(&hex!("9000"))
            .with_response(&hex!("112233449000"))
            .with_response(&hex!("9000"));
        let sam_commands = std::sync::Arc::clone(&sam_reader.commands);
        let pool = pool();
        pool.register("SAM", None, sam_reader);

        let reader = QueuedReader::new(&[])
            .with_response(&OPEN_RESPONSE)
            .with_response(&hex!("9000"))
            .with_response(&hex!("556677889000"))
            .with_response(&hex!("6B00"));
        let card_commands = std::sync::Arc::clone(&reader.commands);
        let mut transaction = PoTransaction::new(reader, card())
            .with_security_settings(SecuritySettings::new(pool.clone()));

        let batch = CommandBatch::new().with(PoCommand::read_record(0x07, 1).unwrap());
        transaction
            .process_opening(AccessLevel::Debit, batch)
            .unwrap();
        assert_eq!(transaction.state(), SessionState::Open(AccessLevel::Debit));
        assert_eq!(transaction.card().df_ratified(), Some(true));
        assert_eq!(pool.available(), 0);
        assert!(matches!(
            transaction.process_opening(AccessLevel::Debit, CommandBatch::new()),
            Err(Error::IllegalState(_))
        ));

        let batch = CommandBatch::new()
            .with(PoCommand::update_record(0x08, 1, hex!("44556677").to_vec()).unwrap());
        transaction
            .process_closing(batch, ChannelControl::CloseAfter)
            .unwrap();
        assert_eq!(transaction.state(), SessionState::Closed);
        assert_eq!(pool.available(), 1);

        let files = transaction.card().files();
        assert_eq!(
            files.file_by_sfi(0x07).unwrap().record(1),
            Some(&hex!("00112233445566778899AABBCCDDEEFF00112233445566778899AABBCC")[..])
        );
        assert_eq!(
            files.file_by_sfi(0x08).unwrap().record(1),
            Some(&hex!("44556677")[..])
        );

        let card_commands = card_commands.lock();
        assert_eq!(card_commands[0].as_ref(), hex!("008A0B3904C1C2C3C400"));
        assert_eq!(card_commands[1].as_ref(), hex!("00DC01440444556677"));
        assert_eq!(card_commands[2].as_ref(), hex!("008E8000041122334400"));
        assert_eq!(card_commands[3].as_ref(), hex!("00B2000000"));

        let sam_commands = sam_commands.lock();
        assert_eq!(sam_commands[0].as_ref(), hex!("80140000080000000011223344"));
        assert_eq!(sam_commands[1].as_ref(), hex!("8084000004"));
        assert_eq!(
            sam_commands[2].as_ref(),
            hex!(
                "808A00FF273079030490980030791D00112233445566778899AABBCCDDEEFF00112233445566778899AABBCC"
            )
        );
        assert_eq!(sam_commands[3].as_ref(), hex!("808C00000900DC01440444556677"));
        assert_eq!(sam_commands[4].as_ref(), hex!("808C0000029000"));
        assert_eq!(sam_commands[5].as_ref(), hex!("808E000004"));
        assert_eq!(sam_commands[6].as_ref(), hex!("808200000455667788"));
    }

    #[test]
    fn test_card_signature_extraction() {
        let response = Response::new(Some(Bytes::from_static(&hex!("AABB55667788"))), 0x9000u16);
        assert_eq!(card_signature(&response, 4).unwrap().as_ref(), hex!("55667788"));
        assert!(card_signature(&response, 8).is_err());
    }
}
