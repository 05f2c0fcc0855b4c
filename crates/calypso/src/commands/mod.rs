//! Calypso card commands
//!
//! Every command the session engine sends to a card is a variant of [`PoCommand`].
//! Constructors validate parameter ranges before anything reaches a device, and
//! [`PoCommand::to_apdu`] frames the command for a given card revision. Responses are
//! interpreted with [`parse`], which looks the status word up in the command's table.

pub mod sam;
pub(crate) mod status;

use bytes::{BufMut, Bytes, BytesMut};
use calypso_apdu_core::{Command, Response};
use derive_more::Display;
use tracing::warn;

use crate::card::PoRevision;
use crate::constants::{COUNTER_SIZE, COUNTER_VALUE_MAX, PAYLOAD_MAX, SFI_MAX, ins};
use crate::settings::AccessLevel;
use crate::{Error, Result};
use status::Verdict;

pub use sam::SamCommand;

/// Command identity, used to pick the status table and to report failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CommandKind {
    /// Select File
    #[display("Select File")]
    SelectFile,
    /// Read Records
    #[display("Read Records")]
    ReadRecords,
    /// Update Record
    #[display("Update Record")]
    UpdateRecord,
    /// Write Record
    #[display("Write Record")]
    WriteRecord,
    /// Append Record
    #[display("Append Record")]
    AppendRecord,
    /// Increase
    #[display("Increase")]
    Increase,
    /// Decrease
    #[display("Decrease")]
    Decrease,
    /// Open Secure Session
    #[display("Open Secure Session")]
    OpenSession,
    /// Close Secure Session
    #[display("Close Secure Session")]
    CloseSession,
    /// Abort Secure Session
    #[display("Abort Secure Session")]
    AbortSession,
    /// Ratification
    #[display("Ratification")]
    Ratification,
    /// SAM Select Diversifier
    #[display("Select Diversifier")]
    SelectDiversifier,
    /// SAM Get Challenge
    #[display("Get Challenge")]
    GetChallenge,
    /// SAM Digest Init
    #[display("Digest Init")]
    DigestInit,
    /// SAM Digest Update
    #[display("Digest Update")]
    DigestUpdate,
    /// SAM Digest Close
    #[display("Digest Close")]
    DigestClose,
    /// SAM Digest Authenticate
    #[display("Digest Authenticate")]
    DigestAuthenticate,
    /// SAM Read Key Parameters
    #[display("Read Key Parameters")]
    ReadKeyParameters,
}

/// Navigation case of a Select File without LID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectFileControl {
    /// First EF of the current DF
    FirstEf,
    /// EF following the current one
    NextEf,
    /// The current DF itself
    CurrentDf,
}

/// What a Select File command points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectTarget {
    /// A file identified by its LID
    Lid(u16),
    /// A navigation case
    Control(SelectFileControl),
}

/// Read Records mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// A single record, returned as is
    One,
    /// Consecutive records, each returned as `number length data`
    Multiple,
}

/// A card command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoCommand {
    /// Select a file
    SelectFile(SelectTarget),
    /// Read one or more records
    ReadRecords {
        /// Short file identifier, 0 for the current EF
        sfi: u8,
        /// First record to read
        first_record: u8,
        /// Read mode
        mode: ReadMode,
        /// Le
        expected_length: u8,
    },
    /// Replace a record
    UpdateRecord {
        /// Short file identifier
        sfi: u8,
        /// Record number
        record: u8,
        /// New record content
        data: Bytes,
    },
    /// OR data into a record
    WriteRecord {
        /// Short file identifier
        sfi: u8,
        /// Record number
        record: u8,
        /// Data to write
        data: Bytes,
    },
    /// Append a record to a cyclic file
    AppendRecord {
        /// Short file identifier
        sfi: u8,
        /// New record content
        data: Bytes,
    },
    /// Increase a counter
    Increase {
        /// Short file identifier
        sfi: u8,
        /// Counter number
        counter: u8,
        /// Amount to add
        value: u32,
    },
    /// Decrease a counter
    Decrease {
        /// Short file identifier
        sfi: u8,
        /// Counter number
        counter: u8,
        /// Amount to subtract
        value: u32,
    },
    /// Open a secure session
    OpenSession {
        /// Session key index (1 perso, 2 load, 3 debit)
        key_index: u8,
        /// File of the record read at opening
        sfi: u8,
        /// Record read at opening, 0 for none
        record: u8,
        /// Terminal challenge from the SAM
        challenge: Bytes,
    },
    /// Close the secure session
    CloseSession {
        /// Whether the card should ratify the session without a separate ratification
        ratification_asked: bool,
        /// SAM half of the session signature
        signature: Bytes,
    },
    /// Abort the secure session
    AbortSession,
    /// Ratify the last closed session
    Ratification,
}

const fn check_sfi(sfi: u8) -> Result<u8> {
    if sfi > SFI_MAX {
        return Err(Error::invalid_parameter("sfi", sfi as usize));
    }
    Ok(sfi)
}

const fn check_record(record: u8) -> Result<u8> {
    if record == 0 {
        return Err(Error::invalid_parameter("record number", 0));
    }
    Ok(record)
}

fn check_payload(data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() > PAYLOAD_MAX {
        return Err(Error::invalid_parameter("payload length", data.len()));
    }
    Ok(())
}

const fn check_counter(counter: u8, value: u32) -> Result<()> {
    if counter == 0 {
        return Err(Error::invalid_parameter("counter number", 0));
    }
    if value > COUNTER_VALUE_MAX {
        return Err(Error::invalid_parameter("counter value", value as usize));
    }
    Ok(())
}

impl PoCommand {
    /// Select a file by LID
    pub const fn select_lid(lid: u16) -> Self {
        Self::SelectFile(SelectTarget::Lid(lid))
    }

    /// Select a file by navigation
    pub const fn select_control(control: SelectFileControl) -> Self {
        Self::SelectFile(SelectTarget::Control(control))
    }

    /// Read a single record
    pub fn read_record(sfi: u8, record: u8) -> Result<Self> {
        Ok(Self::ReadRecords {
            sfi: check_sfi(sfi)?,
            first_record: check_record(record)?,
            mode: ReadMode::One,
            expected_length: 0,
        })
    }

    /// Read `count` consecutive records of `record_size` bytes
    pub fn read_records(sfi: u8, first_record: u8, count: u8, record_size: u8) -> Result<Self> {
        check_sfi(sfi)?;
        check_record(first_record)?;
        if count == 0 || usize::from(first_record) + usize::from(count) - 1 > 255 {
            return Err(Error::invalid_parameter("record count", count.into()));
        }
        if count == 1 {
            return Ok(Self::ReadRecords {
                sfi,
                first_record,
                mode: ReadMode::One,
                expected_length: record_size,
            });
        }
        // Each record comes back with its number and length
        let expected = (usize::from(record_size) + 2) * usize::from(count);
        let expected_length = u8::try_from(expected)
            .map_err(|_| Error::invalid_parameter("expected length", expected))?;
        Ok(Self::ReadRecords {
            sfi,
            first_record,
            mode: ReadMode::Multiple,
            expected_length,
        })
    }

    /// Read the first `count` counters of a counters file
    pub fn read_counters(sfi: u8, count: u8) -> Result<Self> {
        check_sfi(sfi)?;
        let expected = COUNTER_SIZE * usize::from(count);
        if count == 0 || expected > usize::from(u8::MAX) {
            return Err(Error::invalid_parameter("counter count", count.into()));
        }
        Ok(Self::ReadRecords {
            sfi,
            first_record: 1,
            mode: ReadMode::One,
            expected_length: expected as u8,
        })
    }

    /// Replace a record
    pub fn update_record(sfi: u8, record: u8, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        check_payload(&data)?;
        Ok(Self::UpdateRecord {
            sfi: check_sfi(sfi)?,
            record: check_record(record)?,
            data,
        })
    }

    /// OR data into a record
    pub fn write_record(sfi: u8, record: u8, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        check_payload(&data)?;
        Ok(Self::WriteRecord {
            sfi: check_sfi(sfi)?,
            record: check_record(record)?,
            data,
        })
    }

    /// Append a record to a cyclic file
    pub fn append_record(sfi: u8, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        check_payload(&data)?;
        Ok(Self::AppendRecord {
            sfi: check_sfi(sfi)?,
            data,
        })
    }

    /// Increase a counter
    pub fn increase(sfi: u8, counter: u8, value: u32) -> Result<Self> {
        check_counter(counter, value)?;
        Ok(Self::Increase {
            sfi: check_sfi(sfi)?,
            counter,
            value,
        })
    }

    /// Decrease a counter
    pub fn decrease(sfi: u8, counter: u8, value: u32) -> Result<Self> {
        check_counter(counter, value)?;
        Ok(Self::Decrease {
            sfi: check_sfi(sfi)?,
            counter,
            value,
        })
    }

    /// Open a secure session, optionally reading one record
    pub fn open_session(
        level: AccessLevel,
        sfi: u8,
        record: u8,
        challenge: impl Into<Bytes>,
    ) -> Result<Self> {
        Ok(Self::OpenSession {
            key_index: level.session_key(),
            sfi: check_sfi(sfi)?,
            record,
            challenge: challenge.into(),
        })
    }

    /// Close the secure session with the SAM signature
    pub fn close_session(ratification_asked: bool, signature: impl Into<Bytes>) -> Result<Self> {
        let signature = signature.into();
        if signature.len() != 4 && signature.len() != 8 {
            return Err(Error::invalid_parameter("signature length", signature.len()));
        }
        Ok(Self::CloseSession {
            ratification_asked,
            signature,
        })
    }

    /// Command identity
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::SelectFile(_) => CommandKind::SelectFile,
            Self::ReadRecords { .. } => CommandKind::ReadRecords,
            Self::UpdateRecord { .. } => CommandKind::UpdateRecord,
            Self::WriteRecord { .. } => CommandKind::WriteRecord,
            Self::AppendRecord { .. } => CommandKind::AppendRecord,
            Self::Increase { .. } => CommandKind::Increase,
            Self::Decrease { .. } => CommandKind::Decrease,
            Self::OpenSession { .. } => CommandKind::OpenSession,
            Self::CloseSession { .. } => CommandKind::CloseSession,
            Self::AbortSession => CommandKind::AbortSession,
            Self::Ratification => CommandKind::Ratification,
        }
    }

    /// Whether the command changes card content and uses the session buffer
    pub const fn is_modifying(&self) -> bool {
        matches!(
            self,
            Self::UpdateRecord { .. }
                | Self::WriteRecord { .. }
                | Self::AppendRecord { .. }
                | Self::Increase { .. }
                | Self::Decrease { .. }
        )
    }

    /// Length of the data the command writes into the card
    pub fn payload_len(&self) -> usize {
        match self {
            Self::UpdateRecord { data, .. }
            | Self::WriteRecord { data, .. }
            | Self::AppendRecord { data, .. } => data.len(),
            Self::Increase { .. } | Self::Decrease { .. } => COUNTER_SIZE,
            _ => 0,
        }
    }

    /// Frame the command for a card of the given revision
    pub fn to_apdu(&self, revision: PoRevision) -> Result<Command> {
        let cla = revision.class_byte();
        let command = match self {
            Self::SelectFile(SelectTarget::Lid(lid)) => {
                let p1 = if revision.is_legacy() { 0x08 } else { 0x09 };
                Command::new(cla, ins::SELECT_FILE, p1, 0x00)
                    .with_data(lid.to_be_bytes().to_vec())
                    .with_le(0)
            }
            Self::SelectFile(SelectTarget::Control(control)) => {
                let (p1, p2) = match control {
                    SelectFileControl::FirstEf => (0x02, 0x00),
                    SelectFileControl::NextEf => (0x02, 0x02),
                    SelectFileControl::CurrentDf => (0x09, 0x00),
                };
                Command::new(cla, ins::SELECT_FILE, p1, p2)
                    .with_data(vec![0x00, 0x00])
                    .with_le(0)
            }
            Self::ReadRecords {
                sfi,
                first_record,
                mode,
                expected_length,
            } => {
                let p2 = match mode {
                    ReadMode::One => sfi * 8 + 4,
                    ReadMode::Multiple => sfi * 8 + 5,
                };
                Command::new(cla, ins::READ_RECORDS, *first_record, p2).with_le(*expected_length)
            }
            Self::UpdateRecord { sfi, record, data } => {
                Command::new(cla, ins::UPDATE_RECORD, *record, sfi * 8 + 4).with_data(data.clone())
            }
            Self::WriteRecord { sfi, record, data } => {
                Command::new(cla, ins::WRITE_RECORD, *record, sfi * 8 + 4).with_data(data.clone())
            }
            Self::AppendRecord { sfi, data } => {
                Command::new(cla, ins::APPEND_RECORD, 0x00, sfi * 8).with_data(data.clone())
            }
            Self::Increase { sfi, counter, value } => {
                counter_command(cla, ins::INCREASE, *sfi, *counter, *value)
            }
            Self::Decrease { sfi, counter, value } => {
                counter_command(cla, ins::DECREASE, *sfi, *counter, *value)
            }
            Self::OpenSession {
                key_index,
                sfi,
                record,
                challenge,
            } => open_session_command(revision, *key_index, *sfi, *record, challenge)?,
            Self::CloseSession {
                ratification_asked,
                signature,
            } => {
                let p1 = if *ratification_asked { 0x80 } else { 0x00 };
                Command::new(cla, ins::CLOSE_SESSION, p1, 0x00)
                    .with_data(signature.clone())
                    .with_le(0)
            }
            Self::AbortSession => Command::new(cla, ins::CLOSE_SESSION, 0x00, 0x00).with_le(0),
            Self::Ratification => Command::new(cla, ins::READ_RECORDS, 0x00, 0x00).with_le(0),
        };
        Ok(command)
    }
}

fn counter_command(cla: u8, ins: u8, sfi: u8, counter: u8, value: u32) -> Command {
    // Values are checked at construction, only the low three bytes are significant
    let data = value.to_be_bytes()[1..].to_vec();
    Command::new(cla, ins, counter, sfi * 8)
        .with_data(data)
        .with_le(0)
}

fn open_session_command(
    revision: PoRevision,
    key_index: u8,
    sfi: u8,
    record: u8,
    challenge: &Bytes,
) -> Result<Command> {
    let expected = revision.challenge_len();
    if challenge.len() != expected {
        return Err(Error::invalid_parameter("challenge length", challenge.len()));
    }
    if record > revision.max_open_record() {
        return Err(Error::invalid_parameter("record number", record.into()));
    }
    let p1 = record * 8 + key_index;
    let cla = revision.class_byte();

    let command = match revision {
        PoRevision::Rev1_0 => Command::new(cla, ins::OPEN_SESSION, p1, sfi * 8)
            .with_data(challenge.clone()),
        PoRevision::Rev2_4 => Command::new(cla, ins::OPEN_SESSION, 0x80 + p1, sfi * 8)
            .with_data(challenge.clone()),
        PoRevision::Rev3_1 => Command::new(cla, ins::OPEN_SESSION, p1, sfi * 8 + 1)
            .with_data(challenge.clone()),
        PoRevision::Rev3_2 => {
            let mut data = BytesMut::with_capacity(challenge.len() + 1);
            data.put_u8(0x00);
            data.put_slice(challenge);
            Command::new(cla, ins::OPEN_SESSION, p1, sfi * 8 + 2).with_data(data.freeze())
        }
    };
    Ok(command.with_le(0))
}

/// Decoded status of a successful exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
    /// Set when the status word is a success that carries a warning
    pub warning: Option<&'static str>,
}

/// Interpret the status word of a response to a command of the given kind
pub fn parse(kind: CommandKind, response: &Response) -> Result<Outcome> {
    let status = response.status();
    let Some(entry) = status::lookup(kind, status.to_u16()) else {
        warn!(command = %kind, %status, "Unknown status word");
        return Err(Error::UnknownStatus {
            command: kind,
            status,
        });
    };

    match entry.verdict {
        Verdict::Success => Ok(Outcome::default()),
        Verdict::Warning => Ok(Outcome {
            warning: Some(entry.message),
        }),
        Verdict::Failure(failure) => {
            warn!(command = %kind, %status, message = entry.message, "Command failed");
            Err(Error::CommandFailed {
                command: kind,
                failure,
                status,
                message: entry.message,
            })
        }
    }
}

/// Data returned by Open Secure Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSessionResponse {
    /// Whether the previous session was ratified
    pub ratified: bool,
    /// KIF of the session key, revision 3 only
    pub kif: Option<u8>,
    /// KVC of the session key, absent on revision 1.0
    pub kvc: Option<u8>,
    /// Record read at opening, empty when none was requested
    pub record_data: Bytes,
    /// The whole response data, used to seed the SAM digest
    pub data: Bytes,
}

impl OpenSessionResponse {
    /// Decode the response data according to the card revision
    pub fn parse(revision: PoRevision, data: &[u8]) -> Result<Self> {
        let raw = Bytes::copy_from_slice(data);
        match revision {
            PoRevision::Rev3_1 => Self::parse_rev3(raw, 4),
            PoRevision::Rev3_2 => Self::parse_rev3(raw, 8),
            PoRevision::Rev2_4 => {
                let ratified = match data.len() {
                    5 | 34 => true,
                    7 | 36 => false,
                    _ => return Err(Error::InvalidResponse("open session response length")),
                };
                let record_data = if data.len() >= 34 {
                    raw.slice(5..34)
                } else {
                    Bytes::new()
                };
                Ok(Self {
                    ratified,
                    kif: None,
                    kvc: Some(data[0]),
                    record_data,
                    data: raw,
                })
            }
            PoRevision::Rev1_0 => {
                let ratified = match data.len() {
                    4 | 33 => true,
                    6 | 35 => false,
                    _ => return Err(Error::InvalidResponse("open session response length")),
                };
                let record_data = if data.len() >= 33 {
                    raw.slice(4..33)
                } else {
                    Bytes::new()
                };
                Ok(Self {
                    ratified,
                    kif: None,
                    kvc: None,
                    record_data,
                    data: raw,
                })
            }
        }
    }

    /// `tc[3] rnd[n] ratification kif kvc length data`
    fn parse_rev3(raw: Bytes, ratification_offset: usize) -> Result<Self> {
        let header = ratification_offset + 4;
        if raw.len() < header {
            return Err(Error::InvalidResponse("open session response too short"));
        }
        let length = usize::from(raw[ratification_offset + 3]);
        if raw.len() != header + length {
            return Err(Error::InvalidResponse("open session record length mismatch"));
        }
        Ok(Self {
            ratified: raw[ratification_offset] & 0x01 == 0,
            kif: Some(raw[ratification_offset + 1]),
            kvc: Some(raw[ratification_offset + 2]),
            record_data: raw.slice(header..),
            data: raw,
        })
    }
}

/// Split a multiple-records response into `(record number, content)` pairs
pub(crate) fn split_records(data: &[u8]) -> Result<Vec<(u8, Bytes)>> {
    let mut records = Vec::new();
    let mut rest = data;
    while let [number, length, tail @ ..] = rest {
        let length = usize::from(*length);
        if tail.len() < length {
            return Err(Error::InvalidResponse("truncated record in read records response"));
        }
        records.push((*number, Bytes::copy_from_slice(&tail[..length])));
        rest = &tail[length..];
    }
    if !rest.is_empty() {
        return Err(Error::InvalidResponse("trailing byte in read records response"));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;
    use calypso_apdu_core::StatusWord;
    use hex_literal::hex;

    fn apdu(command: &PoCommand, revision: PoRevision) -> Vec<u8> {
        command.to_apdu(revision).unwrap().to_bytes().to_vec()
    }

    #[test]
    fn test_select_file_frames() {
        let rev31 = PoRevision::Rev3_1;
        assert_eq!(apdu(&PoCommand::select_lid(0x3F00), rev31), hex!("00A40900023F0000"));
        assert_eq!(apdu(&PoCommand::select_lid(0x0002), rev31), hex!("00A4090002000200"));
        assert_eq!(
            apdu(&PoCommand::select_control(SelectFileControl::CurrentDf), rev31),
            hex!("00A4090002000000")
        );
        assert_eq!(
            apdu(&PoCommand::select_control(SelectFileControl::FirstEf), rev31),
            hex!("00A4020002000000")
        );
        assert_eq!(
            apdu(&PoCommand::select_control(SelectFileControl::NextEf), rev31),
            hex!("00A4020202000000")
        );
        assert_eq!(
            apdu(&PoCommand::select_lid(0x2010), PoRevision::Rev2_4),
            hex!("94A40800022010 00")
        );
    }

    #[test]
    fn test_read_frames() {
        let rev31 = PoRevision::Rev3_1;
        assert_eq!(apdu(&PoCommand::read_record(0x07, 1).unwrap(), rev31), hex!("00B2013C00"));
        assert_eq!(apdu(&PoCommand::read_record(0x08, 1).unwrap(), rev31), hex!("00B2014400"));
        assert_eq!(
            apdu(&PoCommand::read_records(0x07, 3, 2, 29).unwrap(), rev31),
            hex!("00B2033D3E")
        );
        assert_eq!(apdu(&PoCommand::read_counters(0x07, 2).unwrap(), rev31), hex!("00B2013C06"));
        assert_eq!(
            apdu(&PoCommand::read_records(0x07, 1, 1, 29).unwrap(), rev31),
            hex!("00B2013C1D")
        );
    }

    #[test]
    fn test_modifying_frames() {
        let rev31 = PoRevision::Rev3_1;
        let update = PoCommand::update_record(0x07, 1, hex!("00112233").to_vec()).unwrap();
        assert_eq!(apdu(&update, rev31), hex!("00DC013C0400112233"));
        let write = PoCommand::write_record(0x08, 1, hex!("44556677").to_vec()).unwrap();
        assert_eq!(apdu(&write, rev31), hex!("00D201440444556677"));
        let append = PoCommand::append_record(0x09, hex!("8899AABB").to_vec()).unwrap();
        assert_eq!(apdu(&append, rev31), hex!("00E20048048899AABB"));
        let decrease = PoCommand::decrease(0x10, 1, 100).unwrap();
        assert_eq!(apdu(&decrease, rev31), hex!("003001800300006400"));
        let increase = PoCommand::increase(0x11, 1, 100).unwrap();
        assert_eq!(apdu(&increase, rev31), hex!("003201880300006400"));

        assert_eq!(
            apdu(&update, PoRevision::Rev2_4),
            hex!("94DC013C0400112233")
        );
        assert!(update.is_modifying());
        assert_eq!(update.payload_len(), 4);
        assert_eq!(decrease.payload_len(), 3);
        assert!(!PoCommand::read_record(1, 1).unwrap().is_modifying());
    }

    #[test]
    fn test_session_frames() {
        let challenge = hex!("C1C2C3C4").to_vec();
        let open = PoCommand::open_session(AccessLevel::Debit, 0x07, 1, challenge.clone()).unwrap();
        assert_eq!(apdu(&open, PoRevision::Rev3_1), hex!("008A0B3904C1C2C3C400"));
        assert_eq!(apdu(&open, PoRevision::Rev2_4), hex!("948A8B3804C1C2C3C400"));
        assert_eq!(apdu(&open, PoRevision::Rev1_0), hex!("948A0B3804C1C2C3C400"));

        let open = PoCommand::open_session(AccessLevel::Debit, 0, 0, challenge).unwrap();
        assert_eq!(apdu(&open, PoRevision::Rev3_1), hex!("008A030104C1C2C3C400"));
        // Revision 3.2 needs the extended challenge
        assert!(open.to_apdu(PoRevision::Rev3_2).is_err());

        let open = PoCommand::open_session(
            AccessLevel::Load,
            0x07,
            1,
            hex!("0102030405060708").to_vec(),
        )
        .unwrap();
        assert_eq!(
            apdu(&open, PoRevision::Rev3_2),
            hex!("008A0A3A0900010203040506070800")
        );

        let close = PoCommand::close_session(true, hex!("11223344").to_vec()).unwrap();
        assert_eq!(apdu(&close, PoRevision::Rev3_1), hex!("008E8000041122334400"));
        let close = PoCommand::close_session(false, hex!("11223344").to_vec()).unwrap();
        assert_eq!(apdu(&close, PoRevision::Rev3_1), hex!("008E0000041122334400"));
        assert_eq!(apdu(&PoCommand::AbortSession, PoRevision::Rev3_1), hex!("008E000000"));
        assert_eq!(apdu(&PoCommand::Ratification, PoRevision::Rev3_1), hex!("00B2000000"));
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            PoCommand::read_record(32, 1),
            Err(Error::InvalidParameter { name: "sfi", value: 32 })
        ));
        assert!(matches!(
            PoCommand::read_record(1, 0),
            Err(Error::InvalidParameter { name: "record number", .. })
        ));
        assert!(PoCommand::update_record(1, 1, Vec::new()).is_err());
        assert!(PoCommand::update_record(1, 1, vec![0u8; 251]).is_err());
        assert!(PoCommand::update_record(1, 1, vec![0u8; 250]).is_ok());
        assert!(PoCommand::increase(1, 0, 1).is_err());
        assert!(PoCommand::decrease(1, 1, 0x0100_0000).is_err());
        assert!(PoCommand::decrease(1, 1, 0x00FF_FFFF).is_ok());
        assert!(PoCommand::read_records(1, 1, 9, 29).is_err());
        assert!(PoCommand::close_session(true, vec![0u8; 5]).is_err());
    }

    #[test]
    fn test_every_sfi_and_record_reaches_the_frame() {
        let ok = Response::success(None);
        for sfi in 0..=SFI_MAX {
            for record in 1..=255u8 {
                let command = PoCommand::read_record(sfi, record).unwrap();
                let frame = command.to_apdu(PoRevision::Rev3_1).unwrap();
                assert_eq!(frame.p1, record);
                assert_eq!(frame.p2 >> 3, sfi);
                parse(command.kind(), &ok).unwrap();
            }
        }
    }

    #[test]
    fn test_parse_outcomes() {
        let response = Response::new(None, 0x6A82u16);
        let err = parse(CommandKind::ReadRecords, &response).unwrap_err();
        assert!(matches!(
            err,
            Error::CommandFailed {
                command: CommandKind::ReadRecords,
                failure: FailureKind::DataAccess,
                ..
            }
        ));
        assert_eq!(err.status(), Some(StatusWord::new(0x6A, 0x82)));

        let err = parse(CommandKind::ReadRecords, &Response::new(None, 0x6400u16)).unwrap_err();
        assert!(matches!(err, Error::UnknownStatus { .. }));

        let outcome = parse(CommandKind::ReadKeyParameters, &Response::new(None, 0x6200u16)).unwrap();
        assert!(outcome.warning.is_some());
        let outcome = parse(CommandKind::Decrease, &Response::new(None, 0x6103u16)).unwrap();
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn test_open_session_rev31() {
        let data = hex!("030490980030791D7111111111111111111111111111111111111111111111111111111111");
        let response = OpenSessionResponse::parse(PoRevision::Rev3_1, &data).unwrap();
        assert!(response.ratified);
        assert_eq!(response.kif, Some(0x30));
        assert_eq!(response.kvc, Some(0x79));
        assert_eq!(response.record_data.len(), 29);
        assert_eq!(response.record_data[0], 0x71);
        assert_eq!(response.data.as_ref(), data);

        let response =
            OpenSessionResponse::parse(PoRevision::Rev3_1, &hex!("03049098013079 00")).unwrap();
        assert!(!response.ratified);
        assert!(response.record_data.is_empty());

        assert!(OpenSessionResponse::parse(PoRevision::Rev3_1, &hex!("0304909800307905")).is_err());
    }

    #[test]
    fn test_open_session_rev24() {
        let data = hex!("79030D307124B928480805CBABAE30001240800000000000000000000000000000");
        let response = OpenSessionResponse::parse(PoRevision::Rev2_4, &data).unwrap();
        assert!(response.ratified);
        assert_eq!(response.kif, None);
        assert_eq!(response.kvc, Some(0x79));
        assert_eq!(response.record_data.as_ref(), &data[5..34]);

        let response =
            OpenSessionResponse::parse(PoRevision::Rev2_4, &hex!("79030D30710000")).unwrap();
        assert!(!response.ratified);
        assert!(response.record_data.is_empty());
    }

    #[test]
    fn test_open_session_rev10() {
        let response = OpenSessionResponse::parse(PoRevision::Rev1_0, &hex!("030D3071")).unwrap();
        assert!(response.ratified);
        assert_eq!(response.kvc, None);
        assert!(OpenSessionResponse::parse(PoRevision::Rev1_0, &hex!("030D30")).is_err());
    }

    #[test]
    fn test_split_records() {
        let records = split_records(&hex!("0102AABB0301CC")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (1, Bytes::from_static(&hex!("AABB"))));
        assert_eq!(records[1], (3, Bytes::from_static(&hex!("CC"))));
        assert!(split_records(&hex!("0105AABB")).is_err());
        assert!(split_records(&hex!("0101AA03")).is_err());
        assert!(split_records(&[]).unwrap().is_empty());
    }
}
