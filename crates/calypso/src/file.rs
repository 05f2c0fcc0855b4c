//! In-memory mirror of the card file structure
//!
//! The model is only fed with responses whose status was already accepted. Each
//! successful command leaves its mark here immediately, so a batch that fails halfway
//! keeps what its earlier commands applied.

use std::collections::BTreeMap;

use calypso_apdu_core::Response;
use iso7816_tlv::ber::Tlv;
use tracing::trace;

use crate::card::primitive;
use crate::commands::{PoCommand, ReadMode, split_records};
use crate::constants::{COUNTER_SIZE, tags};
use crate::settings::AccessLevel;
use crate::{Error, Result};

/// Length of the proprietary information returned by Select File
const PROPRIETARY_INFO_LEN: usize = 23;

const SEL_SFI: usize = 0;
const SEL_TYPE: usize = 1;
const SEL_EF_TYPE: usize = 2;
const SEL_REC_SIZE: usize = 3;
const SEL_NUM_REC: usize = 4;
const SEL_AC: usize = 5;
const SEL_NKEY: usize = 9;
const SEL_DF_STATUS: usize = 13;
const SEL_KVCS: usize = 14;
const SEL_DATA_REF: usize = 14;
const SEL_KIFS: usize = 17;
const SEL_LID: usize = 21;

const FILE_TYPE_MF: u8 = 0x01;
const FILE_TYPE_DF: u8 = 0x02;
const FILE_TYPE_EF: u8 = 0x04;

/// Elementary file structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Transparent file
    Binary,
    /// Linear records
    Linear,
    /// Cyclic records, newest first
    Cyclic,
    /// Counters mapped on other counters files
    SimulatedCounters,
    /// Counters
    Counters,
}

impl TryFrom<u8> for FileType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Binary),
            0x02 => Ok(Self::Linear),
            0x04 => Ok(Self::Cyclic),
            0x08 => Ok(Self::SimulatedCounters),
            0x09 => Ok(Self::Counters),
            other => Err(Error::UnknownFileType(other)),
        }
    }
}

fn array<const N: usize>(info: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&info[offset..offset + N]);
    out
}

const fn word(info: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([info[offset], info[offset + 1]])
}

/// Header of the current MF or DF
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryHeader {
    /// Long identifier
    pub lid: u16,
    /// Access conditions
    pub access_conditions: [u8; 4],
    /// Key indexes
    pub key_indexes: [u8; 4],
    /// DF status byte
    pub df_status: u8,
    /// KIF of the perso, load and debit keys
    pub kif: [u8; 3],
    /// KVC of the perso, load and debit keys
    pub kvc: [u8; 3],
}

impl DirectoryHeader {
    fn from_proprietary_info(info: &[u8]) -> Self {
        Self {
            lid: word(info, SEL_LID),
            access_conditions: array(info, SEL_AC),
            key_indexes: array(info, SEL_NKEY),
            df_status: info[SEL_DF_STATUS],
            kif: array(info, SEL_KIFS),
            kvc: array(info, SEL_KVCS),
        }
    }

    /// KIF of the key of a level
    pub const fn kif(&self, level: AccessLevel) -> u8 {
        self.kif[level.index()]
    }

    /// KVC of the key of a level
    pub const fn kvc(&self, level: AccessLevel) -> u8 {
        self.kvc[level.index()]
    }
}

/// Header of an elementary file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Long identifier
    pub lid: u16,
    /// File structure
    pub file_type: FileType,
    /// Record size, or file size for binary files
    pub record_size: usize,
    /// Number of records, 1 for binary files
    pub record_count: usize,
    /// Access conditions
    pub access_conditions: [u8; 4],
    /// Key indexes
    pub key_indexes: [u8; 4],
    /// DF status byte
    pub df_status: u8,
    /// LID of the file sharing its data with this one
    pub shared_reference: Option<u16>,
}

impl FileHeader {
    fn from_proprietary_info(info: &[u8]) -> Result<Self> {
        let file_type = FileType::try_from(info[SEL_EF_TYPE])?;
        let (record_size, record_count) = match file_type {
            FileType::Binary => (usize::from(word(info, SEL_REC_SIZE)), 1),
            _ => (
                usize::from(info[SEL_REC_SIZE]),
                usize::from(info[SEL_NUM_REC]),
            ),
        };
        let shared_reference = match word(info, SEL_DATA_REF) {
            0 => None,
            reference => Some(reference),
        };
        Ok(Self {
            lid: word(info, SEL_LID),
            file_type,
            record_size,
            record_count,
            access_conditions: array(info, SEL_AC),
            key_indexes: array(info, SEL_NKEY),
            df_status: info[SEL_DF_STATUS],
            shared_reference,
        })
    }
}

/// An elementary file and the records known so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryFile {
    sfi: u8,
    header: Option<FileHeader>,
    records: BTreeMap<u8, Vec<u8>>,
}

impl ElementaryFile {
    const fn new(sfi: u8) -> Self {
        Self {
            sfi,
            header: None,
            records: BTreeMap::new(),
        }
    }

    /// Short file identifier
    pub const fn sfi(&self) -> u8 {
        self.sfi
    }

    /// Header, known once the file was selected
    pub const fn header(&self) -> Option<&FileHeader> {
        self.header.as_ref()
    }

    /// Content of a record
    pub fn record(&self, number: u8) -> Option<&[u8]> {
        self.records.get(&number).map(Vec::as_slice)
    }

    /// Content of record 1
    pub fn content(&self) -> Option<&[u8]> {
        self.record(1)
    }

    /// Known records, in record order
    pub fn records(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.records
            .iter()
            .map(|(number, content)| (*number, content.as_slice()))
    }

    /// Value of a counter, read from record 1
    pub fn counter(&self, number: u8) -> Option<u32> {
        let offset = COUNTER_SIZE * usize::from(number.checked_sub(1)?);
        let bytes = self.content()?.get(offset..offset + COUNTER_SIZE)?;
        Some(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    fn set_record(&mut self, number: u8, content: &[u8]) {
        self.records.insert(number, content.to_vec());
    }

    fn set_at(&mut self, number: u8, content: &[u8], offset: usize) {
        let record = self.records.entry(number).or_default();
        let end = offset + content.len();
        if record.len() < end {
            record.resize(end, 0);
        }
        record[offset..end].copy_from_slice(content);
    }

    fn or_record(&mut self, number: u8, content: &[u8]) {
        let record = self.records.entry(number).or_default();
        if record.len() < content.len() {
            record.resize(content.len(), 0);
        }
        for (byte, new) in record.iter_mut().zip(content) {
            *byte |= new;
        }
    }

    fn append(&mut self, content: &[u8]) {
        let limit = self.header.map(|header| header.record_count);
        let shifted: BTreeMap<u8, Vec<u8>> = std::mem::take(&mut self.records)
            .into_iter()
            .filter_map(|(number, record)| Some((number.checked_add(1)?, record)))
            .filter(|(number, _)| limit.is_none_or(|limit| usize::from(*number) <= limit))
            .collect();
        self.records = shifted;
        self.records.insert(1, content.to_vec());
    }
}

/// Files of the current application, keyed by SFI
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileModel {
    directory: Option<DirectoryHeader>,
    files: BTreeMap<u8, ElementaryFile>,
    current: Option<u8>,
}

impl FileModel {
    /// Header of the current DF, known once it was selected
    pub const fn directory_header(&self) -> Option<&DirectoryHeader> {
        self.directory.as_ref()
    }

    /// File with the given SFI
    pub fn file_by_sfi(&self, sfi: u8) -> Option<&ElementaryFile> {
        self.files.get(&sfi)
    }

    /// File with the given LID, known once it was selected
    pub fn file_by_lid(&self, lid: u16) -> Option<&ElementaryFile> {
        self.files
            .values()
            .find(|file| file.header.is_some_and(|header| header.lid == lid))
    }

    /// All known files
    pub fn files(&self) -> impl Iterator<Item = &ElementaryFile> {
        self.files.values()
    }

    fn file_mut(&mut self, sfi: u8) -> &mut ElementaryFile {
        // SFI 0 designates the current EF
        let sfi = match sfi {
            0 => self.current.unwrap_or(0),
            sfi => sfi,
        };
        self.files
            .entry(sfi)
            .or_insert_with(|| ElementaryFile::new(sfi))
    }

    /// Store a record, replacing any previous content
    pub fn set_record(&mut self, sfi: u8, number: u8, content: &[u8]) {
        trace!(sfi, number, content = %hex::encode_upper(content), "Record updated");
        self.file_mut(sfi).set_record(number, content);
    }

    /// Apply the successful response of a command
    pub fn apply(&mut self, command: &PoCommand, response: &Response) -> Result<()> {
        let data = response.data();
        match command {
            PoCommand::SelectFile(_) => self.apply_select(data)?,
            PoCommand::ReadRecords {
                sfi,
                first_record,
                mode,
                ..
            } => match mode {
                ReadMode::One if !data.is_empty() => self.set_record(*sfi, *first_record, data),
                ReadMode::One => {}
                ReadMode::Multiple => {
                    for (number, content) in split_records(data)? {
                        self.set_record(*sfi, number, &content);
                    }
                }
            },
            PoCommand::UpdateRecord { sfi, record, data } => self.set_record(*sfi, *record, data),
            PoCommand::WriteRecord { sfi, record, data } => {
                self.file_mut(*sfi).or_record(*record, data);
            }
            PoCommand::AppendRecord { sfi, data } => self.file_mut(*sfi).append(data),
            PoCommand::Increase { sfi, counter, .. } | PoCommand::Decrease { sfi, counter, .. } => {
                // The card answers the new counter value
                if data.len() == COUNTER_SIZE {
                    let offset = COUNTER_SIZE * usize::from(counter.saturating_sub(1));
                    self.file_mut(*sfi).set_at(1, data, offset);
                }
            }
            PoCommand::OpenSession { .. }
            | PoCommand::CloseSession { .. }
            | PoCommand::AbortSession
            | PoCommand::Ratification => {}
        }
        Ok(())
    }

    fn apply_select(&mut self, data: &[u8]) -> Result<()> {
        let tlv = Tlv::from_bytes(data)?;
        let info = primitive(&tlv, tags::PROPRIETARY_INFO, "missing proprietary information")?;
        if info.len() < PROPRIETARY_INFO_LEN {
            return Err(Error::InvalidResponse("proprietary information too short"));
        }

        match info[SEL_TYPE] {
            FILE_TYPE_MF | FILE_TYPE_DF => {
                self.directory = Some(DirectoryHeader::from_proprietary_info(info));
            }
            FILE_TYPE_EF => {
                let sfi = info[SEL_SFI];
                let header = FileHeader::from_proprietary_info(info)?;
                self.current = Some(sfi);
                self.file_mut(sfi).header = Some(header);
            }
            other => return Err(Error::UnknownFileType(other)),
        }
        Ok(())
    }
}
