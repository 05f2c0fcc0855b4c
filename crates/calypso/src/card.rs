//! Card and SAM identification
//!
//! A [`CalypsoCard`] is built from the FCI returned when the Calypso application is
//! selected and carries the in-memory [`FileModel`] kept up to date by every exchange.
//! A [`CalypsoSam`] is built from the SAM answer-to-reset.

use std::fmt;

use bytes::Bytes;
use derive_more::Display;
use iso7816_tlv::ber::{Tag, Tlv, Value};

use crate::buffer::BufferBudget;
use crate::constants::{
    DEFAULT_SESSION_BUFFER_SIZE, LEGACY_SESSION_BUFFER_OPERATIONS, SESSION_BUFFER_SIZES, cla, tags,
};
use crate::file::FileModel;
use crate::{Error, Result};

/// Calypso card revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PoRevision {
    /// Revision 1.0
    #[display("1.0")]
    Rev1_0,
    /// Revision 2.4
    #[display("2.4")]
    Rev2_4,
    /// Revision 3.1, also 3.2 cards running in compatibility mode
    #[display("3.1")]
    Rev3_1,
    /// Revision 3.2 with extended session mode
    #[display("3.2")]
    Rev3_2,
}

impl PoRevision {
    /// Derive the revision from the application type of the startup information
    pub const fn from_application_type(application_type: u8) -> Result<Self> {
        match application_type {
            0x00 | 0xFF => Err(Error::InvalidResponse("invalid application type")),
            0x01..=0x1F => Ok(Self::Rev2_4),
            t if t & 0x08 != 0 => Ok(Self::Rev3_2),
            _ => Ok(Self::Rev3_1),
        }
    }

    /// Class byte of card commands
    pub const fn class_byte(self) -> u8 {
        if self.is_legacy() {
            cla::LEGACY
        } else {
            cla::ISO7816
        }
    }

    /// Revisions 1.0 and 2.4
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::Rev1_0 | Self::Rev2_4)
    }

    /// Revision 3.2 extended mode: 8-byte challenges and signatures
    pub const fn is_extended(self) -> bool {
        matches!(self, Self::Rev3_2)
    }

    /// Length of the terminal challenge sent in Open Secure Session
    pub const fn challenge_len(self) -> usize {
        if self.is_extended() { 8 } else { 4 }
    }

    /// Length of each half of the session signature
    pub const fn signature_len(self) -> usize {
        self.challenge_len()
    }

    /// Highest record Open Secure Session can read, P1 keeps the key index in its low bits
    pub const fn max_open_record(self) -> u8 {
        if matches!(self, Self::Rev2_4) { 15 } else { 31 }
    }
}

/// How the card is reached by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmissionMode {
    /// Contactless
    #[default]
    Contactless,
    /// Contacts
    Contacts,
}

/// Startup information of the select-application FCI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupInfo {
    /// Session buffer size indicator
    pub buffer_size_indicator: u8,
    /// Chip platform
    pub platform: u8,
    /// Application type
    pub application_type: u8,
    /// Application subtype
    pub application_subtype: u8,
    /// Software issuer
    pub software_issuer: u8,
    /// Software version
    pub software_version: u8,
    /// Software revision
    pub software_revision: u8,
}

impl TryFrom<&[u8]> for StartupInfo {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self> {
        let [
            buffer_size_indicator,
            platform,
            application_type,
            application_subtype,
            software_issuer,
            software_version,
            software_revision,
        ] = *value
        else {
            return Err(Error::InvalidResponse("startup information must be 7 bytes"));
        };
        Ok(Self {
            buffer_size_indicator,
            platform,
            application_type,
            application_subtype,
            software_issuer,
            software_version,
            software_revision,
        })
    }
}

/// Depth-first search of a tag in a TLV tree
pub(crate) fn find<'a>(tlv: &'a Tlv, tag: &Tag) -> Option<&'a Tlv> {
    if tlv.tag() == tag {
        return Some(tlv);
    }
    match tlv.value() {
        Value::Constructed(children) => children.iter().find_map(|child| find(child, tag)),
        Value::Primitive(_) => None,
    }
}

/// Value of a primitive tag anywhere in a TLV tree
pub(crate) fn primitive<'a>(tlv: &'a Tlv, tag: u8, missing: &'static str) -> Result<&'a [u8]> {
    let tag = Tag::try_from(tag)?;
    match find(tlv, &tag).map(Tlv::value) {
        Some(Value::Primitive(bytes)) => Ok(bytes),
        Some(Value::Constructed(_)) => Err(Error::InvalidResponse("unexpected constructed tag")),
        None => Err(Error::InvalidResponse(missing)),
    }
}

/// The Calypso card application
#[derive(Debug, Clone)]
pub struct CalypsoCard {
    revision: PoRevision,
    df_name: Bytes,
    serial_number: Bytes,
    startup_info: Option<StartupInfo>,
    transmission_mode: TransmissionMode,
    df_ratified: Option<bool>,
    files: FileModel,
}

impl CalypsoCard {
    /// Create a card whose revision and serial number are already known
    ///
    /// Revision 1.0 cards answer without an FCI and are always created this way.
    pub fn new(revision: PoRevision, serial_number: impl Into<Bytes>) -> Self {
        Self {
            revision,
            df_name: Bytes::new(),
            serial_number: serial_number.into(),
            startup_info: None,
            transmission_mode: TransmissionMode::default(),
            df_ratified: None,
            files: FileModel::default(),
        }
    }

    /// Identify the card from the select-application FCI
    pub fn from_fci(fci: &[u8]) -> Result<Self> {
        let fci = Tlv::from_bytes(fci)?;
        if fci.tag() != &Tag::try_from(tags::FCI_TEMPLATE)? {
            return Err(Error::InvalidResponse("FCI template expected"));
        }

        let df_name = primitive(&fci, tags::DF_NAME, "missing DF name")?;
        let serial_number = primitive(
            &fci,
            tags::APPLICATION_SERIAL_NUMBER,
            "missing application serial number",
        )?;
        if serial_number.len() != 8 {
            return Err(Error::InvalidResponse("serial number must be 8 bytes"));
        }
        let startup_info =
            StartupInfo::try_from(primitive(&fci, tags::STARTUP_INFO, "missing startup info")?)?;

        Ok(Self {
            revision: PoRevision::from_application_type(startup_info.application_type)?,
            df_name: Bytes::copy_from_slice(df_name),
            serial_number: Bytes::copy_from_slice(serial_number),
            startup_info: Some(startup_info),
            transmission_mode: TransmissionMode::default(),
            df_ratified: None,
            files: FileModel::default(),
        })
    }

    /// Set how the card is reached
    pub const fn with_transmission_mode(mut self, mode: TransmissionMode) -> Self {
        self.transmission_mode = mode;
        self
    }

    /// Card revision
    pub const fn revision(&self) -> PoRevision {
        self.revision
    }

    /// Selected application name
    pub fn df_name(&self) -> &[u8] {
        &self.df_name
    }

    /// Application serial number, used as SAM key diversifier
    pub fn serial_number(&self) -> &[u8] {
        &self.serial_number
    }

    /// Startup information, absent on revision 1.0
    pub const fn startup_info(&self) -> Option<&StartupInfo> {
        self.startup_info.as_ref()
    }

    /// Transmission mode
    pub const fn transmission_mode(&self) -> TransmissionMode {
        self.transmission_mode
    }

    /// Whether the previous session was ratified, known after a session was opened
    pub const fn df_ratified(&self) -> Option<bool> {
        self.df_ratified
    }

    pub(crate) const fn set_df_ratified(&mut self, ratified: bool) {
        self.df_ratified = Some(ratified);
    }

    /// Session buffer capacity
    pub fn buffer_budget(&self) -> BufferBudget {
        if self.revision.is_legacy() {
            return BufferBudget::Operations(LEGACY_SESSION_BUFFER_OPERATIONS);
        }
        let size = self
            .startup_info
            .and_then(|info| SESSION_BUFFER_SIZES.get(usize::from(info.buffer_size_indicator)))
            .copied()
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_SESSION_BUFFER_SIZE);
        BufferBudget::Bytes(size)
    }

    /// Files known so far
    pub const fn files(&self) -> &FileModel {
        &self.files
    }

    pub(crate) const fn files_mut(&mut self) -> &mut FileModel {
        &mut self.files
    }
}

impl fmt::Display for CalypsoCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Calypso card:")?;
        writeln!(f, "  Revision: {}", self.revision)?;
        writeln!(f, "  DF name: {}", hex::encode_upper(&self.df_name))?;
        writeln!(f, "  Serial number: {}", hex::encode_upper(&self.serial_number))?;
        write!(f, "  Session buffer: {}", self.buffer_budget())
    }
}

/// Calypso SAM revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SamRevision {
    /// C1
    #[display("C1")]
    C1,
    /// S1D (D0, D1 or D2)
    #[display("S1D")]
    S1D,
    /// S1E
    #[display("S1E")]
    S1E,
}

impl SamRevision {
    /// Class byte of SAM commands
    pub const fn class_byte(self) -> u8 {
        match self {
            Self::S1D => cla::LEGACY,
            Self::C1 | Self::S1E => cla::SAM,
        }
    }
}

/// A Calypso SAM identified from its answer-to-reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalypsoSam {
    /// SAM revision
    pub revision: SamRevision,
    /// Chip platform
    pub platform: u8,
    /// Application type
    pub application_type: u8,
    /// Application subtype
    pub application_subtype: u8,
    /// Software issuer
    pub software_issuer: u8,
    /// Software version
    pub software_version: u8,
    /// Software revision
    pub software_revision: u8,
    /// SAM serial number
    pub serial_number: [u8; 4],
}

impl CalypsoSam {
    /// Historical bytes marker preceding the SAM identification
    const ATR_MARKER: [u8; 2] = [0x80, 0x5A];
    const ATR_TRAILER: [u8; 3] = [0x82, 0x90, 0x00];

    /// Identify the SAM from its answer-to-reset
    pub fn from_atr(atr: &[u8]) -> Result<Self> {
        if !atr.ends_with(&Self::ATR_TRAILER) {
            return Err(Error::InvalidResponse("SAM ATR trailer not found"));
        }
        let start = atr
            .windows(2)
            .position(|w| w == Self::ATR_MARKER)
            .ok_or(Error::InvalidResponse("SAM ATR marker not found"))?
            + 2;
        let Some(
            &[
                platform,
                application_type,
                application_subtype,
                software_issuer,
                software_version,
                software_revision,
                s0,
                s1,
                s2,
                s3,
            ],
        ) = atr.get(start..start + 10)
        else {
            return Err(Error::InvalidResponse("SAM ATR too short"));
        };

        let revision = match application_subtype {
            0xC1 => SamRevision::C1,
            0xD0..=0xD2 => SamRevision::S1D,
            0xE1 => SamRevision::S1E,
            _ => return Err(Error::InvalidResponse("unknown SAM subtype")),
        };

        Ok(Self {
            revision,
            platform,
            application_type,
            application_subtype,
            software_issuer,
            software_version,
            software_revision,
            serial_number: [s0, s1, s2, s3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const FCI_REV31: [u8; 37] =
        hex!("6F238409315449432E49434131A516BF0C13C708 0000000011223344 53070A3C2312141001");
    const FCI_REV24: [u8; 44] = hex!(
        "6F2A8410A0000004040125090101000000000000A516BF0C13C708 0000000011223344 53070A2E1142000101"
    );

    #[test]
    fn test_card_from_fci_rev31() {
        let card = CalypsoCard::from_fci(&FCI_REV31).unwrap();
        assert_eq!(card.revision(), PoRevision::Rev3_1);
        assert_eq!(card.df_name(), b"1TIC.ICA1");
        assert_eq!(card.serial_number(), hex!("0000000011223344"));
        let info = card.startup_info().unwrap();
        assert_eq!(info.buffer_size_indicator, 0x0A);
        assert_eq!(info.application_type, 0x23);
        assert_eq!(card.buffer_budget(), BufferBudget::Bytes(430));
        assert_eq!(card.transmission_mode(), TransmissionMode::Contactless);
        assert_eq!(card.df_ratified(), None);
        assert_eq!(card.revision().class_byte(), 0x00);
    }

    #[test]
    fn test_card_from_fci_rev24() {
        let card = CalypsoCard::from_fci(&FCI_REV24).unwrap();
        assert_eq!(card.revision(), PoRevision::Rev2_4);
        assert_eq!(card.buffer_budget(), BufferBudget::Operations(6));
        assert_eq!(card.revision().class_byte(), 0x94);
    }

    #[test]
    fn test_rev10_card() {
        let card = CalypsoCard::new(PoRevision::Rev1_0, hex!("0000000011223344").to_vec())
            .with_transmission_mode(TransmissionMode::Contacts);
        assert!(card.startup_info().is_none());
        assert_eq!(card.buffer_budget(), BufferBudget::Operations(6));
        assert_eq!(card.transmission_mode(), TransmissionMode::Contacts);
    }

    #[test]
    fn test_revision_from_application_type() {
        assert!(PoRevision::from_application_type(0x00).is_err());
        assert!(PoRevision::from_application_type(0xFF).is_err());
        assert_eq!(PoRevision::from_application_type(0x1F).unwrap(), PoRevision::Rev2_4);
        assert_eq!(PoRevision::from_application_type(0x23).unwrap(), PoRevision::Rev3_1);
        assert_eq!(PoRevision::from_application_type(0x28).unwrap(), PoRevision::Rev3_2);
        assert_eq!(PoRevision::Rev3_2.challenge_len(), 8);
        assert_eq!(PoRevision::Rev2_4.signature_len(), 4);
    }

    #[test]
    fn test_buffer_size_indicator() {
        let mut fci = FCI_REV31;
        // Buffer size indicator 0x06 gives the smallest known buffer
        fci[30] = 0x06;
        let card = CalypsoCard::from_fci(&fci).unwrap();
        assert_eq!(card.buffer_budget(), BufferBudget::Bytes(215));

        fci[30] = 0x02;
        let card = CalypsoCard::from_fci(&fci).unwrap();
        assert_eq!(card.buffer_budget(), BufferBudget::Bytes(430));
    }

    #[test]
    fn test_invalid_fci() {
        assert!(CalypsoCard::from_fci(&hex!("8409315449432E49434131")).is_err());
        // Startup information with only 6 bytes
        let fci = hex!("6F228409315449432E49434131A515BF0C12C708000000001122334453060A3C23121410");
        assert!(CalypsoCard::from_fci(&fci).is_err());
    }

    #[test]
    fn test_sam_from_atr() {
        let sam = CalypsoSam::from_atr(&hex!("3B3F9600805A0080C120000012345678829000")).unwrap();
        assert_eq!(sam.revision, SamRevision::C1);
        assert_eq!(sam.application_subtype, 0xC1);
        assert_eq!(sam.software_issuer, 0x20);
        assert_eq!(sam.serial_number, hex!("12345678"));
        assert_eq!(sam.revision.class_byte(), 0x80);

        let sam = CalypsoSam::from_atr(&hex!("3B3F9600805A0080D120000012345678829000")).unwrap();
        assert_eq!(sam.revision, SamRevision::S1D);
        assert_eq!(sam.revision.class_byte(), 0x94);

        assert!(CalypsoSam::from_atr(&hex!("3B3F9600805A0080C1200000123456789000")).is_err());
        assert!(CalypsoSam::from_atr(&hex!("3B3F9600805A0080F120000012345678829000")).is_err());
        assert!(CalypsoSam::from_atr(&hex!("3B3F9600805A0080829000")).is_err());
    }
}
