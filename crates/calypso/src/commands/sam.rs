//! SAM commands used by the secure session

use bytes::{BufMut, Bytes, BytesMut};
use calypso_apdu_core::Command;

use super::CommandKind;
use crate::card::SamRevision;
use crate::constants::{DIGEST_FRAME_MAX, sam_ins};
use crate::{Error, Result};

/// A SAM command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamCommand {
    /// Select the key diversifier, the card serial number
    SelectDiversifier {
        /// Card application serial number
        diversifier: Bytes,
    },
    /// Ask for a terminal challenge
    GetChallenge {
        /// Challenge length, 4 or 8
        length: u8,
    },
    /// Start the session digest
    DigestInit {
        /// Extended (revision 3.2) session
        extended: bool,
        /// KIF of the session key
        kif: u8,
        /// KVC of the session key
        kvc: u8,
        /// Key record number, used when the KIF is 0xFF
        key_record: u8,
        /// Open Secure Session response data
        data: Bytes,
    },
    /// Feed one card frame to the digest
    DigestUpdate {
        /// Exact frame bytes
        data: Bytes,
    },
    /// Compute the SAM half of the session signature
    DigestClose {
        /// Signature length, 4 or 8
        length: u8,
    },
    /// Check the card half of the session signature
    DigestAuthenticate {
        /// Card signature
        signature: Bytes,
    },
    /// Read the parameters of a key
    ReadKeyParameters {
        /// KIF of the key
        kif: u8,
        /// KVC of the key
        kvc: u8,
    },
}

const fn check_length(name: &'static str, length: usize) -> Result<()> {
    if length != 4 && length != 8 {
        return Err(Error::invalid_parameter(name, length));
    }
    Ok(())
}

impl SamCommand {
    /// Get a challenge of 4 or 8 bytes
    pub fn get_challenge(length: u8) -> Result<Self> {
        check_length("challenge length", length.into())?;
        Ok(Self::GetChallenge { length })
    }

    /// Start the digest with the session key and the Open Secure Session data
    pub fn digest_init(
        extended: bool,
        kif: u8,
        kvc: u8,
        key_record: u8,
        data: impl Into<Bytes>,
    ) -> Result<Self> {
        if key_record == 0 && (kif == 0 || kvc == 0) {
            return Err(Error::invalid_parameter("key record number", 0));
        }
        Ok(Self::DigestInit {
            extended,
            kif,
            kvc,
            key_record,
            data: data.into(),
        })
    }

    /// Feed one frame to the digest
    pub fn digest_update(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.len() > DIGEST_FRAME_MAX {
            return Err(Error::invalid_parameter("digest data length", data.len()));
        }
        Ok(Self::DigestUpdate { data })
    }

    /// Close the digest, producing a 4 or 8 byte signature
    pub fn digest_close(length: u8) -> Result<Self> {
        check_length("signature length", length.into())?;
        Ok(Self::DigestClose { length })
    }

    /// Authenticate the card signature
    pub fn digest_authenticate(signature: impl Into<Bytes>) -> Result<Self> {
        let signature = signature.into();
        check_length("signature length", signature.len())?;
        Ok(Self::DigestAuthenticate { signature })
    }

    /// Command identity
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::SelectDiversifier { .. } => CommandKind::SelectDiversifier,
            Self::GetChallenge { .. } => CommandKind::GetChallenge,
            Self::DigestInit { .. } => CommandKind::DigestInit,
            Self::DigestUpdate { .. } => CommandKind::DigestUpdate,
            Self::DigestClose { .. } => CommandKind::DigestClose,
            Self::DigestAuthenticate { .. } => CommandKind::DigestAuthenticate,
            Self::ReadKeyParameters { .. } => CommandKind::ReadKeyParameters,
        }
    }

    /// Frame the command for a SAM of the given revision
    pub fn to_apdu(&self, revision: SamRevision) -> Command {
        let cla = revision.class_byte();
        match self {
            Self::SelectDiversifier { diversifier } => {
                Command::new(cla, sam_ins::SELECT_DIVERSIFIER, 0x00, 0x00)
                    .with_data(diversifier.clone())
            }
            Self::GetChallenge { length } => {
                Command::new(cla, sam_ins::GET_CHALLENGE, 0x00, 0x00).with_le(*length)
            }
            Self::DigestInit {
                extended,
                kif,
                kvc,
                key_record,
                data,
            } => {
                let p1 = if *extended { 0x02 } else { 0x00 };
                if *kif == 0xFF {
                    // The key is designated by its record number
                    Command::new(cla, sam_ins::DIGEST_INIT, p1, *key_record).with_data(data.clone())
                } else {
                    let mut buf = BytesMut::with_capacity(data.len() + 2);
                    buf.put_u8(*kif);
                    buf.put_u8(*kvc);
                    buf.put_slice(data);
                    Command::new(cla, sam_ins::DIGEST_INIT, p1, 0xFF).with_data(buf.freeze())
                }
            }
            Self::DigestUpdate { data } => {
                Command::new(cla, sam_ins::DIGEST_UPDATE, 0x00, 0x00).with_data(data.clone())
            }
            Self::DigestClose { length } => {
                Command::new(cla, sam_ins::DIGEST_CLOSE, 0x00, 0x00).with_le(*length)
            }
            Self::DigestAuthenticate { signature } => {
                Command::new(cla, sam_ins::DIGEST_AUTHENTICATE, 0x00, 0x00)
                    .with_data(signature.clone())
            }
            Self::ReadKeyParameters { kif, kvc } => {
                Command::new(cla, sam_ins::READ_KEY_PARAMETERS, 0x00, 0xF0)
                    .with_data(vec![*kif, *kvc])
                    .with_le(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn apdu(command: &SamCommand) -> Vec<u8> {
        command.to_apdu(SamRevision::C1).to_bytes().to_vec()
    }

    #[test]
    fn test_session_frames() {
        let select = SamCommand::SelectDiversifier {
            diversifier: Bytes::from_static(&hex!("0000000011223344")),
        };
        assert_eq!(apdu(&select), hex!("80140000080000000011223344"));
        assert_eq!(
            apdu(&SamCommand::get_challenge(4).unwrap()),
            hex!("8084000004")
        );

        let init = SamCommand::digest_init(false, 0x30, 0x79, 0, hex!("03049098003079 00").to_vec())
            .unwrap();
        assert_eq!(apdu(&init), hex!("808A00FF0A30790304909800307900"));

        let update = SamCommand::digest_update(hex!("9000").to_vec()).unwrap();
        assert_eq!(apdu(&update), hex!("808C0000029000"));
        assert_eq!(apdu(&SamCommand::digest_close(4).unwrap()), hex!("808E000004"));

        let auth = SamCommand::digest_authenticate(hex!("55667788").to_vec()).unwrap();
        assert_eq!(apdu(&auth), hex!("808200000455667788"));

        let read = SamCommand::ReadKeyParameters { kif: 0x30, kvc: 0x79 };
        assert_eq!(apdu(&read), hex!("80BC00F002307900"));
    }

    #[test]
    fn test_digest_init_modes() {
        let init = SamCommand::digest_init(true, 0xFF, 0x00, 0x03, hex!("0102").to_vec()).unwrap();
        assert_eq!(apdu(&init), hex!("808A0203020102"));

        assert!(SamCommand::digest_init(false, 0x00, 0x79, 0, Bytes::new()).is_err());
        assert!(SamCommand::digest_init(false, 0x30, 0x00, 0, Bytes::new()).is_err());
        assert!(SamCommand::digest_init(false, 0x00, 0x00, 1, Bytes::new()).is_ok());
    }

    #[test]
    fn test_s1d_class() {
        let frame = SamCommand::get_challenge(8)
            .unwrap()
            .to_apdu(SamRevision::S1D)
            .to_bytes();
        assert_eq!(frame.as_ref(), hex!("9484000008"));
    }

    #[test]
    fn test_invalid_lengths() {
        assert!(SamCommand::get_challenge(5).is_err());
        assert!(SamCommand::digest_close(0).is_err());
        assert!(SamCommand::digest_authenticate(vec![0u8; 6]).is_err());
        assert!(SamCommand::digest_update(vec![0u8; 256]).is_err());
    }
}
