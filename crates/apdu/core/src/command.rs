//! APDU command frames
//!
//! A [`Command`] is the raw ISO/IEC 7816-4 request: `CLA INS P1 P2 [Lc Data] [Le]`.
//! Only short length fields are supported, which is all Calypso cards and SAMs use.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

/// Expected length type for APDU commands
pub type ExpectedLength = u8;

/// Maximum payload carried by a short APDU
pub const MAX_DATA_LENGTH: usize = 255;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected length (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Command payload, empty when the command carries no data
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Whether this is an ISO case 4 command (data in, data out)
    pub const fn is_case4(&self) -> bool {
        self.data.is_some() && self.le.is_some()
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        let data = self.data.as_ref().map_or(0, |data| 1 + data.len());
        let le = usize::from(self.le.is_some());
        4 + data + le
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());

        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        if let Some(data) = &self.data {
            // Callers validate payload sizes before framing
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            buffer.put_u8(le);
        }

        buffer.freeze()
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let [cla, ins, p1, p2, body @ ..] = data else {
            return Err(Error::InvalidCommandLength(data.len()));
        };

        let mut command = Self::new(*cla, *ins, *p1, *p2);

        match body {
            [] => {}
            [le] => command.le = Some(*le),
            [lc, rest @ ..] => {
                let lc = *lc as usize;
                if rest.len() == lc {
                    command.data = Some(Bytes::copy_from_slice(rest));
                } else if rest.len() == lc + 1 {
                    command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                    command.le = Some(rest[lc]);
                } else {
                    return Err(Error::InvalidCommandLength(data.len()));
                }
            }
        }

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.to_bytes()))
    }
}

impl From<Command> for Bytes {
    fn from(command: Command) -> Self {
        command.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_serialization() {
        // Update record, SFI 7, record 1
        let cmd = Command::new(0x00, 0xDC, 0x01, 0x3C).with_data(hex!("00112233").to_vec());
        assert_eq!(cmd.to_bytes().as_ref(), hex!("00DC013C0400112233"));
        assert!(!cmd.is_case4());

        // Decrease counter 1 of SFI 0x10 by 100
        let cmd = Command::new(0x00, 0x30, 0x01, 0x80)
            .with_data(hex!("000064").to_vec())
            .with_le(0);
        assert_eq!(cmd.to_bytes().as_ref(), hex!("003001800300006400"));
        assert!(cmd.is_case4());
    }

    #[test]
    fn test_command_length() {
        assert_eq!(Command::new(0x00, 0x8E, 0x00, 0x00).command_length(), 4);
        assert_eq!(Command::new(0x00, 0x8E, 0x00, 0x00).with_le(0).command_length(), 5);

        let cmd = Command::new(0x80, 0x8C, 0x00, 0x00).with_data(hex!("9000").to_vec());
        assert_eq!(cmd.command_length(), 7);
        assert_eq!(cmd.command_length(), cmd.to_bytes().len());
    }

    #[test]
    fn test_command_from_bytes() {
        let cmd = Command::from_bytes(&hex!("008E0000")).unwrap();
        assert_eq!((cmd.cla, cmd.ins, cmd.p1, cmd.p2), (0x00, 0x8E, 0x00, 0x00));
        assert!(cmd.data.is_none());
        assert!(cmd.le.is_none());

        let cmd = Command::from_bytes(&hex!("00B2014400")).unwrap();
        assert!(cmd.data.is_none());
        assert_eq!(cmd.le, Some(0));

        let cmd = Command::from_bytes(&hex!("80140000080000000011223344")).unwrap();
        assert_eq!(cmd.payload(), hex!("0000000011223344"));
        assert!(cmd.le.is_none());

        let cmd = Command::from_bytes(&hex!("008A0B3904C1C2C3C400")).unwrap();
        assert_eq!(cmd.payload(), hex!("C1C2C3C4"));
        assert_eq!(cmd.le, Some(0));

        assert!(Command::from_bytes(&hex!("00B2")).is_err());
        assert!(Command::from_bytes(&hex!("00DC013C0400112233445566")).is_err());
    }

    #[test]
    fn test_command_display() {
        let cmd = Command::new(0x80, 0x84, 0x00, 0x00).with_le(4);
        assert_eq!(cmd.to_string(), "8084000004");
    }
}
