//! Constants used in Calypso card and SAM exchanges
//!
//! Class bytes, instruction codes, parameter ranges and the BER-TLV tags found in the
//! select-application FCI.

/// Command classes
pub mod cla {
    /// ISO7816 class, used by revision 3.x cards
    pub const ISO7816: u8 = 0x00;
    /// Legacy Calypso class, used by revision 1.0 and 2.4 cards and S1D SAMs
    pub const LEGACY: u8 = 0x94;
    /// SAM proprietary class
    pub const SAM: u8 = 0x80;
}

/// Card instruction codes
pub mod ins {
    /// SELECT FILE
    pub const SELECT_FILE: u8 = 0xA4;
    /// READ RECORD(S), also used for the ratification frame
    pub const READ_RECORDS: u8 = 0xB2;
    /// UPDATE RECORD
    pub const UPDATE_RECORD: u8 = 0xDC;
    /// WRITE RECORD
    pub const WRITE_RECORD: u8 = 0xD2;
    /// APPEND RECORD
    pub const APPEND_RECORD: u8 = 0xE2;
    /// DECREASE
    pub const DECREASE: u8 = 0x30;
    /// INCREASE
    pub const INCREASE: u8 = 0x32;
    /// OPEN SECURE SESSION
    pub const OPEN_SESSION: u8 = 0x8A;
    /// CLOSE SECURE SESSION, also used to abort a session
    pub const CLOSE_SESSION: u8 = 0x8E;
}

/// SAM instruction codes
pub mod sam_ins {
    /// SELECT DIVERSIFIER
    pub const SELECT_DIVERSIFIER: u8 = 0x14;
    /// GET CHALLENGE
    pub const GET_CHALLENGE: u8 = 0x84;
    /// DIGEST INIT
    pub const DIGEST_INIT: u8 = 0x8A;
    /// DIGEST UPDATE
    pub const DIGEST_UPDATE: u8 = 0x8C;
    /// DIGEST CLOSE
    pub const DIGEST_CLOSE: u8 = 0x8E;
    /// DIGEST AUTHENTICATE
    pub const DIGEST_AUTHENTICATE: u8 = 0x82;
    /// READ KEY PARAMETERS
    pub const READ_KEY_PARAMETERS: u8 = 0xBC;
}

/// Tags of the select-application FCI
pub mod tags {
    /// FCI template
    pub const FCI_TEMPLATE: u8 = 0x6F;
    /// Dedicated file name
    pub const DF_NAME: u8 = 0x84;
    /// Application serial number
    pub const APPLICATION_SERIAL_NUMBER: u8 = 0xC7;
    /// Discretionary data holding the startup information
    pub const STARTUP_INFO: u8 = 0x53;
    /// Proprietary information returned by SELECT FILE
    pub const PROPRIETARY_INFO: u8 = 0x85;
}

/// Highest short file identifier
pub const SFI_MAX: u8 = 31;
/// Highest value a 3-byte counter can hold
pub const COUNTER_VALUE_MAX: u32 = 0x00FF_FFFF;
/// Largest payload accepted by record-modifying commands
pub const PAYLOAD_MAX: usize = 250;
/// Size of a counter inside a counters record
pub const COUNTER_SIZE: usize = 3;
/// Longest card frame a single Digest Update can carry
pub const DIGEST_FRAME_MAX: usize = 255;

/// Extra bytes charged to the session buffer for each modifying command
pub const SESSION_BUFFER_CMD_OVERHEAD: usize = 6;
/// Session buffer size used when the card does not report a known indicator
pub const DEFAULT_SESSION_BUFFER_SIZE: usize = 430;
/// Operation budget of revision 1.0 and 2.4 cards
pub const LEGACY_SESSION_BUFFER_OPERATIONS: usize = 6;

/// Session buffer sizes in bytes, indexed by the startup buffer size indicator
pub const SESSION_BUFFER_SIZES: [usize; 56] = [
    0, 0, 0, 0, 0, 0, 215, 256, 304, 362, 430, 512, 608, 724, 861, 1024, 1217, 1448, 1722, 2048,
    2435, 2896, 3444, 4096, 4870, 5792, 6888, 8192, 9741, 11585, 13777, 16384, 19483, 23170,
    27554, 32768, 38967, 46340, 55108, 65536, 77935, 92681, 110217, 131072, 155871, 185363,
    220435, 262144, 311743, 370727, 440871, 524288, 623487, 741455, 881743, 1048576,
];
