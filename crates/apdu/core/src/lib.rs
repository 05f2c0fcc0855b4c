//! Core types for APDU (Application Protocol Data Unit) exchanges
//!
//! This crate provides the frame-level building blocks shared by every Calypso
//! card and SAM exchange:
//!
//! - [`Command`] and [`Response`], the ISO/IEC 7816-4 request and response frames
//! - [`StatusWord`], the two trailing status bytes of every response
//! - [`CardTransport`], the synchronous `transmit(request) -> response` collaborator
//!   implemented by card readers
//!
//! Command semantics (which INS, which P1/P2, how a status word is interpreted) live
//! in the application crates built on top of this one.
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod command;
pub mod error;
pub mod response;
pub mod transport;

pub use command::{Command, ExpectedLength};
pub use error::{Error, ResultExt};
pub use response::Response;
pub use response::status::StatusWord;
pub use transport::{CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{Bytes, BytesMut, Error, ResultExt};

    pub use crate::command::{Command, ExpectedLength};

    pub use crate::response::Response;
    pub use crate::response::status::{StatusWord, common as status};

    pub use crate::transport::{CardTransport, TransportError};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reexports() {
        let cmd = Command::new(0x00, 0xB2, 0x01, 0x3C).with_le(0);
        assert_eq!(cmd.cla, 0x00);
        assert_eq!(cmd.ins, 0xB2);
        assert_eq!(cmd.to_bytes().as_ref(), &[0x00, 0xB2, 0x01, 0x3C, 0x00]);

        let resp = Response::success(Some(Bytes::from_static(&[0x01, 0x02])));
        assert!(resp.is_success());
        assert_eq!(resp.data(), &[0x01, 0x02]);
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
