//! APDU response frames
//!
//! A [`Response`] is the raw ISO/IEC 7816-4 answer: `[Data] SW1 SW2`.

pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::Error;
use status::StatusWord;

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data
    payload: Option<Bytes>,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(payload: Option<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload,
            status: status.into(),
        }
    }

    /// Create a success response
    pub const fn success(payload: Option<Bytes>) -> Self {
        Self {
            payload,
            status: StatusWord::new(0x90, 0x00),
        }
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let [payload @ .., sw1, sw2] = data else {
            return Err(Error::IncompleteResponse(data.len()));
        };

        let status = StatusWord::new(*sw1, *sw2);
        let payload = (!payload.is_empty()).then(|| Bytes::copy_from_slice(payload));

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.as_ref().map_or(0, |p| p.len()),
            "Parsed APDU response"
        );

        Ok(Self { payload, status })
    }

    /// Get the response payload data
    pub const fn payload(&self) -> &Option<Bytes> {
        &self.payload
    }

    /// Response data, empty when the card returned only a status word
    pub fn data(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Get the status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Serialize back to the raw frame, status word included
    pub fn to_bytes(&self) -> Bytes {
        let data = self.data();
        let mut buf = BytesMut::with_capacity(data.len() + 2);
        buf.put_slice(data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self, Error> {
        Self::from_bytes(data)
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_response_from_bytes() {
        let resp = Response::from_bytes(&hex!("0010BE9000")).unwrap();
        assert_eq!(resp.data(), hex!("0010BE"));
        assert!(resp.is_success());

        let resp = Response::from_bytes(&hex!("6988")).unwrap();
        assert!(resp.payload().is_none());
        assert!(resp.data().is_empty());
        assert_eq!(resp.status(), StatusWord::new(0x69, 0x88));
        assert!(!resp.is_success());

        assert!(matches!(
            Response::from_bytes(&hex!("90")),
            Err(Error::IncompleteResponse(1))
        ));
    }

    #[test]
    fn test_response_to_bytes() {
        let raw = hex!("556677889000");
        let resp = Response::try_from(&raw[..]).unwrap();
        assert_eq!(resp.to_bytes().as_ref(), raw);

        let resp = Response::new(None, StatusWord::new(0x6B, 0x00));
        assert_eq!(Bytes::from(resp).as_ref(), hex!("6B00"));
    }
}
