//! Transport traits for APDU communication with cards and SAMs
//!
//! A transport moves raw frames to a reader and back. It knows nothing about
//! commands, sessions or status words.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{Command, Error, Response};

/// Transport error type
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection error
    #[error("Failed to connect to device")]
    Connection,

    /// Transmission error
    #[error("Failed to transmit data")]
    Transmission,

    /// The card was removed or stopped answering
    #[error("Card not present")]
    CardAbsent,

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }
}

/// Trait for basic card transports
///
/// Implementations only override [`CardTransport::do_transmit_raw`]; the provided
/// methods add logging and frame parsing on top of it.
pub trait CardTransport: Send + fmt::Debug {
    /// Send raw APDU bytes and return the raw response bytes
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        trace!(command = %hex::encode_upper(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode_upper(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError>;

    /// Check if the transport is connected to a physical card
    fn is_connected(&self) -> bool;

    /// Reset the transport connection
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Answer-to-reset of the connected card, if the reader exposes it
    fn atr(&self) -> Option<Bytes> {
        None
    }

    /// Release the logical channel once a transaction is over
    fn close_channel(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Send a command frame and parse the response frame
    fn transmit(&mut self, command: &Command) -> Result<Response, Error> {
        let raw = self.transmit_raw(&command.to_bytes())?;
        Response::from_bytes(&raw)
    }
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        (**self).do_transmit_raw(command)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        (**self).reset()
    }

    fn atr(&self) -> Option<Bytes> {
        (**self).atr()
    }

    fn close_channel(&mut self) -> Result<(), TransportError> {
        (**self).close_channel()
    }
}

#[cfg(test)]
#[derive(Debug, Clone)]
#[allow(missing_docs, unreachable_pub)]
pub struct MockTransport {
    /// Mock responses to return
    pub responses: Vec<Bytes>,
    /// Commands that were sent
    pub commands: Vec<Bytes>,
    /// Whether the transport is connected
    pub connected: bool,
}

#[cfg(test)]
#[allow(unreachable_pub)]
impl MockTransport {
    /// Create a new mock transport with the given responses
    pub const fn new(responses: Vec<Bytes>) -> Self {
        Self {
            responses,
            commands: Vec::new(),
            connected: true,
        }
    }
}

#[cfg(test)]
impl CardTransport for MockTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Connection);
        }

        self.commands.push(Bytes::copy_from_slice(command));

        if self.responses.is_empty() {
            return Err(TransportError::Transmission);
        }
        Ok(self.responses.remove(0))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        self.commands.clear();
        Ok(())
    }
}
