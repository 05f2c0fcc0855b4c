//! Common test utilities
#![allow(dead_code, unreachable_pub)]

use std::collections::HashMap;
use std::sync::{Arc, Once};
use std::time::Duration;

use bytes::Bytes;
use calypso_apdu_core::{CardTransport, TransportError};
use calypso_session::{
    AccessLevel, CalypsoCard, PoolConfig, SamResourcePool, SecuritySettings,
};
use hex_literal::hex;
use parking_lot::Mutex;

/// Revision 3.1 card, buffer size indicator 0x0A (430 bytes)
pub const FCI_REV31: [u8; 37] =
    hex!("6F238409315449432E49434131A516BF0C13C708 0000000011223344 53070A3C2312141001");
/// Revision 2.4 card
pub const FCI_REV24: [u8; 44] = hex!(
    "6F2A8410A0000004040125090101000000000000A516BF0C13C708 0000000011223344 53070A2E1142000101"
);
/// C1 SAM
pub const ATR_SAM_C1: [u8; 19] = hex!("3B3F9600805A0080C120000012345678829000");

/// Open Secure Session 3.1 answer with record 1 of SFI 7
pub const OPEN_WITH_RECORD: &str =
    "030490980030791D71111111111111111111111111111111111111111111111111111111119000";
/// Record 1 of SFI 7 as read at opening
pub const RECORD_7_1: [u8; 29] =
    hex!("7111111111111111111111111111111111111111111111111111111111");
/// 29-byte update payload
pub const UPDATE_29: [u8; 29] =
    hex!("8111111111111111111111111111111111111111111111111111111111");

static TRACING: Once = Once::new();

/// Initialise logging once for the whole test binary, filtered by `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<String, String>,
    prefixes: Vec<(String, String)>,
    log: Vec<String>,
    channel_closed: bool,
}

/// Reader answering from a request-keyed script
///
/// Requests are matched on their exact hex first, then on the registered prefixes.
/// Anything else fails with a transmission error. Clones share the script and the log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    atr: Option<Bytes>,
}

fn normalize(hex: &str) -> String {
    hex.split_whitespace().collect::<String>().to_uppercase()
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A C1 SAM answering every session command successfully
    pub fn sam() -> Self {
        Self::new()
            .with_atr(&ATR_SAM_C1)
            .with("80140000080000000011223344", "9000")
            .with("8084000004", "C1C2C3C49000")
            .with("808E000004", "112233449000")
            .with("808200000455667788", "9000")
            .with_prefix("808A", "9000")
            .with_prefix("808C", "9000")
    }

    pub fn with(self, request: &str, response: &str) -> Self {
        self.set(request, response);
        self
    }

    pub fn with_prefix(self, prefix: &str, response: &str) -> Self {
        self.script
            .lock()
            .prefixes
            .push((normalize(prefix), normalize(response)));
        self
    }

    pub fn with_atr(mut self, atr: &[u8]) -> Self {
        self.atr = Some(Bytes::copy_from_slice(atr));
        self
    }

    /// Add or replace an answer
    pub fn set(&self, request: &str, response: &str) {
        self.script
            .lock()
            .responses
            .insert(normalize(request), normalize(response));
    }

    /// Drop an answer, the request then fails with an IO error
    pub fn remove(&self, request: &str) {
        self.script.lock().responses.remove(&normalize(request));
    }

    /// Every request received, as upper case hex
    pub fn log(&self) -> Vec<String> {
        self.script.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.script.lock().log.clear();
    }

    pub fn channel_closed(&self) -> bool {
        self.script.lock().channel_closed
    }
}

impl CardTransport for ScriptedTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        let request = hex::encode_upper(command);
        let mut script = self.script.lock();
        script.log.push(request.clone());

        let response = script.responses.get(&request).cloned().or_else(|| {
            script
                .prefixes
                .iter()
                .find(|(prefix, _)| request.starts_with(prefix.as_str()))
                .map(|(_, response)| response.clone())
        });
        let response = response.ok_or(TransportError::Transmission)?;
        hex::decode(response)
            .map(Bytes::from)
            .map_err(|e| TransportError::other(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn atr(&self) -> Option<Bytes> {
        self.atr.clone()
    }

    fn close_channel(&mut self) -> Result<(), TransportError> {
        self.script.lock().channel_closed = true;
        Ok(())
    }
}

/// Pool holding one scripted SAM
pub fn sam_pool(sam: &ScriptedTransport) -> SamResourcePool {
    let pool =
        SamResourcePool::new(PoolConfig::new().with_blocking_timeout(Duration::from_millis(100)));
    pool.register("SAM", None, sam.clone());
    pool
}

/// Debit key record 3, default KIF 0x30
pub fn settings(pool: SamResourcePool) -> SecuritySettings {
    SecuritySettings::new(pool).with_default_key_record(AccessLevel::Debit, 0x03)
}

pub fn rev31() -> CalypsoCard {
    CalypsoCard::from_fci(&FCI_REV31).expect("valid FCI")
}

pub fn rev24() -> CalypsoCard {
    CalypsoCard::from_fci(&FCI_REV24).expect("valid FCI")
}
