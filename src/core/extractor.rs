use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::reader::{ApduResponse, CardSession, ReaderError, ReaderGateway};
use crate::core::utils::{describe_status_word, format_uid};

/// GET DATA / "retrieve UID" command understood by PC/SC contactless readers
pub const GET_UID_APDU: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];

/// How to treat a non-empty response that carries a non-success status word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPolicy {
    /// Accept the data anyway; some readers return the UID without `90 00`.
    #[default]
    Lenient,
    /// Only `90 00` counts as success.
    Strict,
}

/// A card identifier read from the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardIdentity {
    pub uid: String,
    pub raw: Vec<u8>,
}

impl CardIdentity {
    pub fn from_raw(raw: Vec<u8>) -> Self {
        Self {
            uid: format_uid(&raw),
            raw,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("could not connect to card: {0}")]
    Connect(#[source] ReaderError),

    #[error("command exchange failed: {0}")]
    Exchange(#[source] ReaderError),

    #[error("card returned no identifier (status {sw1:02X} {sw2:02X})")]
    EmptyResponse { sw1: u8, sw2: u8 },

    #[error("card returned status {sw1:02X} {sw2:02X} ({description})")]
    StatusRejected {
        sw1: u8,
        sw2: u8,
        description: String,
    },
}

/// Reads the card UID over a connection scoped to a single extraction
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityExtractor {
    policy: StatusPolicy,
}

impl IdentityExtractor {
    pub fn new(policy: StatusPolicy) -> Self {
        Self { policy }
    }

    /// Connect, send [`GET_UID_APDU`], and interpret the reply.
    ///
    /// The connection is released on every exit path; a failed disconnect
    /// is logged and does not change the result.
    pub fn extract<G: ReaderGateway>(
        &self,
        gateway: &mut G,
        session: &CardSession,
    ) -> Result<CardIdentity, ExtractionError> {
        let connection = gateway.connect(session).map_err(ExtractionError::Connect)?;
        let mut guard = ConnectionGuard {
            gateway,
            connection: Some(connection),
        };

        let response = guard.exchange(&GET_UID_APDU).map_err(ExtractionError::Exchange)?;
        self.interpret(response)
    }

    /// Decide whether a response carries a usable identifier
    pub fn interpret(&self, response: ApduResponse) -> Result<CardIdentity, ExtractionError> {
        let ApduResponse { data, sw1, sw2 } = response;

        if data.is_empty() {
            return Err(ExtractionError::EmptyResponse { sw1, sw2 });
        }

        if (sw1, sw2) != ApduResponse::SUCCESS {
            let description = describe_status_word(sw1, sw2);
            match self.policy {
                StatusPolicy::Strict => {
                    return Err(ExtractionError::StatusRejected {
                        sw1,
                        sw2,
                        description,
                    });
                }
                StatusPolicy::Lenient => {
                    log::warn!(
                        "Accepting UID despite status {sw1:02X} {sw2:02X} ({description})"
                    );
                }
            }
        }

        Ok(CardIdentity::from_raw(data))
    }
}

/// Owns a live connection and disconnects it when dropped
struct ConnectionGuard<'a, G: ReaderGateway> {
    gateway: &'a mut G,
    connection: Option<G::Connection>,
}

impl<G: ReaderGateway> ConnectionGuard<'_, G> {
    fn exchange(&mut self, command: &[u8]) -> Result<ApduResponse, ReaderError> {
        match self.connection.as_mut() {
            Some(connection) => self.gateway.exchange(connection, command),
            None => Err(ReaderError::Transmit("connection already released".to_string())),
        }
    }
}

impl<G: ReaderGateway> Drop for ConnectionGuard<'_, G> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = self.gateway.disconnect(connection) {
                log::warn!("Ignoring disconnect failure: {e}");
            }
        }
    }
}
