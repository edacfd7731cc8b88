use pcsc::{Card, Context, Disposition, Protocols, ReaderState, Scope, ShareMode, State, MAX_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::time::Duration;
use thiserror::Error;

use crate::core::utils::format_hex_spaced;

/// Errors raised by a [`ReaderGateway`]
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to establish PC/SC context: {0}")]
    Context(String),

    #[error("no card readers available")]
    NoReaders,

    #[error("failed to list readers: {0}")]
    List(String),

    #[error("failed while waiting for a card: {0}")]
    Wait(String),

    #[error("failed to connect to reader '{reader}': {reason}")]
    Connect { reader: String, reason: String },

    #[error("transmission failed: {0}")]
    Transmit(String),

    #[error("failed to disconnect: {0}")]
    Disconnect(String),
}

/// Information about a PCSC reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    pub name: String,
    pub card_present: bool,
    pub atr: Option<Vec<u8>>,
}

/// A card reported present by [`ReaderGateway::wait_for_card`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardSession {
    pub reader_name: String,
    pub atr: Option<Vec<u8>>,
}

impl CardSession {
    pub fn new(reader_name: impl Into<String>) -> Self {
        Self {
            reader_name: reader_name.into(),
            atr: None,
        }
    }

    pub fn with_atr(mut self, atr: Vec<u8>) -> Self {
        self.atr = if atr.is_empty() { None } else { Some(atr) };
        self
    }
}

/// Response to a single command exchange, split into data and status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ApduResponse {
    pub const SUCCESS: (u8, u8) = (0x90, 0x00);

    pub fn new(data: Vec<u8>, sw1: u8, sw2: u8) -> Self {
        Self { data, sw1, sw2 }
    }

    /// Split a raw card reply; the trailing two bytes are SW1 SW2.
    pub fn from_raw(raw: &[u8]) -> Result<Self, ReaderError> {
        match raw {
            [data @ .., sw1, sw2] => Ok(Self::new(data.to_vec(), *sw1, *sw2)),
            _ => Err(ReaderError::Transmit(format!(
                "response too short to carry a status word: [{}]",
                format_hex_spaced(raw)
            ))),
        }
    }

    pub fn is_success(&self) -> bool {
        (self.sw1, self.sw2) == Self::SUCCESS
    }
}

/// Transport contract consumed by the extractor and the acquisition loop.
///
/// Implementations must allow `wait_for_card` to be called repeatedly
/// without leaking resources between calls.
#[cfg_attr(test, mockall::automock(type Connection = u32;))]
pub trait ReaderGateway {
    type Connection;

    /// Enumerate attached readers. An empty list is not an error.
    fn list_readers(&self) -> Result<Vec<ReaderInfo>, ReaderError>;

    /// Block up to `timeout` for a card. `Ok(None)` means the timeout elapsed.
    fn wait_for_card(&mut self, timeout: Duration) -> Result<Option<CardSession>, ReaderError>;

    fn connect(&mut self, session: &CardSession) -> Result<Self::Connection, ReaderError>;

    fn exchange(
        &mut self,
        connection: &mut Self::Connection,
        command: &[u8],
    ) -> Result<ApduResponse, ReaderError>;

    fn disconnect(&mut self, connection: Self::Connection) -> Result<(), ReaderError>;
}

/// PCSC reader gateway
pub struct PcscReader {
    context: Context,
}

impl PcscReader {
    /// Create a new PCSC reader gateway
    pub fn new() -> Result<Self, ReaderError> {
        let context = Context::establish(Scope::User)
            .map_err(|e| ReaderError::Context(e.to_string()))?;

        Ok(Self { context })
    }

    fn reader_names(&self) -> Result<Vec<CString>, ReaderError> {
        let mut readers_buf = vec![0; 2048];
        match self.context.list_readers(&mut readers_buf) {
            Ok(names) => Ok(names.map(|name| name.to_owned()).collect()),
            Err(pcsc::Error::NoReadersAvailable) => Ok(Vec::new()),
            Err(e) => Err(ReaderError::List(e.to_string())),
        }
    }

    /// Snapshot the current state of every reader without blocking
    fn snapshot(&self, names: &[CString]) -> Result<Vec<ReaderState>, ReaderError> {
        let mut states: Vec<ReaderState> = names
            .iter()
            .map(|name| ReaderState::new(name.clone(), State::UNAWARE))
            .collect();

        match self.context.get_status_change(Duration::ZERO, &mut states) {
            Ok(()) | Err(pcsc::Error::Timeout) => Ok(states),
            Err(pcsc::Error::NoReadersAvailable) => Err(ReaderError::NoReaders),
            Err(e) => Err(ReaderError::Wait(e.to_string())),
        }
    }
}

fn has_usable_card(state: &ReaderState) -> bool {
    let event = state.event_state();
    event.contains(State::PRESENT) && !event.contains(State::MUTE)
}

fn session_from_state(state: &ReaderState) -> CardSession {
    CardSession::new(state.name().to_string_lossy()).with_atr(state.atr().to_vec())
}

impl ReaderGateway for PcscReader {
    type Connection = Card;

    fn list_readers(&self) -> Result<Vec<ReaderInfo>, ReaderError> {
        let names = self.reader_names()?;
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let reader_infos = self
            .snapshot(&names)?
            .iter()
            .map(|state| {
                let card_present = has_usable_card(state);
                ReaderInfo {
                    name: state.name().to_string_lossy().to_string(),
                    card_present,
                    atr: (card_present && !state.atr().is_empty()).then(|| state.atr().to_vec()),
                }
            })
            .collect();

        Ok(reader_infos)
    }

    fn wait_for_card(&mut self, timeout: Duration) -> Result<Option<CardSession>, ReaderError> {
        let names = self.reader_names()?;
        if names.is_empty() {
            return Err(ReaderError::NoReaders);
        }

        // A card already resting on a reader is reported straight away
        let mut states = self.snapshot(&names)?;
        if let Some(state) = states.iter().find(|s| has_usable_card(s)) {
            return Ok(Some(session_from_state(state)));
        }

        for state in states.iter_mut() {
            state.sync_current_state();
        }

        match self.context.get_status_change(timeout, &mut states) {
            Ok(()) => Ok(states
                .iter()
                .find(|s| has_usable_card(s))
                .map(session_from_state)),
            Err(pcsc::Error::Timeout) => Ok(None),
            Err(pcsc::Error::NoReadersAvailable) | Err(pcsc::Error::UnknownReader) => {
                Err(ReaderError::NoReaders)
            }
            Err(e) => Err(ReaderError::Wait(e.to_string())),
        }
    }

    fn connect(&mut self, session: &CardSession) -> Result<Card, ReaderError> {
        log::info!("Connecting to reader: {}", session.reader_name);

        let connect_error = |reason: String| ReaderError::Connect {
            reader: session.reader_name.clone(),
            reason,
        };

        let reader_cstr = CString::new(session.reader_name.as_str())
            .map_err(|_| connect_error("invalid reader name".to_string()))?;
        let card = self
            .context
            .connect(&reader_cstr, ShareMode::Shared, Protocols::ANY)
            .map_err(|e| connect_error(e.to_string()))?;

        log::debug!("Connected to reader: {}", session.reader_name);
        Ok(card)
    }

    fn exchange(&mut self, connection: &mut Card, command: &[u8]) -> Result<ApduResponse, ReaderError> {
        log::debug!("Transmitting APDU: {}", format_hex_spaced(command));

        let mut response_buf = [0; MAX_BUFFER_SIZE];
        let raw = connection
            .transmit(command, &mut response_buf)
            .map_err(|e| ReaderError::Transmit(e.to_string()))?;

        log::debug!("Received response: {}", format_hex_spaced(raw));
        ApduResponse::from_raw(raw)
    }

    fn disconnect(&mut self, connection: Card) -> Result<(), ReaderError> {
        connection
            .disconnect(Disposition::LeaveCard)
            .map_err(|(_card, e)| ReaderError::Disconnect(e.to_string()))?;

        log::debug!("Disconnected from card");
        Ok(())
    }
}
