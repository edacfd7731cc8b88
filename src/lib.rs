/// PCSC UID Logger - polls smart card readers and logs card UIDs
///
/// Reads each presented card's UID with the standard `FF CA 00 00 00`
/// command, suppresses repeat reads within a cooldown window, and appends
/// accepted reads to a crash-safe JSON record log.
pub mod cli;
pub mod core;

// Re-export commonly used types
pub use core::{
    acquisition::{AcquisitionError, AcquisitionLoop, Clock, CycleOutcome, LoopState, LoopStats, SystemClock},
    config::AcquisitionConfig,
    dedup::{Decision, DedupState},
    extractor::{CardIdentity, ExtractionError, IdentityExtractor, StatusPolicy, GET_UID_APDU},
    reader::{ApduResponse, CardSession, PcscReader, ReaderError, ReaderGateway, ReaderInfo},
    record::CardReadRecord,
    store::{LogFormat, RecordStore, StoreError},
    utils::{format_hex_spaced, format_uid},
};

// Common error type
pub type Result<T> = anyhow::Result<T>;
