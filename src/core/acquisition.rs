use std::fmt;
use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::config::AcquisitionConfig;
use crate::core::dedup::{Decision, DedupState};
use crate::core::extractor::{IdentityExtractor, GET_UID_APDU};
use crate::core::reader::{CardSession, ReaderError, ReaderGateway, ReaderInfo};
use crate::core::record::CardReadRecord;
use crate::core::store::RecordStore;
use crate::core::utils::{format_hex, status_timestamp};

/// Time source for dedup decisions and pauses between cycles
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingCard,
    Extracting,
    Deciding,
    Persisting,
    Shutdown,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::AwaitingCard => "awaiting-card",
            LoopState::Extracting => "extracting",
            LoopState::Deciding => "deciding",
            LoopState::Persisting => "persisting",
            LoopState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// What a single poll cycle ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NoCard,
    ExtractionFailed { reader: String, reason: String },
    Duplicate { uid: String },
    Saved { record: CardReadRecord },
    PersistFailed { uid: String, reason: String },
    ReaderUnavailable,
    ReaderFault { reason: String },
}

/// Counters accumulated over the life of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub saved: u64,
    pub duplicates: u64,
    pub extraction_failures: u64,
    pub persist_failures: u64,
    pub reader_errors: u64,
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("No PC/SC readers found. Please connect a reader and try again.")]
    NoReaders,

    #[error("Failed to enumerate readers: {0}")]
    Reader(#[from] ReaderError),
}

/// Poll, extract, de-duplicate and persist, one card at a time
pub struct AcquisitionLoop<G: ReaderGateway, C: Clock = SystemClock> {
    gateway: G,
    extractor: IdentityExtractor,
    dedup: DedupState,
    store: RecordStore,
    config: AcquisitionConfig,
    clock: C,
    state: LoopState,
    stats: LoopStats,
    status_out: Box<dyn Write>,
}

impl<G: ReaderGateway> AcquisitionLoop<G, SystemClock> {
    pub fn new(gateway: G, config: AcquisitionConfig) -> Self {
        Self::with_clock(gateway, config, SystemClock)
    }
}

impl<G: ReaderGateway, C: Clock> AcquisitionLoop<G, C> {
    pub fn with_clock(gateway: G, config: AcquisitionConfig, clock: C) -> Self {
        Self {
            extractor: IdentityExtractor::new(config.status_policy),
            dedup: DedupState::new(config.cooldown()),
            store: RecordStore::new(config.output.clone(), config.format),
            gateway,
            config,
            clock,
            state: LoopState::Idle,
            stats: LoopStats::default(),
            status_out: Box::new(io::stdout()),
        }
    }

    /// Send status lines somewhere other than stdout
    pub fn with_status_output(mut self, out: Box<dyn Write>) -> Self {
        self.status_out = out;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Readers available to poll; none at all is fatal
    pub fn check_readers(&self) -> Result<Vec<ReaderInfo>, AcquisitionError> {
        let readers = self.gateway.list_readers()?;
        if readers.is_empty() {
            return Err(AcquisitionError::NoReaders);
        }
        Ok(readers)
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// The token is checked between cycles only, so a card that is being
    /// read or saved when the signal arrives is still fully handled.
    pub fn run(&mut self, shutdown: &CancellationToken) -> Result<LoopStats, AcquisitionError> {
        let readers = self.check_readers()?;
        for reader in &readers {
            log::info!("Polling reader: {}", reader.name);
        }
        self.report(format_args!(
            "PC/SC RFID reader: waiting for cards on {} reader(s). Ctrl+C to stop.",
            readers.len()
        ));

        while !shutdown.is_cancelled() {
            self.run_cycle();
        }

        self.transition(LoopState::Shutdown);
        self.report(format_args!("Shutting down..."));
        Ok(self.stats)
    }

    /// One pass through the state machine, starting and ending in `Idle`
    pub fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;
        self.transition(LoopState::AwaitingCard);

        let outcome = match self.gateway.wait_for_card(self.config.poll_timeout()) {
            Ok(Some(session)) => self.handle_card(session),
            Ok(None) => CycleOutcome::NoCard,
            Err(ReaderError::NoReaders) => {
                self.stats.reader_errors += 1;
                self.report(format_args!(
                    "No readers found. Retrying in {:.1}s.",
                    self.config.no_reader_backoff().as_secs_f64()
                ));
                self.clock.sleep(self.config.no_reader_backoff());
                CycleOutcome::ReaderUnavailable
            }
            Err(e) => {
                self.stats.reader_errors += 1;
                log::error!("Reader error while waiting for card: {e}");
                self.report(format_args!("[{}] Error: {e}", status_timestamp()));
                self.clock.sleep(self.config.reader_error_backoff());
                CycleOutcome::ReaderFault {
                    reason: e.to_string(),
                }
            }
        };

        self.transition(LoopState::Idle);
        outcome
    }

    fn handle_card(&mut self, session: CardSession) -> CycleOutcome {
        log::info!("Card detected on '{}'", session.reader_name);
        self.report(format_args!(
            "[{}] Card detected on '{}'",
            status_timestamp(),
            session.reader_name
        ));
        self.transition(LoopState::Extracting);

        let identity = match self.extractor.extract(&mut self.gateway, &session) {
            Ok(identity) => identity,
            Err(e) => {
                self.stats.extraction_failures += 1;
                log::warn!("UID extraction failed: {e}");
                self.report(format_args!(
                    "[{}] Card detected in '{}', UID read failed.",
                    status_timestamp(),
                    session.reader_name
                ));
                self.clock.sleep(self.config.failure_backoff());
                return CycleOutcome::ExtractionFailed {
                    reader: session.reader_name,
                    reason: e.to_string(),
                };
            }
        };

        log::debug!(
            "UID {} (raw {}) from '{}'",
            identity.uid,
            format_hex(&identity.raw),
            session.reader_name
        );

        self.transition(LoopState::Deciding);
        if self.dedup.observe(&identity.uid, self.clock.now()) == Decision::Duplicate {
            self.stats.duplicates += 1;
            self.report(format_args!(
                "[{}] Duplicate UID {} ignored (cooldown).",
                status_timestamp(),
                identity.uid
            ));
            self.clock.sleep(self.config.duplicate_pause());
            return CycleOutcome::Duplicate { uid: identity.uid };
        }

        self.transition(LoopState::Persisting);

        let record = CardReadRecord::new(
            &identity,
            &session.reader_name,
            &GET_UID_APDU,
            session.atr.as_deref(),
        );
        self.report(format_args!(
            "[{}] Read UID: {}  (reader: {})",
            status_timestamp(),
            record.identifier,
            record.reader_name
        ));

        let outcome = match self.store.append(&record) {
            Ok(()) => {
                self.stats.saved += 1;
                let path = self.store.path().display().to_string();
                self.report(format_args!("Saved to {path}"));
                CycleOutcome::Saved { record }
            }
            Err(e) => {
                self.stats.persist_failures += 1;
                log::error!("Failed to persist record for {}: {e}", record.identifier);
                self.report(format_args!("Failed to write file: {e}"));
                CycleOutcome::PersistFailed {
                    uid: record.identifier,
                    reason: e.to_string(),
                }
            }
        };

        // Give the user time to lift the card before the next poll
        self.clock.sleep(self.config.cooldown());
        outcome
    }

    fn report(&mut self, line: fmt::Arguments<'_>) {
        if let Err(e) = writeln!(self.status_out, "{line}") {
            log::warn!("Failed to write status line: {e}");
        }
    }

    fn transition(&mut self, next: LoopState) {
        log::trace!("acquisition state: {} -> {}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_state_display() {
        assert_eq!(LoopState::AwaitingCard.to_string(), "awaiting-card");
        assert_eq!(LoopState::Shutdown.to_string(), "shutdown");
    }

    #[test]
    fn test_system_clock_zero_sleep_returns_immediately() {
        let clock = SystemClock;
        let start = Instant::now();
        clock.sleep(Duration::ZERO);
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(clock.now() >= start);
    }

    #[test]
    fn test_acquisition_error_messages() {
        assert!(AcquisitionError::NoReaders
            .to_string()
            .contains("No PC/SC readers found"));

        let err: AcquisitionError = ReaderError::List("service not running".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Failed to enumerate readers: failed to list readers: service not running"
        );
    }
}
