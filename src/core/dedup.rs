use std::time::{Duration, Instant};

/// Outcome of observing one successfully read identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// New card, or the same card after its cooldown elapsed.
    Accept,
    /// Same card seen again inside the cooldown window.
    Duplicate,
}

/// Memory of the most recent read, used to suppress repeats
#[derive(Debug, Clone)]
pub struct DedupState {
    cooldown: Duration,
    last: Option<(String, Instant)>,
}

impl DedupState {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    pub fn last_identifier(&self) -> Option<&str> {
        self.last.as_ref().map(|(uid, _)| uid.as_str())
    }

    /// Record a read of `identifier` at `now` and classify it.
    ///
    /// A duplicate still moves the window forward, so a card left on the
    /// reader is accepted at most once per cooldown period.
    pub fn observe(&mut self, identifier: &str, now: Instant) -> Decision {
        let duplicate = matches!(
            &self.last,
            Some((last_uid, last_seen))
                if last_uid == identifier
                    && now.saturating_duration_since(*last_seen) < self.cooldown
        );

        if duplicate {
            if let Some((_, last_seen)) = self.last.as_mut() {
                *last_seen = now;
            }
            return Decision::Duplicate;
        }

        self.last = Some((identifier.to_string(), now));
        Decision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(1500);

    #[test]
    fn test_first_read_is_accepted() {
        let mut state = DedupState::new(COOLDOWN);
        assert_eq!(state.last_identifier(), None);
        assert_eq!(state.observe("AA:BB", Instant::now()), Decision::Accept);
        assert_eq!(state.last_identifier(), Some("AA:BB"));
    }

    #[test]
    fn test_repeat_within_cooldown_is_duplicate() {
        let t0 = Instant::now();
        let mut state = DedupState::new(COOLDOWN);

        assert_eq!(state.observe("AA:BB", t0), Decision::Accept);
        assert_eq!(
            state.observe("AA:BB", t0 + Duration::from_millis(500)),
            Decision::Duplicate
        );
    }

    #[test]
    fn test_repeat_after_cooldown_is_accepted() {
        let t0 = Instant::now();
        let mut state = DedupState::new(COOLDOWN);

        assert_eq!(state.observe("AA:BB", t0), Decision::Accept);
        assert_eq!(
            state.observe("AA:BB", t0 + Duration::from_secs(2)),
            Decision::Accept
        );
    }

    #[test]
    fn test_exactly_at_cooldown_is_accepted() {
        let t0 = Instant::now();
        let mut state = DedupState::new(COOLDOWN);

        state.observe("AA:BB", t0);
        assert_eq!(state.observe("AA:BB", t0 + COOLDOWN), Decision::Accept);
    }

    #[test]
    fn test_duplicate_slides_window() {
        let t0 = Instant::now();
        let mut state = DedupState::new(COOLDOWN);

        assert_eq!(state.observe("AA:BB", t0), Decision::Accept);
        // Card resting on the reader, polled every second
        for secs in 1..=5 {
            assert_eq!(
                state.observe("AA:BB", t0 + Duration::from_secs(secs)),
                Decision::Duplicate
            );
        }
        // Lifted for longer than the cooldown
        assert_eq!(
            state.observe("AA:BB", t0 + Duration::from_millis(6600)),
            Decision::Accept
        );
    }

    #[test]
    fn test_different_card_is_accepted_immediately() {
        let t0 = Instant::now();
        let mut state = DedupState::new(COOLDOWN);

        assert_eq!(state.observe("AA:BB", t0), Decision::Accept);
        assert_eq!(
            state.observe("CC:DD", t0 + Duration::from_millis(100)),
            Decision::Accept
        );
        // Back to the first card: memory only holds the most recent read
        assert_eq!(
            state.observe("AA:BB", t0 + Duration::from_millis(200)),
            Decision::Accept
        );
    }

    #[test]
    fn test_zero_cooldown_never_deduplicates() {
        let t0 = Instant::now();
        let mut state = DedupState::new(Duration::ZERO);

        assert_eq!(state.observe("AA:BB", t0), Decision::Accept);
        assert_eq!(state.observe("AA:BB", t0), Decision::Accept);
    }
}
