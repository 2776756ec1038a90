use std::collections::VecDeque;
use std::time::{Duration, Instant};

const POISON_THRESHOLD: usize = 100;
const POISON_WINDOW: Duration = Duration::from_secs(60);
const QUARANTINE_DURATION: Duration = Duration::from_secs(60);

/// Per-subject poison circuit breaker. Tracks poison timestamps in a sliding
/// window; once `POISON_THRESHOLD` poisons land inside `POISON_WINDOW`, the
/// circuit opens for `QUARANTINE_DURATION` and every message for that subject
/// routes to `deadletter.<source>` instead of the parser (spec §4.3, S4).
pub struct QuarantineCircuit {
    poison_times: VecDeque<Instant>,
    opened_at: Option<Instant>,
}

impl QuarantineCircuit {
    pub fn new() -> Self {
        Self {
            poison_times: VecDeque::new(),
            opened_at: None,
        }
    }

    /// Records a poison event at `now` and opens the circuit if the
    /// threshold is crossed within the window. Returns `true` exactly on the
    /// call that transitions the circuit from closed to open.
    pub fn record_poison(&mut self, now: Instant) -> bool {
        self.poison_times.push_back(now);
        while let Some(&front) = self.poison_times.front() {
            if now.duration_since(front) > POISON_WINDOW {
                self.poison_times.pop_front();
            } else {
                break;
            }
        }
        if self.poison_times.len() >= POISON_THRESHOLD && self.opened_at.is_none() {
            self.opened_at = Some(now);
            return true;
        }
        false
    }

    /// Whether messages for this subject should currently be routed to the
    /// dead-letter subject instead of being parsed.
    pub fn is_open(&mut self, now: Instant) -> bool {
        match self.opened_at {
            Some(opened) if now.duration_since(opened) >= QUARANTINE_DURATION => {
                self.opened_at = None;
                self.poison_times.clear();
                false
            }
            Some(_) => true,
            None => false,
        }
    }
}

impl Default for QuarantineCircuit {
    fn default() -> Self {
        Self::new()
    }
}
