//! # Fibonacci Backoff
//!
//! Per-resource retry delays for failed reconciliations: 1, 1, 2, 3, 5, 8 ...
//! minutes, capped at a maximum.

/// Fibonacci sequence of delays in minutes, clamped to `[min, max]`
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    previous: u64,
    current: u64,
    min_minutes: u64,
    max_minutes: u64,
}

impl FibonacciBackoff {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        let min_minutes = min_minutes.max(1);
        Self {
            previous: 0,
            current: min_minutes,
            min_minutes,
            max_minutes: max_minutes.max(min_minutes),
        }
    }

    /// Next delay in minutes; advances the sequence
    pub fn next_backoff_minutes(&mut self) -> u64 {
        let delay = self.current.clamp(self.min_minutes, self.max_minutes);
        if self.current < self.max_minutes {
            let next = self.previous.saturating_add(self.current);
            self.previous = self.current;
            self.current = next;
        }
        delay
    }

    /// Next delay in seconds; advances the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        self.next_backoff_minutes().saturating_mul(60)
    }

    pub fn reset(&mut self) {
        self.previous = 0;
        self.current = self.min_minutes;
    }
}

/// Backoff and error count tracked per resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.backoff.reset();
        self.error_count = 0;
    }
}
