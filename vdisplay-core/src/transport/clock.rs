//! Client to server clock offset
//!
//! Each tracking packet gives one sample of `server_receive - client_send`,
//! which is the clock offset plus the network delay. The smallest sample in
//! a recent window is the best estimate of the offset alone.

use std::collections::VecDeque;

const DEFAULT_WINDOW: usize = 64;

/// Min-filtered one-way offset estimator
#[derive(Debug, Clone)]
pub struct ClockOffsetEstimator {
    samples: VecDeque<i64>,
    window: usize,
}

impl ClockOffsetEstimator {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    /// Record a packet stamped `client_time` and received at `server_time` (µs)
    pub fn observe(&mut self, client_time: u64, server_time: u64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(server_time as i64 - client_time as i64);
    }

    /// Current offset estimate in microseconds
    pub fn offset(&self) -> Option<i64> {
        self.samples.iter().copied().min()
    }

    /// Map a client timestamp onto the server clock; identity until a
    /// sample arrives
    pub fn to_server(&self, client_time: u64) -> u64 {
        match self.offset() {
            Some(offset) => (client_time as i64).saturating_add(offset).max(0) as u64,
            None => client_time,
        }
    }
}

impl Default for ClockOffsetEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_delay_wins() {
        let mut clock = ClockOffsetEstimator::new();
        // Offset 1000, delays 300, 50, 120
        clock.observe(0, 1300);
        clock.observe(100, 1150);
        clock.observe(200, 1320);
        assert_eq!(clock.offset(), Some(1050));
        assert_eq!(clock.to_server(500), 1550);
    }

    #[test]
    fn test_window_forgets_old_samples() {
        let mut clock = ClockOffsetEstimator::with_window(2);
        clock.observe(0, 10);
        clock.observe(0, 50);
        clock.observe(0, 40);
        assert_eq!(clock.offset(), Some(40));
    }

    #[test]
    fn test_identity_without_samples() {
        assert_eq!(ClockOffsetEstimator::new().to_server(77), 77);
    }
}
