use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Event sent whenever the sampled output current changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentChanged {
    /// Output current in amps
    pub current: f64,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
}

impl CurrentChanged {
    pub fn now(current: f64) -> Self {
        Self {
            current,
            timestamp: Utc::now(),
        }
    }
}

/// Bookkeeping of one monitoring loop.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerState {
    /// Last current seen, 0.0 until the first differing sample
    pub last_observed: f64,
    /// Pause between samples
    pub interval: Duration,
    /// Samples taken, successful or not
    pub samples: u64,
}

impl PollerState {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_observed: 0.0,
            interval,
            samples: 0,
        }
    }

    /// Record a reading; returns it when it differs from the previous one.
    pub fn observe(&mut self, current: f64) -> Option<f64> {
        if current != self.last_observed {
            self.last_observed = current;
            Some(current)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_reports_changes_only() {
        let mut state = PollerState::new(Duration::from_secs(1));
        let changes: Vec<f64> = [1.0, 1.0, 2.0, 2.0, 2.0, 3.0]
            .into_iter()
            .filter_map(|c| state.observe(c))
            .collect();
        assert_eq!(changes, vec![1.0, 2.0, 3.0]);
        assert_eq!(state.last_observed, 3.0);
    }

    #[test]
    fn test_initial_zero_is_not_a_change() {
        let mut state = PollerState::new(Duration::from_secs(1));
        assert_eq!(state.observe(0.0), None);
        assert_eq!(state.observe(0.25), Some(0.25));
        assert_eq!(state.observe(0.0), Some(0.0));
    }

    #[test]
    fn test_event_serializes_current() {
        let event = CurrentChanged::now(1.25);
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["current"], 1.25);
        assert!(json["timestamp"].is_string());
    }
}
