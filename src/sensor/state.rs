use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of readings a sensor keeps
pub const DEFAULT_MAX_READINGS: usize = 10;

/// One reading as reported by the caller. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Bounded reading history, most recent first.
///
/// Ordering is insertion order: a reading with an older timestamp still goes
/// to the front.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    readings: VecDeque<SensorReading>,
}

impl SensorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend a reading and drop the oldest entries beyond `max_readings`.
    pub fn add_reading(&mut self, value: f64, timestamp: DateTime<Utc>, max_readings: usize) {
        self.readings.push_front(SensorReading { value, timestamp });
        self.readings.truncate(max_readings);
    }

    pub fn readings(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter()
    }

    pub fn latest(&self) -> Option<&SensorReading> {
        self.readings.front()
    }

    /// Mean of the retained readings
    pub fn average(&self) -> Option<f64> {
        if self.readings.is_empty() {
            return None;
        }
        let sum: f64 = self.readings.iter().map(|r| r.value).sum();
        Some(sum / self.readings.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_history_keeps_most_recent_first() {
        let start = Utc::now();
        let mut state = SensorState::new();

        for i in 0..25 {
            state.add_reading(i as f64, start + TimeDelta::seconds(i), DEFAULT_MAX_READINGS);
        }

        assert_eq!(state.len(), 10);
        let values: Vec<f64> = state.readings().map(|r| r.value).collect();
        let expected: Vec<f64> = (15..25).rev().map(|i| i as f64).collect();
        assert_eq!(values, expected);
        assert_eq!(state.latest().unwrap().value, 24.0);
    }

    #[test]
    fn test_history_below_cap_is_untouched() {
        let mut state = SensorState::new();
        state.add_reading(1.0, Utc::now(), DEFAULT_MAX_READINGS);
        state.add_reading(2.0, Utc::now(), DEFAULT_MAX_READINGS);

        assert_eq!(state.len(), 2);
        assert_eq!(state.latest().unwrap().value, 2.0);
    }

    #[test]
    fn test_older_timestamp_still_inserted_at_head() {
        let now = Utc::now();
        let mut state = SensorState::new();
        state.add_reading(20.0, now, DEFAULT_MAX_READINGS);
        state.add_reading(19.0, now - TimeDelta::hours(1), DEFAULT_MAX_READINGS);

        let latest = state.latest().unwrap();
        assert_eq!(latest.value, 19.0);
        assert_eq!(latest.timestamp, now - TimeDelta::hours(1));
    }

    #[test]
    fn test_average() {
        let mut state = SensorState::new();
        assert_eq!(state.average(), None);

        state.add_reading(18.0, Utc::now(), DEFAULT_MAX_READINGS);
        state.add_reading(20.0, Utc::now(), DEFAULT_MAX_READINGS);
        state.add_reading(22.0, Utc::now(), DEFAULT_MAX_READINGS);

        assert_eq!(state.average(), Some(20.0));
    }

    #[test]
    fn test_custom_cap() {
        let mut state = SensorState::new();
        for i in 0..5 {
            state.add_reading(i as f64, Utc::now(), 3);
        }
        let values: Vec<f64> = state.readings().map(|r| r.value).collect();
        assert_eq!(values, vec![4.0, 3.0, 2.0]);
    }
}
