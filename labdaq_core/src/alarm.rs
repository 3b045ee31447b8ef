//! Per-sensor low/high alarm on the most recent reading.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    #[serde(default)]
    pub enabled: bool,
    pub low: f64,
    pub high: f64,
}

impl Default for Alarm {
    fn default() -> Self {
        Self {
            enabled: false,
            low: -1000.0,
            high: 1000.0,
        }
    }
}

impl Alarm {
    /// True when enabled and the newest of `new_values` sits on or past a limit.
    /// A tick with no new data never trips.
    pub fn check(&self, new_values: &[f64]) -> bool {
        if !self.enabled {
            return false;
        }
        match new_values.last() {
            Some(&v) => v <= self.low || v >= self.high,
            None => false,
        }
    }
}

/// Latches the first trip until the alarm is disabled, so the operator sees it
/// even if the value comes back into range.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AlarmLatch {
    tripped: bool,
}

impl AlarmLatch {
    /// Returns true only on the tick that trips the latch.
    pub fn update(&mut self, alarm: &Alarm, new_values: &[f64]) -> bool {
        if !alarm.enabled {
            self.tripped = false;
            return false;
        }
        if !self.tripped && alarm.check(new_values) {
            self.tripped = true;
            return true;
        }
        false
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn reset(&mut self) {
        self.tripped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alarm(low: f64, high: f64) -> Alarm {
        Alarm {
            enabled: true,
            low,
            high,
        }
    }

    #[test]
    fn checks_last_value_against_inclusive_limits() {
        let a = alarm(-1.0, 1.0);
        assert!(!a.check(&[]));
        assert!(!a.check(&[5.0, 0.0]));
        assert!(a.check(&[0.0, 1.0]));
        assert!(a.check(&[-1.0]));
        assert!(!Alarm { enabled: false, ..a }.check(&[9.0]));
    }

    #[test]
    fn latch_fires_once_until_disabled() {
        let mut a = alarm(0.0, 10.0);
        let mut latch = AlarmLatch::default();
        assert!(!latch.update(&a, &[5.0]));
        assert!(latch.update(&a, &[11.0]));
        assert!(!latch.update(&a, &[12.0]));
        assert!(!latch.update(&a, &[5.0]));
        assert!(latch.is_tripped());

        a.enabled = false;
        latch.update(&a, &[5.0]);
        assert!(!latch.is_tripped());
    }
}
