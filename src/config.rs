//! Configuration for Narrator

use crate::error::{NarratorError, Result};
use crate::platform::FocusPolicy;
use std::ops::RangeInclusive;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NarratorConfig {
    /// Cadence of progress ticks while playing
    pub tick_interval: Duration,
    /// Longest a source may stay in `Loading` before the session fails with `Timeout`
    pub load_timeout: Duration,
    /// Rate every new session starts with
    pub default_rate: f32,
    /// Accepted playback rates; requests outside are clamped
    pub rate_range: RangeInclusive<f32>,
    /// How narration shares the output with other applications
    pub focus_policy: FocusPolicy,
    /// Queue length above which enqueueing logs a warning
    pub backlog_warning: usize,
    /// Name of the serial control thread
    pub thread_name: String,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            load_timeout: Duration::from_secs(10),
            default_rate: 1.0,
            rate_range: 0.5..=3.0,
            focus_policy: FocusPolicy::Duck,
            backlog_warning: 1024,
            thread_name: "narrator-control".to_string(),
        }
    }
}

impl NarratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn default_rate(mut self, rate: f32) -> Self {
        self.default_rate = rate;
        self
    }

    pub fn rate_range(mut self, range: RangeInclusive<f32>) -> Self {
        self.rate_range = range;
        self
    }

    pub fn focus_policy(mut self, policy: FocusPolicy) -> Self {
        self.focus_policy = policy;
        self
    }

    pub fn backlog_warning(mut self, len: usize) -> Self {
        self.backlog_warning = len;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(NarratorError::Configuration(
                "tick_interval must be non-zero".into(),
            ));
        }
        if self.load_timeout.is_zero() {
            return Err(NarratorError::Configuration(
                "load_timeout must be non-zero".into(),
            ));
        }

        let (min, max) = (*self.rate_range.start(), *self.rate_range.end());
        if !(min.is_finite() && max.is_finite()) || min <= 0.0 || min > max {
            return Err(NarratorError::Configuration(format!(
                "rate_range {}..={} must be positive and ordered",
                min, max
            )));
        }
        if !self.rate_range.contains(&self.default_rate) {
            return Err(NarratorError::Configuration(format!(
                "default_rate {} outside rate_range {}..={}",
                self.default_rate, min, max
            )));
        }

        Ok(())
    }

    /// Clamps a requested rate into the accepted range.
    ///
    /// Returns `None` for rates that are not positive finite numbers.
    pub fn clamp_rate(&self, rate: f32) -> Option<f32> {
        if !rate.is_finite() || rate <= 0.0 {
            return None;
        }
        Some(rate.clamp(*self.rate_range.start(), *self.rate_range.end()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NarratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_configs() {
        assert!(
            NarratorConfig::new()
                .tick_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            NarratorConfig::new()
                .load_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(NarratorConfig::new().rate_range(2.0..=1.0).validate().is_err());
        assert!(NarratorConfig::new().rate_range(0.0..=1.0).validate().is_err());
        assert!(NarratorConfig::new().default_rate(4.0).validate().is_err());
    }

    #[test]
    fn test_clamp_rate() {
        let config = NarratorConfig::new().rate_range(0.5..=2.0);
        assert_eq!(config.clamp_rate(1.25), Some(1.25));
        assert_eq!(config.clamp_rate(8.0), Some(2.0));
        assert_eq!(config.clamp_rate(0.1), Some(0.5));
        assert_eq!(config.clamp_rate(0.0), None);
        assert_eq!(config.clamp_rate(-1.0), None);
        assert_eq!(config.clamp_rate(f32::NAN), None);
    }
}
