use std::time::Duration;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(33);
pub const DEFAULT_AUTO_STOP_THRESHOLD: Duration = Duration::from_secs(30);
pub const DEFAULT_ACK_WINDOW: Duration = Duration::from_secs(15);
pub const DEFAULT_LANGUAGE: &str = "ru";
/// Upper bound for every configured duration, so deadlines stay representable.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Period between automatic advances.
    pub tick_interval: Duration,
    /// Lifetime of one rotation, measured from `start`.
    pub expiry: Duration,
    /// Silence after which a stop is reported as timer-driven.
    pub auto_stop_threshold: Duration,
    /// How long a tap can still be answered.
    pub ack_window: Duration,
    /// Language used when the user store has no answer.
    pub default_language: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            expiry: DEFAULT_EXPIRY,
            auto_stop_threshold: DEFAULT_AUTO_STOP_THRESHOLD,
            ack_window: DEFAULT_ACK_WINDOW,
            default_language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Replaces zero durations and a blank language with defaults and caps durations at
    /// [`MAX_DURATION`]. A zero tick period would make `tokio::time::interval` panic, and so
    /// would a deadline past what `Instant` can hold.
    pub fn normalized(mut self) -> Self {
        self.tick_interval = bounded(self.tick_interval, DEFAULT_TICK_INTERVAL);
        self.expiry = bounded(self.expiry, DEFAULT_EXPIRY);
        self.auto_stop_threshold = bounded(self.auto_stop_threshold, DEFAULT_AUTO_STOP_THRESHOLD);
        self.ack_window = bounded(self.ack_window, DEFAULT_ACK_WINDOW);
        self.default_language = self.default_language.trim().to_string();
        if self.default_language.is_empty() {
            self.default_language = DEFAULT_LANGUAGE.to_string();
        }
        self
    }
}

fn bounded(value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        default
    } else {
        value.min(MAX_DURATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_fills_zero_durations() {
        let config = SchedulerConfig {
            tick_interval: Duration::ZERO,
            expiry: Duration::from_secs(30),
            auto_stop_threshold: Duration::ZERO,
            ack_window: Duration::from_secs(10),
            default_language: "  ".to_string(),
        }
        .normalized();

        assert_eq!(config.tick_interval, DEFAULT_TICK_INTERVAL);
        assert_eq!(config.expiry, Duration::from_secs(30));
        assert_eq!(config.auto_stop_threshold, DEFAULT_AUTO_STOP_THRESHOLD);
        assert_eq!(config.default_language, DEFAULT_LANGUAGE);
    }

    #[test]
    fn normalization_caps_huge_durations() {
        let config = SchedulerConfig {
            tick_interval: Duration::from_millis(u64::MAX),
            expiry: Duration::MAX,
            ..SchedulerConfig::default()
        }
        .normalized();

        assert_eq!(config.tick_interval, MAX_DURATION);
        assert_eq!(config.expiry, MAX_DURATION);
        assert_eq!(config.ack_window, DEFAULT_ACK_WINDOW);
    }
}
