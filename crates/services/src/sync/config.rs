use std::env;
use std::time::Duration;

/// Timing knobs of the progress synchronizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period after a question update before the debounced save fires.
    pub question_save_delay: Duration,
    /// Quiet period after an exam attempt before the debounced save fires.
    pub exam_save_delay: Duration,
    /// Period of the background auto-save.
    pub auto_save_interval: Duration,
    /// Upper bound on the final flush at shutdown.
    pub flush_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            question_save_delay: Duration::from_millis(2_000),
            exam_save_delay: Duration::from_millis(1_000),
            auto_save_interval: Duration::from_secs(30),
            flush_timeout: Duration::from_millis(2_000),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `PREP_SAVE_DELAY_MS`, `PREP_EXAM_SAVE_DELAY_MS`,
    /// `PREP_AUTO_SAVE_SECS` and `PREP_FLUSH_TIMEOUT_MS`.
    ///
    /// Unparseable or zero values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            question_save_delay: env_duration("PREP_SAVE_DELAY_MS", Duration::from_millis)
                .unwrap_or(defaults.question_save_delay),
            exam_save_delay: env_duration("PREP_EXAM_SAVE_DELAY_MS", Duration::from_millis)
                .unwrap_or(defaults.exam_save_delay),
            auto_save_interval: env_duration("PREP_AUTO_SAVE_SECS", Duration::from_secs)
                .unwrap_or(defaults.auto_save_interval),
            flush_timeout: env_duration("PREP_FLUSH_TIMEOUT_MS", Duration::from_millis)
                .unwrap_or(defaults.flush_timeout),
        }
    }
}

fn env_duration(key: &str, unit: fn(u64) -> Duration) -> Option<Duration> {
    parse_positive(&env::var(key).ok()?).map(unit)
}

fn parse_positive(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}
