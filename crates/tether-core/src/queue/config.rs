//! Queue configuration: builder with fail-fast validation, plus a serde settings document.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retry::DelayPolicy;
use super::RetryQueue;
use crate::domain::TaskRecord;
use crate::error::TetherError;
use crate::ports::{Clock, SystemClock, TaskStore};

pub const DEFAULT_PROCESS_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_SPREAD: Duration = Duration::from_secs(1);

/// Resolved queue configuration (every default already applied).
#[derive(Debug, Clone)]
pub struct RetryQueueConfig {
    pub delay: DelayPolicy,
    pub max_retries: u32,
    pub process_interval: Duration,
    pub spread: Duration,
}

/// What a sweep does with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepAction {
    Attempt,
    Abandon,
}

impl RetryQueueConfig {
    /// Decide the fate of `record` at `now`.
    ///
    /// Exhaustion (`attempts > max_retries`) wins over being due. `None` means "not yet".
    pub(crate) fn evaluate(&self, record: &TaskRecord, now: DateTime<Utc>) -> Option<SweepAction> {
        if record.attempts > self.max_retries {
            return Some(SweepAction::Abandon);
        }
        let due = record.elapsed_since_attempt(now) >= self.delay.delay_for(record.attempts);
        due.then_some(SweepAction::Attempt)
    }

    /// Stagger applied to the `index`-th record of a sweep.
    pub(crate) fn stagger(&self, index: usize) -> Duration {
        self.spread
            .saturating_mul(u32::try_from(index).unwrap_or(u32::MAX))
    }
}

/// Builder for [`RetryQueue`].
///
/// # 使用例
/// ```ignore
/// let queue = RetryQueue::builder()
///     .store(Arc::new(InMemoryTaskStore::new()))
///     .delay(DelayPolicy::schedule_ms([20, 30, 40]))
///     .spread(Duration::from_millis(5))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - store は必須。未設定なら build() が Configuration エラーを返す
/// - 空の Schedule と 0 の process_interval も build() 時に拒否する
#[derive(Default)]
pub struct RetryQueueBuilder {
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    delay: Option<DelayPolicy>,
    max_retries: Option<u32>,
    process_interval: Option<Duration>,
    spread: Option<Duration>,
}

impl RetryQueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store<S: TaskStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn delay(mut self, delay: DelayPolicy) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn process_interval(mut self, interval: Duration) -> Self {
        self.process_interval = Some(interval);
        self
    }

    pub fn spread(mut self, spread: Duration) -> Self {
        self.spread = Some(spread);
        self
    }

    /// Apply a settings document. Fields absent from `settings` are left untouched.
    pub fn settings(mut self, settings: QueueSettings) -> Self {
        if let Some(delay) = settings.delay_ms {
            self.delay = Some(delay.into());
        }
        if let Some(max_retries) = settings.max_retries {
            self.max_retries = Some(max_retries);
        }
        if let Some(ms) = settings.process_interval_ms {
            self.process_interval = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = settings.spread_ms {
            self.spread = Some(Duration::from_millis(ms));
        }
        self
    }

    pub fn build(self) -> Result<RetryQueue, TetherError> {
        let store = self
            .store
            .ok_or_else(|| TetherError::Configuration("missing store".to_string()))?;

        let delay = self.delay.unwrap_or_default();
        if matches!(&delay, DelayPolicy::Schedule(steps) if steps.is_empty()) {
            return Err(TetherError::Configuration(
                "delay schedule must not be empty".to_string(),
            ));
        }

        let process_interval = self.process_interval.unwrap_or(DEFAULT_PROCESS_INTERVAL);
        if process_interval.is_zero() {
            return Err(TetherError::Configuration(
                "process_interval must be greater than zero".to_string(),
            ));
        }

        let config = RetryQueueConfig {
            max_retries: self
                .max_retries
                .unwrap_or_else(|| delay.default_max_retries()),
            delay,
            process_interval,
            spread: self.spread.unwrap_or(DEFAULT_SPREAD),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(RetryQueue::from_parts(store, clock, config))
    }
}

/// Serializable queue settings, e.g. loaded from a JSON file.
///
/// Function policies cannot be expressed here; use [`RetryQueueBuilder::delay`] for those.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSettings {
    #[serde(default)]
    pub delay_ms: Option<DelaySetting>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub process_interval_ms: Option<u64>,
    #[serde(default)]
    pub spread_ms: Option<u64>,
}

/// `delay_ms` is either one number or an array of numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelaySetting {
    Constant(u64),
    Schedule(Vec<u64>),
}

impl From<DelaySetting> for DelayPolicy {
    fn from(setting: DelaySetting) -> Self {
        match setting {
            DelaySetting::Constant(ms) => DelayPolicy::Constant(Duration::from_millis(ms)),
            DelaySetting::Schedule(steps) => DelayPolicy::schedule_ms(steps),
        }
    }
}

impl QueueSettings {
    pub fn from_json_str(text: &str) -> Result<Self, TetherError> {
        serde_json::from_str(text)
            .map_err(|e| TetherError::Configuration(format!("invalid queue settings: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryTaskStore;
    use serde_json::json;

    #[test]
    fn build_fails_without_store() {
        let err = RetryQueueBuilder::new().build().unwrap_err();
        assert!(matches!(err, TetherError::Configuration(msg) if msg.contains("store")));
    }

    #[test]
    fn build_rejects_empty_schedule_and_zero_interval() {
        let store = Arc::new(InMemoryTaskStore::new());

        let empty = RetryQueueBuilder::new()
            .store(store.clone())
            .delay(DelayPolicy::Schedule(vec![]))
            .build();
        assert!(matches!(empty, Err(TetherError::Configuration(_))));

        let zero = RetryQueueBuilder::new()
            .store(store)
            .process_interval(Duration::ZERO)
            .build();
        assert!(matches!(zero, Err(TetherError::Configuration(_))));
    }

    #[test]
    fn defaults_are_applied() {
        let queue = RetryQueueBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .build()
            .unwrap();
        let config = queue.config();

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.process_interval, Duration::from_secs(600));
        assert_eq!(config.spread, Duration::from_secs(1));
        assert_eq!(config.delay.delay_for(1), Duration::from_secs(10));
    }

    #[test]
    fn max_retries_defaults_to_schedule_length() {
        let queue = RetryQueueBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .delay(DelayPolicy::schedule_ms([20, 30, 40, 50]))
            .build()
            .unwrap();
        assert_eq!(queue.config().max_retries, 4);
    }

    #[test]
    fn settings_document_is_applied() {
        let settings = QueueSettings::from_json_str(
            r#"{"delay_ms": [20, 30], "spread_ms": 5, "process_interval_ms": 20}"#,
        )
        .unwrap();
        assert_eq!(settings.delay_ms, Some(DelaySetting::Schedule(vec![20, 30])));

        let queue = RetryQueueBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .settings(settings)
            .build()
            .unwrap();
        let config = queue.config();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.spread, Duration::from_millis(5));
        assert_eq!(config.process_interval, Duration::from_millis(20));
        assert_eq!(config.delay.delay_for(2), Duration::from_millis(30));
    }

    #[test]
    fn settings_reject_unknown_fields() {
        let err = QueueSettings::from_json_str(r#"{"delay": 50}"#).unwrap_err();
        assert!(matches!(err, TetherError::Configuration(_)));
    }

    #[test]
    fn constant_delay_setting() {
        let settings: QueueSettings = serde_json::from_value(json!({"delay_ms": 50})).unwrap();
        assert_eq!(settings.delay_ms, Some(DelaySetting::Constant(50)));
    }

    #[test]
    fn evaluate_prefers_abandon_over_due() {
        let config = RetryQueueConfig {
            delay: DelayPolicy::Constant(Duration::from_millis(50)),
            max_retries: 2,
            process_interval: DEFAULT_PROCESS_INTERVAL,
            spread: DEFAULT_SPREAD,
        };
        let now = Utc::now();

        let mut record = TaskRecord::new("sync", json!(null));
        assert_eq!(config.evaluate(&record, now), Some(SweepAction::Attempt));

        record.record_attempt(now);
        assert_eq!(config.evaluate(&record, now), None);
        assert_eq!(
            config.evaluate(&record, now + chrono::Duration::milliseconds(50)),
            Some(SweepAction::Attempt)
        );

        record.attempts = 3;
        assert_eq!(config.evaluate(&record, now), Some(SweepAction::Abandon));
    }
}
