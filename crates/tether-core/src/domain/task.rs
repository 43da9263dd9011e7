//! Task record: identity key + attempt bookkeeping.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a queued task.
///
/// Two tasks are the same task when both the name and the payload are structurally equal.
/// There is no generated id; adding the same `(name, payload)` twice addresses one record.
/// Numbers compare by value, so `{"id": 1}` and `{"id": 1.0}` are the same payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskKey {
    name: String,
    payload: serde_json::Value,
}

impl TaskKey {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Does this key address `record`?
    pub fn matches(&self, record: &TaskRecord) -> bool {
        self.name == record.name && same_json(&self.payload, &record.payload)
    }
}

impl PartialEq for TaskKey {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && same_json(&self.payload, &other.payload)
    }
}

impl Eq for TaskKey {}

/// Structural JSON equality where an integral float equals the integer.
pub(crate) fn same_json(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_f64() || y.is_f64() => {
            x.as_f64() == y.as_f64()
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_json(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| same_json(x, y)))
        }
        _ => a == b,
    }
}

/// Persisted form of a queued task.
///
/// Design:
/// - This is what a `TaskStore` keeps; one record per `TaskKey`.
/// - `attempts` only ever grows while the record exists.
/// - `last_attempt_at` is `None` until the first attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub payload: serde_json::Value,

    /// Number of attempts made so far.
    #[serde(default)]
    pub attempts: u32,

    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Fresh record with no attempts.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            attempts: 0,
            last_attempt_at: None,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.name.clone(), self.payload.clone())
    }

    /// Count one attempt made at `at`.
    pub fn record_attempt(&mut self, at: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt_at = Some(at);
    }

    /// Time since the last attempt.
    ///
    /// A record that was never attempted counts from the Unix epoch, so it is always due.
    /// A last attempt in the future (clock skew) yields zero.
    pub fn elapsed_since_attempt(&self, now: DateTime<Utc>) -> Duration {
        let since = self.last_attempt_at.unwrap_or(DateTime::UNIX_EPOCH);
        (now - since).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Why a task was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// The standard reason used by the sweep: `attempts > max_retries`.
    Exhausted { attempts: u32, max_retries: u32 },

    /// Explicit abandonment by a consumer.
    Rejected(String),
}

impl AbandonReason {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, AbandonReason::Exhausted { .. })
    }
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::Exhausted {
                attempts,
                max_retries,
            } => write!(
                f,
                "retries exhausted after {attempts} attempts (max_retries={max_retries})"
            ),
            AbandonReason::Rejected(msg) => f.write_str(msg),
        }
    }
}

impl From<String> for AbandonReason {
    fn from(msg: String) -> Self {
        AbandonReason::Rejected(msg)
    }
}

impl From<&str> for AbandonReason {
    fn from(msg: &str) -> Self {
        AbandonReason::Rejected(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn key_matches_structurally_equal_payloads() {
        let record = TaskRecord::new("sync", json!({"a": 1, "b": [1, 2]}));
        assert!(TaskKey::new("sync", json!({"b": [1, 2], "a": 1})).matches(&record));
        assert!(!TaskKey::new("sync", json!({"a": 1, "b": [2, 1]})).matches(&record));
        assert!(!TaskKey::new("other", json!({"a": 1, "b": [1, 2]})).matches(&record));
    }

    #[test]
    fn integral_floats_address_the_same_task() {
        let record = TaskRecord::new("sync", json!({"id": 1, "tags": [2]}));
        assert!(TaskKey::new("sync", json!({"id": 1.0, "tags": [2.0]})).matches(&record));
        assert!(!TaskKey::new("sync", json!({"id": 1.5, "tags": [2]})).matches(&record));
        assert!(!TaskKey::new("sync", json!({"id": "1", "tags": [2]})).matches(&record));
        assert_eq!(
            TaskKey::new("sync", json!(3)),
            TaskKey::new("sync", json!(3.0))
        );
    }

    #[test]
    fn record_attempt_increments_and_stamps() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut record = TaskRecord::new("sync", json!(null));

        record.record_attempt(at);
        record.record_attempt(at);

        assert_eq!(record.attempts, 2);
        assert_eq!(record.last_attempt_at, Some(at));
    }

    #[test]
    fn never_attempted_record_counts_from_epoch() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = TaskRecord::new("sync", json!(null));
        assert!(record.elapsed_since_attempt(now) > Duration::from_secs(365 * 24 * 3600));
    }

    #[test]
    fn future_attempt_yields_zero_elapsed() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut record = TaskRecord::new("sync", json!(null));
        record.record_attempt(now + chrono::Duration::seconds(5));
        assert_eq!(record.elapsed_since_attempt(now), Duration::ZERO);
    }

    #[test]
    fn record_deserializes_without_bookkeeping_fields() {
        let record: TaskRecord =
            serde_json::from_value(json!({"name": "sync", "payload": {"id": 7}})).unwrap();
        assert_eq!(record.attempts, 0);
        assert_eq!(record.last_attempt_at, None);
    }
}
