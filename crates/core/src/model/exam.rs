use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::wire;

/// A finished practice or full exam.
///
/// The payload (answers, score, timings) is owned by the exam screens and kept
/// opaque here; only the completion stamp is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAttempt {
    #[serde(
        default,
        deserialize_with = "wire::lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ExamAttempt {
    /// Wraps a payload, stamping it as completed at `now`.
    ///
    /// A `completedAt` key already present in the payload is replaced.
    #[must_use]
    pub fn completed(mut payload: Map<String, Value>, now: DateTime<Utc>) -> Self {
        payload.remove("completedAt");
        Self {
            completed_at: Some(now),
            payload,
        }
    }

    /// `score.percentage` from the payload, when the exam screen recorded one.
    #[must_use]
    pub fn score_percentage(&self) -> Option<f64> {
        self.payload
            .get("score")
            .and_then(|score| score.get("percentage"))
            .and_then(Value::as_f64)
    }
}
