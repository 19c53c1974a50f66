use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::wire;

/// Aggregate stats for one exam domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryProgress {
    pub domain: String,
    #[serde(deserialize_with = "wire::null_as_default")]
    pub total_questions: u32,
    #[serde(deserialize_with = "wire::null_as_default")]
    pub mastered_questions: u32,
    /// Mean accuracy of the attempted questions, in percent.
    #[serde(deserialize_with = "wire::null_as_default")]
    pub average_score: f64,
    #[serde(deserialize_with = "wire::null_as_default")]
    pub time_spent: u64,
    #[serde(deserialize_with = "wire::lenient_timestamp")]
    pub last_studied: Option<DateTime<Utc>>,
}
