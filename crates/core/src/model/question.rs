use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::QuestionId;
use crate::model::wire;

//
// ─── QUESTION STATUS ──────────────────────────────────────────────────────────
//

/// Learning state of a single question.
///
/// Older clients wrote `practicing` and `needs-review`; both read back as
/// `Studying`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    #[default]
    New,
    #[serde(alias = "practicing", alias = "needs-review")]
    Studying,
    Mastered,
}

impl QuestionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Studying => "studying",
            Self::Mastered => "mastered",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "new" => Some(Self::New),
            "studying" | "practicing" | "needs-review" => Some(Self::Studying),
            "mastered" => Some(Self::Mastered),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_mastered(self) -> bool {
        matches!(self, Self::Mastered)
    }
}

//
// ─── QUESTION PROGRESS ────────────────────────────────────────────────────────
//

/// Per-question study history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionProgress {
    pub question_id: QuestionId,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub attempts: u32,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub correct_attempts: u32,
    #[serde(default = "wire::epoch", deserialize_with = "wire::timestamp_or_epoch")]
    pub last_attempted: DateTime<Utc>,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub status: QuestionStatus,
    /// Seconds spent on this question.
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub time_spent: u64,
    #[serde(default, deserialize_with = "wire::notes")]
    pub notes: Vec<String>,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub bookmarked: bool,
    /// Exam domain the question belongs to, remembered from answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(
        default,
        deserialize_with = "wire::lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub mastered_at: Option<DateTime<Utc>>,
}

impl QuestionProgress {
    /// A question nobody has touched yet.
    #[must_use]
    pub fn new(question_id: QuestionId, now: DateTime<Utc>) -> Self {
        Self {
            question_id,
            attempts: 0,
            correct_attempts: 0,
            last_attempted: now,
            status: QuestionStatus::New,
            time_spent: 0,
            notes: Vec::new(),
            bookmarked: false,
            domain: None,
            mastered_at: None,
        }
    }

    /// Share of correct attempts in `0.0..=1.0`; zero attempts count as one.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        f64::from(self.correct_attempts) / f64::from(self.attempts.max(1))
    }
}

//
// ─── PARTIAL UPDATES ──────────────────────────────────────────────────────────
//

/// Partial update merged over a `QuestionProgress`; `None` keeps the current value.
///
/// `last_attempted` is not patchable: every update stamps it with the current time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionProgressPatch {
    pub attempts: Option<u32>,
    pub correct_attempts: Option<u32>,
    pub status: Option<QuestionStatus>,
    pub time_spent: Option<u64>,
    pub notes: Option<Vec<String>>,
    pub bookmarked: Option<bool>,
    pub domain: Option<String>,
}

impl QuestionProgressPatch {
    #[must_use]
    pub fn status(status: QuestionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn bookmarked(bookmarked: bool) -> Self {
        Self {
            bookmarked: Some(bookmarked),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply_to(self, target: &mut QuestionProgress) {
        if let Some(attempts) = self.attempts {
            target.attempts = attempts;
        }
        if let Some(correct) = self.correct_attempts {
            target.correct_attempts = correct;
        }
        if let Some(status) = self.status {
            target.status = status;
        }
        if let Some(time_spent) = self.time_spent {
            target.time_spent = time_spent;
        }
        if let Some(notes) = self.notes {
            target.notes = notes;
        }
        if let Some(bookmarked) = self.bookmarked {
            target.bookmarked = bookmarked;
        }
        if let Some(domain) = self.domain {
            target.domain = Some(domain);
        }
    }
}
