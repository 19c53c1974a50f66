use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::category::CategoryProgress;
use crate::model::exam::ExamAttempt;
use crate::model::ids::QuestionId;
use crate::model::question::{QuestionProgress, QuestionProgressPatch, QuestionStatus};
use crate::model::wire;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

/// Errors raised while importing an exported progress document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImportError {
    #[error("progress export is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("progress export has no questionProgress section")]
    MissingQuestionProgress,
}

//
// ─── PROGRESS RECORD ──────────────────────────────────────────────────────────
//

/// Complete study progress of one user.
///
/// `mastered_questions` is kept in step with the question map incrementally:
/// every status change goes through [`ProgressRecord::update_question`], which
/// adjusts the count on transitions into and out of `Mastered`. Only
/// [`ProgressRecord::recalculate`] counts from scratch.
///
/// Serialized in the camelCase shape the API stores; missing or `null`
/// fields read back as zero/empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressRecord {
    #[serde(deserialize_with = "wire::null_as_default")]
    question_progress: BTreeMap<QuestionId, QuestionProgress>,
    #[serde(deserialize_with = "wire::null_as_default")]
    total_questions: u32,
    #[serde(deserialize_with = "wire::null_as_default")]
    mastered_questions: u32,
    #[serde(deserialize_with = "wire::null_as_default")]
    category_progress: BTreeMap<String, CategoryProgress>,
    #[serde(deserialize_with = "wire::null_as_default")]
    study_streak: u32,
    #[serde(deserialize_with = "wire::null_as_default")]
    exam_attempts: Vec<ExamAttempt>,
    #[serde(deserialize_with = "wire::null_as_default")]
    total_study_time: u64,
    #[serde(deserialize_with = "wire::lenient_timestamp")]
    last_studied: Option<DateTime<Utc>>,
}

/// Read-only summary used by settings and dashboard screens.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStats {
    pub tracked_questions: usize,
    pub mastered_questions: usize,
    pub bookmarked_questions: usize,
    pub total_study_time: u64,
    pub exam_attempts: usize,
    pub average_exam_score: Option<f64>,
    pub last_studied: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Accessors ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn question_progress(&self) -> &BTreeMap<QuestionId, QuestionProgress> {
        &self.question_progress
    }

    #[must_use]
    pub fn question(&self, id: QuestionId) -> Option<&QuestionProgress> {
        self.question_progress.get(&id)
    }

    #[must_use]
    pub fn total_questions(&self) -> u32 {
        self.total_questions
    }

    #[must_use]
    pub fn mastered_questions(&self) -> u32 {
        self.mastered_questions
    }

    #[must_use]
    pub fn category_progress(&self) -> &BTreeMap<String, CategoryProgress> {
        &self.category_progress
    }

    #[must_use]
    pub fn study_streak(&self) -> u32 {
        self.study_streak
    }

    #[must_use]
    pub fn exam_attempts(&self) -> &[ExamAttempt] {
        &self.exam_attempts
    }

    #[must_use]
    pub fn total_study_time(&self) -> u64 {
        self.total_study_time
    }

    #[must_use]
    pub fn last_studied(&self) -> Option<DateTime<Utc>> {
        self.last_studied
    }

    /// Entries flagged for later review, in question order.
    #[must_use]
    pub fn bookmarked_questions(&self) -> Vec<&QuestionProgress> {
        self.question_progress
            .values()
            .filter(|progress| progress.bookmarked)
            .collect()
    }

    // ─── Mutations ────────────────────────────────────────────────────────────

    /// Merge `patch` over the entry for `id` (or a fresh one) and stamp it.
    ///
    /// Applies the mastered-count transition and sets `last_studied`.
    pub fn update_question(
        &mut self,
        id: QuestionId,
        patch: QuestionProgressPatch,
        now: DateTime<Utc>,
    ) {
        let entry = self
            .question_progress
            .entry(id)
            .or_insert_with(|| QuestionProgress::new(id, now));
        let previous = entry.status;
        patch.apply_to(entry);
        entry.last_attempted = now;
        let current = entry.status;
        if current.is_mastered() && !previous.is_mastered() {
            entry.mastered_at.get_or_insert(now);
        }

        self.apply_mastery_transition(previous, current);
        self.last_studied = Some(now);
    }

    /// Record one answer: counts the attempt, adds the time, and moves the status.
    ///
    /// A correct answer masters the question once it already had two correct
    /// attempts; any other answer leaves it in `Studying`.
    pub fn record_answer(
        &mut self,
        id: QuestionId,
        correct: bool,
        time_spent: u64,
        domain: Option<String>,
        now: DateTime<Utc>,
    ) {
        let (attempts, correct_attempts, spent) = self
            .question_progress
            .get(&id)
            .map_or((0, 0, 0), |q| (q.attempts, q.correct_attempts, q.time_spent));

        let status = if correct && correct_attempts >= 2 {
            QuestionStatus::Mastered
        } else {
            QuestionStatus::Studying
        };
        let patch = QuestionProgressPatch {
            attempts: Some(attempts.saturating_add(1)),
            correct_attempts: Some(if correct {
                correct_attempts.saturating_add(1)
            } else {
                correct_attempts
            }),
            status: Some(status),
            time_spent: Some(spent.saturating_add(time_spent)),
            domain,
            ..QuestionProgressPatch::default()
        };
        self.update_question(id, patch, now);
        self.total_study_time = self.total_study_time.saturating_add(time_spent);
    }

    pub fn toggle_bookmark(&mut self, id: QuestionId, now: DateTime<Utc>) {
        let bookmarked = self.question(id).is_some_and(|q| q.bookmarked);
        self.update_question(id, QuestionProgressPatch::bookmarked(!bookmarked), now);
    }

    /// Append a note to the question; blank notes are ignored.
    pub fn add_note(&mut self, id: QuestionId, note: &str, now: DateTime<Utc>) {
        let note = note.trim();
        if note.is_empty() {
            return;
        }
        let mut notes = self
            .question(id)
            .map(|q| q.notes.clone())
            .unwrap_or_default();
        notes.push(note.to_string());
        let patch = QuestionProgressPatch {
            notes: Some(notes),
            ..QuestionProgressPatch::default()
        };
        self.update_question(id, patch, now);
    }

    /// Append a finished exam, stamped as completed at `now`.
    pub fn add_exam_attempt(&mut self, payload: Map<String, Value>, now: DateTime<Utc>) {
        self.exam_attempts.push(ExamAttempt::completed(payload, now));
        self.last_studied = Some(now);
    }

    pub fn add_study_time(&mut self, seconds: u64, now: DateTime<Utc>) {
        self.total_study_time = self.total_study_time.saturating_add(seconds);
        self.last_studied = Some(now);
    }

    /// Recount totals against the content catalog.
    ///
    /// Rebuilds `total_questions`, `mastered_questions` and one category entry
    /// per domain in `questions_by_domain`.
    pub fn recalculate(
        &mut self,
        total_questions: u32,
        questions_by_domain: &BTreeMap<String, u32>,
        now: DateTime<Utc>,
    ) {
        self.total_questions = total_questions;
        self.mastered_questions = count_u32(
            self.question_progress
                .values()
                .filter(|q| q.status.is_mastered()),
        );

        self.category_progress = questions_by_domain
            .iter()
            .map(|(domain, &count)| {
                let in_domain: Vec<&QuestionProgress> = self
                    .question_progress
                    .values()
                    .filter(|q| q.domain.as_deref() == Some(domain.as_str()))
                    .collect();
                let mastered = count_u32(in_domain.iter().filter(|q| q.status.is_mastered()));
                let time_spent = in_domain.iter().map(|q| q.time_spent).sum();
                let average_score = if in_domain.is_empty() {
                    0.0
                } else {
                    let total: f64 = in_domain.iter().map(|q| q.accuracy()).sum();
                    #[allow(clippy::cast_precision_loss)]
                    let len = in_domain.len() as f64;
                    total / len * 100.0
                };

                let stats = CategoryProgress {
                    domain: domain.clone(),
                    total_questions: count,
                    mastered_questions: mastered,
                    average_score,
                    time_spent,
                    last_studied: Some(now),
                };
                (domain.clone(), stats)
            })
            .collect();
    }

    /// Server-side stamp applied when a record is persisted.
    pub fn set_last_studied(&mut self, at: Option<DateTime<Utc>>) {
        self.last_studied = at;
    }

    pub fn set_study_streak(&mut self, days: u32) {
        self.study_streak = days;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    // ─── Reporting / export ───────────────────────────────────────────────────

    #[must_use]
    pub fn stats(&self) -> ProgressStats {
        let scores: Vec<f64> = self
            .exam_attempts
            .iter()
            .filter_map(ExamAttempt::score_percentage)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let average_exam_score =
            (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

        ProgressStats {
            tracked_questions: self.question_progress.len(),
            mastered_questions: self
                .question_progress
                .values()
                .filter(|q| q.status.is_mastered())
                .count(),
            bookmarked_questions: self.bookmarked_questions().len(),
            total_study_time: self.total_study_time,
            exam_attempts: self.exam_attempts.len(),
            average_exam_score,
            last_studied: self.last_studied,
        }
    }

    /// Pretty JSON backup of the record, stamped with `exportedAt`.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn export_json(&self, now: DateTime<Utc>) -> Result<String, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("exportedAt".into(), serde_json::to_value(now)?);
        }
        serde_json::to_string_pretty(&value)
    }

    /// Parse a backup produced by [`ProgressRecord::export_json`].
    ///
    /// The mastered count is taken as exported, not recounted.
    ///
    /// # Errors
    ///
    /// Returns `ImportError` if the text is not JSON, lacks `questionProgress`,
    /// or has fields of the wrong shape.
    pub fn import_json(raw: &str) -> Result<Self, ImportError> {
        let value: Value = serde_json::from_str(raw)?;
        if value.get("questionProgress").is_none_or(Value::is_null) {
            return Err(ImportError::MissingQuestionProgress);
        }
        Ok(serde_json::from_value(value)?)
    }

    fn apply_mastery_transition(&mut self, previous: QuestionStatus, current: QuestionStatus) {
        match (previous.is_mastered(), current.is_mastered()) {
            (false, true) => self.mastered_questions = self.mastered_questions.saturating_add(1),
            (true, false) => self.mastered_questions = self.mastered_questions.saturating_sub(1),
            _ => {}
        }
    }
}

fn count_u32<I: Iterator>(iter: I) -> u32 {
    u32::try_from(iter.count()).unwrap_or(u32::MAX)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;
    use serde_json::json;

    fn q(id: u32) -> QuestionId {
        QuestionId::new(id)
    }

    fn mastered_in_map(record: &ProgressRecord) -> u32 {
        count_u32(
            record
                .question_progress()
                .values()
                .filter(|p| p.status.is_mastered()),
        )
    }

    #[test]
    fn new_question_gets_defaults_and_stamps() {
        let mut record = ProgressRecord::new();
        let now = fixed_now();
        record.update_question(q(42), QuestionProgressPatch::status(QuestionStatus::Mastered), now);

        let entry = record.question(q(42)).unwrap();
        assert_eq!(entry.status, QuestionStatus::Mastered);
        assert_eq!(entry.attempts, 0);
        assert_eq!(entry.last_attempted, now);
        assert_eq!(entry.mastered_at, Some(now));
        assert_eq!(record.mastered_questions(), 1);
        assert_eq!(record.last_studied(), Some(now));
    }

    #[test]
    fn leaving_mastered_decrements() {
        let mut record = ProgressRecord::new();
        let mastered = QuestionProgressPatch::status(QuestionStatus::Mastered);
        let studying = QuestionProgressPatch::status(QuestionStatus::Studying);
        record.update_question(q(42), mastered, fixed_now());
        record.update_question(q(42), studying, fixed_now());
        assert_eq!(record.mastered_questions(), 0);
    }

    #[test]
    fn remastering_keeps_count_and_first_mastery_time() {
        let mut record = ProgressRecord::new();
        let first = fixed_now();
        let later = first + Duration::hours(1);
        let mastered = QuestionProgressPatch::status(QuestionStatus::Mastered);
        record.update_question(q(1), mastered.clone(), first);
        record.update_question(q(1), mastered, later);
        record.update_question(q(1), QuestionProgressPatch::bookmarked(true), later);

        assert_eq!(record.mastered_questions(), 1);
        let entry = record.question(q(1)).unwrap();
        assert_eq!(entry.mastered_at, Some(first));
        assert_eq!(entry.last_attempted, later);
    }

    #[test]
    fn mastered_count_tracks_map_over_mixed_updates() {
        let mut record = ProgressRecord::new();
        let statuses = [
            QuestionStatus::Mastered,
            QuestionStatus::New,
            QuestionStatus::Studying,
            QuestionStatus::Mastered,
        ];
        for step in 0..40_u32 {
            let status = statuses[(step as usize * 7) % statuses.len()];
            record.update_question(q(step % 5), QuestionProgressPatch::status(status), fixed_now());
            if step % 3 == 0 {
                record.record_answer(q(step % 6), step % 2 == 0, 10, None, fixed_now());
            }
            assert_eq!(record.mastered_questions(), mastered_in_map(&record));
        }
    }

    #[test]
    fn third_correct_answer_masters() {
        let mut record = ProgressRecord::new();
        let domain = Some("cost-control".to_string());
        record.record_answer(q(5), true, 30, domain.clone(), fixed_now());
        record.record_answer(q(5), true, 30, None, fixed_now());
        assert_eq!(record.question(q(5)).unwrap().status, QuestionStatus::Studying);

        record.record_answer(q(5), true, 40, None, fixed_now());
        let entry = record.question(q(5)).unwrap();
        assert_eq!(entry.status, QuestionStatus::Mastered);
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.correct_attempts, 3);
        assert_eq!(entry.time_spent, 100);
        assert_eq!(entry.domain, domain);
        assert_eq!(record.total_study_time(), 100);
        assert_eq!(record.mastered_questions(), 1);

        record.record_answer(q(5), false, 5, None, fixed_now());
        assert_eq!(record.question(q(5)).unwrap().status, QuestionStatus::Studying);
        assert_eq!(record.mastered_questions(), 0);
    }

    #[test]
    fn bookmarks_and_notes() {
        let mut record = ProgressRecord::new();
        record.toggle_bookmark(q(2), fixed_now());
        record.add_note(q(2), "  check VPC peering limits ", fixed_now());
        record.add_note(q(2), "   ", fixed_now());
        record.toggle_bookmark(q(3), fixed_now());
        record.toggle_bookmark(q(3), fixed_now());

        let bookmarked = record.bookmarked_questions();
        assert_eq!(bookmarked.len(), 1);
        assert_eq!(bookmarked[0].question_id, q(2));
        assert_eq!(bookmarked[0].notes, vec!["check VPC peering limits".to_string()]);
    }

    #[test]
    fn recalculate_rebuilds_categories() {
        let mut record = ProgressRecord::new();
        let domain = Some("migration-planning".to_string());
        for _ in 0..3 {
            record.record_answer(q(1), true, 10, domain.clone(), fixed_now());
        }
        record.record_answer(q(2), false, 20, domain.clone(), fixed_now());

        let mut catalog = BTreeMap::new();
        catalog.insert("migration-planning".to_string(), 12);
        catalog.insert("cost-control".to_string(), 8);
        record.recalculate(20, &catalog, fixed_now());

        assert_eq!(record.total_questions(), 20);
        assert_eq!(record.mastered_questions(), 1);
        let migration = &record.category_progress()["migration-planning"];
        assert_eq!(migration.total_questions, 12);
        assert_eq!(migration.mastered_questions, 1);
        assert_eq!(migration.time_spent, 50);
        assert!((migration.average_score - 50.0).abs() < 1e-9);
        let cost = &record.category_progress()["cost-control"];
        assert_eq!(cost.mastered_questions, 0);
        assert!(cost.average_score.abs() < f64::EPSILON);
    }

    #[test]
    fn absent_and_null_fields_default() {
        let record: ProgressRecord = serde_json::from_value(json!({
            "totalQuestions": null,
            "masteredQuestions": 3,
            "lastStudied": "2023-11-14T22:13:20.000Z",
            "userId": "user_1",
            "updatedAt": "2023-11-14T22:13:20.000Z"
        }))
        .unwrap();
        assert_eq!(record.total_questions(), 0);
        assert_eq!(record.mastered_questions(), 3);
        assert!(record.question_progress().is_empty());
        assert!(record.exam_attempts().is_empty());
        assert_eq!(record.last_studied(), Some(fixed_now()));
    }

    #[test]
    fn unreadable_nested_timestamps_do_not_reject_the_record() {
        let record: ProgressRecord = serde_json::from_value(json!({
            "questionProgress": {
                "1": {"questionId": 1, "attempts": 2, "lastAttempted": null, "status": "mastered"},
                "2": {"questionId": 2, "lastAttempted": "Invalid Date"},
                "3": {"questionId": 3}
            },
            "examAttempts": [{"examId": "mock-1", "completedAt": "Invalid Date"}]
        }))
        .unwrap();

        assert_eq!(record.question_progress().len(), 3);
        let first = record.question(q(1)).unwrap();
        assert_eq!(first.attempts, 2);
        assert_eq!(first.last_attempted, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(
            record.question(q(2)).unwrap().last_attempted,
            DateTime::<Utc>::UNIX_EPOCH
        );
        assert_eq!(record.exam_attempts()[0].completed_at, None);
        assert_eq!(record.exam_attempts()[0].payload["examId"], json!("mock-1"));
    }

    #[test]
    fn wire_shape_uses_iso_strings_and_nulls() {
        let mut record = ProgressRecord::new();
        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire["lastStudied"], Value::Null);
        assert_eq!(wire["questionProgress"], json!({}));
        assert_eq!(wire["examAttempts"], json!([]));

        record.add_study_time(90, fixed_now());
        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(wire["lastStudied"], json!("2023-11-14T22:13:20Z"));
        assert_eq!(wire["totalStudyTime"], json!(90));
    }

    #[test]
    fn export_then_import_keeps_progress() {
        let mut record = ProgressRecord::new();
        record.record_answer(q(8), true, 12, None, fixed_now());
        record.set_study_streak(4);
        let exported = record.export_json(fixed_now()).unwrap();
        assert!(exported.contains("\"exportedAt\""));

        let imported = ProgressRecord::import_json(&exported).unwrap();
        assert_eq!(imported, record);
    }

    #[test]
    fn import_rejects_documents_without_questions() {
        assert!(matches!(
            ProgressRecord::import_json(r#"{"totalQuestions": 3}"#),
            Err(ImportError::MissingQuestionProgress)
        ));
        assert!(matches!(
            ProgressRecord::import_json("not json"),
            Err(ImportError::Json(_))
        ));
    }

    #[test]
    fn stats_summarise_record() {
        let mut record = ProgressRecord::new();
        record.record_answer(q(1), false, 10, None, fixed_now());
        record.toggle_bookmark(q(1), fixed_now());
        record.add_exam_attempt(
            json!({"score": {"percentage": 80}}).as_object().cloned().unwrap(),
            fixed_now(),
        );
        record.add_exam_attempt(
            json!({"score": {"percentage": 60}}).as_object().cloned().unwrap(),
            fixed_now(),
        );

        let stats = record.stats();
        assert_eq!(stats.tracked_questions, 1);
        assert_eq!(stats.mastered_questions, 0);
        assert_eq!(stats.bookmarked_questions, 1);
        assert_eq!(stats.exam_attempts, 2);
        assert_eq!(stats.average_exam_score, Some(70.0));
        assert_eq!(stats.total_study_time, 10);
    }

    #[test]
    fn reset_empties_everything() {
        let mut record = ProgressRecord::new();
        record.record_answer(q(1), true, 10, None, fixed_now());
        record.reset();
        assert_eq!(record, ProgressRecord::default());
    }
}
