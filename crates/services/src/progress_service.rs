use std::sync::Arc;

use prep_core::model::{ProgressRecord, UserId};
use storage::repository::{ProgressRepository, StoredProgress};
use tracing::{debug, info};

use crate::Clock;
use crate::error::ProgressServiceError;

/// Server-side handling of progress documents, one per user.
///
/// Authentication happens before this layer; callers pass the resolved user.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    repo: Arc<dyn ProgressRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(clock: Clock, repo: Arc<dyn ProgressRepository>) -> Self {
        Self { clock, repo }
    }

    /// Load the user's progress, creating an empty record on first access.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` on storage failures.
    pub async fn load(&self, user_id: &UserId) -> Result<StoredProgress, ProgressServiceError> {
        if let Some(stored) = self.repo.get_progress(user_id).await? {
            return Ok(stored);
        }

        let initial = StoredProgress::initial(user_id.clone(), self.clock.now());
        self.repo.put_progress(&initial).await?;
        info!(user = %user_id, "initialized empty progress");
        Ok(initial)
    }

    /// Replace the user's progress with `progress`.
    ///
    /// The record keeps its original creation time, and `last_studied` is
    /// stamped with server time regardless of what the client sent.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` on storage failures.
    pub async fn save(
        &self,
        user_id: &UserId,
        mut progress: ProgressRecord,
    ) -> Result<StoredProgress, ProgressServiceError> {
        let existing = self.load(user_id).await?;
        let now = self.clock.now();
        progress.set_last_studied(Some(now));

        let updated = StoredProgress {
            user_id: user_id.clone(),
            progress,
            created_at: existing.created_at,
            updated_at: now,
        };
        self.repo.put_progress(&updated).await?;
        debug!(
            user = %user_id,
            questions = updated.progress.question_progress().len(),
            "saved progress"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use prep_core::model::{QuestionId, QuestionProgressPatch, QuestionStatus};
    use prep_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    fn user() -> UserId {
        "user_service".parse().unwrap()
    }

    #[tokio::test]
    async fn first_load_initializes_and_persists() {
        let repo = Arc::new(InMemoryRepository::new());
        let service = ProgressService::new(Clock::fixed(fixed_now()), repo.clone());

        let loaded = service.load(&user()).await.unwrap();
        assert_eq!(loaded.progress, ProgressRecord::default());
        assert_eq!(loaded.created_at, fixed_now());
        assert!(repo.get_progress(&user()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn save_stamps_server_time_and_keeps_created_at() {
        let repo = Arc::new(InMemoryRepository::new());
        let created = fixed_now();
        ProgressService::new(Clock::fixed(created), repo.clone())
            .load(&user())
            .await
            .unwrap();

        let later = created + Duration::hours(2);
        let service = ProgressService::new(Clock::fixed(later), repo.clone());
        let mut progress = ProgressRecord::new();
        progress.update_question(
            QuestionId::new(1),
            QuestionProgressPatch::status(QuestionStatus::Mastered),
            created,
        );

        let saved = service.save(&user(), progress).await.unwrap();
        assert_eq!(saved.created_at, created);
        assert_eq!(saved.updated_at, later);
        assert_eq!(saved.progress.last_studied(), Some(later));
        assert_eq!(saved.progress.mastered_questions(), 1);

        let stored = repo.get_progress(&user()).await.unwrap().unwrap();
        assert_eq!(stored, saved);
    }
}
