use async_trait::async_trait;
use prep_core::model::UserId;

use crate::repository::{ProgressRepository, StorageError, StoredProgress};

use super::SqliteRepository;
use super::mapping::{map_progress_row, progress_to_json};

#[async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(&self, user_id: &UserId) -> Result<Option<StoredProgress>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT user_id, progress_json, created_at, updated_at
            FROM user_progress
            WHERE user_id = ?1
            ",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn put_progress(&self, stored: &StoredProgress) -> Result<(), StorageError> {
        let progress_json = progress_to_json(&stored.progress)?;
        sqlx::query(
            r"
            INSERT INTO user_progress (user_id, progress_json, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                progress_json = excluded.progress_json,
                updated_at = excluded.updated_at
            ",
        )
        .bind(stored.user_id.as_str())
        .bind(progress_json)
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        Ok(())
    }
}
