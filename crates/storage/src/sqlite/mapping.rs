use prep_core::model::{ProgressRecord, UserId};
use sqlx::Row;

use crate::repository::{StorageError, StoredProgress};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn user_id_from_str(raw: &str) -> Result<UserId, StorageError> {
    raw.parse::<UserId>().map_err(ser)
}

pub(crate) fn progress_to_json(progress: &ProgressRecord) -> Result<String, StorageError> {
    serde_json::to_string(progress).map_err(ser)
}

pub(crate) fn progress_from_json(raw: &str) -> Result<ProgressRecord, StorageError> {
    serde_json::from_str(raw).map_err(ser)
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<StoredProgress, StorageError> {
    let user_id: String = row.try_get("user_id").map_err(ser)?;
    let progress_json: String = row.try_get("progress_json").map_err(ser)?;

    Ok(StoredProgress {
        user_id: user_id_from_str(&user_id)?,
        progress: progress_from_json(&progress_json)?,
        created_at: row.try_get("created_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}
