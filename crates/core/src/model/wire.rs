//! Serde helpers for records written by older clients.
//!
//! Stored progress predates this crate and is loose: numbers may be `null`,
//! timestamps may be unparseable, and `notes` used to be a single string.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::time::parse_timestamp;

/// Treats an explicit `null` the same as a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts an ISO-8601 string or `null`; unparseable strings become `None`.
pub(crate) fn lenient_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Stand-in for a required timestamp that was lost (`new Date(NaN)` is
/// written as `null`).
pub(crate) fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Like [`lenient_timestamp`] for required fields: missing values read as [`epoch`].
pub(crate) fn timestamp_or_epoch<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_timestamp(deserializer)?.unwrap_or_else(epoch))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NotesWire {
    Many(Vec<String>),
    One(String),
}

/// Accepts either a list of notes or the legacy single free-text note.
pub(crate) fn notes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<NotesWire>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(NotesWire::Many(notes)) => notes,
        Some(NotesWire::One(note)) if note.trim().is_empty() => Vec::new(),
        Some(NotesWire::One(note)) => vec![note],
    })
}
