//! Field extraction and change detection
//!
//! Remote records map to a uniform [`FieldSet`] so diffing and staged
//! updates are kind-agnostic. Extraction applies the bounded-field rules:
//! descriptions truncate to a character limit, language tags normalize to
//! lower case.

use tubevault_core::remote::{RemoteChannel, RemotePlaylist, RemoteVideo};
use tubevault_core::storage::{FieldSet, FieldValue};

/// Descriptions are truncated to this many characters before storage.
pub const DESCRIPTION_CHAR_LIMIT: usize = 10_000;

/// The field name carrying the display title; its transitions feed the
/// report's old/new columns.
pub const TITLE_FIELD: &str = "title";

fn truncated_description(description: &str) -> String {
    // Character count, not bytes: a multi-byte boundary must not split
    if description.chars().count() <= DESCRIPTION_CHAR_LIMIT {
        description.to_string()
    } else {
        description.chars().take(DESCRIPTION_CHAR_LIMIT).collect()
    }
}

fn normalized_language(language: Option<&str>) -> Option<String> {
    language.map(str::to_lowercase)
}

/// The bounded field set extracted from a channel record.
#[must_use]
pub fn channel_fields(remote: &RemoteChannel) -> FieldSet {
    let mut fields = FieldSet::new();
    fields.insert(TITLE_FIELD, FieldValue::Text(remote.title.clone()));
    fields.insert(
        "description",
        FieldValue::Text(truncated_description(&remote.description)),
    );
    fields.insert("country", FieldValue::OptText(remote.country.clone()));
    fields.insert(
        "default_language",
        FieldValue::OptText(normalized_language(remote.default_language.as_deref())),
    );
    fields.insert("custom_url", FieldValue::OptText(remote.custom_url.clone()));
    fields.insert(
        "subscriber_count",
        FieldValue::Count(remote.statistics.subscriber_count),
    );
    fields.insert(
        "video_count",
        FieldValue::Count(remote.statistics.video_count),
    );
    fields.insert(
        "view_count",
        FieldValue::Count(remote.statistics.view_count),
    );
    fields
}

/// The bounded field set extracted from a video record.
#[must_use]
pub fn video_fields(remote: &RemoteVideo) -> FieldSet {
    let mut fields = FieldSet::new();
    fields.insert(TITLE_FIELD, FieldValue::Text(remote.title.clone()));
    fields.insert(
        "description",
        FieldValue::Text(truncated_description(&remote.description)),
    );
    fields.insert(
        "default_language",
        FieldValue::OptText(normalized_language(remote.default_language.as_deref())),
    );
    fields.insert(
        "category_id",
        FieldValue::OptText(remote.category_id.clone()),
    );
    fields.insert(
        "view_count",
        FieldValue::Count(remote.statistics.view_count),
    );
    fields.insert(
        "like_count",
        FieldValue::Count(remote.statistics.like_count),
    );
    fields.insert(
        "comment_count",
        FieldValue::Count(remote.statistics.comment_count),
    );
    fields
}

/// The bounded field set extracted from a playlist record.
#[must_use]
pub fn playlist_fields(remote: &RemotePlaylist) -> FieldSet {
    let mut fields = FieldSet::new();
    fields.insert(TITLE_FIELD, FieldValue::Text(remote.title.clone()));
    fields.insert(
        "description",
        FieldValue::Text(truncated_description(&remote.description)),
    );
    fields.insert("item_count", FieldValue::Count(remote.item_count));
    fields
}

/// The subset of `desired` that differs from `current`. An empty result
/// means the row is up to date.
#[must_use]
pub fn changed_fields(current: &FieldSet, desired: &FieldSet) -> FieldSet {
    let mut changed = FieldSet::new();
    for (name, value) in desired {
        if current.get(name) != Some(value) {
            changed.insert(*name, value.clone());
        }
    }
    changed
}
