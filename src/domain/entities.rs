//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// A page with its published pointer eagerly loaded.
///
/// `version` is the row version token. The persistence layer bumps it on every successful
/// write and rejects writes whose expected version no longer matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageRecord {
    pub id: Uuid,
    pub site_id: Uuid,
    pub slug: String,
    pub is_archived: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub version: i64,
    pub published: Option<PublishedRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftRecord {
    pub id: Uuid,
    pub page_id: Uuid,
    pub draft_number: i32,
    pub content: String,
}

/// Pointer from a page to the draft currently served as its published version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedRecord {
    pub page_id: Uuid,
    pub draft_id: Uuid,
    pub published_at: OffsetDateTime,
}

/// Read projection served by the published-page query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedPageView {
    pub page_id: Uuid,
    pub draft_id: Uuid,
    pub published_at: OffsetDateTime,
}

impl From<PublishedRecord> for PublishedPageView {
    fn from(record: PublishedRecord) -> Self {
        Self {
            page_id: record.page_id,
            draft_id: record.draft_id,
            published_at: record.published_at,
        }
    }
}
