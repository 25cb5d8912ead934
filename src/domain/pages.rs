//! Page state transitions applied by the archive-and-publish command.

use time::OffsetDateTime;
use uuid::Uuid;

use super::entities::{DraftRecord, PageRecord, PublishedRecord};
use super::error::DomainError;

/// Change to the published pointer produced by a publish request.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishChange {
    /// The page had no published pointer.
    Create(PublishedRecord),
    /// The pointer referenced another draft.
    Repoint(PublishedRecord),
    /// The pointer already referenced the requested draft.
    Unchanged,
}

impl PublishChange {
    pub fn draft_id(&self) -> Option<Uuid> {
        match self {
            Self::Create(record) | Self::Repoint(record) => Some(record.draft_id),
            Self::Unchanged => None,
        }
    }
}

impl PageRecord {
    pub fn archive(&mut self, now: OffsetDateTime) {
        self.is_archived = true;
        self.updated_at = now;
    }

    /// Decide how the published pointer must change to serve `draft`.
    ///
    /// The draft has to belong to this page; anything else is a broken lookup upstream.
    pub fn plan_publish(
        &self,
        draft: &DraftRecord,
        now: OffsetDateTime,
    ) -> Result<PublishChange, DomainError> {
        if draft.page_id != self.id {
            return Err(DomainError::invariant(format!(
                "draft {} belongs to page {}, not {}",
                draft.id, draft.page_id, self.id
            )));
        }

        let record = PublishedRecord {
            page_id: self.id,
            draft_id: draft.id,
            published_at: now,
        };

        Ok(match self.published.as_ref() {
            None => PublishChange::Create(record),
            Some(current) if current.draft_id != draft.id => PublishChange::Repoint(record),
            Some(_) => PublishChange::Unchanged,
        })
    }
}
