//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{DraftRecord, PageRecord, PublishedPageView, PublishedRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    /// The row changed between load and write; the caller's view is stale.
    #[error("optimistic concurrency violation on {entity} `{id}`")]
    Concurrency { entity: &'static str, id: String },
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn concurrency(entity: &'static str, id: impl ToString) -> Self {
        Self::Concurrency {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

/// Archive write guarded by the page's version token.
#[derive(Debug, Clone)]
pub struct PageArchiveUpdate {
    pub id: Uuid,
    pub expected_version: i64,
    pub is_archived: bool,
    pub updated_at: OffsetDateTime,
}

impl From<&PageRecord> for PageArchiveUpdate {
    fn from(page: &PageRecord) -> Self {
        Self {
            id: page.id,
            expected_version: page.version,
            is_archived: page.is_archived,
            updated_at: page.updated_at,
        }
    }
}

#[async_trait]
pub trait PagesRepo: Send + Sync {
    /// Published projection for `(site_id, slug)`; `None` when the page or its pointer is missing.
    async fn find_published(
        &self,
        site_id: Uuid,
        slug: &str,
    ) -> Result<Option<PublishedPageView>, RepoError>;
}

#[async_trait]
pub trait PagesWriteRepo: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn PageWriteTx>, RepoError>;
}

/// Unit of work over pages, drafts and published pointers.
///
/// Dropping a transaction without calling [`PageWriteTx::commit`] rolls it back.
#[async_trait]
pub trait PageWriteTx: Send {
    async fn find_page(
        &mut self,
        site_id: Uuid,
        slug: &str,
    ) -> Result<Option<PageRecord>, RepoError>;

    async fn find_draft(
        &mut self,
        page_id: Uuid,
        draft_number: i32,
    ) -> Result<Option<DraftRecord>, RepoError>;

    /// Fails with [`RepoError::Concurrency`] when `expected_version` is stale.
    async fn archive_page(&mut self, update: PageArchiveUpdate) -> Result<(), RepoError>;

    async fn create_published(&mut self, record: PublishedRecord) -> Result<(), RepoError>;

    async fn repoint_published(&mut self, record: PublishedRecord) -> Result<(), RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;
}

#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn ping(&self) -> Result<(), RepoError>;
}
