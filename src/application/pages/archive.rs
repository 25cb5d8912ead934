//! Archive a page and optionally switch its published draft.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{Instrument, Span, debug, error, field, info, info_span, warn};
use uuid::Uuid;

use crate::application::pages::validation::{
    FIELD_PUBLISH_DRAFT, FIELD_SITE_ID, FIELD_SLUG, ValidationErrors,
};
use crate::application::repos::{PageArchiveUpdate, PagesWriteRepo, RepoError};
use crate::cache::{CacheInvalidation, published_page_key};
use crate::config::ArchiveSettings;
use crate::domain::error::DomainError;
use crate::domain::pages::PublishChange;

const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ArchivePageCommand {
    pub site_id: Uuid,
    pub slug: String,
    pub publish_draft: Option<i32>,
}

impl ArchivePageCommand {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.site_id.is_nil() {
            errors.push(FIELD_SITE_ID, "SiteId is required.");
        }
        if self.slug.trim().is_empty() {
            errors.push(FIELD_SLUG, "Slug is required.");
        }
        if matches!(self.publish_draft, Some(number) if number <= 0) {
            errors.push(
                FIELD_PUBLISH_DRAFT,
                "PublishDraft must be greater than 0 if provided.",
            );
        }
        errors.into_result()
    }
}

#[derive(Debug, Error)]
pub enum ArchivePageError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("page with slug `{slug}` not found for site `{site_id}`")]
    NotFound { site_id: Uuid, slug: String },
    #[error("unable to complete operation due to concurrent modifications")]
    Conflict { attempts: u32 },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl ArchivePageError {
    fn outcome(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Domain(_) | Self::Repo(_) => "error",
        }
    }
}

/// Bounded retry applied when a write loses an optimistic-concurrency race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: NonZeroU32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(DEFAULT_MAX_ATTEMPTS).unwrap_or(NonZeroU32::MIN),
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl From<&ArchiveSettings> for RetryPolicy {
    fn from(settings: &ArchiveSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff: settings.retry_backoff,
        }
    }
}

#[derive(Clone)]
pub struct ArchivePageService {
    writer: Arc<dyn PagesWriteRepo>,
    cache: Arc<dyn CacheInvalidation>,
    retry: RetryPolicy,
}

impl ArchivePageService {
    pub fn new(writer: Arc<dyn PagesWriteRepo>, cache: Arc<dyn CacheInvalidation>) -> Self {
        Self {
            writer,
            cache,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Archive the page and, when requested, point its published version at the given draft.
    ///
    /// Validation failures open no transaction. Concurrency conflicts are retried up to the
    /// policy's attempt limit and then surface as [`ArchivePageError::Conflict`]; every other
    /// failure is returned as-is. The published-page cache entry is invalidated only after a
    /// successful commit.
    pub async fn execute(&self, command: ArchivePageCommand) -> Result<(), ArchivePageError> {
        let span = info_span!(
            "pages.archive_and_publish",
            site_id = %command.site_id,
            slug = %command.slug,
            publish_draft = ?command.publish_draft,
            page_id = field::Empty,
            draft_id = field::Empty,
            attempt = field::Empty,
            outcome = field::Empty,
        );

        async move {
            let result = self.run(&command).await;
            let outcome = match &result {
                Ok(()) => "ok",
                Err(err) => err.outcome(),
            };
            Span::current().record("outcome", outcome);
            result
        }
        .instrument(span)
        .await
    }

    async fn run(&self, command: &ArchivePageCommand) -> Result<(), ArchivePageError> {
        if let Err(errors) = command.validate() {
            for failure in errors.iter() {
                warn!(
                    target = "page_manager::pages::archive",
                    field = failure.field,
                    message = %failure.message,
                    "validation_error"
                );
            }
            return Err(ArchivePageError::Validation(errors));
        }

        let max_attempts = self.retry.max_attempts.get();
        let mut attempt = 1;
        loop {
            Span::current().record("attempt", attempt);
            match self.attempt(command, attempt).await {
                Ok(()) => break,
                Err(ArchivePageError::Repo(err)) if err.is_concurrency() => {
                    if attempt >= max_attempts {
                        warn!(
                            target = "page_manager::pages::archive",
                            attempt,
                            max_attempts,
                            error = %err,
                            "concurrency conflict after final attempt"
                        );
                        return Err(ArchivePageError::Conflict {
                            attempts: max_attempts,
                        });
                    }
                    warn!(
                        target = "page_manager::pages::archive",
                        attempt,
                        max_attempts,
                        error = %err,
                        "concurrency_retry"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }

        self.invalidate(command);
        Ok(())
    }

    /// One transactional pass. Returning early drops the transaction, which rolls it back.
    async fn attempt(
        &self,
        command: &ArchivePageCommand,
        attempt: u32,
    ) -> Result<(), ArchivePageError> {
        debug!(target = "page_manager::pages::archive", attempt, "db.tx.begin");
        let mut tx = self.writer.begin().await?;

        let Some(mut page) = tx.find_page(command.site_id, &command.slug).await? else {
            error!(
                target = "page_manager::pages::archive",
                site_id = %command.site_id,
                slug = %command.slug,
                "page_not_found"
            );
            return Err(ArchivePageError::NotFound {
                site_id: command.site_id,
                slug: command.slug.clone(),
            });
        };
        Span::current().record("page_id", field::display(page.id));

        let now = OffsetDateTime::now_utc();
        page.archive(now);
        tx.archive_page(PageArchiveUpdate::from(&page)).await?;
        debug!(target = "page_manager::pages::archive", page_id = %page.id, "page_archived");

        if let Some(draft_number) = command.publish_draft {
            let Some(draft) = tx.find_draft(page.id, draft_number).await? else {
                warn!(
                    target = "page_manager::pages::archive",
                    page_id = %page.id,
                    draft_number,
                    "draft_not_found"
                );
                return Err(ArchivePageError::Validation(ValidationErrors::single(
                    FIELD_PUBLISH_DRAFT,
                    format!("Draft #{draft_number} is not valid for PageId {}.", page.id),
                )));
            };
            Span::current().record("draft_id", field::display(draft.id));

            match page.plan_publish(&draft, now)? {
                PublishChange::Create(record) => {
                    tx.create_published(record).await?;
                    debug!(target = "page_manager::pages::archive", draft_id = %draft.id, "published_created");
                }
                PublishChange::Repoint(record) => {
                    tx.repoint_published(record).await?;
                    debug!(target = "page_manager::pages::archive", draft_id = %draft.id, "published_updated");
                }
                PublishChange::Unchanged => {}
            }
        }

        tx.commit().await?;
        info!(
            target = "page_manager::pages::archive",
            page_id = %page.id,
            attempt,
            "db.tx.commit"
        );
        Ok(())
    }

    fn invalidate(&self, command: &ArchivePageCommand) {
        let key = published_page_key(command.site_id, &command.slug);
        match self.cache.invalidate(&key) {
            Ok(()) => debug!(target = "page_manager::pages::archive", key = %key, "cache.invalidate"),
            Err(err) => warn!(
                target = "page_manager::pages::archive",
                key = %key,
                error = %err,
                "cache.invalidate.failed"
            ),
        }
    }
}
