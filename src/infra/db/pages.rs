use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        HealthRepo, PageArchiveUpdate, PageWriteTx, PagesRepo, PagesWriteRepo, RepoError,
    },
    domain::entities::{DraftRecord, PageRecord, PublishedPageView, PublishedRecord},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct PageRow {
    id: Uuid,
    site_id: Uuid,
    slug: String,
    is_archived: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    version: i64,
    published_draft_id: Option<Uuid>,
    published_at: Option<OffsetDateTime>,
}

impl From<PageRow> for PageRecord {
    fn from(row: PageRow) -> Self {
        let published = match (row.published_draft_id, row.published_at) {
            (Some(draft_id), Some(published_at)) => Some(PublishedRecord {
                page_id: row.id,
                draft_id,
                published_at,
            }),
            _ => None,
        };

        Self {
            id: row.id,
            site_id: row.site_id,
            slug: row.slug,
            is_archived: row.is_archived,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
            published,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DraftRow {
    id: Uuid,
    page_id: Uuid,
    draft_number: i32,
    content: String,
}

impl From<DraftRow> for DraftRecord {
    fn from(row: DraftRow) -> Self {
        Self {
            id: row.id,
            page_id: row.page_id,
            draft_number: row.draft_number,
            content: row.content,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PublishedRow {
    page_id: Uuid,
    draft_id: Uuid,
    published_at: OffsetDateTime,
}

impl From<PublishedRow> for PublishedPageView {
    fn from(row: PublishedRow) -> Self {
        Self {
            page_id: row.page_id,
            draft_id: row.draft_id,
            published_at: row.published_at,
        }
    }
}

#[async_trait]
impl PagesRepo for PostgresRepositories {
    async fn find_published(
        &self,
        site_id: Uuid,
        slug: &str,
    ) -> Result<Option<PublishedPageView>, RepoError> {
        let row = sqlx::query_as::<_, PublishedRow>(
            r#"
            SELECT pp.page_id, pp.draft_id, pp.published_at
            FROM pages p
            INNER JOIN page_published pp ON pp.page_id = p.id
            WHERE p.site_id = $1 AND p.slug = $2
            "#,
        )
        .bind(site_id)
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(PublishedPageView::from))
    }
}

#[async_trait]
impl PagesWriteRepo for PostgresRepositories {
    async fn begin(&self) -> Result<Box<dyn PageWriteTx>, RepoError> {
        let tx = self.pool().begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PgPageTx { tx }))
    }
}

/// Archive-and-publish unit of work on one Postgres transaction.
///
/// Dropping it before `commit` rolls the transaction back.
pub struct PgPageTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PageWriteTx for PgPageTx {
    async fn find_page(
        &mut self,
        site_id: Uuid,
        slug: &str,
    ) -> Result<Option<PageRecord>, RepoError> {
        let row = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT p.id, p.site_id, p.slug, p.is_archived, p.created_at, p.updated_at, p.version,
                   pp.draft_id AS published_draft_id, pp.published_at
            FROM pages p
            LEFT JOIN page_published pp ON pp.page_id = p.id
            WHERE p.site_id = $1 AND p.slug = $2
            "#,
        )
        .bind(site_id)
        .bind(slug)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(PageRecord::from))
    }

    async fn find_draft(
        &mut self,
        page_id: Uuid,
        draft_number: i32,
    ) -> Result<Option<DraftRecord>, RepoError> {
        let row = sqlx::query_as::<_, DraftRow>(
            r#"
            SELECT id, page_id, draft_number, content
            FROM page_drafts
            WHERE page_id = $1 AND draft_number = $2
            "#,
        )
        .bind(page_id)
        .bind(draft_number)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(DraftRecord::from))
    }

    async fn archive_page(&mut self, update: PageArchiveUpdate) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE pages
            SET is_archived = $2,
                updated_at = $3,
                version = version + 1
            WHERE id = $1 AND version = $4
            "#,
        )
        .bind(update.id)
        .bind(update.is_archived)
        .bind(update.updated_at)
        .bind(update.expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::concurrency("page", update.id));
        }
        Ok(())
    }

    async fn create_published(&mut self, record: PublishedRecord) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO page_published (page_id, draft_id, published_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(record.page_id)
        .bind(record.draft_id)
        .bind(record.published_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| match map_sqlx_error(err) {
            // A concurrent writer created the pointer first.
            RepoError::Duplicate { .. } => RepoError::concurrency("page_published", record.page_id),
            other => other,
        })?;

        Ok(())
    }

    async fn repoint_published(&mut self, record: PublishedRecord) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE page_published
            SET draft_id = $2,
                published_at = $3
            WHERE page_id = $1
            "#,
        )
        .bind(record.page_id)
        .bind(record.draft_id)
        .bind(record.published_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::concurrency("page_published", record.page_id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }
}

#[async_trait]
impl HealthRepo for PostgresRepositories {
    async fn ping(&self) -> Result<(), RepoError> {
        self.health_check().await.map_err(map_sqlx_error)
    }
}
