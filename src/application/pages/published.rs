//! Cached read of a page's published version.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::repos::PagesRepo;
use crate::cache::{CacheConfig, ReadThroughCache, published_page_key};
use crate::domain::entities::PublishedPageView;

pub const PUBLISHED_CACHE_NAME: &str = "published_pages";

#[derive(Clone)]
pub struct PublishedPageService {
    reader: Arc<dyn PagesRepo>,
    cache: Arc<ReadThroughCache<PublishedPageView>>,
    config: CacheConfig,
}

impl PublishedPageService {
    pub fn new(
        reader: Arc<dyn PagesRepo>,
        cache: Arc<ReadThroughCache<PublishedPageView>>,
        config: CacheConfig,
    ) -> Self {
        Self {
            reader,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ReadThroughCache<PublishedPageView>> {
        &self.cache
    }

    /// Published view of `(site_id, slug)`, or `None` when nothing is published.
    ///
    /// Answers may be stale by up to the configured TTLs. Storage failures are absorbed by
    /// the cache and also read as `None`.
    pub async fn get_published(&self, site_id: Uuid, slug: &str) -> Option<PublishedPageView> {
        let key = published_page_key(site_id, slug);
        let reader = Arc::clone(&self.reader);

        self.cache
            .get_or_load(
                &key,
                || async move { reader.find_published(site_id, slug).await },
                self.config.published_ttl,
                self.config.negative_ttl,
            )
            .await
    }
}
