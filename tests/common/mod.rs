#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use page_manager::application::repos::{
    HealthRepo, PageArchiveUpdate, PageWriteTx, PagesRepo, PagesWriteRepo, RepoError,
};
use page_manager::cache::{CacheError, CacheInvalidation};
use page_manager::domain::entities::{
    DraftRecord, PageRecord, PublishedPageView, PublishedRecord,
};
use time::OffsetDateTime;
use tokio::sync::Barrier;
use uuid::Uuid;

/// What the next commits of one store handle should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFault {
    Never,
    Once,
    Always,
}

impl CommitFault {
    fn fire(&mut self) -> bool {
        match *self {
            CommitFault::Never => false,
            CommitFault::Once => {
                *self = CommitFault::Never;
                true
            }
            CommitFault::Always => true,
        }
    }
}

#[derive(Default)]
struct State {
    pages: HashMap<Uuid, PageRecord>,
    drafts: Vec<DraftRecord>,
    published: HashMap<Uuid, PublishedRecord>,
}

struct Rendezvous {
    remaining: usize,
    barrier: Arc<Barrier>,
}

#[derive(Default)]
struct Shared {
    begins: AtomicUsize,
    commits: AtomicUsize,
    conflicts: AtomicUsize,
    open_txs: AtomicUsize,
    published_loads: AtomicUsize,
    unhealthy: AtomicBool,
    rendezvous: Mutex<Option<Rendezvous>>,
    read_failure: Mutex<Option<String>>,
    begin_failure: Mutex<Option<String>>,
    read_delay: Mutex<Option<Duration>>,
    read_lag: Mutex<Option<Duration>>,
}

/// In-memory pages store with version compare-and-swap at commit.
///
/// Handles created with [`MemoryStore::handle`] share data and counters but carry their own
/// commit fault plan, so two writers can be instrumented independently.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    shared: Arc<Shared>,
    fault: Arc<Mutex<Option<CommitFault>>>,
    stall_commits: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            shared: Arc::clone(&self.shared),
            fault: Arc::new(Mutex::new(None)),
            stall_commits: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_commit_fault(self, fault: CommitFault) -> Self {
        *self.fault.lock().unwrap() = Some(fault);
        self
    }

    /// Commits through this handle never complete.
    pub fn stall_commits(&self) {
        self.stall_commits.store(true, Ordering::SeqCst);
    }

    /// The next `writers` page loads wait for each other before returning.
    pub fn rendezvous_on_load(&self, writers: usize) {
        *self.shared.rendezvous.lock().unwrap() = Some(Rendezvous {
            remaining: writers,
            barrier: Arc::new(Barrier::new(writers)),
        });
    }

    pub fn fail_published_reads(&self, message: Option<&str>) {
        *self.shared.read_failure.lock().unwrap() = message.map(str::to_string);
    }

    pub fn fail_begin(&self, message: &str) {
        *self.shared.begin_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn delay_published_reads(&self, delay: Duration) {
        *self.shared.read_delay.lock().unwrap() = Some(delay);
    }

    /// Published reads take their snapshot first, then wait `lag` before returning it.
    pub fn lag_published_reads(&self, lag: Duration) {
        *self.shared.read_lag.lock().unwrap() = Some(lag);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.shared.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn seed_page(&self, site_id: Uuid, slug: &str) -> PageRecord {
        let created = OffsetDateTime::now_utc() - time::Duration::days(1);
        let page = PageRecord {
            id: Uuid::new_v4(),
            site_id,
            slug: slug.to_string(),
            is_archived: false,
            created_at: created,
            updated_at: created,
            version: 0,
            published: None,
        };
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(page.id, page.clone());
        page
    }

    pub fn seed_draft(&self, page_id: Uuid, draft_number: i32) -> DraftRecord {
        let draft = DraftRecord {
            id: Uuid::new_v4(),
            page_id,
            draft_number,
            content: format!("content of draft #{draft_number}"),
        };
        self.state.lock().unwrap().drafts.push(draft.clone());
        draft
    }

    /// Write a published pointer directly, bypassing transactions.
    pub fn seed_published(&self, page_id: Uuid, draft_id: Uuid) -> PublishedRecord {
        let record = PublishedRecord {
            page_id,
            draft_id,
            published_at: OffsetDateTime::now_utc(),
        };
        self.state
            .lock()
            .unwrap()
            .published
            .insert(page_id, record.clone());
        record
    }

    pub fn page(&self, id: Uuid) -> PageRecord {
        let state = self.state.lock().unwrap();
        let mut page = state.pages.get(&id).cloned().expect("seeded page");
        page.published = state.published.get(&id).cloned();
        page
    }

    pub fn begins(&self) -> usize {
        self.shared.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn conflicts(&self) -> usize {
        self.shared.conflicts.load(Ordering::SeqCst)
    }

    pub fn open_transactions(&self) -> usize {
        self.shared.open_txs.load(Ordering::SeqCst)
    }

    pub fn published_loads(&self) -> usize {
        self.shared.published_loads.load(Ordering::SeqCst)
    }

    fn take_rendezvous(&self) -> Option<Arc<Barrier>> {
        let mut slot = self.shared.rendezvous.lock().unwrap();
        let rendezvous = slot.as_mut()?;
        if rendezvous.remaining == 0 {
            return None;
        }
        rendezvous.remaining -= 1;
        Some(Arc::clone(&rendezvous.barrier))
    }
}

#[async_trait]
impl PagesRepo for MemoryStore {
    async fn find_published(
        &self,
        site_id: Uuid,
        slug: &str,
    ) -> Result<Option<PublishedPageView>, RepoError> {
        self.shared.published_loads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.shared.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.shared.read_failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(RepoError::Persistence(message));
        }

        let view = {
            let state = self.state.lock().unwrap();
            state
                .pages
                .values()
                .find(|page| page.site_id == site_id && page.slug == slug)
                .and_then(|page| state.published.get(&page.id).cloned())
                .map(PublishedPageView::from)
        };

        let lag = *self.shared.read_lag.lock().unwrap();
        if let Some(lag) = lag {
            tokio::time::sleep(lag).await;
        }
        Ok(view)
    }
}

#[async_trait]
impl PagesWriteRepo for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn PageWriteTx>, RepoError> {
        self.shared.begins.fetch_add(1, Ordering::SeqCst);

        let failure = self.shared.begin_failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(RepoError::Persistence(message));
        }

        self.shared.open_txs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            staged: Vec::new(),
        }))
    }
}

#[async_trait]
impl HealthRepo for MemoryStore {
    async fn ping(&self) -> Result<(), RepoError> {
        if self.shared.unhealthy.load(Ordering::SeqCst) {
            Err(RepoError::Persistence("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
enum Staged {
    Archive(PageArchiveUpdate),
    CreatePublished(PublishedRecord),
    RepointPublished(PublishedRecord),
}

/// Buffers writes until commit; dropping it discards them.
struct MemoryTx {
    store: MemoryStore,
    staged: Vec<Staged>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.store.shared.open_txs.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryTx {
    fn conflict(&self, entity: &'static str, id: Uuid) -> RepoError {
        self.store.shared.conflicts.fetch_add(1, Ordering::SeqCst);
        RepoError::concurrency(entity, id)
    }
}

#[async_trait]
impl PageWriteTx for MemoryTx {
    async fn find_page(
        &mut self,
        site_id: Uuid,
        slug: &str,
    ) -> Result<Option<PageRecord>, RepoError> {
        let page = {
            let state = self.store.state.lock().unwrap();
            state
                .pages
                .values()
                .find(|page| page.site_id == site_id && page.slug == slug)
                .cloned()
                .map(|mut page| {
                    page.published = state.published.get(&page.id).cloned();
                    page
                })
        };

        if let Some(barrier) = self.store.take_rendezvous() {
            barrier.wait().await;
        }

        Ok(page)
    }

    async fn find_draft(
        &mut self,
        page_id: Uuid,
        draft_number: i32,
    ) -> Result<Option<DraftRecord>, RepoError> {
        let state = self.store.state.lock().unwrap();
        Ok(state
            .drafts
            .iter()
            .find(|draft| draft.page_id == page_id && draft.draft_number == draft_number)
            .cloned())
    }

    async fn archive_page(&mut self, update: PageArchiveUpdate) -> Result<(), RepoError> {
        self.staged.push(Staged::Archive(update));
        Ok(())
    }

    async fn create_published(&mut self, record: PublishedRecord) -> Result<(), RepoError> {
        self.staged.push(Staged::CreatePublished(record));
        Ok(())
    }

    async fn repoint_published(&mut self, record: PublishedRecord) -> Result<(), RepoError> {
        self.staged.push(Staged::RepointPublished(record));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        if self.store.stall_commits.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let injected = self
            .store
            .fault
            .lock()
            .unwrap()
            .as_mut()
            .is_some_and(CommitFault::fire);
        if injected {
            let id = self
                .staged
                .iter()
                .find_map(|op| match op {
                    Staged::Archive(update) => Some(update.id),
                    _ => None,
                })
                .unwrap_or_default();
            return Err(self.conflict("page", id));
        }

        let mut state = self.store.state.lock().unwrap();

        for op in &self.staged {
            match op {
                Staged::Archive(update) => {
                    let current = state.pages.get(&update.id).map(|page| page.version);
                    if current != Some(update.expected_version) {
                        drop(state);
                        return Err(self.conflict("page", update.id));
                    }
                }
                Staged::CreatePublished(record) => {
                    if state.published.contains_key(&record.page_id) {
                        drop(state);
                        return Err(self.conflict("page_published", record.page_id));
                    }
                }
                Staged::RepointPublished(record) => {
                    if !state.published.contains_key(&record.page_id) {
                        drop(state);
                        return Err(self.conflict("page_published", record.page_id));
                    }
                }
            }
        }

        for op in &self.staged {
            match op {
                Staged::Archive(update) => {
                    if let Some(page) = state.pages.get_mut(&update.id) {
                        page.is_archived = update.is_archived;
                        page.updated_at = update.updated_at;
                        page.version += 1;
                    }
                }
                Staged::CreatePublished(record) | Staged::RepointPublished(record) => {
                    state.published.insert(record.page_id, record.clone());
                }
            }
        }
        drop(state);

        self.store.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Invalidation backend that always fails.
pub struct FailingInvalidator;

impl CacheInvalidation for FailingInvalidator {
    fn invalidate(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Backend("cache node unreachable".to_string()))
    }
}

/// Invalidation backend that records the keys it was asked to drop.
#[derive(Default)]
pub struct RecordingInvalidator {
    keys: Mutex<Vec<String>>,
}

impl RecordingInvalidator {
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

impl CacheInvalidation for RecordingInvalidator {
    fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.keys.lock().unwrap().push(key.to_string());
        Ok(())
    }
}
