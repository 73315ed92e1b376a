//! Paginated, prefetching loader over a fixed question order.
//!
//! At most one page load is in flight. A request made while another is running is
//! dropped and reported as [`PageLoad::Busy`]; callers re-check after completion.
//! Re-initializing bumps an epoch so results of older requests are discarded.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rng;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;

use quiz_core::model::{Question, QuestionId};
use storage::QuestionStore;

use crate::error::LoadError;

/// Result of a page request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLoad {
    /// Page fetched and appended.
    Loaded { page: usize, count: usize },
    /// Page was already loaded; nothing requested.
    AlreadyLoaded,
    /// Another load was in flight; request dropped.
    Busy,
    /// Every id is loaded.
    Exhausted,
    /// Loader was re-initialized or the page was filled by a bulk load meanwhile.
    Discarded,
}

#[derive(Debug, Default)]
struct LoaderState {
    order: Arc<[QuestionId]>,
    page_size: usize,
    loaded_pages: BTreeSet<usize>,
    loaded: Vec<Question>,
    in_flight: bool,
    epoch: u64,
    current_page: usize,
}

impl LoaderState {
    fn page_count(&self) -> usize {
        self.order.len().div_ceil(self.page_size.max(1))
    }

    fn page_window(&self, page: usize) -> &[QuestionId] {
        let size = self.page_size.max(1);
        let start = ((page - 1) * size).min(self.order.len());
        let end = (page * size).min(self.order.len());
        &self.order[start..end]
    }

    fn next_unloaded_page(&self) -> Option<usize> {
        (1..=self.page_count()).find(|p| !self.loaded_pages.contains(p))
    }

    fn has_more(&self) -> bool {
        self.loaded_pages.len() < self.page_count()
    }
}

fn lock(m: &Mutex<LoaderState>) -> MutexGuard<'_, LoaderState> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight flag if the owning request is dropped before completing.
struct InFlightGuard {
    state: Arc<Mutex<LoaderState>>,
    epoch: u64,
    armed: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = lock(&self.state);
        if state.epoch == self.epoch {
            state.in_flight = false;
        }
    }
}

struct PageTicket {
    page: usize,
    ids: Vec<QuestionId>,
    guard: InFlightGuard,
}

enum Reservation {
    Ready(PageTicket),
    Skip(PageLoad),
}

/// Re-key fetched records onto the requested ids, which may contain duplicates.
fn arrange(ids: &[QuestionId], fetched: Vec<Question>) -> Result<Vec<Question>, LoadError> {
    let by_id: HashMap<QuestionId, Question> = fetched.into_iter().map(|q| (q.id, q)).collect();
    ids.iter()
        .map(|id| by_id.get(id).cloned().ok_or(LoadError::MissingQuestion(*id)))
        .collect()
}

/// Handle to a shared loader; clones observe the same pages.
#[derive(Clone)]
pub struct QuestionPageLoader {
    store: Arc<dyn QuestionStore>,
    state: Arc<Mutex<LoaderState>>,
    prefetch_threshold: usize,
}

impl QuestionPageLoader {
    #[must_use]
    pub fn new(store: Arc<dyn QuestionStore>, prefetch_threshold: usize) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(LoaderState {
                page_size: 1,
                ..LoaderState::default()
            })),
            prefetch_threshold,
        }
    }

    /// Fix the question order and reset loaded state.
    ///
    /// This is the only place the order is ever shuffled. Returns the fixed order so the
    /// session can share it.
    pub fn initialize(
        &self,
        mut ids: Vec<QuestionId>,
        page_size: usize,
        randomize: bool,
    ) -> Arc<[QuestionId]> {
        if randomize {
            ids.shuffle(&mut rng());
        }
        let order: Arc<[QuestionId]> = ids.into();
        self.initialize_fixed(Arc::clone(&order), page_size);
        order
    }

    /// Reset loaded state over an order that is already fixed, e.g. a recovered one.
    pub fn initialize_fixed(&self, order: Arc<[QuestionId]>, page_size: usize) {
        let mut state = lock(&self.state);
        let epoch = state.epoch + 1;
        tracing::debug!(total = order.len(), page_size, "initialized question loader");
        *state = LoaderState {
            order,
            page_size: page_size.max(1),
            epoch,
            ..LoaderState::default()
        };
    }

    fn reserve(&self, page: Option<usize>) -> Result<Reservation, LoadError> {
        let mut state = lock(&self.state);
        if state.in_flight {
            return Ok(Reservation::Skip(PageLoad::Busy));
        }
        let page = match page {
            Some(page) => {
                let pages = state.page_count();
                if page == 0 || page > pages {
                    return Err(LoadError::PageOutOfRange { page, pages });
                }
                if state.loaded_pages.contains(&page) {
                    return Ok(Reservation::Skip(PageLoad::AlreadyLoaded));
                }
                page
            }
            None => match state.next_unloaded_page() {
                Some(page) => page,
                None => return Ok(Reservation::Skip(PageLoad::Exhausted)),
            },
        };

        state.in_flight = true;
        Ok(Reservation::Ready(PageTicket {
            page,
            ids: state.page_window(page).to_vec(),
            guard: InFlightGuard {
                state: Arc::clone(&self.state),
                epoch: state.epoch,
                armed: true,
            },
        }))
    }

    async fn run(&self, mut ticket: PageTicket) -> Result<PageLoad, LoadError> {
        let fetched = self.store.fetch(&ticket.ids).await;

        let mut state = lock(&self.state);
        ticket.guard.armed = false;
        if state.epoch != ticket.guard.epoch {
            return Ok(PageLoad::Discarded);
        }
        state.in_flight = false;

        let arranged = fetched
            .map_err(LoadError::from)
            .and_then(|f| arrange(&ticket.ids, f));
        let questions = match arranged {
            Ok(questions) => questions,
            Err(err) => {
                tracing::warn!(page = ticket.page, error = %err, "question page load failed");
                return Err(err);
            }
        };
        if state.loaded_pages.contains(&ticket.page) {
            return Ok(PageLoad::Discarded);
        }

        let count = questions.len();
        state.loaded.extend(questions);
        state.loaded_pages.insert(ticket.page);
        state.current_page = state.current_page.max(ticket.page);
        tracing::debug!(
            page = ticket.page,
            count,
            loaded = state.loaded.len(),
            "loaded question page"
        );
        Ok(PageLoad::Loaded {
            page: ticket.page,
            count,
        })
    }

    /// Fetch page `page` (1-based) and append it to the loaded sequence.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the page does not exist or the store fails; loaded pages
    /// are left intact.
    pub async fn load_page(&self, page: usize) -> Result<PageLoad, LoadError> {
        match self.reserve(Some(page))? {
            Reservation::Ready(ticket) => self.run(ticket).await,
            Reservation::Skip(outcome) => Ok(outcome),
        }
    }

    /// Fetch the next unloaded page.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the store fails.
    pub async fn load_more(&self) -> Result<PageLoad, LoadError> {
        match self.reserve(None)? {
            Reservation::Ready(ticket) => self.run(ticket).await,
            Reservation::Skip(outcome) => Ok(outcome),
        }
    }

    /// Spawn a page load when the unconsumed buffer is at or below the threshold.
    ///
    /// The slot is reserved before returning, so a second call cannot start an
    /// overlapping load. Must be called from within a tokio runtime.
    pub fn check_prefetch(
        &self,
        consumed: usize,
    ) -> Option<JoinHandle<Result<PageLoad, LoadError>>> {
        {
            let state = lock(&self.state);
            if state.in_flight || !state.has_more() {
                return None;
            }
            if state.loaded.len().saturating_sub(consumed) > self.prefetch_threshold {
                return None;
            }
        }
        let ticket = match self.reserve(None) {
            Ok(Reservation::Ready(ticket)) => ticket,
            Ok(Reservation::Skip(_)) | Err(_) => return None,
        };
        tracing::debug!(consumed, page = ticket.page, "prefetching question page");
        let this = self.clone();
        Some(tokio::spawn(async move { this.run(ticket).await }))
    }

    /// Spawn the next page load, reserving the slot immediately.
    pub(crate) fn spawn_load_more(&self) -> Option<JoinHandle<Result<PageLoad, LoadError>>> {
        let ticket = match self.reserve(None) {
            Ok(Reservation::Ready(ticket)) => ticket,
            Ok(Reservation::Skip(_)) | Err(_) => return None,
        };
        let this = self.clone();
        Some(tokio::spawn(async move { this.run(ticket).await }))
    }

    /// Fetch every still-unloaded id in one request.
    ///
    /// Ignores the in-flight slot; a page load that finishes afterwards is discarded.
    /// Returns the number of questions appended.
    ///
    /// # Errors
    ///
    /// Returns `LoadError` if the store fails.
    pub async fn load_remaining(&self) -> Result<usize, LoadError> {
        let (epoch, pages, ids) = {
            let state = lock(&self.state);
            let pages: Vec<usize> = (1..=state.page_count())
                .filter(|p| !state.loaded_pages.contains(p))
                .collect();
            let ids: Vec<QuestionId> = pages
                .iter()
                .flat_map(|p| state.page_window(*p).iter().copied())
                .collect();
            (state.epoch, pages, ids)
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let fetched = self.store.fetch(&ids).await?;
        let questions = arrange(&ids, fetched)?;

        let mut state = lock(&self.state);
        if state.epoch != epoch {
            return Ok(0);
        }
        let mut appended = 0;
        let mut offset = 0;
        for page in pages {
            let len = state.page_window(page).len();
            let chunk = &questions[offset..offset + len];
            offset += len;
            if state.loaded_pages.insert(page) {
                state.loaded.extend_from_slice(chunk);
                appended += len;
            }
        }
        state.current_page = state.page_count();
        tracing::debug!(appended, "bulk loaded remaining questions");
        Ok(appended)
    }

    #[must_use]
    pub fn loaded_count(&self) -> usize {
        lock(&self.state).loaded.len()
    }

    #[must_use]
    pub fn total_count(&self) -> usize {
        lock(&self.state).order.len()
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        lock(&self.state).has_more()
    }

    /// Highest page number loaded so far, zero before the first load.
    #[must_use]
    pub fn current_page(&self) -> usize {
        lock(&self.state).current_page
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        lock(&self.state).in_flight
    }

    #[must_use]
    pub fn order(&self) -> Arc<[QuestionId]> {
        Arc::clone(&lock(&self.state).order)
    }

    /// Flattened loaded questions in load order.
    #[must_use]
    pub fn loaded_questions(&self) -> Vec<Question> {
        lock(&self.state).loaded.clone()
    }

    #[must_use]
    pub fn question(&self, id: QuestionId) -> Option<Question> {
        lock(&self.state).loaded.iter().find(|q| q.id == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{GatedQuestions, RecordingQuestions, question_ids};

    fn loader(store: Arc<dyn QuestionStore>, total: u64, page_size: usize) -> QuestionPageLoader {
        let loader = QuestionPageLoader::new(store, 5);
        loader.initialize(question_ids(1..=total), page_size, false);
        loader
    }

    #[tokio::test]
    async fn empty_order_loads_nothing() {
        let store = Arc::new(RecordingQuestions::seeded(1..=10));
        let loader = QuestionPageLoader::new(store.clone(), 5);
        loader.initialize(Vec::new(), 50, true);

        assert!(!loader.has_more());
        assert_eq!(loader.loaded_count(), 0);
        assert_eq!(loader.load_more().await.unwrap(), PageLoad::Exhausted);
        assert!(loader.check_prefetch(0).is_none());
        assert_eq!(loader.load_remaining().await.unwrap(), 0);
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn load_page_requests_the_exact_window() {
        let store = Arc::new(RecordingQuestions::seeded(1..=120));
        let loader = loader(store.clone(), 120, 50);

        let outcome = loader.load_page(3).await.unwrap();
        assert_eq!(outcome, PageLoad::Loaded { page: 3, count: 20 });
        assert_eq!(store.requests(), vec![question_ids(101..=120)]);
        assert_eq!(loader.current_page(), 3);
        assert!(loader.has_more());

        assert_eq!(loader.load_page(3).await.unwrap(), PageLoad::AlreadyLoaded);
        assert!(matches!(
            loader.load_page(4).await,
            Err(LoadError::PageOutOfRange { page: 4, pages: 3 })
        ));
    }

    #[tokio::test]
    async fn failed_load_keeps_earlier_pages() {
        let store = Arc::new(RecordingQuestions::seeded(1..=60));
        let loader = loader(store.clone(), 80, 20);

        loader.load_more().await.unwrap();
        loader.load_more().await.unwrap();
        loader.load_more().await.unwrap();
        let err = loader.load_more().await.unwrap_err();
        assert!(matches!(err, LoadError::MissingQuestion(_)));
        assert_eq!(loader.loaded_count(), 60);
        assert!(!loader.is_loading());
        assert!(loader.has_more());
    }

    #[tokio::test]
    async fn duplicate_ids_are_kept_positionally() {
        let store = Arc::new(RecordingQuestions::seeded(1..=3));
        let loader = QuestionPageLoader::new(store, 5);
        let ids = vec![QuestionId::new(2), QuestionId::new(1), QuestionId::new(2)];
        loader.initialize(ids.clone(), 10, false);

        loader.load_more().await.unwrap();
        let loaded: Vec<_> = loader.loaded_questions().iter().map(|q| q.id).collect();
        assert_eq!(loaded, ids);
    }

    #[tokio::test]
    async fn randomize_shuffles_once_and_keeps_all_ids() {
        let store = Arc::new(RecordingQuestions::seeded(1..=40));
        let loader = QuestionPageLoader::new(store, 5);
        let order = loader.initialize(question_ids(1..=40), 10, true);

        let mut sorted = order.to_vec();
        sorted.sort();
        assert_eq!(sorted, question_ids(1..=40));
        assert_eq!(loader.order(), order);

        loader.load_more().await.unwrap();
        let first_page: Vec<_> = loader.loaded_questions().iter().map(|q| q.id).collect();
        assert_eq!(first_page, order[..10].to_vec());
    }

    #[tokio::test]
    async fn concurrent_requests_are_dropped_not_queued() {
        let store = Arc::new(GatedQuestions::seeded(1..=100));
        let loader = loader(store.clone(), 100, 50);

        let first = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load_page(1).await })
        };
        store.wait_for_requests(1).await;
        assert!(loader.is_loading());

        assert_eq!(loader.load_page(2).await.unwrap(), PageLoad::Busy);
        assert_eq!(loader.load_more().await.unwrap(), PageLoad::Busy);
        assert!(loader.check_prefetch(50).is_none());

        store.release();
        assert_eq!(
            first.await.unwrap().unwrap(),
            PageLoad::Loaded { page: 1, count: 50 }
        );
        assert_eq!(store.request_count(), 1);
        assert!(!loader.is_loading());
    }

    #[tokio::test]
    async fn prefetch_triggers_once_per_threshold_crossing() {
        let store = Arc::new(RecordingQuestions::seeded(1..=120));
        let loader = loader(store.clone(), 120, 50);
        loader.load_more().await.unwrap();

        for consumed in 1..45 {
            assert!(loader.check_prefetch(consumed).is_none(), "consumed {consumed}");
        }
        let handle = loader.check_prefetch(45).expect("prefetch at threshold");
        assert!(loader.check_prefetch(46).is_none());
        handle.await.unwrap().unwrap();

        assert_eq!(loader.loaded_count(), 100);
        assert_eq!(store.request_count(), 2);
        assert!(loader.check_prefetch(47).is_none());
    }

    #[tokio::test]
    async fn reinitialize_discards_stale_results() {
        let store = Arc::new(GatedQuestions::seeded(1..=100));
        let loader = loader(store.clone(), 100, 50);

        let stale = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load_page(1).await })
        };
        store.wait_for_requests(1).await;
        loader.initialize(question_ids(51..=100), 50, false);
        store.release();

        assert_eq!(stale.await.unwrap().unwrap(), PageLoad::Discarded);
        assert_eq!(loader.loaded_count(), 0);
        assert_eq!(loader.total_count(), 50);
    }

    #[tokio::test]
    async fn load_remaining_fetches_all_gaps_in_one_request() {
        let store = Arc::new(RecordingQuestions::seeded(1..=120));
        let loader = loader(store.clone(), 120, 50);
        loader.load_page(2).await.unwrap();

        let appended = loader.load_remaining().await.unwrap();
        assert_eq!(appended, 70);
        assert_eq!(loader.loaded_count(), 120);
        assert!(!loader.has_more());

        let requests = store.requests();
        assert_eq!(requests.len(), 2);
        let mut expected = question_ids(1..=50);
        expected.extend(question_ids(101..=120));
        assert_eq!(requests[1], expected);
    }

    #[tokio::test]
    async fn bulk_and_page_loads_never_duplicate() {
        let store = Arc::new(GatedQuestions::seeded(1..=100));
        let loader = loader(store.clone(), 100, 50);

        let page = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load_page(1).await })
        };
        store.wait_for_requests(1).await;
        let bulk = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.load_remaining().await })
        };
        store.wait_for_requests(2).await;
        store.release();

        let appended = bulk.await.unwrap().unwrap();
        let from_page = match page.await.unwrap().unwrap() {
            PageLoad::Loaded { count, .. } => count,
            PageLoad::Discarded => 0,
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(appended + from_page, 100);

        let mut loaded: Vec<_> = loader.loaded_questions().iter().map(|q| q.id).collect();
        loaded.sort();
        assert_eq!(loaded, question_ids(1..=100));
        assert!(!loader.has_more());
    }
}
