//! Paged advisor retrieval with load-more accumulation.
//!
//! The feed owns the accumulated rows for one filter. `apply` starts a new
//! generation; any response that finishes after a newer `apply` is dropped,
//! so a slow page-1 fetch can never overwrite rows for a later filter.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::advisor::filter::FilterState;
use crate::advisor::{Advisor, AdvisorId};
use crate::backend::{AdvisorQuery, AdvisorStore};

/// Observable feed state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedSnapshot {
    pub filter: FilterState,
    pub rows: Vec<Advisor>,
    pub total: u64,
    pub loading: bool,
    pub loading_more: bool,
    pub has_more: bool,
    pub error: Option<String>,
}

impl FeedSnapshot {
    /// Finished loading with nothing to show.
    pub fn is_empty_result(&self) -> bool {
        !self.loading && self.error.is_none() && self.rows.is_empty()
    }
}

/// What a fetch call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Rows were stored. `added` counts rows new to the feed.
    Loaded { added: usize },
    /// A fetch is already in flight or no pages remain.
    Skipped,
    /// A newer `apply` superseded this fetch.
    Stale,
    /// The fetch failed; the message is in the snapshot.
    Failed,
}

#[derive(Default)]
struct FeedState {
    snapshot: FeedSnapshot,
    /// Next backend offset. Tracks rows returned, not rows kept after dedup.
    offset: usize,
    /// Bumped by every `apply`; a fetch only lands if it still matches.
    generation: u64,
}

pub struct AdvisorFeed {
    store: Arc<dyn AdvisorStore>,
    page_size: usize,
    state: Mutex<FeedState>,
}

fn seen_keys(rows: &[Advisor]) -> (HashSet<AdvisorId>, HashSet<String>) {
    let ids = rows.iter().filter_map(|a| a.id.clone()).collect();
    let emails = rows.iter().filter_map(Advisor::normalized_email).collect();
    (ids, emails)
}

impl AdvisorFeed {
    pub fn new(store: Arc<dyn AdvisorStore>, page_size: usize) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
            state: Mutex::new(FeedState::default()),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        // Poisoning only happens if a panic escaped while the lock was held;
        // the state is plain data, so keep using it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.lock().snapshot.clone()
    }

    /// Reset to `filter` and fetch page 1 with the total count.
    pub async fn apply(&self, filter: FilterState) -> LoadOutcome {
        let filter = filter.normalized();
        let generation = {
            let mut state = self.lock();
            let generation = state.generation + 1;
            *state = FeedState {
                generation,
                ..FeedState::default()
            };
            state.snapshot.filter = filter.clone();
            state.snapshot.loading = true;
            generation
        };

        let query = AdvisorQuery::first_page(filter, self.page_size);
        let result = self.store.query_advisors(&query).await;

        let mut state = self.lock();
        if state.generation != generation {
            tracing::debug!(generation, "Discarding stale first page");
            return LoadOutcome::Stale;
        }
        state.snapshot.loading = false;
        match result {
            Ok(page) => {
                let returned = page.rows.len();
                let total = page.total.unwrap_or(returned as u64);
                let mut rows = Vec::with_capacity(returned);
                let (mut ids, mut emails) = (HashSet::new(), HashSet::new());
                for row in page.rows {
                    if Self::admit(&row, &mut ids, &mut emails) {
                        rows.push(row);
                    }
                }
                let added = rows.len();
                state.offset = returned;
                state.snapshot.rows = rows;
                state.snapshot.total = total;
                state.snapshot.has_more = self.more_remaining(returned, returned, added, total);
                LoadOutcome::Loaded { added }
            }
            Err(e) => {
                tracing::warn!("Advisor query failed: {}", e);
                state.snapshot.rows.clear();
                state.snapshot.total = 0;
                state.snapshot.has_more = false;
                state.snapshot.error = Some(e.to_string());
                LoadOutcome::Failed
            }
        }
    }

    /// Fetch the next window and append unseen rows.
    pub async fn load_more(&self) -> LoadOutcome {
        let (generation, query) = {
            let mut state = self.lock();
            let snap = &state.snapshot;
            if snap.loading || snap.loading_more || !snap.has_more {
                return LoadOutcome::Skipped;
            }
            let query = AdvisorQuery {
                filter: snap.filter.clone(),
                offset: state.offset,
                limit: self.page_size,
                with_count: false,
            };
            state.snapshot.loading_more = true;
            (state.generation, query)
        };

        let result = self.store.query_advisors(&query).await;

        let mut state = self.lock();
        if state.generation != generation {
            tracing::debug!(generation, "Discarding stale page at offset {}", query.offset);
            return LoadOutcome::Stale;
        }
        state.snapshot.loading_more = false;
        match result {
            Ok(page) => {
                let returned = page.rows.len();
                if let Some(total) = page.total {
                    state.snapshot.total = total;
                }
                let (mut ids, mut emails) = seen_keys(&state.snapshot.rows);
                let mut added = 0;
                for row in page.rows {
                    if Self::admit(&row, &mut ids, &mut emails) {
                        state.snapshot.rows.push(row);
                        added += 1;
                    }
                }
                state.offset += returned;
                let (offset, kept, total) =
                    (state.offset, state.snapshot.rows.len(), state.snapshot.total);
                state.snapshot.has_more = self.more_remaining(returned, offset, kept, total);
                LoadOutcome::Loaded { added }
            }
            Err(e) => {
                tracing::warn!("Advisor load-more failed: {}", e);
                state.snapshot.rows.clear();
                state.snapshot.has_more = false;
                state.snapshot.error = Some(e.to_string());
                LoadOutcome::Failed
            }
        }
    }

    /// Keep loading until no pages remain. Returns the final snapshot.
    pub async fn load_all(&self) -> FeedSnapshot {
        while let LoadOutcome::Loaded { .. } = self.load_more().await {}
        self.snapshot()
    }

    /// Record a row's identity; false when the feed already holds it.
    fn admit(row: &Advisor, ids: &mut HashSet<AdvisorId>, emails: &mut HashSet<String>) -> bool {
        if let Some(ref id) = row.id
            && ids.contains(id)
        {
            return false;
        }
        let email = row.normalized_email();
        if let Some(ref email) = email
            && emails.contains(email)
        {
            return false;
        }
        if let Some(id) = row.id.clone() {
            ids.insert(id);
        }
        if let Some(email) = email {
            emails.insert(email);
        }
        true
    }

    fn more_remaining(&self, returned: usize, offset: usize, kept: usize, total: u64) -> bool {
        returned >= self.page_size && (offset as u64) < total && (kept as u64) < total
    }
}
