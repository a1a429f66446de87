//! Saving filtered advisor views as named reports, and exporting them.

use std::sync::Arc;

use crate::advisor::cache::FilterCache;
use crate::advisor::filter::FilterState;
use crate::advisor::{Advisor, DISPLAY_HEADERS};
use crate::backend::{AdvisorQuery, AdvisorStore};
use crate::error::ListError;
use crate::lists::{ListCollection, ListService, ListSummary, validate_name};

/// Upper bound on rows captured by a single report.
pub const MAX_REPORT_ROWS: usize = 10_000;

pub struct ReportService {
    lists: Arc<ListService>,
    advisors: Arc<dyn AdvisorStore>,
    cache: Arc<FilterCache>,
    window: usize,
}

impl ReportService {
    /// `window` is the page size used when re-issuing a filtered query.
    pub fn new(
        lists: Arc<ListService>,
        advisors: Arc<dyn AdvisorStore>,
        cache: Arc<FilterCache>,
        window: usize,
    ) -> Self {
        Self {
            lists,
            advisors,
            cache,
            window: window.max(1),
        }
    }

    /// Every row matching `filter`, from the cache when possible.
    pub async fn filtered_rows(&self, filter: &FilterState) -> Result<Arc<Vec<Advisor>>, ListError> {
        let filter = filter.normalized();
        let key = filter.key();
        if let Some(rows) = self.cache.get(&key) {
            tracing::debug!(rows = rows.len(), "Report rows served from filter cache");
            return Ok(rows);
        }

        let epoch = self.cache.epoch();
        let mut rows: Vec<Advisor> = Vec::new();
        loop {
            let page = self
                .advisors
                .query_advisors(&AdvisorQuery {
                    filter: filter.clone(),
                    offset: rows.len(),
                    limit: self.window,
                    with_count: false,
                })
                .await?;
            let returned = page.rows.len();
            rows.extend(page.rows);
            if returned < self.window {
                break;
            }
            if rows.len() >= MAX_REPORT_ROWS {
                tracing::warn!(limit = MAX_REPORT_ROWS, "Report truncated at row limit");
                rows.truncate(MAX_REPORT_ROWS);
                break;
            }
        }

        let rows = Arc::new(rows);
        if !self.cache.insert_if_current(epoch, key, rows.clone()) {
            tracing::debug!("Advisor data changed during report fetch; result not cached");
        }
        Ok(rows)
    }

    /// Store the current filtered view under a new report name. An existing
    /// name fails before any rows are fetched and is never overwritten.
    pub async fn save_filtered_report(
        &self,
        owner: &str,
        name: &str,
        filter: &FilterState,
    ) -> Result<ListSummary, ListError> {
        let name = validate_name(name)?;
        if self
            .lists
            .exists(owner, ListCollection::Reports, &name)
            .await?
        {
            return Err(ListError::NameTaken(name));
        }
        let rows = self.filtered_rows(filter).await?;
        let summary = self
            .lists
            .create_list(owner, ListCollection::Reports, &name, rows.as_ref().clone())
            .await?;
        tracing::info!(owner, report = %summary.name, rows = summary.count, "Report saved");
        Ok(summary)
    }

    /// Store explicitly chosen rows as a new report.
    pub async fn save_rows_as_report(
        &self,
        owner: &str,
        name: &str,
        rows: Vec<Advisor>,
    ) -> Result<ListSummary, ListError> {
        self.lists
            .create_list(owner, ListCollection::Reports, name, rows)
            .await
    }

    /// Render a stored report as CSV with display headers.
    pub async fn export_csv(&self, owner: &str, name: &str) -> Result<String, ListError> {
        let rows = self
            .lists
            .get_list(owner, ListCollection::Reports, name)
            .await?;
        rows_to_csv(&rows)
    }
}

pub fn rows_to_csv(rows: &[Advisor]) -> Result<String, ListError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(DISPLAY_HEADERS)
        .map_err(|e| ListError::Serialization(e.to_string()))?;
    for row in rows {
        writer
            .write_record(row.display_values())
            .map_err(|e| ListError::Serialization(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ListError::Serialization(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ListError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::advisor::sample_advisor;
    use crate::backend::memory::MemoryBackend;
    use crate::lists::MemoryListStore;

    fn ontario() -> FilterState {
        FilterState {
            provinces: BTreeSet::from(["Ontario".to_string()]),
            ..Default::default()
        }
    }

    fn setup(window: usize, count: usize) -> (Arc<MemoryBackend>, Arc<FilterCache>, ReportService) {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed_advisors((0..count).map(|i| {
            sample_advisor(&format!("First{i}"), &format!("Last{i:03}"), Some(&format!("a{i}@x.ca")))
        }));
        let cache = Arc::new(FilterCache::new(4));
        let lists = Arc::new(ListService::new(Arc::new(MemoryListStore::new())));
        let reports = ReportService::new(lists, backend.clone(), cache.clone(), window);
        (backend, cache, reports)
    }

    #[tokio::test]
    async fn fetches_in_windows_until_a_short_page() {
        let (backend, _cache, reports) = setup(4, 10);
        let rows = reports.filtered_rows(&ontario()).await.expect("rows");
        assert_eq!(rows.len(), 10);
        let offsets: Vec<usize> = backend.recorded_queries().iter().map(|q| q.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
    }

    #[tokio::test]
    async fn second_save_reuses_the_cache() {
        let (backend, cache, reports) = setup(50, 3);
        reports
            .save_filtered_report("u1", "First", &ontario())
            .await
            .expect("save");
        let issued = backend.recorded_queries().len();
        assert_eq!(cache.len(), 1);

        let summary = reports
            .save_filtered_report("u1", "Second", &ontario())
            .await
            .expect("save");
        assert_eq!(summary.count, 3);
        assert_eq!(backend.recorded_queries().len(), issued);
    }

    #[tokio::test]
    async fn taken_name_fails_without_overwriting() {
        let (backend, _cache, reports) = setup(50, 3);
        reports
            .save_rows_as_report("u1", "Mine", vec![sample_advisor("Only", "One", None)])
            .await
            .expect("save");
        let before = backend.recorded_queries().len();

        let err = reports
            .save_filtered_report("u1", " Mine ", &ontario())
            .await
            .expect_err("taken");
        assert!(matches!(err, ListError::NameTaken(ref n) if n == "Mine"));
        assert!(err.to_string().contains("already exists"));
        assert_eq!(backend.recorded_queries().len(), before);

        let csv = reports.export_csv("u1", "Mine").await.expect("export");
        assert_eq!(csv.lines().count(), 2);
    }

    #[test]
    fn csv_has_display_headers_and_quotes_commas() {
        let mut advisor = sample_advisor("Jane", "Smith", Some("jane@example.com"));
        advisor.firm = "Smith, Jones & Co".to_string();
        let csv = rows_to_csv(&[advisor]).expect("csv");
        let mut lines = csv.lines();
        assert!(lines.next().expect("header").starts_with("First Name,Last Name"));
        assert!(lines.next().expect("row").contains("\"Smith, Jones & Co\""));
    }
}
