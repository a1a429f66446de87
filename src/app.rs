//! Service wiring shared by the HTTP gateway and the CLI.

use std::sync::Arc;

use crate::admin::AdminService;
use crate::advisor::cache::FilterCache;
use crate::advisor::feed::AdvisorFeed;
use crate::auth::AuthService;
use crate::backend::{self, Backend};
use crate::config::{Config, FeedConfig};
use crate::email::{Notifier, mailer_from_config};
use crate::error::StartupError;
use crate::lists::{self, ListService, NamedListStore};
use crate::reports::ReportService;

/// Every application service, built once and shared behind `Arc`s.
#[derive(Clone)]
pub struct App {
    pub backend: Backend,
    pub cache: Arc<FilterCache>,
    pub notifier: Arc<Notifier>,
    pub auth: Arc<AuthService>,
    pub admin: Arc<AdminService>,
    pub lists: Arc<ListService>,
    pub reports: Arc<ReportService>,
    pub page_size: usize,
}

impl App {
    /// Connect the configured backend, list store and mailer.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let backend = backend::connect_from_config(&config.backend).await?;
        let store = lists::open_store(&config.lists).await?;
        let mailer = mailer_from_config(&config.email)?;
        let notifier = Notifier::new(
            mailer,
            &config.email.app_url,
            config.email.admin_address.clone(),
        )?;
        tracing::info!(
            backend = config.backend.kind.as_str(),
            lists = %config.lists.path.display(),
            "Application services ready"
        );
        Ok(Self::from_parts(backend, store, Arc::new(notifier), &config.feed))
    }

    /// Assemble from already-built collaborators.
    pub fn from_parts(
        backend: Backend,
        store: Arc<dyn NamedListStore>,
        notifier: Arc<Notifier>,
        feed: &FeedConfig,
    ) -> Self {
        let cache = Arc::new(FilterCache::new(feed.cache_capacity));
        let lists = Arc::new(ListService::new(store));
        let auth = Arc::new(AuthService::new(
            backend.auth.clone(),
            backend.profiles.clone(),
            backend.admin.clone(),
            notifier.clone(),
        ));
        let admin = Arc::new(AdminService::new(
            backend.clone(),
            cache.clone(),
            notifier.clone(),
        ));
        let reports = Arc::new(ReportService::new(
            lists.clone(),
            backend.advisors.clone(),
            cache.clone(),
            feed.page_size,
        ));
        Self {
            backend,
            cache,
            notifier,
            auth,
            admin,
            lists,
            reports,
            page_size: feed.page_size,
        }
    }

    /// A fresh feed over the advisor table.
    pub fn feed(&self) -> AdvisorFeed {
        AdvisorFeed::new(self.backend.advisors.clone(), self.page_size)
    }
}
