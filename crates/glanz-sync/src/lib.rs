//! Import pipeline orchestration: fetch one listing page, extract, persist.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use glanz_adapters::{
    AdapterContext, CategoryListingAdapter, FetchedPage, ListingAdapter, GLANZBRUCH_LISTING_URL,
    GLANZBRUCH_SOURCE_ID,
};
use glanz_core::DEFAULT_CATEGORY;
use glanz_storage::{HttpClientConfig, HttpFetcher, PgProductStore, ProductSink};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "glanz-sync";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub database_url: Option<String>,
    pub source_id: String,
    pub listing_url: String,
    pub category: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            source_id: lookup("GLANZ_SOURCE_ID").unwrap_or_else(|| GLANZBRUCH_SOURCE_ID.to_string()),
            listing_url: lookup("GLANZ_LISTING_URL")
                .unwrap_or_else(|| GLANZBRUCH_LISTING_URL.to_string()),
            category: lookup("GLANZ_CATEGORY").unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            user_agent: lookup("GLANZ_USER_AGENT").unwrap_or_else(|| "glanz-import/0.1".to_string()),
            http_timeout_secs: lookup("GLANZ_HTTP_TIMEOUT_SECS")
                .map_or(DEFAULT_HTTP_TIMEOUT_SECS, |raw| timeout_secs_or_default(&raw)),
        }
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow!("DATABASE_URL is not set; store credentials must come from the environment"))
    }
}

/// Positive whole seconds. Anything else falls back to the default with a warning.
fn timeout_secs_or_default(raw: &str) -> u64 {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => secs,
        _ => {
            warn!(
                value = raw,
                default = DEFAULT_HTTP_TIMEOUT_SECS,
                "ignoring invalid GLANZ_HTTP_TIMEOUT_SECS"
            );
            DEFAULT_HTTP_TIMEOUT_SECS
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub listing_url: String,
    pub content_hash: String,
    pub listings_found: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub inserted_ids: Vec<Uuid>,
}

pub struct ImportPipeline {
    http: HttpFetcher,
    adapter: CategoryListingAdapter,
}

impl ImportPipeline {
    pub fn new(config: &ImportConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })?;
        let adapter = CategoryListingAdapter::new(
            config.source_id.clone(),
            config.listing_url.clone(),
            config.category.clone(),
        );
        Ok(Self { http, adapter })
    }

    pub fn adapter(&self) -> &CategoryListingAdapter {
        &self.adapter
    }

    /// Fetch, parse and persist in one pass. A fetch failure is fatal.
    pub async fn run_once(&self, sink: &mut dyn ProductSink) -> Result<ImportRunSummary> {
        let run_id = Uuid::new_v4();
        let ctx = AdapterContext { run_id };
        let page = self
            .adapter
            .fetch_listing(&self.http, &ctx)
            .await
            .with_context(|| format!("fetching listing page {}", self.adapter.listing_url()))?;
        self.import_page(run_id, &page, sink).await
    }

    /// Parse an already fetched page and hand every valid record to `sink` as one batch.
    pub async fn import_page(
        &self,
        run_id: Uuid,
        page: &FetchedPage,
        sink: &mut dyn ProductSink,
    ) -> Result<ImportRunSummary> {
        let started_at = Utc::now();
        let parsed = self
            .adapter
            .parse_listing(page)
            .with_context(|| format!("parsing listing page {}", page.url))?;

        for rejected in &parsed.rejected {
            warn!(
                %run_id,
                position = rejected.position,
                name = rejected.name.as_deref().unwrap_or_default(),
                error = %rejected.error,
                "skipping listing"
            );
        }

        let inserted = if parsed.products.is_empty() {
            Vec::new()
        } else {
            sink.insert_batch(parsed.products)
                .await
                .context("persisting product batch")?
        };

        let summary = ImportRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            listing_url: page.url.clone(),
            content_hash: page.content_hash.clone(),
            listings_found: parsed.listings_found,
            skipped: parsed.rejected.len(),
            inserted: inserted.len(),
            inserted_ids: inserted.iter().map(|p| p.id).collect(),
        };
        info!(
            %run_id,
            source_id = self.adapter.source_id(),
            listings = summary.listings_found,
            skipped = summary.skipped,
            inserted = summary.inserted,
            "import run finished"
        );
        Ok(summary)
    }
}

/// Full run against Postgres. The store is released on every exit path.
pub async fn run_import_once_from_env() -> Result<ImportRunSummary> {
    let config = ImportConfig::from_env();
    let database_url = config.require_database_url()?;
    let pipeline = ImportPipeline::new(&config)?;

    let mut store = PgProductStore::connect(database_url)
        .await
        .context("connecting to product store")?;
    let result = pipeline.run_once(&mut store).await;
    store.close().await;
    result
}
