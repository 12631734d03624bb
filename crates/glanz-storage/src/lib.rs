//! HTTP fetch + product persistence for the Glanzbruch importer.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glanz_core::{NewProduct, Product};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "glanz-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch failed")]
    Request(#[from] reqwest::Error),
    #[error("fetch failed: http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-attempt GET client. A failed fetch leaves nothing to import, so
/// callers treat every error as fatal.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, run_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        self.fetch_once(url).instrument(span).await
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = resp.bytes().await?.to_vec();
        let content_hash = sha256_hex(&body);
        info!(status = status.as_u16(), bytes = body.len(), %content_hash, "fetched listing page");

        Ok(FetchedResponse {
            status,
            final_url,
            content_type,
            body,
            content_hash,
            fetched_at: Utc::now(),
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed")]
    Connect(#[source] sqlx::Error),
    #[error("schema migration failed")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("insert of record {index} ({name}) failed")]
    Insert {
        index: usize,
        name: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("store query failed")]
    Query(#[source] sqlx::Error),
}

/// Destination for normalized records. Implementations assign a fresh id to
/// every record and persist the whole batch or none of it.
#[async_trait]
pub trait ProductSink: Send {
    async fn insert_batch(&mut self, records: Vec<NewProduct>) -> Result<Vec<Product>, StoreError>;
}

const INSERT_PRODUCT_SQL: &str = r#"
    INSERT INTO products (
        id, name, description, price, category, image_urls, sku
    ) VALUES ($1, $2, $3, $4::numeric, $5, $6, $7)
"#;

#[derive(Debug, Clone)]
pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    /// Connects a single-connection pool; the importer never needs more.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(StoreError::Connect)?;
        debug!("store connection established");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("products schema is up to date");
        Ok(())
    }

    pub async fn list_by_category(&self, category: &str) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, price::float8 AS price, category, image_urls, sku
              FROM products
             WHERE category = $1
             ORDER BY name
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        rows.iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)
    }

    /// Release the pool. Safe to call after a failed batch.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("store connection released");
    }
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        category: row.try_get("category")?,
        image_urls: row.try_get("image_urls")?,
        sku: row.try_get("sku")?,
    })
}

#[async_trait]
impl ProductSink for PgProductStore {
    async fn insert_batch(&mut self, records: Vec<NewProduct>) -> Result<Vec<Product>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::Query)?;
        let mut inserted = Vec::with_capacity(records.len());

        for (index, record) in records.into_iter().enumerate() {
            let product = Product::assign_id(record);
            // Dropping `tx` on the error path rolls back earlier rows.
            sqlx::query(INSERT_PRODUCT_SQL)
                .bind(product.id)
                .bind(&product.name)
                .bind(&product.description)
                .bind(product.price)
                .bind(&product.category)
                .bind(&product.image_urls)
                .bind(product.sku.as_deref())
                .execute(&mut *tx)
                .await
                .map_err(|source| StoreError::Insert {
                    index,
                    name: product.name.clone(),
                    source,
                })?;
            inserted.push(product);
        }

        tx.commit().await.map_err(StoreError::Query)?;
        info!(rows = inserted.len(), "committed product batch");
        Ok(inserted)
    }
}

/// In-process sink for dry runs and tests. Rows accumulate across batches.
#[derive(Debug, Default, Clone)]
pub struct MemoryProductSink {
    products: Vec<Product>,
}

impl MemoryProductSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn into_products(self) -> Vec<Product> {
        self.products
    }
}

#[async_trait]
impl ProductSink for MemoryProductSink {
    async fn insert_batch(&mut self, records: Vec<NewProduct>) -> Result<Vec<Product>, StoreError> {
        let inserted = records
            .into_iter()
            .map(Product::assign_id)
            .collect::<Vec<_>>();
        self.products.extend(inserted.iter().cloned());
        Ok(inserted)
    }
}
