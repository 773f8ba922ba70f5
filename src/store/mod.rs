use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::StoreBackend;
use crate::error::StoreError;
use crate::models::{Submission, SubmissionStatus};

mod kv;
mod page;
mod postgres;

pub use kv::{KvConfig, KvStore, KV_API_BASE, KV_PREFIX};
pub use page::{
    listing_order, matches_search, paginate, Cursor, ListQuery, Page, DEFAULT_PAGE_SIZE,
    MAX_PAGE_SIZE,
};
pub use postgres::PgStore;

/// Persistence for submissions. Exactly one backend is active per process.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: &Submission) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Submission, StoreError>;
    /// Set moderation fields only; `ts` and submitter data are never touched.
    async fn update(
        &self,
        id: &str,
        status: SubmissionStatus,
        note: &str,
    ) -> Result<Submission, StoreError>;
    async fn list(&self, query: &ListQuery) -> Result<Vec<Submission>, StoreError>;
    /// Records from `ip` created strictly after `since`.
    async fn count_since(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Build the configured backend.
pub async fn connect(backend: &StoreBackend) -> anyhow::Result<Arc<dyn RecordStore>> {
    match backend {
        StoreBackend::Postgres { database_url } => {
            let store = PgStore::connect(database_url).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Kv(cfg) => Ok(Arc::new(KvStore::new(cfg.clone())?)),
    }
}
