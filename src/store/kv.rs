use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{paginate, ListQuery, RecordStore, MAX_PAGE_SIZE};
use crate::error::StoreError;
use crate::models::{Submission, SubmissionStatus};

pub const KV_API_BASE: &str = "https://api.cloudflare.com/client/v4";
pub const KV_PREFIX: &str = "submissions:";
const KEY_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvConfig {
    pub api_base: String,
    pub account_id: String,
    pub namespace_id: String,
    pub api_token: String,
    pub prefix: String,
}

/// Submissions stored one JSON value per key in a Workers KV namespace.
///
/// KV has no query support: listing and counting load every value under the
/// prefix and work on them in memory. Fine for a moderation queue of a few
/// thousand entries, not beyond.
#[derive(Debug, Clone)]
pub struct KvStore {
    client: Client,
    cfg: Arc<KvConfig>,
    fetch_permits: Arc<Semaphore>,
}

#[derive(Debug, Deserialize)]
struct KeyListResponse {
    #[serde(default)]
    success: bool,
    result: Option<Vec<KeyEntry>>,
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    cursor: Option<String>,
}

impl KvStore {
    pub fn new(cfg: KvConfig) -> Result<Self> {
        let user_agent = format!("navdesk/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build KV HTTP client")?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
            fetch_permits: Arc::new(Semaphore::new(MAX_PAGE_SIZE)),
        })
    }

    fn namespace_url(&self) -> String {
        format!(
            "{}/accounts/{}/storage/kv/namespaces/{}",
            self.cfg.api_base.trim_end_matches('/'),
            self.cfg.account_id,
            self.cfg.namespace_id
        )
    }

    fn key_for(&self, id: &str) -> String {
        format!("{}{}", self.cfg.prefix, id)
    }

    fn value_url(&self, key: &str) -> String {
        format!("{}/values/{}", self.namespace_url(), urlencoding::encode(key))
    }

    async fn read_key(&self, key: &str) -> Result<Option<Submission>, StoreError> {
        let resp = self
            .client
            .get(self.value_url(key))
            .bearer_auth(&self.cfg.api_token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StoreError::Upstream {
                context: "kv get".to_string(),
                status: resp.status().as_u16(),
            });
        }
        let body = resp.bytes().await?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|_| StoreError::Corrupt(key.to_string()))
    }

    async fn write(&self, record: &Submission) -> Result<(), StoreError> {
        let body = serde_json::to_vec(record).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let resp = self
            .client
            .put(self.value_url(&self.key_for(&record.id)))
            .bearer_auth(&self.cfg.api_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Upstream {
                context: "kv put".to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Every key under the prefix, following the list cursor to the end.
    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let url = format!("{}/keys", self.namespace_url());
        let limit = KEY_PAGE_SIZE.to_string();
        let mut keys = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(&url)
                .bearer_auth(&self.cfg.api_token)
                .query(&[
                    ("prefix", self.cfg.prefix.as_str()),
                    ("limit", limit.as_str()),
                ]);
            if let Some(c) = &cursor {
                req = req.query(&[("cursor", c.as_str())]);
            }
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(StoreError::Upstream {
                    context: "kv list".to_string(),
                    status: resp.status().as_u16(),
                });
            }
            let body = resp.bytes().await?;
            let (page, next) = parse_key_page(&body)?;
            keys.extend(page);
            match next {
                Some(c) if cursor.as_deref() != Some(c.as_str()) => cursor = Some(c),
                _ => break,
            }
        }
        debug!(count = keys.len(), "Listed KV keys");
        Ok(keys)
    }

    /// Fetch all records concurrently, at most `MAX_PAGE_SIZE` requests in flight.
    async fn load_all(&self) -> Result<Vec<Submission>, StoreError> {
        let keys = self.list_keys().await?;
        let mut tasks = JoinSet::new();
        for key in keys {
            let store = self.clone();
            let permits = self.fetch_permits.clone();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                store.read_key(&key).await
            });
        }

        let mut records = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(record))) => records.push(record),
                // Removed between list and get.
                Ok(Ok(None)) => {}
                Ok(Err(StoreError::Corrupt(key))) => {
                    warn!("Skipping undecodable KV value {}", key);
                }
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(StoreError::Unavailable(format!("fetch task failed: {e}"))),
            }
        }
        Ok(records)
    }
}

fn parse_key_page(body: &[u8]) -> Result<(Vec<String>, Option<String>), StoreError> {
    let parsed: KeyListResponse = serde_json::from_slice(body)
        .map_err(|e| StoreError::Unavailable(format!("kv list response: {e}")))?;
    if !parsed.success {
        return Err(StoreError::Upstream {
            context: "kv list".to_string(),
            status: 200,
        });
    }
    let next = parsed
        .result_info
        .and_then(|i| i.cursor)
        .filter(|c| !c.is_empty());
    let keys = parsed
        .result
        .unwrap_or_default()
        .into_iter()
        .map(|k| k.name)
        .collect();
    Ok((keys, next))
}

#[async_trait]
impl RecordStore for KvStore {
    async fn insert(&self, record: &Submission) -> Result<(), StoreError> {
        if self.read_key(&self.key_for(&record.id)).await?.is_some() {
            return Err(StoreError::DuplicateId(record.id.clone()));
        }
        self.write(record).await
    }

    async fn get(&self, id: &str) -> Result<Submission, StoreError> {
        self.read_key(&self.key_for(id))
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(
        &self,
        id: &str,
        status: SubmissionStatus,
        note: &str,
    ) -> Result<Submission, StoreError> {
        let mut record = self.get(id).await?;
        record.status = status;
        record.admin_note = note.to_string();
        record.admin_at = Some(Utc::now());
        self.write(&record).await?;
        Ok(record)
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Submission>, StoreError> {
        let records = self.load_all().await?;
        Ok(paginate(records, query))
    }

    async fn count_since(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let records = self.load_all().await?;
        Ok(records.iter().filter(|r| r.ip == ip && r.ts > since).count() as u64)
    }
}
