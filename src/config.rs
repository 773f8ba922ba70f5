use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::{info, warn};

use crate::rate_limit::DEFAULT_LIMIT;
use crate::store::KvConfig;

const DEFAULT_LISTEN: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres { database_url: String },
    Kv(KvConfig),
}

impl StoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Postgres { .. } => "postgres",
            StoreBackend::Kv(_) => "kv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// Count recent records in the store (consistent across instances).
    Store,
    /// Per-process counters.
    Memory,
}

impl FromStr for RateLimitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "store" | "query" => Ok(RateLimitPolicy::Store),
            "memory" => Ok(RateLimitPolicy::Memory),
            other => Err(format!(
                "Unknown rate limit policy: {other}. Expected store or memory"
            )),
        }
    }
}

impl fmt::Display for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitPolicy::Store => write!(f, "store"),
            RateLimitPolicy::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    /// Empty means admin endpoints reject everything.
    pub admin_token: String,
    pub backend: StoreBackend,
    pub rate_limit: u32,
    pub rate_limit_policy: RateLimitPolicy,
    /// Empty allows any origin.
    pub allowed_origins: Vec<String>,
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.log_summary();
        Ok(config)
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| anyhow!("Missing required environment variable: {}", key))
        };

        let listen = get("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string())
            .parse::<SocketAddr>()
            .context("LISTEN_ADDR must be host:port")?;

        let backend = match get("STORE_BACKEND").as_deref().unwrap_or("postgres") {
            "postgres" | "pg" => StoreBackend::Postgres {
                database_url: require("DATABASE_URL")?,
            },
            "kv" => StoreBackend::Kv(KvConfig {
                api_base: get("CF_API_BASE")
                    .unwrap_or_else(|| crate::store::KV_API_BASE.to_string()),
                account_id: require("CF_ACCOUNT_ID")?,
                namespace_id: require("CF_KV_NAMESPACE_ID")?,
                api_token: require("CF_API_TOKEN")?,
                prefix: get("CF_KV_PREFIX")
                    .unwrap_or_else(|| crate::store::KV_PREFIX.to_string()),
            }),
            other => bail!("Unknown STORE_BACKEND: {other}. Expected postgres or kv"),
        };

        let rate_limit = match get("SUBMIT_RATE_LIMIT") {
            Some(v) => v
                .parse::<u32>()
                .with_context(|| format!("SUBMIT_RATE_LIMIT must be a number, got {v}"))?,
            None => DEFAULT_LIMIT,
        };

        let rate_limit_policy = match get("RATE_LIMIT_POLICY") {
            Some(v) => v
                .parse::<RateLimitPolicy>()
                .map_err(|e| anyhow!(e))?,
            None => RateLimitPolicy::Store,
        };

        let allowed_origins = get("SUBMIT_ALLOW_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            listen,
            admin_token: get("ADMIN_TOKEN").unwrap_or_default(),
            backend,
            rate_limit,
            rate_limit_policy,
            allowed_origins,
            webhook_url: get("SLACK_WEBHOOK_URL"),
        })
    }

    fn log_summary(&self) {
        info!(
            backend = self.backend.name(),
            rate_limit = self.rate_limit,
            policy = %self.rate_limit_policy,
            origins = self.allowed_origins.len(),
            webhook = self.webhook_url.is_some(),
            "Configuration loaded"
        );
        if self.admin_token.is_empty() {
            warn!("ADMIN_TOKEN is not set; admin endpoints will reject every request");
        }
    }
}
