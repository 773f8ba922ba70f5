//! Keyset pagination over submissions ordered by `(ts DESC, id DESC)`.
//!
//! The relational backend expresses the same ordering in SQL; the KV backend
//! and the test doubles call [`paginate`] on a fully loaded record set.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use crate::models::Submission;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 50;

/// Position after the last record of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub ts: DateTime<Utc>,
    pub id: String,
}

impl Cursor {
    pub fn after(record: &Submission) -> Self {
        Self {
            ts: record.ts,
            id: record.id.clone(),
        }
    }

    /// Hex of `"<rfc3339>|<id>"`; URL safe and opaque to clients.
    pub fn encode(&self) -> String {
        let raw = format!(
            "{}|{}",
            self.ts.to_rfc3339_opts(SecondsFormat::Nanos, true),
            self.id
        );
        hex::encode(raw)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = hex::decode(token.trim()).context("cursor is not hex")?;
        let raw = String::from_utf8(bytes).context("cursor is not utf-8")?;
        let (ts, id) = raw
            .split_once('|')
            .ok_or_else(|| anyhow!("cursor has no separator"))?;
        if id.is_empty() {
            return Err(anyhow!("cursor has an empty id"));
        }
        let ts = DateTime::parse_from_rfc3339(ts)
            .context("cursor timestamp is not RFC 3339")?
            .with_timezone(&Utc);
        Ok(Self {
            ts,
            id: id.to_string(),
        })
    }

    /// True when `record` sorts strictly after this cursor in listing order.
    pub fn precedes(&self, record: &Submission) -> bool {
        (record.ts, record.id.as_str()) < (self.ts, self.id.as_str())
    }
}

/// Arguments of a `list` call.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub search: Option<String>,
    pub cursor: Option<Cursor>,
    pub limit: usize,
}

impl ListQuery {
    pub fn new(search: Option<String>, cursor: Option<Cursor>, limit: usize) -> Self {
        let search = search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Self {
            search,
            cursor,
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }
}

/// Listing order: newest first, ties broken by id descending.
pub fn listing_order(a: &Submission, b: &Submission) -> Ordering {
    b.ts.cmp(&a.ts).then_with(|| b.id.cmp(&a.id))
}

/// Case-insensitive substring match over the searchable fields.
pub fn matches_search(record: &Submission, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    let hit = |s: &str| s.to_lowercase().contains(&needle);
    hit(&record.name)
        || hit(&record.url)
        || hit(&record.description)
        || hit(&record.contact)
        || record.tags.iter().any(|t| hit(t))
        || record.disciplines.iter().any(|d| hit(d))
}

/// Sort, filter and slice an in-memory record set.
pub fn paginate(mut records: Vec<Submission>, query: &ListQuery) -> Vec<Submission> {
    records.retain(|r| {
        query
            .search
            .as_deref()
            .map_or(true, |needle| matches_search(r, needle))
            && query.cursor.as_ref().map_or(true, |c| c.precedes(r))
    });
    records.sort_by(listing_order);
    records.truncate(query.limit);
    records
}

/// One page of the admin listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub items: Vec<Submission>,
    pub next_cursor: Option<String>,
    pub complete: bool,
}

impl Page {
    pub fn from_items(items: Vec<Submission>, limit: usize) -> Self {
        let next_cursor = items.last().map(|r| Cursor::after(r).encode());
        let complete = items.len() < limit;
        Self {
            items,
            next_cursor,
            complete,
        }
    }
}
