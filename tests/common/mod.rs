#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use navdesk::app::{build_router, AppState};
use navdesk::error::StoreError;
use navdesk::models::{Submission, SubmissionStatus};
use navdesk::notify::Notifier;
use navdesk::rate_limit::{MemoryLimiter, SubmissionLimiter};
use navdesk::store::{paginate, ListQuery, RecordStore};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const ADMIN_TOKEN: &str = "moderator-secret";

#[derive(Default)]
pub struct FakeStore {
    pub records: Mutex<Vec<Submission>>,
    pub calls: AtomicUsize,
    pub fail_inserts: bool,
}

impl FakeStore {
    pub fn with_records(records: Vec<Submission>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_inserts: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<Submission> {
        self.records.lock().unwrap().clone()
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl RecordStore for FakeStore {
    async fn insert(&self, record: &Submission) -> Result<(), StoreError> {
        self.touch();
        if self.fail_inserts {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::DuplicateId(record.id.clone()));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Submission, StoreError> {
        self.touch();
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(
        &self,
        id: &str,
        status: SubmissionStatus,
        note: &str,
    ) -> Result<Submission, StoreError> {
        self.touch();
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.status = status;
        record.admin_note = note.to_string();
        record.admin_at = Some(Utc::now());
        Ok(record.clone())
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Submission>, StoreError> {
        self.touch();
        Ok(paginate(self.snapshot(), query))
    }

    async fn count_since(&self, ip: &str, since: DateTime<Utc>) -> Result<u64, StoreError> {
        self.touch();
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.ip == ip && r.ts > since)
            .count() as u64)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notified: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, record: &Submission) {
        self.notified.lock().unwrap().push(record.id.clone());
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<FakeStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn test_app(store: FakeStore) -> TestApp {
    test_app_with(store, Arc::new(MemoryLimiter::new(100)), Vec::new())
}

pub fn test_app_with(
    store: FakeStore,
    limiter: Arc<dyn SubmissionLimiter>,
    allowed_origins: Vec<String>,
) -> TestApp {
    let store = Arc::new(store);
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState {
        store: store.clone(),
        limiter,
        notifier: notifier.clone(),
        admin_token: ADMIN_TOKEN.to_string(),
        allowed_origins: Arc::new(allowed_origins),
    };
    TestApp {
        router: build_router(state),
        store,
        notifier,
    }
}

pub fn valid_payload() -> Value {
    json!({
        "name": "Open Syllabus",
        "url": "https://opensyllabus.org",
        "description": "A database of millions of syllabi.",
        "tags": ["syllabi", "open data"],
        "disciplines": ["Education"],
        "contact": "editor@example.org",
        "page": "https://nav.example.edu/#/resources",
        "captcha": { "a": 3, "b": 4, "op": "+", "answer": 7 }
    })
}

pub fn submit_request(body: &Value, ip: &str) -> Request<Body> {
    Request::post("/submissions")
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip)
        .header("user-agent", "integration-test/1.0")
        .body(Body::from(body.to_string()))
        .expect("failed to build request")
}

pub fn admin_get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("x-admin-token", ADMIN_TOKEN)
        .body(Body::empty())
        .expect("failed to build request")
}

pub fn admin_update(body: &Value) -> Request<Body> {
    Request::post("/admin/submissions/update")
        .header("content-type", "application/json")
        .header("x-admin-token", ADMIN_TOKEN)
        .body(Body::from(body.to_string()))
        .expect("failed to build request")
}

pub async fn body_json(res: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("body is not JSON")
}

pub fn record(id: &str, offset_secs: i64, ip: &str) -> Submission {
    Submission {
        id: id.to_string(),
        name: format!("Resource {id}"),
        url: format!("https://example.org/{id}"),
        description: String::new(),
        tags: vec![],
        disciplines: vec![],
        contact: String::new(),
        page: String::new(),
        ip: ip.to_string(),
        user_agent: String::new(),
        ts: Utc.timestamp_opt(1_710_000_000 + offset_secs, 0).unwrap(),
        status: SubmissionStatus::Pending,
        admin_note: String::new(),
        admin_at: None,
    }
}
