mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use navdesk::app::{build_router, AppState};
use navdesk::models::SubmissionStatus;
use navdesk::notify::SlackNotifier;
use navdesk::rate_limit::{MemoryLimiter, StoreLimiter};
use serde_json::json;
use std::sync::Arc;
use tower::util::ServiceExt;

#[tokio::test]
async fn accepted_submission_is_stored_pending_and_listed() {
    let app = test_app(FakeStore::default());

    let res = app
        .router
        .clone()
        .oneshot(submit_request(&valid_payload(), "203.0.113.7"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["ok"], true);
    let id = body["id"].as_str().expect("id in response").to_string();

    let stored = app.store.snapshot();
    assert_eq!(stored.len(), 1);
    let record = &stored[0];
    assert_eq!(record.id, id);
    assert_eq!(record.status, SubmissionStatus::Pending);
    assert_eq!(record.ip, "203.0.113.7");
    assert_eq!(record.user_agent, "integration-test/1.0");
    assert_eq!(record.tags, vec!["syllabi", "open data"]);
    assert_eq!(*app.notifier.notified.lock().unwrap(), vec![id.clone()]);

    let res = app
        .router
        .clone()
        .oneshot(admin_get("/admin/submissions"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["items"][0]["id"], id.as_str());
    assert_eq!(body["items"][0]["status"], "pending");
    assert_eq!(body["complete"], true);
}

#[tokio::test]
async fn invalid_payloads_are_rejected_without_persisting() {
    let app = test_app(FakeStore::default());

    let mut missing_name = valid_payload();
    missing_name["name"] = json!(" ");
    let mut bad_url = valid_payload();
    bad_url["url"] = json!("ftp://example.org");
    let mut long_description = valid_payload();
    long_description["description"] = json!("x".repeat(2001));
    let mut too_many_tags = valid_payload();
    too_many_tags["tags"] = json!((0..21).map(|i| format!("t{i}")).collect::<Vec<_>>());
    let mut wrong_answer = valid_payload();
    wrong_answer["captcha"]["answer"] = json!(8);

    let cases = [
        (missing_name, "invalid_name"),
        (bad_url, "invalid_url"),
        (long_description, "invalid_description"),
        (too_many_tags, "invalid_tags"),
        (wrong_answer, "captcha_failed"),
    ];
    for (payload, code) in cases {
        let res = app
            .router
            .clone()
            .oneshot(submit_request(&payload, "203.0.113.8"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "case {code}");
        let body = body_json(res).await;
        assert_eq!(body["code"], code);
        assert!(body["error"].is_string());
    }

    assert_eq!(app.store.len(), 0);
    assert!(app.notifier.notified.lock().unwrap().is_empty());
}

#[tokio::test]
async fn wrongly_typed_fields_report_the_field() {
    let app = test_app(FakeStore::default());

    let mut string_tags = valid_payload();
    string_tags["tags"] = json!("syllabi, data");
    let mut numeric_name = valid_payload();
    numeric_name["name"] = json!(12345);
    let mut boolean_answer = valid_payload();
    boolean_answer["captcha"]["answer"] = json!(true);

    let cases = [
        (string_tags, "invalid_tags"),
        (numeric_name, "invalid_name"),
        (boolean_answer, "captcha_failed"),
    ];
    for (payload, code) in cases {
        let res = app
            .router
            .clone()
            .oneshot(submit_request(&payload, "203.0.113.10"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "case {code}");
        assert_eq!(body_json(res).await["code"], code);
    }
    assert_eq!(app.store.len(), 0);
}

#[tokio::test]
async fn captcha_answer_may_be_a_numeric_string() {
    let app = test_app(FakeStore::default());
    let mut payload = valid_payload();
    payload["captcha"] = json!({ "a": "3", "b": 4, "op": "+", "answer": "7" });

    let res = app
        .router
        .clone()
        .oneshot(submit_request(&payload, "203.0.113.9"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(app.store.len(), 1);
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let app = test_app(FakeStore::default());
    for raw in ["{not json", "[1,2,3]", "\"text\""] {
        let req = Request::post("/submissions")
            .header("content-type", "application/json")
            .body(Body::from(raw))
            .unwrap();
        let res = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(res).await["code"], "invalid_json");
    }
    assert_eq!(app.store.len(), 0);
}

#[tokio::test]
async fn memory_limiter_blocks_after_limit() {
    let app = test_app_with(
        FakeStore::default(),
        Arc::new(MemoryLimiter::new(2)),
        Vec::new(),
    );

    for _ in 0..2 {
        let res = app
            .router
            .clone()
            .oneshot(submit_request(&valid_payload(), "198.51.100.20"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = app
        .router
        .clone()
        .oneshot(submit_request(&valid_payload(), "198.51.100.20"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(res).await["code"], "rate_limited");
    assert_eq!(app.store.len(), 2);

    // Other callers are unaffected.
    let res = app
        .router
        .clone()
        .oneshot(submit_request(&valid_payload(), "198.51.100.21"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn store_limiter_counts_persisted_records() {
    let store = Arc::new(FakeStore::default());
    let state = AppState {
        store: store.clone(),
        limiter: Arc::new(StoreLimiter::new(2, store.clone())),
        notifier: Arc::new(RecordingNotifier::default()),
        admin_token: ADMIN_TOKEN.to_string(),
        allowed_origins: Arc::new(Vec::new()),
    };
    let router = build_router(state);

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let res = router
            .clone()
            .oneshot(submit_request(&valid_payload(), "192.0.2.44"))
            .await
            .unwrap();
        statuses.push(res.status());
    }
    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn invalid_submission_does_not_consume_quota() {
    let app = test_app_with(
        FakeStore::default(),
        Arc::new(MemoryLimiter::new(1)),
        Vec::new(),
    );
    let mut bad = valid_payload();
    bad["captcha"]["answer"] = json!(8);

    let res = app
        .router
        .clone()
        .oneshot(submit_request(&bad, "192.0.2.50"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .router
        .clone()
        .oneshot(submit_request(&valid_payload(), "192.0.2.50"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_method_is_rejected() {
    let app = test_app(FakeStore::default());
    let res = app
        .router
        .clone()
        .oneshot(Request::get("/submissions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body_json(res).await["code"], "method_not_allowed");
}

#[tokio::test]
async fn browser_preflight_returns_no_content() {
    let app = test_app(FakeStore::default());
    for uri in ["/submissions", "/admin/submissions", "/admin/submissions/update"] {
        let res = app
            .router
            .clone()
            .oneshot(
                Request::options(uri)
                    .header("origin", "https://nav.example.edu")
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "content-type, x-admin-token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT, "{uri}");
        assert!(res
            .headers()
            .contains_key("access-control-allow-origin"));
        let methods = res
            .headers()
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(methods.contains("POST"), "{methods}");
    }
    assert_eq!(app.store.calls(), 0);
}

#[tokio::test]
async fn bare_options_returns_no_content() {
    let app = test_app(FakeStore::default());
    let res = app
        .router
        .clone()
        .oneshot(Request::options("/submissions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn disallowed_origin_is_forbidden() {
    let app = test_app_with(
        FakeStore::default(),
        Arc::new(MemoryLimiter::new(5)),
        vec!["https://nav.example.edu".to_string()],
    );

    let mut req = submit_request(&valid_payload(), "203.0.113.30");
    req.headers_mut()
        .insert("origin", "https://evil.example".parse().unwrap());
    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.store.len(), 0);

    let mut req = submit_request(&valid_payload(), "203.0.113.30");
    req.headers_mut()
        .insert("origin", "https://nav.example.edu".parse().unwrap());
    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(app.store.len(), 1);
}

#[tokio::test]
async fn store_failure_is_an_internal_error() {
    let app = test_app(FakeStore::failing());
    let res = app
        .router
        .clone()
        .oneshot(submit_request(&valid_payload(), "203.0.113.40"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(res).await;
    assert_eq!(body["code"], "internal_error");
    assert!(!body["error"]
        .as_str()
        .unwrap_or_default()
        .contains("connection refused"));
    assert!(app.notifier.notified.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_webhook_does_not_fail_submission() {
    let store = Arc::new(FakeStore::default());
    let state = AppState {
        store: store.clone(),
        limiter: Arc::new(MemoryLimiter::new(5)),
        notifier: Arc::new(SlackNotifier::new("http://127.0.0.1:9/hook".to_string()).unwrap()),
        admin_token: ADMIN_TOKEN.to_string(),
        allowed_origins: Arc::new(Vec::new()),
    };

    let res = build_router(state)
        .oneshot(submit_request(&valid_payload(), "203.0.113.50"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn legacy_submit_path_is_served() {
    let app = test_app(FakeStore::default());
    let req = Request::post("/api/submit")
        .header("content-type", "application/json")
        .body(Body::from(valid_payload().to_string()))
        .unwrap();
    let res = app.router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let stored = app.store.snapshot();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].ip, "unknown");
}

#[tokio::test]
async fn health_check() {
    let app = test_app(FakeStore::default());
    let res = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
