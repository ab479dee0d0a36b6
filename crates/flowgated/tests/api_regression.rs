//! API regression tests.
//!
//! Drives the router of a fully wired in-memory instance: catalog seeded,
//! aggregator and controller attached.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use flowgate_core::FlowgateConfig;
use flowgate_state::StateStore;
use flowgated::app::App;
use flowgated::seed::{self, Catalog};

const CATALOG: &str = r#"
[[use_cases]]
id = "uc1"
code = "greeting"
name = "Greeting"
active = true

[[use_cases.steps]]
id = "uc1-hello"
code = "hello"
name = "Hello"

[[use_cases.flows]]
id = "control"
name = "Control"
fallback = true
current_serve_pct = 100.0

[[use_cases.flows.steps]]
step = "hello"
output = { text = "Hi {{name}}" }
placeholders = ["{{name}}"]

[[use_cases.flows]]
id = "candidate"
name = "Candidate"

[[use_cases.flows.steps]]
step = "hello"
output = { text = "Hello there, {{name}}" }

[[use_cases]]
id = "uc2"
code = "dormant"
name = "Dormant"
"#;

const CORRELATION: &str = "9F1B8A52-3C4D-4E5F-8A6B-7C8D9E0F1A2B";

async fn seeded_app() -> App {
    let app = App::with_store(FlowgateConfig::default(), StateStore::open_in_memory().unwrap());
    // Workers keep running for the lifetime of the test runtime.
    let _workers = app.attach().unwrap();
    seed::apply(&app, &Catalog::parse(CATALOG).unwrap()).await.unwrap();
    app
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn pick_body(correlation: &str, use_case: &str) -> Value {
    json!({
        "correlationId": correlation,
        "useCaseCode": use_case,
        "useCaseStepCode": "hello",
    })
}

#[tokio::test]
async fn healthz_reports_ok() {
    let app = seeded_app().await;
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = app.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["status"], "ok");
}

#[tokio::test]
async fn pick_is_sticky_per_correlation() {
    let app = seeded_app().await;
    let router = app.router();

    let resp = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/picker", pick_body(CORRELATION, "greeting")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let first = body_json(resp).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["match"]["flow_id"], "control");
    assert_eq!(first["data"]["match"]["is_first_correlation"], true);
    assert_eq!(first["data"]["output"]["text"], "Hi {{name}}");

    let resp = router
        .oneshot(json_request("POST", "/api/v1/picker", pick_body(CORRELATION, "greeting")))
        .await
        .unwrap();
    let second = body_json(resp).await;
    assert_eq!(second["data"]["match"]["flow_id"], "control");
    assert_eq!(second["data"]["match"]["is_first_correlation"], false);
    assert_eq!(
        second["data"]["match"]["correlation_id"],
        CORRELATION.to_lowercase()
    );
}

#[tokio::test]
async fn picks_feed_the_statistics() {
    let app = seeded_app().await;
    let resp = app
        .router()
        .oneshot(json_request("POST", "/api/v1/picker", pick_body(CORRELATION, "greeting")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let mut requests = 0;
    for _ in 0..50 {
        requests = app.store.get_statistics("control").unwrap().unwrap().tot_requests;
        if requests == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(requests, 1);
}

#[tokio::test]
async fn pick_errors_use_the_envelope() {
    let app = seeded_app().await;
    let router = app.router();

    let cases = [
        (pick_body(CORRELATION, "missing"), StatusCode::NOT_FOUND, "use-case-not-found"),
        (pick_body(CORRELATION, "dormant"), StatusCode::CONFLICT, "use-case-not-active"),
        (pick_body("not-a-uuid", "greeting"), StatusCode::BAD_REQUEST, "invalid-correlation-id"),
        (json!({"useCaseCode": "greeting"}), StatusCode::BAD_REQUEST, "invalid-request"),
    ];
    for (body, status, code) in cases {
        let resp = router
            .clone()
            .oneshot(json_request("POST", "/api/v1/picker", body))
            .await
            .unwrap();
        assert_eq!(resp.status(), status, "{code}");
        let envelope = body_json(resp).await;
        assert_eq!(envelope["success"], false);
        assert_eq!(envelope["code"], code);
        assert!(envelope.get("data").is_none());
    }
}

#[tokio::test]
async fn rollout_lifecycle_over_http() {
    let app = seeded_app().await;
    let router = app.router();

    let req = Request::builder()
        .uri("/api/v1/use-cases/uc1/rollout")
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["rollout_state"], "INIT");

    let configuration = json!({
        "warmup": {
            "interval_session_reqs": 10,
            "goals": [{"flow_id": "candidate", "final_serve_pct": 50.0}]
        },
        "adaptive": {"min_feedback": 10, "max_step_pct": 10.0, "interval_mins": 60}
    });
    let resp = router
        .clone()
        .oneshot(json_request("PUT", "/api/v1/use-cases/uc1/rollout/configuration", configuration.clone()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bad = json!({
        "warmup": {"interval_session_reqs": 10, "goals": [{"flow_id": "ghost", "final_serve_pct": 5.0}]},
        "adaptive": {"min_feedback": 10, "max_step_pct": 10.0, "interval_mins": 60}
    });
    let resp = router
        .clone()
        .oneshot(json_request("PUT", "/api/v1/use-cases/uc1/rollout/configuration", bad))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["code"], "invalid-configuration");

    let resp = router
        .clone()
        .oneshot(json_request("POST", "/api/v1/use-cases/uc1/rollout/transition", json!({"state": "WARMUP"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["rollout_state"], "WARMUP");

    let resp = router
        .clone()
        .oneshot(json_request("PUT", "/api/v1/use-cases/uc1/rollout/configuration", configuration))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["code"], "not-editable-while-active");

    let resp = router
        .oneshot(json_request("POST", "/api/v1/use-cases/uc1/rollout/transition", json!({"state": "INIT"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["code"], "transition-not-allowed");
}

#[tokio::test]
async fn unknown_use_case_has_no_rollout() {
    let app = seeded_app().await;
    let req = Request::builder()
        .uri("/api/v1/use-cases/nope/rollout")
        .body(Body::empty())
        .unwrap();
    let resp = app.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["code"], "rollout-strategy-not-found");
}
