mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use phishscope_engine::routes;

fn app(dataset: &std::path::Path) -> Router {
    routes::router(Arc::new(common::engine(common::healthy_probes(), dataset)))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn predict_then_label_round() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("new_data.csv");
    let app = app(&dataset);

    let (status, body) = send(
        &app,
        post_json("/predict", json!({"url": "http://login-secure.example.com/verify"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let probability = body["final_probability"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&probability));
    assert!(body["shap_explanations"]["top_safe"].is_array());
    assert!(body["shap_explanations"]["top_unsafe"].is_array());
    for side in ["top_safe", "top_unsafe"] {
        assert!(body["shap_explanations"][side].as_array().unwrap().len() <= 10);
    }
    let ticket = body["review_ticket"].as_str().unwrap().to_string();

    let (status, pending) = send(&app, get("/reviews")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["url"], "http://login-secure.example.com/verify");
    assert_eq!(pending[0]["features"]["web_traffic"], 5000.0);

    let (status, labelled) = send(&app, post_json("/label", json!({"ticket_id": ticket, "actual": 1}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(labelled["recorded"], true);

    let (_, pending) = send(&app, get("/reviews")).await;
    assert!(pending.as_array().unwrap().is_empty());

    let mut reader = csv::Reader::from_path(&dataset).unwrap();
    let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "http://login-secure.example.com/verify");
    assert_eq!(&rows[0][2], "1");
}

#[tokio::test]
async fn predict_without_url_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir.path().join("new_data.csv"));

    for body in [json!({}), json!({"url": ""}), json!({"url": null})] {
        let (status, response) = send(&app, post_json("/predict", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "URL is required");
    }

    let malformed = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, response) = send(&app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], "URL is required");
}

#[tokio::test]
async fn url_is_scored_exactly_as_sent() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir.path().join("new_data.csv"));

    let padded = "http://a.com/x  ";
    let (status, _) = send(&app, post_json("/predict", json!({"url": padded}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, post_json("/predict", json!({"url": "   "}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["final_probability"].is_number());

    let (_, pending) = send(&app, get("/reviews")).await;
    let tickets = pending.as_array().unwrap();
    assert_eq!(tickets.len(), 2);
    let sent = tickets.iter().find(|t| t["url"] == padded).unwrap();
    assert_eq!(sent["features"]["length_url"], 16.0);
    assert!(tickets.iter().any(|t| t["url"] == "   "));
}

#[tokio::test]
async fn unreachable_target_still_answers() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(common::dead_probes(), &dir.path().join("new_data.csv"));
    let app = routes::router(Arc::new(engine));

    let (status, body) = send(&app, post_json("/predict", json!({"url": "http://nowhere.invalid/"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["final_probability"].is_number());
}

#[tokio::test]
async fn label_validation() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir.path().join("new_data.csv"));

    let unknown = uuid::Uuid::new_v4().to_string();
    let (status, _) = send(&app, post_json("/label", json!({"ticket_id": unknown, "actual": 0}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, post_json("/label", json!({"ticket_id": unknown, "actual": 5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "actual must be 0, 1 or -1");

    let (status, _) = send(&app, post_json("/label", json!({"ticket_id": "nope", "actual": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_lists_models() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir.path().join("new_data.csv"));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["models"], json!(["xgbclassifier", "gradientboostingclassifier"]));
    assert_eq!(body["model_count"], 2);
    assert_eq!(body["pending_reviews"], 0);
    assert!(body["review_queue"].is_null());
}
