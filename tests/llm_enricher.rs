//! The chat-completions enricher against a local stand-in server.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

use audience_pulse::app::enrich_use_case::EnrichUseCase;
use audience_pulse::config::EnrichConfig;
use audience_pulse::domain::{Emotion, FeedbackRecord, SentimentLabel};
use audience_pulse::pipeline::pipeline_config::ErrorHandlingStrategy;
use audience_pulse::pipeline::processing::enrich::llm::LlmEnricher;
use audience_pulse::pipeline::processing::enrich::{Enricher, FALLBACK_MODEL};
use audience_pulse::pipeline::storage::LayerPaths;

const LABELS: &str = r#"{"sentiment": "negative", "emotion": "anger", "confidence": 0.8, "score": -0.6}"#;

#[derive(Default)]
struct FakeApi {
    /// Statuses to answer with before succeeding
    failures: Mutex<VecDeque<u16>>,
    calls: Mutex<Vec<Value>>,
    auth: Mutex<Vec<Option<String>>>,
}

async fn chat(State(api): State<Arc<FakeApi>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let text = body["messages"][1]["content"].as_str().unwrap_or_default().to_string();
    api.calls.lock().unwrap().push(body);
    api.auth
        .lock()
        .unwrap()
        .push(headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_string));

    if text.contains("bad request") {
        return (StatusCode::BAD_REQUEST, "invalid input").into_response();
    }
    if let Some(status) = api.failures.lock().unwrap().pop_front() {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, [("retry-after", "0")], "try later").into_response();
    }
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": format!("```json\n{}\n```", LABELS) } }]
    }))
    .into_response()
}

fn spawn_fake(failures: &[u16]) -> (String, Arc<FakeApi>) {
    let api = Arc::new(FakeApi::default());
    api.failures.lock().unwrap().extend(failures.iter().copied());
    let app = Router::new().route("/v1/chat/completions", post(chat)).with_state(api.clone());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()).await.unwrap();
    });
    (format!("http://{}/v1/chat/completions", addr), api)
}

fn enricher(endpoint: &str, max_retries: u32) -> LlmEnricher {
    let config = EnrichConfig {
        endpoint: endpoint.to_string(),
        model: "test-model".to_string(),
        max_retries,
        backoff_base_ms: 1,
        requests_per_min: None,
        ..EnrichConfig::default()
    };
    LlmEnricher::new(&config, Some("test-key".to_string())).unwrap()
}

#[tokio::test]
async fn parses_labels_from_fenced_reply() {
    let (endpoint, api) = spawn_fake(&[]);
    let labels = enricher(&endpoint, 0).enrich("the audio was awful").await.unwrap();

    assert_eq!(labels.sentiment, SentimentLabel::Negative);
    assert_eq!(labels.emotion, Emotion::Anger);
    assert!((labels.confidence - 0.8).abs() < 1e-9);
    assert!((labels.score + 0.6).abs() < 1e-9);

    let calls = api.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["model"], "test-model");
    assert_eq!(calls[0]["temperature"], 0);
    assert_eq!(calls[0]["messages"][1]["content"], "the audio was awful");
    assert_eq!(api.auth.lock().unwrap()[0].as_deref(), Some("Bearer test-key"));
}

#[tokio::test]
async fn retries_server_errors_and_rate_limits() {
    let (endpoint, api) = spawn_fake(&[500, 429]);
    let labels = enricher(&endpoint, 3).enrich("meh").await.unwrap();
    assert_eq!(labels.sentiment, SentimentLabel::Negative);
    assert_eq!(api.calls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let (endpoint, api) = spawn_fake(&[503, 503, 503, 503]);
    let err = enricher(&endpoint, 2).enrich("meh").await.unwrap_err();
    assert!(err.to_string().contains("503"));
    assert_eq!(api.calls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn client_errors_fail_fast() {
    let (endpoint, api) = spawn_fake(&[]);
    let err = enricher(&endpoint, 3).enrich("this is a bad request").await.unwrap_err();
    assert!(err.to_string().contains("400"));
    assert_eq!(api.calls.lock().unwrap().len(), 1);
}

fn silver(id: &str, text: &str) -> FeedbackRecord {
    FeedbackRecord {
        record_id: id.into(),
        source_id: "comments".into(),
        episode_title: Some("Ep 1".into()),
        author: None,
        text: text.into(),
        published_at: None,
        like_count: None,
        ingested_at: Utc::now(),
        sentiment: None,
        sentiment_score: None,
        emotion: None,
        confidence: None,
        lexicon_label: None,
        lexicon_score: None,
        model: None,
    }
}

#[tokio::test]
async fn batch_falls_back_to_lexicon_per_record() {
    let (endpoint, _api) = spawn_fake(&[]);
    let primary = Arc::new(enricher(&endpoint, 0));
    let use_case = EnrichUseCase::new(primary, 3, ErrorHandlingStrategy::Continue, false, LayerPaths::new("unused"));

    let records = vec![
        silver("1", "awful sound"),
        silver("2", "loved it, bad request though"),
        silver("3", "fine"),
    ];
    let outcome = use_case.enrich_batch(records, &HashMap::new()).await.unwrap();

    let ids: Vec<_> = outcome.records.iter().map(|r| r.record_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(outcome.fallbacks.len(), 1);
    assert_eq!(outcome.records[0].model.as_deref(), Some("test-model"));
    assert_eq!(outcome.records[1].model.as_deref(), Some(FALLBACK_MODEL));
    assert_eq!(outcome.records[1].sentiment, outcome.records[1].lexicon_label);
}

#[tokio::test]
async fn stop_policy_aborts_the_batch() {
    let (endpoint, _api) = spawn_fake(&[]);
    let primary = Arc::new(enricher(&endpoint, 0));
    let use_case = EnrichUseCase::new(primary, 2, ErrorHandlingStrategy::Stop, false, LayerPaths::new("unused"));
    let result = use_case.enrich_batch(vec![silver("1", "bad request")], &HashMap::new()).await;
    assert!(result.is_err());
}
