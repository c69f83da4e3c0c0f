use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chat_sync::client::HttpHistoryStore;
use chat_sync::error::ChatError;
use chat_sync::traits::HistoryStore;
use chat_sync::{ClientConfig, Message};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

type Rows = Arc<Mutex<Vec<Value>>>;

async fn list(State(rows): State<Rows>) -> Json<Vec<Value>> {
    Json(rows.lock().clone())
}

async fn create(State(rows): State<Rows>, Json(row): Json<Value>) -> StatusCode {
    rows.lock().push(row);
    StatusCode::CREATED
}

async fn broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "database offline")
}

async fn serve(rows: Rows) -> String {
    let app = Router::new()
        .route("/Chat", get(list).post(create))
        .route("/Broken", get(broken).post(broken))
        .with_state(rows);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_load_history_reads_rows() {
    let rows: Rows = Arc::new(Mutex::new(vec![
        json!({"id": 1, "user": "bob", "message": "hello", "timestamp": "10:00:00"}),
        json!({"id": 2, "user": "amy", "message": "hi", "timestamp": "2024-01-01T10:00:05.000Z"}),
    ]));
    let base = serve(rows).await;
    let store = HttpHistoryStore::with_config(&ClientConfig::with_base_url(base)).unwrap();

    let history = store.load_history().await.unwrap();
    assert_eq!(
        history,
        vec![
            Message::new(1, "bob", "hello", "10:00:00"),
            Message::new(2, "amy", "hi", "2024-01-01T10:00:05.000Z"),
        ]
    );
}

#[tokio::test]
async fn test_persist_posts_storage_row() {
    let rows: Rows = Arc::new(Mutex::new(Vec::new()));
    let base = serve(rows.clone()).await;
    let store = HttpHistoryStore::with_config(&ClientConfig::with_base_url(base)).unwrap();

    let message = Message::new(3, "alice", "hi", "2024-01-01T10:00:00.000Z")
        .with_correlation_id(uuid::Uuid::new_v4());
    store.persist(&message).await.unwrap();

    let stored = rows.lock().clone();
    assert_eq!(
        stored,
        vec![json!({"id": 3, "user": "alice", "message": "hi", "timestamp": "2024-01-01T10:00:00.000Z"})]
    );
}

#[tokio::test]
async fn test_server_error_is_transport_error() {
    let base = serve(Arc::new(Mutex::new(Vec::new()))).await;
    let config = ClientConfig {
        history_path: "/Broken".to_string(),
        ..ClientConfig::with_base_url(base)
    };
    let store = HttpHistoryStore::with_config(&config).unwrap();

    match store.load_history().await {
        Err(ChatError::Transport(detail)) => {
            assert!(detail.contains("500"));
            assert!(detail.contains("database offline"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(store
        .persist(&Message::new(1, "alice", "hi", ""))
        .await
        .is_err());
}

#[tokio::test]
async fn test_unreachable_server() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store =
        HttpHistoryStore::with_config(&ClientConfig::with_base_url(format!("http://{}", addr)))
            .unwrap();
    let err = store.load_history().await.unwrap_err();
    assert!(err.is_retryable());
}
