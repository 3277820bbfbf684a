//! HTTP transport tests against an in-process mock proxy (axum on an
//! ephemeral port).

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ytclient::api::{
    CreateNodeOptions, GetNodeOptions, NodeType, ReadTableOptions, SelectRowsOptions, WriteTableOptions,
};
use ytclient::{codes, Client, Config, Context, Credentials, Error, ErrorCode};

/// Requests seen by the mock proxy.
#[derive(Default)]
struct Recorder {
    hits: AtomicUsize,
    requests: Mutex<Vec<(HeaderMap, Bytes)>>,
}

impl Recorder {
    fn record(&self, headers: HeaderMap, body: Bytes) -> usize {
        self.requests.lock().push((headers, body));
        self.hits.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn header(&self, idx: usize, name: &str) -> Option<String> {
        self.requests.lock()[idx]
            .0
            .get(name)
            .map(|v| v.to_str().unwrap().to_string())
    }

    fn body_json(&self, idx: usize) -> Value {
        serde_json::from_slice(&self.requests.lock()[idx].1).unwrap()
    }

    fn params_header(&self, idx: usize) -> Value {
        serde_json::from_str(&self.header(idx, "X-YT-Parameters").unwrap()).unwrap()
    }
}

type Shared = State<Arc<Recorder>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

fn test_config(proxy: &str) -> Config {
    let mut config = Config::for_proxy(proxy);
    config.cluster.disable_discovery = true;
    config.cluster.token = Some("test-token".to_string());
    config.retry.max_attempts = 3;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config
}

async fn start(app: Router) -> Client {
    let proxy = serve(app).await;
    Client::http(test_config(&proxy)).unwrap()
}

fn error_header(code: i32, message: &str) -> Response {
    let err = json!({"code": code, "message": message});
    ([("X-YT-Error", err.to_string())], "").into_response()
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Row {
    key: i64,
    value: String,
}

// Unary Calls
#[tokio::test]
async fn test_create_node_sends_params_in_body() {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route(
            "/api/v4/create",
            post(|State(rec): Shared, headers: HeaderMap, body: Bytes| async move {
                rec.record(headers, body);
                Json(json!({"node_id": "1-2-3-4"}))
            }),
        )
        .with_state(Arc::clone(&recorder));
    let yc = start(app).await;

    let id = yc
        .create_node(&Context::background(), "//tmp/t", NodeType::Table, &CreateNodeOptions::default())
        .await
        .unwrap();
    assert_eq!(id.to_string(), "1-2-3-4");

    let params = recorder.body_json(0);
    assert_eq!(params["path"], "//tmp/t");
    assert_eq!(params["type"], "table");
    assert!(params["mutation_id"].is_string());
    assert_eq!(params["retry"], false);
    assert_eq!(recorder.header(0, "Authorization").as_deref(), Some("OAuth test-token"));
    assert!(recorder.header(0, "X-YT-Correlation-ID").is_some());
}

#[tokio::test]
async fn test_get_node_sends_params_in_header() {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route(
            "/api/v4/get",
            get(|State(rec): Shared, headers: HeaderMap, body: Bytes| async move {
                rec.record(headers, body);
                Json(json!({"value": {"account": "dev"}}))
            }),
        )
        .with_state(Arc::clone(&recorder));
    let yc = start(app).await;

    let value: Value = yc
        .get_node(&Context::background(), "//home/@", &GetNodeOptions::default())
        .await
        .unwrap();
    assert_eq!(value, json!({"account": "dev"}));

    let params = recorder.params_header(0);
    assert_eq!(params["path"], "//home/@");
    assert!(params.get("mutation_id").is_none());
}

#[tokio::test]
async fn test_context_credentials_override_configured_token() {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route(
            "/api/v4/exists",
            get(|State(rec): Shared, headers: HeaderMap, body: Bytes| async move {
                rec.record(headers, body);
                Json(json!({"value": true}))
            }),
        )
        .with_state(Arc::clone(&recorder));
    let yc = start(app).await;

    let ctx = Context::background().with_credentials(Credentials::Token("user-token".to_string()));
    assert!(yc.node_exists(&ctx, "//tmp", &Default::default()).await.unwrap());
    assert_eq!(recorder.header(0, "Authorization").as_deref(), Some("OAuth user-token"));
}

// Error Responses
#[tokio::test]
async fn test_error_header_fails_call() {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route(
            "/api/v4/get",
            get(|State(rec): Shared, headers: HeaderMap, body: Bytes| async move {
                rec.record(headers, body);
                error_header(500, "node //tmp/x has no child")
            }),
        )
        .with_state(Arc::clone(&recorder));
    let yc = start(app).await;

    let err = yc
        .get_node::<Value>(&Context::background(), "//tmp/x", &GetNodeOptions::default())
        .await
        .unwrap_err();
    assert!(err.contains_error_code(ErrorCode(500)));
    assert_eq!(err.cluster_error().unwrap().message, "node //tmp/x has no child");
    assert_eq!(recorder.hits(), 1);
}

#[tokio::test]
async fn test_malformed_error_header() {
    let app = Router::new().route(
        "/api/v4/get",
        get(|| async { ([("X-YT-Error", "{not json")], "").into_response() }),
    );
    let yc = start(app).await;

    let err = yc
        .get_node::<Value>(&Context::background(), "//tmp/x", &GetNodeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MalformedErrorHeader(_)));
}

#[tokio::test]
async fn test_error_body_on_non_success_status() {
    let app = Router::new().route(
        "/api/v4/get",
        get(|| async {
            (StatusCode::BAD_REQUEST, Json(json!({"code": 1, "message": "bad path"}))).into_response()
        }),
    );
    let yc = start(app).await;

    let err = yc
        .get_node::<Value>(&Context::background(), "bad", &GetNodeOptions::default())
        .await
        .unwrap_err();
    assert!(err.contains_error_code(codes::GENERIC));
}

#[tokio::test]
async fn test_unexpected_status_without_error_body() {
    let app = Router::new().route(
        "/api/v4/get",
        get(|| async { (StatusCode::BAD_GATEWAY, "upstream down").into_response() }),
    );
    let yc = start(app).await;

    let err = yc
        .get_node::<Value>(&Context::background(), "//tmp", &GetNodeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnexpectedStatus(502)));
}

// Retries
#[tokio::test]
async fn test_unavailable_read_is_retried() {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route(
            "/api/v4/get",
            get(|State(rec): Shared, headers: HeaderMap, body: Bytes| async move {
                if rec.record(headers, body) < 3 {
                    error_header(105, "proxy is unavailable")
                } else {
                    Json(json!({"value": 42})).into_response()
                }
            }),
        )
        .with_state(Arc::clone(&recorder));
    let yc = start(app).await;

    let value: i64 = yc
        .get_node(&Context::background(), "//tmp/n", &GetNodeOptions::default())
        .await
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(recorder.hits(), 3);
}

#[tokio::test]
async fn test_mutation_retry_reuses_mutation_id() {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route(
            "/api/v4/create",
            post(|State(rec): Shared, headers: HeaderMap, body: Bytes| async move {
                if rec.record(headers, body) == 1 {
                    error_header(108, "request queue size limit exceeded")
                } else {
                    Json(json!({"node_id": "5-6-7-8"})).into_response()
                }
            }),
        )
        .with_state(Arc::clone(&recorder));
    let yc = start(app).await;

    yc.create_node(&Context::background(), "//tmp/m", NodeType::MapNode, &CreateNodeOptions::default())
        .await
        .unwrap();

    let first = recorder.body_json(0);
    let second = recorder.body_json(1);
    assert_eq!(first["mutation_id"], second["mutation_id"]);
    assert_eq!(first["retry"], false);
    assert_eq!(second["retry"], true);
}

#[tokio::test]
async fn test_refused_connection_becomes_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let yc = Client::http(test_config(&format!("127.0.0.1:{port}"))).unwrap();
    let err = yc
        .get_node::<Value>(&Context::background(), "//tmp", &GetNodeOptions::default())
        .await
        .unwrap_err();
    let transport = err.find_error_code(codes::TRANSPORT_ERROR).unwrap();
    assert_eq!(transport.attributes["method"], "get");
}

// Cancellation
#[tokio::test]
async fn test_deadline_cancels_call() {
    let app = Router::new().route(
        "/api/v4/get",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({"value": 1}))
        }),
    );
    let yc = start(app).await;

    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let err = yc
        .get_node::<i64>(&ctx, "//tmp", &GetNodeOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_cancellation());
}

#[tokio::test]
async fn test_stopped_client_rejects_calls() {
    let app = Router::new().route("/api/v4/get", get(|| async { Json(json!({"value": 1})) }));
    let yc = start(app).await;

    yc.stop().await;
    assert!(yc.is_stopped());
    let err = yc
        .get_node::<i64>(&Context::background(), "//tmp", &GetNodeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ClientStopped));
}

// Heavy Proxies
#[tokio::test]
async fn test_heavy_verbs_use_discovered_hosts() {
    let recorder = Arc::new(Recorder::default());
    let hosts = Arc::new(AtomicUsize::new(0));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());

    let heavy = proxy.clone();
    let hosts_hits = Arc::clone(&hosts);
    let app = Router::new()
        .route(
            "/hosts",
            get(move || {
                hosts_hits.fetch_add(1, Ordering::SeqCst);
                let hosts = json!([heavy]);
                async move { Json(hosts) }
            }),
        )
        .route(
            "/api/v4/select_rows",
            get(|State(rec): Shared, headers: HeaderMap, body: Bytes| async move {
                rec.record(headers, body);
                "{\"key\":1,\"value\":\"a\"}\n{\"key\":2,\"value\":\"b\"}\n"
            }),
        )
        .with_state(Arc::clone(&recorder));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let mut config = test_config(&proxy);
    config.cluster.disable_discovery = false;
    let yc = Client::http(config).unwrap();

    for _ in 0..2 {
        let rows: Vec<Row> = yc
            .select_rows(&Context::background(), "* from [//tmp/d]", &SelectRowsOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].value, "b");
    }
    assert_eq!(hosts.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.params_header(0)["query"], "* from [//tmp/d]");
}

// Streaming
#[tokio::test]
async fn test_read_table_streams_rows_with_response_params() {
    let app = Router::new().route(
        "/api/v4/read_table",
        get(|| async {
            let mut body = String::new();
            for key in 0..100 {
                body.push_str(&json!({"key": key, "value": format!("v{key}")}).to_string());
                body.push('\n');
            }
            ([("X-YT-Response-Parameters", r#"{"start_row_index":0}"#)], body)
        }),
    );
    let yc = start(app).await;

    let reader = yc
        .read_table::<Row>(&Context::background(), "//tmp/t", &ReadTableOptions::default())
        .await
        .unwrap();
    assert_eq!(reader.response_parameters(), Some(&json!({"start_row_index": 0})));

    let rows = reader.collect().await.unwrap();
    assert_eq!(rows.len(), 100);
    assert_eq!(rows[99], Row { key: 99, value: "v99".to_string() });
}

#[tokio::test]
async fn test_write_table_streams_body() {
    let recorder = Arc::new(Recorder::default());
    let app = Router::new()
        .route(
            "/api/v4/write_table",
            put(|State(rec): Shared, headers: HeaderMap, body: Bytes| async move {
                rec.record(headers, body);
                StatusCode::OK
            }),
        )
        .with_state(Arc::clone(&recorder));
    let yc = start(app).await;

    let mut writer = yc
        .write_table(&Context::background(), "//tmp/w", &WriteTableOptions::default())
        .await
        .unwrap();
    for key in 0..3 {
        writer.write(&Row { key, value: key.to_string() }).await.unwrap();
    }
    writer.finish().await.unwrap();

    assert_eq!(recorder.params_header(0)["path"], "//tmp/w");
    assert_eq!(recorder.header(0, "X-YT-Input-Format").as_deref(), Some("json"));
    let body = recorder.requests.lock()[0].1.clone();
    let rows: Vec<Row> = body
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2], Row { key: 2, value: "2".to_string() });
}

#[tokio::test]
async fn test_write_table_rejected_by_server() {
    let app = Router::new().route(
        "/api/v4/write_table",
        put(|_body: Bytes| async {
            (StatusCode::BAD_REQUEST, Json(json!({"code": 1, "message": "schema violation"})))
        }),
    );
    let yc = start(app).await;

    let mut writer = yc
        .write_table(&Context::background(), "//tmp/w", &WriteTableOptions::default())
        .await
        .unwrap();
    let result = match writer.write(&Row { key: 1, value: "x".to_string() }).await {
        Ok(()) => writer.finish().await,
        Err(err) => Err(err),
    };
    assert!(result.is_err());
}
