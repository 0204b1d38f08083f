//! HTTP clients against local stand-in servers.

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::body::Bytes;
use axum::routing::{get, post};
use axum::{Json, Router};
use notion_harness::chat::{ChatMessage, ChatRequest, ChatService, ResponseFormat, ToolSchema};
use notion_harness::config::{ChatConfig, WorkspaceConfig};
use notion_harness::error::ExternalApiError;
use notion_harness::models::{ItemKind, Parent};
use notion_harness::notion::NotionClient;
use notion_harness::openai::OpenAiChat;
use notion_harness::retry::RetryPolicy;
use notion_harness::s3::{AwsCredentials, S3Client};
use notion_harness::workspace::{QueryRequest, SearchHit, WorkspaceStore};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Seen = Arc<Mutex<Vec<Value>>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn notion(base_url: &str, max_retries: u32) -> NotionClient {
    let config = WorkspaceConfig {
        base_url: base_url.to_string(),
        timeout_secs: 5,
        max_retries,
        ..WorkspaceConfig::default()
    };
    NotionClient::new(&config, "secret-token".to_string()).unwrap()
}

fn openai(base_url: &str, max_retries: u32) -> OpenAiChat {
    let config = ChatConfig {
        base_url: base_url.to_string(),
        model: "gpt-test".to_string(),
        timeout_secs: 5,
        max_retries,
        ..ChatConfig::default()
    };
    OpenAiChat::new(&config, "sk-test".to_string()).unwrap()
}

fn s3(endpoint: &str, max_retries: u32, timeout: Duration) -> S3Client {
    let policy = RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(1),
        timeout,
    };
    S3Client::new(
        "snaps".to_string(),
        "us-east-1".to_string(),
        Some(endpoint.to_string()),
        AwsCredentials::new("AKIDEXAMPLE", "secret", None),
        policy,
    )
    .unwrap()
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// ─── Workspace client ───────────────────────────────────────────────

#[tokio::test]
async fn test_search_sends_kind_filter_and_parses_hits() {
    let seen: Seen = Arc::default();
    let recorder = seen.clone();
    let app = Router::new().route(
        "/v1/search",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(json!({
                    "auth": header(&headers, "authorization"),
                    "version": header(&headers, "notion-version"),
                    "body": body,
                }));
                Json(json!({
                    "object": "list",
                    "results": [
                        {
                            "object": "database",
                            "id": "db1",
                            "title": [{"plain_text": "Tasks"}],
                            "properties": {
                                "Name": {"id": "title", "type": "title", "title": {}},
                                "Due": {"id": "a1", "type": "date", "date": {}}
                            }
                        },
                        {
                            "object": "page",
                            "id": "pg1",
                            "parent": {"type": "database_id", "database_id": "db1"},
                            "properties": {
                                "Name": {"type": "title", "title": [{"plain_text": "Buy milk"}]}
                            }
                        },
                        {
                            "object": "page",
                            "id": "pg2",
                            "parent": {"type": "workspace", "workspace": true},
                            "properties": {"title": {"type": "title", "title": []}}
                        }
                    ],
                    "has_more": true,
                    "next_cursor": "cur-2"
                }))
            }
        }),
    );
    let client = notion(&serve(app).await, 0);

    let page = client.search(ItemKind::Table, Some("cur-1")).await.unwrap();

    assert_eq!(page.continuation(), Some("cur-2"));
    let SearchHit::Table(table) = &page.results[0] else {
        panic!("expected a table hit");
    };
    assert_eq!(table.title, "Tasks");
    assert!(table.columns.iter().any(|c| c.name == "Name" && c.kind == "title"));
    assert_eq!(table.columns.len(), 2);
    assert_eq!(table.schema["Due"]["type"], "date");
    let SearchHit::Page(row) = &page.results[1] else {
        panic!("expected a page hit");
    };
    assert_eq!(row.title, "Buy milk");
    assert_eq!(row.parent, Parent::Table("db1".to_string()));
    assert!(row.is_table_row());
    let SearchHit::Page(untitled) = &page.results[2] else {
        panic!("expected a page hit");
    };
    assert_eq!(untitled.title, "Untitled");
    assert_eq!(untitled.parent, Parent::Workspace);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0]["auth"], "Bearer secret-token");
    assert_eq!(seen[0]["version"], "2022-06-28");
    assert_eq!(
        seen[0]["body"]["filter"],
        json!({"property": "object", "value": "database"})
    );
    assert_eq!(seen[0]["body"]["start_cursor"], "cur-1");
}

#[tokio::test]
async fn test_list_children_passes_paging_params() {
    let seen: Seen = Arc::default();
    let recorder = seen.clone();
    let app = Router::new().route(
        "/v1/blocks/{id}/children",
        get(
            move |Path(id): Path<String>, Query(params): Query<HashMap<String, String>>| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().unwrap().push(json!({"id": id, "params": params}));
                    Json(json!({
                        "results": [
                            {
                                "object": "block",
                                "id": "b1",
                                "type": "heading_1",
                                "has_children": false,
                                "heading_1": {"rich_text": [{"plain_text": "Road"}, {"plain_text": "map"}]}
                            },
                            {
                                "object": "block",
                                "id": "b2",
                                "type": "divider",
                                "has_children": false,
                                "divider": {}
                            }
                        ],
                        "has_more": false,
                        "next_cursor": null
                    }))
                }
            },
        ),
    );
    let client = notion(&serve(app).await, 0);

    let page = client.list_children("pg1", Some("c9"), Some(20)).await.unwrap();

    assert_eq!(page.continuation(), None);
    assert_eq!(page.results[0].text, "Roadmap");
    assert_eq!(page.results[0].block_type, "heading_1");
    assert_eq!(page.results[1].text, "");

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0]["id"], "pg1");
    assert_eq!(seen[0]["params"]["page_size"], "20");
    assert_eq!(seen[0]["params"]["start_cursor"], "c9");
}

#[tokio::test]
async fn test_query_sends_filter_and_parses_records() {
    let seen: Seen = Arc::default();
    let recorder = seen.clone();
    let app = Router::new().route(
        "/v1/databases/{id}/query",
        post(move |Path(id): Path<String>, Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(json!({"id": id, "body": body}));
                Json(json!({
                    "results": [{
                        "object": "page",
                        "id": "r1",
                        "properties": {
                            "Name": {"type": "title", "title": [{"plain_text": "Buy milk"}]},
                            "Status": {"type": "status", "status": {"name": "Done"}}
                        }
                    }],
                    "has_more": false
                }))
            }
        }),
    );
    let client = notion(&serve(app).await, 0);
    let request = QueryRequest {
        filter: Some(json!({"property": "Status", "status": {"equals": "Done"}})),
        cursor: None,
        page_size: Some(10),
    };

    let page = client.query("db1", &request).await.unwrap();

    assert_eq!(page.results[0].title.as_deref(), Some("Buy milk"));
    assert_eq!(page.results[0].properties["Status"]["status"]["name"], "Done");
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0]["id"], "db1");
    assert_eq!(
        seen[0]["body"],
        json!({
            "filter": {"property": "Status", "status": {"equals": "Done"}},
            "page_size": 10
        })
    );
}

#[tokio::test]
async fn test_rate_limited_read_is_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/v1/search",
        post(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::TOO_MANY_REQUESTS, Json(json!({"code": "rate_limited"})))
                } else {
                    (StatusCode::OK, Json(json!({"results": [], "has_more": false})))
                }
            }
        }),
    );
    let client = notion(&serve(app).await, 2);

    let page = client.search(ItemKind::Page, None).await.unwrap();

    assert!(page.results.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/v1/databases/{id}/query",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"code": "validation_error", "message": "bad filter"})),
                )
            }
        }),
    );
    let client = notion(&serve(app).await, 3);

    let err = client
        .query("db1", &QueryRequest::default())
        .await
        .unwrap_err();

    match err {
        ExternalApiError::Status { status, body, .. } => {
            assert_eq!(status, 400);
            assert!(body.contains("validation_error"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_create_record_is_sent_once_even_on_server_error() {
    let seen: Seen = Arc::default();
    let recorder = seen.clone();
    let app = Router::new().route(
        "/v1/pages",
        post(move |Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(body);
                (StatusCode::BAD_GATEWAY, Json(json!({"code": "bad_gateway"})))
            }
        }),
    );
    let client = notion(&serve(app).await, 3);
    let mut properties = Map::new();
    properties.insert("Name".into(), json!({"title": [{"text": {"content": "Buy milk"}}]}));

    let err = client.create_record("db1", &properties).await.unwrap_err();

    assert!(matches!(err, ExternalApiError::Status { status: 502, .. }));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["parent"], json!({"database_id": "db1"}));
    assert_eq!(seen[0]["properties"]["Name"]["title"][0]["text"]["content"], "Buy milk");
}

#[tokio::test]
async fn test_create_record_returns_new_id_and_append_sends_paragraph() {
    let seen: Seen = Arc::default();
    let recorder = seen.clone();
    let app = Router::new()
        .route(
            "/v1/pages",
            post(|| async { Json(json!({"object": "page", "id": "new-1"})) }),
        )
        .route(
            "/v1/blocks/{id}/children",
            axum::routing::patch(move |Path(id): Path<String>, Json(body): Json<Value>| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().unwrap().push(json!({"id": id, "body": body}));
                    Json(json!({"object": "list", "results": []}))
                }
            }),
        );
    let client = notion(&serve(app).await, 0);

    let id = client.create_record("db1", &Map::new()).await.unwrap();
    assert_eq!(id, "new-1");

    client.append_block("pg1", "call mom").await.unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0]["id"], "pg1");
    assert_eq!(
        seen[0]["body"]["children"][0],
        json!({
            "object": "block",
            "type": "paragraph",
            "paragraph": {"rich_text": [{"type": "text", "text": {"content": "call mom"}}]}
        })
    );
}

// ─── Chat client ────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_tool_calls_round_trip() {
    let seen: Seen = Arc::default();
    let recorder = seen.clone();
    let app = Router::new().route(
        "/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                recorder
                    .lock()
                    .unwrap()
                    .push(json!({"auth": header(&headers, "authorization"), "body": body}));
                Json(json!({
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{
                                "id": "call_1",
                                "type": "function",
                                "function": {
                                    "name": "Notes_page_add",
                                    "arguments": "{\"text\": \"call mom\"}"
                                }
                            }]
                        }
                    }]
                }))
            }
        }),
    );
    let chat = openai(&serve(app).await, 0);
    let request = ChatRequest::new(vec![
        ChatMessage::system("You add notes."),
        ChatMessage::user("call mom"),
    ])
    .with_tools(vec![ToolSchema {
        name: "Notes_page_add".to_string(),
        description: "Notes\n\nPersonal notes".to_string(),
        parameters: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
    }]);

    let response = chat.complete(request).await.unwrap();

    assert!(response.requests_tools());
    assert_eq!(response.tool_calls[0].id, "call_1");
    assert_eq!(response.tool_calls[0].arguments, json!({"text": "call mom"}));

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0]["auth"], "Bearer sk-test");
    let body = &seen[0]["body"];
    assert_eq!(body["model"], "gpt-test");
    assert_eq!(body["messages"][1], json!({"role": "user", "content": "call mom"}));
    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["function"]["name"], "Notes_page_add");
    assert!(body.get("response_format").is_none());
}

#[tokio::test]
async fn test_chat_structured_output_request() {
    let seen: Seen = Arc::default();
    let recorder = seen.clone();
    let app = Router::new().route(
        "/chat/completions",
        post(move |Json(body): Json<Value>| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(body);
                Json(json!({
                    "choices": [{"message": {"content": "{\"pageIds\": [\"p1\"], \"tableIds\": []}"}}]
                }))
            }
        }),
    );
    let chat = openai(&serve(app).await, 0);
    let request = ChatRequest::new(vec![ChatMessage::user("milk")]).with_format(
        ResponseFormat::JsonSchema {
            name: "search_selection".to_string(),
            schema: json!({"type": "object"}),
        },
    );

    let text = chat.complete(request).await.unwrap().into_text();

    assert_eq!(text, r#"{"pageIds": ["p1"], "tableIds": []}"#);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0]["response_format"]["type"], "json_schema");
    assert_eq!(seen[0]["response_format"]["json_schema"]["name"], "search_selection");
    assert_eq!(seen[0]["response_format"]["json_schema"]["strict"], true);
}

#[tokio::test]
async fn test_chat_malformed_body_is_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/chat/completions",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({"choices": []}))
            }
        }),
    );
    let chat = openai(&serve(app).await, 3);

    let err = chat
        .complete(ChatRequest::new(vec![ChatMessage::user("hi")]))
        .await
        .unwrap_err();

    assert!(matches!(err, ExternalApiError::Malformed { service: "chat", .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ─── Snapshot object store ──────────────────────────────────────────

#[tokio::test]
async fn test_s3_get_retries_server_error() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/snaps/nh/snapshot.json",
        get(move |headers: HeaderMap| {
            let counter = counter.clone();
            async move {
                assert!(header(&headers, "authorization").starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    (StatusCode::SERVICE_UNAVAILABLE, "busy".to_string())
                } else {
                    (StatusCode::OK, "[]".to_string())
                }
            }
        }),
    );
    let client = s3(&serve(app).await, 2, Duration::from_secs(5));

    let body = client.get_object("nh/snapshot.json").await.unwrap();

    assert_eq!(body.as_deref(), Some(&b"[]"[..]));
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_s3_missing_object_is_none() {
    let app = Router::new().route(
        "/snaps/snapshot.json",
        get(|| async { (StatusCode::NOT_FOUND, "NoSuchKey") }),
    );
    let client = s3(&serve(app).await, 2, Duration::from_secs(5));

    assert_eq!(client.get_object("snapshot.json").await.unwrap(), None);
}

#[tokio::test]
async fn test_s3_stalled_get_times_out() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/snaps/snapshot.json",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                "[]"
            }
        }),
    );
    let client = s3(&serve(app).await, 1, Duration::from_millis(100));

    let err = client.get_object("snapshot.json").await.unwrap_err();

    assert_eq!(err, ExternalApiError::Timeout { service: "s3" });
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_s3_put_is_sent_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let app = Router::new().route(
        "/snaps/snapshot.json",
        axum::routing::put(move |body: Bytes| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(body.to_vec());
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        }),
    );
    let client = s3(&serve(app).await, 3, Duration::from_secs(5));

    let err = client
        .put_object("snapshot.json", b"[]\n".to_vec())
        .await
        .unwrap_err();

    assert!(matches!(err, ExternalApiError::Status { service: "s3", status: 500, .. }));
    assert_eq!(*seen.lock().unwrap(), vec![b"[]\n".to_vec()]);
}
