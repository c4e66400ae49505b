//! Integration Tests for the REST Backend
//!
//! Runs `RestBackend` against a fake PostgREST server built with axum and
//! checks the requests it sends and how replies map onto feed errors.

use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use semurg::backend::{PageSource, PostBackend, RestBackend, SpeciesIdentifier};
use semurg::feed::{
    Cursor, Fact, FeedPage, Notification, NotificationKind, PageRequest, Post, PostUpdate,
};
use semurg::identify::Kingdom;
use semurg::FeedError;
use serde_json::{json, Value};

// == Fake Server ==

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: String,
    apikey: Option<String>,
    authorization: Option<String>,
    content_type: Option<String>,
    body: Bytes,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

fn post_row(id: &str, minute: u32) -> Value {
    json!({
        "id": id,
        "user_id": "alice",
        "title": format!("Sighting {id}"),
        "description": null,
        "image_url": null,
        "caption": null,
        "species": "Vulpes vulpes",
        "created_at": format!("2024-05-01T12:{minute:02}:00Z"),
        "author": { "username": "alice_w" },
        "likes": [{ "user_id": "bob" }],
        "saved_posts": [],
        "comments": []
    })
}

fn json_reply(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn handle(
    axum::extract::State(log): axum::extract::State<Log>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    log.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        apikey: header_value("apikey"),
        authorization: header_value("authorization"),
        content_type: header_value("content-type"),
        body: body.clone(),
    });

    match (method.as_str(), uri.path()) {
        ("GET", "/rest/v1/posts") => json_reply(
            StatusCode::OK,
            json!([post_row("p3", 3), post_row("p2", 2), post_row("p1", 1)]),
        ),
        ("GET", "/rest/v1/facts") => (StatusCode::OK, "not json").into_response(),
        ("POST", "/rest/v1/likes") => StatusCode::CREATED.into_response(),
        ("DELETE", "/rest/v1/likes") => StatusCode::NO_CONTENT.into_response(),
        ("POST", "/rest/v1/comments") => {
            let sent: Value = serde_json::from_slice(&body).unwrap();
            json_reply(
                StatusCode::CREATED,
                json!([{
                    "id": "c1",
                    "post_id": sent["post_id"],
                    "user_id": sent["user_id"],
                    "content": sent["content"],
                    "created_at": "2024-05-01T13:00:00Z"
                }]),
            )
        }
        ("PATCH", "/rest/v1/posts") => json_reply(StatusCode::OK, json!([])),
        ("DELETE", "/rest/v1/posts") => {
            json_reply(StatusCode::FORBIDDEN, json!({ "message": "permission denied" }))
        }
        ("POST", "/rest/v1/notifications") => {
            (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
        }
        ("POST", "/functions/v1/identify-species") => json_reply(
            StatusCode::OK,
            json!({
                "common_name": "Red fox",
                "scientific_name": "Vulpes vulpes",
                "kingdom": "animal",
                "confidence": 0.88,
                "description": "Small omnivorous canid",
                "facts": ["Uses the Earth's magnetic field to pounce"]
            }),
        ),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_backend() -> (RestBackend, Log) {
    let log = Log::default();
    let app = Router::new().fallback(handle).with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let backend = RestBackend::new(&format!("http://{addr}"))
        .with_api_key("anon-key")
        .with_access_token("user-token");
    (backend, log)
}

fn last(log: &Log) -> Recorded {
    log.lock().unwrap().last().cloned().unwrap()
}

fn param(query: &str, name: &str) -> Option<String> {
    let url = reqwest::Url::parse(&format!("http://fake/?{query}")).unwrap();
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

// == Reads ==

#[tokio::test]
async fn test_post_page_request_and_mapping() {
    let (backend, log) = spawn_backend().await;
    let mut request = PageRequest::first(2);
    request.cursor = Some(Cursor::Offset(4));
    request.filters.insert("author_id".into(), "alice".into());

    let page: FeedPage<Post> = backend.fetch_page(&request).await.unwrap();

    let sent = last(&log);
    assert_eq!(sent.method, Method::GET);
    assert!(sent.query.contains("select="));
    assert!(sent.query.contains("order=created_at.desc"));
    assert!(sent.query.contains("limit=3"));
    assert!(sent.query.contains("offset=4"));
    assert!(sent.query.contains("user_id=eq.alice"));
    assert_eq!(sent.apikey.as_deref(), Some("anon-key"));
    assert_eq!(sent.authorization.as_deref(), Some("Bearer user-token"));

    assert_eq!(page.items.len(), 2);
    assert!(page.has_more);
    assert_eq!(page.next_cursor, Some(Cursor::Offset(6)));
    assert_eq!(page.items[0].author_name.as_deref(), Some("alice_w"));
    assert!(page.items[0].is_liked_by("bob"));
}

#[tokio::test]
async fn test_first_page_cursor_is_last_timestamp() {
    let (backend, _log) = spawn_backend().await;

    let page: FeedPage<Post> = backend.fetch_page(&PageRequest::first(2)).await.unwrap();

    match page.next_cursor {
        Some(Cursor::Token(token)) => assert!(token.starts_with("2024-05-01T12:02:00")),
        other => panic!("expected token cursor, got {other:?}"),
    }
}

#[tokio::test]
async fn test_next_page_resumes_after_last_timestamp_and_id() {
    let (backend, log) = spawn_backend().await;
    let first: FeedPage<Post> = backend.fetch_page(&PageRequest::first(2)).await.unwrap();

    let request = PageRequest {
        cursor: first.next_cursor,
        ..PageRequest::first(2)
    };
    let _: FeedPage<Post> = backend.fetch_page(&request).await.unwrap();

    let sent = last(&log);
    assert_eq!(param(&sent.query, "order").as_deref(), Some("created_at.desc,id.desc"));
    assert_eq!(
        param(&sent.query, "or").as_deref(),
        Some(r#"(created_at.lt."2024-05-01T12:02:00+00:00",and(created_at.eq."2024-05-01T12:02:00+00:00",id.lt."p2"))"#)
    );
    assert_eq!(param(&sent.query, "created_at"), None);
}

#[tokio::test]
async fn test_undecodable_body_is_invalid_response() {
    let (backend, _log) = spawn_backend().await;

    let result: Result<FeedPage<Fact>, _> = backend.fetch_page(&PageRequest::first(5)).await;

    assert!(matches!(result, Err(FeedError::InvalidResponse(_))));
}

// == Mutations ==

#[tokio::test]
async fn test_like_and_unlike_requests() {
    let (backend, log) = spawn_backend().await;

    backend.like("p1", "bob").await.unwrap();
    let sent = last(&log);
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.path, "/rest/v1/likes");
    let body: Value = serde_json::from_slice(&sent.body).unwrap();
    assert_eq!(body, json!({ "post_id": "p1", "user_id": "bob" }));

    backend.unlike("p1", "bob").await.unwrap();
    let sent = last(&log);
    assert_eq!(sent.method, Method::DELETE);
    assert!(sent.query.contains("post_id=eq.p1"));
    assert!(sent.query.contains("user_id=eq.bob"));
}

#[tokio::test]
async fn test_comment_insert_returns_stored_row() {
    let (backend, _log) = spawn_backend().await;

    let comment = backend.insert_comment("p1", "bob", "Lovely tail").await.unwrap();

    assert_eq!(comment.id, "c1");
    assert_eq!(comment.author_id, "bob");
    assert_eq!(comment.text, "Lovely tail");
}

#[tokio::test]
async fn test_update_touching_no_rows_is_not_found() {
    let (backend, log) = spawn_backend().await;
    let update = PostUpdate {
        caption: Some("At dusk".into()),
        ..Default::default()
    };

    let result = backend.update_post("p404", &update).await;

    assert_eq!(result, Err(FeedError::NotFound("p404".into())));
    let sent = last(&log);
    assert!(sent.query.contains("id=eq.p404"));
    let body: Value = serde_json::from_slice(&sent.body).unwrap();
    assert_eq!(body, json!({ "caption": "At dusk" }));
}

#[tokio::test]
async fn test_forbidden_maps_to_unauthenticated() {
    let (backend, _log) = spawn_backend().await;

    assert_eq!(
        backend.delete_post("p1").await,
        Err(FeedError::Unauthenticated)
    );
}

#[tokio::test]
async fn test_server_error_is_rejected_with_body() {
    let (backend, _log) = spawn_backend().await;
    let notification = Notification {
        recipient_id: "alice".into(),
        actor_id: "bob".into(),
        post_id: "p1".into(),
        kind: NotificationKind::Like,
    };

    match backend.create_notification(&notification).await {
        Err(FeedError::Rejected(message)) => assert!(message.contains("boom")),
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_retryable() {
    let backend = RestBackend::new("http://127.0.0.1:1");

    let err = backend.like("p1", "bob").await.unwrap_err();

    assert!(matches!(err, FeedError::Network(_)));
    assert!(err.is_retryable());
}

// == Identification ==

#[tokio::test]
async fn test_identify_posts_raw_image() {
    let (backend, log) = spawn_backend().await;

    let record = backend.identify(b"\xff\xd8\xff\xe0jpeg").await.unwrap();

    assert_eq!(record.scientific_name, "Vulpes vulpes");
    assert_eq!(record.kingdom, Kingdom::Animal);
    let sent = last(&log);
    assert_eq!(sent.path, "/functions/v1/identify-species");
    assert_eq!(sent.content_type.as_deref(), Some("application/octet-stream"));
    assert_eq!(&sent.body[..], b"\xff\xd8\xff\xe0jpeg");
}
