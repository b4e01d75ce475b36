//! HTTP backend against a local axum server.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use canvas_sync::{
    ApiConfig, BackendError, BatchOutcome, Canvas, CanvasBackend, CanvasError, GestureBatch, HttpBackend, ItemKind,
    ItemPatch, NewItem, Placement,
};
use serde_json::{Value, json};

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    auth: Option<String>,
    body: Value,
}

type Log = Arc<Mutex<Vec<Seen>>>;

async fn handle(State(log): State<Log>, method: Method, uri: Uri, headers: HeaderMap, body: String) -> Response {
    let path = uri.path().to_string();
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let parsed = serde_json::from_str(&body).unwrap_or(Value::Null);
    log.lock().unwrap().push(Seen { method: method.clone(), path: path.clone(), auth, body: parsed });

    match (method.as_str(), path.as_str()) {
        ("POST", "/api/components/") => (StatusCode::CREATED, Json(json!({"id": 17, "name": "x"}))).into_response(),
        ("POST", "/api/blocks/") => Json(json!({"id": "blk-1"})).into_response(),
        ("GET", "/api/components/dashboard/d1") => Json(json!([
            {"id": 1, "type": "chart", "name": "Revenue", "config": {"a": 1},
             "position_x": 0, "position_y": 0, "width": 6, "height": 4},
            {"id": 2, "type": "kpi", "name": "Users"}
        ]))
        .into_response(),
        ("GET", "/api/blocks/dashboard/d1") => StatusCode::NOT_FOUND.into_response(),
        ("GET", "/api/components/dashboard/d2") => Json(json!([])).into_response(),
        ("GET", "/api/blocks/dashboard/d2") => Json(json!([
            {"id": "b1", "type": "header", "content": {"text": "Q3"}, "position_x": 0, "position_y": 0,
             "width": 12, "height": 1}
        ]))
        .into_response(),
        ("PUT", "/api/components/forbidden") => {
            (StatusCode::FORBIDDEN, Json(json!({"detail": "Not allowed"}))).into_response()
        }
        ("PUT", "/api/components/expired") => StatusCode::UNAUTHORIZED.into_response(),
        ("PUT", "/api/components/invalid") => {
            (StatusCode::BAD_REQUEST, Json(json!({"detail": "width must be positive"}))).into_response()
        }
        ("PUT", _) => Json(json!({"ok": true})).into_response(),
        ("DELETE", _) => StatusCode::NO_CONTENT.into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
    }
}

async fn serve() -> (String, Log) {
    let log: Log = Arc::default();
    let app = Router::new().fallback(handle).with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), log)
}

async fn backend() -> (HttpBackend, Log) {
    let (url, log) = serve().await;
    let backend = HttpBackend::new(&ApiConfig::new(url).with_token("tok")).unwrap();
    (backend, log)
}

fn seen(log: &Log) -> Vec<Seen> {
    log.lock().unwrap().clone()
}

// =============================================================================
// ROUTING AND BODIES
// =============================================================================

#[tokio::test]
async fn create_item_posts_component_with_bearer() {
    let (backend, log) = backend().await;
    let item = NewItem {
        kind: ItemKind::Chart,
        payload: json!({"title": "Revenue", "config": {"x": "month"}}),
        placement: Placement::new(0, 4, 6, 4),
    };

    let id = backend.create_item("d1", &item).await.unwrap();
    assert_eq!(id, "17");

    let req = &seen(&log)[0];
    assert_eq!(req.method, Method::POST);
    assert_eq!(req.path, "/api/components/");
    assert_eq!(req.auth.as_deref(), Some("Bearer tok"));
    assert_eq!(req.body["dashboard_id"], "d1");
    assert_eq!(req.body["type"], "chart");
    assert_eq!(req.body["name"], "Revenue");
    assert_eq!(req.body["position_y"], 4);
}

#[tokio::test]
async fn text_blocks_use_block_endpoints() {
    let (backend, log) = backend().await;
    let block = NewItem { kind: ItemKind::Header, payload: json!({"text": "Q3"}), placement: Placement::new(0, 0, 12, 1) };

    assert_eq!(backend.create_block("d1", &block).await.unwrap(), "blk-1");
    backend
        .update_block("blk-1", &ItemPatch { placement: None, payload: Some(json!("Q4")) })
        .await
        .unwrap();
    backend.delete_block("blk-1").await.unwrap();

    let requests = seen(&log);
    assert_eq!(requests[0].path, "/api/blocks/");
    assert_eq!(requests[0].body["content"], json!({"text": "Q3"}));
    assert_eq!((requests[1].method.clone(), requests[1].path.as_str()), (Method::PUT, "/api/blocks/blk-1"));
    assert_eq!(requests[1].body, json!({"content": "Q4"}));
    assert_eq!((requests[2].method.clone(), requests[2].path.as_str()), (Method::DELETE, "/api/blocks/blk-1"));
}

#[tokio::test]
async fn placement_update_sends_grid_fields_only() {
    let (backend, log) = backend().await;
    let patch = ItemPatch { placement: Some(Placement::new(3, 1, 6, 4)), payload: None };

    backend.update_item("c9", &patch).await.unwrap();
    assert_eq!(
        seen(&log)[0].body,
        json!({"position_x": 3, "position_y": 1, "width": 6, "height": 4})
    );
}

#[tokio::test]
async fn list_merges_components_and_tolerates_missing_blocks() {
    let (backend, _) = backend().await;

    let items = backend.list_items("d1").await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "1");
    assert_eq!(items[0].payload, json!({"title": "Revenue", "config": {"a": 1}}));
    assert_eq!(items[1].kind, ItemKind::Kpi);
    assert_eq!(items[1].w, None);

    let blocks = backend.list_items("d2").await.unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].kind, ItemKind::Header);
    assert_eq!(blocks[0].payload, json!({"text": "Q3"}));
}

// =============================================================================
// ERRORS
// =============================================================================

#[tokio::test]
async fn forbidden_maps_to_permission() {
    let (backend, _) = backend().await;
    let err = backend
        .update_item("forbidden", &ItemPatch::default())
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::Forbidden);
    assert_eq!(CanvasError::from(err), CanvasError::Permission);
    assert!(backend.has_token());
}

#[tokio::test]
async fn unauthorized_clears_token() {
    let (backend, log) = backend().await;
    let err = backend
        .update_item("expired", &ItemPatch::default())
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::Unauthorized);
    assert!(!backend.has_token());

    backend.delete_item("c1").await.unwrap();
    assert_eq!(seen(&log)[1].auth, None);
}

#[tokio::test]
async fn error_detail_becomes_message() {
    let (backend, _) = backend().await;
    let err = backend
        .update_item("invalid", &ItemPatch::default())
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::Status { status: 400, body: "width must be positive".into() });
}

#[tokio::test]
async fn unexpected_status_keeps_raw_body() {
    let (backend, _) = backend().await;
    let err = backend.list_items("nope").await.unwrap_err();
    assert_eq!(err, BackendError::Status { status: 500, body: "boom".into() });
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let backend = HttpBackend::new(&ApiConfig::new("http://127.0.0.1:1").with_token("tok")).unwrap();
    let err = backend.delete_item("c1").await.unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)));
    assert!(matches!(CanvasError::from(err), CanvasError::Network(_)));
}

// =============================================================================
// END TO END
// =============================================================================

#[tokio::test]
async fn canvas_load_and_move_over_http() {
    let (backend, log) = backend().await;
    let backend = Arc::new(backend);
    let ready = backend.ready();
    let dyn_backend: Arc<dyn CanvasBackend> = backend;
    let canvas = Canvas::builder("d1", dyn_backend).ready(ready).build();

    assert_eq!(canvas.load().await, Ok(2));
    let revenue = canvas.find_by_server_id("1").unwrap();
    assert_eq!(revenue.placement, Placement::new(0, 0, 6, 4));
    let users = canvas.find_by_server_id("2").unwrap();
    assert_eq!(users.placement, Placement::new(0, 0, 3, 2));

    let batch: GestureBatch = [(revenue.local_id, Placement::new(6, 2, 6, 4))].into_iter().collect();
    let outcome = canvas.on_gesture_end(batch).await.unwrap();
    assert_eq!(outcome, BatchOutcome::AllSucceeded { succeeded: vec![revenue.local_id] });

    let put = seen(&log)
        .into_iter()
        .find(|s| s.method == Method::PUT)
        .unwrap();
    assert_eq!(put.path, "/api/components/1");
    assert_eq!(put.body, json!({"position_x": 6, "position_y": 2, "width": 6, "height": 4}));
}
