use agentdb_store::RetryPolicy;
use agentdb_stream::{HttpNameBackend, MutableStream, NameBackend, Revision, StreamName};
use agentdb_types::{AgentDbError, Cid};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-process stand-in for a mutable-name network.
#[derive(Default)]
struct FakeNameService {
    records: Mutex<HashMap<String, Revision>>,
    resolve_calls: AtomicU32,
}

async fn publish(
    State(state): State<Arc<FakeNameService>>,
    Path(id): Path<String>,
    Json(revision): Json<Revision>,
) -> Response {
    if revision.name.as_str() != id {
        return (StatusCode::BAD_REQUEST, "name mismatch").into_response();
    }
    if revision.verify().is_err() {
        return (StatusCode::UNPROCESSABLE_ENTITY, "bad signature").into_response();
    }
    let mut records = state.records.lock().unwrap();
    if let Some(current) = records.get(&id) {
        if *current == revision {
            return StatusCode::NO_CONTENT.into_response();
        }
        if current.sequence >= revision.sequence {
            return (StatusCode::CONFLICT, "stale sequence").into_response();
        }
    }
    records.insert(id, revision);
    StatusCode::NO_CONTENT.into_response()
}

async fn resolve(
    State(state): State<Arc<FakeNameService>>,
    Path(id): Path<String>,
) -> Response {
    state.resolve_calls.fetch_add(1, Ordering::SeqCst);
    match state.records.lock().unwrap().get(&id) {
        Some(revision) => Json(revision.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "unknown name").into_response(),
    }
}

async fn start_name_service() -> (String, Arc<FakeNameService>) {
    let state = Arc::new(FakeNameService::default());
    let app = Router::new()
        .route("/names/{id}", get(resolve).post(publish))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
    }
}

fn stream_for(url: &str) -> MutableStream {
    let backend = HttpNameBackend::new(url, Duration::from_secs(5)).unwrap();
    MutableStream::new(Arc::new(backend), policy())
}

#[tokio::test]
async fn publish_and_resolve_over_http() {
    let (url, _service) = start_name_service().await;
    let writer = stream_for(&url);
    let reader = stream_for(&url);
    let name = writer.create_name();

    let cid1 = Cid::for_bytes(br#"{"goal":"find-water"}"#);
    let cid2 = Cid::for_bytes(br#"{"goal":"find-food"}"#);

    let r0 = writer.publish(&name, &cid1, None).await.unwrap();
    assert_eq!(r0.sequence, 0);
    assert_eq!(reader.resolve(&name.id()).await, Some(cid1));

    let r1 = writer.publish(&name, &cid2, Some(&r0)).await.unwrap();
    assert_eq!(r1.sequence, 1);
    assert_eq!(reader.resolve(&name.id()).await, Some(cid2.clone()));
    assert_eq!(reader.resolve(&name.id()).await, Some(cid2));
}

#[tokio::test]
async fn unknown_name_is_none_without_retry() {
    let (url, service) = start_name_service().await;
    let reader = stream_for(&url);
    let name = reader.create_name();
    assert_eq!(reader.resolve(&name.id()).await, None);
    assert_eq!(service.resolve_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_publish_rejected_by_service() {
    let (url, _service) = start_name_service().await;
    let writer = stream_for(&url);
    let name = writer.create_name();

    writer
        .publish(&name, &Cid::for_bytes(b"first"), None)
        .await
        .unwrap();
    let err = writer
        .publish(&name, &Cid::for_bytes(b"again"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentDbError::Validation(_)));
}

#[tokio::test]
async fn resolver_survives_service_outage() {
    let (url, _service) = start_name_service().await;
    let stream = stream_for(&url);
    let name = stream.create_name();
    let cid = Cid::for_bytes(b"cached");
    stream.publish(&name, &cid, None).await.unwrap();

    // Same name, but a resolver pointed at a closed port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let offline = stream_for(&dead);
    assert_eq!(offline.resolve(&name.id()).await, None);

    // The publisher still answers from what it has observed.
    let backend = HttpNameBackend::new(&dead, Duration::from_secs(1)).unwrap();
    assert!(backend.resolve(&name.id()).await.is_err());
    assert_eq!(stream.latest_observed(&name.id()).map(|r| r.points_to), Some(cid));
}

#[tokio::test]
async fn republishing_the_same_revision_is_accepted() {
    let (url, _service) = start_name_service().await;
    let backend = HttpNameBackend::new(url.as_str(), Duration::from_secs(5)).unwrap();
    let name = StreamName::generate();
    let rev = name.sign_revision(0, Cid::for_bytes(b"v0"));

    backend.publish(&rev).await.unwrap();
    backend.publish(&rev).await.unwrap();
    assert_eq!(backend.resolve(&name.id()).await.unwrap(), rev);

    let rival = name.sign_revision(0, Cid::for_bytes(b"rival"));
    assert!(backend.publish(&rival).await.is_err());
}
