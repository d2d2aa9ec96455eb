//! Route tests for the HTTP event stream.

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use logcast::server::{router, AppState};
use logcast::{Broadcaster, LogRecord};

fn app(
    broadcaster: &Broadcaster,
    keep_alive: Duration,
    shutdown: &CancellationToken,
) -> axum::Router {
    let state = AppState::new(broadcaster.clone(), keep_alive, shutdown.clone());
    router(state, "/stream")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Read the next chunk of the body as text.
async fn next_chunk(body: &mut Body) -> Option<String> {
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("timed out waiting for a frame")?
        .unwrap();
    let data = frame.into_data().ok()?;
    Some(String::from_utf8(data.to_vec()).unwrap())
}

#[tokio::test]
async fn stream_endpoint_pushes_data_frames() {
    let broadcaster = Broadcaster::new();
    let shutdown = CancellationToken::new();

    let response = app(&broadcaster, Duration::from_secs(60), &shutdown)
        .oneshot(get("/stream"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );
    assert_eq!(broadcaster.subscriber_count(), 1);

    let mut body = response.into_body();
    broadcaster.publish(LogRecord::new("[app.log]", "hello"));
    broadcaster.publish(LogRecord::new("[app.log]", "world"));

    assert_eq!(next_chunk(&mut body).await.unwrap(), "data: [app.log] hello\n\n");
    assert_eq!(next_chunk(&mut body).await.unwrap(), "data: [app.log] world\n\n");
}

#[tokio::test]
async fn carriage_returns_do_not_split_events() {
    let broadcaster = Broadcaster::new();
    let shutdown = CancellationToken::new();

    let response = app(&broadcaster, Duration::from_secs(60), &shutdown)
        .oneshot(get("/stream"))
        .await
        .unwrap();
    let mut body = response.into_body();
    broadcaster.publish(LogRecord::new("[build.log]", "step 1\rstep 2"));

    assert_eq!(
        next_chunk(&mut body).await.unwrap(),
        "data: [build.log] step 1 step 2\n\n"
    );
}

#[tokio::test]
async fn stream_endpoint_sends_keep_alive() {
    let broadcaster = Broadcaster::new();
    let shutdown = CancellationToken::new();

    let response = app(&broadcaster, Duration::from_millis(50), &shutdown)
        .oneshot(get("/stream"))
        .await
        .unwrap();
    let mut body = response.into_body();

    assert_eq!(next_chunk(&mut body).await.unwrap(), ": keep-alive\n\n");
    assert_eq!(broadcaster.subscriber_count(), 1);
}

#[tokio::test]
async fn disconnect_releases_subscriber() {
    let broadcaster = Broadcaster::new();
    let shutdown = CancellationToken::new();
    let router = app(&broadcaster, Duration::from_secs(60), &shutdown);

    let first = router.clone().oneshot(get("/stream")).await.unwrap();
    let second = router.oneshot(get("/stream")).await.unwrap();
    assert_eq!(broadcaster.subscriber_count(), 2);

    drop(first);
    assert_eq!(broadcaster.subscriber_count(), 1);
    drop(second);
    assert_eq!(broadcaster.subscriber_count(), 0);
}

#[tokio::test]
async fn shutdown_ends_open_streams() {
    let broadcaster = Broadcaster::new();
    let shutdown = CancellationToken::new();

    let response = app(&broadcaster, Duration::from_secs(60), &shutdown)
        .oneshot(get("/stream"))
        .await
        .unwrap();
    let mut body = response.into_body();

    shutdown.cancel();
    assert_eq!(next_chunk(&mut body).await, None);
    assert_eq!(broadcaster.subscriber_count(), 0);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let broadcaster = Broadcaster::new();
    let shutdown = CancellationToken::new();

    let response = app(&broadcaster, Duration::from_secs(60), &shutdown)
        .oneshot(get("/other"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(broadcaster.subscriber_count(), 0);
}
