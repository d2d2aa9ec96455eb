//! HTTP transport for the live log feed.
//!
//! `GET <stream_path>` attaches a new [`Session`] and streams its frames as
//! server-sent events. When the client goes away the body is dropped, which
//! terminates the session and detaches it from the broadcaster.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures_util::stream::{Stream, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::Broadcaster;
use crate::config::AppConfig;
use crate::error::Error;
use crate::session::{Frame, Session};
use crate::watcher::TailService;

/// Shared state handed to every request.
#[derive(Debug, Clone)]
pub struct AppState {
    broadcaster: Broadcaster,
    keep_alive: Duration,
    /// Parent of every session's cancellation token.
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        broadcaster: Broadcaster,
        keep_alive: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            broadcaster,
            keep_alive,
            shutdown,
        }
    }
}

/// Build the router serving the event stream at `stream_path`.
pub fn router(state: AppState, stream_path: &str) -> Router {
    Router::new()
        .route(stream_path, get(stream_logs))
        .with_state(state)
}

async fn stream_logs(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let session = Session::attach(
        &state.broadcaster,
        state.keep_alive,
        state.shutdown.child_token(),
    );
    info!(
        subscriber = session.subscriber_id(),
        subscribers = state.broadcaster.subscriber_count(),
        "client connected to log stream"
    );

    let events = session
        .into_stream()
        .map(|frame| Ok::<_, Infallible>(sse_event(&frame)));
    Sse::new(events)
}

/// Event-stream form of a frame; the bytes match [`Frame::encode`].
fn sse_event(frame: &Frame) -> Event {
    match frame {
        // Records never contain line breaks, which `Event::data` rejects.
        Frame::Data(record) => Event::default().data(record.to_string()),
        Frame::KeepAlive => Event::default().comment("keep-alive"),
    }
}

/// Run the tail service and the HTTP server until ctrl-c or SIGTERM.
///
/// # Errors
///
/// Fails if the monitored paths cannot be watched or the listener cannot be
/// bound.
pub async fn serve(config: &AppConfig) -> Result<(), Error> {
    let broadcaster = Broadcaster::new();
    let service = TailService::start(&config.tail_options(), broadcaster.clone())?;

    let listener = match TcpListener::bind(config.server.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            service.stop().await;
            return Err(e.into());
        }
    };
    let addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let state = AppState::new(broadcaster, config.stream.keep_alive, shutdown.clone());
    let app = router(state, &config.server.stream_path);

    info!(
        "streaming logs on http://{}{}",
        addr, config.server.stream_path
    );

    // Sessions are children of `shutdown`, so cancelling it ends every open
    // stream and lets the graceful shutdown complete.
    let signal_token = shutdown.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await;

    shutdown.cancel();
    service.stop().await;
    info!("server shut down");
    result.map_err(Error::from)
}

/// Resolve on ctrl-c, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}
