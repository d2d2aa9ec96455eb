//! Console streaming mode.
//!
//! `logcast stream` attaches a single local session to the tail service and
//! prints each new line as `[source] text` to stdout, without the HTTP
//! server. Useful for checking what subscribers would receive.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::cli::StreamArgs;
use crate::config::AppConfig;
use crate::error::Error;
use crate::server::shutdown_signal;
use crate::session::{Frame, Session, TerminateReason};
use crate::watcher::TailService;

/// Tail the monitored paths to stdout until ctrl-c, SIGTERM or a closed pipe.
pub async fn run_stream(config: &AppConfig, args: &StreamArgs) -> Result<(), Error> {
    let broadcaster = Broadcaster::new();
    let service = TailService::start(&config.tail_options(), broadcaster.clone())?;

    let cancel = CancellationToken::new();
    let mut session = Session::attach(&broadcaster, config.stream.keep_alive, cancel.clone());

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let mut stdout = tokio::io::stdout();
    while let Some(frame) = session.next_frame().await {
        if let Err(e) = print_frame(&mut stdout, &frame, args.show_keep_alive).await {
            // Broken pipe: the reader is gone, exit cleanly.
            debug!(error = %e, "stdout closed");
            session.terminate(TerminateReason::PushFailed);
        }
    }

    service.stop().await;
    Ok(())
}

/// Console form of a frame. Keep-alives are only shown on request.
fn console_line(frame: &Frame, show_keep_alive: bool) -> Option<String> {
    match frame {
        Frame::Data(record) => Some(format!("{}\n", record)),
        Frame::KeepAlive if show_keep_alive => Some(": keep-alive\n".to_string()),
        Frame::KeepAlive => None,
    }
}

/// Write one frame in console form.
async fn print_frame<W>(out: &mut W, frame: &Frame, show_keep_alive: bool) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(line) = console_line(frame, show_keep_alive) else {
        return Ok(());
    };
    out.write_all(line.as_bytes()).await?;
    out.flush().await
}
