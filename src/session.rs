//! Per-subscriber streaming sessions.
//!
//! A [`Session`] wraps one [`SubscriberChannel`] and turns it into a sequence
//! of push frames: a data frame for every record and a keep-alive frame
//! whenever nothing arrived within the keep-alive interval. Keep-alives stop
//! idle connections from being torn down by proxies and let the transport
//! notice a dead peer.
//!
//! The session is a small state machine:
//!
//! ```text
//! Attached --> Streaming --> Terminated
//! ```
//!
//! It terminates on cancellation, when its channel closes, or when pushing a
//! frame fails. Whatever the exit path, the channel is detached from the
//! broadcaster exactly once.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broadcast::{Broadcaster, SubscriberChannel};
use crate::log_record::LogRecord;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default interval without records after which a keep-alive is sent.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Encoded keep-alive frame (an event-stream comment).
pub const KEEP_ALIVE_FRAME: &str = ": keep-alive\n\n";

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// One unit pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Arc<LogRecord>),
    KeepAlive,
}

impl Frame {
    /// Encode the frame in text event-stream form, including the blank line
    /// that terminates each event.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn is_keep_alive(&self) -> bool {
        matches!(self, Frame::KeepAlive)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Data(record) => {
                write!(f, "data: {} {}\n\n", record.source_tag(), record.text())
            }
            Frame::KeepAlive => f.write_str(KEEP_ALIVE_FRAME),
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel registered, nothing polled yet.
    Attached,
    /// Waiting for records or the keep-alive deadline.
    Streaming,
    /// Reserved for buffered delivery; never entered.
    Idle,
    /// Channel released; no further frames.
    Terminated,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// The cancellation token fired (client gone or server shutting down).
    Cancelled,
    /// The channel was detached from the broadcaster.
    ChannelClosed,
    /// Writing a frame to the transport failed.
    PushFailed,
}

pub struct Session {
    channel: SubscriberChannel,
    state: SessionState,
    keep_alive: Duration,
    cancel: CancellationToken,
    reason: Option<TerminateReason>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subscriber", &self.channel.id())
            .field("state", &self.state)
            .field("keep_alive", &self.keep_alive)
            .field("reason", &self.reason)
            .finish()
    }
}

impl Session {
    /// Subscribe to `broadcaster` and start a session in the `Attached` state.
    ///
    /// Records published after this returns are delivered; cancelling
    /// `cancel` ends the session even while it is waiting.
    pub fn attach(
        broadcaster: &Broadcaster,
        keep_alive: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let channel = broadcaster.subscribe();
        debug!(subscriber = channel.id(), "session attached");
        Self {
            channel,
            state: SessionState::Attached,
            keep_alive,
            cancel,
            reason: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn terminate_reason(&self) -> Option<TerminateReason> {
        self.reason
    }

    pub fn subscriber_id(&self) -> u64 {
        self.channel.id()
    }

    /// Wait for the next frame to push.
    ///
    /// Returns `None` once the session is terminated.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        match self.state {
            SessionState::Terminated => return None,
            SessionState::Attached | SessionState::Idle => self.state = SessionState::Streaming,
            SessionState::Streaming => {}
        }

        // Checked first so a cancelled session never emits another frame.
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.terminate(TerminateReason::Cancelled);
                None
            }
            received = tokio::time::timeout(self.keep_alive, self.channel.recv()) => {
                match received {
                    Ok(Some(record)) => Some(Frame::Data(record)),
                    Ok(None) => {
                        self.terminate(TerminateReason::ChannelClosed);
                        None
                    }
                    Err(_elapsed) => Some(Frame::KeepAlive),
                }
            }
        }
    }

    /// Move to `Terminated` and release the channel. Later calls keep the
    /// first reason.
    pub fn terminate(&mut self, reason: TerminateReason) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.state = SessionState::Terminated;
        self.reason = Some(reason);
        self.channel.detach();
        debug!(subscriber = self.channel.id(), ?reason, "session terminated");
    }

    /// Push frames to `sink` until the session terminates.
    pub async fn run<W>(mut self, sink: &mut W) -> TerminateReason
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(frame) = self.next_frame().await {
            let pushed = async {
                sink.write_all(frame.encode().as_bytes()).await?;
                sink.flush().await
            };
            if let Err(e) = pushed.await {
                debug!(subscriber = self.channel.id(), error = %e, "push failed");
                self.terminate(TerminateReason::PushFailed);
            }
        }
        self.reason.unwrap_or(TerminateReason::ChannelClosed)
    }

    /// Turn the session into a stream of frames. Dropping the stream (for
    /// example when an HTTP client disconnects) terminates the session.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        stream::unfold(self, |mut session| async move {
            let frame = session.next_frame().await?;
            Some((frame, session))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
