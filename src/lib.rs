//! Live tailing of growing log files with fan-out to many subscribers.
//!
//! New complete lines appended to files under the monitored roots are
//! published to a [`Broadcaster`]; each subscriber reads them through its
//! own [`Session`], which also emits keep-alives while the files are idle.
//!
//! ```no_run
//! use std::time::Duration;
//! use logcast::{Broadcaster, Session, TailOptions, TailService};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), logcast::Error> {
//!     let broadcaster = Broadcaster::new();
//!     let options = TailOptions::default();
//!     let service = TailService::start(&options, broadcaster.clone())?;
//!
//!     let cancel = CancellationToken::new();
//!     let mut session = Session::attach(&broadcaster, Duration::from_secs(5), cancel);
//!     while let Some(frame) = session.next_frame().await {
//!         print!("{}", frame.encode());
//!     }
//!
//!     service.stop().await;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod log_record;
pub mod logging;
pub mod offsets;
pub mod server;
pub mod session;
pub mod stream;
pub mod watcher;

pub use broadcast::{Broadcaster, SubscriberChannel};
pub use error::{Error, ExtractError};
pub use extractor::LineExtractor;
pub use log_record::LogRecord;
pub use offsets::OffsetTracker;
pub use session::{Frame, Session};
pub use watcher::{ChangeDetector, FileChange, TailOptions, TailService};
