use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort startup of the tail service or the HTTP server.
///
/// Per-file and per-subscriber failures never surface here; they are logged
/// and handled where they occur.
#[derive(Debug, Error)]
pub enum Error {
    #[error("filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("monitored path not found: {}", .0.display())]
    PathNotFound(PathBuf),
    #[error("no paths to monitor")]
    NoPaths,
    #[error("server error: {0}")]
    Io(#[from] io::Error),
}

/// Failure while extracting new lines from one file.
///
/// The extractor stops tracking the path whenever one of these is returned.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not read {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} contains a line that is not valid UTF-8", .path.display())]
    InvalidUtf8 { path: PathBuf },
}

impl ExtractError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        ExtractError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            ExtractError::Io { path, .. } | ExtractError::InvalidUtf8 { path } => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_notify() {
        let err = Error::Notify(notify::Error::generic("test"));
        assert!(format!("{}", err).contains("filesystem watcher error"));
    }

    #[test]
    fn test_error_display_path_not_found() {
        let err = Error::PathNotFound(PathBuf::from("/no/such/logs"));
        let msg = format!("{}", err);
        assert!(msg.contains("monitored path not found"));
        assert!(msg.contains("/no/such/logs"));
    }

    #[test]
    fn test_extract_error_keeps_path() {
        let err = ExtractError::io(
            std::path::Path::new("/var/log/app.log"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.path(), std::path::Path::new("/var/log/app.log"));
        assert!(format!("{}", err).contains("/var/log/app.log"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
