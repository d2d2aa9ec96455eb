//! Incremental line extraction.
//!
//! [`LineExtractor`] owns the [`OffsetTracker`] and turns the bytes appended
//! to a file since the previous call into [`LogRecord`]s. Only complete,
//! newline-terminated lines are emitted; a trailing partial line stays in
//! the file and is read whole once its terminator arrives.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ExtractError;
use crate::log_record::{source_tag, LogRecord};
use crate::offsets::{Observation, OffsetTracker};

/// Default cap on the bytes read by a single `extract_new` call (64 MB).
pub const DEFAULT_MAX_READ_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug)]
pub struct LineExtractor {
    tracker: OffsetTracker,
    max_read_bytes: u64,
    skip_blank_lines: bool,
    /// Paths in the middle of a line longer than `max_read_bytes`. Their
    /// bytes are dropped up to and including the next newline.
    discarding: HashSet<PathBuf>,
}

impl Default for LineExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LineExtractor {
    pub fn new() -> Self {
        Self {
            tracker: OffsetTracker::new(),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            skip_blank_lines: false,
            discarding: HashSet::new(),
        }
    }

    /// Limit how many bytes one call may read. Remaining growth is picked up
    /// by the next call.
    pub fn with_max_read_bytes(mut self, max_read_bytes: u64) -> Self {
        self.max_read_bytes = max_read_bytes.max(1);
        self
    }

    /// Drop lines that are empty (or only a carriage return) instead of
    /// emitting them.
    pub fn with_skip_blank_lines(mut self, skip: bool) -> Self {
        self.skip_blank_lines = skip;
        self
    }

    pub fn tracker(&self) -> &OffsetTracker {
        &self.tracker
    }

    /// Begin tracking an existing file at its current size.
    pub fn prime(&mut self, path: &Path) -> std::io::Result<u64> {
        self.discarding.remove(path);
        self.tracker.prime(path)
    }

    /// Begin tracking a file that was just created, from its first byte.
    pub fn track_created(&mut self, path: &Path) {
        if !self.tracker.is_tracked(path) {
            self.discarding.remove(path);
        }
        self.tracker.track_from_start(path);
    }

    pub fn forget(&mut self, path: &Path) -> Option<u64> {
        self.discarding.remove(path);
        self.tracker.forget(path)
    }

    /// Whether `path` is skipping the rest of an oversized line.
    pub fn is_discarding(&self, path: &Path) -> bool {
        self.discarding.contains(path)
    }

    /// Read the complete lines appended to `path` since the previous call.
    ///
    /// Returns an empty vector when the file did not grow, when it was seen
    /// for the first time, or when it was truncated (the offset is reset to 0
    /// and the new content is read on the next growth). On any error the path
    /// is no longer tracked.
    pub fn extract_new(&mut self, path: &Path) -> Result<Vec<LogRecord>, ExtractError> {
        let result = self.read_delta(path);
        if result.is_err() {
            self.forget(path);
        }
        result
    }

    fn read_delta(&mut self, path: &Path) -> Result<Vec<LogRecord>, ExtractError> {
        let size = std::fs::metadata(path)
            .map_err(|e| ExtractError::io(path, e))?
            .len();

        let from = match self.tracker.observe(path, size) {
            Observation::Unchanged => return Ok(Vec::new()),
            Observation::Truncated { from, to } => {
                info!(
                    path = %path.display(),
                    previous = from,
                    size = to,
                    "file truncated, resetting read position"
                );
                self.discarding.remove(path);
                return Ok(Vec::new());
            }
            Observation::Grew { from, to } => {
                debug!(path = %path.display(), from, to, "file grew");
                from
            }
        };

        let mut file = File::open(path).map_err(|e| ExtractError::io(path, e))?;
        file.seek(SeekFrom::Start(from))
            .map_err(|e| ExtractError::io(path, e))?;

        let limit = (size - from).min(self.max_read_bytes);
        let mut buf = Vec::with_capacity(limit as usize);
        file.take(limit)
            .read_to_end(&mut buf)
            .map_err(|e| ExtractError::io(path, e))?;

        let end = from + buf.len() as u64;

        // The rest of an oversized line runs up to the first newline.
        let mut start = 0;
        if self.discarding.contains(path) {
            match buf.iter().position(|b| *b == b'\n') {
                Some(idx) => {
                    debug!(path = %path.display(), "end of oversized line reached");
                    self.discarding.remove(path);
                    start = idx + 1;
                }
                None => {
                    self.tracker.advance(path, end);
                    return Ok(Vec::new());
                }
            }
        }

        // Everything after the last newline is a partial line: leave it.
        let complete_len = match buf.iter().rposition(|b| *b == b'\n') {
            Some(idx) => idx + 1,
            None => {
                if buf.len() as u64 >= self.max_read_bytes {
                    warn!(
                        path = %path.display(),
                        bytes = buf.len(),
                        "line exceeds read limit, skipping"
                    );
                    self.discarding.insert(path.to_path_buf());
                    self.tracker.advance(path, end);
                }
                return Ok(Vec::new());
            }
        };

        let tag = source_tag(path);
        let mut records = Vec::new();
        for raw in buf[start..complete_len].split_inclusive(|b| *b == b'\n') {
            let line = trim_terminator(raw);
            if self.skip_blank_lines && line.is_empty() {
                continue;
            }
            let text = std::str::from_utf8(line).map_err(|_| ExtractError::InvalidUtf8 {
                path: path.to_path_buf(),
            })?;
            records.push(LogRecord::new(tag.clone(), text));
        }

        self.tracker.advance(path, from + complete_len as u64);
        Ok(records)
    }
}

/// Strip the trailing `\n` and an optional `\r` before it.
fn trim_terminator(raw: &[u8]) -> &[u8] {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    line.strip_suffix(b"\r").unwrap_or(line)
}
