//! Per-file read offsets.
//!
//! The tracker remembers how many bytes of each monitored file have already
//! been turned into records. A path seen for the first time starts at the
//! file's current size so that content written before logcast started is
//! never replayed; a file created while we are running starts at 0.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Result of comparing a fresh size measurement with the tracked offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The file is exactly as long as what we have consumed.
    Unchanged,
    /// New bytes are available in `from..to`.
    Grew { from: u64, to: u64 },
    /// The file shrank below the tracked offset (truncated or rotated).
    /// The offset has been reset to 0.
    Truncated { from: u64, to: u64 },
}

#[derive(Debug, Default)]
pub struct OffsetTracker {
    offsets: HashMap<PathBuf, u64>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tracked offset for `path`.
    ///
    /// On first sight the file is measured and tracking begins at its
    /// current size.
    pub fn current_offset(&mut self, path: &Path) -> io::Result<u64> {
        if let Some(offset) = self.offsets.get(path) {
            return Ok(*offset);
        }
        self.prime(path)
    }

    /// Start tracking `path` at its current size, replacing any previous
    /// offset. Used for files that already exist when watching begins.
    pub fn prime(&mut self, path: &Path) -> io::Result<u64> {
        let size = std::fs::metadata(path)?.len();
        self.offsets.insert(path.to_path_buf(), size);
        Ok(size)
    }

    /// Start tracking a newly created file from its first byte.
    ///
    /// Does nothing if the path is already tracked, so a create event that
    /// races a modify event cannot rewind the offset.
    pub fn track_from_start(&mut self, path: &Path) {
        self.offsets.entry(path.to_path_buf()).or_insert(0);
    }

    /// Move the offset for `path` forward to `new_offset`.
    ///
    /// # Panics
    ///
    /// Panics if `new_offset` is behind the tracked offset. Offsets only move
    /// backwards through [`reset`](Self::reset).
    pub fn advance(&mut self, path: &Path, new_offset: u64) {
        let offset = self.offsets.entry(path.to_path_buf()).or_insert(0);
        assert!(
            new_offset >= *offset,
            "offset for {} cannot move backwards ({} -> {})",
            path.display(),
            *offset,
            new_offset
        );
        *offset = new_offset;
    }

    /// Rewind `path` to the beginning of the file.
    pub fn reset(&mut self, path: &Path) {
        self.offsets.insert(path.to_path_buf(), 0);
    }

    /// Stop tracking `path`. Returns the last offset, if any.
    pub fn forget(&mut self, path: &Path) -> Option<u64> {
        self.offsets.remove(path)
    }

    /// Classify a size measurement of `path` against the tracked offset.
    ///
    /// An untracked path begins tracking at `size` and reports `Unchanged`.
    /// A size below the offset resets the offset to 0 and reports
    /// `Truncated`; the bytes now in the file are picked up on the next
    /// growth, not by this call.
    pub fn observe(&mut self, path: &Path, size: u64) -> Observation {
        let offset = self.offsets.entry(path.to_path_buf()).or_insert(size);
        if size > *offset {
            Observation::Grew {
                from: *offset,
                to: size,
            }
        } else if size < *offset {
            let from = *offset;
            *offset = 0;
            Observation::Truncated { from, to: size }
        } else {
            Observation::Unchanged
        }
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.offsets.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<u64> {
        self.offsets.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
