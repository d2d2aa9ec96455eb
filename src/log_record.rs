//! The unit of data flowing from the tailer to subscribers.

use std::fmt;
use std::path::Path;

/// One complete line read from a monitored file.
///
/// `source_tag` identifies the file the line came from (see [`source_tag`]),
/// `text` is the line itself without its terminator. Neither contains a
/// `\r` or `\n`: an event-stream client would read those as a line break
/// and split the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    source_tag: String,
    text: String,
}

impl LogRecord {
    /// Build a record. Embedded carriage returns and newlines (progress bar
    /// output, odd file names) are replaced with a space.
    pub fn new(source_tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_tag: single_line(source_tag.into()),
            text: single_line(text.into()),
        }
    }

    pub fn source_tag(&self) -> &str {
        &self.source_tag
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.source_tag, self.text)
    }
}

fn is_line_break(c: char) -> bool {
    c == '\r' || c == '\n'
}

fn single_line(value: String) -> String {
    if value.contains(is_line_break) {
        value.replace(is_line_break, " ")
    } else {
        value
    }
}

/// Build the tag for lines read from `path`: its base name in brackets,
/// e.g. `[app.log]`.
///
/// Paths without a file name (such as `/` or `..`) fall back to the lossy
/// display of the whole path.
pub fn source_tag(path: &Path) -> String {
    match path.file_name() {
        Some(name) => format!("[{}]", name.to_string_lossy()),
        None => format!("[{}]", path.display()),
    }
}
