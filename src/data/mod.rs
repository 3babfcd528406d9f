//! Datasets served by golook
//!
//! Each dataset is fetched from a remote source as a newline-delimited body and
//! parsed as a whole: one malformed line rejects the entire response.

pub mod keys;
pub mod links;

pub use keys::{KeyRecord, KeysClient};
pub use links::{LinkRecord, LinksClient};

use thiserror::Error;

/// Errors that can occur while fetching or parsing a dataset
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed or returned a non-success status
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// A line of the response could not be parsed
    #[error("invalid record on line {line}: {reason}")]
    InvalidRecord { line: usize, reason: String },
}

impl FetchError {
    pub(crate) fn invalid(line: usize, reason: impl Into<String>) -> Self {
        FetchError::InvalidRecord {
            line,
            reason: reason.into(),
        }
    }
}

/// Iterates over non-blank lines with their 1-based line numbers
pub(crate) fn numbered_lines(body: &str) -> impl Iterator<Item = (usize, &str)> {
    body.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_lines_skips_blanks_and_keeps_positions() {
        let body = "first\n\n  \nsecond\r\nthird\n";
        let lines: Vec<_> = numbered_lines(body).collect();
        assert_eq!(lines, vec![(1, "first"), (4, "second"), (5, "third")]);
    }

    #[test]
    fn test_invalid_record_message_names_line() {
        let err = FetchError::invalid(7, "bad json");
        assert_eq!(err.to_string(), "invalid record on line 7: bad json");
    }
}
