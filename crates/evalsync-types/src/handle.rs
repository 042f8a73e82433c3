//! Log handles and the conditional manifest token.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One entry in the remote manifest: a log file's stable identifier and its
/// last-modified version. Identity is `name`; a newer `mtime` supersedes the
/// handle rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHandle {
    /// Stable identifier (path or URI) of the log file.
    pub name: String,
    /// Last-modified time in epoch milliseconds; versions the content.
    pub mtime: i64,
}

impl LogHandle {
    pub fn new(name: impl Into<String>, mtime: i64) -> Self {
        Self {
            name: name.into(),
            mtime,
        }
    }
}

/// Composite ETag-like token for the conditional manifest fetch: the maximum
/// `mtime` across the client's handles plus the client's file count, rendered
/// as `"{mtime}-{count}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionalToken {
    pub mtime: i64,
    pub file_count: usize,
}

impl ConditionalToken {
    /// Token summarizing a client-held handle set; `None` when the client
    /// holds nothing (an unconditional fetch).
    pub fn for_handles(handles: &[LogHandle]) -> Option<Self> {
        if handles.is_empty() {
            return None;
        }
        Some(Self {
            mtime: handles.iter().map(|h| h.mtime).max().unwrap_or(0),
            file_count: handles.len(),
        })
    }
}

impl fmt::Display for ConditionalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.mtime, self.file_count)
    }
}

impl FromStr for ConditionalToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // tolerate the weak-etag wrapper some servers send back
        let s = s.strip_prefix("W/\"").and_then(|s| s.strip_suffix('"')).unwrap_or(s);
        let (mtime, count) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid log token: {s}"))?;
        Ok(Self {
            mtime: mtime.parse().map_err(|_| format!("invalid log token: {s}"))?,
            file_count: count.parse().map_err(|_| format!("invalid log token: {s}"))?,
        })
    }
}

/// Result of the conditional manifest fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogListing {
    /// Current manifest, remote-authoritative.
    Listing(Vec<LogHandle>),
    /// Client's token still matches server state.
    NotModified,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_handles() {
        assert_eq!(ConditionalToken::for_handles(&[]), None);
        let handles = vec![LogHandle::new("a", 3), LogHandle::new("b", 7)];
        let token = ConditionalToken::for_handles(&handles).unwrap();
        assert_eq!(token.mtime, 7);
        assert_eq!(token.file_count, 2);
    }

    #[test]
    fn test_token_round_trip() {
        let token = ConditionalToken {
            mtime: 1234,
            file_count: 9,
        };
        assert_eq!(token.to_string(), "1234-9");
        assert_eq!("1234-9".parse::<ConditionalToken>().unwrap(), token);
        assert_eq!("W/\"1234-9\"".parse::<ConditionalToken>().unwrap(), token);
        assert!("garbage".parse::<ConditionalToken>().is_err());
    }
}
