use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Display format for normalized timestamps in exported tables.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A post's point in time.
///
/// The raw attribute value is kept whenever it cannot be normalized, so a
/// timestamp is never lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostTimestamp {
    Parsed(DateTime<Utc>),
    Raw(String),
}

impl PostTimestamp {
    /// Normalize a machine-readable time attribute.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match DateTime::parse_from_rfc3339(trimmed) {
            Ok(dt) => Self::Parsed(dt.with_timezone(&Utc)),
            Err(_) => Self::Raw(raw.to_string()),
        }
    }

    /// Timestamp for an element without any time attribute.
    #[must_use]
    pub fn missing() -> Self {
        Self::Raw(String::new())
    }

    #[must_use]
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

impl fmt::Display for PostTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed(dt) => write!(f, "{}", dt.format(TIMESTAMP_FORMAT)),
            Self::Raw(raw) => f.write_str(raw),
        }
    }
}

/// Engagement counts. Unresolved counts are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub replies: u64,
    pub reshares: u64,
    pub favorites: u64,
}

/// One post extracted from a rendered timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub id: String,
    pub permalink: String,
    pub text: String,
    pub timestamp: PostTimestamp,
    pub metrics: Metrics,
    pub media_urls: Vec<String>,
}

impl PostRecord {
    #[must_use]
    pub fn has_media(&self) -> bool {
        !self.media_urls.is_empty()
    }
}
