//! Request filtering
//!
//! A composable predicate evaluated against captured records by the
//! inspection UI. Filters are stateless values; they are re-evaluated per
//! query and never persisted with the records themselves.

use crate::models::record::HttpRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive status-code range, e.g. 400..=499
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCodeRange {
    pub min: u16,
    pub max: u16,
}

impl StatusCodeRange {
    pub const SUCCESS: StatusCodeRange = StatusCodeRange { min: 200, max: 299 };
    pub const REDIRECTION: StatusCodeRange = StatusCodeRange { min: 300, max: 399 };
    pub const CLIENT_ERROR: StatusCodeRange = StatusCodeRange { min: 400, max: 499 };
    pub const SERVER_ERROR: StatusCodeRange = StatusCodeRange { min: 500, max: 599 };

    pub fn contains(&self, code: u16) -> bool {
        code >= self.min && code <= self.max
    }
}

/// Time window a record's start time must fall into.
///
/// `LastHour` and `LastDay` are relative to filter-evaluation time, so
/// records age out of the window naturally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeRange {
    LastHour,
    LastDay,
    Custom {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl TimeRange {
    fn contains(&self, instant: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            TimeRange::LastHour => instant >= now - Duration::hours(1),
            TimeRange::LastDay => instant >= now - Duration::days(1),
            TimeRange::Custom { start, end } => instant >= *start && instant <= *end,
        }
    }
}

/// Conjunction of optional constraints over a captured record.
///
/// Evaluation short-circuits on the first failing constraint. Numeric and
/// time bounds are inclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpRequestFilter {
    /// Match any of these methods (upper-case strings)
    pub methods: Vec<String>,
    /// Match any of these status-code ranges
    pub status_code_ranges: Vec<StatusCodeRange>,
    /// Case-insensitive MIME-type substrings
    pub content_types: Vec<String>,
    /// Minimum response time in seconds (inclusive)
    pub min_response_time: Option<f64>,
    /// Maximum response time in seconds (inclusive)
    pub max_response_time: Option<f64>,
    /// Minimum response size in bytes (inclusive)
    pub min_size: Option<usize>,
    /// Maximum response size in bytes (inclusive)
    pub max_size: Option<usize>,
    /// Keep only failed records
    pub show_only_errors: bool,
    /// Keep only successful records
    pub show_only_successful: bool,
    /// Case-insensitive host substrings
    pub host_filters: Vec<String>,
    /// Start-time window
    pub time_range: Option<TimeRange>,
}

impl HttpRequestFilter {
    /// A filter is active iff at least one constraint is set
    pub fn is_active(&self) -> bool {
        !self.methods.is_empty()
            || !self.status_code_ranges.is_empty()
            || !self.content_types.is_empty()
            || self.min_response_time.is_some()
            || self.max_response_time.is_some()
            || self.min_size.is_some()
            || self.max_size.is_some()
            || self.show_only_errors
            || self.show_only_successful
            || !self.host_filters.is_empty()
            || self.time_range.is_some()
    }

    /// Evaluate the filter against a record
    pub fn matches(&self, record: &HttpRecord) -> bool {
        if !self.methods.is_empty() {
            let method = record.method.as_str();
            if !self.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
                return false;
            }
        }

        if !self.status_code_ranges.is_empty() {
            let code = record.status_code_value();
            if !self.status_code_ranges.iter().any(|r| r.contains(code)) {
                return false;
            }
        }

        if !self.content_types.is_empty() {
            let mime = match record.mime_type.as_deref() {
                Some(mime) => mime.to_lowercase(),
                None => return false,
            };
            if !self
                .content_types
                .iter()
                .any(|ct| mime.contains(&ct.to_lowercase()))
            {
                return false;
            }
        }

        if self.min_response_time.is_some() || self.max_response_time.is_some() {
            let duration = match record.duration_secs {
                Some(duration) => duration,
                None => return false,
            };
            if let Some(min) = self.min_response_time {
                if duration < min {
                    return false;
                }
            }
            if let Some(max) = self.max_response_time {
                if duration > max {
                    return false;
                }
            }
        }

        if let Some(min) = self.min_size {
            if record.response_size() < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if record.response_size() > max {
                return false;
            }
        }

        if self.show_only_errors && record.is_success() {
            return false;
        }
        if self.show_only_successful && !record.is_success() {
            return false;
        }

        if !self.host_filters.is_empty() {
            let host = match record.host() {
                Some(host) => host.to_lowercase(),
                None => return false,
            };
            if !self
                .host_filters
                .iter()
                .any(|h| host.contains(&h.to_lowercase()))
            {
                return false;
            }
        }

        if let Some(range) = &self.time_range {
            if !range.contains(record.start_time, Utc::now()) {
                return false;
            }
        }

        true
    }
}
