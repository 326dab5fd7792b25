//! Request record model
//!
//! Represents a single HTTP request/response exchange captured by the
//! interceptor (or submitted through the manual logging entry point).

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    /// Convert from string (lossy, defaults to GET)
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            "CONNECT" => HttpMethod::Connect,
            "TRACE" => HttpMethod::Trace,
            _ => HttpMethod::Get,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(HttpMethod::from_str_lossy(s))
    }
}

/// How the request body was serialized by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestSerializer {
    #[default]
    Json,
    Form,
}

/// URL suffixes treated as images regardless of the reported MIME type
const IMAGE_SUFFIXES: [&str; 4] = ["png", "jpg", "gif", "jpeg"];

/// A single captured HTTP exchange.
///
/// Created empty when a session starts loading, mutated field-by-field as
/// response metadata arrives, and finalized exactly once on completion,
/// failure, or cancellation. Immutable after insertion into the record store
/// except for the decrypted-body back-fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRecord {
    /// Unique request id, stable for the lifetime of one logical request
    pub request_id: String,

    /// Target URL
    pub url: String,

    /// HTTP method
    pub method: HttpMethod,

    /// Request headers
    pub request_headers: HashMap<String, String>,
    /// Request body (if any)
    pub request_body: Option<Vec<u8>>,
    /// Serializer kind inferred from the request content type
    pub request_serializer: RequestSerializer,

    /// Status code in string form; "0" if a response never arrived
    pub status_code: String,
    /// Response headers
    pub response_headers: HashMap<String, String>,
    /// Accumulated response body bytes
    pub response_body: Vec<u8>,
    /// Decrypted response body, back-filled by the decryption pipeline
    pub decrypted_response_body: Option<Vec<u8>>,
    /// Response MIME type
    pub mime_type: Option<String>,
    /// Human-formatted response size
    pub size: String,

    /// When the request started
    pub start_time: DateTime<Utc>,
    /// When the exchange finished (success or failure)
    pub end_time: Option<DateTime<Utc>>,
    /// Total duration in seconds
    pub duration_secs: Option<f64>,

    /// Raw error description; absent on success
    pub error_description: Option<String>,
    /// Human-readable error description; absent on success
    pub error_localized_description: Option<String>,

    /// Whether the response looks like an image (MIME or URL suffix)
    pub is_image: bool,
    /// Whether the response bytes were detected as encrypted
    pub is_encrypted: bool,

    /// Insertion order in the record store, also the display id
    pub index: usize,
}

impl HttpRecord {
    /// Create a new record for a request that is about to start loading
    pub fn new(url: &str, method: HttpMethod) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            method,
            request_headers: HashMap::new(),
            request_body: None,
            request_serializer: RequestSerializer::default(),
            status_code: "0".to_string(),
            response_headers: HashMap::new(),
            response_body: Vec::new(),
            decrypted_response_body: None,
            mime_type: None,
            size: format_size(0),
            start_time: Utc::now(),
            end_time: None,
            duration_secs: None,
            error_description: None,
            error_localized_description: None,
            is_image: false,
            is_encrypted: false,
            index: 0,
        }
    }

    /// Display id, derived from the insertion index
    pub fn display_id(&self) -> String {
        self.index.to_string()
    }

    /// A record is successful iff it carries no error description
    pub fn is_success(&self) -> bool {
        self.error_description
            .as_deref()
            .map(str::is_empty)
            .unwrap_or(true)
    }

    /// Host component of the URL, if it parses
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Status code as a number; 0 when no response arrived
    pub fn status_code_value(&self) -> u16 {
        self.status_code.parse().unwrap_or(0)
    }

    /// Response body size in bytes
    pub fn response_size(&self) -> usize {
        self.response_body.len()
    }

    /// Total duration formatted to 4 decimal places, e.g. "0.1234 (s)"
    pub fn duration_str(&self) -> String {
        match self.duration_secs {
            Some(secs) => format!("{:.4} (s)", secs),
            None => "-".to_string(),
        }
    }

    /// Stamp the end of the exchange and derive duration and size
    pub fn finish(&mut self, end_time: DateTime<Utc>) {
        let duration = (end_time - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.end_time = Some(end_time);
        self.duration_secs = Some(duration);
        self.size = format_size(self.response_body.len());
    }

    /// Classify the record as an image by MIME type or URL suffix
    pub fn classify_image(&mut self) {
        self.is_image = self
            .mime_type
            .as_deref()
            .map(|m| m.contains("image"))
            .unwrap_or(false);

        let lowered = self.url.to_lowercase();
        if IMAGE_SUFFIXES.iter().any(|ext| lowered.ends_with(ext)) {
            self.is_image = true;
        }
    }

    /// Response body encoded for transfer to inspection UIs
    pub fn response_body_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.response_body)
    }

    /// Decrypted body (when the pipeline produced one) encoded for transfer
    pub fn decrypted_body_base64(&self) -> Option<String> {
        self.decrypted_response_body
            .as_ref()
            .map(|b| base64::engine::general_purpose::STANDARD.encode(b))
    }
}

/// Format a byte count as a short human-readable string
pub fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
