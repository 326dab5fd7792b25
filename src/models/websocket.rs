//! WebSocket connection and frame models
//!
//! Connections and frames are captured by an instrumentation wrapper around
//! the host application's sockets and tracked independently of the HTTP
//! record store.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a WebSocket frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameDirection {
    Sent,
    Received,
}

/// WebSocket frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    Text,
    Binary,
    Ping,
    Pong,
    Close,
    Continuation,
}

impl FrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameType::Text => "TEXT",
            FrameType::Binary => "BINARY",
            FrameType::Ping => "PING",
            FrameType::Pong => "PONG",
            FrameType::Close => "CLOSE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

/// Connection lifecycle state.
///
/// `Closed` and `Error` are terminal for activity purposes; the connection
/// record itself remains queryable after either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Closed,
    Error(String),
}

impl ConnectionStatus {
    pub fn display_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Reconnecting => "Reconnecting",
            ConnectionStatus::Closed => "Closed",
            ConnectionStatus::Error(_) => "Error",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Reconnecting
        )
    }
}

/// One discrete WebSocket message unit. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketFrame {
    /// Unique frame id
    pub id: String,
    /// When the frame was captured
    pub timestamp: DateTime<Utc>,
    /// Sent or received
    pub direction: FrameDirection,
    /// Frame type
    pub frame_type: FrameType,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Payload length in bytes
    pub payload_size: usize,
    /// Id of the owning connection
    pub connection_id: String,
}

impl WebSocketFrame {
    pub fn new(
        connection_id: String,
        direction: FrameDirection,
        frame_type: FrameType,
        payload: Vec<u8>,
    ) -> Self {
        let payload_size = payload.len();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            direction,
            frame_type,
            payload,
            payload_size,
            connection_id,
        }
    }

    /// Payload as UTF-8 text, for any frame whose bytes decode cleanly
    pub fn payload_string(&self) -> Option<String> {
        std::str::from_utf8(&self.payload).ok().map(str::to_string)
    }

    /// Whether the payload looks like a JSON document
    pub fn is_json(&self) -> bool {
        let text = match self.payload_string() {
            Some(text) => text,
            None => return false,
        };
        let trimmed = text.trim();
        (trimmed.starts_with('{') && trimmed.ends_with('}'))
            || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    }

    /// Payload pretty-printed as JSON, if it parses
    pub fn pretty_printed_json(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.payload).ok()?;
        serde_json::to_string_pretty(&value).ok()
    }

    /// Binary frames that carry valid text are surfaced as text
    pub fn effective_type(&self) -> FrameType {
        if self.frame_type == FrameType::Binary && self.payload_string().is_some() {
            FrameType::Text
        } else {
            self.frame_type
        }
    }

    /// Short preview for list rendering
    pub fn payload_preview(&self) -> String {
        if let Some(json) = self.pretty_printed_json() {
            json.chars().take(50).collect()
        } else if let Some(text) = self.payload_string() {
            text.chars().take(50).collect()
        } else {
            format!("<Binary Data: {} bytes>", self.payload_size)
        }
    }

    /// Hex dump of the payload bytes
    pub fn hex_dump(&self) -> String {
        self.payload
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Payload encoded for transfer to inspection UIs
    pub fn payload_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.payload)
    }
}

/// Maximum frames retained per connection; oldest are evicted first
pub const MAX_FRAMES_PER_CONNECTION: usize = 1000;

/// A tracked WebSocket connection and its bounded frame buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConnection {
    /// Unique connection id
    pub id: String,
    /// Target URL
    pub url: String,
    /// Optional logical channel name
    pub channel_name: Option<String>,
    /// Current lifecycle state
    pub status: ConnectionStatus,
    /// Captured frames, oldest first
    pub frames: std::collections::VecDeque<WebSocketFrame>,
    /// When the connection was first seen
    pub created_at: DateTime<Utc>,
    /// Last status change or frame capture
    pub last_activity_at: DateTime<Utc>,
    /// Frames captured since the connection was last marked as read
    pub unread_frame_count: usize,
}

impl WebSocketConnection {
    pub fn new(url: &str, channel_name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_string(),
            channel_name,
            status: ConnectionStatus::Connecting,
            frames: std::collections::VecDeque::new(),
            created_at: now,
            last_activity_at: now,
            unread_frame_count: 0,
        }
    }

    /// Channel name when present, otherwise the URL
    pub fn display_name(&self) -> &str {
        self.channel_name.as_deref().unwrap_or(&self.url)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Append a frame, evicting the oldest past the buffer bound
    pub(crate) fn push_frame(&mut self, frame: WebSocketFrame) {
        if self.frames.len() >= MAX_FRAMES_PER_CONNECTION {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
        self.unread_frame_count += 1;
        self.last_activity_at = Utc::now();
    }

    pub(crate) fn clear_frames(&mut self) {
        self.frames.clear();
        self.unread_frame_count = 0;
    }

    pub(crate) fn mark_as_read(&mut self) {
        self.unread_frame_count = 0;
    }

    pub(crate) fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.last_activity_at = Utc::now();
    }
}
