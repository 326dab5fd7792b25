//! WebSocket connection tracker
//!
//! Registry of observed WebSocket connections and their bounded frame
//! buffers, fed by the socket instrumentation wrapper. Independent of the
//! HTTP record store; every mutation notifies observers asynchronously so
//! inspection UIs can refresh without polling.

use crate::models::{
    ConnectionStatus, FrameDirection, WebSocketConnection, WebSocketFrame,
};
use std::sync::Mutex;

pub struct WebSocketStore {
    connections: Mutex<Vec<WebSocketConnection>>,
}

impl WebSocketStore {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
        }
    }

    // Connection management

    pub fn add_connection(&self, connection: WebSocketConnection) {
        self.connections
            .lock()
            .expect("websocket store poisoned")
            .push(connection);
        self.notify();
    }

    pub fn remove_connection(&self, id: &str) {
        self.connections
            .lock()
            .expect("websocket store poisoned")
            .retain(|c| c.id != id);
        self.notify();
    }

    pub fn get_connection(&self, id: &str) -> Option<WebSocketConnection> {
        self.connections
            .lock()
            .expect("websocket store poisoned")
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub fn connections(&self) -> Vec<WebSocketConnection> {
        self.connections
            .lock()
            .expect("websocket store poisoned")
            .clone()
    }

    pub fn active_connections(&self) -> Vec<WebSocketConnection> {
        self.connections
            .lock()
            .expect("websocket store poisoned")
            .iter()
            .filter(|c| c.is_active())
            .cloned()
            .collect()
    }

    /// Connections ordered by most recent activity first
    pub fn connections_by_activity(&self) -> Vec<WebSocketConnection> {
        let mut connections = self.connections();
        connections.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        connections
    }

    /// Update a connection's lifecycle state; bumps its activity timestamp
    pub fn update_status(&self, id: &str, status: ConnectionStatus) {
        {
            let mut connections = self.connections.lock().expect("websocket store poisoned");
            match connections.iter_mut().find(|c| c.id == id) {
                Some(connection) => connection.set_status(status),
                None => return,
            }
        }
        self.notify();
    }

    /// Mark a connection closed on behalf of the inspection UI
    pub fn force_close(&self, id: &str) {
        self.update_status(id, ConnectionStatus::Closed);
    }

    // Frame management

    /// Route a captured frame to its owning connection. Evicts the oldest
    /// frame past the per-connection bound and increments the unread count.
    pub fn add_frame(&self, frame: WebSocketFrame) {
        {
            let mut connections = self.connections.lock().expect("websocket store poisoned");
            match connections
                .iter_mut()
                .find(|c| c.id == frame.connection_id)
            {
                Some(connection) => connection.push_frame(frame),
                None => {
                    tracing::debug!(
                        connection_id = %frame.connection_id,
                        "dropping frame for unknown connection"
                    );
                    return;
                }
            }
        }
        self.notify();
    }

    pub fn clear_frames(&self, id: &str) {
        {
            let mut connections = self.connections.lock().expect("websocket store poisoned");
            match connections.iter_mut().find(|c| c.id == id) {
                Some(connection) => connection.clear_frames(),
                None => return,
            }
        }
        self.notify();
    }

    pub fn clear_all_frames(&self) {
        self.connections
            .lock()
            .expect("websocket store poisoned")
            .iter_mut()
            .for_each(|c| c.clear_frames());
        self.notify();
    }

    pub fn mark_as_read(&self, id: &str) {
        {
            let mut connections = self.connections.lock().expect("websocket store poisoned");
            match connections.iter_mut().find(|c| c.id == id) {
                Some(connection) => connection.mark_as_read(),
                None => return,
            }
        }
        self.notify();
    }

    pub fn remove_all(&self) {
        self.connections
            .lock()
            .expect("websocket store poisoned")
            .clear();
        self.notify();
    }

    // Queries

    /// Frames of a connection filtered by direction and minimum payload size
    pub fn filter_frames(
        &self,
        id: &str,
        direction: Option<FrameDirection>,
        min_size: usize,
    ) -> Vec<WebSocketFrame> {
        let connections = self.connections.lock().expect("websocket store poisoned");
        let connection = match connections.iter().find(|c| c.id == id) {
            Some(connection) => connection,
            None => return Vec::new(),
        };
        connection
            .frames
            .iter()
            .filter(|f| direction.map_or(true, |d| f.direction == d))
            .filter(|f| f.payload_size >= min_size)
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search over decoded text or pretty-printed
    /// JSON payloads. An empty query returns every frame.
    pub fn search_frames(&self, id: &str, query: &str) -> Vec<WebSocketFrame> {
        let connections = self.connections.lock().expect("websocket store poisoned");
        let connection = match connections.iter().find(|c| c.id == id) {
            Some(connection) => connection,
            None => return Vec::new(),
        };
        if query.is_empty() {
            return connection.frames.iter().cloned().collect();
        }

        let lowered = query.to_lowercase();
        connection
            .frames
            .iter()
            .filter(|frame| {
                if let Some(text) = frame.payload_string() {
                    if text.to_lowercase().contains(&lowered) {
                        return true;
                    }
                }
                if let Some(json) = frame.pretty_printed_json() {
                    if json.to_lowercase().contains(&lowered) {
                        return true;
                    }
                }
                false
            })
            .cloned()
            .collect()
    }

    pub fn frame_count(&self, id: &str) -> usize {
        self.get_connection(id).map_or(0, |c| c.frames.len())
    }

    pub fn unread_count(&self, id: &str) -> usize {
        self.get_connection(id).map_or(0, |c| c.unread_frame_count)
    }

    /// Unread frames summed across all connections
    pub fn total_unread_count(&self) -> usize {
        self.connections
            .lock()
            .expect("websocket store poisoned")
            .iter()
            .map(|c| c.unread_frame_count)
            .sum()
    }

    fn notify(&self) {
        crate::api::notify_websocket_changed();
    }
}

impl Default for WebSocketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FrameType, MAX_FRAMES_PER_CONNECTION};

    fn frame(connection_id: &str, direction: FrameDirection, payload: &[u8]) -> WebSocketFrame {
        WebSocketFrame::new(
            connection_id.to_string(),
            direction,
            FrameType::Text,
            payload.to_vec(),
        )
    }

    fn store_with_connection(url: &str) -> (WebSocketStore, String) {
        let store = WebSocketStore::new();
        let connection = WebSocketConnection::new(url, None);
        let id = connection.id.clone();
        store.add_connection(connection);
        (store, id)
    }

    #[test]
    fn frames_route_to_owning_connection() {
        let (store, id) = store_with_connection("wss://a.example.com/socket");
        let other = WebSocketConnection::new("wss://b.example.com/socket", None);
        let other_id = other.id.clone();
        store.add_connection(other);

        store.add_frame(frame(&id, FrameDirection::Sent, b"hello"));
        assert_eq!(store.frame_count(&id), 1);
        assert_eq!(store.frame_count(&other_id), 0);

        // Frames for unknown connections are dropped.
        store.add_frame(frame("missing", FrameDirection::Sent, b"x"));
        assert_eq!(store.frame_count(&id), 1);
    }

    #[test]
    fn frame_eviction_at_capacity() {
        let (store, id) = store_with_connection("wss://example.com/socket");
        for i in 0..(MAX_FRAMES_PER_CONNECTION + 1) {
            store.add_frame(frame(&id, FrameDirection::Received, i.to_string().as_bytes()));
        }
        let connection = store.get_connection(&id).unwrap();
        assert_eq!(connection.frames.len(), MAX_FRAMES_PER_CONNECTION);
        assert_eq!(connection.frames.front().unwrap().payload, b"1".to_vec());
    }

    #[test]
    fn unread_counting_and_mark_as_read() {
        let (store, id) = store_with_connection("wss://a.example.com");
        let second = WebSocketConnection::new("wss://b.example.com", None);
        let second_id = second.id.clone();
        store.add_connection(second);

        store.add_frame(frame(&id, FrameDirection::Received, b"1"));
        store.add_frame(frame(&id, FrameDirection::Received, b"2"));
        store.add_frame(frame(&second_id, FrameDirection::Sent, b"3"));

        assert_eq!(store.unread_count(&id), 2);
        assert_eq!(store.unread_count(&second_id), 1);
        assert_eq!(store.total_unread_count(), 3);

        store.mark_as_read(&id);
        assert_eq!(store.unread_count(&id), 0);
        assert_eq!(store.total_unread_count(), 1);
    }

    #[test]
    fn status_updates_touch_activity_and_track_lifecycle() {
        let (store, id) = store_with_connection("wss://example.com");
        let before = store.get_connection(&id).unwrap().last_activity_at;

        store.update_status(&id, ConnectionStatus::Connected);
        let connection = store.get_connection(&id).unwrap();
        assert_eq!(connection.status, ConnectionStatus::Connected);
        assert!(connection.last_activity_at >= before);

        store.update_status(&id, ConnectionStatus::Error("reset".to_string()));
        assert!(store.active_connections().is_empty());
        // Terminal connections stay queryable.
        assert!(store.get_connection(&id).is_some());
    }

    #[test]
    fn filter_frames_by_direction_and_size() {
        let (store, id) = store_with_connection("wss://example.com");
        store.add_frame(frame(&id, FrameDirection::Sent, b"tiny"));
        store.add_frame(frame(&id, FrameDirection::Received, b"a larger payload"));
        store.add_frame(frame(&id, FrameDirection::Received, b"x"));

        let received = store.filter_frames(&id, Some(FrameDirection::Received), 0);
        assert_eq!(received.len(), 2);

        let large = store.filter_frames(&id, None, 5);
        assert_eq!(large.len(), 1);
        assert_eq!(large[0].payload, b"a larger payload".to_vec());
    }

    #[test]
    fn search_covers_text_and_pretty_json() {
        let (store, id) = store_with_connection("wss://example.com");
        store.add_frame(frame(&id, FrameDirection::Received, b"plain TEXT frame"));
        store.add_frame(frame(&id, FrameDirection::Received, br#"{"user":"Alice"}"#));

        assert_eq!(store.search_frames(&id, "text").len(), 1);
        assert_eq!(store.search_frames(&id, "alice").len(), 1);
        assert_eq!(store.search_frames(&id, "").len(), 2);
        assert!(store.search_frames(&id, "absent").is_empty());
    }

    #[test]
    fn clear_frames_resets_unread() {
        let (store, id) = store_with_connection("wss://example.com");
        store.add_frame(frame(&id, FrameDirection::Received, b"1"));
        store.clear_frames(&id);

        assert_eq!(store.frame_count(&id), 0);
        assert_eq!(store.unread_count(&id), 0);

        store.add_frame(frame(&id, FrameDirection::Received, b"2"));
        store.clear_all_frames();
        assert_eq!(store.total_unread_count(), 0);
    }
}
