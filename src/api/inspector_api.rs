//! Inspection and control API
//!
//! This module provides the main API for configuring the interception engine
//! and reading captured traffic from an inspection UI.

use crate::interceptor::cache::ResponseCache;
use crate::interceptor::encryption::EncryptionService;
use crate::interceptor::injection::{NetworkFailureConfig, RequestDelayConfig};
use crate::interceptor::transport::HttpTransport;
use crate::interceptor::Interceptor;
use crate::models::{HttpMethod, HttpRecord, HttpRequestFilter};
use crate::storage::{RecordStore, WebSocketStore};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Push notification for external observers. Informational only: consumers
/// re-read store state rather than treat the payload as a snapshot.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A record was accepted into the store
    RecordAdded { status_code: String, success: bool },
    /// The WebSocket tracker changed
    WebSocketChanged,
}

static ENGINE: Lazy<Mutex<Option<Arc<Interceptor>>>> = Lazy::new(|| Mutex::new(None));
static WEBSOCKETS: Lazy<Arc<WebSocketStore>> = Lazy::new(|| Arc::new(WebSocketStore::new()));
static EVENTS: Lazy<broadcast::Sender<MonitorEvent>> = Lazy::new(|| {
    let (tx, _rx) = broadcast::channel(512);
    tx
});

/// Get the version of the DebugLens core library
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Initialize logging (call once at startup).
/// `storage_path` is used to store log files in release mode.
#[allow(unused_variables)]
pub fn init_core(storage_path: Option<String>) -> Result<bool, String> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }

    #[cfg(debug_assertions)]
    {
        // Debug mode: log to console (stderr)
        let level = resolve_log_level();
        let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
    }

    #[cfg(not(debug_assertions))]
    {
        // Release mode: log to file
        let level = resolve_log_level();

        let log_dir = storage_path
            .as_ref()
            .map(|p| std::path::PathBuf::from(p).join("logs"))
            .unwrap_or_else(|| std::path::PathBuf::from("logs"));

        std::fs::create_dir_all(&log_dir).map_err(|e| {
            format!(
                "Failed to create log directory {}: {}",
                log_dir.display(),
                e
            )
        })?;
        let file_appender = tracing_appender::rolling::daily(&log_dir, "debuglens_core");
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

        // Keep the guard alive for the lifetime of the program.
        std::mem::forget(_guard);

        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(non_blocking)
            .try_init();
    }

    tracing::info!("DebugLens core initialized v{}", env!("CARGO_PKG_VERSION"));
    Ok(true)
}

fn resolve_log_level() -> tracing::level_filters::LevelFilter {
    use tracing::level_filters::LevelFilter;

    match std::env::var("RUST_LOG") {
        Ok(val) => match val.to_lowercase().as_str() {
            "trace" => LevelFilter::TRACE,
            "debug" => LevelFilter::DEBUG,
            "info" => LevelFilter::INFO,
            "warn" | "warning" => LevelFilter::WARN,
            "error" => LevelFilter::ERROR,
            _ => LevelFilter::INFO,
        },
        Err(_) => LevelFilter::INFO,
    }
}

/// Initialize the global interception engine if not already present,
/// wired to the production transport and the shared encryption service.
pub fn init_engine() -> anyhow::Result<Arc<Interceptor>> {
    let mut guard = ENGINE
        .lock()
        .map_err(|e| anyhow::anyhow!("engine lock poisoned: {}", e))?;
    if let Some(engine) = guard.as_ref() {
        return Ok(Arc::clone(engine));
    }

    let transport = Arc::new(HttpTransport::new()?);
    let store = Arc::new(RecordStore::new(EncryptionService::shared()));
    let engine = Arc::new(Interceptor::new(
        transport,
        Arc::new(ResponseCache::default()),
        store,
    ));
    *guard = Some(Arc::clone(&engine));
    tracing::info!("interception engine initialized");
    Ok(engine)
}

/// Replace the global engine. Used by tests and by hosts that supply their
/// own transport.
pub fn install_engine(engine: Arc<Interceptor>) {
    if let Ok(mut guard) = ENGINE.lock() {
        *guard = Some(engine);
    }
}

fn engine() -> anyhow::Result<Arc<Interceptor>> {
    let guard = ENGINE
        .lock()
        .map_err(|e| anyhow::anyhow!("engine lock poisoned: {}", e))?;
    guard
        .clone()
        .ok_or_else(|| anyhow::anyhow!("interception engine not initialized"))
}

/// Turn interception on
pub fn enable() -> anyhow::Result<()> {
    engine()?.set_enabled(true);
    Ok(())
}

/// Turn interception off; pending sessions finish, new requests pass through
pub fn disable() -> anyhow::Result<()> {
    engine()?.set_enabled(false);
    Ok(())
}

pub fn is_enabled() -> bool {
    engine().map(|e| e.is_enabled()).unwrap_or(false)
}

/// Record only URLs containing one of these substrings
pub fn set_only_urls(urls: Vec<String>) -> anyhow::Result<()> {
    engine()?.store().set_only_urls(urls);
    Ok(())
}

/// Never record URLs containing any of these substrings
pub fn set_ignored_urls(urls: Vec<String>) -> anyhow::Result<()> {
    engine()?.store().set_ignored_urls(urls);
    Ok(())
}

pub fn set_decryption_enabled(enabled: bool) -> anyhow::Result<()> {
    engine()?.store().set_decryption_enabled(enabled);
    Ok(())
}

pub fn set_delay_config(config: RequestDelayConfig) -> anyhow::Result<()> {
    engine()?.set_delay_config(config);
    Ok(())
}

pub fn set_failure_config(config: NetworkFailureConfig) -> anyhow::Result<()> {
    engine()?.set_failure_config(config);
    Ok(())
}

/// Snapshot of captured records in insertion order
pub fn records() -> Vec<HttpRecord> {
    engine()
        .map(|e| e.store().records())
        .unwrap_or_default()
}

/// Snapshot of captured records matching a filter
pub fn filtered_records(filter: &HttpRequestFilter) -> Vec<HttpRecord> {
    engine()
        .map(|e| e.store().filtered(filter))
        .unwrap_or_default()
}

/// Clear all captured records
pub fn clear_records() -> anyhow::Result<()> {
    engine()?.store().remove_all();
    Ok(())
}

/// Drop all cached responses
pub fn clear_cache() -> anyhow::Result<()> {
    engine()?.cache().clear();
    Ok(())
}

/// The global WebSocket connection tracker
pub fn websockets() -> Arc<WebSocketStore> {
    Arc::clone(&WEBSOCKETS)
}

/// Subscribe to engine notifications
pub fn subscribe() -> broadcast::Receiver<MonitorEvent> {
    EVENTS.subscribe()
}

/// Fire-and-forget; never blocks the producing session
pub(crate) fn notify_record_added(status_code: &str, success: bool) {
    let _ = EVENTS.send(MonitorEvent::RecordAdded {
        status_code: status_code.to_string(),
        success,
    });
}

pub(crate) fn notify_websocket_changed() {
    let _ = EVENTS.send(MonitorEvent::WebSocketChanged);
}

/// A synthetic exchange submitted by a client library that does not route
/// through the standard transport.
#[derive(Debug, Clone)]
pub struct ManualExchange {
    pub url: String,
    pub method: HttpMethod,
    pub request_headers: HashMap<String, String>,
    pub request_body: Option<Vec<u8>>,
    pub response_headers: HashMap<String, String>,
    pub response_body: Vec<u8>,
    pub mime_type: Option<String>,
    pub status_code: u16,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub error: Option<String>,
}

impl ManualExchange {
    pub fn new(url: &str, method: HttpMethod) -> Self {
        let now = Utc::now();
        Self {
            url: url.to_string(),
            method,
            request_headers: HashMap::new(),
            request_body: None,
            response_headers: HashMap::new(),
            response_body: Vec::new(),
            mime_type: None,
            status_code: 0,
            start_time: now,
            end_time: now,
            error: None,
        }
    }
}

/// Manual logging entry point: build a record from a caller-described
/// exchange and submit it, bypassing the interceptor. Returns whether the
/// store accepted it.
pub fn log_request(exchange: ManualExchange) -> anyhow::Result<bool> {
    let engine = engine()?;

    let mut record = HttpRecord::new(&exchange.url, exchange.method);
    record.request_headers = exchange.request_headers;
    record.request_body = exchange.request_body;
    record.response_headers = exchange.response_headers;
    record.response_body = exchange.response_body;
    record.mime_type = exchange.mime_type;
    record.status_code = exchange.status_code.to_string();
    record.start_time = exchange.start_time;
    record.error_description = exchange.error.clone();
    record.error_localized_description = exchange.error;
    record.finish(exchange.end_time);
    record.classify_image();

    let accepted = engine.store().insert(record.clone());
    if accepted {
        notify_record_added(&record.status_code, record.is_success());
    }
    Ok(accepted)
}
