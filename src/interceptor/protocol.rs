//! Protocol interceptor
//!
//! Claims eligible outbound requests, forwards them to the real transport
//! and streams the response back unchanged while recording metadata as a
//! side effect. Each in-flight request is driven by its own task; callback
//! order within a session is serialized by the event channel:
//! redirect* → response → data* → completion.

use crate::interceptor::cache::{storage_policy, ResponseCache, StoragePolicy};
use crate::interceptor::canonical::{
    canonical_request, header_value, CanonicalRequest, CanonicalizeError, HttpRequest,
};
use crate::interceptor::injection::{InjectedFailure, NetworkFailureConfig, RequestDelayConfig};
use crate::interceptor::transport::{
    ResponseHead, Transport, TransportError, TransportEvent, TransportSession,
};
use crate::models::{HttpRecord, RequestSerializer};
use crate::storage::RecordStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Terminal state of a session. A session is idle until `load`, loading
/// while its driver task runs, and ends in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    fn as_str(&self) -> &'static str {
        match self {
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

/// A claimed request in flight. Events mirror the transport stream exactly;
/// dropping the session cancels the exchange, and partial metadata is still
/// recorded.
pub struct RequestSession {
    request_id: String,
    events: mpsc::Receiver<TransportEvent>,
}

impl RequestSession {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Next event in the serialized stream; `None` after a terminal event
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Drain the session to completion, accumulating the response
    pub async fn collect(mut self) -> SessionOutcome {
        let mut outcome = SessionOutcome {
            response: None,
            body: Vec::new(),
            error: None,
        };
        while let Some(event) = self.recv().await {
            match event {
                TransportEvent::Redirect { .. } => {
                    outcome.body.clear();
                }
                TransportEvent::Response(head) => outcome.response = Some(head),
                TransportEvent::Data(chunk) => outcome.body.extend_from_slice(&chunk),
                TransportEvent::Finished => break,
                TransportEvent::Failed(err) => {
                    outcome.error = Some(err);
                    break;
                }
            }
        }
        outcome
    }
}

impl futures::Stream for RequestSession {
    type Item = TransportEvent;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<TransportEvent>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Final shape of a drained session
#[derive(Debug)]
pub struct SessionOutcome {
    pub response: Option<ResponseHead>,
    pub body: Vec<u8>,
    pub error: Option<TransportError>,
}

/// The process-wide interception engine
pub struct Interceptor {
    transport: Arc<dyn Transport>,
    cache: Arc<ResponseCache>,
    store: Arc<RecordStore>,
    enabled: AtomicBool,
    delay: RwLock<RequestDelayConfig>,
    failure: RwLock<NetworkFailureConfig>,
}

impl Interceptor {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<ResponseCache>,
        store: Arc<RecordStore>,
    ) -> Self {
        Self {
            transport,
            cache,
            store,
            enabled: AtomicBool::new(true),
            delay: RwLock::new(RequestDelayConfig::default()),
            failure: RwLock::new(NetworkFailureConfig::default()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_delay_config(&self, config: RequestDelayConfig) {
        *self.delay.write().expect("delay config poisoned") = config;
    }

    pub fn set_failure_config(&self, config: NetworkFailureConfig) {
        *self.failure.write().expect("failure config poisoned") = config;
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Whether this request would be claimed: engine enabled, scheme is
    /// http/https, and the request has not already been through the engine.
    /// Anything else passes through to the caller's own transport untouched.
    pub fn claims(&self, request: &HttpRequest) -> bool {
        if !self.is_enabled() || request.intercepted {
            return false;
        }
        let scheme = request
            .url
            .split(':')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        scheme == "http" || scheme == "https"
    }

    /// Claim a request and start loading it.
    ///
    /// A malformed URL fails here and must be surfaced to the caller as a
    /// transport failure. On success the returned session streams the
    /// exchange; a finalized record lands in the store exactly once per
    /// session, on completion, failure, or cancellation.
    pub fn load(&self, request: HttpRequest) -> Result<RequestSession, CanonicalizeError> {
        let mut canonical = canonical_request(&request)?;
        canonical.intercepted = true;

        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let ctx = SessionContext {
            request_id: request_id.clone(),
            canonical,
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            delay: self.delay.read().expect("delay config poisoned").clone(),
            failure: self.failure.read().expect("failure config poisoned").clone(),
            tx,
        };
        tokio::spawn(drive_session(ctx));

        Ok(RequestSession { request_id, events: rx })
    }
}

/// Everything one session's driver task owns
struct SessionContext {
    request_id: String,
    canonical: CanonicalRequest,
    transport: Arc<dyn Transport>,
    cache: Arc<ResponseCache>,
    store: Arc<RecordStore>,
    delay: RequestDelayConfig,
    failure: NetworkFailureConfig,
    tx: mpsc::Sender<TransportEvent>,
}

async fn drive_session(ctx: SessionContext) {
    let SessionContext {
        request_id,
        canonical,
        transport,
        cache,
        store,
        delay,
        failure,
        tx,
    } = ctx;

    let mut record = new_record(&request_id, &canonical);

    // Cache fast path: a still-fresh entry completes the session without
    // touching the network.
    if let Some(cached) = cache.valid_cached(&canonical) {
        tracing::debug!(url = %record.url, "serving cached response");
        apply_response_head(&mut record, &cached.head);
        record.response_body = cached.body.clone();

        let mut state = SessionState::Completed;
        if tx.send(TransportEvent::Response(cached.head)).await.is_err()
            || tx
                .send(TransportEvent::Data(cached.body.into()))
                .await
                .is_err()
            || tx.send(TransportEvent::Finished).await.is_err()
        {
            state = SessionState::Cancelled;
        }
        finalize(&store, record, state);
        return;
    }

    let url = canonical.url.to_string();
    let method = canonical.method;

    if delay.applies_to(&url, method) {
        tokio::time::sleep(delay.delay()).await;
    }

    if failure.applies_to(&url, method) {
        if let Some(injected) = failure.roll() {
            let state = match injected {
                InjectedFailure::Error(err) => {
                    apply_error(&mut record, &err);
                    let _ = tx.send(TransportEvent::Failed(err)).await;
                    SessionState::Failed
                }
                InjectedFailure::HttpStatus(status) => {
                    let head = ResponseHead {
                        url: url.clone(),
                        status,
                        headers: HashMap::new(),
                        mime_type: None,
                    };
                    apply_response_head(&mut record, &head);
                    if tx.send(TransportEvent::Response(head)).await.is_err()
                        || tx.send(TransportEvent::Finished).await.is_err()
                    {
                        SessionState::Cancelled
                    } else {
                        SessionState::Completed
                    }
                }
            };
            tracing::debug!(url = %record.url, "failure injection fired");
            finalize(&store, record, state);
            return;
        }
    }

    // Normal path: open a transport session and stream it through, retrying
    // exactly once on a connection-lost error before any body bytes.
    let mut did_retry = false;
    let mut did_receive_data = false;
    let mut body: Vec<u8> = Vec::new();
    let mut response_head: Option<ResponseHead> = None;
    let mut policy = StoragePolicy::NotAllowed;

    'attempt: loop {
        let mut session: TransportSession = transport.open(canonical.clone());

        while let Some(event) = session.recv().await {
            match event {
                TransportEvent::Redirect { response, next } => {
                    // A new target invalidates anything accumulated so far.
                    body.clear();
                    response_head = Some(response.clone());
                    if tx
                        .send(TransportEvent::Redirect { response, next })
                        .await
                        .is_err()
                    {
                        finalize_with_body(&store, record, body, SessionState::Cancelled);
                        return;
                    }
                }
                TransportEvent::Response(head) => {
                    policy = storage_policy(&canonical, &head);
                    apply_response_head(&mut record, &head);
                    response_head = Some(head.clone());
                    if tx.send(TransportEvent::Response(head)).await.is_err() {
                        finalize_with_body(&store, record, body, SessionState::Cancelled);
                        return;
                    }
                }
                TransportEvent::Data(chunk) => {
                    did_receive_data = true;
                    body.extend_from_slice(&chunk);
                    if tx.send(TransportEvent::Data(chunk)).await.is_err() {
                        finalize_with_body(&store, record, body, SessionState::Cancelled);
                        return;
                    }
                }
                TransportEvent::Finished => {
                    if let Some(head) = &response_head {
                        cache.store_if_needed(&canonical, head, &body, policy);
                    }
                    let state = if tx.send(TransportEvent::Finished).await.is_err() {
                        SessionState::Cancelled
                    } else {
                        SessionState::Completed
                    };
                    finalize_with_body(&store, record, body, state);
                    return;
                }
                TransportEvent::Failed(err) => {
                    if err.is_connection_lost() && !did_retry && !did_receive_data {
                        did_retry = true;
                        tracing::debug!(url = %record.url, "connection lost, retrying once");
                        continue 'attempt;
                    }
                    apply_error(&mut record, &err);
                    let _ = tx.send(TransportEvent::Failed(err)).await;
                    finalize_with_body(&store, record, body, SessionState::Failed);
                    return;
                }
            }
        }

        // The transport closed its stream without a terminal event.
        let err = TransportError::Other("transport closed unexpectedly".to_string());
        apply_error(&mut record, &err);
        let _ = tx.send(TransportEvent::Failed(err)).await;
        finalize_with_body(&store, record, body, SessionState::Failed);
        return;
    }
}

fn new_record(request_id: &str, canonical: &CanonicalRequest) -> HttpRecord {
    let mut record = HttpRecord::new(canonical.url.as_str(), canonical.method);
    record.request_id = request_id.to_string();
    record.request_headers = canonical.headers.clone();
    record.request_body = canonical.body.clone();
    record.request_serializer = match header_value(&canonical.headers, "Content-Type") {
        Some(ct) if ct.contains("x-www-form-urlencoded") => RequestSerializer::Form,
        _ => RequestSerializer::Json,
    };
    record
}

fn apply_response_head(record: &mut HttpRecord, head: &ResponseHead) {
    record.status_code = head.status.to_string();
    record.response_headers = head.headers.clone();
    record.mime_type = head.mime_type.clone();
}

fn apply_error(record: &mut HttpRecord, err: &TransportError) {
    record.error_description = Some(err.to_string());
    record.error_localized_description = Some(err.localized_description());
}

fn finalize_with_body(
    store: &RecordStore,
    mut record: HttpRecord,
    body: Vec<u8>,
    state: SessionState,
) {
    record.response_body = body;
    finalize(store, record, state);
}

/// Build the final record from accumulated state and hand it to the store.
/// Runs exactly once per session, for every terminal state.
fn finalize(store: &RecordStore, mut record: HttpRecord, state: SessionState) {
    record.finish(Utc::now());
    record.classify_image();
    tracing::debug!(
        url = %record.url,
        status = %record.status_code,
        state = state.as_str(),
        "session finished"
    );
    if store.insert(record.clone()) {
        crate::api::notify_record_added(&record.status_code, record.is_success());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::encryption::EncryptionService;
    use crate::interceptor::injection::FailureKind;
    use crate::models::HttpMethod;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    /// Transport that replays one scripted event list per `open` call
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
        opens: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Vec<TransportEvent>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                opens: AtomicUsize::new(0),
            }
        }

        fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        fn open(&self, _request: CanonicalRequest) -> TransportSession {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default();
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let handle: JoinHandle<()> = tokio::spawn(async move {
                for event in script {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            });
            TransportSession::new(rx, handle)
        }
    }

    fn ok_head(status: u16, headers: &[(&str, &str)]) -> ResponseHead {
        ResponseHead {
            url: "https://api.example.com/test".to_string(),
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            mime_type: Some("application/json".to_string()),
        }
    }

    fn engine(scripts: Vec<Vec<TransportEvent>>) -> (Arc<ScriptedTransport>, Interceptor) {
        let transport = Arc::new(ScriptedTransport::new(scripts));
        let store = Arc::new(RecordStore::new(EncryptionService::shared()));
        let interceptor = Interceptor::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(ResponseCache::default()),
            store,
        );
        (transport, interceptor)
    }

    #[tokio::test]
    async fn completed_exchange_is_recorded() {
        let (transport, interceptor) = engine(vec![vec![
            TransportEvent::Response(ok_head(200, &[("Content-Type", "application/json")])),
            TransportEvent::Data(bytes::Bytes::from_static(br#"{"ok":true}"#)),
            TransportEvent::Finished,
        ]]);

        let request = HttpRequest::new("https://api.example.com/test", HttpMethod::Get);
        assert!(interceptor.claims(&request));

        let session = interceptor.load(request).unwrap();
        let outcome = session.collect().await;

        assert_eq!(outcome.response.as_ref().unwrap().status, 200);
        assert_eq!(outcome.body, br#"{"ok":true}"#);
        assert!(outcome.error.is_none());
        assert_eq!(transport.open_count(), 1);

        // Finalization races the caller-side completion by a hair.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let records = interceptor.store().records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.index, 0);
        assert_eq!(record.status_code, "200");
        assert!(record.is_success());
        assert_eq!(record.response_body, br#"{"ok":true}"#);
        assert!(record.end_time.is_some());
        assert!(record.duration_secs.is_some());
    }

    #[tokio::test]
    async fn connection_lost_before_data_retries_exactly_once() {
        let (transport, interceptor) = engine(vec![
            vec![TransportEvent::Failed(TransportError::ConnectionLost(
                "reset".to_string(),
            ))],
            vec![
                TransportEvent::Response(ok_head(200, &[])),
                TransportEvent::Data(bytes::Bytes::from_static(b"ok")),
                TransportEvent::Finished,
            ],
        ]);

        let session = interceptor
            .load(HttpRequest::new("https://api.example.com/test", HttpMethod::Get))
            .unwrap();
        let outcome = session.collect().await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.body, b"ok");
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test]
    async fn second_connection_loss_is_terminal() {
        let (transport, interceptor) = engine(vec![
            vec![TransportEvent::Failed(TransportError::ConnectionLost(
                "reset".to_string(),
            ))],
            vec![TransportEvent::Failed(TransportError::ConnectionLost(
                "reset again".to_string(),
            ))],
        ]);

        let session = interceptor
            .load(HttpRequest::new("https://api.example.com/test", HttpMethod::Get))
            .unwrap();
        let outcome = session.collect().await;

        assert!(outcome.error.unwrap().is_connection_lost());
        assert_eq!(transport.open_count(), 2, "no third attempt");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let records = interceptor.store().records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_success());
        assert!(records[0].error_description.is_some());
    }

    #[tokio::test]
    async fn connection_loss_after_data_is_terminal() {
        let (transport, interceptor) = engine(vec![vec![
            TransportEvent::Response(ok_head(200, &[])),
            TransportEvent::Data(bytes::Bytes::from_static(b"partial")),
            TransportEvent::Failed(TransportError::ConnectionLost("mid-body".to_string())),
        ]]);

        let session = interceptor
            .load(HttpRequest::new("https://api.example.com/test", HttpMethod::Get))
            .unwrap();
        let outcome = session.collect().await;

        assert!(outcome.error.is_some());
        assert_eq!(transport.open_count(), 1, "bytes already delivered, no retry");
    }

    #[tokio::test]
    async fn redirects_are_forwarded_and_reset_the_body() {
        let (_, interceptor) = engine(vec![vec![
            TransportEvent::Redirect {
                response: ok_head(302, &[("Location", "/moved")]),
                next: HttpRequest::new("https://api.example.com/moved", HttpMethod::Get),
            },
            TransportEvent::Response(ok_head(200, &[])),
            TransportEvent::Data(bytes::Bytes::from_static(b"after")),
            TransportEvent::Finished,
        ]]);

        let mut session = interceptor
            .load(HttpRequest::new("https://api.example.com/test", HttpMethod::Get))
            .unwrap();

        let first = session.recv().await.unwrap();
        match first {
            TransportEvent::Redirect { next, .. } => {
                assert_eq!(next.url, "https://api.example.com/moved");
            }
            other => panic!("expected redirect first, got {other:?}"),
        }
        let outcome = session.collect().await;
        assert_eq!(outcome.body, b"after");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let records = interceptor.store().records();
        assert_eq!(records[0].response_body, b"after");
        assert_eq!(records[0].status_code, "200");
    }

    #[tokio::test]
    async fn cacheable_media_is_served_from_cache_on_the_second_load() {
        let (transport, interceptor) = engine(vec![vec![
            TransportEvent::Response(ResponseHead {
                url: "https://cdn.example.com/logo.png".to_string(),
                status: 200,
                headers: [("Cache-Control".to_string(), "max-age=60".to_string())]
                    .into_iter()
                    .collect(),
                mime_type: Some("image/png".to_string()),
            }),
            TransportEvent::Data(bytes::Bytes::from_static(b"pngbytes")),
            TransportEvent::Finished,
        ]]);

        let url = "https://cdn.example.com/logo.png";
        let first = interceptor
            .load(HttpRequest::new(url, HttpMethod::Get))
            .unwrap()
            .collect()
            .await;
        assert_eq!(first.body, b"pngbytes");
        assert_eq!(interceptor.cache().len(), 1);

        let second = interceptor
            .load(HttpRequest::new(url, HttpMethod::Get))
            .unwrap()
            .collect()
            .await;
        assert_eq!(second.body, b"pngbytes");
        assert_eq!(second.response.unwrap().status, 200);
        assert_eq!(transport.open_count(), 1, "second load never hit the network");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let records = interceptor.store().records();
        assert_eq!(records.len(), 2, "cache hits are recorded too");
        assert!(records[1].is_image);
    }

    #[tokio::test]
    async fn injected_failure_skips_the_network() {
        let (transport, interceptor) = engine(vec![]);
        interceptor.set_failure_config(NetworkFailureConfig {
            enabled: true,
            failure_rate: 1.0,
            kind: FailureKind::Timeout,
            ..Default::default()
        });

        let outcome = interceptor
            .load(HttpRequest::new("https://api.example.com/x", HttpMethod::Get))
            .unwrap()
            .collect()
            .await;

        assert!(matches!(outcome.error, Some(TransportError::Timeout(_))));
        assert_eq!(transport.open_count(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let records = interceptor.store().records();
        assert!(!records[0].is_success());
    }

    #[tokio::test]
    async fn injected_http_status_synthesizes_a_response() {
        let (transport, interceptor) = engine(vec![]);
        interceptor.set_failure_config(NetworkFailureConfig {
            enabled: true,
            failure_rate: 1.0,
            kind: FailureKind::HttpError(503),
            ..Default::default()
        });

        let outcome = interceptor
            .load(HttpRequest::new("https://api.example.com/x", HttpMethod::Get))
            .unwrap()
            .collect()
            .await;

        assert_eq!(outcome.response.unwrap().status, 503);
        assert!(outcome.error.is_none());
        assert_eq!(transport.open_count(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(interceptor.store().records()[0].status_code, "503");
    }

    #[tokio::test]
    async fn cancelled_session_records_partial_metadata() {
        let (_, interceptor) = engine(vec![vec![
            TransportEvent::Response(ok_head(200, &[])),
            TransportEvent::Data(bytes::Bytes::from_static(b"chunk-1")),
            // No terminal event: the caller walks away instead.
        ]]);

        let mut session = interceptor
            .load(HttpRequest::new("https://api.example.com/slow", HttpMethod::Get))
            .unwrap();
        assert!(matches!(
            session.recv().await,
            Some(TransportEvent::Response(_))
        ));
        drop(session);

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let records = interceptor.store().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status_code, "200");
    }

    #[tokio::test]
    async fn claims_rejects_other_schemes_and_forwarded_requests() {
        let (_, interceptor) = engine(vec![]);

        assert!(interceptor.claims(&HttpRequest::new("http://example.com", HttpMethod::Get)));
        assert!(!interceptor.claims(&HttpRequest::new("ftp://example.com", HttpMethod::Get)));
        assert!(!interceptor.claims(&HttpRequest::new("data:text/plain,x", HttpMethod::Get)));

        let mut forwarded = HttpRequest::new("https://example.com", HttpMethod::Get);
        forwarded.intercepted = true;
        assert!(!interceptor.claims(&forwarded));

        interceptor.set_enabled(false);
        assert!(!interceptor.claims(&HttpRequest::new("http://example.com", HttpMethod::Get)));
    }

    #[tokio::test]
    async fn malformed_urls_fail_canonicalization() {
        let (_, interceptor) = engine(vec![]);
        let result = interceptor.load(HttpRequest::new("http://exa mple.com/{}", HttpMethod::Get));
        assert!(result.is_err());
    }
}
