//! Real-transport seam
//!
//! The interceptor talks to the network through the [`Transport`] trait: a
//! session is opened for a canonical request and delivers redirect, response,
//! data and completion events over a channel, in that order, serialized.
//! Dropping the session cancels the exchange.
//!
//! The production implementation forwards requests with `reqwest`, following
//! redirects manually so every hop surfaces as an event.

use crate::interceptor::canonical::{CanonicalRequest, HttpRequest};
use crate::models::HttpMethod;
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Upper bound on redirect hops before the exchange is failed
const MAX_REDIRECTS: usize = 10;

/// Channel depth for session events; senders await on backpressure
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Failure reported by the real transport.
///
/// Only `ConnectionLost` is retryable, and only under the interceptor's
/// retry rule (no prior retry, no body bytes received).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("network connection lost: {0}")]
    ConnectionLost(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, TransportError::ConnectionLost(_))
    }

    /// Human-readable description recorded alongside the raw one
    pub fn localized_description(&self) -> String {
        match self {
            TransportError::ConnectionLost(_) => "The network connection was lost.".to_string(),
            TransportError::Timeout(_) => "The request timed out.".to_string(),
            TransportError::Cancelled => "The request was cancelled.".to_string(),
            TransportError::Other(msg) => msg.clone(),
        }
    }
}

/// Response metadata, delivered before any body bytes
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub mime_type: Option<String>,
}

/// One event in a session's serialized stream:
/// redirect* → response → data* → (finished | failed)
#[derive(Debug)]
pub enum TransportEvent {
    /// The server redirected; `next` is the request the transport will issue
    Redirect {
        response: ResponseHead,
        next: HttpRequest,
    },
    Response(ResponseHead),
    Data(Bytes),
    Finished,
    Failed(TransportError),
}

/// A live exchange against the real network. Dropping it cancels the
/// underlying task.
pub struct TransportSession {
    events: mpsc::Receiver<TransportEvent>,
    handle: JoinHandle<()>,
}

impl TransportSession {
    pub fn new(events: mpsc::Receiver<TransportEvent>, handle: JoinHandle<()>) -> Self {
        Self { events, handle }
    }

    /// Next event in the session's stream; `None` after a terminal event
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Capability to execute a canonical request against the real network
pub trait Transport: Send + Sync {
    fn open(&self, request: CanonicalRequest) -> TransportSession;
}

/// Production transport backed by `reqwest`
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn open(&self, request: CanonicalRequest) -> TransportSession {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            run_exchange(client, request, tx).await;
        });
        TransportSession::new(rx, handle)
    }
}

async fn run_exchange(
    client: reqwest::Client,
    mut request: CanonicalRequest,
    tx: mpsc::Sender<TransportEvent>,
) {
    let mut hops = 0;

    loop {
        let response = match send_once(&client, &request).await {
            Ok(response) => response,
            Err(err) => {
                let _ = tx.send(TransportEvent::Failed(classify_error(err))).await;
                return;
            }
        };

        let head = response_head(&response);

        if let Some(location) = redirect_location(&response) {
            hops += 1;
            if hops > MAX_REDIRECTS {
                let _ = tx
                    .send(TransportEvent::Failed(TransportError::Other(
                        "too many redirects".to_string(),
                    )))
                    .await;
                return;
            }

            let next = match follow_redirect(&request, head.status, &location) {
                Some(next) => next,
                None => {
                    let _ = tx
                        .send(TransportEvent::Failed(TransportError::Other(format!(
                            "invalid redirect location: {location}"
                        ))))
                        .await;
                    return;
                }
            };

            // Receiver gone means the caller cancelled.
            if tx
                .send(TransportEvent::Redirect {
                    response: head,
                    next: next.as_request(),
                })
                .await
                .is_err()
            {
                return;
            }
            request = next;
            continue;
        }

        if tx.send(TransportEvent::Response(head)).await.is_err() {
            return;
        }

        let mut response = response;
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if tx.send(TransportEvent::Data(chunk)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(TransportEvent::Finished).await;
                    return;
                }
                Err(err) => {
                    let _ = tx.send(TransportEvent::Failed(classify_error(err))).await;
                    return;
                }
            }
        }
    }
}

async fn send_once(
    client: &reqwest::Client,
    request: &CanonicalRequest,
) -> reqwest::Result<reqwest::Response> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut builder = client.request(method, request.url.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
        builder = builder.body(body.clone());
    }
    builder.send().await
}

fn response_head(response: &reqwest::Response) -> ResponseHead {
    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }
    let mime_type = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.split(';').next().unwrap_or(v).trim().to_string());

    ResponseHead {
        url: response.url().to_string(),
        status: response.status().as_u16(),
        headers,
        mime_type,
    }
}

fn redirect_location(response: &reqwest::Response) -> Option<String> {
    if !response.status().is_redirection() {
        return None;
    }
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Build the follow-up request for a redirect. A 303 (or a 301/302 answering
/// a POST) downgrades to a body-less GET, as user agents do.
fn follow_redirect(
    request: &CanonicalRequest,
    status: u16,
    location: &str,
) -> Option<CanonicalRequest> {
    let next_url = request.url.join(location).ok()?;

    let downgrade = status == 303
        || ((status == 301 || status == 302) && request.method == HttpMethod::Post);

    let mut next = request.clone();
    next.url = next_url;
    if downgrade {
        next.method = HttpMethod::Get;
        next.body = None;
        next.headers
            .retain(|k, _| !k.eq_ignore_ascii_case("content-type") && !k.eq_ignore_ascii_case("content-length"));
    }
    Some(next)
}

fn classify_error(err: reqwest::Error) -> TransportError {
    let description = err.to_string();
    if err.is_timeout() {
        return TransportError::Timeout(description);
    }
    let lowered = full_error_chain(&err).to_lowercase();
    if lowered.contains("connection reset")
        || lowered.contains("connection closed")
        || lowered.contains("connection lost")
        || lowered.contains("broken pipe")
        || lowered.contains("incomplete message")
    {
        TransportError::ConnectionLost(description)
    } else {
        TransportError::Other(description)
    }
}

fn full_error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}
