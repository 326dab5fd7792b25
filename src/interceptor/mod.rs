//! Transparent request interception
//!
//! This module contains the engine that claims outbound HTTP(S) requests,
//! replays them against the real transport, and records the exchange.

pub mod cache;
pub mod canonical;
pub mod encryption;
pub mod injection;
pub mod protocol;
pub mod transport;

pub use canonical::{canonical_request, CanonicalRequest, CanonicalizeError, HttpRequest};
pub use protocol::{Interceptor, RequestSession, SessionOutcome};
pub use transport::{HttpTransport, ResponseHead, Transport, TransportError, TransportEvent};
