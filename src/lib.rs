//! # DebugLens Core
//!
//! Network inspection and recording engine for the DebugLens in-app
//! diagnostics toolkit. Transparently intercepts the host application's
//! outbound HTTP(S) traffic, replays it against the real network, and keeps
//! a bounded, queryable in-memory history of exchanges and WebSocket
//! activity for overlay inspection UIs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Host application requests                 │
//! ├──────────────────────────────────────────────────────────┤
//! │                  DebugLens Core (this crate)              │
//! │  ┌────────────┐  ┌────────┐  ┌───────────┐  ┌─────────┐  │
//! │  │Interceptor │──│ Cache  │──│ Transport │  │ Stores  │  │
//! │  │ + Canonical│  │ Engine │  │ (reqwest) │──│(records,│  │
//! │  │   izer     │  │        │  │           │  │ sockets)│  │
//! │  └────────────┘  └────────┘  └───────────┘  └─────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! History is in-memory and process-lifetime only; nothing persists across
//! restarts.

pub mod api;
pub mod interceptor;
pub mod models;
pub mod storage;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
