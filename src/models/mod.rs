//! Data models for the DebugLens network engine

pub mod filter;
pub mod record;
pub mod websocket;

pub use filter::*;
pub use record::*;
pub use websocket::*;
