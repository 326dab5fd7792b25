//! DebugLens engine API
//!
//! The control and inspection surface embedded host apps and overlay UIs
//! talk to.

pub mod inspector_api;

pub use inspector_api::*;
