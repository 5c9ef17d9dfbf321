//! Integration test utilities for the gateway client
//!
//! An in-process gateway (WebSocket plus the REST URL lookup) and canned
//! frames for end-to-end session tests.

pub mod helpers;
pub mod fixtures;

pub use helpers::*;
pub use fixtures::*;
