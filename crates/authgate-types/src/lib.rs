//! Authgate Types - Shared domain types
//!
//! Types used across the gateway crates:
//! - Flow and session identifiers
//! - Flow stages, flow kinds and challenge kinds
//! - The normalized error taxonomy exposed to clients

pub mod error;
pub mod flow;
pub mod id;

pub use error::*;
pub use flow::*;
pub use id::*;
