//! # shutter-core
//!
//! Core data model for the shutter bridge.
//!
//! This crate provides:
//! - Link and bridge configuration types (`LinkConfig`, `BridgeSettings`)
//! - The static destination route table
//! - State id glob matching
//! - In-memory host state store
//! - Configuration storage abstraction
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! The tokio-based dispatcher and event adapter build on top of it.

pub mod config;
pub mod model;
pub mod path;
pub mod route;
pub mod store;

pub use config::{validate_settings, ConfigError, ConfigStorage, JsonFileStorage};
pub use model::*;
pub use path::{PatternError, StatePattern};
pub use route::{Route, RouteError, RouteTable};
pub use store::{MemoryStateStore, StateChange, StateStore};
