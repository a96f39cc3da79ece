//! # Configuration
//!
//! Settings for the chat engine, loaded from defaults, an optional file, and
//! environment overrides.

pub mod chat;

pub use chat::{ChatConfig, ConfigError};
