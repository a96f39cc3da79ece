#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.

//! Shared models, backend error types, and configuration for the `StudyHall`
//! channel chat engine.

pub mod config;
pub mod errors;
pub mod models;

pub use errors::{BackendError, BackendResult};
