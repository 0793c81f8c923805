//! # StageLink Core
//!
//! Shared foundations for the StageLink control client.
//!
//! This crate provides:
//! - A hierarchical error type system (`StagelinkError` and its categories)
//! - Retry policies with fixed and exponential backoff, including an async
//!   retry driver for operations that may fail transiently

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]

/// Error types and handling
pub mod error;

/// Retry policies for transient failures
pub mod retry;

pub use error::{CommandError, LoadError, NetworkError, Result, StagelinkError};
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy};
