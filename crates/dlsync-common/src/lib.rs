//! dlsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the dlsync workspace.
//!
//! - **Error Handling**: [`DlsyncError`] and the [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by [`logging::LogConfig`]
//! - **Types**: station connections, backup targets, and parsed test results
//!
//! # Example
//!
//! ```no_run
//! use dlsync_common::types::SystemFamily;
//!
//! fn family(tag: &str) -> dlsync_common::Result<SystemFamily> {
//!     tag.parse()
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{DlsyncError, Result};
