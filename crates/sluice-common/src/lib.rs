//! Sluice Common Library
//!
//! Shared types, error handling and logging for the sluice workspace:
//!
//! - **Error Handling**: the extraction error taxonomy and result alias
//! - **Logging**: tracing subscriber setup shared by all binaries
//! - **Types**: records, cursors and retry policy used across crates

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ExtractError, Result};
