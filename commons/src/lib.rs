//! Common utilities for the artifact registry backend.

pub mod buffer;
pub mod cache;
mod errors;
pub mod mutex;
pub mod testing;

pub use crate::errors::{Error, Result};

/// Convenience re-exports for fallible plumbing code.
///
/// Typed failures that must map to an HTTP status use [`Error`]; everything
/// else propagates through [`prelude_errors::Fallible`].
pub mod prelude_errors {
    pub use anyhow::anyhow as format_err;
    pub use anyhow::{bail, ensure, Context, Error as AnyError, Result as Fallible};
}
