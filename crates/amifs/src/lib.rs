#![forbid(unsafe_code)]
//! amifs public API facade.
//!
//! Re-exports the engine surface from `amifs-core` through a stable external
//! interface. This is the crate that downstream consumers depend on.

pub use amifs_core::*;
pub use amifs_error::{AdfError, Result};
