//! Common utilities and types shared across Keywarden modules.
//!
//! This module provides foundational types that are used throughout the codebase,
//! ensuring consistency and type safety.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{KeySlot, SensitiveBytes, StoreId};
