//! Common utilities and types shared across VoucherSnap crates.
//!
//! This module provides the shared error type, atomic file persistence
//! used by every on-disk store, and the per-user file locations.

pub mod error;
pub mod fs;
pub mod paths;

pub use error::{Error, Result};
pub use fs::{remove_if_exists, write_atomic, FileMode};
