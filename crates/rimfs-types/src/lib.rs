//! Foundation utilities for the rimfs virtual filesystem.
//!
//! This crate provides the path and name vocabulary shared by the node
//! engine (`rimfs-core`) and the packed-image provider (`rimfs-image`):
//!
//! - [`paths`] — validation of absolute and relative virtual paths, the
//!   two normalized roots (`/modules`, `/packages`), and prefix
//!   arithmetic (`resolve`, `relativize`, `is_relative_to`)
//! - [`names`] — conversion between dotted package names (`a.b.c`) and
//!   their path form (`a/b/c`)
//!
//! Everything here is pure string manipulation; no I/O, no allocation
//! beyond the obvious joins.

pub mod names;
pub mod paths;

// Re-export primary items at crate root for ergonomic imports.
pub use names::{package_to_path, path_to_package};
pub use paths::{
    file_name, is_relative_to, is_valid_absolute, is_valid_relative, relativize, resolve, MODULES,
    PACKAGES,
};
