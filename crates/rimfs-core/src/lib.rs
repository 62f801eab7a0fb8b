//! Virtual node engine for a packed runtime image filesystem.
//!
//! This crate builds a read-only, hierarchical view with two roots: a
//! `/modules` tree mirroring per-module resource trees, and a
//! `/packages` tree listing every package with symbolic links back into
//! the modules that contain it. Resources are supplied by a pluggable
//! [`ResourceProvider`]; the engine never parses container bytes itself.
//!
//! # Key Types
//!
//! - [`ImageFs`] — the engine: path dispatch, the synthesized
//!   `/packages` view, the preview overlay, and the node cache
//! - [`Node`] — a cached, identity-stable entry (directory, file, or
//!   symbolic link), equal and hashed by absolute path
//! - [`ResourceProvider`] — the contract a resource backend satisfies
//! - [`NodeFactory`] — the constructor handle providers produce nodes
//!   through, so every node lands in the engine's cache
//! - [`Memoized`] — one-shot lazy value holder used for child lists,
//!   link targets, and the module/package name sets
//!
//! # Design Rules
//!
//! 1. At most one node object exists per absolute path; lookups of the
//!    same path return the same `Arc`.
//! 2. Nodes are created lazily and retained until the engine is
//!    dropped; nothing is pre-computed beyond the memoized name sets.
//! 3. Directory children are deterministically ordered by final
//!    segment name.
//! 4. Lookups are total: invalid or missing paths are `None`, and I/O
//!    failures surface only from [`Node::content`].

pub mod error;
pub mod fs;
pub mod memo;
pub mod node;
pub mod provider;

mod cache;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{VfsError, VfsResult};
pub use fs::ImageFs;
pub use memo::Memoized;
pub use node::Node;
pub use provider::{NodeFactory, ResourceProvider};
