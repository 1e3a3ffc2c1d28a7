//! # dfs Store
//!
//! Content-addressable storage on the local filesystem for dfs nodes.
//!
//! This crate provides:
//! - A [`Store`] with write / read / has / delete over string keys
//! - Pluggable key to path mapping via [`PathTransform`]
//! - A SHA-1 sharded layout ([`CasPathTransform`]) and a flat one
//!   ([`PassthroughPathTransform`])
//!
//! ## Architecture
//!
//! The store holds no index. Every call recomputes the key's [`PathKey`] and
//! goes straight to `tokio::fs`, so the filesystem is the only source of
//! truth. Concurrent writers to the same key race at the filesystem level and
//! the last one wins.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod path;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use path::{
    CasPathTransform, PassthroughPathTransform, PathKey, PathTransform, DEFAULT_BLOCK_SIZE,
};
pub use store::{DeleteScope, Store, StoreConfig, DEFAULT_ROOT};
