//! dfs storage node library.
//!
//! This library provides the components for building and running a dfs
//! node. It is used by the `dfs-node` binary and can also be used for
//! testing and embedding.

pub mod cli;
pub mod config;
pub mod node;
pub mod shutdown;
