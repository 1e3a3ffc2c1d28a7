//! Key to path mapping.
//!
//! A [`PathTransform`] turns a key into a [`PathKey`]: the directory segments
//! under the store root plus the file name. The content-addressed transform
//! shards by SHA-1 so no directory grows too large:
//!
//! ```text
//! {root}/a8657/b2b50/8f114/51d28/ac942/85a85/e44ce/65362/a8657b2b508f11451d28ac94285a85e44ce65362
//! ```

use std::path::{Component, Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::error::{StoreError, StoreResult};

/// Default number of hex characters per directory level.
pub const DEFAULT_BLOCK_SIZE: usize = 5;

/// Location of a key's file relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    /// Directory levels, outermost first.
    pub segments: Vec<String>,
    /// File name inside the innermost directory.
    pub file_name: String,
}

impl PathKey {
    /// Create a path key.
    pub fn new(segments: Vec<String>, file_name: impl Into<String>) -> Self {
        Self {
            segments,
            file_name: file_name.into(),
        }
    }

    /// Directory holding the file, relative to the root.
    pub fn directory(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    /// Path of the file, relative to the root.
    pub fn full_path(&self) -> PathBuf {
        self.directory().join(&self.file_name)
    }

    /// Outermost directory level, if any.
    pub fn first_segment(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Check every segment and the file name is a single plain path
    /// component, so the path cannot escape the root.
    pub fn validate(&self) -> StoreResult<()> {
        for part in self.segments.iter().chain(std::iter::once(&self.file_name)) {
            if !is_plain_component(part) {
                return Err(StoreError::InvalidKey(format!(
                    "{part:?} is not a plain path component"
                )));
            }
        }
        Ok(())
    }
}

fn is_plain_component(part: &str) -> bool {
    let mut components = Path::new(part).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !part.contains(['/', '\\'])
}

/// Maps a key to its location under the store root.
///
/// Any `Fn(&str) -> PathKey` is a transform.
pub trait PathTransform: Send + Sync {
    /// Compute the path for `key`. Must be deterministic.
    fn transform(&self, key: &str) -> PathKey;
}

impl<F> PathTransform for F
where
    F: Fn(&str) -> PathKey + Send + Sync,
{
    fn transform(&self, key: &str) -> PathKey {
        self(key)
    }
}

/// Stores each key as `{root}/{key}/{key}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPathTransform;

impl PathTransform for PassthroughPathTransform {
    fn transform(&self, key: &str) -> PathKey {
        PathKey::new(vec![key.to_string()], key)
    }
}

/// Content-addressed layout: the lowercase SHA-1 hex of the key, split into
/// `block_size` character directory levels, with the full hex as file name.
///
/// A block size that does not divide 40 leaves a shorter last level.
#[derive(Debug, Clone, Copy)]
pub struct CasPathTransform {
    block_size: usize,
}

impl CasPathTransform {
    /// Create a transform with a custom block size (at least 1).
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    /// Characters per directory level.
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Default for CasPathTransform {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

impl PathTransform for CasPathTransform {
    fn transform(&self, key: &str) -> PathKey {
        let hash = hex::encode(Sha1::digest(key.as_bytes()));
        let segments = (0..hash.len())
            .step_by(self.block_size)
            .map(|start| hash[start..(start + self.block_size).min(hash.len())].to_string())
            .collect();
        PathKey::new(segments, hash)
    }
}
