//! FNV-1a path hashing with collision detection.
//!
//! A [`HashCache`] remembers every `path → hash` binding it has handed out.
//! If a new path hashes to a value another path already owns, the cache
//! refuses it and keeps the first binding, so callers can fall back to the
//! literal path instead of silently addressing the wrong endpoint.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

/// 32-bit FNV-1a over the UTF-8 bytes of `path`.
pub fn fnv1a(path: &str) -> u32 {
    const_fnv1a_hash::fnv1a_hash_str_32(path)
}

/// Two distinct paths map to the same hash.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("path {path:?} collides with {existing:?} on hash {hash:#010x}")]
pub struct HashCollision {
    pub path: String,
    pub existing: String,
    pub hash: u32,
}

#[derive(Default)]
struct Bindings {
    by_path: HashMap<String, u32>,
    by_hash: HashMap<u32, String>,
}

/// Thread-safe cache of path hashes.
#[derive(Default)]
pub struct HashCache {
    inner: RwLock<Bindings>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache shared by clients that don't install their own.
    pub fn global() -> Arc<HashCache> {
        static GLOBAL: OnceLock<Arc<HashCache>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(HashCache::new())).clone()
    }

    /// Hash `path`, remembering the binding on first sight.
    pub fn hash(&self, path: &str) -> Result<u32, HashCollision> {
        if let Some(hash) = self.inner.read().by_path.get(path) {
            return Ok(*hash);
        }

        let hash = fnv1a(path);
        let mut inner = self.inner.write();
        if let Some(hash) = inner.by_path.get(path) {
            return Ok(*hash);
        }
        if let Some(existing) = inner.by_hash.get(&hash) {
            return Err(HashCollision {
                path: path.to_string(),
                existing: existing.clone(),
                hash,
            });
        }

        tracing::trace!(path, hash, "caching path hash");
        inner.by_path.insert(path.to_string(), hash);
        inner.by_hash.insert(hash, path.to_string());
        Ok(hash)
    }

    /// Seed a binding, e.g. from a path table published by the server.
    ///
    /// Re-registering an identical binding is a no-op.
    pub fn register(&self, path: &str, hash: u32) -> Result<(), HashCollision> {
        let mut inner = self.inner.write();
        match inner.by_hash.get(&hash) {
            Some(existing) if existing == path => return Ok(()),
            Some(existing) => {
                return Err(HashCollision {
                    path: path.to_string(),
                    existing: existing.clone(),
                    hash,
                })
            }
            None => {}
        }
        if let Some(bound) = inner.by_path.get(path) {
            return Err(HashCollision {
                path: path.to_string(),
                existing: path.to_string(),
                hash: *bound,
            });
        }

        inner.by_path.insert(path.to_string(), hash);
        inner.by_hash.insert(hash, path.to_string());
        Ok(())
    }

    /// Reverse lookup.
    pub fn lookup(&self, hash: u32) -> Option<String> {
        self.inner.read().by_hash.get(&hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HashCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashCache").field("len", &self.len()).finish()
    }
}
