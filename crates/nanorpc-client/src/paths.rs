//! Path-encoding policy: literal string or FNV-1a hash.

use std::sync::Arc;

use nanorpc_protocol::{HashCache, PathOneof};

/// Decides how a path goes on the wire.
///
/// With `always_hash` off every path is sent literally.  With it on, paths
/// are resolved through the hash cache; a collision is logged and that one
/// call falls back to the literal path, so the request still reaches the
/// right endpoint.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    always_hash: bool,
    cache: Arc<HashCache>,
}

impl PathPolicy {
    pub fn new(always_hash: bool, cache: Arc<HashCache>) -> Self {
        Self { always_hash, cache }
    }

    pub fn encode(&self, path: &str) -> PathOneof {
        if !self.always_hash {
            return PathOneof::Path(path.to_string());
        }
        match self.cache.hash(path) {
            Ok(hash) => PathOneof::PathHash(hash),
            Err(e) => {
                tracing::error!(path, error = %e, "path hash collision, sending literal path");
                PathOneof::Path(path.to_string())
            }
        }
    }

    pub fn cache(&self) -> &Arc<HashCache> {
        &self.cache
    }
}
