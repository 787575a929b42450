//! Content-addressed blob storage.
//!
//! `BlobStore` is the single capability both concrete backends implement:
//! filesystem and a generic key-value service. `LruBlobStore` decorates
//! either one with a bounded in-memory cache — composition, not a third kind
//! of backend.
//!
//! Every implementation computes the digest itself from the bytes it is
//! given; it never trusts a caller-supplied key as the content's identity.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::ProxyError;

/// Computes the lowercase-hex SHA-256 of `bytes` — the key every blob store
/// implementation below stores and loads under.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A content-addressed store for response bodies.
///
/// `load` returning `Ok(None)` is a cache miss, not an error — callers (the
/// snapshotter) fall through to origin on a miss. Any other failure is an
/// I/O error and surfaces as a 500.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Loads the bytes stored under `digest`, or `None` if absent.
    async fn load(&self, digest: &str) -> Result<Option<Bytes>, ProxyError>;

    /// Stores `bytes`, keyed by its own SHA-256 (computed here, not trusted
    /// from the caller). Returns the digest so the caller can build a URL
    /// record around it.
    async fn store(&self, bytes: Bytes) -> Result<String, ProxyError>;
}

/// One file per blob under a root directory, filename = lowercase hex
/// SHA-256, mode 0600.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> FsBlobStore {
        FsBlobStore { root: root.into() }
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        self.root.join(digest)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn load(&self, digest: &str) -> Result<Option<Bytes>, ProxyError> {
        match tokio::fs::read(self.path_for(digest)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, bytes: Bytes) -> Result<String, ProxyError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let digest = sha256_hex(&bytes);
        let path = self.path_for(&digest);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::write(&path, &bytes).await?;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&path, perms).await?;
        }
        #[cfg(not(unix))]
        {
            tokio::fs::write(&path, &bytes).await?;
        }

        Ok(digest)
    }
}

/// Narrow key-value capability a remote blob backend must provide. Kept
/// independent of any specific hosted KV vendor SDK — wiring one in is an
/// external-collaborator concern here.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ProxyError>;
    async fn set(&self, key: &str, value: Bytes) -> Result<(), ProxyError>;
}

/// A blob store backed by a single `GET`/`SET` key-value service, keyed
/// `{prefix}:{sha256}`, mirroring `original_source/proxy/redis.go`'s
/// `storage:{prefix}:{sha256}` scheme.
pub struct KvBlobStore<K: KvBackend> {
    backend: K,
    prefix: String,
}

impl<K: KvBackend> KvBlobStore<K> {
    pub fn new(backend: K, prefix: impl Into<String>) -> KvBlobStore<K> {
        KvBlobStore {
            backend,
            prefix: prefix.into(),
        }
    }

    fn key_for(&self, digest: &str) -> String {
        format!("blob:{}:{digest}", self.prefix)
    }
}

#[async_trait]
impl<K: KvBackend> BlobStore for KvBlobStore<K> {
    async fn load(&self, digest: &str) -> Result<Option<Bytes>, ProxyError> {
        self.backend.get(&self.key_for(digest)).await
    }

    async fn store(&self, bytes: Bytes) -> Result<String, ProxyError> {
        let digest = sha256_hex(&bytes);
        self.backend.set(&self.key_for(&digest), bytes).await?;
        Ok(digest)
    }
}

/// An in-memory `KvBackend`, used as the reference implementation for tests
/// and for deployments with no external KV service configured.
#[derive(Default)]
pub struct InMemoryKv {
    data: Mutex<std::collections::HashMap<String, Bytes>>,
}

#[async_trait]
impl KvBackend for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, ProxyError> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), ProxyError> {
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// Bounded in-memory LRU decorator over another `BlobStore`. Consulted first
/// on `load`; populated on both `load`-miss-then-read-through and `store`.
pub struct LruBlobStore<S: BlobStore> {
    source: S,
    cache: Mutex<lru::LruCache<String, Bytes>>,
}

impl<S: BlobStore> LruBlobStore<S> {
    pub fn new(source: S, capacity: usize) -> LruBlobStore<S> {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).expect("capacity > 0");
        LruBlobStore {
            source,
            cache: Mutex::new(lru::LruCache::new(capacity)),
        }
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for LruBlobStore<S> {
    async fn load(&self, digest: &str) -> Result<Option<Bytes>, ProxyError> {
        if let Some(hit) = self.cache.lock().get(digest).cloned() {
            return Ok(Some(hit));
        }
        let loaded = self.source.load(digest).await?;
        if let Some(bytes) = &loaded {
            self.cache.lock().put(digest.to_string(), bytes.clone());
        }
        Ok(loaded)
    }

    async fn store(&self, bytes: Bytes) -> Result<String, ProxyError> {
        let digest = self.source.store(bytes.clone()).await?;
        self.cache.lock().put(digest.clone(), bytes);
        Ok(digest)
    }
}

/// Shared ownership handle used wherever a blob store is threaded through
/// concurrent request handlers.
pub type SharedBlobStore = Arc<dyn BlobStore>;
