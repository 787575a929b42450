//! The snapshot index: fingerprint -> captured response metadata, grounded
//! on `original_source/proxy/snapshot.go` and `urldata.go`.
//!
//! The index stores metadata only; response bytes live in the blob store
//! (`crate::blob`) keyed by `sha256`. Write-stable semantics (`set`) and
//! used-subset persistence (`save`) mirror the original's `Snapshot.Set` and
//! `Snapshot.Save`.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use bytes::Bytes;
use http::StatusCode;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha3::digest::{ExtendableOutput, Update, XofReader};

/// Metadata captured for one fingerprint. Body bytes are addressed by
/// `sha256` in the blob store; this struct never carries them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    #[serde(rename = "responseCode", skip_serializing_if = "is_zero_u16", default)]
    pub status_code: u16,
    #[serde(rename = "contentType", skip_serializing_if = "String::is_empty", default)]
    pub content_type: String,
    #[serde(rename = "contentLength", skip_serializing_if = "is_zero_usize", default)]
    pub content_length: usize,
    pub sha256: String,
    pub shake256: String,
}

fn is_zero_usize(n: &usize) -> bool {
    *n == 0
}

impl UrlRecord {
    /// Builds a record from a captured, already-decompressed response body,
    /// hashing it with both digests the original format records
    /// (`urldata.go`'s `NewURLData`: SHA-256 plus a 64-byte SHAKE-256 XOF).
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: &Bytes) -> UrlRecord {
        let sha256 = crate::blob::sha256_hex(body);

        let mut shake = sha3::Shake256::default();
        shake.update(body);
        let mut shake_out = [0u8; 64];
        shake.finalize_xof().read(&mut shake_out);

        UrlRecord {
            status_code: status.as_u16(),
            content_type: content_type.into(),
            content_length: body.len(),
            sha256,
            shake256: hex::encode(shake_out),
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK)
    }
}

fn is_zero_u16(n: &u16) -> bool {
    *n == 0
}

/// An in-memory, concurrently-readable index of fingerprint -> [`UrlRecord`].
///
/// Tracks which keys have been touched by `get`/`set` so [`Snapshot::save`]
/// can persist only the subset actually used this run, unless `force_full`
/// is requested.
pub struct Snapshot {
    data: RwLock<HashMap<String, UrlRecord>>,
    used: RwLock<HashSet<String>>,
}

impl Default for Snapshot {
    fn default() -> Snapshot {
        Snapshot {
            data: RwLock::new(HashMap::new()),
            used: RwLock::new(HashSet::new()),
        }
    }
}

impl Snapshot {
    pub fn new() -> Snapshot {
        Snapshot::default()
    }

    /// Loads a snapshot from a single YAML file, or unions every file in a
    /// directory if `index` names one (`original_source/proxy/snapshot.go`'s
    /// `LoadSnapshot`). Later files win on key collision. A missing path is
    /// an empty snapshot, not an error.
    pub fn load(index: &Path) -> anyhow::Result<Snapshot> {
        let snapshot = Snapshot::new();

        let metadata = match std::fs::metadata(index) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshot),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_file() {
            let bytes = std::fs::read(index)?;
            let data: HashMap<String, UrlRecord> = serde_yaml::from_slice(&bytes)?;
            *snapshot.data.write() = data;
            return Ok(snapshot);
        }

        let mut entries: Vec<_> = std::fs::read_dir(index)?.filter_map(Result::ok).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let bytes = std::fs::read(entry.path())?;
            let data: HashMap<String, UrlRecord> = serde_yaml::from_slice(&bytes)?;
            snapshot.data.write().extend(data);
        }
        Ok(snapshot)
    }

    /// Looks up `key`, marking it used for the next `save`.
    pub fn get(&self, key: &str) -> Option<UrlRecord> {
        self.used.write().insert(key.to_string());
        self.data.read().get(key).cloned()
    }

    /// Write-stable insert: the first capture for a key always wins; a later
    /// capture only replaces it if the new record isn't a bare 304
    /// (`original_source/proxy/snapshot.go`'s `Set`: "don't replace the
    /// initial request with a noop").
    pub fn set(&self, key: &str, record: UrlRecord) {
        self.used.write().insert(key.to_string());
        let mut data = self.data.write();
        match data.get(key) {
            None => {
                data.insert(key.to_string(), record);
            }
            Some(_) if record.status() != StatusCode::NOT_MODIFIED => {
                data.insert(key.to_string(), record);
            }
            Some(_) => {}
        }
    }

    pub fn size(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn clear(&self) {
        self.data.write().clear();
    }

    /// Groups records by host, parsing each fingerprint as `https://{key}`
    /// the way the original's introspection helper does.
    pub fn by_host(&self) -> HashMap<String, HashMap<String, UrlRecord>> {
        let mut grouped: HashMap<String, HashMap<String, UrlRecord>> = HashMap::new();
        for (key, record) in self.data.read().iter() {
            let host = url::Url::parse(&format!("https://{key}"))
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_string()))
                .unwrap_or_else(|| key.clone());
            grouped.entry(host).or_default().insert(key.clone(), record.clone());
        }
        grouped
    }

    /// Persists the index to `path`. When `force_full` is set, always writes
    /// the whole map; otherwise writes only the used subset if anything was
    /// touched this run, else the whole map — resolved as an explicit flag
    /// rather than an implicit "did any `get` happen" check; see `DESIGN.md`.
    pub fn save(&self, path: &Path, force_full: bool) -> anyhow::Result<()> {
        let data = self.data.read();
        let used = self.used.read();

        let to_write: HashMap<&String, &UrlRecord> = if !force_full && !used.is_empty() {
            data.iter().filter(|(k, _)| used.contains(*k)).collect()
        } else {
            data.iter().collect()
        };

        let yaml = serde_yaml::to_string(&to_write)?;
        std::fs::write(path, yaml)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}
