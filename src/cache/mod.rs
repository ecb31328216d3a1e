//! On-disk run manifests.
//!
//! One file per target class, named by the target's content hash, holding
//! the warm-up order, total warm-up time and killer memory. Entries are
//! consumed only when both fingerprints match; writes go through a
//! temporary file and an atomic rename.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use crate::order::{KillerMemory, TestOrder};

/// Format tag stored in every manifest. Entries with another tag are
/// discarded on load.
pub const MANIFEST_VERSION: u32 = 1;

/// Cache failures. A missing or mismatched entry is not an error, only an
/// absent result.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("io error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },
    /// A manifest failed to serialize.
    #[error("manifest serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The persisted per-target record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Format version tag.
    pub version: u32,
    /// Content hash of the target class bytes.
    pub target_fingerprint: String,
    /// Hash over the concatenated test-class fingerprints.
    pub tests_fingerprint: String,
    /// Warm-up derived ordering.
    pub order: TestOrder,
    /// Total warm-up wall time in milliseconds.
    pub total_warmup_ms: u64,
    /// Killer memory accumulated across mutant runs.
    #[serde(default)]
    pub killers: KillerMemory,
}

impl RunManifest {
    /// A fresh manifest at the current format version.
    pub fn new(
        target_fingerprint: String,
        tests_fingerprint: String,
        order: TestOrder,
        total_warmup_ms: u64,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            target_fingerprint,
            tests_fingerprint,
            order,
            total_warmup_ms,
            killers: KillerMemory::default(),
        }
    }

    /// Read a manifest from an explicit path, without fingerprint checks.
    /// Used for the scheduler-to-worker handoff file.
    pub fn read_from(path: &Path) -> Result<Self, CacheError> {
        let bytes = fs::read(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write a manifest to an explicit path.
    pub fn write_to(&self, path: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Handle on the cache directory. The scheduler is the only writer.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// A cache rooted at `dir`. The directory is created on first store.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the entry for a target fingerprint.
    pub fn entry_path(&self, target_fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{target_fingerprint}.json"))
    }

    /// Load the entry for `target_fingerprint` when it exists, parses, and
    /// matches both fingerprints and the format version. Anything else is
    /// discarded.
    pub fn load(
        &self,
        target_fingerprint: &str,
        tests_fingerprint: &str,
    ) -> Result<Option<RunManifest>, CacheError> {
        let path = self.entry_path(target_fingerprint);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        let manifest: RunManifest = match serde_json::from_slice(&bytes) {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(path = %path.display(), %err, "discarding unreadable cache entry");
                return Ok(None);
            }
        };
        let usable = manifest.version == MANIFEST_VERSION
            && manifest.target_fingerprint == target_fingerprint
            && manifest.tests_fingerprint == tests_fingerprint;
        Ok(usable.then_some(manifest))
    }

    /// Store a manifest atomically: write a temporary file in the cache
    /// directory, then rename it over the entry.
    pub fn store(&self, manifest: &RunManifest) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.entry_path(&manifest.target_fingerprint);
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        tmp.write_all(&serde_json::to_vec_pretty(manifest)?)
            .map_err(|source| CacheError::Io {
                path: tmp.path().to_path_buf(),
                source,
            })?;
        tmp.persist(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(path)
    }
}

/// SHA-256 content hash, lower-hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Fingerprint of a test list: the hash of all per-class fingerprints
/// concatenated in list order.
pub fn fingerprint_tests<I, S>(class_fingerprints: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for fp in class_fingerprints {
        hasher.update(fp.as_ref().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
