//! Class resolution policy for mutant runs.
//!
//! Mirrors the loading rules a mutant must see: the target name resolves to
//! the mutated image held in memory, deferred names (configured prefixes
//! plus the platform set) stay with the parent classpath, and everything
//! else is located on the configured classpath and defined locally. The
//! resolver also materializes an overlay directory that shadows the target
//! on the child process classpath, which is how the mutated image reaches
//! the host runtime.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Name prefixes whose classes must share identity with the harness and are
/// therefore always delegated: the platform runtime and the test framework.
pub const PLATFORM_PREFIXES: &[&str] = &[
    "java.",
    "javax.",
    "jdk.",
    "sun.",
    "com.sun.",
    "org.w3c.",
    "org.xml.",
    "junit.",
    "org.junit.",
];

/// Resolution failures.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The name matched no classpath entry.
    #[error("class {0} not found on classpath")]
    NotFound(String),
    /// Reading or writing class bytes failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },
}

/// Where a class name resolves under the mutating policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The mutated target, served from memory.
    Mutated,
    /// Delegated to the parent classpath.
    Deferred,
    /// Defined locally from this classpath file.
    Local(PathBuf),
}

/// The mutating resolver for one worker invocation. Holds exactly one
/// mutated image; every request for the target name sees the same bytes.
#[derive(Debug, Clone)]
pub struct MutatingResolver {
    target: String,
    target_bytes: Vec<u8>,
    deferred: Vec<String>,
    classpath: String,
    directories: Vec<PathBuf>,
}

impl MutatingResolver {
    /// A resolver serving `target_bytes` for `target` over `classpath`.
    pub fn new(
        target: impl Into<String>,
        target_bytes: Vec<u8>,
        deferred: Vec<String>,
        classpath: &str,
    ) -> Self {
        Self {
            target: target.into(),
            target_bytes,
            deferred,
            classpath: classpath.to_string(),
            directories: std::env::split_paths(classpath)
                .filter(|p| p.is_dir())
                .collect(),
        }
    }

    /// The target class name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Apply the resolution policy to `name`.
    pub fn resolve(&self, name: &str) -> Result<Resolution, ResolveError> {
        if name == self.target {
            return Ok(Resolution::Mutated);
        }
        if self.is_deferred(name) {
            return Ok(Resolution::Deferred);
        }
        self.locate(name)
            .map(Resolution::Local)
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))
    }

    /// Whether `name` is delegated to the parent.
    pub fn is_deferred(&self, name: &str) -> bool {
        PLATFORM_PREFIXES
            .iter()
            .copied()
            .chain(self.deferred.iter().map(String::as_str))
            .any(|prefix| name.starts_with(prefix))
    }

    /// Class bytes under the policy: the mutated image for the target, file
    /// contents for local names, `None` for deferred names.
    pub fn bytes_for(&self, name: &str) -> Result<Option<Vec<u8>>, ResolveError> {
        match self.resolve(name)? {
            Resolution::Mutated => Ok(Some(self.target_bytes.clone())),
            Resolution::Deferred => Ok(None),
            Resolution::Local(path) => fs::read(&path)
                .map(Some)
                .map_err(|source| ResolveError::Io { path, source }),
        }
    }

    /// Write the mutated image into `dir` under its package path, so that
    /// prepending `dir` to the classpath shadows the original class.
    pub fn materialize_overlay(&self, dir: &Path) -> Result<PathBuf, ResolveError> {
        let relative = format!("{}.class", self.target.replace('.', "/"));
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ResolveError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, &self.target_bytes).map_err(|source| ResolveError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Classpath for the child process: the overlay first, then the
    /// configured entries unchanged.
    pub fn overlay_classpath(&self, overlay: &Path) -> String {
        let mut entries: Vec<PathBuf> = vec![overlay.to_path_buf()];
        entries.extend(std::env::split_paths(&self.classpath));
        std::env::join_paths(entries)
            .map(|cp| cp.to_string_lossy().into_owned())
            .unwrap_or_else(|_| overlay.display().to_string())
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        let relative = format!("{}.class", name.replace('.', "/"));
        self.directories
            .iter()
            .map(|dir| dir.join(&relative))
            .find(|candidate| candidate.is_file())
    }
}

/// Read unmutated class bytes for `name` from a classpath of directories.
pub fn read_class_bytes(classpath: &str, name: &str) -> Result<Vec<u8>, ResolveError> {
    let relative = format!("{}.class", name.replace('.', "/"));
    for dir in std::env::split_paths(classpath).filter(|p| p.is_dir()) {
        let candidate = dir.join(&relative);
        if candidate.is_file() {
            return fs::read(&candidate).map_err(|source| ResolveError::Io {
                path: candidate,
                source,
            });
        }
    }
    Err(ResolveError::NotFound(name.to_string()))
}
