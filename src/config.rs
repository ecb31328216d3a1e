//! Engine configuration.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::mutate::{KindSet, MutationKind, DEFAULT_EXCLUDED_METHODS};

/// The `first_mutation` value that requests the warm-up pass alone: the run
/// counts, times and caches, then skips mutation dispatch entirely.
pub const WARM_UP_INDEX: i64 = -1;

/// Everything the scheduler needs for one run. Built with `with_*` methods
/// over sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Classpath the target, its collaborators and the tests are read from.
    pub classpath: String,
    /// Directory holding cache manifests.
    pub cache_dir: PathBuf,
    /// Enabled mutation kinds. Always contains the baseline pair.
    pub kinds: KindSet,
    /// Method names never mutated.
    pub excluded_methods: BTreeSet<String>,
    /// Class-name prefixes the mutant resolver defers to the parent.
    pub deferred: Vec<String>,
    /// Order tests fastest-first after warm-up.
    pub ordered: bool,
    /// Consume cache entries at all.
    pub use_cache: bool,
    /// Read the cache at warm-up.
    pub load_cache: bool,
    /// Write the cache after warm-up and at the end of the run.
    pub save_cache: bool,
    /// First mutation index to attempt. [`WARM_UP_INDEX`] (-1) runs the
    /// warm-up alone; other negative values behave as zero.
    pub first_mutation: i64,
    /// Upper bound on consecutive indices per worker process.
    pub max_external_mutations: usize,
    /// Emit progress diagnostics.
    pub verbose: bool,
    /// Host runtime launcher for test runs.
    pub java_bin: String,
    /// Extra arguments forwarded to the worker runtime.
    pub jvm_args: Vec<String>,
    /// `key=value` system properties forwarded to the worker runtime.
    pub properties: Vec<String>,
    /// Derive `Dummy…Test` names for `Abstract…` targets.
    pub dummy_test_naming: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classpath: std::env::var("CLASSPATH").unwrap_or_else(|_| ".".to_string()),
            cache_dir: PathBuf::from(".mutabyte").join("cache"),
            kinds: KindSet::baseline(),
            excluded_methods: DEFAULT_EXCLUDED_METHODS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            deferred: Vec::new(),
            ordered: true,
            use_cache: true,
            load_cache: true,
            save_cache: true,
            first_mutation: 0,
            max_external_mutations: 50,
            verbose: false,
            java_bin: "java".to_string(),
            jvm_args: Vec::new(),
            properties: Vec::new(),
            dummy_test_naming: true,
        }
    }
}

impl EngineConfig {
    /// Set the classpath.
    pub fn with_classpath(mut self, classpath: impl Into<String>) -> Self {
        self.classpath = classpath.into();
        self
    }

    /// Set the cache directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Enable a mutation kind on top of the baseline pair.
    pub fn with_kind(mut self, kind: MutationKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// Add method names to the exclusion set.
    pub fn with_excluded_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_methods
            .extend(methods.into_iter().map(Into::into));
        self
    }

    /// Add a deferred class-name prefix.
    pub fn with_deferred(mut self, prefix: impl Into<String>) -> Self {
        self.deferred.push(prefix.into());
        self
    }

    /// Toggle runtime-based test ordering.
    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    /// Set the first mutation index. [`WARM_UP_INDEX`] stops after warm-up.
    pub fn with_first_mutation(mut self, first: i64) -> Self {
        self.first_mutation = first;
        self
    }

    /// Cap the worker batch size. Zero behaves as one.
    pub fn with_max_external_mutations(mut self, max: usize) -> Self {
        self.max_external_mutations = max;
        self
    }

    /// Toggle verbose diagnostics.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set the host runtime launcher.
    pub fn with_java_bin(mut self, java_bin: impl Into<String>) -> Self {
        self.java_bin = java_bin.into();
        self
    }

    /// The effective test list: the given classes, or the conventional name
    /// guessed from the target.
    pub fn effective_tests(&self, target: &str, given: &[String]) -> Vec<String> {
        if given.is_empty() {
            vec![guess_test_class_name(target, self.dummy_test_naming)]
        } else {
            given.to_vec()
        }
    }

    /// Worker batch size, never zero.
    pub fn batch_size(&self) -> usize {
        self.max_external_mutations.max(1)
    }
}

/// Conventional test-class name for a target: strip any inner-class suffix,
/// rewrite a leading or embedded `Abstract` prefix to `Dummy` (when
/// enabled), and append `Test`.
pub fn guess_test_class_name(class_name: &str, dummy_naming: bool) -> String {
    let mut test_name = class_name.to_string();
    if dummy_naming {
        if let Some(rest) = class_name.strip_prefix("Abstract") {
            test_name = format!("Dummy{rest}");
        } else if let Some(pos) = class_name.find(".Abstract") {
            test_name = format!(
                "{}.Dummy{}",
                &class_name[..pos],
                &class_name[pos + ".Abstract".len()..]
            );
        }
    }
    if let Some(dollar) = test_name.find('$') {
        test_name.truncate(dollar);
    }
    format!("{test_name}Test")
}
