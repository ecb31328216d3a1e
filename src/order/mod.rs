//! Warm-up timing and test ordering.
//!
//! The warm-up run measures every test against the unmutated target. Tests
//! are then scheduled fastest-first, and for each mutation point the test
//! that killed the previous mutant there is tried before anything else.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One test with its warm-up runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedTest {
    /// The test class name.
    pub class: String,
    /// Warm-up wall time in milliseconds.
    pub runtime_ms: u64,
}

/// Per-test time budget for mutant runs: ten times the warm-up runtime plus
/// two seconds of slack.
pub fn compute_timeout(runtime_ms: u64) -> Duration {
    Duration::from_millis(runtime_ms.saturating_mul(10).saturating_add(2000))
}

/// An ordering over the warm-up tests. Always a permutation of the tests
/// handed to the constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOrder {
    entries: Vec<TimedTest>,
}

impl TestOrder {
    /// Fastest-first ordering. The sort is stable, so equal runtimes keep
    /// their declaration order.
    pub fn by_runtime(mut entries: Vec<TimedTest>) -> Self {
        entries.sort_by_key(|t| t.runtime_ms);
        Self { entries }
    }

    /// Declaration ordering, for `--no-order` runs.
    pub fn declaration(entries: Vec<TimedTest>) -> Self {
        Self { entries }
    }

    /// The ordered tests.
    pub fn entries(&self) -> &[TimedTest] {
        &self.entries
    }

    /// Sum of all warm-up runtimes.
    pub fn total_runtime_ms(&self) -> u64 {
        self.entries.iter().map(|t| t.runtime_ms).sum()
    }

    /// Schedule for one mutant: the remembered killer for this point first
    /// (when it still exists in the order), then the rest unchanged.
    pub fn schedule_for(&self, last_killer: Option<&str>) -> Vec<&TimedTest> {
        let mut schedule: Vec<&TimedTest> = Vec::with_capacity(self.entries.len());
        if let Some(killer) = last_killer {
            if let Some(first) = self.entries.iter().find(|t| t.class == killer) {
                schedule.push(first);
            }
        }
        for test in &self.entries {
            if Some(test.class.as_str()) != last_killer {
                schedule.push(test);
            }
        }
        schedule
    }

    /// Whether this order covers exactly `classes`, regardless of position.
    pub fn is_permutation_of(&self, classes: &[String]) -> bool {
        let mut ours: Vec<&str> = self.entries.iter().map(|t| t.class.as_str()).collect();
        let mut theirs: Vec<&str> = classes.iter().map(String::as_str).collect();
        ours.sort_unstable();
        theirs.sort_unstable();
        ours == theirs
    }
}

/// Remembers, per mutation point, which test killed the last mutant there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillerMemory(BTreeMap<usize, String>);

impl KillerMemory {
    /// Record a kill. The killer name is stored as the test class so it can
    /// be promoted in the class-level schedule.
    pub fn record(&mut self, point: usize, test_class: impl Into<String>) {
        self.0.insert(point, test_class.into());
    }

    /// The remembered killer for a point.
    pub fn last_for(&self, point: usize) -> Option<&str> {
        self.0.get(&point).map(String::as_str)
    }

    /// Number of remembered points.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Extract the test class from a killer name of the form `method(Class)`,
/// falling back to the whole name.
pub fn killer_test_class(killer: &str) -> &str {
    killer
        .split_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .unwrap_or(killer)
}
