//! Worker batch execution and the stdout line protocol.
//!
//! The scheduler hands a worker a contiguous index range. For each index
//! the worker mutates, materializes the overlay, runs the ordered tests and
//! prints exactly one verdict line; the batch ends with a `DONE` sentinel.
//! Worker-local failures become `ERR` verdicts and never abort the batch.

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{CacheError, RunManifest};
use crate::classfile::ClassFile;
use crate::mutate::{KindSet, MutateError, Mutater};
use crate::order::{compute_timeout, TimedTest};
use crate::resolve::{self, MutatingResolver, ResolveError};
use crate::testrun::{TestOutcome, TestRunner, VERIFICATION_KILLER};

/// Batch terminator line.
pub const DONE: &str = "DONE";

/// Fatal worker failures: anything that prevents the batch from starting.
/// Per-index failures are reported as [`Verdict::Error`] lines instead.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The target class could not be mutated.
    #[error(transparent)]
    Mutate(#[from] MutateError),
    /// The target class could not be located or read.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// The manifest handoff file could not be read.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// Writing the protocol stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A line-protocol parse failure.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed protocol line: {0:?}")]
pub struct ProtocolError(pub String);

/// One verdict line. The index is carried on every line so the scheduler
/// can detect drift even though verdicts arrive in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every test passed: the mutant survived.
    Pass {
        /// Mutation index.
        index: usize,
    },
    /// A test failed: the mutant is killed.
    Killed {
        /// Mutation index.
        index: usize,
        /// The test that detected the mutant.
        killer: String,
    },
    /// A test exceeded its budget: counted as killed.
    Timeout {
        /// Mutation index.
        index: usize,
    },
    /// The harness itself failed for this index.
    Error {
        /// Mutation index.
        index: usize,
        /// Single-line reason.
        reason: String,
    },
    /// The index addressed no mutation point.
    NoSuchPoint {
        /// Mutation index.
        index: usize,
    },
}

impl Verdict {
    /// The mutation index this verdict belongs to.
    pub fn index(&self) -> usize {
        match self {
            Verdict::Pass { index }
            | Verdict::Killed { index, .. }
            | Verdict::Timeout { index }
            | Verdict::Error { index, .. }
            | Verdict::NoSuchPoint { index } => *index,
        }
    }

    /// Whether this verdict counts towards the killed tally.
    pub fn is_kill(&self) -> bool {
        matches!(self, Verdict::Killed { .. } | Verdict::Timeout { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass { index } => write!(f, "PASS {index}"),
            Verdict::Killed { index, killer } => write!(f, "FAIL {index} by {killer}"),
            Verdict::Timeout { index } => write!(f, "TIMEOUT {index}"),
            Verdict::Error { index, reason } => write!(f, "ERR {index} {reason}"),
            Verdict::NoSuchPoint { index } => write!(f, "NOSUCHPOINT {index}"),
        }
    }
}

impl FromStr for Verdict {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = || ProtocolError(line.to_string());
        let (tag, rest) = line.split_once(' ').ok_or_else(bad)?;
        match tag {
            "PASS" => Ok(Verdict::Pass {
                index: rest.trim().parse().map_err(|_| bad())?,
            }),
            "TIMEOUT" => Ok(Verdict::Timeout {
                index: rest.trim().parse().map_err(|_| bad())?,
            }),
            "NOSUCHPOINT" => Ok(Verdict::NoSuchPoint {
                index: rest.trim().parse().map_err(|_| bad())?,
            }),
            "FAIL" => {
                let (index, killer) = rest.split_once(' ').ok_or_else(bad)?;
                let killer = killer.strip_prefix("by ").ok_or_else(bad)?;
                Ok(Verdict::Killed {
                    index: index.parse().map_err(|_| bad())?,
                    killer: killer.to_string(),
                })
            }
            "ERR" => {
                let (index, reason) = rest.split_once(' ').unwrap_or((rest, ""));
                Ok(Verdict::Error {
                    index: index.parse().map_err(|_| bad())?,
                    reason: reason.to_string(),
                })
            }
            _ => Err(bad()),
        }
    }
}

/// One warm-up protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmUpLine {
    /// A test class passed against the unmutated target.
    Time {
        /// The test class.
        class: String,
        /// Wall time in milliseconds.
        runtime_ms: u64,
    },
    /// A test class failed against the unmutated target. The run aborts.
    BaselineFail {
        /// The failing test class.
        class: String,
        /// Single-line detail.
        detail: String,
    },
}

impl fmt::Display for WarmUpLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarmUpLine::Time { class, runtime_ms } => write!(f, "TIME {runtime_ms} {class}"),
            WarmUpLine::BaselineFail { class, detail } => {
                write!(f, "BASELINE-FAIL {class} {detail}")
            }
        }
    }
}

impl FromStr for WarmUpLine {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = || ProtocolError(line.to_string());
        let (tag, rest) = line.split_once(' ').ok_or_else(bad)?;
        match tag {
            "TIME" => {
                let (ms, class) = rest.split_once(' ').ok_or_else(bad)?;
                Ok(WarmUpLine::Time {
                    class: class.trim().to_string(),
                    runtime_ms: ms.parse().map_err(|_| bad())?,
                })
            }
            "BASELINE-FAIL" => {
                let (class, detail) = rest.split_once(' ').unwrap_or((rest, ""));
                Ok(WarmUpLine::BaselineFail {
                    class: class.to_string(),
                    detail: detail.to_string(),
                })
            }
            _ => Err(bad()),
        }
    }
}

/// Everything a worker needs for one batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Classpath the target and its collaborators are read from.
    pub classpath: String,
    /// Dotted name of the target class.
    pub target: String,
    /// First mutation index, inclusive.
    pub first: usize,
    /// Last mutation index, inclusive.
    pub last: usize,
    /// Enabled mutation kinds.
    pub kinds: KindSet,
    /// Method names excluded from mutation.
    pub excluded: Vec<String>,
    /// Deferred class-name prefixes.
    pub deferred: Vec<String>,
    /// Test classes, in declaration order. Used directly in warm-up and as
    /// the fallback schedule when no manifest is supplied.
    pub tests: Vec<String>,
    /// Manifest handoff file with the order, budgets and killer memory.
    pub manifest_path: Option<PathBuf>,
}

/// Run one batch, writing verdict lines and the `DONE` sentinel to `out`.
pub fn run_batch(
    request: &BatchRequest,
    runner: &dyn TestRunner,
    out: &mut dyn Write,
) -> Result<(), WorkerError> {
    let target_bytes = resolve::read_class_bytes(&request.classpath, &request.target)?;
    let mutater = Mutater::new(request.kinds).with_excluded(request.excluded.iter().cloned());
    let manifest = match &request.manifest_path {
        Some(path) => Some(RunManifest::read_from(path)?),
        None => None,
    };
    info!(
        target = %request.target,
        first = request.first,
        last = request.last,
        "starting batch"
    );

    for index in request.first..=request.last {
        let verdict = run_one(request, &mutater, &target_bytes, manifest.as_ref(), runner, index);
        debug!(%verdict, "verdict");
        writeln!(out, "{verdict}")?;
        out.flush()?;
    }
    writeln!(out, "{DONE}")?;
    out.flush()?;
    Ok(())
}

fn run_one(
    request: &BatchRequest,
    mutater: &Mutater,
    target_bytes: &[u8],
    manifest: Option<&RunManifest>,
    runner: &dyn TestRunner,
    index: usize,
) -> Verdict {
    match try_run_one(request, mutater, target_bytes, manifest, runner, index) {
        Ok(verdict) => verdict,
        Err(err) => Verdict::Error {
            index,
            reason: single_line(&err.to_string()),
        },
    }
}

fn try_run_one(
    request: &BatchRequest,
    mutater: &Mutater,
    target_bytes: &[u8],
    manifest: Option<&RunManifest>,
    runner: &dyn TestRunner,
    index: usize,
) -> Result<Verdict, WorkerError> {
    let Some(mutation) = mutater.mutate(target_bytes, index)? else {
        return Ok(Verdict::NoSuchPoint { index });
    };

    // Force-load: structurally verify the mutated image before dispatch.
    if ClassFile::parse(&mutation.bytes).is_err() {
        return Ok(Verdict::Killed {
            index,
            killer: VERIFICATION_KILLER.to_string(),
        });
    }

    let overlay = tempfile::tempdir()?;
    let resolver = MutatingResolver::new(
        request.target.clone(),
        mutation.bytes,
        request.deferred.clone(),
        &request.classpath,
    );
    resolver.materialize_overlay(overlay.path())?;
    let classpath = resolver.overlay_classpath(overlay.path());

    let fallback: Vec<TimedTest>;
    let schedule: Vec<&TimedTest> = match manifest {
        Some(manifest) => manifest
            .order
            .schedule_for(manifest.killers.last_for(index)),
        None => {
            fallback = request
                .tests
                .iter()
                .map(|class| TimedTest {
                    class: class.clone(),
                    runtime_ms: 0,
                })
                .collect();
            fallback.iter().collect()
        }
    };

    for test in schedule {
        // Budgets exist only once warm-up timings do.
        let budget = manifest.map(|_| compute_timeout(test.runtime_ms));
        let report = match runner.run_class(&classpath, &test.class, budget) {
            Ok(report) => report,
            Err(err) => {
                return Ok(Verdict::Error {
                    index,
                    reason: single_line(&err.to_string()),
                })
            }
        };
        match report.outcome {
            TestOutcome::Pass => continue,
            TestOutcome::Fail { test, .. } => {
                return Ok(Verdict::Killed {
                    index,
                    killer: test,
                })
            }
            TestOutcome::Timeout => return Ok(Verdict::Timeout { index }),
        }
    }
    Ok(Verdict::Pass { index })
}

/// Run the warm-up pass: every test against the unmutated target, one
/// `TIME` line per green test. The first failure emits `BASELINE-FAIL` and
/// ends the pass.
pub fn run_warm_up(
    request: &BatchRequest,
    runner: &dyn TestRunner,
    out: &mut dyn Write,
) -> Result<(), WorkerError> {
    // The target must exist even though it is not mutated here.
    resolve::read_class_bytes(&request.classpath, &request.target)?;
    info!(target = %request.target, tests = request.tests.len(), "warm-up");

    for class in &request.tests {
        let report = match runner.run_class(&request.classpath, class, None) {
            Ok(report) => report,
            Err(err) => {
                writeln!(
                    out,
                    "{}",
                    WarmUpLine::BaselineFail {
                        class: class.clone(),
                        detail: single_line(&err.to_string()),
                    }
                )?;
                writeln!(out, "{DONE}")?;
                return Ok(());
            }
        };
        let line = match report.outcome {
            TestOutcome::Pass => WarmUpLine::Time {
                class: class.clone(),
                runtime_ms: report.elapsed.as_millis() as u64,
            },
            TestOutcome::Fail { test, message } => WarmUpLine::BaselineFail {
                class: class.clone(),
                detail: single_line(&format!("{test}: {message}")),
            },
            TestOutcome::Timeout => WarmUpLine::BaselineFail {
                class: class.clone(),
                detail: "timed out during warm-up".to_string(),
            },
        };
        let failed = matches!(line, WarmUpLine::BaselineFail { .. });
        writeln!(out, "{line}")?;
        out.flush()?;
        if failed {
            break;
        }
    }
    writeln!(out, "{DONE}")?;
    out.flush()?;
    Ok(())
}

fn single_line(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}
