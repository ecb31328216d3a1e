//! The fast runner: the scheduler state machine.
//!
//! One run walks `Init → Counting → WarmUp → Looping → Done`. Counting
//! enumerates the mutation points once; WarmUp consumes a matching cache
//! entry or measures the tests through a warm-up worker; Looping dispatches
//! contiguous index batches to worker processes and correlates their
//! in-order verdicts; Done persists the updated manifest and emits the
//! score. The scheduler itself is single-threaded; isolation comes from the
//! worker processes.

use std::io::BufRead;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, OnceLock};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{fingerprint, fingerprint_tests, Cache, CacheError, RunManifest};
use crate::config::{EngineConfig, WARM_UP_INDEX};
use crate::listener::{Listener, MutationEvent, RunSummary, VerdictEvent, VerdictOutcome};
use crate::mutate::{MutateError, Mutater};
use crate::order::{compute_timeout, killer_test_class, TestOrder, TimedTest};
use crate::resolve::{self, ResolveError};
use crate::testrun::terminate_child;
use crate::worker::{BatchRequest, Verdict, WarmUpLine, DONE};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Consecutive abnormal worker exits tolerated for one index before the
/// index is written off as an engine error.
const MAX_STRIKES: u32 = 3;

/// Scheduler-level failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The target class is not on the classpath.
    #[error("target class {0} not found on classpath")]
    TargetNotFound(String),
    /// A test failed against the unmutated target.
    #[error("baseline failure in {class}: {detail}")]
    BaselineFailure {
        /// The failing test class.
        class: String,
        /// Failure detail from the harness.
        detail: String,
    },
    /// The target could not be mutated.
    #[error(transparent)]
    Mutate(#[from] MutateError),
    /// Classpath resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// Cache access failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// A worker broke the line protocol beyond retry.
    #[error("worker protocol violation: {0}")]
    Protocol(String),
    /// A worker could not be launched or completed no useful work.
    #[error("worker failure: {0}")]
    Worker(String),
    /// Installing the interrupt handler failed.
    #[error("signal handler installation failed: {0}")]
    Signal(String),
    /// Scheduler-side IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a worker batch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEnd {
    /// `DONE` was received.
    Completed,
    /// The worker was killed for exceeding the per-mutant budget while a
    /// verdict was pending.
    BudgetExceeded,
    /// The worker exited or broke protocol before `DONE`.
    Abnormal {
        /// What happened.
        detail: String,
    },
}

/// Launches workers. The process implementation spawns `mutabyte-worker`;
/// tests substitute scripted launchers.
pub trait WorkerLauncher {
    /// Run the warm-up worker and return its protocol lines.
    fn warm_up(&self, request: &BatchRequest) -> Result<Vec<WarmUpLine>, EngineError>;

    /// Run one batch worker. Each parsed verdict is handed to `on_verdict`;
    /// a `false` return means the verdict was unacceptable and the batch
    /// must be torn down.
    fn run_range(
        &self,
        request: &BatchRequest,
        per_mutant_budget: Option<Duration>,
        on_verdict: &mut dyn FnMut(Verdict) -> bool,
    ) -> Result<BatchEnd, EngineError>;
}

fn install_interrupt_handler() -> Result<(), EngineError> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let result = INIT.get_or_init(|| {
        ctrlc::set_handler(|| {
            INTERRUPTED.store(true, Ordering::SeqCst);
        })
        .map_err(|e| e.to_string())
    });
    match result {
        Ok(()) => Ok(()),
        Err(msg) => Err(EngineError::Signal(msg.clone())),
    }
}

/// The top-level scheduler.
#[derive(Debug, Clone)]
pub struct FastRunner {
    config: EngineConfig,
}

impl FastRunner {
    /// A runner over `config`.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the whole state machine for one target.
    pub fn run(
        &self,
        target: &str,
        tests: &[String],
        launcher: &dyn WorkerLauncher,
        listener: &mut dyn Listener,
    ) -> Result<RunSummary, EngineError> {
        install_interrupt_handler()?;
        INTERRUPTED.store(false, Ordering::SeqCst);

        // Init: normalise names, locate the target.
        let target = target.replace('/', ".");
        let target_bytes = match resolve::read_class_bytes(&self.config.classpath, &target) {
            Ok(bytes) => bytes,
            Err(ResolveError::NotFound(_)) => return Err(EngineError::TargetNotFound(target)),
            Err(err) => return Err(err.into()),
        };
        let tests = self.config.effective_tests(&target, tests);

        // Counting.
        let mutater = Mutater::new(self.config.kinds)
            .with_excluded(self.config.excluded_methods.iter().cloned());
        let total = mutater.count_points(&target_bytes)?;
        info!(target = %target, total, "counted mutation points");
        listener.on_start(&target, &tests, total);

        // WarmUp: cache hit or a measured pass.
        let target_fp = fingerprint(&target_bytes);
        let tests_fp = self.tests_fingerprint(&tests);
        let cache = Cache::new(&self.config.cache_dir);
        let base_request = BatchRequest {
            classpath: self.config.classpath.clone(),
            target: target.clone(),
            first: 0,
            last: 0,
            kinds: self.config.kinds,
            excluded: self.config.excluded_methods.iter().cloned().collect(),
            deferred: self.config.deferred.clone(),
            tests: tests.clone(),
            manifest_path: None,
        };

        let cached = if self.config.use_cache && self.config.load_cache {
            cache.load(&target_fp, &tests_fp)?
        } else {
            None
        };
        let mut manifest = match cached {
            Some(manifest) => {
                debug!("warm-up skipped, cache entry matched");
                manifest
            }
            None => {
                let (order, total_ms) = self.perform_warm_up(launcher, &base_request, &tests)?;
                let manifest =
                    RunManifest::new(target_fp.clone(), tests_fp.clone(), order, total_ms);
                if self.config.use_cache && self.config.save_cache {
                    cache.store(&manifest)?;
                }
                manifest
            }
        };

        // Per-mutant budget: the summed per-test budgets with half again.
        let per_test_total: u64 = manifest
            .order
            .entries()
            .iter()
            .map(|t| compute_timeout(t.runtime_ms).as_millis() as u64)
            .sum();
        let per_mutant_budget = Some(Duration::from_millis(per_test_total.saturating_mul(3) / 2));

        // Looping.
        let handoff = tempfile::Builder::new()
            .prefix("mutabyte-manifest-")
            .suffix(".json")
            .tempfile()?;
        let mut summary = RunSummary {
            points: total,
            ..RunSummary::default()
        };
        // first_mutation == -1 requests the warm-up alone: skip Looping.
        let mut next = match self.config.first_mutation {
            WARM_UP_INDEX => total,
            first => first.max(0) as usize,
        };
        let mut strikes = 0u32;
        let mut strike_index: Option<usize> = None;

        while next < total {
            if INTERRUPTED.load(Ordering::SeqCst) {
                warn!("interrupted, stopping before index {next}");
                break;
            }

            manifest.write_to(handoff.path())?;
            let last = (next + self.config.batch_size()).min(total) - 1;
            let request = BatchRequest {
                first: next,
                last,
                manifest_path: Some(handoff.path().to_path_buf()),
                ..base_request.clone()
            };
            debug!(first = next, last, "dispatching batch");

            let mut expected = next;
            let mut drift: Option<String> = None;
            let end = {
                let manifest = &mut manifest;
                let summary = &mut summary;
                let expected = &mut expected;
                let drift = &mut drift;
                let mut handle = |verdict: Verdict| -> bool {
                    if verdict.index() != *expected {
                        *drift = Some(format!(
                            "expected verdict for index {expected}, got {}",
                            verdict.index()
                        ));
                        return false;
                    }
                    listener.on_mutation(&self.mutation_event(&mutater, &target_bytes, *expected, &target));
                    let event = match &verdict {
                        Verdict::Pass { index } => {
                            summary.survived += 1;
                            VerdictEvent {
                                index: *index,
                                outcome: VerdictOutcome::Survived,
                                killer: None,
                            }
                        }
                        Verdict::Killed { index, killer } => {
                            summary.killed += 1;
                            manifest.killers.record(*index, killer_test_class(killer));
                            VerdictEvent {
                                index: *index,
                                outcome: VerdictOutcome::Killed,
                                killer: Some(killer.clone()),
                            }
                        }
                        Verdict::Timeout { index } => {
                            summary.timeouts += 1;
                            VerdictEvent {
                                index: *index,
                                outcome: VerdictOutcome::Timeout,
                                killer: None,
                            }
                        }
                        Verdict::Error { index, reason } => {
                            warn!(index = *index, reason = %reason, "worker reported a harness error");
                            summary.engine_errors += 1;
                            VerdictEvent {
                                index: *index,
                                outcome: VerdictOutcome::EngineError,
                                killer: None,
                            }
                        }
                        Verdict::NoSuchPoint { index } => {
                            warn!(index = *index, "worker found no point at a counted index");
                            summary.engine_errors += 1;
                            VerdictEvent {
                                index: *index,
                                outcome: VerdictOutcome::EngineError,
                                killer: None,
                            }
                        }
                    };
                    listener.on_verdict(&event);
                    *expected += 1;
                    true
                };
                launcher.run_range(&request, per_mutant_budget, &mut handle)?
            };

            match end {
                BatchEnd::Completed if drift.is_none() && expected == last + 1 => {
                    strikes = 0;
                    strike_index = None;
                    next = last + 1;
                }
                BatchEnd::BudgetExceeded if expected > last => {
                    // Worker stalled after its last verdict; nothing pending.
                    next = expected;
                }
                BatchEnd::BudgetExceeded => {
                    // The mutant in flight used up the whole budget: killed.
                    listener.on_mutation(&self.mutation_event(
                        &mutater,
                        &target_bytes,
                        expected,
                        &target,
                    ));
                    summary.timeouts += 1;
                    listener.on_verdict(&VerdictEvent {
                        index: expected,
                        outcome: VerdictOutcome::Timeout,
                        killer: None,
                    });
                    strikes = 0;
                    strike_index = None;
                    next = expected + 1;
                }
                end => {
                    let detail = match (&end, drift) {
                        (_, Some(drift)) => drift,
                        (BatchEnd::Abnormal { detail }, _) => detail.clone(),
                        _ => "worker finished without all verdicts".to_string(),
                    };
                    if strike_index == Some(expected) {
                        strikes += 1;
                    } else {
                        strike_index = Some(expected);
                        strikes = 1;
                    }
                    warn!(
                        index = expected,
                        strikes,
                        detail = %detail,
                        "abnormal batch end, requeueing"
                    );
                    if strikes >= MAX_STRIKES {
                        listener.on_mutation(&self.mutation_event(
                            &mutater,
                            &target_bytes,
                            expected,
                            &target,
                        ));
                        summary.engine_errors += 1;
                        listener.on_verdict(&VerdictEvent {
                            index: expected,
                            outcome: VerdictOutcome::EngineError,
                            killer: None,
                        });
                        next = expected + 1;
                        strikes = 0;
                        strike_index = None;
                    } else {
                        next = expected;
                    }
                }
            }
        }

        // Done: persist the killer memory gathered during the loop.
        if self.config.use_cache && self.config.save_cache {
            cache.store(&manifest)?;
        }
        listener.on_end(&summary);
        Ok(summary)
    }

    fn mutation_event(
        &self,
        mutater: &Mutater,
        target_bytes: &[u8],
        index: usize,
        target: &str,
    ) -> MutationEvent {
        mutater
            .mutate(target_bytes, index)
            .ok()
            .flatten()
            .map(|m| MutationEvent::from(&m))
            .unwrap_or_else(|| MutationEvent {
                index,
                class_name: target.to_string(),
                method: String::new(),
                line: None,
                description: String::new(),
            })
    }

    fn tests_fingerprint(&self, tests: &[String]) -> String {
        let per_class: Vec<String> = tests
            .iter()
            .map(
                |t| match resolve::read_class_bytes(&self.config.classpath, t) {
                    Ok(bytes) => fingerprint(&bytes),
                    Err(_) => fingerprint(t.as_bytes()),
                },
            )
            .collect();
        fingerprint_tests(per_class)
    }

    fn perform_warm_up(
        &self,
        launcher: &dyn WorkerLauncher,
        base_request: &BatchRequest,
        tests: &[String],
    ) -> Result<(TestOrder, u64), EngineError> {
        info!("warm-up: timing {} test class(es)", tests.len());
        let lines = launcher.warm_up(base_request)?;
        let mut timings = Vec::with_capacity(tests.len());
        for line in lines {
            match line {
                WarmUpLine::Time { class, runtime_ms } => timings.push(TimedTest {
                    class,
                    runtime_ms,
                }),
                WarmUpLine::BaselineFail { class, detail } => {
                    return Err(EngineError::BaselineFailure { class, detail })
                }
            }
        }
        if timings.len() != tests.len() {
            return Err(EngineError::Worker(format!(
                "warm-up timed {} of {} tests",
                timings.len(),
                tests.len()
            )));
        }
        let total_ms = timings.iter().map(|t| t.runtime_ms).sum();
        let order = if self.config.ordered {
            TestOrder::by_runtime(timings)
        } else {
            TestOrder::declaration(timings)
        };
        Ok((order, total_ms))
    }
}


/// [`WorkerLauncher`] that spawns the `mutabyte-worker` binary.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    worker_bin: PathBuf,
    java_bin: String,
    jvm_args: Vec<String>,
    properties: Vec<String>,
    verbose: bool,
}

impl ProcessLauncher {
    /// A launcher configured from the engine config. The worker binary is
    /// expected beside the current executable.
    pub fn from_config(config: &EngineConfig) -> Self {
        let worker_bin = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("mutabyte-worker")))
            .unwrap_or_else(|| PathBuf::from("mutabyte-worker"));
        Self {
            worker_bin,
            java_bin: config.java_bin.clone(),
            jvm_args: config.jvm_args.clone(),
            properties: config.properties.clone(),
            verbose: config.verbose,
        }
    }

    /// Override the worker binary path.
    pub fn with_worker_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_bin = path.into();
        self
    }

    fn command(&self, request: &BatchRequest, warm_up: bool) -> Command {
        let mut cmd = Command::new(&self.worker_bin);
        cmd.arg("--classpath")
            .arg(&request.classpath)
            .arg("--target")
            .arg(&request.target);
        if warm_up {
            cmd.arg("--warm-up");
        } else {
            cmd.arg("--from")
                .arg(request.first.to_string())
                .arg("--to")
                .arg(request.last.to_string());
        }
        cmd.arg("--kinds").arg(request.kinds.to_string());
        for method in &request.excluded {
            cmd.arg("--exclude").arg(method);
        }
        for prefix in &request.deferred {
            cmd.arg("--defer").arg(prefix);
        }
        for test in &request.tests {
            cmd.arg("--test").arg(test);
        }
        if let Some(path) = &request.manifest_path {
            cmd.arg("--manifest").arg(path);
        }
        cmd.arg("--java-bin").arg(&self.java_bin);
        for arg in &self.jvm_args {
            cmd.arg("--jvm-arg").arg(arg);
        }
        for property in &self.properties {
            cmd.arg("--define-property").arg(property);
        }
        if self.verbose {
            cmd.arg("--verbose");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        cmd
    }

    fn spawn(&self, request: &BatchRequest, warm_up: bool) -> Result<Child, EngineError> {
        self.command(request, warm_up).spawn().map_err(|e| {
            EngineError::Worker(format!(
                "failed to spawn {}: {e}",
                self.worker_bin.display()
            ))
        })
    }
}

fn line_channel(child: &mut Child) -> Result<mpsc::Receiver<std::io::Result<String>>, EngineError> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| EngineError::Worker("worker stdout was not piped".to_string()))?;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stdout).lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    Ok(rx)
}

fn exit_detail(child: &mut Child) -> BatchEnd {
    let status = child
        .wait()
        .map(|s| s.to_string())
        .unwrap_or_else(|e| e.to_string());
    BatchEnd::Abnormal {
        detail: format!("worker exited ({status}) before DONE"),
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn warm_up(&self, request: &BatchRequest) -> Result<Vec<WarmUpLine>, EngineError> {
        let mut child = self.spawn(request, true)?;
        let rx = line_channel(&mut child)?;
        let mut lines = Vec::new();
        loop {
            match rx.recv() {
                Ok(Ok(line)) if line == DONE => {
                    let _ = child.wait();
                    return Ok(lines);
                }
                Ok(Ok(line)) => match line.parse::<WarmUpLine>() {
                    Ok(parsed) => lines.push(parsed),
                    Err(err) => {
                        terminate_child(&mut child);
                        return Err(EngineError::Protocol(err.to_string()));
                    }
                },
                Ok(Err(err)) => {
                    terminate_child(&mut child);
                    return Err(EngineError::Worker(format!("warm-up read failed: {err}")));
                }
                Err(_) => {
                    let status = child
                        .wait()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|e| e.to_string());
                    return Err(EngineError::Worker(format!(
                        "warm-up worker exited ({status}) before DONE"
                    )));
                }
            }
        }
    }

    fn run_range(
        &self,
        request: &BatchRequest,
        per_mutant_budget: Option<Duration>,
        on_verdict: &mut dyn FnMut(Verdict) -> bool,
    ) -> Result<BatchEnd, EngineError> {
        let mut child = self.spawn(request, false)?;
        let rx = line_channel(&mut child)?;
        let end = loop {
            let received = match per_mutant_budget {
                Some(budget) => match rx.recv_timeout(budget) {
                    Ok(line) => line,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        terminate_child(&mut child);
                        break BatchEnd::BudgetExceeded;
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break exit_detail(&mut child),
                },
                None => match rx.recv() {
                    Ok(line) => line,
                    Err(_) => break exit_detail(&mut child),
                },
            };
            let line = match received {
                Ok(line) => line,
                Err(err) => {
                    terminate_child(&mut child);
                    break BatchEnd::Abnormal {
                        detail: format!("worker read failed: {err}"),
                    };
                }
            };
            if line == DONE {
                break BatchEnd::Completed;
            }
            match line.parse::<Verdict>() {
                Ok(verdict) => {
                    if !on_verdict(verdict) {
                        terminate_child(&mut child);
                        break BatchEnd::Abnormal {
                            detail: "verdict rejected by scheduler".to_string(),
                        };
                    }
                }
                Err(err) => {
                    terminate_child(&mut child);
                    break BatchEnd::Abnormal {
                        detail: err.to_string(),
                    };
                }
            }
        };
        let _ = child.wait();
        Ok(end)
    }
}
