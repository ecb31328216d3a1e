//! Test runner façade.
//!
//! The engine never talks to the unit-test framework directly; it runs a
//! named test class through [`TestRunner`] and reads back one outcome with
//! its elapsed time. The shipped implementation launches the host runtime's
//! textual JUnit runner in a child process, enforces the time budget and
//! attributes failures to the test the harness names.

use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

/// Main class of the textual JUnit runner.
pub const JUNIT_MAIN: &str = "junit.textui.TestRunner";

/// Killer name used when the runtime rejects the mutant during verification.
pub const VERIFICATION_KILLER: &str = "verification";

/// Harness-level failures, distinct from test failures.
#[derive(Debug, Error)]
pub enum TestRunError {
    /// The harness process could not be launched.
    #[error("failed to launch test harness {command}: {source}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// The underlying failure.
        #[source]
        source: io::Error,
    },
    /// Communication with the harness process failed.
    #[error("io error talking to test harness: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of one test-class run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    /// Every test in the class passed.
    Pass,
    /// At least one test failed; the mutant is killed.
    Fail {
        /// The failing test, `method(Class)` when the harness names it.
        test: String,
        /// The failure message, possibly empty.
        message: String,
    },
    /// The run exceeded its budget.
    Timeout,
}

/// One test-class run with its elapsed wall time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    /// What happened.
    pub outcome: TestOutcome,
    /// Wall time of the run.
    pub elapsed: Duration,
}

/// Runs one named test class against whatever the classpath serves.
pub trait TestRunner {
    /// Run `test_class` with `classpath`, interrupting past `budget`.
    fn run_class(
        &self,
        classpath: &str,
        test_class: &str,
        budget: Option<Duration>,
    ) -> Result<TestReport, TestRunError>;
}

/// [`TestRunner`] that launches the host runtime in a child process.
#[derive(Debug, Clone)]
pub struct JvmTestRunner {
    java_bin: String,
    jvm_args: Vec<String>,
    properties: Vec<String>,
}

impl JvmTestRunner {
    /// A runner using `java_bin` as the host runtime launcher.
    pub fn new(java_bin: impl Into<String>) -> Self {
        Self {
            java_bin: java_bin.into(),
            jvm_args: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Extra arguments forwarded to the runtime.
    pub fn with_jvm_args(mut self, args: Vec<String>) -> Self {
        self.jvm_args = args;
        self
    }

    /// `key=value` system properties forwarded as `-D` definitions.
    pub fn with_properties(mut self, properties: Vec<String>) -> Self {
        self.properties = properties;
        self
    }
}

impl Default for JvmTestRunner {
    fn default() -> Self {
        Self::new("java")
    }
}

impl TestRunner for JvmTestRunner {
    fn run_class(
        &self,
        classpath: &str,
        test_class: &str,
        budget: Option<Duration>,
    ) -> Result<TestReport, TestRunError> {
        let mut cmd = Command::new(&self.java_bin);
        cmd.args(&self.jvm_args);
        for property in &self.properties {
            cmd.arg(format!("-D{property}"));
        }
        cmd.arg("-cp")
            .arg(classpath)
            .arg(JUNIT_MAIN)
            .arg(test_class)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(test_class, ?budget, "launching test harness");
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| TestRunError::Spawn {
            command: self.java_bin.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || drain(stdout));
        let stderr_reader = thread::spawn(move || drain(stderr));

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if budget.is_some_and(|b| started.elapsed() > b) {
                break None;
            }
            thread::sleep(Duration::from_millis(10));
        };

        let elapsed = started.elapsed();
        let Some(status) = status else {
            terminate_child(&mut child);
            let _ = stdout_reader.join();
            let _ = stderr_reader.join();
            return Ok(TestReport {
                outcome: TestOutcome::Timeout,
                elapsed,
            });
        };

        let mut output = stdout_reader.join().unwrap_or_default();
        output.push('\n');
        output.push_str(&stderr_reader.join().unwrap_or_default());

        let outcome = if status.success() {
            TestOutcome::Pass
        } else if let Some(line) = output
            .lines()
            .find(|l| l.contains("VerifyError") || l.contains("ClassFormatError"))
        {
            TestOutcome::Fail {
                test: VERIFICATION_KILLER.to_string(),
                message: line.trim().to_string(),
            }
        } else if let Some((test, message)) = parse_junit_failure(&output) {
            TestOutcome::Fail { test, message }
        } else {
            TestOutcome::Fail {
                test: test_class.to_string(),
                message: format!("harness exit status {status}"),
            }
        };

        Ok(TestReport { outcome, elapsed })
    }
}

fn drain(pipe: Option<impl Read>) -> String {
    let mut text = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut text);
    }
    text
}

/// Ask the child to stop, give it two seconds, then force it.
pub(crate) fn terminate_child(child: &mut Child) {
    let pid = child.id().to_string();
    let _ = Command::new("kill").arg("-TERM").arg(&pid).status();
    let grace = Instant::now();
    while grace.elapsed() < Duration::from_secs(2) {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// First `N) method(Class)message` failure row of the textual JUnit report.
fn parse_junit_failure(output: &str) -> Option<(String, String)> {
    output.lines().find_map(failure_on_line)
}

fn failure_on_line(line: &str) -> Option<(String, String)> {
    let (number, rest) = line.trim_start().split_once(')')?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let rest = rest.trim_start();
    let open = rest.find('(')?;
    let close = rest[open..].find(')')? + open;
    let method = &rest[..open];
    if method.is_empty()
        || !method
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return None;
    }
    let class = &rest[open + 1..close];
    let message = rest[close + 1..].trim().to_string();
    Some((format!("{method}({class})"), message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn junit_failure_rows_are_parsed() {
        let output = "\
.F
Time: 0.013
There was 1 failure:
1) testAnswer(com.example.CalcTest)junit.framework.AssertionFailedError: expected:<42> but was:<41>
FAILURES!!!
Tests run: 3,  Failures: 1,  Errors: 0
";
        let (test, message) = parse_junit_failure(output).unwrap();
        assert_eq!(test, "testAnswer(com.example.CalcTest)");
        assert!(message.contains("expected:<42>"));
    }

    #[test]
    fn non_failure_lines_are_ignored() {
        assert!(parse_junit_failure("Tests run: 3,  Failures: 0").is_none());
        assert!(failure_on_line("Time: 0.013").is_none());
        assert!(failure_on_line("x) bad(Row)").is_none());
        assert!(failure_on_line("12) odd name(Row)").is_none());
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use std::fs::{self, File};
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};
        use tempfile::tempdir;

        fn fake_harness(dir: &Path, body: &str) -> PathBuf {
            let script = dir.join("fake-java");
            let mut file = File::create(&script).unwrap();
            writeln!(file, "#!/usr/bin/env sh").unwrap();
            writeln!(file, "{body}").unwrap();
            drop(file);
            let mut perms = fs::metadata(&script).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script, perms).unwrap();
            script
        }

        #[test]
        fn passing_harness_reports_pass() {
            let tmp = tempdir().unwrap();
            let script = fake_harness(tmp.path(), "exit 0");
            let runner = JvmTestRunner::new(script.display().to_string());
            let report = runner.run_class("cp", "FooTest", None).unwrap();
            assert_eq!(report.outcome, TestOutcome::Pass);
        }

        #[test]
        fn failing_harness_names_the_killer_test() {
            let tmp = tempdir().unwrap();
            let script = fake_harness(
                tmp.path(),
                "echo '1) testFoo(FooTest)junit.framework.AssertionFailedError: boom'; exit 1",
            );
            let runner = JvmTestRunner::new(script.display().to_string());
            let report = runner.run_class("cp", "FooTest", None).unwrap();
            assert_eq!(
                report.outcome,
                TestOutcome::Fail {
                    test: "testFoo(FooTest)".to_string(),
                    message: "junit.framework.AssertionFailedError: boom".to_string(),
                }
            );
        }

        #[test]
        fn verification_errors_get_the_reserved_killer() {
            let tmp = tempdir().unwrap();
            let script = fake_harness(
                tmp.path(),
                "echo 'Exception in thread \"main\" java.lang.VerifyError: bad frame' >&2; exit 1",
            );
            let runner = JvmTestRunner::new(script.display().to_string());
            let report = runner.run_class("cp", "FooTest", None).unwrap();
            match report.outcome {
                TestOutcome::Fail { test, .. } => assert_eq!(test, VERIFICATION_KILLER),
                other => panic!("expected verification failure, got {other:?}"),
            }
        }

        #[test]
        fn unattributable_failures_fall_back_to_the_test_class() {
            let tmp = tempdir().unwrap();
            let script = fake_harness(tmp.path(), "exit 3");
            let runner = JvmTestRunner::new(script.display().to_string());
            let report = runner.run_class("cp", "FooTest", None).unwrap();
            match report.outcome {
                TestOutcome::Fail { test, message } => {
                    assert_eq!(test, "FooTest");
                    assert!(message.contains("exit status"));
                }
                other => panic!("expected failure, got {other:?}"),
            }
        }

        #[test]
        fn budget_overrun_is_a_timeout() {
            let tmp = tempdir().unwrap();
            let script = fake_harness(tmp.path(), "sleep 30");
            let runner = JvmTestRunner::new(script.display().to_string());
            let report = runner
                .run_class("cp", "FooTest", Some(Duration::from_millis(150)))
                .unwrap();
            assert_eq!(report.outcome, TestOutcome::Timeout);
            assert!(report.elapsed < Duration::from_secs(25));
        }

        #[test]
        fn missing_harness_is_a_spawn_error() {
            let runner = JvmTestRunner::new("/nonexistent/java-bin");
            assert!(matches!(
                runner.run_class("cp", "FooTest", None),
                Err(TestRunError::Spawn { .. })
            ));
        }
    }
}
