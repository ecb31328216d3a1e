//! # mutabyte
//!
//! Class-level mutation testing for JVM class files. Given a compiled
//! target class and its unit tests, `mutabyte` enumerates tiny bytecode
//! edits, runs the relevant tests against each mutant in an isolated worker
//! process, and reports the share of mutants the tests detect. A surviving
//! mutant is a hole in the test suite.
//!
//! The crate is organised leaves-first:
//! - `classfile`: lossless class-file codec with narrow, offset-preserving edits
//! - `mutate`: mutation-point enumeration and application
//! - `resolve`: the mutant's class resolution policy and classpath overlay
//! - `testrun`: the test-runner façade over the host runtime
//! - `order`: warm-up timings, fastest-first ordering, killer memory
//! - `cache`: persisted per-target run manifests
//! - `worker`: batch execution and the verdict line protocol
//! - `runner`: the scheduler state machine
//! - `listener`: output event stream and the named listener registry

#![warn(missing_docs)]

pub mod cache;
pub mod classfile;
pub mod config;
pub mod listener;
pub mod mutate;
pub mod order;
pub mod resolve;
pub mod runner;
pub mod testrun;
pub mod worker;

#[cfg(test)]
pub(crate) mod fixture;

pub use config::{guess_test_class_name, EngineConfig, WARM_UP_INDEX};
pub use listener::{Listener, ListenerRegistry, RunSummary};
pub use mutate::{KindSet, Mutater, Mutation, MutationKind};
pub use runner::{EngineError, FastRunner, ProcessLauncher, WorkerLauncher};
