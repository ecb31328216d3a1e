//! Listener event stream and the named listener registry.
//!
//! The scheduler narrates a run through a fixed vocabulary: `Start`, one
//! `Mutation` per point, one `Verdict` per point, `End`. Output formatters
//! implement [`Listener`] and are chosen by name from a registry of factory
//! functions, so `--printer` needs no reflective dispatch.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::mutate::Mutation;

/// A mutation about to be tested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    /// Mutation index.
    pub index: usize,
    /// Dotted class name.
    pub class_name: String,
    /// Mutated method name.
    pub method: String,
    /// Source line, when known.
    pub line: Option<u16>,
    /// Description of the edit.
    pub description: String,
}

impl MutationEvent {
    /// `Class.method:line` location string.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}.{}:{}", self.class_name, self.method, line),
            None => format!("{}.{}", self.class_name, self.method),
        }
    }
}

impl From<&Mutation> for MutationEvent {
    fn from(mutation: &Mutation) -> Self {
        Self {
            index: mutation.index,
            class_name: mutation.class_name.clone(),
            method: mutation.method.clone(),
            line: mutation.line,
            description: mutation.description.clone(),
        }
    }
}

/// Final outcome of one mutant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictOutcome {
    /// A test detected the mutant.
    Killed,
    /// No test detected the mutant.
    Survived,
    /// The mutant ran out of budget; counted as killed.
    Timeout,
    /// The engine could not produce a verdict for this index.
    EngineError,
}

/// A verdict for one mutation index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictEvent {
    /// Mutation index.
    pub index: usize,
    /// The outcome.
    pub outcome: VerdictOutcome,
    /// The detecting test, for killed mutants.
    pub killer: Option<String>,
}

/// Aggregated counts for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Total enumerated mutation points.
    pub points: usize,
    /// Mutants killed by a failing test.
    pub killed: usize,
    /// Mutants killed by budget overrun.
    pub timeouts: usize,
    /// Mutants no test detected.
    pub survived: usize,
    /// Indices with no verdict because of engine failures.
    pub engine_errors: usize,
}

impl RunSummary {
    /// Score = detected / tested, in percent. Timeouts count as detected;
    /// engine errors drop out of the denominator. An empty run scores 100.
    pub fn score_percent(&self) -> f64 {
        let detected = self.killed + self.timeouts;
        let tested = detected + self.survived;
        if tested == 0 {
            100.0
        } else {
            detected as f64 * 100.0 / tested as f64
        }
    }
}

/// Output sink for the run event stream. Events arrive in order: `Start`,
/// then `Mutation` before its `Verdict` for each index, then `End`.
pub trait Listener {
    /// A run begins for `target` with `points` enumerated mutations.
    fn on_start(&mut self, target: &str, tests: &[String], points: usize);
    /// A mutant is about to be tested.
    fn on_mutation(&mut self, event: &MutationEvent);
    /// A mutant received its verdict.
    fn on_verdict(&mut self, event: &VerdictEvent);
    /// The run finished.
    fn on_end(&mut self, summary: &RunSummary);
}

/// The default listener: a dot per killed mutant, `M`/`T`/`E` lines for
/// survivors, timeouts and engine errors, and a final percentage.
pub struct ScorePrinterListener {
    out: Box<dyn Write + Send>,
    pending: Option<MutationEvent>,
    column: usize,
}

impl ScorePrinterListener {
    /// Printing to stdout.
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Printing to an arbitrary writer.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            pending: None,
            column: 0,
        }
    }

    fn break_dots(&mut self) {
        if self.column > 0 {
            let _ = writeln!(self.out);
            self.column = 0;
        }
    }
}

impl Default for ScorePrinterListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener for ScorePrinterListener {
    fn on_start(&mut self, target: &str, tests: &[String], points: usize) {
        let _ = writeln!(
            self.out,
            "Mutating {target} ({points} points, tests: {})",
            tests.join(" ")
        );
    }

    fn on_mutation(&mut self, event: &MutationEvent) {
        self.pending = Some(event.clone());
    }

    fn on_verdict(&mut self, event: &VerdictEvent) {
        let pending = self.pending.take();
        let describe = |prefix: &str| {
            pending
                .as_ref()
                .map(|m| format!("{prefix} {}: {}", m.location(), m.description))
                .unwrap_or_else(|| format!("{prefix} mutation {}", event.index))
        };
        match event.outcome {
            VerdictOutcome::Killed => {
                let _ = write!(self.out, ".");
                self.column += 1;
                if self.column >= 50 {
                    self.break_dots();
                }
                let _ = self.out.flush();
            }
            VerdictOutcome::Timeout => {
                self.break_dots();
                let _ = writeln!(self.out, "{}", describe("T"));
            }
            VerdictOutcome::Survived => {
                self.break_dots();
                let _ = writeln!(self.out, "{}", describe("M"));
            }
            VerdictOutcome::EngineError => {
                self.break_dots();
                let _ = writeln!(self.out, "{}", describe("E"));
            }
        }
    }

    fn on_end(&mut self, summary: &RunSummary) {
        self.break_dots();
        let _ = writeln!(
            self.out,
            "Score: {:.0}% ({} killed, {} timed out, {} survived, {} errors, {} points)",
            summary.score_percent(),
            summary.killed,
            summary.timeouts,
            summary.survived,
            summary.engine_errors,
            summary.points,
        );
    }
}

/// Emacs-format listener: `path:line:` rows that compilation buffers parse.
pub struct EmacsFormatListener {
    out: Box<dyn Write + Send>,
    pending: Option<MutationEvent>,
}

impl EmacsFormatListener {
    /// Printing to stdout.
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Printing to an arbitrary writer.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out, pending: None }
    }

    fn source_path(event: &MutationEvent) -> String {
        let outer = event
            .class_name
            .split('$')
            .next()
            .unwrap_or(&event.class_name);
        format!("{}.java", outer.replace('.', "/"))
    }
}

impl Default for EmacsFormatListener {
    fn default() -> Self {
        Self::new()
    }
}

impl Listener for EmacsFormatListener {
    fn on_start(&mut self, target: &str, _tests: &[String], points: usize) {
        let _ = writeln!(self.out, "Mutating {target} with {points} points");
    }

    fn on_mutation(&mut self, event: &MutationEvent) {
        self.pending = Some(event.clone());
    }

    fn on_verdict(&mut self, event: &VerdictEvent) {
        let Some(mutation) = self.pending.take() else {
            return;
        };
        let label = match event.outcome {
            VerdictOutcome::Killed => return,
            VerdictOutcome::Survived => "survived",
            VerdictOutcome::Timeout => "timed out",
            VerdictOutcome::EngineError => "engine error",
        };
        let _ = writeln!(
            self.out,
            "{}:{}: {}: {}",
            Self::source_path(&mutation),
            mutation.line.unwrap_or(0),
            label,
            mutation.description,
        );
    }

    fn on_end(&mut self, summary: &RunSummary) {
        let _ = writeln!(self.out, "Score: {:.0}%", summary.score_percent());
    }
}

/// Factory producing a fresh listener.
pub type ListenerFactory = fn() -> Box<dyn Listener>;

/// Named listener factories.
pub struct ListenerRegistry {
    factories: BTreeMap<String, ListenerFactory>,
}

impl ListenerRegistry {
    /// A registry with the built-in listeners: `score` and `emacs`.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register("score", || Box::new(ScorePrinterListener::new()));
        registry.register("emacs", || Box::new(EmacsFormatListener::new()));
        registry
    }

    /// Register a factory under `name`, replacing any previous binding.
    pub fn register(&mut self, name: impl Into<String>, factory: ListenerFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Instantiate the listener registered under `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn Listener>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn mutation(index: usize) -> MutationEvent {
        MutationEvent {
            index,
            class_name: "com.example.Calc".to_string(),
            method: "choose".to_string(),
            line: Some(11),
            description: "negated conditional (ifle -> ifgt)".to_string(),
        }
    }

    fn verdict(index: usize, outcome: VerdictOutcome) -> VerdictEvent {
        VerdictEvent {
            index,
            outcome,
            killer: None,
        }
    }

    #[test]
    fn score_printer_prints_dots_and_survivor_lines() {
        let buffer = SharedBuffer::default();
        let mut listener = ScorePrinterListener::with_writer(Box::new(buffer.clone()));
        listener.on_start("com.example.Calc", &["CalcTest".to_string()], 3);
        listener.on_mutation(&mutation(0));
        listener.on_verdict(&verdict(0, VerdictOutcome::Killed));
        listener.on_mutation(&mutation(1));
        listener.on_verdict(&verdict(1, VerdictOutcome::Survived));
        listener.on_mutation(&mutation(2));
        listener.on_verdict(&verdict(2, VerdictOutcome::Timeout));
        listener.on_end(&RunSummary {
            points: 3,
            killed: 1,
            timeouts: 1,
            survived: 1,
            engine_errors: 0,
        });

        let text = buffer.text();
        assert!(text.contains("Mutating com.example.Calc (3 points"));
        assert!(text.contains(".\nM com.example.Calc.choose:11: negated conditional"));
        assert!(text.contains("T com.example.Calc.choose:11"));
        assert!(text.contains("Score: 67%"));
    }

    #[test]
    fn emacs_listener_emits_parseable_rows_for_survivors_only() {
        let buffer = SharedBuffer::default();
        let mut listener = EmacsFormatListener::with_writer(Box::new(buffer.clone()));
        listener.on_start("com.example.Calc", &[], 2);
        listener.on_mutation(&mutation(0));
        listener.on_verdict(&verdict(0, VerdictOutcome::Killed));
        listener.on_mutation(&mutation(1));
        listener.on_verdict(&verdict(1, VerdictOutcome::Survived));
        listener.on_end(&RunSummary {
            points: 2,
            killed: 1,
            timeouts: 0,
            survived: 1,
            engine_errors: 0,
        });

        let text = buffer.text();
        assert!(text.contains("com/example/Calc.java:11: survived: negated conditional"));
        assert_eq!(text.matches("Calc.java").count(), 1);
    }

    #[test]
    fn inner_classes_report_the_outer_source_file() {
        let event = MutationEvent {
            index: 0,
            class_name: "com.example.Outer$Inner".to_string(),
            method: "go".to_string(),
            line: Some(4),
            description: "x".to_string(),
        };
        assert_eq!(
            EmacsFormatListener::source_path(&event),
            "com/example/Outer.java"
        );
    }

    #[test]
    fn registry_resolves_builtin_names() {
        let registry = ListenerRegistry::with_defaults();
        assert_eq!(registry.names(), ["emacs", "score"]);
        assert!(registry.create("score").is_some());
        assert!(registry.create("emacs").is_some());
        assert!(registry.create("html").is_none());
    }

    #[test]
    fn custom_factories_can_be_registered() {
        let mut registry = ListenerRegistry::with_defaults();
        registry.register("quiet", || {
            Box::new(ScorePrinterListener::with_writer(Box::new(io::sink())))
        });
        assert!(registry.create("quiet").is_some());
    }

    #[test]
    fn score_handles_the_empty_run() {
        let summary = RunSummary::default();
        assert_eq!(summary.score_percent(), 100.0);
    }

    #[test]
    fn timeouts_count_towards_the_score() {
        let summary = RunSummary {
            points: 2,
            killed: 0,
            timeouts: 1,
            survived: 1,
            engine_errors: 0,
        };
        assert_eq!(summary.score_percent(), 50.0);
    }
}
