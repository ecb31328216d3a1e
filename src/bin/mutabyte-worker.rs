use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mutabyte::mutate::KindSet;
use mutabyte::testrun::JvmTestRunner;
use mutabyte::worker::{run_batch, run_warm_up, BatchRequest};

/// Worker entry point. Spawned by the scheduler with one contiguous index
/// range (or `--warm-up`); emits one verdict line per index on stdout,
/// terminated by `DONE`.
#[derive(Debug, Parser)]
#[command(name = "mutabyte-worker")]
#[command(version)]
struct Cli {
    /// Classpath holding the target, its collaborators and the tests.
    #[arg(long, value_name = "CLASSPATH")]
    classpath: String,

    /// Dotted name of the target class.
    #[arg(long, value_name = "CLASS")]
    target: String,

    /// First mutation index, inclusive.
    #[arg(long, value_name = "NUM", default_value_t = 0)]
    from: usize,

    /// Last mutation index, inclusive.
    #[arg(long, value_name = "NUM", default_value_t = 0)]
    to: usize,

    /// Run the warm-up pass instead of a mutation batch.
    #[arg(long)]
    warm_up: bool,

    /// Enabled mutation kinds, comma-separated.
    #[arg(long, value_name = "KINDS", default_value = "negate-conditional,swap-arith")]
    kinds: KindSet,

    /// Method name excluded from mutation.
    #[arg(long = "exclude", value_name = "METHOD")]
    exclude: Vec<String>,

    /// Deferred class-name prefix.
    #[arg(long = "defer", value_name = "NAME")]
    defer: Vec<String>,

    /// Test class, in declaration order.
    #[arg(long = "test", value_name = "CLASS")]
    test: Vec<String>,

    /// Manifest handoff file with order, budgets and killer memory.
    #[arg(long, value_name = "PATH")]
    manifest: Option<PathBuf>,

    /// Host runtime launcher for test runs.
    #[arg(long, value_name = "PATH", default_value = "java")]
    java_bin: String,

    /// Extra argument forwarded to the test runtime.
    #[arg(long = "jvm-arg", value_name = "STRING")]
    jvm_arg: Vec<String>,

    /// `key=value` system property forwarded to the test runtime.
    #[arg(long = "define-property", value_name = "STRING")]
    define_property: Vec<String>,

    /// Emit debug diagnostics to stderr.
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default = if cli.verbose { "mutabyte=debug" } else { "mutabyte=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let request = BatchRequest {
        classpath: cli.classpath,
        target: cli.target,
        first: cli.from,
        last: cli.to,
        kinds: cli.kinds,
        excluded: cli.exclude,
        deferred: cli.defer,
        tests: cli.test,
        manifest_path: cli.manifest,
    };
    let runner = JvmTestRunner::new(cli.java_bin)
        .with_jvm_args(cli.jvm_arg)
        .with_properties(cli.define_property);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = if cli.warm_up {
        run_warm_up(&request, &runner, &mut out)
    } else {
        run_batch(&request, &runner, &mut out)
    };
    let _ = out.flush();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mutabyte-worker: {err}");
            ExitCode::FAILURE
        }
    }
}
