use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mutabyte::listener::ListenerRegistry;
use mutabyte::mutate::MutationKind;
use mutabyte::runner::{FastRunner, ProcessLauncher};
use mutabyte::EngineConfig;

#[derive(Debug, Parser)]
#[command(name = "mutabyte")]
#[command(version)]
#[command(about = "Class-level mutation testing for JVM class files")]
struct Cli {
    /// Name of the class to mutate.
    class: String,

    /// Unit test classes for the target. Guessed from the class name when
    /// omitted.
    test_classes: Vec<String>,

    /// Provide extra output during the run.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Comma-separated list of methods to exclude.
    #[arg(short = 'x', long, value_name = "METHOD")]
    exclude: Option<String>,

    /// Mutate return values.
    #[arg(short = 'r', long)]
    return_vals: bool,

    /// Mutate inline constants.
    #[arg(short = 'k', long)]
    inline_consts: bool,

    /// Mutate increments.
    #[arg(short = 'i', long)]
    increments: bool,

    /// Mutate constant pool entries.
    #[arg(short = 'w', long)]
    cpool: bool,

    /// Mutate switch cases.
    #[arg(short = 'j', long = "switch")]
    switch_cases: bool,

    /// Mutate assignments.
    #[arg(short = 'X', long)]
    stores: bool,

    /// Use Emacs-format output (shortcut for --printer emacs).
    #[arg(short = 'e', long)]
    emacs: bool,

    /// Name of the listener responsible for producing output.
    #[arg(short = 'p', long, value_name = "NAME", conflicts_with = "emacs")]
    printer: Option<String>,

    /// Index of the first mutation to attempt. -1 runs the warm-up alone;
    /// values below -1 are ignored.
    #[arg(short = 'f', long, value_name = "NUM")]
    first_mutation: Option<i64>,

    /// The classpath to use for tests.
    #[arg(short = 'c', long, value_name = "CLASSPATH")]
    classpath: Option<String>,

    /// Do not order tests by runtime.
    #[arg(short = 'o', long)]
    no_order: bool,

    /// Do not save cache.
    #[arg(short = 's', long)]
    no_save_cache: bool,

    /// Do not load cache.
    #[arg(short = 'l', long)]
    no_load_cache: bool,

    /// Do not use cache.
    #[arg(short = 'u', long)]
    no_use_cache: bool,

    /// Defer loading of the named class/package to the parent classpath.
    #[arg(short = 'd', long = "defer-class", value_name = "NAME")]
    defer_class: Vec<String>,

    /// Maximum number of mutations to run in one worker process. Negative
    /// values are ignored.
    #[arg(short = 'm', long, value_name = "MAX")]
    max_external_mutations: Option<i64>,

    /// Additional command-line argument passed to the runtime used to run
    /// unit tests.
    #[arg(short = 'J', long = "jvm-arg", value_name = "STRING")]
    jvm_arg: Vec<String>,

    /// Additional system property to define in the runtime used to run
    /// unit tests.
    #[arg(short = 'D', long = "define-property", value_name = "STRING")]
    define_property: Vec<String>,

    /// Directory for cache manifests.
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Host runtime launcher used for test runs.
    #[arg(long, value_name = "PATH")]
    java_bin: Option<String>,

    /// Do not derive Dummy…Test names for Abstract… targets.
    #[arg(long)]
    no_dummy_naming: bool,
}

fn build_config(cli: &Cli) -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(classpath) = &cli.classpath {
        config = config.with_classpath(classpath.clone());
    }
    if let Some(dir) = &cli.cache_dir {
        config = config.with_cache_dir(dir.clone());
    }
    if let Some(java_bin) = &cli.java_bin {
        config = config.with_java_bin(java_bin.clone());
    }
    if cli.return_vals {
        config = config.with_kind(MutationKind::ReturnValues);
    }
    if cli.inline_consts {
        config = config.with_kind(MutationKind::InlineConstants);
    }
    if cli.increments {
        config = config.with_kind(MutationKind::Increments);
    }
    if cli.cpool {
        config = config.with_kind(MutationKind::ConstantPool);
    }
    if cli.switch_cases {
        config = config.with_kind(MutationKind::Switch);
    }
    if cli.stores {
        config = config.with_kind(MutationKind::Stores);
    }
    if let Some(exclude) = &cli.exclude {
        config = config.with_excluded_methods(exclude.split(',').filter(|m| !m.is_empty()));
    }
    for prefix in &cli.defer_class {
        config = config.with_deferred(prefix.clone());
    }
    if let Some(first) = cli.first_mutation {
        if first >= -1 {
            config = config.with_first_mutation(first);
        }
    }
    if let Some(max) = cli.max_external_mutations {
        if max >= 0 {
            config = config.with_max_external_mutations(max as usize);
        }
    }
    config.ordered = !cli.no_order;
    config.load_cache = !cli.no_load_cache;
    config.save_cache = !cli.no_save_cache;
    config.use_cache = !cli.no_use_cache;
    config.verbose = cli.verbose;
    config.jvm_args = cli.jvm_arg.clone();
    config.properties = cli.define_property.clone();
    config.dummy_test_naming = !cli.no_dummy_naming;
    config
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "mutabyte=debug" } else { "mutabyte=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = build_config(&cli);

    let registry = ListenerRegistry::with_defaults();
    let printer = if cli.emacs {
        "emacs".to_string()
    } else {
        cli.printer.clone().unwrap_or_else(|| "score".to_string())
    };
    let Some(mut listener) = registry.create(&printer) else {
        eprintln!(
            "mutabyte: unknown printer {printer:?} (available: {})",
            registry.names().join(", ")
        );
        return ExitCode::from(2);
    };

    let launcher = ProcessLauncher::from_config(&config);
    let runner = FastRunner::new(config);
    match runner.run(&cli.class, &cli.test_classes, &launcher, listener.as_mut()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mutabyte: {err}");
            ExitCode::FAILURE
        }
    }
}
