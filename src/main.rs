use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use commander::error::Error;
use commander::loader::{self, DEFAULT_SUITE_FILENAME};
use commander::model::RunResult;
use commander::report::{self, HumanReporter};
use commander::runtime::{EventHandler, NoopHandler, Runtime};
use commander::schema::{self, SuiteFile};
use commander::suite::{self, Suite};
use regex::Regex;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Parser)]
#[command(name = "commander")]
#[command(about = "A declarative test runner for command-line applications")]
#[command(version)]
struct Cli {
    /// Log each command, its environment and captured output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a test suite
    Test {
        /// Suite file, directory with --dir, or "-" for stdin
        #[arg(default_value = DEFAULT_SUITE_FILENAME)]
        path: PathBuf,
        /// Run every suite file in a directory
        #[arg(long)]
        dir: bool,
        /// Suite file whose config and nodes apply underneath each suite
        #[arg(long)]
        config: Option<PathBuf>,
        /// Only run tests whose title matches this regex (repeatable)
        #[arg(short, long)]
        filter: Vec<String>,
        /// Change to this directory before loading suites
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
    },
    /// Load and resolve suites without running them
    Validate {
        /// Suite file or directory
        #[arg(default_value = DEFAULT_SUITE_FILENAME)]
        path: PathBuf,
    },
    /// Scaffold a new suite file
    Init {
        /// Output path for the new suite file
        #[arg(default_value = DEFAULT_SUITE_FILENAME)]
        path: PathBuf,
    },
    /// Output the suite schema
    Schema,
}

const INIT_TEMPLATE: &str = r#"# Global configuration, applied to every test.
config:
  env:
    GREETING: hello
  timeout: 5s

# Named execution targets. Tests run on "local" unless they list nodes.
# nodes:
#   container:
#     type: docker
#     image: alpine:3

tests:
  echo $GREETING:
    exit-code: 0
    stdout: hello

  it should fail with exit code 1:
    command: exit 1
    exit-code: 1

  print lines:
    command: printf 'one\ntwo\n'
    stdout:
      lines:
        1: one
        2: two
      line-count: 2
"#;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Test {
            path,
            dir,
            config,
            filter,
            workdir,
            output,
        } => {
            if let Some(ref workdir) = workdir
                && let Err(e) = std::env::set_current_dir(workdir)
            {
                exit_with(format_args!("cannot change to {}: {e}", workdir.display()));
            }

            let filters = suite::compile_filters(&filter).unwrap_or_else(|e| exit_with(e));
            let overrides = config
                .as_deref()
                .map(|p| loader::load_suite(p).unwrap_or_else(|e| exit_with(e)));

            let human = output == OutputFormat::Human;
            let mut handler: Box<dyn EventHandler> = if human {
                Box::new(HumanReporter::new(io::stdout()))
            } else {
                Box::new(NoopHandler)
            };

            let result = if dir {
                if human {
                    println!("Starting test against directory: {}...\n", path.display());
                }
                test_dir(&path, overrides.as_ref(), &filters, handler.as_mut())
            } else if path.as_os_str() == "-" {
                if human {
                    println!("Starting test from stdin...\n");
                }
                loader::load_stdin()
                    .map_err(Error::from)
                    .and_then(|file| {
                        run_suite(file, overrides.as_ref(), None, &filters, handler.as_mut())
                    })
            } else {
                if human {
                    println!("Starting test file {}...\n", path.display());
                }
                loader::load_suite(&path)
                    .map_err(Error::from)
                    .and_then(|file| {
                        run_suite(file, overrides.as_ref(), None, &filters, handler.as_mut())
                    })
            };
            drop(handler);

            let run = result.unwrap_or_else(|e| exit_with(e));
            render(&run, output);

            if !run.success() {
                if human {
                    eprintln!("Test suite failed, use --verbose for more detailed output");
                }
                std::process::exit(1);
            }
        }
        Command::Validate { path } => {
            let paths = if path.is_dir() {
                loader::find_suites(&path).unwrap_or_else(|e| exit_with(e))
            } else {
                vec![path.clone()]
            };

            if paths.is_empty() {
                exit_with(format_args!("no suite files found in {}", path.display()));
            }

            let mut errors = 0;
            for suite_path in &paths {
                let loaded = loader::load_suite(suite_path)
                    .map_err(Error::from)
                    .and_then(|file| Suite::new(file, None, None).map_err(Error::from));
                match loaded {
                    Ok(suite) if suite.registry().is_empty() => {
                        println!(
                            "✓ {} ({} tests)",
                            suite_path.display(),
                            suite.tests().len()
                        );
                    }
                    Ok(suite) => {
                        println!(
                            "✓ {} ({} tests, {} nodes)",
                            suite_path.display(),
                            suite.tests().len(),
                            suite.registry().len()
                        );
                    }
                    Err(e) => {
                        eprintln!("✗ {}: {e}", suite_path.display());
                        errors += 1;
                    }
                }
            }

            if errors > 0 {
                eprintln!("\n{errors} suite(s) failed validation");
                std::process::exit(1);
            }
            println!("\nAll {} suite(s) valid", paths.len());
        }
        Command::Init { path } => {
            if path.exists() {
                exit_with(format_args!("file already exists: {}", path.display()));
            }
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
                && let Err(e) = fs::create_dir_all(parent)
            {
                exit_with(format_args!("cannot create directory: {e}"));
            }
            if let Err(e) = fs::write(&path, INIT_TEMPLATE) {
                exit_with(format_args!("cannot write file: {e}"));
            }
            println!("Created: {}", path.display());
        }
        Command::Schema => {
            let schema = schema::generate_schema();
            match serde_json::to_string_pretty(&schema) {
                Ok(json) => println!("{json}"),
                Err(e) => exit_with(e),
            }
        }
    }
}

/// Log to stderr; `RUST_LOG` takes precedence over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn exit_with(message: impl Display) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}

fn run_suite(
    file: SuiteFile,
    overrides: Option<&SuiteFile>,
    file_name: Option<String>,
    filters: &[Regex],
    handler: &mut dyn EventHandler,
) -> Result<RunResult, Error> {
    let mut suite = Suite::new(file, overrides, file_name)?;
    suite.retain_matching(filters);
    let (tests, registry) = suite.into_parts();
    Runtime::new(registry).start(tests, handler)
}

/// Run each suite file in `dir` with its own node registry.
fn test_dir(
    dir: &Path,
    overrides: Option<&SuiteFile>,
    filters: &[Regex],
    handler: &mut dyn EventHandler,
) -> Result<RunResult, Error> {
    let mut run = RunResult::default();
    for path in loader::find_suites(dir)? {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let file = loader::load_suite(&path)?;
        run.converge(run_suite(file, overrides, file_name, filters, handler)?);
    }
    Ok(run)
}

fn render(run: &RunResult, output: OutputFormat) {
    match output {
        OutputFormat::Human => {
            if let Err(e) = report::write_summary(&mut io::stdout().lock(), run) {
                exit_with(e);
            }
        }
        OutputFormat::Json => match report::format_json(run) {
            Ok(json) => println!("{json}"),
            Err(e) => exit_with(e),
        },
        OutputFormat::Junit => {
            print!("{}", report::format_junit_xml(run, Utc::now()));
        }
    }
}
