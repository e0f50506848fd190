//! `onslaught`: run a Python project through its quality gates.

use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use tracing::{debug, error, info, warn};

use onslaught::error::RunFailure;
use onslaught::exit_codes;
use onslaught::io::config::load_config;
use onslaught::logging::{self, Verbosity};
use onslaught::pipeline::{self, RunOptions};

#[derive(Debug, Parser)]
#[command(
    name = "onslaught",
    version,
    about = "Run the target python project through a battery of tests"
)]
#[command(group(ArgGroup::new("verbosity").args(["quiet", "debug"])))]
struct Cli {
    /// Only log warnings and errors.
    #[arg(long)]
    quiet: bool,

    /// Log everything.
    #[arg(long)]
    debug: bool,

    /// Results directory. Emptied first if it exists.
    /// [default: ~/.onslaught/results/<package>]
    #[arg(long, value_name = "DIR")]
    results: Option<PathBuf>,

    /// Toolchain configuration (TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Target python source.
    #[arg(default_value = ".")]
    target: PathBuf,
}

fn main() {
    std::process::exit(real_main());
}

fn real_main() -> i32 {
    let cli = Cli::parse();
    let log = match logging::init(Verbosity::from_flags(cli.quiet, cli.debug)) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::FATAL;
        }
    };
    debug!(?cli, "parsed arguments");

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("{err:?}");
            return exit_codes::FATAL;
        }
    };

    let options = RunOptions {
        target: cli.target,
        results: cli.results,
        config,
    };
    match pipeline::run(options, &log) {
        Ok(report) => {
            info!("{} passed every phase.", report.package);
            println!("{}", report.results_dir);
            exit_codes::OK
        }
        Err(failure) => {
            match &failure {
                RunFailure::GateFailed {
                    phase,
                    results_dir,
                    ..
                } => {
                    warn!("Phase {phase} failed; full results in {results_dir}");
                    println!("{results_dir}");
                }
                RunFailure::Fatal(err) => error!("{err:?}"),
            }
            failure.exit_code()
        }
    }
}
