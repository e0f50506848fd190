//! `onslaught-check-sdist-log`: fail when an sdist build log has warnings.
//!
//! Exit status: 0 clean, 1 warnings found (each printed), 2 unreadable log.

use std::fs;
use std::path::PathBuf;

use clap::Parser;

use onslaught::core::sdist_log::sdist_warnings;
use onslaught::exit_codes;

#[derive(Debug, Parser)]
#[command(
    name = "onslaught-check-sdist-log",
    version,
    about = "Report warnings in a setup.py sdist log"
)]
struct Cli {
    /// Build log to scan.
    log: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let bytes = match fs::read(&cli.log) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("read {}: {err}", cli.log.display());
            std::process::exit(exit_codes::USAGE);
        }
    };
    let text = String::from_utf8_lossy(&bytes);
    let warnings = sdist_warnings(&text);
    for warning in &warnings {
        println!("{warning}");
    }
    if !warnings.is_empty() {
        eprintln!("{} warning(s) in {}", warnings.len(), cli.log.display());
        std::process::exit(exit_codes::GATE_FAILED);
    }
}
