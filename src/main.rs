//! uplock binary entry point

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;
use uplock::cli::{run, CliArgs, EXIT_FAILURE};

fn main() {
    let args = CliArgs::parse();

    let default_level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("uplock={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{} {:#}", "error:".red(), err);
            std::process::exit(EXIT_FAILURE);
        }
    }
}
