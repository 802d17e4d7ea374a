mod bus;
mod config;
mod klipper;
mod models;
mod runner;
mod sensors;
mod utils;

use std::env;
use std::process;

use log::{error, info};

use config::DiagConfig;
use runner::{run_diagnostics, RunOptions, TESTS};

const USAGE: &str = "Usage: rpi-diagnostics [--quick] [--quiet] [--list]

Run the hardware diagnostic suite.

Options:
  -q, --quick   Skip slower tests (full multiplexer bus scan)
      --quiet   Suppress output, only return an exit code
  -l, --list    List the configured tests and exit

Exit codes:
  0 - All tests passed
  1 - One or more tests failed
  2 - Invalid arguments";

#[derive(Debug, Default)]
struct CliArgs {
    quick: bool,
    quiet: bool,
    list: bool,
}

fn parse_args() -> Result<CliArgs, String> {
    let mut args = CliArgs::default();

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--quick" | "-q" => args.quick = true,
            "--quiet" => args.quiet = true,
            "--list" | "-l" => args.list = true,
            "--help" | "-h" => {
                println!("{}", USAGE);
                process::exit(0);
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }

    Ok(args)
}

fn list_tests() {
    println!("Available tests:");
    for (i, test) in TESTS.iter().enumerate() {
        let critical = if test.critical { " [CRITICAL]" } else { "" };
        println!("  {}. {}{}", i + 1, test.name, critical);
    }
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", USAGE);
            process::exit(2);
        }
    };

    // Initialize logging; --quiet leaves only the exit code.
    let level = if args.quiet {
        log::LevelFilter::Off
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();

    if args.list {
        list_tests();
        return;
    }

    // Load configuration
    let config = match DiagConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let opts = RunOptions { quick: args.quick };

    // Run the suite or bail out early on Ctrl+C
    let exit_code = tokio::select! {
        code = run_diagnostics(&config, &opts) => code,
        _ = tokio::signal::ctrl_c() => {
            info!("Diagnostics interrupted by user. Exiting.");
            130
        }
    };

    process::exit(exit_code);
}
