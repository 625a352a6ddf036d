// src/commands.rs

use anyhow::{
    Context,
    Result
};
use clap::{
    ArgAction,
    Parser
};
use std::{
    fs,
    io::{
        self,
        Read,
        Write
    },
    path::PathBuf,
    process::ExitCode,
    time::Instant
};
use tracing::{
    error,
    info,
    warn
};
use tracing_subscriber::EnvFilter;

use crate::{
    config::EngineConfig,
    error::exit_code_for,
    protocol,
    util
};

/// Reads one JSON request on stdin (or `--input`), writes one JSON response
/// on stdout. Diagnostics go to stderr.
#[derive(Parser, Debug)]
#[command(name = "autoload-engine", version, about = "Parallel classmap generation and vendor maintenance engine")]
pub struct Cli {
    /// Worker threads (overrides AUTOLOAD_ENGINE_THREADS).
    #[arg(long)]
    pub threads: Option<usize>,

    /// Read the request from a file instead of stdin.
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// More diagnostics on stderr; repeat for debug output.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

pub fn run_cli() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// `RUST_LOG` wins; otherwise `-v` picks the level.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: &Cli) -> Result<()> {
    let start = Instant::now();
    let config = EngineConfig::from_env().with_threads(cli.threads);

    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(config.threads).build_global() {
        warn!(error = %e, "worker pool already initialised");
    }

    let input = read_request(cli)?;
    let response = protocol::handle(&input, &config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, &response).context("writing response")?;
    writeln!(out).context("writing response")?;
    out.flush().context("flushing response")?;

    info!(threads = config.threads, elapsed_ms = util::elapsed_ms(start), "done");
    Ok(())
}

fn read_request(cli: &Cli) -> Result<String> {
    match &cli.input {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {}", path.display())),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("reading request from stdin")?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from(["autoload-engine", "--threads", "4", "-vv", "--input", "req.json"]).unwrap();
        assert_eq!(cli.threads, Some(4));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.input, Some(PathBuf::from("req.json")));
    }

    #[test]
    fn no_flags_is_stdin_mode() {
        let cli = Cli::try_parse_from(["autoload-engine"]).unwrap();
        assert!(cli.input.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["autoload-engine", "--frobnicate"]).is_err());
    }
}
