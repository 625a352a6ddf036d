// src/main.rs

use std::process::ExitCode;

fn main() -> ExitCode {
    autoload_engine::commands::run_cli()
}
