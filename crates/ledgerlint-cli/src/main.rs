use std::env;
use std::io;
use std::process::ExitCode;

use ledgerlint_cli::{EXIT_FAILURE, execute, init_tracing, parse_args};
use tracing::error;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(error) if error.is_empty() => return ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR ledgerlint: {error}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    init_tracing(config.log_json);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match execute(&config, &mut out) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(error = %err, run_fatal = err.is_run_fatal(), "ledgerlint failed");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
