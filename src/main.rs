//! keyhop - Main entry point.
//!
//! Parses the command line, loads `~/.keyhop/keyhoprc`, starts logging and
//! runs one command. Errors go to stderr and set the exit code of their
//! kind (see [`keyhop::ErrorKind`]).

use std::io;
use std::process::ExitCode;

use clap::Parser;

use keyhop::cli::Cli;
use keyhop::{logging, App, Config, Error};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(Config::default_config_path);
    let mut config = match Config::load_from(&settings_path) {
        Ok(config) => config,
        Err(e) => return report(&Error::from(e)),
    };

    // Command-line flags win over the settings file
    if let Some(path) = cli.config {
        config.ssh_config = path;
    }
    if let Some(dir) = cli.key_dir {
        config.key_dir = dir;
    }
    if let Some(path) = cli.registry {
        config.registry = path;
    }

    if let Err(e) = logging::init(&config.log_config, cli.verbose) {
        eprintln!("warning: logging disabled: {}", e);
    }
    tracing::debug!("settings: {}", config.config_path.display());

    let mut app = App::from_config(config);
    let mut stdout = io::stdout().lock();
    match app.run(cli.command, &mut stdout) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

/// Prints `err` and its hint, returning the matching exit code.
fn report(err: &Error) -> ExitCode {
    tracing::error!("{}", err);
    eprintln!("error: {}", err);
    if let Some(hint) = err.hint() {
        eprintln!("hint: {}", hint);
    }
    let code = u8::try_from(err.exit_code()).unwrap_or(1);
    ExitCode::from(code)
}
