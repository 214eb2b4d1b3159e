use std::process::ExitCode;

use clap::Parser;
use palmgate_cli::cli::{Cli, OutputMode};
use palmgate_cli::commands::CommandHandler;
use palmgate_cli::output::render_error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mode = cli.output_mode();
    init_tracing(cli.verbose, mode);

    let verbose = cli.verbose > 0;
    let handler: Box<dyn CommandHandler> = cli.command.into();
    match handler.execute(mode, verbose) {
        Ok(code) => code,
        Err(err) => {
            render_error(&err, mode);
            err.exit_code()
        }
    }
}

fn init_tracing(verbose: u8, mode: OutputMode) {
    let level = match (verbose, mode) {
        (0, OutputMode::Json) => "warn,palmgate::audit=info",
        (0, OutputMode::Human) => "info",
        (1, _) => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt_layer = fmt::layer()
        .with_target(verbose > 0)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(fmt_layer);
    if tracing::subscriber::set_global_default(registry).is_err() {
        // Already initialised (tests).
    }
}
