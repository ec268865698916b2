use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use logship::app;
use logship::cli::Opts;

fn main() -> ExitCode {
    let opts = Opts::parse();

    let default_level = if opts.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(message = "failed to start the runtime", error = %e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(app::run(&opts)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(message = "exited with error", error = %e);
            ExitCode::FAILURE
        }
    }
}
