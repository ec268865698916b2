use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::Opts;
use crate::config;
use crate::pipeline::Pipeline;

/// Load the config, build the pipeline, and run it until completion or a
/// shutdown signal. With `--check-config` the run stops after the build,
/// so every component factory has validated its section.
pub async fn run(opts: &Opts) -> crate::Result<()> {
    let config = config::load(&opts.config)?;
    let pipeline = Pipeline::new(&config)?;
    if opts.check_config {
        info!(message = "config ok", config = %opts.config.display());
        return Ok(());
    }

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!(message = "shutdown signal received");
        signal_token.cancel();
    });

    pipeline.run(token).await
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}
