use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use itemfleet::cli::{self, Cli, Commands};
use itemfleet::coordination::{install_signal_handlers, GracefulShutdown, ShutdownSignal};
use itemfleet::dispatch::Dispatcher;
use itemfleet::logging::init_logging;
use itemfleet::session::DryRunRuntime;
use itemfleet::{FleetConfig, FleetError, Orchestrator, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match FleetConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", cli.config.display());
            return Err(e);
        }
    };

    if cli.command == Some(Commands::Check) {
        println!("{}", cli::config_summary(&config)?);
        return Ok(());
    }

    let _log_guard = init_logging(&config.logging, config.main_log.as_deref())?;

    if !(cli.dry_run || config.dry_run.enabled) {
        error!("No session runtime is linked into this build; rerun with --dry-run");
        return Err(FleetError::InvalidConfig(
            "no session runtime available outside dry-run mode".into(),
        ));
    }

    let runtime = Arc::new(DryRunRuntime::from_config(&config.dry_run));
    let orchestrator = Orchestrator::from_config(&config, runtime)?;
    let fleet = orchestrator.handle();
    info!(agents = orchestrator.agent_count(), "fleet loaded (dry run)");

    let shutdown = Arc::new(GracefulShutdown::with_defaults());
    install_signal_handlers(shutdown.clone());
    let orchestrator_task = tokio::spawn(orchestrator.run(shutdown.subscribe()));

    if !cli.no_auto {
        fleet.initiate_collection().await?;
    }

    let dispatcher = Dispatcher::new(fleet, shutdown.clone());
    if let Err(e) = cli::shell::run(dispatcher, shutdown.subscribe()).await {
        error!(error = %e, "operator shell stopped");
    }

    if !shutdown.is_shutdown_requested() {
        shutdown.request_shutdown(ShutdownSignal::Graceful);
    }
    if let Err(e) = shutdown
        .execute(async {
            if let Err(e) = orchestrator_task.await {
                warn!(error = %e, "orchestrator task ended abnormally");
            }
        })
        .await
    {
        warn!(error = %e, "shutdown incomplete");
    }

    Ok(())
}
