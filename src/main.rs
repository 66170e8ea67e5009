use anyhow::Result;
use clap::Parser;
use lanvoice_rs::input::{build_injector, InputInjector, RecordingInjector};
use lanvoice_rs::notify::{DesktopNotifier, Notifier};
use lanvoice_rs::service::ServiceSettings;
use lanvoice_rs::{
    logging::LanvoiceFormatter, Config, ConfigManager, InputDispatcher, InputService,
    ServiceController, StatusWriter,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Type on this computer from a phone on the same network.
#[derive(Parser)]
#[command(name = "lanvoice", version)]
struct Cli {
    /// Config file to use instead of the per-user one
    #[arg(long, env = "LANVOICE_CONFIG")]
    config: Option<PathBuf>,

    /// Also handle each stdin line like a phone message
    #[arg(long)]
    stdin: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lanvoice=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().event_format(LanvoiceFormatter::new()))
        .init();

    let cli = Cli::parse();

    info!("🚀 lanvoice starting up!");
    info!("{}", "=".repeat(50));

    let config_manager = ConfigManager::load(cli.config)?;
    config_manager.start_watching();
    let config = config_manager.get();
    info!("✅ Configuration loaded");
    info!("   HTTP port: {} (probing up to {})", config.http_port, config.port_attempts);
    info!("   WebSocket port: {}", config.ws_port);
    info!("   Input method: {:?}", config.input_method);
    info!("   Configured commands: {}", config.commands.len());

    let desktop = Arc::new(DesktopNotifier::new(config.desktop_notifications));
    let notifier: Arc<dyn Notifier> = desktop.clone();

    let injector: Box<dyn InputInjector> = match build_injector(config.input_method) {
        Ok(injector) => injector,
        Err(err) => {
            error!("❌ {err}; text will be logged instead of typed");
            notifier.notify("Input unavailable", &err.to_string());
            Box::new(RecordingInjector::new())
        }
    };

    let service = InputService::new(
        injector,
        Arc::clone(&notifier),
        ServiceSettings::from_config(&config),
    );
    let dispatcher = InputDispatcher::spawn(service)?;
    tokio::spawn(apply_config_updates(
        config_manager.subscribe(),
        dispatcher.clone(),
        desktop,
    ));

    let status = match StatusWriter::new() {
        Ok(status) => Some(status),
        Err(err) => {
            warn!("Service status file disabled: {err:#}");
            None
        }
    };

    let controller = ServiceController::new(
        config_manager,
        dispatcher.clone(),
        Arc::clone(&notifier),
        status,
    );
    let snapshot = controller.start().await?;
    info!("📱 Open {} on your phone", snapshot.url);

    // Set up signal handling
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    if cli.stdin {
        run_stdin_loop(&dispatcher, &mut shutdown_rx).await;
    } else {
        let _ = (&mut shutdown_rx).await;
        info!("Shutdown signal received");
    }

    // Cleanup
    info!("🛑 Shutting down lanvoice...");
    controller.stop().await;
    info!("✅ Shutdown complete");

    Ok(())
}

/// Commands and the command timeout are read per request; everything else
/// that can change without a restart is pushed from here. Ports and the input
/// method only apply on the next start.
async fn apply_config_updates(
    mut config_rx: watch::Receiver<Config>,
    dispatcher: InputDispatcher,
    desktop: Arc<DesktopNotifier>,
) {
    while config_rx.changed().await.is_ok() {
        let updated = config_rx.borrow_and_update().clone();
        dispatcher.reconfigure(ServiceSettings::from_config(&updated));
        desktop.set_enabled(updated.desktop_notifications);
        info!(
            "🔄 Applied config update (dedup {:?}, focus click {}, notifications {})",
            updated.dedup_window(),
            updated.focus_click,
            updated.desktop_notifications
        );
    }
    info!("Configuration watcher closed");
}

#[cfg(unix)]
async fn wait_for_signal() {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!("Failed to set up SIGTERM handler: {err}");
            wait_for_ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT (Ctrl+C)"),
        Err(err) => error!("Failed to listen for Ctrl+C: {err}"),
    }
}

/// Feeds each stdin line through the dispatcher, as if a phone had sent it.
async fn run_stdin_loop(
    dispatcher: &InputDispatcher,
    shutdown_rx: &mut tokio::sync::oneshot::Receiver<()>,
) {
    use tokio::io::{AsyncBufReadExt, BufReader};

    info!("🧪 Stdin mode - each line is handled like a phone message, Ctrl+C to quit");
    let mut reader = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = reader.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let outcome = dispatcher.dispatch(line).await;
                        info!("→ {:?}", outcome);
                    }
                    Ok(None) => {
                        info!("Stdin closed; waiting for shutdown signal");
                        let _ = shutdown_rx.await;
                        break;
                    }
                    Err(e) => {
                        info!("Error reading input: {}", e);
                        break;
                    }
                }
            }
            _ = &mut *shutdown_rx => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from(["lanvoice", "--config", "/tmp/lanvoice.jsonc", "--stdin"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/lanvoice.jsonc")));
        assert!(cli.stdin);

        assert!(Cli::try_parse_from(["lanvoice", "--bogus"]).is_err());
    }
}
