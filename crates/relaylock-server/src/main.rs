//! Main entry point for the relaylock server.
//!
//! Loads configuration, sets up logging, then serves relays and clients
//! until Ctrl+C or SIGTERM.

use relaylock_server::{
    Server,
    model::Configuration,
    startup::{self, LoggingConfig, ShutdownSignal},
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let logging_config = LoggingConfig::from_config(&configuration);
    let _logging_guard = startup::init_logging(&logging_config)?;

    relaylock_server::metrics::init_metrics();

    let server_config = configuration.server_config();
    info!(
        id = %server_config.id,
        clients = %server_config.client_addr,
        relays = %server_config.relay_addr,
        members = ?server_config.relay.members,
        "Relaylock configuration loaded"
    );

    let shutdown = ShutdownSignal::new();
    startup::listen_for_shutdown_signal(shutdown.clone());

    if let Err(e) = Server::new(server_config).run(shutdown).await {
        error!(error = %e, "Relaylock server failed");
        return Err(e);
    }

    Ok(())
}
