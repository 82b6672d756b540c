use agent::{
    AgentConfig, Args, CommandChannel, GameController, LogTailer, LoggingDispatcher, PermissionLevel,
    SqlitePermissionStore,
};
use clap::Parser;
use log::{error, info, warn};
use protocol::ProtocolClient;
use std::sync::Arc;

/// Main-method of the application.
/// Parses command-line arguments, then spawns the command worker and the log tailer.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Tip: Set RUST_LOG=info for detailed logging");
    }

    let config = AgentConfig::try_from(Args::parse())?;

    let store = Arc::new(SqlitePermissionStore::open(&config.database)?);
    if !store.has_level(PermissionLevel::HeadAdmin)? {
        warn!(
            "No {} registered in {}; grant one before relying on chat commands",
            PermissionLevel::HeadAdmin,
            config.database.display()
        );
    }

    let client = ProtocolClient::connect(config.endpoint.clone(), config.rcon_password.clone()).await?;
    info!("Talking to {}", config.endpoint);

    let (channel, worker) = CommandChannel::new(client, config.channel.clone());
    let controller = GameController::new(channel, store, Arc::new(LoggingDispatcher));
    let tailer = LogTailer::open(&config.log_file, config.tail_interval).await?;

    let worker_handle = worker.spawn();
    let tailer_handle = tokio::spawn(tailer.run(controller));

    tokio::select! {
        result = worker_handle => {
            if let Err(e) = result {
                error!("Command worker panicked: {}", e);
            }
        }
        result = tailer_handle => {
            if let Err(e) = result {
                error!("Log tailer panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
