//! Emberlink Server
//!
//! Binds the dual-transport listeners, loads the built-in arena module,
//! and runs until interrupted.

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use emberlink::game::ArenaModule;
use emberlink::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Emberlink Server v{}", VERSION);

    let config = ServerConfig::from_env();
    info!(
        stream = %config.stream_bind,
        datagram = %config.datagram_bind,
        max_sessions = config.max_sessions,
        "configuration loaded"
    );

    let server = match GameServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to bind: {}", e);
            std::process::exit(1);
        }
    };

    let inbound = server
        .take_inbound()
        .await
        .expect("inbound channel taken twice");
    let module = ArenaModule::new(inbound);
    server.load_module(&module);

    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
    }
}
