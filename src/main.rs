use hivepoll::config::Config;
use hivepoll::hub::MessageHub;
use hivepoll::server;
use hivepoll::store::MemoryStore;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = Config::from_args(&args);

    // RUST_LOG wins over --loglevel
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.loglevel));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        notification_poll_max = config.notification_poll_max,
        command_poll_max = config.command_poll_max,
        command_wait_max = config.command_wait_max,
        "starting with in-memory store"
    );

    let config = Arc::new(RwLock::new(config));
    let hub = Arc::new(MessageHub::new(Arc::new(MemoryStore::new()), config.clone()));

    server::run_server(hub, config).await
}
