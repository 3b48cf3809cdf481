use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use primitive_types::U256;
use tokio::sync::mpsc;

use arena_common::config::VERSION;
use arena_daemon::{
    auth::AuthManager,
    config::A2AConfig,
    payment::{MemoryPaymentStore, PaymentManager, PaymentStore, SledPaymentStore},
    providers::{HttpChainProvider, MemoryLedger, MemoryRegistry, NullDiscovery},
    router::MessageRouter,
    rpc::A2AServer,
    subscriptions::MarketSubscriptions,
};

#[derive(Parser)]
#[command(name = "arena-daemon", version = VERSION, about = "Arena A2A communication daemon")]
struct Args {
    /// Address the HTTP/WebSocket listener binds to
    #[arg(long, default_value = arena_daemon::config::DEFAULT_BIND_ADDRESS)]
    bind_address: String,
    /// Public base URL advertised in the discovery document
    #[arg(long, default_value = arena_daemon::config::DEFAULT_PUBLIC_URL)]
    public_url: String,
    /// Maximum concurrent connections
    #[arg(long, default_value_t = arena_daemon::config::DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,
    /// Seconds an unauthenticated connection may stay open
    #[arg(long, default_value_t = arena_daemon::config::DEFAULT_AUTH_TIMEOUT_SECS)]
    auth_timeout_secs: u64,
    /// Calls allowed per agent per window
    #[arg(long, default_value_t = arena_daemon::config::DEFAULT_RATE_LIMIT)]
    rate_limit: u32,
    /// Rate limit window in seconds
    #[arg(long, default_value_t = arena_daemon::config::DEFAULT_RATE_LIMIT_WINDOW_SECS)]
    rate_limit_window_secs: u64,
    /// Maximum accepted message size in bytes
    #[arg(long, default_value_t = arena_daemon::config::DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,
    /// Disable the x402 payment methods
    #[arg(long)]
    disable_x402: bool,
    /// Chain JSON-RPC endpoint used for payment verification
    #[arg(long)]
    chain_rpc_url: Option<String>,
    /// Path of the durable payment store; in-memory when omitted
    #[arg(long)]
    payment_db: Option<PathBuf>,
    /// Minimum payment amount in the smallest on-chain unit
    #[arg(long, default_value_t = arena_daemon::config::DEFAULT_PAYMENT_MIN_AMOUNT)]
    payment_min_amount: u128,
    /// Expose Prometheus metrics
    #[arg(long)]
    prometheus: bool,
    /// Route the Prometheus metrics are served on
    #[arg(long, default_value = "/metrics")]
    prometheus_route: String,
}

impl Args {
    fn into_config(self) -> A2AConfig {
        A2AConfig {
            bind_address: self.bind_address,
            public_url: self.public_url,
            max_connections: self.max_connections,
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
            rate_limit: self.rate_limit,
            rate_limit_window: Duration::from_secs(self.rate_limit_window_secs),
            max_message_size: self.max_message_size,
            x402_enabled: !self.disable_x402,
            payment_min_amount: U256::from(self.payment_min_amount),
            prometheus_enabled: self.prometheus,
            prometheus_route: self.prometheus_route,
            ..A2AConfig::default()
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let chain_rpc_url = args.chain_rpc_url.clone();
    let payment_db = args.payment_db.clone();
    let mut config = args.into_config();

    // Collaborators. The in-memory registry and ledger are development
    // stand-ins; production wires the platform services here.
    let registry = Arc::new(MemoryRegistry::new());
    let discovery = Arc::new(NullDiscovery);
    let ledger = Arc::new(MemoryLedger::new());
    warn!("running with in-memory registry and ledger collaborators");

    let payments = if config.x402_enabled {
        match chain_rpc_url {
            Some(url) => {
                let store: Arc<dyn PaymentStore> = match payment_db.as_deref() {
                    Some(path) => Arc::new(
                        SledPaymentStore::open(path).context("Failed to open payment store")?,
                    ),
                    None => Arc::new(MemoryPaymentStore::new()),
                };
                let chain = Arc::new(HttpChainProvider::new(url));
                Some(Arc::new(PaymentManager::new(
                    store,
                    chain,
                    config.payment_timeout,
                    config.payment_min_amount,
                )))
            }
            None => {
                warn!("no --chain-rpc-url configured, disabling x402 payments");
                config.x402_enabled = false;
                None
            }
        }
    } else {
        None
    };

    let subscriptions = Arc::new(MarketSubscriptions::new());
    let auth = Arc::new(AuthManager::new(
        Arc::clone(&registry) as _,
        config.handshake_skew,
    ));
    let router = Arc::new(MessageRouter::new(
        registry,
        discovery,
        ledger,
        payments,
        Arc::clone(&subscriptions),
    ));

    // Explicit event channel instead of implicit listeners; upstream game
    // logic consumes connect/disconnect notifications here
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            info!("agent event: {:?}", event);
        }
    });

    let server = A2AServer::new(config, auth, router, subscriptions, events_tx).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    server.stop().await;
    Ok(())
}
