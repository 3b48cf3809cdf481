use std::time::Duration;

use primitive_types::U256;

// bind addresses
// The daemon binds to localhost by default; expose it deliberately with
// --bind-address 0.0.0.0:8080 behind a firewall or proxy.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8080";

// Public base URL advertised in the discovery document
pub const DEFAULT_PUBLIC_URL: &str = "http://127.0.0.1:8080";

// Concurrent connection ceiling; connections beyond it are rejected with
// a capacity error before entering the table
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

// Hard deadline for an accepted WebSocket connection to complete the
// authentication handshake
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 30;

// Allowed clock skew between a handshake timestamp and server time
pub const DEFAULT_HANDSHAKE_SKEW_MILLIS: u64 = 300_000;

// Token bucket defaults: capacity refills continuously over the window
pub const DEFAULT_RATE_LIMIT: u32 = 100;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

// Bounded grace period for notifying connections on shutdown
pub const SHUTDOWN_GRACE_MILLIS: u64 = 2_000;

// Maximum accepted JSON-RPC frame, enforced at transport and application
// layers
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

// x402 defaults: pending requests expire after the timeout; the minimum
// amount keeps dust requests out of the store
pub const DEFAULT_PAYMENT_TIMEOUT_MILLIS: u64 = 300_000;
pub const DEFAULT_PAYMENT_MIN_AMOUNT: u128 = 1_000_000_000_000;

// Verification tolerates amounts up to this many percent below the
// requested value (gas/fee routing in smart-wallet flows)
pub const PAYMENT_AMOUNT_TOLERANCE_PERCENT: u64 = 1;

// Idle rate-limit entries are swept on this cadence
pub const RATE_LIMIT_CLEANUP_INTERVAL_SECS: u64 = 120;

/// Runtime configuration of the A2A daemon, constructed once at startup.
#[derive(Debug, Clone)]
pub struct A2AConfig {
    pub bind_address: String,
    pub public_url: String,
    pub max_connections: usize,
    pub auth_timeout: Duration,
    pub handshake_skew: Duration,
    pub rate_limit: u32,
    pub rate_limit_window: Duration,
    pub shutdown_grace: Duration,
    pub max_message_size: usize,
    pub x402_enabled: bool,
    pub payment_timeout: Duration,
    pub payment_min_amount: U256,
    pub prometheus_enabled: bool,
    pub prometheus_route: String,
}

impl Default for A2AConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            handshake_skew: Duration::from_millis(DEFAULT_HANDSHAKE_SKEW_MILLIS),
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            shutdown_grace: Duration::from_millis(SHUTDOWN_GRACE_MILLIS),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            x402_enabled: true,
            payment_timeout: Duration::from_millis(DEFAULT_PAYMENT_TIMEOUT_MILLIS),
            payment_min_amount: U256::from(DEFAULT_PAYMENT_MIN_AMOUNT),
            prometheus_enabled: false,
            prometheus_route: "/metrics".to_string(),
        }
    }
}
