// Shared protocol constants for the Arena A2A layer

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Service identifier published in the discovery document
pub const SERVICE_NAME: &str = "arena-a2a";

// A2A protocol version negotiated by clients
pub const PROTOCOL_VERSION: &str = "1.0";

// The only method accepted on a WebSocket connection before authentication
pub const HANDSHAKE_METHOD: &str = "a2a.handshake";

// Identity headers for the stateless HTTP transport
pub const HEADER_AGENT_ID: &str = "x-agent-id";
pub const HEADER_AGENT_ADDRESS: &str = "x-agent-address";
pub const HEADER_AGENT_TOKEN_ID: &str = "x-agent-token-id";

// Rate limit reporting headers on HTTP responses
pub const HEADER_RATE_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_RATE_REMAINING: &str = "X-RateLimit-Remaining";
