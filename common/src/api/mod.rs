// Wire types of the Arena A2A protocol.
//
// Every struct here crosses the JSON-RPC boundary and therefore uses
// camelCase field names; integers that represent on-chain amounts travel
// as decimal strings to avoid precision loss in non-native clients.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::TimestampMillis;

/// Capability tags an agent declares at handshake time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub strategies: Vec<String>,
    #[serde(default)]
    pub markets: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Params of the in-band `a2a.handshake` method.
/// The signature covers the canonical string `"{address}:{tokenId}:{timestamp}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    pub address: String,
    pub token_id: u64,
    pub signature: String,
    pub timestamp: TimestampMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<AgentCapabilities>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResult {
    pub success: bool,
    pub agent_id: String,
    pub session_token: String,
}

/// Public profile of a registered agent, as surfaced by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub agent_id: String,
    pub wallet_address: String,
    pub token_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<AgentCapabilities>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverAgentsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverAgentsResult {
    pub agents: Vec<AgentProfile>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAgentInfoParams {
    pub agent_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Open,
    Closed,
    Resolved,
}

/// Market snapshot as reported by the ledger service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub market_id: String,
    pub question: String,
    pub yes_shares: u64,
    pub no_shares: u64,
    pub status: MarketStatus,
}

impl MarketData {
    pub fn total_shares(&self) -> u64 {
        self.yes_shares + self.no_shares
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMarketDataParams {
    pub market_id: String,
}

/// Implied YES/NO prices. Both sides default to 0.5 on an uninitialized
/// market (zero shares outstanding).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketPrices {
    #[serde(rename = "YES")]
    pub yes: f64,
    #[serde(rename = "NO")]
    pub no: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeMarketParams {
    pub market_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeMarketResult {
    pub subscribed: bool,
    pub market_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub agent_id: String,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub market_id: String,
    pub yes_shares: u64,
    pub no_shares: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWallet {
    pub balance: Balance,
    pub positions: Vec<Position>,
}

// x402 payment types

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestParams {
    pub to: String,
    /// Amount in the smallest on-chain unit, as a decimal string.
    pub amount: String,
    pub service: String,
    #[serde(default)]
    pub metadata: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceiptParams {
    pub request_id: String,
    pub tx_hash: String,
}

/// Outcome of an x402 verification attempt. Expected terminal states
/// (stale or missing requests, rule violations) surface here with
/// `verified: false`; only infrastructure failures become errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentVerification {
    pub verified: bool,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatistics {
    pub total: usize,
    pub pending: usize,
    pub verified: usize,
    pub expired: usize,
}

// Connection lifecycle events, delivered on the channel owned by the
// connection manager.

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum AgentEvent {
    #[serde(rename = "AGENT_CONNECTED", rename_all = "camelCase")]
    Connected {
        agent_id: String,
        address: String,
        token_id: u64,
    },
    #[serde(rename = "AGENT_DISCONNECTED", rename_all = "camelCase")]
    Disconnected {
        agent_id: String,
        reason: String,
        code: u16,
    },
}

// Discovery documents served on the well-known routes

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityScheme {
    pub scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Capability card used for out-of-band discovery by protocol clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub version: String,
    pub endpoint: String,
    pub skills: Vec<AgentSkill>,
    pub security_scheme: SecurityScheme,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryDocument {
    pub service: String,
    pub version: String,
    pub status: String,
    pub endpoint: String,
    pub agent_card: AgentCard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_params_wire_format() {
        let params: HandshakeParams = serde_json::from_str(
            r#"{"address":"0xA","tokenId":7,"signature":"ff","timestamp":1000}"#,
        )
        .expect("valid params");
        assert_eq!(params.token_id, 7);
        assert!(params.capabilities.is_none());
    }

    #[test]
    fn test_market_prices_serialize_upper_case_sides() {
        let prices = MarketPrices { yes: 0.5, no: 0.5 };
        let encoded = serde_json::to_value(prices).expect("serializable");
        assert_eq!(encoded["YES"], 0.5);
        assert_eq!(encoded["NO"], 0.5);
    }

    #[test]
    fn test_agent_event_tagging() {
        let event = AgentEvent::Disconnected {
            agent_id: "agent-3".to_string(),
            reason: "auth timeout".to_string(),
            code: 1008,
        };
        let encoded = serde_json::to_value(&event).expect("serializable");
        assert_eq!(encoded["event"], "AGENT_DISCONNECTED");
        assert_eq!(encoded["agentId"], "agent-3");
        assert_eq!(encoded["code"], 1008);
    }
}
