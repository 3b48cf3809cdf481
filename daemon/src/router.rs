//! JSON-RPC method dispatch.
//!
//! The router is stateless apart from the shared market-subscription map:
//! one exhaustive match over the method name, each arm deserializing its
//! typed params struct and calling into the external collaborators.
//! Domain failures map to dedicated error codes; collaborator outages are
//! logged with the method and agent, then surfaced as INTERNAL_ERROR.

use std::sync::Arc;

use log::{error, warn};
use serde_json::{json, Value};

use arena_common::{
    api::{
        DiscoverAgentsParams, DiscoverAgentsResult, GetAgentInfoParams, GetMarketDataParams,
        MarketPrices, PaymentReceiptParams, PaymentRequestParams, SubscribeMarketParams,
        SubscribeMarketResult, UserWallet,
    },
    config::HANDSHAKE_METHOD,
    rpc::{parse_params, RpcError, RpcRequest, RpcResponseError, JSON_RPC_VERSION},
};

use crate::{
    payment::{PaymentError, PaymentManager},
    providers::{AgentRegistry, LedgerClient, ProviderError, UnifiedDiscovery},
    subscriptions::MarketSubscriptions,
};

pub struct MessageRouter {
    registry: Arc<dyn AgentRegistry>,
    discovery: Arc<dyn UnifiedDiscovery>,
    ledger: Arc<dyn LedgerClient>,
    payments: Option<Arc<PaymentManager>>,
    subscriptions: Arc<MarketSubscriptions>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        discovery: Arc<dyn UnifiedDiscovery>,
        ledger: Arc<dyn LedgerClient>,
        payments: Option<Arc<PaymentManager>>,
        subscriptions: Arc<MarketSubscriptions>,
    ) -> Self {
        Self {
            registry,
            discovery,
            ledger,
            payments,
            subscriptions,
        }
    }

    pub fn subscriptions(&self) -> &Arc<MarketSubscriptions> {
        &self.subscriptions
    }

    /// Dispatch an authenticated request and return its JSON result.
    /// `wallet` is the caller's wallet address as established by the
    /// transport (handshake or identity headers).
    pub async fn dispatch(
        &self,
        agent_id: &str,
        wallet: &str,
        request: RpcRequest,
        authenticated: bool,
    ) -> Result<Value, RpcResponseError> {
        let id = request.id.clone();
        if request.jsonrpc != JSON_RPC_VERSION {
            return Err(RpcResponseError::new(id, RpcError::InvalidVersion));
        }
        if !authenticated {
            return Err(RpcResponseError::new(id, RpcError::NotAuthenticated));
        }

        metrics::counter!("arena_rpc_dispatch_total").increment(1);
        let params = request.params.unwrap_or(Value::Null);
        let result = match request.method.as_str() {
            // Re-handshake of an authenticated connection is a protocol
            // violation; the connection manager handles the real one
            HANDSHAKE_METHOD => Err(RpcError::InvalidRequest(
                "connection is already authenticated",
            )),
            "discoverAgents" => self.discover_agents(agent_id, params).await,
            "getAgentInfo" => self.get_agent_info(agent_id, params).await,
            "getMarketData" => self.get_market_data(agent_id, params).await,
            "getMarketPrices" => self.get_market_prices(agent_id, params).await,
            "subscribeMarket" => self.subscribe_market(agent_id, params).await,
            "getBalance" => self.get_balance(agent_id).await,
            "getPositions" => self.get_positions(agent_id).await,
            "getUserWallet" => self.get_user_wallet(agent_id).await,
            "paymentRequest" => self.payment_request(agent_id, wallet, params).await,
            "paymentReceipt" => self.payment_receipt(agent_id, params).await,
            other => Err(RpcError::MethodNotFound(other.to_string())),
        };
        result.map_err(|e| RpcResponseError::new(id, e))
    }

    async fn discover_agents(&self, agent_id: &str, params: Value) -> Result<Value, RpcError> {
        let filter: DiscoverAgentsParams = if params.is_null() {
            DiscoverAgentsParams::default()
        } else {
            parse_params(params)?
        };

        // Unified discovery wins when it has results; the local registry
        // is the fallback
        let unified = self
            .discovery
            .discover(&filter)
            .await
            .map_err(|e| internal("discoverAgents", agent_id, e))?;
        let mut agents = if unified.is_empty() {
            self.registry
                .list_agents(&filter)
                .await
                .map_err(|e| internal("discoverAgents", agent_id, e))?
        } else {
            unified
        };
        let total = agents.len();
        if let Some(limit) = filter.limit {
            agents.truncate(limit);
        }
        to_result(DiscoverAgentsResult { agents, total })
    }

    async fn get_agent_info(&self, agent_id: &str, params: Value) -> Result<Value, RpcError> {
        let params: GetAgentInfoParams = parse_params(params)?;

        if let Some(profile) = self
            .discovery
            .get_agent(&params.agent_id)
            .await
            .map_err(|e| internal("getAgentInfo", agent_id, e))?
        {
            return to_result(profile);
        }

        // Local registry is keyed by token id; agent ids are "agent-{tokenId}"
        let token_id = params
            .agent_id
            .strip_prefix("agent-")
            .and_then(|raw| raw.parse::<u64>().ok());
        if let Some(token_id) = token_id {
            if let Some(agent) = self
                .registry
                .get_agent(token_id)
                .await
                .map_err(|e| internal("getAgentInfo", agent_id, e))?
            {
                return to_result(agent.profile);
            }
        }
        Err(RpcError::AgentNotFound(params.agent_id))
    }

    async fn get_market_data(&self, agent_id: &str, params: Value) -> Result<Value, RpcError> {
        let params: GetMarketDataParams = parse_params(params)?;
        let market = self
            .ledger
            .get_market(&params.market_id)
            .await
            .map_err(|e| internal("getMarketData", agent_id, e))?
            .ok_or(RpcError::MarketNotFound(params.market_id))?;
        to_result(market)
    }

    async fn get_market_prices(&self, agent_id: &str, params: Value) -> Result<Value, RpcError> {
        let params: GetMarketDataParams = parse_params(params)?;
        let market = self
            .ledger
            .get_market(&params.market_id)
            .await
            .map_err(|e| internal("getMarketPrices", agent_id, e))?
            .ok_or(RpcError::MarketNotFound(params.market_id))?;

        // An uninitialized market has no shares on either side; both
        // prices default to 0.5 instead of dividing by zero
        let total = market.total_shares();
        let prices = if total == 0 {
            MarketPrices { yes: 0.5, no: 0.5 }
        } else {
            MarketPrices {
                yes: market.yes_shares as f64 / total as f64,
                no: market.no_shares as f64 / total as f64,
            }
        };
        to_result(prices)
    }

    async fn subscribe_market(&self, agent_id: &str, params: Value) -> Result<Value, RpcError> {
        let params: SubscribeMarketParams = parse_params(params)?;
        self.ledger
            .get_market(&params.market_id)
            .await
            .map_err(|e| internal("subscribeMarket", agent_id, e))?
            .ok_or_else(|| RpcError::MarketNotFound(params.market_id.clone()))?;

        self.subscriptions
            .subscribe(&params.market_id, agent_id)
            .await;
        to_result(SubscribeMarketResult {
            subscribed: true,
            market_id: params.market_id,
        })
    }

    async fn get_balance(&self, agent_id: &str) -> Result<Value, RpcError> {
        let balance = self
            .ledger
            .get_balance(agent_id)
            .await
            .map_err(|e| internal("getBalance", agent_id, e))?
            .ok_or_else(|| RpcError::AgentNotFound(agent_id.to_string()))?;
        to_result(balance)
    }

    async fn get_positions(&self, agent_id: &str) -> Result<Value, RpcError> {
        let positions = self
            .ledger
            .get_positions(agent_id)
            .await
            .map_err(|e| internal("getPositions", agent_id, e))?;
        Ok(json!({ "positions": positions }))
    }

    // Composes the balance and positions projections; fails as a unit if
    // either sub-call errors
    async fn get_user_wallet(&self, agent_id: &str) -> Result<Value, RpcError> {
        let balance = self
            .ledger
            .get_balance(agent_id)
            .await
            .map_err(|e| internal("getUserWallet", agent_id, e))?
            .ok_or_else(|| RpcError::AgentNotFound(agent_id.to_string()))?;
        let positions = self
            .ledger
            .get_positions(agent_id)
            .await
            .map_err(|e| internal("getUserWallet", agent_id, e))?;
        to_result(UserWallet { balance, positions })
    }

    async fn payment_request(
        &self,
        agent_id: &str,
        wallet: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let Some(payments) = self.payments.as_ref() else {
            return Err(RpcError::PaymentsDisabled);
        };
        let params: PaymentRequestParams = parse_params(params)?;
        let record = payments
            .create_payment_request(
                wallet,
                &params.to,
                &params.amount,
                &params.service,
                params.metadata,
            )
            .await
            .map_err(|e| map_payment_error("paymentRequest", agent_id, e))?;
        to_result(record)
    }

    async fn payment_receipt(&self, agent_id: &str, params: Value) -> Result<Value, RpcError> {
        let Some(payments) = self.payments.as_ref() else {
            return Err(RpcError::PaymentsDisabled);
        };
        let params: PaymentReceiptParams = parse_params(params)?;
        let verification = payments
            .verify_payment(&params.request_id, &params.tx_hash)
            .await
            .map_err(|e| map_payment_error("paymentReceipt", agent_id, e))?;
        if let Some(error) = verification.error.as_deref() {
            warn!(
                "payment verification failed for {} ({}): {}",
                verification.request_id, agent_id, error
            );
        }
        to_result(verification)
    }
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(RpcError::SerializeResponse)
}

fn internal(method: &str, agent_id: &str, err: ProviderError) -> RpcError {
    error!("{} failed for {}: {}", method, agent_id, err);
    RpcError::InternalError("upstream collaborator unavailable")
}

fn map_payment_error(method: &str, agent_id: &str, err: PaymentError) -> RpcError {
    match err {
        PaymentError::Store(inner) | PaymentError::Chain(inner) => {
            internal(method, agent_id, inner)
        }
        other => RpcError::PaymentFailed(other.to_string()),
    }
}
