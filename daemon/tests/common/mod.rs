// Shared in-memory fakes for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use primitive_types::U256;
use tokio::sync::RwLock;

use arena_common::{
    api::{AgentProfile, Balance, DiscoverAgentsParams, Position},
    rpc::{Id, RpcRequest},
};
use arena_daemon::providers::{
    ChainProvider, ChainTransaction, LedgerClient, ProviderError, TransactionReceipt,
    UnifiedDiscovery,
};

pub fn request(method: &str, params: Option<serde_json::Value>, id: u64) -> RpcRequest {
    RpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: Some(Id::Number(id)),
    }
}

pub fn profile(token_id: u64) -> AgentProfile {
    AgentProfile {
        agent_id: format!("agent-{}", token_id),
        wallet_address: format!("0x{:040x}", token_id),
        token_id,
        name: None,
        capabilities: None,
    }
}

/// Unified discovery fake returning a fixed agent list.
#[derive(Default)]
pub struct StaticDiscovery {
    pub agents: Vec<AgentProfile>,
}

#[async_trait]
impl UnifiedDiscovery for StaticDiscovery {
    async fn discover(
        &self,
        _filter: &DiscoverAgentsParams,
    ) -> Result<Vec<AgentProfile>, ProviderError> {
        Ok(self.agents.clone())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentProfile>, ProviderError> {
        Ok(self
            .agents
            .iter()
            .find(|profile| profile.agent_id == agent_id)
            .cloned())
    }
}

/// Ledger fake that reports a balance but fails on position lookups,
/// for asserting that composed projections fail as a unit.
pub struct HalfBrokenLedger;

#[async_trait]
impl LedgerClient for HalfBrokenLedger {
    async fn get_balance(&self, agent_id: &str) -> Result<Option<Balance>, ProviderError> {
        Ok(Some(Balance {
            agent_id: agent_id.to_string(),
            balance: 1_000,
        }))
    }

    async fn get_positions(&self, _agent_id: &str) -> Result<Vec<Position>, ProviderError> {
        Err(ProviderError::Request("ledger is down".to_string()))
    }

    async fn get_market(
        &self,
        _market_id: &str,
    ) -> Result<Option<arena_common::api::MarketData>, ProviderError> {
        Ok(None)
    }
}

/// Chain provider fake serving one scripted transaction and receipt,
/// counting transaction lookups.
#[derive(Default)]
pub struct ScriptedChain {
    transaction: RwLock<Option<ChainTransaction>>,
    receipt: RwLock<Option<TransactionReceipt>>,
    lookups: AtomicUsize,
}

impl ScriptedChain {
    pub async fn script(&self, to: &str, value: U256, success: bool) {
        *self.transaction.write().await = Some(ChainTransaction {
            hash: "0xhash".to_string(),
            from: "0xsender".to_string(),
            to: Some(to.to_string()),
            value,
        });
        *self.receipt.write().await = Some(TransactionReceipt {
            tx_hash: "0xhash".to_string(),
            success,
        });
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainProvider for ScriptedChain {
    async fn get_transaction(
        &self,
        _tx_hash: &str,
    ) -> Result<Option<ChainTransaction>, ProviderError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.transaction.read().await.clone())
    }

    async fn get_transaction_receipt(
        &self,
        _tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        Ok(self.receipt.read().await.clone())
    }
}
