use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use arena_common::api::{Balance, MarketData, Position};

use super::ProviderError;

/// Read-only projection over the ledger service: balances, positions and
/// market share counts. The ledger owns all trading state; this layer
/// never mutates it.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_balance(&self, agent_id: &str) -> Result<Option<Balance>, ProviderError>;

    async fn get_positions(&self, agent_id: &str) -> Result<Vec<Position>, ProviderError>;

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketData>, ProviderError>;
}

/// In-memory ledger used for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryLedger {
    balances: RwLock<HashMap<String, u64>>,
    positions: RwLock<HashMap<String, Vec<Position>>>,
    markets: RwLock<HashMap<String, MarketData>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balance(&self, agent_id: &str, balance: u64) {
        let mut balances = self.balances.write().await;
        balances.insert(agent_id.to_string(), balance);
    }

    pub async fn set_positions(&self, agent_id: &str, positions: Vec<Position>) {
        let mut map = self.positions.write().await;
        map.insert(agent_id.to_string(), positions);
    }

    pub async fn insert_market(&self, market: MarketData) {
        let mut markets = self.markets.write().await;
        markets.insert(market.market_id.clone(), market);
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn get_balance(&self, agent_id: &str) -> Result<Option<Balance>, ProviderError> {
        let balances = self.balances.read().await;
        Ok(balances.get(agent_id).map(|balance| Balance {
            agent_id: agent_id.to_string(),
            balance: *balance,
        }))
    }

    async fn get_positions(&self, agent_id: &str) -> Result<Vec<Position>, ProviderError> {
        let positions = self.positions.read().await;
        Ok(positions.get(agent_id).cloned().unwrap_or_default())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketData>, ProviderError> {
        let markets = self.markets.read().await;
        Ok(markets.get(market_id).cloned())
    }
}
