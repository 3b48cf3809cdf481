//! Market subscription bookkeeping.
//!
//! A subscription is an idempotent add of an agent id to a per-market
//! set, used only for broadcast addressing. There is no unsubscribe on
//! the wire; an agent's subscriptions are dropped when its last live
//! connection closes.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::RwLock;

#[derive(Default)]
pub struct MarketSubscriptions {
    // BTreeSet keeps subscriber listings independent of call order
    inner: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MarketSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent add; returns true if the agent was newly subscribed.
    pub async fn subscribe(&self, market_id: &str, agent_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner
            .entry(market_id.to_string())
            .or_default()
            .insert(agent_id.to_string())
    }

    pub async fn subscribers(&self, market_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .get(market_id)
            .map(|agents| agents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every subscription of an agent (last connection closed).
    pub async fn remove_agent(&self, agent_id: &str) {
        let mut inner = self.inner.write().await;
        inner.retain(|_, agents| {
            agents.remove(agent_id);
            !agents.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_are_call_order_independent() {
        let forward = MarketSubscriptions::new();
        forward.subscribe("m1", "A").await;
        forward.subscribe("m1", "B").await;

        let reverse = MarketSubscriptions::new();
        reverse.subscribe("m1", "B").await;
        reverse.subscribe("m1", "A").await;

        assert_eq!(forward.subscribers("m1").await, vec!["A", "B"]);
        assert_eq!(reverse.subscribers("m1").await, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let subscriptions = MarketSubscriptions::new();
        assert!(subscriptions.subscribe("m1", "A").await);
        assert!(!subscriptions.subscribe("m1", "A").await);
        assert_eq!(subscriptions.subscribers("m1").await, vec!["A"]);
    }

    #[tokio::test]
    async fn test_remove_agent_clears_all_markets() {
        let subscriptions = MarketSubscriptions::new();
        subscriptions.subscribe("m1", "A").await;
        subscriptions.subscribe("m2", "A").await;
        subscriptions.subscribe("m2", "B").await;

        subscriptions.remove_agent("A").await;

        assert!(subscriptions.subscribers("m1").await.is_empty());
        assert_eq!(subscriptions.subscribers("m2").await, vec!["B"]);
    }
}
