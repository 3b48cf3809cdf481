use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use arena_common::api::{AgentProfile, DiscoverAgentsParams};

use super::ProviderError;

/// A registry entry: the public profile plus the ed25519 verifying key
/// (hex) the agent signs its handshake with.
#[derive(Debug, Clone)]
pub struct RegisteredAgent {
    pub profile: AgentProfile,
    pub public_key: String,
}

/// Local agent registry: profile lookup by token id plus filtered listing.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn get_agent(&self, token_id: u64) -> Result<Option<RegisteredAgent>, ProviderError>;

    async fn list_agents(
        &self,
        filter: &DiscoverAgentsParams,
    ) -> Result<Vec<AgentProfile>, ProviderError>;
}

/// Platform-wide discovery service. Its results take precedence over the
/// local registry when non-empty.
#[async_trait]
pub trait UnifiedDiscovery: Send + Sync {
    async fn discover(
        &self,
        filter: &DiscoverAgentsParams,
    ) -> Result<Vec<AgentProfile>, ProviderError>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentProfile>, ProviderError>;
}

fn matches_filter(profile: &AgentProfile, filter: &DiscoverAgentsParams) -> bool {
    let Some(capabilities) = profile.capabilities.as_ref() else {
        return filter.strategy.is_none() && filter.market.is_none();
    };
    if let Some(strategy) = filter.strategy.as_ref() {
        if !capabilities.strategies.iter().any(|s| s == strategy) {
            return false;
        }
    }
    if let Some(market) = filter.market.as_ref() {
        if !capabilities.markets.iter().any(|m| m == market) {
            return false;
        }
    }
    true
}

/// In-memory registry used for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryRegistry {
    agents: RwLock<HashMap<u64, RegisteredAgent>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, agent: RegisteredAgent) {
        let mut agents = self.agents.write().await;
        agents.insert(agent.profile.token_id, agent);
    }

    pub async fn remove(&self, token_id: u64) {
        let mut agents = self.agents.write().await;
        agents.remove(&token_id);
    }
}

#[async_trait]
impl AgentRegistry for MemoryRegistry {
    async fn get_agent(&self, token_id: u64) -> Result<Option<RegisteredAgent>, ProviderError> {
        let agents = self.agents.read().await;
        Ok(agents.get(&token_id).cloned())
    }

    async fn list_agents(
        &self,
        filter: &DiscoverAgentsParams,
    ) -> Result<Vec<AgentProfile>, ProviderError> {
        let agents = self.agents.read().await;
        let mut profiles: Vec<AgentProfile> = agents
            .values()
            .map(|agent| agent.profile.clone())
            .filter(|profile| matches_filter(profile, filter))
            .collect();
        profiles.sort_by(|a, b| a.token_id.cmp(&b.token_id));
        Ok(profiles)
    }
}

/// Discovery stub that always defers to the local registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiscovery;

#[async_trait]
impl UnifiedDiscovery for NullDiscovery {
    async fn discover(
        &self,
        _filter: &DiscoverAgentsParams,
    ) -> Result<Vec<AgentProfile>, ProviderError> {
        Ok(Vec::new())
    }

    async fn get_agent(&self, _agent_id: &str) -> Result<Option<AgentProfile>, ProviderError> {
        Ok(None)
    }
}
