// External collaborator interfaces.
//
// The A2A layer never owns trading, identity, or chain state; it reaches
// them through these traits so deployments can wire real services while
// tests and local development use the in-memory implementations.

mod chain;
mod ledger;
mod registry;

use thiserror::Error;

pub use chain::{ChainProvider, ChainTransaction, HttpChainProvider, TransactionReceipt};
pub use ledger::{LedgerClient, MemoryLedger};
pub use registry::{
    AgentRegistry, MemoryRegistry, NullDiscovery, RegisteredAgent, UnifiedDiscovery,
};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {}", _0)]
    Request(String),
    #[error("provider returned malformed data: {}", _0)]
    Malformed(String),
    #[error("storage error: {}", _0)]
    Storage(String),
}
