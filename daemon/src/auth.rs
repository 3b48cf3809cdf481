//! Handshake authentication against the agent registry.
//!
//! A handshake carries `(address, tokenId, signature, timestamp)`; the
//! signature is ed25519 over the canonical string
//! `"{address}:{tokenId}:{timestamp}"` with the key registered for the
//! token. Authentication failure is always fatal to the connection and
//! never retried by the server.

use std::{sync::Arc, time::Duration};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use log::debug;
use rand::RngCore;

use arena_common::{api::HandshakeParams, time::get_current_time_in_millis};

use crate::providers::{AgentRegistry, RegisteredAgent};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("handshake timestamp outside the allowed window")]
    TimestampSkew,
    #[error("agent token {} is not registered", _0)]
    UnknownAgent(u64),
    #[error("wallet address does not match the registry")]
    AddressMismatch,
    #[error("registered verifying key is invalid")]
    InvalidKey,
    #[error("signature is invalid")]
    InvalidSignature,
    #[error("registry lookup failed: {}", _0)]
    Registry(String),
}

pub struct AuthSuccess {
    pub agent_id: String,
    pub session_token: String,
    pub agent: RegisteredAgent,
}

pub struct AuthManager {
    registry: Arc<dyn AgentRegistry>,
    skew: Duration,
}

impl AuthManager {
    pub fn new(registry: Arc<dyn AgentRegistry>, skew: Duration) -> Self {
        Self { registry, skew }
    }

    pub async fn authenticate(&self, params: &HandshakeParams) -> Result<AuthSuccess, AuthError> {
        let now = get_current_time_in_millis();
        if now.abs_diff(params.timestamp) > self.skew.as_millis() as u64 {
            return Err(AuthError::TimestampSkew);
        }

        let agent = self
            .registry
            .get_agent(params.token_id)
            .await
            .map_err(|e| AuthError::Registry(e.to_string()))?
            .ok_or(AuthError::UnknownAgent(params.token_id))?;

        if !agent
            .profile
            .wallet_address
            .eq_ignore_ascii_case(&params.address)
        {
            return Err(AuthError::AddressMismatch);
        }

        verify_handshake_signature(&agent.public_key, params)?;

        let agent_id = format!("agent-{}", params.token_id);
        debug!("handshake verified for {}", agent_id);
        Ok(AuthSuccess {
            agent_id,
            session_token: new_session_token(),
            agent,
        })
    }
}

fn verify_handshake_signature(
    public_key_hex: &str,
    params: &HandshakeParams,
) -> Result<(), AuthError> {
    let key_bytes = hex::decode(public_key_hex).map_err(|_| AuthError::InvalidKey)?;
    let key_bytes: [u8; 32] = key_bytes.try_into().map_err(|_| AuthError::InvalidKey)?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| AuthError::InvalidKey)?;

    let signature_bytes =
        hex::decode(&params.signature).map_err(|_| AuthError::InvalidSignature)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| AuthError::InvalidSignature)?;

    let canonical = format!(
        "{}:{}:{}",
        params.address, params.token_id, params.timestamp
    );
    key.verify(canonical.as_bytes(), &signature)
        .map_err(|_| AuthError::InvalidSignature)
}

// Opaque session token handed back in the handshake result
fn new_session_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
