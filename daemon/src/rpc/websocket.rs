//! WebSocket connection lifecycle.
//!
//! The connection manager owns the live-connection table exclusively:
//! entries are added on transport accept and removed on close, everything
//! else gets targeted lookups or broadcast fan-out. Per-connection state
//! machine: Connecting -> Authenticating (deadline armed) ->
//! Authenticated -> Closed. Only `a2a.handshake` dispatches before
//! authentication; a failed handshake or an expired deadline closes the
//! transport with code 1008.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use actix_web::{web::Payload, Error as ActixError, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Message, MessageStream, Session};
use futures::StreamExt;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use arena_common::{
    api::{AgentCapabilities, AgentEvent, HandshakeParams, HandshakeResult},
    config::HANDSHAKE_METHOD,
    rpc::{parse_params, RpcError, RpcRequest, RpcResponse, RpcResponseError, JSON_RPC_VERSION},
    time::{get_current_time_in_millis, TimestampMillis},
};

use crate::{
    auth::AuthManager, config::A2AConfig, rate_limit::RateLimiter, router::MessageRouter,
    subscriptions::MarketSubscriptions,
};

// WebSocket close codes used by the protocol
pub const CLOSE_CODE_NORMAL: u16 = 1000;
pub const CLOSE_CODE_POLICY: u16 = 1008;

struct ConnectionEntry {
    agent_id: String,
    wallet_address: String,
    token_id: u64,
    capabilities: Option<AgentCapabilities>,
    authenticated: bool,
    connected_at: TimestampMillis,
    last_activity: TimestampMillis,
    session: Session,
}

#[derive(Default)]
struct ConnectionTable {
    entries: HashMap<u64, ConnectionEntry>,
    by_agent: HashMap<String, HashSet<u64>>,
}

pub struct ConnectionManager {
    table: RwLock<ConnectionTable>,
    next_id: AtomicU64,
    auth: Arc<AuthManager>,
    router: Arc<MessageRouter>,
    rate_limiter: Arc<RateLimiter>,
    subscriptions: Arc<MarketSubscriptions>,
    events: mpsc::UnboundedSender<AgentEvent>,
    max_connections: usize,
    auth_timeout: Duration,
    max_message_size: usize,
    shutdown_grace: Duration,
}

impl ConnectionManager {
    pub fn new(
        auth: Arc<AuthManager>,
        router: Arc<MessageRouter>,
        rate_limiter: Arc<RateLimiter>,
        subscriptions: Arc<MarketSubscriptions>,
        events: mpsc::UnboundedSender<AgentEvent>,
        config: &A2AConfig,
    ) -> Self {
        Self {
            table: RwLock::new(ConnectionTable::default()),
            next_id: AtomicU64::new(1),
            auth,
            router,
            rate_limiter,
            subscriptions,
            events,
            max_connections: config.max_connections,
            auth_timeout: config.auth_timeout,
            max_message_size: config.max_message_size,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Accept a WebSocket upgrade and start the per-connection worker.
    pub async fn handle_connection(
        self: &Arc<Self>,
        request: &HttpRequest,
        body: Payload,
    ) -> Result<HttpResponse, ActixError> {
        let (response, session, msg_stream) = actix_ws::handle(request, body)?;
        // Reject oversized frames at the transport before they are
        // buffered; the application check below covers fragmented text
        let msg_stream = msg_stream.max_frame_size(self.max_message_size);

        let conn_id = {
            let mut table = self.table.write().await;
            if table.entries.len() >= self.max_connections {
                None
            } else {
                let conn_id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let now = get_current_time_in_millis();
                table.entries.insert(
                    conn_id,
                    ConnectionEntry {
                        agent_id: String::new(),
                        wallet_address: String::new(),
                        token_id: 0,
                        capabilities: None,
                        authenticated: false,
                        connected_at: now,
                        last_activity: now,
                        session: session.clone(),
                    },
                );
                Some(conn_id)
            }
        };

        let Some(conn_id) = conn_id else {
            warn!(
                "rejecting connection: server at capacity ({})",
                self.max_connections
            );
            let error = RpcResponseError::new(None, RpcError::InternalError("server at capacity"));
            let mut session = session;
            actix_web::rt::spawn(async move {
                let _ = session.text(error.to_json().to_string()).await;
                let _ = session
                    .clone()
                    .close(Some(CloseReason {
                        code: CloseCode::Again,
                        description: Some("server at capacity".to_string()),
                    }))
                    .await;
            });
            return Ok(response);
        };

        metrics::counter!("arena_connections_opened_total").increment(1);
        debug!("connection {} accepted, awaiting handshake", conn_id);
        self.arm_auth_deadline(conn_id);
        self.spawn_read_loop(conn_id, session, msg_stream);
        Ok(response)
    }

    fn spawn_read_loop(self: &Arc<Self>, conn_id: u64, mut session: Session, mut msg_stream: MessageStream) {
        let manager = Arc::clone(self);
        actix_web::rt::spawn(async move {
            while let Some(message) = msg_stream.next().await {
                let message = match message {
                    Ok(message) => message,
                    Err(err) => {
                        if log::log_enabled!(log::Level::Warn) {
                            warn!("websocket receive error on connection {}: {}", conn_id, err);
                        }
                        break;
                    }
                };

                match message {
                    Message::Text(text) => {
                        if text.len() > manager.max_message_size {
                            warn!("connection {} sent an oversized message", conn_id);
                            let _ = session
                                .clone()
                                .close(Some(CloseReason {
                                    code: CloseCode::Size,
                                    description: Some("message too large".to_string()),
                                }))
                                .await;
                            break;
                        }
                        if let Err(err) = manager
                            .handle_message(conn_id, &mut session, text.as_bytes())
                            .await
                        {
                            if session.text(err.to_json().to_string()).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Binary(bytes) => {
                        if bytes.len() > manager.max_message_size {
                            warn!("connection {} sent an oversized message", conn_id);
                            let _ = session
                                .clone()
                                .close(Some(CloseReason {
                                    code: CloseCode::Size,
                                    description: Some("message too large".to_string()),
                                }))
                                .await;
                            break;
                        }
                        if let Err(err) =
                            manager.handle_message(conn_id, &mut session, &bytes).await
                        {
                            if session.text(err.to_json().to_string()).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    Message::Ping(bytes) => {
                        if session.pong(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    _ => {}
                }
            }
            manager
                .remove_connection(conn_id, "connection closed", CLOSE_CODE_NORMAL)
                .await;
        });
    }

    // Messages of one connection are handled in arrival order: the read
    // loop awaits each dispatch before pulling the next frame
    async fn handle_message(
        self: &Arc<Self>,
        conn_id: u64,
        session: &mut Session,
        payload: &[u8],
    ) -> Result<(), RpcResponseError> {
        let request: RpcRequest = serde_json::from_slice(payload)
            .map_err(|_| RpcResponseError::new(None, RpcError::InvalidJsonRequest))?;
        if request.jsonrpc != JSON_RPC_VERSION {
            return Err(RpcResponseError::new(request.id, RpcError::InvalidVersion));
        }

        let (authenticated, agent_id, wallet) = {
            let mut table = self.table.write().await;
            let Some(entry) = table.entries.get_mut(&conn_id) else {
                // Entry already torn down, drop the message
                return Ok(());
            };
            entry.last_activity = get_current_time_in_millis();
            (
                entry.authenticated,
                entry.agent_id.clone(),
                entry.wallet_address.clone(),
            )
        };

        if !authenticated {
            if request.method == HANDSHAKE_METHOD {
                return self.handle_handshake(conn_id, session, request).await;
            }
            // The socket stays open for a late handshake until the
            // deadline fires
            return Err(RpcResponseError::new(
                request.id,
                RpcError::NotAuthenticated,
            ));
        }

        let decision = self.rate_limiter.check(&agent_id).await;
        if !decision.allowed {
            return Err(RpcResponseError::new(
                request.id,
                RpcError::RateLimitExceeded {
                    retry_after: decision.retry_after_secs,
                    remaining: decision.remaining,
                },
            ));
        }

        let id = request.id.clone();
        let result = self.router.dispatch(&agent_id, &wallet, request, true).await?;
        if id.is_none() {
            // Notification, no response correlation
            return Ok(());
        }
        let text = {
            let response = RpcResponse::new(Cow::Borrowed(&id), Cow::Owned(result));
            serde_json::to_string(&response)
                .map_err(|e| RpcResponseError::new(id.clone(), RpcError::SerializeResponse(e)))?
        };
        session
            .text(text)
            .await
            .map_err(|_| RpcResponseError::new(id, RpcError::InternalError("ws send failed")))?;
        Ok(())
    }

    async fn handle_handshake(
        self: &Arc<Self>,
        conn_id: u64,
        session: &mut Session,
        request: RpcRequest,
    ) -> Result<(), RpcResponseError> {
        let id = request.id;
        let params = request
            .params
            .ok_or_else(|| RpcResponseError::new(id.clone(), RpcError::ExpectedParams))?;
        let params: HandshakeParams =
            parse_params(params).map_err(|e| RpcResponseError::new(id.clone(), e))?;

        match self.auth.authenticate(&params).await {
            Ok(success) => {
                let registered = {
                    let mut table = self.table.write().await;
                    let updated = if let Some(entry) = table.entries.get_mut(&conn_id) {
                        entry.agent_id = success.agent_id.clone();
                        entry.wallet_address = params.address.clone();
                        entry.token_id = params.token_id;
                        entry.capabilities = params.capabilities.clone();
                        entry.authenticated = true;
                        true
                    } else {
                        false
                    };
                    if updated {
                        table
                            .by_agent
                            .entry(success.agent_id.clone())
                            .or_default()
                            .insert(conn_id);
                    }
                    updated
                };
                if !registered {
                    // The auth deadline tore the connection down while the
                    // handshake was in flight; the session is already closed
                    return Ok(());
                }
                let _ = self.events.send(AgentEvent::Connected {
                    agent_id: success.agent_id.clone(),
                    address: params.address.clone(),
                    token_id: params.token_id,
                });
                metrics::counter!("arena_handshakes_total").increment(1);
                info!(
                    "agent {} authenticated on connection {}",
                    success.agent_id, conn_id
                );

                let result = serde_json::to_value(HandshakeResult {
                    success: true,
                    agent_id: success.agent_id,
                    session_token: success.session_token,
                })
                .map_err(|e| RpcResponseError::new(id.clone(), RpcError::SerializeResponse(e)))?;
                let text = {
                    let response = RpcResponse::new(Cow::Borrowed(&id), Cow::Owned(result));
                    serde_json::to_string(&response).map_err(|e| {
                        RpcResponseError::new(id.clone(), RpcError::SerializeResponse(e))
                    })?
                };
                session.text(text).await.map_err(|_| {
                    RpcResponseError::new(id, RpcError::InternalError("ws send failed"))
                })?;
                Ok(())
            }
            Err(err) => {
                // Authentication failure is fatal to the connection
                warn!("handshake failed on connection {}: {}", conn_id, err);
                let error = RpcResponseError::new(
                    id,
                    RpcError::AuthenticationFailed(err.to_string()),
                );
                let _ = session.text(error.to_json().to_string()).await;
                let _ = session
                    .clone()
                    .close(Some(CloseReason {
                        code: CloseCode::Policy,
                        description: Some("authentication failed".to_string()),
                    }))
                    .await;
                self.remove_connection(conn_id, "authentication failed", CLOSE_CODE_POLICY)
                    .await;
                Ok(())
            }
        }
    }

    fn arm_auth_deadline(self: &Arc<Self>, conn_id: u64) {
        let manager = Arc::clone(self);
        actix_web::rt::spawn(async move {
            tokio::time::sleep(manager.auth_timeout).await;
            manager.close_if_unauthenticated(conn_id).await;
        });
    }

    // The authentication deadline is hard: remove-then-close so a racing
    // handshake cannot resurrect the entry
    async fn close_if_unauthenticated(&self, conn_id: u64) {
        let entry = {
            let mut table = self.table.write().await;
            let unauthenticated = table
                .entries
                .get(&conn_id)
                .map(|entry| !entry.authenticated)
                .unwrap_or(false);
            if unauthenticated {
                table.entries.remove(&conn_id)
            } else {
                None
            }
        };
        let Some(entry) = entry else {
            return;
        };

        warn!(
            "connection {} failed to authenticate within the deadline, closing",
            conn_id
        );
        metrics::counter!("arena_connections_closed_total").increment(1);
        let mut session = entry.session;
        let error = RpcResponseError::new(
            None,
            RpcError::AuthenticationFailed("authentication timeout".to_string()),
        );
        let _ = session.text(error.to_json().to_string()).await;
        let _ = session
            .close(Some(CloseReason {
                code: CloseCode::Policy,
                description: Some("authentication timeout".to_string()),
            }))
            .await;
    }

    async fn remove_connection(&self, conn_id: u64, reason: &str, code: u16) {
        let (entry, last_for_agent) = {
            let mut table = self.table.write().await;
            let Some(entry) = table.entries.remove(&conn_id) else {
                return;
            };
            let mut last_for_agent = false;
            if entry.authenticated {
                if let Some(connections) = table.by_agent.get_mut(&entry.agent_id) {
                    connections.remove(&conn_id);
                    if connections.is_empty() {
                        table.by_agent.remove(&entry.agent_id);
                        last_for_agent = true;
                    }
                }
            }
            (entry, last_for_agent)
        };

        metrics::counter!("arena_connections_closed_total").increment(1);
        if entry.authenticated {
            if last_for_agent {
                // Subscriptions live for the life of the connection
                self.subscriptions.remove_agent(&entry.agent_id).await;
            }
            let _ = self.events.send(AgentEvent::Disconnected {
                agent_id: entry.agent_id.clone(),
                reason: reason.to_string(),
                code,
            });
            info!(
                "agent {} disconnected from connection {} ({})",
                entry.agent_id, conn_id, reason
            );
        } else {
            debug!("connection {} closed before authenticating", conn_id);
        }
    }

    /// Best-effort push to the given agents' open, authenticated
    /// connections; closed or unauthenticated ones are silently skipped.
    pub async fn broadcast(&self, agent_ids: &[String], message: &Value) {
        let sessions = {
            let table = self.table.read().await;
            let mut sessions = Vec::new();
            for agent_id in agent_ids {
                if let Some(conn_ids) = table.by_agent.get(agent_id) {
                    for conn_id in conn_ids {
                        if let Some(entry) = table.entries.get(conn_id) {
                            if entry.authenticated {
                                sessions.push(entry.session.clone());
                            }
                        }
                    }
                }
            }
            sessions
        };
        self.send_to_sessions(sessions, message).await;
    }

    /// Best-effort push to every open, authenticated connection.
    pub async fn broadcast_all(&self, message: &Value) {
        let sessions = {
            let table = self.table.read().await;
            table
                .entries
                .values()
                .filter(|entry| entry.authenticated)
                .map(|entry| entry.session.clone())
                .collect::<Vec<_>>()
        };
        self.send_to_sessions(sessions, message).await;
    }

    async fn send_to_sessions(&self, sessions: Vec<Session>, message: &Value) {
        let payload = message.to_string();
        for mut session in sessions {
            if session.text(payload.clone()).await.is_err() {
                debug!("broadcast skipped a closed session");
            }
        }
    }

    /// Graceful close of every connection, bounded by the shutdown grace
    /// period so a hung socket cannot block process shutdown.
    pub async fn close(&self) {
        let sessions: Vec<Session> = {
            let mut table = self.table.write().await;
            table.by_agent.clear();
            table
                .entries
                .drain()
                .map(|(_, entry)| entry.session)
                .collect()
        };
        if sessions.is_empty() {
            return;
        }

        info!("closing {} connections", sessions.len());
        let shutdown = futures::future::join_all(sessions.into_iter().map(|session| async move {
            let _ = session
                .close(Some(CloseReason {
                    code: CloseCode::Away,
                    description: Some("server shutting down".to_string()),
                }))
                .await;
        }));
        if tokio::time::timeout(self.shutdown_grace, shutdown)
            .await
            .is_err()
        {
            warn!(
                "graceful close timed out after {:?}, forcing shutdown",
                self.shutdown_grace
            );
        }
    }

    pub async fn connection_count(&self) -> usize {
        let table = self.table.read().await;
        table.entries.len()
    }

    pub async fn connected_agents(&self) -> Vec<String> {
        let table = self.table.read().await;
        table.by_agent.keys().cloned().collect()
    }

    pub async fn connection_stats(&self, agent_id: &str) -> Option<(TimestampMillis, TimestampMillis)> {
        let table = self.table.read().await;
        let conn_ids = table.by_agent.get(agent_id)?;
        let entry = conn_ids
            .iter()
            .filter_map(|conn_id| table.entries.get(conn_id))
            .max_by_key(|entry| entry.last_activity)?;
        Some((entry.connected_at, entry.last_activity))
    }
}
