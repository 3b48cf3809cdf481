#![allow(clippy::disallowed_methods)]

// RPC modules use the json! macro which internally uses unwrap
// This is acceptable for JSON construction which should never fail for valid literals

pub mod websocket;

use std::{borrow::Cow, sync::Arc};

use actix_web::{
    dev::ServerHandle,
    get,
    web::{self, Data, Payload},
    App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use anyhow::Context;
use log::{info, warn};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::sync::{mpsc, Mutex};

use arena_common::{
    api::{AgentCard, AgentEvent, AgentSkill, DiscoveryDocument, SecurityScheme},
    config::{
        HEADER_AGENT_ADDRESS, HEADER_AGENT_ID, HEADER_AGENT_TOKEN_ID, HEADER_RATE_LIMIT,
        HEADER_RATE_REMAINING, PROTOCOL_VERSION, SERVICE_NAME, VERSION,
    },
    rpc::{RpcError, RpcRequest, RpcResponse, RpcResponseError, JSON_RPC_VERSION},
};

use crate::{
    auth::AuthManager,
    config::{A2AConfig, RATE_LIMIT_CLEANUP_INTERVAL_SECS},
    rate_limit::RateLimiter,
    router::MessageRouter,
    subscriptions::MarketSubscriptions,
};
use websocket::ConnectionManager;

pub type SharedA2AServer = Arc<A2AServer>;

/// The running A2A server. Both transports share the same rate limiter
/// and message router; the process entry point constructs exactly one of
/// these and injects it wherever needed.
pub struct A2AServer {
    handle: Mutex<Option<ServerHandle>>,
    connections: Arc<ConnectionManager>,
    router: Arc<MessageRouter>,
    rate_limiter: Arc<RateLimiter>,
    config: A2AConfig,
}

impl A2AServer {
    pub async fn new(
        config: A2AConfig,
        auth: Arc<AuthManager>,
        router: Arc<MessageRouter>,
        subscriptions: Arc<MarketSubscriptions>,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<SharedA2AServer, anyhow::Error> {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit,
            config.rate_limit_window,
        ));
        let connections = Arc::new(ConnectionManager::new(
            auth,
            Arc::clone(&router),
            Arc::clone(&rate_limiter),
            subscriptions,
            events,
            &config,
        ));

        let prometheus = if config.prometheus_enabled {
            let (recorder, _) = PrometheusBuilder::new()
                .build()
                .context("Failed to create Prometheus handler")?;
            let handle = recorder.handle();
            metrics::set_global_recorder(Box::new(recorder))
                .context("Failed to set global recorder for Prometheus")?;
            info!(
                "Prometheus metrics enabled on route: {}",
                config.prometheus_route
            );
            Some((config.prometheus_route.clone(), handle))
        } else {
            None
        };

        if config.bind_address.starts_with("0.0.0.0") {
            warn!("A2A server is bound to 0.0.0.0 (all interfaces)");
            warn!("HTTP identity headers are trusted; front this listener with an authenticating proxy");
        }

        let server = Arc::new(Self {
            handle: Mutex::new(None),
            connections,
            router,
            rate_limiter,
            config: config.clone(),
        });

        info!("Starting A2A server on {}", config.bind_address);
        {
            let clone = Arc::clone(&server);
            let builder = HttpServer::new(move || {
                let server = Arc::clone(&clone);
                let mut app = App::new()
                    .app_data(web::Data::from(server))
                    .app_data(web::Data::new(
                        prometheus.as_ref().map(|(_, handle)| handle.clone()),
                    ))
                    // Stateless HTTP transport
                    .route("/json_rpc", web::post().to(json_rpc))
                    // Persistent WebSocket transport
                    .route("/json_rpc", web::get().to(websocket_endpoint))
                    // Out-of-band discovery
                    .route(
                        "/.well-known/agent.json",
                        web::get().to(discovery_document),
                    )
                    .route(
                        "/.well-known/agent-card.json",
                        web::get().to(agent_card),
                    )
                    .service(index);

                if let Some((route, _)) = &prometheus {
                    app = app.route(route, web::get().to(prometheus_metrics));
                }
                app
            })
            .disable_signals()
            .bind(&config.bind_address)?;

            let http_server = builder.run();
            {
                // save the server handle to be able to stop it later
                let handle = http_server.handle();
                let mut lock = server.handle.lock().await;
                *lock = Some(handle);
            }
            actix_web::rt::spawn(http_server);
        }

        // Periodic sweep of idle rate-limit buckets
        {
            let rate_limiter = Arc::clone(&server.rate_limiter);
            actix_web::rt::spawn(async move {
                loop {
                    tokio::time::sleep(tokio::time::Duration::from_secs(
                        RATE_LIMIT_CLEANUP_INTERVAL_SECS,
                    ))
                    .await;
                    rate_limiter.cleanup().await;
                }
            });
        }

        Ok(server)
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn config(&self) -> &A2AConfig {
        &self.config
    }

    fn agent_card(&self) -> AgentCard {
        AgentCard {
            name: "Arena A2A Service".to_string(),
            description: "Agent-to-agent gateway for the Arena prediction game".to_string(),
            version: VERSION.to_string(),
            endpoint: format!("{}/json_rpc", self.config.public_url),
            skills: vec![
                AgentSkill {
                    id: "discovery".to_string(),
                    name: "Agent discovery".to_string(),
                    description: "Find other agents by strategy and market".to_string(),
                },
                AgentSkill {
                    id: "market-data".to_string(),
                    name: "Market data".to_string(),
                    description: "Prices, shares and subscriptions for prediction markets"
                        .to_string(),
                },
                AgentSkill {
                    id: "x402-payments".to_string(),
                    name: "x402 micropayments".to_string(),
                    description: "On-chain verified payments for paid agent services".to_string(),
                },
            ],
            security_scheme: SecurityScheme {
                scheme: "handshake-signature".to_string(),
                description: Some(
                    "ed25519 signature over address:tokenId:timestamp, in-band via a2a.handshake"
                        .to_string(),
                ),
            },
            default_input_modes: vec!["application/json".to_string()],
            default_output_modes: vec!["application/json".to_string()],
        }
    }

    pub async fn stop(&self) {
        info!("Stopping A2A server...");
        self.connections.close().await;
        let mut handle = self.handle.lock().await;
        if let Some(handle) = handle.take() {
            handle.stop(false).await;
            info!("A2A server is now stopped!");
        } else {
            warn!("A2A server is not running!");
        }
    }
}

/// Identity supplied out-of-band by the HTTP transport. These headers are
/// trusted as pre-authenticated; the listener is expected to sit behind
/// the platform's authenticating proxy.
struct HttpIdentity {
    agent_id: String,
    wallet_address: String,
}

fn identity_from_headers(request: &HttpRequest) -> Option<HttpIdentity> {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
    };
    let agent_id = header(HEADER_AGENT_ID)?;
    let wallet_address = header(HEADER_AGENT_ADDRESS)?;
    // The token id header is required for identity completeness even
    // though dispatch keys on the agent id
    header(HEADER_AGENT_TOKEN_ID)?;
    Some(HttpIdentity {
        agent_id,
        wallet_address,
    })
}

// Stateless JSON-RPC endpoint: identity headers replace the handshake,
// then the same rate limiter and router as the WebSocket path apply.
async fn json_rpc(
    server: Data<A2AServer>,
    request: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, RpcResponseError> {
    let rpc_request: RpcRequest = serde_json::from_slice(&body)
        .map_err(|_| RpcResponseError::new(None, RpcError::InvalidJsonRequest))?;

    let Some(identity) = identity_from_headers(&request) else {
        return Err(RpcResponseError::new(
            rpc_request.id,
            RpcError::NotAuthenticated,
        ));
    };

    let limit = server.rate_limiter().capacity();
    let decision = server.rate_limiter().check(&identity.agent_id).await;
    if !decision.allowed {
        let error = RpcResponseError::new(
            rpc_request.id,
            RpcError::RateLimitExceeded {
                retry_after: decision.retry_after_secs,
                remaining: decision.remaining,
            },
        );
        return Ok(HttpResponse::TooManyRequests()
            .insert_header(("Retry-After", "60"))
            .insert_header((HEADER_RATE_LIMIT, limit.to_string()))
            .insert_header((HEADER_RATE_REMAINING, decision.remaining.to_string()))
            .json(error.to_json()));
    }

    let id = rpc_request.id.clone();
    let body = match server
        .router()
        .dispatch(
            &identity.agent_id,
            &identity.wallet_address,
            rpc_request,
            true,
        )
        .await
    {
        Ok(result) => {
            let response = RpcResponse::new(Cow::Borrowed(&id), Cow::Owned(result));
            serde_json::to_value(&response)
                .map_err(|e| RpcResponseError::new(id.clone(), RpcError::SerializeResponse(e)))?
        }
        // Protocol and domain errors ride HTTP 200 like any JSON-RPC
        // endpoint; only throttling changes the status code
        Err(error) => error.to_json(),
    };

    Ok(HttpResponse::Ok()
        .insert_header((HEADER_RATE_LIMIT, limit.to_string()))
        .insert_header((HEADER_RATE_REMAINING, decision.remaining.to_string()))
        .json(body))
}

async fn websocket_endpoint(
    server: Data<A2AServer>,
    request: HttpRequest,
    body: Payload,
) -> Result<HttpResponse, actix_web::Error> {
    server.connections().handle_connection(&request, body).await
}

// Public discovery endpoints, no authentication required

async fn discovery_document(server: Data<A2AServer>) -> HttpResponse {
    HttpResponse::Ok().json(DiscoveryDocument {
        service: SERVICE_NAME.to_string(),
        version: PROTOCOL_VERSION.to_string(),
        status: "ok".to_string(),
        endpoint: format!("{}/json_rpc", server.config().public_url),
        agent_card: server.agent_card(),
    })
}

async fn agent_card(server: Data<A2AServer>) -> HttpResponse {
    HttpResponse::Ok().json(server.agent_card())
}

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(format!(
        "Arena A2A service\nRunning on: {} (json-rpc {})",
        VERSION, JSON_RPC_VERSION
    ))
}

async fn prometheus_metrics(
    handle: Data<Option<PrometheusHandle>>,
) -> Result<HttpResponse, actix_web::Error> {
    Ok(match handle.as_ref() {
        Some(handle) => {
            let metrics = handle.render();
            HttpResponse::Ok()
                .content_type("text/plain; version=0.0.4")
                .body(metrics)
        }
        None => HttpResponse::NotFound().body("Prometheus metrics are not enabled"),
    })
}
