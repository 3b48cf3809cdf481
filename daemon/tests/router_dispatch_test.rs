// Router dispatch through fake collaborators: method resolution, typed
// params, discovery precedence, market math, throttling interplay.

mod common;

use std::{sync::Arc, time::Duration};

use serde_json::json;

use arena_common::api::{AgentCapabilities, AgentProfile, MarketData, MarketStatus, Position};
use arena_daemon::{
    providers::{MemoryLedger, MemoryRegistry, NullDiscovery, RegisteredAgent},
    rate_limit::RateLimiter,
    router::MessageRouter,
    subscriptions::MarketSubscriptions,
};

use common::{profile, request, HalfBrokenLedger, StaticDiscovery};

struct Fixture {
    registry: Arc<MemoryRegistry>,
    ledger: Arc<MemoryLedger>,
    router: MessageRouter,
}

fn fixture_with_discovery(discovery: StaticDiscovery) -> Fixture {
    let registry = Arc::new(MemoryRegistry::new());
    let ledger = Arc::new(MemoryLedger::new());
    let router = MessageRouter::new(
        Arc::clone(&registry) as _,
        Arc::new(discovery) as _,
        Arc::clone(&ledger) as _,
        None,
        Arc::new(MarketSubscriptions::new()),
    );
    Fixture {
        registry,
        ledger,
        router,
    }
}

fn fixture() -> Fixture {
    fixture_with_discovery(StaticDiscovery::default())
}

fn market(market_id: &str, yes_shares: u64, no_shares: u64) -> MarketData {
    MarketData {
        market_id: market_id.to_string(),
        question: "Will it resolve YES?".to_string(),
        yes_shares,
        no_shares,
        status: MarketStatus::Open,
    }
}

#[tokio::test]
async fn test_unknown_method_is_rejected() {
    let fixture = fixture();
    let error = fixture
        .router
        .dispatch("agent-1", "0xa", request("fooBar", None, 1), true)
        .await
        .expect_err("unknown method");
    assert_eq!(error.get_error().get_code(), -32601);
}

#[tokio::test]
async fn test_unauthenticated_dispatch_is_rejected() {
    let fixture = fixture();
    let error = fixture
        .router
        .dispatch("", "", request("getBalance", None, 1), false)
        .await
        .expect_err("not authenticated");
    assert_eq!(error.get_error().get_code(), -32001);
}

#[tokio::test]
async fn test_malformed_params_are_rejected() {
    let fixture = fixture();
    let error = fixture
        .router
        .dispatch(
            "agent-1",
            "0xa",
            request("getMarketData", Some(json!({"market": 42})), 1),
            true,
        )
        .await
        .expect_err("bad params");
    assert_eq!(error.get_error().get_code(), -32602);
}

#[tokio::test]
async fn test_discovery_results_take_precedence_over_registry() {
    let fixture = fixture_with_discovery(StaticDiscovery {
        agents: vec![profile(10), profile(11)],
    });
    fixture
        .registry
        .register(RegisteredAgent {
            profile: profile(1),
            public_key: String::new(),
        })
        .await;

    let result = fixture
        .router
        .dispatch("agent-1", "0xa", request("discoverAgents", None, 1), true)
        .await
        .expect("discover");
    assert_eq!(result["total"], 2);
    assert_eq!(result["agents"][0]["agentId"], "agent-10");
}

#[tokio::test]
async fn test_empty_discovery_falls_back_to_registry() {
    let fixture = fixture();
    fixture
        .registry
        .register(RegisteredAgent {
            profile: AgentProfile {
                name: Some("momentum bot".to_string()),
                capabilities: Some(AgentCapabilities {
                    strategies: vec!["momentum".to_string()],
                    ..Default::default()
                }),
                ..profile(5)
            },
            public_key: String::new(),
        })
        .await;

    let result = fixture
        .router
        .dispatch(
            "agent-1",
            "0xa",
            request("discoverAgents", Some(json!({"strategy": "momentum"})), 1),
            true,
        )
        .await
        .expect("discover");
    assert_eq!(result["total"], 1);
    assert_eq!(result["agents"][0]["agentId"], "agent-5");
}

#[tokio::test]
async fn test_discovery_limit_truncates_results() {
    let fixture = fixture_with_discovery(StaticDiscovery {
        agents: vec![profile(1), profile(2), profile(3)],
    });

    let result = fixture
        .router
        .dispatch(
            "agent-1",
            "0xa",
            request("discoverAgents", Some(json!({"limit": 2})), 1),
            true,
        )
        .await
        .expect("discover");
    assert_eq!(result["agents"].as_array().expect("array").len(), 2);
    assert_eq!(result["total"], 3);
}

#[tokio::test]
async fn test_get_agent_info_falls_back_to_registry_by_token() {
    let fixture = fixture();
    fixture
        .registry
        .register(RegisteredAgent {
            profile: profile(9),
            public_key: String::new(),
        })
        .await;

    let result = fixture
        .router
        .dispatch(
            "agent-1",
            "0xa",
            request("getAgentInfo", Some(json!({"agentId": "agent-9"})), 1),
            true,
        )
        .await
        .expect("info");
    assert_eq!(result["tokenId"], 9);

    let error = fixture
        .router
        .dispatch(
            "agent-1",
            "0xa",
            request("getAgentInfo", Some(json!({"agentId": "agent-404"})), 2),
            true,
        )
        .await
        .expect_err("missing agent");
    assert_eq!(error.get_error().get_code(), -32004);
}

#[tokio::test]
async fn test_market_prices_default_to_even_on_zero_shares() {
    let fixture = fixture();
    fixture.ledger.insert_market(market("m1", 0, 0)).await;

    let result = fixture
        .router
        .dispatch(
            "agent-1",
            "0xa",
            request("getMarketPrices", Some(json!({"marketId": "m1"})), 1),
            true,
        )
        .await
        .expect("prices");
    assert_eq!(result["YES"], 0.5);
    assert_eq!(result["NO"], 0.5);
}

#[tokio::test]
async fn test_market_prices_follow_share_ratio() {
    let fixture = fixture();
    fixture.ledger.insert_market(market("m1", 300, 100)).await;

    let result = fixture
        .router
        .dispatch(
            "agent-1",
            "0xa",
            request("getMarketPrices", Some(json!({"marketId": "m1"})), 1),
            true,
        )
        .await
        .expect("prices");
    assert_eq!(result["YES"], 0.75);
    assert_eq!(result["NO"], 0.25);
}

#[tokio::test]
async fn test_unknown_market_is_a_domain_error() {
    let fixture = fixture();
    let error = fixture
        .router
        .dispatch(
            "agent-1",
            "0xa",
            request("getMarketData", Some(json!({"marketId": "nope"})), 1),
            true,
        )
        .await
        .expect_err("missing market");
    assert_eq!(error.get_error().get_code(), -32005);
}

#[tokio::test]
async fn test_subscriptions_are_shared_and_order_independent() {
    let fixture = fixture();
    fixture.ledger.insert_market(market("m1", 0, 0)).await;

    for agent in ["B", "A", "B"] {
        let result = fixture
            .router
            .dispatch(
                agent,
                "0xa",
                request("subscribeMarket", Some(json!({"marketId": "m1"})), 1),
                true,
            )
            .await
            .expect("subscribe");
        assert_eq!(result["subscribed"], true);
    }

    assert_eq!(
        fixture.router.subscriptions().subscribers("m1").await,
        vec!["A", "B"]
    );
}

#[tokio::test]
async fn test_balance_and_positions_projections() {
    let fixture = fixture();
    fixture.ledger.set_balance("agent-1", 2_500).await;
    fixture
        .ledger
        .set_positions(
            "agent-1",
            vec![Position {
                market_id: "m1".to_string(),
                yes_shares: 10,
                no_shares: 0,
            }],
        )
        .await;

    let balance = fixture
        .router
        .dispatch("agent-1", "0xa", request("getBalance", None, 1), true)
        .await
        .expect("balance");
    assert_eq!(balance["balance"], 2_500);

    let wallet = fixture
        .router
        .dispatch("agent-1", "0xa", request("getUserWallet", None, 2), true)
        .await
        .expect("wallet");
    assert_eq!(wallet["balance"]["balance"], 2_500);
    assert_eq!(wallet["positions"][0]["marketId"], "m1");
}

#[tokio::test]
async fn test_user_wallet_fails_as_a_unit() {
    let registry = Arc::new(MemoryRegistry::new());
    let router = MessageRouter::new(
        registry as _,
        Arc::new(NullDiscovery) as _,
        Arc::new(HalfBrokenLedger) as _,
        None,
        Arc::new(MarketSubscriptions::new()),
    );

    let error = router
        .dispatch("agent-1", "0xa", request("getUserWallet", None, 1), true)
        .await
        .expect_err("positions failure poisons the composition");
    assert_eq!(error.get_error().get_code(), -32603);
}

#[tokio::test]
async fn test_payments_reject_when_feature_is_off() {
    let fixture = fixture();
    let error = fixture
        .router
        .dispatch(
            "agent-1",
            "0xa",
            request(
                "paymentRequest",
                Some(json!({
                    "to": "0xb",
                    "amount": "1000000000000000",
                    "service": "analysis",
                })),
                1,
            ),
            true,
        )
        .await
        .expect_err("payments disabled");
    assert_eq!(error.get_error().get_code(), -32601);
    assert!(error.to_json()["error"]["message"]
        .as_str()
        .expect("message")
        .contains("x402 payments not enabled"));
}

// Agent A sends 101 calls inside one window with limit 100: exactly 100
// dispatches succeed and the 101st is rejected with zero tokens left.
#[tokio::test]
async fn test_throttling_after_one_hundred_calls() {
    let fixture = fixture();
    fixture.ledger.set_balance("agent-1", 10).await;
    let limiter = RateLimiter::new(100, Duration::from_secs(60));

    let mut successes = 0;
    for i in 0..101u64 {
        let decision = limiter.check("agent-1").await;
        if !decision.allowed {
            assert_eq!(i, 100, "only the 101st call may be throttled");
            assert_eq!(decision.remaining, 0);
            continue;
        }
        fixture
            .router
            .dispatch("agent-1", "0xa", request("getBalance", None, i), true)
            .await
            .expect("dispatch");
        successes += 1;
    }
    assert_eq!(successes, 100);
}
