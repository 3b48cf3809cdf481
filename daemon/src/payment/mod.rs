//! x402 micropayment request/verify cycle.
//!
//! A paid service starts with `create_payment_request`, the client pays
//! on-chain, then submits the transaction hash through `verify_payment`.
//! Stale or missing requests and rule violations are expected terminal
//! states returned as `PaymentVerification { verified: false, error }`;
//! only collaborator failures surface as `PaymentError`.

mod store;

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use log::{info, warn};
use primitive_types::U256;
use rand::RngCore;
use serde_json::Value;
use thiserror::Error;

use arena_common::{
    api::{PaymentStatistics, PaymentVerification},
    time::get_current_time_in_millis,
};

use crate::{
    config::PAYMENT_AMOUNT_TOLERANCE_PERCENT,
    providers::{ChainProvider, ProviderError},
};

pub use store::{MemoryPaymentStore, PaymentRecord, PaymentStore, SledPaymentStore};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid payment amount '{}'", _0)]
    InvalidAmount(String),
    #[error("payment amount {} is below the minimum {}", amount, minimum)]
    BelowMinimum { amount: U256, minimum: U256 },
    #[error("payment store unavailable: {}", _0)]
    Store(ProviderError),
    #[error("chain provider unavailable: {}", _0)]
    Chain(ProviderError),
}

pub struct PaymentManager {
    store: Arc<dyn PaymentStore>,
    chain: Arc<dyn ChainProvider>,
    timeout: Duration,
    min_amount: U256,
}

impl PaymentManager {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        chain: Arc<dyn ChainProvider>,
        timeout: Duration,
        min_amount: U256,
    ) -> Self {
        Self {
            store,
            chain,
            timeout,
            min_amount,
        }
    }

    pub async fn create_payment_request(
        &self,
        from: &str,
        to: &str,
        amount: &str,
        service: &str,
        metadata: IndexMap<String, Value>,
    ) -> Result<PaymentRecord, PaymentError> {
        let value = parse_amount(amount)?;
        if value < self.min_amount {
            return Err(PaymentError::BelowMinimum {
                amount: value,
                minimum: self.min_amount,
            });
        }

        let now = get_current_time_in_millis();
        let record = PaymentRecord {
            request_id: new_request_id(),
            from: from.to_string(),
            to: to.to_string(),
            amount: amount.to_string(),
            service: service.to_string(),
            metadata,
            created_at: now,
            expires_at: now + self.timeout.as_millis() as u64,
            verified: false,
            verified_tx: None,
        };
        self.store
            .put(&record, self.timeout)
            .await
            .map_err(PaymentError::Store)?;

        metrics::counter!("arena_payment_requests_total").increment(1);
        info!(
            "payment request {} created: {} -> {} ({} for '{}')",
            record.request_id, record.from, record.to, record.amount, record.service
        );
        Ok(record)
    }

    pub async fn verify_payment(
        &self,
        request_id: &str,
        tx_hash: &str,
    ) -> Result<PaymentVerification, PaymentError> {
        let Some(record) = self
            .store
            .get(request_id)
            .await
            .map_err(PaymentError::Store)?
        else {
            return Ok(failure(request_id, "Payment request not found or expired"));
        };

        // Re-verification of a settled request is idempotent and performs
        // no chain lookup
        if record.verified {
            return Ok(PaymentVerification {
                verified: true,
                request_id: record.request_id,
                tx_hash: record.verified_tx,
                error: None,
            });
        }

        let now = get_current_time_in_millis();
        if record.is_expired(now) {
            self.store
                .delete(request_id)
                .await
                .map_err(PaymentError::Store)?;
            return Ok(failure(request_id, "Payment request expired"));
        }

        let Some(transaction) = self
            .chain
            .get_transaction(tx_hash)
            .await
            .map_err(PaymentError::Chain)?
        else {
            return Ok(failure(request_id, "Transaction not found on chain"));
        };
        let Some(receipt) = self
            .chain
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(PaymentError::Chain)?
        else {
            return Ok(failure(request_id, "Transaction not yet confirmed"));
        };

        // Every violated rule is reported, not just the first
        let mut violations = Vec::new();
        if !receipt.success {
            violations.push("transaction failed on-chain".to_string());
        }
        match transaction.to.as_deref() {
            Some(to) if to.eq_ignore_ascii_case(&record.to) => {}
            _ => violations.push(format!("recipient mismatch: expected {}", record.to)),
        }
        // Sender validation is lenient: smart-contract wallets relay
        // through a different from address
        if !transaction.from.eq_ignore_ascii_case(&record.from) {
            warn!(
                "payment {} sender mismatch (smart wallet relay?): tx from {}, requested from {}",
                request_id, transaction.from, record.from
            );
        }
        let requested = parse_amount(&record.amount)?;
        let floor = requested - requested * U256::from(PAYMENT_AMOUNT_TOLERANCE_PERCENT) / U256::from(100);
        if transaction.value < floor {
            violations.push(format!(
                "amount {} below tolerated minimum {}",
                transaction.value, floor
            ));
        }
        if !violations.is_empty() {
            metrics::counter!("arena_payment_verifications_failed_total").increment(1);
            return Ok(failure(request_id, &violations.join("; ")));
        }

        let mut updated = record;
        updated.verified = true;
        updated.verified_tx = Some(tx_hash.to_string());
        let remaining = Duration::from_millis(updated.expires_at.saturating_sub(now));
        self.store
            .put(&updated, remaining)
            .await
            .map_err(PaymentError::Store)?;

        metrics::counter!("arena_payment_verifications_total").increment(1);
        info!("payment {} verified with tx {}", request_id, tx_hash);
        Ok(PaymentVerification {
            verified: true,
            request_id: updated.request_id,
            tx_hash: updated.verified_tx,
            error: None,
        })
    }

    /// Returns true when a pending request was actually removed.
    pub async fn cancel_payment_request(&self, request_id: &str) -> Result<bool, PaymentError> {
        let existing = self
            .store
            .get(request_id)
            .await
            .map_err(PaymentError::Store)?;
        if existing.is_none() {
            return Ok(false);
        }
        self.store
            .delete(request_id)
            .await
            .map_err(PaymentError::Store)?;
        info!("payment request {} cancelled", request_id);
        Ok(true)
    }

    pub async fn get_pending_payments(&self) -> Result<Vec<PaymentRecord>, PaymentError> {
        let now = get_current_time_in_millis();
        let records = self.store.list().await.map_err(PaymentError::Store)?;
        Ok(records
            .into_iter()
            .filter(|record| !record.verified && !record.is_expired(now))
            .collect())
    }

    pub async fn get_statistics(&self) -> Result<PaymentStatistics, PaymentError> {
        let now = get_current_time_in_millis();
        let records = self.store.list().await.map_err(PaymentError::Store)?;
        let mut statistics = PaymentStatistics {
            total: records.len(),
            pending: 0,
            verified: 0,
            expired: 0,
        };
        for record in &records {
            if record.verified {
                statistics.verified += 1;
            } else if record.is_expired(now) {
                statistics.expired += 1;
            } else {
                statistics.pending += 1;
            }
        }
        Ok(statistics)
    }
}

fn failure(request_id: &str, error: &str) -> PaymentVerification {
    PaymentVerification {
        verified: false,
        request_id: request_id.to_string(),
        tx_hash: None,
        error: Some(error.to_string()),
    }
}

fn parse_amount(amount: &str) -> Result<U256, PaymentError> {
    U256::from_dec_str(amount).map_err(|_| PaymentError::InvalidAmount(amount.to_string()))
}

fn new_request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("pay-{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::RwLock;

    use crate::providers::{ChainTransaction, TransactionReceipt};

    #[derive(Default)]
    struct FakeChain {
        transaction: RwLock<Option<ChainTransaction>>,
        receipt: RwLock<Option<TransactionReceipt>>,
        lookups: AtomicUsize,
    }

    impl FakeChain {
        async fn set(&self, transaction: ChainTransaction, receipt: TransactionReceipt) {
            *self.transaction.write().await = Some(transaction);
            *self.receipt.write().await = Some(receipt);
        }

        fn lookup_count(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainProvider for FakeChain {
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

    fn manager_with_chain(chain: Arc<FakeChain>) -> PaymentManager {
        PaymentManager::new(
            Arc::new(MemoryPaymentStore::new()),
            chain,
            Duration::from_secs(300),
            U256::from(1_000_000_000_000u64),
        )
    }

    fn paid_transaction(to: &str, value: u64) -> ChainTransaction {
        ChainTransaction {
            hash: "0xhash".to_string(),
            from: "0xa".to_string(),
            to: Some(to.to_string()),
            value: U256::from(value),
        }
    }

    fn receipt(success: bool) -> TransactionReceipt {
        TransactionReceipt {
            tx_hash: "0xhash".to_string(),
            success,
        }
    }

    #[tokio::test]
    async fn test_amount_below_minimum_is_never_persisted() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(chain);

        let result = manager
            .create_payment_request("0xa", "0xb", "100", "analysis", IndexMap::new())
            .await;
        assert!(matches!(result, Err(PaymentError::BelowMinimum { .. })));
        assert_eq!(
            manager.get_statistics().await.expect("statistics").total,
            0
        );
    }

    #[tokio::test]
    async fn test_verification_accepts_amount_within_tolerance() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(Arc::clone(&chain));

        let record = manager
            .create_payment_request("0xa", "0xb", "1000000000000000", "analysis", IndexMap::new())
            .await
            .expect("created");
        // 99% of the requested amount, the tolerated floor
        chain
            .set(paid_transaction("0xb", 990_000_000_000_000), receipt(true))
            .await;

        let verification = manager
            .verify_payment(&record.request_id, "0xhash")
            .await
            .expect("verified");
        assert!(verification.verified);
        assert_eq!(verification.tx_hash.as_deref(), Some("0xhash"));
    }

    #[tokio::test]
    async fn test_verification_rejects_amount_below_tolerance() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(Arc::clone(&chain));

        let record = manager
            .create_payment_request("0xa", "0xb", "1000000000000000", "analysis", IndexMap::new())
            .await
            .expect("created");
        chain
            .set(paid_transaction("0xb", 980_000_000_000_000), receipt(true))
            .await;

        let verification = manager
            .verify_payment(&record.request_id, "0xhash")
            .await
            .expect("result");
        assert!(!verification.verified);
        assert!(verification.error.expect("error").contains("amount"));
    }

    #[tokio::test]
    async fn test_failed_receipt_reports_transaction_failure() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(Arc::clone(&chain));

        let record = manager
            .create_payment_request("0xa", "0xb", "1000000000000000", "analysis", IndexMap::new())
            .await
            .expect("created");
        chain
            .set(paid_transaction("0xb", 1_000_000_000_000_000), receipt(false))
            .await;

        let verification = manager
            .verify_payment(&record.request_id, "0xhash")
            .await
            .expect("result");
        assert!(!verification.verified);
        assert!(verification
            .error
            .expect("error")
            .contains("transaction failed"));
    }

    #[tokio::test]
    async fn test_all_violations_are_reported_together() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(Arc::clone(&chain));

        let record = manager
            .create_payment_request("0xa", "0xb", "1000000000000000", "analysis", IndexMap::new())
            .await
            .expect("created");
        chain
            .set(paid_transaction("0xc", 1), receipt(false))
            .await;

        let verification = manager
            .verify_payment(&record.request_id, "0xhash")
            .await
            .expect("result");
        let error = verification.error.expect("error");
        assert!(error.contains("transaction failed"));
        assert!(error.contains("recipient mismatch"));
        assert!(error.contains("amount"));
    }

    #[tokio::test]
    async fn test_sender_mismatch_alone_is_tolerated() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(Arc::clone(&chain));

        let record = manager
            .create_payment_request(
                "0xoriginal",
                "0xb",
                "1000000000000000",
                "analysis",
                IndexMap::new(),
            )
            .await
            .expect("created");
        // Smart wallet relay: tx.from differs from the requested sender
        chain
            .set(paid_transaction("0xb", 1_000_000_000_000_000), receipt(true))
            .await;

        let verification = manager
            .verify_payment(&record.request_id, "0xhash")
            .await
            .expect("result");
        assert!(verification.verified);
    }

    #[tokio::test]
    async fn test_second_verification_skips_chain_lookup() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(Arc::clone(&chain));

        let record = manager
            .create_payment_request("0xa", "0xb", "1000000000000000", "analysis", IndexMap::new())
            .await
            .expect("created");
        chain
            .set(paid_transaction("0xb", 1_000_000_000_000_000), receipt(true))
            .await;

        let first = manager
            .verify_payment(&record.request_id, "0xhash")
            .await
            .expect("first");
        assert!(first.verified);
        assert_eq!(chain.lookup_count(), 1);

        let second = manager
            .verify_payment(&record.request_id, "0xhash")
            .await
            .expect("second");
        assert!(second.verified);
        assert_eq!(chain.lookup_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_request_is_a_terminal_state() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(chain);

        let verification = manager
            .verify_payment("pay-missing", "0xhash")
            .await
            .expect("result");
        assert!(!verification.verified);
        assert_eq!(
            verification.error.as_deref(),
            Some("Payment request not found or expired")
        );
    }

    #[tokio::test]
    async fn test_expired_request_is_deleted_then_reported_missing() {
        let chain = Arc::new(FakeChain::default());
        let store = Arc::new(MemoryPaymentStore::new());
        let manager = PaymentManager::new(
            Arc::clone(&store) as Arc<dyn PaymentStore>,
            Arc::clone(&chain) as Arc<dyn ChainProvider>,
            Duration::from_millis(0),
            U256::from(1u64),
        );

        let record = manager
            .create_payment_request("0xa", "0xb", "1000", "analysis", IndexMap::new())
            .await
            .expect("created");
        // Give the store a longer TTL than the request so the lazy expiry
        // path is exercised rather than the storage one
        store
            .put(&record, Duration::from_secs(60))
            .await
            .expect("put");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let first = manager
            .verify_payment(&record.request_id, "0xhash")
            .await
            .expect("first");
        assert_eq!(first.error.as_deref(), Some("Payment request expired"));
        assert_eq!(chain.lookup_count(), 0);

        let second = manager
            .verify_payment(&record.request_id, "0xhash")
            .await
            .expect("second");
        assert_eq!(
            second.error.as_deref(),
            Some("Payment request not found or expired")
        );
    }

    #[tokio::test]
    async fn test_cancel_removes_pending_request() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(chain);

        let record = manager
            .create_payment_request("0xa", "0xb", "1000000000000000", "analysis", IndexMap::new())
            .await
            .expect("created");
        assert!(manager
            .cancel_payment_request(&record.request_id)
            .await
            .expect("cancel"));
        assert!(!manager
            .cancel_payment_request(&record.request_id)
            .await
            .expect("cancel twice"));
    }

    #[tokio::test]
    async fn test_statistics_partition_records() {
        let chain = Arc::new(FakeChain::default());
        let manager = manager_with_chain(Arc::clone(&chain));

        manager
            .create_payment_request("0xa", "0xb", "1000000000000000", "analysis", IndexMap::new())
            .await
            .expect("created");
        let verified = manager
            .create_payment_request("0xa", "0xb", "2000000000000000", "signals", IndexMap::new())
            .await
            .expect("created");
        chain
            .set(paid_transaction("0xb", 2_000_000_000_000_000), receipt(true))
            .await;
        manager
            .verify_payment(&verified.request_id, "0xhash")
            .await
            .expect("verified");

        let statistics = manager.get_statistics().await.expect("statistics");
        assert_eq!(statistics.total, 2);
        assert_eq!(statistics.pending, 1);
        assert_eq!(statistics.verified, 1);
        assert_eq!(statistics.expired, 0);

        let pending_records = manager.get_pending_payments().await.expect("pending");
        assert_eq!(pending_records.len(), 1);
    }
}
