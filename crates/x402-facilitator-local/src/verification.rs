//! Tracking of verified payments between `/verify` and `/settle`.
//!
//! A successful verification leaves a [`VerificationRecord`] in a [`VerificationStore`].
//! Settlement must claim that record first: the claim atomically moves it from
//! [`RecordState::Verified`] to [`RecordState::Settling`], so two concurrent settlements
//! of the same payment can never both proceed. The record is deleted once settlement
//! finishes, whatever the outcome.
//!
//! Records older than the freshness window count as absent. They are dropped lazily
//! when a settlement tries to claim them, and periodically by the sweeper started with
//! [`spawn_sweeper`].
//!
//! [`VerificationTracker`] is the hook set that wires a store into the
//! [`LifecycleHooks`] of a facilitator.

use alloy_primitives::{B256, keccak256};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use x402_types::chain::ChainId;

use crate::hooks::{
    AfterSettle, AfterVerify, BeforeSettle, Hook, HookError, LifecycleHooks, PaymentContext,
    SettleDecision, SettleFailure,
};

pub const VERIFICATION_REQUIRED: &str = "Payment must be verified before settlement";
pub const SETTLEMENT_IN_PROGRESS: &str = "Payment settlement already in progress";

/// Shortest period between two sweeps.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Identity of a verified payment: the network plus a digest of the signed authorization.
///
/// The digest is keccak-256 of the scheme's [`PaymentContext::payment_id`]. Without one it
/// covers the canonical JSON encoding (object keys sorted at every level) of the signed
/// `payload.payload` and the requirements. Unsigned parts of the payment payload, such as
/// `resource` and `extensions`, never change the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerificationKey {
    pub network: ChainId,
    pub digest: B256,
}

impl VerificationKey {
    pub fn derive(context: &PaymentContext) -> Result<Self, serde_json::Error> {
        let bytes = match &context.payment_id {
            Some(payment_id) => payment_id.as_bytes().to_vec(),
            None => {
                let value =
                    serde_json::to_value((&context.payload.payload, &context.requirements))?;
                serde_json::to_vec(&canonicalize(value))?
            }
        };
        Ok(Self {
            network: context.network().clone(),
            digest: keccak256(bytes),
        })
    }
}

impl fmt::Display for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.digest)
    }
}

fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries = map.into_iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(canonicalize).collect())
        }
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Verified,
    /// Claimed by a settlement that has not finished yet.
    Settling,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub key: VerificationKey,
    pub payer: String,
    pub verified_at: Instant,
    pub state: RecordState,
}

impl VerificationRecord {
    pub fn verified(key: VerificationKey, payer: String) -> Self {
        Self {
            key,
            payer,
            verified_at: Instant::now(),
            state: RecordState::Verified,
        }
    }

    pub fn is_stale(&self, freshness: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.verified_at) > freshness
    }
}

/// Result of [`VerificationStore::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The record was verified and fresh; it is now settling.
    Claimed(VerificationRecord),
    Missing,
    /// The record was older than the freshness window and has been removed.
    Expired,
    InProgress,
}

/// Storage of verification records.
///
/// `claim` must be atomic per key: of any number of concurrent claims on one verified
/// record, exactly one observes [`ClaimOutcome::Claimed`].
#[async_trait::async_trait]
pub trait VerificationStore: Send + Sync {
    async fn get(&self, key: &VerificationKey) -> Option<VerificationRecord>;

    /// Stores a verified record, refreshing an existing verified one.
    ///
    /// Returns `false` and leaves the store unchanged if the key is currently settling.
    async fn put(&self, record: VerificationRecord) -> bool;

    async fn claim(&self, key: &VerificationKey, freshness: Duration) -> ClaimOutcome;

    async fn delete(&self, key: &VerificationKey) -> Option<VerificationRecord>;

    /// Removes verified records older than `freshness`. Returns how many were removed.
    async fn sweep(&self, freshness: Duration) -> usize;
}

/// Process-local [`VerificationStore`] on a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryVerificationStore {
    records: DashMap<VerificationKey, VerificationRecord>,
}

impl InMemoryVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn get(&self, key: &VerificationKey) -> Option<VerificationRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    async fn put(&self, record: VerificationRecord) -> bool {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().state == RecordState::Settling {
                    return false;
                }
                entry.insert(record);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                true
            }
        }
    }

    async fn claim(&self, key: &VerificationKey, freshness: Duration) -> ClaimOutcome {
        let now = Instant::now();
        match self.records.entry(key.clone()) {
            Entry::Vacant(_) => ClaimOutcome::Missing,
            Entry::Occupied(mut entry) => match entry.get().state {
                RecordState::Settling => ClaimOutcome::InProgress,
                RecordState::Verified if entry.get().is_stale(freshness, now) => {
                    entry.remove();
                    ClaimOutcome::Expired
                }
                RecordState::Verified => {
                    entry.get_mut().state = RecordState::Settling;
                    ClaimOutcome::Claimed(entry.get().clone())
                }
            },
        }
    }

    async fn delete(&self, key: &VerificationKey) -> Option<VerificationRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    async fn sweep(&self, freshness: Duration) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.state == RecordState::Settling || !record.is_stale(freshness, now)
        });
        before.saturating_sub(self.records.len())
    }
}

/// Hooks that record verifications and gate settlements on them.
///
/// - after verify: store the record
/// - before settle: claim the record or abort
/// - after settle and settle failure: delete the record
pub struct VerificationTracker {
    store: Arc<dyn VerificationStore>,
    freshness: Duration,
}

impl fmt::Debug for VerificationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationTracker")
            .field("freshness", &self.freshness)
            .finish_non_exhaustive()
    }
}

impl VerificationTracker {
    pub fn new(store: Arc<dyn VerificationStore>, freshness: Duration) -> Self {
        Self { store, freshness }
    }

    pub fn store(&self) -> &Arc<dyn VerificationStore> {
        &self.store
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Registers the tracker on every hook list it observes.
    pub fn install(self: Arc<Self>, hooks: &mut LifecycleHooks) {
        hooks
            .on_after_verify(self.clone())
            .on_before_settle(self.clone())
            .on_after_settle(self.clone())
            .on_settle_failure(self);
    }

    async fn forget(&self, context: &PaymentContext) -> Result<(), HookError> {
        let key = VerificationKey::derive(context).map_err(HookError::new)?;
        if self.store.delete(&key).await.is_some() {
            tracing::debug!(%key, "Verification record cleared");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Hook<AfterVerify> for VerificationTracker {
    async fn call(&self, event: &AfterVerify) -> Result<(), HookError> {
        let key = VerificationKey::derive(&event.context).map_err(HookError::new)?;
        let record = VerificationRecord::verified(key.clone(), event.payer.clone());
        if !self.store.put(record).await {
            tracing::debug!(%key, "Verification not recorded, settlement in progress");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Hook<BeforeSettle> for VerificationTracker {
    async fn call(&self, event: &BeforeSettle) -> Result<SettleDecision, HookError> {
        // An underivable key cannot match a verification
        let Ok(key) = VerificationKey::derive(&event.context) else {
            return Ok(SettleDecision::abort(VERIFICATION_REQUIRED));
        };
        let decision = match self.store.claim(&key, self.freshness).await {
            ClaimOutcome::Claimed(_) => SettleDecision::Continue,
            ClaimOutcome::Missing => SettleDecision::abort(VERIFICATION_REQUIRED),
            ClaimOutcome::Expired => SettleDecision::abort(format!(
                "Payment verification expired after {}s, verify again",
                self.freshness.as_secs()
            )),
            ClaimOutcome::InProgress => SettleDecision::abort(SETTLEMENT_IN_PROGRESS),
        };
        Ok(decision)
    }
}

#[async_trait::async_trait]
impl Hook<AfterSettle> for VerificationTracker {
    async fn call(&self, event: &AfterSettle) -> Result<(), HookError> {
        self.forget(&event.context).await
    }
}

#[async_trait::async_trait]
impl Hook<SettleFailure> for VerificationTracker {
    async fn call(&self, event: &SettleFailure) -> Result<(), HookError> {
        self.forget(&event.context).await
    }
}

/// Periodically sweeps stale records from `store` until `cancellation_token` fires.
///
/// `interval` is raised to [`MIN_SWEEP_INTERVAL`] when shorter.
pub fn spawn_sweeper(
    store: Arc<dyn VerificationStore>,
    freshness: Duration,
    interval: Duration,
    cancellation_token: CancellationToken,
) -> JoinHandle<()> {
    if interval < MIN_SWEEP_INTERVAL {
        tracing::warn!(
            ?interval,
            minimum = ?MIN_SWEEP_INTERVAL,
            "Sweep interval too short, using the minimum"
        );
    }
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = store.sweep(freshness).await;
                    if removed > 0 {
                        tracing::debug!(removed, "Swept stale verification records");
                    }
                }
            }
        }
        tracing::debug!("Verification sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use x402_types::proto::v2::{PaymentPayload, PaymentRequirements, ResourceInfo};

    const FRESHNESS: Duration = Duration::from_secs(300);

    fn context(amount: &str) -> Arc<PaymentContext> {
        let requirements: PaymentRequirements = serde_json::from_value(serde_json::json!({
            "scheme": "exact",
            "network": "eip155:84532",
            "amount": amount,
            "payTo": "0x0000000000000000000000000000000000000001",
            "maxTimeoutSeconds": 60,
            "asset": "0x0000000000000000000000000000000000000002"
        }))
        .unwrap();
        let payload = PaymentPayload {
            x402_version: Default::default(),
            accepted: requirements.clone(),
            payload: serde_json::json!({"nonce": "n1", "b": 1, "a": 2}),
            resource: None,
            extensions: None,
        };
        Arc::new(PaymentContext::new(payload, requirements))
    }

    fn record(key: &VerificationKey) -> VerificationRecord {
        VerificationRecord::verified(key.clone(), "0xpayer".into())
    }

    #[test]
    fn test_key_is_stable_and_distinct() {
        let a = VerificationKey::derive(&context("100")).unwrap();
        let b = VerificationKey::derive(&context("100")).unwrap();
        let c = VerificationKey::derive(&context("101")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.network, ChainId::new("eip155", "84532"));
    }

    #[test]
    fn test_key_ignores_unsigned_payload_fields() {
        let plain = context("100");
        let mut decorated = (*plain).clone();
        decorated.payload.extensions = Some(serde_json::json!({"bazaar": {"listed": true}}));
        decorated.payload.resource = Some(ResourceInfo {
            description: "weather".into(),
            mime_type: "application/json".into(),
            url: "https://example.com/weather".into(),
        });
        assert_eq!(
            VerificationKey::derive(&plain).unwrap(),
            VerificationKey::derive(&decorated).unwrap()
        );

        let mut resigned = (*plain).clone();
        resigned.payload.payload["nonce"] = serde_json::json!("n2");
        assert_ne!(
            VerificationKey::derive(&plain).unwrap(),
            VerificationKey::derive(&resigned).unwrap()
        );
    }

    #[test]
    fn test_key_follows_payment_id() {
        let first = (*context("100")).clone().with_payment_id(Some("0xpayer:n1".into()));
        let mut reencoded = (*context("100")).clone().with_payment_id(Some("0xpayer:n1".into()));
        reencoded.payload.payload["b"] = serde_json::json!(3);
        let other = (*context("100")).clone().with_payment_id(Some("0xpayer:n2".into()));

        let key = VerificationKey::derive(&first).unwrap();
        assert_eq!(key, VerificationKey::derive(&reencoded).unwrap());
        assert_ne!(key, VerificationKey::derive(&other).unwrap());
    }

    #[test]
    fn test_canonicalize_sorts_nested_keys() {
        let value = serde_json::json!({"b": {"y": 1, "x": 2}, "a": [{"d": 1, "c": 2}]});
        let bytes = serde_json::to_string(&canonicalize(value)).unwrap();
        assert_eq!(bytes, r#"{"a":[{"c":2,"d":1}],"b":{"x":2,"y":1}}"#);
    }

    #[tokio::test]
    async fn test_claim_transitions_once() {
        let store = InMemoryVerificationStore::new();
        let key = VerificationKey::derive(&context("100")).unwrap();
        assert_eq!(store.claim(&key, FRESHNESS).await, ClaimOutcome::Missing);

        store.put(record(&key)).await;
        assert!(matches!(
            store.claim(&key, FRESHNESS).await,
            ClaimOutcome::Claimed(r) if r.state == RecordState::Settling
        ));
        assert_eq!(store.claim(&key, FRESHNESS).await, ClaimOutcome::InProgress);

        // Re-verifying while settling does not reset the claim
        assert!(!store.put(record(&key)).await);
        assert_eq!(store.claim(&key, FRESHNESS).await, ClaimOutcome::InProgress);

        store.delete(&key).await;
        assert_eq!(store.claim(&key, FRESHNESS).await, ClaimOutcome::Missing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_yield_one_winner() {
        let store = Arc::new(InMemoryVerificationStore::new());
        let key = VerificationKey::derive(&context("100")).unwrap();
        store.put(record(&key)).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.claim(&key, FRESHNESS).await
            }));
        }
        let mut claimed = 0;
        for handle in handles {
            if let ClaimOutcome::Claimed(_) = handle.await.unwrap() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_record_is_expired_on_claim() {
        let store = InMemoryVerificationStore::new();
        let key = VerificationKey::derive(&context("100")).unwrap();
        store.put(record(&key)).await;

        tokio::time::advance(FRESHNESS + Duration::from_secs(1)).await;
        assert_eq!(store.claim(&key, FRESHNESS).await, ClaimOutcome::Expired);
        assert!(store.get(&key).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_fresh_and_settling_records() {
        let store = InMemoryVerificationStore::new();
        let stale = VerificationKey::derive(&context("1")).unwrap();
        let settling = VerificationKey::derive(&context("2")).unwrap();
        store.put(record(&stale)).await;
        store.put(record(&settling)).await;
        store.claim(&settling, FRESHNESS).await;

        tokio::time::advance(FRESHNESS + Duration::from_secs(1)).await;
        let fresh = VerificationKey::derive(&context("3")).unwrap();
        store.put(record(&fresh)).await;

        assert_eq!(store.sweep(FRESHNESS).await, 1);
        assert!(store.get(&stale).await.is_none());
        assert!(store.get(&settling).await.is_some());
        assert!(store.get(&fresh).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_until_cancelled() {
        let store = Arc::new(InMemoryVerificationStore::new());
        let key = VerificationKey::derive(&context("100")).unwrap();
        store.put(record(&key)).await;

        let token = CancellationToken::new();
        let handle = spawn_sweeper(
            store.clone(),
            FRESHNESS,
            Duration::from_secs(60),
            token.clone(),
        );

        // Still fresh after the first sweep
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.len(), 1);

        // Gone once a sweep runs past the freshness window
        tokio::time::sleep(FRESHNESS).await;
        assert!(store.is_empty());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_sweep_interval_still_sweeps() {
        let store = Arc::new(InMemoryVerificationStore::new());
        let key = VerificationKey::derive(&context("100")).unwrap();
        store.put(record(&key)).await;

        let token = CancellationToken::new();
        let handle = spawn_sweeper(store.clone(), FRESHNESS, Duration::ZERO, token.clone());

        tokio::time::sleep(FRESHNESS + MIN_SWEEP_INTERVAL * 2).await;
        assert!(store.is_empty());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_tracker_gates_settlement() {
        let store: Arc<dyn VerificationStore> = Arc::new(InMemoryVerificationStore::new());
        let tracker = VerificationTracker::new(store.clone(), FRESHNESS);
        let context = context("100");

        // Never verified
        let decision = tracker
            .call(&BeforeSettle {
                context: context.clone(),
            })
            .await
            .unwrap();
        assert_eq!(decision, SettleDecision::abort(VERIFICATION_REQUIRED));

        // Verified, then claimed exactly once
        tracker
            .call(&AfterVerify {
                context: context.clone(),
                payer: "0xpayer".into(),
            })
            .await
            .unwrap();
        let before = BeforeSettle {
            context: context.clone(),
        };
        assert_eq!(
            tracker.call(&before).await.unwrap(),
            SettleDecision::Continue
        );
        assert_eq!(
            tracker.call(&before).await.unwrap(),
            SettleDecision::abort(SETTLEMENT_IN_PROGRESS)
        );

        // Failure releases the key
        tracker
            .call(&SettleFailure {
                context: context.clone(),
                reason: "timeout".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            tracker.call(&before).await.unwrap(),
            SettleDecision::abort(VERIFICATION_REQUIRED)
        );
    }
}
