use alloy_primitives::Address;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use alloy_transport::TransportResult;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Nonce manager that allocates nonces locally, seeded from the pending block.
///
/// The first nonce for an address is read with `eth_getTransactionCount(.., "pending")`, so
/// transactions still in the mempool after a restart are not reused. Later nonces are
/// incremented locally. Each signer address has its own lock, so signers can submit
/// concurrently while two transactions of one signer never get the same nonce.
///
/// After a failed submission or receipt wait the real nonce is unknown; [`reset_nonce`]
/// forgets it and the next allocation reads the chain again.
///
/// [`reset_nonce`]: PendingNonceManager::reset_nonce
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    last_issued: Arc<DashMap<Address, Arc<Mutex<Option<u64>>>>>,
}

#[async_trait::async_trait]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: alloy_network::Network,
    {
        // Clone the slot out so the dashmap shard is not locked across the RPC call
        let slot = self.last_issued.entry(address).or_default().value().clone();
        let mut last_issued = slot.lock().await;
        let next = match *last_issued {
            Some(nonce) => nonce + 1,
            None => {
                tracing::trace!(%address, "fetching pending nonce");
                provider.get_transaction_count(address).pending().await?
            }
        };
        *last_issued = Some(next);
        Ok(next)
    }
}

impl PendingNonceManager {
    /// Forgets the locally tracked nonce of `address`.
    pub async fn reset_nonce(&self, address: Address) {
        let slot = self.last_issued.get(&address).map(|slot| slot.value().clone());
        if let Some(slot) = slot {
            *slot.lock().await = None;
            tracing::debug!(%address, "nonce reset, next transaction re-reads the pending nonce");
        }
    }

    /// The last nonce handed out for `address`, if it is still trusted.
    pub async fn last_issued(&self, address: Address) -> Option<u64> {
        let slot = self.last_issued.get(&address).map(|slot| slot.value().clone())?;
        *slot.lock().await
    }
}
