//! Payment unlock ledger: which users have paid to see which listing's contact details.

pub mod provider;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppResult;
use crate::storage::{ChangeBus, DurableStorage, Reconcile, SyncedCollection, PAID_PROPERTIES_KEY};

pub use self::provider::{
    CallbackProvider, PaymentProvider, PaymentRequest, ProviderOutcome, SimulatedProvider,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRecord {
    pub listing_id: String,
    pub user_id: String,
    pub amount: u64,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Unlocked,
    Cancelled,
}

/// Unlock records persisted under the `paidProperties` key. Records are never removed.
pub struct PaymentLedger {
    records: SyncedCollection<UnlockRecord>,
}

impl PaymentLedger {
    pub fn open(storage: Arc<dyn DurableStorage>, bus: ChangeBus) -> AppResult<Self> {
        Ok(Self {
            records: SyncedCollection::open(PAID_PROPERTIES_KEY, storage, bus)?,
        })
    }

    pub fn is_unlocked(&self, user_id: &str, listing_id: &str) -> AppResult<bool> {
        self.records.with_items(|records| {
            records
                .iter()
                .any(|r| r.user_id == user_id && r.listing_id == listing_id)
        })
    }

    /// Record an unlock. Idempotent; returns whether a new record was added.
    pub fn mark_unlocked(&self, user_id: &str, listing_id: &str, amount: u64) -> AppResult<bool> {
        let added = self.records.mutate(|records| {
            if records
                .iter()
                .any(|r| r.user_id == user_id && r.listing_id == listing_id)
            {
                return Ok(false);
            }
            records.push(UnlockRecord {
                listing_id: listing_id.to_string(),
                user_id: user_id.to_string(),
                amount,
                paid_at: Utc::now(),
            });
            Ok(true)
        })?;

        if added {
            tracing::info!("Listing {} unlocked for {}", listing_id, user_id);
        }
        Ok(added)
    }

    pub fn unlocked_for(&self, user_id: &str) -> AppResult<Vec<String>> {
        self.records.with_items(|records| {
            records
                .iter()
                .filter(|r| r.user_id == user_id)
                .map(|r| r.listing_id.clone())
                .collect()
        })
    }

    pub fn reload(&self) -> AppResult<()> {
        self.records.reload()
    }

    /// Run the payment and record the unlock if it completes. A cancelled
    /// payment leaves the ledger untouched.
    pub async fn request_payment(
        &self,
        provider: &dyn PaymentProvider,
        request: &PaymentRequest,
    ) -> AppResult<PaymentOutcome> {
        if self.is_unlocked(&request.user_id, &request.listing_id)? {
            return Ok(PaymentOutcome::Unlocked);
        }

        match provider.charge(request).await? {
            ProviderOutcome::Completed => {
                self.mark_unlocked(&request.user_id, &request.listing_id, request.amount)?;
                Ok(PaymentOutcome::Unlocked)
            }
            ProviderOutcome::Cancelled => {
                tracing::warn!(
                    "Payment {} cancelled via {}",
                    request.reference,
                    provider.name()
                );
                Ok(PaymentOutcome::Cancelled)
            }
        }
    }

    /// Apply a gateway callback. A completed payment is recorded here even if
    /// the payer stopped waiting on [`request_payment`](Self::request_payment).
    /// Returns `None` when the provider knows no such payment.
    pub async fn settle(
        &self,
        provider: &dyn PaymentProvider,
        reference: &str,
        outcome: ProviderOutcome,
    ) -> AppResult<Option<PaymentRequest>> {
        let Some(request) = provider.resolve(reference, outcome).await else {
            return Ok(None);
        };
        if outcome == ProviderOutcome::Completed {
            self.mark_unlocked(&request.user_id, &request.listing_id, request.amount)?;
        }
        Ok(Some(request))
    }
}

impl Reconcile for PaymentLedger {
    fn key(&self) -> &'static str {
        self.records.key()
    }

    fn reconcile(&self) -> AppResult<bool> {
        self.records.reconcile()
    }
}
