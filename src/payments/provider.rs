use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

use crate::auth::Session;
use crate::error::{AppError, AppResult};

/// One attempt to pay for a listing's contact details.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub reference: String,
    pub listing_id: String,
    pub user_id: String,
    pub email: String,
    pub amount: u64,
    pub currency: String,
}

impl PaymentRequest {
    pub fn new(listing_id: &str, payer: &Session, amount: u64, currency: &str) -> Self {
        Self {
            reference: format!(
                "property_{}_{}_{:08x}",
                listing_id,
                Utc::now().timestamp_millis(),
                rand::thread_rng().gen::<u32>()
            ),
            listing_id: listing_id.to_string(),
            user_id: payer.user_id.clone(),
            email: payer.email.clone(),
            amount,
            currency: currency.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOutcome {
    Completed,
    Cancelled,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Suspends until the payment completes or is cancelled.
    async fn charge(&self, request: &PaymentRequest) -> AppResult<ProviderOutcome>;

    /// Deliver a gateway callback. Returns the request it settles, or `None`
    /// when no payment with this reference is outstanding.
    async fn resolve(&self, _reference: &str, _outcome: ProviderOutcome) -> Option<PaymentRequest> {
        None
    }
}

/// Stand-in used when no gateway is configured: every charge succeeds after `delay`.
pub struct SimulatedProvider {
    delay: Duration,
}

impl SimulatedProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PaymentProvider for SimulatedProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn charge(&self, request: &PaymentRequest) -> AppResult<ProviderOutcome> {
        tracing::info!(
            "Simulating payment {} of {} {}",
            request.reference,
            request.amount,
            request.currency
        );
        tokio::time::sleep(self.delay).await;
        Ok(ProviderOutcome::Completed)
    }
}

/// Gateway-driven payments: `charge` parks until the gateway calls back
/// through [`resolve`](PaymentProvider::resolve) or the timeout passes.
///
/// An outstanding payment outlives the caller waiting on it, so a callback
/// that arrives after the payer went away still settles the request. Entries
/// are dropped once their timeout has passed.
pub struct CallbackProvider {
    pending: Mutex<HashMap<String, PendingPayment>>,
    timeout: Duration,
}

struct PendingPayment {
    request: PaymentRequest,
    deadline: Instant,
    waiter: oneshot::Sender<ProviderOutcome>,
}

fn prune_expired(pending: &mut HashMap<String, PendingPayment>) {
    let now = Instant::now();
    pending.retain(|reference, payment| {
        let live = payment.deadline > now;
        if !live {
            tracing::warn!("Payment {} expired without a gateway callback", reference);
        }
        live
    });
}

impl CallbackProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn pending_count(&self) -> usize {
        let mut pending = self.pending.lock().await;
        prune_expired(&mut pending);
        pending.len()
    }
}

#[async_trait]
impl PaymentProvider for CallbackProvider {
    fn name(&self) -> &'static str {
        "callback"
    }

    async fn charge(&self, request: &PaymentRequest) -> AppResult<ProviderOutcome> {
        let rx = {
            let mut pending = self.pending.lock().await;
            prune_expired(&mut pending);
            if pending.contains_key(&request.reference) {
                return Err(AppError::BadRequest("Payment already in progress".into()));
            }
            let (waiter, rx) = oneshot::channel();
            pending.insert(
                request.reference.clone(),
                PendingPayment {
                    request: request.clone(),
                    deadline: Instant::now() + self.timeout,
                    waiter,
                },
            );
            rx
        };
        tracing::info!("Awaiting gateway callback for {}", request.reference);

        let outcome = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => ProviderOutcome::Cancelled,
            Err(_) => {
                tracing::warn!("Payment {} timed out waiting for gateway", request.reference);
                ProviderOutcome::Cancelled
            }
        };

        self.pending.lock().await.remove(&request.reference);
        Ok(outcome)
    }

    async fn resolve(&self, reference: &str, outcome: ProviderOutcome) -> Option<PaymentRequest> {
        let payment = {
            let mut pending = self.pending.lock().await;
            prune_expired(&mut pending);
            pending.remove(reference)
        };
        let Some(payment) = payment else {
            tracing::warn!("Callback for unknown payment {}", reference);
            return None;
        };

        if payment.waiter.send(outcome).is_err() {
            tracing::info!("Payer for {} stopped waiting; settling from callback", reference);
        }
        Some(payment.request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::Role;
    use std::sync::Arc;

    fn request(reference: &str) -> PaymentRequest {
        PaymentRequest {
            reference: reference.to_string(),
            listing_id: "l1".to_string(),
            user_id: "u1".to_string(),
            email: "ada@example.com".to_string(),
            amount: 2000,
            currency: "NGN".to_string(),
        }
    }

    #[test]
    fn reference_names_the_listing() {
        let payer = Session {
            user_id: "u1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            role: Role::Buyer,
        };
        let req = PaymentRequest::new("abc", &payer, 2000, "NGN");
        assert!(req.reference.starts_with("property_abc_"));
        assert_eq!(req.reference.split('_').count(), 4);
        assert_eq!(req.email, "ada@example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_provider_completes_after_delay() {
        let provider = SimulatedProvider::new(Duration::from_millis(1500));
        let started = tokio::time::Instant::now();

        let outcome = provider.charge(&request("r1")).await.unwrap();

        assert_eq!(outcome, ProviderOutcome::Completed);
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert!(provider.resolve("r1", ProviderOutcome::Cancelled).await.is_none());
    }

    #[tokio::test]
    async fn callback_provider_waits_for_gateway() {
        let provider = Arc::new(CallbackProvider::new(Duration::from_secs(30)));
        let charging = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.charge(&request("r1")).await })
        };

        while provider.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }
        let settled = provider.resolve("r1", ProviderOutcome::Completed).await;
        assert_eq!(settled.map(|r| r.user_id), Some("u1".to_string()));

        let outcome = charging.await.unwrap().unwrap();
        assert_eq!(outcome, ProviderOutcome::Completed);
        assert_eq!(provider.pending_count().await, 0);
    }

    #[tokio::test]
    async fn callback_provider_reports_cancellation() {
        let provider = Arc::new(CallbackProvider::new(Duration::from_secs(30)));
        let charging = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.charge(&request("r2")).await })
        };

        while provider.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }
        assert!(provider.resolve("r2", ProviderOutcome::Cancelled).await.is_some());
        assert_eq!(charging.await.unwrap().unwrap(), ProviderOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_provider_times_out_as_cancelled() {
        let provider = CallbackProvider::new(Duration::from_secs(5));
        let outcome = provider.charge(&request("r3")).await.unwrap();
        assert_eq!(outcome, ProviderOutcome::Cancelled);
        assert_eq!(provider.pending_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_reference_is_not_resolved() {
        let provider = CallbackProvider::new(Duration::from_secs(5));
        assert!(provider.resolve("nope", ProviderOutcome::Completed).await.is_none());
    }

    #[test]
    fn concurrent_payers_get_distinct_references() {
        let payer = |user_id: &str| Session {
            user_id: user_id.to_string(),
            name: "Payer".to_string(),
            email: format!("{}@example.com", user_id),
            role: Role::Buyer,
        };
        let a = PaymentRequest::new("abc", &payer("u1"), 2000, "NGN");
        let b = PaymentRequest::new("abc", &payer("u2"), 2000, "NGN");
        assert_ne!(a.reference, b.reference);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_payment_is_still_settled_by_callback() {
        let provider = Arc::new(CallbackProvider::new(Duration::from_secs(60)));
        let charging = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.charge(&request("r4")).await })
        };
        while provider.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }

        charging.abort();
        assert!(charging.await.unwrap_err().is_cancelled());

        let settled = provider.resolve("r4", ProviderOutcome::Completed).await;
        assert_eq!(settled.map(|r| r.listing_id), Some("l1".to_string()));
        assert_eq!(provider.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_payment_expires_after_timeout() {
        let provider = Arc::new(CallbackProvider::new(Duration::from_secs(60)));
        let charging = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.charge(&request("r5")).await })
        };
        while provider.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }
        charging.abort();
        let _ = charging.await;
        assert_eq!(provider.pending_count().await, 1);

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(provider.pending_count().await, 0);
        assert!(provider.resolve("r5", ProviderOutcome::Completed).await.is_none());
    }
}
