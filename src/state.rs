use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::{Config, ProviderKind};
use crate::error::AppResult;
use crate::listings::ListingStore;
use crate::payments::{CallbackProvider, PaymentLedger, PaymentProvider, SimulatedProvider};
use crate::storage::{ChangeBus, DurableStorage, Reconcile};
use crate::users::UserDirectory;

pub type DbPool = Pool<SqliteConnectionManager>;

/// One execution context: its own caches over the shared durable storage.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub bus: ChangeBus,
    pub users: Arc<UserDirectory>,
    pub listings: Arc<ListingStore>,
    pub ledger: Arc<PaymentLedger>,
    pub payments: Arc<dyn PaymentProvider>,
}

impl AppState {
    pub fn new(db: DbPool, config: Config, storage: Arc<dyn DurableStorage>) -> AppResult<Self> {
        Self::with_bus(db, config, storage, ChangeBus::new())
    }

    /// Contexts sharing `bus` hear each other's writes immediately instead of
    /// waiting for the next poll.
    pub fn with_bus(
        db: DbPool,
        config: Config,
        storage: Arc<dyn DurableStorage>,
        bus: ChangeBus,
    ) -> AppResult<Self> {
        let users = UserDirectory::open(storage.clone(), bus.clone(), config.auth.bcrypt_cost)?;
        let listings = ListingStore::open(storage.clone(), bus.clone())?;
        let ledger = PaymentLedger::open(storage, bus.clone())?;

        let payments: Arc<dyn PaymentProvider> = match config.payments.provider {
            ProviderKind::Simulated => {
                Arc::new(SimulatedProvider::new(config.payments.simulated_delay()))
            }
            ProviderKind::Callback => {
                Arc::new(CallbackProvider::new(config.payments.callback_timeout()))
            }
        };
        tracing::info!("Payment provider: {}", payments.name());

        Ok(Self {
            db,
            config,
            bus,
            users: Arc::new(users),
            listings: Arc::new(listings),
            ledger: Arc::new(ledger),
            payments,
        })
    }

    /// Every store the background reconciler keeps in step with storage.
    pub fn reconcile_targets(&self) -> Vec<Arc<dyn Reconcile>> {
        let users: Arc<dyn Reconcile> = self.users.clone();
        let listings: Arc<dyn Reconcile> = self.listings.clone();
        let ledger: Arc<dyn Reconcile> = self.ledger.clone();
        vec![users, listings, ledger]
    }
}
