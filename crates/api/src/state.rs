//! Shared application state and backend selection.

use std::sync::Arc;

use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use ledger::{
    AuditLog, InMemoryAuditLog, InMemoryInventoryLedger, InMemoryWalletLedger, InventoryLedger,
    PostgresAuditLog, PostgresInventoryLedger, PostgresWalletLedger, WalletLedger,
};
use saga::{
    ConnectionRegistry, InMemoryCatalog, OrderSagaCoordinator, QueueDispatcher, RegistrySink,
    WorkerHandle,
};
use sqlx::PgPool;

use crate::config::Config;

pub type Coordinator = OrderSagaCoordinator<Arc<dyn EventStore>>;

/// Storage for events, ledgers and the audit trail.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn EventStore>,
    pub inventory: Arc<dyn InventoryLedger>,
    pub wallets: Arc<dyn WalletLedger>,
    pub audit: Arc<dyn AuditLog>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryEventStore::new()),
            inventory: Arc::new(InMemoryInventoryLedger::new()),
            wallets: Arc::new(InMemoryWalletLedger::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            store: Arc::new(PostgresEventStore::new(pool.clone())),
            inventory: Arc::new(PostgresInventoryLedger::new(pool.clone())),
            wallets: Arc::new(PostgresWalletLedger::new(pool.clone())),
            audit: Arc::new(PostgresAuditLog::new(pool)),
        }
    }
}

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub catalog: InMemoryCatalog,
    pub registry: ConnectionRegistry,
}

impl AppState {
    /// Wires the coordinator and starts the notification worker, which
    /// delivers to sessions in `registry`.
    pub fn new(backends: Backends, config: &Config) -> (Self, WorkerHandle) {
        let catalog = InMemoryCatalog::new();
        let registry = ConnectionRegistry::new();
        let (dispatcher, worker) =
            QueueDispatcher::spawn(Arc::new(RegistrySink::new(registry.clone())), config.queue());

        let coordinator = OrderSagaCoordinator::new(
            backends.store,
            Arc::new(catalog.clone()),
            backends.inventory,
            backends.wallets,
            backends.audit,
            Arc::new(dispatcher),
        )
        .with_pricing(config.pricing())
        .with_config(config.coordinator());

        let state = Self {
            coordinator: Arc::new(coordinator),
            catalog,
            registry,
        };
        (state, worker)
    }
}
