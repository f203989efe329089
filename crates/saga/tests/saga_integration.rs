//! End-to-end order workflows against the in-memory ledgers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{
    Actor, Money, OrderId, PaymentId, PaymentMethod, PaymentStatus, ProductId, Role, UserId,
    WarehouseId,
};
use domain::{Address, CompensationState, OrderStatus};
use event_store::InMemoryEventStore;
use ledger::{
    Adjustment, AuditOutcome, InMemoryAuditLog, InMemoryInventoryLedger, InMemoryWalletLedger,
    InventoryLedger, InventoryRecord, LedgerError, MovementType, Payment, Posting, Reference,
    Reservation, StockAlert, StockLevel, StockMovement, TransactionType, Transfer, Wallet,
    WalletLedger, WalletStatus, WalletTransaction,
};
use saga::{
    CoordinatorConfig, CreateOrder, InMemoryCatalog, NotificationType, OrderLine, OrderReceipt,
    OrderSagaCoordinator, PaymentRequest, Product, QueueConfig, QueueDispatcher, RecordingSink,
    SagaError, StockAdjustment,
};
use tokio::sync::{Mutex, Notify, oneshot};
use uuid::Uuid;

fn pool_timeout() -> LedgerError {
    LedgerError::Database(sqlx::Error::PoolTimedOut)
}

/// Takes one from `counter` if it is positive. True when a failure is due.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Inventory ledger with scripted failures.
struct FlakyInventory {
    inner: InMemoryInventoryLedger,
    release_failures: AtomicU32,
    commit_failures: AtomicU32,
    /// Reserves that succeed before one fails; `u32::MAX` never fails.
    reserves_before_failure: AtomicU32,
}

impl FlakyInventory {
    fn new() -> Self {
        Self {
            inner: InMemoryInventoryLedger::new(),
            release_failures: AtomicU32::new(0),
            commit_failures: AtomicU32::new(0),
            reserves_before_failure: AtomicU32::new(u32::MAX),
        }
    }

    fn fail_releases(&self, n: u32) {
        self.release_failures.store(n, Ordering::SeqCst);
    }

    fn fail_commits(&self, n: u32) {
        self.commit_failures.store(n, Ordering::SeqCst);
    }

    fn fail_reserve_after(&self, n: u32) {
        self.reserves_before_failure.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl InventoryLedger for FlakyInventory {
    async fn reserve(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: u32,
        reference: &Reference,
        performed_by: Option<UserId>,
    ) -> ledger::Result<Reservation> {
        let left = self.reserves_before_failure.load(Ordering::SeqCst);
        if left != u32::MAX {
            if left == 0 {
                self.reserves_before_failure.store(u32::MAX, Ordering::SeqCst);
                return Err(LedgerError::InsufficientStock {
                    product_id,
                    warehouse_id,
                    requested: i64::from(quantity),
                    available: 0,
                });
            }
            self.reserves_before_failure.store(left - 1, Ordering::SeqCst);
        }
        self.inner
            .reserve(product_id, warehouse_id, quantity, reference, performed_by)
            .await
    }

    async fn release(
        &self,
        reference: &Reference,
        performed_by: Option<UserId>,
    ) -> ledger::Result<u64> {
        if take_failure(&self.release_failures) {
            return Err(pool_timeout());
        }
        self.inner.release(reference, performed_by).await
    }

    async fn commit(
        &self,
        reference: &Reference,
        performed_by: Option<UserId>,
    ) -> ledger::Result<u64> {
        if take_failure(&self.commit_failures) {
            return Err(pool_timeout());
        }
        self.inner.commit(reference, performed_by).await
    }

    async fn transfer(
        &self,
        transfer: Transfer,
    ) -> ledger::Result<(InventoryRecord, InventoryRecord)> {
        self.inner.transfer(transfer).await
    }

    async fn adjust(&self, adjustment: Adjustment) -> ledger::Result<InventoryRecord> {
        self.inner.adjust(adjustment).await
    }

    async fn stock(&self, product_id: ProductId) -> ledger::Result<StockLevel> {
        self.inner.stock(product_id).await
    }

    async fn record(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> ledger::Result<Option<InventoryRecord>> {
        self.inner.record(product_id, warehouse_id).await
    }

    async fn movements(
        &self,
        product_id: ProductId,
        limit: usize,
    ) -> ledger::Result<Vec<StockMovement>> {
        self.inner.movements(product_id, limit).await
    }

    async fn alerts(&self, include_acknowledged: bool) -> ledger::Result<Vec<StockAlert>> {
        self.inner.alerts(include_acknowledged).await
    }

    async fn acknowledge_alert(&self, alert_id: Uuid, user: UserId) -> ledger::Result<StockAlert> {
        self.inner.acknowledge_alert(alert_id, user).await
    }

    async fn configure_thresholds(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        low_stock_threshold: i64,
        max_stock_level: Option<i64>,
    ) -> ledger::Result<InventoryRecord> {
        self.inner
            .configure_thresholds(product_id, warehouse_id, low_stock_threshold, max_stock_level)
            .await
    }

    async fn active_reservations(&self) -> ledger::Result<Vec<Reservation>> {
        self.inner.active_reservations().await
    }
}

/// Wallet ledger whose refunds can fail and whose next payment completion
/// can be held until the test lets it through.
struct FlakyWallet {
    inner: InMemoryWalletLedger,
    refund_failures: AtomicU32,
    completion_gate: Mutex<Option<oneshot::Receiver<()>>>,
    completion_reached: Notify,
}

impl FlakyWallet {
    fn new() -> Self {
        Self {
            inner: InMemoryWalletLedger::new(),
            refund_failures: AtomicU32::new(0),
            completion_gate: Mutex::new(None),
            completion_reached: Notify::new(),
        }
    }

    fn fail_refunds(&self, n: u32) {
        self.refund_failures.store(n, Ordering::SeqCst);
    }

    /// Holds the next `complete_payment` until the returned sender fires.
    async fn hold_next_completion(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.completion_gate.lock().await = Some(gate);
        release
    }
}

#[async_trait]
impl WalletLedger for FlakyWallet {
    async fn get_balance(&self, user_id: UserId) -> ledger::Result<Wallet> {
        self.inner.get_balance(user_id).await
    }

    async fn debit(&self, user_id: UserId, posting: Posting) -> ledger::Result<WalletTransaction> {
        self.inner.debit(user_id, posting).await
    }

    async fn credit(&self, user_id: UserId, posting: Posting) -> ledger::Result<WalletTransaction> {
        self.inner.credit(user_id, posting).await
    }

    async fn transfer(
        &self,
        sender: UserId,
        recipient: UserId,
        amount: Money,
        kyc_level: u8,
        description: Option<String>,
    ) -> ledger::Result<(WalletTransaction, WalletTransaction)> {
        self.inner
            .transfer(sender, recipient, amount, kyc_level, description)
            .await
    }

    async fn enforce_daily_limit(
        &self,
        user_id: UserId,
        transaction_type: TransactionType,
        amount: Money,
        kyc_level: u8,
    ) -> ledger::Result<()> {
        self.inner
            .enforce_daily_limit(user_id, transaction_type, amount, kyc_level)
            .await
    }

    async fn deposit(
        &self,
        user_id: UserId,
        amount: Money,
        kyc_level: u8,
        reference: Option<String>,
    ) -> ledger::Result<WalletTransaction> {
        self.inner.deposit(user_id, amount, kyc_level, reference).await
    }

    async fn capture_payment(
        &self,
        order_id: OrderId,
        payer: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> ledger::Result<Payment> {
        self.inner.capture_payment(order_id, payer, amount, method).await
    }

    async fn complete_payment(
        &self,
        payment_id: PaymentId,
        success: bool,
    ) -> ledger::Result<Payment> {
        let gate = self.completion_gate.lock().await.take();
        if let Some(gate) = gate {
            self.completion_reached.notify_one();
            let _ = gate.await;
        }
        self.inner.complete_payment(payment_id, success).await
    }

    async fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<Money>,
        reason: &str,
    ) -> ledger::Result<Payment> {
        if take_failure(&self.refund_failures) {
            return Err(pool_timeout());
        }
        self.inner.refund(payment_id, amount, reason).await
    }

    async fn payment(&self, payment_id: PaymentId) -> ledger::Result<Option<Payment>> {
        self.inner.payment(payment_id).await
    }

    async fn transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> ledger::Result<Vec<WalletTransaction>> {
        self.inner.transactions(user_id, limit).await
    }

    async fn set_status(&self, user_id: UserId, status: WalletStatus) -> ledger::Result<Wallet> {
        self.inner.set_status(user_id, status).await
    }
}

struct Harness {
    coordinator: OrderSagaCoordinator<InMemoryEventStore>,
    catalog: InMemoryCatalog,
    inventory: Arc<dyn InventoryLedger>,
    wallets: Arc<dyn WalletLedger>,
    audit: Arc<InMemoryAuditLog>,
    sink: RecordingSink,
    customer: Actor,
    retailer: Actor,
    admin: Actor,
}

impl Harness {
    fn new() -> Self {
        Self::with_inventory(Arc::new(InMemoryInventoryLedger::new()))
    }

    fn with_inventory(inventory: Arc<dyn InventoryLedger>) -> Self {
        Self::with_ledgers(inventory, Arc::new(InMemoryWalletLedger::new()))
    }

    fn with_wallets(wallets: Arc<dyn WalletLedger>) -> Self {
        Self::with_ledgers(Arc::new(InMemoryInventoryLedger::new()), wallets)
    }

    fn with_ledgers(inventory: Arc<dyn InventoryLedger>, wallets: Arc<dyn WalletLedger>) -> Self {
        let catalog = InMemoryCatalog::new();
        let audit = Arc::new(InMemoryAuditLog::new());
        let sink = RecordingSink::new();
        let (dispatcher, _worker) = QueueDispatcher::spawn(
            Arc::new(sink.clone()),
            QueueConfig {
                max_attempts: 3,
                retry_backoff: Duration::from_millis(1),
            },
        );

        let coordinator = OrderSagaCoordinator::new(
            InMemoryEventStore::new(),
            Arc::new(catalog.clone()),
            inventory.clone(),
            wallets.clone(),
            audit.clone(),
            Arc::new(dispatcher),
        )
        .with_config(CoordinatorConfig {
            compensation_max_attempts: 3,
            compensation_backoff: Duration::from_millis(1),
            recovery_grace: Duration::ZERO,
        });

        Self {
            coordinator,
            catalog,
            inventory,
            wallets,
            audit,
            sink,
            customer: Actor::new(UserId::new(), Role::Customer),
            retailer: Actor::new(UserId::new(), Role::Retailer),
            admin: Actor::new(UserId::new(), Role::Admin),
        }
    }

    /// Adds an active product priced at `price` with `stock` units per warehouse.
    async fn product(&self, price: i64, stock: &[(WarehouseId, i64)]) -> ProductId {
        let product = Product::new(self.retailer.id, "Maize flour 2kg", Money::from_major(price));
        let product_id = product.id;
        self.catalog.upsert(product).await;
        for (warehouse_id, units) in stock {
            self.inventory
                .adjust(Adjustment::new(product_id, *warehouse_id, *units, MovementType::Received))
                .await
                .unwrap();
        }
        product_id
    }

    fn request(&self, product_id: ProductId, quantity: u32) -> CreateOrder {
        CreateOrder {
            retailer_id: self.retailer.id,
            items: vec![OrderLine {
                product_id,
                variant_id: None,
                quantity,
            }],
            shipping_address: address(),
            billing_address: None,
            payment_method: PaymentMethod::Wallet,
            customer_notes: Some("Leave at the gate".to_string()),
        }
    }

    async fn place(&self, product_id: ProductId, quantity: u32) -> OrderReceipt {
        self.coordinator
            .create_order(&self.customer, self.request(product_id, quantity))
            .await
            .unwrap()
    }

    async fn fund(&self, major: i64) {
        self.wallets
            .deposit(self.customer.id, Money::from_major(major), 0, None)
            .await
            .unwrap();
    }

    async fn advance(&self, receipt: &OrderReceipt, path: &[OrderStatus]) {
        for status in path {
            self.coordinator
                .update_status(&self.retailer, receipt.id, *status, None)
                .await
                .unwrap();
        }
    }
}

fn address() -> Address {
    Address {
        recipient_name: "Wanjiru Kamau".into(),
        phone: "+254712345678".into(),
        address_line1: "45 Kenyatta Avenue".into(),
        address_line2: None,
        city: "Nairobi".into(),
        province: "Nairobi".into(),
        postal_code: Some("00100".into()),
        latitude: None,
        longitude: None,
        delivery_instructions: None,
    }
}

#[tokio::test]
async fn create_order_prices_reserves_and_notifies() {
    let h = Harness::new();
    let warehouse = WarehouseId::new();
    let product = h.product(100, &[(warehouse, 10)]).await;

    let receipt = h.place(product, 2).await;

    // 200 subtotal + 16% tax + 25 shipping
    assert_eq!(receipt.total_amount, Money::from_major(257));
    assert_eq!(receipt.status, OrderStatus::Pending);
    assert!(receipt.order_number.as_str().starts_with("ORD-"));

    let stock = h.inventory.stock(product).await.unwrap();
    assert_eq!(stock.reserved, 2);
    assert_eq!(stock.available, 8);

    let delivered = h.sink.wait_for(1).await;
    assert_eq!(delivered[0].event_type, NotificationType::OrderPlaced);
    assert_eq!(delivered[0].user_id, h.customer.id);

    let audit = h.audit.all().await;
    assert!(
        audit.iter().any(|r| r.action == "order.created" && r.resource_id == receipt.id.to_string())
    );
}

#[tokio::test]
async fn insufficient_stock_leaves_nothing_reserved() {
    let h = Harness::new();
    let warehouse = WarehouseId::new();
    let plenty = h.product(10, &[(warehouse, 50)]).await;
    let scarce = h.product(10, &[(warehouse, 1)]).await;

    let mut request = h.request(plenty, 5);
    request.items.push(OrderLine {
        product_id: scarce,
        variant_id: None,
        quantity: 2,
    });

    let err = h.coordinator.create_order(&h.customer, request).await.unwrap_err();
    assert!(matches!(err, SagaError::InsufficientStock(_)));

    assert_eq!(h.inventory.stock(plenty).await.unwrap().reserved, 0);
    assert_eq!(h.inventory.stock(scarce).await.unwrap().reserved, 0);
    assert!(h.coordinator.order_service().order_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn a_failed_reservation_releases_the_lines_already_reserved() {
    let inventory = Arc::new(FlakyInventory::new());
    let h = Harness::with_inventory(inventory.clone());
    let small = WarehouseId::new();
    let large = WarehouseId::new();
    let product = h.product(40, &[(small, 3), (large, 5)]).await;

    inventory.fail_reserve_after(1);
    let err = h
        .coordinator
        .create_order(&h.customer, h.request(product, 6))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InsufficientStock(_)));

    let stock = h.inventory.stock(product).await.unwrap();
    assert_eq!(stock.reserved, 0);
    assert_eq!(stock.available, 8);
    assert!(h.inventory.active_reservations().await.unwrap().is_empty());
    assert!(h.coordinator.order_service().order_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_orders_never_oversell() {
    let h = Harness::new();
    let product = h.product(10, &[(WarehouseId::new(), 5)]).await;
    let other = Actor::new(UserId::new(), Role::Customer);

    let (a, b) = tokio::join!(
        h.coordinator.create_order(&h.customer, h.request(product, 3)),
        h.coordinator.create_order(&other, h.request(product, 3)),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(failure, SagaError::InsufficientStock(_)));

    let stock = h.inventory.stock(product).await.unwrap();
    assert_eq!(stock.reserved, 3);
    assert_eq!(stock.available, 2);
    assert_eq!(h.coordinator.order_service().order_ids().await.unwrap().len(), 1);
}

#[tokio::test]
async fn a_line_is_split_across_warehouses_most_stock_first() {
    let h = Harness::new();
    let small = WarehouseId::new();
    let large = WarehouseId::new();
    let product = h.product(40, &[(small, 3), (large, 5)]).await;

    let receipt = h.place(product, 6).await;
    let order = h.coordinator.get_order(&h.customer, receipt.id).await.unwrap();

    let from = |warehouse| -> u32 {
        order
            .items()
            .iter()
            .filter(|i| i.warehouse_id == warehouse)
            .map(|i| i.quantity)
            .sum()
    };
    let (from_large, from_small) = (from(large), from(small));
    assert_eq!((from_large, from_small), (5, 1));
    assert_eq!(order.total_quantity(), 6);
    assert_eq!(h.inventory.stock(product).await.unwrap().available, 2);
}

#[tokio::test]
async fn unknown_products_are_not_found() {
    let h = Harness::new();
    let err = h
        .coordinator
        .create_order(&h.customer, h.request(ProductId::new(), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::NotFound(_)));
}

#[tokio::test]
async fn only_customers_can_place_orders() {
    let h = Harness::new();
    let product = h.product(10, &[(WarehouseId::new(), 5)]).await;
    let err = h
        .coordinator
        .create_order(&h.retailer, h.request(product, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Forbidden(_)));
}

#[tokio::test]
async fn cancelling_releases_only_that_orders_stock() {
    let h = Harness::new();
    let product = h.product(15, &[(WarehouseId::new(), 20)]).await;
    let keep = h.place(product, 3).await;
    let cancel = h.place(product, 4).await;

    let order = h
        .coordinator
        .update_status(
            &h.customer,
            cancel.id,
            OrderStatus::Cancelled,
            Some("Changed my mind".into()),
        )
        .await
        .unwrap();

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(order.compensation(), CompensationState::Completed);
    let stock = h.inventory.stock(product).await.unwrap();
    assert_eq!(stock.reserved, 3);
    assert_eq!(stock.available, 17);

    let kept = h.coordinator.get_order(&h.customer, keep.id).await.unwrap();
    assert_eq!(kept.status(), OrderStatus::Pending);

    let delivered = h.sink.wait_for(3).await;
    let cancellations: Vec<_> = delivered
        .iter()
        .filter(|n| n.event_type == NotificationType::OrderCancelled)
        .collect();
    assert_eq!(cancellations.len(), 1);
    assert_eq!(cancellations[0].user_id, h.customer.id);
}

#[tokio::test]
async fn invalid_transitions_change_nothing() {
    let h = Harness::new();
    let product = h.product(15, &[(WarehouseId::new(), 5)]).await;
    let receipt = h.place(product, 1).await;

    let err = h
        .coordinator
        .update_status(&h.retailer, receipt.id, OrderStatus::Delivered, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InvalidTransition(_)));

    let order = h.coordinator.get_order(&h.retailer, receipt.id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(h.inventory.stock(product).await.unwrap().reserved, 1);
}

#[tokio::test]
async fn customers_cannot_confirm_their_own_orders() {
    let h = Harness::new();
    let product = h.product(15, &[(WarehouseId::new(), 5)]).await;
    let receipt = h.place(product, 1).await;

    let err = h
        .coordinator
        .update_status(&h.customer, receipt.id, OrderStatus::Confirmed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Forbidden(_)));
}

#[tokio::test]
async fn confirming_a_wallet_order_captures_payment() {
    let h = Harness::new();
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    h.fund(500).await;
    let receipt = h.place(product, 2).await;

    let order = h
        .coordinator
        .update_status(&h.retailer, receipt.id, OrderStatus::Confirmed, None)
        .await
        .unwrap();

    assert_eq!(order.payment_status(), PaymentStatus::Completed);
    assert!(order.payment_id().is_some());
    let wallet = h.wallets.get_balance(h.customer.id).await.unwrap();
    assert_eq!(wallet.balance, Money::from_major(243));
}

#[tokio::test]
async fn confirming_without_funds_fails_and_keeps_the_order_pending() {
    let h = Harness::new();
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    let receipt = h.place(product, 2).await;

    let err = h
        .coordinator
        .update_status(&h.retailer, receipt.id, OrderStatus::Confirmed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InsufficientFunds(_)));

    let order = h.coordinator.get_order(&h.retailer, receipt.id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.payment_status(), PaymentStatus::Failed);
}

#[tokio::test]
async fn cancelling_a_paid_order_refunds_the_wallet() {
    let h = Harness::new();
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    h.fund(500).await;
    let receipt = h.place(product, 2).await;
    h.advance(&receipt, &[OrderStatus::Confirmed, OrderStatus::Processing]).await;

    let order = h
        .coordinator
        .update_status(&h.admin, receipt.id, OrderStatus::Cancelled, None)
        .await
        .unwrap();

    assert_eq!(order.compensation(), CompensationState::Completed);
    assert_eq!(order.payment_status(), PaymentStatus::Refunded);
    let wallet = h.wallets.get_balance(h.customer.id).await.unwrap();
    assert_eq!(wallet.balance, Money::from_major(500));
    assert_eq!(h.inventory.stock(product).await.unwrap().reserved, 0);
}

#[tokio::test]
async fn out_for_delivery_commits_the_reservation() {
    let h = Harness::new();
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    h.fund(500).await;
    let receipt = h.place(product, 2).await;

    h.advance(
        &receipt,
        &[
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::ReadyForPickup,
            OrderStatus::OutForDelivery,
        ],
    )
    .await;

    let order = h.coordinator.get_order(&h.retailer, receipt.id).await.unwrap();
    assert!(order.reservation_committed());
    let stock = h.inventory.stock(product).await.unwrap();
    assert_eq!(stock.on_hand, 3);
    assert_eq!(stock.reserved, 0);

    h.advance(&receipt, &[OrderStatus::Delivered]).await;
    let delivered = h.sink.wait_for(6).await;
    let kinds: Vec<_> = delivered.iter().map(|n| n.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            NotificationType::OrderPlaced,
            NotificationType::OrderConfirmed,
            NotificationType::OrderProcessing,
            NotificationType::OrderReady,
            NotificationType::OrderShipped,
            NotificationType::OrderDelivered,
        ]
    );
}

#[tokio::test]
async fn concurrent_cancellations_apply_once() {
    let h = Harness::new();
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    h.fund(500).await;
    let receipt = h.place(product, 2).await;
    h.advance(&receipt, &[OrderStatus::Confirmed]).await;

    let (a, b) = tokio::join!(
        h.coordinator.update_status(&h.retailer, receipt.id, OrderStatus::Cancelled, None),
        h.coordinator.update_status(&h.admin, receipt.id, OrderStatus::Cancelled, None),
    );
    assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);

    let wallet = h.wallets.get_balance(h.customer.id).await.unwrap();
    assert_eq!(wallet.balance, Money::from_major(500));
    assert_eq!(h.inventory.stock(product).await.unwrap().available, 5);
}

#[tokio::test]
async fn failed_compensation_is_recorded_and_recovered() {
    let inventory = Arc::new(FlakyInventory::new());
    let h = Harness::with_inventory(inventory.clone());
    let product = h.product(20, &[(WarehouseId::new(), 10)]).await;
    let receipt = h.place(product, 4).await;

    inventory.fail_releases(3);
    let order = h
        .coordinator
        .update_status(&h.customer, receipt.id, OrderStatus::Cancelled, None)
        .await
        .unwrap();

    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_eq!(order.compensation(), CompensationState::Failed);
    assert!(order.compensation_error().is_some());
    assert_eq!(h.inventory.stock(product).await.unwrap().reserved, 4);

    let failures: Vec<_> = h
        .audit
        .all()
        .await
        .into_iter()
        .filter(|r| r.action == "compensation.failed")
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].outcome, AuditOutcome::Failed);

    let report = h.coordinator.recover().await.unwrap();
    assert_eq!(report.compensations_resumed, 1);
    assert_eq!(report.compensations_failed, 0);

    let order = h.coordinator.get_order(&h.customer, receipt.id).await.unwrap();
    assert_eq!(order.compensation(), CompensationState::Completed);
    assert_eq!(h.inventory.stock(product).await.unwrap().reserved, 0);
}

#[tokio::test]
async fn transient_release_failures_are_retried() {
    let inventory = Arc::new(FlakyInventory::new());
    let h = Harness::with_inventory(inventory.clone());
    let product = h.product(20, &[(WarehouseId::new(), 10)]).await;
    let receipt = h.place(product, 4).await;

    inventory.fail_releases(2);
    let order = h
        .coordinator
        .update_status(&h.customer, receipt.id, OrderStatus::Cancelled, None)
        .await
        .unwrap();

    assert_eq!(order.compensation(), CompensationState::Completed);
    assert_eq!(h.inventory.stock(product).await.unwrap().reserved, 0);
}

#[tokio::test]
async fn a_failed_stock_commit_is_finished_by_recovery() {
    let inventory = Arc::new(FlakyInventory::new());
    let h = Harness::with_inventory(inventory.clone());
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    h.fund(500).await;
    let receipt = h.place(product, 2).await;
    h.advance(
        &receipt,
        &[OrderStatus::Confirmed, OrderStatus::Processing, OrderStatus::ReadyForPickup],
    )
    .await;

    inventory.fail_commits(3);
    let order = h
        .coordinator
        .update_status(&h.retailer, receipt.id, OrderStatus::OutForDelivery, None)
        .await
        .unwrap();
    assert_eq!(order.status(), OrderStatus::OutForDelivery);
    assert!(!order.reservation_committed());
    assert_eq!(h.inventory.stock(product).await.unwrap().reserved, 2);

    let audit = h.audit.all().await;
    assert!(audit.iter().any(|r| {
        r.action == "inventory.committed" && r.outcome == AuditOutcome::Failed
    }));

    h.advance(&receipt, &[OrderStatus::Delivered]).await;
    let report = h.coordinator.recover().await.unwrap();
    assert_eq!(report.commits_resumed, 1);

    let stock = h.inventory.stock(product).await.unwrap();
    assert_eq!((stock.on_hand, stock.reserved, stock.available), (3, 0, 3));
    let order = h.coordinator.get_order(&h.customer, receipt.id).await.unwrap();
    assert!(order.reservation_committed());

    let again = h.coordinator.recover().await.unwrap();
    assert_eq!(again.commits_resumed, 0);
    assert_eq!(h.inventory.stock(product).await.unwrap().on_hand, 3);
}

#[tokio::test]
async fn recovery_releases_reservations_of_orders_never_placed() {
    let h = Harness::new();
    let warehouse = WarehouseId::new();
    let product = h.product(20, &[(warehouse, 10)]).await;
    let placed = h.place(product, 2).await;

    let orphan = Reference::for_order(OrderId::new());
    h.inventory.reserve(product, warehouse, 3, &orphan, None).await.unwrap();
    let manual = Reference::new("stocktake-2025-01");
    h.inventory.reserve(product, warehouse, 1, &manual, None).await.unwrap();

    let report = h.coordinator.recover().await.unwrap();
    assert_eq!(report.orphaned_reservations_released, 1);

    let stock = h.inventory.stock(product).await.unwrap();
    assert_eq!(stock.reserved, 3);
    let order = h.coordinator.get_order(&h.customer, placed.id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
}

#[tokio::test]
async fn listing_is_scoped_to_the_caller() {
    let h = Harness::new();
    let product = h.product(10, &[(WarehouseId::new(), 10)]).await;
    let mine = h.place(product, 1).await;
    let other = Actor::new(UserId::new(), Role::Customer);
    h.coordinator
        .create_order(&other, h.request(product, 1))
        .await
        .unwrap();

    let listed = h.coordinator.list_orders(&h.customer, None, None, None).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].order_id, mine.id);

    let retailer_view = h.coordinator.list_orders(&h.retailer, None, None, None).await.unwrap();
    assert_eq!(retailer_view.len(), 2);

    let stranger = Actor::new(UserId::new(), Role::Retailer);
    assert!(h.coordinator.list_orders(&stranger, None, None, None).await.unwrap().is_empty());
    assert!(matches!(
        h.coordinator.get_order(&stranger, mine.id).await,
        Err(SagaError::Forbidden(_))
    ));

    let manager = Actor::new(UserId::new(), Role::WarehouseManager);
    assert!(matches!(
        h.coordinator.list_orders(&manager, None, None, None).await,
        Err(SagaError::Forbidden(_))
    ));

    h.coordinator
        .update_status(&h.customer, mine.id, OrderStatus::Cancelled, None)
        .await
        .unwrap();
    let pending = h
        .coordinator
        .list_orders(&h.admin, Some(OrderStatus::Pending), None, None)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn mobile_money_waits_for_admin_confirmation() {
    let h = Harness::new();
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    let receipt = h.place(product, 2).await;

    let request = PaymentRequest {
        order_id: receipt.id,
        amount: receipt.total_amount,
        payment_method: PaymentMethod::MobileMoney,
        mobile_number: Some("+254712345678".into()),
    };
    let payment = h.coordinator.process_payment(&h.customer, request.clone()).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Processing);

    let again = h.coordinator.process_payment(&h.customer, request).await.unwrap_err();
    assert!(matches!(again, SagaError::AlreadyProcessed(_)));

    let forbidden = h.coordinator.confirm_payment(&h.retailer, payment.id, true).await;
    assert!(matches!(forbidden, Err(SagaError::Forbidden(_))));

    let confirmed = h.coordinator.confirm_payment(&h.admin, payment.id, true).await.unwrap();
    assert_eq!(confirmed.status, PaymentStatus::Completed);
    let order = h.coordinator.get_order(&h.customer, receipt.id).await.unwrap();
    assert_eq!(order.payment_status(), PaymentStatus::Completed);
}

#[tokio::test]
async fn payment_confirmed_after_cancellation_is_declined() {
    let h = Harness::new();
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    let receipt = h.place(product, 1).await;

    let payment = h
        .coordinator
        .process_payment(
            &h.customer,
            PaymentRequest {
                order_id: receipt.id,
                amount: receipt.total_amount,
                payment_method: PaymentMethod::Card,
                mobile_number: None,
            },
        )
        .await
        .unwrap();
    h.coordinator
        .update_status(&h.customer, receipt.id, OrderStatus::Cancelled, None)
        .await
        .unwrap();

    let declined = h.coordinator.confirm_payment(&h.admin, payment.id, true).await.unwrap();
    assert_eq!(declined.status, PaymentStatus::Failed);
    let order = h.coordinator.get_order(&h.customer, receipt.id).await.unwrap();
    assert_ne!(order.payment_status(), PaymentStatus::Completed);
}

/// Places a one-unit order paid by card and leaves the payment processing.
async fn card_payment(h: &Harness) -> (OrderReceipt, Payment) {
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    let receipt = h.place(product, 1).await;
    let payment = h
        .coordinator
        .process_payment(
            &h.customer,
            PaymentRequest {
                order_id: receipt.id,
                amount: receipt.total_amount,
                payment_method: PaymentMethod::Card,
                mobile_number: None,
            },
        )
        .await
        .unwrap();
    (receipt, payment)
}

#[tokio::test]
async fn cancellation_during_confirmation_refunds_the_completed_payment() {
    let wallets = Arc::new(FlakyWallet::new());
    let h = Harness::with_wallets(wallets.clone());
    let (receipt, payment) = card_payment(&h).await;

    wallets.fail_refunds(2);
    let release = wallets.hold_next_completion().await;
    let (confirmed, cancelled) = tokio::join!(
        h.coordinator.confirm_payment(&h.admin, payment.id, true),
        async {
            wallets.completion_reached.notified().await;
            let cancelled = h
                .coordinator
                .update_status(&h.customer, receipt.id, OrderStatus::Cancelled, None)
                .await;
            release.send(()).unwrap();
            cancelled
        },
    );

    assert!(cancelled.is_ok());
    assert!(matches!(confirmed, Err(SagaError::InvalidTransition(_))));

    let stored = h.wallets.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Refunded);
    assert_eq!(stored.refunded_amount, receipt.total_amount);
    let wallet = h.wallets.get_balance(h.customer.id).await.unwrap();
    assert_eq!(wallet.balance, receipt.total_amount);

    let order = h.coordinator.get_order(&h.customer, receipt.id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    assert_ne!(order.payment_status(), PaymentStatus::Completed);
}

#[tokio::test]
async fn a_refund_that_keeps_failing_is_audited() {
    let wallets = Arc::new(FlakyWallet::new());
    let h = Harness::with_wallets(wallets.clone());
    let (receipt, payment) = card_payment(&h).await;

    wallets.fail_refunds(3);
    let release = wallets.hold_next_completion().await;
    let (confirmed, _) = tokio::join!(
        h.coordinator.confirm_payment(&h.admin, payment.id, true),
        async {
            wallets.completion_reached.notified().await;
            h.coordinator
                .update_status(&h.customer, receipt.id, OrderStatus::Cancelled, None)
                .await
                .unwrap();
            release.send(()).unwrap();
        },
    );
    assert!(confirmed.is_err());

    let stored = h.wallets.payment(payment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);

    let failures: Vec<_> = h
        .audit
        .all()
        .await
        .into_iter()
        .filter(|r| r.action == "compensation.failed")
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].resource_type, "payment");
    assert_eq!(failures[0].resource_id, payment.id.to_string());
    assert_eq!(failures[0].details["step"], "refund_payment");
    assert_eq!(failures[0].details["attempts"], 3);
}

#[tokio::test]
async fn payment_amount_must_match_the_order_total() {
    let h = Harness::new();
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    h.fund(500).await;
    let receipt = h.place(product, 1).await;

    let err = h
        .coordinator
        .process_payment(
            &h.customer,
            PaymentRequest {
                order_id: receipt.id,
                amount: Money::from_major(1),
                payment_method: PaymentMethod::Wallet,
                mobile_number: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Validation(_)));
}

#[tokio::test]
async fn sub_cent_amounts_never_reach_the_ledger() {
    let h = Harness::new();
    let err = h
        .coordinator
        .top_up(&h.customer, "0.005".parse().unwrap(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Validation(_)));

    let huge = "79228162514264337593543950335".parse().unwrap();
    h.fund(1).await;
    let err = h.coordinator.top_up(&h.customer, huge, None).await.unwrap_err();
    assert!(matches!(err, SagaError::Validation(_)));

    let wallet = h.coordinator.wallet(&h.customer).await.unwrap();
    assert_eq!(wallet.balance, Money::from_major(1));
}

#[tokio::test]
async fn retailer_refund_credits_the_customer() {
    let h = Harness::new();
    let product = h.product(100, &[(WarehouseId::new(), 5)]).await;
    h.fund(500).await;
    let receipt = h.place(product, 2).await;
    let payment = h
        .coordinator
        .process_payment(
            &h.customer,
            PaymentRequest {
                order_id: receipt.id,
                amount: receipt.total_amount,
                payment_method: PaymentMethod::Wallet,
                mobile_number: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let err = h
        .coordinator
        .refund_payment(&h.customer, payment.id, None, "Damaged goods")
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Forbidden(_)));

    let refunded = h
        .coordinator
        .refund_payment(&h.retailer, payment.id, Some(Money::from_major(57)), "Damaged goods")
        .await
        .unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(refunded.refunded_amount, Money::from_major(57));

    let wallet = h.wallets.get_balance(h.customer.id).await.unwrap();
    assert_eq!(wallet.balance, Money::from_major(300));
    let order = h.coordinator.get_order(&h.customer, receipt.id).await.unwrap();
    assert_eq!(order.payment_status(), PaymentStatus::Refunded);
}

#[tokio::test]
async fn transfers_respect_the_daily_limit() {
    let h = Harness::new();
    let recipient = UserId::new();
    h.coordinator
        .top_up(&h.customer, Money::from_major(50_000), Some("MPESA-123".into()))
        .await
        .unwrap();

    h.coordinator
        .transfer_funds(&h.customer, recipient, Money::from_major(30_000), None)
        .await
        .unwrap();
    let err = h
        .coordinator
        .transfer_funds(&h.customer, recipient, Money::from_major(20_001), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::LimitExceeded(_)));

    let wallet = h.coordinator.wallet(&h.customer).await.unwrap();
    assert_eq!(wallet.balance, Money::from_major(20_000));

    let audit = h.audit.all().await;
    let transfers: Vec<_> = audit.iter().filter(|r| r.action == "wallet.transferred").collect();
    assert_eq!(transfers.len(), 2);
    assert_eq!(transfers[1].outcome, AuditOutcome::Failed);
}

#[tokio::test]
async fn stock_operations_are_authorized_and_audited() {
    let h = Harness::new();
    let warehouse = WarehouseId::new();
    let product = h.product(10, &[(warehouse, 10)]).await;
    let adjustment = StockAdjustment {
        product_id: product,
        warehouse_id: warehouse,
        delta: -2,
        reason: MovementType::Damaged,
        notes: Some("Water damage".into()),
    };

    let err = h.coordinator.adjust_stock(&h.customer, adjustment.clone()).await.unwrap_err();
    assert!(matches!(err, SagaError::Forbidden(_)));

    let record = h.coordinator.adjust_stock(&h.retailer, adjustment).await.unwrap();
    assert_eq!(record.on_hand, 8);

    let audit = h.audit.all().await;
    let adjustments: Vec<_> = audit.iter().filter(|r| r.action == "inventory.adjusted").collect();
    assert_eq!(adjustments.len(), 2);
    assert_eq!(adjustments[0].outcome, AuditOutcome::Failed);
    assert_eq!(adjustments[1].outcome, AuditOutcome::Succeeded);

    let order_reference = Reference::for_order(OrderId::new());
    let err = h
        .coordinator
        .release_stock(&h.admin, order_reference)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Validation(_)));
}

#[tokio::test]
async fn delivery_events_are_admin_only() {
    let h = Harness::new();
    let err = h
        .coordinator
        .publish_delivery_event(
            &h.retailer,
            h.customer.id,
            NotificationType::DeliveryAssigned,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Forbidden(_)));

    let sent = h
        .coordinator
        .publish_delivery_event(
            &h.admin,
            h.customer.id,
            NotificationType::DeliveryAssigned,
            Some("DLV-1".into()),
        )
        .await
        .unwrap();
    assert_eq!(sent.body, "A driver has been assigned to your delivery");

    let delivered = h.sink.wait_for(1).await;
    assert_eq!(delivered[0].id, sent.id);
}
