//! PostgreSQL integration tests for the ledgers.
//!
//! These need Docker and are ignored by default. Run with:
//!
//! ```bash
//! cargo test -p ledger --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use common::{Money, OrderId, PaymentMethod, PaymentStatus, ProductId, UserId, WarehouseId};
use ledger::{
    Adjustment, AlertType, AuditLog, AuditRecord, InventoryLedger, LedgerError, MovementType,
    Posting, PostgresAuditLog, PostgresInventoryLedger, PostgresWalletLedger, Reference,
    TransactionType, Transfer, WalletLedger,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_pool() -> PgPool {
    let info = get_container_info().await;
    PgPool::connect(&info.connection_string).await.unwrap()
}

async fn stocked(ledger: &PostgresInventoryLedger, on_hand: i64) -> (ProductId, WarehouseId) {
    let product = ProductId::new();
    let warehouse = WarehouseId::new();
    ledger
        .adjust(Adjustment::new(product, warehouse, on_hand, MovementType::Received))
        .await
        .unwrap();
    (product, warehouse)
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn reserve_release_commit_round() {
    let ledger = PostgresInventoryLedger::new(get_pool().await);
    let (product, warehouse) = stocked(&ledger, 20).await;
    let order = Reference::for_order(OrderId::new());

    ledger.reserve(product, warehouse, 7, &order, None).await.unwrap();
    let record = ledger.record(product, warehouse).await.unwrap().unwrap();
    assert_eq!((record.on_hand, record.reserved), (20, 7));

    assert_eq!(ledger.release(&order, None).await.unwrap(), 7);
    assert_eq!(ledger.release(&order, None).await.unwrap(), 0);

    let second = Reference::for_order(OrderId::new());
    ledger.reserve(product, warehouse, 5, &second, None).await.unwrap();
    assert_eq!(ledger.commit(&second, None).await.unwrap(), 5);
    assert_eq!(ledger.commit(&second, None).await.unwrap(), 0);

    let record = ledger.record(product, warehouse).await.unwrap().unwrap();
    assert_eq!((record.on_hand, record.reserved), (15, 0));

    let movements = ledger.movements(product, 10).await.unwrap();
    assert_eq!(movements.len(), 5);
    assert_eq!(movements[0].movement_type, MovementType::Sold);
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn concurrent_reserves_never_oversell() {
    let ledger = PostgresInventoryLedger::new(get_pool().await);
    let (product, warehouse) = stocked(&ledger, 10).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .reserve(product, warehouse, 3, &Reference::for_order(OrderId::new()), None)
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 3);
    let record = ledger.record(product, warehouse).await.unwrap().unwrap();
    assert_eq!(record.reserved, 9);
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn transfer_and_alert_dedup() {
    let ledger = PostgresInventoryLedger::new(get_pool().await);
    let (product, source) = stocked(&ledger, 12).await;
    let destination = WarehouseId::new();

    let (from, to) = ledger
        .transfer(Transfer {
            product_id: product,
            from: source,
            to: destination,
            quantity: 4,
            performed_by: None,
            notes: None,
        })
        .await
        .unwrap();
    assert_eq!((from.on_hand, to.on_hand), (8, 4));

    ledger
        .adjust(Adjustment::new(product, source, -1, MovementType::Damaged))
        .await
        .unwrap();

    let open: Vec<_> = ledger
        .alerts(false)
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.product_id == product && a.warehouse_id == source)
        .collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].alert_type, AlertType::LowStock);

    let user = UserId::new();
    ledger.acknowledge_alert(open[0].id, user).await.unwrap();
    assert!(matches!(
        ledger.acknowledge_alert(open[0].id, user).await,
        Err(LedgerError::AlreadyProcessed(_))
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn wallet_payment_refund_and_limits() {
    let ledger = PostgresWalletLedger::new(get_pool().await);
    let payer = UserId::new();

    ledger
        .deposit(payer, Money::from_major(15_000), 0, None)
        .await
        .unwrap();
    ledger
        .credit(payer, Posting::new(TransactionType::Refund, Money::from_major(25_000)))
        .await
        .unwrap();
    assert!(matches!(
        ledger.deposit(payer, Money::from_major(40_000), 0, None).await,
        Err(LedgerError::LimitExceeded { .. })
    ));

    let payment = ledger
        .capture_payment(OrderId::new(), payer, Money::from_major(257), PaymentMethod::Wallet)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let refunded = ledger.refund(payment.id, None, "cancelled").await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_eq!(
        ledger.get_balance(payer).await.unwrap().balance,
        Money::from_major(40_000)
    );

    let sum: Money = ledger
        .transactions(payer, 100)
        .await
        .unwrap()
        .iter()
        .map(|t| t.signed_amount())
        .sum();
    assert_eq!(sum, Money::from_major(40_000));
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn wallet_transfer_is_atomic() {
    let ledger = PostgresWalletLedger::new(get_pool().await);
    let sender = UserId::new();
    let recipient = UserId::new();
    ledger
        .credit(sender, Posting::new(TransactionType::Deposit, Money::from_major(50)))
        .await
        .unwrap();

    assert!(matches!(
        ledger.transfer(sender, recipient, Money::from_major(60), 0, None).await,
        Err(LedgerError::InsufficientFunds { .. })
    ));
    ledger
        .transfer(sender, recipient, Money::from_major(20), 0, None)
        .await
        .unwrap();

    assert_eq!(ledger.get_balance(sender).await.unwrap().balance, Money::from_major(30));
    assert_eq!(ledger.get_balance(recipient).await.unwrap().balance, Money::from_major(20));

    // Incoming transfers leave the recipient's own sending cap untouched.
    ledger
        .enforce_daily_limit(recipient, TransactionType::Transfer, Money::from_major(50_000), 0)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn sub_cent_amounts_are_rejected_before_storage() {
    let ledger = PostgresWalletLedger::new(get_pool().await);
    let user = UserId::new();

    let result = ledger.deposit(user, "0.001".parse().unwrap(), 0, None).await;
    assert!(matches!(result, Err(LedgerError::Validation(_))));
    assert_eq!(ledger.get_balance(user).await.unwrap().balance, Money::ZERO);
}

#[tokio::test]
#[ignore = "requires docker"]
#[serial]
async fn audit_records_round_trip() {
    let log = PostgresAuditLog::new(get_pool().await);
    let resource = OrderId::new().to_string();
    log.record(
        AuditRecord::succeeded(UserId::new(), "order.created", "order", &resource)
            .with_details(serde_json::json!({ "total": "257.00" })),
    )
    .await
    .unwrap();

    let records = log.records_for("order", &resource).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].details["total"], "257.00");
}
