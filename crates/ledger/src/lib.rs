//! Inventory and wallet ledgers for order fulfillment.
//!
//! Both ledgers are async traits with an in-memory implementation (one
//! `tokio::sync::Mutex` held across each operation) and a Postgres
//! implementation (row compare-and-swap or `SELECT ... FOR UPDATE` inside a
//! transaction). The audit log records financial and administrative actions.

/// Declares a snake_case wire enum with `as_str`, `Display` and `FromStr`.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])* $name:ident,
        $kind:literal { $($variant:ident => $wire:literal),+ $(,)? } $(,)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ::common::ParseEnumError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(::common::ParseEnumError::new($kind, other)),
                }
            }
        }
    };
}

pub mod audit;
pub mod error;
pub mod inventory;
pub mod reference;
pub mod wallet;

pub use audit::{AuditLog, AuditOutcome, AuditRecord, InMemoryAuditLog, PostgresAuditLog};
pub use error::{LedgerError, Result};
pub use inventory::{
    Adjustment, AlertType, InMemoryInventoryLedger, InventoryLedger, InventoryRecord,
    MovementType, PostgresInventoryLedger, Reservation, ReservationStatus, StockAlert,
    StockDirection, StockLevel, StockMovement, Transfer,
};
pub use reference::Reference;
pub use wallet::{
    DailyLimits, EntryDirection, InMemoryWalletLedger, Payment, PostgresWalletLedger, Posting,
    TransactionStatus, TransactionType, Wallet, WalletLedger, WalletStatus, WalletTransaction,
    validate_amount,
};
