//! Payment status and method enums shared by orders and the wallet ledger.

use serde::{Deserialize, Serialize};

use crate::actor::ParseEnumError;

/// Lifecycle of a payment.
///
/// ```text
/// Pending ──► Processing ──► Completed ──► Refunded
///    │            │
///    └────────────┴──► Failed / Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    /// Returns true if a refund may be issued against this payment.
    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Completed)
    }

    /// Returns true once funds have been captured (and possibly returned).
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(ParseEnumError::new("payment status", other)),
        }
    }
}

/// Payment instrument selected at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Wallet,
    MobileMoney,
    BankTransfer,
    Card,
}

impl PaymentMethod {
    /// Wallet payments settle synchronously; every other rail confirms out of band.
    pub fn settles_immediately(&self) -> bool {
        matches!(self, PaymentMethod::Wallet)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Card => "card",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallet" => Ok(PaymentMethod::Wallet),
            "mobile_money" => Ok(PaymentMethod::MobileMoney),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "card" => Ok(PaymentMethod::Card),
            other => Err(ParseEnumError::new("payment method", other)),
        }
    }
}
