//! Per-user balance ledger.
//!
//! Balances never go negative and every mutation appends a
//! [`WalletTransaction`], so the signed sum of a user's transactions always
//! equals their balance. Payments captured against orders live here too,
//! together with their refunds.

mod memory;
mod postgres;

pub use memory::InMemoryWalletLedger;
pub use postgres::PostgresWalletLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CURRENCY_SCALE, Money, OrderId, PaymentId, PaymentMethod, PaymentStatus, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{LedgerError, Result};

/// Currency of every wallet.
pub const DEFAULT_CURRENCY: &str = "ZMW";

wire_enum!(
    WalletStatus, "wallet status" {
        Active => "active",
        Frozen => "frozen",
    }
);

wire_enum!(
    TransactionType, "transaction type" {
        Deposit => "deposit",
        Withdrawal => "withdrawal",
        Payment => "payment",
        Refund => "refund",
        Transfer => "transfer",
    }
);

impl TransactionType {
    /// Side of the ledger counted against this type's daily cap: incoming
    /// funds for deposits, outgoing funds for everything else.
    pub fn capped_direction(self) -> EntryDirection {
        match self {
            TransactionType::Deposit | TransactionType::Refund => EntryDirection::Credit,
            _ => EntryDirection::Debit,
        }
    }
}

wire_enum!(
    EntryDirection, "entry direction" {
        Credit => "credit",
        Debit => "debit",
    }
);

wire_enum!(
    TransactionStatus, "transaction status" {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Money,
    pub currency: String,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: Money::ZERO,
            currency: DEFAULT_CURRENCY.to_string(),
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One append-only balance mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub direction: EntryDirection,
    pub amount: Money,
    pub balance_after: Money,
    pub status: TransactionStatus,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    /// Amount with credits positive and debits negative.
    pub fn signed_amount(&self) -> Money {
        match self.direction {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => Money::ZERO - self.amount,
        }
    }
}

/// A payment captured for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub payer_id: UserId,
    pub amount: Money,
    pub refunded_amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub(crate) fn new(
        order_id: OrderId,
        payer_id: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            order_id,
            payer_id,
            amount,
            refunded_amount: Money::ZERO,
            method,
            status: PaymentStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks that a refund may be issued and returns its amount. `None`
    /// refunds the full payment.
    pub fn refundable(&self, amount: Option<Money>) -> Result<Money> {
        match self.status {
            PaymentStatus::Completed => {}
            PaymentStatus::Refunded => {
                return Err(LedgerError::AlreadyProcessed(format!(
                    "payment {} is already refunded",
                    self.id
                )));
            }
            other => {
                return Err(LedgerError::InvalidState(format!(
                    "payment {} is {other}, only completed payments can be refunded",
                    self.id
                )));
            }
        }

        let remaining = self.amount - self.refunded_amount;
        let amount = amount.unwrap_or(remaining);
        validate_amount(amount)?;
        if amount > remaining {
            return Err(LedgerError::validation(format!(
                "refund of {amount} exceeds the refundable {remaining}"
            )));
        }
        Ok(amount)
    }

    /// Checks that an out-of-band payment is still awaiting its rail callback.
    pub fn ensure_processing(&self) -> Result<()> {
        match self.status {
            PaymentStatus::Processing => Ok(()),
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Refunded => Err(
                LedgerError::AlreadyProcessed(format!("payment {} is {}", self.id, self.status)),
            ),
            other => Err(LedgerError::InvalidState(format!(
                "payment {} is {other}",
                self.id
            ))),
        }
    }
}

/// Daily caps applied per transaction type, keyed by KYC tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyLimits {
    pub standard: Money,
    pub verified: Money,
    /// Minimum KYC level that unlocks the verified cap.
    pub verified_kyc_level: u8,
}

impl Default for DailyLimits {
    fn default() -> Self {
        Self {
            standard: Money::from_major(50_000),
            verified: Money::from_major(100_000),
            verified_kyc_level: 2,
        }
    }
}

impl DailyLimits {
    pub fn limit_for(&self, kyc_level: u8) -> Money {
        if kyc_level >= self.verified_kyc_level {
            self.verified
        } else {
            self.standard
        }
    }

    /// Fails with `LimitExceeded` if `used + amount` is above the cap.
    pub fn check(
        &self,
        transaction_type: TransactionType,
        used: Money,
        amount: Money,
        kyc_level: u8,
    ) -> Result<()> {
        let limit = self.limit_for(kyc_level);
        if used.checked_add(amount).is_none_or(|total| total > limit) {
            return Err(LedgerError::LimitExceeded {
                transaction_type: transaction_type.as_str(),
                limit,
                used,
                requested: amount,
            });
        }
        Ok(())
    }
}

/// A balance mutation request.
#[derive(Debug, Clone)]
pub struct Posting {
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub reference: Option<String>,
    pub description: Option<String>,
}

impl Posting {
    pub fn new(transaction_type: TransactionType, amount: Money) -> Self {
        Self {
            transaction_type,
            amount,
            reference: None,
            description: None,
        }
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Accepts positive amounts in whole cents that fit a ledger column.
pub fn validate_amount(amount: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::validation(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if !amount.is_whole_cents() {
        return Err(LedgerError::validation(format!(
            "amount {} has more than {CURRENCY_SCALE} decimal places",
            amount.amount()
        )));
    }
    if amount > Money::MAX {
        return Err(LedgerError::validation(format!(
            "amount exceeds the maximum of {}",
            Money::MAX
        )));
    }
    Ok(())
}

/// Adds a credit to a balance, failing when the result would not fit.
pub(crate) fn credited_balance(balance: Money, amount: Money) -> Result<Money> {
    balance
        .checked_add(amount)
        .filter(|total| *total <= Money::MAX)
        .ok_or_else(|| LedgerError::validation("balance would exceed the maximum wallet balance"))
}

/// Midnight UTC of the day containing `now`.
pub(crate) fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

pub(crate) fn payment_reference(payment_id: PaymentId) -> String {
    format!("payment:{payment_id}")
}

pub(crate) fn record_mutation(kind: &'static str) {
    metrics::counter!("wallet_mutations_total", "kind" => kind).increment(1);
}

/// Balance ledger keyed by user.
///
/// Every method is one atomic unit at the storage layer.
#[async_trait]
pub trait WalletLedger: Send + Sync {
    /// Returns the wallet, creating an empty one on first access.
    async fn get_balance(&self, user_id: UserId) -> Result<Wallet>;

    /// Fails with `InsufficientFunds` if the balance is below the amount.
    async fn debit(&self, user_id: UserId, posting: Posting) -> Result<WalletTransaction>;

    async fn credit(&self, user_id: UserId, posting: Posting) -> Result<WalletTransaction>;

    /// Moves funds between two wallets. Returns (sender entry, recipient entry).
    ///
    /// The sender's daily transfer cap for `kyc_level` is checked under the
    /// same lock as the postings.
    async fn transfer(
        &self,
        sender: UserId,
        recipient: UserId,
        amount: Money,
        kyc_level: u8,
        description: Option<String>,
    ) -> Result<(WalletTransaction, WalletTransaction)>;

    /// Fails with `LimitExceeded` if today's completed transactions of this
    /// type plus `amount` exceed the cap for `kyc_level`. Only the side given
    /// by [`TransactionType::capped_direction`] is counted.
    async fn enforce_daily_limit(
        &self,
        user_id: UserId,
        transaction_type: TransactionType,
        amount: Money,
        kyc_level: u8,
    ) -> Result<()>;

    /// Tops up a wallet. The daily deposit limit is checked under the same
    /// lock as the credit.
    async fn deposit(
        &self,
        user_id: UserId,
        amount: Money,
        kyc_level: u8,
        reference: Option<String>,
    ) -> Result<WalletTransaction>;

    /// Captures payment for an order.
    ///
    /// Wallet payments debit the payer and complete immediately; when funds
    /// are short a failed payment is recorded and `InsufficientFunds` is
    /// returned. Every other method is recorded as `processing`.
    async fn capture_payment(
        &self,
        order_id: OrderId,
        payer: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<Payment>;

    /// Applies the payment rail's verdict to a processing payment.
    async fn complete_payment(&self, payment_id: PaymentId, success: bool) -> Result<Payment>;

    /// Credits the payer and marks the payment refunded.
    async fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<Money>,
        reason: &str,
    ) -> Result<Payment>;

    async fn payment(&self, payment_id: PaymentId) -> Result<Option<Payment>>;

    /// Newest first.
    async fn transactions(&self, user_id: UserId, limit: usize) -> Result<Vec<WalletTransaction>>;

    async fn set_status(&self, user_id: UserId, status: WalletStatus) -> Result<Wallet>;
}
