use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{Money, OrderId, PaymentId, PaymentMethod, PaymentStatus, UserId};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    DailyLimits, EntryDirection, Payment, Posting, TransactionStatus, TransactionType, Wallet,
    WalletLedger, WalletStatus, WalletTransaction, credited_balance, payment_reference,
    record_mutation, start_of_day, validate_amount,
};
use crate::{LedgerError, Result};

#[derive(Default)]
struct State {
    wallets: HashMap<UserId, Wallet>,
    transactions: Vec<WalletTransaction>,
    payments: HashMap<PaymentId, Payment>,
}

impl State {
    fn wallet(&mut self, user_id: UserId) -> &mut Wallet {
        self.wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::new(user_id))
    }

    /// Checks a posting against the wallet without applying it.
    fn check(
        &mut self,
        user_id: UserId,
        direction: EntryDirection,
        posting: &Posting,
    ) -> Result<()> {
        validate_amount(posting.amount)?;
        let wallet = self.wallet(user_id);
        if direction == EntryDirection::Credit {
            credited_balance(wallet.balance, posting.amount)?;
        } else {
            if wallet.status != WalletStatus::Active {
                return Err(LedgerError::InvalidState(format!(
                    "wallet of {user_id} is {}",
                    wallet.status
                )));
            }
            if wallet.balance < posting.amount {
                return Err(LedgerError::InsufficientFunds {
                    user_id,
                    requested: posting.amount,
                    available: wallet.balance,
                });
            }
        }
        Ok(())
    }

    fn post(
        &mut self,
        user_id: UserId,
        direction: EntryDirection,
        posting: Posting,
    ) -> Result<WalletTransaction> {
        self.check(user_id, direction, &posting)?;

        let wallet = self.wallet(user_id);
        match direction {
            EntryDirection::Credit => wallet.balance += posting.amount,
            EntryDirection::Debit => wallet.balance -= posting.amount,
        }
        wallet.updated_at = Utc::now();

        let entry = WalletTransaction {
            id: Uuid::new_v4(),
            user_id,
            transaction_type: posting.transaction_type,
            direction,
            amount: posting.amount,
            balance_after: wallet.balance,
            status: TransactionStatus::Completed,
            reference: posting.reference,
            description: posting.description,
            created_at: Utc::now(),
        };
        self.transactions.push(entry.clone());
        record_mutation(posting.transaction_type.as_str());
        Ok(entry)
    }

    fn used_today(&self, user_id: UserId, transaction_type: TransactionType) -> Money {
        let since = start_of_day(Utc::now());
        let direction = transaction_type.capped_direction();
        self.transactions
            .iter()
            .filter(|t| {
                t.user_id == user_id
                    && t.transaction_type == transaction_type
                    && t.direction == direction
                    && t.status == TransactionStatus::Completed
                    && t.created_at >= since
            })
            .map(|t| t.amount)
            .sum()
    }

    fn payment_mut(&mut self, payment_id: PaymentId) -> Result<&mut Payment> {
        self.payments
            .get_mut(&payment_id)
            .ok_or_else(|| LedgerError::not_found("payment", payment_id))
    }
}

/// In-memory wallet ledger guarded by a single mutex.
#[derive(Clone, Default)]
pub struct InMemoryWalletLedger {
    state: Arc<Mutex<State>>,
    limits: DailyLimits,
}

impl InMemoryWalletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(mut self, limits: DailyLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[async_trait]
impl WalletLedger for InMemoryWalletLedger {
    async fn get_balance(&self, user_id: UserId) -> Result<Wallet> {
        let mut state = self.state.lock().await;
        Ok(state.wallet(user_id).clone())
    }

    async fn debit(&self, user_id: UserId, posting: Posting) -> Result<WalletTransaction> {
        let mut state = self.state.lock().await;
        state.post(user_id, EntryDirection::Debit, posting)
    }

    async fn credit(&self, user_id: UserId, posting: Posting) -> Result<WalletTransaction> {
        let mut state = self.state.lock().await;
        state.post(user_id, EntryDirection::Credit, posting)
    }

    async fn transfer(
        &self,
        sender: UserId,
        recipient: UserId,
        amount: Money,
        kyc_level: u8,
        description: Option<String>,
    ) -> Result<(WalletTransaction, WalletTransaction)> {
        if sender == recipient {
            return Err(LedgerError::validation("cannot transfer to your own wallet"));
        }
        validate_amount(amount)?;
        let reference = format!("transfer:{}", Uuid::new_v4());
        let mut posting = Posting::new(TransactionType::Transfer, amount).reference(reference);
        posting.description = description;

        let mut state = self.state.lock().await;
        let used = state.used_today(sender, TransactionType::Transfer);
        self.limits
            .check(TransactionType::Transfer, used, amount, kyc_level)?;
        // Both sides are checked before either is applied.
        state.check(sender, EntryDirection::Debit, &posting)?;
        state.check(recipient, EntryDirection::Credit, &posting)?;
        let out = state.post(sender, EntryDirection::Debit, posting.clone())?;
        let incoming = state.post(recipient, EntryDirection::Credit, posting)?;
        Ok((out, incoming))
    }

    async fn enforce_daily_limit(
        &self,
        user_id: UserId,
        transaction_type: TransactionType,
        amount: Money,
        kyc_level: u8,
    ) -> Result<()> {
        validate_amount(amount)?;
        let state = self.state.lock().await;
        let used = state.used_today(user_id, transaction_type);
        self.limits.check(transaction_type, used, amount, kyc_level)
    }

    async fn deposit(
        &self,
        user_id: UserId,
        amount: Money,
        kyc_level: u8,
        reference: Option<String>,
    ) -> Result<WalletTransaction> {
        validate_amount(amount)?;
        let mut state = self.state.lock().await;
        let used = state.used_today(user_id, TransactionType::Deposit);
        self.limits
            .check(TransactionType::Deposit, used, amount, kyc_level)?;

        let mut posting =
            Posting::new(TransactionType::Deposit, amount).description("Wallet top-up");
        posting.reference = reference;
        state.post(user_id, EntryDirection::Credit, posting)
    }

    async fn capture_payment(
        &self,
        order_id: OrderId,
        payer: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<Payment> {
        validate_amount(amount)?;
        let mut payment = Payment::new(order_id, payer, amount, method);

        let mut state = self.state.lock().await;
        if !method.settles_immediately() {
            payment.status = PaymentStatus::Processing;
            state.payments.insert(payment.id, payment.clone());
            return Ok(payment);
        }

        let posting = Posting::new(TransactionType::Payment, amount)
            .reference(payment_reference(payment.id))
            .description(format!("Payment for order {order_id}"));
        match state.post(payer, EntryDirection::Debit, posting) {
            Ok(_) => {
                payment.status = PaymentStatus::Completed;
                state.payments.insert(payment.id, payment.clone());
                Ok(payment)
            }
            Err(err @ LedgerError::InsufficientFunds { .. }) => {
                payment.status = PaymentStatus::Failed;
                payment.failure_reason = Some(err.to_string());
                state.payments.insert(payment.id, payment);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn complete_payment(&self, payment_id: PaymentId, success: bool) -> Result<Payment> {
        let mut state = self.state.lock().await;
        let payment = state.payment_mut(payment_id)?;
        payment.ensure_processing()?;

        if success {
            payment.status = PaymentStatus::Completed;
        } else {
            payment.status = PaymentStatus::Failed;
            payment.failure_reason = Some("declined by payment provider".to_string());
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<Money>,
        reason: &str,
    ) -> Result<Payment> {
        let mut state = self.state.lock().await;
        let payment = state.payment_mut(payment_id)?;
        let amount = payment.refundable(amount)?;
        let payer = payment.payer_id;

        let posting = Posting::new(TransactionType::Refund, amount)
            .reference(payment_reference(payment_id))
            .description(reason);
        state.post(payer, EntryDirection::Credit, posting)?;

        let payment = state.payment_mut(payment_id)?;
        payment.refunded_amount += amount;
        payment.status = PaymentStatus::Refunded;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.get(&payment_id).cloned())
    }

    async fn transactions(&self, user_id: UserId, limit: usize) -> Result<Vec<WalletTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_status(&self, user_id: UserId, status: WalletStatus) -> Result<Wallet> {
        let mut state = self.state.lock().await;
        let wallet = state.wallet(user_id);
        wallet.status = status;
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }
}
