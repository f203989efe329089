use async_trait::async_trait;
use chrono::Utc;
use common::{Money, OrderId, PaymentId, PaymentMethod, PaymentStatus, UserId};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{
    DailyLimits, EntryDirection, Payment, Posting, TransactionStatus, TransactionType, Wallet,
    WalletLedger, WalletStatus, WalletTransaction, credited_balance, payment_reference,
    record_mutation, start_of_day, validate_amount,
};
use crate::error::decode_error;
use crate::{LedgerError, Result};

const WALLET_COLUMNS: &str = "user_id, balance, currency, status, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, transaction_type, direction, amount, \
     balance_after, status, reference, description, created_at";

const PAYMENT_COLUMNS: &str = "id, order_id, payer_id, amount, refunded_amount, method, status, \
     failure_reason, created_at, updated_at";

/// PostgreSQL-backed wallet ledger.
///
/// Debits are a conditional `UPDATE ... WHERE balance >= $n`; multi-row
/// operations lock their wallets with `SELECT ... FOR UPDATE` in user id
/// order inside one transaction.
#[derive(Clone)]
pub struct PostgresWalletLedger {
    pool: PgPool,
    limits: DailyLimits,
}

impl PostgresWalletLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            limits: DailyLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: DailyLimits) -> Self {
        self.limits = limits;
        self
    }

    fn row_to_wallet(row: PgRow) -> Result<Wallet> {
        let status: String = row.try_get("status")?;
        Ok(Wallet {
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            balance: Money::new(row.try_get("balance")?),
            currency: row.try_get("currency")?,
            status: status.parse().map_err(decode_error)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_transaction(row: PgRow) -> Result<WalletTransaction> {
        let transaction_type: String = row.try_get("transaction_type")?;
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        Ok(WalletTransaction {
            id: row.try_get("id")?,
            user_id: UserId::from_uuid(row.try_get("user_id")?),
            transaction_type: transaction_type.parse().map_err(decode_error)?,
            direction: direction.parse().map_err(decode_error)?,
            amount: Money::new(row.try_get("amount")?),
            balance_after: Money::new(row.try_get("balance_after")?),
            status: status.parse().map_err(decode_error)?,
            reference: row.try_get("reference")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let method: String = row.try_get("method")?;
        let status: String = row.try_get("status")?;
        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            payer_id: UserId::from_uuid(row.try_get("payer_id")?),
            amount: Money::new(row.try_get("amount")?),
            refunded_amount: Money::new(row.try_get("refunded_amount")?),
            method: method.parse().map_err(decode_error)?,
            status: status.parse().map_err(decode_error)?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn ensure_wallet(conn: &mut PgConnection, user_id: UserId) -> Result<()> {
        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(user_id.as_uuid())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn lock_wallet(conn: &mut PgConnection, user_id: UserId) -> Result<Wallet> {
        Self::ensure_wallet(conn, user_id).await?;
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id.as_uuid())
        .fetch_one(&mut *conn)
        .await?;
        Self::row_to_wallet(row)
    }

    /// Applies one posting inside the caller's transaction.
    async fn post(
        conn: &mut PgConnection,
        user_id: UserId,
        direction: EntryDirection,
        posting: Posting,
    ) -> Result<WalletTransaction> {
        validate_amount(posting.amount)?;
        Self::ensure_wallet(conn, user_id).await?;

        let balance: Option<Decimal> = match direction {
            EntryDirection::Credit => {
                let wallet = Self::lock_wallet(conn, user_id).await?;
                credited_balance(wallet.balance, posting.amount)?;
                sqlx::query_scalar(
                    "UPDATE wallets SET balance = balance + $2, updated_at = NOW() \
                     WHERE user_id = $1 RETURNING balance",
                )
                .bind(user_id.as_uuid())
                .bind(posting.amount.amount())
                .fetch_optional(&mut *conn)
                .await?
            }
            EntryDirection::Debit => {
                sqlx::query_scalar(
                    "UPDATE wallets SET balance = balance - $2, updated_at = NOW() \
                     WHERE user_id = $1 AND balance >= $2 AND status = 'active' RETURNING balance",
                )
                .bind(user_id.as_uuid())
                .bind(posting.amount.amount())
                .fetch_optional(&mut *conn)
                .await?
            }
        };

        let Some(balance) = balance else {
            let wallet = Self::lock_wallet(conn, user_id).await?;
            if wallet.status != WalletStatus::Active {
                return Err(LedgerError::InvalidState(format!(
                    "wallet of {user_id} is {}",
                    wallet.status
                )));
            }
            return Err(LedgerError::InsufficientFunds {
                user_id,
                requested: posting.amount,
                available: wallet.balance,
            });
        };

        let entry = WalletTransaction {
            id: Uuid::new_v4(),
            user_id,
            transaction_type: posting.transaction_type,
            direction,
            amount: posting.amount,
            balance_after: Money::new(balance),
            status: TransactionStatus::Completed,
            reference: posting.reference,
            description: posting.description,
            created_at: Utc::now(),
        };
        sqlx::query(
            r#"
            INSERT INTO wallet_transactions
                (id, user_id, transaction_type, direction, amount,
                 balance_after, status, reference, description, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(user_id.as_uuid())
        .bind(entry.transaction_type.as_str())
        .bind(entry.direction.as_str())
        .bind(entry.amount.amount())
        .bind(entry.balance_after.amount())
        .bind(entry.status.as_str())
        .bind(&entry.reference)
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;

        record_mutation(entry.transaction_type.as_str());
        Ok(entry)
    }

    async fn used_today(
        conn: &mut PgConnection,
        user_id: UserId,
        transaction_type: TransactionType,
    ) -> Result<Money> {
        let used: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount) FROM wallet_transactions
            WHERE user_id = $1 AND transaction_type = $2 AND direction = $3
              AND status = 'completed' AND created_at >= $4
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(transaction_type.as_str())
        .bind(transaction_type.capped_direction().as_str())
        .bind(start_of_day(Utc::now()))
        .fetch_one(&mut *conn)
        .await?;
        Ok(used.map(Money::new).unwrap_or(Money::ZERO))
    }

    async fn insert_payment(conn: &mut PgConnection, payment: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, payer_id, amount, refunded_amount, method, status,
                                  failure_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.payer_id.as_uuid())
        .bind(payment.amount.amount())
        .bind(payment.refunded_amount.amount())
        .bind(payment.method.as_str())
        .bind(payment.status.as_str())
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn lock_payment(conn: &mut PgConnection, payment_id: PaymentId) -> Result<Payment> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(payment_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| LedgerError::not_found("payment", payment_id))?;
        Self::row_to_payment(row)
    }

    async fn save_payment(conn: &mut PgConnection, payment: &Payment) -> Result<Payment> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payments
            SET status = $2, refunded_amount = $3, failure_reason = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        ))
        .bind(payment.id.as_uuid())
        .bind(payment.status.as_str())
        .bind(payment.refunded_amount.amount())
        .bind(&payment.failure_reason)
        .fetch_one(&mut *conn)
        .await?;
        Self::row_to_payment(row)
    }
}

#[async_trait]
impl WalletLedger for PostgresWalletLedger {
    async fn get_balance(&self, user_id: UserId) -> Result<Wallet> {
        let mut conn = self.pool.acquire().await?;
        Self::ensure_wallet(&mut conn, user_id).await?;
        let row = sqlx::query(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1"))
            .bind(user_id.as_uuid())
            .fetch_one(&mut *conn)
            .await?;
        Self::row_to_wallet(row)
    }

    #[tracing::instrument(skip(self))]
    async fn debit(&self, user_id: UserId, posting: Posting) -> Result<WalletTransaction> {
        let mut tx = self.pool.begin().await?;
        let entry = Self::post(&mut tx, user_id, EntryDirection::Debit, posting).await?;
        tx.commit().await?;
        Ok(entry)
    }

    #[tracing::instrument(skip(self))]
    async fn credit(&self, user_id: UserId, posting: Posting) -> Result<WalletTransaction> {
        let mut tx = self.pool.begin().await?;
        let entry = Self::post(&mut tx, user_id, EntryDirection::Credit, posting).await?;
        tx.commit().await?;
        Ok(entry)
    }

    #[tracing::instrument(skip(self))]
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

        let mut tx = self.pool.begin().await?;
        // Lock in user id order so opposing transfers cannot deadlock.
        let (first, second) = if sender < recipient {
            (sender, recipient)
        } else {
            (recipient, sender)
        };
        Self::lock_wallet(&mut tx, first).await?;
        Self::lock_wallet(&mut tx, second).await?;
        // The sender's row lock serializes concurrent transfers against the daily sum.
        let used = Self::used_today(&mut tx, sender, TransactionType::Transfer).await?;
        self.limits
            .check(TransactionType::Transfer, used, amount, kyc_level)?;

        let out = Self::post(&mut tx, sender, EntryDirection::Debit, posting.clone()).await?;
        let incoming = Self::post(&mut tx, recipient, EntryDirection::Credit, posting).await?;
        tx.commit().await?;
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
        let mut conn = self.pool.acquire().await?;
        let used = Self::used_today(&mut conn, user_id, transaction_type).await?;
        self.limits.check(transaction_type, used, amount, kyc_level)
    }

    #[tracing::instrument(skip(self))]
    async fn deposit(
        &self,
        user_id: UserId,
        amount: Money,
        kyc_level: u8,
        reference: Option<String>,
    ) -> Result<WalletTransaction> {
        validate_amount(amount)?;
        let mut tx = self.pool.begin().await?;
        // The row lock serializes concurrent top-ups against the daily sum.
        Self::lock_wallet(&mut tx, user_id).await?;
        let used = Self::used_today(&mut tx, user_id, TransactionType::Deposit).await?;
        self.limits
            .check(TransactionType::Deposit, used, amount, kyc_level)?;

        let mut posting =
            Posting::new(TransactionType::Deposit, amount).description("Wallet top-up");
        posting.reference = reference;
        let entry = Self::post(&mut tx, user_id, EntryDirection::Credit, posting).await?;
        tx.commit().await?;
        Ok(entry)
    }

    #[tracing::instrument(skip(self))]
    async fn capture_payment(
        &self,
        order_id: OrderId,
        payer: UserId,
        amount: Money,
        method: PaymentMethod,
    ) -> Result<Payment> {
        validate_amount(amount)?;
        let mut payment = Payment::new(order_id, payer, amount, method);

        if !method.settles_immediately() {
            payment.status = PaymentStatus::Processing;
            let mut conn = self.pool.acquire().await?;
            Self::insert_payment(&mut conn, &payment).await?;
            return Ok(payment);
        }

        let posting = Posting::new(TransactionType::Payment, amount)
            .reference(payment_reference(payment.id))
            .description(format!("Payment for order {order_id}"));

        let mut tx = self.pool.begin().await?;
        match Self::post(&mut tx, payer, EntryDirection::Debit, posting).await {
            Ok(_) => {
                payment.status = PaymentStatus::Completed;
                Self::insert_payment(&mut tx, &payment).await?;
                tx.commit().await?;
                Ok(payment)
            }
            Err(err @ LedgerError::InsufficientFunds { .. }) => {
                tx.rollback().await?;
                payment.status = PaymentStatus::Failed;
                payment.failure_reason = Some(err.to_string());
                let mut conn = self.pool.acquire().await?;
                Self::insert_payment(&mut conn, &payment).await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn complete_payment(&self, payment_id: PaymentId, success: bool) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;
        let mut payment = Self::lock_payment(&mut tx, payment_id).await?;
        payment.ensure_processing()?;

        if success {
            payment.status = PaymentStatus::Completed;
        } else {
            payment.status = PaymentStatus::Failed;
            payment.failure_reason = Some("declined by payment provider".to_string());
        }
        let payment = Self::save_payment(&mut tx, &payment).await?;
        tx.commit().await?;
        Ok(payment)
    }

    #[tracing::instrument(skip(self))]
    async fn refund(
        &self,
        payment_id: PaymentId,
        amount: Option<Money>,
        reason: &str,
    ) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;
        let mut payment = Self::lock_payment(&mut tx, payment_id).await?;
        let amount = payment.refundable(amount)?;

        let posting = Posting::new(TransactionType::Refund, amount)
            .reference(payment_reference(payment_id))
            .description(reason);
        Self::post(&mut tx, payment.payer_id, EntryDirection::Credit, posting).await?;

        payment.refunded_amount += amount;
        payment.status = PaymentStatus::Refunded;
        let payment = Self::save_payment(&mut tx, &payment).await?;
        tx.commit().await?;
        Ok(payment)
    }

    async fn payment(&self, payment_id: PaymentId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(payment_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn transactions(&self, user_id: UserId, limit: usize) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id.as_uuid())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    async fn set_status(&self, user_id: UserId, status: WalletStatus) -> Result<Wallet> {
        let mut tx = self.pool.begin().await?;
        Self::ensure_wallet(&mut tx, user_id).await?;
        let row = sqlx::query(&format!(
            "UPDATE wallets SET status = $2, updated_at = NOW() \
             WHERE user_id = $1 RETURNING {WALLET_COLUMNS}"
        ))
        .bind(user_id.as_uuid())
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Self::row_to_wallet(row)
    }
}
