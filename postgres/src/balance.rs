//! Balance ledger on `PostgreSQL`.
//!
//! Each account is one `balances` row, locked `FOR UPDATE` for the length of a
//! movement. The latest `balance_entries` row for a reservation tells whether its
//! payment is outstanding, which makes `debit` and `refund` idempotent.

use seatlock_core::environment::Clock;
use seatlock_core::{
    BalanceLedger, EntryKind, LEDGER_ENTRIES_METRIC, LedgerEntry, LedgerEntryId, LedgerError,
    LedgerFuture, Money, RepositoryError, ReservationId, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::codec::{cents, money, unknown};

const ENTRY_COLUMNS: &str =
    "id, user_id, kind, amount_cents, balance_after_cents, reservation_id, created_at";

/// `PostgreSQL` balance ledger.
#[derive(Clone)]
pub struct PostgresBalanceLedger {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

fn storage(context: &str, error: &sqlx::Error) -> LedgerError {
    LedgerError::Storage(format!("{context}: {error}"))
}

fn codec(error: RepositoryError) -> LedgerError {
    LedgerError::Storage(error.to_string())
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry, LedgerError> {
    let decode = |e: sqlx::Error| storage("decode ledger entry", &e);

    let kind: String = row.try_get("kind").map_err(decode)?;
    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(decode)?),
        kind: EntryKind::parse(&kind)
            .ok_or_else(|| unknown("entry kind", &kind))
            .map_err(codec)?,
        amount: money(row.try_get("amount_cents").map_err(decode)?).map_err(codec)?,
        balance_after: money(row.try_get("balance_after_cents").map_err(decode)?).map_err(codec)?,
        reference: row
            .try_get::<Option<Uuid>, _>("reservation_id")
            .map_err(decode)?
            .map(ReservationId::from_uuid),
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

impl PostgresBalanceLedger {
    /// Creates a ledger over `pool`; entries are stamped with `clock`
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, LedgerError> {
        self.pool.begin().await.map_err(|e| storage("begin", &e))
    }

    /// Locks the account row, creating it at zero if missing, and returns its balance.
    async fn lock_account(tx: &mut Transaction<'static, Postgres>, user_id: &UserId) -> Result<Money, LedgerError> {
        sqlx::query("INSERT INTO balances (user_id, balance_cents) VALUES ($1, 0) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| storage("open account", &e))?;

        let (balance,): (i64,) =
            sqlx::query_as("SELECT balance_cents FROM balances WHERE user_id = $1 FOR UPDATE")
                .bind(user_id.as_str())
                .fetch_one(&mut **tx)
                .await
                .map_err(|e| storage("lock account", &e))?;
        money(balance).map_err(codec)
    }

    /// Latest entry referencing `reservation_id`, if it is an unrefunded payment.
    async fn outstanding_payment(
        tx: &mut Transaction<'static, Postgres>,
        user_id: &UserId,
        reservation_id: ReservationId,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM balance_entries
             WHERE user_id = $1 AND reservation_id = $2
             ORDER BY seq DESC
             LIMIT 1"
        ))
        .bind(user_id.as_str())
        .bind(reservation_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| storage("find payment", &e))?;

        let latest = row.as_ref().map(entry_from_row).transpose()?;
        Ok(latest.filter(|entry| entry.kind == EntryKind::Payment))
    }

    /// Sets the balance and appends the entry describing the movement.
    async fn record(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        user_id: &UserId,
        kind: EntryKind,
        amount: Money,
        balance_after: Money,
        reference: Option<ReservationId>,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = LedgerEntry {
            id: LedgerEntryId::new(),
            user_id: user_id.clone(),
            kind,
            amount,
            balance_after,
            reference,
            created_at: self.clock.now(),
        };

        sqlx::query("UPDATE balances SET balance_cents = $2 WHERE user_id = $1")
            .bind(user_id.as_str())
            .bind(cents(balance_after).map_err(codec)?)
            .execute(&mut **tx)
            .await
            .map_err(|e| storage("update balance", &e))?;

        sqlx::query(&format!(
            "INSERT INTO balance_entries ({ENTRY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(entry.id.as_uuid())
        .bind(entry.user_id.as_str())
        .bind(entry.kind.as_str())
        .bind(cents(entry.amount).map_err(codec)?)
        .bind(cents(entry.balance_after).map_err(codec)?)
        .bind(entry.reference.map(|r| *r.as_uuid()))
        .bind(entry.created_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| storage("append ledger entry", &e))?;

        Ok(entry)
    }

    fn log(entry: &LedgerEntry) {
        metrics::counter!(LEDGER_ENTRIES_METRIC, "kind" => entry.kind.as_str()).increment(1);
        tracing::debug!(
            user_id = %entry.user_id,
            kind = %entry.kind,
            amount = %entry.amount,
            balance_after = %entry.balance_after,
            "Ledger entry recorded"
        );
    }
}

impl BalanceLedger for PostgresBalanceLedger {
    fn balance<'a>(&'a self, user_id: &'a UserId) -> LedgerFuture<'a, Money> {
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as("SELECT balance_cents FROM balances WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| storage("read balance", &e))?;

            row.map_or(Ok(Money::ZERO), |(cents,)| money(cents).map_err(codec))
        })
    }

    fn charge<'a>(&'a self, user_id: &'a UserId, amount: Money) -> LedgerFuture<'a, LedgerEntry> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            let balance = Self::lock_account(&mut tx, user_id).await?;
            let after = balance.checked_add(amount).ok_or(LedgerError::Overflow)?;

            let entry = self
                .record(&mut tx, user_id, EntryKind::Charge, amount, after, None)
                .await?;
            tx.commit().await.map_err(|e| storage("commit", &e))?;
            Self::log(&entry);
            Ok(entry)
        })
    }

    fn debit<'a>(
        &'a self,
        user_id: &'a UserId,
        amount: Money,
        reservation_id: ReservationId,
    ) -> LedgerFuture<'a, LedgerEntry> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            let balance = Self::lock_account(&mut tx, user_id).await?;

            if let Some(existing) = Self::outstanding_payment(&mut tx, user_id, reservation_id).await? {
                tracing::debug!(reservation_id = %reservation_id, "Payment already recorded");
                return Ok(existing);
            }

            let after = balance
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientBalance {
                    balance,
                    required: amount,
                })?;
            let entry = self
                .record(&mut tx, user_id, EntryKind::Payment, amount, after, Some(reservation_id))
                .await?;
            tx.commit().await.map_err(|e| storage("commit", &e))?;
            Self::log(&entry);
            Ok(entry)
        })
    }

    fn refund<'a>(
        &'a self,
        user_id: &'a UserId,
        reservation_id: ReservationId,
    ) -> LedgerFuture<'a, Option<LedgerEntry>> {
        Box::pin(async move {
            let mut tx = self.begin().await?;
            let balance = Self::lock_account(&mut tx, user_id).await?;

            let Some(payment) = Self::outstanding_payment(&mut tx, user_id, reservation_id).await? else {
                return Ok(None);
            };
            let after = balance
                .checked_add(payment.amount)
                .ok_or(LedgerError::Overflow)?;
            let entry = self
                .record(&mut tx, user_id, EntryKind::Refund, payment.amount, after, Some(reservation_id))
                .await?;
            tx.commit().await.map_err(|e| storage("commit", &e))?;
            Self::log(&entry);
            Ok(Some(entry))
        })
    }

    fn entries<'a>(&'a self, user_id: &'a UserId) -> LedgerFuture<'a, Vec<LedgerEntry>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {ENTRY_COLUMNS} FROM balance_entries WHERE user_id = $1 ORDER BY seq"
            ))
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage("list ledger entries", &e))?;

            rows.iter().map(entry_from_row).collect()
        })
    }
}
