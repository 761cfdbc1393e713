use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{
    Balance, MAX_ACCRUAL, Operation, OperationKind, OperationStatus, Points, UserId,
};

use super::{
    ClaimOutcome, LedgerStore, MIGRATION_001_OPERATIONS, ReconcileOutcome, WithdrawalOutcome,
};

/// How long a writer waits for the database write lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MAX_CONNECTIONS: u32 = 8;

const OPERATION_COLUMNS: &str =
    "sequence, id, user_id, order_number, amount, kind, status, processed_at";

/// SQLite-backed ledger.
///
/// Claims and withdrawals run inside `BEGIN IMMEDIATE` transactions, which take
/// the database write lock before the first read, so the check and the insert
/// can never interleave with another writer. Reconciliation is a single
/// conditional `UPDATE`.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Create a new ledger with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database, creating the file if it doesn't exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_OPERATIONS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let ledger = Self::connect(database_url).await?;
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ========================
    // Transactions
    // ========================

    /// Start a transaction that takes the write lock up front.
    ///
    /// The returned transaction rolls back when dropped, so a cancelled caller
    /// never hands a connection with an open transaction back to the pool.
    async fn begin_immediate(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("Failed to begin transaction")
    }

    /// Commit on success, roll back on any error.
    async fn finish<T>(tx: Transaction<'static, Sqlite>, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                tx.commit().await.context("Failed to commit transaction")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Failed to roll back transaction");
                }
                Err(e)
            }
        }
    }

    async fn claim_in_tx(
        conn: &mut SqliteConnection,
        user_id: UserId,
        order_number: &str,
    ) -> Result<ClaimOutcome> {
        let existing = sqlx::query(
            "SELECT user_id FROM operations WHERE order_number = ? AND kind = 'accrual'",
        )
        .bind(order_number)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to look up order")?;

        if let Some(row) = existing {
            let owner: i64 = row.get("user_id");
            return Ok(if owner == user_id {
                ClaimOutcome::AlreadyClaimedBySelf
            } else {
                ClaimOutcome::AlreadyClaimedByOther
            });
        }

        let mut operation = Operation::new_accrual(user_id, order_number);
        operation.sequence = Self::insert_operation(conn, &operation).await?;
        Ok(ClaimOutcome::Created(operation))
    }

    async fn withdraw_in_tx(
        conn: &mut SqliteConnection,
        user_id: UserId,
        order_number: &str,
        sum: Points,
    ) -> Result<WithdrawalOutcome> {
        let balance = Self::balance_with(&mut *conn, user_id).await?;
        if !balance.covers(sum) {
            return Ok(WithdrawalOutcome::InsufficientFunds {
                available: balance.current,
            });
        }

        let mut operation = Operation::new_withdrawal(user_id, order_number, sum);
        operation.sequence = Self::insert_operation(conn, &operation).await?;
        Ok(WithdrawalOutcome::Committed(operation))
    }

    /// Insert an operation and return its assigned sequence number.
    async fn insert_operation(conn: &mut SqliteConnection, operation: &Operation) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO operations (id, user_id, order_number, amount, kind, status, processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING sequence
            "#,
        )
        .bind(operation.id.to_string())
        .bind(operation.user_id)
        .bind(&operation.order_number)
        .bind(operation.amount)
        .bind(operation.kind.as_str())
        .bind(operation.status.as_str())
        .bind(operation.processed_at.to_rfc3339())
        .fetch_one(&mut *conn)
        .await
        .context("Failed to save operation")?;

        Ok(row.get("sequence"))
    }

    // ========================
    // Queries
    // ========================

    async fn balance_with<'e, E>(executor: E, user_id: UserId) -> Result<Balance>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount), 0) as current,
                COALESCE(SUM(CASE WHEN kind = 'withdrawal' THEN -amount ELSE 0 END), 0) as withdrawn
            FROM operations
            WHERE user_id = ? AND status = 'PROCESSED'
            "#,
        )
        .bind(user_id)
        .fetch_one(executor)
        .await
        .context("Failed to compute balance")?;

        Ok(Balance {
            current: row.get("current"),
            withdrawn: row.get("withdrawn"),
        })
    }

    async fn list_for_user(&self, user_id: UserId, kind: OperationKind) -> Result<Vec<Operation>> {
        let query = format!(
            "SELECT {} FROM operations WHERE user_id = ? AND kind = ? ORDER BY sequence",
            OPERATION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list {} operations", kind))?;

        rows.iter().map(Self::row_to_operation).collect()
    }

    fn row_to_operation(row: &SqliteRow) -> Result<Operation> {
        let id_str: String = row.get("id");
        let kind_str: String = row.get("kind");
        let status_str: String = row.get("status");
        let processed_at_str: String = row.get("processed_at");

        Ok(Operation {
            id: Uuid::parse_str(&id_str).context("Invalid operation ID")?,
            sequence: row.get("sequence"),
            user_id: row.get("user_id"),
            order_number: row.get("order_number"),
            amount: row.get("amount"),
            kind: OperationKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid operation kind: {}", kind_str))?,
            status: OperationStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid operation status: {}", status_str))?,
            processed_at: DateTime::parse_from_rfc3339(&processed_at_str)
                .context("Invalid processed_at timestamp")?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn record_accrual_claim(
        &self,
        user_id: UserId,
        order_number: &str,
    ) -> Result<ClaimOutcome> {
        let mut tx = self.begin_immediate().await?;
        let result = Self::claim_in_tx(&mut tx, user_id, order_number).await;
        Self::finish(tx, result).await
    }

    async fn find_accrual_owner(&self, order_number: &str) -> Result<Option<Operation>> {
        let query = format!(
            "SELECT {} FROM operations WHERE order_number = ? AND kind = 'accrual'",
            OPERATION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch order")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_operation(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_pending(&self) -> Result<Vec<Operation>> {
        let query = format!(
            "SELECT {} FROM operations WHERE kind = 'accrual' AND status IN ('NEW', 'PROCESSING') ORDER BY sequence",
            OPERATION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pending orders")?;

        rows.iter().map(Self::row_to_operation).collect()
    }

    async fn apply_reconciliation_result(
        &self,
        order_number: &str,
        status: OperationStatus,
        accrual: Points,
    ) -> Result<ReconcileOutcome> {
        ensure!(
            accrual <= MAX_ACCRUAL,
            "Accrual {} for order {} exceeds the limit",
            accrual,
            order_number
        );
        let predecessors = status.predecessors();

        if !predecessors.is_empty() {
            let placeholders = vec!["?"; predecessors.len()].join(", ");
            let query = format!(
                r#"
                UPDATE operations
                SET status = ?, amount = COALESCE(?, amount), processed_at = ?
                WHERE order_number = ? AND kind = 'accrual' AND status IN ({})
                "#,
                placeholders
            );

            let new_amount =
                (status == OperationStatus::Processed && accrual > 0).then_some(accrual);

            let mut sql_query = sqlx::query(&query)
                .bind(status.as_str())
                .bind(new_amount)
                .bind(Utc::now().to_rfc3339())
                .bind(order_number);
            for predecessor in predecessors {
                sql_query = sql_query.bind(predecessor.as_str());
            }

            let result = sql_query
                .execute(&self.pool)
                .await
                .context("Failed to update order status")?;

            if result.rows_affected() > 0 {
                return Ok(ReconcileOutcome::Applied);
            }
        }

        match self.find_accrual_owner(order_number).await? {
            Some(current) => {
                debug!(
                    order = %order_number,
                    current = %current.status,
                    reported = %status,
                    "Ignoring reconciliation result"
                );
                Ok(ReconcileOutcome::Unchanged)
            }
            None => Ok(ReconcileOutcome::NotFound),
        }
    }

    async fn current_balance(&self, user_id: UserId) -> Result<Balance> {
        Self::balance_with(&self.pool, user_id).await
    }

    async fn attempt_withdrawal(
        &self,
        user_id: UserId,
        order_number: &str,
        sum: Points,
    ) -> Result<WithdrawalOutcome> {
        ensure!(sum > 0, "Withdrawal sum must be positive, got {}", sum);
        let mut tx = self.begin_immediate().await?;
        let result = Self::withdraw_in_tx(&mut tx, user_id, order_number, sum).await;
        Self::finish(tx, result).await
    }

    async fn list_accruals(&self, user_id: UserId) -> Result<Vec<Operation>> {
        self.list_for_user(user_id, OperationKind::Accrual).await
    }

    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Operation>> {
        self.list_for_user(user_id, OperationKind::Withdrawal).await
    }
}
