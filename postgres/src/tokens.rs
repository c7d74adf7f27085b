//! Admission token storage.

use chrono::{DateTime, Utc};
use seatlock_core::{
    AdmissionToken, AdmissionTokenId, AdmissionTokenRepository, QueueScope, RepoFuture,
    RepositoryError, TokenStatus, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::codec::{db_error, to_i64, to_u64, unknown};

const TOKEN_COLUMNS: &str = "id, user_id, scope, position, place_in_line, estimated_wait_secs, \
                             status, issued_at, expires_at, activated_at";

/// `PostgreSQL` admission token repository.
///
/// Positions come from a per-scope counter row updated atomically, so concurrent
/// enqueues never share a position.
#[derive(Clone)]
pub struct PostgresAdmissionTokenRepository {
    pool: PgPool,
}

impl PostgresAdmissionTokenRepository {
    /// Creates a repository over `pool`
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn token_from_row(row: &PgRow) -> Result<AdmissionToken, RepositoryError> {
    let decode = |e: sqlx::Error| db_error("decode token", &e);

    let status: String = row.try_get("status").map_err(decode)?;
    Ok(AdmissionToken {
        id: AdmissionTokenId::new(row.try_get::<String, _>("id").map_err(decode)?),
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(decode)?),
        scope: QueueScope::new(row.try_get::<String, _>("scope").map_err(decode)?),
        position: to_u64("position", row.try_get("position").map_err(decode)?)?,
        place_in_line: to_u64("place in line", row.try_get("place_in_line").map_err(decode)?)?,
        estimated_wait_secs: to_u64(
            "estimated wait",
            row.try_get("estimated_wait_secs").map_err(decode)?,
        )?,
        status: TokenStatus::parse(&status).ok_or_else(|| unknown("token status", &status))?,
        issued_at: row.try_get("issued_at").map_err(decode)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        activated_at: row.try_get("activated_at").map_err(decode)?,
    })
}

fn count(value: i64) -> Result<u64, RepositoryError> {
    to_u64("count", value)
}

impl AdmissionTokenRepository for PostgresAdmissionTokenRepository {
    fn next_position<'a>(&'a self, scope: &'a QueueScope) -> RepoFuture<'a, u64> {
        Box::pin(async move {
            let (position,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO queue_sequences (scope, last_position) VALUES ($1, 1)
                ON CONFLICT (scope) DO UPDATE SET last_position = queue_sequences.last_position + 1
                RETURNING last_position
                ",
            )
            .bind(scope.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("next position", &e))?;

            to_u64("position", position)
        })
    }

    fn insert_unique(&self, token: AdmissionToken, now: DateTime<Utc>) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("begin", &e))?;

            // Serializes enqueues of one user into one scope
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(format!("{}\u{1f}{}", token.user_id, token.scope))
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("lock user queue entry", &e))?;

            let (live,): (bool,) = sqlx::query_as(
                r"
                SELECT EXISTS (
                    SELECT 1 FROM admission_tokens
                    WHERE user_id = $1 AND scope = $2 AND status <> 'EXPIRED' AND expires_at > $3
                )
                ",
            )
            .bind(token.user_id.as_str())
            .bind(token.scope.as_str())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("check live token", &e))?;

            if live {
                return Err(RepositoryError::Conflict(format!(
                    "user {} already queued in {}",
                    token.user_id, token.scope
                )));
            }

            sqlx::query(&format!(
                "INSERT INTO admission_tokens ({TOKEN_COLUMNS})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
            ))
            .bind(token.id.as_str())
            .bind(token.user_id.as_str())
            .bind(token.scope.as_str())
            .bind(to_i64("position", token.position)?)
            .bind(to_i64("place in line", token.place_in_line)?)
            .bind(to_i64("estimated wait", token.estimated_wait_secs)?)
            .bind(token.status.as_str())
            .bind(token.issued_at)
            .bind(token.expires_at)
            .bind(token.activated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("insert token", &e))?;

            tx.commit().await.map_err(|e| db_error("commit", &e))?;
            Ok(())
        })
    }

    fn find<'a>(&'a self, id: &'a AdmissionTokenId) -> RepoFuture<'a, Option<AdmissionToken>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {TOKEN_COLUMNS} FROM admission_tokens WHERE id = $1"
            ))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find token", &e))?;

            row.as_ref().map(token_from_row).transpose()
        })
    }

    fn save(&self, token: AdmissionToken) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE admission_tokens
                SET place_in_line = $2, estimated_wait_secs = $3, status = $4,
                    expires_at = $5, activated_at = $6
                WHERE id = $1
                ",
            )
            .bind(token.id.as_str())
            .bind(to_i64("place in line", token.place_in_line)?)
            .bind(to_i64("estimated wait", token.estimated_wait_secs)?)
            .bind(token.status.as_str())
            .bind(token.expires_at)
            .bind(token.activated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("save token", &e))?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound(format!("token {}", token.id)));
            }
            Ok(())
        })
    }

    fn list_waiting<'a>(
        &'a self,
        scope: &'a QueueScope,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepoFuture<'a, Vec<AdmissionToken>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TOKEN_COLUMNS} FROM admission_tokens
                 WHERE scope = $1 AND status = 'WAITING' AND expires_at > $2
                 ORDER BY position
                 LIMIT $3"
            ))
            .bind(scope.as_str())
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list waiting tokens", &e))?;

            rows.iter().map(token_from_row).collect()
        })
    }

    fn count_waiting_before<'a>(&'a self, scope: &'a QueueScope, position: u64) -> RepoFuture<'a, u64> {
        Box::pin(async move {
            let (ahead,): (i64,) = sqlx::query_as(
                r"
                SELECT COUNT(*) FROM admission_tokens
                WHERE scope = $1 AND status = 'WAITING' AND position < $2
                ",
            )
            .bind(scope.as_str())
            .bind(to_i64("position", position)?)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count waiting tokens", &e))?;

            count(ahead)
        })
    }

    fn count_active<'a>(&'a self, scope: &'a QueueScope, now: DateTime<Utc>) -> RepoFuture<'a, u64> {
        Box::pin(async move {
            let (active,): (i64,) = sqlx::query_as(
                r"
                SELECT COUNT(*) FROM admission_tokens
                WHERE scope = $1 AND status = 'ACTIVE' AND expires_at > $2
                ",
            )
            .bind(scope.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("count active tokens", &e))?;

            count(active)
        })
    }

    fn list_lapsed(&self, now: DateTime<Utc>, limit: usize) -> RepoFuture<'_, Vec<AdmissionToken>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TOKEN_COLUMNS} FROM admission_tokens
                 WHERE status <> 'EXPIRED' AND expires_at <= $1
                 ORDER BY expires_at
                 LIMIT $2"
            ))
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list lapsed tokens", &e))?;

            rows.iter().map(token_from_row).collect()
        })
    }

    fn scopes(&self) -> RepoFuture<'_, Vec<QueueScope>> {
        Box::pin(async move {
            let scopes: Vec<(String,)> = sqlx::query_as(
                "SELECT DISTINCT scope FROM admission_tokens WHERE status = 'WAITING' ORDER BY scope",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list scopes", &e))?;

            Ok(scopes.into_iter().map(|(scope,)| QueueScope::new(scope)).collect())
        })
    }
}
