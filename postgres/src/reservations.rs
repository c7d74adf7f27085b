//! Reservation storage.

use chrono::{DateTime, Utc};
use seatlock_core::{
    ExpiryCursor, RepoFuture, RepositoryError, Reservation, ReservationId, ReservationRepository,
    ReservationStatus, SeatId, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::codec::{cents, db_error, money, seat_id, seat_key, unknown};

const RESERVATION_COLUMNS: &str =
    "id, concert_id, seat_number, user_id, price_cents, status, created_at, expires_at, updated_at";

/// `PostgreSQL` reservation repository.
///
/// A partial unique index keeps at most one PENDING reservation per seat.
#[derive(Clone)]
pub struct PostgresReservationRepository {
    pool: PgPool,
}

impl PostgresReservationRepository {
    /// Creates a repository over `pool`
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn reservation_from_row(row: &PgRow) -> Result<Reservation, RepositoryError> {
    let decode = |e: sqlx::Error| db_error("decode reservation", &e);

    let status: String = row.try_get("status").map_err(decode)?;
    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode)?),
        seat_id: seat_id(
            row.try_get("concert_id").map_err(decode)?,
            row.try_get("seat_number").map_err(decode)?,
        )?,
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(decode)?),
        price: money(row.try_get("price_cents").map_err(decode)?)?,
        status: ReservationStatus::parse(&status).ok_or_else(|| unknown("reservation status", &status))?,
        created_at: row.try_get("created_at").map_err(decode)?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

impl ReservationRepository for PostgresReservationRepository {
    fn insert(&self, reservation: Reservation) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let (concert, number) = seat_key(reservation.seat_id)?;
            sqlx::query(
                r"
                INSERT INTO reservations (id, concert_id, seat_number, user_id, price_cents, status, created_at, expires_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(reservation.id.as_uuid())
            .bind(concert)
            .bind(number)
            .bind(reservation.user_id.as_str())
            .bind(cents(reservation.price)?)
            .bind(reservation.status.as_str())
            .bind(reservation.created_at)
            .bind(reservation.expires_at)
            .bind(reservation.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(&format!("insert reservation {}", reservation.id), &e))?;
            Ok(())
        })
    }

    fn find(&self, id: ReservationId) -> RepoFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find reservation", &e))?;

            row.as_ref().map(reservation_from_row).transpose()
        })
    }

    fn save(&self, reservation: Reservation) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE reservations
                SET status = $2, expires_at = $3, updated_at = $4
                WHERE id = $1
                ",
            )
            .bind(reservation.id.as_uuid())
            .bind(reservation.status.as_str())
            .bind(reservation.expires_at)
            .bind(reservation.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("save reservation", &e))?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound(format!("reservation {}", reservation.id)));
            }
            Ok(())
        })
    }

    fn find_pending_for_seat(&self, seat_id: SeatId) -> RepoFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            let (concert, number) = seat_key(seat_id)?;
            let row = sqlx::query(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations
                 WHERE concert_id = $1 AND seat_number = $2 AND status = 'PENDING'"
            ))
            .bind(concert)
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find pending reservation", &e))?;

            row.as_ref().map(reservation_from_row).transpose()
        })
    }

    fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        after: Option<ExpiryCursor>,
        limit: usize,
    ) -> RepoFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let (after_expiry, after_id) = after.map_or((None, None), |(expires_at, id)| {
                (Some(expires_at), Some(*id.as_uuid()))
            });
            let rows = sqlx::query(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations
                 WHERE status = 'PENDING' AND expires_at <= $1
                   AND ($2::timestamptz IS NULL OR (expires_at, id) > ($2::timestamptz, $3::uuid))
                 ORDER BY expires_at, id
                 LIMIT $4"
            ))
            .bind(now)
            .bind(after_expiry)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list expired reservations", &e))?;

            rows.iter().map(reservation_from_row).collect()
        })
    }
}
