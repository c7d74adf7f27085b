//! Seat storage.

use chrono::{DateTime, Utc};
use seatlock_core::{
    ConcertId, RepoFuture, RepositoryError, Seat, SeatId, SeatRepository, SeatStatus,
    SeatStatusKind, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::codec::{cents, concert_key, db_error, money, seat_id, seat_key, unknown};

const SEAT_COLUMNS: &str =
    "concert_id, seat_number, price_cents, status, holder, hold_expires_at, reserved_at";

/// `PostgreSQL` seat repository.
#[derive(Clone)]
pub struct PostgresSeatRepository {
    pool: PgPool,
}

impl PostgresSeatRepository {
    /// Creates a repository over `pool`
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Column values for a seat's status.
fn status_columns(status: &SeatStatus) -> (Option<&str>, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    match status {
        SeatStatus::Available => (None, None, None),
        SeatStatus::Held { holder, expires_at } => (Some(holder.as_str()), Some(*expires_at), None),
        SeatStatus::Reserved { reserved_at } => (None, None, Some(*reserved_at)),
    }
}

fn seat_from_row(row: &PgRow) -> Result<Seat, RepositoryError> {
    let decode = |e: sqlx::Error| db_error("decode seat", &e);

    let id = seat_id(
        row.try_get("concert_id").map_err(decode)?,
        row.try_get("seat_number").map_err(decode)?,
    )?;
    let price = money(row.try_get("price_cents").map_err(decode)?)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let holder: Option<String> = row.try_get("holder").map_err(decode)?;
    let hold_expires_at: Option<DateTime<Utc>> = row.try_get("hold_expires_at").map_err(decode)?;
    let reserved_at: Option<DateTime<Utc>> = row.try_get("reserved_at").map_err(decode)?;

    let status = match (SeatStatusKind::parse(&status), holder, hold_expires_at, reserved_at) {
        (Some(SeatStatusKind::Available), _, _, _) => SeatStatus::Available,
        (Some(SeatStatusKind::Held), Some(holder), Some(expires_at), _) => SeatStatus::Held {
            holder: UserId::new(holder),
            expires_at,
        },
        (Some(SeatStatusKind::Reserved), _, _, Some(reserved_at)) => SeatStatus::Reserved { reserved_at },
        _ => return Err(unknown("seat status", &status)),
    };
    Ok(Seat::restore(id, price, status))
}

impl SeatRepository for PostgresSeatRepository {
    fn insert_many(&self, seats: Vec<Seat>) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("begin", &e))?;

            for seat in &seats {
                let (concert, number) = seat_key(seat.id())?;
                let (holder, hold_expires_at, reserved_at) = status_columns(seat.status());
                sqlx::query(
                    r"
                    INSERT INTO seats (concert_id, seat_number, price_cents, status, holder, hold_expires_at, reserved_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ",
                )
                .bind(concert)
                .bind(number)
                .bind(cents(seat.price())?)
                .bind(seat.status().kind().as_str())
                .bind(holder)
                .bind(hold_expires_at)
                .bind(reserved_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error(&format!("insert seat {}", seat.id()), &e))?;
            }

            tx.commit().await.map_err(|e| db_error("commit", &e))?;
            tracing::debug!(seats = seats.len(), "Seats inserted");
            Ok(())
        })
    }

    fn find(&self, seat_id: SeatId) -> RepoFuture<'_, Option<Seat>> {
        Box::pin(async move {
            let (concert, number) = seat_key(seat_id)?;
            let row = sqlx::query(&format!(
                "SELECT {SEAT_COLUMNS} FROM seats WHERE concert_id = $1 AND seat_number = $2"
            ))
            .bind(concert)
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find seat", &e))?;

            row.as_ref().map(seat_from_row).transpose()
        })
    }

    fn save(&self, seat: Seat) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let (concert, number) = seat_key(seat.id())?;
            let (holder, hold_expires_at, reserved_at) = status_columns(seat.status());
            let result = sqlx::query(
                r"
                UPDATE seats
                SET price_cents = $3, status = $4, holder = $5, hold_expires_at = $6, reserved_at = $7
                WHERE concert_id = $1 AND seat_number = $2
                ",
            )
            .bind(concert)
            .bind(number)
            .bind(cents(seat.price())?)
            .bind(seat.status().kind().as_str())
            .bind(holder)
            .bind(hold_expires_at)
            .bind(reserved_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("save seat", &e))?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound(format!("seat {}", seat.id())));
            }
            Ok(())
        })
    }

    fn list_by_concert(&self, concert_id: ConcertId) -> RepoFuture<'_, Vec<Seat>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {SEAT_COLUMNS} FROM seats WHERE concert_id = $1 ORDER BY seat_number"
            ))
            .bind(concert_key(concert_id)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list seats", &e))?;

            rows.iter().map(seat_from_row).collect()
        })
    }
}
