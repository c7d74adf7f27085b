//! Conversions between domain values and column types.

use seatlock_core::{ConcertId, Money, RepositoryError, SeatId, SeatNumber};

/// Maps a driver error, turning unique violations into [`RepositoryError::Conflict`].
pub(crate) fn db_error(context: &str, error: &sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = error {
        if db.is_unique_violation() {
            return RepositoryError::Conflict(format!("{context}: {db}"));
        }
    }
    RepositoryError::Storage(format!("{context}: {error}"))
}

fn out_of_range(what: &str, value: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Storage(format!("{what} out of range: {value}"))
}

pub(crate) fn to_i64(what: &str, value: u64) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| out_of_range(what, value))
}

pub(crate) fn to_u64(what: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| out_of_range(what, value))
}

pub(crate) fn cents(money: Money) -> Result<i64, RepositoryError> {
    to_i64("amount", money.cents())
}

pub(crate) fn money(cents: i64) -> Result<Money, RepositoryError> {
    to_u64("amount", cents).map(Money::from_cents)
}

pub(crate) fn concert_key(concert_id: ConcertId) -> Result<i64, RepositoryError> {
    to_i64("concert id", concert_id.value())
}

pub(crate) fn seat_key(seat_id: SeatId) -> Result<(i64, i32), RepositoryError> {
    let number = seat_id.seat_number.value();
    let number = i32::try_from(number).map_err(|_| out_of_range("seat number", number))?;
    Ok((concert_key(seat_id.concert_id)?, number))
}

pub(crate) fn seat_id(concert_id: i64, seat_number: i32) -> Result<SeatId, RepositoryError> {
    let concert = to_u64("concert id", concert_id)?;
    let number = u32::try_from(seat_number).map_err(|_| out_of_range("seat number", seat_number))?;
    Ok(SeatId::new(ConcertId::new(concert), SeatNumber::new(number)))
}

pub(crate) fn unknown(column: &str, value: &str) -> RepositoryError {
    RepositoryError::Storage(format!("unknown {column} value: {value}"))
}
