//! Seatlock Demo
//!
//! Simulates an on-sale burst against a small concert with in-memory collaborators:
//! - Bidders join the waiting room and are admitted in arrival order
//! - Everyone races for a handful of seats at once; each seat goes to exactly one bidder
//! - Winners pay from their balance; underfunded winners release their hold
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin demo
//! ```

use futures::future::join_all;
use rand::Rng;
use seatlock_core::environment::{Clock, SystemClock};
use seatlock_core::{
    BalanceLedger, ConcertId, EngineError, Money, QueueScope, SeatId, SeatNumber, TracingNotifier,
    UserId,
};
use seatlock_runtime::retry::{RetryPolicy, retry_on_contention};
use seatlock_runtime::{Engine, EngineConfig, EngineEnvironment, LocalLockCoordinator};
use seatlock_testing::{
    InMemoryAdmissionTokenRepository, InMemoryBalanceLedger, InMemoryReservationRepository,
    InMemorySeatRepository,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SEATS: u32 = 5;
const BIDDERS: usize = 20;
const ATTEMPTS: usize = 3;
const PRICE: Money = Money::from_cents(7_500);

/// How one bidder's evening went
enum Outcome {
    Bought(SeatId),
    Underfunded(SeatId),
    SoldOut,
    Failed(EngineError),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,seatlock=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("\n============================================");
    println!("   Seatlock - On-Sale Demo");
    println!("============================================\n");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let balances = InMemoryBalanceLedger::new(Arc::clone(&clock));
    let env = EngineEnvironment::new(
        Arc::new(InMemorySeatRepository::new()),
        Arc::new(InMemoryReservationRepository::new()),
        Arc::new(InMemoryAdmissionTokenRepository::new()),
        Arc::new(balances.clone()),
        Arc::new(LocalLockCoordinator::new(Arc::clone(&clock))),
        Arc::new(TracingNotifier),
        clock,
    );
    let engine = Engine::new(env, EngineConfig::default());

    let concert = ConcertId::new(2025);
    let seats = (1..=SEATS).map(|n| (SeatNumber::new(n), PRICE)).collect();
    engine.ledger.register_concert(concert, seats).await?;
    println!("1. Concert {concert}: {SEATS} seats at {PRICE}");

    // Every fourth bidder cannot afford a seat
    let scope = QueueScope::for_concert(concert);
    let mut tokens = Vec::with_capacity(BIDDERS);
    for i in 0..BIDDERS {
        let user = UserId::new(format!("bidder-{i:02}"));
        let funds = if i % 4 == 3 { Money::from_cents(5_000) } else { Money::from_cents(10_000) };
        balances.charge(&user, funds).await?;
        let token = engine.queue.enqueue(user.clone(), scope.clone()).await?;
        tokens.push((user, token));
    }
    let last = engine.queue.status(&tokens[BIDDERS - 1].1.id).await?;
    println!(
        "2. {BIDDERS} bidders queued; the last is place {} with an estimated wait of {}s",
        last.place_in_line, last.estimated_wait_secs
    );

    let admitted = engine.queue.promote(&scope, engine.config().scope_capacity).await?;
    println!("3. {} bidders admitted, racing for seats...\n", admitted.len());

    let handles: Vec<_> = tokens
        .into_iter()
        .map(|(user, token)| {
            let engine = engine.clone();
            tokio::spawn(async move { bid(&engine, &user, &token.id, concert).await })
        })
        .collect();

    let (mut bought, mut underfunded, mut sold_out, mut failed) = (0, 0, 0, 0);
    for (i, result) in join_all(handles).await.into_iter().enumerate() {
        match result? {
            Outcome::Bought(seat) => {
                bought += 1;
                println!("   bidder-{i:02}: bought seat {}", seat.seat_number);
            }
            Outcome::Underfunded(seat) => {
                underfunded += 1;
                println!("   bidder-{i:02}: held seat {} but could not pay", seat.seat_number);
            }
            Outcome::SoldOut => sold_out += 1,
            Outcome::Failed(e) => {
                failed += 1;
                println!("   bidder-{i:02}: failed ({})", e.code());
            }
        }
    }

    let remaining = engine.ledger.available_seats(concert).await?;
    let report = engine.reaper.sweep().await?;

    println!("\n4. Results");
    println!("   Seats sold:          {bought}");
    println!("   Holds released:      {underfunded}");
    println!("   Turned away:         {sold_out}");
    println!("   Errors:              {failed}");
    println!("   Seats still open:    {}", remaining.len());
    println!("   Expired by sweep:    {}", report.reservations_expired);
    println!("\n============================================\n");

    Ok(())
}

/// Tries up to [`ATTEMPTS`] random seats, then pays for the first one held.
async fn bid(
    engine: &Engine,
    user: &UserId,
    token: &seatlock_core::AdmissionTokenId,
    concert: ConcertId,
) -> Outcome {
    for _ in 0..ATTEMPTS {
        let number = rand::thread_rng().gen_range(1..=SEATS);
        let seat_id = SeatId::new(concert, SeatNumber::new(number));

        let reservation = match engine.reservations.hold(token, user, seat_id).await {
            Ok(reservation) => reservation,
            Err(EngineError::SeatNotAvailable { .. }) => continue,
            Err(e) => return Outcome::Failed(e),
        };

        let paid = retry_on_contention(RetryPolicy::default(), || {
            engine.payments.pay(reservation.id, user)
        })
        .await;

        return match paid {
            Ok(_) => Outcome::Bought(seat_id),
            Err(EngineError::InsufficientBalance { .. }) => {
                match engine.reservations.cancel(reservation.id, user).await {
                    Ok(_) => Outcome::Underfunded(seat_id),
                    Err(e) => Outcome::Failed(e),
                }
            }
            Err(e) => Outcome::Failed(e),
        };
    }
    Outcome::SoldOut
}
