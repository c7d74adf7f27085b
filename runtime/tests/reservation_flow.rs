//! Integration tests for hold, confirm and cancel
//!
//! Every test drives the engine through `TestHarness`, whose manual clock lets hold
//! windows run out without sleeping.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration;
use seatlock_core::environment::Clock;
use seatlock_core::{
    ConcertId, EngineError, LeaseHolder, LeaseKey, LockCoordinator, Money, QueueScope,
    ReservationStatus, SeatId, SeatNumber, SeatStatusKind, UserId,
};
use seatlock_testing::TestHarness;

const PRICE: Money = Money::from_cents(5_000);

fn seat(n: u32) -> SeatId {
    SeatId::new(ConcertId::new(1), SeatNumber::new(n))
}

async fn harness_with_concert() -> TestHarness {
    let harness = TestHarness::new();
    harness.concert(1, 10, PRICE).await.unwrap();
    harness
}

// ============================================================================
// Hold
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_holds_on_one_seat_admit_exactly_one() {
    let harness = harness_with_concert().await;
    let alice = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let bob = harness.admit("bob", ConcertId::new(1)).await.unwrap();

    let engine_a = harness.engine.reservations.clone();
    let engine_b = harness.engine.reservations.clone();
    let a = tokio::spawn(async move { engine_a.hold(&alice.id, &UserId::new("alice"), seat(1)).await });
    let b = tokio::spawn(async move { engine_b.hold(&bob.id, &UserId::new("bob"), seat(1)).await });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let won: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(won.len(), 1, "exactly one hold must succeed: {results:?}");
    assert_eq!(won[0].status, ReservationStatus::Pending);

    let lost = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(
        matches!(lost, EngineError::SeatNotAvailable { seat_id, .. } if *seat_id == seat(1)),
        "loser must see SeatNotAvailable, got {lost:?}"
    );

    let stored = harness.seats.get(seat(1)).unwrap();
    assert_eq!(stored.holder(), Some(&won[0].user_id));
    assert_eq!(harness.reservations.for_seat(seat(1)).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn burst_of_bidders_on_one_seat_admits_exactly_one() {
    const BIDDERS: usize = 32;

    seatlock_testing::init_test_tracing();
    let harness = harness_with_concert().await;
    let mut bidders = Vec::with_capacity(BIDDERS);
    for n in 0..BIDDERS {
        let user = format!("bidder-{n:02}");
        let token = harness.admit(&user, ConcertId::new(1)).await.unwrap();
        bidders.push((UserId::new(user), token.id));
    }

    // Release every bidder at once
    let start = std::sync::Arc::new(tokio::sync::Barrier::new(BIDDERS));
    let handles: Vec<_> = bidders
        .into_iter()
        .map(|(user, token)| {
            let reservations = harness.engine.reservations.clone();
            let start = std::sync::Arc::clone(&start);
            tokio::spawn(async move {
                start.wait().await;
                reservations.hold(&token, &user, seat(1)).await
            })
        })
        .collect();
    let mut results = Vec::with_capacity(BIDDERS);
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let won: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(won.len(), 1, "exactly one hold must succeed");
    let lost: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(lost.len(), BIDDERS - 1);
    for e in lost {
        assert!(
            matches!(e, EngineError::SeatNotAvailable { seat_id, .. } if *seat_id == seat(1)),
            "losers must see SeatNotAvailable, got {e:?}"
        );
    }

    let stored = harness.seats.get(seat(1)).unwrap();
    assert_eq!(stored.holder(), Some(&won[0].user_id));
    assert_eq!(harness.reservations.for_seat(seat(1)).len(), 1);
}

#[tokio::test]
async fn hold_creates_pending_reservation_with_hold_window() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let now = harness.clock.now();

    let reservation = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(3))
        .await
        .unwrap();

    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert_eq!(reservation.price, PRICE);
    assert_eq!(reservation.expires_at, now + Duration::seconds(300));
    assert_eq!(
        harness.seats.get(seat(3)).unwrap().status().kind(),
        SeatStatusKind::Held
    );
    assert_eq!(harness.notifier.of_kind("seat_held").len(), 1);

    let view = harness.engine.reservations.reservation(reservation.id).await.unwrap();
    assert_eq!(view.remaining, Duration::seconds(300));
    harness.clock.advance(Duration::seconds(100));
    let view = harness.engine.reservations.reservation(reservation.id).await.unwrap();
    assert_eq!(view.remaining, Duration::seconds(200));
}

#[tokio::test]
async fn hold_requires_active_token() {
    let harness = harness_with_concert().await;
    let waiting = harness
        .engine
        .queue
        .enqueue(UserId::new("alice"), QueueScope::for_concert(ConcertId::new(1)))
        .await
        .unwrap();

    let result = harness
        .engine
        .reservations
        .hold(&waiting.id, &UserId::new("alice"), seat(1))
        .await;
    assert_eq!(result, Err(EngineError::AdmissionRequired));
    assert!(harness.seats.get(seat(1)).unwrap().is_available());
}

#[tokio::test]
async fn hold_rejects_borrowed_or_foreign_tokens() {
    let harness = TestHarness::new();
    harness.concert(1, 5, PRICE).await.unwrap();
    harness.concert(2, 5, PRICE).await.unwrap();
    let alice = harness.admit("alice", ConcertId::new(1)).await.unwrap();

    // Someone else's token
    let borrowed = harness
        .engine
        .reservations
        .hold(&alice.id, &UserId::new("mallory"), seat(1))
        .await;
    assert_eq!(borrowed, Err(EngineError::AdmissionRequired));

    // A token for another concert
    let other_concert = SeatId::new(ConcertId::new(2), SeatNumber::new(1));
    let foreign = harness
        .engine
        .reservations
        .hold(&alice.id, &UserId::new("alice"), other_concert)
        .await;
    assert_eq!(foreign, Err(EngineError::AdmissionRequired));
}

#[tokio::test]
async fn hold_after_token_window_is_refused() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    harness.clock.advance(Duration::minutes(30));

    let result = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(1))
        .await;
    assert_eq!(result, Err(EngineError::AdmissionRequired));
}

#[tokio::test]
async fn hold_on_unknown_seat_is_not_found() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();

    let result = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(99))
        .await;
    assert_eq!(result, Err(EngineError::SeatNotFound(seat(99))));
}

#[tokio::test]
async fn hold_on_held_seat_reports_status() {
    let harness = harness_with_concert().await;
    let alice = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let bob = harness.admit("bob", ConcertId::new(1)).await.unwrap();

    harness
        .engine
        .reservations
        .hold(&alice.id, &UserId::new("alice"), seat(1))
        .await
        .unwrap();
    let result = harness
        .engine
        .reservations
        .hold(&bob.id, &UserId::new("bob"), seat(1))
        .await;

    assert_eq!(
        result,
        Err(EngineError::SeatNotAvailable {
            seat_id: seat(1),
            status: Some(SeatStatusKind::Held),
        })
    );
}

#[tokio::test]
async fn hold_while_seat_lease_is_taken_is_contention() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let other = LeaseHolder::new("someone-else");
    assert!(harness
        .locks
        .acquire(&LeaseKey::seat(seat(1)), &other, std::time::Duration::from_secs(10))
        .await
        .unwrap());

    let result = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(1))
        .await;
    assert_eq!(
        result,
        Err(EngineError::SeatNotAvailable {
            seat_id: seat(1),
            status: None,
        })
    );
    assert!(harness.seats.get(seat(1)).unwrap().is_available());
}

#[tokio::test]
async fn lapsed_hold_is_reclaimed_by_next_hold() {
    let harness = harness_with_concert().await;
    let alice = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let bob = harness.admit("bob", ConcertId::new(1)).await.unwrap();

    let first = harness
        .engine
        .reservations
        .hold(&alice.id, &UserId::new("alice"), seat(1))
        .await
        .unwrap();
    harness.clock.advance(Duration::seconds(301));

    let second = harness
        .engine
        .reservations
        .hold(&bob.id, &UserId::new("bob"), seat(1))
        .await
        .unwrap();

    assert_eq!(
        harness.reservations.get(first.id).unwrap().status,
        ReservationStatus::Expired
    );
    assert_eq!(
        harness.seats.get(seat(1)).unwrap().holder(),
        Some(&UserId::new("bob"))
    );
    assert_eq!(second.status, ReservationStatus::Pending);
    assert_eq!(harness.notifier.of_kind("reservation_expired").len(), 1);
}

#[tokio::test]
async fn failed_reservation_insert_frees_the_seat() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    harness.reservations.fail_inserts(true);

    let result = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(1))
        .await;
    assert!(matches!(result, Err(EngineError::Repository(_))));
    assert!(harness.seats.get(seat(1)).unwrap().is_available());
    assert!(harness.notifier.of_kind("seat_held").is_empty());
}

// ============================================================================
// Confirm
// ============================================================================

#[tokio::test]
async fn confirm_reserves_the_seat() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let held = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(2))
        .await
        .unwrap();

    let confirmed = harness.engine.reservations.confirm(held.id).await.unwrap();

    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    let stored_seat = harness.seats.get(seat(2)).unwrap();
    assert_eq!(stored_seat.status().kind(), SeatStatusKind::Reserved);
    assert_eq!(stored_seat.holder(), None);
    assert_eq!(harness.notifier.of_kind("reservation_confirmed").len(), 1);

    let view = harness.engine.reservations.reservation(held.id).await.unwrap();
    assert_eq!(view.remaining, Duration::zero());
}

#[tokio::test]
async fn confirm_after_deadline_fails_even_before_sweep() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let held = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(1))
        .await
        .unwrap();

    harness.clock.advance(Duration::seconds(300));
    let result = harness.engine.reservations.confirm(held.id).await;

    assert_eq!(
        result,
        Err(EngineError::ReservationExpired {
            reservation_id: held.id
        })
    );
    assert_eq!(
        harness.seats.get(seat(1)).unwrap().status().kind(),
        SeatStatusKind::Held
    );
}

#[tokio::test]
async fn confirm_twice_is_not_pending() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let held = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(1))
        .await
        .unwrap();

    harness.engine.reservations.confirm(held.id).await.unwrap();
    let again = harness.engine.reservations.confirm(held.id).await;

    assert_eq!(
        again,
        Err(EngineError::ReservationNotPending {
            reservation_id: held.id,
            status: ReservationStatus::Confirmed,
        })
    );
}

#[tokio::test]
async fn confirm_while_seat_lease_is_taken_carries_retry_hint() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let held = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(1))
        .await
        .unwrap();
    harness
        .locks
        .acquire(
            &LeaseKey::seat(seat(1)),
            &LeaseHolder::background("reaper"),
            std::time::Duration::from_secs(10),
        )
        .await
        .unwrap();

    let err = harness.engine.reservations.confirm(held.id).await.unwrap_err();

    assert_eq!(
        err,
        EngineError::ConcurrentReservation {
            resource: "seat_lock:1:1".into(),
            retry_after_seconds: 1,
        }
    );
    assert!(err.is_retryable());

    // The foreign lease lapses on its own
    harness.clock.advance(Duration::seconds(11));
    assert!(harness.engine.reservations.confirm(held.id).await.is_ok());
}

#[tokio::test]
async fn failed_confirm_save_restores_the_hold() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let held = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(1))
        .await
        .unwrap();
    harness.reservations.fail_saves_for(held.id);

    let result = harness.engine.reservations.confirm(held.id).await;

    assert!(matches!(result, Err(EngineError::Repository(_))));
    let stored_seat = harness.seats.get(seat(1)).unwrap();
    assert_eq!(stored_seat.status().kind(), SeatStatusKind::Held);
    assert_eq!(stored_seat.holder(), Some(&UserId::new("alice")));
    assert_eq!(
        harness.reservations.get(held.id).unwrap().status,
        ReservationStatus::Pending
    );
}

// ============================================================================
// Cancel
// ============================================================================

#[tokio::test]
async fn cancel_frees_the_seat_once() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let alice = UserId::new("alice");
    let held = harness
        .engine
        .reservations
        .hold(&token.id, &alice, seat(4))
        .await
        .unwrap();

    let cancelled = harness.engine.reservations.cancel(held.id, &alice).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert!(harness.seats.get(seat(4)).unwrap().is_available());

    let again = harness.engine.reservations.cancel(held.id, &alice).await;
    assert_eq!(
        again,
        Err(EngineError::ReservationNotPending {
            reservation_id: held.id,
            status: ReservationStatus::Cancelled,
        })
    );
    assert_eq!(harness.notifier.of_kind("reservation_cancelled").len(), 1);
}

#[tokio::test]
async fn cancel_by_another_user_is_refused() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let held = harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(1))
        .await
        .unwrap();

    let result = harness
        .engine
        .reservations
        .cancel(held.id, &UserId::new("bob"))
        .await;
    assert_eq!(result, Err(EngineError::NotReservationOwner(held.id)));
    assert_eq!(
        harness.seats.get(seat(1)).unwrap().status().kind(),
        SeatStatusKind::Held
    );
}

#[tokio::test]
async fn cancelled_seat_can_be_held_again() {
    let harness = harness_with_concert().await;
    let alice = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    let bob = harness.admit("bob", ConcertId::new(1)).await.unwrap();

    let held = harness
        .engine
        .reservations
        .hold(&alice.id, &UserId::new("alice"), seat(1))
        .await
        .unwrap();
    harness
        .engine
        .reservations
        .cancel(held.id, &UserId::new("alice"))
        .await
        .unwrap();

    let rebooked = harness
        .engine
        .reservations
        .hold(&bob.id, &UserId::new("bob"), seat(1))
        .await
        .unwrap();
    assert_eq!(rebooked.user_id, UserId::new("bob"));
}

#[tokio::test]
async fn unknown_reservation_is_not_found() {
    let harness = harness_with_concert().await;
    let id = seatlock_core::ReservationId::new();

    assert_eq!(
        harness.engine.reservations.confirm(id).await,
        Err(EngineError::ReservationNotFound(id))
    );
    assert_eq!(
        harness.engine.reservations.reservation(id).await,
        Err(EngineError::ReservationNotFound(id))
    );
}

// ============================================================================
// Seat ledger
// ============================================================================

#[tokio::test]
async fn concert_registration_rejects_duplicates_and_empty_lists() {
    let harness = harness_with_concert().await;

    let again = harness.concert(1, 3, PRICE).await;
    assert!(matches!(again, Err(EngineError::InvalidInput(_))));

    let empty = harness.concert(7, 0, PRICE).await;
    assert!(matches!(empty, Err(EngineError::InvalidInput(_))));

    let duplicate_numbers = harness
        .engine
        .ledger
        .register_concert(
            ConcertId::new(8),
            vec![(SeatNumber::new(1), PRICE), (SeatNumber::new(1), PRICE)],
        )
        .await;
    assert!(matches!(duplicate_numbers, Err(EngineError::InvalidInput(_))));
    assert_eq!(harness.seats.len(), 10);
}

#[tokio::test]
async fn available_seats_excludes_held_seats() {
    let harness = harness_with_concert().await;
    let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
    harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new("alice"), seat(1))
        .await
        .unwrap();

    let available = harness
        .engine
        .ledger
        .available_seats(ConcertId::new(1))
        .await
        .unwrap();
    assert_eq!(available.len(), 9);
    assert!(available.iter().all(|s| s.id() != seat(1)));
}
