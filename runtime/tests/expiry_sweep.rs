//! Integration tests for the expiry reaper and the scheduler that drives it

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::{DateTime, Duration, Utc};
use seatlock_core::{
    AdmissionToken, AdmissionTokenId, AdmissionTokenRepository, ConcertId, LeaseHolder, LeaseKey,
    LockCoordinator, Money, QueueScope, RepoFuture, Reservation, ReservationStatus, SeatId,
    SeatNumber, SeatStatusKind, TokenStatus, UserId,
};
use seatlock_runtime::{EngineConfig, ExpiryReaper, SweepReport};
use seatlock_testing::{InMemoryAdmissionTokenRepository, TestHarness};
use std::sync::Arc;
use tokio::sync::broadcast;

fn seat(n: u32) -> SeatId {
    SeatId::new(ConcertId::new(1), SeatNumber::new(n))
}

async fn hold_as(harness: &TestHarness, user: &str, n: u32) -> Reservation {
    let token = harness.admit(user, ConcertId::new(1)).await.unwrap();
    harness
        .engine
        .reservations
        .hold(&token.id, &UserId::new(user), seat(n))
        .await
        .unwrap()
}

#[tokio::test]
async fn sweep_expires_lapsed_hold_and_frees_seat() {
    let harness = TestHarness::new();
    harness.concert(1, 5, Money::from_cents(2_500)).await.unwrap();
    let held = hold_as(&harness, "alice", 1).await;

    // Nothing to do inside the window
    assert_eq!(harness.engine.reaper.sweep().await.unwrap(), SweepReport::default());

    harness.clock.advance(Duration::seconds(301));
    let report = harness.engine.reaper.sweep().await.unwrap();

    assert_eq!(report.reservations_expired, 1);
    assert_eq!(
        harness.reservations.get(held.id).unwrap().status,
        ReservationStatus::Expired
    );
    assert_eq!(
        harness.seats.get(seat(1)).unwrap().status().kind(),
        SeatStatusKind::Available
    );
    assert_eq!(harness.notifier.of_kind("reservation_expired").len(), 1);

    // A second sweep finds nothing
    let again = harness.engine.reaper.sweep().await.unwrap();
    assert_eq!(again.reservations_expired, 0);
}

#[tokio::test]
async fn sweep_leaves_confirmed_reservations_alone() {
    let harness = TestHarness::new();
    harness.concert(1, 5, Money::from_cents(2_500)).await.unwrap();
    let held = hold_as(&harness, "alice", 1).await;
    harness.engine.reservations.confirm(held.id).await.unwrap();

    harness.clock.advance(Duration::seconds(301));
    let report = harness.engine.reaper.sweep().await.unwrap();

    assert_eq!(report.reservations_expired, 0);
    assert_eq!(
        harness.seats.get(seat(1)).unwrap().status().kind(),
        SeatStatusKind::Reserved
    );
}

#[tokio::test]
async fn sweep_skips_leased_seat_until_next_pass() {
    let harness = TestHarness::new();
    harness.concert(1, 5, Money::from_cents(2_500)).await.unwrap();
    let held = hold_as(&harness, "alice", 1).await;
    harness.clock.advance(Duration::seconds(301));

    let busy = LeaseHolder::new("busy");
    harness
        .locks
        .acquire(&LeaseKey::seat(seat(1)), &busy, std::time::Duration::from_secs(10))
        .await
        .unwrap();

    let report = harness.engine.reaper.sweep().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.reservations_expired, 0);
    assert_eq!(
        harness.reservations.get(held.id).unwrap().status,
        ReservationStatus::Pending
    );

    harness.locks.release(&LeaseKey::seat(seat(1)), &busy).await.unwrap();
    let report = harness.engine.reaper.sweep().await.unwrap();
    assert_eq!(report.reservations_expired, 1);
}

#[tokio::test]
async fn one_failing_record_does_not_stop_the_sweep() {
    let harness = TestHarness::new();
    harness.concert(1, 5, Money::from_cents(2_500)).await.unwrap();
    let poisoned = hold_as(&harness, "alice", 1).await;
    let healthy = hold_as(&harness, "bob", 2).await;
    harness.reservations.fail_saves_for(poisoned.id);

    harness.clock.advance(Duration::seconds(301));
    let report = harness.engine.reaper.sweep().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.reservations_expired, 1);
    assert_eq!(
        harness.reservations.get(healthy.id).unwrap().status,
        ReservationStatus::Expired
    );
    assert!(harness.seats.get(seat(2)).unwrap().is_available());
    // The poisoned record keeps its hold until storage recovers
    assert_eq!(
        harness.seats.get(seat(1)).unwrap().status().kind(),
        SeatStatusKind::Held
    );
}

#[tokio::test]
async fn failing_record_at_the_front_does_not_block_a_small_batch() {
    seatlock_testing::init_test_tracing();
    let harness = TestHarness::with_config(EngineConfig::default().with_sweep_batch_size(1));
    harness.concert(1, 5, Money::from_cents(2_500)).await.unwrap();
    let poisoned = hold_as(&harness, "alice", 1).await;
    harness.clock.advance(Duration::seconds(1));
    let healthy = hold_as(&harness, "bob", 2).await;
    assert!(poisoned.expires_at < healthy.expires_at);
    harness.reservations.fail_saves_for(poisoned.id);

    harness.clock.advance(Duration::seconds(301));
    let report = harness.engine.reaper.sweep().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.reservations_expired, 1);
    assert_eq!(
        harness.reservations.get(healthy.id).unwrap().status,
        ReservationStatus::Expired
    );
    assert!(harness.seats.get(seat(2)).unwrap().is_available());

    // Every later sweep still tries the poisoned record first and moves on
    let again = harness.engine.reaper.sweep().await.unwrap();
    assert_eq!(again.failed, 1);
    assert_eq!(again.reservations_expired, 0);
}

#[tokio::test]
async fn token_sweep_waits_for_a_running_promotion() {
    let harness = TestHarness::new();
    let scope = QueueScope::for_concert(ConcertId::new(1));
    let waiting = harness
        .engine
        .queue
        .enqueue(UserId::new("alice"), scope.clone())
        .await
        .unwrap();
    harness.clock.advance(Duration::minutes(30));

    let promoter = LeaseHolder::background("promoter");
    harness
        .locks
        .acquire(&LeaseKey::queue(&scope), &promoter, std::time::Duration::from_secs(10))
        .await
        .unwrap();

    let report = harness.engine.reaper.sweep().await.unwrap();
    assert_eq!(report.tokens_expired, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(harness.tokens.get(&waiting.id).unwrap().status, TokenStatus::Waiting);

    harness.locks.release(&LeaseKey::queue(&scope), &promoter).await.unwrap();
    let report = harness.engine.reaper.sweep().await.unwrap();
    assert_eq!(report.tokens_expired, 1);
    assert_eq!(harness.tokens.get(&waiting.id).unwrap().status, TokenStatus::Expired);
}

/// Token storage whose lapsed listing is a snapshot taken earlier, as seen by a sweep
/// that listed just before a promotion ran.
struct StaleListing {
    inner: InMemoryAdmissionTokenRepository,
    snapshot: Vec<AdmissionToken>,
}

impl AdmissionTokenRepository for StaleListing {
    fn next_position<'a>(&'a self, scope: &'a QueueScope) -> RepoFuture<'a, u64> {
        self.inner.next_position(scope)
    }

    fn insert_unique(&self, token: AdmissionToken, now: DateTime<Utc>) -> RepoFuture<'_, ()> {
        self.inner.insert_unique(token, now)
    }

    fn find<'a>(&'a self, id: &'a AdmissionTokenId) -> RepoFuture<'a, Option<AdmissionToken>> {
        self.inner.find(id)
    }

    fn save(&self, token: AdmissionToken) -> RepoFuture<'_, ()> {
        self.inner.save(token)
    }

    fn list_waiting<'a>(
        &'a self,
        scope: &'a QueueScope,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepoFuture<'a, Vec<AdmissionToken>> {
        self.inner.list_waiting(scope, now, limit)
    }

    fn count_waiting_before<'a>(&'a self, scope: &'a QueueScope, position: u64) -> RepoFuture<'a, u64> {
        self.inner.count_waiting_before(scope, position)
    }

    fn count_active<'a>(&'a self, scope: &'a QueueScope, now: DateTime<Utc>) -> RepoFuture<'a, u64> {
        self.inner.count_active(scope, now)
    }

    fn list_lapsed(&self, _now: DateTime<Utc>, _limit: usize) -> RepoFuture<'_, Vec<AdmissionToken>> {
        let snapshot = self.snapshot.clone();
        Box::pin(async move { Ok(snapshot) })
    }

    fn scopes(&self) -> RepoFuture<'_, Vec<QueueScope>> {
        self.inner.scopes()
    }
}

#[tokio::test]
async fn token_promoted_after_listing_is_not_expired() {
    let harness = TestHarness::new();
    let scope = QueueScope::for_concert(ConcertId::new(1));
    let listed = harness
        .engine
        .queue
        .enqueue(UserId::new("alice"), scope.clone())
        .await
        .unwrap();
    harness.clock.advance(Duration::minutes(20));
    harness.engine.queue.promote(&scope, 10).await.unwrap();
    harness.clock.advance(Duration::minutes(10));

    let reaper = ExpiryReaper::new(
        harness.engine.ledger.clone(),
        Arc::new(harness.reservations.clone()),
        Arc::new(StaleListing {
            inner: harness.tokens.clone(),
            snapshot: vec![listed.clone()],
        }),
        harness.locks.clone(),
        Arc::new(harness.notifier.clone()),
        harness.clock.clone(),
        EngineConfig::default(),
    );
    let report = reaper.sweep().await.unwrap();

    assert_eq!(report.tokens_expired, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(harness.tokens.get(&listed.id).unwrap().status, TokenStatus::Active);
    assert!(harness.engine.queue.validate(&listed.id).await.unwrap());
}

#[tokio::test]
async fn sweep_expires_lapsed_tokens() {
    let harness = TestHarness::new();
    let scope = QueueScope::for_concert(ConcertId::new(1));
    let waiting = harness
        .engine
        .queue
        .enqueue(UserId::new("alice"), scope.clone())
        .await
        .unwrap();
    let active = harness.admit("bob", ConcertId::new(1)).await.unwrap();

    harness.clock.advance(Duration::minutes(30));
    let report = harness.engine.reaper.sweep().await.unwrap();

    assert_eq!(report.tokens_expired, 2);
    assert_eq!(harness.tokens.get(&waiting.id).unwrap().status, TokenStatus::Expired);
    assert_eq!(harness.tokens.get(&active.id).unwrap().status, TokenStatus::Expired);
    assert_eq!(harness.engine.reaper.sweep().await.unwrap().tokens_expired, 0);
}

#[tokio::test]
async fn sweep_respects_batch_size() {
    let harness = TestHarness::with_config(EngineConfig::default().with_sweep_batch_size(2));
    harness.concert(1, 5, Money::from_cents(2_500)).await.unwrap();
    for (n, user) in ["a", "b", "c"].into_iter().enumerate() {
        hold_as(&harness, user, u32::try_from(n).unwrap() + 1).await;
    }
    harness.clock.advance(Duration::seconds(301));

    assert_eq!(harness.engine.reaper.sweep().await.unwrap().reservations_expired, 2);
    assert_eq!(harness.engine.reaper.sweep().await.unwrap().reservations_expired, 1);
}

#[tokio::test]
async fn scheduler_promotes_in_background_and_stops_on_shutdown() {
    let harness = TestHarness::with_config(
        EngineConfig::default()
            .with_promote_interval(std::time::Duration::from_millis(10))
            .with_sweep_interval(std::time::Duration::from_millis(10)),
    );
    let token = harness
        .engine
        .queue
        .enqueue(UserId::new("alice"), QueueScope::for_concert(ConcertId::new(1)))
        .await
        .unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = harness.engine.scheduler().spawn(&shutdown_tx);

    let promoted = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if harness.engine.queue.validate(&token.id).await.unwrap() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(promoted.is_ok(), "token was never promoted");

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("scheduled task did not stop")
            .unwrap();
    }
}
