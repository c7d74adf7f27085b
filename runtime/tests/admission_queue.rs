//! Integration tests for the waiting room

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use chrono::Duration;
use seatlock_core::{
    AdmissionTokenId, ConcertId, EngineError, LeaseHolder, LeaseKey, LockCoordinator,
    QueueScope, TokenStatus, UserId,
};
use seatlock_runtime::EngineConfig;
use seatlock_testing::TestHarness;

fn scope() -> QueueScope {
    QueueScope::for_concert(ConcertId::new(1))
}

async fn enqueue_many(harness: &TestHarness, count: usize) -> Vec<seatlock_core::AdmissionToken> {
    let mut tokens = Vec::with_capacity(count);
    for n in 0..count {
        let token = harness
            .engine
            .queue
            .enqueue(UserId::new(format!("user-{n}")), scope())
            .await
            .unwrap();
        tokens.push(token);
    }
    tokens
}

#[tokio::test]
async fn enqueue_issues_waiting_token_with_place_and_estimate() {
    let harness = TestHarness::new();
    let tokens = enqueue_many(&harness, 8).await;

    let first = &tokens[0];
    assert_eq!(first.status, TokenStatus::Waiting);
    assert_eq!(first.position, 1);
    assert_eq!(first.place_in_line, 1);
    assert_eq!(first.estimated_wait_secs, 60);

    // 6 admissions per minute: the 7th in line waits two minutes
    let seventh = &tokens[6];
    assert_eq!(seventh.place_in_line, 7);
    assert_eq!(seventh.estimated_wait_secs, 120);
}

#[tokio::test]
async fn user_cannot_queue_twice_in_one_scope() {
    let harness = TestHarness::new();
    let alice = UserId::new("alice");
    harness.engine.queue.enqueue(alice.clone(), scope()).await.unwrap();

    let again = harness.engine.queue.enqueue(alice.clone(), scope()).await;
    assert_eq!(
        again,
        Err(EngineError::AlreadyQueued {
            user_id: alice.clone(),
            scope: scope(),
        })
    );

    // Other scopes are independent
    let elsewhere = QueueScope::for_concert(ConcertId::new(2));
    assert!(harness.engine.queue.enqueue(alice, elsewhere).await.is_ok());

    // The rejected attempt consumed a position
    let bob = harness
        .engine
        .queue
        .enqueue(UserId::new("bob"), scope())
        .await
        .unwrap();
    assert_eq!(bob.position, 3);
    assert_eq!(bob.place_in_line, 2);
}

#[tokio::test]
async fn user_may_queue_again_after_token_lapses() {
    let harness = TestHarness::new();
    let alice = UserId::new("alice");
    harness.engine.queue.enqueue(alice.clone(), scope()).await.unwrap();

    harness.clock.advance(Duration::minutes(31));
    let again = harness.engine.queue.enqueue(alice, scope()).await.unwrap();
    assert_eq!(again.status, TokenStatus::Waiting);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enqueues_get_distinct_consecutive_positions() {
    let harness = TestHarness::new();

    let handles: Vec<_> = (0..5)
        .map(|n| {
            let queue = harness.engine.queue.clone();
            tokio::spawn(async move { queue.enqueue(UserId::new(format!("user-{n}")), scope()).await })
        })
        .collect();

    let mut positions = Vec::new();
    for handle in handles {
        positions.push(handle.await.unwrap().unwrap().position);
    }
    positions.sort_unstable();
    assert_eq!(positions, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn promotion_admits_lowest_positions_up_to_capacity() {
    let harness = TestHarness::with_config(EngineConfig::default().with_scope_capacity(10));
    let tokens = enqueue_many(&harness, 100).await;

    let activated = harness.engine.queue.promote(&scope(), 10).await.unwrap();

    assert_eq!(activated.len(), 10);
    assert!(activated.iter().all(|t| t.position <= 10));
    assert_eq!(
        harness.engine.queue.status(&tokens[0].id).await.unwrap().status,
        TokenStatus::Active
    );
    let fiftieth = harness.engine.queue.status(&tokens[49].id).await.unwrap();
    assert_eq!(fiftieth.status, TokenStatus::Waiting);
    assert_eq!(fiftieth.place_in_line, 40);
    assert_eq!(harness.notifier.of_kind("token_activated").len(), 10);
}

#[tokio::test]
async fn promotion_counts_tokens_already_active() {
    let harness = TestHarness::new();
    enqueue_many(&harness, 3).await;

    assert_eq!(harness.engine.queue.promote(&scope(), 2).await.unwrap().len(), 2);
    assert!(harness.engine.queue.promote(&scope(), 2).await.unwrap().is_empty());

    // Active tokens free their slot when their window ends; the third token lapsed
    // while waiting
    harness.clock.advance(Duration::minutes(30));
    let late = harness
        .engine
        .queue
        .enqueue(UserId::new("late"), scope())
        .await
        .unwrap();
    let freed = harness.engine.queue.promote(&scope(), 2).await.unwrap();
    assert_eq!(freed.len(), 1);
    assert_eq!(freed[0].id, late.id);
}

#[tokio::test]
async fn promotion_skips_abandoned_tokens() {
    let harness = TestHarness::new();
    let stale = harness
        .engine
        .queue
        .enqueue(UserId::new("alice"), scope())
        .await
        .unwrap();
    harness.clock.advance(Duration::minutes(31));
    let fresh = harness
        .engine
        .queue
        .enqueue(UserId::new("bob"), scope())
        .await
        .unwrap();

    let activated = harness.engine.queue.promote(&scope(), 10).await.unwrap();

    assert_eq!(activated.len(), 1);
    assert_eq!(activated[0].id, fresh.id);
    assert_eq!(
        harness.engine.queue.status(&stale.id).await.unwrap().status,
        TokenStatus::Expired
    );
}

#[tokio::test]
async fn abandoned_head_of_line_does_not_consume_the_only_slot() {
    seatlock_testing::init_test_tracing();
    let harness = TestHarness::new();
    let stale = harness
        .engine
        .queue
        .enqueue(UserId::new("alice"), scope())
        .await
        .unwrap();
    harness.clock.advance(Duration::minutes(31));
    let fresh = harness
        .engine
        .queue
        .enqueue(UserId::new("bob"), scope())
        .await
        .unwrap();
    assert!(stale.position < fresh.position);

    let activated = harness.engine.queue.promote(&scope(), 1).await.unwrap();

    assert_eq!(activated.len(), 1);
    assert_eq!(activated[0].id, fresh.id);
    assert!(harness.engine.queue.validate(&fresh.id).await.unwrap());
}

#[tokio::test]
async fn promotion_yields_to_a_running_pass() {
    let harness = TestHarness::new();
    enqueue_many(&harness, 2).await;
    harness
        .locks
        .acquire(
            &LeaseKey::queue(&scope()),
            &LeaseHolder::background("promoter"),
            std::time::Duration::from_secs(10),
        )
        .await
        .unwrap();

    assert!(harness.engine.queue.promote(&scope(), 10).await.unwrap().is_empty());

    harness.clock.advance(Duration::seconds(11));
    assert_eq!(harness.engine.queue.promote(&scope(), 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn promote_all_uses_configured_capacity_per_scope() {
    let harness = TestHarness::with_config(EngineConfig::default().with_scope_capacity(2));
    enqueue_many(&harness, 3).await;
    harness
        .engine
        .queue
        .enqueue(UserId::new("zoe"), QueueScope::for_concert(ConcertId::new(2)))
        .await
        .unwrap();

    assert_eq!(harness.engine.queue.promote_all().await.unwrap(), 3);
}

#[tokio::test]
async fn status_refreshes_place_without_saving() {
    let harness = TestHarness::new();
    let tokens = enqueue_many(&harness, 3).await;
    harness.engine.queue.promote(&scope(), 1).await.unwrap();

    let third = harness.engine.queue.status(&tokens[2].id).await.unwrap();
    assert_eq!(third.place_in_line, 2);
    assert_eq!(third.estimated_wait_secs, 60);

    let stored = harness.tokens.get(&tokens[2].id).unwrap();
    assert_eq!(stored.place_in_line, 3);
}

#[tokio::test]
async fn validate_tracks_activation_and_expiry() {
    let harness = TestHarness::new();
    let token = harness
        .engine
        .queue
        .enqueue(UserId::new("alice"), scope())
        .await
        .unwrap();
    assert!(!harness.engine.queue.validate(&token.id).await.unwrap());

    harness.engine.queue.promote(&scope(), 1).await.unwrap();
    assert!(harness.engine.queue.validate(&token.id).await.unwrap());

    harness.clock.advance(Duration::minutes(30));
    assert!(!harness.engine.queue.validate(&token.id).await.unwrap());
}

#[tokio::test]
async fn unknown_tokens() {
    let harness = TestHarness::new();
    let unknown = AdmissionTokenId::new("nope");

    assert!(!harness.engine.queue.validate(&unknown).await.unwrap());
    assert_eq!(
        harness.engine.queue.status(&unknown).await,
        Err(EngineError::TokenNotFound(unknown))
    );
}
