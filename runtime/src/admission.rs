//! Admission queue: the virtual waiting room in front of contended operations.
//!
//! Tokens are issued WAITING with a scope-wide monotonic position, promoted to ACTIVE
//! in position order as capacity frees up, and expired by the reaper once their
//! deadline passes.

use seatlock_core::environment::Clock;
use seatlock_core::{
    AdmissionToken, AdmissionTokenId, AdmissionTokenRepository, EngineError, LeaseHolder,
    LeaseKey, LockCoordinator, Notification, Notifier, QueueScope, RepositoryError, TokenStatus,
    UserId,
};
use std::sync::Arc;

use crate::config::{EngineConfig, chrono_duration};
use crate::lock::try_lease;
use crate::metrics;

/// Waiting-room token issuer and promoter.
#[derive(Clone)]
pub struct AdmissionQueue {
    tokens: Arc<dyn AdmissionTokenRepository>,
    locks: Arc<dyn LockCoordinator>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl AdmissionQueue {
    /// Creates a queue
    #[must_use]
    pub fn new(
        tokens: Arc<dyn AdmissionTokenRepository>,
        locks: Arc<dyn LockCoordinator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tokens,
            locks,
            notifier,
            clock,
            config,
        }
    }

    /// Puts `user_id` in line for `scope`.
    ///
    /// The token is always issued WAITING; only [`promote`](Self::promote) activates it.
    /// A position consumed by a rejected duplicate is not handed out again.
    ///
    /// # Errors
    ///
    /// [`EngineError::AlreadyQueued`] if the user holds a live token in the scope.
    pub async fn enqueue(&self, user_id: UserId, scope: QueueScope) -> Result<AdmissionToken, EngineError> {
        let now = self.clock.now();
        let position = self.tokens.next_position(&scope).await?;
        let mut token = AdmissionToken::issue(
            user_id.clone(),
            scope.clone(),
            position,
            now,
            chrono_duration(self.config.waiting_ttl),
        );

        let ahead = self.tokens.count_waiting_before(&scope, position).await?;
        let place = ahead + 1;
        token.update_place(place, self.config.estimated_wait_secs(place));

        match self.tokens.insert_unique(token.clone(), now).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                tracing::warn!(user_id = %user_id, scope = %scope, "User already queued");
                return Err(EngineError::AlreadyQueued { user_id, scope });
            }
            Err(e) => return Err(e.into()),
        }

        metrics::record_token("waiting", 1);
        tracing::info!(
            token = %token.id,
            user_id = %token.user_id,
            scope = %token.scope,
            position,
            place_in_line = place,
            estimated_wait_secs = token.estimated_wait_secs,
            "Token issued"
        );
        Ok(token)
    }

    /// Current view of a token with a refreshed place in line and wait estimate.
    ///
    /// A token whose deadline has passed is reported EXPIRED even if the reaper has not
    /// flipped it yet. The stored record is not modified.
    ///
    /// # Errors
    ///
    /// [`EngineError::TokenNotFound`] for an unknown token.
    pub async fn status(&self, token_id: &AdmissionTokenId) -> Result<AdmissionToken, EngineError> {
        let mut token = self
            .tokens
            .find(token_id)
            .await?
            .ok_or_else(|| EngineError::TokenNotFound(token_id.clone()))?;
        let now = self.clock.now();

        if !token.is_live(now) {
            token.status = TokenStatus::Expired;
            token.update_place(0, 0);
        } else if token.status == TokenStatus::Waiting {
            let place = self.tokens.count_waiting_before(&token.scope, token.position).await? + 1;
            token.update_place(place, self.config.estimated_wait_secs(place));
        }
        Ok(token)
    }

    /// True iff the token is ACTIVE and unexpired. Unknown tokens are not valid.
    ///
    /// # Errors
    ///
    /// Repository failures.
    pub async fn validate(&self, token_id: &AdmissionTokenId) -> Result<bool, EngineError> {
        let now = self.clock.now();
        Ok(self
            .tokens
            .find(token_id)
            .await?
            .is_some_and(|token| token.is_valid(now)))
    }

    /// Activates the lowest-position WAITING tokens of `scope` up to `capacity` live
    /// ACTIVE tokens. Returns the tokens activated by this pass.
    ///
    /// Passes for one scope are serialized by a `queue_lock` lease; a pass that finds
    /// another one running returns without activating anything.
    ///
    /// # Errors
    ///
    /// Repository or lease backend failures.
    pub async fn promote(&self, scope: &QueueScope, capacity: u64) -> Result<Vec<AdmissionToken>, EngineError> {
        let Some(guard) = try_lease(
            self.locks.as_ref(),
            LeaseKey::queue(scope),
            LeaseHolder::background("promoter"),
            self.config.lease_duration,
            "promote",
        )
        .await?
        else {
            tracing::debug!(scope = %scope, "Promotion already running elsewhere");
            return Ok(Vec::new());
        };

        let result = self.promote_locked(scope, capacity).await;
        guard.release(self.locks.as_ref()).await;
        result
    }

    async fn promote_locked(&self, scope: &QueueScope, capacity: u64) -> Result<Vec<AdmissionToken>, EngineError> {
        let now = self.clock.now();
        let active = self.tokens.count_active(scope, now).await?;
        let free = capacity.saturating_sub(active);
        if free == 0 {
            metrics::record_active_tokens(scope.as_str(), active);
            return Ok(Vec::new());
        }

        let limit = usize::try_from(free).unwrap_or(usize::MAX);
        // Abandoned tokens are not listed, so they never take a free slot
        let waiting = self.tokens.list_waiting(scope, now, limit).await?;
        let window = chrono_duration(self.config.active_window);

        let mut activated = Vec::with_capacity(waiting.len());
        for mut token in waiting {
            token.activate(now, window)?;
            self.tokens.save(token.clone()).await?;
            self.notifier.notify(Notification::TokenActivated {
                token: token.id.clone(),
                user_id: token.user_id.clone(),
                scope: token.scope.clone(),
            });
            activated.push(token);
        }

        let count = activated.len() as u64;
        metrics::record_token("active", count);
        metrics::record_active_tokens(scope.as_str(), active + count);
        if count > 0 {
            tracing::info!(scope = %scope, activated = count, active = active + count, "Tokens promoted");
        }
        Ok(activated)
    }

    /// Runs [`promote`](Self::promote) with the configured capacity for every scope that
    /// has waiting tokens. A failing scope is logged and does not stop the others.
    ///
    /// Returns the number of tokens activated.
    ///
    /// # Errors
    ///
    /// Repository failure while listing scopes.
    pub async fn promote_all(&self) -> Result<usize, EngineError> {
        let mut total = 0;
        for scope in self.tokens.scopes().await? {
            match self.promote(&scope, self.config.scope_capacity).await {
                Ok(activated) => total += activated.len(),
                Err(e) => tracing::error!(scope = %scope, error = %e, "Promotion failed"),
            }
        }
        Ok(total)
    }
}
