//! Waiting-room admission tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransitionError;
use crate::types::{AdmissionTokenId, QueueScope, UserId};

/// Token lifecycle: `Waiting → Active → Expired`. `Expired` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    /// In line
    Waiting,
    /// Admitted until `expires_at`
    Active,
    /// No longer usable
    Expired,
}

impl TokenStatus {
    /// Stable storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
        }
    }

    /// Parses a storage name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "WAITING" => Some(Self::Waiting),
            "ACTIVE" => Some(Self::Active),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A waiting-room token bound to one user and one scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionToken {
    /// Opaque token string
    pub id: AdmissionTokenId,
    /// Owner
    pub user_id: UserId,
    /// Queue scope
    pub scope: QueueScope,
    /// Position within the scope, assigned once at issuance
    pub position: u64,
    /// 1-based place among the scope's waiting tokens, as of the last refresh
    pub place_in_line: u64,
    /// Estimated wait in seconds, as of the last refresh
    pub estimated_wait_secs: u64,
    /// Current status
    pub status: TokenStatus,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// Hard deadline. For waiting tokens this is the abandonment TTL; for active
    /// tokens it is the end of the admission window.
    pub expires_at: DateTime<Utc>,
    /// When the token was promoted
    pub activated_at: Option<DateTime<Utc>>,
}

impl AdmissionToken {
    /// Issues a waiting token.
    #[must_use]
    pub fn issue(
        user_id: UserId,
        scope: QueueScope,
        position: u64,
        now: DateTime<Utc>,
        waiting_ttl: Duration,
    ) -> Self {
        Self {
            id: AdmissionTokenId::generate(),
            user_id,
            scope,
            position,
            place_in_line: 1,
            estimated_wait_secs: 0,
            status: TokenStatus::Waiting,
            issued_at: now,
            expires_at: now + waiting_ttl,
            activated_at: None,
        }
    }

    /// Whether the token grants access at `now`: ACTIVE and before its deadline.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.status == TokenStatus::Active && now < self.expires_at
    }

    /// Whether the token still counts against the user: WAITING, or ACTIVE and unexpired.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status != TokenStatus::Expired && now < self.expires_at
    }

    /// Records a refreshed place in line and wait estimate
    pub const fn update_place(&mut self, place_in_line: u64, estimated_wait_secs: u64) {
        self.place_in_line = place_in_line;
        self.estimated_wait_secs = estimated_wait_secs;
    }

    /// WAITING → ACTIVE with a fresh admission window.
    ///
    /// # Errors
    ///
    /// [`TransitionError::Invalid`] unless the token is waiting.
    pub fn activate(&mut self, now: DateTime<Utc>, window: Duration) -> Result<(), TransitionError> {
        if self.status != TokenStatus::Waiting {
            return Err(self.invalid(TokenStatus::Active));
        }
        self.status = TokenStatus::Active;
        self.activated_at = Some(now);
        self.expires_at = now + window;
        self.place_in_line = 0;
        self.estimated_wait_secs = 0;
        Ok(())
    }

    /// WAITING | ACTIVE → EXPIRED.
    ///
    /// # Errors
    ///
    /// [`TransitionError::Invalid`] if the token is already expired.
    pub fn expire(&mut self) -> Result<(), TransitionError> {
        if self.status == TokenStatus::Expired {
            return Err(self.invalid(TokenStatus::Expired));
        }
        self.status = TokenStatus::Expired;
        Ok(())
    }

    const fn invalid(&self, to: TokenStatus) -> TransitionError {
        TransitionError::Invalid {
            entity: "token",
            from: self.status.as_str(),
            to: to.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(now: DateTime<Utc>) -> AdmissionToken {
        AdmissionToken::issue(
            UserId::new("alice"),
            QueueScope::new("concert:1"),
            1,
            now,
            Duration::minutes(30),
        )
    }

    #[test]
    fn waiting_token_is_live_but_not_valid() {
        let now = Utc::now();
        let token = token(now);
        assert!(token.is_live(now));
        assert!(!token.is_valid(now));
        assert!(!token.is_live(now + Duration::minutes(30)));
    }

    #[test]
    fn activation_opens_window() {
        let now = Utc::now();
        let mut token = token(now);
        let later = now + Duration::minutes(10);
        assert!(token.activate(later, Duration::minutes(30)).is_ok());

        assert!(token.is_valid(later + Duration::minutes(29)));
        assert!(!token.is_valid(later + Duration::minutes(30)));
        assert_eq!(token.activated_at, Some(later));
        assert!(token.activate(later, Duration::minutes(30)).is_err());
    }

    #[test]
    fn expired_is_terminal() {
        let now = Utc::now();
        let mut token = token(now);
        assert!(token.expire().is_ok());
        assert!(token.expire().is_err());
        assert!(token.activate(now, Duration::minutes(1)).is_err());
        assert!(!token.is_live(now));
        assert!(!token.is_valid(now));
    }
}
