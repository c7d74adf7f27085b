//! Outbound notifications.
//!
//! The engine emits a [`Notification`] after each committed transition. Delivery is
//! fire-and-forget: a [`Notifier`] must not block and its failures never reach the caller.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{AdmissionTokenId, QueueScope, ReservationId, SeatId, UserId};

/// A committed state change worth telling a user about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
    /// A waiting token was admitted
    TokenActivated {
        /// Token
        token: AdmissionTokenId,
        /// Owner
        user_id: UserId,
        /// Scope
        scope: QueueScope,
    },
    /// A seat was put on hold
    SeatHeld {
        /// Reservation created with the hold
        reservation_id: ReservationId,
        /// Seat
        seat_id: SeatId,
        /// Holder
        user_id: UserId,
    },
    /// A reservation was paid and confirmed
    ReservationConfirmed {
        /// Reservation
        reservation_id: ReservationId,
        /// Seat
        seat_id: SeatId,
        /// Owner
        user_id: UserId,
    },
    /// The owner cancelled
    ReservationCancelled {
        /// Reservation
        reservation_id: ReservationId,
        /// Seat
        seat_id: SeatId,
        /// Owner
        user_id: UserId,
    },
    /// The hold window elapsed and the seat was reclaimed
    ReservationExpired {
        /// Reservation
        reservation_id: ReservationId,
        /// Seat
        seat_id: SeatId,
        /// Owner
        user_id: UserId,
    },
}

impl Notification {
    /// Short name for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TokenActivated { .. } => "token_activated",
            Self::SeatHeld { .. } => "seat_held",
            Self::ReservationConfirmed { .. } => "reservation_confirmed",
            Self::ReservationCancelled { .. } => "reservation_cancelled",
            Self::ReservationExpired { .. } => "reservation_expired",
        }
    }

    /// Recipient
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        match self {
            Self::TokenActivated { user_id, .. }
            | Self::SeatHeld { user_id, .. }
            | Self::ReservationConfirmed { user_id, .. }
            | Self::ReservationCancelled { user_id, .. }
            | Self::ReservationExpired { user_id, .. } => user_id,
        }
    }
}

/// Fire-and-forget notification sink.
pub trait Notifier: Send + Sync {
    /// Delivers a notification. Must return promptly.
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(
            kind = notification.kind(),
            user_id = %notification.user_id(),
            "Notification"
        );
    }
}

/// Publishes notifications on a tokio broadcast channel.
///
/// Lagging or absent receivers lose messages; the sender never waits.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    /// Creates a notifier with the given channel capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to future notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        // No receivers is not an error for fire-and-forget delivery
        let _ = self.sender.send(notification);
    }
}
