//! In-memory balance ledger.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use seatlock_core::environment::Clock;
use seatlock_core::{
    BalanceLedger, EntryKind, LedgerEntry, LedgerEntryId, LedgerError, LedgerFuture, Money,
    ReservationId, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::mocks::test_clock;

/// Append-only ledger kept in memory.
///
/// The balance of a user is the `balance_after` of their latest entry.
#[derive(Clone)]
pub struct InMemoryBalanceLedger {
    entries: Arc<RwLock<HashMap<UserId, Vec<LedgerEntry>>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBalanceLedger {
    /// Create an empty ledger stamping entries with `clock`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Current balance, for assertions
    #[must_use]
    pub fn balance_of(&self, user_id: &UserId) -> Money {
        self.entries
            .read()
            .unwrap()
            .get(user_id)
            .and_then(|entries| entries.last())
            .map_or(Money::ZERO, |entry| entry.balance_after)
    }

    fn append(
        &self,
        entries: &mut Vec<LedgerEntry>,
        user_id: &UserId,
        kind: EntryKind,
        amount: Money,
        balance_after: Money,
        reference: Option<ReservationId>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id: LedgerEntryId::new(),
            user_id: user_id.clone(),
            kind,
            amount,
            balance_after,
            reference,
            created_at: self.clock.now(),
        };
        entries.push(entry.clone());
        entry
    }
}

impl Default for InMemoryBalanceLedger {
    fn default() -> Self {
        Self::new(Arc::new(test_clock()))
    }
}

/// The payment of `reservation_id` that has not been refunded yet, if any.
fn outstanding_payment(entries: &[LedgerEntry], reservation_id: ReservationId) -> Option<&LedgerEntry> {
    let mut outstanding = None;
    for entry in entries.iter().filter(|e| e.reference == Some(reservation_id)) {
        match entry.kind {
            EntryKind::Payment => outstanding = Some(entry),
            EntryKind::Refund => outstanding = None,
            EntryKind::Charge => {}
        }
    }
    outstanding
}

fn current(entries: &[LedgerEntry]) -> Money {
    entries.last().map_or(Money::ZERO, |e| e.balance_after)
}

impl BalanceLedger for InMemoryBalanceLedger {
    fn balance<'a>(&'a self, user_id: &'a UserId) -> LedgerFuture<'a, Money> {
        Box::pin(async move { Ok(self.balance_of(user_id)) })
    }

    fn charge<'a>(&'a self, user_id: &'a UserId, amount: Money) -> LedgerFuture<'a, LedgerEntry> {
        Box::pin(async move {
            let mut all = self.entries.write().unwrap();
            let entries = all.entry(user_id.clone()).or_default();
            let balance = current(entries)
                .checked_add(amount)
                .ok_or(LedgerError::Overflow)?;
            Ok(self.append(entries, user_id, EntryKind::Charge, amount, balance, None))
        })
    }

    fn debit<'a>(
        &'a self,
        user_id: &'a UserId,
        amount: Money,
        reservation_id: ReservationId,
    ) -> LedgerFuture<'a, LedgerEntry> {
        Box::pin(async move {
            let mut all = self.entries.write().unwrap();
            let entries = all.entry(user_id.clone()).or_default();
            if let Some(existing) = outstanding_payment(entries, reservation_id) {
                return Ok(existing.clone());
            }
            let balance = current(entries);
            let remaining = balance
                .checked_sub(amount)
                .ok_or(LedgerError::InsufficientBalance {
                    balance,
                    required: amount,
                })?;
            Ok(self.append(
                entries,
                user_id,
                EntryKind::Payment,
                amount,
                remaining,
                Some(reservation_id),
            ))
        })
    }

    fn refund<'a>(
        &'a self,
        user_id: &'a UserId,
        reservation_id: ReservationId,
    ) -> LedgerFuture<'a, Option<LedgerEntry>> {
        Box::pin(async move {
            let mut all = self.entries.write().unwrap();
            let entries = all.entry(user_id.clone()).or_default();
            let Some(amount) = outstanding_payment(entries, reservation_id).map(|p| p.amount) else {
                return Ok(None);
            };
            let balance = current(entries)
                .checked_add(amount)
                .ok_or(LedgerError::Overflow)?;
            Ok(Some(self.append(
                entries,
                user_id,
                EntryKind::Refund,
                amount,
                balance,
                Some(reservation_id),
            )))
        })
    }

    fn entries<'a>(&'a self, user_id: &'a UserId) -> LedgerFuture<'a, Vec<LedgerEntry>> {
        Box::pin(async move {
            Ok(self
                .entries
                .read()
                .unwrap()
                .get(user_id)
                .cloned()
                .unwrap_or_default())
        })
    }
}
