//! Movement ledger: the append-only stock journal and the only writer of on-hand.
//!
//! Each item has a row (journal + materialized on-hand) behind its own
//! `parking_lot::Mutex`. Writers take row locks with a bounded wait, so
//! appends to different items never contend and no call blocks forever.
//!
//! ```text
//! commit(drafts)
//!   ↓
//! 1. Claim the transaction key (idempotent replay if already committed)
//!   ↓
//! 2. Lock every touched row, sorted by ItemId
//!   ↓
//! 3. Stage all drafts against scratch quantities
//!   ↓
//! 4. Apply all (infallible) + publish, still under the row locks
//! ```
//!
//! Publication happens under the row lock so envelopes for one item reach
//! the bus in sequence order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use stockforge_core::{DomainError, DomainResult, ItemId, MovementId, TransactionId};
use stockforge_events::{EventBus, EventEnvelope};
use stockforge_inventory::{Movement, MovementCause, MovementDraft, MovementKind, StockEvent, StockPolicy, replay, stage};

use crate::retry::RetryPolicy;

/// Aggregate type used on published stock envelopes.
pub const STOCK_AGGREGATE_TYPE: &str = "inventory.stock";

#[derive(Debug)]
pub(crate) struct ItemRow {
    label: String,
    on_hand: i64,
    journal: Vec<Movement>,
    retired: bool,
}

#[derive(Debug, Clone)]
enum TransactionState {
    InFlight,
    Committed(Vec<Movement>),
}

#[derive(Debug)]
pub struct MovementLedger<B> {
    rows: RwLock<HashMap<ItemId, Arc<Mutex<ItemRow>>>>,
    transactions: Mutex<HashMap<TransactionId, TransactionState>>,
    policy: StockPolicy,
    lock_timeout: Duration,
    retry: RetryPolicy,
    bus: B,
}

impl<B> MovementLedger<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(bus: B) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            policy: StockPolicy::default(),
            lock_timeout: Duration::from_millis(250),
            retry: RetryPolicy::default(),
            bus,
        }
    }

    pub fn with_policy(mut self, policy: StockPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn policy(&self) -> StockPolicy {
        self.policy
    }

    /// Open an empty journal for a newly created catalog item.
    pub fn register_item(&self, item_id: ItemId, label: impl Into<String>) {
        self.rows.write().entry(item_id).or_insert_with(|| {
            Arc::new(Mutex::new(ItemRow {
                label: label.into(),
                on_hand: 0,
                journal: Vec::new(),
                retired: false,
            }))
        });
    }

    /// Mark a soft-deleted item: its history stays readable, new movements are refused.
    pub fn retire_item(&self, item_id: ItemId) -> DomainResult<()> {
        let row = self.row(item_id)?;
        let mut guard = self.lock(&row, item_id)?;
        guard.retired = true;
        Ok(())
    }

    /// Undo `retire_item` when the delete it belonged to was not written.
    pub fn restore_item(&self, item_id: ItemId) -> DomainResult<()> {
        let row = self.row(item_id)?;
        let mut guard = self.lock(&row, item_id)?;
        guard.retired = false;
        Ok(())
    }

    /// Append exactly one movement and update on-hand to its `resulting`.
    #[instrument(skip_all, fields(item = %item_id, kind = ?kind, quantity = quantity, cause = cause.as_str()))]
    pub fn append(
        &self,
        item_id: ItemId,
        kind: MovementKind,
        quantity: i64,
        cause: MovementCause,
        note: Option<String>,
    ) -> DomainResult<Movement> {
        let mut draft = MovementDraft::new(item_id, kind, quantity, cause);
        if let Some(note) = note {
            draft = draft.with_note(note);
        }
        draft.validate()?;

        let row = self.row(item_id)?;
        let mut guard = self.lock(&row, item_id)?;
        ensure_active(&guard)?;

        let prior = guard.on_hand;
        let resulting = stage(&draft, prior, self.policy, &guard.label)?;
        let movement = build_movement(&draft, guard.journal.len() as u64 + 1, prior, resulting, None);

        if movement.left_negative() {
            warn!(item = %guard.label, resulting, "stock went negative");
        }

        guard.on_hand = resulting;
        guard.journal.push(movement.clone());
        self.publish(&movement);

        Ok(movement)
    }

    /// `append`, retrying lock contention under the configured policy.
    pub fn append_with_retry(
        &self,
        item_id: ItemId,
        kind: MovementKind,
        quantity: i64,
        cause: MovementCause,
        note: Option<String>,
    ) -> DomainResult<Movement> {
        self.retry
            .run(|_| self.append(item_id, kind, quantity, cause, note.clone()))
    }

    /// Atomically commit a batch of movements across any number of items.
    ///
    /// Either every draft is journaled or none is. With a `transaction_key`
    /// that was already committed, the original movements come back and
    /// nothing new is written.
    #[instrument(skip_all, fields(drafts = drafts.len(), key = ?transaction_key))]
    pub fn commit(
        &self,
        drafts: &[MovementDraft],
        transaction_key: Option<TransactionId>,
    ) -> DomainResult<Vec<Movement>> {
        if drafts.is_empty() {
            return Err(DomainError::validation("a transaction needs at least one movement"));
        }
        for d in drafts {
            d.validate()?;
        }

        // Unkeyed batches still share a transaction id but cannot be replayed.
        let Some(transaction) = transaction_key else {
            return self.commit_claimed(drafts, TransactionId::new());
        };
        if let Some(previous) = self.claim_transaction(transaction)? {
            debug!(%transaction, movements = previous.len(), "transaction already committed");
            return Ok(previous);
        }

        let result = self.commit_claimed(drafts, transaction);

        let mut txns = self.transactions.lock();
        match &result {
            Ok(movements) => {
                txns.insert(transaction, TransactionState::Committed(movements.clone()));
            }
            Err(_) => {
                txns.remove(&transaction);
            }
        }
        result
    }

    /// `commit`, retrying lock contention under the configured policy.
    pub fn commit_with_retry(
        &self,
        drafts: &[MovementDraft],
        transaction_key: Option<TransactionId>,
    ) -> DomainResult<Vec<Movement>> {
        self.retry.run(|_| self.commit(drafts, transaction_key))
    }

    /// Movements already committed under `transaction`, if any.
    pub fn transaction(&self, transaction: TransactionId) -> Option<Vec<Movement>> {
        match self.transactions.lock().get(&transaction) {
            Some(TransactionState::Committed(m)) => Some(m.clone()),
            _ => None,
        }
    }

    /// The item's journal in sequence order.
    pub fn movements(&self, item_id: ItemId) -> DomainResult<Vec<Movement>> {
        let row = self.row(item_id)?;
        let guard = self.lock(&row, item_id)?;
        Ok(guard.journal.clone())
    }

    /// Materialized on-hand quantity.
    pub fn on_hand(&self, item_id: ItemId) -> DomainResult<i64> {
        let row = self.row(item_id)?;
        let guard = self.lock(&row, item_id)?;
        Ok(guard.on_hand)
    }

    /// Fold the journal from zero and check it against the materialized on-hand.
    pub fn replay(&self, item_id: ItemId) -> DomainResult<i64> {
        let row = self.row(item_id)?;
        let guard = self.lock(&row, item_id)?;
        let folded = replay(&guard.journal)?;
        if folded != guard.on_hand {
            warn!(item = %guard.label, folded, on_hand = guard.on_hand, "journal replay disagrees with on-hand");
            return Err(DomainError::invariant(format!(
                "replay of {} gives {folded} but on-hand is {}",
                guard.label, guard.on_hand
            )));
        }
        Ok(folded)
    }

    /// Every committed movement as a published envelope, for projection rebuilds.
    pub fn envelopes(&self) -> DomainResult<Vec<EventEnvelope<JsonValue>>> {
        let ids: Vec<ItemId> = self.rows.read().keys().copied().collect();
        let mut out = Vec::new();
        for id in ids {
            for m in self.movements(id)? {
                if let Some(env) = envelope_for(&m) {
                    out.push(env);
                }
            }
        }
        Ok(out)
    }

    fn commit_claimed(&self, drafts: &[MovementDraft], transaction: TransactionId) -> DomainResult<Vec<Movement>> {
        let mut item_ids: Vec<ItemId> = drafts.iter().map(|d| d.item_id).collect();
        item_ids.sort();
        item_ids.dedup();

        let rows = item_ids
            .iter()
            .map(|id| self.row(*id).map(|row| (*id, row)))
            .collect::<DomainResult<Vec<_>>>()?;

        // Deterministic lock order (sorted ItemId) rules out deadlock between batches.
        let mut guards: HashMap<ItemId, MutexGuard<'_, ItemRow>> = HashMap::with_capacity(rows.len());
        for (id, row) in &rows {
            let guard = self.lock(row, *id)?;
            ensure_active(&guard)?;
            guards.insert(*id, guard);
        }

        // Stage against scratch copies so several drafts on one item chain.
        let mut scratch: HashMap<ItemId, (i64, u64)> = guards
            .iter()
            .map(|(id, g)| (*id, (g.on_hand, g.journal.len() as u64)))
            .collect();

        let mut staged = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let label = guards.get(&draft.item_id).map(|g| g.label.as_str()).unwrap_or_default();
            let Some((quantity, len)) = scratch.get_mut(&draft.item_id) else {
                return Err(DomainError::invariant("draft item missing from locked rows"));
            };
            let prior = *quantity;
            let resulting = stage(draft, prior, self.policy, label)?;
            *len += 1;
            *quantity = resulting;
            staged.push(build_movement(draft, *len, prior, resulting, Some(transaction)));
        }

        for movement in &staged {
            if let Some(guard) = guards.get_mut(&movement.item_id) {
                if movement.left_negative() {
                    warn!(item = %guard.label, resulting = movement.resulting, %transaction, "stock went negative");
                }
                guard.on_hand = movement.resulting;
                guard.journal.push(movement.clone());
            }
        }
        for movement in &staged {
            self.publish(movement);
        }

        Ok(staged)
    }

    /// Reserve `transaction` for this commit, or return what it already committed.
    fn claim_transaction(&self, transaction: TransactionId) -> DomainResult<Option<Vec<Movement>>> {
        let mut txns = self.transactions.lock();
        match txns.get(&transaction) {
            Some(TransactionState::Committed(m)) => Ok(Some(m.clone())),
            Some(TransactionState::InFlight) => Err(DomainError::conflict(format!(
                "transaction {transaction} is already being committed"
            ))),
            None => {
                txns.insert(transaction, TransactionState::InFlight);
                Ok(None)
            }
        }
    }

    pub(crate) fn row(&self, item_id: ItemId) -> DomainResult<Arc<Mutex<ItemRow>>> {
        self.rows
            .read()
            .get(&item_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("ledger row for item {item_id}")))
    }

    fn lock<'a>(&self, row: &'a Mutex<ItemRow>, item_id: ItemId) -> DomainResult<MutexGuard<'a, ItemRow>> {
        row.try_lock_for(self.lock_timeout).ok_or_else(|| {
            DomainError::conflict(format!(
                "row lock for item {item_id} not acquired within {}ms",
                self.lock_timeout.as_millis()
            ))
        })
    }

    fn publish(&self, movement: &Movement) {
        let Some(envelope) = envelope_for(movement) else {
            return;
        };
        if let Err(err) = self.bus.publish(envelope) {
            warn!(item = %movement.item_id, sequence = movement.sequence, error = ?err, "stock publication failed");
        }
    }
}

fn ensure_active(row: &ItemRow) -> DomainResult<()> {
    if row.retired {
        return Err(DomainError::invalid_state(format!(
            "item {} is deleted and accepts no movements",
            row.label
        )));
    }
    Ok(())
}

fn build_movement(
    draft: &MovementDraft,
    sequence: u64,
    prior: i64,
    resulting: i64,
    transaction: Option<TransactionId>,
) -> Movement {
    Movement {
        id: MovementId::new(),
        item_id: draft.item_id,
        sequence,
        kind: draft.kind,
        quantity: draft.quantity,
        cause: draft.cause,
        prior,
        resulting,
        recorded_at: Utc::now(),
        note: draft.note.clone(),
        transaction,
    }
}

fn envelope_for(movement: &Movement) -> Option<EventEnvelope<JsonValue>> {
    match serde_json::to_value(StockEvent::MovementRecorded(movement.clone())) {
        Ok(payload) => Some(EventEnvelope::new(
            Uuid::from(movement.id),
            movement.item_id.into(),
            STOCK_AGGREGATE_TYPE,
            movement.sequence,
            payload,
        )),
        Err(err) => {
            warn!(movement = %movement.id, error = %err, "movement could not be serialized");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use stockforge_events::InMemoryEventBus;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn ledger(policy: StockPolicy) -> (Arc<MovementLedger<Bus>>, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let ledger = MovementLedger::new(bus.clone())
            .with_policy(policy)
            .with_lock_timeout(Duration::from_millis(50))
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)));
        (Arc::new(ledger), bus)
    }

    fn item(ledger: &MovementLedger<Bus>, label: &str) -> ItemId {
        let id = ItemId::new();
        ledger.register_item(id, label);
        id
    }

    #[test]
    fn append_chains_prior_and_resulting() {
        let (ledger, _) = ledger(StockPolicy::default());
        let mat = item(&ledger, "MAT-0001");

        let a = ledger.append(mat, MovementKind::Load, 100, MovementCause::Purchase, None).unwrap();
        let b = ledger.append(mat, MovementKind::Unload, 30, MovementCause::Sale, None).unwrap();
        let c = ledger
            .append(mat, MovementKind::Adjust, 65, MovementCause::InventoryCount, Some("count".into()))
            .unwrap();

        assert_eq!((a.prior, a.resulting, a.sequence), (0, 100, 1));
        assert_eq!((b.prior, b.resulting, b.sequence), (100, 70, 2));
        assert_eq!((c.prior, c.resulting, c.sequence), (70, 65, 3));
        assert_eq!(ledger.on_hand(mat).unwrap(), 65);
        assert_eq!(ledger.replay(mat).unwrap(), 65);
    }

    #[test]
    fn permissive_policy_allows_negative() {
        let (ledger, _) = ledger(StockPolicy::default());
        let mat = item(&ledger, "MAT-0001");
        let m = ledger.append(mat, MovementKind::Unload, 5, MovementCause::Sale, None).unwrap();
        assert_eq!(m.resulting, -5);
        assert!(m.left_negative());
    }

    #[test]
    fn strict_policy_rejects_and_writes_nothing() {
        let (ledger, bus) = ledger(StockPolicy::strict());
        let sub = bus.subscribe();
        let mat = item(&ledger, "MAT-0001");

        let err = ledger.append(mat, MovementKind::Unload, 5, MovementCause::Sale, None).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { on_hand: 0, requested: 5, .. }));
        assert!(ledger.movements(mat).unwrap().is_empty());
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn unknown_and_retired_items_are_refused() {
        let (ledger, _) = ledger(StockPolicy::default());
        let err = ledger
            .append(ItemId::new(), MovementKind::Load, 1, MovementCause::Purchase, None)
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        let mat = item(&ledger, "MAT-0001");
        ledger.append(mat, MovementKind::Load, 1, MovementCause::Purchase, None).unwrap();
        ledger.retire_item(mat).unwrap();
        let err = ledger.append(mat, MovementKind::Load, 1, MovementCause::Purchase, None).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
        assert_eq!(ledger.movements(mat).unwrap().len(), 1);
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let (ledger, _) = ledger(StockPolicy::strict());
        let a = item(&ledger, "MAT-0001");
        let b = item(&ledger, "MAT-0002");
        ledger.append(a, MovementKind::Load, 10, MovementCause::Purchase, None).unwrap();

        let drafts = vec![
            MovementDraft::new(a, MovementKind::Unload, 4, MovementCause::InternalConsumption),
            MovementDraft::new(b, MovementKind::Unload, 1, MovementCause::InternalConsumption),
        ];
        let err = ledger.commit(&drafts, None).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));
        assert_eq!(ledger.on_hand(a).unwrap(), 10);
        assert_eq!(ledger.movements(a).unwrap().len(), 1);
        assert!(ledger.movements(b).unwrap().is_empty());
    }

    #[test]
    fn commit_chains_multiple_drafts_on_one_item() {
        let (ledger, _) = ledger(StockPolicy::default());
        let a = item(&ledger, "MAT-0001");
        let drafts = vec![
            MovementDraft::new(a, MovementKind::Load, 10, MovementCause::Purchase),
            MovementDraft::new(a, MovementKind::Unload, 3, MovementCause::Sale),
        ];
        let movements = ledger.commit(&drafts, None).unwrap();
        assert_eq!(movements[1].prior, 10);
        assert_eq!(movements[1].resulting, 7);
        assert_eq!(movements[1].sequence, 2);
        assert_eq!(movements[0].transaction, movements[1].transaction);
        assert_eq!(ledger.replay(a).unwrap(), 7);
    }

    #[test]
    fn repeated_transaction_key_writes_once() {
        let (ledger, bus) = ledger(StockPolicy::default());
        let sub = bus.subscribe();
        let a = item(&ledger, "MAT-0001");
        let key = TransactionId::new();
        let drafts = vec![MovementDraft::new(a, MovementKind::Load, 5, MovementCause::ProductionOutput)];

        let first = ledger.commit(&drafts, Some(key)).unwrap();
        let second = ledger.commit(&drafts, Some(key)).unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.on_hand(a).unwrap(), 5);
        assert_eq!(sub.drain().len(), 1);
        assert_eq!(ledger.transaction(key).unwrap().len(), 1);
    }

    #[test]
    fn unkeyed_commits_are_not_retained() {
        let (ledger, _) = ledger(StockPolicy::default());
        let a = item(&ledger, "MAT-0001");
        let drafts = vec![MovementDraft::new(a, MovementKind::Load, 1, MovementCause::Purchase)];
        for _ in 0..100 {
            let m = ledger.commit(&drafts, None).unwrap();
            assert!(ledger.transaction(m[0].transaction.unwrap()).is_none());
        }
        assert!(ledger.transactions.lock().is_empty());
        assert_eq!(ledger.on_hand(a).unwrap(), 100);
    }

    #[test]
    fn restored_row_accepts_movements_again() {
        let (ledger, _) = ledger(StockPolicy::default());
        let a = item(&ledger, "MAT-0001");
        ledger.retire_item(a).unwrap();
        ledger.restore_item(a).unwrap();
        ledger.append(a, MovementKind::Load, 1, MovementCause::Purchase, None).unwrap();
    }

    #[test]
    fn failed_commit_releases_its_key() {
        let (ledger, _) = ledger(StockPolicy::strict());
        let a = item(&ledger, "MAT-0001");
        let key = TransactionId::new();
        let drafts = vec![MovementDraft::new(a, MovementKind::Unload, 5, MovementCause::Sale)];

        assert!(ledger.commit(&drafts, Some(key)).is_err());
        ledger.append(a, MovementKind::Load, 5, MovementCause::Purchase, None).unwrap();
        assert_eq!(ledger.commit(&drafts, Some(key)).unwrap()[0].resulting, 0);
    }

    #[test]
    fn held_row_lock_times_out_as_conflict() {
        let (ledger, _) = ledger(StockPolicy::default());
        let a = item(&ledger, "MAT-0001");
        let row = ledger.row(a).unwrap();
        let _held = row.lock();

        let l = ledger.clone();
        let err = thread::spawn(move || l.append(a, MovementKind::Load, 1, MovementCause::Purchase, None))
            .join()
            .unwrap()
            .unwrap_err();
        assert!(err.is_retriable());
    }

    #[test]
    fn other_items_are_not_blocked_by_a_held_row() {
        let (ledger, _) = ledger(StockPolicy::default());
        let a = item(&ledger, "MAT-0001");
        let b = item(&ledger, "MAT-0002");
        let row = ledger.row(a).unwrap();
        let _held = row.lock();

        let l = ledger.clone();
        let m = thread::spawn(move || l.append(b, MovementKind::Load, 1, MovementCause::Purchase, None))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(m.resulting, 1);
    }

    #[test]
    fn published_envelopes_follow_item_sequence() {
        let (ledger, bus) = ledger(StockPolicy::default());
        let sub = bus.subscribe();
        let a = item(&ledger, "MAT-0001");
        for _ in 0..3 {
            ledger.append(a, MovementKind::Load, 1, MovementCause::Purchase, None).unwrap();
        }
        let seqs: Vec<u64> = sub.drain().iter().map(|e| e.sequence_number()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(ledger.envelopes().unwrap().len(), 3);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn draft_strategy() -> impl Strategy<Value = (MovementKind, i64)> {
            prop_oneof![
                (1i64..500).prop_map(|q| (MovementKind::Load, q)),
                (1i64..500).prop_map(|q| (MovementKind::Unload, q)),
                (0i64..500).prop_map(|q| (MovementKind::Adjust, q)),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

            /// Property: every append leaves on-hand equal to its `resulting` and replay agrees.
            #[test]
            fn on_hand_tracks_every_resulting(ops in prop::collection::vec(draft_strategy(), 1..40)) {
                let (ledger, _) = ledger(StockPolicy::default());
                let a = item(&ledger, "MAT-0001");
                for (kind, qty) in ops {
                    let m = ledger.append(a, kind, qty, MovementCause::InventoryCount, None).unwrap();
                    prop_assert!(m.is_consistent());
                    prop_assert_eq!(ledger.on_hand(a).unwrap(), m.resulting);
                }
                prop_assert_eq!(ledger.replay(a).unwrap(), ledger.on_hand(a).unwrap());
            }
        }
    }
}
