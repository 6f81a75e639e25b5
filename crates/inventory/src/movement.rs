//! Stock movements: the immutable events the ledger journals.
//!
//! On-hand quantity is a fold over an item's movements. Everything here is
//! pure; locking and persistence live in the infrastructure ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockforge_core::{DomainError, ItemId, MovementId, TransactionId};
use stockforge_events::Event;

/// Direction of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Load,
    Unload,
    /// Absolute set, typically after a physical count.
    Adjust,
}

/// Why stock moved. Fixed set; persisted in kebab-case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MovementCause {
    Purchase,
    Sale,
    Return,
    InventoryCount,
    InternalConsumption,
    ProductionOutput,
}

impl MovementCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementCause::Purchase => "purchase",
            MovementCause::Sale => "sale",
            MovementCause::Return => "return",
            MovementCause::InventoryCount => "inventory-count",
            MovementCause::InternalConsumption => "internal-consumption",
            MovementCause::ProductionOutput => "production-output",
        }
    }
}

/// Business policy for unloads that would drive stock below zero.
///
/// The default is permissive: oversold stock shows up as a negative on-hand
/// warning instead of a rejected movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPolicy {
    pub allow_negative: bool,
}

impl Default for StockPolicy {
    fn default() -> Self {
        Self {
            allow_negative: true,
        }
    }
}

impl StockPolicy {
    pub fn strict() -> Self {
        Self {
            allow_negative: false,
        }
    }
}

/// A movement request that has not been sequenced against the journal yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementDraft {
    pub item_id: ItemId,
    pub kind: MovementKind,
    pub quantity: i64,
    pub cause: MovementCause,
    pub note: Option<String>,
}

impl MovementDraft {
    pub fn new(item_id: ItemId, kind: MovementKind, quantity: i64, cause: MovementCause) -> Self {
        Self {
            item_id,
            kind,
            quantity,
            cause,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        let trimmed = note.trim();
        self.note = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        match self.kind {
            MovementKind::Load | MovementKind::Unload if self.quantity <= 0 => Err(
                DomainError::validation("load/unload quantity must be positive"),
            ),
            MovementKind::Adjust if self.quantity < 0 => {
                Err(DomainError::validation("adjust quantity cannot be negative"))
            }
            _ => Ok(()),
        }
    }
}

/// `resulting` for a movement of `kind`/`quantity` applied on top of `prior`.
pub fn resulting_quantity(kind: MovementKind, prior: i64, quantity: i64) -> Result<i64, DomainError> {
    let next = match kind {
        MovementKind::Load => prior.checked_add(quantity),
        MovementKind::Unload => prior.checked_sub(quantity),
        MovementKind::Adjust => Some(quantity),
    };
    next.ok_or_else(|| DomainError::invariant("stock quantity overflow"))
}

/// Validate `draft` against `prior` under `policy` and return the resulting
/// quantity. `item_label` is only used for error messages.
pub fn stage(
    draft: &MovementDraft,
    prior: i64,
    policy: StockPolicy,
    item_label: &str,
) -> Result<i64, DomainError> {
    draft.validate()?;
    let resulting = resulting_quantity(draft.kind, prior, draft.quantity)?;

    if resulting < 0 && !policy.allow_negative && draft.kind == MovementKind::Unload {
        return Err(DomainError::InsufficientStock {
            item: item_label.to_string(),
            on_hand: prior,
            requested: draft.quantity,
        });
    }

    Ok(resulting)
}

/// An immutable, journaled movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub item_id: ItemId,
    /// 1-based, gapless position in the item's journal.
    pub sequence: u64,
    pub kind: MovementKind,
    pub quantity: i64,
    pub cause: MovementCause,
    pub prior: i64,
    pub resulting: i64,
    pub recorded_at: DateTime<Utc>,
    pub note: Option<String>,
    /// Set when the movement was committed as part of a multi-item transaction.
    pub transaction: Option<TransactionId>,
}

impl Movement {
    /// Whether `resulting` follows from `prior`, `kind` and `quantity`.
    pub fn is_consistent(&self) -> bool {
        resulting_quantity(self.kind, self.prior, self.quantity).ok() == Some(self.resulting)
    }

    pub fn left_negative(&self) -> bool {
        self.resulting < 0
    }
}

/// Fold an item's movements from quantity 0.
///
/// Movements are ordered by `sequence`; every `prior` must equal the running
/// total and every movement must be internally consistent. Any break means the
/// journal was tampered with or corrupted.
pub fn replay<'a>(movements: impl IntoIterator<Item = &'a Movement>) -> Result<i64, DomainError> {
    let mut ordered: Vec<&Movement> = movements.into_iter().collect();
    ordered.sort_by_key(|m| m.sequence);

    let mut running = 0i64;
    for (idx, m) in ordered.iter().enumerate() {
        let expected_seq = idx as u64 + 1;
        if m.sequence != expected_seq {
            return Err(DomainError::invariant(format!(
                "journal gap: expected sequence {expected_seq}, found {}",
                m.sequence
            )));
        }
        if m.prior != running {
            return Err(DomainError::invariant(format!(
                "movement {} prior {} does not match running total {running}",
                m.sequence, m.prior
            )));
        }
        if !m.is_consistent() {
            return Err(DomainError::invariant(format!(
                "movement {} resulting {} is inconsistent with its kind",
                m.sequence, m.resulting
            )));
        }
        running = m.resulting;
    }
    Ok(running)
}

/// Event published for every journaled movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    MovementRecorded(Movement),
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::MovementRecorded(_) => "inventory.movement.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::MovementRecorded(m) => m.recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement_from(draft: &MovementDraft, sequence: u64, prior: i64, resulting: i64) -> Movement {
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
            transaction: None,
        }
    }

    #[test]
    fn kind_arithmetic() {
        assert_eq!(resulting_quantity(MovementKind::Load, 70, 10).unwrap(), 80);
        assert_eq!(resulting_quantity(MovementKind::Unload, 100, 30).unwrap(), 70);
        assert_eq!(resulting_quantity(MovementKind::Adjust, 70, 64).unwrap(), 64);
    }

    #[test]
    fn overflow_is_an_invariant_error() {
        let err = resulting_quantity(MovementKind::Load, i64::MAX, 1).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn zero_quantity_only_valid_for_adjust() {
        let item = ItemId::new();
        assert!(MovementDraft::new(item, MovementKind::Load, 0, MovementCause::Purchase).validate().is_err());
        assert!(MovementDraft::new(item, MovementKind::Unload, 0, MovementCause::Sale).validate().is_err());
        assert!(
            MovementDraft::new(item, MovementKind::Adjust, 0, MovementCause::InventoryCount)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn permissive_policy_allows_negative_unload() {
        let draft = MovementDraft::new(ItemId::new(), MovementKind::Unload, 30, MovementCause::Sale);
        assert_eq!(stage(&draft, 10, StockPolicy::default(), "MAT-0001").unwrap(), -20);
    }

    #[test]
    fn strict_policy_rejects_negative_unload() {
        let draft = MovementDraft::new(ItemId::new(), MovementKind::Unload, 30, MovementCause::Sale);
        let err = stage(&draft, 10, StockPolicy::strict(), "MAT-0001").unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                item: "MAT-0001".into(),
                on_hand: 10,
                requested: 30
            }
        );
        // Exactly draining stock is fine under either policy.
        let exact = MovementDraft::new(ItemId::new(), MovementKind::Unload, 10, MovementCause::Sale);
        assert_eq!(stage(&exact, 10, StockPolicy::strict(), "MAT-0001").unwrap(), 0);
    }

    #[test]
    fn blank_note_is_dropped() {
        let draft = MovementDraft::new(ItemId::new(), MovementKind::Load, 1, MovementCause::Return).with_note("   ");
        assert_eq!(draft.note, None);
    }

    #[test]
    fn replay_detects_broken_chain() {
        let draft = MovementDraft::new(ItemId::new(), MovementKind::Load, 5, MovementCause::Purchase);
        let first = movement_from(&draft, 1, 0, 5);
        let bad = movement_from(&draft, 2, 6, 11);
        assert_eq!(replay([&first]).unwrap(), 5);
        assert!(replay([&first, &bad]).is_err());
    }

    #[test]
    fn replay_orders_by_sequence() {
        let item = ItemId::new();
        let load = MovementDraft::new(item, MovementKind::Load, 100, MovementCause::Purchase);
        let unload = MovementDraft::new(item, MovementKind::Unload, 30, MovementCause::Sale);
        let a = movement_from(&load, 1, 0, 100);
        let b = movement_from(&unload, 2, 100, 70);
        assert_eq!(replay([&b, &a]).unwrap(), 70);
    }

    #[test]
    fn cause_serializes_kebab_case() {
        let json = serde_json::to_string(&MovementCause::InternalConsumption).unwrap();
        assert_eq!(json, "\"internal-consumption\"");
        let kind = serde_json::to_string(&MovementKind::Unload).unwrap();
        assert_eq!(kind, "\"unload\"");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn kind_strategy() -> impl Strategy<Value = MovementKind> {
            prop_oneof![
                Just(MovementKind::Load),
                Just(MovementKind::Unload),
                Just(MovementKind::Adjust),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: staging a sequence of drafts yields a journal whose
            /// replay equals the final on-hand value.
            #[test]
            fn replay_reproduces_on_hand(
                ops in prop::collection::vec((kind_strategy(), 1i64..10_000), 1..40)
            ) {
                let item = ItemId::new();
                let mut on_hand = 0i64;
                let mut journal = Vec::new();

                for (idx, (kind, qty)) in ops.into_iter().enumerate() {
                    let draft = MovementDraft::new(item, kind, qty, MovementCause::InventoryCount);
                    let resulting = stage(&draft, on_hand, StockPolicy::default(), "X-0001").unwrap();
                    let m = movement_from(&draft, idx as u64 + 1, on_hand, resulting);
                    prop_assert!(m.is_consistent());
                    on_hand = resulting;
                    journal.push(m);
                }

                prop_assert_eq!(replay(&journal).unwrap(), on_hand);
            }

            /// Property: the strict policy never produces a negative result.
            #[test]
            fn strict_policy_never_goes_negative(
                ops in prop::collection::vec((kind_strategy(), 1i64..500), 1..40)
            ) {
                let item = ItemId::new();
                let mut on_hand = 0i64;
                for (kind, qty) in ops {
                    let draft = MovementDraft::new(item, kind, qty, MovementCause::Sale);
                    if let Ok(resulting) = stage(&draft, on_hand, StockPolicy::strict(), "X-0001") {
                        on_hand = resulting;
                    }
                    prop_assert!(on_hand >= 0);
                }
            }
        }
    }
}
