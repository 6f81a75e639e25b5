//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, lifecycle, contention). Every failure is scoped to a single
/// operation; nothing here is fatal to the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested item, BOM or order does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A human-visible code (item code, order number) is already taken.
    #[error("duplicate code: {0}")]
    DuplicateCode(String),

    /// Illegal lifecycle transition.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The request is well-formed but not allowed through this path.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Lock or transaction contention. The only retriable kind.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A bill of materials consumes its own finished good.
    #[error("cyclic bill of materials: {0}")]
    CyclicBom(String),

    /// An unload would drive stock negative while the deployment forbids it.
    #[error("insufficient stock for {item}: on hand {on_hand}, requested {requested}")]
    InsufficientStock {
        item: String,
        on_hand: i64,
        requested: i64,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn duplicate_code(code: impl Into<String>) -> Self {
        Self::DuplicateCode(code.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn cyclic_bom(msg: impl Into<String>) -> Self {
        Self::CyclicBom(msg.into())
    }

    /// Whether a caller may retry the same operation after backing off.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Stable machine-readable code for API responses and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::InvalidId(_) => "invalid_id",
            Self::NotFound(_) => "not_found",
            Self::DuplicateCode(_) => "duplicate_code",
            Self::InvalidState(_) => "invalid_state",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::Conflict(_) => "conflict",
            Self::CyclicBom(_) => "cyclic_bom",
            Self::InsufficientStock { .. } => "insufficient_stock",
        }
    }
}
