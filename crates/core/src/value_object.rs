//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. An
/// `ItemCode` or a BOM component line is a value object; a catalog item, with
/// identity that survives metadata edits, is not.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
