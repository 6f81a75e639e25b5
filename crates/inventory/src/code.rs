//! Item codes: per-category prefix + zero-padded sequence (`MAT-0001`).

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use stockforge_core::{DomainError, ValueObject};

/// Minimum width of the numeric part.
pub const SEQUENCE_WIDTH: usize = 4;

const MAX_PREFIX_LEN: usize = 8;

/// A validated, uppercase item code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemCode {
    prefix: String,
    sequence: u32,
}

impl ValueObject for ItemCode {}

impl ItemCode {
    pub fn new(prefix: &str, sequence: u32) -> Result<Self, DomainError> {
        let prefix = normalize_prefix(prefix)?;
        if sequence == 0 {
            return Err(DomainError::validation("item code sequence starts at 1"));
        }
        Ok(Self { prefix, sequence })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Next code within `prefix`, one past the highest sequence in `existing`.
    ///
    /// Gaps left by deleted or never-created codes are not reused; the
    /// sequence is monotonic per prefix.
    pub fn next_in<'a>(
        prefix: &str,
        existing: impl IntoIterator<Item = &'a ItemCode>,
    ) -> Result<Self, DomainError> {
        let prefix = normalize_prefix(prefix)?;
        let max = existing
            .into_iter()
            .filter(|c| c.prefix == prefix)
            .map(|c| c.sequence)
            .max()
            .unwrap_or(0);
        let sequence = max
            .checked_add(1)
            .ok_or_else(|| DomainError::invariant(format!("sequence exhausted for {prefix}")))?;
        Ok(Self { prefix, sequence })
    }
}

/// Uppercase and validate a category prefix.
pub fn normalize_prefix(prefix: &str) -> Result<String, DomainError> {
    let p = prefix.trim().to_ascii_uppercase();
    if p.is_empty() || p.len() > MAX_PREFIX_LEN {
        return Err(DomainError::validation(format!(
            "category prefix must be 1..={MAX_PREFIX_LEN} characters"
        )));
    }
    let mut chars = p.chars();
    let first_is_letter = chars.next().is_some_and(|c| c.is_ascii_uppercase());
    if !first_is_letter || !p.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return Err(DomainError::validation(format!(
            "category prefix '{prefix}' must be alphanumeric and start with a letter"
        )));
    }
    Ok(p)
}

impl core::fmt::Display for ItemCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{:0width$}", self.prefix, self.sequence, width = SEQUENCE_WIDTH)
    }
}

impl FromStr for ItemCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, digits) = s
            .trim()
            .rsplit_once('-')
            .ok_or_else(|| DomainError::validation(format!("item code '{s}' must look like MAT-0001")))?;
        if digits.len() < SEQUENCE_WIDTH || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "item code '{s}' needs at least {SEQUENCE_WIDTH} sequence digits"
            )));
        }
        if digits.len() > SEQUENCE_WIDTH && digits.starts_with('0') {
            return Err(DomainError::validation(format!(
                "item code '{s}' is padded past {SEQUENCE_WIDTH} digits"
            )));
        }
        let sequence: u32 = digits
            .parse()
            .map_err(|_| DomainError::validation(format!("item code '{s}' sequence out of range")))?;
        ItemCode::new(prefix, sequence)
    }
}

impl TryFrom<String> for ItemCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ItemCode> for String {
    fn from(value: ItemCode) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_zero_padding() {
        assert_eq!(ItemCode::new("mat", 1).unwrap().to_string(), "MAT-0001");
        assert_eq!(ItemCode::new("FIN", 12345).unwrap().to_string(), "FIN-12345");
    }

    #[test]
    fn parses_and_normalizes_case() {
        let code: ItemCode = "mat-0042".parse().unwrap();
        assert_eq!(code.prefix(), "MAT");
        assert_eq!(code.sequence(), 42);
        assert_eq!(code.to_string(), "MAT-0042");
    }

    #[test]
    fn rejects_malformed_codes() {
        for bad in ["MAT0001", "MAT-01", "-0001", "1AB-0001", "MAT-00a1", "MAT-0000"] {
            assert!(bad.parse::<ItemCode>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn only_canonical_padding_is_accepted() {
        for bad in ["MAT-00001", "MAT-012345"] {
            assert!(bad.parse::<ItemCode>().is_err(), "{bad} should be rejected");
        }
        for good in ["MAT-0001", "MAT-12345", "FIN-99999"] {
            assert_eq!(good.parse::<ItemCode>().unwrap().to_string(), good);
        }
    }

    #[test]
    fn next_code_is_per_prefix() {
        let existing = vec![
            ItemCode::new("MAT", 1).unwrap(),
            ItemCode::new("MAT", 7).unwrap(),
            ItemCode::new("FIN", 3).unwrap(),
        ];
        assert_eq!(ItemCode::next_in("mat", &existing).unwrap().to_string(), "MAT-0008");
        assert_eq!(ItemCode::next_in("FIN", &existing).unwrap().to_string(), "FIN-0004");
        assert_eq!(ItemCode::next_in("SEM", &existing).unwrap().to_string(), "SEM-0001");
    }

    #[test]
    fn serde_uses_display_form() {
        let code = ItemCode::new("MAT", 1).unwrap();
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"MAT-0001\"");
        let back: ItemCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }
}
