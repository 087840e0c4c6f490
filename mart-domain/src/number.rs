//! Order numbers and the Luhn checksum.
//!
//! Every order number accepted by the service must pass the Luhn mod-10
//! check. Format problems (too short, non-digit characters) are reported
//! separately from a failed checksum because the HTTP layer maps them to
//! different status codes (400 vs 422).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain errors for value validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Order number is too short or contains non-digit characters
    #[error("Invalid order number format: {0}")]
    OrderNumberFormat(String),

    /// Order number digits do not satisfy the Luhn checksum
    #[error("Order number failed checksum: {0}")]
    OrderNumberChecksum(String),

    /// Unknown order status string
    #[error("Invalid order status: {0}")]
    InvalidStatus(String),

    /// Monetary amount must be positive
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

// =============================================================================
// OrderNumber
// =============================================================================

/// A checksum-validated order number.
///
/// # Invariants
/// - At least 2 characters, digits only
/// - Passes the Luhn mod-10 check
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Parse and validate an order number.
    ///
    /// # Errors
    /// Returns `DomainError::OrderNumberFormat` for short or non-numeric
    /// input, `DomainError::OrderNumberChecksum` when the digits fail the
    /// Luhn check.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        let value = value.trim();

        if value.len() < 2 {
            return Err(DomainError::OrderNumberFormat(format!(
                "too short: {:?}",
                value
            )));
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::OrderNumberFormat(format!(
                "non-digit characters: {:?}",
                value
            )));
        }

        if checksum(value) % 10 != 0 {
            return Err(DomainError::OrderNumberChecksum(value.to_string()));
        }

        Ok(Self(value.to_string()))
    }

    /// Get the number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the underlying string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Luhn checksum
// =============================================================================

/// Compute the Luhn sum of a digit string.
///
/// Doubles every second digit from the right, subtracting 9 when the
/// doubled value exceeds 9. The input must contain digits only.
fn checksum(digits: &str) -> u32 {
    let mut sum = 0u32;
    let mut double = false;

    for b in digits.bytes().rev() {
        let mut n = u32::from(b - b'0');
        if double {
            n *= 2;
            if n > 9 {
                n -= 9;
            }
        }
        sum += n;
        double = !double;
    }

    sum
}

/// Compute the Luhn check digit for a digit string (without check digit).
///
/// Useful for constructing valid order numbers in tests and tooling.
pub fn check_digit(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Shift left by one position (the appended check digit) before summing.
    let shifted = format!("{}0", digits);
    Some((10 - checksum(&shifted) % 10) % 10)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_valid_numbers() {
        for number in ["12345678903", "79927398713", "4561261212345467", "49927398716"] {
            assert!(OrderNumber::parse(number).is_ok(), "expected valid: {}", number);
        }
    }

    #[test]
    fn test_known_invalid_checksums() {
        for number in ["12345678902", "79927398710", "4561261212345464"] {
            assert!(matches!(
                OrderNumber::parse(number),
                Err(DomainError::OrderNumberChecksum(_))
            ));
        }
    }

    #[test]
    fn test_too_short_is_format_error() {
        for number in ["", "0", "5"] {
            assert!(matches!(
                OrderNumber::parse(number),
                Err(DomainError::OrderNumberFormat(_))
            ));
        }
    }

    #[test]
    fn test_non_digit_is_format_error() {
        for number in ["12345abc", "12 34", "-12345678903", "1234567890e"] {
            assert!(matches!(
                OrderNumber::parse(number),
                Err(DomainError::OrderNumberFormat(_))
            ));
        }
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let parsed = OrderNumber::parse("  12345678903\n").unwrap();
        assert_eq!(parsed.as_str(), "12345678903");
    }

    #[test]
    fn test_single_digit_error_detection() {
        // Altering any single digit of a valid number breaks the checksum.
        let number = "79927398713";
        for pos in 0..number.len() {
            let original = number.as_bytes()[pos] - b'0';
            let altered_digit = (original + 1) % 10;
            let mut altered = number.as_bytes().to_vec();
            altered[pos] = altered_digit + b'0';
            let altered = String::from_utf8(altered).unwrap();

            assert!(
                matches!(
                    OrderNumber::parse(&altered),
                    Err(DomainError::OrderNumberChecksum(_))
                ),
                "altered number unexpectedly valid: {}",
                altered
            );
        }
    }

    #[test]
    fn test_check_digit_builds_valid_numbers() {
        for prefix in ["1234567890", "7992739871", "424242424242424"] {
            let digit = check_digit(prefix).unwrap();
            let full = format!("{}{}", prefix, digit);
            assert!(OrderNumber::parse(&full).is_ok(), "built number invalid: {}", full);
        }
    }

    #[test]
    fn test_check_digit_rejects_non_digits() {
        assert_eq!(check_digit(""), None);
        assert_eq!(check_digit("12a4"), None);
    }
}
