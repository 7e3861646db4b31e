//! Chilean RUT validation and normalization.
//!
//! The check character is a modulo-11 checksum over the numeric body with
//! weights cycling 2..=7 from right to left. Remainder 11 maps to `0`,
//! remainder 10 maps to `K`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::WatchError;

static RUT_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{7,8}-[\dK]$").unwrap());

/// A validated national identifier in canonical form: digits, one dash,
/// one check character. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rut(String);

impl Rut {
    /// Normalize and validate a raw identifier.
    pub fn parse(raw: &str) -> Result<Self, WatchError> {
        let normalized = normalize(raw);
        if validate(&normalized) {
            Ok(Rut(normalized))
        } else {
            Err(WatchError::InvalidIdentifier(raw.trim().to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Rut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip whitespace and thousands separators, uppercase, and insert the dash
/// before the check character when it is missing.
pub fn normalize(raw: &str) -> String {
    let mut rut: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect::<String>()
        .to_uppercase();

    if !rut.contains('-') && rut.len() >= 8 {
        rut.insert(rut.len() - 1, '-');
    }

    rut
}

/// Whether a normalized identifier has a correct format and check character.
pub fn validate(rut: &str) -> bool {
    if !RUT_FORMAT.is_match(rut) {
        return false;
    }

    let (body, check) = match rut.split_once('-') {
        Some(parts) => parts,
        None => return false,
    };

    expected_check_char(body) == check.chars().next().unwrap_or('?')
}

fn expected_check_char(body: &str) -> char {
    let mut sum: u32 = 0;
    let mut weight: u32 = 2;

    for digit in body.chars().rev() {
        sum += digit.to_digit(10).unwrap_or(0) * weight;
        weight += 1;
        if weight > 7 {
            weight = 2;
        }
    }

    match 11 - (sum % 11) {
        11 => '0',
        10 => 'K',
        n => char::from_digit(n, 10).unwrap_or('?'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_eight_digit_rut() {
        assert!(validate("18977386-2"));
        assert!(validate("25334838-0"));
    }

    #[test]
    fn accepts_valid_seven_digit_rut() {
        // 6265235: weighted sum gives check digit 1
        assert!(validate(&format!("6265235-{}", expected_check_char("6265235"))));
    }

    #[test]
    fn accepts_k_check_character() {
        // Find a body whose remainder maps to K and verify round-trip.
        let body = (10_000_000..10_000_100u32)
            .map(|n| n.to_string())
            .find(|b| expected_check_char(b) == 'K')
            .expect("a K-check body exists in any 100-number window");
        assert!(validate(&format!("{body}-K")));
        assert!(validate(&normalize(&format!("{body}k"))));
    }

    #[test]
    fn accepts_zero_from_full_remainder() {
        let body = (10_000_000..10_000_100u32)
            .map(|n| n.to_string())
            .find(|b| expected_check_char(b) == '0')
            .expect("a 0-check body exists in any 100-number window");
        assert!(validate(&format!("{body}-0")));
    }

    #[test]
    fn rejects_wrong_check_character() {
        // Every single-character mutation of the check char must fail.
        for c in "0123456789K".chars() {
            let candidate = format!("18977386-{c}");
            assert_eq!(validate(&candidate), c == '2', "mutation {candidate}");
        }
    }

    #[test]
    fn rejects_bad_format() {
        assert!(!validate("123456-7"));       // 6-digit body
        assert!(!validate("123456789-1"));    // 9-digit body
        assert!(!validate("18977386"));       // no check char
        assert!(!validate("18977386-22"));    // two check chars
        assert!(!validate("1897a386-2"));     // letter in body
        assert!(!validate(""));
    }

    #[test]
    fn normalize_strips_separators_and_uppercases() {
        assert_eq!(normalize(" 18.977.386-2 "), "18977386-2");
        assert_eq!(normalize("18977386-2"), "18977386-2");
        assert_eq!(normalize("189773862"), "18977386-2");
        assert_eq!(normalize("7775437-k"), "7775437-K");
    }

    #[test]
    fn normalize_leaves_short_tokens_alone() {
        // Too short to carry a check char; validation rejects it later.
        assert_eq!(normalize("1234567"), "1234567");
        assert!(!validate(&normalize("1234567")));
    }

    #[test]
    fn normalize_then_validate_holds_for_valid_inputs() {
        for raw in ["18.977.386-2", " 18977386-2", "189773862", "25334838-0"] {
            assert!(validate(&normalize(raw)), "raw input {raw:?}");
        }
    }

    #[test]
    fn parse_returns_canonical_identifier() {
        let rut = Rut::parse("18.977.386-2").unwrap();
        assert_eq!(rut.as_str(), "18977386-2");
        assert!(Rut::parse("18977386-3").is_err());
    }
}
