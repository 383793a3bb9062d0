//! Big unsigned integer codec
//!
//! Large integers are persisted as lowercase hex strings with a fixed-width
//! length prefix so that the store's lexicographic string order matches
//! numeric order:
//!
//! ```text
//! <prefix: (hex digit count - 1) in `prefix_len` hex digits><hex payload>
//! ```
//!
//! Negative values invert every hex nibble of the positive encoding
//! (prefix included) and prepend `-`, which sorts below every digit.

use std::fmt;

use num_bigint::{BigInt, Sign};
use num_traits::{Num, Zero};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while converting big integer values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BigUIntError {
    /// Value is not an integer literal we understand
    #[error("Invalid big integer value: {0}")]
    InvalidValue(String),

    /// Payload length does not fit into the fixed-width prefix
    #[error("Big integer with {digits} hex digits does not fit a {prefix_len}-digit length prefix")]
    Overflow { digits: usize, prefix_len: u8 },

    /// Stored representation is malformed
    #[error("Malformed encoded big integer: {0}")]
    Malformed(String),
}

/// Result alias for codec operations
pub type BigUIntResult<T> = Result<T, BigUIntError>;

/// Render format for big integers on read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BigUIntFormat {
    /// `0x`-prefixed hex (default)
    #[default]
    Hex,
    /// Decimal digits
    Dec,
}

impl BigUIntFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BigUIntFormat::Hex => "HEX",
            BigUIntFormat::Dec => "DEC",
        }
    }

    /// Parses a format argument (`HEX` / `DEC`, case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "HEX" => Some(BigUIntFormat::Hex),
            "DEC" => Some(BigUIntFormat::Dec),
            _ => None,
        }
    }
}

impl fmt::Display for BigUIntFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a user-facing integer: JSON integer, `0x` hex string or decimal string.
pub fn parse(value: &Value) -> BigUIntResult<BigInt> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(BigInt::from(u))
            } else if let Some(i) = n.as_i64() {
                Ok(BigInt::from(i))
            } else {
                Err(BigUIntError::InvalidValue(n.to_string()))
            }
        }
        Value::String(s) => parse_str(s),
        other => Err(BigUIntError::InvalidValue(other.to_string())),
    }
}

fn parse_str(raw: &str) -> BigUIntResult<BigInt> {
    let s = raw.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let parsed = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        BigInt::from_str_radix(hex, 16)
    } else {
        BigInt::from_str_radix(body, 10)
    };

    let magnitude = parsed.map_err(|_| BigUIntError::InvalidValue(raw.to_string()))?;
    if magnitude.sign() == Sign::Minus {
        return Err(BigUIntError::InvalidValue(raw.to_string()));
    }

    Ok(if negative { -magnitude } else { magnitude })
}

/// Encodes an integer into its sortable persisted form.
pub fn encode(prefix_len: u8, n: &BigInt) -> BigUIntResult<String> {
    let negative = n.sign() == Sign::Minus;
    let hex = n.magnitude().to_str_radix(16);

    let len = format!("{:x}", hex.len() - 1);
    if len.len() > prefix_len as usize {
        return Err(BigUIntError::Overflow {
            digits: hex.len(),
            prefix_len,
        });
    }

    let mut encoded = String::with_capacity(prefix_len as usize + hex.len() + 1);
    for _ in len.len()..prefix_len as usize {
        encoded.push('0');
    }
    encoded.push_str(&len);
    encoded.push_str(&hex);

    if negative {
        Ok(format!("-{}", invert_hex(&encoded)?))
    } else {
        Ok(encoded)
    }
}

/// Convenience: parse then encode a user-facing value.
pub fn encode_value(prefix_len: u8, value: &Value) -> BigUIntResult<String> {
    encode(prefix_len, &parse(value)?)
}

/// Decodes a persisted string back into an integer.
pub fn decode(prefix_len: u8, encoded: &str) -> BigUIntResult<BigInt> {
    let prefix = prefix_len as usize;
    let malformed = || BigUIntError::Malformed(encoded.to_string());

    let (negative, hex) = match encoded.strip_prefix('-') {
        Some(rest) => {
            let payload = rest.get(prefix..).ok_or_else(malformed)?;
            (true, invert_hex(payload)?)
        }
        None => (false, encoded.get(prefix..).ok_or_else(malformed)?.to_string()),
    };

    if hex.is_empty() {
        return Err(malformed());
    }

    let magnitude = BigInt::from_str_radix(&hex, 16).map_err(|_| malformed())?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Renders an integer for output.
pub fn render(n: &BigInt, format: BigUIntFormat) -> String {
    match format {
        BigUIntFormat::Dec => n.to_string(),
        BigUIntFormat::Hex => {
            let hex = n.magnitude().to_str_radix(16);
            if n.sign() == Sign::Minus && !n.is_zero() {
                format!("-0x{}", hex)
            } else {
                format!("0x{}", hex)
            }
        }
    }
}

fn invert_hex(hex: &str) -> BigUIntResult<String> {
    hex.chars()
        .map(|c| {
            c.to_digit(16)
                .and_then(|d| std::char::from_digit(15 - d, 16))
                .ok_or_else(|| BigUIntError::Malformed(hex.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_encode_small_values() {
        assert_eq!(encode_value(1, &json!(0)).unwrap(), "00");
        assert_eq!(encode_value(1, &json!(15)).unwrap(), "0f");
        assert_eq!(encode_value(1, &json!(16)).unwrap(), "110");
        assert_eq!(encode_value(2, &json!(255)).unwrap(), "01ff");
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(parse(&json!("0x1f")).unwrap(), BigInt::from(31));
        assert_eq!(parse(&json!("31")).unwrap(), BigInt::from(31));
        assert_eq!(parse(&json!(" -0x1f ")).unwrap(), BigInt::from(-31));
        assert!(parse(&json!("abc")).is_err());
        assert!(parse(&json!(1.5)).is_err());
        assert!(parse(&json!(true)).is_err());
    }

    #[test]
    fn test_round_trip_extremes() {
        let max = BigInt::from(u64::MAX);
        assert_eq!(decode(1, &encode(1, &max).unwrap()).unwrap(), max);

        let max256 = (BigInt::from(1) << 256) - 1;
        assert_eq!(decode(2, &encode(2, &max256).unwrap()).unwrap(), max256);

        let neg = BigInt::from(-123456789i64);
        assert_eq!(decode(2, &encode(2, &neg).unwrap()).unwrap(), neg);

        let zero = BigInt::from(0);
        assert_eq!(decode(1, &encode(1, &zero).unwrap()).unwrap(), zero);
    }

    #[test]
    fn test_overflow_rejected() {
        let too_big = BigInt::from(1) << 64;
        assert!(matches!(
            encode(1, &too_big),
            Err(BigUIntError::Overflow { prefix_len: 1, .. })
        ));
    }

    #[test]
    fn test_render_formats() {
        let n = BigInt::from(255);
        assert_eq!(render(&n, BigUIntFormat::Hex), "0xff");
        assert_eq!(render(&n, BigUIntFormat::Dec), "255");
        assert_eq!(render(&BigInt::from(-255), BigUIntFormat::Hex), "-0xff");
        assert_eq!(BigUIntFormat::parse("dec"), Some(BigUIntFormat::Dec));
    }

    #[test]
    fn test_negatives_sort_below_positives() {
        let neg = encode(2, &BigInt::from(-1)).unwrap();
        let zero = encode(2, &BigInt::from(0)).unwrap();
        assert!(neg < zero);
    }

    proptest! {
        #[test]
        fn prop_round_trip_u128(n in any::<u128>()) {
            let value = BigInt::from(n);
            prop_assert_eq!(decode(2, &encode(2, &value).unwrap()).unwrap(), value);
        }

        #[test]
        fn prop_order_preserved_positive(a in any::<u64>(), b in any::<u64>()) {
            let ea = encode(1, &BigInt::from(a)).unwrap();
            let eb = encode(1, &BigInt::from(b)).unwrap();
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }

        #[test]
        fn prop_order_preserved_negative(a in 1..i64::MAX, b in 1..i64::MAX) {
            let ea = encode(2, &BigInt::from(-a)).unwrap();
            let eb = encode(2, &BigInt::from(-b)).unwrap();
            prop_assert_eq!((-a).cmp(&-b), ea.cmp(&eb));
        }
    }
}
