//! Normalization of global-settings values (the node serves every value as a string).

use crate::ledger::{Amount, UNITS_PER_TOKEN};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum NormalizeError {
    #[error("invalid count for {key}: {value}")]
    InvalidCount { key: String, value: String },
    #[error("invalid fraction for {key}: {value}")]
    InvalidFraction { key: String, value: String },
    #[error("invalid token amount for {key}: {value}")]
    InvalidTokenAmount { key: String, value: String },
}

/// Parse a non-negative integer setting.
pub fn parse_count(key: &str, value: &str) -> Result<u64, NormalizeError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| NormalizeError::InvalidCount {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Parse a per-round limit (pools or sharders rewarded). Rejected, not
/// truncated, when it does not fit the target's `usize`.
pub fn parse_limit(key: &str, value: &str) -> Result<usize, NormalizeError> {
    let count = parse_count(key, value)?;
    usize::try_from(count).map_err(|_| NormalizeError::InvalidCount {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parse a fraction in `[0, 1]`.
pub fn parse_fraction(key: &str, value: &str) -> Result<f64, NormalizeError> {
    let err = || NormalizeError::InvalidFraction {
        key: key.to_string(),
        value: value.to_string(),
    };
    let f = value.trim().parse::<f64>().map_err(|_| err())?;
    if !f.is_finite() || !(0.0..=1.0).contains(&f) {
        return Err(err());
    }
    Ok(f)
}

/// Parse a token amount ("0.71") into smallest units, rounded to the nearest unit.
pub fn parse_token_amount(key: &str, value: &str) -> Result<Amount, NormalizeError> {
    let err = || NormalizeError::InvalidTokenAmount {
        key: key.to_string(),
        value: value.to_string(),
    };
    let tokens = value.trim().parse::<f64>().map_err(|_| err())?;
    if !tokens.is_finite() || tokens < 0.0 {
        return Err(err());
    }
    let units = (tokens * UNITS_PER_TOKEN as f64).round();
    if units > i64::MAX as f64 {
        return Err(err());
    }
    Ok(units as Amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_count() {
        assert_eq!(parse_count("epoch", " 125000000 ").unwrap(), 125_000_000);
        assert!(parse_count("epoch", "-1").is_err());
        assert!(parse_count("epoch", "").is_err());
    }

    #[test]
    fn normalize_limit() {
        assert_eq!(parse_limit("n", " 10 ").unwrap(), 10);
        assert!(matches!(
            parse_limit("n", "-3"),
            Err(NormalizeError::InvalidCount { .. })
        ));
        // above u32::MAX: accepted only where usize can hold it
        let big = u64::from(u32::MAX) + 1;
        assert_eq!(
            parse_limit("n", &big.to_string()).ok(),
            usize::try_from(big).ok()
        );
        assert!(parse_limit("n", "18446744073709551616").is_err());
    }

    #[test]
    fn normalize_fraction() {
        assert_eq!(parse_fraction("r", "0.1").unwrap(), 0.1);
        assert_eq!(parse_fraction("r", "1").unwrap(), 1.0);
        assert!(parse_fraction("r", "1.5").is_err());
        assert!(parse_fraction("r", "NaN").is_err());
    }

    #[test]
    fn normalize_token_amount() {
        assert_eq!(parse_token_amount("b", "0.71").unwrap(), 7_100_000_000);
        assert_eq!(parse_token_amount("b", "1").unwrap(), UNITS_PER_TOKEN);
        assert_eq!(
            parse_token_amount("b", "x"),
            Err(NormalizeError::InvalidTokenAmount {
                key: "b".into(),
                value: "x".into()
            })
        );
    }
}
