use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("quantity {0:?} is negative")]
    Negative(String),
    #[error("quantity {0:?} is not an integer")]
    NotAnInteger(String),
    #[error("quantity {0:?} does not fit in 128 bits")]
    Overflow(String),
}

/// Parses a non-negative integer quantity as returned by a chain node.
///
/// Accepts `0x`-prefixed hex (any length, leading zeros allowed, as produced by
/// 32-byte ABI words) or plain decimal.
pub fn parse_quantity(raw: &str) -> Result<u128, QuantityError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }
    if s.starts_with('-') {
        return Err(QuantityError::Negative(s.to_string()));
    }

    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex.trim_start_matches('0'), 16),
        None => (s, 10),
    };
    if digits.is_empty() {
        // "0x" or "0x000..."
        return Ok(0);
    }
    let valid = match radix {
        16 => digits.bytes().all(|b| b.is_ascii_hexdigit()),
        _ => digits.bytes().all(|b| b.is_ascii_digit()),
    };
    if !valid {
        return Err(QuantityError::NotAnInteger(s.to_string()));
    }

    u128::from_str_radix(digits, radix).map_err(|_| QuantityError::Overflow(s.to_string()))
}

pub fn format_wei(amount: u128) -> String {
    format!("{amount} Wei")
}

/// Rates are stored multiplied by 100, so `525` is `5.25 %`.
pub fn format_rate_percent(rate_bps: u64) -> String {
    format!("{}.{:02} %", rate_bps / 100, rate_bps % 100)
}
