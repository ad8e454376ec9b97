//! Kubernetes resource quantity parsing
//!
//! Converts quantities such as `128Mi`, `1G`, `1.5Ki` or `12e3` into whole
//! bytes. Fractions of a byte are rounded up, matching how the API server
//! canonicalizes memory values.

use thiserror::Error;

/// Largest decimal exponent accepted in `<n>e<exp>` form
const MAX_EXPONENT: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("unknown suffix {0:?}")]
    UnknownSuffix(String),
    #[error("negative quantity {0:?}")]
    Negative(String),
    #[error("quantity {0:?} does not fit in 64 bits")]
    OutOfRange(String),
}

/// Scale applied by a suffix, as numerator / denominator
struct Scale {
    num: u128,
    den: u128,
}

impl Scale {
    fn multiply(num: u128) -> Self {
        Self { num, den: 1 }
    }
}

/// Parse a quantity into bytes
pub fn parse_bytes(quantity: &str) -> Result<u64, QuantityError> {
    let q = quantity.trim();
    if q.is_empty() {
        return Err(QuantityError::Empty);
    }

    let (q, negative) = match q.as_bytes()[0] {
        b'-' => (&q[1..], true),
        b'+' => (&q[1..], false),
        _ => (q, false),
    };

    let number_len = q
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(q.len());
    let (number, suffix) = q.split_at(number_len);

    let (mantissa, frac_digits) = parse_decimal(number)
        .ok_or_else(|| QuantityError::InvalidNumber(quantity.to_string()))?;

    if negative && mantissa != 0 {
        return Err(QuantityError::Negative(quantity.to_string()));
    }

    let scale = parse_suffix(suffix)
        .ok_or_else(|| QuantityError::UnknownSuffix(suffix.to_string()))?;

    let out_of_range = || QuantityError::OutOfRange(quantity.to_string());

    let num = mantissa.checked_mul(scale.num).ok_or_else(out_of_range)?;
    let den = 10u128
        .checked_pow(frac_digits)
        .and_then(|p| p.checked_mul(scale.den))
        .ok_or_else(out_of_range)?;

    let bytes = num / den + u128::from(num % den != 0);
    u64::try_from(bytes).map_err(|_| out_of_range())
}

/// Split `123.45` into mantissa 12345 and 2 fractional digits
fn parse_decimal(number: &str) -> Option<(u128, u32)> {
    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.contains('.') {
        return None;
    }

    let digits = format!("{}{}", int_part, frac_part);
    let mantissa = digits.parse::<u128>().ok()?;
    Some((mantissa, frac_part.len() as u32))
}

fn parse_suffix(suffix: &str) -> Option<Scale> {
    let scale = match suffix {
        "" => Scale::multiply(1),
        "Ki" => Scale::multiply(1 << 10),
        "Mi" => Scale::multiply(1 << 20),
        "Gi" => Scale::multiply(1 << 30),
        "Ti" => Scale::multiply(1 << 40),
        "Pi" => Scale::multiply(1 << 50),
        "Ei" => Scale::multiply(1 << 60),
        "m" => Scale { num: 1, den: 1000 },
        "k" => Scale::multiply(10u128.pow(3)),
        "M" => Scale::multiply(10u128.pow(6)),
        "G" => Scale::multiply(10u128.pow(9)),
        "T" => Scale::multiply(10u128.pow(12)),
        "P" => Scale::multiply(10u128.pow(15)),
        "E" => Scale::multiply(10u128.pow(18)),
        exp if exp.starts_with(['e', 'E']) => return parse_exponent(&exp[1..]),
        _ => return None,
    };
    Some(scale)
}

fn parse_exponent(exp: &str) -> Option<Scale> {
    let value: i32 = exp.parse().ok()?;
    let magnitude = value.unsigned_abs();
    if magnitude > MAX_EXPONENT {
        return None;
    }

    let power = 10u128.pow(magnitude);
    if value < 0 {
        Some(Scale { num: 1, den: power })
    } else {
        Some(Scale::multiply(power))
    }
}
