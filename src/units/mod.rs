//! Conversion between human decimal strings and base units.

use crate::ledger::Amount;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid character {0:?} in amount")]
    InvalidDigit(char),
    #[error("amount has more than {0} fractional digits")]
    TooPrecise(u8),
    #[error("amount does not fit in 128 bits")]
    Overflow,
}

pub fn scale(decimals: u8) -> Result<Amount, UnitsError> {
    10u128
        .checked_pow(u32::from(decimals))
        .ok_or(UnitsError::Overflow)
}

/// Parses `"12"`, `"12.5"` or `".5"` into base units at `decimals` places.
pub fn parse_units(input: &str, decimals: u8) -> Result<Amount, UnitsError> {
    let input = input.trim();
    let (whole, frac) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(UnitsError::Empty);
    }
    if frac.len() > usize::from(decimals) {
        return Err(UnitsError::TooPrecise(decimals));
    }

    let whole_units = parse_digits(whole)?
        .checked_mul(scale(decimals)?)
        .ok_or(UnitsError::Overflow)?;
    // right-pad the fraction so ".5" at 18 places means 5 * 10^17
    let frac_units = parse_digits(frac)?
        .checked_mul(scale(decimals - frac.len() as u8)?)
        .ok_or(UnitsError::Overflow)?;
    whole_units
        .checked_add(frac_units)
        .ok_or(UnitsError::Overflow)
}

/// Renders base units as the shortest exact decimal string.
pub fn format_units(amount: Amount, decimals: u8) -> String {
    let Ok(unit) = scale(decimals) else {
        return amount.to_string();
    };
    let whole = amount / unit;
    let frac = amount % unit;
    if frac == 0 {
        return whole.to_string();
    }
    let padded = format!("{:0width$}", frac, width = usize::from(decimals));
    format!("{}.{}", whole, padded.trim_end_matches('0'))
}

fn parse_digits(digits: &str) -> Result<Amount, UnitsError> {
    let mut value: Amount = 0;
    for c in digits.chars() {
        let digit = c.to_digit(10).ok_or(UnitsError::InvalidDigit(c))?;
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(Amount::from(digit)))
            .ok_or(UnitsError::Overflow)?;
    }
    Ok(value)
}
