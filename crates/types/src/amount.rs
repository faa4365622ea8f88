//! Monetary amounts in micro-units, with checked arithmetic.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Arithmetic or parse failure on an [`Amount`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount overflow")]
    Overflow,
    #[error("amount underflow")]
    Underflow,
    #[error("invalid amount string: {0}")]
    Invalid(String),
    #[error("invalid ratio string: {0}")]
    InvalidRatio(String),
}

/// A non-negative amount of currency in micro-units.
///
/// Serialized as a decimal string on the wire so that large values survive
/// JSON number handling in other languages.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(AmountError::Overflow)
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, AmountError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(AmountError::Underflow)
    }

    /// Sum an iterator of amounts, failing on overflow.
    pub fn sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Result<Amount, AmountError> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, Amount::checked_add)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(value)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Amount)
            .map_err(|_| AmountError::Invalid(s.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Multiply `initial_balance` by a decimal ratio string such as `"0.0000001"`.
///
/// The multiplication is exact over integers (no floats): the ratio is read
/// as `digits / 10^scale` and applied in 128-bit arithmetic, truncating any
/// fractional remainder. Every validator must agree on the resulting amount
/// byte-for-byte, which is why the ratio is compared and applied as the
/// literal configured string.
pub fn calculate_inflation(initial_balance: Amount, ratio: &str) -> Result<Amount, AmountError> {
    let (int_part, frac_part) = match ratio.split_once('.') {
        Some((i, f)) => (i, f),
        None => (ratio, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(AmountError::InvalidRatio(ratio.to_string()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(AmountError::InvalidRatio(ratio.to_string()));
    }

    let mut digits = String::with_capacity(int_part.len() + frac_part.len());
    digits.push_str(int_part);
    digits.push_str(frac_part);
    let numerator: u128 = digits
        .parse()
        .map_err(|_| AmountError::InvalidRatio(ratio.to_string()))?;
    let scale = frac_part.len() as u32;
    let denominator = 10u128
        .checked_pow(scale)
        .ok_or_else(|| AmountError::InvalidRatio(ratio.to_string()))?;

    let product = (initial_balance.value() as u128)
        .checked_mul(numerator)
        .ok_or(AmountError::Overflow)?;
    let result = product / denominator;
    u64::try_from(result)
        .map(Amount)
        .map_err(|_| AmountError::Overflow)
}
