//! The arbitrary-precision natural number shared by host and guest.
//!
//! A value's canonical in-process form is a little-endian sequence of
//! 32-bit limbs, most-significant limb last. Consumers tolerate leading
//! zero limbs; producers never emit more limbs than the value needs, except
//! that zero is always written as exactly one limb.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;

use crate::error::DomainError;

/// An unsigned integer of unbounded magnitude.
pub type Natural = BigUint;

/// Number of bits in one limb.
pub const LIMB_BITS: u32 = 32;

/// Split a value into little-endian 32-bit limbs.
///
/// Zero yields a single `0` limb.
pub fn to_limbs(value: &Natural) -> Vec<u32> {
    let limbs = value.to_u32_digits();
    if limbs.is_empty() {
        vec![0]
    } else {
        limbs
    }
}

/// Rebuild a value from little-endian 32-bit limbs. Trailing (most
/// significant) zero limbs are ignored.
pub fn from_limbs(limbs: &[u32]) -> Natural {
    BigUint::from_slice(limbs)
}

/// Number of significant limbs, `0` for zero.
pub fn significant_limbs(value: &Natural) -> u32 {
    let bits = value.bits();
    bits.div_ceil(u64::from(LIMB_BITS)) as u32
}

/// Reject anything below zero.
pub fn require_natural(key: Option<&str>, value: &BigInt) -> Result<Natural, DomainError> {
    match value.sign() {
        Sign::Minus => Err(DomainError {
            key: key.map(str::to_string),
            value: value.to_string(),
        }),
        _ => Ok(value.magnitude().clone()),
    }
}

/// Normalize a signed value into the natural numbers: negatives become zero.
///
/// This is the documented policy of the command surface, which never
/// aborts a run because of a negative literal.
pub fn natural_or_zero(value: &BigInt) -> Natural {
    match value.sign() {
        Sign::Minus => Natural::zero(),
        _ => value.magnitude().clone(),
    }
}

/// Parse a (possibly signed) decimal integer, ignoring surrounding
/// whitespace. Returns `None` for anything else.
pub fn parse_decimal(text: &str) -> Option<BigInt> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<BigInt>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_one_limb() {
        assert_eq!(to_limbs(&Natural::zero()), vec![0]);
        assert_eq!(significant_limbs(&Natural::zero()), 0);
    }

    #[test]
    fn two_to_the_32_is_two_limbs() {
        let v = Natural::from(1u64 << 32);
        assert_eq!(to_limbs(&v), vec![0, 1]);
        assert_eq!(significant_limbs(&v), 2);
    }

    #[test]
    fn leading_zero_limbs_are_tolerated() {
        assert_eq!(from_limbs(&[7, 0, 0]), Natural::from(7u32));
    }

    #[test]
    fn negative_is_rejected_or_clamped() {
        let neg = BigInt::from(-3);
        assert!(require_natural(Some("n1"), &neg).is_err());
        assert_eq!(natural_or_zero(&neg), Natural::zero());
        assert_eq!(
            require_natural(None, &BigInt::from(12)).unwrap(),
            Natural::from(12u32)
        );
    }

    #[test]
    fn decimal_parsing() {
        assert_eq!(parse_decimal(" 42\n"), Some(BigInt::from(42)));
        assert_eq!(parse_decimal("-1"), Some(BigInt::from(-1)));
        assert_eq!(parse_decimal("0x10"), None);
        assert_eq!(parse_decimal(""), None);
    }
}
