//! Argument Marshaller.
//!
//! Turns a `key=value` parameter set into the entry point's ordered
//! argument list. Resolution is a pure pass over the keys: every key is
//! checked (index range, natural domain) before a single value is encoded,
//! so a failing call never touches guest memory.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use natwasm_types::value::{parse_decimal, require_natural};
use natwasm_types::{Addr, BridgeResult, DomainError, KeyWarning, Natural, RangeError, ValueCodec};

use crate::error::MarshalError;

/// Parameter key convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Naming {
    /// `n1..nN`
    #[default]
    OneBased,
    /// `x0..x{N-1}`; `x0` is the accumulator slot.
    ZeroBased,
}

impl Naming {
    pub fn prefix(self) -> char {
        match self {
            Self::OneBased => 'n',
            Self::ZeroBased => 'x',
        }
    }

    /// Key naming slot `slot`.
    pub fn key(self, slot: usize) -> String {
        match self {
            Self::OneBased => format!("n{}", slot + 1),
            Self::ZeroBased => format!("x{slot}"),
        }
    }

    /// Parse the numeric suffix of `key`. `None` for a malformed key; an
    /// index too large for `u64` saturates so it still fails the range check.
    fn index(self, key: &str) -> Option<u64> {
        let digits = key.strip_prefix(self.prefix())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(digits.parse().unwrap_or(u64::MAX))
    }

    /// Map a parsed index to a slot of an `arity`-parameter entry point.
    fn slot(self, key: &str, index: u64, arity: usize) -> Result<usize, RangeError> {
        let arity = arity as u64;
        let (valid, max) = match self {
            Self::OneBased => (index >= 1 && index <= arity, (arity > 0).then_some(arity)),
            Self::ZeroBased => (index < arity, arity.checked_sub(1)),
        };
        if !valid {
            return Err(RangeError {
                key: key.to_string(),
                index,
                max,
            });
        }
        Ok(match self {
            Self::OneBased => (index - 1) as usize,
            Self::ZeroBased => index as usize,
        })
    }
}

impl fmt::Display for Naming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneBased => f.write_str("n"),
            Self::ZeroBased => f.write_str("x"),
        }
    }
}

impl FromStr for Naming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "n" | "one_based" | "one-based" => Ok(Self::OneBased),
            "x" | "zero_based" | "zero-based" => Ok(Self::ZeroBased),
            other => Err(format!("unknown naming convention `{other}`")),
        }
    }
}

/// A supplied parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Number(BigInt),
    /// Decimal text, e.g. read from a file.
    Text(String),
}

impl ParamValue {
    fn to_natural(&self, key: &str) -> Result<Natural, DomainError> {
        match self {
            Self::Number(n) => require_natural(Some(key), n),
            Self::Text(text) => match parse_decimal(text) {
                Some(n) => require_natural(Some(key), &n),
                None => Err(DomainError {
                    key: Some(key.to_string()),
                    value: text.trim().to_string(),
                }),
            },
        }
    }
}

impl From<BigInt> for ParamValue {
    fn from(n: BigInt) -> Self {
        Self::Number(n)
    }
}

impl From<Natural> for ParamValue {
    fn from(n: Natural) -> Self {
        Self::Number(BigInt::from(n))
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        Self::Number(BigInt::from(n))
    }
}

impl From<&str> for ParamValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// An ordered parameter set.
pub type Params = Vec<(String, ParamValue)>;

/// Build a parameter set from `(key, value)` pairs.
pub fn params<K, V, I>(pairs: I) -> Params
where
    K: Into<String>,
    V: Into<ParamValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// A fully validated argument list, not yet in guest memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marshalled {
    pub naming: Naming,
    /// One value per entry point parameter; unset slots are zero.
    pub values: Vec<Natural>,
    pub warnings: Vec<KeyWarning>,
}

impl Marshalled {
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    /// `P_n(n1=…, n2=…)`
    pub fn preview(&self) -> String {
        let args: Vec<String> = self
            .values
            .iter()
            .enumerate()
            .map(|(slot, value)| format!("{}={value}", self.naming.key(slot)))
            .collect();
        format!("P_{}({})", self.arity(), args.join(", "))
    }

    /// Encode every slot in order. Each zero slot gets its own fresh
    /// representation.
    pub fn encode<C: ValueCodec + ?Sized>(&self, codec: &mut C) -> BridgeResult<Vec<Addr>> {
        self.values.iter().map(|value| codec.encode(value)).collect()
    }
}

/// Resolve `params` against an entry point taking `arity` arguments.
///
/// Malformed keys are dropped with a [`KeyWarning`]; an out-of-range index
/// or a value outside the naturals fails the whole call. When a key is
/// repeated the last occurrence wins.
pub fn marshal(arity: usize, params: &[(String, ParamValue)], naming: Naming) -> Result<Marshalled, MarshalError> {
    let mut values = vec![Natural::zero(); arity];
    let mut warnings = Vec::new();

    for (key, value) in params {
        let Some(index) = naming.index(key) else {
            let warning = KeyWarning {
                key: key.clone(),
                reason: format!("expected `{}` followed by a decimal index", naming.prefix()),
            };
            tracing::warn!(%warning, "skipping parameter");
            warnings.push(warning);
            continue;
        };
        let slot = naming.slot(key, index, arity)?;
        values[slot] = value.to_natural(key)?;
    }

    tracing::debug!(arity, warnings = warnings.len(), "marshalled arguments");
    Ok(Marshalled {
        naming,
        values,
        warnings,
    })
}
