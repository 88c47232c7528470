//! `key=value` parameters from the command line.
//!
//! A key ending in `_file` reads its value from the named file. Literal
//! values that are not integers, or are negative, become zero with a
//! warning instead of aborting the run.

use std::fs;
use std::path::PathBuf;

use num_bigint::{BigInt, Sign};
use thiserror::Error;

use natwasm_host::{ParamValue, Params};
use natwasm_types::value::{natural_or_zero, parse_decimal};

/// Key suffix selecting a file-sourced value.
pub const FILE_SUFFIX: &str = "_file";

#[derive(Debug, Error)]
pub enum ArgError {
    #[error("failed to read `{key}` from {}: {source}", .path.display())]
    ReadFile {
        key: String,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Parse every `key=value` argument, in order.
pub fn parse_params<S: AsRef<str>>(raw: &[S]) -> Result<Params, ArgError> {
    raw.iter().map(|arg| parse_param(arg.as_ref())).collect()
}

fn parse_param(arg: &str) -> Result<(String, ParamValue), ArgError> {
    let Some((key, value)) = arg.split_once('=') else {
        tracing::warn!(arg, "missing `=`, value set to 0");
        return Ok((arg.to_string(), ParamValue::from(0i64)));
    };

    if let Some(key) = key.strip_suffix(FILE_SUFFIX) {
        let path = PathBuf::from(value);
        let text = fs::read_to_string(&path).map_err(|source| ArgError::ReadFile {
            key: key.to_string(),
            path,
            source,
        })?;
        return Ok((key.to_string(), ParamValue::Text(text.trim().to_string())));
    }

    Ok((key.to_string(), ParamValue::from(literal(key, value))))
}

fn literal(key: &str, value: &str) -> BigInt {
    match parse_decimal(value) {
        Some(n) if n.sign() == Sign::Minus => {
            tracing::warn!(key, value, "negative value, set to 0");
            BigInt::from(natural_or_zero(&n))
        }
        Some(n) => n,
        None => {
            tracing::warn!(key, value, "invalid value, set to 0");
            BigInt::default()
        }
    }
}
