//! Source text canonicalization.
//!
//! The self-compiler reads its input as one natural number: the source is
//! upper-cased, each character becomes two hex digits, and the digit string
//! is read as a single integer. The byte length travels alongside because
//! leading NUL characters would otherwise vanish from the value.

use natwasm_host::{ParamValue, Params};
use natwasm_types::Natural;

use crate::error::StageError;

/// Source text in the form the self-compiler consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalText {
    /// Upper-cased source.
    pub text: String,
    /// The text read as one big-endian integer, a byte per character.
    pub value: Natural,
    pub byte_length: usize,
}

impl CanonicalText {
    /// `(n1=value, n2=byte_length)`
    pub fn compiler_params(&self) -> Params {
        vec![
            ("n1".to_string(), ParamValue::from(self.value.clone())),
            ("n2".to_string(), ParamValue::from(self.byte_length as i64)),
        ]
    }
}

/// Upper-case `source` and encode it as a natural number.
///
/// Case folding is full Unicode, so `é` becomes `É` (0xC9) and `ß` becomes
/// `SS`. Folded characters must fit in one byte; anything wider has no
/// two-digit hex form and is rejected.
pub fn canonicalize(source: &str) -> Result<CanonicalText, StageError> {
    let text = source.to_uppercase();
    let mut bytes = Vec::with_capacity(text.len());
    for (offset, ch) in text.chars().enumerate() {
        let code = u32::from(ch);
        let byte = u8::try_from(code).map_err(|_| StageError::WideCharacter { offset, ch })?;
        bytes.push(byte);
    }
    tracing::debug!(bytes = bytes.len(), "canonicalized source text");
    Ok(CanonicalText {
        value: Natural::from_bytes_be(&bytes),
        byte_length: bytes.len(),
        text,
    })
}
