//! Compiler output → module image.
//!
//! The compiler answers with one natural number. Its hex digits, padded to
//! an even count and prefixed with a `00` byte, are the bytes of the new
//! module: the leading zero of `\0asm` cannot survive as part of an
//! integer, so the host puts it back.

use sha2::{Digest, Sha256};

use natwasm_types::{FormatError, Natural};

/// Every module image starts with these four bytes.
pub const WASM_MAGIC: [u8; 4] = *b"\0asm";

/// Hex digits of `output`, left-padded with one `0` when the count is odd.
pub fn even_hex(output: &Natural) -> String {
    let mut digits = output.to_str_radix(16);
    if digits.len() % 2 == 1 {
        digits.insert(0, '0');
    }
    digits
}

/// `00` followed by [`even_hex`].
pub fn prefixed_hex(output: &Natural) -> String {
    format!("00{}", even_hex(output))
}

/// The byte image encoded by a compiler output.
pub fn decode_compiler_output(output: &Natural) -> Result<Vec<u8>, FormatError> {
    hex::decode(prefixed_hex(output)).map_err(|e| FormatError::InvalidHex(e.to_string()))
}

/// Check that `image` is a well-formed module before handing it to the
/// engine.
pub fn validate_image(image: &[u8]) -> Result<(), FormatError> {
    if !image.starts_with(&WASM_MAGIC) {
        let head: Vec<u8> = image.iter().copied().take(WASM_MAGIC.len()).collect();
        return Err(FormatError::InvalidModule(format!(
            "expected `\\0asm` magic, found {}",
            hex::encode(head)
        )));
    }
    wasmparser::validate(image).map_err(|e| FormatError::InvalidModule(e.to_string()))?;
    Ok(())
}

/// Lowercase hex SHA-256 of `image`.
pub fn image_digest(image: &[u8]) -> String {
    hex::encode(Sha256::digest(image))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_output_gets_only_the_prefix() {
        let output = Natural::from(171u32);
        assert_eq!(prefixed_hex(&output), "00ab");
        assert_eq!(decode_compiler_output(&output).unwrap(), vec![0x00, 0xab]);
    }

    #[test]
    fn odd_output_is_padded_first() {
        let output = Natural::from(11u32);
        assert_eq!(even_hex(&output), "0b");
        assert_eq!(decode_compiler_output(&output).unwrap(), vec![0x00, 0x0b]);
    }

    #[test]
    fn image_always_starts_with_zero() {
        for n in [0u64, 1, 0xff, 0x100, 0x6173_6d01, u64::MAX] {
            let output = Natural::from(n);
            assert_eq!(even_hex(&output).len() % 2, 0);
            let image = decode_compiler_output(&output).unwrap();
            assert_eq!(image[0], 0x00, "output {n}");
        }
    }

    #[test]
    fn magic_is_checked_before_parsing() {
        let err = validate_image(&[0x00, 0xab]).unwrap_err();
        assert!(err.to_string().contains("00ab"));
    }

    #[test]
    fn header_alone_is_a_valid_module() {
        validate_image(&[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00]).unwrap();
    }

    #[test]
    fn digest_is_sha256() {
        assert_eq!(
            image_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
