//! Stand-in self-compiler.
//!
//! A real self-compiler maps source text to the value whose prefixed hex
//! is a module image. The stub ignores its input and always answers with
//! one fixed image, which is enough to drive the whole compile-then-run
//! pipeline without the WHILE toolchain.

use natwasm_types::{Natural, Representation};

use crate::compiler::compile;
use crate::error::{GuestGenError, GuestGenResult};
use crate::program::GuestProgram;

/// The compiler output that decodes back to `image`.
///
/// Decoding prepends one `00` byte to the output's hex, so the image must
/// start with a zero byte (every module does: `\0asm`) followed by a
/// non-zero one.
pub fn compiler_output_for(image: &[u8]) -> GuestGenResult<Natural> {
    match image {
        [0, second, ..] if *second != 0 => Ok(Natural::from_bytes_be(&image[1..])),
        _ => Err(GuestGenError::InvalidOperand(
            "image must start with one zero byte followed by a non-zero byte".to_string(),
        )),
    }
}

/// A two-parameter compiler `main(text, length)` returning the value that
/// decodes to `program_image`.
pub fn stub_compiler(program_image: &[u8], repr: Representation) -> GuestGenResult<Vec<u8>> {
    let output = compiler_output_for(program_image)?;
    compile(&GuestProgram::constant(repr, 2, output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_drops_the_leading_zero_byte() {
        let image = [0x00, 0x61, 0x73, 0x6d];
        assert_eq!(compiler_output_for(&image).unwrap(), Natural::from(0x61736du32));
    }

    #[test]
    fn images_without_the_zero_prefix_are_rejected() {
        assert!(compiler_output_for(&[0x61, 0x73]).is_err());
        assert!(compiler_output_for(&[0x00, 0x00, 0x01]).is_err());
        assert!(compiler_output_for(&[]).is_err());
    }
}
