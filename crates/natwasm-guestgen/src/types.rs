//! Module-level constants and the function type table.

use wasm_encoder::{TypeSection, ValType};

/// Import namespace of the host surface.
pub const ENV_MODULE: &str = "env";

/// Default entry point name.
pub const DEFAULT_ENTRY: &str = "main";

/// Linked-limb node size in library memory (bytes).
pub const NODE_SIZE: i32 = 8;

/// Library heap starts one node in, so that address 0 stays null.
pub const LIBRARY_HEAP_START: i32 = NODE_SIZE;

/// Initial linear memory size in pages (64 KiB each).
pub const INITIAL_MEMORY_PAGES: u64 = 1;

/// log2 of the WASM page size.
pub const PAGE_SHIFT: i32 = 16;

/// Custom section carrying the generator version.
pub const CUSTOM_SECTION_NAME: &str = "natwasm";
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Interns `(i32 × params) -> i32?` signatures.
///
/// Every signature the guest contract uses is all-`i32`, so a signature is
/// fully described by its parameter count and whether it returns a value.
#[derive(Debug, Default)]
pub struct TypeTable {
    signatures: Vec<(usize, bool)>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type index for the signature, adding it on first use.
    pub fn index(&mut self, params: usize, returns: bool) -> u32 {
        if let Some(pos) = self.signatures.iter().position(|s| *s == (params, returns)) {
            return pos as u32;
        }
        self.signatures.push((params, returns));
        (self.signatures.len() - 1) as u32
    }

    pub fn emit(&self) -> TypeSection {
        let mut types = TypeSection::new();
        for (params, returns) in &self.signatures {
            let results = if *returns { vec![ValType::I32] } else { vec![] };
            types.ty().function(vec![ValType::I32; *params], results);
        }
        types
    }
}

pub(crate) fn memarg(offset: u64, align: u32) -> wasm_encoder::MemArg {
    wasm_encoder::MemArg {
        offset,
        align,
        memory_index: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_are_interned() {
        let mut table = TypeTable::new();
        let a = table.index(3, false);
        let b = table.index(1, true);
        assert_eq!(table.index(3, false), a);
        assert_ne!(a, b);
        assert_eq!(table.signatures.len(), 2);
    }
}
