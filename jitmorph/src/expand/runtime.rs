//! # Runtime Interface
//!
//! What the expansions need to know about the running VM: where class init
//! flags and static bases live, how thread statics are laid out, the
//! contents of frozen string literals, and how generic dictionary lookups
//! are performed.
//!
//! The embedding runtime implements [`RuntimeInterface`]; [`MockRuntime`] is
//! a table-driven implementation for tests and benchmarks.

use rustc_hash::FxHashMap;

use crate::error::{JitError, JitResult};
use crate::ir::{ClassHandle, MethodHandle, SigHandle, StringHandle};

/// Maximum number of indirections in a runtime lookup.
pub const MAX_LOOKUP_INDIRECTIONS: usize = 3;

/// How a class init flag encodes "initialized".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitFlagKind {
    /// Bit 0 of a 32-bit word is set once the class is initialized.
    InitializedBit,
    /// A pointer-sized slot is zero once the class is initialized.
    ZeroWhenInitialized,
}

/// Location and encoding of a class's init flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassInitFlag {
    /// Base address of the structure holding the flag.
    pub address: u64,
    /// Byte offset of the flag from `address`.
    pub offset: u32,
    /// Flag encoding.
    pub kind: InitFlagKind,
}

/// How the thread-local storage root of the current thread is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsBaseKind {
    /// `IND(IND(tp + tls_array_offset) + tls_index * 8) + data_offset`
    /// (segment-register TLS array).
    SegmentOffset {
        tls_array_offset: u32,
        tls_index: u32,
        data_offset: u32,
    },
    /// `tp + data_offset`, with the thread pointer read from its register.
    ThreadPointerRegister { data_offset: i64 },
    /// Result of calling a small accessor that returns the TLS root.
    AccessorCall { accessor: MethodHandle },
}

/// Layout of the per-thread static blocks array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadStaticBlocksInfo {
    /// How to reach the TLS root.
    pub base: TlsBaseKind,
    /// Offset (from the TLS root) of the 32-bit count of allocated blocks.
    pub offset_of_max_blocks: u32,
    /// Offset (from the TLS root) of the pointer to the blocks array.
    pub offset_of_blocks: u32,
}

/// Answers the expansions' questions about the runtime.
pub trait RuntimeInterface {
    /// The init flag of `class`, if it can be checked inline.
    fn class_init_flag(&self, class: ClassHandle) -> Option<ClassInitFlag>;

    /// Address of the GC (`gc = true`) or non-GC statics block of `class`,
    /// if it is allocated and fixed.
    fn static_base_address(&self, class: ClassHandle, gc: bool) -> Option<u64>;

    /// Thread static layout, if inline access is supported.
    fn thread_static_blocks_info(&self, gc: bool) -> Option<ThreadStaticBlocksInfo>;

    /// UTF-16 contents of a frozen string literal.
    fn string_literal(&self, handle: StringHandle) -> Option<&[u16]>;
}

// ============================================================================
// Runtime lookups
// ============================================================================

/// How to find a generic dictionary entry starting from the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLookupRecipe {
    /// Byte offsets of each indirection (`1..=3` entries).
    pub offsets: Vec<u32>,
    /// The first indirection reads a relative offset instead of a pointer.
    pub indirect_first_offset: bool,
    /// The second indirection reads a relative offset instead of a pointer.
    pub indirect_second_offset: bool,
    /// Offset of the dictionary size, checked before the last indirection.
    pub size_offset: Option<u32>,
}

impl RuntimeLookupRecipe {
    /// A plain pointer chase through `offsets`.
    pub fn new(offsets: Vec<u32>) -> Self {
        Self {
            offsets,
            indirect_first_offset: false,
            indirect_second_offset: false,
            size_offset: None,
        }
    }

    /// Add a dictionary size check.
    pub fn with_size_check(mut self, size_offset: u32) -> Self {
        self.size_offset = Some(size_offset);
        self
    }

    /// Number of indirections.
    pub fn indirections(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the recipe has a usable shape.
    pub fn is_valid(&self) -> bool {
        // Relative steps never apply to the final load.
        let n = self.offsets.len();
        (1..=MAX_LOOKUP_INDIRECTIONS).contains(&n)
            && (!self.indirect_first_offset || n >= 2)
            && (!self.indirect_second_offset || n >= 3)
    }
}

/// Lookup recipes of one compilation, keyed by signature.
#[derive(Debug, Clone, Default)]
pub struct LookupRecipeMap {
    recipes: FxHashMap<SigHandle, RuntimeLookupRecipe>,
}

impl LookupRecipeMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the recipe for a signature.
    pub fn insert(&mut self, signature: SigHandle, recipe: RuntimeLookupRecipe) {
        self.recipes.insert(signature, recipe);
    }

    /// The recipe for a signature.
    pub fn get(&self, signature: SigHandle) -> JitResult<&RuntimeLookupRecipe> {
        self.recipes
            .get(&signature)
            .ok_or_else(|| JitError::missing_recipe(signature))
    }

    /// Number of recipes.
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

// ============================================================================
// Mock runtime
// ============================================================================

/// Table-driven [`RuntimeInterface`].
#[derive(Debug, Clone, Default)]
pub struct MockRuntime {
    init_flags: FxHashMap<ClassHandle, ClassInitFlag>,
    static_bases: FxHashMap<(ClassHandle, bool), u64>,
    thread_statics: Option<ThreadStaticBlocksInfo>,
    strings: FxHashMap<StringHandle, Vec<u16>>,
}

impl MockRuntime {
    /// A runtime that knows nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class init flag.
    pub fn with_init_flag(mut self, class: ClassHandle, flag: ClassInitFlag) -> Self {
        self.init_flags.insert(class, flag);
        self
    }

    /// Register a statics block address.
    pub fn with_static_base(mut self, class: ClassHandle, gc: bool, address: u64) -> Self {
        self.static_bases.insert((class, gc), address);
        self
    }

    /// Register the thread static layout.
    pub fn with_thread_statics(mut self, info: ThreadStaticBlocksInfo) -> Self {
        self.thread_statics = Some(info);
        self
    }

    /// Register a string literal.
    pub fn with_string(mut self, handle: StringHandle, text: &str) -> Self {
        self.strings.insert(handle, text.encode_utf16().collect());
        self
    }

    /// Register a string literal from raw UTF-16 units.
    pub fn with_utf16(mut self, handle: StringHandle, units: Vec<u16>) -> Self {
        self.strings.insert(handle, units);
        self
    }
}

impl RuntimeInterface for MockRuntime {
    fn class_init_flag(&self, class: ClassHandle) -> Option<ClassInitFlag> {
        self.init_flags.get(&class).copied()
    }

    fn static_base_address(&self, class: ClassHandle, gc: bool) -> Option<u64> {
        self.static_bases.get(&(class, gc)).copied()
    }

    fn thread_static_blocks_info(&self, _gc: bool) -> Option<ThreadStaticBlocksInfo> {
        self.thread_statics
    }

    fn string_literal(&self, handle: StringHandle) -> Option<&[u16]> {
        self.strings.get(&handle).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_validity() {
        assert!(RuntimeLookupRecipe::new(vec![0x18, 0x20]).is_valid());
        assert!(!RuntimeLookupRecipe::new(vec![]).is_valid());
        assert!(!RuntimeLookupRecipe::new(vec![8; 4]).is_valid());

        let mut one = RuntimeLookupRecipe::new(vec![8]);
        one.indirect_second_offset = true;
        assert!(!one.is_valid());
    }

    #[test]
    fn test_missing_recipe() {
        let map = LookupRecipeMap::new();
        let err = map.get(SigHandle(0x42)).unwrap_err();
        assert_eq!(err, JitError::MissingLookupRecipe { signature: 0x42 });
    }

    #[test]
    fn test_mock_runtime_tables() {
        let rt = MockRuntime::new()
            .with_static_base(ClassHandle(1), true, 0x1000)
            .with_string(StringHandle(7), "hi");
        assert_eq!(rt.static_base_address(ClassHandle(1), true), Some(0x1000));
        assert_eq!(rt.static_base_address(ClassHandle(1), false), None);
        assert_eq!(rt.string_literal(StringHandle(7)), Some(&[0x68u16, 0x69][..]));
        assert!(rt.thread_static_blocks_info(false).is_none());
    }
}
