//! # IR Types and Layouts
//!
//! Value types carried by tree nodes and locals, plus the struct layouts
//! used to compare aggregate accesses.
//!
//! ## Type Classes
//!
//! | Class | Types | Register file |
//! |-------|-------|---------------|
//! | Small integral | `Byte`, `UByte`, `Short`, `UShort`, `Bool` | integer (widened to `Int`) |
//! | Integral | `Int`, `UInt`, `Long`, `ULong`, `NativeInt` | integer |
//! | GC pointer | `Ref`, `Byref` | integer (GC tracked) |
//! | Floating | `Float`, `Double` | floating point |
//! | SIMD | `Simd8`, `Simd16`, `Simd32` | vector |
//! | Aggregate | `Struct` (size from layout) | memory |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::define_id;

/// Pointer size of the compilation target in bytes.
pub const TARGET_POINTER_SIZE: u32 = 8;

/// Largest byte offset a local field node can encode.
pub const MAX_LCL_FIELD_OFFSET: u32 = u16::MAX as u32;

define_id!(
    /// A struct layout registered with the compilation.
    pub struct LayoutId, "L"
);

/// Opaque runtime class handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassHandle(pub u64);

/// Opaque runtime signature handle (generic lookup signatures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SigHandle(pub u64);

/// Opaque handle of a frozen string object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StringHandle(pub u64);

/// Opaque runtime method handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodHandle(pub u64);

/// The type of a value in the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    /// No value (stores, jumps, void calls).
    Void,
    /// Boolean stored in one byte.
    Bool,
    /// Signed 8-bit integer.
    Byte,
    /// Unsigned 8-bit integer.
    UByte,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 16-bit integer.
    UShort,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Signed 64-bit integer.
    Long,
    /// Unsigned 64-bit integer.
    ULong,
    /// Pointer-sized integer.
    NativeInt,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Object reference (GC tracked).
    Ref,
    /// Interior pointer (GC tracked).
    Byref,
    /// 8-byte vector.
    Simd8,
    /// 16-byte vector.
    Simd16,
    /// 32-byte vector.
    Simd32,
    /// Aggregate; its size comes from a [`ClassLayout`].
    Struct,
}

impl VarType {
    /// Size in bytes, or `None` for `Void` and `Struct`.
    pub fn size(self) -> Option<u32> {
        match self {
            VarType::Void | VarType::Struct => None,
            VarType::Bool | VarType::Byte | VarType::UByte => Some(1),
            VarType::Short | VarType::UShort => Some(2),
            VarType::Int | VarType::UInt | VarType::Float => Some(4),
            VarType::Long | VarType::ULong | VarType::Double | VarType::Simd8 => Some(8),
            VarType::NativeInt | VarType::Ref | VarType::Byref => Some(TARGET_POINTER_SIZE),
            VarType::Simd16 => Some(16),
            VarType::Simd32 => Some(32),
        }
    }

    /// Check if this is an integral type (including pointer-sized ints).
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            VarType::Bool
                | VarType::Byte
                | VarType::UByte
                | VarType::Short
                | VarType::UShort
                | VarType::Int
                | VarType::UInt
                | VarType::Long
                | VarType::ULong
                | VarType::NativeInt
        )
    }

    /// Check if this is a small integral type that widens to `Int`.
    pub fn is_small_int(self) -> bool {
        matches!(
            self,
            VarType::Bool | VarType::Byte | VarType::UByte | VarType::Short | VarType::UShort
        )
    }

    /// Check if this is a floating point type.
    pub fn is_floating(self) -> bool {
        matches!(self, VarType::Float | VarType::Double)
    }

    /// Check if this is a GC-tracked pointer type.
    pub fn is_gc(self) -> bool {
        matches!(self, VarType::Ref | VarType::Byref)
    }

    /// Check if this is a SIMD vector type.
    pub fn is_simd(self) -> bool {
        matches!(self, VarType::Simd8 | VarType::Simd16 | VarType::Simd32)
    }

    /// Check if this is the aggregate type.
    pub fn is_struct(self) -> bool {
        matches!(self, VarType::Struct)
    }

    /// Type of the value once loaded into a register.
    ///
    /// Small integers widen to `Int`; unsigned types map to their signed
    /// counterparts.
    pub fn actual_type(self) -> VarType {
        match self {
            t if t.is_small_int() => VarType::Int,
            VarType::UInt => VarType::Int,
            VarType::ULong => VarType::Long,
            other => other,
        }
    }

    /// Whether values of the two types live in the same register file.
    pub fn same_register_class(self, other: VarType) -> bool {
        let class = |t: VarType| {
            if t.is_floating() {
                1
            } else if t.is_simd() {
                2
            } else if t.is_struct() {
                3
            } else {
                0
            }
        };
        class(self) == class(other)
    }

    /// Integral type of exactly `size` bytes, if one exists.
    pub fn integral_of_size(size: u32) -> Option<VarType> {
        match size {
            1 => Some(VarType::UByte),
            2 => Some(VarType::UShort),
            4 => Some(VarType::Int),
            8 => Some(VarType::Long),
            _ => None,
        }
    }

    /// Short dump name.
    pub fn name(self) -> &'static str {
        match self {
            VarType::Void => "void",
            VarType::Bool => "bool",
            VarType::Byte => "byte",
            VarType::UByte => "ubyte",
            VarType::Short => "short",
            VarType::UShort => "ushort",
            VarType::Int => "int",
            VarType::UInt => "uint",
            VarType::Long => "long",
            VarType::ULong => "ulong",
            VarType::NativeInt => "nint",
            VarType::Float => "float",
            VarType::Double => "double",
            VarType::Ref => "ref",
            VarType::Byref => "byref",
            VarType::Simd8 => "simd8",
            VarType::Simd16 => "simd16",
            VarType::Simd32 => "simd32",
            VarType::Struct => "struct",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// GC classification of one pointer-sized slot of a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcSlot {
    /// Not a GC pointer.
    NonGc,
    /// Object reference.
    Ref,
    /// Interior pointer.
    Byref,
}

/// Memory layout of a struct type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLayout {
    /// The runtime class, if this layout came from one.
    pub class: Option<ClassHandle>,
    /// Name used in dumps.
    pub name: String,
    /// Exact size in bytes.
    pub size: u32,
    /// GC classification per pointer-sized slot (empty when no GC pointers).
    pub gc_slots: Vec<GcSlot>,
}

impl ClassLayout {
    /// Create a layout without GC pointers.
    pub fn new(name: impl Into<String>, size: u32) -> Self {
        Self {
            class: None,
            name: name.into(),
            size,
            gc_slots: Vec::new(),
        }
    }

    /// Create a layout for a runtime class.
    pub fn for_class(class: ClassHandle, name: impl Into<String>, size: u32) -> Self {
        Self {
            class: Some(class),
            ..Self::new(name, size)
        }
    }

    /// Attach GC slot information.
    pub fn with_gc_slots(mut self, gc_slots: Vec<GcSlot>) -> Self {
        self.gc_slots = gc_slots;
        self
    }

    /// Whether any slot holds a GC pointer.
    pub fn has_gc_ptrs(&self) -> bool {
        self.gc_slots.iter().any(|s| *s != GcSlot::NonGc)
    }

    /// Two layouts are compatible when values of one can be copied bit for
    /// bit into the other without confusing the GC.
    pub fn are_compatible(a: &ClassLayout, b: &ClassLayout) -> bool {
        if a.class.is_some() && a.class == b.class {
            return true;
        }
        if a.size != b.size {
            return false;
        }
        match (a.has_gc_ptrs(), b.has_gc_ptrs()) {
            (false, false) => true,
            (true, true) => a.gc_slots == b.gc_slots,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_type_sizes() {
        assert_eq!(VarType::Byte.size(), Some(1));
        assert_eq!(VarType::Int.size(), Some(4));
        assert_eq!(VarType::Ref.size(), Some(TARGET_POINTER_SIZE));
        assert_eq!(VarType::Simd16.size(), Some(16));
        assert_eq!(VarType::Struct.size(), None);
        assert_eq!(VarType::Void.size(), None);
    }

    #[test]
    fn test_actual_type_widens_small_ints() {
        assert_eq!(VarType::UByte.actual_type(), VarType::Int);
        assert_eq!(VarType::ULong.actual_type(), VarType::Long);
        assert_eq!(VarType::Double.actual_type(), VarType::Double);
    }

    #[test]
    fn test_register_class() {
        assert!(VarType::Int.same_register_class(VarType::Long));
        assert!(!VarType::Int.same_register_class(VarType::Float));
        assert!(VarType::Float.same_register_class(VarType::Double));
    }

    #[test]
    fn test_layout_compatibility() {
        let a = ClassLayout::new("A", 16);
        let b = ClassLayout::new("B", 16);
        let c = ClassLayout::new("C", 24);
        let gc = ClassLayout::new("G", 16).with_gc_slots(vec![GcSlot::Ref, GcSlot::NonGc]);
        let gc2 = ClassLayout::new("G2", 16).with_gc_slots(vec![GcSlot::Ref, GcSlot::NonGc]);

        assert!(ClassLayout::are_compatible(&a, &b));
        assert!(!ClassLayout::are_compatible(&a, &c));
        assert!(!ClassLayout::are_compatible(&a, &gc));
        assert!(ClassLayout::are_compatible(&gc, &gc2));
    }

    #[test]
    fn test_same_class_layouts_are_compatible() {
        let a = ClassLayout::for_class(ClassHandle(7), "A", 8);
        let b = ClassLayout::for_class(ClassHandle(7), "A", 8);
        assert!(ClassLayout::are_compatible(&a, &b));
    }
}
