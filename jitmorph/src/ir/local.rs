//! Local variable descriptors.
//!
//! Every local storage slot of a method (arguments, user locals, JIT temps,
//! promoted struct fields) has a [`LclVarDsc`] in the method's
//! [`LocalTable`]. The address-exposed flag is monotonic: it can be set but
//! there is no way to clear it again during a compilation.

use std::fmt;

use crate::arena::Arena;
use crate::define_id;
use super::types::{ClassLayout, LayoutId, VarType};

define_id!(
    /// Index of a local slot.
    pub struct LocalId, "V"
);

/// Why a local may not live in a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoNotEnregisterReason {
    /// Its address escaped.
    AddrExposed,
    /// It is accessed through a field node at a non-zero offset or with a
    /// different shape.
    LocalField,
    /// It is a hidden return buffer defined by a call.
    HiddenBufferStructArg,
    /// It is a struct accessed by block operations.
    BlockOp,
}

/// Descriptor of a single local slot.
#[derive(Debug, Clone)]
pub struct LclVarDsc {
    /// The local's index.
    pub id: LocalId,
    /// Declared type.
    pub ty: VarType,
    /// Layout for struct locals.
    pub layout: Option<LayoutId>,
    /// Exact storage size in bytes.
    pub size: u32,
    /// Address-exposed flag; only ever goes from false to true.
    address_exposed: bool,
    /// For a promoted field: the struct local it was promoted from.
    pub parent: Option<LocalId>,
    /// For a promoted field: byte offset inside the parent.
    pub field_offset: u32,
    /// For a promoted struct: its field locals, ordered by offset.
    pub promoted_fields: Vec<LocalId>,
    /// Set when the local must stay on the stack.
    pub do_not_enregister: Option<DoNotEnregisterReason>,
    /// The local is a hidden return buffer that a call writes.
    pub defined_by_call: bool,
    /// Early reference count (number of local nodes seen).
    pub ref_count: u32,
    /// Whether this is a JIT-created temporary.
    pub is_temp: bool,
    /// Why the temp was created (for dumps).
    pub reason: Option<&'static str>,
}

impl LclVarDsc {
    /// Check whether the local's address escaped.
    pub fn is_address_exposed(&self) -> bool {
        self.address_exposed
    }

    /// Check whether this local is a field of a promoted struct.
    pub fn is_promoted_field(&self) -> bool {
        self.parent.is_some()
    }

    /// Check whether this local is a promoted struct.
    pub fn is_promoted(&self) -> bool {
        !self.promoted_fields.is_empty()
    }
}

impl fmt::Display for LclVarDsc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({} bytes)", self.id, self.ty, self.size)?;
        if self.address_exposed {
            write!(f, " addr-exposed")?;
        }
        if let Some(parent) = self.parent {
            write!(f, " field {}+{}", parent, self.field_offset)?;
        }
        if let Some(reason) = self.reason {
            write!(f, " \"{}\"", reason)?;
        }
        Ok(())
    }
}

/// All locals of a method.
#[derive(Debug, Clone, Default)]
pub struct LocalTable {
    locals: Arena<LocalId, LclVarDsc>,
}

impl LocalTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, ty: VarType, layout: Option<LayoutId>, size: u32) -> LocalId {
        let id = LocalId::new(self.locals.len() as u32);
        self.locals.alloc(LclVarDsc {
            id,
            ty,
            layout,
            size,
            address_exposed: false,
            parent: None,
            field_offset: 0,
            promoted_fields: Vec::new(),
            do_not_enregister: None,
            defined_by_call: false,
            ref_count: 0,
            is_temp: false,
            reason: None,
        })
    }

    /// Add a primitive-typed local.
    pub fn new_local(&mut self, ty: VarType) -> LocalId {
        debug_assert!(!ty.is_struct(), "struct locals need a layout");
        self.push(ty, None, ty.size().unwrap_or(0))
    }

    /// Add a struct local with the given layout.
    pub fn new_struct_local(&mut self, layout_id: LayoutId, layout: &ClassLayout) -> LocalId {
        self.push(VarType::Struct, Some(layout_id), layout.size)
    }

    /// Grab a new temporary local.
    pub fn grab_temp(&mut self, ty: VarType, reason: &'static str) -> LocalId {
        let id = self.new_local(ty);
        let dsc = &mut self.locals[id];
        dsc.is_temp = true;
        dsc.reason = Some(reason);
        id
    }

    /// Grab a new struct temporary.
    pub fn grab_struct_temp(
        &mut self,
        layout_id: LayoutId,
        layout: &ClassLayout,
        reason: &'static str,
    ) -> LocalId {
        let id = self.new_struct_local(layout_id, layout);
        let dsc = &mut self.locals[id];
        dsc.is_temp = true;
        dsc.reason = Some(reason);
        id
    }

    /// Promote a struct local into independent field locals.
    ///
    /// `fields` lists `(offset, type)` pairs in increasing offset order.
    pub fn promote(&mut self, parent: LocalId, fields: &[(u32, VarType)]) -> Vec<LocalId> {
        let mut ids = Vec::with_capacity(fields.len());
        for &(offset, ty) in fields {
            let id = self.new_local(ty);
            let dsc = &mut self.locals[id];
            dsc.parent = Some(parent);
            dsc.field_offset = offset;
            ids.push(id);
        }
        self.locals[parent].promoted_fields = ids.clone();
        ids
    }

    /// Get a local by id.
    pub fn get(&self, id: LocalId) -> &LclVarDsc {
        &self.locals[id]
    }

    /// Get a mutable local by id.
    pub fn get_mut(&mut self, id: LocalId) -> &mut LclVarDsc {
        &mut self.locals[id]
    }

    /// Number of locals.
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// Iterate over all locals.
    pub fn iter(&self) -> impl Iterator<Item = &LclVarDsc> {
        self.locals.iter().map(|(_, dsc)| dsc)
    }

    /// Mark a local address-exposed, returning true if it was not already.
    ///
    /// Exposing a promoted struct exposes all of its fields too.
    pub fn set_address_exposed(&mut self, id: LocalId) -> bool {
        let newly = !self.locals[id].address_exposed;
        {
            let dsc = &mut self.locals[id];
            dsc.address_exposed = true;
            dsc.do_not_enregister = Some(DoNotEnregisterReason::AddrExposed);
        }
        let fields = self.locals[id].promoted_fields.clone();
        for field in fields {
            self.set_address_exposed(field);
        }
        newly
    }

    /// Record that a local must not be enregistered.
    ///
    /// An address-exposed reason is never overwritten.
    pub fn set_do_not_enregister(&mut self, id: LocalId, reason: DoNotEnregisterReason) {
        let dsc = &mut self.locals[id];
        if dsc.do_not_enregister != Some(DoNotEnregisterReason::AddrExposed) {
            dsc.do_not_enregister = Some(reason);
        }
    }

    /// The local whose exposure an escaping address of `id` implies.
    pub fn exposure_root(&self, id: LocalId) -> LocalId {
        self.locals[id].parent.unwrap_or(id)
    }

    /// Find a promoted field of `parent` at exactly `offset` with type `ty`.
    pub fn promoted_field_at(&self, parent: LocalId, offset: u32, ty: VarType) -> Option<LocalId> {
        self.locals[parent]
            .promoted_fields
            .iter()
            .copied()
            .find(|&f| {
                let field = &self.locals[f];
                field.field_offset == offset && field.ty.actual_type() == ty.actual_type()
            })
    }
}
