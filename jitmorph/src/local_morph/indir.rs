//! Rewriting indirections and addresses of locals.

use tracing::trace;

use crate::error::JitResult;
use crate::ir::{
    BinOp, ClassLayout, DoNotEnregisterReason, LayoutId, LocalId, Node, NodeFlags, NodeId,
    NodeKind, VarType, MAX_LCL_FIELD_OFFSET,
};
use super::visitor::LocalAddressVisitor;

/// How an indirection of a local is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndirTransform {
    /// Whole-local access.
    LclVar,
    /// Whole access of a promoted field local.
    PromotedField(LocalId),
    /// Whole-local access reinterpreted as another register class.
    BitCast,
    /// Load of the low part of an integral local.
    NarrowCast,
    /// Partial access at an offset.
    LclFld,
}

/// Shape of one memory access.
#[derive(Debug, Clone, Copy)]
struct Access {
    ty: VarType,
    layout: Option<LayoutId>,
    size: Option<u32>,
    /// Stored value, `None` for loads.
    value: Option<NodeId>,
}

impl<'a> LocalAddressVisitor<'a> {
    fn access_of(&self, node: NodeId) -> Access {
        let n = self.body.node(node);
        let (layout, value) = match n.kind {
            NodeKind::Ind { .. } => (None, None),
            NodeKind::StoreInd { value, .. } => (None, Some(value)),
            NodeKind::Blk { layout, .. } => (Some(layout), None),
            NodeKind::StoreBlk { layout, value, .. } => (Some(layout), Some(value)),
            _ => (None, None),
        };
        let size = match layout {
            Some(l) => Some(self.body.layout_of(l).size),
            None => n.ty.size(),
        };
        Access {
            ty: n.ty,
            layout,
            size,
            value,
        }
    }

    /// Realize an indirection of `lcl + offset` performed by `node`.
    ///
    /// Accesses that fit inside the local become direct local accesses;
    /// others expose the local and keep the memory operation.
    pub(super) fn process_indirection(&mut self, node: NodeId, lcl: LocalId, offset: u32) -> JitResult<()> {
        let access = self.access_of(node);
        let slot_size = self.body.locals.get(lcl).size;

        let fits = access.size.is_some_and(|size| {
            offset
                .checked_add(size)
                .is_some_and(|end| end <= MAX_LCL_FIELD_OFFSET && end <= slot_size)
        });

        if !fits {
            self.expose(lcl, "wide indirection");
            self.stats.wide_indirs += 1;
            if let Some(addr) = self.body.node(node).kind.operands().first().copied() {
                self.morph_local_address(addr, lcl, offset);
            }
            return Ok(());
        }

        // `fits` bounds the offset by the field offset limit.
        let offset = offset as u16;
        let transform = self.select_transform(lcl, offset, &access);
        self.morph_local_indir(node, lcl, offset, access, transform);
        Ok(())
    }

    /// Pick how an in-bounds access of type `access.ty` at `offset` is
    /// expressed.
    fn select_transform(&self, lcl: LocalId, offset: u16, access: &Access) -> IndirTransform {
        let dsc = self.body.locals.get(lcl);
        let slot_ty = dsc.ty;
        let is_def = access.value.is_some();

        if let Some(layout) = access.layout {
            let compatible = slot_ty.is_struct()
                && offset == 0
                && dsc.layout.is_some_and(|own| {
                    ClassLayout::are_compatible(self.body.layout_of(own), self.body.layout_of(layout))
                });
            return if compatible {
                IndirTransform::LclVar
            } else {
                IndirTransform::LclFld
            };
        }

        let ty = access.ty;
        if dsc.is_promoted() {
            if let Some(field) = self.body.locals.promoted_field_at(lcl, u32::from(offset), ty) {
                if Some(self.body.locals.get(field).size) == ty.size() {
                    return IndirTransform::PromotedField(field);
                }
            }
        }

        if offset == 0 && same_slot_type(ty, slot_ty, is_def) {
            return IndirTransform::LclVar;
        }
        if slot_ty.is_struct() {
            return IndirTransform::LclFld;
        }
        if offset == 0 && ty.size() == slot_ty.size() && (ty.is_floating() || slot_ty.is_floating()) {
            return IndirTransform::BitCast;
        }
        if !is_def
            && offset == 0
            && ty.is_integral()
            && slot_ty.is_integral()
            && ty.size() < slot_ty.size()
        {
            return IndirTransform::NarrowCast;
        }
        IndirTransform::LclFld
    }

    fn morph_local_indir(
        &mut self,
        node: NodeId,
        lcl: LocalId,
        offset: u16,
        access: Access,
        transform: IndirTransform,
    ) {
        let slot_ty = self.body.locals.get(lcl).ty;
        let slot_size = self.body.locals.get(lcl).size;

        let new_node = match (transform, access.value) {
            (IndirTransform::LclVar, None) => {
                self.stats.eliminated_indirs += 1;
                let ty = if access.ty.is_small_int() { access.ty } else { slot_ty.actual_type() };
                Node::new(NodeKind::LclVar { lcl }, ty)
            }
            (IndirTransform::LclVar, Some(value)) => {
                self.stats.eliminated_indirs += 1;
                Node::new(NodeKind::StoreLclVar { lcl, value }, slot_ty.actual_type())
            }
            (IndirTransform::PromotedField(field), None) => {
                self.stats.promoted_field_accesses += 1;
                let field_ty = self.body.locals.get(field).ty.actual_type();
                Node::new(NodeKind::LclVar { lcl: field }, field_ty)
            }
            (IndirTransform::PromotedField(field), Some(value)) => {
                self.stats.promoted_field_accesses += 1;
                let field_ty = self.body.locals.get(field).ty.actual_type();
                Node::new(NodeKind::StoreLclVar { lcl: field, value }, field_ty)
            }
            (IndirTransform::BitCast, None) => {
                self.stats.bitcasts += 1;
                let read = self.body.new_lcl_var(lcl);
                Node::new(NodeKind::BitCast { op1: read }, access.ty)
            }
            (IndirTransform::BitCast, Some(value)) => {
                self.stats.bitcasts += 1;
                let cast = self.body.new_bitcast(slot_ty.actual_type(), value);
                Node::new(NodeKind::StoreLclVar { lcl, value: cast }, slot_ty.actual_type())
            }
            (IndirTransform::NarrowCast, _) => {
                self.stats.narrow_casts += 1;
                let read = self.body.new_lcl_var(lcl);
                Node::new(NodeKind::Cast { op1: read }, access.ty)
            }
            (IndirTransform::LclFld, value) => {
                self.stats.field_accesses += 1;
                self.body
                    .locals
                    .set_do_not_enregister(lcl, DoNotEnregisterReason::LocalField);
                match value {
                    None => Node::new(
                        NodeKind::LclFld {
                            lcl,
                            offset,
                            layout: access.layout,
                        },
                        access.ty,
                    ),
                    Some(value) => {
                        let store = Node::new(
                            NodeKind::StoreLclFld {
                                lcl,
                                offset,
                                layout: access.layout,
                                value,
                            },
                            access.ty,
                        );
                        if access.size != Some(slot_size) {
                            store.with_flags(NodeFlags::PARTIAL_DEF)
                        } else {
                            store
                        }
                    }
                }
            }
        };

        trace!(
            node = %node,
            local = %lcl,
            offset,
            ?transform,
            "indirection of local rewritten"
        );
        self.body.replace_node(node, new_node);
        self.stmt_modified = true;
    }

    /// Retarget a primitive `LCL_FLD` (or its store) of a promoted struct to
    /// the field local covering exactly the accessed bytes.
    pub(super) fn morph_promoted_field(&mut self, node: NodeId) {
        let (lcl, offset, value, ty) = {
            let n = self.body.node(node);
            match n.kind {
                NodeKind::LclFld { lcl, offset, layout: None } => (lcl, offset, None, n.ty),
                NodeKind::StoreLclFld {
                    lcl,
                    offset,
                    layout: None,
                    value,
                } => (lcl, offset, Some(value), n.ty),
                _ => return,
            }
        };
        if !self.body.locals.get(lcl).is_promoted() {
            return;
        }
        let Some(field) = self.body.locals.promoted_field_at(lcl, u32::from(offset), ty) else {
            return;
        };
        if Some(self.body.locals.get(field).size) != ty.size() {
            return;
        }

        let field_ty = self.body.locals.get(field).ty.actual_type();
        let kind = match value {
            None => NodeKind::LclVar { lcl: field },
            Some(value) => NodeKind::StoreLclVar { lcl: field, value },
        };
        self.body.replace_node(node, Node::new(kind, field_ty));
        self.stats.promoted_field_accesses += 1;
        self.stmt_modified = true;
    }

    /// Normalize an escaping address of `lcl + offset` computed by `node`.
    ///
    /// Offsets a `LCL_ADDR` can carry stay in the node; larger ones become
    /// `ADD(LCL_ADDR lcl, offset)`.
    pub(super) fn morph_local_address(&mut self, node: NodeId, lcl: LocalId, offset: u32) {
        let (ty, current) = {
            let n = self.body.node(node);
            (n.ty, n.kind.clone())
        };
        let slot_size = self.body.locals.get(lcl).size;

        if offset < MAX_LCL_FIELD_OFFSET && offset < slot_size {
            let offset = offset as u16;
            if current == (NodeKind::LclAddr { lcl, offset }) {
                return;
            }
            self.body
                .replace_node(node, Node::new(NodeKind::LclAddr { lcl, offset }, ty));
        } else {
            if self.is_offset_add(&current, lcl, offset) {
                return;
            }
            let base = self.body.new_lcl_addr(lcl, 0);
            let off = self.body.new_icon(i64::from(offset), VarType::NativeInt);
            self.body.replace_node(
                node,
                Node::new(
                    NodeKind::Binary {
                        op: BinOp::Add,
                        op1: base,
                        op2: off,
                    },
                    ty,
                ),
            );
        }
        self.stmt_modified = true;
    }

    fn is_offset_add(&self, kind: &NodeKind, lcl: LocalId, offset: u32) -> bool {
        let NodeKind::Binary { op: BinOp::Add, op1, op2 } = *kind else {
            return false;
        };
        self.body.node(op1).kind == (NodeKind::LclAddr { lcl, offset: 0 })
            && self.body.node(op2).int_con() == Some(i64::from(offset))
    }
}

/// Whether an access of `ty` reads or writes the whole slot of type `slot`.
///
/// Loads need the same type (or same-size wide integers, which only differ
/// in signedness); stores accept any same-size integral type.
fn same_slot_type(ty: VarType, slot: VarType, is_def: bool) -> bool {
    if ty == slot {
        return true;
    }
    let same_size_ints = ty.is_integral() && slot.is_integral() && ty.size() == slot.size();
    if is_def {
        same_size_ints
    } else {
        same_size_ints && !ty.is_small_int() && !slot.is_small_int()
    }
}
