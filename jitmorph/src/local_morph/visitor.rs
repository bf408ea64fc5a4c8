//! The statement walker and the value stack rules.

use tracing::{debug, trace};

use crate::config::LocalMorphConfig;
use crate::error::{JitError, JitResult};
use crate::ir::{
    BinOp, DoNotEnregisterReason, LocalId, MethodBody, NodeFlags, NodeId, NodeKind, StmtId,
    MAX_LCL_FIELD_OFFSET,
};
use super::value::{Value, ValueKind};
use super::LocalMorphStats;

/// Per-phase analysis state.
pub(super) struct LocalAddressVisitor<'a> {
    pub(super) body: &'a mut MethodBody,
    pub(super) config: &'a LocalMorphConfig,
    stack: Vec<Value>,
    pub(super) stmt_modified: bool,
    pub(super) changed: bool,
    pub(super) stats: LocalMorphStats,
}

impl<'a> LocalAddressVisitor<'a> {
    pub(super) fn new(body: &'a mut MethodBody, config: &'a LocalMorphConfig) -> Self {
        for dsc in body.locals.iter().map(|d| d.id).collect::<Vec<_>>() {
            body.locals.get_mut(dsc).ref_count = 0;
        }
        Self {
            body,
            config,
            stack: Vec::new(),
            stmt_modified: false,
            changed: false,
            stats: LocalMorphStats::default(),
        }
    }

    pub(super) fn body(&self) -> &MethodBody {
        self.body
    }

    pub(super) fn finish(self) -> (bool, LocalMorphStats) {
        (self.changed, self.stats)
    }

    /// Analyze and rewrite one statement.
    pub(super) fn visit_stmt(&mut self, stmt: StmtId) -> JitResult<()> {
        self.stmt_modified = false;
        self.stats.statements += 1;
        let root = self.body.stmt(stmt).root;

        self.walk(root)?;

        // The root's value is unused: a location is still read, an address
        // is dropped without escaping.
        let top = self.pop();
        if matches!(top.kind, ValueKind::Location { .. }) {
            self.escape_location(top, None)?;
        }
        if !self.stack.is_empty() {
            let depth = self.stack.len();
            self.stack.clear();
            return Err(JitError::UnconsumedValue { stmt, depth });
        }

        if self.stmt_modified {
            self.body.sequence(stmt);
            self.stats.statements_modified += 1;
            self.changed = true;
            trace!("rewritten {}:\n{}", stmt, self.body.dump_stmt(stmt));
        }
        self.count_local_refs(stmt);
        Ok(())
    }

    fn count_local_refs(&mut self, stmt: StmtId) {
        for node in self.body.stmt(stmt).exec_order.clone() {
            if let Some(lcl) = self.body.node(node).local() {
                self.body.locals.get_mut(lcl).ref_count += 1;
            }
        }
    }

    fn walk(&mut self, node: NodeId) -> JitResult<()> {
        self.stack.push(Value::unknown(node));
        for op in self.body.node(node).kind.operands() {
            self.walk(op)?;
        }
        self.post_order_visit(node)
    }

    // ========================================================================
    // Stack helpers
    // ========================================================================

    // Every node pushes its own entry before its operands, so a node never
    // pops more entries than its operands pushed.
    fn pop(&mut self) -> Value {
        let value = self.top(0);
        self.stack.truncate(self.stack.len() - 1);
        value
    }

    fn top(&self, depth: usize) -> Value {
        self.stack[self.stack.len() - 1 - depth]
    }

    fn set_top(&mut self, depth: usize, value: Value) {
        let len = self.stack.len();
        self.stack[len - 1 - depth] = value;
    }

    /// Escape and pop every operand value above `node`'s own entry.
    fn escape_operands(&mut self, node: NodeId) -> JitResult<()> {
        while let Some(top) = self.stack.last().copied() {
            if top.node == node {
                break;
            }
            self.stack.pop();
            self.escape_value(top, Some(node))?;
        }
        Ok(())
    }

    // ========================================================================
    // Post-order rules
    // ========================================================================

    fn post_order_visit(&mut self, node: NodeId) -> JitResult<()> {
        let (kind, ty, volatile) = {
            let n = self.body.node(node);
            (n.kind.clone(), n.ty, n.is_volatile())
        };
        match kind {
            NodeKind::StoreLclVar { lcl, .. } => {
                let value = self.pop();
                self.escape_value(value, Some(node))?;
                self.set_top(0, Value::location(node, lcl, 0));
            }
            NodeKind::StoreLclFld { lcl, offset, layout, .. } => {
                let size = match layout {
                    Some(l) => Some(self.body.layout_of(l).size),
                    None => ty.size(),
                };
                if size != Some(self.body.locals.get(lcl).size)
                    && !self.body.node(node).flags.contains(NodeFlags::PARTIAL_DEF)
                {
                    self.body.node_mut(node).flags |= NodeFlags::PARTIAL_DEF;
                    self.changed = true;
                }
                let value = self.pop();
                self.escape_value(value, Some(node))?;
                self.set_top(0, Value::location(node, lcl, u32::from(offset)));
            }
            NodeKind::LclVar { lcl } => {
                self.set_top(0, Value::location(node, lcl, 0));
            }
            NodeKind::LclFld { lcl, offset, .. } => {
                self.set_top(0, Value::location(node, lcl, u32::from(offset)));
            }
            NodeKind::LclAddr { lcl, offset } => {
                self.set_top(0, Value::address(node, lcl, u32::from(offset)));
            }
            NodeKind::Binary {
                op: BinOp::Add,
                op1,
                op2,
            } => {
                let c2 = self.offset_constant(op2);
                let c1 = self.offset_constant(op1);
                let folded = match (c2, c1) {
                    (Some(c), _) => self.top(1).add_offset(node, c),
                    (None, Some(c)) => self.top(0).add_offset(node, c),
                    (None, None) => None,
                };
                match folded {
                    Some(addr) => {
                        self.pop();
                        self.pop();
                        self.set_top(0, addr);
                    }
                    None => self.escape_operands(node)?,
                }
            }
            NodeKind::FieldAddr { offset, .. } => {
                let obj = self.pop();
                match obj.add_offset(node, u64::from(offset)).filter(|_| !volatile) {
                    Some(addr) => self.set_top(0, addr),
                    None => self.escape_value(obj, Some(node))?,
                }
            }
            NodeKind::Ind { .. } | NodeKind::Blk { .. } => {
                let addr = self.pop();
                if volatile {
                    self.escape_value(addr, Some(node))?;
                } else {
                    match addr.indir(node) {
                        Some(location) => self.set_top(0, location),
                        None => self.escape_value(addr, Some(node))?,
                    }
                }
            }
            NodeKind::StoreInd { .. } | NodeKind::StoreBlk { .. } => {
                let data = self.pop();
                let addr = self.pop();
                self.escape_value(data, Some(node))?;
                match addr.kind {
                    ValueKind::Address { lcl, offset } if !volatile => {
                        self.process_indirection(node, lcl, offset)?;
                    }
                    _ => self.escape_value(addr, Some(node))?,
                }
            }
            _ => self.escape_operands(node)?,
        }
        Ok(())
    }

    /// A non-negative, non-handle integer constant usable as an offset.
    fn offset_constant(&self, node: NodeId) -> Option<u64> {
        let n = self.body.node(node);
        if n.handle().is_some() {
            return None;
        }
        n.int_con()
            .and_then(|c| u64::try_from(c).ok())
            .filter(|c| *c <= u64::from(u32::MAX))
    }

    // ========================================================================
    // Escaping
    // ========================================================================

    pub(super) fn escape_value(&mut self, value: Value, user: Option<NodeId>) -> JitResult<()> {
        match value.kind {
            ValueKind::Unknown => Ok(()),
            ValueKind::Location { .. } => self.escape_location(value, user),
            ValueKind::Address { .. } => {
                self.escape_address(value, user);
                Ok(())
            }
        }
    }

    fn escape_address(&mut self, value: Value, user: Option<NodeId>) {
        let Some((lcl, offset)) = value.local() else {
            return;
        };

        if self.is_hidden_ret_buf(value, user, lcl, offset) {
            let dsc = self.body.locals.get_mut(lcl);
            if !dsc.defined_by_call {
                dsc.defined_by_call = true;
                self.stats.retbuf_defs += 1;
                self.changed = true;
            }
            self.body
                .locals
                .set_do_not_enregister(lcl, DoNotEnregisterReason::HiddenBufferStructArg);
        } else {
            self.expose(lcl, "address escapes");
        }

        self.morph_local_address(value.node, lcl, offset);
    }

    /// Whether `value` is the hidden return buffer argument of the call
    /// `user`, pointing at a struct local the call defines.
    fn is_hidden_ret_buf(&self, value: Value, user: Option<NodeId>, lcl: LocalId, offset: u32) -> bool {
        if !self.config.retbuf_non_exposing {
            return false;
        }
        let Some(call) = user.and_then(|u| self.body.node(u).as_call()) else {
            return false;
        };
        let dsc = self.body.locals.get(lcl);
        dsc.ty.is_struct()
            && !dsc.is_promoted_field()
            && offset < dsc.size
            && offset < MAX_LCL_FIELD_OFFSET
            && call.ret_buf_arg() == Some(value.node)
    }

    /// Mark the local (or the struct it was promoted from) address-exposed.
    pub(super) fn expose(&mut self, lcl: LocalId, reason: &'static str) {
        let root = self.body.locals.exposure_root(lcl);
        if self.body.locals.set_address_exposed(root) {
            self.stats.exposed_locals += 1;
            self.changed = true;
            debug!(local = %root, reason, "local address-exposed");
        }
    }

    pub(super) fn escape_location(&mut self, value: Value, _user: Option<NodeId>) -> JitResult<()> {
        let Some((lcl, offset)) = value.local() else {
            return Ok(());
        };
        let node = self.body.node(value.node);
        if node.local().is_some() {
            self.morph_promoted_field(value.node);
            return Ok(());
        }
        if !matches!(node.kind, NodeKind::Ind { .. } | NodeKind::Blk { .. }) {
            return Err(JitError::UnsupportedOperator {
                node: value.node,
                oper: node.kind.oper_name(),
            });
        }
        self.process_indirection(value.node, lcl, offset)
    }
}
