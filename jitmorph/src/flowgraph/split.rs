//! # Tree and Block Splitting
//!
//! Helper expansions need the call they rewrite to sit at the start of a
//! block. [`MethodBody::split_block_before_tree`] gets it there in two steps:
//!
//! 1. **Tree split**: every operand evaluated before the target inside its
//!    statement is hoisted into a new statement in front of it, so the
//!    target becomes the first executed non-invariant node of the statement.
//!    Values that are still needed are spilled to fresh temps; values that
//!    are not needed keep only their side effects.
//! 2. **Block split**: the block is cut right before the statement. The
//!    hoisted statements stay in the original block, the statement and
//!    everything after it move into a new block.
//!
//! ```text
//! BB01: s0; STORE(V1, ADD(f(), CALL(g(x))))      BB01: s0; T2 = f(); T3 = g(x)
//!                                           ==>   BB02: STORE(V1, ADD(T2, CALL(T3)))
//! ```

use tracing::trace;

use crate::error::{JitError, JitResult};
use crate::ir::{
    BlockFlags, BlockId, LayoutId, MethodBody, NodeId, NodeKind, NodeUse, StmtId, VarType,
};

/// Outcome of [`MethodBody::split_block_before_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitResult {
    /// The new block that now starts with the split statement.
    pub after: BlockId,
    /// First statement created by the tree split, if any. It stays in the
    /// original block.
    pub first_new_stmt: Option<StmtId>,
    /// The slot holding the split node after the split.
    pub call_use: NodeUse,
}

impl MethodBody {
    /// Split `stmt` so that `target` executes first, then split `block`
    /// before `stmt`.
    ///
    /// On return `block` ends with an unconditional jump to
    /// [`SplitResult::after`], which took over `block`'s jump, successors,
    /// weight and the flags a split hands down.
    pub fn split_block_before_tree(
        &mut self,
        block: BlockId,
        stmt: StmtId,
        target: NodeId,
    ) -> JitResult<SplitResult> {
        let (first_new_stmt, call_use) = self.split_tree(block, stmt, target)?;
        let after = self.split_block_before_stmt(block, stmt)?;
        trace!(
            block = %block,
            after = %after,
            stmt = %stmt,
            "split block before tree {}",
            target
        );
        Ok(SplitResult {
            after,
            first_new_stmt,
            call_use,
        })
    }

    /// Hoist everything evaluated before `target` out of `stmt`.
    ///
    /// Returns the first new statement and the use slot of `target`.
    pub fn split_tree(
        &mut self,
        block: BlockId,
        stmt: StmtId,
        target: NodeId,
    ) -> JitResult<(Option<StmtId>, NodeUse)> {
        let root = self.stmts[stmt].root;
        let path = self.path_to(root, target).ok_or(JitError::InconsistentCfg {
            block,
            detail: format!("{} is not part of {}", target, stmt),
        })?;

        let mut first_new = None;

        // Siblings to the left of the path at every level run before the
        // target, outermost first.
        for &(parent, index) in &path {
            for i in 0..index {
                self.split_out_use(block, stmt, parent, i, &mut first_new)?;
            }
        }

        // The target's own operands run before it as well.
        let operand_count = self.nodes[target].kind.operands().len();
        for i in 0..operand_count {
            self.split_out_use(block, stmt, target, i, &mut first_new)?;
        }

        self.sequence(stmt);
        let call_use = self.find_use(stmt, target).ok_or(JitError::InconsistentCfg {
            block,
            detail: format!("{} lost from {} during split", target, stmt),
        })?;
        Ok((first_new, call_use))
    }

    /// Parent/index pairs from `root` down to `target`.
    fn path_to(&self, root: NodeId, target: NodeId) -> Option<Vec<(NodeId, usize)>> {
        if root == target {
            return Some(Vec::new());
        }
        let mut parent_of = rustc_hash::FxHashMap::default();
        for node in self.exec_order(root) {
            for (i, op) in self.nodes[node].kind.operands().into_iter().enumerate() {
                parent_of.insert(op, (node, i));
            }
        }
        let mut path = Vec::new();
        let mut cur = target;
        while cur != root {
            let &(parent, index) = parent_of.get(&cur)?;
            path.push((parent, index));
            cur = parent;
        }
        path.reverse();
        Some(path)
    }

    fn split_out_use(
        &mut self,
        block: BlockId,
        stmt: StmtId,
        parent: NodeId,
        index: usize,
        first_new: &mut Option<StmtId>,
    ) -> JitResult<()> {
        let use_ = NodeUse::Operand { parent, index };
        let Some(child) = self.use_value(use_) else {
            return Ok(());
        };
        let node = &self.nodes[child];

        if node.is_invariant() {
            return Ok(());
        }
        if let NodeKind::LclVar { lcl } = node.kind {
            if !self.locals.get(lcl).is_address_exposed() {
                return Ok(());
            }
        }

        let is_comma_effect = matches!(self.nodes[parent].kind, NodeKind::Comma { .. }) && index == 0;
        let is_value = !is_comma_effect && node.ty != VarType::Void;

        let mut new_roots = Vec::new();
        if is_value {
            let ty = node.ty;
            let temp = if ty.is_struct() {
                let layout = self.node_layout(child).ok_or(JitError::UnsupportedOperator {
                    node: child,
                    oper: self.nodes[child].kind.oper_name(),
                })?;
                let l = &self.layouts[layout];
                self.locals.grab_struct_temp(layout, l, "spilling to split statement for tree")
            } else {
                self.locals
                    .grab_temp(ty.actual_type(), "spilling to split statement for tree")
            };
            new_roots.push(self.new_store_lcl_var(temp, child));
            let read = self.new_lcl_var(temp);
            self.replace_use(use_, read);
        } else {
            new_roots.extend(self.extract_side_effects(child));
            let nop = self.new_nop();
            self.replace_use(use_, nop);
        }

        let il_offset = self.stmts[stmt].il_offset;
        for root in new_roots {
            let new_stmt = self.new_stmt(root, il_offset);
            self.insert_stmt_before(block, stmt, new_stmt);
            first_new.get_or_insert(new_stmt);
        }
        Ok(())
    }

    /// Maximal subtrees of `id` that have side effects, in execution order.
    pub fn extract_side_effects(&self, id: NodeId) -> Vec<NodeId> {
        let node = &self.nodes[id];
        if !node.own_side_effects().is_empty() {
            return vec![id];
        }
        node.kind
            .operands()
            .into_iter()
            .flat_map(|op| self.extract_side_effects(op))
            .collect()
    }

    /// Struct layout of a struct-typed node, when it can be determined.
    pub fn node_layout(&self, id: NodeId) -> Option<LayoutId> {
        match self.nodes[id].kind {
            NodeKind::Blk { layout, .. } | NodeKind::StoreBlk { layout, .. } => Some(layout),
            NodeKind::LclFld { layout, .. } | NodeKind::StoreLclFld { layout, .. } => layout,
            NodeKind::LclVar { lcl } | NodeKind::StoreLclVar { lcl, .. } => {
                self.locals.get(lcl).layout
            }
            NodeKind::Comma { op2, .. } => self.node_layout(op2),
            _ => None,
        }
    }

    /// Split `block` so that `stmt` and all statements after it move into
    /// a new block placed right after it. Returns the new block.
    pub fn split_block_before_stmt(&mut self, block: BlockId, stmt: StmtId) -> JitResult<BlockId> {
        let pos = self.blocks[block]
            .statements
            .iter()
            .position(|s| *s == stmt)
            .ok_or(JitError::InconsistentCfg {
                block,
                detail: format!("{} is not in the block", stmt),
            })?;
        Ok(self.split_block_at(block, pos))
    }

    /// Split `block` at the beginning: every statement moves to the new block.
    pub fn split_block_at_beginning(&mut self, block: BlockId) -> BlockId {
        self.split_block_at(block, 0)
    }

    fn split_block_at(&mut self, block: BlockId, pos: usize) -> BlockId {
        let after = self.new_block_after(block);

        let moved = self.blocks[block].statements.split_off(pos);
        self.blocks[after].statements = moved;

        let jump = self.blocks[block].jump.clone();
        self.set_jump(after, jump);
        self.set_jump(block, crate::ir::JumpKind::Always(after));

        let original = self.blocks[block].flags;
        let before_snapshot = self.blocks[block].clone();
        {
            let a = &mut self.blocks[after];
            a.inherit_weight(&before_snapshot);
            a.flags |= original
                & (BlockFlags::SPLIT_GAINED
                    | BlockFlags::IMPORTED
                    | BlockFlags::GC_SAFE_POINT
                    | BlockFlags::LOOP_PREHEADER);
        }
        let lost = (BlockFlags::SPLIT_LOST - BlockFlags::GC_SAFE_POINT) | BlockFlags::LOOP_PREHEADER;
        self.blocks[block].flags.remove(lost);
        after
    }
}
