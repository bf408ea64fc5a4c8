//! Inline generic dictionary lookups.
//!
//! A runtime lookup helper takes the generic context and a signature and
//! returns a type or method handle. The handle is cached in a dictionary
//! reached from the context by a short pointer chase; the fast path replays
//! the chase and only calls the helper when the slot is still empty.
//!
//! ```text
//! [size_check_bb]: slot = <chase up to the dictionary>
//!                  if (IND(slot + sizeOffset) <= lastOffset) goto fallback_bb
//! null_check_bb:   fast = IND(slot + lastOffset)
//!                  if (fast == 0) goto fallback_bb
//! fast_path_bb:    result = fast; goto tail
//! fallback_bb:     result = CALL helper(ctx, sig)
//! tail:            use of the call -> result
//! ```

use tracing::debug;

use crate::error::{JitError, JitResult};
use crate::ir::{
    BinOp, BlockId, HandleKind, JumpKind, NodeFlags, NodeId, NodeKind, StmtId, VarType,
    Weight,
};
use super::HelperExpander;

impl<'a> HelperExpander<'a> {
    pub(super) fn expand_runtime_lookup(
        &mut self,
        block: BlockId,
        stmt: StmtId,
        call: NodeId,
    ) -> JitResult<Option<BlockId>> {
        let Some(signature_arg) = self.body.node(call).as_call().and_then(|c| c.arg(1)) else {
            return self.decline(call, "missing signature argument");
        };
        let signature = match self.body.node(signature_arg).handle() {
            Some(HandleKind::Signature(sig)) => sig,
            _ => return self.decline(call, "signature is not a constant"),
        };
        let recipe = self.recipes.get(signature)?.clone();
        if !recipe.is_valid() {
            return self.decline(call, "unsupported lookup recipe");
        }

        // Without optimizations nothing cleans up an extra copy, so a lookup
        // stored straight into a local writes that local directly.
        let reuse_dest = if self.config.opt_level.opts_enabled() {
            None
        } else {
            match self.body.node(self.body.stmt(stmt).root).kind {
                NodeKind::StoreLclVar { lcl, value } if value == call => Some(lcl),
                _ => None,
            }
        };

        let il_offset = self.body.stmt(stmt).il_offset;
        let split = self.body.split_block_before_tree(block, stmt, call)?;
        let prev = block;
        let tail = split.after;

        let ctx = self
            .body
            .node(call)
            .as_call()
            .and_then(|c| c.arg(0))
            .ok_or_else(|| JitError::InconsistentCfg {
                block,
                detail: format!("runtime lookup {} lost its context argument", call),
            })?;

        let result = match reuse_dest {
            Some(lcl) => lcl,
            None => self.body.locals.grab_temp(VarType::NativeInt, "runtime lookup"),
        };

        let size_check_bb = match recipe.size_offset {
            Some(_) => Some(self.new_block(prev, block)?),
            None => None,
        };
        let null_check_bb = self.new_block(size_check_bb.unwrap_or(prev), block)?;
        let fast_path_bb = self.new_block(null_check_bb, block)?;
        let fallback_bb = self.new_block(fast_path_bb, block)?;
        let first_check_bb = size_check_bb.unwrap_or(null_check_bb);

        // Chase every indirection but the last into `slot`.
        let last = recipe.offsets.len() - 1;
        let last_offset = recipe.offsets[last];
        let mut ptr = self.clone_arg(ctx, block)?;
        for (i, &offset) in recipe.offsets[..last].iter().enumerate() {
            let relative = (i == 0 && recipe.indirect_first_offset)
                || (i == 1 && recipe.indirect_second_offset);
            ptr = self.lookup_indir(ptr, offset, relative)?;
        }
        let slot = self.body.locals.grab_temp(VarType::NativeInt, "runtime lookup slot");
        let slot_store = self.body.new_store_lcl_var(slot, ptr);
        self.append(first_check_bb, slot_store, il_offset);

        // size_check_bb
        if let (Some(size_check_bb), Some(size_offset)) = (size_check_bb, recipe.size_offset) {
            let size_addr = self.local_offset_addr(slot, size_offset);
            let size = self.body.new_ind(VarType::NativeInt, size_addr);
            self.body.node_mut(size).flags |= NodeFlags::NONFAULTING;
            let bound = self.body.new_icon(i64::from(last_offset), VarType::NativeInt);
            let too_small = self.body.new_oper(BinOp::Le, VarType::Int, size, bound);
            let jtrue = self.body.new_jtrue(too_small);
            self.append(size_check_bb, jtrue, il_offset);
        }

        // null_check_bb
        let fast = self.body.locals.grab_temp(VarType::NativeInt, "runtime lookup fast value");
        let value_addr = self.local_offset_addr(slot, last_offset);
        let value = self.body.new_ind(VarType::NativeInt, value_addr);
        self.body.node_mut(value).flags |= NodeFlags::NONFAULTING;
        let fast_store = self.body.new_store_lcl_var(fast, value);
        self.append(null_check_bb, fast_store, il_offset);
        let fast_read = self.body.new_lcl_var(fast);
        let null = self.body.new_icon(0, VarType::NativeInt);
        let is_null = self.body.new_oper(BinOp::Eq, VarType::Int, fast_read, null);
        let jtrue = self.body.new_jtrue(is_null);
        self.append(null_check_bb, jtrue, il_offset);

        // fast_path_bb
        let fast_read = self.body.new_lcl_var(fast);
        let fast_result = self.body.new_store_lcl_var(result, fast_read);
        self.append(fast_path_bb, fast_result, il_offset);

        // tail
        if reuse_dest.is_some() {
            self.body.remove_stmt(tail, stmt);
        } else {
            let read = self.body.new_lcl_var(result);
            self.replace_call_use(tail, stmt, split.call_use, Some(read));
        }

        // fallback_bb
        self.clear_candidate(call);
        let slow_result = self.body.new_store_lcl_var(result, call);
        self.append(fallback_bb, slow_result, il_offset);

        // Wiring and weights.
        let size_hit = self.config.expansion.lookup_size_check_hit_percent;
        let null_hit = self.config.expansion.lookup_null_check_hit_percent;
        let miss = |hit: u32| f64::from(100 - hit.min(100)) / 100.0;

        self.body.set_jump(prev, JumpKind::Always(first_check_bb));
        if let Some(size_check_bb) = size_check_bb {
            self.body.set_jump(
                size_check_bb,
                JumpKind::cond(fallback_bb, null_check_bb, miss(size_hit)),
            );
            self.set_weight_percent(size_check_bb, tail, 100);
            self.set_weight_percent(null_check_bb, tail, size_hit);
        } else {
            self.set_weight_percent(null_check_bb, tail, 100);
        }
        self.body.set_jump(
            null_check_bb,
            JumpKind::cond(fallback_bb, fast_path_bb, miss(null_hit)),
        );
        self.body.set_jump(fast_path_bb, JumpKind::Always(tail));
        self.body.set_jump(fallback_bb, JumpKind::Always(tail));

        self.set_weight_percent(fast_path_bb, null_check_bb, null_hit);
        let fallback_weight = Weight(
            (self.body.block(tail).weight.0 - self.body.block(fast_path_bb).weight.0).max(0.0),
        );
        self.set_weight(fallback_bb, fallback_weight);

        debug!(
            call = %call,
            signature = signature.0,
            indirections = recipe.indirections(),
            size_check = recipe.size_offset.is_some(),
            "runtime lookup expanded"
        );
        Ok(Some(tail))
    }

    /// One step of the pointer chase from `ptr`.
    ///
    /// A relative step adds the offset stored at `ptr + offset` to that
    /// address instead of loading a pointer from it.
    fn lookup_indir(&mut self, ptr: NodeId, offset: u32, relative: bool) -> JitResult<NodeId> {
        let offset = self.body.new_icon(i64::from(offset), VarType::NativeInt);
        let addr = self.body.new_oper(BinOp::Add, VarType::NativeInt, ptr, offset);
        let load_addr = if relative {
            self.body.clone_expr(addr).ok_or(JitError::UnsupportedOperator {
                node: addr,
                oper: "ADD",
            })?
        } else {
            addr
        };
        let load = self.body.new_ind(VarType::NativeInt, load_addr);
        self.body.node_mut(load).flags |= NodeFlags::NONFAULTING | NodeFlags::INVARIANT;
        if relative {
            Ok(self.body.new_oper(BinOp::Add, VarType::NativeInt, addr, load))
        } else {
            Ok(load)
        }
    }

    /// Copy of a call argument for use in a fast path.
    pub(super) fn clone_arg(&mut self, arg: NodeId, block: BlockId) -> JitResult<NodeId> {
        self.body.clone_expr(arg).ok_or_else(|| JitError::InconsistentCfg {
            block,
            detail: format!("argument {} cannot be duplicated after the split", arg),
        })
    }
}
