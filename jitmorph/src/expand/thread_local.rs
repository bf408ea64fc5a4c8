//! Inline thread static base lookups.
//!
//! Each thread owns an array of per-type static blocks, reached from the
//! thread's TLS root and indexed by a type index known at compile time.
//!
//! ```text
//! max_cond_bb:
//!     tlsRoot = <TLS root of the current thread>
//!     if (IND<int>(tlsRoot + offsetOfMax) <= typeIndex) goto fallback_bb
//! null_cond_bb:
//!     block = IND(IND(tlsRoot + offsetOfBlocks) + typeIndex * 8)
//!     if (block == 0) goto fallback_bb
//! fast_path_bb: result = block; goto tail
//! fallback_bb:  result = CALL helper(typeIndex)               (run rarely)
//! tail:         use of the call -> result
//! ```

use tracing::debug;

use crate::error::{JitError, JitResult};
use crate::ir::{
    BinOp, BlockId, CallTarget, Helper, JumpKind, NodeFlags, NodeId, PhysReg, StmtId,
    VarType, TARGET_POINTER_SIZE,
};
use super::runtime::TlsBaseKind;
use super::HelperExpander;

impl<'a> HelperExpander<'a> {
    pub(super) fn expand_thread_local(
        &mut self,
        block: BlockId,
        stmt: StmtId,
        call: NodeId,
    ) -> JitResult<Option<BlockId>> {
        let Some(helper) = self.body.node(call).as_call().and_then(|c| c.helper()) else {
            return Ok(None);
        };
        let gc = helper == Helper::GetThreadStaticBaseGc;
        let Some(info) = self.runtime.thread_static_blocks_info(gc) else {
            return self.decline(call, "thread static layout not available");
        };
        if self.body.node(call).as_call().and_then(|c| c.arg(0)).is_none() {
            return self.decline(call, "missing type index argument");
        }

        let il_offset = self.body.stmt(stmt).il_offset;
        let split = self.body.split_block_before_tree(block, stmt, call)?;
        let prev = block;
        let tail = split.after;

        let type_index = self
            .body
            .node(call)
            .as_call()
            .and_then(|c| c.arg(0))
            .ok_or_else(|| JitError::InconsistentCfg {
                block,
                detail: format!("thread static access {} lost its type index", call),
            })?;

        let max_cond_bb = self.new_block(prev, block)?;
        let null_cond_bb = self.new_block(max_cond_bb, block)?;
        let fast_path_bb = self.new_block(null_cond_bb, block)?;
        let fallback_bb = self.new_block(fast_path_bb, block)?;

        let result = self
            .body
            .locals
            .grab_temp(VarType::NativeInt, "thread static base");
        let tls_root = self
            .body
            .locals
            .grab_temp(VarType::NativeInt, "TLS root");
        let static_block = self
            .body
            .locals
            .grab_temp(VarType::NativeInt, "thread static block");

        // max_cond_bb
        let root_value = self.tls_root(info.base);
        let root_store = self.body.new_store_lcl_var(tls_root, root_value);
        self.append(max_cond_bb, root_store, il_offset);

        let max_addr = self.local_offset_addr(tls_root, info.offset_of_max_blocks);
        let max_blocks = self.body.new_ind(VarType::Int, max_addr);
        self.body.node_mut(max_blocks).flags |= NodeFlags::NONFAULTING;
        let index = self.clone_arg(type_index, block)?;
        let out_of_range = self.body.new_oper(BinOp::Le, VarType::Int, max_blocks, index);
        let jtrue = self.body.new_jtrue(out_of_range);
        self.append(max_cond_bb, jtrue, il_offset);

        // null_cond_bb
        let blocks_addr = self.local_offset_addr(tls_root, info.offset_of_blocks);
        let blocks = self.body.new_ind(VarType::NativeInt, blocks_addr);
        self.body.node_mut(blocks).flags |= NodeFlags::NONFAULTING;
        let index = self.clone_arg(type_index, block)?;
        let index = self.body.new_cast(VarType::NativeInt, index);
        let scale = self
            .body
            .new_icon(i64::from(TARGET_POINTER_SIZE), VarType::NativeInt);
        let byte_offset = self.body.new_oper(BinOp::Mul, VarType::NativeInt, index, scale);
        let entry_addr = self
            .body
            .new_oper(BinOp::Add, VarType::NativeInt, blocks, byte_offset);
        let entry = self.body.new_ind(VarType::NativeInt, entry_addr);
        self.body.node_mut(entry).flags |= NodeFlags::NONFAULTING;
        let block_store = self.body.new_store_lcl_var(static_block, entry);
        self.append(null_cond_bb, block_store, il_offset);

        let block_read = self.body.new_lcl_var(static_block);
        let null = self.body.new_icon(0, VarType::NativeInt);
        let is_null = self.body.new_oper(BinOp::Eq, VarType::Int, block_read, null);
        let jtrue = self.body.new_jtrue(is_null);
        self.append(null_cond_bb, jtrue, il_offset);

        // fast_path_bb
        let block_read = self.body.new_lcl_var(static_block);
        let fast_result = self.body.new_store_lcl_var(result, block_read);
        self.append(fast_path_bb, fast_result, il_offset);

        // tail
        let read = self.body.new_lcl_var(result);
        self.replace_call_use(tail, stmt, split.call_use, Some(read));

        // fallback_bb
        self.clear_candidate(call);
        let slow_result = self.body.new_store_lcl_var(result, call);
        self.append(fallback_bb, slow_result, il_offset);

        self.body.set_jump(prev, JumpKind::Always(max_cond_bb));
        self.body
            .set_jump(max_cond_bb, JumpKind::cond(fallback_bb, null_cond_bb, 0.0));
        self.body
            .set_jump(null_cond_bb, JumpKind::cond(fallback_bb, fast_path_bb, 0.0));
        self.body.set_jump(fast_path_bb, JumpKind::Always(tail));
        self.body.set_jump(fallback_bb, JumpKind::Always(tail));

        self.set_weight_percent(max_cond_bb, tail, 100);
        self.set_weight_percent(null_cond_bb, tail, 100);
        self.set_weight_percent(fast_path_bb, tail, 100);
        self.body.block_mut(fallback_bb).set_run_rarely();

        debug!(call = %call, gc, base = ?info.base, "thread static access expanded");
        Ok(Some(tail))
    }

    /// Expression computing the current thread's TLS root.
    fn tls_root(&mut self, base: TlsBaseKind) -> NodeId {
        match base {
            TlsBaseKind::SegmentOffset {
                tls_array_offset,
                tls_index,
                data_offset,
            } => {
                let tp = self.body.new_phys_reg(PhysReg::ThreadPointer);
                let array_offset = self
                    .body
                    .new_icon(i64::from(tls_array_offset), VarType::NativeInt);
                let array_addr = self
                    .body
                    .new_oper(BinOp::Add, VarType::NativeInt, tp, array_offset);
                let array = self.body.new_ind(VarType::NativeInt, array_addr);
                let slot_offset = self.body.new_icon(
                    i64::from(tls_index) * i64::from(TARGET_POINTER_SIZE),
                    VarType::NativeInt,
                );
                let slot_addr = self
                    .body
                    .new_oper(BinOp::Add, VarType::NativeInt, array, slot_offset);
                let data = self.body.new_ind(VarType::NativeInt, slot_addr);
                for load in [array, data] {
                    self.body.node_mut(load).flags |= NodeFlags::NONFAULTING | NodeFlags::INVARIANT;
                }
                let data_offset = self
                    .body
                    .new_icon(i64::from(data_offset), VarType::NativeInt);
                self.body
                    .new_oper(BinOp::Add, VarType::NativeInt, data, data_offset)
            }
            TlsBaseKind::ThreadPointerRegister { data_offset } => {
                let tp = self.body.new_phys_reg(PhysReg::ThreadPointer);
                let offset = self.body.new_icon(data_offset, VarType::NativeInt);
                self.body.new_oper(BinOp::Add, VarType::NativeInt, tp, offset)
            }
            TlsBaseKind::AccessorCall { accessor } => {
                self.body
                    .new_call(CallTarget::User(accessor), Vec::new(), VarType::NativeInt)
            }
        }
    }
}
