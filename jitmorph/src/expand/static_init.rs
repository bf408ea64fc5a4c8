//! Inline class initialization checks.
//!
//! ```text
//! is_inited_bb:   if (<class is initialized>) goto tail      (always likely)
//! helper_call_bb: CALL helper(args)                          (run rarely)
//! tail:           use of the call -> CNS_INT statics base
//! ```
//!
//! The static base address is a compile-time constant once the class is
//! initialized, so the tail uses the constant directly and the fallback only
//! runs the helper for its initialization side effect.

use tracing::debug;

use crate::error::JitResult;
use crate::ir::{
    BinOp, BlockId, ExpansionCandidate, HandleKind, Helper, JumpKind, NodeFlags, NodeId,
    StmtId, VarType,
};
use super::runtime::{ClassInitFlag, InitFlagKind};
use super::HelperExpander;

impl<'a> HelperExpander<'a> {
    pub(super) fn expand_static_init(
        &mut self,
        block: BlockId,
        stmt: StmtId,
        call: NodeId,
    ) -> JitResult<Option<BlockId>> {
        let (helper, class) = match self.body.node(call).as_call() {
            Some(c) => match (c.helper(), c.candidate) {
                (Some(helper), Some(ExpansionCandidate::StaticInit { class })) => (helper, class),
                _ => return Ok(None),
            },
            None => return Ok(None),
        };

        let Some(flag) = self.runtime.class_init_flag(class) else {
            return self.decline(call, "class init flag not available");
        };
        let base = match helper {
            Helper::InitClass => None,
            Helper::GetGcStaticBase | Helper::GetNonGcStaticBase => {
                let gc = helper == Helper::GetGcStaticBase;
                match self.runtime.static_base_address(class, gc) {
                    Some(address) => Some(address),
                    None => return self.decline(call, "statics base not allocated"),
                }
            }
            _ => return Ok(None),
        };

        let il_offset = self.body.stmt(stmt).il_offset;
        let split = self.body.split_block_before_tree(block, stmt, call)?;
        let prev = block;
        let tail = split.after;

        let is_inited_bb = self.new_block(prev, block)?;
        let helper_call_bb = self.new_block(is_inited_bb, block)?;

        // is_inited_bb
        let cond = self.init_check(flag);
        let jtrue = self.body.new_jtrue(cond);
        self.append(is_inited_bb, jtrue, il_offset);

        // tail: the call's value is the statics base
        let value = base.map(|address| {
            self.body
                .new_icon_handle(address as i64, HandleKind::StaticBase(class))
        });
        self.replace_call_use(tail, stmt, split.call_use, value);

        // helper_call_bb: keep the call for its side effect
        self.clear_candidate(call);
        self.append(helper_call_bb, call, il_offset);

        self.body.set_jump(prev, JumpKind::Always(is_inited_bb));
        self.body
            .set_jump(is_inited_bb, JumpKind::cond(tail, helper_call_bb, 1.0));
        self.body.set_jump(helper_call_bb, JumpKind::Always(tail));

        self.set_weight_percent(is_inited_bb, tail, 100);
        self.body.block_mut(helper_call_bb).set_run_rarely();

        debug!(
            call = %call,
            class = class.0,
            helper = helper.name(),
            "static init check expanded"
        );
        Ok(Some(tail))
    }

    /// Relop that is true once the class is initialized.
    fn init_check(&mut self, flag: ClassInitFlag) -> NodeId {
        match flag.kind {
            InitFlagKind::InitializedBit => {
                let address = flag.address.wrapping_add(u64::from(flag.offset));
                let addr = self
                    .body
                    .new_icon_handle(address as i64, HandleKind::GlobalPtr);
                let value = self.body.new_ind(VarType::Int, addr);
                self.body.node_mut(value).flags |= NodeFlags::NONFAULTING;
                let mask = self.body.new_icon(1, VarType::Int);
                let bit = self.body.new_oper(BinOp::And, VarType::Int, value, mask);
                let one = self.body.new_icon(1, VarType::Int);
                self.body.new_oper(BinOp::Eq, VarType::Int, bit, one)
            }
            InitFlagKind::ZeroWhenInitialized => {
                let base = self
                    .body
                    .new_icon_handle(flag.address as i64, HandleKind::GlobalPtr);
                let offset = self.body.new_icon(i64::from(flag.offset), VarType::NativeInt);
                let addr = self.body.new_oper(BinOp::Add, VarType::NativeInt, base, offset);
                let value = self.body.new_ind(VarType::Long, addr);
                self.body.node_mut(value).flags |= NodeFlags::NONFAULTING;
                let zero = self.body.new_icon(0, VarType::Long);
                self.body.new_oper(BinOp::Eq, VarType::Int, value, zero)
            }
        }
    }
}
