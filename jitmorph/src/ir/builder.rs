//! Builder for constructing method bodies by hand.
//!
//! The importer is outside this crate, so tests, benchmarks and embedders
//! create IR through [`MethodBuilder`]: create blocks, switch between them,
//! append statements and set jumps. [`MethodBuilder::finish`] numbers the
//! blocks and computes predecessor lists.

use super::block::{BlockFlags, BlockId, EhRegionId, JumpKind, LoopId, Weight};
use super::body::{MethodBody, MethodFlags};
use super::node::NodeId;
use super::stmt::StmtId;
use super::types::MethodHandle;

/// Incremental method body builder.
#[derive(Debug)]
pub struct MethodBuilder {
    body: MethodBody,
    current_block: BlockId,
}

impl MethodBuilder {
    /// Create a builder with an entry block.
    pub fn new(method: MethodHandle) -> Self {
        let mut body = MethodBody::new(method);
        let entry = Self::push_block(&mut body);
        body.blocks[entry].flags |= BlockFlags::IMPORTED;
        Self {
            body,
            current_block: entry,
        }
    }

    fn push_block(body: &mut MethodBody) -> BlockId {
        let num = body.blocks.len() as u32 + 1;
        let id = body.blocks.alloc(super::block::BasicBlock::new(num));
        body.layout.push(id);
        id
    }

    /// The IR being built, for node construction.
    pub fn body(&mut self) -> &mut MethodBody {
        &mut self.body
    }

    /// The entry block.
    pub fn entry(&self) -> BlockId {
        self.body.layout[0]
    }

    /// The block statements are appended to.
    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    /// Append a new imported block to the layout.
    pub fn new_block(&mut self) -> BlockId {
        let id = Self::push_block(&mut self.body);
        self.body.blocks[id].flags |= BlockFlags::IMPORTED;
        id
    }

    /// Make `block` the current block.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current_block = block;
    }

    /// Append a statement rooted at `root` to the current block.
    pub fn add_stmt(&mut self, root: NodeId) -> StmtId {
        let il_offset = self.body.stmts.len() as u32;
        let stmt = self.body.new_stmt(root, Some(il_offset));
        self.body.append_stmt(self.current_block, stmt);
        if self.body.contains_call(root) {
            self.body.blocks[self.current_block].flags |=
                BlockFlags::HAS_CALL | BlockFlags::GC_SAFE_POINT;
        }
        stmt
    }

    /// Set how `block` ends. Predecessors are computed by [`Self::finish`].
    pub fn set_jump(&mut self, block: BlockId, jump: JumpKind) {
        self.body.blocks[block].jump = jump;
    }

    /// Set a block's weight.
    pub fn set_weight(&mut self, block: BlockId, weight: Weight) {
        self.body.blocks[block].weight = weight;
        if weight.is_zero() {
            self.body.blocks[block].flags |= BlockFlags::RUN_RARELY;
        }
    }

    /// Mark a block rarely run.
    pub fn set_run_rarely(&mut self, block: BlockId) {
        self.body.blocks[block].set_run_rarely();
    }

    /// Put a block into a try region.
    pub fn set_eh_region(&mut self, block: BlockId, region: EhRegionId) {
        self.body.blocks[block].eh_region = Some(region);
    }

    /// Put a block into a loop.
    pub fn set_loop(&mut self, block: BlockId, loop_num: LoopId) {
        self.body.blocks[block].loop_num = Some(loop_num);
    }

    /// Record importer facts.
    pub fn add_method_flags(&mut self, flags: MethodFlags) {
        self.body.flags |= flags;
    }

    /// Finish building: renumber blocks and compute predecessors.
    pub fn finish(mut self) -> MethodBody {
        self.body.renumber_blocks();
        self.body.recompute_preds();
        self.body
    }
}
