//! # Flow Graph Editing
//!
//! Operations that change the block structure of a [`MethodBody`]: creating
//! blocks, rewiring jumps, splitting blocks and recomputing derived data
//! (numbering, predecessor lists, weights).
//!
//! ## Edge Invariant
//!
//! For every block `B` and every target `S` of `B.jump`, `S.preds` holds an
//! edge from `B` whose `dup_count` equals the number of times `S` appears
//! among `B`'s targets, and `S.preds` holds no other edges. All edits go
//! through [`MethodBody::set_jump`], which maintains this incrementally;
//! [`MethodBody::recompute_preds`] rebuilds it from scratch.

pub mod split;
pub mod validate;

use tracing::trace;

use crate::ir::{BasicBlock, BlockFlags, BlockId, FlowEdge, JumpKind, MethodBody, Weight};

pub use split::SplitResult;

impl MethodBody {
    // ========================================================================
    // Block creation
    // ========================================================================

    /// Create an internal block and place it right after `after` in layout
    /// order. The new block joins `after`'s EH region and loop, has no
    /// successors and no statements.
    pub fn new_block_after(&mut self, after: BlockId) -> BlockId {
        let (eh_region, loop_num) = {
            let prev = &self.blocks[after];
            (prev.eh_region, prev.loop_num)
        };
        let mut block = BasicBlock::new(0);
        block.eh_region = eh_region;
        block.loop_num = loop_num;
        block.flags = BlockFlags::INTERNAL;
        let id = self.blocks.alloc(block);

        let pos = self
            .layout
            .iter()
            .position(|b| *b == after)
            .map_or(self.layout.len(), |p| p + 1);
        self.layout.insert(pos, id);
        trace!(block = %id, after = %after, "new block");
        id
    }

    // ========================================================================
    // Edges
    // ========================================================================

    /// Add one edge `source -> target` to `target`'s predecessor list.
    pub fn add_ref_pred(&mut self, target: BlockId, source: BlockId) {
        let preds = &mut self.blocks[target].preds;
        match preds.iter_mut().find(|e| e.source == source) {
            Some(edge) => edge.dup_count += 1,
            None => preds.push(FlowEdge {
                source,
                dup_count: 1,
            }),
        }
    }

    /// Remove one edge `source -> target` from `target`'s predecessor list.
    pub fn remove_ref_pred(&mut self, target: BlockId, source: BlockId) {
        let preds = &mut self.blocks[target].preds;
        if let Some(pos) = preds.iter().position(|e| e.source == source) {
            if preds[pos].dup_count > 1 {
                preds[pos].dup_count -= 1;
            } else {
                preds.remove(pos);
            }
        }
    }

    /// Replace how `block` ends, updating predecessor lists of the old and
    /// new targets.
    pub fn set_jump(&mut self, block: BlockId, jump: JumpKind) {
        let old = std::mem::replace(&mut self.blocks[block].jump, jump);
        for succ in old.successors() {
            self.remove_ref_pred(succ, block);
        }
        for succ in self.blocks[block].jump.successors() {
            self.add_ref_pred(succ, block);
        }
    }

    /// Successors of a block.
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks[block].jump.successors()
    }

    // ========================================================================
    // Recomputation
    // ========================================================================

    /// Assign display numbers in layout order, starting at 1.
    pub fn renumber_blocks(&mut self) {
        for (i, id) in self.layout.iter().enumerate() {
            self.blocks[*id].num = i as u32 + 1;
        }
    }

    /// Rebuild every predecessor list from the jumps of blocks in the layout.
    pub fn recompute_preds(&mut self) {
        for id in self.layout.clone() {
            self.blocks[id].preds.clear();
        }
        for id in self.layout.clone() {
            for succ in self.blocks[id].jump.successors() {
                self.add_ref_pred(succ, id);
            }
        }
    }

    /// Blocks reachable from the entry in reverse post-order.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let Some(entry) = self.entry() else {
            return Vec::new();
        };
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::new();
        // (block, next successor index)
        let mut stack = vec![(entry, 0usize)];
        visited[entry.0 as usize] = true;

        while let Some((block, next)) = stack.pop() {
            let succs = self.blocks[block].jump.successors();
            if next < succs.len() {
                stack.push((block, next + 1));
                let succ = succs[next];
                if !visited[succ.0 as usize] {
                    visited[succ.0 as usize] = true;
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
            }
        }

        postorder.reverse();
        postorder
    }

    /// Recompute block weights top-down from the entry weight using edge
    /// likelihoods. Back edges do not contribute.
    pub fn recompute_weights(&mut self) {
        let rpo = self.reverse_postorder();
        let mut order = vec![usize::MAX; self.blocks.len()];
        for (i, b) in rpo.iter().enumerate() {
            order[b.0 as usize] = i;
        }

        for (i, &block) in rpo.iter().enumerate().skip(1) {
            let mut weight = 0.0;
            for edge in self.blocks[block].preds.clone() {
                if order[edge.source.0 as usize] >= i {
                    continue;
                }
                let source = &self.blocks[edge.source];
                for (succ, likelihood) in source.jump.successor_likelihoods() {
                    if succ == block {
                        weight += source.weight.0 * likelihood;
                    }
                }
            }
            let b = &mut self.blocks[block];
            b.weight = Weight(weight);
            b.flags.set(BlockFlags::RUN_RARELY, weight == 0.0);
        }
    }

    /// Bring derived flow graph data up to date after blocks were added.
    pub fn update_after_expansion(&mut self, profile_enabled: bool) {
        self.renumber_blocks();
        self.recompute_preds();
        if profile_enabled {
            self.recompute_weights();
        }
    }
}
