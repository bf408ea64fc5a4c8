//! # Basic Blocks
//!
//! A basic block holds an ordered list of statements and ends in a jump
//! described by [`JumpKind`]. Successors are derived from the jump kind;
//! predecessors are stored explicitly as [`FlowEdge`]s and kept in sync by
//! the flow graph editing functions in [`crate::flowgraph`].

use std::fmt;

use bitflags::bitflags;

use crate::define_id;
use super::stmt::StmtId;

define_id!(
    /// Handle of a basic block.
    pub struct BlockId, "BB"
);

/// Exception handling region index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EhRegionId(pub u32);

impl fmt::Display for EhRegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EH#{}", self.0)
    }
}

/// Natural loop index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

// ============================================================================
// Weights
// ============================================================================

/// Estimated execution count of a block, relative to a method entry of
/// [`Weight::UNITY`].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Weight(pub f64);

impl Weight {
    /// Never executed.
    pub const ZERO: Weight = Weight(0.0);
    /// Executed once per method invocation.
    pub const UNITY: Weight = Weight(100.0);

    /// This weight scaled by `percent` / 100.
    pub fn percent(self, percent: u32) -> Weight {
        Weight(self.0 * f64::from(percent) / 100.0)
    }

    /// This weight scaled by a likelihood in `0.0..=1.0`.
    pub fn scale(self, likelihood: f64) -> Weight {
        Weight(self.0 * likelihood)
    }

    /// Whether the weight is zero.
    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }

    /// Compare two weights with a relative tolerance.
    pub fn approx_eq(self, other: Weight) -> bool {
        let diff = (self.0 - other.0).abs();
        diff <= 0.001 * self.0.abs().max(other.0.abs()).max(1.0)
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0 / Weight::UNITY.0)
    }
}

// ============================================================================
// Jumps and Edges
// ============================================================================

/// How control leaves a block.
#[derive(Debug, Clone, PartialEq)]
pub enum JumpKind {
    /// Method return.
    Return,
    /// Throw; no successors.
    Throw,
    /// Unconditional jump (or fall through) to the target.
    Always(BlockId),
    /// Two-way branch on the block's final `JTRUE`.
    Cond {
        /// Target when the condition is true.
        taken: BlockId,
        /// Target when the condition is false.
        not_taken: BlockId,
        /// Probability of taking the true edge.
        taken_likelihood: f64,
    },
    /// Multi-way branch; all targets are equally likely.
    Switch(Vec<BlockId>),
}

impl JumpKind {
    /// A conditional jump with the given likelihood of taking `taken`.
    pub fn cond(taken: BlockId, not_taken: BlockId, taken_likelihood: f64) -> Self {
        JumpKind::Cond {
            taken,
            not_taken,
            taken_likelihood,
        }
    }

    /// Successors in order, with duplicates when two edges share a target.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            JumpKind::Return | JumpKind::Throw => Vec::new(),
            JumpKind::Always(target) => vec![*target],
            JumpKind::Cond { taken, not_taken, .. } => vec![*taken, *not_taken],
            JumpKind::Switch(targets) => targets.clone(),
        }
    }

    /// Successors paired with the likelihood of each edge.
    pub fn successor_likelihoods(&self) -> Vec<(BlockId, f64)> {
        match self {
            JumpKind::Return | JumpKind::Throw => Vec::new(),
            JumpKind::Always(target) => vec![(*target, 1.0)],
            JumpKind::Cond {
                taken,
                not_taken,
                taken_likelihood,
            } => vec![(*taken, *taken_likelihood), (*not_taken, 1.0 - *taken_likelihood)],
            JumpKind::Switch(targets) => {
                let each = 1.0 / targets.len().max(1) as f64;
                targets.iter().map(|t| (*t, each)).collect()
            }
        }
    }

    /// Replace every occurrence of `from` among the targets with `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        let fix = |b: &mut BlockId| {
            if *b == from {
                *b = to;
            }
        };
        match self {
            JumpKind::Return | JumpKind::Throw => {}
            JumpKind::Always(target) => fix(target),
            JumpKind::Cond { taken, not_taken, .. } => {
                fix(taken);
                fix(not_taken);
            }
            JumpKind::Switch(targets) => targets.iter_mut().for_each(fix),
        }
    }

    /// Dump name.
    pub fn name(&self) -> &'static str {
        match self {
            JumpKind::Return => "return",
            JumpKind::Throw => "throw",
            JumpKind::Always(_) => "always",
            JumpKind::Cond { .. } => "cond",
            JumpKind::Switch(_) => "switch",
        }
    }
}

/// A predecessor edge stored on the target block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEdge {
    /// The predecessor block.
    pub source: BlockId,
    /// How many of the source's jump targets lead here.
    pub dup_count: u32,
}

bitflags! {
    /// Per-block flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u16 {
        /// Created by the JIT rather than imported.
        const INTERNAL = 1 << 0;
        /// Expected to (almost) never execute.
        const RUN_RARELY = 1 << 1;
        /// Imported from IL.
        const IMPORTED = 1 << 2;
        /// Contains a GC safe point (a call).
        const GC_SAFE_POINT = 1 << 3;
        /// Loop pre-header.
        const LOOP_PREHEADER = 1 << 4;
        /// Contains a call.
        const HAS_CALL = 1 << 5;
        /// Weight comes from profile data.
        const PROF_WEIGHT = 1 << 6;
        /// Contains an explicit null check.
        const HAS_NULLCHECK = 1 << 7;
        /// Target of a backward jump.
        const BACKWARD_JUMP = 1 << 8;
        /// Must not be removed by flow graph cleanup.
        const DONT_REMOVE = 1 << 9;
        /// Ends in a jump-to-method.
        const HAS_JMP = 1 << 10;

        /// Flags the tail half of a split block receives.
        const SPLIT_GAINED = Self::DONT_REMOVE.bits()
            | Self::BACKWARD_JUMP.bits()
            | Self::PROF_WEIGHT.bits()
            | Self::HAS_NULLCHECK.bits()
            | Self::HAS_JMP.bits()
            | Self::HAS_CALL.bits();
        /// Flags the head half of a split block gives up.
        const SPLIT_LOST = Self::GC_SAFE_POINT.bits() | Self::HAS_JMP.bits();
    }
}

impl Default for BlockFlags {
    fn default() -> Self {
        BlockFlags::empty()
    }
}

/// A basic block.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Display number, assigned in layout order by renumbering.
    pub num: u32,
    /// Statements in execution order.
    pub statements: Vec<StmtId>,
    /// How control leaves the block.
    pub jump: JumpKind,
    /// Predecessor edges.
    pub preds: Vec<FlowEdge>,
    /// Estimated execution weight.
    pub weight: Weight,
    /// Innermost EH try region containing the block.
    pub eh_region: Option<EhRegionId>,
    /// Innermost loop containing the block.
    pub loop_num: Option<LoopId>,
    /// Flags.
    pub flags: BlockFlags,
}

impl BasicBlock {
    /// Create an empty block that returns.
    pub fn new(num: u32) -> Self {
        Self {
            num,
            statements: Vec::new(),
            jump: JumpKind::Return,
            preds: Vec::new(),
            weight: Weight::UNITY,
            eh_region: None,
            loop_num: None,
            flags: BlockFlags::empty(),
        }
    }

    /// Whether the block is expected to run rarely.
    pub fn is_run_rarely(&self) -> bool {
        self.flags.contains(BlockFlags::RUN_RARELY)
    }

    /// Mark the block rarely run with zero weight.
    pub fn set_run_rarely(&mut self) {
        self.flags |= BlockFlags::RUN_RARELY;
        self.weight = Weight::ZERO;
    }

    /// Copy the weight (and rarity) of another block.
    pub fn inherit_weight(&mut self, other: &BasicBlock) {
        self.weight = other.weight;
        self.flags.set(BlockFlags::RUN_RARELY, other.is_run_rarely());
        self.flags
            .set(BlockFlags::PROF_WEIGHT, other.flags.contains(BlockFlags::PROF_WEIGHT));
    }

    /// Take `percent`% of another block's weight.
    pub fn inherit_weight_percentage(&mut self, other: &BasicBlock, percent: u32) {
        self.weight = other.weight.percent(percent);
        self.flags
            .set(BlockFlags::PROF_WEIGHT, other.flags.contains(BlockFlags::PROF_WEIGHT));
        self.flags.set(BlockFlags::RUN_RARELY, self.weight.is_zero());
    }

    /// Total number of incoming edges, counting duplicates.
    pub fn pred_count(&self) -> u32 {
        self.preds.iter().map(|e| e.dup_count).sum()
    }

    /// The predecessor edge from `source`, if any.
    pub fn pred_edge(&self, source: BlockId) -> Option<&FlowEdge> {
        self.preds.iter().find(|e| e.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cond_successors_and_likelihoods() {
        let jump = JumpKind::cond(BlockId::new(2), BlockId::new(3), 0.8);
        assert_eq!(jump.successors(), vec![BlockId::new(2), BlockId::new(3)]);
        let likelihoods = jump.successor_likelihoods();
        assert_eq!(likelihoods[0], (BlockId::new(2), 0.8));
        assert!((likelihoods[1].1 - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_retarget_switch() {
        let mut jump = JumpKind::Switch(vec![BlockId::new(1), BlockId::new(2), BlockId::new(1)]);
        jump.retarget(BlockId::new(1), BlockId::new(5));
        assert_eq!(
            jump.successors(),
            vec![BlockId::new(5), BlockId::new(2), BlockId::new(5)]
        );
    }

    #[test]
    fn test_weight_percent() {
        assert_eq!(Weight::UNITY.percent(80), Weight(80.0));
        assert!(Weight(64.0).approx_eq(Weight::UNITY.percent(80).percent(80)));
        assert_eq!(Weight::UNITY.to_string(), "1.00");
    }

    #[test]
    fn test_inherit_weight_percentage_zero_is_rare() {
        let mut host = BasicBlock::new(1);
        host.weight = Weight(50.0);
        let mut block = BasicBlock::new(2);
        block.inherit_weight_percentage(&host, 0);
        assert!(block.is_run_rarely());
        block.inherit_weight_percentage(&host, 20);
        assert!(!block.is_run_rarely());
        assert_eq!(block.weight, Weight(10.0));
    }

    #[test]
    fn test_split_flag_sets() {
        assert!(BlockFlags::SPLIT_GAINED.contains(BlockFlags::PROF_WEIGHT));
        assert!(BlockFlags::SPLIT_LOST.contains(BlockFlags::GC_SAFE_POINT));
    }
}
