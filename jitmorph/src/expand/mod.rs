//! # Helper Call Expansion
//!
//! Rewrites calls to expensive runtime helpers into inline fast paths guarded
//! by cheap checks, keeping the call as a fallback:
//!
//! ```text
//! prev:     ...                          prev:     ...
//!           x = CALL helper(args)   ==>  cond:     if (!fast_ok) goto fallback
//!           ...                          fastPath: tmp = <inline>; goto tail
//!                                        fallback: tmp = CALL helper(args)
//!                                        tail:     x = tmp
//!                                                  ...
//! ```
//!
//! Four expansions share one driver ([`HelperExpander::run`]):
//!
//! | Kind | Helpers | Fast path |
//! |------|---------|-----------|
//! | [`ExpansionKind::StaticInit`] | static base, class init | class init flag test |
//! | [`ExpansionKind::RuntimeLookup`] | generic handle lookups | dictionary pointer chase |
//! | [`ExpansionKind::ThreadLocal`] | thread static base | TLS block array read |
//! | [`ExpansionKind::ReadUtf8`] | UTF-16 literal to UTF-8 intrinsic | unrolled constant stores |
//!
//! The driver visits blocks in layout order and calls in execution order.
//! After a successful expansion it continues in the tail block, which holds
//! the rest of the statement and the statements after it. Every expansion
//! clears the call's candidate marker, so a block never expands twice.

pub mod read_utf8;
pub mod runtime;
pub mod runtime_lookup;
pub mod static_init;
pub mod thread_local;

use std::fmt;

use tracing::{debug, debug_span, trace};

use crate::config::JitConfig;
use crate::error::{JitError, JitResult};
use crate::ir::{
    BinOp, BlockFlags, BlockId, CallNode, ExpansionCandidate, Intrinsic, LocalId, MethodBody,
    MethodFlags, NodeId, NodeUse, StmtId, VarType, Weight,
};
use crate::phase::PhaseStatus;

pub use runtime::{
    ClassInitFlag, InitFlagKind, LookupRecipeMap, MockRuntime, RuntimeInterface,
    RuntimeLookupRecipe, ThreadStaticBlocksInfo, TlsBaseKind,
};

/// The helper expansions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpansionKind {
    /// Static base / class init helpers.
    StaticInit,
    /// Generic dictionary lookups.
    RuntimeLookup,
    /// Thread static base helpers.
    ThreadLocal,
    /// UTF-16 literal to UTF-8 reads.
    ReadUtf8,
}

impl ExpansionKind {
    /// All kinds, in the order the compiler runs them.
    pub const ALL: [ExpansionKind; 4] = [
        ExpansionKind::RuntimeLookup,
        ExpansionKind::StaticInit,
        ExpansionKind::ThreadLocal,
        ExpansionKind::ReadUtf8,
    ];

    /// Phase name.
    pub fn name(self) -> &'static str {
        match self {
            ExpansionKind::StaticInit => "expand_static_init",
            ExpansionKind::RuntimeLookup => "expand_runtime_lookups",
            ExpansionKind::ThreadLocal => "expand_thread_locals",
            ExpansionKind::ReadUtf8 => "expand_read_utf8",
        }
    }

    /// The importer fact saying a candidate may exist.
    fn method_flag(self) -> MethodFlags {
        match self {
            ExpansionKind::StaticInit => MethodFlags::HAS_STATIC_INIT,
            ExpansionKind::RuntimeLookup => MethodFlags::HAS_RUNTIME_LOOKUP,
            ExpansionKind::ThreadLocal => MethodFlags::HAS_TLS_ACCESS,
            ExpansionKind::ReadUtf8 => MethodFlags::HAS_SPECIAL_INTRINSICS,
        }
    }

    /// Whether `call` is a candidate of this kind.
    pub fn accepts(self, call: &CallNode) -> bool {
        match (self, call.candidate) {
            (ExpansionKind::StaticInit, Some(ExpansionCandidate::StaticInit { .. })) => {
                call.helper().is_some_and(|h| h.is_static_init())
            }
            (ExpansionKind::RuntimeLookup, Some(ExpansionCandidate::RuntimeLookup)) => {
                call.helper().is_some_and(|h| h.is_runtime_lookup())
            }
            (ExpansionKind::ThreadLocal, Some(ExpansionCandidate::ThreadStatic)) => {
                call.helper().is_some_and(|h| h.is_thread_static())
            }
            (ExpansionKind::ReadUtf8, Some(ExpansionCandidate::ReadUtf8)) => {
                call.intrinsic() == Some(Intrinsic::ReadUtf8)
            }
            _ => false,
        }
    }
}

impl fmt::Display for ExpansionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counters collected across expansion phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpansionStats {
    /// Static init checks expanded.
    pub static_init: usize,
    /// Runtime lookups expanded.
    pub runtime_lookup: usize,
    /// Thread static accesses expanded.
    pub thread_local: usize,
    /// UTF-8 literal reads unrolled.
    pub read_utf8: usize,
    /// Candidates left as plain calls.
    pub declined: usize,
    /// Blocks created.
    pub blocks_added: usize,
}

impl ExpansionStats {
    /// Total expansions performed.
    pub fn expanded(&self) -> usize {
        self.static_init + self.runtime_lookup + self.thread_local + self.read_utf8
    }

    fn record(&mut self, kind: ExpansionKind) {
        match kind {
            ExpansionKind::StaticInit => self.static_init += 1,
            ExpansionKind::RuntimeLookup => self.runtime_lookup += 1,
            ExpansionKind::ThreadLocal => self.thread_local += 1,
            ExpansionKind::ReadUtf8 => self.read_utf8 += 1,
        }
    }
}

/// Runs helper expansions over one method.
pub struct HelperExpander<'a> {
    pub(crate) body: &'a mut MethodBody,
    pub(crate) config: &'a JitConfig,
    pub(crate) runtime: &'a dyn RuntimeInterface,
    pub(crate) recipes: &'a LookupRecipeMap,
    stats: ExpansionStats,
}

impl<'a> HelperExpander<'a> {
    /// Create an expander.
    pub fn new(
        body: &'a mut MethodBody,
        config: &'a JitConfig,
        runtime: &'a dyn RuntimeInterface,
        recipes: &'a LookupRecipeMap,
    ) -> Self {
        Self {
            body,
            config,
            runtime,
            recipes,
            stats: ExpansionStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> ExpansionStats {
        self.stats
    }

    /// Whether expansions of `kind` may run for this method.
    pub fn is_enabled(&self, kind: ExpansionKind) -> bool {
        if !self.body.flags.contains(kind.method_flag()) {
            return false;
        }
        let expansion = &self.config.expansion;
        let switch = match kind {
            ExpansionKind::StaticInit => expansion.static_init,
            ExpansionKind::RuntimeLookup => expansion.runtime_lookup,
            ExpansionKind::ThreadLocal => expansion.thread_local,
            ExpansionKind::ReadUtf8 => expansion.read_utf8,
        };
        // Runtime lookups are expanded even without optimizations.
        switch && (kind == ExpansionKind::RuntimeLookup || self.config.opt_level.opts_enabled())
    }

    /// Expand every candidate of `kind`, then bring the flow graph's derived
    /// data up to date if anything changed.
    pub fn run(&mut self, kind: ExpansionKind) -> JitResult<PhaseStatus> {
        let _span = debug_span!("expand", kind = kind.name()).entered();
        if !self.is_enabled(kind) {
            trace!("nothing to expand");
            return Ok(PhaseStatus::ModifiedNothing);
        }

        let expanded = self.expand_helper(kind)?;
        if expanded > 0 {
            self.body.update_after_expansion(self.config.profile_enabled);
            debug!(expanded, "helper calls expanded");
        }
        Ok(PhaseStatus::from_changed(expanded > 0))
    }

    fn expand_helper(&mut self, kind: ExpansionKind) -> JitResult<usize> {
        let skip_rarely_run =
            self.config.expansion.skip_rarely_run && kind != ExpansionKind::RuntimeLookup;
        let mut expanded = 0;
        let blocks_before = self.body.layout.len();

        // Blocks created by an expansion are reached through the tail
        // returned by it; the rest hold no candidates.
        for block in self.body.layout.clone() {
            if skip_rarely_run && self.body.block(block).is_run_rarely() {
                continue;
            }
            let mut current = block;
            while let Some(tail) = self.expand_in_block(kind, current)? {
                expanded += 1;
                self.stats.record(kind);
                current = tail;
            }
        }
        self.stats.blocks_added += self.body.layout.len() - blocks_before;
        Ok(expanded)
    }

    /// Expand the first expandable candidate of `block`, returning the
    /// block to continue in.
    fn expand_in_block(&mut self, kind: ExpansionKind, block: BlockId) -> JitResult<Option<BlockId>> {
        for stmt in self.body.block(block).statements.clone() {
            if !self.body.contains_call(self.body.stmt(stmt).root) {
                continue;
            }
            for call in self.body.calls_in_stmt(stmt) {
                let accepted = self
                    .body
                    .node(call)
                    .as_call()
                    .is_some_and(|c| kind.accepts(c));
                if !accepted {
                    continue;
                }
                let tail = match kind {
                    ExpansionKind::StaticInit => self.expand_static_init(block, stmt, call)?,
                    ExpansionKind::RuntimeLookup => self.expand_runtime_lookup(block, stmt, call)?,
                    ExpansionKind::ThreadLocal => self.expand_thread_local(block, stmt, call)?,
                    ExpansionKind::ReadUtf8 => self.expand_read_utf8(block, stmt, call)?,
                };
                if tail.is_some() {
                    return Ok(tail);
                }
            }
        }
        Ok(None)
    }

    // ========================================================================
    // Shared building blocks
    // ========================================================================

    /// Log and count a candidate that stays a call.
    pub(crate) fn decline(&mut self, call: NodeId, reason: &str) -> JitResult<Option<BlockId>> {
        debug!(call = %call, reason, "expansion declined");
        self.stats.declined += 1;
        Ok(None)
    }

    /// Clear the candidate marker so the call is never expanded again.
    pub(crate) fn clear_candidate(&mut self, call: NodeId) {
        if let Some(c) = self.body.node_mut(call).as_call_mut() {
            c.candidate = None;
        }
    }

    /// Create a block after `after` for an expansion of a call in `host`.
    pub(crate) fn new_block(&mut self, after: BlockId, host: BlockId) -> JitResult<BlockId> {
        let block = self.body.new_block_after(after);
        let (expected, loop_num) = {
            let h = self.body.block(host);
            (h.eh_region, h.loop_num)
        };
        let found = self.body.block(block).eh_region;
        if found != expected {
            return Err(JitError::EhRegionMismatch {
                block,
                expected,
                found,
            });
        }
        self.body.block_mut(block).loop_num = loop_num;
        Ok(block)
    }

    /// Append a statement rooted at `root` to `block`.
    pub(crate) fn append(&mut self, block: BlockId, root: NodeId, il_offset: Option<u32>) -> StmtId {
        let stmt = self.body.new_stmt(root, il_offset);
        self.body.append_stmt(block, stmt);
        if self.body.contains_call(root) {
            self.body.block_mut(block).flags |= BlockFlags::HAS_CALL | BlockFlags::GC_SAFE_POINT;
        }
        stmt
    }

    /// Give `block` `percent`% of `source`'s weight.
    pub(crate) fn set_weight_percent(&mut self, block: BlockId, source: BlockId, percent: u32) {
        let (weight, prof) = {
            let s = self.body.block(source);
            (s.weight, s.flags.contains(BlockFlags::PROF_WEIGHT))
        };
        self.set_weight(block, weight.percent(percent));
        self.body.block_mut(block).flags.set(BlockFlags::PROF_WEIGHT, prof);
    }

    /// `lcl + offset` as an address expression.
    pub(crate) fn local_offset_addr(&mut self, lcl: LocalId, offset: u32) -> NodeId {
        let base = self.body.new_lcl_var(lcl);
        let offset = self.body.new_icon(i64::from(offset), VarType::NativeInt);
        self.body.new_oper(BinOp::Add, VarType::NativeInt, base, offset)
    }

    /// Set a block's weight; zero makes it rarely run.
    pub(crate) fn set_weight(&mut self, block: BlockId, weight: Weight) {
        let b = self.body.block_mut(block);
        b.weight = weight;
        b.flags.set(BlockFlags::RUN_RARELY, weight.is_zero());
    }

    /// Make the slot that held the call in `stmt` use `value` instead, or
    /// drop the statement when the call's value was unused.
    pub(crate) fn replace_call_use(
        &mut self,
        tail: BlockId,
        stmt: StmtId,
        call_use: NodeUse,
        value: Option<NodeId>,
    ) {
        match call_use {
            NodeUse::Root(_) => self.body.remove_stmt(tail, stmt),
            NodeUse::Operand { .. } => {
                let value = match value {
                    Some(value) => value,
                    None => self.body.new_nop(),
                };
                self.body.replace_use(call_use, value);
                self.body.sequence(stmt);
            }
        }
    }
}
