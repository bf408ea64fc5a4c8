//! # Compiler Context
//!
//! One method's compilation through the mid-end slice:
//!
//! ```text
//! MethodBody -> local_address -> expand_runtime_lookups -> expand_static_init
//!            -> expand_thread_locals -> expand_read_utf8 -> MethodBody
//! ```
//!
//! The [`Compiler`] owns the IR, the configuration and the runtime
//! interface. Each phase runs inside a `phase` span and, when
//! `check_flow_graph` is on, is followed by a full flow graph check.

use std::time::Instant;

use tracing::{debug, debug_span, info};

use crate::config::JitConfig;
use crate::error::JitResult;
use crate::expand::{
    ExpansionKind, ExpansionStats, HelperExpander, LookupRecipeMap, RuntimeInterface,
};
use crate::flowgraph::validate::check_flow_graph;
use crate::ir::MethodBody;
use crate::local_morph::{local_address_phase, LocalMorphStats};
use crate::phase::PhaseStatus;

/// Counters for a whole compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub local_morph: LocalMorphStats,
    pub expansion: ExpansionStats,
    /// Phases that reported a modification.
    pub phases_modified: usize,
}

/// Per-method compilation context.
pub struct Compiler {
    body: MethodBody,
    config: JitConfig,
    runtime: Box<dyn RuntimeInterface>,
    lookup_recipes: LookupRecipeMap,
    stats: CompileStats,
}

impl Compiler {
    /// Create a context for `body`.
    pub fn new(body: MethodBody, config: JitConfig, runtime: Box<dyn RuntimeInterface>) -> Self {
        Self {
            body,
            config,
            runtime,
            lookup_recipes: LookupRecipeMap::new(),
            stats: CompileStats::default(),
        }
    }

    /// Attach the runtime lookup recipes collected by the importer.
    pub fn with_lookup_recipes(mut self, recipes: LookupRecipeMap) -> Self {
        self.lookup_recipes = recipes;
        self
    }

    /// The IR being compiled.
    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    /// Mutable access to the IR, for callers adding statements between phases.
    pub fn body_mut(&mut self) -> &mut MethodBody {
        &mut self.body
    }

    /// The configuration this compilation runs with.
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// The lookup recipes, for registering signatures after construction.
    pub fn lookup_recipes_mut(&mut self) -> &mut LookupRecipeMap {
        &mut self.lookup_recipes
    }

    /// Counters accumulated by the phases run so far.
    pub fn stats(&self) -> CompileStats {
        self.stats
    }

    /// Give back the rewritten IR.
    pub fn into_body(self) -> MethodBody {
        self.body
    }

    /// Run every phase of the slice in order.
    pub fn compile(&mut self) -> JitResult<PhaseStatus> {
        let started = Instant::now();
        let mut modified = self.local_address_phase()?.is_modified();
        for kind in ExpansionKind::ALL {
            modified |= self.expansion_phase(kind)?.is_modified();
        }
        info!(
            method = self.body.method.0,
            blocks = self.body.layout.len(),
            exposed = self.stats.local_morph.exposed_locals,
            expanded = self.stats.expansion.expanded(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "method compiled"
        );
        Ok(PhaseStatus::from_changed(modified))
    }

    /// Local address / escape analysis.
    pub fn local_address_phase(&mut self) -> JitResult<PhaseStatus> {
        self.run_phase("local_address", |compiler| {
            let (status, stats) =
                local_address_phase(&mut compiler.body, &compiler.config.local_morph)?;
            compiler.stats.local_morph = stats;
            Ok(status)
        })
    }

    /// One helper expansion phase.
    pub fn expansion_phase(&mut self, kind: ExpansionKind) -> JitResult<PhaseStatus> {
        self.run_phase(kind.name(), |compiler| {
            let mut expander = HelperExpander::new(
                &mut compiler.body,
                &compiler.config,
                compiler.runtime.as_ref(),
                &compiler.lookup_recipes,
            );
            let status = expander.run(kind)?;
            let stats = expander.stats();

            let total = &mut compiler.stats.expansion;
            total.static_init += stats.static_init;
            total.runtime_lookup += stats.runtime_lookup;
            total.thread_local += stats.thread_local;
            total.read_utf8 += stats.read_utf8;
            total.declined += stats.declined;
            total.blocks_added += stats.blocks_added;
            Ok(status)
        })
    }

    fn run_phase(
        &mut self,
        name: &'static str,
        phase: impl FnOnce(&mut Self) -> JitResult<PhaseStatus>,
    ) -> JitResult<PhaseStatus> {
        let _span = debug_span!("phase", name).entered();
        let status = phase(self)?;
        debug!(%status, "phase finished");

        if status.is_modified() {
            self.stats.phases_modified += 1;
        }
        if self.config.check_flow_graph {
            check_flow_graph(&self.body, self.config.profile_enabled)?;
        }
        Ok(status)
    }
}
