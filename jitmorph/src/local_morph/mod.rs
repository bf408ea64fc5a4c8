//! # Local Address Analysis
//!
//! Decides, for every local slot, whether its address escapes, and rewrites
//! indirections through local addresses into direct local accesses.
//!
//! ## Purpose
//!
//! The importer produces trees like `IND<int>(FIELD_ADDR(LCL_ADDR V02, 8))`
//! for a field read of a struct local. Left alone, the `LCL_ADDR` would force
//! `V02` onto the stack and make every access to it an aliasable memory
//! operation. This phase recognizes that the address never leaves the tree
//! and turns the whole pattern into `LCL_FLD<int> V02 [+8]`.
//!
//! ## Algorithm
//!
//! Each statement is walked in execution order with a stack of [`Value`]s.
//! Every node pushes `Unknown` before its operands are visited; after them,
//! its entry is refined and its operands' entries are consumed:
//!
//! | Node | Operand values | Result |
//! |------|----------------|--------|
//! | `LCL_VAR`/`LCL_FLD` | - | `Location(lcl, offs)` |
//! | `LCL_ADDR` | - | `Address(lcl, offs)` |
//! | `ADD(a, CNS)`/`FIELD_ADDR(a)` | `a` is `Address` | `Address(lcl, offs + c)` |
//! | `IND`/`BLK(a)` | `a` is `Address` | `Location(lcl, offs)` |
//! | `STOREIND`/`STORE_BLK(a, v)` | `a` is `Address` | realized store |
//! | anything else | any | operands escape |
//!
//! An escaping `Address` exposes its local and is normalized to `LCL_ADDR`.
//! An escaping `Location` is realized as a direct local access when the
//! access fits inside the local, otherwise the local is exposed and the
//! memory operation stays.
//!
//! The address-exposed flag is monotonic: the phase can set it but never
//! clears it.

mod indir;
pub mod value;
mod visitor;

use tracing::{debug, debug_span};

use crate::config::LocalMorphConfig;
use crate::error::JitResult;
use crate::ir::MethodBody;
use crate::phase::PhaseStatus;

pub use value::{Value, ValueKind};
use visitor::LocalAddressVisitor;

/// Counters collected by one run of the phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalMorphStats {
    /// Statements visited.
    pub statements: usize,
    /// Statements whose trees were rewritten.
    pub statements_modified: usize,
    /// Locals newly marked address-exposed.
    pub exposed_locals: usize,
    /// Hidden return buffers recorded as defined by their call.
    pub retbuf_defs: usize,
    /// Indirections replaced by whole-local accesses.
    pub eliminated_indirs: usize,
    /// Indirections replaced by local field accesses.
    pub field_accesses: usize,
    /// Indirections replaced by promoted field accesses.
    pub promoted_field_accesses: usize,
    /// Indirections replaced by bitcasts of the local.
    pub bitcasts: usize,
    /// Indirections replaced by narrowing casts of the local.
    pub narrow_casts: usize,
    /// Indirections kept because they do not fit the local.
    pub wide_indirs: usize,
}

/// Run local address analysis over every statement of the method.
///
/// Returns [`PhaseStatus::ModifiedEverything`] if any tree changed or any
/// local became address-exposed.
pub fn local_address_phase(
    body: &mut MethodBody,
    config: &LocalMorphConfig,
) -> JitResult<(PhaseStatus, LocalMorphStats)> {
    let _span = debug_span!("local_morph", method = body.method.0).entered();

    let mut visitor = LocalAddressVisitor::new(body, config);
    for block in visitor.body().layout.clone() {
        for stmt in visitor.body().block(block).statements.clone() {
            visitor.visit_stmt(stmt)?;
        }
    }
    let (changed, stats) = visitor.finish();

    debug!(
        exposed = stats.exposed_locals,
        eliminated = stats.eliminated_indirs,
        fields = stats.field_accesses,
        "local address analysis done"
    );
    Ok((PhaseStatus::from_changed(changed), stats))
}
