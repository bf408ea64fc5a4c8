//! Flow graph validation.
//!
//! Checks a method body for structural consistency after a phase, catching
//! broken edits right where they happen instead of in a later consumer.
//!
//! Checks performed:
//!
//! 1. The layout is non-empty and lists every block at most once.
//! 2. Every jump target is a block in the layout.
//! 3. Predecessor lists match the jumps exactly, duplicates included.
//! 4. Conditional jumps end in a `JTRUE` statement and have a likelihood in
//!    `0.0..=1.0`.
//! 5. With profile data: block weights match the weight flowing in over
//!    forward edges (see [`check_profile`]).

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{JitError, JitResult};
use crate::ir::{BlockId, JumpKind, MethodBody, NodeKind, Weight};

/// Results from flow graph validation.
#[derive(Debug, Default)]
pub struct ValidationResults {
    /// Structural errors.
    pub errors: Vec<String>,
    /// Suspicious but legal states (unreachable blocks, weight drift).
    pub warnings: Vec<String>,
}

impl ValidationResults {
    /// Whether no errors were found.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn errors into a [`JitError::Validation`].
    pub fn into_result(self) -> JitResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(JitError::Validation(self.errors))
        }
    }
}

/// Validate a method body's flow graph.
pub fn validate_flow_graph(body: &MethodBody, check_weights: bool) -> ValidationResults {
    let mut results = ValidationResults::default();

    // Check 1: layout
    if body.layout.is_empty() {
        results.errors.push("method has no blocks".to_string());
        return results;
    }
    let mut in_layout = FxHashSet::default();
    for &block in &body.layout {
        if !in_layout.insert(block) {
            results
                .errors
                .push(format!("{} appears twice in the layout", name(body, block)));
        }
    }

    // Check 2: jump targets
    for &block in &body.layout {
        for succ in body.block(block).jump.successors() {
            if !in_layout.contains(&succ) {
                results.errors.push(format!(
                    "{} jumps to {} which is not in the layout",
                    name(body, block),
                    succ
                ));
            }
        }
    }

    // Check 3: predecessor lists
    check_preds(body, &mut results);

    // Check 4: conditional jumps
    for &block in &body.layout {
        let b = body.block(block);
        if let JumpKind::Cond { taken_likelihood, .. } = b.jump {
            if !(0.0..=1.0).contains(&taken_likelihood) {
                results.errors.push(format!(
                    "{} has likelihood {} outside 0..=1",
                    name(body, block),
                    taken_likelihood
                ));
            }
            let ends_in_jtrue = b
                .statements
                .last()
                .is_some_and(|s| matches!(body.node(body.stmt(*s).root).kind, NodeKind::JTrue { .. }));
            if !ends_in_jtrue {
                results.errors.push(format!(
                    "{} is a conditional block without a JTRUE",
                    name(body, block)
                ));
            }
        }
    }

    let reachable: FxHashSet<BlockId> = body.reverse_postorder().into_iter().collect();
    for &block in &body.layout {
        if !reachable.contains(&block) {
            results
                .warnings
                .push(format!("{} is unreachable", name(body, block)));
        }
    }

    // Check 5: weights
    if check_weights {
        results.errors.extend(check_profile(body));
    }

    results
}

/// Validate and convert errors into a [`JitError`].
pub fn check_flow_graph(body: &MethodBody, check_weights: bool) -> JitResult<()> {
    validate_flow_graph(body, check_weights).into_result()
}

fn check_preds(body: &MethodBody, results: &mut ValidationResults) {
    let mut expected: FxHashMap<(BlockId, BlockId), u32> = FxHashMap::default();
    for &block in &body.layout {
        for succ in body.block(block).jump.successors() {
            *expected.entry((succ, block)).or_insert(0) += 1;
        }
    }

    for &block in &body.layout {
        for edge in &body.block(block).preds {
            let want = expected.remove(&(block, edge.source)).unwrap_or(0);
            if want != edge.dup_count {
                results.errors.push(format!(
                    "{} records {} edge(s) from {} but the jump has {}",
                    name(body, block),
                    edge.dup_count,
                    name(body, edge.source),
                    want
                ));
            }
        }
    }

    for ((target, source), count) in expected {
        results.errors.push(format!(
            "{} jumps to {} ({} edge(s)) but is missing from its preds",
            name(body, source),
            name(body, target),
            count
        ));
    }
}

/// Check that each block's weight matches the weight flowing in over its
/// forward edges. Blocks reached by a back edge and the entry are skipped.
pub fn check_profile(body: &MethodBody) -> Vec<String> {
    let rpo = body.reverse_postorder();
    let mut order = FxHashMap::default();
    for (i, b) in rpo.iter().enumerate() {
        order.insert(*b, i);
    }

    let mut errors = Vec::new();
    for (i, &block) in rpo.iter().enumerate().skip(1) {
        let b = body.block(block);
        let mut incoming = 0.0;
        let mut has_back_edge = false;
        for edge in &b.preds {
            match order.get(&edge.source) {
                Some(&j) if j < i => {
                    let source = body.block(edge.source);
                    for (succ, likelihood) in source.jump.successor_likelihoods() {
                        if succ == block {
                            incoming += source.weight.0 * likelihood;
                        }
                    }
                }
                Some(_) => has_back_edge = true,
                None => {}
            }
        }
        if has_back_edge {
            continue;
        }
        if !b.weight.approx_eq(Weight(incoming)) {
            errors.push(format!(
                "{} has weight {} but {} flows in",
                name(body, block),
                b.weight,
                Weight(incoming)
            ));
        }
    }
    errors
}

fn name(body: &MethodBody, block: BlockId) -> String {
    format!("BB{:02}", body.block(block).num)
}
