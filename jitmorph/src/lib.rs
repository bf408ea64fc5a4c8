//! # jitmorph
//!
//! Mid-end passes of a method JIT, operating on a tree-based IR:
//!
//! 1. **Local address analysis** ([`local_morph`]) - decides which locals
//!    have their address taken and folds `IND(ADDR(local))` patterns into
//!    direct local accesses.
//! 2. **Helper call expansion** ([`expand`]) - replaces calls to runtime
//!    helpers with guarded inline fast paths, splitting the flow graph
//!    around the call and keeping the helper as a fallback.
//!
//! ## Pipeline
//!
//! ```text
//! MethodBody -> local_address -> expand_* (x4) -> MethodBody
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use jitmorph::config::JitConfig;
//! use jitmorph::expand::MockRuntime;
//! use jitmorph::ir::{MethodBuilder, MethodHandle, VarType};
//! use jitmorph::Compiler;
//!
//! let mut builder = MethodBuilder::new(MethodHandle(1));
//! let lcl = builder.body().locals.new_local(VarType::Int);
//! let addr = builder.body().new_lcl_addr(lcl, 0);
//! let load = builder.body().new_ind(VarType::Int, addr);
//! let ret = builder.body().new_return(Some(load));
//! builder.add_stmt(ret);
//!
//! let config = JitConfig::default();
//! let mut compiler = Compiler::new(builder.finish(), config, Box::new(MockRuntime::new()));
//! compiler.compile().unwrap();
//!
//! // The load became a plain read of the local, which stays unexposed.
//! assert!(!compiler.body().locals.get(lcl).is_address_exposed());
//! ```
//!
//! ## Module Overview
//!
//! - [`arena`] - Typed-id arenas backing the IR
//! - [`ir`] - Nodes, statements, blocks, locals and the method body
//! - [`flowgraph`] - Block creation, splitting, predecessor and weight upkeep
//! - [`local_morph`] - Local address / escape analysis
//! - [`expand`] - Helper call expansions and the runtime interface
//! - [`compiler`] - Per-method phase runner
//! - [`config`] - Configuration (TOML and `JITMORPH_*` variables)
//! - [`logging`] - Tracing subscriber setup
//! - [`error`] - Error types

pub mod arena;
pub mod compiler;
pub mod config;
pub mod error;
pub mod expand;
pub mod flowgraph;
pub mod ir;
pub mod local_morph;
pub mod logging;
pub mod phase;

pub use compiler::{CompileStats, Compiler};
pub use config::{JitConfig, OptLevel};
pub use error::{ConfigError, JitError, JitResult};
pub use expand::{ExpansionKind, ExpansionStats, HelperExpander, MockRuntime, RuntimeInterface};
pub use ir::MethodBody;
pub use local_morph::{local_address_phase, LocalMorphStats};
pub use phase::PhaseStatus;
