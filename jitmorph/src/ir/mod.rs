//! # Method IR
//!
//! The tree-based intermediate representation the mid-end phases operate on.
//!
//! ## Structure
//!
//! ```text
//! MethodBody
//! ├── blocks: BasicBlock (statements, jump, preds, weight, EH region)
//! │   └── statements: Statement (root node, execution order)
//! │       └── nodes: Node (operator, type, flags, operand ids)
//! ├── locals: LclVarDsc (type, size, address-exposed, promotion links)
//! └── layouts: ClassLayout (struct size and GC shape)
//! ```
//!
//! All entities live in arenas owned by the [`MethodBody`] and refer to each
//! other by id.

pub mod block;
pub mod body;
pub mod builder;
pub mod call;
mod display;
pub mod local;
pub mod node;
pub mod stmt;
pub mod types;

pub use block::{BasicBlock, BlockFlags, BlockId, EhRegionId, FlowEdge, JumpKind, LoopId, Weight};
pub use body::{MethodBody, MethodFlags};
pub use builder::MethodBuilder;
pub use call::{ArgKind, CallArg, CallNode, CallTarget, ExpansionCandidate, Helper, Intrinsic};
pub use local::{DoNotEnregisterReason, LclVarDsc, LocalId, LocalTable};
pub use node::{BinOp, HandleKind, Node, NodeFlags, NodeId, NodeKind, PhysReg, SideEffects, UnOp};
pub use stmt::{NodeUse, Statement, StmtId};
pub use types::{
    ClassHandle, ClassLayout, GcSlot, LayoutId, MethodHandle, SigHandle, StringHandle, VarType,
    MAX_LCL_FIELD_OFFSET, TARGET_POINTER_SIZE,
};
