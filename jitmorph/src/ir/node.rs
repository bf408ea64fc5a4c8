//! # Tree Nodes
//!
//! Expression trees are built from [`Node`] values stored in the method's
//! node arena. A node refers to its operands by [`NodeId`]; each node has
//! exactly one user (its parent, or the statement when it is a root).
//!
//! The operator set is closed. Transformations that change a node's operator
//! build a complete new [`Node`] and swap it into the existing slot, so the
//! parent's link stays valid.
//!
//! ## Operand Order
//!
//! Operands are evaluated left to right in the order returned by
//! [`NodeKind::operands`], and a node executes after all of its operands.
//! For calls the arguments come first and an indirect target last.

use bitflags::bitflags;

use crate::define_id;
use super::call::{CallNode, CallTarget};
use super::local::LocalId;
use super::types::{ClassHandle, LayoutId, MethodHandle, SigHandle, StringHandle, VarType};

define_id!(
    /// Handle of a tree node.
    pub struct NodeId, "N"
);

// ============================================================================
// Operators
// ============================================================================

/// Kind of runtime handle an integer constant stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// A class handle.
    Class(ClassHandle),
    /// A method handle.
    Method(MethodHandle),
    /// A generic lookup signature.
    Signature(SigHandle),
    /// Address of a frozen string object.
    String(StringHandle),
    /// Address of the statics block of a class.
    StaticBase(ClassHandle),
    /// Address of runtime data (flags, TLS indices).
    GlobalPtr,
    /// Other constant pointer.
    ConstPtr,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Lsh,
    Rsh,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    /// Whether this is a relational operator producing 0/1.
    pub fn is_compare(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    /// Dump name.
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "ADD",
            BinOp::Sub => "SUB",
            BinOp::Mul => "MUL",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Xor => "XOR",
            BinOp::Lsh => "LSH",
            BinOp::Rsh => "RSH",
            BinOp::Eq => "EQ",
            BinOp::Ne => "NE",
            BinOp::Lt => "LT",
            BinOp::Le => "LE",
            BinOp::Gt => "GT",
            BinOp::Ge => "GE",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

/// Physical registers readable as a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysReg {
    /// The OS thread pointer (e.g. `tpidr_el0`, `fs` base).
    ThreadPointer,
}

bitflags! {
    /// Per-node flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        /// Volatile memory access.
        const VOLATILE = 1 << 0;
        /// Memory access may be misaligned.
        const UNALIGNED = 1 << 1;
        /// Indirection cannot fault (address known non-null).
        const NONFAULTING = 1 << 2;
        /// Indirection reads memory that never changes.
        const INVARIANT = 1 << 3;
        /// Store that writes only part of its local.
        const PARTIAL_DEF = 1 << 4;
        /// Relop consumed directly by a conditional jump.
        const RELOP_JMP_USED = 1 << 5;
        /// Do not CSE this node.
        const DONT_CSE = 1 << 6;
        /// Cast from an unsigned source.
        const UNSIGNED = 1 << 7;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::empty()
    }
}

bitflags! {
    /// Side effects a tree may have.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SideEffects: u8 {
        /// Writes memory or a local.
        const ASSIGN = 1 << 0;
        /// Contains a call.
        const CALL = 1 << 1;
        /// May throw.
        const EXCEPT = 1 << 2;
        /// Reads global (aliasable) memory.
        const GLOB_REF = 1 << 3;
    }
}

impl Default for SideEffects {
    fn default() -> Self {
        SideEffects::empty()
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// Operator plus operands of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Integer constant, optionally a runtime handle.
    IntCon {
        value: i64,
        handle: Option<HandleKind>,
    },
    /// Floating constant.
    DblCon { value: f64 },
    /// Vector constant; `bytes.len()` matches the node type size.
    VecCon { bytes: Vec<u8> },
    /// Read of a whole local.
    LclVar { lcl: LocalId },
    /// Read of part of a local at a byte offset.
    LclFld {
        lcl: LocalId,
        offset: u16,
        layout: Option<LayoutId>,
    },
    /// Address of a local plus a byte offset.
    LclAddr { lcl: LocalId, offset: u16 },
    /// Store to a whole local.
    StoreLclVar { lcl: LocalId, value: NodeId },
    /// Store to part of a local.
    StoreLclFld {
        lcl: LocalId,
        offset: u16,
        layout: Option<LayoutId>,
        value: NodeId,
    },
    /// Load of the node type from memory.
    Ind { addr: NodeId },
    /// Load of a struct from memory.
    Blk { addr: NodeId, layout: LayoutId },
    /// Store of a primitive to memory.
    StoreInd { addr: NodeId, value: NodeId },
    /// Store of a struct to memory.
    StoreBlk {
        addr: NodeId,
        value: NodeId,
        layout: LayoutId,
    },
    /// Address of a field at `offset` inside the object `obj` points to.
    FieldAddr { obj: NodeId, offset: u32 },
    /// Binary arithmetic or comparison.
    Binary { op: BinOp, op1: NodeId, op2: NodeId },
    /// Unary arithmetic.
    Unary { op: UnOp, op1: NodeId },
    /// Numeric conversion to the node type.
    Cast { op1: NodeId },
    /// Reinterpretation of the operand's bits as the node type.
    BitCast { op1: NodeId },
    /// Evaluate `op1` for its side effects, then yield `op2`.
    Comma { op1: NodeId, op2: NodeId },
    /// Conditional jump on `cond`; targets come from the block.
    JTrue { cond: NodeId },
    /// Method return.
    Return { value: Option<NodeId> },
    /// Call.
    Call(Box<CallNode>),
    /// Read of a physical register.
    PhysReg(PhysReg),
    /// No operation.
    Nop,
}

impl NodeKind {
    /// Operands in evaluation order.
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeKind::IntCon { .. }
            | NodeKind::DblCon { .. }
            | NodeKind::VecCon { .. }
            | NodeKind::LclVar { .. }
            | NodeKind::LclFld { .. }
            | NodeKind::LclAddr { .. }
            | NodeKind::PhysReg(_)
            | NodeKind::Nop => Vec::new(),
            NodeKind::StoreLclVar { value, .. } | NodeKind::StoreLclFld { value, .. } => {
                vec![*value]
            }
            NodeKind::Ind { addr } | NodeKind::Blk { addr, .. } => vec![*addr],
            NodeKind::StoreInd { addr, value } | NodeKind::StoreBlk { addr, value, .. } => {
                vec![*addr, *value]
            }
            NodeKind::FieldAddr { obj, .. } => vec![*obj],
            NodeKind::Binary { op1, op2, .. } | NodeKind::Comma { op1, op2 } => vec![*op1, *op2],
            NodeKind::Unary { op1, .. } | NodeKind::Cast { op1 } | NodeKind::BitCast { op1 } => {
                vec![*op1]
            }
            NodeKind::JTrue { cond } => vec![*cond],
            NodeKind::Return { value } => value.iter().copied().collect(),
            NodeKind::Call(call) => {
                let mut ops: Vec<NodeId> = call.args.iter().map(|a| a.node).collect();
                if let CallTarget::Indirect(target) = call.target {
                    ops.push(target);
                }
                ops
            }
        }
    }

    /// Mutable operand slots, in the same order as [`NodeKind::operands`].
    pub fn operands_mut(&mut self) -> Vec<&mut NodeId> {
        match self {
            NodeKind::IntCon { .. }
            | NodeKind::DblCon { .. }
            | NodeKind::VecCon { .. }
            | NodeKind::LclVar { .. }
            | NodeKind::LclFld { .. }
            | NodeKind::LclAddr { .. }
            | NodeKind::PhysReg(_)
            | NodeKind::Nop => Vec::new(),
            NodeKind::StoreLclVar { value, .. } | NodeKind::StoreLclFld { value, .. } => {
                vec![value]
            }
            NodeKind::Ind { addr } | NodeKind::Blk { addr, .. } => vec![addr],
            NodeKind::StoreInd { addr, value } | NodeKind::StoreBlk { addr, value, .. } => {
                vec![addr, value]
            }
            NodeKind::FieldAddr { obj, .. } => vec![obj],
            NodeKind::Binary { op1, op2, .. } | NodeKind::Comma { op1, op2 } => vec![op1, op2],
            NodeKind::Unary { op1, .. } | NodeKind::Cast { op1 } | NodeKind::BitCast { op1 } => {
                vec![op1]
            }
            NodeKind::JTrue { cond } => vec![cond],
            NodeKind::Return { value } => value.iter_mut().collect(),
            NodeKind::Call(call) => {
                let CallNode { target, args, .. } = &mut **call;
                let mut ops: Vec<&mut NodeId> = args.iter_mut().map(|a| &mut a.node).collect();
                if let CallTarget::Indirect(target) = target {
                    ops.push(target);
                }
                ops
            }
        }
    }

    /// Operator name used in dumps and errors.
    pub fn oper_name(&self) -> &'static str {
        match self {
            NodeKind::IntCon { .. } => "CNS_INT",
            NodeKind::DblCon { .. } => "CNS_DBL",
            NodeKind::VecCon { .. } => "CNS_VEC",
            NodeKind::LclVar { .. } => "LCL_VAR",
            NodeKind::LclFld { .. } => "LCL_FLD",
            NodeKind::LclAddr { .. } => "LCL_ADDR",
            NodeKind::StoreLclVar { .. } => "STORE_LCL_VAR",
            NodeKind::StoreLclFld { .. } => "STORE_LCL_FLD",
            NodeKind::Ind { .. } => "IND",
            NodeKind::Blk { .. } => "BLK",
            NodeKind::StoreInd { .. } => "STOREIND",
            NodeKind::StoreBlk { .. } => "STORE_BLK",
            NodeKind::FieldAddr { .. } => "FIELD_ADDR",
            NodeKind::Binary { op, .. } => op.name(),
            NodeKind::Unary { op: UnOp::Neg, .. } => "NEG",
            NodeKind::Unary { op: UnOp::Not, .. } => "NOT",
            NodeKind::Cast { .. } => "CAST",
            NodeKind::BitCast { .. } => "BITCAST",
            NodeKind::Comma { .. } => "COMMA",
            NodeKind::JTrue { .. } => "JTRUE",
            NodeKind::Return { .. } => "RETURN",
            NodeKind::Call(_) => "CALL",
            NodeKind::PhysReg(_) => "PHYSREG",
            NodeKind::Nop => "NOP",
        }
    }
}

/// A tree node: operator, result type and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub ty: VarType,
    pub flags: NodeFlags,
}

impl Node {
    /// Create a node with no flags.
    pub fn new(kind: NodeKind, ty: VarType) -> Self {
        Self {
            kind,
            ty,
            flags: NodeFlags::empty(),
        }
    }

    /// Add flags.
    pub fn with_flags(mut self, flags: NodeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Constants and local addresses: values that can be recomputed anywhere.
    pub fn is_invariant(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::IntCon { .. }
                | NodeKind::DblCon { .. }
                | NodeKind::VecCon { .. }
                | NodeKind::LclAddr { .. }
        )
    }

    /// The integer constant value, if this is one.
    pub fn int_con(&self) -> Option<i64> {
        match self.kind {
            NodeKind::IntCon { value, .. } => Some(value),
            _ => None,
        }
    }

    /// The handle this constant stands for, if any.
    pub fn handle(&self) -> Option<HandleKind> {
        match self.kind {
            NodeKind::IntCon { handle, .. } => handle,
            _ => None,
        }
    }

    /// The local accessed directly by this node, if any.
    pub fn local(&self) -> Option<LocalId> {
        match self.kind {
            NodeKind::LclVar { lcl }
            | NodeKind::LclFld { lcl, .. }
            | NodeKind::LclAddr { lcl, .. }
            | NodeKind::StoreLclVar { lcl, .. }
            | NodeKind::StoreLclFld { lcl, .. } => Some(lcl),
            _ => None,
        }
    }

    /// Whether this node reads a local directly.
    pub fn is_local_read(&self) -> bool {
        matches!(self.kind, NodeKind::LclVar { .. } | NodeKind::LclFld { .. })
    }

    /// Whether this node stores to a local or to memory.
    pub fn is_store(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::StoreLclVar { .. }
                | NodeKind::StoreLclFld { .. }
                | NodeKind::StoreInd { .. }
                | NodeKind::StoreBlk { .. }
        )
    }

    /// Whether this node is a memory indirection (load or store).
    pub fn is_indir(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Ind { .. }
                | NodeKind::Blk { .. }
                | NodeKind::StoreInd { .. }
                | NodeKind::StoreBlk { .. }
        )
    }

    /// Whether this is a volatile access.
    pub fn is_volatile(&self) -> bool {
        self.flags.contains(NodeFlags::VOLATILE)
    }

    /// The call payload, if this is a call.
    pub fn as_call(&self) -> Option<&CallNode> {
        match &self.kind {
            NodeKind::Call(call) => Some(call),
            _ => None,
        }
    }

    /// Mutable call payload, if this is a call.
    pub fn as_call_mut(&mut self) -> Option<&mut CallNode> {
        match &mut self.kind {
            NodeKind::Call(call) => Some(call),
            _ => None,
        }
    }

    /// Side effects of this node alone, ignoring its operands.
    pub fn own_side_effects(&self) -> SideEffects {
        let mut effects = SideEffects::empty();
        match &self.kind {
            NodeKind::StoreLclVar { .. } | NodeKind::StoreLclFld { .. } => {
                effects |= SideEffects::ASSIGN;
            }
            NodeKind::StoreInd { .. } | NodeKind::StoreBlk { .. } => {
                effects |= SideEffects::ASSIGN | SideEffects::GLOB_REF;
                if !self.flags.contains(NodeFlags::NONFAULTING) {
                    effects |= SideEffects::EXCEPT;
                }
            }
            NodeKind::Ind { .. } | NodeKind::Blk { .. } => {
                effects |= SideEffects::GLOB_REF;
                if !self.flags.contains(NodeFlags::NONFAULTING) {
                    effects |= SideEffects::EXCEPT;
                }
            }
            NodeKind::Call(_) => {
                effects |= SideEffects::CALL | SideEffects::ASSIGN | SideEffects::EXCEPT;
            }
            NodeKind::JTrue { .. } | NodeKind::Return { .. } => {
                effects |= SideEffects::ASSIGN;
            }
            _ => {}
        }
        if self.is_volatile() {
            effects |= SideEffects::ASSIGN;
        }
        effects
    }
}
