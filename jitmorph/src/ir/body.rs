//! # Method Bodies
//!
//! A [`MethodBody`] owns every IR entity of one method: the node,
//! statement, block and layout arenas, the local table and the block layout
//! order. Nodes are created through the `new_*` constructors here; tree
//! queries (execution order, side effects, use lookup) live here as well.
//! Flow graph edits are implemented in [`crate::flowgraph`].

use bitflags::bitflags;

use crate::arena::Arena;
use super::block::{BasicBlock, BlockId};
use super::call::{CallArg, CallNode, CallTarget, ExpansionCandidate};
use super::local::{LocalId, LocalTable};
use super::node::{BinOp, HandleKind, Node, NodeFlags, NodeId, NodeKind, PhysReg, SideEffects};
use super::stmt::{NodeUse, Statement, StmtId};
use super::types::{ClassLayout, LayoutId, MethodHandle, VarType};

bitflags! {
    /// Facts the importer records about a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u8 {
        /// Some call is a static-init expansion candidate.
        const HAS_STATIC_INIT = 1 << 0;
        /// Some call is a runtime lookup expansion candidate.
        const HAS_RUNTIME_LOOKUP = 1 << 1;
        /// Some call is a thread static expansion candidate.
        const HAS_TLS_ACCESS = 1 << 2;
        /// Some call is a special intrinsic expansion candidate.
        const HAS_SPECIAL_INTRINSICS = 1 << 3;
    }
}

impl Default for MethodFlags {
    fn default() -> Self {
        MethodFlags::empty()
    }
}

/// The IR of one method.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// The method being compiled.
    pub method: MethodHandle,
    /// Tree nodes.
    pub nodes: Arena<NodeId, Node>,
    /// Statements.
    pub stmts: Arena<StmtId, Statement>,
    /// Basic blocks (including ones no longer in the layout).
    pub blocks: Arena<BlockId, BasicBlock>,
    /// Block layout order; the first block is the entry.
    pub layout: Vec<BlockId>,
    /// Local slots.
    pub locals: LocalTable,
    /// Struct layouts.
    pub layouts: Arena<LayoutId, ClassLayout>,
    /// Importer facts.
    pub flags: MethodFlags,
}

impl MethodBody {
    /// Create an empty method body.
    pub fn new(method: MethodHandle) -> Self {
        Self {
            method,
            nodes: Arena::new(),
            stmts: Arena::new(),
            blocks: Arena::new(),
            layout: Vec::new(),
            locals: LocalTable::new(),
            layouts: Arena::new(),
            flags: MethodFlags::empty(),
        }
    }

    /// The entry block, if the method has any block.
    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Get a node.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Get a mutable node.
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Get a statement.
    pub fn stmt(&self, id: StmtId) -> &Statement {
        &self.stmts[id]
    }

    /// Get a block.
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    /// Get a mutable block.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    /// Register a struct layout.
    pub fn add_layout(&mut self, layout: ClassLayout) -> LayoutId {
        self.layouts.alloc(layout)
    }

    /// Get a struct layout.
    pub fn layout_of(&self, id: LayoutId) -> &ClassLayout {
        &self.layouts[id]
    }

    /// Add a struct local with a registered layout.
    pub fn new_struct_local(&mut self, layout: LayoutId) -> LocalId {
        self.locals.new_struct_local(layout, &self.layouts[layout])
    }

    // ========================================================================
    // Node construction
    // ========================================================================

    /// Allocate a node.
    pub fn alloc_node(&mut self, node: Node) -> NodeId {
        self.nodes.alloc(node)
    }

    /// Swap a new node value into an existing slot.
    pub fn replace_node(&mut self, id: NodeId, node: Node) -> Node {
        self.nodes.replace(id, node)
    }

    /// Integer constant.
    pub fn new_icon(&mut self, value: i64, ty: VarType) -> NodeId {
        self.alloc_node(Node::new(NodeKind::IntCon { value, handle: None }, ty))
    }

    /// Pointer-sized constant standing for a runtime handle.
    pub fn new_icon_handle(&mut self, value: i64, handle: HandleKind) -> NodeId {
        self.alloc_node(Node::new(
            NodeKind::IntCon {
                value,
                handle: Some(handle),
            },
            VarType::NativeInt,
        ))
    }

    /// Vector constant.
    pub fn new_vcon(&mut self, bytes: Vec<u8>, ty: VarType) -> NodeId {
        self.alloc_node(Node::new(NodeKind::VecCon { bytes }, ty))
    }

    /// Read of a whole local, typed as the local.
    pub fn new_lcl_var(&mut self, lcl: LocalId) -> NodeId {
        let ty = self.locals.get(lcl).ty.actual_type();
        self.alloc_node(Node::new(NodeKind::LclVar { lcl }, ty))
    }

    /// Read of part of a local.
    pub fn new_lcl_fld(
        &mut self,
        lcl: LocalId,
        ty: VarType,
        offset: u16,
        layout: Option<LayoutId>,
    ) -> NodeId {
        self.alloc_node(Node::new(NodeKind::LclFld { lcl, offset, layout }, ty))
    }

    /// Address of a local.
    pub fn new_lcl_addr(&mut self, lcl: LocalId, offset: u16) -> NodeId {
        self.alloc_node(Node::new(NodeKind::LclAddr { lcl, offset }, VarType::Byref))
    }

    /// Store to a whole local.
    pub fn new_store_lcl_var(&mut self, lcl: LocalId, value: NodeId) -> NodeId {
        let ty = self.locals.get(lcl).ty.actual_type();
        self.alloc_node(Node::new(NodeKind::StoreLclVar { lcl, value }, ty))
    }

    /// Load from memory.
    pub fn new_ind(&mut self, ty: VarType, addr: NodeId) -> NodeId {
        self.alloc_node(Node::new(NodeKind::Ind { addr }, ty))
    }

    /// Struct load from memory.
    pub fn new_blk(&mut self, layout: LayoutId, addr: NodeId) -> NodeId {
        self.alloc_node(Node::new(NodeKind::Blk { addr, layout }, VarType::Struct))
    }

    /// Store to memory.
    pub fn new_store_ind(&mut self, ty: VarType, addr: NodeId, value: NodeId) -> NodeId {
        self.alloc_node(Node::new(NodeKind::StoreInd { addr, value }, ty))
    }

    /// Struct store to memory.
    pub fn new_store_blk(&mut self, layout: LayoutId, addr: NodeId, value: NodeId) -> NodeId {
        self.alloc_node(Node::new(
            NodeKind::StoreBlk {
                addr,
                value,
                layout,
            },
            VarType::Struct,
        ))
    }

    /// Field address.
    pub fn new_field_addr(&mut self, obj: NodeId, offset: u32) -> NodeId {
        let ty = match self.nodes[obj].ty {
            VarType::Ref | VarType::Byref => VarType::Byref,
            _ => VarType::NativeInt,
        };
        self.alloc_node(Node::new(NodeKind::FieldAddr { obj, offset }, ty))
    }

    /// Binary operation.
    pub fn new_oper(&mut self, op: BinOp, ty: VarType, op1: NodeId, op2: NodeId) -> NodeId {
        self.alloc_node(Node::new(NodeKind::Binary { op, op1, op2 }, ty))
    }

    /// Numeric cast to `ty`.
    pub fn new_cast(&mut self, ty: VarType, op1: NodeId) -> NodeId {
        self.alloc_node(Node::new(NodeKind::Cast { op1 }, ty))
    }

    /// Bit reinterpretation as `ty`.
    pub fn new_bitcast(&mut self, ty: VarType, op1: NodeId) -> NodeId {
        self.alloc_node(Node::new(NodeKind::BitCast { op1 }, ty))
    }

    /// Comma.
    pub fn new_comma(&mut self, op1: NodeId, op2: NodeId) -> NodeId {
        let ty = self.nodes[op2].ty;
        self.alloc_node(Node::new(NodeKind::Comma { op1, op2 }, ty))
    }

    /// Conditional jump on a relop.
    pub fn new_jtrue(&mut self, cond: NodeId) -> NodeId {
        self.nodes[cond].flags |= NodeFlags::RELOP_JMP_USED;
        self.alloc_node(Node::new(NodeKind::JTrue { cond }, VarType::Void))
    }

    /// Return.
    pub fn new_return(&mut self, value: Option<NodeId>) -> NodeId {
        let ty = value.map_or(VarType::Void, |v| self.nodes[v].ty);
        self.alloc_node(Node::new(NodeKind::Return { value }, ty))
    }

    /// Call.
    pub fn new_call(&mut self, target: CallTarget, args: Vec<CallArg>, ty: VarType) -> NodeId {
        self.alloc_node(Node::new(
            NodeKind::Call(Box::new(CallNode::new(target, args))),
            ty,
        ))
    }

    /// Call the importer marked as an expansion candidate. Also records the
    /// matching [`MethodFlags`] fact.
    pub fn new_candidate_call(
        &mut self,
        target: CallTarget,
        args: Vec<CallArg>,
        ty: VarType,
        candidate: ExpansionCandidate,
    ) -> NodeId {
        self.flags |= match candidate {
            ExpansionCandidate::StaticInit { .. } => MethodFlags::HAS_STATIC_INIT,
            ExpansionCandidate::RuntimeLookup => MethodFlags::HAS_RUNTIME_LOOKUP,
            ExpansionCandidate::ThreadStatic => MethodFlags::HAS_TLS_ACCESS,
            ExpansionCandidate::ReadUtf8 => MethodFlags::HAS_SPECIAL_INTRINSICS,
        };
        let mut call = CallNode::new(target, args);
        call.candidate = Some(candidate);
        self.alloc_node(Node::new(NodeKind::Call(Box::new(call)), ty))
    }

    /// Physical register read.
    pub fn new_phys_reg(&mut self, reg: PhysReg) -> NodeId {
        self.alloc_node(Node::new(NodeKind::PhysReg(reg), VarType::NativeInt))
    }

    /// No-op.
    pub fn new_nop(&mut self) -> NodeId {
        self.alloc_node(Node::new(NodeKind::Nop, VarType::Void))
    }

    /// Deep copy of a side-effect free tree, or `None` for trees that
    /// contain calls or stores.
    pub fn clone_expr(&mut self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes[id].clone();
        if node.is_store() || node.as_call().is_some() {
            return None;
        }
        let mut copy = node;
        let mut new_ops = Vec::new();
        for op in copy.kind.operands() {
            new_ops.push(self.clone_expr(op)?);
        }
        for (slot, new_op) in copy.kind.operands_mut().into_iter().zip(new_ops) {
            *slot = new_op;
        }
        Some(self.alloc_node(copy))
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Create a sequenced statement.
    pub fn new_stmt(&mut self, root: NodeId, il_offset: Option<u32>) -> StmtId {
        let stmt = self.stmts.alloc(Statement::new(root, il_offset));
        self.sequence(stmt);
        stmt
    }

    /// Rebuild a statement's execution order from its tree.
    pub fn sequence(&mut self, stmt: StmtId) {
        let root = self.stmts[stmt].root;
        let order = self.exec_order(root);
        self.stmts[stmt].exec_order = order;
    }

    /// Execution order of the tree rooted at `root`.
    pub fn exec_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        // Explicit stack of (node, operands visited) keeps deep trees off
        // the native stack.
        let mut stack = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            stack.push((node, true));
            for op in self.nodes[node].kind.operands().into_iter().rev() {
                stack.push((op, false));
            }
        }
        order
    }

    /// Append a statement to a block.
    pub fn append_stmt(&mut self, block: BlockId, stmt: StmtId) {
        self.blocks[block].statements.push(stmt);
    }

    /// Insert `stmt` right before `before` in `block`.
    pub fn insert_stmt_before(&mut self, block: BlockId, before: StmtId, stmt: StmtId) {
        let stmts = &mut self.blocks[block].statements;
        let pos = stmts.iter().position(|s| *s == before).unwrap_or(stmts.len());
        stmts.insert(pos, stmt);
    }

    /// Remove a statement from a block.
    pub fn remove_stmt(&mut self, block: BlockId, stmt: StmtId) {
        self.blocks[block].statements.retain(|s| *s != stmt);
    }

    // ========================================================================
    // Tree queries
    // ========================================================================

    /// Side effects of the whole tree rooted at `id`.
    pub fn side_effects(&self, id: NodeId) -> SideEffects {
        let mut effects = SideEffects::empty();
        for node in self.exec_order(id) {
            effects |= self.nodes[node].own_side_effects();
        }
        effects
    }

    /// Whether the tree rooted at `id` contains a call.
    pub fn contains_call(&self, id: NodeId) -> bool {
        self.exec_order(id)
            .into_iter()
            .any(|n| self.nodes[n].as_call().is_some())
    }

    /// Calls of a statement in execution order.
    pub fn calls_in_stmt(&self, stmt: StmtId) -> Vec<NodeId> {
        self.stmts[stmt]
            .exec_order
            .iter()
            .copied()
            .filter(|n| self.nodes[*n].as_call().is_some())
            .collect()
    }

    /// Find the slot holding `target` inside statement `stmt`.
    pub fn find_use(&self, stmt: StmtId, target: NodeId) -> Option<NodeUse> {
        let root = self.stmts[stmt].root;
        if root == target {
            return Some(NodeUse::Root(stmt));
        }
        for node in self.exec_order(root) {
            let ops = self.nodes[node].kind.operands();
            if let Some(index) = ops.iter().position(|op| *op == target) {
                return Some(NodeUse::Operand {
                    parent: node,
                    index,
                });
            }
        }
        None
    }

    /// The node currently held by a use slot.
    pub fn use_value(&self, use_: NodeUse) -> Option<NodeId> {
        match use_ {
            NodeUse::Root(stmt) => Some(self.stmts[stmt].root),
            NodeUse::Operand { parent, index } => {
                self.nodes[parent].kind.operands().get(index).copied()
            }
        }
    }

    /// Store `value` into a use slot.
    pub fn replace_use(&mut self, use_: NodeUse, value: NodeId) {
        match use_ {
            NodeUse::Root(stmt) => self.stmts[stmt].root = value,
            NodeUse::Operand { parent, index } => {
                if let Some(slot) = self.nodes[parent].kind.operands_mut().into_iter().nth(index) {
                    *slot = value;
                }
            }
        }
    }

    /// The parent of each node in the tree rooted at `root`.
    pub fn parent_links(&self, root: NodeId) -> Vec<(NodeId, Option<NodeId>)> {
        let mut links = vec![(root, None)];
        for node in self.exec_order(root) {
            for op in self.nodes[node].kind.operands() {
                links.push((op, Some(node)));
            }
        }
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_with_local(ty: VarType) -> (MethodBody, LocalId) {
        let mut body = MethodBody::new(MethodHandle(1));
        let lcl = body.locals.new_local(ty);
        (body, lcl)
    }

    #[test]
    fn test_exec_order_is_post_order() {
        let (mut body, lcl) = body_with_local(VarType::Int);
        let a = body.new_lcl_var(lcl);
        let b = body.new_icon(1, VarType::Int);
        let add = body.new_oper(BinOp::Add, VarType::Int, a, b);
        let store = body.new_store_lcl_var(lcl, add);
        let stmt = body.new_stmt(store, Some(0));

        assert_eq!(body.stmt(stmt).exec_order, vec![a, b, add, store]);
    }

    #[test]
    fn test_find_and_replace_use() {
        let (mut body, lcl) = body_with_local(VarType::Int);
        let a = body.new_lcl_var(lcl);
        let b = body.new_icon(1, VarType::Int);
        let add = body.new_oper(BinOp::Add, VarType::Int, a, b);
        let stmt = body.new_stmt(add, None);

        let use_ = body.find_use(stmt, b).expect("use");
        assert_eq!(use_, NodeUse::Operand { parent: add, index: 1 });

        let c = body.new_icon(2, VarType::Int);
        body.replace_use(use_, c);
        assert_eq!(body.use_value(use_), Some(c));
        assert_eq!(body.find_use(stmt, add), Some(NodeUse::Root(stmt)));
    }

    #[test]
    fn test_clone_expr_refuses_calls() {
        let (mut body, lcl) = body_with_local(VarType::NativeInt);
        let read = body.new_lcl_var(lcl);
        let off = body.new_icon(8, VarType::NativeInt);
        let add = body.new_oper(BinOp::Add, VarType::NativeInt, read, off);
        let copy = body.clone_expr(add).expect("clonable");
        assert_ne!(copy, add);
        assert_eq!(body.node(copy).kind.oper_name(), "ADD");

        let call = body.new_call(
            CallTarget::User(MethodHandle(9)),
            vec![],
            VarType::Int,
        );
        assert!(body.clone_expr(call).is_none());
    }

    #[test]
    fn test_side_effects_of_tree() {
        let (mut body, lcl) = body_with_local(VarType::Int);
        let addr = body.new_lcl_var(lcl);
        let load = body.new_ind(VarType::Int, addr);
        assert!(body.side_effects(load).contains(SideEffects::GLOB_REF));
        assert!(!body.contains_call(load));
    }
}
