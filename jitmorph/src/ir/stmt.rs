//! Statements: a tree root plus its execution order.

use crate::define_id;
use super::node::NodeId;

define_id!(
    /// Handle of a statement.
    pub struct StmtId, "STMT"
);

/// A top-level tree inside a basic block.
///
/// `exec_order` lists every node of the tree in the order it executes.
/// It is rebuilt from scratch whenever the tree shape changes (see
/// [`MethodBody::sequence`](super::body::MethodBody::sequence)).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Root node of the tree.
    pub root: NodeId,
    /// All nodes of the tree in execution order; the root is last.
    pub exec_order: Vec<NodeId>,
    /// IL offset the statement was imported from.
    pub il_offset: Option<u32>,
}

impl Statement {
    /// Create a statement whose execution order is not computed yet.
    pub fn new(root: NodeId, il_offset: Option<u32>) -> Self {
        Self {
            root,
            exec_order: Vec::new(),
            il_offset,
        }
    }
}

/// Where a node is used: the slot that holds its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeUse {
    /// The node is the root of a statement.
    Root(StmtId),
    /// The node is operand `index` of `parent`.
    Operand {
        /// The user node.
        parent: NodeId,
        /// Position in the user's operand list.
        index: usize,
    },
}
