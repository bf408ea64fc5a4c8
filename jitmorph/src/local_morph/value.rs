//! Abstract values tracked on the analysis stack.

use crate::ir::{LocalId, NodeId};

/// What the analysis knows about the value a node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Nothing local-related.
    Unknown,
    /// The node denotes the memory of `lcl` at `offset` (a read or a store
    /// target, not yet realized).
    Location { lcl: LocalId, offset: u32 },
    /// The node computes the address of `lcl` plus `offset`.
    Address { lcl: LocalId, offset: u32 },
}

/// A stack entry: a node and what it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value {
    /// The node producing the value.
    pub node: NodeId,
    /// What it produces.
    pub kind: ValueKind,
}

impl Value {
    /// A value nothing is known about.
    pub fn unknown(node: NodeId) -> Self {
        Self {
            node,
            kind: ValueKind::Unknown,
        }
    }

    /// A location of `lcl` at `offset` produced by `node`.
    pub fn location(node: NodeId, lcl: LocalId, offset: u32) -> Self {
        Self {
            node,
            kind: ValueKind::Location { lcl, offset },
        }
    }

    /// An address of `lcl` plus `offset` produced by `node`.
    pub fn address(node: NodeId, lcl: LocalId, offset: u32) -> Self {
        Self {
            node,
            kind: ValueKind::Address { lcl, offset },
        }
    }

    /// Whether this is a location.
    pub fn is_location(&self) -> bool {
        matches!(self.kind, ValueKind::Location { .. })
    }

    /// Whether this is an address.
    pub fn is_address(&self) -> bool {
        matches!(self.kind, ValueKind::Address { .. })
    }

    /// The local and offset of a location or address.
    pub fn local(&self) -> Option<(LocalId, u32)> {
        match self.kind {
            ValueKind::Unknown => None,
            ValueKind::Location { lcl, offset } | ValueKind::Address { lcl, offset } => {
                Some((lcl, offset))
            }
        }
    }

    /// The address `self + add`, produced by `node`.
    ///
    /// `None` if `self` is not an address or the offset overflows.
    pub fn add_offset(&self, node: NodeId, add: u64) -> Option<Value> {
        match self.kind {
            ValueKind::Address { lcl, offset } => {
                let add = u32::try_from(add).ok()?;
                let offset = offset.checked_add(add)?;
                Some(Value::address(node, lcl, offset))
            }
            _ => None,
        }
    }

    /// The location `*self`, produced by `node`. `None` if `self` is not an
    /// address.
    pub fn indir(&self, node: NodeId) -> Option<Value> {
        match self.kind {
            ValueKind::Address { lcl, offset } => Some(Value::location(node, lcl, offset)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_offset() {
        let addr = Value::address(NodeId::new(1), LocalId::new(0), 8);
        let moved = addr.add_offset(NodeId::new(2), 4).unwrap();
        assert_eq!(moved, Value::address(NodeId::new(2), LocalId::new(0), 12));
    }

    #[test]
    fn test_add_offset_overflow() {
        let addr = Value::address(NodeId::new(1), LocalId::new(0), u32::MAX - 1);
        assert!(addr.add_offset(NodeId::new(2), 4).is_none());
        assert!(addr.add_offset(NodeId::new(2), u64::from(u32::MAX) + 1).is_none());
    }

    #[test]
    fn test_only_addresses_move() {
        let loc = Value::location(NodeId::new(1), LocalId::new(0), 0);
        assert!(loc.add_offset(NodeId::new(2), 4).is_none());
        assert!(loc.indir(NodeId::new(2)).is_none());
        assert!(Value::unknown(NodeId::new(3)).local().is_none());
    }

    #[test]
    fn test_indir_of_address() {
        let addr = Value::address(NodeId::new(1), LocalId::new(2), 4);
        let loc = addr.indir(NodeId::new(5)).unwrap();
        assert!(loc.is_location());
        assert_eq!(loc.local(), Some((LocalId::new(2), 4)));
    }
}
