//! Call nodes and the helpers the expansion phase knows about.

use std::fmt;

use super::node::NodeId;
use super::types::{ClassHandle, MethodHandle};

/// Runtime helper functions a call can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    /// Return the GC static base of a class, running its class constructor first.
    GetGcStaticBase,
    /// Return the non-GC static base of a class, running its class constructor first.
    GetNonGcStaticBase,
    /// Run a class constructor if it has not run yet.
    InitClass,
    /// Resolve a generic dictionary slot from a method context.
    RuntimeHandleMethod,
    /// Resolve a generic dictionary slot from a class context.
    RuntimeHandleClass,
    /// Return the thread static base of a type (non-GC statics).
    GetThreadStaticBase,
    /// Return the thread static base of a type (GC statics).
    GetThreadStaticBaseGc,
    /// Allocate an object.
    NewObject,
    /// Throw an exception.
    Throw,
}

impl Helper {
    /// Whether this helper is one of the static-base/class-init helpers.
    pub fn is_static_init(self) -> bool {
        matches!(
            self,
            Helper::GetGcStaticBase | Helper::GetNonGcStaticBase | Helper::InitClass
        )
    }

    /// Whether this helper resolves a generic dictionary lookup.
    pub fn is_runtime_lookup(self) -> bool {
        matches!(self, Helper::RuntimeHandleMethod | Helper::RuntimeHandleClass)
    }

    /// Whether this helper returns a thread static base.
    pub fn is_thread_static(self) -> bool {
        matches!(self, Helper::GetThreadStaticBase | Helper::GetThreadStaticBaseGc)
    }

    /// Dump name.
    pub fn name(self) -> &'static str {
        match self {
            Helper::GetGcStaticBase => "GETSHARED_GCSTATIC_BASE",
            Helper::GetNonGcStaticBase => "GETSHARED_NONGCSTATIC_BASE",
            Helper::InitClass => "INITCLASS",
            Helper::RuntimeHandleMethod => "RUNTIMEHANDLE_METHOD",
            Helper::RuntimeHandleClass => "RUNTIMEHANDLE_CLASS",
            Helper::GetThreadStaticBase => "GETSHARED_NONGCTHREADSTATIC_BASE",
            Helper::GetThreadStaticBaseGc => "GETSHARED_GCTHREADSTATIC_BASE",
            Helper::NewObject => "NEWSFAST",
            Helper::Throw => "THROW",
        }
    }
}

/// Intrinsics recognized by name during import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    /// `ReadUtf8(srcPtr, srcLen, dstPtr, dstLen) -> int`: transcode UTF-16
    /// into a caller buffer, returning the bytes written or -1.
    ReadUtf8,
}

/// What a call invokes.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// A runtime helper.
    Helper(Helper),
    /// A special intrinsic.
    Intrinsic(Intrinsic),
    /// A user method.
    User(MethodHandle),
    /// An indirect call through a computed address (evaluated after the args).
    Indirect(NodeId),
}

/// Role of a call argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Ordinary argument.
    Regular,
    /// Hidden return buffer the callee writes its struct result into.
    RetBuf,
}

/// A single call argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallArg {
    /// The argument value.
    pub node: NodeId,
    /// Its role.
    pub kind: ArgKind,
}

impl CallArg {
    /// An ordinary argument.
    pub fn regular(node: NodeId) -> Self {
        Self { node, kind: ArgKind::Regular }
    }

    /// A hidden return buffer argument.
    pub fn ret_buf(node: NodeId) -> Self {
        Self { node, kind: ArgKind::RetBuf }
    }
}

/// Marker set by the importer on calls that a helper expansion may rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionCandidate {
    /// Static base / class init of `class`.
    StaticInit {
        /// The class whose statics are accessed.
        class: ClassHandle,
    },
    /// Generic dictionary lookup; the signature is the second argument.
    RuntimeLookup,
    /// Thread static base; the type index is the first argument.
    ThreadStatic,
    /// UTF-16 literal to UTF-8 read.
    ReadUtf8,
}

/// Payload of a call node.
#[derive(Debug, Clone, PartialEq)]
pub struct CallNode {
    /// Call target.
    pub target: CallTarget,
    /// Arguments in evaluation order.
    pub args: Vec<CallArg>,
    /// Set while the call is still eligible for expansion.
    pub candidate: Option<ExpansionCandidate>,
}

impl CallNode {
    /// Create a call without an expansion marker.
    pub fn new(target: CallTarget, args: Vec<CallArg>) -> Self {
        Self {
            target,
            args,
            candidate: None,
        }
    }

    /// The helper this call targets, if any.
    pub fn helper(&self) -> Option<Helper> {
        match self.target {
            CallTarget::Helper(h) => Some(h),
            _ => None,
        }
    }

    /// The intrinsic this call targets, if any.
    pub fn intrinsic(&self) -> Option<Intrinsic> {
        match self.target {
            CallTarget::Intrinsic(i) => Some(i),
            _ => None,
        }
    }

    /// Node of the `index`th argument.
    pub fn arg(&self, index: usize) -> Option<NodeId> {
        self.args.get(index).map(|a| a.node)
    }

    /// The hidden return buffer argument, if present.
    pub fn ret_buf_arg(&self) -> Option<NodeId> {
        self.args
            .iter()
            .find(|a| a.kind == ArgKind::RetBuf)
            .map(|a| a.node)
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Helper(h) => write!(f, "help {}", h.name()),
            CallTarget::Intrinsic(Intrinsic::ReadUtf8) => write!(f, "intrinsic ReadUtf8"),
            CallTarget::User(m) => write!(f, "user {:#x}", m.0),
            CallTarget::Indirect(addr) => write!(f, "ind [{}]", addr),
        }
    }
}
