// id.rs — Stable identifiers for axc compiler phases
//
// Every counter the passes need is an explicit allocator value threaded
// through the walk that uses it. Nothing here is global: a module's node and
// value ids come from one `IdAllocator`, and each lowered declaration owns a
// `RegAllocator` for its registers, loop ids and accumulators.

use std::fmt;

use serde::Serialize;

/// Identity of an expression node within a `DeclarationGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Placeholder carried by freshly built nodes until the graph numbers them.
    pub const UNASSIGNED: NodeId = NodeId(u32::MAX);
}

/// Module-wide id of a stamped value (post-order across all declarations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueId(pub u32);

/// LIR register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Reg(pub u32);

/// LIR loop identifier, pairing a `loop_start` with its `loop_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LoopId(pub u32);

/// LIR accumulator name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AccId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for AccId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acc{}", self.0)
    }
}

/// Allocator for module-level ids. Produces monotonically increasing ids in
/// allocation order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_node: u32,
    next_value: u32,
    next_topo: usize,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub fn alloc_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    /// Next slot in the module-wide evaluation order.
    pub fn alloc_topo(&mut self) -> usize {
        let index = self.next_topo;
        self.next_topo += 1;
        index
    }
}

/// Allocator for the LIR namespace of one declaration.
#[derive(Debug, Default, Clone)]
pub struct RegAllocator {
    next_reg: u32,
    next_loop: u32,
    next_acc: u32,
}

impl RegAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume numbering after the given high-water marks (exclusive).
    pub fn starting_at(reg: u32, loop_id: u32, acc: u32) -> Self {
        RegAllocator {
            next_reg: reg,
            next_loop: loop_id,
            next_acc: acc,
        }
    }

    pub fn alloc_reg(&mut self) -> Reg {
        let r = Reg(self.next_reg);
        self.next_reg += 1;
        r
    }

    pub fn alloc_loop(&mut self) -> LoopId {
        let id = LoopId(self.next_loop);
        self.next_loop += 1;
        id
    }

    pub fn alloc_acc(&mut self) -> AccId {
        let id = AccId(self.next_acc);
        self.next_acc += 1;
        id
    }
}
