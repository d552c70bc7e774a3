use std::fmt;

/// A generational handle to a live node inside a [`Graph`](crate::Graph).
///
/// Layout: `u32 index` + `u32 generation`.
///
/// - **index**: slot index in the graph's node allocator
/// - **generation**: bumped every time the slot is freed, so a handle to a
///   despawned node never aliases the node that later reuses the slot
///
/// Handles are plain identifiers: they do not own the node and stay valid
/// to copy around after the node is gone (lookups simply fail).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

impl NodeHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the slot index of this handle.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the generation of the slot at the time the node was spawned.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}
