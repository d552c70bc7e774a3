//! The host object seam.
//!
//! The serializer never touches a concrete node store: it walks any host
//! that can report a node's type, name, properties and owned children.
//! [`Graph`](crate::Graph) implements it; engines with their own object
//! model implement it for their world type.

use std::fmt;
use std::hash::Hash;

use crate::property::PropertyValue;

/// Read-only view of a host object graph.
pub trait HostAdapter {
    /// Host node identifier. References inside properties use the same type.
    type Handle: Copy + Eq + Hash + fmt::Debug;

    /// Type tag of `node`, or `None` if the host does not know the node.
    fn type_tag(&self, node: Self::Handle) -> Option<String>;

    fn name(&self, node: Self::Handle) -> Option<String>;

    /// Properties of `node` in a stable order.
    fn properties(&self, node: Self::Handle) -> Vec<(String, PropertyValue<Self::Handle>)>;

    /// Owned children of `node` in order.
    fn children(&self, node: Self::Handle) -> Vec<Self::Handle>;
}
