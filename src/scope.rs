//! Route endpoint scope: where a dispatch should be routed.
//!
//! spec §3: "`(endpointAddress, clusterNodeId?)`. The special `NoScope`
//! broadcasts within the routing fabric" — meaning "route by local rules"
//! (see [`crate::dispatcher::Dispatcher::dispatch`]), not a network
//! broadcast.

use crate::address::Address;

/// Where to route a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scope {
    /// Route by local rules: local dispatch if a handler is registered here,
    /// otherwise the caller's configured default.
    #[default]
    NoScope,
    /// Route to a specific end-point, optionally further qualified by a
    /// cluster node identifier.
    EndPoint {
        /// The target end-point's address.
        address: Address,
        /// An optional cluster node identifier distinguishing multiple
        /// logical nodes reachable at the same address.
        cluster_node_id: Option<String>,
    },
}

impl Scope {
    /// Construct a scope targeting a specific end-point with no cluster node
    /// qualifier.
    #[must_use]
    pub const fn end_point(address: Address) -> Self {
        Self::EndPoint {
            address,
            cluster_node_id: None,
        }
    }

    /// Whether this scope is [`Scope::NoScope`].
    #[must_use]
    pub const fn is_no_scope(&self) -> bool { matches!(self, Self::NoScope) }
}
