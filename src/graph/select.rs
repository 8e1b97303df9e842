//! Composable node predicates.
//!
//! ```
//! use ngpack::graph::select::{is_dirty, is_kind};
//! use ngpack::graph::NodeKind;
//!
//! let dirty_entry_points = is_kind(NodeKind::EntryPoint).and(is_dirty());
//! ```

use std::fmt;
use std::ops::Not;
use std::sync::Arc;

use super::node::{Node, NodeKind, NodeState};

/// A boolean function over a node. Cheap to clone.
#[derive(Clone)]
pub struct NodePredicate(Arc<dyn Fn(&Node) -> bool + Send + Sync>);

impl NodePredicate {
    pub fn matches(&self, node: &Node) -> bool {
        (self.0)(node)
    }

    pub fn and(self, other: NodePredicate) -> NodePredicate {
        by(move |node| self.matches(node) && other.matches(node))
    }

    pub fn or(self, other: NodePredicate) -> NodePredicate {
        by(move |node| self.matches(node) || other.matches(node))
    }
}

impl Not for NodePredicate {
    type Output = NodePredicate;

    fn not(self) -> NodePredicate {
        by(move |node| !self.matches(node))
    }
}

impl fmt::Debug for NodePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NodePredicate")
    }
}

pub fn by<F>(f: F) -> NodePredicate
where
    F: Fn(&Node) -> bool + Send + Sync + 'static,
{
    NodePredicate(Arc::new(f))
}

pub fn is_kind(kind: NodeKind) -> NodePredicate {
    by(move |node| node.kind() == kind)
}

pub fn is_state(state: NodeState) -> NodePredicate {
    by(move |node| node.state() == state)
}

pub fn is_dirty() -> NodePredicate {
    is_state(NodeState::Dirty)
}

pub fn is_in_progress() -> NodePredicate {
    is_state(NodeState::InProgress)
}

pub fn is_pending() -> NodePredicate {
    is_state(NodeState::Pending)
}

pub fn by_entry_point() -> NodePredicate {
    is_kind(NodeKind::EntryPoint)
}

pub fn by_package() -> NodePredicate {
    is_kind(NodeKind::Package)
}

pub fn is_entry_point_dirty() -> NodePredicate {
    by_entry_point().and(is_dirty())
}

pub fn is_entry_point_in_progress() -> NodePredicate {
    by_entry_point().and(is_in_progress())
}
