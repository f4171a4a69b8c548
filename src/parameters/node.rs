//! Node definitions for the parameter tree
//!
//! A node is either a leaf, which owns a raw value buffer, or a container,
//! which owns an ordered list of children whose coordinate spaces it
//! concatenates. Nodes live in the [`ParamTree`](super::ParamTree) arena and
//! refer to each other through [`NodeId`] handles.

use std::fmt;
use std::ops::Range;
use std::rc::Rc;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::parameters::index_operations::IndexOperations;
use crate::parameters::observer::ObserverRegistry;
use crate::parameters::priors::PriorRef;
use crate::parameters::transformations::Constraint;
use crate::parameters::ParamTree;

/// Handle to a node in a [`ParamTree`](super::ParamTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The arena slot this handle points at
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback invoked when an observed node changes.
///
/// Receives the tree and the node that started the notification.
pub type ChangeHook = Rc<dyn Fn(&ParamTree, NodeId)>;

/// Identity of an observer in a node's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverId {
    /// A node observing another node (a parent, or a node's own change hook)
    Node(NodeId),

    /// An external subscriber
    External(u64),
}

/// What a subscription does when notified.
#[derive(Clone)]
pub enum Observer {
    /// Forward the notification to the given parent's observers
    PassThrough(NodeId),

    /// Run a callback
    Hook(ChangeHook),
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observer::PassThrough(parent) => write!(f, "PassThrough({})", parent),
            Observer::Hook(_) => write!(f, "Hook"),
        }
    }
}

/// The constraint and prior stores a node owns when it is a root.
#[derive(Debug, Clone, Default)]
pub struct StoreSet {
    /// Transform and fixed-marker bookkeeping
    pub constraints: IndexOperations<Constraint>,

    /// Prior bookkeeping
    pub priors: IndexOperations<PriorRef>,
}

/// Where a node's constraint and prior bookkeeping lives.
#[derive(Debug, Clone)]
pub(crate) enum Stores {
    /// Root or detached node: owns the real stores
    Owned(StoreSet),

    /// Attached node: a window `[offset, offset + size)` onto `root`'s stores
    View {
        root: NodeId,
        offset: usize,
        size: usize,
    },
}

/// Leaf or container payload.
#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Leaf {
        values: Array1<f64>,
        gradient: Array1<f64>,
    },
    Container {
        children: Vec<NodeId>,
        slices: Vec<Range<usize>>,
        names: Vec<(String, usize)>,
    },
}

/// A node of the parameter tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) parent_index: Option<usize>,
    pub(crate) size: usize,
    pub(crate) kind: NodeKind,
    pub(crate) stores: Stores,
    pub(crate) fixes: Option<Vec<bool>>,
    pub(crate) observers: ObserverRegistry<ObserverId, Observer>,
    pub(crate) tied_to: Option<NodeId>,
}

impl Node {
    pub(crate) fn leaf(name: &str, values: Array1<f64>) -> Self {
        let size = values.len();
        Self {
            name: name.to_string(),
            parent: None,
            parent_index: None,
            size,
            kind: NodeKind::Leaf {
                gradient: Array1::zeros(size),
                values,
            },
            stores: Stores::Owned(StoreSet::default()),
            fixes: None,
            observers: ObserverRegistry::new(),
            tied_to: None,
        }
    }

    pub(crate) fn container(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            parent_index: None,
            size: 0,
            kind: NodeKind::Container {
                children: Vec::new(),
                slices: Vec::new(),
                names: Vec::new(),
            },
            stores: Stores::Owned(StoreSet::default()),
            fixes: None,
            observers: ObserverRegistry::new(),
            tied_to: None,
        }
    }

    /// Name of the node
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of scalar entries in this node's subtree
    pub fn size(&self) -> usize {
        self.size
    }

    /// The containing node, if any
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Position among the parent's children
    pub fn parent_index(&self) -> Option<usize> {
        self.parent_index
    }

    /// Whether this node owns a value buffer
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// The children of a container (empty for leaves)
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Container { children, .. } => children,
            NodeKind::Leaf { .. } => &[],
        }
    }

    /// Local slices of the children, in child order (empty for leaves)
    pub fn slices(&self) -> &[Range<usize>] {
        match &self.kind {
            NodeKind::Container { slices, .. } => slices,
            NodeKind::Leaf { .. } => &[],
        }
    }

    /// The fix mask; only ever present on a root
    pub fn fixes(&self) -> Option<&[bool]> {
        self.fixes.as_deref()
    }

    /// The node whose values this node mirrors, if tied
    pub fn tied_to(&self) -> Option<NodeId> {
        self.tied_to
    }

    /// Whether this node holds its own stores rather than a view
    pub fn owns_stores(&self) -> bool {
        matches!(self.stores, Stores::Owned(_))
    }

    /// Number of observer subscriptions on this node
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

/// Make a name usable as a lookup key: spaces and dots become underscores,
/// and the characters `-+!*/` are dropped.
///
/// # Examples
///
/// ```
/// use paramtree_rs::parameters::adjust_name_for_printing;
///
/// assert_eq!(adjust_name_for_printing("rbf variance"), "rbf_variance");
/// assert_eq!(adjust_name_for_printing("a.b-c"), "a_bc");
/// ```
pub fn adjust_name_for_printing(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            ' ' | '.' => Some('_'),
            '-' | '+' | '!' | '*' | '/' => None,
            c => Some(c),
        })
        .collect()
}
