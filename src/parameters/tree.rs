//! The parameter tree arena
//!
//! [`ParamTree`] owns every node and maintains the global invariants of the
//! hierarchy: a container's size is the sum of its children's sizes, child
//! slices are contiguous in insertion order, the root alone owns the real
//! constraint and prior stores, and every other node's view into them matches
//! the live tree shape. All structural mutation goes through
//! [`ParamTree::attach`] and [`ParamTree::detach`], which validate first and
//! only then touch the tree, so a failed call leaves it unchanged.

use std::ops::Range;
use std::rc::Rc;

use ndarray::Array1;
use regex::Regex;
use tracing::{debug, trace};

use crate::config::TreeConfig;
use crate::error::{ParamTreeError, Result};
use crate::parameters::index_operations::{IndexOperations, IndexOperationsView};
use crate::parameters::node::{
    adjust_name_for_printing, ChangeHook, Node, NodeId, NodeKind, Observer, ObserverId, StoreSet,
    Stores,
};
use crate::parameters::observer::{Priority, LOWEST_PRIORITY};
use crate::parameters::priors::PriorRef;
use crate::parameters::transformations::Constraint;

/// An arena of parameter nodes forming one or more trees.
///
/// Every node starts as the root of its own one-node tree. Containers adopt
/// other nodes with [`attach`](ParamTree::attach) and release them with
/// [`detach`](ParamTree::detach).
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use paramtree_rs::parameters::ParamTree;
///
/// let mut tree = ParamTree::new();
/// let model = tree.new_container("model");
/// let a = tree.new_scalar("a", 1.0);
/// let b = tree.new_leaf("b", array![2.0, 3.0]);
/// tree.attach(model, a, None).unwrap();
/// tree.attach(model, b, None).unwrap();
///
/// assert_eq!(tree.size(model).unwrap(), 3);
/// assert_eq!(tree.values(model).unwrap(), array![1.0, 2.0, 3.0]);
/// ```
#[derive(Debug, Default)]
pub struct ParamTree {
    nodes: Vec<Option<Node>>,
    config: TreeConfig,
    next_external: u64,
}

impl ParamTree {
    /// Create an empty tree with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty tree with the given configuration
    pub fn with_config(config: TreeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The configuration of this tree
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    fn insert(&mut self, node: Node) -> NodeId {
        self.nodes.push(Some(node));
        NodeId(self.nodes.len() - 1)
    }

    /// Create a standalone leaf owning `values`
    pub fn new_leaf(&mut self, name: &str, values: Array1<f64>) -> NodeId {
        self.insert(Node::leaf(name, values))
    }

    /// Create a standalone single-entry leaf
    pub fn new_scalar(&mut self, name: &str, value: f64) -> NodeId {
        self.new_leaf(name, Array1::from_elem(1, value))
    }

    /// Create a standalone, empty container
    pub fn new_container(&mut self, name: &str) -> NodeId {
        self.insert(Node::container(name))
    }

    /// Get a node by handle
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(ParamTreeError::InvalidNode(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ParamTreeError::InvalidNode(id))
    }

    /// Check whether `id` refers to a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// Number of live nodes in the arena
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Check whether the arena holds no nodes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of a node
    pub fn name(&self, id: NodeId) -> Result<&str> {
        Ok(self.node(id)?.name())
    }

    /// Number of scalar entries in a node's subtree
    pub fn size(&self, id: NodeId) -> Result<usize> {
        Ok(self.node(id)?.size)
    }

    /// The direct parent of a node
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.node(id)?.parent)
    }

    /// The children of a node, in coordinate order
    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(self.node(id)?.children())
    }

    /// The highest ancestor of a node (the node itself if it is a root)
    pub fn root_of(&self, id: NodeId) -> Result<NodeId> {
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// Ancestors of a node, nearest first
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut ancestors = Vec::new();
        let mut current = self.node(id)?.parent;
        while let Some(parent) = current {
            ancestors.push(parent);
            current = self.node(parent)?.parent;
        }
        Ok(ancestors)
    }

    /// Whether `ancestor` is `id` or lies above it
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> Result<bool> {
        if ancestor == id {
            return Ok(true);
        }
        Ok(self.ancestors(id)?.contains(&ancestor))
    }

    /// Offset of `id` in the coordinate space of `ancestor`
    pub fn offset_for(&self, ancestor: NodeId, id: NodeId) -> Result<usize> {
        let mut offset = 0;
        let mut current = id;
        while current != ancestor {
            let node = self.node(current)?;
            let (parent, index) = match (node.parent, node.parent_index) {
                (Some(parent), Some(index)) => (parent, index),
                _ => {
                    return Err(ParamTreeError::Ownership(format!(
                        "{} is not below {}",
                        self.hierarchy_name(id)?,
                        self.hierarchy_name(ancestor)?
                    )))
                }
            };
            offset += self.node(parent)?.slices()[index].start;
            current = parent;
        }
        Ok(offset)
    }

    /// Offset of `id` in its root's coordinate space
    pub fn offset_in_root(&self, id: NodeId) -> Result<usize> {
        let root = self.root_of(id)?;
        self.offset_for(root, id)
    }

    //===========================================================================
    // Tree mutation
    //===========================================================================

    /// Attach `child` to `parent`, appending or inserting at `index`.
    ///
    /// If `child` already is a child of `parent` and `index` is given, it is
    /// moved to `index`. A child with another parent is detached from it first.
    ///
    /// # Errors
    ///
    /// * [`ParamTreeError::Hierarchy`] if `parent` is a leaf, if `child` is
    ///   `parent` or one of its ancestors, if `child` already sits deeper in
    ///   `parent`'s subtree, or if `child` is already a direct child and no
    ///   index was given
    /// * [`ParamTreeError::InvalidArgument`] if `index` is out of range
    pub fn attach(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) -> Result<()> {
        let parent_node = self.node(parent)?;
        let child_node = self.node(child)?;
        let children = match &parent_node.kind {
            NodeKind::Container { children, .. } => children,
            NodeKind::Leaf { .. } => {
                return Err(ParamTreeError::Hierarchy(format!(
                    "cannot attach {} to leaf {}",
                    child_node.name, parent_node.name
                )))
            }
        };

        if let Some(position) = children.iter().position(|&c| c == child) {
            return match index {
                Some(index) if index < children.len() => {
                    if index == position {
                        return Ok(());
                    }
                    self.detach_node(parent, child, false)?;
                    self.attach(parent, child, Some(index))
                }
                Some(index) => Err(ParamTreeError::InvalidArgument(format!(
                    "cannot move {} to position {} of {} children",
                    child_node.name,
                    index,
                    children.len()
                ))),
                None => Err(ParamTreeError::Hierarchy(format!(
                    "{} is already a parameter of {}, detach it before adding it again",
                    child_node.name, parent_node.name
                ))),
            };
        }

        if let Some(index) = index {
            if index > children.len() {
                return Err(ParamTreeError::InvalidArgument(format!(
                    "cannot insert at position {} of {} children",
                    index,
                    children.len()
                )));
            }
        }
        if self.is_ancestor(child, parent)? {
            return Err(ParamTreeError::Hierarchy(format!(
                "cannot attach {} below itself",
                self.hierarchy_name(child)?
            )));
        }
        let old_root = match child_node.parent {
            Some(_) => Some(self.root_of(child)?),
            None => None,
        };
        if let Some(old_parent) = child_node.parent {
            if self.is_ancestor(parent, old_parent)? {
                return Err(ParamTreeError::Hierarchy(format!(
                    "{} is already in the hierarchy of {}",
                    self.hierarchy_name(child)?,
                    self.hierarchy_name(parent)?
                )));
            }
            self.detach_node(old_parent, child, false)?;
        }

        let parent_node = self.node(parent)?;
        let local_start = match index {
            Some(index) if index < parent_node.children().len() => parent_node.slices()[index].start,
            _ => parent_node.size,
        };
        let child_size = self.node(child)?.size;
        let root = self.root_of(parent)?;
        let global_start = self.offset_in_root(parent)? + local_start;

        let child_stores = match std::mem::replace(
            &mut self.node_mut(child)?.stores,
            Stores::View {
                root,
                offset: global_start,
                size: child_size,
            },
        ) {
            Stores::Owned(stores) => stores,
            Stores::View { .. } => StoreSet::default(),
        };
        {
            let stores = self.owned_stores_mut(root)?;
            stores.constraints.shift_right(global_start, child_size);
            stores.priors.shift_right(global_start, child_size);
            stores.constraints.update(&child_stores.constraints, global_start);
            stores.priors.update(&child_stores.priors, global_start);
        }

        if let NodeKind::Container { children, .. } = &mut self.node_mut(parent)?.kind {
            match index {
                Some(index) => children.insert(index, child),
                None => children.push(child),
            }
        }
        {
            let node = self.node_mut(child)?;
            node.parent = Some(parent);
            node.fixes = None;
            node.observers.subscribe(
                ObserverId::Node(parent),
                Observer::PassThrough(parent),
                LOWEST_PRIORITY,
            );
        }

        self.restructure(parent)?;
        // ties survive a move as long as both ends still share a tree
        self.prune_ties(root)?;
        if let Some(old_root) = old_root.filter(|&r| r != root) {
            self.prune_ties(old_root)?;
        }
        let parent_name = self.hierarchy_name(parent)?;
        let child_name = self.hierarchy_name(child)?;
        debug!(
            parent = %parent_name,
            child = %child_name,
            offset = global_start,
            size = child_size,
            "attached parameter"
        );
        self.notify(parent, parent, None)
    }

    /// Attach several children in order
    pub fn attach_all(&mut self, parent: NodeId, children: &[NodeId]) -> Result<()> {
        for &child in children {
            self.attach(parent, child, None)?;
        }
        Ok(())
    }

    /// Detach `child` from `parent`.
    ///
    /// The child becomes the root of its own tree: it receives a standalone
    /// copy of its constraints and priors and its own fix mask.
    ///
    /// # Errors
    ///
    /// [`ParamTreeError::Ownership`] if `child` is not a direct child of `parent`.
    pub fn detach(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.detach_node(parent, child, true)
    }

    /// Detach, optionally keeping ties that now cross between the two trees.
    /// Moves keep them until the child is attached again.
    fn detach_node(&mut self, parent: NodeId, child: NodeId, prune: bool) -> Result<()> {
        let parent_node = self.node(parent)?;
        let position = parent_node
            .children()
            .iter()
            .position(|&c| c == child)
            .ok_or_else(|| {
                ParamTreeError::Ownership(format!(
                    "{} does not belong to {}, detach parameters from their direct parent",
                    self.name(child).unwrap_or("<invalid>"),
                    parent_node.name
                ))
            })?;
        let local_start = parent_node.slices()[position].start;
        let child_size = self.node(child)?.size;
        let root = self.root_of(parent)?;
        let global_start = self.offset_in_root(parent)? + local_start;

        let own = {
            let stores = self.owned_stores_mut(root)?;
            let own = StoreSet {
                constraints: stores.constraints.window(global_start, child_size),
                priors: stores.priors.window(global_start, child_size),
            };
            stores.constraints.shift_left(global_start, child_size);
            stores.priors.shift_left(global_start, child_size);
            own
        };

        if let NodeKind::Container { children, .. } = &mut self.node_mut(parent)?.kind {
            children.remove(position);
        }
        {
            let node = self.node_mut(child)?;
            node.parent = None;
            node.parent_index = None;
            node.stores = Stores::Owned(own);
            node.observers.unsubscribe_matching(&ObserverId::Node(parent), |o| {
                matches!(o, Observer::PassThrough(p) if *p == parent)
            });
        }

        self.restructure(parent)?;
        self.rebuild_views(child)?;
        self.connect_fixes(child)?;
        if prune {
            self.prune_ties(root)?;
            self.prune_ties(child)?;
        }
        let parent_name = self.hierarchy_name(parent)?;
        let child_name = self.hierarchy_name(child)?;
        debug!(
            parent = %parent_name,
            child = %child_name,
            offset = global_start,
            size = child_size,
            "detached parameter"
        );
        self.notify(parent, parent, None)
    }

    /// Free a detached subtree. Its handles become invalid.
    pub fn release(&mut self, id: NodeId) -> Result<()> {
        if let Some(parent) = self.node(id)?.parent {
            return Err(ParamTreeError::Ownership(format!(
                "{} is still attached to {}, detach it before releasing",
                self.name(id)?,
                self.name(parent)?
            )));
        }
        for node in self.subtree(id)? {
            self.nodes[node.0] = None;
        }
        Ok(())
    }

    /// Build an independent standalone copy of a subtree.
    ///
    /// Values, names, constraints, priors, fixes and ties inside the subtree
    /// are copied; observers are not.
    pub fn deep_copy(&mut self, id: NodeId) -> Result<NodeId> {
        let mut mapping = Vec::new();
        let copy = self.copy_structure(id, &mut mapping)?;

        let (root, offset, size) = self.window(id)?;
        let stores = self.owned_stores(root)?;
        let copied = StoreSet {
            constraints: stores.constraints.window(offset, size),
            priors: stores.priors.window(offset, size),
        };
        self.node_mut(copy)?.stores = Stores::Owned(copied);
        self.connect_fixes(copy)?;

        for &(original, duplicate) in &mapping {
            if let Some(master) = self.node(original)?.tied_to {
                let mapped = mapping.iter().find(|(o, _)| *o == master).map(|(_, d)| *d);
                self.node_mut(duplicate)?.tied_to = mapped;
            }
        }
        Ok(copy)
    }

    fn copy_structure(&mut self, id: NodeId, mapping: &mut Vec<(NodeId, NodeId)>) -> Result<NodeId> {
        let node = self.node(id)?;
        let name = node.name.clone();
        let payload = match &node.kind {
            NodeKind::Leaf { values, .. } => Ok(values.clone()),
            NodeKind::Container { children, .. } => Err(children.clone()),
        };
        let copy = match payload {
            Ok(values) => self.new_leaf(&name, values),
            Err(children) => {
                let copy = self.new_container(&name);
                for child in children {
                    let child_copy = self.copy_structure(child, mapping)?;
                    self.attach(copy, child_copy, None)?;
                }
                copy
            }
        };
        mapping.push((id, copy));
        Ok(copy)
    }

    /// Rename a node; the parent's name table follows and the parent is notified.
    pub fn set_name(&mut self, id: NodeId, name: &str) -> Result<()> {
        let node = self.node_mut(id)?;
        node.name = name.to_string();
        let parent = node.parent;
        if let Some(parent) = parent {
            self.connect_parameters(parent)?;
            self.notify(parent, id, None)?;
        }
        Ok(())
    }

    //===========================================================================
    // Structural bookkeeping
    //===========================================================================

    /// Re-validate everything that depends on the shape below `container`:
    /// sizes and slices up to the root, then views and the fix mask.
    fn restructure(&mut self, container: NodeId) -> Result<()> {
        let mut current = Some(container);
        while let Some(id) = current {
            self.connect_parameters(id)?;
            current = self.node(id)?.parent;
        }
        let root = self.root_of(container)?;
        self.rebuild_views(root)?;
        self.connect_fixes(root)
    }

    /// Recompute a container's size, child slices, parent links and name table.
    fn connect_parameters(&mut self, id: NodeId) -> Result<()> {
        let children = self.node(id)?.children().to_vec();
        let mut slices: Vec<Range<usize>> = Vec::with_capacity(children.len());
        let mut names: Vec<(String, usize)> = Vec::with_capacity(children.len());
        let mut start = 0;
        for (i, &child) in children.iter().enumerate() {
            let node = self.node_mut(child)?;
            node.parent = Some(id);
            node.parent_index = Some(i);
            slices.push(start..start + node.size);
            start += node.size;

            let key = adjust_name_for_printing(&node.name);
            if !names.iter().any(|(n, _)| *n == key) {
                names.push((key, i));
            }
        }

        let node = self.node_mut(id)?;
        node.size = start;
        if let NodeKind::Container {
            slices: own_slices,
            names: own_names,
            ..
        } = &mut node.kind
        {
            *own_slices = slices;
            *own_names = names;
        }
        Ok(())
    }

    /// Point every node below `root` at a window of `root`'s stores.
    fn rebuild_views(&mut self, root: NodeId) -> Result<()> {
        let mut stack = vec![(root, 0usize)];
        while let Some((id, base)) = stack.pop() {
            let node = self.node(id)?;
            let placed: Vec<(NodeId, usize)> = node
                .children()
                .iter()
                .zip(node.slices())
                .map(|(&child, slice)| (child, base + slice.start))
                .collect();
            for (child, offset) in placed {
                let node = self.node_mut(child)?;
                node.stores = Stores::View {
                    root,
                    offset,
                    size: node.size,
                };
                node.fixes = None;
                stack.push((child, offset));
            }
        }
        Ok(())
    }

    /// Rebuild a root's fix mask from the fixed marker in its constraint store.
    pub(crate) fn connect_fixes(&mut self, root: NodeId) -> Result<()> {
        let fixed = self.owned_stores(root)?.constraints.indices(&Constraint::Fixed);
        let node = self.node_mut(root)?;
        node.fixes = if fixed.is_empty() {
            None
        } else {
            let mut mask = vec![false; node.size];
            for i in fixed {
                mask[i] = true;
            }
            Some(mask)
        };
        Ok(())
    }

    /// Drop ties whose master no longer lives in the same tree.
    fn prune_ties(&mut self, root: NodeId) -> Result<()> {
        for id in self.subtree(root)? {
            if let Some(master) = self.node(id)?.tied_to {
                if !self.contains(master) || self.root_of(master)? != root {
                    debug!(node = %id, master = %master, "dropping tie that left the tree");
                    self.node_mut(id)?.tied_to = None;
                }
            }
        }
        Ok(())
    }

    //===========================================================================
    // Stores and windows
    //===========================================================================

    /// The root, offset and size of a node's window onto the root's stores
    pub(crate) fn window(&self, id: NodeId) -> Result<(NodeId, usize, usize)> {
        let node = self.node(id)?;
        Ok(match node.stores {
            Stores::Owned(_) => (id, 0, node.size),
            Stores::View { root, offset, size } => (root, offset, size),
        })
    }

    pub(crate) fn owned_stores(&self, root: NodeId) -> Result<&StoreSet> {
        match &self.node(root)?.stores {
            Stores::Owned(stores) => Ok(stores),
            Stores::View { .. } => Err(ParamTreeError::Hierarchy(format!(
                "{} is attached and does not own its stores",
                self.name(root)?
            ))),
        }
    }

    pub(crate) fn owned_stores_mut(&mut self, root: NodeId) -> Result<&mut StoreSet> {
        let node = self.node_mut(root)?;
        match &mut node.stores {
            Stores::Owned(stores) => Ok(stores),
            Stores::View { .. } => Err(ParamTreeError::Hierarchy(format!(
                "{} is attached and does not own its stores",
                node.name
            ))),
        }
    }

    /// The constraints of a node, as a view in the node's local coordinates
    pub fn constraints(&self, id: NodeId) -> Result<IndexOperationsView<&IndexOperations<Constraint>>> {
        let (root, offset, size) = self.window(id)?;
        Ok(IndexOperationsView::new(&self.owned_stores(root)?.constraints, offset, size))
    }

    pub(crate) fn constraints_mut(
        &mut self,
        id: NodeId,
    ) -> Result<IndexOperationsView<&mut IndexOperations<Constraint>>> {
        let (root, offset, size) = self.window(id)?;
        Ok(IndexOperationsView::new(&mut self.owned_stores_mut(root)?.constraints, offset, size))
    }

    /// The priors of a node, as a view in the node's local coordinates
    pub fn priors(&self, id: NodeId) -> Result<IndexOperationsView<&IndexOperations<PriorRef>>> {
        let (root, offset, size) = self.window(id)?;
        Ok(IndexOperationsView::new(&self.owned_stores(root)?.priors, offset, size))
    }

    pub(crate) fn priors_mut(&mut self, id: NodeId) -> Result<IndexOperationsView<&mut IndexOperations<PriorRef>>> {
        let (root, offset, size) = self.window(id)?;
        Ok(IndexOperationsView::new(&mut self.owned_stores_mut(root)?.priors, offset, size))
    }

    /// The root's fix mask restricted to a node's window; `None` if nothing there is fixed
    pub fn fixes(&self, id: NodeId) -> Result<Option<Vec<bool>>> {
        let (root, offset, size) = self.window(id)?;
        Ok(self.node(root)?.fixes.as_ref().and_then(|mask| {
            let local = &mask[offset..offset + size];
            local.iter().any(|&f| f).then(|| local.to_vec())
        }))
    }

    //===========================================================================
    // Naming and lookup
    //===========================================================================

    /// Dot-joined path from the root, adjusted for printing
    pub fn hierarchy_name(&self, id: NodeId) -> Result<String> {
        let node = self.node(id)?;
        let own = adjust_name_for_printing(&node.name);
        match node.parent {
            Some(parent) => Ok(format!("{}.{}", self.hierarchy_name(parent)?, own)),
            None => Ok(own),
        }
    }

    /// Names of the parameters below a node.
    ///
    /// With `recursive` the names are dotted paths to every leaf; otherwise
    /// they are the direct children's names. `add_self` prefixes this node's name.
    pub fn parameter_names(&self, id: NodeId, add_self: bool, adjust: bool, recursive: bool) -> Result<Vec<String>> {
        let node = self.node(id)?;
        let adjusted = |name: &str| {
            if adjust {
                adjust_name_for_printing(name)
            } else {
                name.to_string()
            }
        };
        if node.is_leaf() {
            return Ok(vec![adjusted(&node.name)]);
        }
        let mut names = Vec::new();
        for &child in node.children() {
            if recursive {
                names.extend(self.parameter_names(child, true, adjust, true)?);
            } else {
                names.push(adjusted(self.name(child)?));
            }
        }
        if add_self {
            let prefix = adjusted(&node.name);
            names = names.into_iter().map(|n| format!("{}.{}", prefix, n)).collect();
        }
        Ok(names)
    }

    /// Direct child of `parent` registered under `name`
    pub fn child_by_name(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        let node = self.node(parent)?;
        let key = adjust_name_for_printing(name);
        if let NodeKind::Container { children, names, .. } = &node.kind {
            if let Some((_, index)) = names.iter().find(|(n, _)| *n == key) {
                return Ok(children[*index]);
            }
        }
        Err(ParamTreeError::Lookup(format!("{} has no parameter named {}", node.name, name)))
    }

    /// The leaves below a node, in coordinate order
    pub fn flattened_parameters(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let node = self.node(id)?;
        if node.is_leaf() {
            return Ok(vec![id]);
        }
        let mut leaves = Vec::new();
        for &child in node.children() {
            leaves.extend(self.flattened_parameters(child)?);
        }
        Ok(leaves)
    }

    /// Sizes of the direct children of a node
    pub fn parameter_sizes(&self, id: NodeId) -> Result<Vec<usize>> {
        self.node(id)?.children().iter().map(|&c| self.size(c)).collect()
    }

    /// All nodes of a subtree, the node itself first
    pub fn subtree(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut nodes = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            nodes.push(current);
            stack.extend(self.node(current)?.children().iter().rev());
        }
        Ok(nodes)
    }

    /// Leaves below `id` whose recursive parameter name matches `pattern` at its start
    pub fn grep_param_names(&self, id: NodeId, pattern: &str) -> Result<Vec<NodeId>> {
        let regex = Regex::new(&format!("^(?:{})", pattern))
            .map_err(|e| ParamTreeError::InvalidArgument(format!("invalid pattern {}: {}", pattern, e)))?;
        let names = self.parameter_names(id, false, false, true)?;
        let leaves = self.flattened_parameters(id)?;
        Ok(names
            .iter()
            .zip(leaves)
            .filter(|(name, _)| regex.is_match(name))
            .map(|(_, leaf)| leaf)
            .collect())
    }

    /// Like [`grep_param_names`](Self::grep_param_names) but fails when nothing matches
    pub fn lookup(&self, id: NodeId, pattern: &str) -> Result<Vec<NodeId>> {
        let found = self.grep_param_names(id, pattern)?;
        if found.is_empty() {
            return Err(ParamTreeError::Lookup(format!(
                "no parameter of {} matches {}",
                self.hierarchy_name(id)?,
                pattern
            )));
        }
        Ok(found)
    }

    //===========================================================================
    // Values
    //===========================================================================

    /// Raw values of a subtree, flattened in coordinate order
    pub fn values(&self, id: NodeId) -> Result<Array1<f64>> {
        let mut out = Vec::with_capacity(self.size(id)?);
        for leaf in self.flattened_parameters(id)? {
            if let NodeKind::Leaf { values, .. } = &self.node(leaf)?.kind {
                out.extend(values.iter().copied());
            }
        }
        Ok(Array1::from(out))
    }

    /// The value buffer of a leaf
    pub fn leaf_values(&self, id: NodeId) -> Result<&Array1<f64>> {
        match &self.node(id)?.kind {
            NodeKind::Leaf { values, .. } => Ok(values),
            NodeKind::Container { .. } => Err(ParamTreeError::InvalidArgument(format!(
                "{} is a container and has no value buffer",
                self.name(id)?
            ))),
        }
    }

    /// Assign raw values to a subtree and notify every observer once.
    pub fn set_values(&mut self, id: NodeId, values: &Array1<f64>) -> Result<()> {
        self.set_values_with(id, values, true)
    }

    /// Assign raw values to a subtree.
    ///
    /// With `trigger_parent` false the notification stops above the lowest
    /// priority tier, so parents are not told; use this for internal updates
    /// that are followed by one outer notification.
    pub fn set_values_with(&mut self, id: NodeId, values: &Array1<f64>, trigger_parent: bool) -> Result<()> {
        let size = self.size(id)?;
        if values.len() != size {
            return Err(ParamTreeError::DimensionMismatch(format!(
                "{} holds {} values, got {}",
                self.name(id)?,
                size,
                values.len()
            )));
        }
        let values = values.to_vec();
        self.write_values(id, &values, trigger_parent)
    }

    fn write_values(&mut self, id: NodeId, values: &[f64], trigger_parent: bool) -> Result<()> {
        let placed: Vec<(NodeId, Range<usize>)> = match &mut self.node_mut(id)?.kind {
            NodeKind::Leaf { values: buffer, .. } => {
                buffer.iter_mut().zip(values).for_each(|(b, v)| *b = *v);
                Vec::new()
            }
            NodeKind::Container { children, slices, .. } => {
                children.iter().copied().zip(slices.iter().cloned()).collect()
            }
        };
        for (child, range) in placed {
            self.write_values(child, &values[range], false)?;
        }
        let min_priority = if trigger_parent { None } else { Some(LOWEST_PRIORITY) };
        self.notify(id, id, min_priority)
    }

    /// Distribute a raw gradient over the leaves' gradient buffers
    pub fn set_gradient(&mut self, id: NodeId, gradient: &Array1<f64>) -> Result<()> {
        let size = self.size(id)?;
        if gradient.len() != size {
            return Err(ParamTreeError::DimensionMismatch(format!(
                "{} holds {} values, got a gradient of length {}",
                self.name(id)?,
                size,
                gradient.len()
            )));
        }
        let mut start = 0;
        for leaf in self.flattened_parameters(id)? {
            let node = self.node_mut(leaf)?;
            let len = node.size;
            if let NodeKind::Leaf { gradient: buffer, .. } = &mut node.kind {
                buffer.iter_mut().zip(gradient.iter().skip(start)).for_each(|(b, g)| *b = *g);
            }
            start += len;
        }
        Ok(())
    }

    /// Gather the leaves' gradient buffers into one raw gradient
    pub fn collect_gradient(&self, id: NodeId) -> Result<Array1<f64>> {
        let mut out = Vec::with_capacity(self.size(id)?);
        for leaf in self.flattened_parameters(id)? {
            if let NodeKind::Leaf { gradient, .. } = &self.node(leaf)?.kind {
                out.extend(gradient.iter().copied());
            }
        }
        Ok(Array1::from(out))
    }

    //===========================================================================
    // Notification
    //===========================================================================

    /// Subscribe a callback to changes of `id`, returning its observer handle
    pub fn subscribe<F>(&mut self, id: NodeId, priority: Priority, hook: F) -> Result<ObserverId>
    where
        F: Fn(&ParamTree, NodeId) + 'static,
    {
        let hook: ChangeHook = Rc::new(hook);
        self.node(id)?;
        self.next_external += 1;
        let observer = ObserverId::External(self.next_external);
        self.node_mut(id)?
            .observers
            .subscribe(observer, Observer::Hook(hook), priority);
        Ok(observer)
    }

    /// Remove an observer from `id`, returning how many subscriptions were dropped
    pub fn unsubscribe(&mut self, id: NodeId, observer: ObserverId) -> Result<usize> {
        Ok(self.node_mut(id)?.observers.unsubscribe(&observer))
    }

    /// Install the hook that runs once per externally visible change of `id`.
    ///
    /// The hook is registered on the node itself at the configured
    /// parameters-changed priority, replacing any previous hook.
    pub fn on_parameters_changed<F>(&mut self, id: NodeId, hook: F) -> Result<()>
    where
        F: Fn(&ParamTree, NodeId) + 'static,
    {
        let hook: ChangeHook = Rc::new(hook);
        let priority = self.config.parameters_changed_priority;
        let node = self.node_mut(id)?;
        node.observers
            .unsubscribe_matching(&ObserverId::Node(id), |o| matches!(o, Observer::Hook(_)));
        node.observers
            .subscribe(ObserverId::Node(id), Observer::Hook(hook), priority);
        Ok(())
    }

    /// Notify every observer of `id` that its parameters changed
    pub fn notify_parameters_changed(&self, id: NodeId) -> Result<()> {
        self.notify(id, id, None)
    }

    pub(crate) fn notify(&self, id: NodeId, origin: NodeId, min_priority: Option<Priority>) -> Result<()> {
        let node = self.node(id)?;
        for subscription in node.observers.active(min_priority) {
            trace!(node = %id, origin = %origin, priority = subscription.priority, "notifying observer");
            match &subscription.callback {
                Observer::PassThrough(parent) => self.notify(*parent, origin, None)?,
                Observer::Hook(hook) => hook(self, origin),
            }
        }
        Ok(())
    }
}
