//! Persisted state of a parameter subtree
//!
//! A [`NodeState`] captures names, raw values, fixes, constraints and priors
//! of a subtree in plain data that serde can write out. Transforms and priors
//! are stored by label; a [`PropertyResolver`] turns labels back into objects
//! when the state is restored. Observers and ties are not part of the state:
//! a restored tied entry comes back as a fixed entry holding the shared value.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{ParamTreeError, Result};
use crate::parameters::node::{NodeId, NodeKind};
use crate::parameters::priors::{Gaussian, LogGaussian, PriorRef};
use crate::parameters::transformations::{
    Constraint, Exponent, Logexp, Logistic, NegativeLogexp, TransformRef,
};
use crate::parameters::tree::ParamTree;

/// A property recorded on some local indices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyState {
    /// Label of the transform or prior
    pub label: String,

    /// Local indices the property applies to
    pub indices: Vec<usize>,
}

/// Payload of a node: raw values for a leaf, child states for a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeContent {
    Values(Vec<f64>),
    Children(Vec<NodeState>),
}

/// Serializable snapshot of a subtree.
///
/// Leaves carry the constraints, priors and fixes that apply to their own
/// entries; containers carry only their children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Name of the node
    pub name: String,

    /// Local indices of fixed entries
    #[serde(default)]
    pub fixes: Vec<usize>,

    /// Transforms by label
    #[serde(default)]
    pub constraints: Vec<PropertyState>,

    /// Priors by label
    #[serde(default)]
    pub priors: Vec<PropertyState>,

    /// Values or children
    pub content: NodeContent,
}

impl NodeState {
    fn size(&self) -> usize {
        match &self.content {
            NodeContent::Values(values) => values.len(),
            NodeContent::Children(children) => children.iter().map(NodeState::size).sum(),
        }
    }
}

/// Turns property labels back into transform and prior objects.
pub trait PropertyResolver {
    /// The transform with `label`, if known
    fn transform(&self, label: &str) -> Option<TransformRef>;

    /// The prior with `label`, if known
    fn prior(&self, label: &str) -> Option<PriorRef>;
}

/// Resolves the labels of the transforms and priors shipped with this crate:
/// `+ve`, `-ve`, `exp`, `lower,upper`, `N(mu, sigma)` and `lnN(mu, sigma)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StockResolver;

fn parse_pair(text: &str, separator: &str) -> Option<(f64, f64)> {
    let (first, second) = text.split_once(separator)?;
    Some((first.trim().parse().ok()?, second.trim().parse().ok()?))
}

impl PropertyResolver for StockResolver {
    fn transform(&self, label: &str) -> Option<TransformRef> {
        match label {
            "+ve" => Some(Rc::new(Logexp)),
            "-ve" => Some(Rc::new(NegativeLogexp)),
            "exp" => Some(Rc::new(Exponent)),
            other => {
                let (lower, upper) = parse_pair(other, ",")?;
                let logistic = Logistic::new(lower, upper).ok()?;
                Some(Rc::new(logistic))
            }
        }
    }

    fn prior(&self, label: &str) -> Option<PriorRef> {
        if let Some(args) = label.strip_prefix("lnN(").and_then(|s| s.strip_suffix(')')) {
            let (mu, sigma) = parse_pair(args, ",")?;
            return Some(Rc::new(LogGaussian::new(mu, sigma).ok()?));
        }
        if let Some(args) = label.strip_prefix("N(").and_then(|s| s.strip_suffix(')')) {
            let (mu, sigma) = parse_pair(args, ",")?;
            return Some(Rc::new(Gaussian::new(mu, sigma).ok()?));
        }
        None
    }
}

impl ParamTree {
    /// Capture the state of a subtree
    pub fn state(&self, id: NodeId) -> Result<NodeState> {
        let node = self.node(id)?;
        let content = match &node.kind {
            NodeKind::Leaf { values, .. } => {
                return Ok(NodeState {
                    name: node.name.clone(),
                    fixes: self.fixed_indices(id)?,
                    constraints: self
                        .constraints(id)?
                        .iter()
                        .filter(|(c, _)| !matches!(c, Constraint::Fixed))
                        .map(|(c, indices)| PropertyState {
                            label: c.to_string(),
                            indices,
                        })
                        .collect(),
                    priors: self
                        .priors(id)?
                        .iter()
                        .map(|(p, indices)| PropertyState {
                            label: p.label(),
                            indices,
                        })
                        .collect(),
                    content: NodeContent::Values(values.to_vec()),
                })
            }
            NodeKind::Container { children, .. } => NodeContent::Children(
                children
                    .iter()
                    .map(|&child| self.state(child))
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        Ok(NodeState {
            name: node.name.clone(),
            fixes: Vec::new(),
            constraints: Vec::new(),
            priors: Vec::new(),
            content,
        })
    }

    /// Rebuild a standalone subtree from `state`.
    ///
    /// Every label is resolved and every index checked before any node is
    /// created, so a failed restore leaves the tree untouched.
    ///
    /// # Errors
    ///
    /// * [`ParamTreeError::Lookup`] for a label `resolver` does not know
    /// * [`ParamTreeError::InvalidArgument`] for an index outside its node
    pub fn restore(&mut self, state: &NodeState, resolver: &dyn PropertyResolver) -> Result<NodeId> {
        validate(state, resolver)?;
        self.build(state, resolver)
    }

    fn build(&mut self, state: &NodeState, resolver: &dyn PropertyResolver) -> Result<NodeId> {
        let id = match &state.content {
            NodeContent::Values(values) => self.new_leaf(&state.name, values.iter().copied().collect()),
            NodeContent::Children(children) => {
                let id = self.new_container(&state.name);
                for child in children {
                    let child = self.build(child, resolver)?;
                    self.attach(id, child, None)?;
                }
                id
            }
        };

        let mut constraints = self.constraints_mut(id)?;
        for property in &state.constraints {
            if let Some(transform) = resolver.transform(&property.label) {
                constraints.add(Constraint::Transform(transform), &property.indices);
            }
        }
        if !state.fixes.is_empty() {
            constraints.add(Constraint::Fixed, &state.fixes);
        }
        let mut priors = self.priors_mut(id)?;
        for property in &state.priors {
            if let Some(prior) = resolver.prior(&property.label) {
                priors.add(prior, &property.indices);
            }
        }
        self.connect_fixes(id)?;
        Ok(id)
    }

    /// Serialize a subtree's state to pretty-printed JSON
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::array;
    /// use paramtree_rs::parameters::{ParamTree, StockResolver};
    ///
    /// let mut tree = ParamTree::new();
    /// let a = tree.new_leaf("a", array![1.0, 2.0]);
    /// tree.constrain_positive(a).unwrap();
    ///
    /// let json = tree.to_json(a).unwrap();
    /// let copy = tree.from_json(&json, &StockResolver).unwrap();
    /// assert_eq!(tree.values(copy).unwrap(), array![1.0, 2.0]);
    /// ```
    pub fn to_json(&self, id: NodeId) -> Result<String> {
        let json = serde_json::to_string_pretty(&self.state(id)?)?;
        Ok(json)
    }

    /// Restore a subtree from a JSON string
    pub fn from_json(&mut self, json: &str, resolver: &dyn PropertyResolver) -> Result<NodeId> {
        let state: NodeState = serde_json::from_str(json)?;
        self.restore(&state, resolver)
    }

    /// Save a subtree's state to a JSON file
    pub fn save_json<P: AsRef<Path>>(&self, id: NodeId, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &self.state(id)?)?;
        Ok(())
    }

    /// Load a subtree from a JSON file
    pub fn load_json<P: AsRef<Path>>(&mut self, path: P, resolver: &dyn PropertyResolver) -> Result<NodeId> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        self.from_json(&contents, resolver)
    }
}

fn validate(state: &NodeState, resolver: &dyn PropertyResolver) -> Result<()> {
    let size = state.size();
    let out_of_range = |indices: &[usize]| indices.iter().any(|&i| i >= size);

    for property in &state.constraints {
        if resolver.transform(&property.label).is_none() {
            return Err(ParamTreeError::Lookup(format!(
                "unknown transform {} on {}",
                property.label, state.name
            )));
        }
        if out_of_range(&property.indices) {
            return Err(ParamTreeError::InvalidArgument(format!(
                "constraint {} on {} has an index outside its {} entries",
                property.label, state.name, size
            )));
        }
    }
    for property in &state.priors {
        if resolver.prior(&property.label).is_none() {
            return Err(ParamTreeError::Lookup(format!(
                "unknown prior {} on {}",
                property.label, state.name
            )));
        }
        if out_of_range(&property.indices) {
            return Err(ParamTreeError::InvalidArgument(format!(
                "prior {} on {} has an index outside its {} entries",
                property.label, state.name, size
            )));
        }
    }
    if out_of_range(&state.fixes) {
        return Err(ParamTreeError::InvalidArgument(format!(
            "{} fixes an index outside its {} entries",
            state.name, size
        )));
    }

    if let NodeContent::Children(children) = &state.content {
        for child in children {
            validate(child, resolver)?;
        }
    }
    Ok(())
}
