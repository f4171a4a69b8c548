//! Constraints, fixing, priors and ties on tree nodes
//!
//! Everything here writes through a node's window onto its root's stores, so
//! a constraint placed on a deeply nested leaf lands at the right offset of
//! the root's coordinate space and moves with it when siblings come and go.

use std::collections::BTreeSet;
use std::rc::Rc;

use ndarray::Array1;
use tracing::{debug, warn};

use crate::error::{ParamTreeError, Result};
use crate::parameters::node::NodeId;
use crate::parameters::priors::PriorRef;
use crate::parameters::transformations::{Constraint, Logexp, Logistic, NegativeLogexp, TransformRef};
use crate::parameters::tree::ParamTree;

impl ParamTree {
    //===========================================================================
    // Transforms
    //===========================================================================

    /// Constrain every entry of a node with `transform`.
    ///
    /// Current raw values are first moved into the transform's domain with
    /// [`Transformation::initialize`](crate::parameters::Transformation::initialize).
    /// Entries that already carried a different transform lose it; this is
    /// reported with a warning when
    /// [`TreeConfig::warn_on_reconstrain`](crate::config::TreeConfig) is set.
    /// The fixed marker is not a transform and is left alone.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::rc::Rc;
    /// use paramtree_rs::parameters::{transformations::Exponent, ParamTree};
    ///
    /// let mut tree = ParamTree::new();
    /// let a = tree.new_scalar("a", -2.0);
    /// tree.constrain(a, Rc::new(Exponent)).unwrap();
    /// assert_eq!(tree.values(a).unwrap()[0], 2.0);
    /// ```
    pub fn constrain(&mut self, id: NodeId, transform: TransformRef) -> Result<()> {
        let size = self.size(id)?;
        let values = self.values(id)?.mapv(|v| transform.initialize(v));
        let indices: Vec<usize> = (0..size).collect();
        let overridden = self
            .constraints_mut(id)?
            .add(Constraint::Transform(Rc::clone(&transform)), &indices);

        if !overridden.is_empty() && self.config().warn_on_reconstrain {
            let name = self.hierarchy_name(id)?;
            warn!(
                node = %name,
                indices = ?overridden,
                transform = %transform.label(),
                "reconstraining parameters"
            );
        }
        self.set_values(id, &values)
    }

    /// Constrain a node to positive values with the softplus transform
    pub fn constrain_positive(&mut self, id: NodeId) -> Result<()> {
        self.constrain(id, Rc::new(Logexp))
    }

    /// Constrain a node to negative values
    pub fn constrain_negative(&mut self, id: NodeId) -> Result<()> {
        self.constrain(id, Rc::new(NegativeLogexp))
    }

    /// Constrain a node to the open interval `(lower, upper)`
    pub fn constrain_bounded(&mut self, id: NodeId, lower: f64, upper: f64) -> Result<()> {
        let transform = Logistic::new(lower, upper)?;
        self.constrain(id, Rc::new(transform))
    }

    /// Remove the given properties from every entry of a node.
    ///
    /// An empty slice removes every property, including the fixed marker.
    /// Returns the local indices that lost at least one property.
    pub fn unconstrain(&mut self, id: NodeId, properties: &[Constraint]) -> Result<Vec<usize>> {
        let size = self.size(id)?;
        let all: Vec<usize> = (0..size).collect();
        let mut view = self.constraints_mut(id)?;
        let targets = if properties.is_empty() {
            view.properties()
        } else {
            properties.to_vec()
        };

        let mut removed = BTreeSet::new();
        let mut unfixed = false;
        for property in &targets {
            let freed = view.remove(property, &all);
            unfixed |= matches!(property, Constraint::Fixed) && !freed.is_empty();
            removed.extend(freed);
        }

        if unfixed {
            let (root, _, _) = self.window(id)?;
            self.connect_fixes(root)?;
            debug!(node = %id, "unfixed parameters");
        }
        Ok(removed.into_iter().collect())
    }

    /// Remove the softplus positivity constraint
    pub fn unconstrain_positive(&mut self, id: NodeId) -> Result<Vec<usize>> {
        self.unconstrain(id, &[Constraint::transform(Logexp)])
    }

    /// Remove the negativity constraint
    pub fn unconstrain_negative(&mut self, id: NodeId) -> Result<Vec<usize>> {
        self.unconstrain(id, &[Constraint::transform(NegativeLogexp)])
    }

    /// Remove an interval constraint with the given bounds
    pub fn unconstrain_bounded(&mut self, id: NodeId, lower: f64, upper: f64) -> Result<Vec<usize>> {
        let transform = Logistic::new(lower, upper)?;
        self.unconstrain(id, &[Constraint::transform(transform)])
    }

    //===========================================================================
    // Fixing
    //===========================================================================

    /// Fix every entry of a node, optionally setting it to `value` first.
    ///
    /// Fixed entries drop out of the free vector but keep any transform, so
    /// unfixing restores the constrained behaviour.
    pub fn constrain_fixed(&mut self, id: NodeId, value: Option<f64>) -> Result<()> {
        let size = self.size(id)?;
        if let Some(value) = value {
            self.set_values_with(id, &Array1::from_elem(size, value), false)?;
        }
        let indices: Vec<usize> = (0..size).collect();
        self.fix_indices(id, &indices)
    }

    /// Fix every entry of a node at its current value
    pub fn fix(&mut self, id: NodeId) -> Result<()> {
        self.constrain_fixed(id, None)
    }

    /// Unfix every entry of a node, returning the local indices that were fixed
    pub fn unfix(&mut self, id: NodeId) -> Result<Vec<usize>> {
        let size = self.size(id)?;
        let indices: Vec<usize> = (0..size).collect();
        self.unfix_indices(id, &indices)
    }

    /// Fix the given local entries of a node
    pub fn fix_indices(&mut self, id: NodeId, indices: &[usize]) -> Result<()> {
        self.check_indices(id, indices)?;
        self.constraints_mut(id)?.add(Constraint::Fixed, indices);
        let (root, _, _) = self.window(id)?;
        self.connect_fixes(root)?;
        debug!(node = %id, indices = ?indices, "fixed parameters");
        self.notify(id, id, None)
    }

    /// Unfix the given local entries of a node, returning those that were fixed
    pub fn unfix_indices(&mut self, id: NodeId, indices: &[usize]) -> Result<Vec<usize>> {
        self.check_indices(id, indices)?;
        let removed = self.constraints_mut(id)?.remove(&Constraint::Fixed, indices);
        if !removed.is_empty() {
            let (root, _, _) = self.window(id)?;
            self.connect_fixes(root)?;
            debug!(node = %id, indices = ?removed, "unfixed parameters");
            self.notify(id, id, None)?;
        }
        Ok(removed)
    }

    /// Whether every entry of a non-empty node is fixed
    pub fn is_fixed(&self, id: NodeId) -> Result<bool> {
        Ok(self
            .fixes(id)?
            .map_or(false, |mask| mask.iter().all(|&fixed| fixed)))
    }

    /// Local indices of the fixed entries of a node
    pub fn fixed_indices(&self, id: NodeId) -> Result<Vec<usize>> {
        Ok(self
            .fixes(id)?
            .map(|mask| {
                mask.iter()
                    .enumerate()
                    .filter_map(|(i, &fixed)| fixed.then_some(i))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn check_indices(&self, id: NodeId, indices: &[usize]) -> Result<()> {
        let size = self.size(id)?;
        match indices.iter().find(|&&i| i >= size) {
            Some(index) => Err(ParamTreeError::InvalidArgument(format!(
                "index {} is out of range for {} of size {}",
                index,
                self.hierarchy_name(id)?,
                size
            ))),
            None => Ok(()),
        }
    }

    //===========================================================================
    // Priors
    //===========================================================================

    /// Place `prior` on every entry of a node, replacing any prior already there
    pub fn set_prior(&mut self, id: NodeId, prior: PriorRef) -> Result<()> {
        let size = self.size(id)?;
        let indices: Vec<usize> = (0..size).collect();
        let replaced = {
            let mut view = self.priors_mut(id)?;
            let replaced = view.clear();
            view.add(Rc::clone(&prior), &indices);
            replaced
        };
        if !replaced.is_empty() && self.config().warn_on_reconstrain {
            let name = self.hierarchy_name(id)?;
            warn!(node = %name, indices = ?replaced, prior = %prior.label(), "replacing priors");
        }
        Ok(())
    }

    /// Remove the given priors from a node; an empty slice removes all of them.
    ///
    /// Returns the local indices that lost a prior.
    pub fn unset_priors(&mut self, id: NodeId, priors: &[PriorRef]) -> Result<Vec<usize>> {
        let size = self.size(id)?;
        let all: Vec<usize> = (0..size).collect();
        let mut view = self.priors_mut(id)?;
        let targets = if priors.is_empty() {
            view.properties()
        } else {
            priors.to_vec()
        };
        let mut removed = BTreeSet::new();
        for prior in &targets {
            removed.extend(view.remove(prior, &all));
        }
        Ok(removed.into_iter().collect())
    }

    //===========================================================================
    // Ties
    //===========================================================================

    /// Tie a node to `master` so both always hold the same values.
    ///
    /// The tied node takes the master's values and is fixed; the optimizer
    /// only sees the master, whose gradient collects the tied node's share.
    ///
    /// # Errors
    ///
    /// [`ParamTreeError::Tie`] if the nodes are the same, overlap, differ in
    /// size, live in different trees, or would form a chain of ties.
    pub fn tie_to(&mut self, id: NodeId, master: NodeId) -> Result<()> {
        if id == master {
            return Err(ParamTreeError::Tie(format!(
                "cannot tie {} to itself",
                self.hierarchy_name(id)?
            )));
        }
        let (size, master_size) = (self.size(id)?, self.size(master)?);
        if size != master_size {
            return Err(ParamTreeError::Tie(format!(
                "cannot tie {} of size {} to {} of size {}",
                self.hierarchy_name(id)?,
                size,
                self.hierarchy_name(master)?,
                master_size
            )));
        }
        let root = self.root_of(id)?;
        if self.root_of(master)? != root {
            return Err(ParamTreeError::Tie(format!(
                "{} and {} are not in the same tree",
                self.hierarchy_name(id)?,
                self.hierarchy_name(master)?
            )));
        }
        if self.is_ancestor(id, master)? || self.is_ancestor(master, id)? {
            return Err(ParamTreeError::Tie(format!(
                "{} and {} overlap",
                self.hierarchy_name(id)?,
                self.hierarchy_name(master)?
            )));
        }
        if self.node(master)?.tied_to.is_some() {
            return Err(ParamTreeError::Tie(format!(
                "{} is itself tied, tie to its master instead",
                self.hierarchy_name(master)?
            )));
        }
        for other in self.subtree(root)? {
            if self.node(other)?.tied_to == Some(id) {
                return Err(ParamTreeError::Tie(format!(
                    "{} is the master of {}",
                    self.hierarchy_name(id)?,
                    self.hierarchy_name(other)?
                )));
            }
        }

        let values = self.values(master)?;
        self.node_mut(id)?.tied_to = Some(master);
        self.set_values_with(id, &values, false)?;
        debug!(node = %id, master = %master, "tied parameters");
        self.fix(id)
    }

    /// Remove a node's tie and unfix it; does nothing for an untied node
    pub fn untie(&mut self, id: NodeId) -> Result<()> {
        if self.node_mut(id)?.tied_to.take().is_some() {
            debug!(node = %id, "untied parameters");
            self.unfix(id)?;
        }
        Ok(())
    }

    /// Ties inside a subtree as `(tied offset, master offset, size)` in its coordinates
    pub(crate) fn tie_offsets(&self, id: NodeId) -> Result<Vec<(usize, usize, usize)>> {
        let mut ties = Vec::new();
        for node in self.subtree(id)? {
            if let Some(master) = self.node(node)?.tied_to {
                if self.contains(master) && self.is_ancestor(id, master)? {
                    ties.push((
                        self.offset_for(id, node)?,
                        self.offset_for(id, master)?,
                        self.size(node)?,
                    ));
                }
            }
        }
        Ok(ties)
    }
}
