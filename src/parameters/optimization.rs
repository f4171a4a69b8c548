//! The optimizer-facing view of a parameter tree
//!
//! An optimizer never sees raw values. It works on the *free vector*: raw
//! values mapped through the inverse of each entry's transform, with fixed
//! entries left out. This module converts between the two spaces, applies the
//! chain rule to raw gradients, evaluates priors and draws random restarts.

use std::rc::Rc;

use ndarray::Array1;
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::debug;

use crate::error::{ParamTreeError, Result};
use crate::parameters::node::NodeId;
use crate::parameters::priors::PriorRef;
use crate::parameters::transformations::TransformRef;
use crate::parameters::tree::ParamTree;

impl ParamTree {
    /// Transforms present in a node's window with their local indices
    fn transforms(&self, id: NodeId) -> Result<Vec<(TransformRef, Vec<usize>)>> {
        Ok(self
            .constraints(id)?
            .iter()
            .filter_map(|(c, indices)| c.as_transform().map(|t| (Rc::clone(t), indices)))
            .collect())
    }

    fn prior_entries(&self, id: NodeId) -> Result<Vec<(PriorRef, Vec<usize>)>> {
        Ok(self
            .priors(id)?
            .iter()
            .map(|(p, indices)| (Rc::clone(p), indices))
            .collect())
    }

    /// Number of entries the optimizer sees
    pub fn free_parameter_count(&self, id: NodeId) -> Result<usize> {
        let size = self.size(id)?;
        let fixed = self
            .fixes(id)?
            .map_or(0, |mask| mask.iter().filter(|&&f| f).count());
        Ok(size - fixed)
    }

    /// The free vector of a node.
    ///
    /// Transformed entries are mapped with `finv`; fixed entries are dropped,
    /// so the length is `size - fixed`.
    pub fn free_vector(&self, id: NodeId) -> Result<Array1<f64>> {
        let mut x = self.values(id)?;
        let fixes = self.fixes(id)?;
        let is_fixed = |i: usize| fixes.as_ref().map_or(false, |mask| mask[i]);

        for (transform, indices) in self.transforms(id)? {
            for i in indices {
                if !is_fixed(i) {
                    x[i] = transform.finv(x[i]);
                }
            }
        }

        Ok(match &fixes {
            Some(mask) => x
                .iter()
                .zip(mask)
                .filter(|&(_, &fixed)| !fixed)
                .map(|(v, _)| *v)
                .collect(),
            None => x,
        })
    }

    /// Turn a free vector into a full raw vector without committing it.
    ///
    /// Fixed entries keep their current raw value and tied entries copy their master.
    fn untransform(&self, id: NodeId, free: &Array1<f64>) -> Result<Array1<f64>> {
        let expected = self.free_parameter_count(id)?;
        if free.len() != expected {
            return Err(ParamTreeError::DimensionMismatch(format!(
                "{} has {} free parameters, got a vector of length {}",
                self.hierarchy_name(id)?,
                expected,
                free.len()
            )));
        }

        let fixes = self.fixes(id)?;
        let mut raw = match &fixes {
            Some(mask) => {
                let mut raw = self.values(id)?;
                let mut next = free.iter();
                for (r, _) in raw.iter_mut().zip(mask).filter(|&(_, &fixed)| !fixed) {
                    if let Some(x) = next.next() {
                        *r = *x;
                    }
                }
                raw
            }
            None => free.clone(),
        };

        let is_fixed = |i: usize| fixes.as_ref().map_or(false, |mask| mask[i]);
        for (transform, indices) in self.transforms(id)? {
            for i in indices {
                if !is_fixed(i) {
                    raw[i] = transform.f(raw[i]);
                }
            }
        }
        self.copy_ties(id, &mut raw)?;
        Ok(raw)
    }

    fn copy_ties(&self, id: NodeId, raw: &mut Array1<f64>) -> Result<()> {
        for (tied, master, size) in self.tie_offsets(id)? {
            for k in 0..size {
                raw[tied + k] = raw[master + k];
            }
        }
        Ok(())
    }

    /// Set a node's raw values from a free vector and notify once.
    ///
    /// This is the inverse of [`free_vector`](Self::free_vector):
    /// `apply_free_vector(id, &free_vector(id)?)` leaves the raw values unchanged
    /// up to the transforms' round-trip precision.
    pub fn apply_free_vector(&mut self, id: NodeId, free: &Array1<f64>) -> Result<()> {
        self.apply_free_vector_with(id, free, true)
    }

    /// Like [`apply_free_vector`](Self::apply_free_vector); with `trigger_parent`
    /// false the lowest-priority tier is not notified.
    pub fn apply_free_vector_with(&mut self, id: NodeId, free: &Array1<f64>, trigger_parent: bool) -> Result<()> {
        let raw = self.untransform(id, free)?;
        self.set_values_with(id, &raw, trigger_parent)
    }

    /// Map a raw-space gradient to the free space.
    ///
    /// Tied entries are summed into their masters, transformed entries are
    /// multiplied by `gradfactor` of the current raw value, and fixed entries
    /// are dropped. The result lines up with [`free_vector`](Self::free_vector).
    pub fn gradient_vector(&self, id: NodeId, raw_gradient: &Array1<f64>) -> Result<Array1<f64>> {
        let size = self.size(id)?;
        if raw_gradient.len() != size {
            return Err(ParamTreeError::DimensionMismatch(format!(
                "{} holds {} values, got a gradient of length {}",
                self.hierarchy_name(id)?,
                size,
                raw_gradient.len()
            )));
        }

        let values = self.values(id)?;
        let mut g = raw_gradient.clone();
        // tied shares join the master before the master's gradfactor applies;
        // the tied entries are constrained through the master's value
        for (tied, master, size) in self.tie_offsets(id)? {
            for k in 0..size {
                g[master + k] += g[tied + k];
            }
        }
        for (transform, indices) in self.transforms(id)? {
            for i in indices {
                g[i] *= transform.gradfactor(values[i]);
            }
        }

        Ok(match self.fixes(id)? {
            Some(mask) => g
                .iter()
                .zip(&mask)
                .filter(|&(_, &fixed)| !fixed)
                .map(|(v, _)| *v)
                .collect(),
            None => g,
        })
    }

    /// The free-space gradient built from the leaves' gradient buffers
    pub fn transformed_gradient(&self, id: NodeId) -> Result<Array1<f64>> {
        let raw = self.collect_gradient(id)?;
        self.gradient_vector(id, &raw)
    }

    /// Names of the free entries, one per scalar, aligned with the free vector
    pub fn free_parameter_names(&self, id: NodeId) -> Result<Vec<String>> {
        let names = self.parameter_names(id, false, true, true)?;
        let leaves = self.flattened_parameters(id)?;
        let mut flat = Vec::with_capacity(self.size(id)?);
        for (name, leaf) in names.iter().zip(leaves) {
            match self.size(leaf)? {
                1 => flat.push(name.clone()),
                n => flat.extend((0..n).map(|i| format!("{}[{}]", name, i))),
            }
        }
        Ok(match self.fixes(id)? {
            Some(mask) => flat
                .into_iter()
                .zip(mask)
                .filter(|(_, fixed)| !fixed)
                .map(|(n, _)| n)
                .collect(),
            None => flat,
        })
    }

    //===========================================================================
    // Priors
    //===========================================================================

    /// Sum of the log densities of all priors at the current raw values
    pub fn log_prior(&self, id: NodeId) -> Result<f64> {
        if self.priors(id)?.size() == 0 {
            return Ok(0.0);
        }
        let values = self.values(id)?;
        Ok(self
            .prior_entries(id)?
            .iter()
            .map(|(prior, indices)| indices.iter().map(|&i| prior.lnpdf(values[i])).sum::<f64>())
            .sum())
    }

    /// Raw-space gradient of [`log_prior`](Self::log_prior); zero where no prior applies
    pub fn log_prior_gradient(&self, id: NodeId) -> Result<Array1<f64>> {
        let size = self.size(id)?;
        let mut gradient = Array1::zeros(size);
        if self.priors(id)?.size() == 0 {
            return Ok(gradient);
        }
        let values = self.values(id)?;
        for (prior, indices) in self.prior_entries(id)? {
            for i in indices {
                gradient[i] += prior.lnpdf_grad(values[i]);
            }
        }
        Ok(gradient)
    }

    //===========================================================================
    // Randomization
    //===========================================================================

    /// Randomize a node's free entries with the thread-local generator
    pub fn randomize(&mut self, id: NodeId) -> Result<()> {
        self.randomize_with(id, &mut rand::thread_rng())
    }

    /// Randomize a node's free entries.
    ///
    /// A standard normal draw in free space is mapped through the transforms,
    /// so constraints hold; entries with a prior are then resampled from it.
    /// Fixed entries keep their values and the result is committed with a
    /// single notification.
    pub fn randomize_with<R: Rng>(&mut self, id: NodeId, rng: &mut R) -> Result<()> {
        let free = self.free_parameter_count(id)?;
        let draw: Array1<f64> = (0..free).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
        let mut raw = self.untransform(id, &draw)?;

        let fixes = self.fixes(id)?;
        for (prior, indices) in self.prior_entries(id)? {
            let indices: Vec<usize> = indices
                .into_iter()
                .filter(|&i| !fixes.as_ref().map_or(false, |mask| mask[i]))
                .collect();
            let samples = prior.rvs(indices.len(), &mut *rng);
            for (i, sample) in indices.into_iter().zip(samples) {
                raw[i] = sample;
            }
        }
        self.copy_ties(id, &mut raw)?;

        debug!(node = %id, free, "randomized parameters");
        self.set_values(id, &raw)
    }
}
