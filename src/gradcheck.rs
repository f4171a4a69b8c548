//! Gradient checking against finite differences.
//!
//! A model exposes its objective through [`Objective`]. [`check_gradient`]
//! compares the analytic gradient, pushed through the tree's transforms into
//! free space, with central finite differences taken in that same free space.

use ndarray::Array1;
use tracing::debug;

use crate::error::{ParamTreeError, Result};
use crate::parameters::{NodeId, ParamTree};

/// An objective function over the raw values of a parameter tree.
///
/// Both methods default to [`ParamTreeError::NotImplemented`], so a model
/// only implements what it has.
pub trait Objective {
    /// Value of the objective at the tree's current raw values
    fn objective(&self, _tree: &ParamTree) -> Result<f64> {
        Err(ParamTreeError::NotImplemented("objective".to_string()))
    }

    /// Raw-space gradient of the objective over the checked subtree
    fn objective_gradient(&self, _tree: &ParamTree) -> Result<Array1<f64>> {
        Err(ParamTreeError::NotImplemented("objective_gradient".to_string()))
    }
}

/// Outcome of a gradient check, one entry per free parameter
#[derive(Debug, Clone)]
pub struct GradientCheck {
    /// Free parameter names
    pub names: Vec<String>,

    /// Analytic gradient in free space
    pub analytic: Array1<f64>,

    /// Central finite-difference gradient in free space
    pub numeric: Array1<f64>,

    /// Whether each entry agrees within tolerance
    pub within_tolerance: Vec<bool>,
}

impl GradientCheck {
    /// Whether every entry agrees
    pub fn passed(&self) -> bool {
        self.within_tolerance.iter().all(|&ok| ok)
    }
}

/// Check the analytic gradient of `objective` over the subtree at `id`.
///
/// Step and tolerance come from the tree's
/// [`TreeConfig`](crate::config::TreeConfig). An entry passes when
/// `|analytic - numeric| <= tolerance * (1 + |numeric|)`. The raw values are
/// restored before returning, whatever the outcome.
///
/// # Errors
///
/// [`ParamTreeError::NotImplemented`] if the objective lacks either method.
pub fn check_gradient<O>(tree: &mut ParamTree, id: NodeId, objective: &O) -> Result<GradientCheck>
where
    O: Objective + ?Sized,
{
    let raw_gradient = objective.objective_gradient(tree)?;
    let analytic = tree.gradient_vector(id, &raw_gradient)?;
    let names = tree.free_parameter_names(id)?;

    let original = tree.values(id)?;
    let numeric = numeric_gradient(tree, id, objective);
    tree.set_values(id, &original)?;
    let numeric = numeric?;

    let tolerance = tree.config().gradcheck_tolerance;
    let within_tolerance: Vec<bool> = analytic
        .iter()
        .zip(numeric.iter())
        .map(|(a, n)| (a - n).abs() <= tolerance * (1.0 + n.abs()))
        .collect();

    debug!(
        node = %id,
        checked = within_tolerance.len(),
        failed = within_tolerance.iter().filter(|&&ok| !ok).count(),
        "gradient check"
    );

    Ok(GradientCheck {
        names,
        analytic,
        numeric,
        within_tolerance,
    })
}

fn numeric_gradient<O>(tree: &mut ParamTree, id: NodeId, objective: &O) -> Result<Array1<f64>>
where
    O: Objective + ?Sized,
{
    let step = tree.config().gradcheck_step;
    let x = tree.free_vector(id)?;
    let mut gradient = Array1::zeros(x.len());

    for j in 0..x.len() {
        // scale the step with the parameter
        let h = if x[j].abs() > 1.0 { x[j].abs() * step } else { step };

        let mut forward = x.clone();
        forward[j] += h;
        tree.apply_free_vector(id, &forward)?;
        let f_forward = objective.objective(tree)?;

        let mut backward = x.clone();
        backward[j] -= h;
        tree.apply_free_vector(id, &backward)?;
        let f_backward = objective.objective(tree)?;

        gradient[j] = (f_forward - f_backward) / (2.0 * h);
    }

    Ok(gradient)
}
