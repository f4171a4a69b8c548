//! Prior distributions over raw parameter values
//!
//! A [`Prior`] is consumed by the tree through three operations: the log
//! density, its derivative, and sampling. Priors are recorded per index in a
//! node's prior store and evaluated on raw (untransformed) values.

use std::f64::consts::PI;
use std::fmt;
use std::rc::Rc;

use rand::RngCore;
use rand_distr::{Distribution, LogNormal, Normal};

use crate::error::{ParamTreeError, Result};
use crate::parameters::index_operations::IndexProperty;

/// Shared handle to a prior object
pub type PriorRef = Rc<dyn Prior>;

/// A univariate prior distribution.
pub trait Prior: fmt::Debug {
    /// Log density at `x`
    fn lnpdf(&self, x: f64) -> f64;

    /// Derivative of the log density at `x`
    fn lnpdf_grad(&self, x: f64) -> f64;

    /// Draw `n` independent samples
    fn rvs(&self, n: usize, rng: &mut dyn RngCore) -> Vec<f64>;

    /// Identity of the prior; equal labels mean the same prior
    fn label(&self) -> String;
}

impl IndexProperty for PriorRef {
    fn label(&self) -> String {
        Prior::label(self.as_ref())
    }
}

fn check_scale(sigma: f64) -> Result<()> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(ParamTreeError::InvalidArgument(format!(
            "prior scale must be positive and finite, got {}",
            sigma
        )));
    }
    Ok(())
}

/// Normal prior `N(mu, sigma^2)`
#[derive(Debug, Clone, Copy)]
pub struct Gaussian {
    mu: f64,
    sigma: f64,
    normal: Normal<f64>,
}

impl Gaussian {
    /// Create a Gaussian prior with mean `mu` and standard deviation `sigma`
    pub fn new(mu: f64, sigma: f64) -> Result<Self> {
        check_scale(sigma)?;
        let normal = Normal::new(mu, sigma)
            .map_err(|e| ParamTreeError::InvalidArgument(format!("{}", e)))?;
        Ok(Self { mu, sigma, normal })
    }

    /// Mean
    pub fn mu(&self) -> f64 {
        self.mu
    }

    /// Standard deviation
    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl Prior for Gaussian {
    fn lnpdf(&self, x: f64) -> f64 {
        let z = (x - self.mu) / self.sigma;
        -0.5 * (2.0 * PI).ln() - self.sigma.ln() - 0.5 * z * z
    }

    fn lnpdf_grad(&self, x: f64) -> f64 {
        -(x - self.mu) / (self.sigma * self.sigma)
    }

    fn rvs(&self, n: usize, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..n).map(|_| self.normal.sample(rng)).collect()
    }

    fn label(&self) -> String {
        format!("N({}, {})", self.mu, self.sigma)
    }
}

/// Log-normal prior: `ln x ~ N(mu, sigma^2)`, supported on `x > 0`
#[derive(Debug, Clone, Copy)]
pub struct LogGaussian {
    mu: f64,
    sigma: f64,
    log_normal: LogNormal<f64>,
}

impl LogGaussian {
    /// Create a log-normal prior
    pub fn new(mu: f64, sigma: f64) -> Result<Self> {
        check_scale(sigma)?;
        let log_normal = LogNormal::new(mu, sigma)
            .map_err(|e| ParamTreeError::InvalidArgument(format!("{}", e)))?;
        Ok(Self {
            mu,
            sigma,
            log_normal,
        })
    }

    /// Location of `ln x`
    pub fn mu(&self) -> f64 {
        self.mu
    }

    /// Scale of `ln x`
    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl Prior for LogGaussian {
    fn lnpdf(&self, x: f64) -> f64 {
        if x <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let z = (x.ln() - self.mu) / self.sigma;
        -0.5 * (2.0 * PI).ln() - self.sigma.ln() - x.ln() - 0.5 * z * z
    }

    fn lnpdf_grad(&self, x: f64) -> f64 {
        -((x.ln() - self.mu) / (self.sigma * self.sigma) + 1.0) / x
    }

    fn rvs(&self, n: usize, rng: &mut dyn RngCore) -> Vec<f64> {
        (0..n).map(|_| self.log_normal.sample(rng)).collect()
    }

    fn label(&self) -> String {
        format!("lnN({}, {})", self.mu, self.sigma)
    }
}
