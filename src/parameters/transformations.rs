//! Value transformations for constrained parameters
//!
//! A [`Transformation`] maps an unconstrained optimizer-space value `x` to a
//! raw model-space value `f(x)` that satisfies a constraint (positivity,
//! negativity, an interval). The optimizer works in `x`; the model sees `f(x)`.
//! [`Constraint`] is the property recorded in a node's constraint store: either
//! a transformation or the fixed marker.

use std::fmt;
use std::rc::Rc;

use crate::error::{ParamTreeError, Result};
use crate::parameters::index_operations::IndexProperty;

/// Above this the softplus is numerically the identity.
const LOGEXP_LIMIT: f64 = 36.0;

/// Shared handle to a transformation object
pub type TransformRef = Rc<dyn Transformation>;

/// An elementwise reparameterization between optimizer space and raw space.
pub trait Transformation: fmt::Debug {
    /// Map an optimizer-space value to raw space
    fn f(&self, x: f64) -> f64;

    /// Map a raw value back to optimizer space
    fn finv(&self, f: f64) -> f64;

    /// `df/dx`, expressed in terms of the raw value `f`
    fn gradfactor(&self, f: f64) -> f64;

    /// Move a raw value into the transformation's domain when the constraint is first applied
    fn initialize(&self, f: f64) -> f64 {
        f
    }

    /// Identity of the transformation; equal labels mean the same constraint
    fn label(&self) -> String;
}

/// Softplus positivity constraint: `f(x) = ln(1 + e^x)`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Logexp;

impl Transformation for Logexp {
    fn f(&self, x: f64) -> f64 {
        if x > LOGEXP_LIMIT {
            x
        } else {
            x.exp().ln_1p()
        }
    }

    fn finv(&self, f: f64) -> f64 {
        if f > LOGEXP_LIMIT {
            f
        } else {
            // ln(e^f - 1) without cancellation, floored so f = 0 stays finite
            f + (-(-f).exp_m1()).max(f64::MIN_POSITIVE).ln()
        }
    }

    fn gradfactor(&self, f: f64) -> f64 {
        -(-f).exp_m1()
    }

    fn initialize(&self, f: f64) -> f64 {
        f.abs()
    }

    fn label(&self) -> String {
        "+ve".to_string()
    }
}

/// Softplus negativity constraint: `f(x) = -ln(1 + e^x)`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NegativeLogexp;

impl Transformation for NegativeLogexp {
    fn f(&self, x: f64) -> f64 {
        -Logexp.f(x)
    }

    fn finv(&self, f: f64) -> f64 {
        Logexp.finv(-f)
    }

    fn gradfactor(&self, f: f64) -> f64 {
        -Logexp.gradfactor(-f)
    }

    fn initialize(&self, f: f64) -> f64 {
        -f.abs()
    }

    fn label(&self) -> String {
        "-ve".to_string()
    }
}

/// Exponential positivity constraint: `f(x) = e^x`, so the optimizer sees `ln f`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Exponent;

impl Transformation for Exponent {
    fn f(&self, x: f64) -> f64 {
        x.exp()
    }

    fn finv(&self, f: f64) -> f64 {
        f.ln()
    }

    fn gradfactor(&self, f: f64) -> f64 {
        f
    }

    fn initialize(&self, f: f64) -> f64 {
        f.abs()
    }

    fn label(&self) -> String {
        "exp".to_string()
    }
}

/// Interval constraint: `f(x) = lower + (upper - lower) / (1 + e^-x)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Logistic {
    lower: f64,
    upper: f64,
}

impl Logistic {
    /// Create a logistic transformation onto `(lower, upper)`
    ///
    /// # Examples
    ///
    /// ```
    /// use paramtree_rs::parameters::transformations::{Logistic, Transformation};
    ///
    /// let t = Logistic::new(0.0, 10.0).unwrap();
    /// assert_eq!(t.f(0.0), 5.0);
    /// assert!(Logistic::new(1.0, 1.0).is_err());
    /// ```
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !(lower.is_finite() && upper.is_finite()) || lower >= upper {
            return Err(ParamTreeError::InvalidArgument(format!(
                "logistic bounds must be finite with lower < upper, got ({}, {})",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }

    /// Lower end of the interval
    pub fn lower(&self) -> f64 {
        self.lower
    }

    /// Upper end of the interval
    pub fn upper(&self) -> f64 {
        self.upper
    }

    fn difference(&self) -> f64 {
        self.upper - self.lower
    }
}

impl Transformation for Logistic {
    fn f(&self, x: f64) -> f64 {
        self.lower + self.difference() / (1.0 + (-x).exp())
    }

    fn finv(&self, f: f64) -> f64 {
        // keep f strictly inside the bounds so the log stays finite
        let margin = f64::EPSILON * self.difference().max(self.lower.abs()).max(self.upper.abs());
        let f = f.clamp(self.lower + margin, self.upper - margin);
        ((f - self.lower) / (self.upper - f)).ln()
    }

    fn gradfactor(&self, f: f64) -> f64 {
        (f - self.lower) * (self.upper - f) / self.difference()
    }

    fn initialize(&self, f: f64) -> f64 {
        if f <= self.lower || f >= self.upper {
            self.f(0.0)
        } else {
            f
        }
    }

    fn label(&self) -> String {
        format!("{},{}", self.lower, self.upper)
    }
}

/// A property of the constraint store
#[derive(Clone)]
pub enum Constraint {
    /// The entry is excluded from the free parameter vector
    Fixed,

    /// The entry is reparameterized by a transformation
    Transform(TransformRef),
}

impl Constraint {
    /// Wrap a transformation object
    pub fn transform<T: Transformation + 'static>(transform: T) -> Self {
        Constraint::Transform(Rc::new(transform))
    }

    /// The transformation, if this is not the fixed marker
    pub fn as_transform(&self) -> Option<&TransformRef> {
        match self {
            Constraint::Fixed => None,
            Constraint::Transform(t) => Some(t),
        }
    }
}

impl IndexProperty for Constraint {
    fn label(&self) -> String {
        match self {
            Constraint::Fixed => "fixed".to_string(),
            Constraint::Transform(t) => t.label(),
        }
    }

    fn is_exclusive(&self) -> bool {
        matches!(self, Constraint::Transform(_))
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Fixed => write!(f, "Fixed"),
            Constraint::Transform(t) => write!(f, "Transform({})", t.label()),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
