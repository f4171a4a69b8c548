//! Configuration options for a parameter tree.
//!
//! This module defines the knobs that influence bookkeeping behaviour of a
//! [`ParamTree`](crate::parameters::ParamTree): whether re-constraining emits
//! warnings, the priority at which change hooks are registered, and the
//! defaults used by gradient checking.

use serde::{Deserialize, Serialize};

use crate::parameters::observer::Priority;

/// Configuration options for a parameter tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Emit a warning event when a constraint or prior overrides an existing one. Default: true
    pub warn_on_reconstrain: bool,

    /// Priority at which a node's own parameters-changed hook is registered. Default: -100
    pub parameters_changed_priority: Priority,

    /// Step size for finite-difference gradient checks. Default: 1e-6
    pub gradcheck_step: f64,

    /// Relative tolerance for finite-difference gradient checks. Default: 1e-3
    pub gradcheck_tolerance: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            warn_on_reconstrain: true,
            parameters_changed_priority: -100,
            gradcheck_step: 1e-6,
            gradcheck_tolerance: 1e-3,
        }
    }
}

impl TreeConfig {
    /// Enable or disable reconstraining warnings.
    pub fn with_reconstrain_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_reconstrain = enabled;
        self
    }

    /// Set the priority used for parameters-changed hooks.
    pub fn with_parameters_changed_priority(mut self, priority: Priority) -> Self {
        self.parameters_changed_priority = priority;
        self
    }

    /// Set the finite-difference step used by gradient checks.
    pub fn with_gradcheck_step(mut self, step: f64) -> Self {
        self.gradcheck_step = step;
        self
    }

    /// Set the tolerance used by gradient checks.
    pub fn with_gradcheck_tolerance(mut self, tolerance: f64) -> Self {
        self.gradcheck_tolerance = tolerance;
        self
    }
}
