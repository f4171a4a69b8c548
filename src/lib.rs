//! # paramtree-rs
//!
//! `paramtree-rs` organizes the parameters of a probabilistic model into a
//! tree. Leaves hold raw values, containers concatenate their children into
//! one flat coordinate space, and the root keeps the bookkeeping that an
//! optimizer needs.
//!
//! The library provides:
//! - An arena of leaf and container nodes with attach, detach and name lookup
//! - Transforms (positivity, negativity, intervals), fixing and ties
//! - Priors with log density, gradient and sampling
//! - A free vector and gradient chain rule for gradient-based optimizers
//! - Priority-ordered change notification
//! - Serializable state and gradient checking
//!
//! ## Basic Usage
//!
//! ```
//! use ndarray::array;
//! use paramtree_rs::parameters::ParamTree;
//!
//! let mut tree = ParamTree::new();
//! let model = tree.new_container("model");
//! let variance = tree.new_scalar("variance", 2.0);
//! let weights = tree.new_leaf("weights", array![0.5, -1.0]);
//! tree.attach_all(model, &[variance, weights]).unwrap();
//!
//! tree.constrain_positive(variance).unwrap();
//! tree.fix(weights).unwrap();
//!
//! // The optimizer sees only the variance, in unconstrained space
//! let x = tree.free_vector(model).unwrap();
//! assert_eq!(x.len(), 1);
//!
//! tree.apply_free_vector(model, &array![0.0]).unwrap();
//! assert!(tree.values(variance).unwrap()[0] > 0.0);
//! ```

// Public modules
pub mod config;
pub mod error;
pub mod gradcheck;

// Parameter system
pub mod parameters;

// Re-exports for convenience
pub use config::TreeConfig;
pub use error::{ParamTreeError, Result};
pub use gradcheck::{check_gradient, GradientCheck, Objective};
pub use parameters::{NodeId, ParamTree};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
