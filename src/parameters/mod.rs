//! # Parameter System
//!
//! This module provides a hierarchical parameter system for probabilistic
//! models. Parameters are arranged in a tree whose leaves own raw values and
//! whose containers concatenate their children into one flat coordinate space.
//!
//! ## Key Features
//!
//! - **Tree structure**: attach and detach subtrees freely; sizes, offsets and
//!   name tables follow every change
//! - **Constraints**: reparameterize entries with transforms, fix them, or tie
//!   them to other entries
//! - **Priors**: attach prior distributions and evaluate their log density
//! - **Optimizer interface**: a free vector and matching gradient in
//!   unconstrained space
//! - **Change notification**: priority-ordered observers, with one top-level
//!   notification per externally visible change
//! - **Serialization Support**: save and restore subtrees with serde
//!
//! ## Core Components
//!
//! - [`ParamTree`]: the arena owning every node
//! - [`Node`] and [`NodeId`]: nodes and the handles that refer to them
//! - [`IndexOperations`] and [`IndexOperationsView`]: property-to-index stores
//! - [`Transformation`] and [`Constraint`]: reparameterizations and the fixed marker
//! - [`Prior`]: prior distributions
//! - [`ObserverRegistry`]: priority-ordered subscriptions
//! - [`NodeState`]: serializable snapshot of a subtree
//!
//! ## Example Usage
//!
//! ```rust
//! use std::rc::Rc;
//! use ndarray::array;
//! use paramtree_rs::parameters::{Gaussian, ParamTree};
//!
//! let mut tree = ParamTree::new();
//! let kern = tree.new_container("rbf");
//! let variance = tree.new_scalar("variance", 1.0);
//! let lengthscale = tree.new_leaf("lengthscale", array![1.0, 2.0]);
//! tree.attach_all(kern, &[variance, lengthscale]).unwrap();
//!
//! tree.constrain_positive(kern).unwrap();
//! tree.set_prior(lengthscale, Rc::new(Gaussian::new(1.0, 0.5).unwrap())).unwrap();
//!
//! assert_eq!(tree.free_parameter_count(kern).unwrap(), 3);
//! assert_eq!(tree.lookup(kern, "length").unwrap(), vec![lengthscale]);
//! assert!(tree.log_prior(kern).unwrap() < 0.0);
//! ```

pub mod constrainable;
pub mod index_operations;
pub mod node;
pub mod observer;
pub mod optimization;
pub mod priors;
pub mod state;
pub mod transformations;
pub mod tree;

pub use index_operations::{IndexOperations, IndexOperationsView, IndexProperty};
pub use node::{adjust_name_for_printing, ChangeHook, Node, NodeId, Observer, ObserverId, StoreSet};
pub use observer::{ObserverRegistry, Priority, Subscription, LOWEST_PRIORITY};
pub use priors::{Gaussian, LogGaussian, Prior, PriorRef};
pub use state::{NodeContent, NodeState, PropertyResolver, PropertyState, StockResolver};
pub use transformations::{
    Constraint, Exponent, Logexp, Logistic, NegativeLogexp, TransformRef, Transformation,
};
pub use tree::ParamTree;
