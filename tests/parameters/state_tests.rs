//! Integration tests for saving and restoring subtrees

use std::rc::Rc;

use ndarray::array;
use paramtree_rs::parameters::{
    Gaussian, LogGaussian, NodeContent, NodeState, ParamTree, Prior, PriorRef, PropertyResolver,
    StockResolver, TransformRef,
};
use paramtree_rs::ParamTreeError;

use crate::test_helpers::scalar_and_pair;

/// Knows no labels at all
struct EmptyResolver;

impl PropertyResolver for EmptyResolver {
    fn transform(&self, _label: &str) -> Option<TransformRef> {
        None
    }

    fn prior(&self, _label: &str) -> Option<PriorRef> {
        None
    }
}

/// A kernel-like tree: `model` holding `kern` (variance, lengthscale) and `noise`
fn nested(tree: &mut ParamTree) -> paramtree_rs::NodeId {
    let model = tree.new_container("model");
    let kern = tree.new_container("kern");
    let variance = tree.new_scalar("variance", 1.5);
    let lengthscale = tree.new_leaf("lengthscale", array![0.5, 2.0, 4.0]);
    let noise = tree.new_scalar("noise", 0.1);
    tree.attach_all(kern, &[variance, lengthscale]).unwrap();
    tree.attach_all(model, &[kern, noise]).unwrap();

    tree.constrain_positive(variance).unwrap();
    tree.constrain_bounded(lengthscale, 0.0, 10.0).unwrap();
    tree.fix_indices(lengthscale, &[1]).unwrap();
    tree.set_prior(variance, Rc::new(LogGaussian::new(0.0, 1.0).unwrap())).unwrap();
    tree.set_prior(noise, Rc::new(Gaussian::new(0.0, 0.5).unwrap())).unwrap();
    tree.fix(noise).unwrap();
    model
}

#[test]
fn test_json_round_trip_preserves_state() {
    let mut tree = ParamTree::new();
    let model = nested(&mut tree);
    let json = tree.to_json(model).unwrap();

    let copy = tree.from_json(&json, &StockResolver).unwrap();
    assert_ne!(copy, model);
    assert_eq!(tree.state(copy).unwrap(), tree.state(model).unwrap());
    assert_eq!(tree.values(copy).unwrap(), tree.values(model).unwrap());
    assert_eq!(tree.fixed_indices(copy).unwrap(), vec![2, 4]);
    assert_eq!(
        tree.free_vector(copy).unwrap(),
        tree.free_vector(model).unwrap()
    );
    assert_eq!(tree.log_prior(copy).unwrap(), tree.log_prior(model).unwrap());
    assert_eq!(
        tree.parameter_names(copy, false, true, true).unwrap(),
        vec!["kern.variance", "kern.lengthscale", "noise"]
    );
}

#[test]
fn test_state_layout() {
    let mut tree = ParamTree::new();
    let model = scalar_and_pair(&mut tree, 3.0);
    tree.constrain_positive(model.a).unwrap();
    tree.fix_indices(model.b, &[0]).unwrap();

    let state = tree.state(model.root).unwrap();
    assert_eq!(state.name, "m");
    assert!(state.fixes.is_empty());
    let children = match &state.content {
        NodeContent::Children(children) => children,
        NodeContent::Values(_) => panic!("container stored as a leaf"),
    };
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].constraints[0].label, "+ve");
    assert_eq!(children[0].constraints[0].indices, vec![0]);
    assert_eq!(children[1].fixes, vec![0]);
    assert_eq!(children[1].content, NodeContent::Values(vec![0.25, -1.5]));
}

#[test]
fn test_restore_subtree() {
    let mut tree = ParamTree::new();
    let model = nested(&mut tree);
    let kern = tree.child_by_name(model, "kern").unwrap();

    let state = tree.state(kern).unwrap();
    let copy = tree.restore(&state, &StockResolver).unwrap();
    assert!(tree.parent(copy).unwrap().is_none());
    assert_eq!(tree.size(copy).unwrap(), 4);
    assert_eq!(tree.values(copy).unwrap(), array![1.5, 0.5, 2.0, 4.0]);
    assert_eq!(tree.fixed_indices(copy).unwrap(), vec![2]);

    // the restored copy can be attached elsewhere
    let other = tree.new_container("other");
    tree.attach(other, copy, None).unwrap();
    assert_eq!(tree.fixed_indices(other).unwrap(), vec![2]);
    assert_eq!(tree.free_parameter_count(other).unwrap(), 3);
}

#[test]
fn test_save_and_load_file() {
    let mut tree = ParamTree::new();
    let model = nested(&mut tree);
    let path = std::env::temp_dir().join(format!("paramtree_state_{}.json", std::process::id()));

    tree.save_json(model, &path).unwrap();
    let loaded = tree.load_json(&path, &StockResolver);
    std::fs::remove_file(&path).unwrap();

    let loaded = loaded.unwrap();
    assert_eq!(tree.state(loaded).unwrap(), tree.state(model).unwrap());
}

#[test]
fn test_missing_file_is_io_error() {
    let mut tree = ParamTree::new();
    let path = std::env::temp_dir().join("paramtree_state_does_not_exist.json");
    assert!(matches!(
        tree.load_json(&path, &StockResolver),
        Err(ParamTreeError::IoError(_))
    ));
}

#[test]
fn test_malformed_json_is_rejected() {
    let mut tree = ParamTree::new();
    assert!(matches!(
        tree.from_json("{\"name\": \"a\"", &StockResolver),
        Err(ParamTreeError::JsonError(_))
    ));
    assert!(tree.is_empty());
}

#[test]
fn test_unknown_label_leaves_tree_unchanged() {
    let mut tree = ParamTree::new();
    let model = nested(&mut tree);
    let nodes = tree.len();
    let json = tree.to_json(model).unwrap();

    assert!(matches!(
        tree.from_json(&json, &EmptyResolver),
        Err(ParamTreeError::Lookup(_))
    ));
    assert_eq!(tree.len(), nodes);
}

#[test]
fn test_index_out_of_range_is_rejected() {
    let mut tree = ParamTree::new();
    let state = NodeState {
        name: "a".to_string(),
        fixes: vec![3],
        constraints: Vec::new(),
        priors: Vec::new(),
        content: NodeContent::Values(vec![1.0, 2.0]),
    };
    assert!(matches!(
        tree.restore(&state, &StockResolver),
        Err(ParamTreeError::InvalidArgument(_))
    ));
    assert!(tree.is_empty());
}

#[test]
fn test_stock_resolver_labels() {
    let resolver = StockResolver;
    for label in ["+ve", "-ve", "exp", "0,10", "-1.5, 2"] {
        let transform = resolver.transform(label).unwrap();
        assert_eq!(transform.label(), label.replace(' ', ""));
    }
    assert!(resolver.transform("10,0").is_none());
    assert!(resolver.transform("sigmoid").is_none());

    let normal = resolver.prior("N(0, 1)").unwrap();
    assert_eq!(normal.label(), Gaussian::new(0.0, 1.0).unwrap().label());
    assert!(resolver.prior("lnN(0, 2)").is_some());
    assert!(resolver.prior("N(0, -1)").is_none());
    assert!(resolver.prior("Gamma(1, 1)").is_none());
}
