//! Integration tests for constraints, fixes, priors and ties
//!
//! These tests verify that constraint bookkeeping lands at the right offsets and follows nodes around.

use std::rc::Rc;
use std::sync::{Arc, Mutex};

use ndarray::array;
use paramtree_rs::parameters::{
    Constraint, Exponent, Gaussian, LogGaussian, Logexp, Logistic, NodeId, ParamTree, PriorRef,
};
use paramtree_rs::{ParamTreeError, TreeConfig};
use tracing_subscriber::layer::SubscriberExt;

struct Kernel {
    root: NodeId,
    kern: NodeId,
    variance: NodeId,
    lengthscale: NodeId,
    noise: NodeId,
}

fn kernel(tree: &mut ParamTree) -> Kernel {
    let root = tree.new_container("gp");
    let kern = tree.new_container("rbf");
    let variance = tree.new_scalar("variance", 1.5);
    let lengthscale = tree.new_leaf("lengthscale", array![0.5, 2.0]);
    let noise = tree.new_scalar("noise", 0.1);
    tree.attach_all(kern, &[variance, lengthscale]).unwrap();
    tree.attach_all(root, &[kern, noise]).unwrap();
    Kernel {
        root,
        kern,
        variance,
        lengthscale,
        noise,
    }
}

fn labels(tree: &ParamTree, id: NodeId) -> Vec<(String, Vec<usize>)> {
    tree.constraints(id)
        .unwrap()
        .iter()
        .map(|(c, indices)| (c.to_string(), indices))
        .collect()
}

/// A tracing layer that records the level and message of every event
#[derive(Clone, Default)]
struct EventCapture {
    events: Arc<Mutex<Vec<(tracing::Level, String)>>>,
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

/// Run `f` under a capturing subscriber and return the warning messages it emitted
fn warnings_from<F: FnOnce()>(f: F) -> Vec<String> {
    let capture = EventCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    tracing::subscriber::with_default(subscriber, f);
    let events = capture.events.lock().unwrap();
    events
        .iter()
        .filter(|(level, _)| *level == tracing::Level::WARN)
        .map(|(_, message)| message.clone())
        .collect()
}

#[test]
fn test_constraints_on_nested_nodes() {
    let mut tree = ParamTree::new();
    let k = kernel(&mut tree);
    tree.constrain_positive(k.kern).unwrap();
    tree.constrain_bounded(k.noise, 0.0, 1.0).unwrap();

    assert_eq!(
        labels(&tree, k.root),
        vec![("+ve".to_string(), vec![0, 1, 2]), ("0,1".to_string(), vec![3])]
    );
    assert_eq!(labels(&tree, k.lengthscale), vec![("+ve".to_string(), vec![0, 1])]);
    assert_eq!(tree.values(k.noise).unwrap()[0], 0.1);
}

#[test]
fn test_reconstraining_a_child_overrides_the_parent_transform() {
    let mut tree = ParamTree::new();
    let k = kernel(&mut tree);
    tree.constrain_positive(k.kern).unwrap();
    tree.constrain(k.lengthscale, Rc::new(Exponent)).unwrap();

    assert_eq!(
        labels(&tree, k.kern),
        vec![("+ve".to_string(), vec![0]), ("exp".to_string(), vec![1, 2])]
    );
    assert_eq!(tree.unconstrain_positive(k.kern).unwrap(), vec![0]);
    assert_eq!(labels(&tree, k.kern), vec![("exp".to_string(), vec![1, 2])]);
}

#[test]
fn test_reconstrain_warning_can_be_disabled() {
    let reconstrain = |config: TreeConfig| {
        let mut tree = ParamTree::with_config(config);
        let k = kernel(&mut tree);
        let warnings = warnings_from(|| {
            tree.constrain_positive(k.root).unwrap();
            tree.constrain_bounded(k.variance, 1.0, 2.0).unwrap();
        });
        let bounded = tree
            .constraints(k.root)
            .unwrap()
            .indices(&Constraint::transform(Logistic::new(1.0, 2.0).unwrap()));
        (warnings, bounded)
    };

    let (warnings, bounded) = reconstrain(TreeConfig::default());
    assert_eq!(warnings, vec!["reconstraining parameters".to_string()]);
    assert_eq!(bounded, vec![0]);

    let (warnings, bounded) = reconstrain(TreeConfig::default().with_reconstrain_warnings(false));
    assert!(warnings.is_empty());
    assert_eq!(bounded, vec![0]);
}

#[test]
fn test_replacing_a_prior_warns() {
    let mut tree = ParamTree::new();
    let k = kernel(&mut tree);
    let warnings = warnings_from(|| {
        tree.set_prior(k.variance, Rc::new(Gaussian::new(0.0, 1.0).unwrap())).unwrap();
    });
    assert!(warnings.is_empty());

    let warnings = warnings_from(|| {
        tree.set_prior(k.variance, Rc::new(Gaussian::new(2.0, 1.0).unwrap())).unwrap();
    });
    assert_eq!(warnings, vec!["replacing priors".to_string()]);
}

#[test]
fn test_invalid_bounds_leave_the_tree_alone() {
    let mut tree = ParamTree::new();
    let k = kernel(&mut tree);
    assert!(matches!(
        tree.constrain_bounded(k.noise, 1.0, 0.0),
        Err(ParamTreeError::InvalidArgument(_))
    ));
    assert!(labels(&tree, k.root).is_empty());
    assert!(matches!(tree.fix_indices(k.lengthscale, &[2]), Err(ParamTreeError::InvalidArgument(_))));
    assert!(tree.fixes(k.root).unwrap().is_none());
}

#[test]
fn test_fix_mask_lives_at_the_root() {
    let mut tree = ParamTree::new();
    let k = kernel(&mut tree);
    tree.fix(k.variance).unwrap();

    assert_eq!(tree.node(k.root).unwrap().fixes(), Some(&[true, false, false, false][..]));
    assert!(tree.node(k.kern).unwrap().fixes().is_none());
    assert_eq!(tree.fixes(k.kern).unwrap(), Some(vec![true, false, false]));
    assert_eq!(tree.fixes(k.lengthscale).unwrap(), None);
    assert_eq!(tree.free_parameter_count(k.root).unwrap(), 3);

    // detaching takes the fix along
    tree.detach(k.root, k.kern).unwrap();
    assert!(tree.node(k.root).unwrap().fixes().is_none());
    assert_eq!(tree.node(k.kern).unwrap().fixes(), Some(&[true, false, false][..]));

    // and reattaching brings it back
    tree.attach(k.root, k.kern, Some(0)).unwrap();
    assert_eq!(tree.fixed_indices(k.root).unwrap(), vec![0]);
    assert!(tree.node(k.kern).unwrap().fixes().is_none());
}

#[test]
fn test_unfix_restores_the_transform() {
    let mut tree = ParamTree::new();
    let k = kernel(&mut tree);
    tree.constrain(k.variance, Rc::new(Exponent)).unwrap();
    tree.fix(k.variance).unwrap();
    assert_eq!(tree.free_parameter_count(k.root).unwrap(), 3);

    tree.unfix(k.variance).unwrap();
    let x = tree.free_vector(k.root).unwrap();
    assert_eq!(x.len(), 4);
    assert!((x[0] - 1.5f64.ln()).abs() < 1e-12);
}

#[test]
fn test_partial_fixes() {
    let mut tree = ParamTree::new();
    let k = kernel(&mut tree);
    tree.fix_indices(k.lengthscale, &[1]).unwrap();
    assert!(!tree.is_fixed(k.lengthscale).unwrap());
    assert_eq!(tree.fixed_indices(k.root).unwrap(), vec![2]);

    tree.constrain_fixed(k.noise, Some(0.3)).unwrap();
    assert!(tree.is_fixed(k.noise).unwrap());
    assert_eq!(tree.values(k.noise).unwrap()[0], 0.3);
    assert_eq!(tree.fixed_indices(k.root).unwrap(), vec![2, 3]);

    assert_eq!(tree.unfix_indices(k.lengthscale, &[0, 1]).unwrap(), vec![1]);
    assert_eq!(tree.unconstrain(k.root, &[Constraint::Fixed]).unwrap(), vec![3]);
    assert!(tree.fixes(k.root).unwrap().is_none());
}

#[test]
fn test_priors_follow_their_nodes() {
    let mut tree = ParamTree::new();
    let k = kernel(&mut tree);
    tree.set_prior(k.lengthscale, Rc::new(LogGaussian::new(0.0, 1.0).unwrap()))
        .unwrap();
    tree.set_prior(k.noise, Rc::new(Gaussian::new(0.0, 1.0).unwrap())).unwrap();

    let priors: Vec<(String, Vec<usize>)> = tree
        .priors(k.root)
        .unwrap()
        .iter()
        .map(|(p, indices)| (p.label(), indices))
        .collect();
    assert_eq!(
        priors,
        vec![("lnN(0, 1)".to_string(), vec![1, 2]), ("N(0, 1)".to_string(), vec![3])]
    );

    tree.detach(k.root, k.kern).unwrap();
    let same_prior: PriorRef = Rc::new(LogGaussian::new(0.0, 1.0).unwrap());
    assert_eq!(tree.priors(k.kern).unwrap().indices(&same_prior), vec![1, 2]);
    assert_eq!(tree.priors(k.root).unwrap().size(), 1);
    assert_eq!(tree.unset_priors(k.root, &[]).unwrap(), vec![0]);
    assert_eq!(tree.priors(k.root).unwrap().size(), 0);
}

#[test]
fn test_prior_and_transform_share_an_index() {
    let mut tree = ParamTree::new();
    let k = kernel(&mut tree);
    tree.constrain_positive(k.variance).unwrap();
    tree.set_prior(k.variance, Rc::new(Gaussian::new(1.0, 1.0).unwrap())).unwrap();
    assert_eq!(
        tree.constraints(k.root).unwrap().indices(&Constraint::transform(Logexp)),
        vec![0]
    );
    assert_eq!(tree.priors(k.root).unwrap().size(), 1);
}

#[test]
fn test_ties_copy_values_and_fix() {
    let mut tree = ParamTree::new();
    let root = tree.new_container("m");
    let left = tree.new_container("left");
    let right = tree.new_container("right");
    let a = tree.new_leaf("a", array![1.0, 2.0]);
    let b = tree.new_leaf("b", array![5.0, 6.0]);
    tree.attach(left, a, None).unwrap();
    tree.attach(right, b, None).unwrap();
    tree.attach_all(root, &[left, right]).unwrap();

    tree.tie_to(b, a).unwrap();
    assert_eq!(tree.values(b).unwrap(), array![1.0, 2.0]);
    assert_eq!(tree.node(b).unwrap().tied_to(), Some(a));
    assert_eq!(tree.free_parameter_count(root).unwrap(), 2);

    // detaching the tied node drops the tie
    tree.detach(root, right).unwrap();
    assert_eq!(tree.node(b).unwrap().tied_to(), None);
    assert!(tree.is_fixed(b).unwrap());
}

#[test]
fn test_ties_survive_repositioning() {
    let mut tree = ParamTree::new();
    let root = tree.new_container("m");
    let a = tree.new_leaf("a", array![1.0, 2.0]);
    let b = tree.new_leaf("b", array![5.0, 6.0]);
    let c = tree.new_scalar("c", 3.0);
    tree.attach_all(root, &[a, b, c]).unwrap();
    tree.tie_to(b, a).unwrap();

    // move the tied node in front of its master
    tree.attach(root, b, Some(0)).unwrap();
    assert_eq!(tree.node(root).unwrap().children(), &[b, a, c][..]);
    assert_eq!(tree.node(b).unwrap().tied_to(), Some(a));
    assert_eq!(tree.fixed_indices(root).unwrap(), vec![0, 1]);
    tree.apply_free_vector(root, &array![10.0, 20.0, 30.0]).unwrap();
    assert_eq!(tree.values(root).unwrap(), array![10.0, 20.0, 10.0, 20.0, 30.0]);
    assert_eq!(
        tree.gradient_vector(root, &array![1.0, 2.0, 3.0, 4.0, 5.0]).unwrap(),
        array![4.0, 6.0, 5.0]
    );

    // then move the master behind everything
    tree.attach(root, a, Some(2)).unwrap();
    assert_eq!(tree.node(root).unwrap().children(), &[b, c, a][..]);
    assert_eq!(tree.node(b).unwrap().tied_to(), Some(a));
    assert_eq!(
        tree.gradient_vector(root, &array![1.0, 2.0, 3.0, 4.0, 5.0]).unwrap(),
        array![3.0, 5.0, 7.0]
    );
    tree.apply_free_vector(root, &array![0.0, -1.0, -2.0]).unwrap();
    assert_eq!(tree.values(b).unwrap(), array![-1.0, -2.0]);

    // moving into a sibling container stays inside the tree
    let inner = tree.new_container("inner");
    let d = tree.new_scalar("d", 0.0);
    tree.attach(inner, d, None).unwrap();
    tree.attach(root, inner, None).unwrap();
    tree.attach(inner, b, None).unwrap();
    assert_eq!(tree.node(b).unwrap().tied_to(), Some(a));
    assert_eq!(tree.free_parameter_count(root).unwrap(), 4);

    // leaving the tree drops the tie but keeps the fix
    let other = tree.new_container("other");
    tree.attach(other, b, None).unwrap();
    assert_eq!(tree.node(b).unwrap().tied_to(), None);
    assert!(tree.is_fixed(b).unwrap());
}

#[test]
fn test_moving_the_master_out_drops_the_tie() {
    let mut tree = ParamTree::new();
    let root = tree.new_container("m");
    let a = tree.new_leaf("a", array![1.0, 2.0]);
    let b = tree.new_leaf("b", array![5.0, 6.0]);
    tree.attach_all(root, &[a, b]).unwrap();
    tree.tie_to(b, a).unwrap();

    let other = tree.new_container("other");
    tree.attach(other, a, None).unwrap();
    assert_eq!(tree.node(b).unwrap().tied_to(), None);
    assert!(tree.is_fixed(b).unwrap());
    assert_eq!(tree.free_parameter_count(root).unwrap(), 0);
}

#[test]
fn test_tie_errors() {
    let mut tree = ParamTree::new();
    let root = tree.new_container("m");
    let a = tree.new_leaf("a", array![1.0, 2.0]);
    let b = tree.new_leaf("b", array![5.0, 6.0]);
    let stranger = tree.new_leaf("s", array![0.0, 0.0]);
    tree.attach_all(root, &[a, b]).unwrap();

    assert!(matches!(tree.tie_to(a, stranger), Err(ParamTreeError::Tie(_))));
    assert!(matches!(tree.tie_to(a, a), Err(ParamTreeError::Tie(_))));
    tree.tie_to(b, a).unwrap();
    assert!(matches!(tree.tie_to(a, b), Err(ParamTreeError::Tie(_))));
    assert_eq!(tree.free_parameter_count(root).unwrap(), 2);
}
