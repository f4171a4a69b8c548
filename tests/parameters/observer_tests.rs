//! Integration tests for change notification
//!
//! These tests verify ordering, partial notification and how changes travel up the tree.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ndarray::array;
use paramtree_rs::parameters::{NodeId, ObserverRegistry, ParamTree};

use crate::test_helpers::scalar_and_pair;

#[test]
fn test_hooks_run_in_priority_order() {
    let mut tree = ParamTree::new();
    let a = tree.new_scalar("a", 0.0);
    let log = Rc::new(RefCell::new(Vec::new()));
    for priority in [0, -100, 5] {
        let log = Rc::clone(&log);
        tree.subscribe(a, priority, move |_, _| log.borrow_mut().push(priority))
            .unwrap();
    }

    tree.set_values(a, &array![1.0]).unwrap();
    assert_eq!(*log.borrow(), vec![5, 0, -100]);
}

#[test]
fn test_min_priority_is_a_prefix_scan() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut registry: ObserverRegistry<&str, Box<dyn Fn(&str)>> = ObserverRegistry::new();
    for (name, priority) in [("first", 5), ("second", 0), ("third", -100)] {
        let log = Rc::clone(&log);
        let record = move |origin: &str| log.borrow_mut().push((name, origin.to_string()));
        registry.subscribe(name, Box::new(record), priority);
    }

    registry.notify("x", None);
    let names: Vec<&str> = log.borrow().iter().map(|(n, _)| *n).collect();
    assert_eq!(names, vec!["first", "second", "third"]);

    log.borrow_mut().clear();
    registry.notify("y", Some(-50));
    assert_eq!(
        *log.borrow(),
        vec![("first", "y".to_string()), ("second", "y".to_string())]
    );
}

#[test]
fn test_leaf_change_reaches_root_once_with_origin() {
    let mut tree = ParamTree::new();
    let model = scalar_and_pair(&mut tree, 1.0);
    let seen: Rc<RefCell<Vec<NodeId>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    tree.on_parameters_changed(model.root, move |_, origin| sink.borrow_mut().push(origin))
        .unwrap();

    tree.set_values(model.b, &array![1.0, 2.0]).unwrap();
    assert_eq!(*seen.borrow(), vec![model.b]);

    tree.apply_free_vector(model.root, &array![3.0, 4.0, 5.0]).unwrap();
    assert_eq!(*seen.borrow(), vec![model.b, model.root]);
}

#[test]
fn test_hook_sees_updated_values() {
    let mut tree = ParamTree::new();
    let model = scalar_and_pair(&mut tree, 1.0);
    let total = Rc::new(Cell::new(0.0));
    let cache = Rc::clone(&total);
    let root = model.root;
    tree.on_parameters_changed(root, move |tree, _| {
        cache.set(tree.values(root).map(|v| v.sum()).unwrap_or(f64::NAN))
    })
    .unwrap();

    tree.set_values(root, &array![1.0, 2.0, 3.0]).unwrap();
    assert_eq!(total.get(), 6.0);
}

#[test]
fn test_internal_updates_do_not_reach_the_parent() {
    let mut tree = ParamTree::new();
    let model = scalar_and_pair(&mut tree, 1.0);
    let root_calls = Rc::new(Cell::new(0));
    let leaf_calls = Rc::new(Cell::new(0));

    let counter = Rc::clone(&root_calls);
    tree.on_parameters_changed(model.root, move |_, _| counter.set(counter.get() + 1))
        .unwrap();
    let counter = Rc::clone(&leaf_calls);
    tree.on_parameters_changed(model.a, move |_, _| counter.set(counter.get() + 1))
        .unwrap();

    tree.set_values_with(model.a, &array![2.0], false).unwrap();
    assert_eq!(leaf_calls.get(), 1);
    assert_eq!(root_calls.get(), 0);

    // a bulk update tells every leaf, but the root only once
    tree.apply_free_vector(model.root, &array![1.0, 1.0, 1.0]).unwrap();
    assert_eq!(leaf_calls.get(), 2);
    assert_eq!(root_calls.get(), 1);
}

#[test]
fn test_replacing_the_change_hook() {
    let mut tree = ParamTree::new();
    let a = tree.new_scalar("a", 0.0);
    let calls = Rc::new(RefCell::new(Vec::new()));

    let log = Rc::clone(&calls);
    tree.on_parameters_changed(a, move |_, _| log.borrow_mut().push("old")).unwrap();
    let log = Rc::clone(&calls);
    tree.on_parameters_changed(a, move |_, _| log.borrow_mut().push("new")).unwrap();

    tree.notify_parameters_changed(a).unwrap();
    assert_eq!(*calls.borrow(), vec!["new"]);
    assert_eq!(tree.node(a).unwrap().observer_count(), 1);
}

#[test]
fn test_detach_disconnects_notification() {
    let mut tree = ParamTree::new();
    let model = scalar_and_pair(&mut tree, 1.0);
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    tree.on_parameters_changed(model.root, move |_, _| counter.set(counter.get() + 1))
        .unwrap();

    assert_eq!(tree.node(model.b).unwrap().observer_count(), 1);
    tree.detach(model.root, model.b).unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(tree.node(model.b).unwrap().observer_count(), 0);

    tree.set_values(model.b, &array![7.0, 8.0]).unwrap();
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_unsubscribe() {
    let mut tree = ParamTree::new();
    let a = tree.new_scalar("a", 0.0);
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let handle = tree
        .subscribe(a, 10, move |_, _| counter.set(counter.get() + 1))
        .unwrap();

    tree.notify_parameters_changed(a).unwrap();
    assert_eq!(tree.unsubscribe(a, handle).unwrap(), 1);
    tree.notify_parameters_changed(a).unwrap();
    assert_eq!(calls.get(), 1);
}
