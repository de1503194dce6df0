//! Rate-set operations and balancing failures, driven through whole trees.

use std::cell::RefCell;
use std::rc::Rc;

use splitflow_core::balancer::BalanceError;
use splitflow_core::config::SplitflowConfig;
use splitflow_core::events::{EventKind, SplitterEvent};
use splitflow_core::fixed::seconds;
use splitflow_core::network::{RateError, SplitterNetwork};
use splitflow_core::splitter::SplitterError;
use splitflow_core::test_utils::*;
use splitflow_data::{Format, scenario_from_str};

fn record(net: &mut SplitterNetwork, kind: EventKind) -> Rc<RefCell<Vec<SplitterEvent>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    net.on_event(kind, Box::new(move |e| s.borrow_mut().push(e.clone())));
    seen
}

// ===========================================================================
// Pinning
// ===========================================================================

#[test]
fn pinned_branch_holds_across_ticks_and_unpins() {
    let mut tree = two_level_tree();
    settle(&mut tree.net, &tree.topo);
    let (net, topo) = (&mut tree.net, &tree.topo);

    net.set_output_automatic(topo, tree.root, 0, false).unwrap();
    net.set_output_rate(topo, tree.root, 0, 5.0).unwrap();
    for _ in 0..5 {
        net.tick(topo, seconds(0.1)).unwrap();
    }

    let child = net.get(tree.child).unwrap();
    assert!(!child.is_target_rate_automatic());
    assert_eq!(child.target_input_rate_raw(), 5000);
    let child_total: i32 = (0..3).filter_map(|i| child.output_rate_raw(i)).sum();
    assert_eq!(child_total, 5000);

    let root = net.get(tree.root).unwrap();
    assert_eq!(root.output_rate_raw(0), Some(5000));
    assert_eq!(root.output_rate_raw(1), Some(775_000));
    assert_eq!(root.items_per_cycle(), [1, 155, 0]);

    net.set_output_automatic(topo, tree.root, 0, true).unwrap();
    assert!(net.get(tree.child).unwrap().is_target_rate_automatic());
    let root = net.get(tree.root).unwrap();
    assert_eq!(root.output_rate_raw(0), Some(585_000));
    assert_eq!(root.output_rate_raw(1), Some(195_000));
}

#[test]
fn infeasible_pin_rolls_back_and_reports() {
    let mut tree = two_level_tree();
    settle(&mut tree.net, &tree.topo);
    let failures = record(&mut tree.net, EventKind::BalanceFailed);
    let changes = record(&mut tree.net, EventKind::StateChanged);
    let (net, topo) = (&mut tree.net, &tree.topo);

    net.set_target_rate_automatic(topo, tree.root, false).unwrap();
    net.set_target_input_rate(topo, tree.root, 100.0).unwrap();
    net.set_output_automatic(topo, tree.root, 0, false).unwrap();
    assert_eq!(net.get(tree.child).unwrap().target_input_rate_raw(), 75_000);
    let announced = changes.borrow().len();

    let err = net.set_output_rate(topo, tree.root, 0, 150.0).unwrap_err();
    assert!(matches!(err, RateError::Balance(ref e) if e.is_infeasible_demand()));
    assert_eq!(changes.borrow().len(), announced);
    assert!(matches!(
        failures.borrow().last(),
        Some(SplitterEvent::BalanceFailed { splitter, error }) if *splitter == tree.root && error.is_infeasible_demand()
    ));

    let child = net.get(tree.child).unwrap();
    assert_eq!(child.target_input_rate_raw(), 75_000);
    assert!(!child.is_balancing_required());
    let root = net.get(tree.root).unwrap();
    assert_eq!(root.output_rate_raw(0), Some(75_000));
    assert_eq!(root.error(), SplitterError::InfeasibleDemand);

    // A feasible pin still goes through and clears the error.
    net.set_output_rate(topo, tree.root, 0, 40.0).unwrap();
    let root = net.get(tree.root).unwrap();
    assert_eq!(root.output_rate_raw(0), Some(40_000));
    assert_eq!(root.output_rate_raw(1), Some(60_000));
    assert_eq!(root.error(), SplitterError::None);
}

#[test]
fn unknown_splitter_is_refused() {
    let mut tree = two_level_tree();
    let gone = tree.net.add_splitter();
    tree.net.remove_splitter(gone);

    assert_eq!(
        tree.net.set_output_rate(&tree.topo, gone, 0, 10.0),
        Err(RateError::UnknownSplitter(gone))
    );
    assert_eq!(
        tree.net.request_balance(&tree.topo, gone, false),
        Err(BalanceError::UnknownSplitter(gone))
    );
}

// ===========================================================================
// Cycles
// ===========================================================================

const LOOP_RON: &str = r#"(
    splitters: [(name: "a"), (name: "b"), (name: "c")],
    machines: [(name: "x"), (name: "y"), (name: "z")],
    links: [
        (from: "a", output: 0, to: "b", belt: Some(480.0)),
        (from: "b", output: 0, to: "c", belt: Some(480.0)),
        (from: "c", output: 0, to: "a", belt: Some(480.0)),
        (from: "a", output: 1, to: "x", belt: Some(480.0)),
        (from: "b", output: 1, to: "y", belt: Some(480.0)),
        (from: "c", output: 1, to: "z", belt: Some(480.0)),
    ],
)"#;

#[test]
fn looped_splitters_keep_their_rates() {
    let mut scenario =
        scenario_from_str(LOOP_RON, Format::Ron, SplitflowConfig::default()).unwrap();
    let failures = record(&mut scenario.network, EventKind::BalanceFailed);
    let names = ["a", "b", "c"];

    scenario.network.tick(&scenario.topology, seconds(0.1)).unwrap();
    let before: Vec<_> = names
        .iter()
        .map(|n| {
            let s = scenario.network.get(scenario.splitter(n).unwrap()).unwrap();
            (s.target_input_rate_raw(), s.output_rate_raw(0), s.output_rate_raw(1))
        })
        .collect();

    for _ in 0..10 {
        let summary = scenario.network.tick(&scenario.topology, seconds(0.1)).unwrap();
        assert_eq!(summary.pending_balance, 3);
    }

    for (name, expected) in names.iter().zip(&before) {
        let s = scenario.network.get(scenario.splitter(name).unwrap()).unwrap();
        assert_eq!(
            &(s.target_input_rate_raw(), s.output_rate_raw(0), s.output_rate_raw(1)),
            expected
        );
        assert_eq!(s.error(), SplitterError::TopologyCycle);
        assert!(s.is_balancing_required());
    }

    let failures = failures.borrow();
    assert!(failures.len() >= 30);
    assert!(failures.iter().all(|e| matches!(
        e,
        SplitterEvent::BalanceFailed { error: BalanceError::TopologyCycle { .. }, .. }
    )));
}
