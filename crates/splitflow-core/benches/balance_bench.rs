//! Criterion benchmarks for balancing and ticking.
//!
//! Two benchmark groups:
//! - `balance`: full two-pass balance of a complete ternary tree
//! - `tick`: one network tick over the same tree with full buffers

use criterion::{Criterion, criterion_group, criterion_main};
use splitflow_core::connection::{Connector, NUM_OUTPUTS};
use splitflow_core::fixed::{Fixed64, seconds};
use splitflow_core::id::SplitterId;
use splitflow_core::item::MAX_INVENTORY_SIZE;
use splitflow_core::network::SplitterNetwork;
use splitflow_core::test_utils::*;
use splitflow_core::topology::BeltTopology;

// ===========================================================================
// Tree builder
// ===========================================================================

/// Complete ternary tree of the given depth with a machine on every leaf
/// output. Depth 5 gives 121 splitters and 243 consumers.
fn build_ternary_tree(depth: usize) -> (SplitterNetwork, BeltTopology, SplitterId) {
    let mut net = SplitterNetwork::new();
    let mut topo = BeltTopology::new();

    let root = net.add_splitter();
    let feed = topo.add_machine(Fixed64::ONE);
    topo.connect_via_belt(Connector::MachineOutput(feed), Connector::SplitterInput(root), FAST_BELT);

    let mut level = vec![root];
    for d in 0..depth {
        let mut next = Vec::with_capacity(level.len() * NUM_OUTPUTS);
        for &parent in &level {
            for i in 0..NUM_OUTPUTS {
                let target = if d + 1 < depth {
                    let child = net.add_splitter();
                    next.push(child);
                    Connector::SplitterInput(child)
                } else {
                    Connector::MachineInput(topo.add_machine(Fixed64::ONE))
                };
                topo.connect_via_belt(Connector::SplitterOutput(parent, i), target, FAST_BELT);
            }
        }
        level = next;
    }

    settle(&mut net, &topo);
    (net, topo, root)
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_balance(c: &mut Criterion) {
    let (mut net, topo, root) = build_ternary_tree(5);

    c.bench_function("balance/ternary_depth_5", |b| {
        b.iter(|| net.request_balance(&topo, root, true).unwrap())
    });
}

fn bench_tick(c: &mut Criterion) {
    let (mut net, topo, _) = build_ternary_tree(5);
    let ids: Vec<SplitterId> = net.ids().collect();

    c.bench_function("tick/ternary_depth_5", |b| {
        b.iter(|| {
            for &id in &ids {
                while net.insert_item(id, ore()).is_ok() {}
            }
            net.tick(&topo, seconds(1.0 / 60.0)).unwrap();
            for &id in &ids {
                for out in 0..NUM_OUTPUTS {
                    for _ in 0..MAX_INVENTORY_SIZE {
                        if net.grab_output(id, out).is_err() {
                            break;
                        }
                    }
                }
            }
        })
    });
}

criterion_group!(benches, bench_balance, bench_tick);
criterion_main!(benches);
