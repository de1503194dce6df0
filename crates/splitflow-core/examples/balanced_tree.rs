//! Balanced tree example: pinning a branch.
//!
//! Builds a root splitter feeding a child splitter and one machine, lets
//! the network balance itself, then pins the child branch to 60 items/min
//! and shows how the remaining input flows to the other consumer.
//!
//! Run with: `RUST_LOG=debug cargo run -p splitflow-core --example balanced_tree`

use splitflow_core::connection::{Connector, NUM_OUTPUTS};
use splitflow_core::events::EventKind;
use splitflow_core::fixed::{Fixed64, seconds};
use splitflow_core::id::{ItemTypeId, SplitterId};
use splitflow_core::item::Item;
use splitflow_core::network::SplitterNetwork;
use splitflow_core::topology::BeltTopology;
use tracing_subscriber::EnvFilter;

fn print_rates(net: &SplitterNetwork, name: &str, id: SplitterId) {
    let Some(s) = net.get(id) else {
        return;
    };
    let outputs: Vec<String> = (0..NUM_OUTPUTS)
        .map(|i| match s.output_rate(i) {
            Some(rate) if s.is_output_connected(i) => format!("{rate:>7.3}"),
            _ => "      -".to_string(),
        })
        .collect();
    println!(
        "{name:<6} in {:>7.3}  out [{}]  cycle {:?}",
        s.target_input_rate(),
        outputs.join(", "),
        s.items_per_cycle()
    );
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut net = SplitterNetwork::new();
    let mut topo = BeltTopology::new();

    let root = net.add_splitter();
    let child = net.add_splitter();

    let mine = topo.add_machine(Fixed64::ONE);
    topo.connect_via_belt(Connector::MachineOutput(mine), Connector::SplitterInput(root), 270.0);
    topo.connect_via_belt(Connector::SplitterOutput(root, 0), Connector::SplitterInput(child), 270.0);

    let smelter = topo.add_machine(Fixed64::ONE);
    topo.connect_via_belt(Connector::SplitterOutput(root, 1), Connector::MachineInput(smelter), 270.0);
    for i in 0..2 {
        let m = topo.add_machine(Fixed64::ONE);
        topo.connect_via_belt(Connector::SplitterOutput(child, i), Connector::MachineInput(m), 270.0);
    }

    net.on_event(
        EventKind::BalanceFailed,
        Box::new(|e| println!("balance failed: {e:?}")),
    );

    for _ in 0..3 {
        if let Err(e) = net.tick(&topo, seconds(0.1)) {
            eprintln!("tick failed: {e}");
            return;
        }
    }
    println!("--- automatic ---");
    print_rates(&net, "root", root);
    print_rates(&net, "child", child);

    let pinned = net
        .set_output_automatic(&topo, root, 0, false)
        .and_then(|()| net.set_output_rate(&topo, root, 0, 60.0));
    if let Err(e) = pinned {
        eprintln!("could not pin branch: {e}");
        return;
    }
    println!("--- child branch pinned to 60/min ---");
    print_rates(&net, "root", root);
    print_rates(&net, "child", child);

    // Push a few items through the root and see where they go.
    let ore = Item::new(ItemTypeId(0));
    let mut delivered = [0usize; NUM_OUTPUTS];
    for _ in 0..60 {
        while net.insert_item(root, ore).is_ok() {}
        if net.tick(&topo, seconds(0.5)).is_err() {
            break;
        }
        for (out, count) in delivered.iter_mut().enumerate() {
            while net.grab_output(root, out).is_ok() {
                *count += 1;
            }
        }
    }
    println!("--- items delivered by root: {delivered:?} ---");
}
