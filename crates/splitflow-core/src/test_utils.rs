//! Shared fixtures for unit, integration and property tests.

use crate::connection::Connector;
use crate::fixed::{Fixed64, seconds};
use crate::id::{ItemTypeId, MachineId, SplitterId};
use crate::item::Item;
use crate::network::SplitterNetwork;
use crate::topology::BeltTopology;

/// Fastest belt tier, in items/min.
pub const FAST_BELT: f64 = 780.0;

pub fn ore() -> Item {
    Item::new(ItemTypeId(1))
}

/// A single active splitter with nothing attached.
pub fn lone_splitter() -> (SplitterNetwork, BeltTopology, SplitterId) {
    let mut net = SplitterNetwork::new();
    let topo = BeltTopology::new();
    let id = net.add_splitter();
    (net, topo, id)
}

/// Root splitter fed by a producer, feeding a child splitter on output 0
/// and a machine on output 1. The child feeds three machines.
pub struct TwoLevelTree {
    pub net: SplitterNetwork,
    pub topo: BeltTopology,
    pub root: SplitterId,
    pub child: SplitterId,
    /// The child's three consumers followed by the root's direct one.
    pub machines: Vec<MachineId>,
    pub feed: MachineId,
}

pub fn two_level_tree() -> TwoLevelTree {
    let mut net = SplitterNetwork::new();
    let mut topo = BeltTopology::new();

    let root = net.add_splitter();
    let child = net.add_splitter();

    let feed = topo.add_machine(Fixed64::ONE);
    topo.connect_via_belt(
        Connector::MachineOutput(feed),
        Connector::SplitterInput(root),
        FAST_BELT,
    );
    topo.connect_via_belt(
        Connector::SplitterOutput(root, 0),
        Connector::SplitterInput(child),
        FAST_BELT,
    );

    let mut machines = Vec::with_capacity(4);
    for i in 0..3 {
        let m = topo.add_machine(Fixed64::ONE);
        topo.connect_via_belt(Connector::SplitterOutput(child, i), Connector::MachineInput(m), FAST_BELT);
        machines.push(m);
    }
    let direct = topo.add_machine(Fixed64::ONE);
    topo.connect_via_belt(Connector::SplitterOutput(root, 1), Connector::MachineInput(direct), FAST_BELT);
    machines.push(direct);

    TwoLevelTree {
        net,
        topo,
        root,
        child,
        machines,
        feed,
    }
}

/// Tick until first-time setup and the initial balances have committed.
pub fn settle(net: &mut SplitterNetwork, topo: &BeltTopology) {
    for _ in 0..3 {
        net.tick(topo, seconds(0.1)).unwrap();
    }
}
