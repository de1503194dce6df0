//! In-memory conveyor topology.
//!
//! [`BeltTopology`] is a concrete [`ConnectionGraph`] used by headless
//! simulations, scenario files and tests. Belts and machines live in
//! `SlotMap`s; splitters are owned by the
//! [`SplitterNetwork`](crate::network::SplitterNetwork) and only referenced
//! here by id. Links are symmetric: linking `a` to `b` makes each the
//! other's partner.

use std::collections::HashMap;

use slotmap::SlotMap;

use crate::connection::{ConnectionGraph, Connector, NUM_OUTPUTS};
use crate::fixed::Fixed64;
use crate::id::{BeltId, MachineId, SplitterId};
use crate::rate::{Rate, rate_from_items_per_minute};

/// A conveyor belt segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Belt {
    /// Throughput ceiling in fixed-point items/min.
    pub max_rate: Rate,
}

/// A non-splitter building at the end of a belt run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    /// Fraction of nominal throughput the machine currently runs at.
    pub potential: Fixed64,
}

/// Belts, machines and the links between every connector.
#[derive(Debug, Default)]
pub struct BeltTopology {
    belts: SlotMap<BeltId, Belt>,
    machines: SlotMap<MachineId, Machine>,
    links: HashMap<Connector, Connector>,
}

impl BeltTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a belt with the given speed in items/min.
    pub fn add_belt(&mut self, items_per_minute: f64) -> BeltId {
        self.belts.insert(Belt {
            max_rate: rate_from_items_per_minute(items_per_minute),
        })
    }

    /// Change a belt's speed, e.g. after an upgrade.
    pub fn set_belt_speed(&mut self, belt: BeltId, items_per_minute: f64) -> bool {
        match self.belts.get_mut(belt) {
            Some(b) => {
                b.max_rate = rate_from_items_per_minute(items_per_minute);
                true
            }
            None => false,
        }
    }

    pub fn belt(&self, belt: BeltId) -> Option<&Belt> {
        self.belts.get(belt)
    }

    /// Remove a belt and everything linked to its ends.
    pub fn remove_belt(&mut self, belt: BeltId) -> Option<Belt> {
        self.unlink(Connector::BeltHead(belt));
        self.unlink(Connector::BeltTail(belt));
        self.belts.remove(belt)
    }

    /// Add a machine with the given potential in `[0, 1]`.
    pub fn add_machine(&mut self, potential: Fixed64) -> MachineId {
        self.machines.insert(Machine { potential })
    }

    pub fn set_potential(&mut self, machine: MachineId, potential: Fixed64) -> bool {
        match self.machines.get_mut(machine) {
            Some(m) => {
                m.potential = potential;
                true
            }
            None => false,
        }
    }

    pub fn machine(&self, machine: MachineId) -> Option<&Machine> {
        self.machines.get(machine)
    }

    pub fn remove_machine(&mut self, machine: MachineId) -> Option<Machine> {
        self.unlink(Connector::MachineInput(machine));
        self.unlink(Connector::MachineOutput(machine));
        self.machines.remove(machine)
    }

    /// Link two connectors. Any previous partners of either side are
    /// disconnected first.
    pub fn link(&mut self, a: Connector, b: Connector) {
        self.unlink(a);
        self.unlink(b);
        self.links.insert(a, b);
        self.links.insert(b, a);
    }

    /// Disconnect a connector, returning its former partner.
    pub fn unlink(&mut self, connector: Connector) -> Option<Connector> {
        let partner = self.links.remove(&connector)?;
        self.links.remove(&partner);
        Some(partner)
    }

    /// Put a fresh belt between `from` (an output) and `to` (an input).
    pub fn connect_via_belt(&mut self, from: Connector, to: Connector, items_per_minute: f64) -> BeltId {
        let belt = self.add_belt(items_per_minute);
        self.link(from, Connector::BeltHead(belt));
        self.link(Connector::BeltTail(belt), to);
        belt
    }

    /// Drop every link touching a splitter, e.g. when it is dismantled.
    pub fn detach_splitter(&mut self, splitter: SplitterId) {
        self.unlink(Connector::SplitterInput(splitter));
        for i in 0..NUM_OUTPUTS {
            self.unlink(Connector::SplitterOutput(splitter, i));
        }
    }

    /// Number of undirected links.
    pub fn link_count(&self) -> usize {
        self.links.len() / 2
    }
}

impl ConnectionGraph for BeltTopology {
    fn partner(&self, connector: Connector) -> Option<Connector> {
        self.links.get(&connector).copied()
    }

    fn belt_max_rate(&self, belt: BeltId) -> Rate {
        self.belts.get(belt).map_or(0, |b| b.max_rate)
    }

    fn potential(&self, machine: MachineId) -> Fixed64 {
        self.machines.get(machine).map_or(Fixed64::ZERO, |m| m.potential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_is_symmetric() {
        let mut topo = BeltTopology::new();
        let belt = topo.add_belt(60.0);
        let m = topo.add_machine(Fixed64::ONE);
        topo.link(Connector::BeltTail(belt), Connector::MachineInput(m));

        assert_eq!(topo.partner(Connector::BeltTail(belt)), Some(Connector::MachineInput(m)));
        assert_eq!(topo.partner(Connector::MachineInput(m)), Some(Connector::BeltTail(belt)));
        assert_eq!(topo.link_count(), 1);
    }

    #[test]
    fn relinking_drops_old_partner() {
        let mut topo = BeltTopology::new();
        let belt = topo.add_belt(60.0);
        let a = topo.add_machine(Fixed64::ONE);
        let b = topo.add_machine(Fixed64::ONE);
        topo.link(Connector::BeltTail(belt), Connector::MachineInput(a));
        topo.link(Connector::BeltTail(belt), Connector::MachineInput(b));

        assert!(!topo.is_connected(Connector::MachineInput(a)));
        assert_eq!(topo.partner(Connector::BeltTail(belt)), Some(Connector::MachineInput(b)));
        assert_eq!(topo.link_count(), 1);
    }

    #[test]
    fn removing_belt_unlinks_both_ends() {
        let mut topo = BeltTopology::new();
        let src = topo.add_machine(Fixed64::ONE);
        let dst = topo.add_machine(Fixed64::ONE);
        let belt = topo.connect_via_belt(Connector::MachineOutput(src), Connector::MachineInput(dst), 120.0);
        assert_eq!(topo.link_count(), 2);

        topo.remove_belt(belt);
        assert_eq!(topo.link_count(), 0);
        assert!(!topo.is_connected(Connector::MachineOutput(src)));
        assert_eq!(topo.belt_max_rate(belt), 0);
    }

    #[test]
    fn potential_defaults_to_zero_for_unknown_machine() {
        let mut topo = BeltTopology::new();
        let m = topo.add_machine(Fixed64::from_num(0.5));
        assert_eq!(topo.potential(m), Fixed64::from_num(0.5));
        topo.remove_machine(m);
        assert_eq!(topo.potential(m), Fixed64::ZERO);
    }

    #[test]
    fn belt_speed_is_fixed_point() {
        let mut topo = BeltTopology::new();
        let belt = topo.add_belt(120.0);
        assert_eq!(topo.belt_max_rate(belt), 120_000);
        assert!(topo.set_belt_speed(belt, 270.0));
        assert_eq!(topo.belt_max_rate(belt), 270_000);
    }
}
