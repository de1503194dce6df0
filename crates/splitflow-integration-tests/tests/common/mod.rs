//! Headless item flow shared by the integration tests.
//!
//! Nothing here moves items along belts. A consumer pulls everything
//! assigned to it each tick, and a splitter output that feeds another
//! splitter hands its items straight into that splitter's buffer.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use splitflow_core::connection::{
    Connector, Direction, NUM_OUTPUTS, find_next_splitter_and_max_rate,
};
use splitflow_core::fixed::seconds;
use splitflow_core::id::SplitterId;
use splitflow_core::item::MAX_INVENTORY_SIZE;
use splitflow_core::network::SplitterNetwork;
use splitflow_core::test_utils::ore;
use splitflow_core::topology::BeltTopology;

/// Items pulled out of each (splitter, output) pair.
pub type Deliveries = HashMap<(SplitterId, usize), usize>;

/// Knobs for [`run_flow`].
pub struct Flow {
    /// Splitter the producer feeds.
    pub source: SplitterId,
    /// Items offered to the source per tick.
    pub feed_per_tick: usize,
    pub ticks: usize,
    pub dt: f64,
    /// Outputs whose consumer never pulls.
    pub stuck: HashSet<(SplitterId, usize)>,
}

impl Flow {
    pub fn new(source: SplitterId, ticks: usize) -> Self {
        Self {
            source,
            feed_per_tick: 4,
            ticks,
            dt: 0.1,
            stuck: HashSet::new(),
        }
    }
}

pub fn run_flow(net: &mut SplitterNetwork, topo: &BeltTopology, flow: &Flow) -> Deliveries {
    let mut delivered = Deliveries::new();

    for _ in 0..flow.ticks {
        for _ in 0..flow.feed_per_tick {
            if net.insert_item(flow.source, ore()).is_err() {
                break;
            }
        }

        net.tick(topo, seconds(flow.dt)).unwrap();

        let ids: Vec<SplitterId> = net.ids().collect();
        for id in ids {
            for out in 0..NUM_OUTPUTS {
                if flow.stuck.contains(&(id, out)) {
                    continue;
                }
                if !net.get(id).is_some_and(|s| s.is_output_connected(out)) {
                    continue;
                }
                let next = find_next_splitter_and_max_rate(
                    topo,
                    Connector::SplitterOutput(id, out),
                    Direction::Downstream,
                )
                .target;

                loop {
                    if let Some(next) = next {
                        let full = net
                            .get(next)
                            .is_none_or(|s| s.buffered_items() >= MAX_INVENTORY_SIZE);
                        if full {
                            break;
                        }
                    }
                    let Ok(grabbed) = net.grab_output(id, out) else {
                        break;
                    };
                    if let Some(next) = next {
                        net.insert_item(next, grabbed.item).unwrap();
                    }
                    *delivered.entry((id, out)).or_default() += 1;
                }
            }
        }
    }

    delivered
}

pub fn count(delivered: &Deliveries, id: SplitterId, out: usize) -> usize {
    delivered.get(&(id, out)).copied().unwrap_or(0)
}

/// `a / b` as a float, for ratio assertions.
pub fn ratio(a: usize, b: usize) -> f64 {
    a as f64 / b as f64
}
