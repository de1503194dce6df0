//! Connection interface between splitters and the surrounding factory.
//!
//! The splitter engine never owns the conveyor graph. It only needs to ask
//! two questions of it: "is this connector attached to anything?" and "what
//! sits on the other side?". Both are answered by a [`ConnectionGraph`]
//! implementation. Everything else (belt-hopping walks, rate ceilings)
//! is built on top of that single hop in this module.

use crate::fixed::Fixed64;
use crate::id::{BeltId, MachineId, SplitterId};
use crate::rate::Rate;

/// Fan-out of every splitter.
pub const NUM_OUTPUTS: usize = 3;

/// Upper bound on belts crossed by a single walk. A walk that exceeds it is
/// running around a belt loop with no building on it.
pub const MAX_BELT_HOPS: usize = 1024;

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// A single connection point on some building or belt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connector {
    SplitterInput(SplitterId),
    SplitterOutput(SplitterId, usize),
    /// Receiving end of a belt (items enter here).
    BeltHead(BeltId),
    /// Delivering end of a belt (items leave here).
    BeltTail(BeltId),
    MachineInput(MachineId),
    MachineOutput(MachineId),
}

/// The building or belt a connector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Splitter(SplitterId),
    Belt(BeltId),
    Machine(MachineId),
}

impl Connector {
    pub fn owner(self) -> Owner {
        match self {
            Connector::SplitterInput(s) | Connector::SplitterOutput(s, _) => Owner::Splitter(s),
            Connector::BeltHead(b) | Connector::BeltTail(b) => Owner::Belt(b),
            Connector::MachineInput(m) | Connector::MachineOutput(m) => Owner::Machine(m),
        }
    }
}

/// Walk direction along the item flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// With the flow: from an output towards whatever consumes it.
    Downstream,
    /// Against the flow: from an input towards whatever feeds it.
    Upstream,
}

// ---------------------------------------------------------------------------
// ConnectionGraph
// ---------------------------------------------------------------------------

/// The conveyor graph as seen by the splitter engine.
pub trait ConnectionGraph {
    /// The connector on the other side of `connector`, or `None` when
    /// nothing is attached.
    fn partner(&self, connector: Connector) -> Option<Connector>;

    /// Maximum throughput of a belt, in fixed-point items/min.
    fn belt_max_rate(&self, belt: BeltId) -> Rate;

    /// Current demand weight of a machine in `[0, 1]`.
    fn potential(&self, machine: MachineId) -> Fixed64;

    fn is_connected(&self, connector: Connector) -> bool {
        self.partner(connector).is_some()
    }
}

// ---------------------------------------------------------------------------
// Walks
// ---------------------------------------------------------------------------

/// What a walk found at the end of a run of belts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Downstream {
    Splitter(SplitterId),
    Machine(MachineId),
}

/// Result of walking from a connector across any number of belts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop<T> {
    pub target: Option<T>,
    /// Smallest belt rate crossed. `Rate::MAX` when the target is attached
    /// without a belt, 0 when the connector is unattached.
    pub max_rate: Rate,
    /// False when the walk gave up inside a belt loop.
    pub ready: bool,
}

impl<T> Hop<T> {
    fn unattached() -> Self {
        Self {
            target: None,
            max_rate: 0,
            ready: true,
        }
    }
}

/// Follow `start` across belts in `direction` until reaching a building.
pub fn find_next_consumer_and_max_rate<G: ConnectionGraph + ?Sized>(
    graph: &G,
    start: Connector,
    direction: Direction,
) -> Hop<Downstream> {
    let mut rate = Rate::MAX;
    let mut connector = start;

    for _ in 0..=MAX_BELT_HOPS {
        let Some(partner) = graph.partner(connector) else {
            return Hop::unattached();
        };

        match partner.owner() {
            Owner::Belt(belt) => {
                rate = rate.min(graph.belt_max_rate(belt));
                connector = match direction {
                    Direction::Downstream => Connector::BeltTail(belt),
                    Direction::Upstream => Connector::BeltHead(belt),
                };
            }
            Owner::Splitter(s) => {
                return Hop {
                    target: Some(Downstream::Splitter(s)),
                    max_rate: rate,
                    ready: true,
                };
            }
            Owner::Machine(m) => {
                return Hop {
                    target: Some(Downstream::Machine(m)),
                    max_rate: rate,
                    ready: true,
                };
            }
        }
    }

    tracing::warn!(?start, "belt walk exceeded {MAX_BELT_HOPS} hops, assuming a belt loop");
    Hop {
        target: None,
        max_rate: 0,
        ready: false,
    }
}

/// Like [`find_next_consumer_and_max_rate`] but only reports splitters; a
/// machine at the end of the walk yields `None` with the belt rate intact.
pub fn find_next_splitter_and_max_rate<G: ConnectionGraph + ?Sized>(
    graph: &G,
    start: Connector,
    direction: Direction,
) -> Hop<SplitterId> {
    let hop = find_next_consumer_and_max_rate(graph, start, direction);
    Hop {
        target: match hop.target {
            Some(Downstream::Splitter(s)) => Some(s),
            _ => None,
        },
        max_rate: hop.max_rate,
        ready: hop.ready,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
