//! Discovery of the splitter tree a balance operates on.
//!
//! Discovery first walks upstream from the requesting splitter to the root
//! (the splitter with no splitter feeding it), then walks every output
//! downstream with an explicit worklist. The result is an arena of
//! [`NetworkNode`]s linked by index and grouped by depth, which the
//! balancer consumes bottom-up and then top-down.
//!
//! Nodes snapshot the splitter fields the balancer reads, so balancing
//! never touches live splitter state until it commits.

use std::collections::{HashSet, VecDeque};

use slotmap::SlotMap;

use crate::balancer::BalanceError;
use crate::connection::{
    ConnectionGraph, Connector, Direction, Downstream, NUM_OUTPUTS,
    find_next_consumer_and_max_rate, find_next_splitter_and_max_rate,
};
use crate::id::SplitterId;
use crate::rate::{Rate, SHARE_SCALE, Shares, shares_from_potential};
use crate::splitter::{OutputState, Splitter};

/// Which splitters may start a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Only the root balances; any other member marks the root dirty
    /// instead. Used by the per-tick driver.
    RootOnly,
    /// Any member balances the whole tree. Used by explicit rate changes.
    AnyMember,
}

// ---------------------------------------------------------------------------
// NetworkNode
// ---------------------------------------------------------------------------

/// One splitter's slot in a balance. Lives only as long as that balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkNode {
    pub splitter: SplitterId,
    pub parent: Option<usize>,
    /// Child node per output when the output feeds another splitter.
    pub outputs: [Option<usize>; NUM_OUTPUTS],
    pub depth: usize,

    pub manual_input_rate: bool,
    pub target_input_rate: Rate,
    pub output_rates: [Rate; NUM_OUTPUTS],
    /// Output flags as they will be after a successful commit.
    pub planned_states: [OutputState; NUM_OUTPUTS],

    pub max_input_rate: Rate,
    pub max_output_rates: [Rate; NUM_OUTPUTS],
    /// Demand weight of terminal consumers; zero on outputs feeding
    /// splitters or nothing at all.
    pub potential_shares: [Shares; NUM_OUTPUTS],

    pub fixed_demand: i64,
    pub shares: Shares,

    pub allocated_input_rate: i64,
    pub allocated_output_rates: [i64; NUM_OUTPUTS],
    pub connection_state_changed: bool,
    /// Rate lost to fixed-point truncation while sharing.
    pub undistributed_rate: i64,
}

impl NetworkNode {
    fn new(
        id: SplitterId,
        splitter: &Splitter,
        parent: Option<usize>,
        depth: usize,
        max_input_rate: Rate,
    ) -> Self {
        Self {
            splitter: id,
            parent,
            outputs: [None; NUM_OUTPUTS],
            depth,
            manual_input_rate: splitter.flags.manual_input_rate,
            target_input_rate: splitter.target_input_rate,
            output_rates: splitter.output_rates,
            planned_states: splitter.output_states,
            max_input_rate,
            max_output_rates: [0; NUM_OUTPUTS],
            potential_shares: [0; NUM_OUTPUTS],
            fixed_demand: 0,
            shares: 0,
            allocated_input_rate: 0,
            allocated_output_rates: [0; NUM_OUTPUTS],
            connection_state_changed: false,
            undistributed_rate: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// NetworkTree
// ---------------------------------------------------------------------------

/// Arena of nodes rooted at index 0, with indices grouped by depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTree {
    pub(crate) nodes: Vec<NetworkNode>,
    pub(crate) levels: Vec<Vec<usize>>,
}

impl NetworkTree {
    pub fn root(&self) -> SplitterId {
        self.nodes[0].splitter
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[NetworkNode] {
        &self.nodes
    }

    /// Node indices per depth, root level first.
    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    pub fn node_for(&self, splitter: SplitterId) -> Option<&NetworkNode> {
        self.nodes.iter().find(|n| n.splitter == splitter)
    }

    /// Every splitter in the tree, in level order.
    pub fn splitters(&self) -> impl Iterator<Item = SplitterId> + '_ {
        self.nodes.iter().map(|n| n.splitter)
    }
}

// ---------------------------------------------------------------------------
// Walks
// ---------------------------------------------------------------------------

fn ready_splitter(
    splitters: &SlotMap<SplitterId, Splitter>,
    id: SplitterId,
) -> Result<&Splitter, BalanceError> {
    match splitters.get(id) {
        Some(s) if s.is_active() => Ok(s),
        _ => Err(BalanceError::NotReady { splitter: id }),
    }
}

/// Walk upstream from `start` to the splitter nothing feeds.
pub fn find_root<G: ConnectionGraph + ?Sized>(
    splitters: &SlotMap<SplitterId, Splitter>,
    graph: &G,
    start: SplitterId,
) -> Result<SplitterId, BalanceError> {
    if !splitters.contains_key(start) {
        return Err(BalanceError::UnknownSplitter(start));
    }
    ready_splitter(splitters, start)?;

    let mut seen = HashSet::from([start]);
    let mut root = start;

    loop {
        let hop =
            find_next_splitter_and_max_rate(graph, Connector::SplitterInput(root), Direction::Upstream);
        let Some(upstream) = hop.target else {
            return Ok(root);
        };

        ready_splitter(splitters, upstream)?;

        if !seen.insert(upstream) {
            tracing::warn!(splitter = ?upstream, "cycle in splitter network detected, canceling");
            return Err(BalanceError::TopologyCycle { splitter: upstream });
        }
        root = upstream;
    }
}

/// Build the tree containing `start`.
///
/// With `respect_overclocking` terminal consumers weigh in with their
/// potential; otherwise each counts as one full share.
pub fn discover<G: ConnectionGraph + ?Sized>(
    splitters: &SlotMap<SplitterId, Splitter>,
    graph: &G,
    start: SplitterId,
    mode: DiscoveryMode,
    respect_overclocking: bool,
) -> Result<NetworkTree, BalanceError> {
    let root = find_root(splitters, graph, start)?;

    if mode == DiscoveryMode::RootOnly && root != start {
        tracing::debug!(requested = ?start, ?root, "deferring balance to root");
        return Err(BalanceError::DeferredToRoot { root });
    }

    let root_input =
        find_next_consumer_and_max_rate(graph, Connector::SplitterInput(root), Direction::Upstream);

    let mut nodes = vec![NetworkNode::new(
        root,
        ready_splitter(splitters, root)?,
        None,
        0,
        root_input.max_rate,
    )];
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([0usize]);

    while let Some(index) = queue.pop_front() {
        let id = nodes[index].splitter;
        let depth = nodes[index].depth;

        for i in 0..NUM_OUTPUTS {
            let hop = find_next_consumer_and_max_rate(
                graph,
                Connector::SplitterOutput(id, i),
                Direction::Downstream,
            );
            nodes[index].max_output_rates[i] = hop.max_rate;

            match hop.target {
                Some(Downstream::Splitter(child)) => {
                    let splitter = ready_splitter(splitters, child)?;
                    if !seen.insert(child) {
                        tracing::warn!(splitter = ?child, "splitter reached twice, canceling");
                        return Err(BalanceError::TopologyCycle { splitter: child });
                    }

                    let child_index = nodes.len();
                    nodes.push(NetworkNode::new(
                        child,
                        splitter,
                        Some(index),
                        depth + 1,
                        hop.max_rate,
                    ));
                    nodes[index].outputs[i] = Some(child_index);
                    queue.push_back(child_index);
                }
                Some(Downstream::Machine(machine)) => {
                    nodes[index].potential_shares[i] = if respect_overclocking {
                        shares_from_potential(graph.potential(machine))
                    } else {
                        SHARE_SCALE
                    };
                }
                None => {}
            }
        }
    }

    let depth_count = nodes.iter().map(|n| n.depth).max().unwrap_or(0) + 1;
    let mut levels = vec![Vec::new(); depth_count];
    for (index, node) in nodes.iter().enumerate() {
        levels[node.depth].push(index);
    }

    tracing::debug!(?root, splitters = nodes.len(), levels = levels.len(), "discovered network");

    Ok(NetworkTree { nodes, levels })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
