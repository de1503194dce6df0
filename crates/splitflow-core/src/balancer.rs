//! Two-pass rate allocation over a discovered splitter tree.
//!
//! Pass 1 runs bottom-up and folds demand towards the root: pinned rates
//! become `fixed_demand`, automatic consumers contribute `shares`. Pass 2
//! runs top-down: each node checks that its fixed demand is feasible, then
//! splits what is left among its automatic outputs in proportion to their
//! shares. Remainders are carried from output to output so the shares
//! reconstruct the available rate exactly; only the final fixed-point
//! truncation is lost, and that is reported rather than treated as failure.
//!
//! Nothing is written to live splitters until both passes succeed for
//! every node, so a failed balance leaves the network as it was.

use slotmap::SlotMap;

use crate::connection::NUM_OUTPUTS;
use crate::discovery::NetworkTree;
use crate::id::SplitterId;
use crate::rate::{Rate, SHARE_SCALE, Shares, div_rem_floor, saturate_rate};
use crate::splitter::{Splitter, SplitterError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a balance did not commit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BalanceError {
    #[error("cycle in splitter network detected at {splitter:?}")]
    TopologyCycle { splitter: SplitterId },
    #[error("max input rate {max_input_rate} of {splitter:?} cannot satisfy fixed demand {fixed_demand}")]
    InsufficientCapacity {
        splitter: SplitterId,
        max_input_rate: Rate,
        fixed_demand: i64,
    },
    #[error("not enough input at {splitter:?} for fixed output rates: demand {fixed_demand}, available {available}")]
    InsufficientInput {
        splitter: SplitterId,
        available: i64,
        fixed_demand: i64,
    },
    #[error("balancing deferred to root splitter {root:?}")]
    DeferredToRoot { root: SplitterId },
    #[error("splitter {splitter:?} has not been activated")]
    NotReady { splitter: SplitterId },
    #[error("unknown splitter {0:?}")]
    UnknownSplitter(SplitterId),
    #[error("balancing requires authority")]
    NoAuthority,
}

impl BalanceError {
    /// Pinned demand that the network cannot deliver.
    pub fn is_infeasible_demand(&self) -> bool {
        matches!(
            self,
            BalanceError::InsufficientCapacity { .. } | BalanceError::InsufficientInput { .. }
        )
    }

    /// The error code recorded on the requesting splitter, if any.
    pub fn splitter_error(&self) -> Option<SplitterError> {
        match self {
            BalanceError::TopologyCycle { .. } => Some(SplitterError::TopologyCycle),
            BalanceError::InsufficientCapacity { .. } | BalanceError::InsufficientInput { .. } => {
                Some(SplitterError::InfeasibleDemand)
            }
            BalanceError::NotReady { .. } => Some(SplitterError::NotReady),
            BalanceError::DeferredToRoot { .. }
            | BalanceError::UnknownSplitter(_)
            | BalanceError::NoAuthority => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Summary of a committed balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceReport {
    pub root: SplitterId,
    pub splitter_count: usize,
    /// Splitters whose rates or connectivity changed.
    pub reconfigured: usize,
    /// Rate lost to truncation, per splitter where non-zero.
    pub undistributed: Vec<(SplitterId, i64)>,
}

// ---------------------------------------------------------------------------
// Pass 1
// ---------------------------------------------------------------------------

/// Fold fixed demand and shares from the leaves up to the root, and plan
/// each output's flags from what discovery found behind it.
pub fn aggregate_demand(tree: &mut NetworkTree) {
    for level in (0..tree.levels.len()).rev() {
        for position in 0..tree.levels[level].len() {
            let index = tree.levels[level][position];

            for i in 0..NUM_OUTPUTS {
                let child = tree.nodes[index].outputs[i].map(|c| {
                    let node = &tree.nodes[c];
                    (node.manual_input_rate, node.target_input_rate, node.shares, node.fixed_demand)
                });

                let node = &mut tree.nodes[index];
                let before = node.planned_states[i];
                let state = &mut node.planned_states[i];

                if node.max_output_rates[i] == 0 {
                    state.connected = false;
                    state.downstream_splitter = false;
                } else {
                    state.connected = true;

                    match child {
                        Some((true, target, _, _)) => {
                            state.downstream_splitter = true;
                            state.automatic = false;
                            node.fixed_demand += i64::from(target);
                        }
                        Some((false, _, shares, fixed_demand)) => {
                            state.downstream_splitter = true;
                            state.automatic = true;
                            node.shares += shares;
                            node.fixed_demand += fixed_demand;
                        }
                        None => {
                            state.downstream_splitter = false;
                            if state.automatic {
                                node.shares += node.potential_shares[i];
                            } else {
                                node.fixed_demand += i64::from(node.output_rates[i]);
                            }
                        }
                    }
                }

                let after = node.planned_states[i];
                if before.connected != after.connected
                    || before.downstream_splitter != after.downstream_splitter
                {
                    node.connection_state_changed = true;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pass 2
// ---------------------------------------------------------------------------

/// Hands out `available * SHARE_SCALE` across weights that sum to `shares`,
/// carrying the division remainder Bresenham-style so none of it is lost.
#[derive(Debug)]
struct ShareCarry {
    rate_per_share: i64,
    remainder: i64,
    shares: Shares,
    carry: i128,
    distributed: i64,
}

impl ShareCarry {
    fn new(available: i64, shares: Shares) -> Self {
        let (rate_per_share, remainder) = div_rem_floor(available * SHARE_SCALE, shares);
        Self {
            rate_per_share,
            remainder,
            shares,
            carry: 0,
            distributed: 0,
        }
    }

    fn allocate(&mut self, weight: Shares) -> i64 {
        let mut scaled = self.rate_per_share * weight;

        if self.remainder > 0 {
            let pending = self.carry + i128::from(self.remainder) * i128::from(weight);
            let shares = i128::from(self.shares);
            scaled += (pending / shares) as i64;
            self.carry = pending % shares;
        }

        let (rate, _) = div_rem_floor(scaled, SHARE_SCALE);
        self.distributed += rate;
        rate
    }
}

/// Allocate rates from the root down. Fails on the first node whose fixed
/// demand cannot be met.
pub fn allocate_rates(tree: &mut NetworkTree) -> Result<(), BalanceError> {
    if tree.nodes.is_empty() {
        return Ok(());
    }
    tree.nodes[0].allocated_input_rate = i64::from(tree.nodes[0].target_input_rate);

    for level in 0..tree.levels.len() {
        for position in 0..tree.levels[level].len() {
            let index = tree.levels[level][position];
            let node = &tree.nodes[index];

            if i64::from(node.max_input_rate) < node.fixed_demand {
                tracing::warn!(
                    splitter = ?node.splitter,
                    max_input_rate = node.max_input_rate,
                    fixed_demand = node.fixed_demand,
                    "max input rate is not sufficient to satisfy fixed demand"
                );
                return Err(BalanceError::InsufficientCapacity {
                    splitter: node.splitter,
                    max_input_rate: node.max_input_rate,
                    fixed_demand: node.fixed_demand,
                });
            }

            let available = node.allocated_input_rate - node.fixed_demand;
            if available < 0 {
                tracing::warn!(
                    splitter = ?node.splitter,
                    available = node.allocated_input_rate,
                    fixed_demand = node.fixed_demand,
                    "not enough available input for requested fixed output rates"
                );
                return Err(BalanceError::InsufficientInput {
                    splitter: node.splitter,
                    available: node.allocated_input_rate,
                    fixed_demand: node.fixed_demand,
                });
            }

            let mut carry = ShareCarry::new(available, node.shares);
            if carry.remainder != 0 {
                tracing::warn!(
                    splitter = ?node.splitter,
                    available,
                    shares = node.shares,
                    remainder = carry.remainder,
                    "could not evenly distribute rate among shares"
                );
            }

            let mut allocated = [0i64; NUM_OUTPUTS];
            for i in 0..NUM_OUTPUTS {
                // A zero-ceiling output added nothing in pass 1.
                if !node.planned_states[i].connected {
                    continue;
                }
                allocated[i] = match node.outputs[i] {
                    Some(c) => {
                        let child = &tree.nodes[c];
                        if child.manual_input_rate {
                            i64::from(child.target_input_rate)
                        } else {
                            child.fixed_demand + carry.allocate(child.shares)
                        }
                    }
                    None if node.planned_states[i].automatic => carry.allocate(node.potential_shares[i]),
                    None => i64::from(node.output_rates[i]),
                };
            }

            let children = node.outputs;
            let undistributed = available - carry.distributed;
            if undistributed > 0 {
                tracing::debug!(splitter = ?node.splitter, undistributed, "unallocated distribution rate");
            }
            tracing::debug!(splitter = ?node.splitter, outputs = ?allocated, "allocated output rates");

            let node = &mut tree.nodes[index];
            node.allocated_output_rates = allocated;
            node.undistributed_rate = undistributed;

            for (i, child) in children.into_iter().enumerate() {
                if let Some(c) = child {
                    tree.nodes[c].allocated_input_rate = allocated[i];
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Write the allocation into the live splitters. Returns how many need
/// their distribution rebuilt.
pub fn commit(tree: &NetworkTree, splitters: &mut SlotMap<SplitterId, Splitter>) -> usize {
    let mut reconfigured = 0;

    for node in &tree.nodes {
        let Some(splitter) = splitters.get_mut(node.splitter) else {
            continue;
        };

        let mut needs_setup = node.connection_state_changed;
        splitter.output_states = node.planned_states;

        let target = saturate_rate(node.allocated_input_rate);
        if splitter.target_input_rate != target {
            splitter.target_input_rate = target;
            needs_setup = true;
        }

        for i in 0..NUM_OUTPUTS {
            let rate = saturate_rate(node.allocated_output_rates[i]);
            if node.planned_states[i].connected && splitter.output_rates[i] != rate {
                splitter.output_rates[i] = rate;
                needs_setup = true;
            }
        }

        if needs_setup {
            splitter.flags.needs_distribution_setup = true;
            reconfigured += 1;
        }
        splitter.balancing_required = false;
        splitter.error = SplitterError::None;
    }

    reconfigured
}

/// Run both passes and commit on success.
pub fn balance(
    mut tree: NetworkTree,
    splitters: &mut SlotMap<SplitterId, Splitter>,
) -> Result<BalanceReport, BalanceError> {
    let root = tree.root();
    tracing::info!(?root, splitters = tree.len(), "balancing network");

    aggregate_demand(&mut tree);
    allocate_rates(&mut tree)?;
    let reconfigured = commit(&tree, splitters);

    let undistributed = tree
        .nodes
        .iter()
        .filter(|n| n.undistributed_rate != 0)
        .map(|n| (n.splitter, n.undistributed_rate))
        .collect();

    tracing::info!(?root, reconfigured, "network balanced");

    Ok(BalanceReport {
        root,
        splitter_count: tree.len(),
        reconfigured,
        undistributed,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
