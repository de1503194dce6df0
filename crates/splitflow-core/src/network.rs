//! The authoritative owner of every splitter.
//!
//! [`SplitterNetwork`] drives per-tick distribution, runs balances when a
//! splitter asks for one, and exposes the rate-set operations. Every
//! rate-set operation balances the affected tree and rolls its change back
//! when the balance does not commit, so callers never observe a partially
//! applied request.
//!
//! A network created with [`SplitterNetwork::replica`] mirrors state only
//! and refuses every mutating operation.

use slotmap::SlotMap;

use crate::balancer::{self, BalanceError, BalanceReport};
use crate::config::SplitflowConfig;
use crate::connection::{
    ConnectionGraph, Connector, Direction, Downstream, NUM_OUTPUTS,
    find_next_consumer_and_max_rate, find_next_splitter_and_max_rate,
};
use crate::discovery::{DiscoveryMode, discover};
use crate::events::{EventBus, EventKind, Listener, SplitterEvent};
use crate::fixed::Seconds;
use crate::id::SplitterId;
use crate::item::Item;
use crate::rate::{MAX_OUTPUT_RATE, Rate, rate_from_items_per_minute};
use crate::splitter::{
    GrabError, GrabbedItem, ItemSource, PortStatus, Splitter, TickOutcome, Tickable,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a rate-set operation was refused or rolled back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateError {
    #[error("invalid output index: {0}")]
    InvalidOutput(usize),
    #[error("rate {rate} is outside 0..={max}")]
    OutOfRange { rate: Rate, max: Rate },
    #[error("output {0} is automatic, ignoring rate value")]
    OutputAutomatic(usize),
    #[error("target input rate is automatic")]
    TargetRateAutomatic,
    #[error("unknown splitter {0:?}")]
    UnknownSplitter(SplitterId),
    #[error("rate changes require authority")]
    NoAuthority,
    #[error("rebalance failed: {0}")]
    Balance(#[from] BalanceError),
}

/// Totals from one [`SplitterNetwork::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Items assigned to outputs across all splitters.
    pub assigned: usize,
    pub idle: usize,
    /// Splitters that skipped distribution waiting for a balance.
    pub pending_balance: usize,
}

// ---------------------------------------------------------------------------
// Port observation
// ---------------------------------------------------------------------------

/// Live view of a splitter's ports. An output counts as connected when a
/// walk along it ends at a building over belts that can carry items.
pub fn observe_ports<G: ConnectionGraph + ?Sized>(graph: &G, id: SplitterId) -> PortStatus {
    let input = find_next_consumer_and_max_rate(graph, Connector::SplitterInput(id), Direction::Upstream);

    let mut outputs_connected = [false; NUM_OUTPUTS];
    for (i, connected) in outputs_connected.iter_mut().enumerate() {
        let hop = find_next_consumer_and_max_rate(
            graph,
            Connector::SplitterOutput(id, i),
            Direction::Downstream,
        );
        *connected = hop.max_rate > 0;
    }

    PortStatus {
        input_connected: graph.is_connected(Connector::SplitterInput(id)),
        input_max_rate: input.max_rate,
        outputs_connected,
    }
}

// ---------------------------------------------------------------------------
// SplitterNetwork
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SplitterNetwork {
    splitters: SlotMap<SplitterId, Splitter>,
    config: SplitflowConfig,
    authority: bool,
    events: EventBus,
}

impl Default for SplitterNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitterNetwork {
    /// An authoritative network with default configuration.
    pub fn new() -> Self {
        Self::with_config(SplitflowConfig::default())
    }

    pub fn with_config(config: SplitflowConfig) -> Self {
        Self {
            splitters: SlotMap::with_key(),
            config,
            authority: true,
            events: EventBus::new(),
        }
    }

    /// A non-authoritative mirror.
    pub fn replica(config: SplitflowConfig) -> Self {
        Self {
            authority: false,
            ..Self::with_config(config)
        }
    }

    pub fn has_authority(&self) -> bool {
        self.authority
    }

    pub fn config(&self) -> &SplitflowConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SplitflowConfig) {
        self.config = config;
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Register a change listener for one event kind.
    pub fn on_event(&mut self, kind: EventKind, listener: Listener) {
        self.events.on(kind, listener);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Place a fresh splitter and activate it.
    pub fn add_splitter(&mut self) -> SplitterId {
        let mut splitter = Splitter::new();
        splitter.begin_play();
        let id = self.splitters.insert(splitter);
        tracing::debug!(splitter = ?id, "splitter placed");
        id
    }

    /// Insert a splitter as-is, without activating it.
    pub fn insert_splitter(&mut self, splitter: Splitter) -> SplitterId {
        self.splitters.insert(splitter)
    }

    /// Activate a splitter inserted with [`insert_splitter`](Self::insert_splitter).
    pub fn activate(&mut self, id: SplitterId) -> bool {
        match self.splitters.get_mut(id) {
            Some(s) => {
                s.begin_play();
                true
            }
            None => false,
        }
    }

    /// Dismantle a splitter. Neighbours notice the missing link on their
    /// next tick and rebalance.
    pub fn remove_splitter(&mut self, id: SplitterId) -> Option<Splitter> {
        self.splitters.remove(id)
    }

    pub fn get(&self, id: SplitterId) -> Option<&Splitter> {
        self.splitters.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: SplitterId) -> Option<&mut Splitter> {
        self.splitters.get_mut(id)
    }

    pub fn splitters(&self) -> &SlotMap<SplitterId, Splitter> {
        &self.splitters
    }

    pub(crate) fn splitters_mut(&mut self) -> &mut SlotMap<SplitterId, Splitter> {
        &mut self.splitters
    }

    pub fn ids(&self) -> impl Iterator<Item = SplitterId> + '_ {
        self.splitters.keys()
    }

    pub fn len(&self) -> usize {
        self.splitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splitters.is_empty()
    }

    /// Feed an item into a splitter's buffer. Hands it back when the
    /// splitter is unknown or full.
    pub fn insert_item(&mut self, id: SplitterId, item: Item) -> Result<(), Item> {
        match self.splitters.get_mut(id) {
            Some(s) => s.accept_item(item),
            None => Err(item),
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Tick every splitter once, in placement order.
    pub fn tick<G: ConnectionGraph + ?Sized>(
        &mut self,
        graph: &G,
        dt: Seconds,
    ) -> Result<TickSummary, BalanceError> {
        if !self.authority {
            return Err(BalanceError::NoAuthority);
        }

        let ids: Vec<SplitterId> = self.splitters.keys().collect();
        let mut summary = TickSummary::default();

        for id in ids {
            match self.tick_splitter(graph, id, dt)? {
                TickOutcome::Distributed { assigned } => summary.assigned += assigned,
                TickOutcome::Idle => summary.idle += 1,
                TickOutcome::BalanceRequired => summary.pending_balance += 1,
            }
        }

        Ok(summary)
    }

    /// Tick one splitter: finish first-time setup, balance if required,
    /// then distribute its buffer.
    pub fn tick_splitter<G: ConnectionGraph + ?Sized>(
        &mut self,
        graph: &G,
        id: SplitterId,
        dt: Seconds,
    ) -> Result<TickOutcome, BalanceError> {
        if !self.authority {
            return Err(BalanceError::NoAuthority);
        }

        let splitter = self
            .splitters
            .get_mut(id)
            .ok_or(BalanceError::UnknownSplitter(id))?;
        if !splitter.is_active() {
            return Ok(TickOutcome::Idle);
        }
        splitter.close_pull_window();

        if splitter.needs_initial_setup {
            self.setup_initial_distribution_state(graph, id);
        }

        if self.splitters[id].balancing_required
            && self.balance_from(graph, id, DiscoveryMode::RootOnly).is_err()
        {
            return Ok(TickOutcome::BalanceRequired);
        }

        let ports = observe_ports(graph, id);
        Ok(self.splitters[id].tick(&ports, dt))
    }

    /// Seed a never-balanced splitter from the belts around it.
    pub fn setup_initial_distribution_state<G: ConnectionGraph + ?Sized>(
        &mut self,
        graph: &G,
        id: SplitterId,
    ) -> bool {
        let input =
            find_next_consumer_and_max_rate(graph, Connector::SplitterInput(id), Direction::Upstream);

        let mut outputs = [(0, false); NUM_OUTPUTS];
        for (i, output) in outputs.iter_mut().enumerate() {
            let hop = find_next_consumer_and_max_rate(
                graph,
                Connector::SplitterOutput(id, i),
                Direction::Downstream,
            );
            *output = (hop.max_rate, matches!(hop.target, Some(Downstream::Splitter(_))));
        }

        match self.splitters.get_mut(id) {
            Some(s) => {
                tracing::debug!(splitter = ?id, input = input.max_rate, "initial distribution setup");
                s.apply_initial_distribution_state(input.max_rate, outputs);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Grab
    // -----------------------------------------------------------------------

    /// Pull the next item reserved for `output`.
    pub fn grab_output(&mut self, id: SplitterId, output: usize) -> Result<GrabbedItem, GrabError> {
        if !self.authority {
            return Err(GrabError::NoAuthority);
        }
        self.splitters
            .get_mut(id)
            .ok_or(GrabError::UnknownSplitter(id))?
            .grab_output(output)
    }

    // -----------------------------------------------------------------------
    // Balancing
    // -----------------------------------------------------------------------

    /// Balance the tree containing `id`. With `root_only`, a non-root
    /// member only marks its root dirty.
    pub fn request_balance<G: ConnectionGraph + ?Sized>(
        &mut self,
        graph: &G,
        id: SplitterId,
        root_only: bool,
    ) -> Result<BalanceReport, BalanceError> {
        if !self.authority {
            return Err(BalanceError::NoAuthority);
        }
        let mode = if root_only {
            DiscoveryMode::RootOnly
        } else {
            DiscoveryMode::AnyMember
        };
        self.balance_from(graph, id, mode)
    }

    fn balance_from<G: ConnectionGraph + ?Sized>(
        &mut self,
        graph: &G,
        id: SplitterId,
        mode: DiscoveryMode,
    ) -> Result<BalanceReport, BalanceError> {
        let tree = match discover(
            &self.splitters,
            graph,
            id,
            mode,
            self.config.features.respect_overclocking,
        ) {
            Ok(tree) => tree,
            Err(error) => return Err(self.balance_failed(id, error)),
        };

        let members: Vec<SplitterId> = tree.splitters().collect();

        match balancer::balance(tree, &mut self.splitters) {
            Ok(report) => {
                self.events.emit(SplitterEvent::Balanced {
                    root: report.root,
                    splitters: report.splitter_count,
                    reconfigured: report.reconfigured,
                });
                Ok(report)
            }
            Err(error) => {
                tracing::warn!(%error, "invalid network configuration, aborting network balancing");
                // The tree keeps running on its last committed rates; only
                // the triggering splitter retries.
                for member in members.into_iter().filter(|&m| m != id) {
                    if let Some(s) = self.splitters.get_mut(member) {
                        s.balancing_required = false;
                    }
                }
                Err(self.balance_failed(id, error))
            }
        }
    }

    fn balance_failed(&mut self, id: SplitterId, error: BalanceError) -> BalanceError {
        match &error {
            BalanceError::DeferredToRoot { root } => {
                if let Some(root) = self.splitters.get_mut(*root) {
                    root.balancing_required = true;
                }
                return error;
            }
            BalanceError::UnknownSplitter(_) | BalanceError::NoAuthority => return error,
            BalanceError::TopologyCycle { .. }
            | BalanceError::NotReady { .. }
            | BalanceError::InsufficientCapacity { .. }
            | BalanceError::InsufficientInput { .. } => {
                if let Some(s) = self.splitters.get_mut(id) {
                    s.balancing_required = true;
                }
            }
        }

        if let (Some(code), Some(s)) = (error.splitter_error(), self.splitters.get_mut(id)) {
            s.error = code;
        }

        self.events.emit(SplitterEvent::BalanceFailed {
            splitter: id,
            error: error.clone(),
        });
        error
    }

    // -----------------------------------------------------------------------
    // Rate-set operations
    // -----------------------------------------------------------------------

    fn writable(&mut self, id: SplitterId) -> Result<&mut Splitter, RateError> {
        if !self.authority {
            return Err(RateError::NoAuthority);
        }
        self.splitters.get_mut(id).ok_or(RateError::UnknownSplitter(id))
    }

    fn state_changed(&mut self, id: SplitterId) {
        self.events.emit(SplitterEvent::StateChanged { splitter: id });
    }

    /// Pin the input rate of a splitter at placement time, before it has
    /// ticked. No balance runs; the first one picks the pin up.
    pub fn preset_target_input_rate(
        &mut self,
        id: SplitterId,
        items_per_minute: f64,
    ) -> Result<(), RateError> {
        let splitter = self.writable(id)?;
        let rate = rate_from_items_per_minute(items_per_minute);
        if items_per_minute < 0.0 {
            return Err(RateError::OutOfRange {
                rate,
                max: Rate::MAX,
            });
        }

        splitter.flags.manual_input_rate = true;
        splitter.target_input_rate = rate;
        splitter.balancing_required = true;
        Ok(())
    }

    /// Switch between an automatic and a pinned target input rate.
    pub fn set_target_rate_automatic<G: ConnectionGraph + ?Sized>(
        &mut self,
        graph: &G,
        id: SplitterId,
        automatic: bool,
    ) -> Result<(), RateError> {
        let splitter = self.writable(id)?;
        if automatic == splitter.is_target_rate_automatic() {
            return Ok(());
        }
        splitter.flags.manual_input_rate = !automatic;

        if let Err(error) = self.balance_from(graph, id, DiscoveryMode::AnyMember) {
            if let Some(s) = self.splitters.get_mut(id) {
                s.flags.manual_input_rate = automatic;
            }
            return Err(error.into());
        }

        self.state_changed(id);
        Ok(())
    }

    /// Pin the target input rate, in items/min. Requires a manual target.
    pub fn set_target_input_rate<G: ConnectionGraph + ?Sized>(
        &mut self,
        graph: &G,
        id: SplitterId,
        items_per_minute: f64,
    ) -> Result<(), RateError> {
        let splitter = self.writable(id)?;
        let rate = rate_from_items_per_minute(items_per_minute);

        if items_per_minute < 0.0 {
            return Err(RateError::OutOfRange {
                rate,
                max: Rate::MAX,
            });
        }
        if splitter.is_target_rate_automatic() {
            return Err(RateError::TargetRateAutomatic);
        }

        let previous = splitter.target_input_rate;
        if previous != rate {
            splitter.target_input_rate = rate;

            if let Err(error) = self.balance_from(graph, id, DiscoveryMode::AnyMember) {
                if let Some(s) = self.splitters.get_mut(id) {
                    s.target_input_rate = previous;
                }
                return Err(error.into());
            }
        }

        self.state_changed(id);
        Ok(())
    }

    /// Pin a manual output to a rate in items/min. When the output feeds
    /// another splitter, that splitter's input is pinned to the same rate.
    pub fn set_output_rate<G: ConnectionGraph + ?Sized>(
        &mut self,
        graph: &G,
        id: SplitterId,
        output: usize,
        items_per_minute: f64,
    ) -> Result<(), RateError> {
        let splitter = self.writable(id)?;

        if output >= NUM_OUTPUTS {
            tracing::error!(output, "invalid output index");
            return Err(RateError::InvalidOutput(output));
        }

        let rate = rate_from_items_per_minute(items_per_minute);
        if !(0..=MAX_OUTPUT_RATE).contains(&rate) {
            tracing::error!(items_per_minute, "invalid output rate (must be between 0 and 780)");
            return Err(RateError::OutOfRange {
                rate,
                max: MAX_OUTPUT_RATE,
            });
        }

        if splitter.is_output_automatic(output) {
            tracing::error!(output, "output is automatic, ignoring rate value");
            return Err(RateError::OutputAutomatic(output));
        }

        let previous = splitter.output_rates[output];
        if previous == rate {
            return Ok(());
        }
        splitter.output_rates[output] = rate;

        let downstream = self.downstream_splitter(graph, id, output);
        let pinned = downstream.and_then(|d| {
            let child = self.splitters.get_mut(d)?;
            let saved = (child.flags.manual_input_rate, child.target_input_rate);
            child.flags.manual_input_rate = true;
            child.target_input_rate = rate;
            Some((d, saved))
        });

        if let Err(error) = self.balance_from(graph, id, DiscoveryMode::AnyMember) {
            if let Some(s) = self.splitters.get_mut(id) {
                s.output_rates[output] = previous;
            }
            if let Some((d, (manual, target))) = pinned
                && let Some(child) = self.splitters.get_mut(d)
            {
                child.flags.manual_input_rate = manual;
                child.target_input_rate = target;
            }
            return Err(error.into());
        }

        self.state_changed(id);
        Ok(())
    }

    /// Switch an output between automatic and manual. An output feeding
    /// another splitter follows that splitter's pin, so the pin is toggled
    /// instead.
    pub fn set_output_automatic<G: ConnectionGraph + ?Sized>(
        &mut self,
        graph: &G,
        id: SplitterId,
        output: usize,
        automatic: bool,
    ) -> Result<(), RateError> {
        let splitter = self.writable(id)?;

        if output >= NUM_OUTPUTS {
            return Err(RateError::InvalidOutput(output));
        }
        if automatic == splitter.is_output_automatic(output) {
            return Ok(());
        }

        let downstream = self
            .downstream_splitter(graph, id, output)
            .filter(|d| self.splitters.contains_key(*d));

        match downstream {
            Some(d) => self.splitters[d].flags.manual_input_rate = !automatic,
            None => self.splitters[id].output_states[output].automatic = automatic,
        }

        if let Err(error) = self.balance_from(graph, id, DiscoveryMode::AnyMember) {
            match downstream {
                Some(d) => {
                    if let Some(child) = self.splitters.get_mut(d) {
                        child.flags.manual_input_rate = automatic;
                    }
                }
                None => {
                    if let Some(s) = self.splitters.get_mut(id) {
                        s.output_states[output].automatic = !automatic;
                    }
                }
            }
            tracing::warn!(output, automatic, "failed to switch output mode");
            return Err(error.into());
        }

        tracing::info!(output, automatic, "switched output mode");
        self.state_changed(id);
        Ok(())
    }

    fn downstream_splitter<G: ConnectionGraph + ?Sized>(
        &self,
        graph: &G,
        id: SplitterId,
        output: usize,
    ) -> Option<SplitterId> {
        find_next_splitter_and_max_rate(graph, Connector::SplitterOutput(id, output), Direction::Downstream)
            .target
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::seconds;
    use crate::splitter::SplitterError;
    use crate::test_utils::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    #[test]
    fn first_ticks_settle_tree() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);

        let root = chain.net.get(chain.root).unwrap();
        assert_eq!(root.target_input_rate_raw(), 780_000);
        assert_eq!(root.output_rate_raw(0), Some(585_000));
        assert_eq!(root.output_rate_raw(1), Some(195_000));
        assert!(!root.is_balancing_required());

        let child = chain.net.get(chain.child).unwrap();
        assert_eq!(child.target_input_rate_raw(), 585_000);
        assert_eq!(child.output_rate_raw(1), Some(195_000));
        assert_eq!(child.items_per_cycle(), [1, 1, 1]);
        assert_eq!(root.items_per_cycle(), [3, 1, 0]);
    }

    #[test]
    fn ticking_distributes_buffered_items() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);

        for _ in 0..4 {
            chain.net.insert_item(chain.root, ore()).unwrap();
        }
        let summary = chain.net.tick(&chain.topo, seconds(0.1)).unwrap();
        assert_eq!(summary.assigned, 4);

        let mut grabbed = [0; NUM_OUTPUTS];
        for (out, count) in grabbed.iter_mut().enumerate() {
            while chain.net.grab_output(chain.root, out).is_ok() {
                *count += 1;
            }
        }
        assert_eq!(grabbed, [3, 1, 0]);
    }

    #[test]
    fn disconnecting_output_triggers_rebalance() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);

        chain.topo.remove_machine(chain.machines[3]);
        chain.net.insert_item(chain.root, ore()).unwrap();
        let outcome = chain
            .net
            .tick_splitter(&chain.topo, chain.root, seconds(0.1))
            .unwrap();
        assert_eq!(outcome, TickOutcome::BalanceRequired);

        chain.net.tick_splitter(&chain.topo, chain.root, seconds(0.1)).unwrap();
        let root = chain.net.get(chain.root).unwrap();
        assert!(!root.is_output_connected(1));
        assert_eq!(root.output_rate_raw(0), Some(780_000));
    }

    #[test]
    fn inactive_splitter_is_skipped() {
        let mut net = SplitterNetwork::new();
        let id = net.insert_splitter(Splitter::new());
        let topo = crate::topology::BeltTopology::new();
        assert_eq!(net.tick_splitter(&topo, id, seconds(0.1)), Ok(TickOutcome::Idle));
        assert!(net.activate(id));
        assert!(net.get(id).unwrap().is_active());
    }

    #[test]
    fn replica_refuses_mutation() {
        let (_, topo, _) = lone_splitter();
        let mut net = SplitterNetwork::replica(SplitflowConfig::default());
        let id = net.add_splitter();

        assert_eq!(net.tick(&topo, seconds(0.1)), Err(BalanceError::NoAuthority));
        assert_eq!(net.grab_output(id, 0), Err(GrabError::NoAuthority));
        assert_eq!(
            net.set_target_rate_automatic(&topo, id, false),
            Err(RateError::NoAuthority)
        );
        assert_eq!(
            net.request_balance(&topo, id, false),
            Err(BalanceError::NoAuthority)
        );
    }

    // -----------------------------------------------------------------------
    // Balancing
    // -----------------------------------------------------------------------

    #[test]
    fn root_only_request_from_member_flags_root() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);

        let err = chain
            .net
            .request_balance(&chain.topo, chain.child, true)
            .unwrap_err();
        assert_eq!(err, BalanceError::DeferredToRoot { root: chain.root });
        assert!(chain.net.get(chain.root).unwrap().is_balancing_required());
    }

    #[test]
    fn cycle_leaves_rates_unchanged_and_records_error() {
        let (mut net, mut topo, a) = lone_splitter();
        let b = net.add_splitter();
        topo.connect_via_belt(Connector::SplitterOutput(a, 0), Connector::SplitterInput(b), 120.0);
        topo.connect_via_belt(Connector::SplitterOutput(b, 0), Connector::SplitterInput(a), 120.0);
        let before = net.get(a).unwrap().output_rate_raw(0);

        let err = net.request_balance(&topo, a, false).unwrap_err();
        assert!(matches!(err, BalanceError::TopologyCycle { .. }));

        let s = net.get(a).unwrap();
        assert_eq!(s.output_rate_raw(0), before);
        assert_eq!(s.error(), SplitterError::TopologyCycle);
        assert!(s.is_balancing_required());
    }

    #[test]
    fn balance_events_reach_listeners() {
        let mut chain = two_level_tree();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        chain
            .net
            .on_event(EventKind::Balanced, Box::new(move |e| s.borrow_mut().push(e.clone())));

        settle(&mut chain.net, &chain.topo);
        assert!(!seen.borrow().is_empty());
        assert!(matches!(
            seen.borrow()[0],
            SplitterEvent::Balanced { root, splitters: 2, .. } if root == chain.root
        ));
    }

    // -----------------------------------------------------------------------
    // Rate-set operations
    // -----------------------------------------------------------------------

    #[test]
    fn manual_pin_propagates_as_fixed_demand() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);
        let (net, topo) = (&mut chain.net, &chain.topo);

        net.set_output_automatic(topo, chain.root, 0, false).unwrap();
        assert!(!net.get(chain.child).unwrap().is_target_rate_automatic());

        net.set_output_rate(topo, chain.root, 0, 5.0).unwrap();

        let child = net.get(chain.child).unwrap();
        assert_eq!(child.target_input_rate_raw(), 5000);
        let root = net.get(chain.root).unwrap();
        assert!(!root.is_output_automatic(0));
        assert_eq!(root.output_rate_raw(0), Some(5000));
        assert_eq!(root.output_rate_raw(1), Some(775_000));
    }

    #[test]
    fn output_rate_validation() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);
        let (net, topo) = (&mut chain.net, &chain.topo);

        assert_eq!(
            net.set_output_rate(topo, chain.root, NUM_OUTPUTS, 1.0),
            Err(RateError::InvalidOutput(NUM_OUTPUTS))
        );
        assert_eq!(
            net.set_output_rate(topo, chain.root, 1, 781.0),
            Err(RateError::OutOfRange {
                rate: 781_000,
                max: MAX_OUTPUT_RATE
            })
        );
        assert_eq!(
            net.set_output_rate(topo, chain.root, 1, 10.0),
            Err(RateError::OutputAutomatic(1))
        );
    }

    #[test]
    fn infeasible_output_rate_is_rolled_back() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);
        let (net, topo) = (&mut chain.net, &chain.topo);

        net.set_target_rate_automatic(topo, chain.root, false).unwrap();
        net.set_target_input_rate(topo, chain.root, 100.0).unwrap();
        net.set_output_automatic(topo, chain.root, 1, false).unwrap();
        let before = net.get(chain.root).unwrap().output_rate_raw(1);

        let err = net.set_output_rate(topo, chain.root, 1, 200.0).unwrap_err();
        assert!(matches!(err, RateError::Balance(e) if e.is_infeasible_demand()));

        let root = net.get(chain.root).unwrap();
        assert_eq!(root.output_rate_raw(1), before);
        assert_eq!(root.error(), SplitterError::InfeasibleDemand);
        assert!(root.is_balancing_required());
        assert!(!net.get(chain.child).unwrap().is_balancing_required());

        // The retry runs on the restored rates and succeeds.
        net.tick(topo, seconds(0.1)).unwrap();
        let root = net.get(chain.root).unwrap();
        assert!(!root.is_balancing_required());
        assert_eq!(root.error(), SplitterError::None);
        assert_eq!(root.output_rate_raw(1), before);
    }

    #[test]
    fn manual_target_of_zero_survives_ticks() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);
        let (net, topo) = (&mut chain.net, &chain.topo);

        net.set_target_rate_automatic(topo, chain.root, false).unwrap();
        net.set_target_input_rate(topo, chain.root, 0.0).unwrap();
        net.tick(topo, seconds(0.1)).unwrap();

        let root = net.get(chain.root).unwrap();
        assert_eq!(root.target_input_rate_raw(), 0);
        assert_eq!(root.output_rate_raw(0), Some(0));
        assert_eq!(root.output_rate_raw(1), Some(0));

        net.request_balance(topo, chain.root, true).unwrap();
        assert_eq!(net.get(chain.root).unwrap().target_input_rate_raw(), 0);
    }

    #[test]
    fn target_input_rate_requires_manual_mode() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);
        let (net, topo) = (&mut chain.net, &chain.topo);

        assert_eq!(
            net.set_target_input_rate(topo, chain.root, 60.0),
            Err(RateError::TargetRateAutomatic)
        );
        net.set_target_rate_automatic(topo, chain.root, false).unwrap();
        assert!(matches!(
            net.set_target_input_rate(topo, chain.root, -1.0),
            Err(RateError::OutOfRange { .. })
        ));

        net.set_target_input_rate(topo, chain.root, 120.0).unwrap();
        let root = net.get(chain.root).unwrap();
        assert_eq!(root.target_input_rate(), 120.0);
        assert_eq!(root.output_rate_raw(0), Some(90_000));
        assert_eq!(root.output_rate_raw(1), Some(30_000));
    }

    #[test]
    fn state_changes_are_announced() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        chain
            .net
            .on_event(EventKind::StateChanged, Box::new(move |_| *c.borrow_mut() += 1));

        chain
            .net
            .set_target_rate_automatic(&chain.topo, chain.root, false)
            .unwrap();
        // No-op calls stay silent.
        chain
            .net
            .set_target_rate_automatic(&chain.topo, chain.root, false)
            .unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn preset_pin_survives_initial_setup() {
        let mut chain = two_level_tree();
        chain.net.preset_target_input_rate(chain.child, 90.0).unwrap();
        settle(&mut chain.net, &chain.topo);

        let child = chain.net.get(chain.child).unwrap();
        assert!(!child.is_target_rate_automatic());
        assert_eq!(child.target_input_rate_raw(), 90_000);
        assert_eq!(child.output_rate_raw(0), Some(30_000));

        let root = chain.net.get(chain.root).unwrap();
        assert!(!root.is_output_automatic(0));
        assert_eq!(root.output_rate_raw(1), Some(690_000));
    }

    #[test]
    fn terminal_output_toggles_local_flag() {
        let mut chain = two_level_tree();
        settle(&mut chain.net, &chain.topo);

        chain
            .net
            .set_output_automatic(&chain.topo, chain.child, 2, false)
            .unwrap();
        let child = chain.net.get(chain.child).unwrap();
        assert!(!child.is_output_automatic(2));
        // The pinned output keeps its last rate as fixed demand.
        assert_eq!(child.output_rate_raw(2), Some(195_000));
        assert_eq!(child.output_rate_raw(0), Some(195_000));
    }
}
