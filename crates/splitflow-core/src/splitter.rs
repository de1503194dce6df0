//! Single splitter state machine and its per-tick distribution engine.
//!
//! A splitter owns a small item buffer and hands buffered items to its
//! outputs by weighted round robin. The weights come from the output rates
//! the network balancer assigned: rates are reduced by their GCD into an
//! integer *cycle* (`items_per_cycle`), and every output works down its
//! allotment for the current cycle. Within a tick each buffered item is
//! assigned to the output with the highest `assignable * 1/items_per_cycle`
//! priority; outputs whose consumers have stopped pulling are penalized so
//! the remaining outputs keep flowing.
//!
//! Assignment and removal are separate steps. [`Tickable::tick`] reserves
//! buffer slots per output; consumers later pull their reserved items with
//! [`ItemSource::grab_output`]. The difference between the two counters is
//! the backpressure signal.

use serde::{Deserialize, Serialize};

use crate::connection::NUM_OUTPUTS;
use crate::fixed::{Fixed64, Seconds, fixed64_to_f64, reciprocal};
use crate::id::SplitterId;
use crate::item::{Item, ItemBuffer, MAX_INVENTORY_SIZE};
use crate::rate::{RATE_SCALE, Rate, gcd_all, rate_to_items_per_minute};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Current splitter version stamped on every active splitter.
pub const SPLITTER_VERSION: u8 = 1;

/// An output with unclaimed items for longer than this counts as blocked.
pub const BLOCK_DETECTION_THRESHOLD: Seconds = Fixed64::from_bits(1 << 31); // 0.5 s

/// Weight of the newest sample in the item rate moving average.
pub const EXPONENTIAL_AVERAGE_WEIGHT: Fixed64 = Fixed64::from_bits(1 << 31); // 0.5

/// Cycles shorter than this get twice as long.
pub const SHORT_CYCLE: Seconds = Fixed64::const_from_int(2);

/// Cycles longer than this get halved when the ratio allows it.
pub const LONG_CYCLE: Seconds = Fixed64::const_from_int(10);

/// Most negative `left_in_cycle` tolerated before the cycle is hard-reset.
pub const DRIFT_LIMIT: i32 = -40;

/// Distance between two items on a belt.
pub const ITEM_SPACING: Fixed64 = Fixed64::const_from_int(120);

/// Cycle time assigned after loading so the first partial cycle does not
/// feed the throughput statistic.
const LOADED_CYCLE_TIME: Seconds = Fixed64::const_from_int(-100_000);

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Per-output state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputState {
    /// Rate derived from proportional sharing instead of pinned manually.
    pub automatic: bool,
    /// Something is attached to the output.
    pub connected: bool,
    /// The attached consumer is another splitter.
    pub downstream_splitter: bool,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            automatic: true,
            connected: false,
            downstream_splitter: false,
        }
    }
}

impl OutputState {
    const AUTOMATIC_BIT: u32 = 1 << 0;
    const CONNECTED_BIT: u32 = 1 << 1;
    const SPLITTER_BIT: u32 = 1 << 2;

    /// Decode the bit-packed layout used by legacy save records.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            automatic: bits & Self::AUTOMATIC_BIT != 0,
            connected: bits & Self::CONNECTED_BIT != 0,
            downstream_splitter: bits & Self::SPLITTER_BIT != 0,
        }
    }

    /// Encode into the legacy bit-packed layout.
    pub fn to_bits(self) -> u32 {
        let mut bits = 0;
        if self.automatic {
            bits |= Self::AUTOMATIC_BIT;
        }
        if self.connected {
            bits |= Self::CONNECTED_BIT;
        }
        if self.downstream_splitter {
            bits |= Self::SPLITTER_BIT;
        }
        bits
    }
}

/// Flags that survive save/load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentFlags {
    /// `target_input_rate` is pinned by the player.
    pub manual_input_rate: bool,
    /// Rates changed since the cycle was last derived from them.
    pub needs_distribution_setup: bool,
}

/// Last balancing failure seen by a splitter. `None` after a success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SplitterError {
    #[default]
    None = 0,
    TopologyCycle = 1,
    InfeasibleDemand = 2,
    NotReady = 3,
}

impl SplitterError {
    /// Numeric code for UI collaborators.
    pub fn code(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Live connectivity of a splitter's ports as observed this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortStatus {
    pub input_connected: bool,
    /// Slowest belt between the input and whatever feeds it.
    pub input_max_rate: Rate,
    pub outputs_connected: [bool; NUM_OUTPUTS],
}

/// Where [`Splitter::setup_distribution`] takes connectivity from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Refresh the Connected flags from live ports first.
    Live([bool; NUM_OUTPUTS]),
    /// Trust the stored flags and keep the cycle counters (save-game load).
    Persisted,
}

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to hand out, or nothing to hand it to.
    Idle,
    /// Buffered items were assigned to outputs.
    Distributed { assigned: usize },
    /// Output connectivity changed; distribution skipped until rebalanced.
    BalanceRequired,
}

/// Something advanced once per simulation step.
pub trait Tickable {
    fn tick(&mut self, ports: &PortStatus, dt: Seconds) -> TickOutcome;
}

/// An item pulled out of an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrabbedItem {
    pub item: Item,
    /// How far past the output the item should be placed on the belt.
    pub offset_beyond: Fixed64,
}

/// Errors from pulling an item out of an output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrabError {
    #[error("output index {0} out of range")]
    InvalidOutput(usize),
    #[error("nothing assigned to output {0}")]
    UnreachableOutput(usize),
    #[error("output {0} has assignments but no reserved slot holds an item")]
    SlotMissing(usize),
    #[error("unknown splitter {0:?}")]
    UnknownSplitter(SplitterId),
    #[error("item removal requires authority")]
    NoAuthority,
}

/// A building downstream consumers pull items from.
pub trait ItemSource {
    fn grab_output(&mut self, output: usize) -> Result<GrabbedItem, GrabError>;
}

// ---------------------------------------------------------------------------
// Splitter
// ---------------------------------------------------------------------------

/// One splitter: persisted rate configuration plus distribution state.
#[derive(Debug, Clone)]
pub struct Splitter {
    pub(crate) output_states: [OutputState; NUM_OUTPUTS],
    pub(crate) flags: PersistentFlags,
    pub(crate) version: u8,
    pub(crate) target_input_rate: Rate,
    pub(crate) output_rates: [Rate; NUM_OUTPUTS],
    pub(crate) left_in_cycle_for_outputs: [i32; NUM_OUTPUTS],

    pub(crate) left_in_cycle: i32,
    pub(crate) cycle_length: i32,
    pub(crate) cached_item_count: usize,
    pub(crate) item_rate: Fixed64,
    pub(crate) error: SplitterError,

    pub(crate) items_per_cycle: [i32; NUM_OUTPUTS],
    pub(crate) blocked_for: [Seconds; NUM_OUTPUTS],
    pub(crate) assigned_items: [i32; NUM_OUTPUTS],
    pub(crate) grabbed_items: [i32; NUM_OUTPUTS],
    pub(crate) priority_step: [Fixed64; NUM_OUTPUTS],
    pub(crate) assigned_outputs: [Option<usize>; MAX_INVENTORY_SIZE],
    next_slot: [usize; NUM_OUTPUTS],
    slot_end: [usize; NUM_OUTPUTS],

    pub(crate) balancing_required: bool,
    pub(crate) needs_initial_setup: bool,
    pub(crate) active: bool,
    pub(crate) cycle_time: Seconds,
    pub(crate) really_grabbed: i32,

    buffer: ItemBuffer,
}

impl Default for Splitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Splitter {
    /// A freshly placed splitter: every output automatic, zero rates, not
    /// yet active in any network.
    pub fn new() -> Self {
        Self {
            output_states: [OutputState::default(); NUM_OUTPUTS],
            flags: PersistentFlags::default(),
            version: 0,
            target_input_rate: 0,
            output_rates: [0; NUM_OUTPUTS],
            left_in_cycle_for_outputs: [0; NUM_OUTPUTS],
            left_in_cycle: 0,
            cycle_length: 0,
            cached_item_count: 0,
            item_rate: Fixed64::ZERO,
            error: SplitterError::None,
            items_per_cycle: [0; NUM_OUTPUTS],
            blocked_for: [Fixed64::ZERO; NUM_OUTPUTS],
            assigned_items: [0; NUM_OUTPUTS],
            grabbed_items: [0; NUM_OUTPUTS],
            priority_step: [Fixed64::ZERO; NUM_OUTPUTS],
            assigned_outputs: [None; MAX_INVENTORY_SIZE],
            next_slot: [MAX_INVENTORY_SIZE; NUM_OUTPUTS],
            slot_end: [0; NUM_OUTPUTS],
            balancing_required: true,
            needs_initial_setup: true,
            active: false,
            cycle_time: Fixed64::ZERO,
            really_grabbed: 0,
            buffer: ItemBuffer::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Target input rate in items/min.
    pub fn target_input_rate(&self) -> f64 {
        rate_to_items_per_minute(self.target_input_rate)
    }

    /// Target input rate in fixed-point.
    pub fn target_input_rate_raw(&self) -> Rate {
        self.target_input_rate
    }

    /// Output rate in items/min, `None` for an invalid index.
    pub fn output_rate(&self, output: usize) -> Option<f64> {
        self.output_rates.get(output).copied().map(rate_to_items_per_minute)
    }

    pub fn output_rate_raw(&self, output: usize) -> Option<Rate> {
        self.output_rates.get(output).copied()
    }

    pub fn is_target_rate_automatic(&self) -> bool {
        !self.flags.manual_input_rate
    }

    pub fn is_output_automatic(&self, output: usize) -> bool {
        self.output_states.get(output).is_some_and(|s| s.automatic)
    }

    pub fn is_output_connected(&self, output: usize) -> bool {
        self.output_states.get(output).is_some_and(|s| s.connected)
    }

    pub fn is_output_splitter(&self, output: usize) -> bool {
        self.output_states.get(output).is_some_and(|s| s.downstream_splitter)
    }

    pub fn output_state(&self, output: usize) -> Option<OutputState> {
        self.output_states.get(output).copied()
    }

    /// Measured throughput in items/min.
    pub fn item_rate(&self) -> f64 {
        fixed64_to_f64(self.item_rate)
    }

    pub fn error(&self) -> SplitterError {
        self.error
    }

    /// Items in the buffer when it was last scanned.
    pub fn inventory_size(&self) -> usize {
        self.cached_item_count
    }

    pub fn buffered_items(&self) -> usize {
        self.buffer.len()
    }

    pub fn items_per_cycle(&self) -> [i32; NUM_OUTPUTS] {
        self.items_per_cycle
    }

    pub fn cycle_length(&self) -> i32 {
        self.cycle_length
    }

    pub fn left_in_cycle(&self) -> i32 {
        self.left_in_cycle
    }

    pub fn left_in_cycle_for_outputs(&self) -> [i32; NUM_OUTPUTS] {
        self.left_in_cycle_for_outputs
    }

    pub fn priority_step_size(&self) -> [Fixed64; NUM_OUTPUTS] {
        self.priority_step
    }

    pub fn assigned_items(&self) -> [i32; NUM_OUTPUTS] {
        self.assigned_items
    }

    pub fn blocked_for(&self, output: usize) -> Option<Seconds> {
        self.blocked_for.get(output).copied()
    }

    pub fn is_balancing_required(&self) -> bool {
        self.balancing_required
    }

    pub fn needs_distribution_setup(&self) -> bool {
        self.flags.needs_distribution_setup
    }

    pub fn splitter_version(&self) -> u8 {
        self.version
    }

    /// Whether the splitter has been activated in a network. Balancing only
    /// walks through active splitters.
    pub fn is_active(&self) -> bool {
        self.active
    }

    // -----------------------------------------------------------------------
    // Buffer
    // -----------------------------------------------------------------------

    /// Accept an item from the input belt. Hands it back when full.
    pub fn accept_item(&mut self, item: Item) -> Result<(), Item> {
        self.buffer.insert(item).map(|_| ())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stamp a version. Versions outside `1..=254` and downgrades are refused.
    pub fn set_splitter_version(&mut self, version: u8) -> bool {
        if !(1..=254).contains(&version) {
            tracing::error!(version, "invalid splitter version");
            return false;
        }
        if version < self.version {
            tracing::error!(from = self.version, to = version, "cannot downgrade splitter");
            return false;
        }
        self.version = version;
        true
    }

    /// Activation on placement or after loading.
    pub(crate) fn begin_play(&mut self) {
        self.set_splitter_version(SPLITTER_VERSION);
        self.active = true;
        self.balancing_required = true;
    }

    /// Rebuild the transient cycle state from freshly loaded persisted fields.
    pub(crate) fn finish_loading(&mut self) {
        self.left_in_cycle = self.left_in_cycle_for_outputs.iter().sum();
        self.cycle_length = self.items_per_cycle.iter().sum();
        self.cycle_time = LOADED_CYCLE_TIME;
        self.setup_distribution(Connectivity::Persisted);
        self.needs_initial_setup = false;
    }

    /// Seed rates for a splitter that has never been balanced: unless
    /// pinned, the input adopts the feeding belt's ceiling. Every attached
    /// output gets one item/min so that it takes part in the first balance.
    pub(crate) fn apply_initial_distribution_state(
        &mut self,
        input_max_rate: Rate,
        outputs: [(Rate, bool); NUM_OUTPUTS],
    ) {
        if !self.flags.manual_input_rate {
            self.target_input_rate = input_max_rate;
        }

        for (i, (max_rate, is_splitter)) in outputs.into_iter().enumerate() {
            let state = &mut self.output_states[i];
            if max_rate > 0 {
                self.output_rates[i] = RATE_SCALE;
                state.connected = true;
            } else {
                self.output_rates[i] = 0;
                state.connected = false;
            }
            state.downstream_splitter = is_splitter;
        }

        self.needs_initial_setup = false;
        self.balancing_required = true;
    }

    /// Stop consumers from pulling while the distribution is rebuilt.
    pub(crate) fn close_pull_window(&mut self) {
        self.next_slot = [MAX_INVENTORY_SIZE; NUM_OUTPUTS];
    }

    // -----------------------------------------------------------------------
    // Distribution setup
    // -----------------------------------------------------------------------

    /// Derive the integer cycle from the output rates.
    ///
    /// Connected rates are reduced by their GCD into `items_per_cycle`;
    /// `cycle_length` is their sum and each output's priority step is the
    /// reciprocal of its count. A change in any step size restarts the
    /// cycle unless the state was just loaded from a save.
    pub fn setup_distribution(&mut self, connectivity: Connectivity) {
        tracing::debug!(
            input = self.target_input_rate,
            outputs = ?self.output_rates,
            "setting up distribution"
        );

        let loading = match connectivity {
            Connectivity::Live(connected) => {
                for (state, live) in self.output_states.iter_mut().zip(connected) {
                    state.connected = live;
                }
                false
            }
            Connectivity::Persisted => true,
        };
        self.flags.needs_distribution_setup = false;

        if !self.output_states.iter().any(|s| s.connected) {
            self.output_rates = [RATE_SCALE; NUM_OUTPUTS];
            self.items_per_cycle = [0; NUM_OUTPUTS];
            self.priority_step = [Fixed64::ZERO; NUM_OUTPUTS];
            self.cycle_length = 0;
            self.left_in_cycle_for_outputs = [0; NUM_OUTPUTS];
            self.left_in_cycle = 0;
            return;
        }

        for i in 0..NUM_OUTPUTS {
            self.items_per_cycle[i] = if self.output_states[i].connected {
                self.output_rates[i]
            } else {
                0
            };
        }

        let divisor = gcd_all(&self.items_per_cycle);
        if divisor == 0 {
            tracing::debug!("no connected output carries a rate");
            return;
        }

        for count in &mut self.items_per_cycle {
            *count /= divisor;
        }

        self.cycle_length = 0;
        let mut changed = false;

        for i in 0..NUM_OUTPUTS {
            let step = if self.output_states[i].connected {
                self.cycle_length += self.items_per_cycle[i];
                reciprocal(self.items_per_cycle[i])
            } else {
                Fixed64::ZERO
            };

            if self.priority_step[i] != step {
                self.priority_step[i] = step;
                changed = true;
            }
        }

        if changed && !loading {
            self.left_in_cycle_for_outputs = [0; NUM_OUTPUTS];
            self.left_in_cycle = 0;
            self.prepare_cycle(false, true);
        }
    }

    /// Start the next cycle.
    ///
    /// A normal rollover (`reset == false`) updates the throughput average
    /// and, when `allow_extension` is set, retunes the cycle length towards
    /// the 2-10 s band, then adds a fresh allotment on top of whatever is
    /// left. A reset discards the leftovers.
    pub(crate) fn prepare_cycle(&mut self, allow_extension: bool, reset: bool) {
        tracing::debug!(
            allow_extension,
            reset,
            cycle_time = %self.cycle_time,
            grabbed = self.really_grabbed,
            "preparing cycle"
        );

        if !reset && self.cycle_time > Fixed64::ZERO {
            self.update_item_rate();

            if allow_extension && self.cycle_time < SHORT_CYCLE {
                self.extend_cycle();
            } else if self.cycle_time > LONG_CYCLE {
                self.shorten_cycle();
            }
        }

        self.cycle_time = Fixed64::ZERO;
        self.really_grabbed = 0;

        if reset {
            self.left_in_cycle = self.cycle_length;
        } else {
            self.left_in_cycle += self.cycle_length;
        }

        for i in 0..NUM_OUTPUTS {
            if self.output_states[i].connected && self.output_rates[i] > 0 {
                if reset {
                    self.left_in_cycle_for_outputs[i] = self.items_per_cycle[i];
                } else {
                    self.left_in_cycle_for_outputs[i] += self.items_per_cycle[i];
                }
            } else {
                self.left_in_cycle_for_outputs[i] = 0;
            }
        }
    }

    fn update_item_rate(&mut self) {
        let sample =
            Fixed64::from_num(60 * self.really_grabbed).saturating_div(self.cycle_time);

        self.item_rate = if self.item_rate > Fixed64::ZERO {
            EXPONENTIAL_AVERAGE_WEIGHT * sample
                + (Fixed64::ONE - EXPONENTIAL_AVERAGE_WEIGHT) * self.item_rate
        } else {
            sample
        };
    }

    fn extend_cycle(&mut self) {
        let Some(length) = self.cycle_length.checked_mul(2) else {
            return;
        };
        let mut doubled = self.items_per_cycle;
        for count in &mut doubled {
            match count.checked_mul(2) {
                Some(c) => *count = c,
                None => return,
            }
        }

        tracing::debug!(cycle_time = %self.cycle_time, length, "cycle too short, doubling");
        self.cycle_length = length;
        self.items_per_cycle = doubled;
    }

    fn shorten_cycle(&mut self) {
        let even = self.cycle_length % 2 == 0 && self.items_per_cycle.iter().all(|c| c % 2 == 0);
        if !even {
            return;
        }

        tracing::debug!(
            cycle_time = %self.cycle_time,
            length = self.cycle_length / 2,
            "cycle too long, halving"
        );
        self.cycle_length /= 2;
        for count in &mut self.items_per_cycle {
            *count /= 2;
        }
    }

    pub fn is_output_blocked(&self, output: usize) -> bool {
        self.blocked_for
            .get(output)
            .is_some_and(|&t| t > BLOCK_DETECTION_THRESHOLD)
    }

    // -----------------------------------------------------------------------
    // Assignment helpers
    // -----------------------------------------------------------------------

    /// Highest-priority output with assignable items, skipping `excluded`.
    /// Ties keep the lowest index.
    fn pick_output(
        &self,
        assignable: &[i32; NUM_OUTPUTS],
        excluded: &[bool; NUM_OUTPUTS],
    ) -> Option<usize> {
        let mut best: Option<(usize, Fixed64)> = None;

        for i in 0..NUM_OUTPUTS {
            if excluded[i] || assignable[i] <= 0 {
                continue;
            }
            let priority = Fixed64::from_num(assignable[i]) * self.priority_step[i];
            if best.is_none_or(|(_, p)| priority > p) {
                best = Some((i, priority));
            }
        }

        best.map(|(i, _)| i)
    }
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

impl Tickable for Splitter {
    /// Assign every buffered item to an output.
    ///
    /// Expects initial setup and any pending balance to be done already;
    /// the network driver takes care of both before calling this.
    fn tick(&mut self, ports: &PortStatus, dt: Seconds) -> TickOutcome {
        self.close_pull_window();

        for i in 0..NUM_OUTPUTS {
            self.left_in_cycle -= self.grabbed_items[i];
            self.grabbed_items[i] = 0;
            self.assigned_items[i] = 0;
        }
        self.slot_end = [0; NUM_OUTPUTS];
        self.assigned_outputs = [None; MAX_INVENTORY_SIZE];

        if self.target_input_rate == 0 && ports.input_connected && !self.flags.manual_input_rate {
            self.target_input_rate = ports.input_max_rate;
        }

        let mut connections = 0;
        let mut stale = false;
        for i in 0..NUM_OUTPUTS {
            let connected = self.output_states[i].connected;
            connections += usize::from(connected);
            if connected != ports.outputs_connected[i] {
                tracing::debug!(output = i, "connection change");
                stale = true;
            }
        }

        if stale {
            self.balancing_required = true;
            return TickOutcome::BalanceRequired;
        }

        if self.flags.needs_distribution_setup {
            self.setup_distribution(Connectivity::Live(ports.outputs_connected));
        }

        let mut populated = [0usize; MAX_INVENTORY_SIZE];
        let mut count = 0;
        for slot in self.buffer.occupied_slots() {
            populated[count] = slot;
            count += 1;
        }
        self.cached_item_count = count;

        if connections == 0 || count == 0 {
            self.cycle_time += dt;
            return TickOutcome::Idle;
        }

        if self.left_in_cycle < DRIFT_LIMIT {
            tracing::warn!(left_in_cycle = self.left_in_cycle, "cycle counter drifted, resetting");
            self.prepare_cycle(false, true);
        } else if self.left_in_cycle <= 0 {
            self.prepare_cycle(true, false);
        }

        self.cycle_time += dt;

        let mut assignable = [0i32; NUM_OUTPUTS];
        let mut first_slot = [MAX_INVENTORY_SIZE; NUM_OUTPUTS];
        let mut assigned = 0;

        for &slot in &populated[..count] {
            // Adding back grabbed items undoes the bias from penalties
            // handed out for earlier slots in this tick.
            for i in 0..NUM_OUTPUTS {
                assignable[i] = self.left_in_cycle_for_outputs[i] - self.assigned_items[i]
                    + self.grabbed_items[i];
            }

            let mut penalized = [false; NUM_OUTPUTS];
            let mut choice = self.pick_output(&assignable, &penalized);
            if choice.is_none() {
                break;
            }

            while let Some(output) = choice {
                if !self.is_output_blocked(output) {
                    break;
                }
                tracing::debug!(output, "output blocked, penalizing");
                penalized[output] = true;
                self.left_in_cycle_for_outputs[output] -= 1;
                // Counted as grabbed so next tick's rollover settles `left_in_cycle`.
                self.grabbed_items[output] += 1;
                choice = self.pick_output(&assignable, &penalized);
            }

            let Some(output) = choice else {
                tracing::debug!(slot, "all eligible outputs blocked");
                continue;
            };

            self.assigned_outputs[slot] = Some(output);
            if first_slot[output] == MAX_INVENTORY_SIZE {
                first_slot[output] = slot;
            }
            self.slot_end[output] = slot + 1;
            self.assigned_items[output] += 1;
            assigned += 1;
        }

        for i in 0..NUM_OUTPUTS {
            // Grabbed counts include penalties, which catches stuck outputs.
            if self.assigned_items[i] > 0 || self.grabbed_items[i] > 0 {
                self.blocked_for[i] += dt;
            }
        }

        tracing::debug!(
            assigned = ?self.assigned_items,
            blocked_for = ?self.blocked_for,
            "distributed buffer"
        );

        self.next_slot = first_slot;
        TickOutcome::Distributed { assigned }
    }
}

// ---------------------------------------------------------------------------
// Grab
// ---------------------------------------------------------------------------

impl ItemSource for Splitter {
    fn grab_output(&mut self, output: usize) -> Result<GrabbedItem, GrabError> {
        if output >= NUM_OUTPUTS {
            return Err(GrabError::InvalidOutput(output));
        }

        self.blocked_for[output] = Fixed64::ZERO;

        if self.assigned_items[output] <= self.grabbed_items[output] {
            if !self.output_states[output].connected {
                self.balancing_required = true;
            }
            return Err(GrabError::UnreachableOutput(output));
        }

        for slot in self.next_slot[output]..self.slot_end[output] {
            if self.assigned_outputs[slot] != Some(output) {
                continue;
            }
            let Some(item) = self.buffer.take(slot) else {
                continue;
            };

            let offset_beyond = Fixed64::from_num(self.grabbed_items[output]) * ITEM_SPACING;
            self.assigned_outputs[slot] = None;
            self.grabbed_items[output] += 1;
            self.left_in_cycle_for_outputs[output] -= 1;
            self.really_grabbed += 1;
            self.next_slot[output] = slot + 1;

            return Ok(GrabbedItem {
                item,
                offset_beyond,
            });
        }

        tracing::warn!(output, "no reserved slot found for output");
        if !self.output_states[output].connected {
            self.balancing_required = true;
        }
        Err(GrabError::SlotMissing(output))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
