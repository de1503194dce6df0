//! Change notifications for UI and telemetry collaborators.
//!
//! Listeners are registered per [`EventKind`] and called synchronously, in
//! registration order, as soon as the network emits an event. Kinds can be
//! suppressed, in which case emitting them costs nothing.

use crate::balancer::BalanceError;
use crate::id::SplitterId;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitterEvent {
    /// Persisted state of a splitter changed through a rate-set call.
    StateChanged { splitter: SplitterId },
    /// A balance committed new rates.
    Balanced {
        root: SplitterId,
        splitters: usize,
        reconfigured: usize,
    },
    /// A balance requested by `splitter` did not commit.
    BalanceFailed {
        splitter: SplitterId,
        error: BalanceError,
    },
}

/// Discriminant tag for [`SplitterEvent`], used for subscription and
/// suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    Balanced,
    BalanceFailed,
}

const EVENT_KIND_COUNT: usize = 3;

impl SplitterEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SplitterEvent::StateChanged { .. } => EventKind::StateChanged,
            SplitterEvent::Balanced { .. } => EventKind::Balanced,
            SplitterEvent::BalanceFailed { .. } => EventKind::BalanceFailed,
        }
    }
}

impl EventKind {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// A listener receives events read-only.
pub type Listener = Box<dyn FnMut(&SplitterEvent)>;

/// Per-kind listener lists.
#[derive(Default)]
pub struct EventBus {
    listeners: [Vec<Listener>; EVENT_KIND_COUNT],
    suppressed: [bool; EVENT_KIND_COUNT],
    emitted: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field(
                "listeners",
                &self.listeners.iter().map(Vec::len).collect::<Vec<_>>(),
            )
            .field("suppressed", &self.suppressed)
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind.
    pub fn on(&mut self, kind: EventKind, listener: Listener) {
        self.listeners[kind.index()].push(listener);
    }

    /// Register a listener for every event kind.
    pub fn on_any<F>(&mut self, listener: F)
    where
        F: FnMut(&SplitterEvent) + Clone + 'static,
    {
        for kind in [EventKind::StateChanged, EventKind::Balanced, EventKind::BalanceFailed] {
            self.on(kind, Box::new(listener.clone()));
        }
    }

    /// Stop delivering (and counting) events of this kind.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
    }

    pub fn unsuppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = false;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Deliver an event to every listener of its kind.
    pub fn emit(&mut self, event: SplitterEvent) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }

        self.emitted += 1;
        for listener in &mut self.listeners[idx] {
            listener(&event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners[kind.index()].len()
    }

    /// Events delivered since creation, suppressed ones excluded.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
