//! Splitflow Core -- self-balancing conveyor splitters.
//!
//! A splitter takes one input and divides it among three outputs. This
//! crate keeps whole trees of splitters balanced: each terminal consumer
//! gets its proportional share of the root's input unless the player pins
//! a rate, in which case the pin propagates up the tree as fixed demand.
//!
//! # Per-Tick Flow
//!
//! Each call to [`network::SplitterNetwork::tick`] visits every splitter:
//!
//! 1. **Initial setup** -- A never-balanced splitter seeds its rates from
//!    the belts around it.
//! 2. **Balance** -- A splitter flagged for balancing asks its root to run
//!    the two-pass balancer; members defer to the root.
//! 3. **Connectivity check** -- A changed output connection flags a
//!    rebalance and skips distribution for this tick.
//! 4. **Distribution** -- Buffered items are reserved for outputs by
//!    weighted round robin over the integer cycle derived from the rates.
//!
//! Consumers pull reserved items with [`network::SplitterNetwork::grab_output`].
//!
//! # Key Types
//!
//! - [`network::SplitterNetwork`] -- Owns splitters, drives ticks and the
//!   rate-set operations.
//! - [`splitter::Splitter`] -- Single splitter state and distribution engine.
//! - [`discovery::NetworkTree`] -- Arena-indexed snapshot of one splitter tree.
//! - [`balancer`] -- Demand aggregation and rate allocation.
//! - [`connection::ConnectionGraph`] -- What the engine needs to know about
//!   the conveyor graph; [`topology::BeltTopology`] implements it in memory.
//! - [`rate::Rate`] -- Fixed-point items/min.
//! - [`persist`] and [`migration`] -- Versioned save records via bitcode.

pub mod balancer;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod events;
pub mod fixed;
pub mod id;
pub mod item;
pub mod migration;
pub mod network;
pub mod persist;
pub mod rate;
pub mod splitter;
pub mod topology;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
