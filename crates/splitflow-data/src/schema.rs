//! Serde structs for scenario files.
//!
//! A scenario names its splitters and machines and lists the links between
//! them. Links run from an output (a splitter port or a machine) to an
//! input, optionally through a belt.

use serde::Deserialize;

/// A whole scenario file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScenarioData {
    #[serde(default)]
    pub splitters: Vec<SplitterData>,
    #[serde(default)]
    pub machines: Vec<MachineData>,
    #[serde(default)]
    pub links: Vec<LinkData>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SplitterData {
    pub name: String,
    /// Pinned input rate in items/min. Automatic when absent.
    #[serde(default)]
    pub target_input_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MachineData {
    pub name: String,
    /// Fraction of nominal throughput, `[0, 1]`.
    #[serde(default = "default_potential")]
    pub potential: f64,
}

fn default_potential() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinkData {
    /// Building the items leave.
    pub from: String,
    /// Output port when `from` is a splitter.
    #[serde(default)]
    pub output: usize,
    /// Building the items enter.
    pub to: String,
    /// Belt speed in items/min. Direct attachment when absent.
    #[serde(default)]
    pub belt: Option<f64>,
}
