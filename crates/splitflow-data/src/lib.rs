//! Data-driven setup for splitflow: configuration files and scenarios.

pub mod loader;
pub mod schema;

use std::collections::HashMap;
use std::path::Path;

use splitflow_core::config::SplitflowConfig;
use splitflow_core::connection::{Connector, NUM_OUTPUTS};
use splitflow_core::fixed::f64_to_fixed64;
use splitflow_core::id::{MachineId, SplitterId};
use splitflow_core::network::SplitterNetwork;
use splitflow_core::topology::BeltTopology;

pub use loader::{DataLoadError, Format};
use loader::{
    check_duplicate, deserialize_file, deserialize_str, detect_format, find_data_file,
    require_data_file,
};
use schema::ScenarioData;

/// A built scenario, ready to tick.
#[derive(Debug)]
pub struct Scenario {
    pub network: SplitterNetwork,
    pub topology: BeltTopology,
    pub splitters: HashMap<String, SplitterId>,
    pub machines: HashMap<String, MachineId>,
}

impl Scenario {
    pub fn splitter(&self, name: &str) -> Option<SplitterId> {
        self.splitters.get(name).copied()
    }

    pub fn machine(&self, name: &str) -> Option<MachineId> {
        self.machines.get(name).copied()
    }
}

/// Load a [`SplitflowConfig`]. Missing fields take their defaults.
pub fn load_config(path: &Path) -> Result<SplitflowConfig, DataLoadError> {
    let config: SplitflowConfig = deserialize_file(path)?;
    tracing::debug!(?path, ?config, "loaded configuration");
    Ok(config)
}

/// Base name of the configuration file in a data directory.
pub const CONFIG_BASE_NAME: &str = "splitflow";

/// Load `splitflow.{ron,toml,json}` from `dir`, falling back to the
/// defaults when the directory has none.
pub fn load_config_dir(dir: &Path) -> Result<SplitflowConfig, DataLoadError> {
    match find_data_file(dir, CONFIG_BASE_NAME)? {
        Some(path) => load_config(&path),
        None => {
            tracing::debug!(?dir, "no configuration file, using defaults");
            Ok(SplitflowConfig::default())
        }
    }
}

/// Load the scenario `name` from `dir` in whichever format it was written.
pub fn load_scenario_dir(
    dir: &Path,
    name: &str,
    config: SplitflowConfig,
) -> Result<Scenario, DataLoadError> {
    let path = require_data_file(dir, name)?;
    load_scenario(&path, config)
}

/// Load and build a scenario file.
pub fn load_scenario(path: &Path, config: SplitflowConfig) -> Result<Scenario, DataLoadError> {
    let data: ScenarioData = deserialize_file(path)?;
    build_scenario(data, config, path)
}

/// Build a scenario from in-memory content.
pub fn scenario_from_str(
    content: &str,
    format: Format,
    config: SplitflowConfig,
) -> Result<Scenario, DataLoadError> {
    let label = Path::new(match format {
        Format::Ron => "<inline>.ron",
        Format::Toml => "<inline>.toml",
        Format::Json => "<inline>.json",
    });
    let data: ScenarioData = deserialize_str(content, format, label)?;
    build_scenario(data, config, label)
}

/// Format of a scenario file, by extension.
pub fn scenario_format(path: &Path) -> Result<Format, DataLoadError> {
    detect_format(path)
}

// ===========================================================================
// Building
// ===========================================================================

enum Building {
    Splitter(SplitterId),
    Machine(MachineId),
}

fn build_scenario(
    data: ScenarioData,
    config: SplitflowConfig,
    file: &Path,
) -> Result<Scenario, DataLoadError> {
    let mut network = SplitterNetwork::with_config(config);
    let mut topology = BeltTopology::new();
    let mut buildings: HashMap<String, Building> = HashMap::new();
    let mut splitters = HashMap::new();
    let mut machines = HashMap::new();

    let invalid = |detail: String| DataLoadError::Invalid {
        file: file.to_path_buf(),
        detail,
    };

    for s in &data.splitters {
        check_duplicate(&buildings, &s.name, file)?;
        let id = network.add_splitter();
        if let Some(rate) = s.target_input_rate {
            network
                .preset_target_input_rate(id, rate)
                .map_err(|e| invalid(format!("splitter '{}': {e}", s.name)))?;
        }
        buildings.insert(s.name.clone(), Building::Splitter(id));
        splitters.insert(s.name.clone(), id);
    }

    for m in &data.machines {
        check_duplicate(&buildings, &m.name, file)?;
        let id = topology.add_machine(f64_to_fixed64(m.potential));
        buildings.insert(m.name.clone(), Building::Machine(id));
        machines.insert(m.name.clone(), id);
    }

    for link in &data.links {
        let from = match loader::resolve_name(&buildings, &link.from, file, "building")? {
            Building::Splitter(id) => {
                if link.output >= NUM_OUTPUTS {
                    return Err(invalid(format!(
                        "splitter '{}' has no output {}",
                        link.from, link.output
                    )));
                }
                Connector::SplitterOutput(*id, link.output)
            }
            Building::Machine(id) => Connector::MachineOutput(*id),
        };
        let to = match loader::resolve_name(&buildings, &link.to, file, "building")? {
            Building::Splitter(id) => Connector::SplitterInput(*id),
            Building::Machine(id) => Connector::MachineInput(*id),
        };

        match link.belt {
            Some(speed) if speed < 0.0 => {
                return Err(invalid(format!(
                    "belt from '{}' to '{}' has negative speed",
                    link.from, link.to
                )));
            }
            Some(speed) => {
                topology.connect_via_belt(from, to, speed);
            }
            None => topology.link(from, to),
        }
    }

    tracing::info!(
        splitters = splitters.len(),
        machines = machines.len(),
        links = data.links.len(),
        "scenario built"
    );

    Ok(Scenario {
        network,
        topology,
        splitters,
        machines,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
