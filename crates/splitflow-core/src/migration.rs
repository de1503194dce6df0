//! Save format migration.
//!
//! [`MigrationRegistry`] chains byte-level upgrade steps from one
//! serialization version to the next. [`MigrationContext`] wraps a single
//! load: it restores saved splitters into a network, runs their post-load
//! processing and keeps track of records that cannot be loaded.

use std::collections::BTreeMap;

use crate::id::SplitterId;
use crate::network::SplitterNetwork;
use crate::persist::{
    LegacySplitterRecord, PersistError, PersistedState, SerializationVersion, load_record,
};
use crate::splitter::Splitter;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("no migration path from version {from} to version {to}")]
    NoMigrationPath { from: u32, to: u32 },
    #[error("migration from version {from} to version {to} failed: {reason}")]
    MigrationFailed { from: u32, to: u32, reason: String },
}

/// Transforms a payload from one version to the next.
pub type MigrationFn = fn(&[u8]) -> Result<Vec<u8>, MigrationError>;

/// Migration steps keyed by source version. A step registered for `N`
/// upgrades a payload from `N` to `N + 1`.
pub struct MigrationRegistry {
    migrations: BTreeMap<u32, MigrationFn>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, from_version: u32, migrate: MigrationFn) {
        self.migrations.insert(from_version, migrate);
    }

    /// Whether every step from `from` to `to` is registered.
    pub fn can_migrate(&self, from: u32, to: u32) -> bool {
        if from >= to {
            return from == to;
        }
        (from..to).all(|v| self.migrations.contains_key(&v))
    }

    /// Run the chain of steps from `from` to `to`. Returns the payload
    /// unchanged if the versions match.
    pub fn migrate(&self, data: &[u8], from: u32, to: u32) -> Result<Vec<u8>, MigrationError> {
        if from == to {
            return Ok(data.to_vec());
        }
        if from > to {
            return Err(MigrationError::NoMigrationPath { from, to });
        }

        let mut current = data.to_vec();
        for version in from..to {
            let step = self
                .migrations
                .get(&version)
                .ok_or(MigrationError::NoMigrationPath { from, to })?;
            current = step(&current)?;
        }
        Ok(current)
    }

    pub fn step_count(&self) -> usize {
        self.migrations.len()
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The steps that bring any supported splitter save up to date.
pub fn splitter_migrations() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    registry.register(SerializationVersion::Legacy.as_u32(), legacy_to_fixed_precision);
    registry.register(
        SerializationVersion::FixedPrecisionArithmetic.as_u32(),
        fixed_precision_to_initial,
    );
    registry
}

/// Both bit-packed versions share one record layout.
fn legacy_to_fixed_precision(data: &[u8]) -> Result<Vec<u8>, MigrationError> {
    Ok(data.to_vec())
}

fn fixed_precision_to_initial(data: &[u8]) -> Result<Vec<u8>, MigrationError> {
    let failed = |reason: String| MigrationError::MigrationFailed {
        from: SerializationVersion::FixedPrecisionArithmetic.as_u32(),
        to: SerializationVersion::Initial.as_u32(),
        reason,
    };

    let legacy: LegacySplitterRecord =
        bitcode::deserialize(data).map_err(|e| failed(e.to_string()))?;
    bitcode::serialize(&legacy.into_record()).map_err(|e| failed(e.to_string()))
}

// ---------------------------------------------------------------------------
// MigrationContext
// ---------------------------------------------------------------------------

/// What a load did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Splitters placed into the network, in load order.
    pub restored: Vec<SplitterId>,
    /// Restored splitters that were saved in an older layout.
    pub upgraded: usize,
    /// Restored splitters that were set up from scratch.
    pub fixups: usize,
    /// Records dropped because their version is unknown to this build.
    pub doomed: usize,
}

/// Bookkeeping for one save-game load. Create it when loading starts and
/// consume it with [`finish`](Self::finish) when every record is in.
pub struct MigrationContext<'a> {
    network: &'a mut SplitterNetwork,
    registry: MigrationRegistry,
    report: MigrationReport,
}

impl<'a> MigrationContext<'a> {
    pub fn begin(network: &'a mut SplitterNetwork) -> Self {
        Self::with_registry(network, splitter_migrations())
    }

    pub fn with_registry(network: &'a mut SplitterNetwork, registry: MigrationRegistry) -> Self {
        Self {
            network,
            registry,
            report: MigrationReport::default(),
        }
    }

    /// Restore one saved splitter as a new member of the network. Returns
    /// `Ok(None)` when the record was written by an unknown version and has
    /// been dropped.
    pub fn restore(&mut self, data: &[u8]) -> Result<Option<SplitterId>, PersistError> {
        let Some(splitter) = self.decode(data)? else {
            return Ok(None);
        };

        let id = self.network.insert_splitter(splitter);
        self.network.activate(id);
        self.report.restored.push(id);
        Ok(Some(id))
    }

    /// Restore saved state into a splitter the host already placed. A
    /// record from an unknown version removes that splitter instead.
    /// Returns whether the splitter is still in the network.
    pub fn restore_into(&mut self, id: SplitterId, data: &[u8]) -> Result<bool, PersistError> {
        if self.network.get(id).is_none() {
            return Err(PersistError::UnknownSplitter(id));
        }

        match self.decode(data)? {
            Some(splitter) => {
                if let Some(slot) = self.network.get_mut(id) {
                    *slot = splitter;
                }
                self.network.activate(id);
                self.report.restored.push(id);
                Ok(true)
            }
            None => {
                self.network.remove_splitter(id);
                Ok(false)
            }
        }
    }

    /// Decode and run post-load processing. `None` marks a doomed record.
    fn decode(&mut self, data: &[u8]) -> Result<Option<Splitter>, PersistError> {
        let (version, record) = match load_record(data, &self.registry) {
            Ok(loaded) => loaded,
            Err(PersistError::UnsupportedPersistedVersion(version)) => {
                self.report.doomed += 1;
                if self.network.config().upgrade.show_warning_messages {
                    tracing::warn!(version, "splitter saved with an unsupported serialization version, will be removed");
                } else {
                    tracing::debug!(version, "splitter saved with an unsupported serialization version, will be removed");
                }
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if version < SerializationVersion::LATEST {
            tracing::info!(from = ?version, "upgrading splitter save record");
            self.report.upgraded += 1;
        }

        let fixup = record.needs_connections_fixup;
        let mut splitter = Splitter::load_state(record);
        if fixup {
            tracing::info!("splitter predates connection tracking, setting up from scratch");
            self.report.fixups += 1;
        } else {
            splitter.finish_loading();
        }
        Ok(Some(splitter))
    }

    pub fn finish(self) -> MigrationReport {
        if self.report.doomed > 0 {
            tracing::warn!(
                removed = self.report.doomed,
                "removed splitters with an incompatible serialization version"
            );
        } else if self.report.upgraded > 0 {
            tracing::info!(upgraded = self.report.upgraded, "save records upgraded");
        }
        self.report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
