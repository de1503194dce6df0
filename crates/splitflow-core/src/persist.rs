//! Save records for splitters.
//!
//! Each splitter is saved as a small blob: a header carrying a magic number
//! and the serialization version, followed by a `bitcode` payload. The
//! payload layout depends on the version; older layouts are upgraded by the
//! [`MigrationRegistry`](crate::migration::MigrationRegistry) before the
//! canonical [`SplitterRecord`] is decoded.

use serde::{Deserialize, Serialize};

use crate::connection::NUM_OUTPUTS;
use crate::id::SplitterId;
use crate::migration::{MigrationError, MigrationRegistry};
use crate::network::SplitterNetwork;
use crate::rate::Rate;
use crate::splitter::{OutputState, PersistentFlags, Splitter};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a splitter save blob.
pub const SPLITTER_SAVE_MAGIC: u32 = 0x5F17_0001;

/// Save layouts, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum SerializationVersion {
    /// Bit-packed record with floating-point era naming.
    Legacy = 0,
    /// Bit-packed record with fixed-point rates.
    FixedPrecisionArithmetic = 1,
    /// Canonical [`SplitterRecord`].
    Initial = 2,
}

impl SerializationVersion {
    pub const LATEST: SerializationVersion = SerializationVersion::Initial;

    pub fn from_u32(version: u32) -> Option<Self> {
        match version {
            0 => Some(SerializationVersion::Legacy),
            1 => Some(SerializationVersion::FixedPrecisionArithmetic),
            2 => Some(SerializationVersion::Initial),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SPLITTER_SAVE_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("serialization version {0} is not supported (latest is {latest})", latest = SerializationVersion::LATEST.as_u32())]
    UnsupportedPersistedVersion(u32),
    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),
    #[error("no splitter {0:?} to restore into")]
    UnknownSplitter(SplitterId),
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Everything about a splitter that survives save/load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitterRecord {
    pub output_states: [OutputState; NUM_OUTPUTS],
    pub manual_input_rate: bool,
    pub needs_distribution_setup: bool,
    /// Saved before connections were tracked reliably; set up from scratch.
    pub needs_connections_fixup: bool,
    pub splitter_version: u8,
    pub target_input_rate: Rate,
    pub output_rates: [Rate; NUM_OUTPUTS],
    pub left_in_cycle_for_outputs: [i32; NUM_OUTPUTS],
}

/// Record layout written by [`SerializationVersion::Legacy`] and
/// [`SerializationVersion::FixedPrecisionArithmetic`] saves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySplitterRecord {
    /// Per-output bit flags, see [`OutputState::from_bits`].
    pub output_states: Vec<u32>,
    pub remaining_items: Vec<i32>,
    /// Low byte is the splitter version, higher bits are flags.
    pub persistent_state: u32,
    pub target_input_rate: i32,
    pub integral_output_rates: Vec<i32>,
}

impl LegacySplitterRecord {
    const VERSION_MASK: u32 = 0xFF;
    const MANUAL_INPUT_RATE_BIT: u32 = 1 << 8;
    const NEEDS_CONNECTIONS_FIXUP_BIT: u32 = 1 << 9;
    const NEEDS_DISTRIBUTION_SETUP_BIT: u32 = 1 << 10;

    /// Pack a canonical record back into the legacy layout.
    pub fn from_record(record: &SplitterRecord) -> Self {
        let mut persistent_state = u32::from(record.splitter_version);
        if record.manual_input_rate {
            persistent_state |= Self::MANUAL_INPUT_RATE_BIT;
        }
        if record.needs_connections_fixup {
            persistent_state |= Self::NEEDS_CONNECTIONS_FIXUP_BIT;
        }
        if record.needs_distribution_setup {
            persistent_state |= Self::NEEDS_DISTRIBUTION_SETUP_BIT;
        }

        Self {
            output_states: record.output_states.iter().map(|s| s.to_bits()).collect(),
            remaining_items: record.left_in_cycle_for_outputs.to_vec(),
            persistent_state,
            target_input_rate: record.target_input_rate,
            integral_output_rates: record.output_rates.to_vec(),
        }
    }

    /// Unpack into the canonical record. Short arrays are padded with
    /// defaults, extra entries are ignored.
    pub fn into_record(self) -> SplitterRecord {
        let mut output_states = [OutputState::default(); NUM_OUTPUTS];
        for (state, &bits) in output_states.iter_mut().zip(&self.output_states) {
            *state = OutputState::from_bits(bits);
        }

        let mut output_rates = [0; NUM_OUTPUTS];
        for (rate, &legacy) in output_rates.iter_mut().zip(&self.integral_output_rates) {
            *rate = legacy;
        }

        let mut left_in_cycle_for_outputs = [0; NUM_OUTPUTS];
        for (left, &remaining) in left_in_cycle_for_outputs.iter_mut().zip(&self.remaining_items) {
            *left = remaining;
        }

        let state = self.persistent_state;
        SplitterRecord {
            output_states,
            manual_input_rate: state & Self::MANUAL_INPUT_RATE_BIT != 0,
            needs_distribution_setup: state & Self::NEEDS_DISTRIBUTION_SETUP_BIT != 0,
            needs_connections_fixup: state & Self::NEEDS_CONNECTIONS_FIXUP_BIT != 0,
            splitter_version: (state & Self::VERSION_MASK) as u8,
            target_input_rate: self.target_input_rate,
            output_rates,
            left_in_cycle_for_outputs,
        }
    }
}

// ---------------------------------------------------------------------------
// PersistedState
// ---------------------------------------------------------------------------

/// State that can be captured into a record and rebuilt from one.
pub trait PersistedState: Sized {
    type Record;

    fn save_state(&self) -> Self::Record;

    /// Rebuild from a record. Transient state starts fresh; callers run the
    /// post-load processing before the value is used.
    fn load_state(record: Self::Record) -> Self;
}

impl PersistedState for Splitter {
    type Record = SplitterRecord;

    fn save_state(&self) -> SplitterRecord {
        SplitterRecord {
            output_states: self.output_states,
            manual_input_rate: self.flags.manual_input_rate,
            needs_distribution_setup: self.flags.needs_distribution_setup,
            needs_connections_fixup: false,
            splitter_version: self.version,
            target_input_rate: self.target_input_rate,
            output_rates: self.output_rates,
            left_in_cycle_for_outputs: self.left_in_cycle_for_outputs,
        }
    }

    fn load_state(record: SplitterRecord) -> Self {
        let mut splitter = Splitter::new();
        splitter.output_states = record.output_states;
        splitter.flags = PersistentFlags {
            manual_input_rate: record.manual_input_rate,
            needs_distribution_setup: record.needs_distribution_setup,
        };
        splitter.version = record.splitter_version;
        splitter.target_input_rate = record.target_input_rate;
        splitter.output_rates = record.output_rates;
        splitter.left_in_cycle_for_outputs = record.left_in_cycle_for_outputs;
        splitter
    }
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Header plus version-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveBlob {
    pub magic: u32,
    pub serialization_version: u32,
    pub payload: Vec<u8>,
}

impl SaveBlob {
    pub fn new(serialization_version: u32, payload: Vec<u8>) -> Self {
        Self {
            magic: SPLITTER_SAVE_MAGIC,
            serialization_version,
            payload,
        }
    }

    /// Check the magic number and that this build understands the version.
    pub fn validate(&self) -> Result<SerializationVersion, PersistError> {
        if self.magic != SPLITTER_SAVE_MAGIC {
            return Err(PersistError::InvalidMagic(self.magic));
        }
        SerializationVersion::from_u32(self.serialization_version)
            .ok_or(PersistError::UnsupportedPersistedVersion(self.serialization_version))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PersistError> {
        bitcode::serialize(self).map_err(|e| PersistError::Encode(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, PersistError> {
        bitcode::deserialize(data).map_err(|e| PersistError::Decode(e.to_string()))
    }
}

/// Encode a splitter in the latest layout.
pub fn save_splitter(splitter: &Splitter) -> Result<Vec<u8>, PersistError> {
    let payload = bitcode::serialize(&splitter.save_state())
        .map_err(|e| PersistError::Encode(e.to_string()))?;
    SaveBlob::new(SerializationVersion::LATEST.as_u32(), payload).to_bytes()
}

/// Encode a record in the bit-packed layout of an older version.
pub fn save_legacy(
    record: &LegacySplitterRecord,
    version: SerializationVersion,
) -> Result<Vec<u8>, PersistError> {
    let payload = bitcode::serialize(record).map_err(|e| PersistError::Encode(e.to_string()))?;
    SaveBlob::new(version.as_u32(), payload).to_bytes()
}

/// Save every splitter in the network, in placement order.
pub fn save_network(network: &SplitterNetwork) -> Result<Vec<(SplitterId, Vec<u8>)>, PersistError> {
    network
        .splitters()
        .iter()
        .map(|(id, splitter)| Ok((id, save_splitter(splitter)?)))
        .collect()
}

/// Decode a blob into the canonical record, upgrading older layouts.
/// Returns the version the blob was written with alongside the record.
pub fn load_record(
    data: &[u8],
    registry: &MigrationRegistry,
) -> Result<(SerializationVersion, SplitterRecord), PersistError> {
    let blob = SaveBlob::from_bytes(data)?;
    let version = blob.validate()?;

    let payload = registry.migrate(
        &blob.payload,
        version.as_u32(),
        SerializationVersion::LATEST.as_u32(),
    )?;
    let record =
        bitcode::deserialize(&payload).map_err(|e| PersistError::Decode(e.to_string()))?;
    Ok((version, record))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
