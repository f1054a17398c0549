//! Core type definitions for lonstore.

use std::fmt;
use std::str::FromStr;

/// Identity of one independently committed unit of persisted state.
///
/// The set is fixed at compile time. Each type owns exactly one memory-map
/// entry and one registered codec. Ordinals are stable: they decide the
/// placement order of the memory map and the order of commit passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SegmentType {
    /// Network image: addressing, domain and binding tables.
    NetworkImage = 0,
    /// Application data declared persistent by the application.
    ApplicationData = 1,
    /// Security state (keys, replay counters).
    Security = 2,
    /// Unique-ID override.
    UniqueId = 3,
    /// ISI connection table.
    IsiConnectionTable = 4,
    /// ISI engine persistent state.
    IsiPersistentState = 5,
    /// Node definition (static interface description).
    NodeDefinition = 6,
}

impl SegmentType {
    /// Number of segment types.
    pub const COUNT: usize = 7;

    /// All segment types in ascending ordinal order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::NetworkImage,
        Self::ApplicationData,
        Self::Security,
        Self::UniqueId,
        Self::IsiConnectionTable,
        Self::IsiPersistentState,
        Self::NodeDefinition,
    ];

    /// Returns the ordinal of this type.
    #[must_use]
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    /// Converts an ordinal back to a segment type.
    #[must_use]
    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::ALL.get(ordinal).copied()
    }

    /// Returns the kebab-case name of this type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NetworkImage => "network-image",
            Self::ApplicationData => "application-data",
            Self::Security => "security",
            Self::UniqueId => "unique-id",
            Self::IsiConnectionTable => "isi-connection-table",
            Self::IsiPersistentState => "isi-persistent-state",
            Self::NodeDefinition => "node-definition",
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SegmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.name() == s)
            .ok_or_else(|| format!("unknown segment type: {s}"))
    }
}
