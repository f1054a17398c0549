//! Flash geometry planner.
//!
//! Assigns every segment type a fixed, block-aligned byte range. Ranges are
//! carved from the top of the region downward so that resizing a segment
//! placed later never moves one placed earlier.
//!
//! ```text
//! region_end    +-----------------------------+
//!               | A: ledger | header | payload |
//!               +-----------------------------+  <- low water after A
//!               | B                           |
//!               +-----------------------------+  <- low water after B
//!               | free                        |
//! region_offset +-----------------------------+
//! ```

use crate::error::{StoreError, StoreResult};
use crate::header::HEADER_SIZE;
use crate::ledger::LEDGER_SIZE;
use crate::types::SegmentType;
use lonstore_flash::FlashGeometry;

/// The byte range reserved for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    /// The segment this entry belongs to.
    pub segment: SegmentType,
    /// First byte of the segment; block aligned.
    pub segment_start: u64,
    /// Total reserved bytes; a whole number of blocks.
    pub reserved: u64,
    /// Capacity of the data region (header plus payload).
    pub max_data_size: u64,
}

impl MapEntry {
    /// Offset of the transaction ledger.
    #[must_use]
    pub const fn transaction_offset(&self) -> u64 {
        self.segment_start
    }

    /// Offset of the data region (persistence header, then payload).
    #[must_use]
    pub const fn data_offset(&self) -> u64 {
        self.segment_start + LEDGER_SIZE as u64
    }

    /// First offset past the reserved range.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.segment_start + self.reserved
    }

    /// Returns whether two entries share any byte.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.segment_start < other.end() && other.segment_start < self.end()
    }
}

/// Memory map of all placed segments.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    geometry: FlashGeometry,
    entries: [Option<MapEntry>; SegmentType::COUNT],
    low_water: u64,
}

impl MemoryMap {
    /// Creates an empty map over `geometry`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DeviceUnavailable`] if the geometry is invalid.
    pub fn new(geometry: FlashGeometry) -> StoreResult<Self> {
        geometry
            .validate()
            .map_err(|e| StoreError::device_unavailable(e.to_string()))?;

        Ok(Self {
            geometry,
            entries: [None; SegmentType::COUNT],
            low_water: geometry.region_end(),
        })
    }

    /// Plans a map for `capacities`, placing segments in ascending ordinal
    /// order regardless of the order given.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid or the region is too small.
    pub fn plan(geometry: FlashGeometry, capacities: &[(SegmentType, usize)]) -> StoreResult<Self> {
        let mut map = Self::new(geometry)?;
        let mut ordered = capacities.to_vec();
        ordered.sort_by_key(|(segment, _)| *segment);
        for (segment, max_payload) in ordered {
            map.place(segment, max_payload)?;
        }
        Ok(map)
    }

    /// Places `segment` directly below the lowest used offset.
    ///
    /// Idempotent: an already placed segment keeps its entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CapacityExceeded`] if the remaining region
    /// cannot hold the segment.
    pub fn place(&mut self, segment: SegmentType, max_payload: usize) -> StoreResult<MapEntry> {
        if let Some(entry) = self.entries[segment.ordinal()] {
            return Ok(entry);
        }

        let needed = (LEDGER_SIZE + HEADER_SIZE) as u64 + max_payload as u64;
        let reserved = self.geometry.round_up_to_block(needed);
        let available = self.low_water - self.geometry.region_offset;
        if reserved > available {
            return Err(StoreError::CapacityExceeded {
                segment,
                requested: reserved,
                capacity: available,
            });
        }

        let segment_start = self.geometry.block_align_down(self.low_water - reserved);
        let entry = MapEntry {
            segment,
            segment_start,
            reserved,
            max_data_size: reserved - LEDGER_SIZE as u64,
        };
        self.entries[segment.ordinal()] = Some(entry);
        self.low_water = segment_start;
        Ok(entry)
    }

    /// Returns the entry for `segment`, if placed.
    #[must_use]
    pub fn entry(&self, segment: SegmentType) -> Option<&MapEntry> {
        self.entries[segment.ordinal()].as_ref()
    }

    /// Iterates over placed entries in ascending ordinal order.
    pub fn entries(&self) -> impl Iterator<Item = &MapEntry> {
        self.entries.iter().flatten()
    }

    /// Returns the geometry the map was planned on.
    #[must_use]
    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    /// Returns the lowest offset in use.
    #[must_use]
    pub fn low_water(&self) -> u64 {
        self.low_water
    }

    /// Returns the bytes still unassigned.
    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.low_water - self.geometry.region_offset
    }
}
