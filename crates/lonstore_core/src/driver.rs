//! Flash segment driver.
//!
//! Implements open/read/write/close/erase and transaction marking for one
//! segment at a time on top of a [`BlockDevice`]. The device is opened and
//! closed around every access; handles only carry bookkeeping.

use crate::error::{StoreError, StoreResult};
use crate::layout::{MapEntry, MemoryMap};
use crate::ledger::{LedgerEvent, LedgerState, TransactionLedger, LEDGER_SIZE};
use crate::types::SegmentType;
use lonstore_flash::{BlockDevice, FlashError, FlashGeometry, FlashResult};
use tracing::{debug, trace, warn};

/// Direction a handle was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleMode {
    /// Opened with [`SegmentDriver::open_for_read`].
    Read,
    /// Opened with [`SegmentDriver::open_for_write`]; the segment is erased.
    Write,
}

/// An open segment.
///
/// Reads and writes must be sequential: the first access uses offset 0 and
/// every following access starts where the previous one ended.
#[derive(Debug)]
pub struct SegmentHandle {
    entry: MapEntry,
    mode: HandleMode,
    position: u64,
}

impl SegmentHandle {
    /// The segment this handle refers to.
    #[must_use]
    pub fn segment(&self) -> SegmentType {
        self.entry.segment
    }

    /// The direction the handle was opened for.
    #[must_use]
    pub fn mode(&self) -> HandleMode {
        self.mode
    }

    /// Bytes transferred so far; the offset the next access must use.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The memory-map entry of the segment.
    #[must_use]
    pub fn entry(&self) -> &MapEntry {
        &self.entry
    }
}

#[derive(Debug)]
enum Planner {
    Unmapped,
    Mapped(MemoryMap),
    Failed(String),
}

/// Segment-level access to a block device.
///
/// The memory map is computed lazily, once, the first time any segment is
/// touched; segments whose capacity is reserved afterwards are placed below
/// it on first touch.
#[derive(Debug)]
pub struct SegmentDriver<D: BlockDevice> {
    device: D,
    capacities: [Option<usize>; SegmentType::COUNT],
    planner: Planner,
}

impl<D: BlockDevice> SegmentDriver<D> {
    /// Creates a driver over `device`. No I/O happens until first use.
    pub fn new(device: D) -> Self {
        Self {
            device,
            capacities: [None; SegmentType::COUNT],
            planner: Planner::Unmapped,
        }
    }

    /// Records the maximum payload size of `segment` for the planner.
    ///
    /// Has no effect on a segment that is already placed.
    pub fn reserve(&mut self, segment: SegmentType, max_payload: usize) {
        self.capacities[segment.ordinal()] = Some(max_payload);
    }

    /// Returns the reserved maximum payload size of `segment`.
    #[must_use]
    pub fn capacity(&self, segment: SegmentType) -> Option<usize> {
        self.capacities[segment.ordinal()]
    }

    /// Returns the memory map, if it has been computed.
    #[must_use]
    pub fn memory_map(&self) -> Option<&MemoryMap> {
        match &self.planner {
            Planner::Mapped(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Consumes the driver and returns the device.
    pub fn into_device(self) -> D {
        self.device
    }

    /// Computes the memory map if needed and returns the entry of `segment`.
    ///
    /// The geometry is queried once. If that query fails every later call
    /// fails with [`StoreError::DeviceUnavailable`].
    ///
    /// # Errors
    ///
    /// Returns an error if the device geometry is unusable, the segment has
    /// no reserved capacity, or the region is exhausted.
    pub fn ensure_mapped(&mut self, segment: SegmentType) -> StoreResult<MapEntry> {
        if matches!(self.planner, Planner::Unmapped) {
            self.planner = self.plan();
        }

        let map = match &mut self.planner {
            Planner::Mapped(map) => map,
            Planner::Failed(reason) => return Err(StoreError::device_unavailable(reason.clone())),
            Planner::Unmapped => return Err(StoreError::device_unavailable("memory map not planned")),
        };

        if let Some(entry) = map.entry(segment) {
            return Ok(*entry);
        }
        let max_payload = self.capacities[segment.ordinal()]
            .ok_or(StoreError::UnregisteredSegment(segment))?;
        let entry = map.place(segment, max_payload)?;
        debug!(%segment, start = entry.segment_start, reserved = entry.reserved, "segment placed");
        Ok(entry)
    }

    fn plan(&mut self) -> Planner {
        let geometry = match self.device.geometry() {
            Ok(geometry) => geometry,
            Err(e) => {
                warn!(error = %e, "flash geometry query failed");
                return Planner::Failed(e.to_string());
            }
        };
        let mut map = match MemoryMap::new(geometry) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "flash geometry rejected");
                return Planner::Failed(e.to_string());
            }
        };

        for segment in SegmentType::ALL {
            let Some(max_payload) = self.capacities[segment.ordinal()] else {
                continue;
            };
            if let Err(e) = map.place(segment, max_payload) {
                warn!(%segment, error = %e, "segment does not fit in flash region");
            }
        }

        debug!(
            region_offset = geometry.region_offset,
            region_size = geometry.region_size,
            block_size = geometry.block_size,
            free = map.free_bytes(),
            "memory map planned"
        );
        Planner::Mapped(map)
    }

    fn geometry(&self) -> StoreResult<FlashGeometry> {
        self.memory_map()
            .map(|map| *map.geometry())
            .ok_or_else(|| StoreError::device_unavailable("memory map not planned"))
    }

    fn with_device<T>(&mut self, op: impl FnOnce(&mut D) -> FlashResult<T>) -> FlashResult<T> {
        self.device.open()?;
        let result = op(&mut self.device);
        self.device.close();
        result
    }

    /// Opens `segment` for sequential reading. No data is read yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be mapped or the device cannot
    /// be opened.
    pub fn open_for_read(&mut self, segment: SegmentType) -> StoreResult<SegmentHandle> {
        let entry = self.ensure_mapped(segment)?;
        self.with_device(|_| Ok(()))
            .map_err(|e| StoreError::device_unavailable(e.to_string()))?;

        Ok(SegmentHandle {
            entry,
            mode: HandleMode::Read,
            position: 0,
        })
    }

    /// Opens `segment` for writing `size` data bytes.
    ///
    /// Erases enough whole blocks from the segment start to cover the ledger
    /// and `size` bytes. The erased ledger reads as "transaction in progress"
    /// until [`Self::exit_transaction`] succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CapacityExceeded`] if `size` exceeds the data
    /// capacity, or [`StoreError::WriteFailure`] if the erase fails.
    pub fn open_for_write(&mut self, segment: SegmentType, size: u64) -> StoreResult<SegmentHandle> {
        let entry = self.ensure_mapped(segment)?;
        if size > entry.max_data_size {
            return Err(StoreError::CapacityExceeded {
                segment,
                requested: size,
                capacity: entry.max_data_size,
            });
        }

        let geometry = self.geometry()?;
        let erase_len = geometry.round_up_to_block(LEDGER_SIZE as u64 + size);
        debug!(%segment, offset = entry.segment_start, len = erase_len, "erasing segment");
        self.with_device(|device| device.erase(entry.segment_start, erase_len))
            .map_err(|e| StoreError::write_failure(segment, e))?;

        Ok(SegmentHandle {
            entry,
            mode: HandleMode::Write,
            position: 0,
        })
    }

    fn check_sequential(handle: &SegmentHandle, mode: HandleMode, offset: u64) -> StoreResult<()> {
        if handle.mode != mode {
            return Err(StoreError::invalid_operation(format!(
                "segment {} opened for {:?}, not {:?}",
                handle.segment(),
                handle.mode,
                mode
            )));
        }
        if offset != handle.position {
            return Err(StoreError::invalid_operation(format!(
                "segment {}: non-sequential access at {offset}, expected {}",
                handle.segment(),
                handle.position
            )));
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes at data-region `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error on non-sequential access, reads past the reserved
    /// capacity, or device failure.
    pub fn read(&mut self, handle: &mut SegmentHandle, offset: u64, buf: &mut [u8]) -> StoreResult<()> {
        Self::check_sequential(handle, HandleMode::Read, offset)?;
        let segment = handle.segment();
        let len = buf.len() as u64;
        if offset + len > handle.entry.max_data_size {
            return Err(StoreError::corruption(
                segment,
                format!("read of {len} bytes at {offset} passes reserved capacity"),
            ));
        }

        let absolute = handle.entry.data_offset() + offset;
        trace!(%segment, offset = absolute, len, "segment read");
        self.with_device(|device| device.read_at(absolute, buf))?;
        handle.position += len;
        Ok(())
    }

    /// Writes `data` at data-region `offset`.
    ///
    /// The write is split into runs that never cross an erase block. If any
    /// run fails the call fails; the runs already programmed stay programmed.
    ///
    /// # Errors
    ///
    /// Returns an error on non-sequential access, writes past the reserved
    /// capacity, or [`StoreError::WriteFailure`] if a run fails.
    pub fn write(&mut self, handle: &mut SegmentHandle, offset: u64, data: &[u8]) -> StoreResult<()> {
        Self::check_sequential(handle, HandleMode::Write, offset)?;
        let segment = handle.segment();
        let len = data.len() as u64;
        if offset + len > handle.entry.max_data_size {
            return Err(StoreError::CapacityExceeded {
                segment,
                requested: offset + len,
                capacity: handle.entry.max_data_size,
            });
        }

        let start = handle.entry.data_offset() + offset;
        self.program(segment, start, data)?;

        handle.position += len;
        Ok(())
    }

    /// Programs `data` at absolute `start` in runs that never cross an erase
    /// block.
    fn program(&mut self, segment: SegmentType, start: u64, data: &[u8]) -> StoreResult<()> {
        let geometry = self.geometry()?;
        self.with_device(|device| {
            let mut absolute = start;
            let mut remaining = data;
            while !remaining.is_empty() {
                let run = usize::try_from(geometry.block_remaining(absolute))
                    .map_or(remaining.len(), |room| room.min(remaining.len()));
                trace!(%segment, offset = absolute, len = run, "program run");
                device.write_at(absolute, &remaining[..run])?;
                absolute += run as u64;
                remaining = &remaining[run..];
            }
            Ok(())
        })
        .map_err(|e| StoreError::write_failure(segment, e))
    }

    /// Releases a handle.
    pub fn close(&mut self, handle: SegmentHandle) {
        trace!(segment = %handle.segment(), position = handle.position, "segment closed");
    }

    /// Reads the raw transaction ledger of `segment`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be mapped or read.
    pub fn read_ledger(&mut self, segment: SegmentType) -> StoreResult<TransactionLedger> {
        let entry = self.ensure_mapped(segment)?;
        let mut buf = [0u8; LEDGER_SIZE];
        self.with_device(|device| device.read_at(entry.transaction_offset(), &mut buf))?;
        Ok(TransactionLedger::decode(&buf))
    }

    /// Returns whether the data of `segment` must not be trusted.
    ///
    /// A ledger read failure counts as "in transaction".
    pub fn is_in_transaction(&mut self, segment: SegmentType) -> bool {
        match self.read_ledger(segment) {
            Ok(ledger) => ledger.state().is_in_transaction(),
            Err(e) => {
                warn!(%segment, error = %e, "ledger unreadable, treating as in transaction");
                true
            }
        }
    }

    /// Marks `segment` as about to change.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read or programmed.
    pub fn enter_transaction(&mut self, segment: SegmentType) -> StoreResult<()> {
        self.apply_ledger_event(segment, LedgerEvent::Enter)
    }

    /// Marks the data of `segment` valid.
    ///
    /// Only legal after [`Self::open_for_write`] erased the segment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the ledger was not erased,
    /// or a write failure if programming fails.
    pub fn exit_transaction(&mut self, segment: SegmentType) -> StoreResult<()> {
        self.apply_ledger_event(segment, LedgerEvent::Exit)
    }

    fn apply_ledger_event(&mut self, segment: SegmentType, event: LedgerEvent) -> StoreResult<()> {
        let entry = self.ensure_mapped(segment)?;
        let from: LedgerState = self.read_ledger(segment)?.state();

        match from.apply(event) {
            None => Err(StoreError::InvalidTransition {
                segment,
                from,
                event,
            }),
            Some(None) => Ok(()),
            Some(Some(ledger)) => {
                debug!(%segment, ?from, ?event, "programming ledger");
                self.program(segment, entry.transaction_offset(), &ledger.encode())
            }
        }
    }

    /// Erases the whole reserved range of `segment`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be mapped or the erase fails.
    pub fn erase_segment(&mut self, segment: SegmentType) -> StoreResult<()> {
        let entry = self.ensure_mapped(segment)?;
        debug!(%segment, offset = entry.segment_start, len = entry.reserved, "erasing reserved range");
        self.with_device(|device| device.erase(entry.segment_start, entry.reserved))
            .map_err(|e: FlashError| StoreError::write_failure(segment, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lonstore_flash::{InMemoryFlash, ERASED_BYTE};

    const BLOCK: u64 = 64;

    fn driver() -> SegmentDriver<InMemoryFlash> {
        let flash = InMemoryFlash::new(FlashGeometry::uniform(0, BLOCK, 32)).unwrap();
        let mut driver = SegmentDriver::new(flash);
        driver.reserve(SegmentType::NetworkImage, 100);
        driver.reserve(SegmentType::ApplicationData, 20);
        driver
    }

    #[test]
    fn map_is_computed_once_on_first_touch() {
        let mut driver = driver();
        assert!(driver.memory_map().is_none());

        let app = driver.ensure_mapped(SegmentType::ApplicationData).unwrap();
        let net = driver.memory_map().unwrap().entry(SegmentType::NetworkImage).copied().unwrap();

        // ascending ordinal placement, independent of touch order
        assert_eq!(net.end(), BLOCK * 32);
        assert_eq!(app.end(), net.segment_start);
    }

    #[test]
    fn late_reservation_is_placed_below() {
        let mut driver = driver();
        let app = driver.ensure_mapped(SegmentType::ApplicationData).unwrap();
        driver.reserve(SegmentType::Security, 10);
        let sec = driver.ensure_mapped(SegmentType::Security).unwrap();
        assert_eq!(sec.end(), app.segment_start);
    }

    #[test]
    fn unregistered_segment_fails() {
        let mut driver = driver();
        assert!(matches!(
            driver.ensure_mapped(SegmentType::UniqueId),
            Err(StoreError::UnregisteredSegment(SegmentType::UniqueId))
        ));
    }

    #[test]
    fn open_for_write_rejects_oversize() {
        let mut driver = driver();
        let entry = driver.ensure_mapped(SegmentType::ApplicationData).unwrap();
        let result = driver.open_for_write(SegmentType::ApplicationData, entry.max_data_size + 1);
        assert!(matches!(result, Err(StoreError::CapacityExceeded { .. })));
    }

    #[test]
    fn open_for_write_erases_ledger_and_data() {
        let mut driver = driver();
        let entry = driver.ensure_mapped(SegmentType::NetworkImage).unwrap();
        driver.device().inject_corruption(entry.segment_start, &[0u8; 80]);

        let handle = driver.open_for_write(SegmentType::NetworkImage, 70).unwrap();
        driver.close(handle);

        // 8 + 70 bytes round up to two blocks
        assert_eq!(
            driver.device().contents(entry.segment_start, 80),
            vec![ERASED_BYTE; 80]
        );
        assert_eq!(
            driver.read_ledger(SegmentType::NetworkImage).unwrap().state(),
            LedgerState::Erased
        );
    }

    #[test]
    fn write_splits_at_block_boundaries() {
        let mut driver = driver();
        let entry = driver.ensure_mapped(SegmentType::NetworkImage).unwrap();
        let data: Vec<u8> = (0..120).collect();

        let mut handle = driver.open_for_write(SegmentType::NetworkImage, 120).unwrap();
        driver.write(&mut handle, 0, &data[..30]).unwrap();
        driver.write(&mut handle, 30, &data[30..]).unwrap();
        driver.close(handle);

        assert_eq!(driver.device().contents(entry.data_offset(), 120), data);
        // runs: [8..38), [38..64), [64..128)
        assert_eq!(driver.device().program_count(), 3);
    }

    #[test]
    fn access_must_be_sequential() {
        let mut driver = driver();
        let mut handle = driver.open_for_write(SegmentType::ApplicationData, 8).unwrap();
        assert!(matches!(
            driver.write(&mut handle, 4, &[1, 2]),
            Err(StoreError::InvalidOperation { .. })
        ));
        driver.write(&mut handle, 0, &[1, 2]).unwrap();
        assert_eq!(handle.position(), 2);

        let mut reader = driver.open_for_read(SegmentType::ApplicationData).unwrap();
        let mut buf = [0u8; 2];
        assert!(driver.write(&mut reader, 0, &buf).is_err());
        driver.read(&mut reader, 0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        assert!(driver.read(&mut reader, 0, &mut buf).is_err());
    }

    #[test]
    fn transaction_cycle() {
        let mut driver = driver();
        let segment = SegmentType::ApplicationData;
        assert!(driver.is_in_transaction(segment));

        driver.enter_transaction(segment).unwrap();
        assert_eq!(
            driver.read_ledger(segment).unwrap().state(),
            LedgerState::TransactionOpen
        );

        // exit without erase is illegal
        assert!(matches!(
            driver.exit_transaction(segment),
            Err(StoreError::InvalidTransition { .. })
        ));

        let mut handle = driver.open_for_write(segment, 4).unwrap();
        driver.write(&mut handle, 0, &[9, 9, 9, 9]).unwrap();
        driver.close(handle);
        driver.exit_transaction(segment).unwrap();
        assert!(!driver.is_in_transaction(segment));

        // entering again only clears bits
        driver.enter_transaction(segment).unwrap();
        assert!(driver.is_in_transaction(segment));
    }

    #[test]
    fn erase_segment_resets_ledger() {
        let mut driver = driver();
        let segment = SegmentType::NetworkImage;
        let handle = driver.open_for_write(segment, 0).unwrap();
        driver.close(handle);
        driver.exit_transaction(segment).unwrap();
        assert!(!driver.is_in_transaction(segment));

        driver.erase_segment(segment).unwrap();
        assert_eq!(
            driver.read_ledger(segment).unwrap().state(),
            LedgerState::Erased
        );
    }

    #[test]
    fn ledger_programs_across_blocks_smaller_than_itself() {
        for block_size in [1, 2, 4] {
            let flash = InMemoryFlash::new(FlashGeometry::uniform(0, block_size, 256)).unwrap();
            let mut driver = SegmentDriver::new(flash);
            let segment = SegmentType::ApplicationData;
            driver.reserve(segment, 16);

            driver.enter_transaction(segment).unwrap();
            assert_eq!(
                driver.read_ledger(segment).unwrap().state(),
                LedgerState::TransactionOpen,
                "block size {block_size}"
            );

            let mut handle = driver.open_for_write(segment, 3).unwrap();
            driver.write(&mut handle, 0, &[7, 8, 9]).unwrap();
            driver.close(handle);
            driver.exit_transaction(segment).unwrap();
            assert!(!driver.is_in_transaction(segment), "block size {block_size}");
        }
    }

    #[test]
    fn device_left_closed_after_calls() {
        let mut driver = driver();
        driver.enter_transaction(SegmentType::NetworkImage).unwrap();
        assert!(!driver.device().is_open());
    }
}
