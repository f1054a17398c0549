//! Segment manager.
//!
//! [`PersistenceStore`] is the context object the host application owns. It
//! tracks which segments changed, defers their commit behind a guard band so
//! bursts of changes coalesce into one flash write, and restores segments at
//! boot.
//!
//! The store is single-threaded: every entry point takes `&mut self`. Hosts
//! with real threads wrap the whole store in one mutex.

use crate::clock::{Clock, SystemClock};
use crate::codec::SegmentCodec;
use crate::config::StoreConfig;
use crate::diagnostics::{DiagnosticsSink, TracingSink};
use crate::driver::{SegmentDriver, SegmentHandle};
use crate::error::{LoadOutcome, LossReason, StoreError, StoreResult};
use crate::header::{ChecksumSpan, PersistenceHeader, HEADER_SIZE};
use crate::inspect::SegmentInspection;
use crate::layout::{MapEntry, MemoryMap};
use crate::stats::StoreStats;
use crate::types::SegmentType;
use lonstore_flash::BlockDevice;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Commit state of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Flash matches live state.
    Clean,
    /// Changed, but no commit is scheduled (a previous store failed).
    Dirty,
    /// Changed, and the guard band or a forced commit will flush it.
    CommitPending,
}

/// Result of one [`PersistenceStore::commit_check`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Whether a commit pass ran.
    pub performed: bool,
    /// Segments committed, in commit order.
    pub stored: Vec<SegmentType>,
    /// Segments whose store failed; they stay dirty.
    pub failed: Vec<SegmentType>,
}

impl CommitReport {
    /// Returns whether every attempted store succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Transactional persistent segment store.
pub struct PersistenceStore<D: BlockDevice, C: Clock = SystemClock> {
    driver: SegmentDriver<D>,
    codecs: BTreeMap<SegmentType, Box<dyn SegmentCodec>>,
    config: StoreConfig,
    clock: C,
    sink: Box<dyn DiagnosticsSink>,
    dirty: [bool; SegmentType::COUNT],
    window_start: Option<u64>,
    force_commit: bool,
    stats: StoreStats,
}

impl<D: BlockDevice> PersistenceStore<D, SystemClock> {
    /// Creates a store over `device` using the system clock.
    pub fn new(device: D, config: StoreConfig) -> Self {
        Self::with_clock(device, config, SystemClock::new())
    }
}

impl<D: BlockDevice, C: Clock> PersistenceStore<D, C> {
    /// Creates a store with an explicit tick source.
    pub fn with_clock(device: D, config: StoreConfig, clock: C) -> Self {
        Self {
            driver: SegmentDriver::new(device),
            codecs: BTreeMap::new(),
            config,
            clock,
            sink: Box::new(TracingSink),
            dirty: [false; SegmentType::COUNT],
            window_start: None,
            force_commit: false,
            stats: StoreStats::new(),
        }
    }

    /// Replaces the diagnostics sink.
    #[must_use]
    pub fn with_sink(mut self, sink: impl DiagnosticsSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Registers the codec for `segment` and reserves its capacity.
    ///
    /// Register every segment before the first flash access so the memory
    /// map is laid out in ordinal order. Re-registering a segment that is
    /// already placed keeps its original capacity.
    pub fn register(&mut self, segment: SegmentType, codec: Box<dyn SegmentCodec>) {
        let max_size = codec.max_size();
        debug!(%segment, max_size, "segment registered");
        self.driver.reserve(segment, max_size);
        self.codecs.insert(segment, codec);
    }

    /// Returns whether a codec is registered for `segment`.
    #[must_use]
    pub fn is_registered(&self, segment: SegmentType) -> bool {
        self.codecs.contains_key(&segment)
    }

    /// Returns the registered segments in ordinal order.
    pub fn registered(&self) -> impl Iterator<Item = SegmentType> + '_ {
        self.codecs.keys().copied()
    }

    /// Marks `segment` changed.
    ///
    /// Starts the guard-band window unless one is already running; repeated
    /// marks never push the commit further out.
    pub fn mark_dirty(&mut self, segment: SegmentType) {
        self.dirty[segment.ordinal()] = true;
        if self.window_start.is_none() {
            let now = self.clock.now_millis();
            trace!(%segment, now, "guard band started");
            self.window_start = Some(now);
        }
    }

    /// Returns whether `segment` has uncommitted changes.
    #[must_use]
    pub fn is_dirty(&self, segment: SegmentType) -> bool {
        self.dirty[segment.ordinal()]
    }

    /// Returns the commit state of `segment`.
    #[must_use]
    pub fn segment_state(&self, segment: SegmentType) -> SegmentState {
        if !self.is_dirty(segment) {
            SegmentState::Clean
        } else if self.is_commit_scheduled() {
            SegmentState::CommitPending
        } else {
            SegmentState::Dirty
        }
    }

    /// Returns whether the next [`Self::commit_check`] may run a pass.
    #[must_use]
    pub fn is_commit_scheduled(&self) -> bool {
        self.window_start.is_some() || self.force_commit
    }

    /// Time left in the running guard-band window, if one is running.
    #[must_use]
    pub fn guard_band_remaining(&self) -> Option<Duration> {
        let start = self.window_start?;
        let elapsed = Duration::from_millis(self.clock.now_millis().saturating_sub(start));
        Some(self.config.guard_band.saturating_sub(elapsed))
    }

    /// Requests that the next [`Self::commit_check`] bypass the guard band.
    ///
    /// Returns `true` if any segment is dirty. Used before a controlled
    /// reset.
    pub fn force_commit_if_scheduled(&mut self) -> bool {
        if self.dirty.iter().any(|dirty| *dirty) {
            self.force_commit = true;
            true
        } else {
            false
        }
    }

    /// Runs a commit pass if the guard band expired or a commit was forced.
    ///
    /// Call periodically from the host loop. Dirty segments are stored in
    /// ordinal order with a short yield after each successful store. A
    /// failed store leaves its segment dirty and the pass continues.
    pub fn commit_check(&mut self) -> CommitReport {
        let expired = self
            .guard_band_remaining()
            .is_some_and(|remaining| remaining.is_zero());
        if !expired && !self.force_commit {
            return CommitReport::default();
        }

        debug!(forced = self.force_commit, "commit pass");
        self.stats.record_commit_pass();
        let mut report = CommitReport {
            performed: true,
            ..CommitReport::default()
        };
        let yield_millis = u64::try_from(self.config.commit_yield.as_millis()).unwrap_or(u64::MAX);

        for segment in SegmentType::ALL {
            if !self.is_dirty(segment) {
                continue;
            }
            match self.store_segment(segment) {
                Ok(()) => {
                    report.stored.push(segment);
                    self.clock.sleep_millis(yield_millis);
                }
                Err(_) => report.failed.push(segment),
            }
        }

        self.window_start = None;
        report
    }

    /// Stores `segment` now, bypassing the guard band.
    ///
    /// On success the dirty flag and the force flag are cleared. On failure
    /// the segment stays dirty, the error goes to the diagnostics sink, and
    /// flash is left as an open transaction so the next restore reports
    /// [`LossReason::NoPersistence`].
    ///
    /// # Errors
    ///
    /// Returns the first failing step.
    pub fn store_segment(&mut self, segment: SegmentType) -> StoreResult<()> {
        match self.write_segment(segment) {
            Ok(bytes) => {
                self.dirty[segment.ordinal()] = false;
                self.force_commit = false;
                self.stats.record_commit(bytes);
                self.sink.segment_stored(segment);
                Ok(())
            }
            Err(e) => {
                self.stats.record_commit_failure();
                self.sink.store_failed(segment, &e);
                Err(e)
            }
        }
    }

    fn write_segment(&mut self, segment: SegmentType) -> StoreResult<u64> {
        if !self.codecs.contains_key(&segment) {
            return Err(StoreError::UnregisteredSegment(segment));
        }
        self.driver.enter_transaction(segment)?;

        let codec = self
            .codecs
            .get_mut(&segment)
            .ok_or(StoreError::UnregisteredSegment(segment))?;
        let payload = codec.serialize()?;
        let capacity = codec.max_size();
        if payload.len() > capacity {
            return Err(StoreError::CapacityExceeded {
                segment,
                requested: payload.len() as u64,
                capacity: capacity as u64,
            });
        }
        let header = PersistenceHeader::for_payload(
            &payload,
            self.config.application_signature,
            codec.checksum_span(),
        );

        let total = (HEADER_SIZE + payload.len()) as u64;
        let mut handle = self.driver.open_for_write(segment, total)?;
        let written = write_image(&mut self.driver, &mut handle, &header, &payload);
        self.driver.close(handle);
        written?;

        self.driver.exit_transaction(segment)?;
        debug!(%segment, bytes = total, "segment stored");
        Ok(total)
    }

    /// Restores `segment` from flash into its codec.
    ///
    /// Never fails: when the stored data cannot be used the live state keeps
    /// its defaults and the reason is returned and reported to the sink.
    pub fn restore(&mut self, segment: SegmentType) -> LoadOutcome {
        match self.load_segment(segment) {
            Ok(bytes) => {
                self.stats.record_restore(bytes);
                self.sink.segment_restored(segment);
                LoadOutcome::Restored
            }
            Err(reason) => {
                self.stats.record_loss();
                self.sink.segment_lost(segment, &reason);
                LoadOutcome::Lost(reason)
            }
        }
    }

    /// Restores every registered segment in ordinal order.
    pub fn restore_all(&mut self) -> Vec<(SegmentType, LoadOutcome)> {
        let segments: Vec<_> = self.registered().collect();
        let outcomes: Vec<_> = segments
            .into_iter()
            .map(|segment| (segment, self.restore(segment)))
            .collect();
        let restored = outcomes.iter().filter(|(_, o)| o.is_restored()).count();
        info!(restored, total = outcomes.len(), "boot restore finished");
        outcomes
    }

    fn load_segment(&mut self, segment: SegmentType) -> Result<u64, LossReason> {
        let Some(span) = self.codecs.get(&segment).map(|codec| codec.checksum_span()) else {
            warn!(%segment, "restore of unregistered segment");
            return Err(LossReason::NoPersistence);
        };
        if self.driver.is_in_transaction(segment) {
            return Err(LossReason::NoPersistence);
        }
        let mut handle = self
            .driver
            .open_for_read(segment)
            .map_err(|_| LossReason::NoPersistence)?;

        let payload = read_image(
            &mut self.driver,
            &mut handle,
            self.config.application_signature,
            self.config.max_supported_version,
            span,
        );
        self.driver.close(handle);
        let payload = payload?;

        let codec = self
            .codecs
            .get_mut(&segment)
            .ok_or(LossReason::NoPersistence)?;
        codec
            .deserialize(&payload)
            .map_err(|e| LossReason::LayoutChange {
                detail: e.to_string(),
            })?;
        Ok(payload.len() as u64)
    }

    /// Erases `segment` on flash and clears its dirty flag.
    ///
    /// The next restore reports [`LossReason::NoPersistence`].
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be mapped or erased.
    pub fn erase_segment(&mut self, segment: SegmentType) -> StoreResult<()> {
        self.driver.erase_segment(segment)?;
        self.dirty[segment.ordinal()] = false;
        self.stats.record_erase();
        info!(%segment, "segment erased");
        Ok(())
    }

    /// Inspects `segment` on flash without touching live state.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be mapped or its ledger read.
    pub fn inspect(&mut self, segment: SegmentType) -> StoreResult<SegmentInspection> {
        let span = self
            .codecs
            .get(&segment)
            .map_or(ChecksumSpan::Full, |codec| codec.checksum_span());
        self.driver.inspect(
            segment,
            self.config.application_signature,
            self.config.max_supported_version,
            span,
        )
    }

    /// Places every registered segment and returns their map entries.
    ///
    /// # Errors
    ///
    /// Returns the first placement error.
    pub fn ensure_mapped(&mut self) -> StoreResult<Vec<MapEntry>> {
        let segments: Vec<_> = self.registered().collect();
        segments
            .into_iter()
            .map(|segment| self.driver.ensure_mapped(segment))
            .collect()
    }

    /// Returns the memory map, if flash was touched already.
    #[must_use]
    pub fn memory_map(&self) -> Option<&MemoryMap> {
        self.driver.memory_map()
    }

    /// Sets the application signature written to and expected in headers.
    pub fn set_application_signature(&mut self, value: u32) {
        self.config.application_signature = value;
    }

    /// Returns the application signature.
    #[must_use]
    pub fn application_signature(&self) -> u32 {
        self.config.application_signature
    }

    /// Sets the guard band. A running window keeps its start time.
    pub fn set_guard_band_millis(&mut self, millis: u64) {
        self.config.guard_band = Duration::from_millis(millis);
    }

    /// Returns the live configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the store statistics.
    #[must_use]
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Returns the underlying device.
    pub fn device(&self) -> &D {
        self.driver.device()
    }

    /// Consumes the store and returns the device.
    pub fn into_device(self) -> D {
        self.driver.into_device()
    }
}

impl<D: BlockDevice, C: Clock> fmt::Debug for PersistenceStore<D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceStore")
            .field("segments", &self.codecs.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("dirty", &self.dirty)
            .field("window_start", &self.window_start)
            .field("force_commit", &self.force_commit)
            .finish_non_exhaustive()
    }
}

fn write_image<D: BlockDevice>(
    driver: &mut SegmentDriver<D>,
    handle: &mut SegmentHandle,
    header: &PersistenceHeader,
    payload: &[u8],
) -> StoreResult<()> {
    driver.write(handle, 0, &header.encode())?;
    driver.write(handle, HEADER_SIZE as u64, payload)
}

fn read_image<D: BlockDevice>(
    driver: &mut SegmentDriver<D>,
    handle: &mut SegmentHandle,
    app_signature: u32,
    max_version: u16,
    span: ChecksumSpan,
) -> Result<Vec<u8>, LossReason> {
    let mut raw = [0u8; HEADER_SIZE];
    driver
        .read(handle, 0, &mut raw)
        .map_err(|e| LossReason::corruption(format!("short header read: {e}")))?;
    let header = PersistenceHeader::decode(&raw);
    header.validate(app_signature, max_version)?;

    let capacity = handle.entry().max_data_size - HEADER_SIZE as u64;
    if u64::from(header.length) > capacity {
        return Err(LossReason::corruption(format!(
            "length {} exceeds capacity {capacity}",
            header.length
        )));
    }

    let mut payload = vec![0u8; header.length as usize];
    driver
        .read(handle, HEADER_SIZE as u64, &mut payload)
        .map_err(|e| LossReason::corruption(format!("short payload read: {e}")))?;
    header.verify_payload(&payload, span)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::BlobCodec;
    use crate::diagnostics::{DiagnosticEvent, RecordingSink};
    use lonstore_flash::{FlashGeometry, InMemoryFlash};
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Store = PersistenceStore<InMemoryFlash, ManualClock>;

    struct Fixture {
        store: Store,
        clock: ManualClock,
        sink: RecordingSink,
        app: Arc<Mutex<Vec<u8>>>,
        net: Arc<Mutex<Vec<u8>>>,
    }

    fn fixture() -> Fixture {
        let flash = InMemoryFlash::new(FlashGeometry::uniform(0, 128, 16)).unwrap();
        let clock = ManualClock::new();
        let sink = RecordingSink::new();
        let mut store = PersistenceStore::with_clock(flash, StoreConfig::new(), clock.clone())
            .with_sink(sink.clone());

        let app = BlobCodec::new(64);
        let net = BlobCodec::new(200);
        let (app_state, net_state) = (app.state(), net.state());
        store.register(SegmentType::ApplicationData, Box::new(app));
        store.register(SegmentType::NetworkImage, Box::new(net));

        Fixture {
            store,
            clock,
            sink,
            app: app_state,
            net: net_state,
        }
    }

    #[test]
    fn mark_dirty_starts_window_once() {
        let mut f = fixture();
        f.clock.set(100);
        f.store.mark_dirty(SegmentType::ApplicationData);
        f.clock.set(700);
        f.store.mark_dirty(SegmentType::ApplicationData);

        assert_eq!(
            f.store.guard_band_remaining(),
            Some(Duration::from_millis(400))
        );
        assert_eq!(
            f.store.segment_state(SegmentType::ApplicationData),
            SegmentState::CommitPending
        );
    }

    #[test]
    fn commit_waits_for_guard_band() {
        let mut f = fixture();
        *f.app.lock() = vec![1, 2, 3];
        f.store.mark_dirty(SegmentType::ApplicationData);

        f.clock.advance(999);
        let report = f.store.commit_check();
        assert!(!report.performed);
        assert_eq!(f.store.device().program_count(), 0);

        f.clock.advance(1);
        let report = f.store.commit_check();
        assert!(report.performed);
        assert_eq!(report.stored, vec![SegmentType::ApplicationData]);
        assert_eq!(
            f.store.segment_state(SegmentType::ApplicationData),
            SegmentState::Clean
        );
        assert!(!f.store.is_commit_scheduled());
    }

    #[test]
    fn commit_pass_runs_in_ordinal_order_and_yields() {
        let mut f = fixture();
        f.store.mark_dirty(SegmentType::ApplicationData);
        f.store.mark_dirty(SegmentType::NetworkImage);
        f.clock.advance(1000);

        let report = f.store.commit_check();
        assert_eq!(
            report.stored,
            vec![SegmentType::NetworkImage, SegmentType::ApplicationData]
        );
        // two 20 ms yields
        assert_eq!(f.clock.now_millis(), 1040);
    }

    #[test]
    fn force_commit_bypasses_guard_band() {
        let mut f = fixture();
        assert!(!f.store.force_commit_if_scheduled());

        f.store.mark_dirty(SegmentType::NetworkImage);
        assert!(f.store.force_commit_if_scheduled());
        let report = f.store.commit_check();
        assert_eq!(report.stored, vec![SegmentType::NetworkImage]);
    }

    #[test]
    fn restore_round_trip() {
        let mut f = fixture();
        *f.net.lock() = (0..150).collect();
        f.store.store_segment(SegmentType::NetworkImage).unwrap();

        f.net.lock().clear();
        assert_eq!(
            f.store.restore(SegmentType::NetworkImage),
            LoadOutcome::Restored
        );
        assert_eq!(*f.net.lock(), (0..150).collect::<Vec<u8>>());
        assert_eq!(f.store.stats().restores(), 1);
    }

    #[test]
    fn never_stored_segment_reports_no_persistence() {
        let mut f = fixture();
        *f.app.lock() = vec![7];
        let outcome = f.store.restore(SegmentType::ApplicationData);
        assert_eq!(outcome, LoadOutcome::Lost(LossReason::NoPersistence));
        assert_eq!(*f.app.lock(), vec![7]);
        assert_eq!(
            f.sink.losses(),
            vec![(SegmentType::ApplicationData, LossReason::NoPersistence)]
        );
    }

    #[test]
    fn oversize_payload_fails_and_stays_dirty() {
        let mut f = fixture();
        *f.app.lock() = vec![0; 65];
        f.store.mark_dirty(SegmentType::ApplicationData);
        f.store.force_commit_if_scheduled();

        let report = f.store.commit_check();
        assert_eq!(report.failed, vec![SegmentType::ApplicationData]);
        assert!(f.store.is_dirty(SegmentType::ApplicationData));
        assert_eq!(
            f.store.segment_state(SegmentType::ApplicationData),
            SegmentState::CommitPending
        );
        assert!(matches!(
            f.sink.events().last(),
            Some(DiagnosticEvent::StoreFailed(SegmentType::ApplicationData, _))
        ));
        assert_eq!(f.store.stats().commit_failures(), 1);
    }

    #[test]
    fn failed_store_without_force_waits_for_next_mark() {
        let mut f = fixture();
        *f.app.lock() = vec![0; 65];
        f.store.mark_dirty(SegmentType::ApplicationData);
        f.clock.advance(1000);
        f.store.commit_check();

        assert_eq!(
            f.store.segment_state(SegmentType::ApplicationData),
            SegmentState::Dirty
        );
        f.clock.advance(5000);
        assert!(!f.store.commit_check().performed);
    }

    #[test]
    fn application_signature_change_is_detected() {
        let mut f = fixture();
        f.store.set_application_signature(0x1111);
        *f.app.lock() = vec![1];
        f.store.store_segment(SegmentType::ApplicationData).unwrap();

        f.store.set_application_signature(0x2222);
        let outcome = f.store.restore(SegmentType::ApplicationData);
        assert!(matches!(
            outcome,
            LoadOutcome::Lost(LossReason::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn erase_segment_forgets_data() {
        let mut f = fixture();
        *f.app.lock() = vec![4, 5];
        f.store.store_segment(SegmentType::ApplicationData).unwrap();
        f.store.mark_dirty(SegmentType::ApplicationData);

        f.store.erase_segment(SegmentType::ApplicationData).unwrap();
        assert!(!f.store.is_dirty(SegmentType::ApplicationData));
        assert_eq!(
            f.store.restore(SegmentType::ApplicationData),
            LoadOutcome::Lost(LossReason::NoPersistence)
        );
    }

    #[test]
    fn unregistered_segment() {
        let mut f = fixture();
        assert!(matches!(
            f.store.store_segment(SegmentType::Security),
            Err(StoreError::UnregisteredSegment(SegmentType::Security))
        ));
        assert!(!f.store.restore(SegmentType::Security).is_restored());
    }

    #[test]
    fn restore_all_covers_registered_segments() {
        let mut f = fixture();
        *f.app.lock() = vec![9];
        f.store.store_segment(SegmentType::ApplicationData).unwrap();

        let outcomes = f.store.restore_all();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, SegmentType::NetworkImage);
        assert!(!outcomes[0].1.is_restored());
        assert_eq!(outcomes[1], (SegmentType::ApplicationData, LoadOutcome::Restored));
    }

    #[test]
    fn set_guard_band_applies_to_running_window() {
        let mut f = fixture();
        f.store.mark_dirty(SegmentType::ApplicationData);
        f.store.set_guard_band_millis(0);
        assert!(f.store.commit_check().performed);
    }
}
