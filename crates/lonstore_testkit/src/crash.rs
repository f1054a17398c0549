//! Power-cut testing for the segment store.
//!
//! Simulates a power loss at every programmed byte of one store sequence
//! and verifies what the next boot restores.
//!
//! ## Test Strategy
//!
//! 1. Commit an old payload, with no faults
//! 2. Measure how many bytes storing a new payload programs
//! 3. For every cut point, rebuild the old image, cut power after that many
//!    bytes of the new store, reboot, and restore
//!
//! A restore may yield the old payload (the cut hit before the ledger
//! changed), the new payload (the cut hit after the commit), or
//! `NoPersistence`. Anything else is a violation.
//!
//! ## Usage
//!
//! ```rust
//! use lonstore_core::SegmentType;
//! use lonstore_testkit::crash::PowerCutHarness;
//!
//! let report = PowerCutHarness::new(SegmentType::Security, 48)
//!     .run(&[1; 20], &[2; 30]);
//! assert!(report.is_clean(), "{:?}", report.violations);
//! ```

use crate::faulty::FaultyFlash;
use crate::fixtures::{test_geometry, TEST_APP_SIGNATURE};
use lonstore_core::{
    BlobCodec, LoadOutcome, LossReason, ManualClock, PersistenceStore, SegmentType, StoreConfig,
};
use lonstore_flash::{FlashGeometry, InMemoryFlash};

/// What one restore after a power cut produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CutOutcome {
    /// The previously committed payload was restored.
    Old,
    /// The new payload was restored.
    New,
    /// The segment reported no persistent data.
    NoPersistence,
    /// Anything else.
    Violation(String),
}

/// Results of a power-cut sweep.
#[derive(Debug, Clone, Default)]
pub struct PowerCutReport {
    /// Bytes the uninterrupted store programs.
    pub total_bytes: u64,
    /// Outcome per cut point, indexed by bytes programmed before the cut.
    pub outcomes: Vec<CutOutcome>,
    /// Descriptions of every violation.
    pub violations: Vec<String>,
}

impl PowerCutReport {
    /// Returns whether no cut produced a stale or partial payload.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Number of cuts that produced `outcome`.
    pub fn count(&self, outcome: &CutOutcome) -> usize {
        self.outcomes.iter().filter(|o| *o == outcome).count()
    }
}

/// Sweeps power cuts across one store of a segment.
#[derive(Debug, Clone)]
pub struct PowerCutHarness {
    geometry: FlashGeometry,
    segment: SegmentType,
    max_size: usize,
}

impl PowerCutHarness {
    /// Creates a harness for `segment` with the fixture geometry.
    pub fn new(segment: SegmentType, max_size: usize) -> Self {
        Self {
            geometry: test_geometry(),
            segment,
            max_size,
        }
    }

    /// Uses `geometry` instead of the fixture geometry.
    pub fn with_geometry(mut self, geometry: FlashGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    fn store(
        &self,
        device: FaultyFlash<InMemoryFlash>,
        payload: &[u8],
    ) -> (PersistenceStore<FaultyFlash<InMemoryFlash>, ManualClock>, bool) {
        let config = StoreConfig::new().application_signature(TEST_APP_SIGNATURE);
        let mut store = PersistenceStore::with_clock(device, config, ManualClock::new());
        let codec = BlobCodec::new(self.max_size);
        *codec.state().lock() = payload.to_vec();
        store.register(self.segment, Box::new(codec));
        let ok = store.store_segment(self.segment).is_ok();
        (store, ok)
    }

    fn restore(&self, flash: InMemoryFlash) -> (LoadOutcome, Vec<u8>) {
        let config = StoreConfig::new().application_signature(TEST_APP_SIGNATURE);
        let mut store = PersistenceStore::with_clock(flash, config, ManualClock::new());
        let codec = BlobCodec::new(self.max_size);
        let state = codec.state();
        store.register(self.segment, Box::new(codec));
        let outcome = store.restore(self.segment);
        let restored = state.lock().clone();
        (outcome, restored)
    }

    fn committed_image(&self, payload: &[u8]) -> InMemoryFlash {
        let flash = InMemoryFlash::new(self.geometry).expect("harness geometry is valid");
        let (_, ok) = self.store(FaultyFlash::new(flash.share()), payload);
        assert!(ok, "storing the old payload must succeed");
        flash
    }

    /// Runs the sweep: `old` is committed first, then `new` is stored with a
    /// power cut after every possible byte count.
    ///
    /// # Panics
    ///
    /// Panics if the uninterrupted stores fail.
    pub fn run(&self, old: &[u8], new: &[u8]) -> PowerCutReport {
        let mut report = PowerCutReport::default();

        let image = self.committed_image(old);
        let device = FaultyFlash::new(image.share());
        let faults = device.faults();
        let before = faults.bytes_written();
        let (_, ok) = self.store(device, new);
        assert!(ok, "storing the new payload must succeed");
        report.total_bytes = faults.bytes_written() - before;

        for cut in 0..=report.total_bytes {
            let image = self.committed_image(old);
            let device = FaultyFlash::new(image.share());
            device.faults().cut_power_after(cut);
            let (_, stored) = self.store(device, new);

            let (outcome, restored) = self.restore(image.share());
            let verdict = match outcome {
                LoadOutcome::Restored if restored == new => CutOutcome::New,
                LoadOutcome::Restored if restored == old && !stored => CutOutcome::Old,
                LoadOutcome::Lost(LossReason::NoPersistence) if !stored => {
                    CutOutcome::NoPersistence
                }
                other => CutOutcome::Violation(format!(
                    "cut after {cut} bytes (store ok: {stored}): {other:?}, restored {} bytes",
                    restored.len()
                )),
            };
            if let CutOutcome::Violation(message) = &verdict {
                report.violations.push(message.clone());
            }
            report.outcomes.push(verdict);
        }
        report
    }
}
