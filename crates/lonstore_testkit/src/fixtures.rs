//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores over shared
//! in-memory flash, rebooting them, and creating flash image files.

use lonstore_core::{
    BlobCodec, ManualClock, PersistenceStore, RecordingSink, SegmentType, StoreConfig,
};
use lonstore_flash::{BlockDevice, FileFlash, FlashGeometry, InMemoryFlash};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Erase-block size used by the fixtures.
pub const TEST_BLOCK_SIZE: u64 = 256;

/// Number of blocks in the fixture region.
pub const TEST_BLOCK_COUNT: u64 = 64;

/// Application signature used by the fixtures.
pub const TEST_APP_SIGNATURE: u32 = 0x5445_5354;

/// Geometry of the fixture flash region.
pub fn test_geometry() -> FlashGeometry {
    FlashGeometry::uniform(0, TEST_BLOCK_SIZE, TEST_BLOCK_COUNT)
}

/// A blank in-memory flash with the fixture geometry.
pub fn blank_flash() -> InMemoryFlash {
    InMemoryFlash::new(test_geometry()).expect("fixture geometry is valid")
}

/// Segment capacities resembling a small node.
pub fn standard_segments() -> Vec<(SegmentType, usize)> {
    vec![
        (SegmentType::NetworkImage, 1024),
        (SegmentType::ApplicationData, 64),
        (SegmentType::Security, 48),
        (SegmentType::UniqueId, 6),
        (SegmentType::IsiConnectionTable, 512),
        (SegmentType::IsiPersistentState, 32),
        (SegmentType::NodeDefinition, 256),
    ]
}

/// A store over shared in-memory flash with a manual clock.
///
/// Each registered segment uses a [`BlobCodec`]; the live buffers are
/// reachable through [`TestStore::get`] and [`TestStore::set`].
pub struct TestStore {
    /// The store instance.
    pub store: PersistenceStore<InMemoryFlash, ManualClock>,
    /// Handle to the same cells the store writes.
    pub flash: InMemoryFlash,
    /// Clock driving the guard band.
    pub clock: ManualClock,
    /// Diagnostics of the current boot.
    pub sink: RecordingSink,
    segments: Vec<(SegmentType, usize)>,
    states: BTreeMap<SegmentType, Arc<Mutex<Vec<u8>>>>,
    app_signature: u32,
}

impl TestStore {
    /// Creates a store over blank flash with `segments` registered.
    pub fn new(segments: &[(SegmentType, usize)]) -> Self {
        Self::over(blank_flash(), segments)
    }

    /// Creates a store with every segment of [`standard_segments`].
    pub fn standard() -> Self {
        Self::new(&standard_segments())
    }

    /// Creates a store over existing flash cells.
    pub fn over(flash: InMemoryFlash, segments: &[(SegmentType, usize)]) -> Self {
        let clock = ManualClock::new();
        let (store, sink, states) =
            Self::boot(&flash, &clock, segments, TEST_APP_SIGNATURE);
        Self {
            store,
            flash,
            clock,
            sink,
            segments: segments.to_vec(),
            states,
            app_signature: TEST_APP_SIGNATURE,
        }
    }

    fn boot(
        flash: &InMemoryFlash,
        clock: &ManualClock,
        segments: &[(SegmentType, usize)],
        app_signature: u32,
    ) -> (
        PersistenceStore<InMemoryFlash, ManualClock>,
        RecordingSink,
        BTreeMap<SegmentType, Arc<Mutex<Vec<u8>>>>,
    ) {
        let sink = RecordingSink::new();
        let config = StoreConfig::new().application_signature(app_signature);
        let mut store = PersistenceStore::with_clock(flash.share(), config, clock.clone())
            .with_sink(sink.clone());

        let mut states = BTreeMap::new();
        for &(segment, max_size) in segments {
            let codec = BlobCodec::new(max_size);
            states.insert(segment, codec.state());
            store.register(segment, Box::new(codec));
        }
        (store, sink, states)
    }

    /// Simulates a reset: a fresh store over the same cells, with empty
    /// live buffers and a new diagnostics sink.
    pub fn reboot(&mut self) {
        self.reboot_with_signature(self.app_signature);
    }

    /// Reboots into a firmware build with a different application signature.
    pub fn reboot_with_signature(&mut self, app_signature: u32) {
        let (store, sink, states) =
            Self::boot(&self.flash, &self.clock, &self.segments, app_signature);
        self.store = store;
        self.sink = sink;
        self.states = states;
        self.app_signature = app_signature;
    }

    /// Returns the live buffer of `segment`.
    pub fn get(&self, segment: SegmentType) -> Vec<u8> {
        self.states
            .get(&segment)
            .map(|state| state.lock().clone())
            .unwrap_or_default()
    }

    /// Replaces the live buffer of `segment`.
    pub fn set(&self, segment: SegmentType, bytes: &[u8]) {
        if let Some(state) = self.states.get(&segment) {
            *state.lock() = bytes.to_vec();
        }
    }

    /// Replaces the live buffer of `segment` and marks it dirty.
    pub fn update(&mut self, segment: SegmentType, bytes: &[u8]) {
        self.set(segment, bytes);
        self.store.mark_dirty(segment);
    }
}

impl std::ops::Deref for TestStore {
    type Target = PersistenceStore<InMemoryFlash, ManualClock>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl std::ops::DerefMut for TestStore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

/// Runs a test with a [`TestStore`] holding the standard segments.
pub fn with_test_store<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestStore) -> R,
{
    let mut fixture = TestStore::standard();
    f(&mut fixture)
}

/// A blank flash image file in a temporary directory.
pub struct TempFlashImage {
    /// The file-backed device.
    pub flash: FileFlash,
    /// Path of the image file.
    pub path: PathBuf,
    _temp_dir: TempDir,
}

impl TempFlashImage {
    /// Formats a blank image with the fixture geometry.
    pub fn new() -> Self {
        Self::with_geometry(test_geometry())
    }

    /// Formats a blank image with `geometry`.
    pub fn with_geometry(geometry: FlashGeometry) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("flash.img");
        let flash = FileFlash::create(&path, geometry).expect("Failed to create flash image");
        Self {
            flash,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Reopens the image file as a new device handle.
    pub fn reopen(&self) -> FileFlash {
        let geometry = self.flash.geometry().expect("file geometry is known");
        FileFlash::open_image(&self.path, geometry).expect("Failed to reopen flash image")
    }
}

impl Default for TempFlashImage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lonstore_core::LoadOutcome;

    #[test]
    fn reboot_clears_live_state() {
        let mut fixture = TestStore::new(&[(SegmentType::UniqueId, 6)]);
        fixture.set(SegmentType::UniqueId, &[1, 2, 3, 4, 5, 6]);
        fixture.store_segment(SegmentType::UniqueId).unwrap();

        fixture.reboot();
        assert!(fixture.get(SegmentType::UniqueId).is_empty());
        assert_eq!(
            fixture.restore(SegmentType::UniqueId),
            LoadOutcome::Restored
        );
        assert_eq!(fixture.get(SegmentType::UniqueId), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn standard_segments_fit() {
        with_test_store(|fixture| {
            let entries = fixture.ensure_mapped().unwrap();
            assert_eq!(entries.len(), SegmentType::COUNT);
        });
    }

    #[test]
    fn temp_image_reopens() {
        let image = TempFlashImage::new();
        let flash = image.reopen();
        assert_eq!(flash.path(), image.path.as_path());
    }
}
