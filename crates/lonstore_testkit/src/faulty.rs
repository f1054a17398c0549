//! Fault-injecting block device.
//!
//! [`FaultyFlash`] wraps any [`BlockDevice`] and fails calls on demand. The
//! fault switches live in a shared [`Faults`] so a test can keep flipping
//! them after the device has been moved into a store.

use lonstore_flash::{BlockDevice, FlashError, FlashGeometry, FlashResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Fault switches and operation counters shared with a [`FaultyFlash`].
#[derive(Debug)]
pub struct Faults {
    cut_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    power_lost: AtomicBool,
    fail_geometry: AtomicBool,
    fail_open: AtomicBool,
    fail_erase: AtomicBool,
    opens: AtomicU64,
    writes: AtomicU64,
    erases: AtomicU64,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            cut_after_bytes: AtomicU64::new(u64::MAX),
            bytes_written: AtomicU64::new(0),
            power_lost: AtomicBool::new(false),
            fail_geometry: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            fail_erase: AtomicBool::new(false),
            opens: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            erases: AtomicU64::new(0),
        }
    }
}

impl Faults {
    /// Loses power once `bytes` more bytes have been programmed.
    ///
    /// The write that crosses the threshold programs only its prefix up to
    /// the threshold, then fails. Every later write or erase fails.
    pub fn cut_power_after(&self, bytes: u64) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.cut_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Makes geometry queries fail.
    pub fn fail_geometry(&self, fail: bool) {
        self.fail_geometry.store(fail, Ordering::SeqCst);
    }

    /// Makes `open` fail.
    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Makes `erase` fail.
    pub fn fail_erase(&self, fail: bool) {
        self.fail_erase.store(fail, Ordering::SeqCst);
    }

    /// Restores power and clears every fault. Counters are kept.
    pub fn reset(&self) {
        self.cut_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.power_lost.store(false, Ordering::SeqCst);
        self.fail_geometry.store(false, Ordering::SeqCst);
        self.fail_open.store(false, Ordering::SeqCst);
        self.fail_erase.store(false, Ordering::SeqCst);
    }

    /// Returns whether a power cut happened.
    pub fn has_lost_power(&self) -> bool {
        self.power_lost.load(Ordering::SeqCst)
    }

    /// Total bytes programmed through the wrapper.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    /// Number of successful opens.
    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of write calls that reached the device.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of erase calls that reached the device.
    pub fn erases(&self) -> u64 {
        self.erases.load(Ordering::SeqCst)
    }
}

/// A block device wrapper that can simulate power loss and device faults.
#[derive(Debug)]
pub struct FaultyFlash<D> {
    inner: D,
    faults: Arc<Faults>,
}

impl<D: BlockDevice> FaultyFlash<D> {
    /// Wraps `inner` with all faults disabled.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Returns the shared fault switches.
    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }

    /// Returns the wrapped device.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Unwraps the device.
    pub fn into_inner(self) -> D {
        self.inner
    }
}

impl<D: BlockDevice> BlockDevice for FaultyFlash<D> {
    fn open(&mut self) -> FlashResult<()> {
        if self.faults.fail_open.load(Ordering::SeqCst) {
            return Err(FlashError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "simulated open failure",
            )));
        }
        self.inner.open()?;
        self.faults.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.inner.close();
    }

    fn geometry(&self) -> FlashResult<FlashGeometry> {
        if self.faults.fail_geometry.load(Ordering::SeqCst) {
            return Err(FlashError::invalid_geometry("simulated geometry query failure"));
        }
        self.inner.geometry()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> FlashResult<()> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> FlashResult<()> {
        let faults = &self.faults;
        if faults.power_lost.load(Ordering::SeqCst) {
            return Err(FlashError::write_failed(offset, "device has no power"));
        }
        faults.writes.fetch_add(1, Ordering::SeqCst);

        let current = faults.bytes_written.load(Ordering::SeqCst);
        let threshold = faults.cut_after_bytes.load(Ordering::SeqCst);
        let len = data.len() as u64;

        if current + len > threshold {
            faults.power_lost.store(true, Ordering::SeqCst);
            let partial = usize::try_from(threshold.saturating_sub(current)).unwrap_or(data.len());
            if partial > 0 {
                let _ = self.inner.write_at(offset, &data[..partial]);
            }
            faults
                .bytes_written
                .fetch_add(partial as u64, Ordering::SeqCst);
            return Err(FlashError::write_failed(
                offset,
                format!("simulated power cut after {partial} of {len} bytes"),
            ));
        }

        self.inner.write_at(offset, data)?;
        faults.bytes_written.fetch_add(len, Ordering::SeqCst);
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: u64) -> FlashResult<()> {
        if self.faults.power_lost.load(Ordering::SeqCst) {
            return Err(FlashError::erase_failed(offset, "device has no power"));
        }
        if self.faults.fail_erase.load(Ordering::SeqCst) {
            return Err(FlashError::erase_failed(offset, "simulated erase failure"));
        }
        self.faults.erases.fetch_add(1, Ordering::SeqCst);
        self.inner.erase(offset, len)
    }
}
