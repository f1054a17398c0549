//! Read-only segment inspection.
//!
//! Decodes what is on flash for a segment without a codec, for tooling
//! that verifies images offline.

use crate::driver::SegmentDriver;
use crate::error::{LoadOutcome, LossReason, StoreResult};
use crate::header::{ChecksumSpan, PersistenceHeader, HEADER_SIZE};
use crate::layout::MapEntry;
use crate::ledger::{LedgerState, TransactionLedger};
use crate::types::SegmentType;
use lonstore_flash::BlockDevice;

/// Outcome of the payload checksum check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumVerdict {
    /// The stored checksum matches the payload.
    Valid,
    /// The stored checksum does not match.
    Invalid,
    /// The payload was not checked because an earlier check failed.
    NotChecked,
}

/// Everything known about one segment on flash.
#[derive(Debug, Clone)]
pub struct SegmentInspection {
    /// Where the segment lives.
    pub entry: MapEntry,
    /// Raw ledger words.
    pub ledger: TransactionLedger,
    /// Decoded ledger state.
    pub ledger_state: LedgerState,
    /// Decoded header, if it could be read.
    pub header: Option<PersistenceHeader>,
    /// Result of the ledger, signature, version and length checks.
    pub header_check: Result<(), LossReason>,
    /// Result of the checksum check.
    pub checksum: ChecksumVerdict,
}

impl SegmentInspection {
    /// The outcome a restore would report, ignoring codec layout checks.
    #[must_use]
    pub fn outcome(&self) -> LoadOutcome {
        match (&self.header_check, self.checksum) {
            (Err(reason), _) => LoadOutcome::Lost(reason.clone()),
            (Ok(()), ChecksumVerdict::Valid) => LoadOutcome::Restored,
            (Ok(()), _) => LoadOutcome::Lost(LossReason::corruption("checksum mismatch")),
        }
    }

    /// Payload length recorded in the header.
    #[must_use]
    pub fn payload_len(&self) -> Option<u32> {
        self.header.map(|header| header.length)
    }
}

impl<D: BlockDevice> SegmentDriver<D> {
    /// Inspects `segment` the way a restore would read it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the segment cannot be mapped or its ledger
    /// cannot be read. Data problems are reported inside the inspection.
    pub fn inspect(
        &mut self,
        segment: SegmentType,
        app_signature: u32,
        max_version: u16,
        span: ChecksumSpan,
    ) -> StoreResult<SegmentInspection> {
        let entry = self.ensure_mapped(segment)?;
        let ledger = self.read_ledger(segment)?;
        let ledger_state = ledger.state();

        let mut inspection = SegmentInspection {
            entry,
            ledger,
            ledger_state,
            header: None,
            header_check: Err(LossReason::NoPersistence),
            checksum: ChecksumVerdict::NotChecked,
        };

        let mut handle = match self.open_for_read(segment) {
            Ok(handle) => handle,
            Err(_) => return Ok(inspection),
        };
        let mut raw = [0u8; HEADER_SIZE];
        if let Err(e) = self.read(&mut handle, 0, &mut raw) {
            self.close(handle);
            if !ledger_state.is_in_transaction() {
                inspection.header_check = Err(LossReason::corruption(e.to_string()));
            }
            return Ok(inspection);
        }
        let header = PersistenceHeader::decode(&raw);
        inspection.header = Some(header);

        if ledger_state.is_in_transaction() {
            self.close(handle);
            return Ok(inspection);
        }
        inspection.header_check = header.validate(app_signature, max_version);
        if inspection.header_check.is_ok() {
            let capacity = entry.max_data_size - HEADER_SIZE as u64;
            if u64::from(header.length) > capacity {
                inspection.header_check = Err(LossReason::corruption(format!(
                    "length {} exceeds capacity {capacity}",
                    header.length
                )));
            }
        }
        if inspection.header_check.is_err() {
            self.close(handle);
            return Ok(inspection);
        }

        let mut payload = vec![0u8; header.length as usize];
        let read = self.read(&mut handle, HEADER_SIZE as u64, &mut payload);
        self.close(handle);
        inspection.checksum = match read {
            Ok(()) => match header.verify_payload(&payload, span) {
                Ok(()) => ChecksumVerdict::Valid,
                Err(_) => ChecksumVerdict::Invalid,
            },
            Err(e) => {
                inspection.header_check = Err(LossReason::corruption(e.to_string()));
                ChecksumVerdict::NotChecked
            }
        };
        Ok(inspection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::PERSISTENCE_VERSION;
    use lonstore_flash::{FlashGeometry, InMemoryFlash};

    fn committed(payload: &[u8]) -> SegmentDriver<InMemoryFlash> {
        let flash = InMemoryFlash::new(FlashGeometry::uniform(0, 64, 16)).unwrap();
        let mut driver = SegmentDriver::new(flash);
        let segment = SegmentType::Security;
        driver.reserve(segment, 32);

        let header = PersistenceHeader::for_payload(payload, 7, ChecksumSpan::Full);
        driver.enter_transaction(segment).unwrap();
        let mut handle = driver
            .open_for_write(segment, (HEADER_SIZE + payload.len()) as u64)
            .unwrap();
        driver.write(&mut handle, 0, &header.encode()).unwrap();
        driver.write(&mut handle, HEADER_SIZE as u64, payload).unwrap();
        driver.close(handle);
        driver.exit_transaction(segment).unwrap();
        driver
    }

    #[test]
    fn committed_segment_is_valid() {
        let mut driver = committed(&[1, 2, 3]);
        let inspection = driver
            .inspect(SegmentType::Security, 7, PERSISTENCE_VERSION, ChecksumSpan::Full)
            .unwrap();
        assert_eq!(inspection.ledger_state, LedgerState::Committed);
        assert_eq!(inspection.payload_len(), Some(3));
        assert_eq!(inspection.checksum, ChecksumVerdict::Valid);
        assert_eq!(inspection.outcome(), LoadOutcome::Restored);
    }

    #[test]
    fn blank_segment_has_no_persistence() {
        let flash = InMemoryFlash::new(FlashGeometry::uniform(0, 64, 16)).unwrap();
        let mut driver = SegmentDriver::new(flash);
        driver.reserve(SegmentType::UniqueId, 8);
        let inspection = driver
            .inspect(SegmentType::UniqueId, 0, PERSISTENCE_VERSION, ChecksumSpan::Full)
            .unwrap();
        assert_eq!(inspection.ledger_state, LedgerState::Erased);
        assert_eq!(
            inspection.outcome(),
            LoadOutcome::Lost(LossReason::NoPersistence)
        );
    }

    #[test]
    fn flipped_payload_byte_is_invalid() {
        let mut driver = committed(&[0xF0, 0xF0]);
        let entry = driver.ensure_mapped(SegmentType::Security).unwrap();
        driver
            .device()
            .inject_corruption(entry.data_offset() + HEADER_SIZE as u64, &[0x70]);
        let inspection = driver
            .inspect(SegmentType::Security, 7, PERSISTENCE_VERSION, ChecksumSpan::Full)
            .unwrap();
        assert_eq!(inspection.checksum, ChecksumVerdict::Invalid);
        assert!(!inspection.outcome().is_restored());
    }

    #[test]
    fn wrong_application_signature_skips_checksum() {
        let mut driver = committed(&[1]);
        let inspection = driver
            .inspect(SegmentType::Security, 8, PERSISTENCE_VERSION, ChecksumSpan::Full)
            .unwrap();
        assert!(matches!(
            inspection.header_check,
            Err(LossReason::SignatureMismatch { .. })
        ));
        assert_eq!(inspection.checksum, ChecksumVerdict::NotChecked);
    }
}
