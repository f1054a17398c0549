//! Persistence header and checksum.
//!
//! ## Header Format
//!
//! ```text
//! | length (4) | signature (4) | app_signature (4) | version (2) | checksum (2) |
//! ```
//!
//! All fields are little-endian. The header sits directly after the
//! transaction ledger and before the payload.

use crate::error::{LossReason, SignatureKind};

/// Size of the encoded header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Store format magic ("LPST").
pub const PERSISTENCE_SIGNATURE: u32 = u32::from_le_bytes(*b"LPST");

/// Current store format version.
pub const PERSISTENCE_VERSION: u16 = 1;

/// Which payload bytes contribute to the checksum.
///
/// Two image families exist in the field: the generic path sums every
/// payload byte, the legacy ISI path stops one byte short. Both add the low
/// byte of the length. A codec declares which family its segment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumSpan {
    /// All `length` payload bytes.
    #[default]
    Full,
    /// The first `length - 1` payload bytes.
    ExcludeLastByte,
}

/// Computes the one-byte payload checksum.
///
/// Sum of the covered payload bytes plus the low byte of the payload length,
/// modulo 256. Deliberately weak; changing it breaks stored images.
#[must_use]
pub fn checksum(payload: &[u8], span: ChecksumSpan) -> u8 {
    let covered = match span {
        ChecksumSpan::Full => payload,
        ChecksumSpan::ExcludeLastByte => &payload[..payload.len().saturating_sub(1)],
    };
    covered
        .iter()
        .fold(payload.len() as u8, |sum, &b| sum.wrapping_add(b))
}

/// Header prefixed to every stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    /// Payload length in bytes.
    pub length: u32,
    /// Store format magic.
    pub signature: u32,
    /// Application/build identity.
    pub app_signature: u32,
    /// Store format version.
    pub version: u16,
    /// Payload checksum (low byte significant).
    pub checksum: u16,
}

impl PersistenceHeader {
    /// Builds the header describing `payload`.
    #[must_use]
    pub fn for_payload(payload: &[u8], app_signature: u32, span: ChecksumSpan) -> Self {
        Self {
            length: payload.len() as u32,
            signature: PERSISTENCE_SIGNATURE,
            app_signature,
            version: PERSISTENCE_VERSION,
            checksum: u16::from(checksum(payload, span)),
        }
    }

    /// Encodes the header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.signature.to_le_bytes());
        buf[8..12].copy_from_slice(&self.app_signature.to_le_bytes());
        buf[12..14].copy_from_slice(&self.version.to_le_bytes());
        buf[14..16].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decodes a header from bytes.
    #[must_use]
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            signature: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            app_signature: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            version: u16::from_le_bytes([buf[12], buf[13]]),
            checksum: u16::from_le_bytes([buf[14], buf[15]]),
        }
    }

    /// Checks that the header belongs to this store format and application.
    ///
    /// # Errors
    ///
    /// Returns the first failing check, in order: format signature,
    /// application signature, version.
    pub fn validate(&self, app_signature: u32, max_version: u16) -> Result<(), LossReason> {
        if self.signature != PERSISTENCE_SIGNATURE {
            return Err(LossReason::SignatureMismatch {
                kind: SignatureKind::Format,
                expected: PERSISTENCE_SIGNATURE,
                found: self.signature,
            });
        }
        if self.app_signature != app_signature {
            return Err(LossReason::SignatureMismatch {
                kind: SignatureKind::Application,
                expected: app_signature,
                found: self.app_signature,
            });
        }
        if self.version > max_version {
            return Err(LossReason::VersionNotSupported {
                found: self.version,
                supported: max_version,
            });
        }
        Ok(())
    }

    /// Checks `payload` against the stored length and checksum.
    ///
    /// # Errors
    ///
    /// Returns [`LossReason::Corruption`] on a length or checksum mismatch.
    pub fn verify_payload(&self, payload: &[u8], span: ChecksumSpan) -> Result<(), LossReason> {
        if payload.len() != self.length as usize {
            return Err(LossReason::corruption(format!(
                "short payload: {} of {} bytes",
                payload.len(),
                self.length
            )));
        }
        let computed = checksum(payload, span);
        if u16::from(computed) != self.checksum {
            return Err(LossReason::corruption(format!(
                "checksum mismatch: stored {:#04x}, computed {:#04x}",
                self.checksum, computed
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_adds_length_low_byte() {
        assert_eq!(checksum(&[], ChecksumSpan::Full), 0);
        assert_eq!(checksum(&[1, 2, 3], ChecksumSpan::Full), 3 + 6);
        assert_eq!(checksum(&[0xFF, 0x02], ChecksumSpan::Full), 0x03);
    }

    #[test]
    fn checksum_uses_only_low_byte_of_length() {
        let payload = vec![0u8; 0x1_05];
        assert_eq!(checksum(&payload, ChecksumSpan::Full), 0x05);
    }

    #[test]
    fn legacy_span_skips_last_byte() {
        let payload = [10, 20, 30];
        assert_eq!(checksum(&payload, ChecksumSpan::ExcludeLastByte), 3 + 30);
        assert_eq!(checksum(&[], ChecksumSpan::ExcludeLastByte), 0);
        assert_eq!(checksum(&[0x7F], ChecksumSpan::ExcludeLastByte), 1);
    }

    #[test]
    fn header_roundtrip_and_layout() {
        let header = PersistenceHeader::for_payload(&[1, 2, 3, 4], 0xCAFE_F00D, ChecksumSpan::Full);
        let bytes = header.encode();
        assert_eq!(&bytes[0..4], &4u32.to_le_bytes());
        assert_eq!(&bytes[4..8], b"LPST");
        assert_eq!(&bytes[8..12], &0xCAFE_F00Du32.to_le_bytes());
        assert_eq!(&bytes[12..14], &PERSISTENCE_VERSION.to_le_bytes());
        assert_eq!(PersistenceHeader::decode(&bytes), header);
    }

    #[test]
    fn validate_reports_each_mismatch() {
        let header = PersistenceHeader::for_payload(b"abc", 7, ChecksumSpan::Full);
        assert!(header.validate(7, PERSISTENCE_VERSION).is_ok());

        assert!(matches!(
            header.validate(8, PERSISTENCE_VERSION),
            Err(LossReason::SignatureMismatch {
                kind: SignatureKind::Application,
                ..
            })
        ));

        let mut foreign = header;
        foreign.signature = 0;
        assert!(matches!(
            foreign.validate(7, PERSISTENCE_VERSION),
            Err(LossReason::SignatureMismatch {
                kind: SignatureKind::Format,
                ..
            })
        ));

        let mut newer = header;
        newer.version = PERSISTENCE_VERSION + 1;
        assert_eq!(
            newer.validate(7, PERSISTENCE_VERSION),
            Err(LossReason::VersionNotSupported {
                found: PERSISTENCE_VERSION + 1,
                supported: PERSISTENCE_VERSION
            })
        );
    }

    #[test]
    fn verify_payload_detects_single_byte_flip() {
        let payload = b"network image".to_vec();
        let header = PersistenceHeader::for_payload(&payload, 0, ChecksumSpan::Full);
        assert!(header.verify_payload(&payload, ChecksumSpan::Full).is_ok());

        let mut damaged = payload.clone();
        damaged[3] ^= 0x01;
        assert!(matches!(
            header.verify_payload(&damaged, ChecksumSpan::Full),
            Err(LossReason::Corruption { .. })
        ));
        assert!(header
            .verify_payload(&payload[..5], ChecksumSpan::Full)
            .is_err());
    }
}
