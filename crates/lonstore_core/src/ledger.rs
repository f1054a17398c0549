//! Transaction ledger.
//!
//! Every segment starts with an 8-byte ledger:
//!
//! ```text
//! | signature (4) | state (4) |      little-endian
//! ```
//!
//! Flash can clear bits without an erase, so the ledger moves between states
//! with plain writes as long as every transition only clears bits. Returning
//! from an open transaction to committed needs the segment erased first.
//!
//! | from \ event      | Enter           | Exit              |
//! |-------------------|-----------------|-------------------|
//! | `Erased`          | write open      | write committed   |
//! | `TransactionOpen` | no change       | illegal (erase)   |
//! | `Committed`       | write open      | no change         |
//! | `Corrupt`         | no change       | illegal (erase)   |

use std::fmt;

/// Size of the encoded ledger in bytes.
pub const LEDGER_SIZE: usize = 8;

/// Signature marking a ledger that has been written at least once.
pub const LEDGER_SIGNATURE: u32 = 0x4C45_4447;

/// State sentinel meaning "data region is trustworthy".
pub const STATE_VALID: u32 = 0x5A5A_A5A5;

/// State written when a transaction begins. All bits clear, so it is
/// reachable from every other state value.
pub const STATE_INVALID: u32 = 0x0000_0000;

const ERASED_WORD: u32 = u32::MAX;

/// The raw on-flash ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionLedger {
    /// Ledger signature.
    pub signature: u32,
    /// Data state word.
    pub state: u32,
}

impl TransactionLedger {
    /// Ledger as read from freshly erased flash.
    pub const ERASED: Self = Self {
        signature: ERASED_WORD,
        state: ERASED_WORD,
    };

    /// Ledger of a segment whose transaction has begun.
    pub const OPEN: Self = Self {
        signature: LEDGER_SIGNATURE,
        state: STATE_INVALID,
    };

    /// Ledger of a segment with committed, valid data.
    pub const COMMITTED: Self = Self {
        signature: LEDGER_SIGNATURE,
        state: STATE_VALID,
    };

    /// Encodes the ledger to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; LEDGER_SIZE] {
        let mut buf = [0u8; LEDGER_SIZE];
        buf[0..4].copy_from_slice(&self.signature.to_le_bytes());
        buf[4..8].copy_from_slice(&self.state.to_le_bytes());
        buf
    }

    /// Decodes a ledger from bytes.
    #[must_use]
    pub fn decode(buf: &[u8; LEDGER_SIZE]) -> Self {
        Self {
            signature: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            state: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    /// Returns whether writing `next` over `self` only clears bits.
    #[must_use]
    pub const fn can_program(&self, next: &Self) -> bool {
        self.signature & next.signature == next.signature && self.state & next.state == next.state
    }

    /// Classifies the raw ledger.
    #[must_use]
    pub fn state(&self) -> LedgerState {
        LedgerState::from(*self)
    }
}

/// Interpreted ledger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// Both words erased; nothing committed since the last erase.
    Erased,
    /// A transaction began and has not been committed.
    TransactionOpen,
    /// The data region holds a committed payload.
    Committed,
    /// Neither a known pattern nor erased.
    Corrupt,
}

impl From<TransactionLedger> for LedgerState {
    fn from(ledger: TransactionLedger) -> Self {
        match (ledger.signature, ledger.state) {
            (ERASED_WORD, ERASED_WORD) => Self::Erased,
            (LEDGER_SIGNATURE, STATE_VALID) => Self::Committed,
            (LEDGER_SIGNATURE, _) => Self::TransactionOpen,
            _ => Self::Corrupt,
        }
    }
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Erased => "erased",
            Self::TransactionOpen => "transaction open",
            Self::Committed => "committed",
            Self::Corrupt => "corrupt",
        })
    }
}

/// Events that move the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEvent {
    /// About to change the segment.
    Enter,
    /// Payload fully written after an erase.
    Exit,
}

impl LedgerState {
    /// Returns whether the segment's data must not be trusted.
    #[must_use]
    pub const fn is_in_transaction(self) -> bool {
        !matches!(self, Self::Committed)
    }

    /// Applies `event`.
    ///
    /// Returns `Some(Some(ledger))` when `ledger` must be programmed,
    /// `Some(None)` when the ledger already reflects the event, and `None`
    /// when the transition needs an erase first.
    #[must_use]
    pub const fn apply(self, event: LedgerEvent) -> Option<Option<TransactionLedger>> {
        match (self, event) {
            (Self::Erased | Self::Committed, LedgerEvent::Enter) => {
                Some(Some(TransactionLedger::OPEN))
            }
            (Self::TransactionOpen | Self::Corrupt, LedgerEvent::Enter) => Some(None),
            (Self::Erased, LedgerEvent::Exit) => Some(Some(TransactionLedger::COMMITTED)),
            (Self::Committed, LedgerEvent::Exit) => Some(None),
            (Self::TransactionOpen | Self::Corrupt, LedgerEvent::Exit) => None,
        }
    }
}
