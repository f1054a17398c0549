//! Property-based test generators using proptest.
//!
//! Provides strategies for segment types, payloads, flash geometries and
//! sequences of host-loop operations against the guard band.

use lonstore_core::SegmentType;
use lonstore_flash::FlashGeometry;
use proptest::prelude::*;

/// Strategy for any segment type.
pub fn segment_type_strategy() -> impl Strategy<Value = SegmentType> {
    prop::sample::select(SegmentType::ALL.to_vec())
}

/// Strategy for payloads of at most `max_len` bytes.
pub fn payload_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Strategy for uniform geometries with power-of-two blocks of 32 to 1024
/// bytes, a block-aligned region offset, and 4 to 64 blocks.
pub fn geometry_strategy() -> impl Strategy<Value = FlashGeometry> {
    (5u32..=10, 0u64..4, 4u64..=64).prop_map(|(shift, offset_blocks, count)| {
        let block_size = 1u64 << shift;
        FlashGeometry::uniform(offset_blocks * block_size, block_size, count)
    })
}

/// Strategy for distinct segments, in ordinal order, with maximum payload
/// sizes up to `max_payload`.
pub fn capacities_strategy(max_payload: usize) -> impl Strategy<Value = Vec<(SegmentType, usize)>> {
    prop::sample::subsequence(SegmentType::ALL.to_vec(), 1..=SegmentType::COUNT)
        .prop_flat_map(move |segments| {
            let len = segments.len();
            (Just(segments), prop::collection::vec(0..=max_payload, len))
        })
        .prop_map(|(segments, sizes)| segments.into_iter().zip(sizes).collect())
}

/// One step of a host loop driving the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    /// Mark a segment dirty.
    MarkDirty(SegmentType),
    /// Let time pass.
    Advance {
        /// Milliseconds to advance.
        millis: u64,
    },
    /// Run a commit check.
    CommitCheck,
    /// Request a forced commit.
    ForceCommit,
}

/// Strategy for one host-loop step.
pub fn host_op_strategy() -> impl Strategy<Value = HostOp> {
    prop_oneof![
        3 => segment_type_strategy().prop_map(HostOp::MarkDirty),
        3 => (0u64..1500).prop_map(|millis| HostOp::Advance { millis }),
        3 => Just(HostOp::CommitCheck),
        1 => Just(HostOp::ForceCommit),
    ]
}

/// Strategy for a sequence of host-loop steps.
pub fn host_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<HostOp>> {
    prop::collection::vec(host_op_strategy(), 1..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn geometries_are_valid(geometry in geometry_strategy()) {
            prop_assert!(geometry.validate().is_ok());
            prop_assert_eq!(geometry.region_offset % geometry.block_size, 0);
        }

        #[test]
        fn capacities_are_distinct_and_ordered(capacities in capacities_strategy(100)) {
            let ordinals: Vec<_> = capacities.iter().map(|(s, _)| s.ordinal()).collect();
            prop_assert!(ordinals.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(capacities.iter().all(|(_, max)| *max <= 100));
        }

        #[test]
        fn payloads_respect_bound(payload in payload_strategy(16)) {
            prop_assert!(payload.len() <= 16);
        }
    }
}
