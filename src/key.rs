//! Packed deadline keys.
//!
//! A deadline is stored as a single sortable 64-bit value: the high bits carry
//! the deadline time in milliseconds since the Unix epoch, the low bits carry a
//! per-millisecond sequence number. Natural integer ordering of the packed
//! value is therefore chronological ordering, with the sequence breaking ties
//! among deadlines registered for the same millisecond.
//!
//! The packed value doubles as the public identifier: the id returned by
//! [`schedule`](crate::DeadlineEngine::schedule) *is* the key, so cancellation
//! needs no side table mapping ids to entries.

use core::fmt;

/// A scheduled deadline's identifier and ordering key.
///
/// Layout (most significant bit first):
///
/// ```text
/// | 44 bits: time in ms since Unix epoch | 20 bits: sequence |
/// ```
///
/// 44 bits of milliseconds cover roughly 557 years; 20 bits of sequence allow
/// 1,048,576 deadlines within a single millisecond.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeadlineId(u64);

impl DeadlineId {
    /// Number of low bits reserved for the per-millisecond sequence.
    pub const SEQ_BITS: u32 = 20;

    /// Mask selecting the sequence bits; also the largest sequence value.
    pub const MAX_SEQ: u64 = (1 << Self::SEQ_BITS) - 1;

    /// Largest representable deadline time in milliseconds since the epoch.
    ///
    /// A time above this would shift into the sign-free overflow region of the
    /// packed value; [`schedule`](crate::DeadlineEngine::schedule) and
    /// [`poll`](crate::DeadlineEngine::poll) reject it instead of truncating.
    pub const MAX_TIME_MS: u64 = (1 << (u64::BITS - Self::SEQ_BITS)) - 1;

    /// Packs a time and sequence into a key.
    ///
    /// Callers guarantee `time_ms <= MAX_TIME_MS` and `seq <= MAX_SEQ`.
    pub(crate) const fn pack(time_ms: u64, seq: u64) -> Self {
        debug_assert!(time_ms <= Self::MAX_TIME_MS);
        debug_assert!(seq <= Self::MAX_SEQ);
        Self((time_ms << Self::SEQ_BITS) | seq)
    }

    /// First key of the slot for `time_ms` (sequence 0).
    pub(crate) const fn slot_first(time_ms: u64) -> Self {
        Self::pack(time_ms, 0)
    }

    /// Last key of the slot for `time_ms` (sequence `MAX_SEQ`).
    pub(crate) const fn slot_last(time_ms: u64) -> Self {
        Self::pack(time_ms, Self::MAX_SEQ)
    }

    /// The key immediately after this one within the same millisecond, or
    /// `None` when the sequence field is saturated.
    pub(crate) const fn next_seq(self) -> Option<Self> {
        if self.seq() == Self::MAX_SEQ {
            None
        } else {
            Some(Self(self.0 + 1))
        }
    }

    /// Reconstructs a key from its raw packed value.
    ///
    /// The inverse of [`into_raw`](Self::into_raw), for callers that persist
    /// or transmit ids as plain integers.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw packed value.
    #[must_use]
    pub const fn into_raw(self) -> u64 {
        self.0
    }

    /// Deadline time in milliseconds since the Unix epoch.
    #[must_use]
    pub const fn time_ms(self) -> u64 {
        self.0 >> Self::SEQ_BITS
    }

    /// Sequence number within the deadline's millisecond.
    #[must_use]
    pub const fn seq(self) -> u64 {
        self.0 & Self::MAX_SEQ
    }
}

impl fmt::Debug for DeadlineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeadlineId({}ms+{})", self.time_ms(), self.seq())
    }
}

impl fmt::Display for DeadlineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_round_trips_fields() {
        let id = DeadlineId::pack(1_234_567, 42);
        assert_eq!(id.time_ms(), 1_234_567);
        assert_eq!(id.seq(), 42);
        assert_eq!(DeadlineId::from_raw(id.into_raw()), id);
    }

    #[test]
    fn ordering_is_time_then_sequence() {
        let early_first = DeadlineId::pack(100, 0);
        let early_last = DeadlineId::pack(100, DeadlineId::MAX_SEQ);
        let late_first = DeadlineId::pack(101, 0);

        assert!(early_first < early_last);
        assert!(early_last < late_first);
    }

    #[test]
    fn slot_bounds_bracket_every_sequence() {
        let first = DeadlineId::slot_first(500);
        let last = DeadlineId::slot_last(500);
        let mid = DeadlineId::pack(500, 12_345);

        assert!(first <= mid && mid <= last);
        assert_eq!(last.into_raw() - first.into_raw(), DeadlineId::MAX_SEQ);
    }

    #[test]
    fn next_seq_stops_at_saturation() {
        let id = DeadlineId::pack(7, 3);
        assert_eq!(id.next_seq(), Some(DeadlineId::pack(7, 4)));

        let full = DeadlineId::slot_last(7);
        assert_eq!(full.next_seq(), None);
    }

    #[test]
    fn max_time_fits_without_overflow() {
        let id = DeadlineId::slot_last(DeadlineId::MAX_TIME_MS);
        assert_eq!(id.into_raw(), u64::MAX);
        assert_eq!(id.time_ms(), DeadlineId::MAX_TIME_MS);
        assert_eq!(id.seq(), DeadlineId::MAX_SEQ);
    }

    #[test]
    fn horizon_covers_decades_of_wall_clock() {
        // 2^44 ms is on the order of 500 years past the epoch.
        let years = DeadlineId::MAX_TIME_MS / (1000 * 60 * 60 * 24 * 365);
        assert!(years > 500);
    }
}
