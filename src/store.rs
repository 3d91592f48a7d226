//! Ordered storage for pending deadlines.
//!
//! The store is a `BTreeSet` of packed keys behind a reader/writer lock.
//! Because the packed key orders by time first, every time-based question is
//! a range query: "which sequences exist at millisecond T" is the range
//! `[slot_first(T), slot_last(T)]`, and "what is due at now" is everything
//! up to `slot_last(now)`.
//!
//! Every mutation runs its full read-then-write sequence under one write
//! lock acquisition. Sequence assignment in particular must not race: two
//! concurrent inserts at the same millisecond that both observed the same
//! maximum would collide.

use std::collections::BTreeSet;

use parking_lot::RwLock;

use crate::error::ScheduleError;
use crate::key::DeadlineId;

/// The pending-deadline set.
#[derive(Debug, Default)]
pub(crate) struct DeadlineStore {
    entries: RwLock<BTreeSet<DeadlineId>>,
}

impl DeadlineStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a deadline at `time_ms`, assigning the next free sequence.
    ///
    /// The first deadline at a millisecond gets sequence 0; later ones get
    /// one past the current maximum, so cancelled sequences are not reused.
    pub(crate) fn insert_for_time(&self, time_ms: u64) -> Result<DeadlineId, ScheduleError> {
        ensure_within_horizon(time_ms)?;
        let first = DeadlineId::slot_first(time_ms);
        let last = DeadlineId::slot_last(time_ms);

        let mut entries = self.entries.write();
        let id = match entries.range(first..=last).next_back() {
            None => first,
            Some(&occupied) => occupied
                .next_seq()
                .ok_or(ScheduleError::SlotsExhausted { time_ms })?,
        };
        let inserted = entries.insert(id);
        debug_assert!(inserted, "assigned sequence must be free");
        Ok(id)
    }

    /// Removes `id`, returning whether it was present.
    pub(crate) fn remove(&self, id: DeadlineId) -> bool {
        self.entries.write().remove(&id)
    }

    /// Removes and returns up to `limit` keys with time at or before
    /// `now_ms`, in ascending key order.
    ///
    /// Keys with a later time are never touched; keys past `limit` stay for
    /// a future call.
    pub(crate) fn take_due(
        &self,
        now_ms: u64,
        limit: usize,
    ) -> Result<Vec<DeadlineId>, ScheduleError> {
        ensure_within_horizon(now_ms)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let bound = DeadlineId::slot_last(now_ms);

        let mut entries = self.entries.write();
        let mut due = Vec::new();
        while due.len() < limit {
            match entries.first() {
                Some(&id) if id <= bound => {
                    entries.pop_first();
                    due.push(id);
                }
                _ => break,
            }
        }
        Ok(due)
    }

    /// Number of pending deadlines.
    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Rejects times whose packed form would not fit the key's time field.
fn ensure_within_horizon(time_ms: u64) -> Result<(), ScheduleError> {
    if time_ms > DeadlineId::MAX_TIME_MS {
        return Err(ScheduleError::horizon(time_ms));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn first_insert_at_a_millisecond_gets_sequence_zero() {
        init_test("first_insert_at_a_millisecond_gets_sequence_zero");
        let store = DeadlineStore::new();
        let id = store.insert_for_time(5_000).unwrap();
        crate::assert_with_log!(id.seq() == 0, "first sequence", 0, id.seq());
        crate::assert_with_log!(id.time_ms() == 5_000, "time preserved", 5_000, id.time_ms());
        crate::test_complete!("first_insert_at_a_millisecond_gets_sequence_zero");
    }

    #[test]
    fn same_millisecond_inserts_get_adjacent_ids() {
        init_test("same_millisecond_inserts_get_adjacent_ids");
        let store = DeadlineStore::new();
        let a = store.insert_for_time(123).unwrap();
        let b = store.insert_for_time(123).unwrap();
        let c = store.insert_for_time(123).unwrap();

        crate::assert_with_log!(
            b.into_raw() == a.into_raw() + 1,
            "second id is first plus one",
            a.into_raw() + 1,
            b.into_raw()
        );
        crate::assert_with_log!(
            c.into_raw() == b.into_raw() + 1,
            "third id is second plus one",
            b.into_raw() + 1,
            c.into_raw()
        );
        crate::test_complete!("same_millisecond_inserts_get_adjacent_ids");
    }

    #[test]
    fn cancelled_sequence_is_not_reused() {
        init_test("cancelled_sequence_is_not_reused");
        let store = DeadlineStore::new();
        let a = store.insert_for_time(77).unwrap();
        let b = store.insert_for_time(77).unwrap();
        assert!(store.remove(a));

        let c = store.insert_for_time(77).unwrap();
        crate::assert_with_log!(
            c.into_raw() == b.into_raw() + 1,
            "assignment continues past the hole",
            b.into_raw() + 1,
            c.into_raw()
        );
        crate::test_complete!("cancelled_sequence_is_not_reused");
    }

    #[test]
    fn remove_is_true_once_then_false() {
        init_test("remove_is_true_once_then_false");
        let store = DeadlineStore::new();
        let id = store.insert_for_time(42).unwrap();

        assert!(store.remove(id));
        assert!(!store.remove(id));
        crate::assert_with_log!(store.len() == 0, "store emptied", 0, store.len());
        crate::test_complete!("remove_is_true_once_then_false");
    }

    #[test]
    fn horizon_is_enforced_on_insert_and_drain() {
        init_test("horizon_is_enforced_on_insert_and_drain");
        let store = DeadlineStore::new();
        let over = DeadlineId::MAX_TIME_MS + 1;

        let insert_err = store.insert_for_time(over).unwrap_err();
        assert!(matches!(insert_err, ScheduleError::HorizonExceeded { .. }));

        let drain_err = store.take_due(over, 10).unwrap_err();
        assert!(matches!(drain_err, ScheduleError::HorizonExceeded { .. }));

        // The boundary itself is accepted.
        assert!(store.insert_for_time(DeadlineId::MAX_TIME_MS).is_ok());
        crate::test_complete!("horizon_is_enforced_on_insert_and_drain");
    }

    #[test]
    fn take_due_respects_limit_and_bound() {
        init_test("take_due_respects_limit_and_bound");
        let store = DeadlineStore::new();
        let due_a = store.insert_for_time(100).unwrap();
        let due_b = store.insert_for_time(101).unwrap();
        let future = store.insert_for_time(10_000).unwrap();

        let first = store.take_due(200, 1).unwrap();
        crate::assert_with_log!(first.len() == 1, "limit caps the drain", 1, first.len());
        assert_eq!(first, vec![due_a]);

        let rest = store.take_due(200, 10).unwrap();
        assert_eq!(rest, vec![due_b]);
        crate::assert_with_log!(store.len() == 1, "future entry remains", 1, store.len());
        assert!(store.remove(future));
        crate::test_complete!("take_due_respects_limit_and_bound");
    }

    #[test]
    fn take_due_includes_every_sequence_at_now() {
        init_test("take_due_includes_every_sequence_at_now");
        let store = DeadlineStore::new();
        for _ in 0..5 {
            store.insert_for_time(300).unwrap();
        }

        let due = store.take_due(300, 10).unwrap();
        crate::assert_with_log!(due.len() == 5, "all sequences at now drain", 5, due.len());
        crate::test_complete!("take_due_includes_every_sequence_at_now");
    }

    #[test]
    fn take_due_with_zero_limit_is_a_no_op() {
        init_test("take_due_with_zero_limit_is_a_no_op");
        let store = DeadlineStore::new();
        store.insert_for_time(10).unwrap();

        let due = store.take_due(10, 0).unwrap();
        assert!(due.is_empty());
        crate::assert_with_log!(store.len() == 1, "entry untouched", 1, store.len());
        crate::test_complete!("take_due_with_zero_limit_is_a_no_op");
    }

    #[test]
    fn take_due_is_ascending() {
        init_test("take_due_is_ascending");
        let store = DeadlineStore::new();
        store.insert_for_time(30).unwrap();
        store.insert_for_time(10).unwrap();
        store.insert_for_time(20).unwrap();
        store.insert_for_time(10).unwrap();

        let due = store.take_due(100, 10).unwrap();
        let mut sorted = due.clone();
        sorted.sort_unstable();
        assert_eq!(due, sorted);
        crate::test_complete!("take_due_is_ascending");
    }

    #[test]
    fn sequence_exhaustion_reports_and_leaves_store_intact() {
        init_test("sequence_exhaustion_reports_and_leaves_store_intact");
        let store = DeadlineStore::new();
        // Plant the maximum sequence directly; filling 2^20 slots one by one
        // is needless here.
        store
            .entries
            .write()
            .insert(DeadlineId::slot_last(9));
        assert_eq!(store.len(), 1);

        let err = store.insert_for_time(9).unwrap_err();
        assert_eq!(err, ScheduleError::SlotsExhausted { time_ms: 9 });
        crate::assert_with_log!(store.len() == 1, "store untouched", 1, store.len());

        // The neighbouring millisecond is unaffected.
        let next = store.insert_for_time(10).unwrap();
        crate::assert_with_log!(next.seq() == 0, "no wrap into next ms", 0, next.seq());
        crate::test_complete!("sequence_exhaustion_reports_and_leaves_store_intact");
    }
}
