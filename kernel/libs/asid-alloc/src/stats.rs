// SPDX-License-Identifier: MPL-2.0

//! Allocation statistics.

use core::sync::atomic::{AtomicU64, Ordering};

/// Event counters of an [`AsidAllocator`].
///
/// Counters are updated with relaxed ordering, so a snapshot taken while
/// other CPUs allocate may mix values from different moments.
///
/// [`AsidAllocator`]: crate::AsidAllocator
#[derive(Debug, Default)]
pub struct AsidStats {
    assignments: AtomicU64,
    fast_path_hits: AtomicU64,
    evictions: AtomicU64,
    stale_slots: AtomicU64,
    releases: AtomicU64,
    tag_flushes: AtomicU64,
    full_flushes: AtomicU64,
    wraps: AtomicU64,
}

/// A point-in-time copy of [`AsidStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AsidStatsSnapshot {
    /// Tags bound to a space that had none.
    pub assignments: u64,
    /// Requests for a space that already owned a tag, whether or not they took
    /// the lock.
    pub fast_path_hits: u64,
    /// Tags taken away from a live space.
    pub evictions: u64,
    /// Tags reclaimed from a space that was dropped without releasing them.
    pub stale_slots: u64,
    /// Tags given back explicitly.
    pub releases: u64,
    /// Per-tag translation cache flushes.
    pub tag_flushes: u64,
    /// Whole translation cache flushes.
    pub full_flushes: u64,
    /// Times the allocation cursor wrapped around.
    pub wraps: u64,
}

macro_rules! counters {
    ($($record:ident => $field:ident),* $(,)?) => {
        impl AsidStats {
            $(
                pub(crate) fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Takes a snapshot of all counters.
            pub fn snapshot(&self) -> AsidStatsSnapshot {
                AsidStatsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    record_assignment => assignments,
    record_fast_path_hit => fast_path_hits,
    record_eviction => evictions,
    record_stale_slot => stale_slots,
    record_release => releases,
    record_tag_flush => tag_flushes,
    record_full_flush => full_flushes,
    record_wrap => wraps,
}
