// SPDX-License-Identifier: MPL-2.0

//! A software translation lookaside buffer.
//!
//! [`SoftTlb`] caches virtual-to-physical page translations the way a
//! hardware TLB with ASID support does: every entry carries the tag of the
//! address space it was filled for, and a lookup only hits entries of the
//! requested tag. It implements [`TranslationCache`], so it can stand in for
//! the hardware behind an [`AsidAllocator`] and make flushes observable.
//!
//! [`AsidAllocator`]: asid_alloc::AsidAllocator

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

use alloc::{vec, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use asid_alloc::{Tag, TranslationCache};
use spin::Mutex;

/// Virtual addresses.
pub type Vaddr = usize;

/// Physical addresses.
pub type Paddr = usize;

/// The size of a page.
pub const PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct TlbEntry {
    tag: Tag,
    vpn: usize,
    ppn: usize,
}

struct Entries {
    slots: Vec<Option<TlbEntry>>,
    /// The slot to replace when the TLB is full.
    victim: usize,
}

/// A fully associative, ASID-tagged TLB with round-robin replacement.
pub struct SoftTlb {
    entries: Mutex<Entries>,
    tag_flushes: AtomicU64,
    full_flushes: AtomicU64,
}

impl SoftTlb {
    /// Creates an empty TLB.
    ///
    /// The capacity is rounded up to the next power of two.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a TLB needs at least one entry");

        Self {
            entries: Mutex::new(Entries {
                slots: vec![None; capacity.next_power_of_two()],
                victim: 0,
            }),
            tag_flushes: AtomicU64::new(0),
            full_flushes: AtomicU64::new(0),
        }
    }

    /// Looks up the translation of `vaddr` for the address space owning `tag`.
    ///
    /// Returns the physical address, page offset included.
    pub fn lookup(&self, tag: Tag, vaddr: Vaddr) -> Option<Paddr> {
        let vpn = vaddr / PAGE_SIZE;
        let entries = self.entries.lock();
        entries
            .slots
            .iter()
            .flatten()
            .find(|entry| entry.tag == tag && entry.vpn == vpn)
            .map(|entry| entry.ppn * PAGE_SIZE + vaddr % PAGE_SIZE)
    }

    /// Caches the translation of the page containing `vaddr` to the page
    /// containing `paddr`.
    ///
    /// An existing entry for the same page and tag is overwritten. Otherwise
    /// a free slot is used, or the slot under the replacement cursor.
    pub fn insert(&self, tag: Tag, vaddr: Vaddr, paddr: Paddr) {
        let entry = TlbEntry {
            tag,
            vpn: vaddr / PAGE_SIZE,
            ppn: paddr / PAGE_SIZE,
        };

        let mut entries = self.entries.lock();
        let index = entries
            .slots
            .iter()
            .position(|slot| {
                slot.is_some_and(|old| old.tag == entry.tag && old.vpn == entry.vpn)
            })
            .or_else(|| entries.slots.iter().position(Option::is_none))
            .unwrap_or_else(|| {
                let victim = entries.victim;
                entries.victim = (victim + 1) % entries.slots.len();
                victim
            });
        entries.slots[index] = Some(entry);
    }

    /// Invalidates the translation of `vaddr` for `tag`.
    pub fn flush_addr(&self, tag: Tag, vaddr: Vaddr) {
        let vpn = vaddr / PAGE_SIZE;
        let mut entries = self.entries.lock();
        for slot in entries.slots.iter_mut() {
            if slot.is_some_and(|entry| entry.tag == tag && entry.vpn == vpn) {
                *slot = None;
            }
        }
    }

    /// Returns the number of valid entries.
    pub fn len(&self) -> usize {
        self.entries.lock().slots.iter().flatten().count()
    }

    /// Returns whether the TLB holds no valid entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of entries the TLB can hold.
    pub fn capacity(&self) -> usize {
        self.entries.lock().slots.len()
    }

    /// Returns how many times a single tag was flushed.
    pub fn tag_flushes(&self) -> u64 {
        self.tag_flushes.load(Ordering::Relaxed)
    }

    /// Returns how many times the whole TLB was flushed.
    pub fn full_flushes(&self) -> u64 {
        self.full_flushes.load(Ordering::Relaxed)
    }
}

impl TranslationCache for SoftTlb {
    fn flush_tag(&self, tag: Tag) {
        let mut entries = self.entries.lock();
        let mut flushed = 0;
        for slot in entries.slots.iter_mut() {
            if slot.is_some_and(|entry| entry.tag == tag) {
                *slot = None;
                flushed += 1;
            }
        }
        self.tag_flushes.fetch_add(1, Ordering::Relaxed);
        log::trace!("[TLB] Flushed {} entries of tag {}", flushed, tag);
    }

    fn flush_all(&self) {
        let mut entries = self.entries.lock();
        entries.slots.fill(None);
        entries.victim = 0;
        self.full_flushes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use asid_alloc::{AsidAllocator, AsidConfig, MemorySpace};

    use super::*;

    const A: Tag = Tag::new(1);
    const B: Tag = Tag::new(2);

    #[test]
    fn lookup_respects_tags() {
        let tlb = SoftTlb::new(8);
        tlb.insert(A, 0x1000, 0x8000);
        tlb.insert(B, 0x1000, 0x9000);

        assert_eq!(tlb.lookup(A, 0x1234), Some(0x8234));
        assert_eq!(tlb.lookup(B, 0x1234), Some(0x9234));
        assert_eq!(tlb.lookup(A, 0x2000), None);
        assert_eq!(tlb.len(), 2);
    }

    #[test]
    fn insert_overwrites_same_page() {
        let tlb = SoftTlb::new(4);
        tlb.insert(A, 0x1000, 0x8000);
        tlb.insert(A, 0x1fff, 0xa000);

        assert_eq!(tlb.len(), 1);
        assert_eq!(tlb.lookup(A, 0x1000), Some(0xa000));
    }

    #[test]
    fn replacement_is_round_robin() {
        let tlb = SoftTlb::new(3);
        assert_eq!(tlb.capacity(), 4);

        for page in 0..4 {
            tlb.insert(A, page * PAGE_SIZE, (page + 16) * PAGE_SIZE);
        }
        tlb.insert(A, 4 * PAGE_SIZE, 20 * PAGE_SIZE);
        assert_eq!(tlb.lookup(A, 0), None);
        assert!(tlb.lookup(A, PAGE_SIZE).is_some());

        tlb.insert(A, 5 * PAGE_SIZE, 21 * PAGE_SIZE);
        assert_eq!(tlb.lookup(A, PAGE_SIZE), None);
        assert_eq!(tlb.len(), 4);
    }

    #[test]
    fn flushes() {
        let tlb = SoftTlb::new(8);
        tlb.insert(A, 0x1000, 0x8000);
        tlb.insert(A, 0x2000, 0x9000);
        tlb.insert(B, 0x1000, 0xa000);

        tlb.flush_addr(A, 0x2000);
        assert_eq!(tlb.lookup(A, 0x2000), None);
        assert_eq!(tlb.len(), 2);

        tlb.flush_tag(A);
        assert_eq!(tlb.lookup(A, 0x1000), None);
        assert_eq!(tlb.lookup(B, 0x1000), Some(0xa000));
        assert_eq!(tlb.tag_flushes(), 1);

        tlb.flush_all();
        assert!(tlb.is_empty());
        assert_eq!(tlb.full_flushes(), 1);
    }

    #[test]
    fn reused_tag_starts_clean() {
        let allocator = AsidAllocator::new(AsidConfig::new(3, 1).unwrap(), SoftTlb::new(16));
        let tlb = allocator.cache();
        let [a, b, c] = [(); 3].map(|_| MemorySpace::new());

        let tag_a = allocator.get_tag(&a);
        tlb.insert(tag_a, 0x4000, 0x10000);
        let tag_b = allocator.get_tag(&b);
        tlb.insert(tag_b, 0x4000, 0x20000);

        // `c` takes the tag of `a`, and must not see its translations.
        let tag_c = allocator.get_tag(&c);
        assert_eq!(tag_c, tag_a);
        assert_eq!(tlb.lookup(tag_c, 0x4000), None);
        assert_eq!(tlb.lookup(tag_b, 0x4000), Some(0x20000));

        allocator.release_tag(&b);
        assert_eq!(tlb.lookup(tag_b, 0x4000), None);
        assert_eq!(tlb.tag_flushes(), 2);
        assert_eq!(tlb.full_flushes(), 1);
    }
}
