// SPDX-License-Identifier: MPL-2.0

//! The tag table and its round-robin allocation cursor.

use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};

use spin::Mutex;

use crate::{
    cache::TranslationCache, config::AsidConfig, space::MemorySpace, stats::AsidStats, Tag,
};

/// The ASID allocator.
///
/// It owns a table mapping every tag to the space currently using it and a
/// cursor walking the rotating tags in order. A space without a tag gets the
/// tag under the cursor, evicting its previous owner if there is one. Fullness
/// is therefore the steady state rather than an error: allocation always
/// succeeds in constant time.
///
/// Every table update happens under a single spin lock, and so do the
/// translation cache flushes that accompany evictions and releases. No other
/// CPU can start using a tag before its old translations are gone.
pub struct AsidAllocator<C: TranslationCache> {
    config: AsidConfig,
    cache: C,
    table: Mutex<TagTable>,
    kernel_space: Arc<MemorySpace>,
    stats: AsidStats,
}

struct TagTable {
    /// The owner of each tag. Indexed by the raw tag value.
    ///
    /// A dead weak reference means the owner was dropped without releasing the
    /// tag. The translation cache may still hold entries for it.
    slots: Vec<Option<Weak<MemorySpace>>>,
    /// The next tag to hand out. Always a rotating tag.
    next_candidate: u32,
}

impl<C: TranslationCache> AsidAllocator<C> {
    /// Creates an allocator and resets it with [`reset_all`].
    ///
    /// [`reset_all`]: Self::reset_all
    pub fn new(config: AsidConfig, cache: C) -> Self {
        let mut slots = Vec::with_capacity(config.num_tags() as usize);
        slots.resize_with(config.num_tags() as usize, || None);

        let allocator = Self {
            config,
            cache,
            table: Mutex::new(TagTable {
                slots,
                next_candidate: config.reserved_tags(),
            }),
            kernel_space: MemorySpace::new(),
            stats: AsidStats::default(),
        };
        allocator.reset_all();
        allocator
    }

    /// Ensures that `space` owns a tag and returns it.
    ///
    /// If the space still owns a tag this is a lock-free no-op. Otherwise the
    /// space receives the tag under the cursor; that tag's previous owner, if
    /// any, loses it and the translation cache is flushed for it.
    ///
    /// The returned tag may be evicted as soon as this method returns. Use
    /// [`activate`] to act on the tag while it is guaranteed to stay bound.
    ///
    /// [`activate`]: Self::activate
    pub fn get_tag(&self, space: &Arc<MemorySpace>) -> Tag {
        if let Some(tag) = space.tag() {
            self.stats.record_fast_path_hit();
            return tag;
        }

        let mut table = self.table.lock();
        self.get_tag_locked(&mut table, space)
    }

    /// Ensures that `space` owns a tag and calls `f` with it while no other
    /// space can take the tag away.
    ///
    /// This is the context switch path: `f` is where the tag is loaded into
    /// the MMU. Since the table lock is held while `f` runs, `f` must be short
    /// and must not call back into the allocator.
    pub fn activate<R>(&self, space: &Arc<MemorySpace>, f: impl FnOnce(Tag) -> R) -> R {
        let mut table = self.table.lock();
        let tag = self.get_tag_locked(&mut table, space);
        f(tag)
    }

    /// Takes the tag away from `space`, if it has one.
    ///
    /// The translation cache is flushed for the tag before it becomes free, so
    /// the next owner starts clean even though it will not flush on its own.
    ///
    /// The kernel space keeps its tag; releasing it is refused.
    pub fn release_tag(&self, space: &MemorySpace) {
        let mut table = self.table.lock();

        let Some(tag) = space.tag() else {
            return;
        };

        if !self.is_rotating(tag) {
            log::warn!(
                "[ASID] Refused to release reserved tag {} of space {}",
                tag,
                space.id()
            );
            return;
        }

        let slot = &mut table.slots[tag.index()];
        debug_assert!(
            slot.as_ref()
                .is_some_and(|owner| core::ptr::eq(owner.as_ptr(), space)),
            "tag {} is owned by another space",
            tag
        );

        self.cache.flush_tag(tag);
        self.stats.record_tag_flush();
        *slot = None;
        space.set_tag(None);
        self.stats.record_release();

        log::debug!("[ASID] Space {} released tag {}", space.id(), tag);
    }

    /// Returns every rotating tag to the free state and flushes the whole
    /// translation cache.
    ///
    /// Spaces still bound to a tag lose it. The kernel space is bound to tag 0
    /// and the cursor restarts at the first rotating tag.
    pub fn reset_all(&self) {
        let mut table = self.table.lock();
        let reserved = self.config.reserved_tags() as usize;

        for slot in table.slots[reserved..].iter_mut() {
            if let Some(owner) = slot.take().and_then(|owner| owner.upgrade()) {
                owner.set_tag(None);
            }
        }
        for slot in table.slots[1..reserved].iter_mut() {
            *slot = None;
        }

        self.cache.flush_all();
        self.stats.record_full_flush();

        table.slots[Tag::KERNEL.index()] = Some(Arc::downgrade(&self.kernel_space));
        self.kernel_space.set_tag(Some(Tag::KERNEL));
        table.next_candidate = self.config.reserved_tags();

        log::info!(
            "[ASID] Reset {} tags ({} reserved)",
            self.config.num_tags(),
            self.config.reserved_tags()
        );
    }

    /// Returns the space owning `tag`, if it is alive.
    pub fn owner_of(&self, tag: Tag) -> Option<Arc<MemorySpace>> {
        let table = self.table.lock();
        table.slots.get(tag.index())?.as_ref()?.upgrade()
    }

    /// Returns the tag the next allocation will hand out.
    pub fn next_candidate(&self) -> Tag {
        Tag::new(self.table.lock().next_candidate as u16)
    }

    /// Returns the kernel space, which owns tag 0 for the whole lifetime of
    /// the allocator.
    pub fn kernel_space(&self) -> &Arc<MemorySpace> {
        &self.kernel_space
    }

    /// Returns the configuration.
    pub fn config(&self) -> &AsidConfig {
        &self.config
    }

    /// Returns the translation cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Returns the event counters.
    pub fn stats(&self) -> &AsidStats {
        &self.stats
    }

    fn get_tag_locked(&self, table: &mut TagTable, space: &Arc<MemorySpace>) -> Tag {
        // Another CPU may have assigned a tag since any lock-free check.
        if let Some(tag) = space.tag() {
            self.stats.record_fast_path_hit();
            return tag;
        }
        self.assign(table, space)
    }

    fn assign(&self, table: &mut TagTable, space: &Arc<MemorySpace>) -> Tag {
        let tag = Tag::new(table.next_candidate as u16);
        let slot = &mut table.slots[tag.index()];

        if let Some(victim) = slot.take() {
            self.cache.flush_tag(tag);
            self.stats.record_tag_flush();

            match victim.upgrade() {
                Some(victim) => {
                    victim.set_tag(None);
                    self.stats.record_eviction();
                    log::debug!(
                        "[ASID] Tag {} evicted from space {} for space {}",
                        tag,
                        victim.id(),
                        space.id()
                    );
                }
                None => {
                    self.stats.record_stale_slot();
                    log::debug!("[ASID] Tag {} reclaimed from a dropped space", tag);
                }
            }
        }

        *slot = Some(Arc::downgrade(space));
        space.set_tag(Some(tag));
        self.stats.record_assignment();
        log::trace!("[ASID] Tag {} assigned to space {}", tag, space.id());

        table.next_candidate += 1;
        if table.next_candidate == self.config.num_tags() {
            table.next_candidate = self.config.reserved_tags();
            self.stats.record_wrap();
        }

        tag
    }

    fn is_rotating(&self, tag: Tag) -> bool {
        (self.config.reserved_tags()..self.config.num_tags()).contains(&(tag.get() as u32))
    }
}
