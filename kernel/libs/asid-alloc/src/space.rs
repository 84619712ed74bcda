// SPDX-License-Identifier: MPL-2.0

use alloc::sync::Arc;
use core::{
    fmt,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use crate::Tag;

/// The value of the tag field while a space owns no tag.
///
/// It lies outside every tag range, since tags are at most 16 bits wide.
const NO_TAG: u32 = u32::MAX;

static NEXT_SPACE_ID: AtomicU64 = AtomicU64::new(0);

/// A unique identifier of a [`MemorySpace`], used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(u64);

impl SpaceId {
    /// Returns the raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The allocator's view of an address space.
///
/// An address space embeds an `Arc<MemorySpace>` and asks the
/// [`AsidAllocator`] for a tag before it is activated. The allocator keeps
/// only a weak reference to the space, so the space's lifetime stays under
/// the control of its owner.
///
/// The tag is written by the allocator alone. It may be taken away at any time
/// when another space needs a tag; the owner notices lazily, the next time it
/// asks for one. Before dropping the space, its owner should call
/// [`AsidAllocator::release_tag`].
///
/// [`AsidAllocator`]: crate::AsidAllocator
/// [`AsidAllocator::release_tag`]: crate::AsidAllocator::release_tag
pub struct MemorySpace {
    id: SpaceId,
    tag: AtomicU32,
}

impl MemorySpace {
    /// Creates a new space without a tag.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: SpaceId(NEXT_SPACE_ID.fetch_add(1, Ordering::Relaxed)),
            tag: AtomicU32::new(NO_TAG),
        })
    }

    /// Returns the identifier of the space.
    pub fn id(&self) -> SpaceId {
        self.id
    }

    /// Returns the tag currently owned by the space.
    ///
    /// The answer may be stale as soon as it is returned, since another space
    /// may evict this one concurrently.
    pub fn tag(&self) -> Option<Tag> {
        match self.tag.load(Ordering::Acquire) {
            NO_TAG => None,
            raw => Some(Tag::new(raw as u16)),
        }
    }

    /// Returns whether the space currently owns a tag.
    pub fn has_tag(&self) -> bool {
        self.tag.load(Ordering::Acquire) != NO_TAG
    }

    /// Must be called with the tag table locked.
    pub(crate) fn set_tag(&self, tag: Option<Tag>) {
        let raw = tag.map_or(NO_TAG, |tag| tag.get() as u32);
        self.tag.store(raw, Ordering::Release);
    }
}

impl fmt::Debug for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySpace")
            .field("id", &self.id)
            .field("tag", &self.tag())
            .finish()
    }
}

impl Drop for MemorySpace {
    fn drop(&mut self) {
        if let Some(tag) = self.tag()
            && tag != Tag::KERNEL
        {
            log::warn!(
                "[ASID] Space {} dropped while owning tag {}; the tag is flushed on reuse",
                self.id,
                tag
            );
        }
    }
}
