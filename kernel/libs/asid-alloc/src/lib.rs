// SPDX-License-Identifier: MPL-2.0

//! Address Space ID (ASID) allocation.
//!
//! Translation caches (TLBs) tag their entries with a small integer, the ASID,
//! so that entries belonging to different address spaces can coexist and a
//! context switch does not have to flush everything. The hardware field is
//! narrow (8 or 16 bits on most architectures), so there are far fewer ASIDs
//! than address spaces.
//!
//! [`AsidAllocator`] hands out ASIDs, called tags here, on demand. When every
//! tag is in use, the next request steals the tag at the allocation cursor
//! from whichever address space owns it. The steal is paired with a flush of
//! that tag from the [`TranslationCache`], so no stale translation can be
//! reached through a reused tag. Tag 0 is bound to the kernel address space
//! and never takes part in the rotation.
//!
//! # Example
//!
//! ```
//! use asid_alloc::{AsidAllocator, AsidConfig, MemorySpace, Tag, TranslationCache};
//!
//! struct NoCache;
//!
//! impl TranslationCache for NoCache {
//!     fn flush_tag(&self, _tag: Tag) {}
//!     fn flush_all(&self) {}
//! }
//!
//! let allocator = AsidAllocator::new(AsidConfig::new(4, 1).unwrap(), NoCache);
//! let space = MemorySpace::new();
//!
//! assert_eq!(allocator.get_tag(&space), Tag::new(1));
//! allocator.release_tag(&space);
//! assert_eq!(space.tag(), None);
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod allocator;
mod cache;
mod config;
mod error;
mod space;
mod stats;

pub use self::{
    allocator::AsidAllocator,
    cache::TranslationCache,
    config::{AsidConfig, DEFAULT_ASID_BITS, MAX_ASID_BITS},
    error::{Error, Result},
    space::{MemorySpace, SpaceId},
    stats::{AsidStats, AsidStatsSnapshot},
};

/// An address space ID as seen by the translation cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Tag(u16);

impl Tag {
    /// The tag permanently owned by the kernel address space.
    pub const KERNEL: Tag = Tag(0);

    /// Creates a tag from its raw hardware value.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw hardware value.
    pub const fn get(self) -> u16 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
