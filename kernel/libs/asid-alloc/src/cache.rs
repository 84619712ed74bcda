// SPDX-License-Identifier: MPL-2.0

use alloc::sync::Arc;

use crate::Tag;

/// A cache of address translations tagged by ASID, typically the TLB.
///
/// The allocator calls these methods while holding its table lock. They must
/// not return before the invalidation is complete on every CPU that may hold
/// the entries, and they must not block or call back into the allocator.
pub trait TranslationCache {
    /// Invalidates every translation tagged with `tag`.
    fn flush_tag(&self, tag: Tag);

    /// Invalidates every translation.
    fn flush_all(&self);
}

impl<C: TranslationCache + ?Sized> TranslationCache for &C {
    fn flush_tag(&self, tag: Tag) {
        (**self).flush_tag(tag)
    }

    fn flush_all(&self) {
        (**self).flush_all()
    }
}

impl<C: TranslationCache + ?Sized> TranslationCache for Arc<C> {
    fn flush_tag(&self, tag: Tag) {
        (**self).flush_tag(tag)
    }

    fn flush_all(&self) {
        (**self).flush_all()
    }
}
