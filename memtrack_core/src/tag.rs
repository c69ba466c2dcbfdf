//! Memory tags and the name table behind them.
//!
//! A tag is a small integer identifying the subsystem responsible for a
//! range (GC heap, code cache, thread stacks, ...). The tree and the summary
//! counters only ever see the integer; translating to and from the
//! user-visible name happens at the tracker surface through [`TagNameTable`].
//!
//! The table is append-only. Names live in one flat zero-delimited byte
//! buffer; a per-tag offset array resolves tag to name and a small bucket
//! chain resolves name to tag. It performs no synchronization of its own and
//! relies on the caller's critical section, like the rest of the tracker
//! state.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// A memory category. Bounded universe of [`MemTag::MAX_TAGS`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemTag(u8);

impl MemTag {
    /// Upper bound on the number of distinct tags, including the sentinel.
    pub const MAX_TAGS: usize = 256;

    /// "No category". The only tag legal on released intervals, and the
    /// value returned when the tag namespace overflows.
    pub const NONE: MemTag = MemTag(0);
    /// The tracker's own bookkeeping allocations.
    pub const NMT: MemTag = MemTag(1);
    /// Thread stack regions registered by the thread lifecycle subsystem.
    pub const THREAD_STACK: MemTag = MemTag(2);
    /// Collector-managed heap ranges.
    pub const GC: MemTag = MemTag(3);
    /// Generated-code ranges.
    pub const CODE: MemTag = MemTag(4);
    /// Class and metadata storage.
    pub const CLASS: MemTag = MemTag(5);

    /// The tag with the given table index, if it is in range.
    pub fn from_index(index: usize) -> Option<MemTag> {
        if index < Self::MAX_TAGS {
            Some(MemTag(index as u8))
        } else {
            None
        }
    }

    /// Index of this tag into per-tag arrays.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this is the sentinel tag.
    #[inline]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Names of the pre-registered tags, in tag order.
const WELL_KNOWN: [&str; 6] = ["none", "nmt", "thread_stack", "gc", "code", "class"];

const BUCKET_COUNT: usize = 4096;

/// Chain link sentinel for bucket lists.
const NIL: u32 = u32::MAX;

/// Offset of a zero-delimited name in the flat buffer.
type StringRef = u32;

struct Entry {
    name: StringRef,
    tag: MemTag,
    next: u32,
}

/// Append-only two-way mapping between tag names and [`MemTag`] values.
pub struct TagNameTable {
    /// Flat buffer of zero-delimited names.
    names: Vec<u8>,
    /// Indexed by tag; offset of that tag's name.
    tag_to_name: Vec<StringRef>,
    entries: Vec<Entry>,
    buckets: Vec<u32>,
    overflow_reported: bool,
}

impl TagNameTable {
    /// Create a table pre-seeded with the well-known tags.
    pub fn new() -> Self {
        let mut table = Self {
            names: Vec::new(),
            tag_to_name: Vec::new(),
            entries: Vec::new(),
            buckets: vec![NIL; BUCKET_COUNT],
            overflow_reported: false,
        };
        for name in WELL_KNOWN {
            table.make_tag(name);
        }
        table
    }

    /// Number of registered tags.
    pub fn len(&self) -> usize {
        self.tag_to_name.len()
    }

    /// Whether no tag is registered. Never true: the sentinel is pre-seeded.
    pub fn is_empty(&self) -> bool {
        self.tag_to_name.is_empty()
    }

    /// The name registered for `tag`, or the sentinel's name when the tag
    /// was never registered.
    pub fn name_of(&self, tag: MemTag) -> &str {
        let offset = self
            .tag_to_name
            .get(tag.index())
            .copied()
            .unwrap_or(0) as usize;
        let rest = &self.names[offset..];
        let len = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        // Names are only ever installed from &str input.
        std::str::from_utf8(&rest[..len]).unwrap_or("none")
    }

    /// The tag registered under `name`, or [`MemTag::NONE`] when absent.
    pub fn tag_of(&self, name: &str) -> MemTag {
        self.lookup(name).unwrap_or(MemTag::NONE)
    }

    /// Return the tag for `name`, registering a fresh one when absent.
    ///
    /// When the namespace is exhausted this returns [`MemTag::NONE`] and
    /// reports the overflow once.
    pub fn make_tag(&mut self, name: &str) -> MemTag {
        if let Some(existing) = self.lookup(name) {
            return existing;
        }
        let Some(tag) = MemTag::from_index(self.tag_to_name.len()) else {
            if !self.overflow_reported {
                self.overflow_reported = true;
                log::warn!("memory tag namespace exhausted; further tags map to none");
            }
            return MemTag::NONE;
        };
        let offset = self.intern(name);
        self.tag_to_name.push(offset);

        let bucket = Self::bucket_of(name);
        self.entries.push(Entry {
            name: offset,
            tag,
            next: self.buckets[bucket],
        });
        self.buckets[bucket] = (self.entries.len() - 1) as u32;
        tag
    }

    /// Whether the namespace overflowed at some point.
    pub fn overflowed(&self) -> bool {
        self.overflow_reported
    }

    fn lookup(&self, name: &str) -> Option<MemTag> {
        let mut link = self.buckets[Self::bucket_of(name)];
        while link != NIL {
            let entry = &self.entries[link as usize];
            if self.name_at(entry.name) == name.as_bytes() {
                return Some(entry.tag);
            }
            link = entry.next;
        }
        None
    }

    fn intern(&mut self, name: &str) -> StringRef {
        let offset = self.names.len() as StringRef;
        self.names.extend_from_slice(name.as_bytes());
        self.names.push(0);
        offset
    }

    fn name_at(&self, offset: StringRef) -> &[u8] {
        let rest = &self.names[offset as usize..];
        let len = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        &rest[..len]
    }

    fn bucket_of(name: &str) -> usize {
        let mut hasher = FxHasher::default();
        name.hash(&mut hasher);
        (hasher.finish() % BUCKET_COUNT as u64) as usize
    }
}

impl Default for TagNameTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_tags_are_seeded() {
        let table = TagNameTable::new();
        assert_eq!(table.tag_of("none"), MemTag::NONE);
        assert_eq!(table.tag_of("nmt"), MemTag::NMT);
        assert_eq!(table.tag_of("thread_stack"), MemTag::THREAD_STACK);
        assert_eq!(table.tag_of("gc"), MemTag::GC);
        assert_eq!(table.tag_of("code"), MemTag::CODE);
        assert_eq!(table.tag_of("class"), MemTag::CLASS);
        assert_eq!(table.name_of(MemTag::GC), "gc");
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_make_tag_registers_once() {
        let mut table = TagNameTable::new();
        let first = table.make_tag("metaspace");
        let second = table.make_tag("metaspace");
        assert_eq!(first, second);
        assert!(!first.is_none());
        assert_eq!(table.name_of(first), "metaspace");
        assert_eq!(table.tag_of("metaspace"), first);
    }

    #[test]
    fn test_distinct_names_get_distinct_tags() {
        let mut table = TagNameTable::new();
        let a = table.make_tag("arena");
        let b = table.make_tag("code_cache");
        assert_ne!(a, b);
        assert_eq!(table.name_of(a), "arena");
        assert_eq!(table.name_of(b), "code_cache");
    }

    #[test]
    fn test_unknown_name_maps_to_none() {
        let table = TagNameTable::new();
        assert_eq!(table.tag_of("no_such_tag"), MemTag::NONE);
    }

    #[test]
    fn test_unregistered_tag_renders_as_sentinel() {
        let table = TagNameTable::new();
        let unregistered = MemTag::from_index(200).unwrap();
        assert_eq!(table.name_of(unregistered), "none");
    }

    #[test]
    fn test_namespace_overflow_returns_none() {
        let mut table = TagNameTable::new();
        for i in table.len()..MemTag::MAX_TAGS {
            let tag = table.make_tag(&format!("tag_{}", i));
            assert_eq!(tag.index(), i);
        }
        assert!(!table.overflowed());
        assert_eq!(table.make_tag("one_too_many"), MemTag::NONE);
        assert!(table.overflowed());
        // Existing names still resolve.
        assert_eq!(table.name_of(MemTag::from_index(255).unwrap()), "tag_255");
    }

    #[test]
    fn test_tag_index_bounds() {
        assert!(MemTag::from_index(0).is_some());
        assert!(MemTag::from_index(255).is_some());
        assert!(MemTag::from_index(256).is_none());
    }
}
