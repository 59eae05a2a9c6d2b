//! Structural shared arrays: an open-chained hash table and a dense vector.
//!
//! Both layouts are sized exactly once at construction and never change
//! afterwards. The hash table is an index arena: `slots[hash & mask]` holds
//! the position of the newest bucket in that chain and every bucket links to
//! the next-older one by position, so links are plain integers.
//!
//! Invariants (`HashedSharedArray`)
//! - `slots.len()` is a power of two, at least 2, and never grows.
//! - Buckets sit at `0..len` in source insertion order.
//! - Every bucket is reachable from exactly one slot.
//! - Keys are unique. This is the caller's contract: construction does not
//!   check for duplicates, and a duplicated key makes the older bucket
//!   unreachable by lookup.

use crate::error::AllocError;
use crate::handle::{string_hash, Handle, HandleFactory, HANDLE_HEADER_SIZE};
use crate::value::{ArrayKey, KeyRef, Value};
use core::mem::size_of;

/// One key/value pair plus its collision-chain link.
#[derive(Debug)]
pub struct Bucket {
    key: Handle,
    value: Handle,
    next: Option<u32>,
}

impl Bucket {
    pub fn key(&self) -> &Handle {
        &self.key
    }

    pub fn value(&self) -> &Handle {
        &self.value
    }

    /// Position of the next bucket in this chain.
    pub fn next(&self) -> Option<usize> {
        self.next.map(|n| n as usize)
    }
}

/// Hash-table capacity for `count` elements: the next power of two, at
/// least 2.
pub fn capacity_for(count: usize) -> usize {
    if count <= 2 {
        2
    } else {
        count.next_power_of_two()
    }
}

fn reserve<T>(v: &mut Vec<T>, n: usize) -> Result<(), AllocError> {
    v.try_reserve_exact(n).map_err(|_| AllocError::OutOfMemory {
        requested: n.saturating_mul(size_of::<T>()),
    })
}

fn position(len: usize) -> Result<u32, AllocError> {
    u32::try_from(len).map_err(|_| AllocError::OutOfMemory {
        requested: len.saturating_mul(size_of::<Bucket>()),
    })
}

/// Open-chained hash table of key/value handles.
#[derive(Debug)]
pub struct HashedSharedArray {
    capacity_mask: usize,
    slots: Box<[Option<u32>]>,
    buckets: Box<[Bucket]>,
}

impl HashedSharedArray {
    /// Bytes for the header, slot table and buckets of a table holding
    /// `count` elements.
    pub fn table_size(count: usize) -> usize {
        size_of::<Self>()
            + capacity_for(count) * size_of::<Option<u32>>()
            + count * size_of::<Bucket>()
    }

    /// Build from `entries` in order. Returns the table and the bytes
    /// consumed by the key and value handles it created.
    ///
    /// If any handle fails to build, every handle created so far is released
    /// before the error is returned.
    pub(crate) fn build<I>(
        factory: &HandleFactory,
        count: usize,
        entries: I,
        lazy_unserialize: bool,
    ) -> Result<(Self, usize), AllocError>
    where
        I: IntoIterator<Item = (ArrayKey, Value)>,
    {
        let capacity = capacity_for(count);
        let capacity_mask = capacity - 1;

        let mut slots: Vec<Option<u32>> = Vec::new();
        reserve(&mut slots, capacity)?;
        slots.resize(capacity, None);

        let mut buckets: Vec<Bucket> = Vec::new();
        reserve(&mut buckets, count)?;

        let mut size = 0usize;
        for (k, v) in entries {
            let (key, ks) = factory.create_key(&k)?;
            size += ks;
            let (value, vs) = factory.create(&v, true, lazy_unserialize)?;
            size += vs;

            let pos = position(buckets.len())?;
            let slot = (key.key_hash() as usize) & capacity_mask;
            buckets.push(Bucket {
                key,
                value,
                next: slots[slot],
            });
            slots[slot] = Some(pos);
        }
        debug_assert_eq!(buckets.len(), count);

        Ok((
            Self {
                capacity_mask,
                slots: slots.into_boxed_slice(),
                buckets: buckets.into_boxed_slice(),
            },
            size,
        ))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity_mask(&self) -> usize {
        self.capacity_mask
    }

    /// Position of the bucket holding `key`.
    pub fn index_of(&self, key: KeyRef<'_>) -> Option<usize> {
        match key {
            KeyRef::Int(i) => self.index_of_int(i),
            KeyRef::Str(s) => self.index_of_str(s),
        }
    }

    pub fn index_of_str(&self, key: &str) -> Option<usize> {
        let h = string_hash(key);
        self.find(h, |k| k.as_str() == Some(key))
    }

    pub fn index_of_int(&self, key: i64) -> Option<usize> {
        self.find(key as u64, |k| k.as_int() == Some(key))
    }

    fn find(&self, hash: u64, matches: impl Fn(&Handle) -> bool) -> Option<usize> {
        let mut cur = self.slots[(hash as usize) & self.capacity_mask];
        while let Some(pos) = cur {
            let b = &self.buckets[pos as usize];
            if matches(&b.key) {
                return Some(pos as usize);
            }
            cur = b.next;
        }
        None
    }

    pub fn bucket(&self, pos: usize) -> Option<&Bucket> {
        self.buckets.get(pos)
    }

    pub fn key_at(&self, pos: usize) -> Option<&Handle> {
        self.buckets.get(pos).map(|b| &b.key)
    }

    pub fn value_at(&self, pos: usize) -> Option<&Handle> {
        self.buckets.get(pos).map(|b| &b.value)
    }

    pub fn get(&self, key: KeyRef<'_>) -> Option<&Handle> {
        self.index_of(key).map(|pos| &self.buckets[pos].value)
    }

    /// Positions in the chain for `slot`, newest first.
    pub fn chain(&self, slot: usize) -> Chain<'_> {
        Chain {
            buckets: &self.buckets,
            cur: self.slots.get(slot).copied().flatten(),
        }
    }

    /// `(key, value)` handles in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Handle, &Handle)> + '_ {
        self.buckets.iter().map(|b| (&b.key, &b.value))
    }
}

/// Iterator over bucket positions along one collision chain.
pub struct Chain<'a> {
    buckets: &'a [Bucket],
    cur: Option<u32>,
}

impl Iterator for Chain<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let pos = self.cur? as usize;
        self.cur = self.buckets[pos].next;
        Some(pos)
    }
}

/// Dense array of value handles; position `i` is integer key `i`.
#[derive(Debug)]
pub struct PackedSharedArray {
    values: Box<[Handle]>,
}

impl PackedSharedArray {
    pub fn table_size(count: usize) -> usize {
        size_of::<Self>() + count * size_of::<Handle>()
    }

    /// Build from `values` in order; see [`HashedSharedArray::build`].
    pub(crate) fn build<I>(
        factory: &HandleFactory,
        count: usize,
        values: I,
        lazy_unserialize: bool,
    ) -> Result<(Self, usize), AllocError>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut out: Vec<Handle> = Vec::new();
        reserve(&mut out, count)?;
        let mut size = 0usize;
        for v in values {
            let (h, s) = factory.create(&v, true, lazy_unserialize)?;
            size += s;
            out.push(h);
        }
        debug_assert_eq!(out.len(), count);
        Ok((
            Self {
                values: out.into_boxed_slice(),
            },
            size,
        ))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at integer key `i`; valid only for `0 <= i < len`.
    pub fn get(&self, i: i64) -> Option<&Handle> {
        usize::try_from(i).ok().and_then(|i| self.values.get(i))
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Handle> {
        self.values.iter()
    }
}

/// A structural shared array in one of its two layouts.
#[derive(Debug)]
pub enum SharedArray {
    Hashed(HashedSharedArray),
    Packed(PackedSharedArray),
}

impl SharedArray {
    pub(crate) fn empty() -> Self {
        SharedArray::Packed(PackedSharedArray {
            values: Box::new([]),
        })
    }

    pub fn len(&self) -> usize {
        match self {
            SharedArray::Hashed(h) => h.len(),
            SharedArray::Packed(p) => p.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, SharedArray::Packed(_))
    }

    pub fn as_hashed(&self) -> Option<&HashedSharedArray> {
        match self {
            SharedArray::Hashed(h) => Some(h),
            SharedArray::Packed(_) => None,
        }
    }

    pub fn as_packed(&self) -> Option<&PackedSharedArray> {
        match self {
            SharedArray::Packed(p) => Some(p),
            SharedArray::Hashed(_) => None,
        }
    }

    pub fn get(&self, key: KeyRef<'_>) -> Option<&Handle> {
        match (self, key) {
            (SharedArray::Hashed(h), key) => h.get(key),
            (SharedArray::Packed(p), KeyRef::Int(i)) => p.get(i),
            (SharedArray::Packed(_), KeyRef::Str(_)) => None,
        }
    }

    /// Position of `key` in iteration order.
    pub fn index_of(&self, key: KeyRef<'_>) -> Option<usize> {
        match (self, key) {
            (SharedArray::Hashed(h), key) => h.index_of(key),
            (SharedArray::Packed(p), KeyRef::Int(i)) => {
                usize::try_from(i).ok().filter(|&i| i < p.len())
            }
            (SharedArray::Packed(_), KeyRef::Str(_)) => None,
        }
    }

    /// Key and value at iteration position `pos`.
    pub fn entry_at(&self, pos: usize) -> Option<(ArrayKey, &Handle)> {
        match self {
            SharedArray::Hashed(h) => h.bucket(pos).map(|b| (b.key.to_array_key(), &b.value)),
            SharedArray::Packed(p) => p.values.get(pos).map(|v| (ArrayKey::Int(pos as i64), v)),
        }
    }

    /// Handles owned directly by this array: keys and values for the hashed
    /// layout, values for the packed one.
    pub fn handle_count(&self) -> usize {
        match self {
            SharedArray::Hashed(h) => 2 * h.len(),
            SharedArray::Packed(p) => p.len(),
        }
    }

    /// Bytes of this array's own block, including the handle header.
    pub(crate) fn block_size_for_hashed(count: usize) -> usize {
        HANDLE_HEADER_SIZE + HashedSharedArray::table_size(count)
    }

    pub(crate) fn block_size_for_packed(count: usize) -> usize {
        HANDLE_HEADER_SIZE + PackedSharedArray::table_size(count)
    }
}
