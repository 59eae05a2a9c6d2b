//! Choosing a representation for an array entering the cache.
//!
//! Top-level arrays are inspected once; nested arrays reuse that verdict.
//!
//! 1. A cyclic graph, or one holding collections, is serialized whole.
//! 2. A non-empty graph with nothing that needs counted ownership becomes a
//!    flattened uncounted copy, when the config allows it.
//! 3. Otherwise dense `0..n` keys get the packed layout and anything else
//!    gets the hash table.

use crate::codec;
use crate::error::AllocError;
use crate::handle::{Handle, HandleFactory, HandleKind, ValueType, HANDLE_HEADER_SIZE};
use crate::inspect::inspect_array;
use crate::shared_array::{HashedSharedArray, PackedSharedArray, SharedArray};
use crate::uncounted::UncountedArray;
use crate::value::Array;

impl HandleFactory {
    /// Build the shared representation of `arr` and report the bytes it
    /// consumed (header, slots, handles and all owned child data).
    ///
    /// `inner` is true for an array nested in one already being built.
    /// Construction is all-or-nothing: on error no handle built for this
    /// call is left alive.
    pub fn make_shared(
        &self,
        arr: &Array,
        inner: bool,
        lazy_unserialize: bool,
    ) -> Result<(Handle, usize), AllocError> {
        if inner {
            return self.make_structural(arr, lazy_unserialize);
        }
        let res = self.make_top_level(arr, lazy_unserialize);
        if let Err(e) = &res {
            log::warn!("shared array construction failed for {} elements: {}", arr.len(), e);
        }
        res
    }

    fn make_top_level(
        &self,
        arr: &Array,
        lazy_unserialize: bool,
    ) -> Result<(Handle, usize), AllocError> {
        let features = inspect_array(arr);
        if features.is_circular || features.has_collection {
            let (h, size) = self.serialized(codec::serialize_array(arr), ValueType::Array)?;
            log::debug!(
                "serialized array: circular={} collection={} size={}",
                features.is_circular,
                features.has_collection,
                size
            );
            return Ok((h, size));
        }

        if self.config().uses_uncounted() && !features.has_object_or_resource && !arr.is_empty() {
            let flat = UncountedArray::flatten(arr)?;
            let size = flat.mem_size() + HANDLE_HEADER_SIZE;
            let charge = self.charge(size)?;
            log::debug!("uncounted array: {} elements, size={}", flat.len(), size);
            return Ok((self.wrap(HandleKind::Uncounted(flat), charge), size));
        }

        let (h, size) = self.make_structural(arr, lazy_unserialize)?;
        log::debug!(
            "{} shared array: {} elements, size={}",
            if h.as_shared_array().is_some_and(SharedArray::is_packed) {
                "packed"
            } else {
                "hashed"
            },
            arr.len(),
            size
        );
        Ok((h, size))
    }

    fn make_structural(
        &self,
        arr: &Array,
        lazy_unserialize: bool,
    ) -> Result<(Handle, usize), AllocError> {
        if arr.is_vector_data() {
            self.make_packed(arr, lazy_unserialize)
        } else {
            self.make_hashed(arr, lazy_unserialize)
        }
    }

    fn make_packed(&self, arr: &Array, lazy_unserialize: bool) -> Result<(Handle, usize), AllocError> {
        let n = arr.len();
        let block = SharedArray::block_size_for_packed(n);
        let charge = self.charge(block)?;
        let (packed, children) =
            PackedSharedArray::build(self, n, arr.iter().map(|(_, v)| v), lazy_unserialize)?;
        let h = self.wrap(HandleKind::Array(SharedArray::Packed(packed)), charge);
        Ok((h, block + children))
    }

    fn make_hashed(&self, arr: &Array, lazy_unserialize: bool) -> Result<(Handle, usize), AllocError> {
        let n = arr.len();
        let block = SharedArray::block_size_for_hashed(n);
        let charge = self.charge(block)?;
        let (hashed, children) = HashedSharedArray::build(self, n, arr.iter(), lazy_unserialize)?;
        let h = self.wrap(HandleKind::Array(SharedArray::Hashed(hashed)), charge);
        Ok((h, block + children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::MemoryBudget;
    use crate::config::SharedConfig;
    use crate::value::{ArrayKey, Collection, CollectionKind, KeyRef, Object, Value};
    use core::mem::size_of;
    use std::sync::Arc;

    fn scalars() -> Array {
        [Value::Int(10), Value::Int(20), Value::Int(30)]
            .into_iter()
            .collect()
    }

    fn counted() -> HandleFactory {
        HandleFactory::new(SharedConfig::new().use_uncounted(false))
    }

    #[test]
    fn dense_keys_pick_packed() {
        let (h, _) = counted().make_shared(&scalars(), false, false).unwrap();
        let arr = h.as_shared_array().unwrap();
        assert!(arr.is_packed());
        let p = arr.as_packed().unwrap();
        assert_eq!(p.get(2).unwrap().as_int(), Some(30));
    }

    #[test]
    fn string_keys_pick_hashed() {
        let arr = Array::from_entries([
            ("a", Value::Int(1)),
            ("b", Value::Int(2)),
            ("c", Value::Int(3)),
        ]);
        let (h, _) = counted().make_shared(&arr, false, false).unwrap();
        let hashed = h.as_shared_array().unwrap().as_hashed().unwrap();
        assert_eq!(hashed.capacity(), 4);
        let pos = hashed.index_of_str("b").unwrap();
        assert_eq!(hashed.value_at(pos).unwrap().as_int(), Some(2));
        assert!(hashed.index_of_str("z").is_none());
    }

    #[test]
    fn pure_scalars_pick_uncounted() {
        let f = HandleFactory::default();
        let (h, size) = f.make_shared(&scalars(), false, false).unwrap();
        assert!(h.is_uncounted());
        assert!(size >= 3 * size_of::<i64>());
    }

    #[test]
    fn empty_array_is_never_uncounted() {
        let f = HandleFactory::default();
        let (h, _) = f.make_shared(&Array::new(), false, false).unwrap();
        assert!(!h.is_uncounted());
        assert!(h.as_shared_array().unwrap().is_empty());
    }

    #[test]
    fn objects_block_the_uncounted_path() {
        let mut arr = scalars();
        arr.push(Value::object(Object::new("C")));
        let (h, _) = HandleFactory::default().make_shared(&arr, false, false).unwrap();
        assert!(!h.is_uncounted());
        assert!(h.as_shared_array().unwrap().is_packed());
    }

    #[test]
    fn cycles_and_collections_pick_serialized() {
        let v = Value::new_array();
        let a = v.as_array().unwrap().clone();
        a.borrow_mut().push(v.clone());
        let (h, _) = HandleFactory::default().make_shared(&a.borrow(), false, false).unwrap();
        assert!(h.is_serialized_array());

        let mut arr = Array::new();
        arr.set("c", Value::collection(Collection::new(CollectionKind::Set)));
        let (h, _) = HandleFactory::default().make_shared(&arr, false, false).unwrap();
        assert!(h.is_serialized_array());
    }

    #[test]
    fn inner_arrays_skip_inspection() {
        let mut arr = Array::new();
        arr.set("c", Value::collection(Collection::new(CollectionKind::Vector)));
        let (h, _) = HandleFactory::default().make_shared(&arr, true, false).unwrap();
        assert!(!h.is_serialized_array());
        let hashed = h.as_shared_array().unwrap().as_hashed().unwrap();
        assert_eq!(hashed.get(KeyRef::Str("c")).unwrap().value_type(), ValueType::Collection);
    }

    #[test]
    fn reported_size_matches_budget_usage() {
        let budget = Arc::new(MemoryBudget::new(1 << 20));
        let f = HandleFactory::new(SharedConfig::new().use_uncounted(false).budget(budget.clone()));
        let mut arr = Array::new();
        arr.set("name", Value::str("widget"));
        arr.set(7i64, Value::array(scalars()));
        arr.set("obj", Value::object(Object::new("P").with_prop("x", Value::Double(1.5))));
        let (h, size) = f.make_shared(&arr, false, false).unwrap();
        assert_eq!(budget.used(), size);
        drop(h);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn allocation_failure_releases_everything() {
        // Room for the table itself and a few dozen children, not all 400.
        let limit = SharedArray::block_size_for_hashed(200) + 50 * HANDLE_HEADER_SIZE;
        let budget = Arc::new(MemoryBudget::new(limit));
        let f = HandleFactory::new(SharedConfig::new().use_uncounted(false).budget(budget.clone()));
        let arr = Array::from_entries((0..200).map(|i| (ArrayKey::from(format!("k{i}")), Value::Int(i))));
        match f.make_shared(&arr, false, false) {
            Err(AllocError::BudgetExhausted { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(budget.used(), 0);
    }
}
