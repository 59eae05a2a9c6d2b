#![cfg(test)]

// Property tests for the hashed table layout, kept inside the crate so they
// can build tables directly and walk their chains.

use crate::budget::MemoryBudget;
use crate::config::SharedConfig;
use crate::handle::HandleFactory;
use crate::shared_array::{capacity_for, HashedSharedArray, SharedArray};
use crate::value::{Array, ArrayKey, KeyRef, Value};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn arb_key() -> impl Strategy<Value = ArrayKey> {
    prop_oneof![
        (-50i64..50).prop_map(ArrayKey::Int),
        "[a-z]{0,4}".prop_map(ArrayKey::from),
    ]
}

// Unique keys in generation order; duplicates collapse to the first.
fn arb_keys() -> impl Strategy<Value = Vec<ArrayKey>> {
    proptest::collection::vec(arb_key(), 0..40).prop_map(|ks| {
        let mut seen = BTreeSet::new();
        ks.into_iter().filter(|k| seen.insert(k.clone())).collect()
    })
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        (-1.0e6f64..1.0e6).prop_map(Value::Double),
        "[a-z ]{0,8}".prop_map(|s| Value::str(&s)),
    ]
}

// Acyclic arrays nested a few levels deep.
fn arb_array() -> impl Strategy<Value = Array> {
    let leaf = proptest::collection::vec((arb_key(), arb_scalar()), 0..6)
        .prop_map(|es| Array::from_entries(es));
    leaf.prop_recursive(3, 40, 6, |inner| {
        proptest::collection::vec(
            (
                arb_key(),
                prop_oneof![arb_scalar(), inner.prop_map(Value::array)],
            ),
            0..6,
        )
        .prop_map(|es| Array::from_entries(es))
    })
}

proptest! {
    // Table shape: capacity bounds, one chain per bucket, every key found
    // at its insertion position, and no false positives.
    #[test]
    fn prop_hashed_table_invariants(keys in arb_keys(), misses in proptest::collection::vec(arb_key(), 0..20)) {
        let f = HandleFactory::default();
        let entries: Vec<_> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), Value::Int(i as i64)))
            .collect();
        let (h, _) = HashedSharedArray::build(&f, entries.len(), entries, false).unwrap();

        prop_assert_eq!(h.len(), keys.len());
        prop_assert!(h.capacity().is_power_of_two());
        prop_assert!(h.capacity() >= 2 && h.capacity() >= h.len());
        prop_assert_eq!(h.capacity(), capacity_for(keys.len()));

        let mut seen = vec![0u32; h.len()];
        for slot in 0..h.capacity() {
            for pos in h.chain(slot) {
                seen[pos] += 1;
                let key = h.key_at(pos).unwrap();
                prop_assert_eq!((key.key_hash() as usize) & h.capacity_mask(), slot);
            }
        }
        prop_assert!(seen.iter().all(|&n| n == 1));

        for (i, k) in keys.iter().enumerate() {
            prop_assert_eq!(h.index_of(KeyRef::from(k)), Some(i));
            prop_assert_eq!(h.value_at(i).unwrap().as_int(), Some(i as i64));
        }
        for p in &misses {
            if !keys.contains(p) {
                prop_assert_eq!(h.index_of(KeyRef::from(p)), None);
            }
        }
    }

    // Every byte reported by construction is drawn from the budget and
    // returned when the handle goes away; reading the handle back gives the
    // original contents.
    #[test]
    fn prop_budget_balances_and_contents_survive(arr in arb_array(), uncounted in any::<bool>()) {
        let budget = Arc::new(MemoryBudget::new(usize::MAX));
        let f = HandleFactory::new(
            SharedConfig::new().use_uncounted(uncounted).budget(budget.clone()),
        );
        let (h, size) = f.make_shared(&arr, false, false).unwrap();
        prop_assert_eq!(budget.used(), size);

        let back = h.to_value().unwrap();
        prop_assert_eq!(&*back.as_array().unwrap().borrow(), &arr);

        if let Some(SharedArray::Hashed(t)) = h.as_shared_array() {
            prop_assert_eq!(t.len(), arr.len());
        }
        drop(back);
        drop(h);
        prop_assert_eq!(budget.used(), 0);
    }
}
