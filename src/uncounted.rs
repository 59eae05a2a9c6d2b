//! Flattened, reference-count-free copies of pure-scalar arrays.
//!
//! Nothing inside an `UncountedArray` is reference counted: strings are
//! boxed and nested arrays are owned inline, so the whole tree is released
//! in one step when its handle goes away.

use crate::error::AllocError;
use crate::value::{Array, ArrayKey, KeyRef, Value};
use core::mem::size_of;
use indexmap::IndexMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UncountedKey {
    Int(i64),
    Str(Box<str>),
}

impl UncountedKey {
    fn from_key(k: &ArrayKey) -> Self {
        match k {
            ArrayKey::Int(i) => UncountedKey::Int(*i),
            ArrayKey::Str(s) => UncountedKey::Str(Box::from(&**s)),
        }
    }

    pub fn as_key_ref(&self) -> KeyRef<'_> {
        match self {
            UncountedKey::Int(i) => KeyRef::Int(*i),
            UncountedKey::Str(s) => KeyRef::Str(s),
        }
    }

    pub(crate) fn to_array_key(&self) -> ArrayKey {
        match self {
            UncountedKey::Int(i) => ArrayKey::Int(*i),
            UncountedKey::Str(s) => ArrayKey::Str(Arc::from(&**s)),
        }
    }
}

impl indexmap::Equivalent<UncountedKey> for KeyRef<'_> {
    fn equivalent(&self, key: &UncountedKey) -> bool {
        *self == key.as_key_ref()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum UncountedValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Box<str>),
    Array(UncountedArray),
}

/// Flattened array tree; see the module docs.
#[derive(Clone, Debug, PartialEq)]
pub struct UncountedArray {
    entries: IndexMap<UncountedKey, UncountedValue>,
    mem_size: usize,
}

const ENTRY_SIZE: usize =
    size_of::<UncountedKey>() + size_of::<UncountedValue>() + 2 * size_of::<usize>();

impl UncountedArray {
    /// Copy `arr` into flattened form.
    ///
    /// The caller has established the graph is acyclic and holds only
    /// scalars, strings and arrays.
    pub(crate) fn flatten(arr: &Array) -> Result<Self, AllocError> {
        let mut entries = IndexMap::new();
        entries
            .try_reserve_exact(arr.len())
            .map_err(|_| AllocError::OutOfMemory {
                requested: arr.len() * ENTRY_SIZE,
            })?;
        let mut mem_size = size_of::<Self>() + arr.len() * ENTRY_SIZE;
        for (k, v) in arr.iter() {
            let key = UncountedKey::from_key(&k);
            if let UncountedKey::Str(s) = &key {
                mem_size += s.len();
            }
            let value = match v {
                Value::Null => UncountedValue::Null,
                Value::Bool(b) => UncountedValue::Bool(b),
                Value::Int(i) => UncountedValue::Int(i),
                Value::Double(d) => UncountedValue::Double(d),
                Value::Str(s) => {
                    mem_size += s.len();
                    UncountedValue::Str(Box::from(&*s))
                }
                Value::Array(a) => {
                    let nested = Self::flatten(&a.borrow())?;
                    mem_size += nested.mem_size;
                    UncountedValue::Array(nested)
                }
                Value::Object(_) | Value::Resource(_) | Value::Collection(_) => {
                    debug_assert!(false, "counted value reached the uncounted path");
                    UncountedValue::Null
                }
            };
            entries.insert(key, value);
        }
        Ok(Self { entries, mem_size })
    }

    /// Estimated bytes owned by this tree, nested arrays and strings
    /// included.
    pub fn mem_size(&self) -> usize {
        self.mem_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: KeyRef<'_>) -> Option<&UncountedValue> {
        self.entries.get(&key)
    }

    pub fn contains_key(&self, key: KeyRef<'_>) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn get_index(&self, i: usize) -> Option<(&UncountedKey, &UncountedValue)> {
        self.entries.get_index(i)
    }

    pub(crate) fn index_of(&self, key: KeyRef<'_>) -> Option<usize> {
        self.entries.get_index_of(&key)
    }

    /// Nested array stored at position `i`.
    pub(crate) fn child(&self, i: usize) -> Option<&UncountedArray> {
        match self.entries.get_index(i) {
            Some((_, UncountedValue::Array(a))) => Some(a),
            _ => None,
        }
    }

    pub fn is_vector_data(&self) -> bool {
        self.entries
            .keys()
            .enumerate()
            .all(|(i, k)| matches!(k, UncountedKey::Int(n) if *n == i as i64))
    }

    pub fn iter(&self) -> indexmap::map::Iter<'_, UncountedKey, UncountedValue> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_copies_nested_scalars() {
        let inner: Array = [Value::Int(1), Value::str("two")].into_iter().collect();
        let mut outer = Array::new();
        outer.set("inner", Value::array(inner));
        outer.set("pi", Value::Double(3.5));

        let u = UncountedArray::flatten(&outer).unwrap();
        assert_eq!(u.len(), 2);
        assert_eq!(u.get(KeyRef::Str("pi")), Some(&UncountedValue::Double(3.5)));
        let nested = u.child(0).unwrap();
        assert!(nested.is_vector_data());
        assert_eq!(
            nested.get(KeyRef::Int(1)),
            Some(&UncountedValue::Str(Box::from("two")))
        );
        assert_eq!(u.index_of(KeyRef::Str("pi")), Some(1));
    }

    #[test]
    fn mem_size_covers_entries_and_strings() {
        let arr: Array = [Value::str("abcdef"), Value::Int(2)].into_iter().collect();
        let u = UncountedArray::flatten(&arr).unwrap();
        assert!(u.mem_size() >= 2 * ENTRY_SIZE + "abcdef".len());
    }
}
