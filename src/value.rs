//! Live host values: the input to construction and the output of
//! materialization.
//!
//! Containers are `Rc<RefCell<_>>` so a source graph can alias itself; a
//! cache snapshot of such a graph goes through the serializer.

use crate::local::LocalArray;
use core::cell::RefCell;
use core::fmt;
use indexmap::IndexMap;
use std::rc::Rc;
use std::sync::Arc;

pub type ArrayRef = Rc<RefCell<Array>>;
pub type ObjectRef = Rc<RefCell<Object>>;
pub type CollectionRef = Rc<RefCell<Collection>>;

/// Owned array key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArrayKey {
    Int(i64),
    Str(Arc<str>),
}

/// Borrowed array key used for lookups.
///
/// Hashes identically to the matching [`ArrayKey`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyRef<'a> {
    Int(i64),
    Str(&'a str),
}

impl ArrayKey {
    pub fn as_key_ref(&self) -> KeyRef<'_> {
        match self {
            ArrayKey::Int(i) => KeyRef::Int(*i),
            ArrayKey::Str(s) => KeyRef::Str(s),
        }
    }
}

impl indexmap::Equivalent<ArrayKey> for KeyRef<'_> {
    fn equivalent(&self, key: &ArrayKey) -> bool {
        *self == key.as_key_ref()
    }
}

impl From<i64> for ArrayKey {
    fn from(i: i64) -> Self {
        ArrayKey::Int(i)
    }
}

impl From<&str> for ArrayKey {
    fn from(s: &str) -> Self {
        ArrayKey::Str(Arc::from(s))
    }
}

impl From<String> for ArrayKey {
    fn from(s: String) -> Self {
        ArrayKey::Str(Arc::from(s))
    }
}

impl From<i64> for KeyRef<'_> {
    fn from(i: i64) -> Self {
        KeyRef::Int(i)
    }
}

impl<'a> From<&'a str> for KeyRef<'a> {
    fn from(s: &'a str) -> Self {
        KeyRef::Str(s)
    }
}

impl<'a> From<&'a ArrayKey> for KeyRef<'a> {
    fn from(k: &'a ArrayKey) -> Self {
        k.as_key_ref()
    }
}

/// A live host value.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Arc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    /// Opaque process-local resource id; never shareable.
    Resource(u64),
    Collection(CollectionRef),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn array(arr: Array) -> Self {
        Value::Array(Rc::new(RefCell::new(arr)))
    }

    pub fn object(obj: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(obj)))
    }

    pub fn collection(c: Collection) -> Self {
        Value::Collection(Rc::new(RefCell::new(c)))
    }

    /// A fresh empty array value.
    pub fn new_array() -> Self {
        Value::array(Array::new())
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Arrays, objects and collections: values with identity.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_) | Value::Collection(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Structural equality. Containers compare by contents, so comparing
    /// two cyclic graphs does not terminate.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Resource(a), Value::Resource(b)) => a == b,
            (Value::Collection(a), Value::Collection(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<ArrayKey> for Value {
    fn from(k: ArrayKey) -> Self {
        match k {
            ArrayKey::Int(i) => Value::Int(i),
            ArrayKey::Str(s) => Value::Str(s),
        }
    }
}

enum Repr {
    Owned {
        map: IndexMap<ArrayKey, Value>,
        // `None` once `i64::MAX` is taken; no further appends are possible.
        next_index: Option<i64>,
    },
    Shared(LocalArray),
}

/// Ordered associative array.
///
/// An array materialized from the cache starts as a read-only view over the
/// shared representation; the first write copies every element into an
/// owned map and leaves the cached data untouched.
pub struct Array {
    repr: Repr,
}

impl Array {
    pub fn new() -> Self {
        Self {
            repr: Repr::Owned {
                map: IndexMap::new(),
                next_index: Some(0),
            },
        }
    }

    /// A packed array `[v0, v1, ...]`.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let mut arr = Self::new();
        for v in values {
            arr.push(v);
        }
        arr
    }

    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<ArrayKey>,
    {
        let mut arr = Self::new();
        for (k, v) in entries {
            arr.set(k, v);
        }
        arr
    }

    pub(crate) fn from_shared(view: LocalArray) -> Self {
        Self {
            repr: Repr::Shared(view),
        }
    }

    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Owned { map, .. } => map.len(),
            Repr::Shared(view) => view.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while this array still reads straight from a cached
    /// representation.
    pub fn is_shared(&self) -> bool {
        matches!(self.repr, Repr::Shared(_))
    }

    pub fn get<'k>(&self, key: impl Into<KeyRef<'k>>) -> Option<Value> {
        let key = key.into();
        match &self.repr {
            Repr::Owned { map, .. } => map.get(&key).cloned(),
            Repr::Shared(view) => view.get(key),
        }
    }

    pub fn contains_key<'k>(&self, key: impl Into<KeyRef<'k>>) -> bool {
        let key = key.into();
        match &self.repr {
            Repr::Owned { map, .. } => map.contains_key(&key),
            Repr::Shared(view) => view.contains_key(key),
        }
    }

    pub fn set(&mut self, key: impl Into<ArrayKey>, value: Value) {
        let key = key.into();
        let (map, next_index) = self.make_owned();
        if let ArrayKey::Int(i) = key {
            advance_next_index(next_index, i);
        }
        map.insert(key, value);
    }

    /// Append under the next free integer key and return that key.
    ///
    /// Returns `None` and leaves the array unchanged when the next key
    /// would pass `i64::MAX`.
    pub fn push(&mut self, value: Value) -> Option<i64> {
        let (map, next_index) = self.make_owned();
        let Some(key) = *next_index else {
            log::warn!("cannot append: the next integer key is already occupied");
            return None;
        };
        *next_index = key.checked_add(1);
        map.insert(ArrayKey::Int(key), value);
        Some(key)
    }

    pub fn remove<'k>(&mut self, key: impl Into<KeyRef<'k>>) -> Option<Value> {
        let key = key.into();
        if !self.contains_key(key) {
            return None;
        }
        let (map, _) = self.make_owned();
        map.shift_remove(&key)
    }

    pub fn iter(&self) -> Iter<'_> {
        let inner = match &self.repr {
            Repr::Owned { map, .. } => IterInner::Owned(map.iter()),
            Repr::Shared(view) => IterInner::Shared { view, pos: 0 },
        };
        Iter { inner }
    }

    /// Keys are exactly `0..len` in insertion order.
    pub fn is_vector_data(&self) -> bool {
        match &self.repr {
            Repr::Owned { map, .. } => map
                .keys()
                .enumerate()
                .all(|(i, k)| matches!(k, ArrayKey::Int(n) if *n == i as i64)),
            Repr::Shared(view) => view.is_vector_data(),
        }
    }

    /// Copy-on-write escalation: materialize a shared view into an owned map.
    fn make_owned(&mut self) -> (&mut IndexMap<ArrayKey, Value>, &mut Option<i64>) {
        if let Repr::Shared(view) = &self.repr {
            let mut map = IndexMap::with_capacity(view.len());
            let mut next_index = Some(0i64);
            for (k, v) in view.iter() {
                if let ArrayKey::Int(i) = k {
                    advance_next_index(&mut next_index, i);
                }
                map.insert(k, v);
            }
            log::trace!("copy-on-write escalation of {} shared elements", map.len());
            self.repr = Repr::Owned { map, next_index };
        }
        match &mut self.repr {
            Repr::Owned { map, next_index } => (map, next_index),
            Repr::Shared(_) => unreachable!("escalated above"),
        }
    }
}

fn advance_next_index(next: &mut Option<i64>, used: i64) {
    if let Some(n) = *next {
        if used >= n {
            *next = used.checked_add(1);
        }
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Array {
    /// Clones of a shared view stay shared; owned maps are copied shallowly.
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Owned { map, next_index } => Repr::Owned {
                map: map.clone(),
                next_index: *next_index,
            },
            Repr::Shared(view) => Repr::Shared(view.clone()),
        };
        Self { repr }
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((ka, va), (kb, vb))| ka == kb && va == vb)
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Array::from_values(iter)
    }
}

enum IterInner<'a> {
    Owned(indexmap::map::Iter<'a, ArrayKey, Value>),
    Shared { view: &'a LocalArray, pos: usize },
}

/// Iterator over `(key, value)` pairs in insertion order.
pub struct Iter<'a> {
    inner: IterInner<'a>,
}

impl Iterator for Iter<'_> {
    type Item = (ArrayKey, Value);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterInner::Owned(it) => it.next().map(|(k, v)| (k.clone(), v.clone())),
            IterInner::Shared { view, pos } => {
                let item = view.entry_at(*pos)?;
                *pos += 1;
                Some(item)
            }
        }
    }
}

/// Host object: class name plus ordered properties.
#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    pub class: Arc<str>,
    pub props: IndexMap<ArrayKey, Value>,
}

impl Object {
    pub fn new(class: &str) -> Self {
        Self {
            class: Arc::from(class),
            props: IndexMap::new(),
        }
    }

    pub fn with_prop(mut self, name: &str, value: Value) -> Self {
        self.props.insert(ArrayKey::from(name), value);
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CollectionKind {
    Vector,
    Map,
    Set,
}

impl CollectionKind {
    pub fn name(self) -> &'static str {
        match self {
            CollectionKind::Vector => "Vector",
            CollectionKind::Map => "Map",
            CollectionKind::Set => "Set",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Vector" => Some(CollectionKind::Vector),
            "Map" => Some(CollectionKind::Map),
            "Set" => Some(CollectionKind::Set),
            _ => None,
        }
    }
}

/// Host collection object. Never stored structurally in the cache.
#[derive(Clone, Debug, PartialEq)]
pub struct Collection {
    pub kind: CollectionKind,
    pub items: IndexMap<ArrayKey, Value>,
}

impl Collection {
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            items: IndexMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_uses_next_free_integer_key() {
        let mut a = Array::new();
        a.set(5i64, Value::Int(1));
        a.set("x", Value::Int(2));
        assert_eq!(a.push(Value::Int(3)), Some(6));
        assert_eq!(a.get(6i64), Some(Value::Int(3)));
        assert!(!a.is_vector_data());
    }

    #[test]
    fn push_refuses_once_max_key_is_taken() {
        let mut a = Array::new();
        a.set(i64::MAX, Value::str("keep"));
        assert_eq!(a.push(Value::str("new")), None);
        assert_eq!(a.len(), 1);
        assert_eq!(a.get(i64::MAX), Some(Value::str("keep")));

        // Removing the key does not free the slot again.
        a.remove(i64::MAX);
        assert_eq!(a.push(Value::Null), None);
        assert!(a.is_empty());

        let mut b = Array::new();
        b.set(i64::MAX - 1, Value::Null);
        assert_eq!(b.push(Value::Int(1)), Some(i64::MAX));
        assert_eq!(b.push(Value::Int(2)), None);
        assert_eq!(b.get(i64::MAX), Some(Value::Int(1)));
    }

    #[test]
    fn vector_data_requires_dense_ordered_keys() {
        let a: Array = [Value::Int(10), Value::Int(20)].into_iter().collect();
        assert!(a.is_vector_data());

        let mut b = Array::new();
        b.set(1i64, Value::Null);
        b.set(0i64, Value::Null);
        assert!(!b.is_vector_data());
    }

    #[test]
    fn borrowed_lookup_matches_owned_key() {
        let mut a = Array::new();
        a.set("k", Value::Bool(true));
        assert!(a.contains_key("k"));
        assert!(!a.contains_key(0i64));
        assert_eq!(a.remove("k"), Some(Value::Bool(true)));
        assert!(a.is_empty());
    }

    #[test]
    fn nan_doubles_compare_equal() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Int(1), Value::Double(1.0));
    }
}
