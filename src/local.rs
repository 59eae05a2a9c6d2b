//! Materialization: turning a stored handle back into a live value.
//!
//! Structural and uncounted arrays are not copied on read. They come back
//! as an [`Array`] whose storage is a `LocalArray`, a read-only view that
//! keeps the cached handle alive and builds element values on access. The
//! view is replaced by an owned map on the first write. Serialized blobs are
//! decoded in full; that is the only path that rebuilds cycles and
//! collections.

use crate::codec;
use crate::error::DecodeError;
use crate::handle::{Handle, HandleKind};
use crate::shared_array::SharedArray;
use crate::uncounted::{UncountedArray, UncountedValue};
use crate::value::{Array, ArrayKey, KeyRef, Object, Value};
use core::cell::RefCell;
use hashbrown::HashMap;
use smallvec::SmallVec;

/// Materialize an array handle.
///
/// Fails only for a serialized blob that does not decode; the cache should
/// treat that entry as unusable.
pub fn make_array(handle: &Handle) -> Result<Value, DecodeError> {
    handle.to_value()
}

impl Handle {
    /// Materialize any handle into a live value.
    pub fn to_value(&self) -> Result<Value, DecodeError> {
        match self.kind() {
            HandleKind::Serialized { tag, bytes } => codec::unserialize(bytes).map_err(|e| {
                log::warn!("failed to decode serialized {:?}: {}", tag, e);
                e
            }),
            _ => Ok(element_value(self)),
        }
    }
}

/// Value for a handle stored inside a shared array.
///
/// Lazily unserialized objects that fail to decode read as `false`, the
/// host's result for a failed unserialize.
fn element_value(h: &Handle) -> Value {
    match h.kind() {
        HandleKind::Null => Value::Null,
        HandleKind::Bool(b) => Value::Bool(*b),
        HandleKind::Int(i) => Value::Int(*i),
        HandleKind::Double(d) => Value::Double(*d),
        HandleKind::Str(s) => Value::Str(s.text().clone()),
        HandleKind::Array(_) | HandleKind::Uncounted(_) => {
            Value::array(Array::from_shared(LocalArray::new(h.clone())))
        }
        HandleKind::Object(o) => {
            let mut obj = Object::new(o.class());
            for (k, v) in o.props().iter() {
                obj.props.insert(k.to_array_key(), element_value(v));
            }
            Value::object(obj)
        }
        HandleKind::Serialized { tag, bytes } => match codec::unserialize(bytes) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("failed to decode nested serialized {:?}: {}", tag, e);
                Value::Bool(false)
            }
        },
    }
}

enum Node<'a> {
    Shared(&'a SharedArray),
    Uncounted(&'a UncountedArray),
}

/// Read-only view over a cached array.
///
/// `path` descends from an uncounted root into nested uncounted arrays;
/// it is empty for structural arrays, whose nested arrays are handles of
/// their own.
///
/// A nested array, object or collection is built once per position and
/// remembered, so every later read and the copy-on-write escalation hand
/// out the same instance. Writes through a nested container therefore stay
/// visible from the parent, as they do for an owned array.
#[derive(Clone)]
pub(crate) struct LocalArray {
    root: Handle,
    path: SmallVec<[u32; 4]>,
    containers: RefCell<HashMap<usize, Value>>,
}

impl LocalArray {
    pub(crate) fn new(root: Handle) -> Self {
        debug_assert!(matches!(
            root.kind(),
            HandleKind::Array(_) | HandleKind::Uncounted(_)
        ));
        Self::at(root, SmallVec::new())
    }

    fn at(root: Handle, path: SmallVec<[u32; 4]>) -> Self {
        Self {
            root,
            path,
            containers: RefCell::new(HashMap::new()),
        }
    }

    fn node(&self) -> Option<Node<'_>> {
        match self.root.kind() {
            HandleKind::Array(a) => Some(Node::Shared(a)),
            HandleKind::Uncounted(u) => {
                let mut cur = u;
                for &i in &self.path {
                    cur = cur.child(i as usize)?;
                }
                Some(Node::Uncounted(cur))
            }
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self.node() {
            Some(Node::Shared(a)) => a.len(),
            Some(Node::Uncounted(u)) => u.len(),
            None => 0,
        }
    }

    pub(crate) fn contains_key(&self, key: KeyRef<'_>) -> bool {
        match self.node() {
            Some(Node::Shared(a)) => a.index_of(key).is_some(),
            Some(Node::Uncounted(u)) => u.contains_key(key),
            None => false,
        }
    }

    pub(crate) fn get(&self, key: KeyRef<'_>) -> Option<Value> {
        let pos = match self.node()? {
            Node::Shared(a) => a.index_of(key)?,
            Node::Uncounted(u) => u.index_of(key)?,
        };
        self.value_at(pos)
    }

    pub(crate) fn entry_at(&self, pos: usize) -> Option<(ArrayKey, Value)> {
        let key = match self.node()? {
            Node::Shared(a) => a.entry_at(pos)?.0,
            Node::Uncounted(u) => u.get_index(pos)?.0.to_array_key(),
        };
        Some((key, self.value_at(pos)?))
    }

    fn value_at(&self, pos: usize) -> Option<Value> {
        if let Some(v) = self.containers.borrow().get(&pos) {
            return Some(v.clone());
        }
        let v = match self.node()? {
            Node::Shared(a) => element_value(a.entry_at(pos)?.1),
            Node::Uncounted(u) => self.uncounted_value(pos, u.get_index(pos)?.1),
        };
        if v.is_container() {
            self.containers.borrow_mut().insert(pos, v.clone());
        }
        Some(v)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ArrayKey, Value)> + '_ {
        (0..self.len()).map_while(move |i| self.entry_at(i))
    }

    pub(crate) fn is_vector_data(&self) -> bool {
        match self.node() {
            Some(Node::Shared(SharedArray::Packed(_))) => true,
            Some(Node::Shared(SharedArray::Hashed(h))) => h
                .iter()
                .enumerate()
                .all(|(i, (k, _))| k.as_int() == Some(i as i64)),
            Some(Node::Uncounted(u)) => u.is_vector_data(),
            None => true,
        }
    }

    fn uncounted_value(&self, pos: usize, v: &UncountedValue) -> Value {
        match v {
            UncountedValue::Null => Value::Null,
            UncountedValue::Bool(b) => Value::Bool(*b),
            UncountedValue::Int(i) => Value::Int(*i),
            UncountedValue::Double(d) => Value::Double(*d),
            UncountedValue::Str(s) => Value::str(s),
            UncountedValue::Array(_) => {
                let mut path = self.path.clone();
                path.push(pos as u32);
                Value::array(Array::from_shared(LocalArray::at(self.root.clone(), path)))
            }
        }
    }
}
