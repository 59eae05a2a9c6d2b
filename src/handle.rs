//! Handles: atomically reference-counted, type-tagged wrappers around one
//! shared representation, and the factory that builds them.
//!
//! A `Handle` is an `Arc` over immutable data. Cloning is a reference,
//! dropping is an unreference; when the last clone goes, the data drops its
//! own handles (recursively) and then returns its block to the budget.

use crate::budget::Charge;
use crate::codec;
use crate::config::SharedConfig;
use crate::error::AllocError;
use crate::inspect;
use crate::shared_array::{HashedSharedArray, SharedArray};
use crate::uncounted::UncountedArray;
use crate::value::{ArrayKey, KeyRef, Object, Value};
use core::fmt;
use core::hash::Hasher;
use core::mem::size_of;
use rustc_hash::FxHasher;
use std::sync::{Arc, Weak};

/// Type tag carried by every handle.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ValueType {
    Null,
    Bool,
    Int64,
    Double,
    String,
    Array,
    Object,
    Collection,
}

/// Hash used for string keys. Deterministic, so every reader computes the
/// same slot for the same bytes.
pub fn string_hash(s: &str) -> u64 {
    let mut h = FxHasher::default();
    h.write(s.as_bytes());
    h.finish()
}

/// Shared string with its hash computed once at construction.
#[derive(Debug)]
pub struct SharedString {
    text: Arc<str>,
    hash: u64,
}

impl SharedString {
    fn new(s: &str) -> Self {
        Self {
            text: Arc::from(s),
            hash: string_hash(s),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub(crate) fn text(&self) -> &Arc<str> {
        &self.text
    }
}

/// Object stored structurally: class name plus a hashed property table.
#[derive(Debug)]
pub struct SharedObject {
    class: Arc<str>,
    props: HashedSharedArray,
}

impl SharedObject {
    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn props(&self) -> &HashedSharedArray {
        &self.props
    }
}

/// What a handle holds.
#[derive(Debug)]
pub enum HandleKind {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(SharedString),
    Array(SharedArray),
    /// Flattened pure-scalar array; no reference counts inside.
    Uncounted(UncountedArray),
    /// Bytes from [`codec::serialize`]; `tag` names the type they decode to.
    Serialized { tag: ValueType, bytes: Box<[u8]> },
    Object(SharedObject),
}

struct HandleData {
    // Field order matters: contained handles are released before the block
    // is credited back.
    kind: HandleKind,
    charge: Charge,
}

impl Drop for HandleData {
    fn drop(&mut self) {
        match &self.kind {
            HandleKind::Array(a) => log::trace!(
                "releasing shared array: {} elements, {} handles, {} bytes",
                a.len(),
                a.handle_count(),
                self.charge.bytes()
            ),
            HandleKind::Uncounted(u) => log::trace!(
                "releasing uncounted array: {} elements, {} bytes",
                u.len(),
                self.charge.bytes()
            ),
            HandleKind::Serialized { tag, bytes } => {
                log::trace!("releasing serialized {:?}: {} bytes", tag, bytes.len())
            }
            _ => {}
        }
    }
}

/// Reference-counted handle to one shared representation.
#[derive(Clone)]
pub struct Handle(Arc<HandleData>);

impl Handle {
    fn new(kind: HandleKind, charge: Charge) -> Self {
        Handle(Arc::new(HandleData { kind, charge }))
    }

    pub fn kind(&self) -> &HandleKind {
        &self.0.kind
    }

    pub fn value_type(&self) -> ValueType {
        match self.kind() {
            HandleKind::Null => ValueType::Null,
            HandleKind::Bool(_) => ValueType::Bool,
            HandleKind::Int(_) => ValueType::Int64,
            HandleKind::Double(_) => ValueType::Double,
            HandleKind::Str(_) => ValueType::String,
            HandleKind::Array(_) | HandleKind::Uncounted(_) => ValueType::Array,
            HandleKind::Serialized { tag, .. } => *tag,
            HandleKind::Object(_) => ValueType::Object,
        }
    }

    /// Array stored as a flattened uncounted copy.
    pub fn is_uncounted(&self) -> bool {
        matches!(self.kind(), HandleKind::Uncounted(_))
    }

    /// Array stored as a serialized blob.
    pub fn is_serialized_array(&self) -> bool {
        matches!(
            self.kind(),
            HandleKind::Serialized {
                tag: ValueType::Array,
                ..
            }
        )
    }

    pub fn as_shared_array(&self) -> Option<&SharedArray> {
        match self.kind() {
            HandleKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_uncounted(&self) -> Option<&UncountedArray> {
        match self.kind() {
            HandleKind::Uncounted(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind() {
            HandleKind::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.kind() {
            HandleKind::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The key this handle denotes when stored as an array key.
    pub fn key_ref(&self) -> Option<KeyRef<'_>> {
        match self.kind() {
            HandleKind::Int(i) => Some(KeyRef::Int(*i)),
            HandleKind::Str(s) => Some(KeyRef::Str(s.as_str())),
            _ => None,
        }
    }

    pub(crate) fn to_array_key(&self) -> ArrayKey {
        match self.kind() {
            HandleKind::Int(i) => ArrayKey::Int(*i),
            HandleKind::Str(s) => ArrayKey::Str(s.text().clone()),
            other => {
                debug_assert!(false, "non-key handle used as key: {:?}", other);
                ArrayKey::Int(0)
            }
        }
    }

    /// Slot hash for a key handle: the cached string hash, or the raw
    /// integer.
    pub(crate) fn key_hash(&self) -> u64 {
        match self.kind() {
            HandleKind::Int(i) => *i as u64,
            HandleKind::Str(s) => s.hash(),
            other => {
                debug_assert!(false, "non-key handle hashed: {:?}", other);
                0
            }
        }
    }

    /// Bytes charged for this handle's own block, excluding child handles.
    pub fn block_size(&self) -> usize {
        self.0.charge.bytes()
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn downgrade(&self) -> WeakHandle {
        WeakHandle(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(a: &Handle, b: &Handle) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(self.kind()).finish()
    }
}

/// Non-owning reference to a handle; does not keep it alive.
#[derive(Clone)]
pub struct WeakHandle(Weak<HandleData>);

impl WeakHandle {
    pub fn upgrade(&self) -> Option<Handle> {
        self.0.upgrade().map(Handle)
    }

    /// True once every strong reference has been dropped.
    pub fn is_released(&self) -> bool {
        self.0.strong_count() == 0
    }
}

/// Bytes of per-handle bookkeeping (reference count, tag, charge).
pub const HANDLE_HEADER_SIZE: usize = size_of::<HandleData>() + 2 * size_of::<usize>();

/// Builds handles for values, charging every block against the configured
/// budget.
#[derive(Clone, Debug, Default)]
pub struct HandleFactory {
    config: SharedConfig,
}

impl HandleFactory {
    pub fn new(config: SharedConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Build a handle for `value` and report the bytes it consumed, child
    /// handles included.
    ///
    /// `inner` marks a value nested inside an array already under
    /// construction; graph inspection is skipped for it. With
    /// `lazy_unserialize`, objects are stored serialized and decoded on read.
    pub fn create(
        &self,
        value: &Value,
        inner: bool,
        lazy_unserialize: bool,
    ) -> Result<(Handle, usize), AllocError> {
        match value {
            Value::Null => self.scalar(HandleKind::Null),
            Value::Bool(b) => self.scalar(HandleKind::Bool(*b)),
            Value::Int(i) => self.scalar(HandleKind::Int(*i)),
            Value::Double(d) => self.scalar(HandleKind::Double(*d)),
            Value::Str(s) => {
                let size = HANDLE_HEADER_SIZE + s.len();
                let charge = self.charge(size)?;
                Ok((Handle::new(HandleKind::Str(SharedString::new(s)), charge), size))
            }
            Value::Array(a) => self.make_shared(&a.borrow(), inner, lazy_unserialize),
            Value::Object(o) => self.make_object(value, &o.borrow(), inner, lazy_unserialize),
            // Resources cannot leave their context; they are stored as an
            // empty array.
            Value::Resource(_) => self.empty_array(),
            Value::Collection(_) => self.serialized(codec::serialize(value), ValueType::Collection),
        }
    }

    /// Handle for an array key.
    pub(crate) fn create_key(&self, key: &ArrayKey) -> Result<(Handle, usize), AllocError> {
        match key {
            ArrayKey::Int(i) => self.scalar(HandleKind::Int(*i)),
            ArrayKey::Str(s) => self.create(&Value::Str(s.clone()), true, false),
        }
    }

    /// A packed array with no elements.
    pub fn empty_array(&self) -> Result<(Handle, usize), AllocError> {
        let size = HANDLE_HEADER_SIZE;
        let charge = self.charge(size)?;
        Ok((Handle::new(HandleKind::Array(SharedArray::empty()), charge), size))
    }

    pub(crate) fn charge(&self, bytes: usize) -> Result<Charge, AllocError> {
        Charge::take(self.config.memory_budget(), bytes)
    }

    pub(crate) fn wrap(&self, kind: HandleKind, charge: Charge) -> Handle {
        Handle::new(kind, charge)
    }

    pub(crate) fn serialized(
        &self,
        bytes: Vec<u8>,
        tag: ValueType,
    ) -> Result<(Handle, usize), AllocError> {
        let size = HANDLE_HEADER_SIZE + bytes.len();
        let charge = self.charge(size)?;
        let kind = HandleKind::Serialized {
            tag,
            bytes: bytes.into_boxed_slice(),
        };
        Ok((Handle::new(kind, charge), size))
    }

    fn scalar(&self, kind: HandleKind) -> Result<(Handle, usize), AllocError> {
        let size = HANDLE_HEADER_SIZE;
        let charge = self.charge(size)?;
        Ok((Handle::new(kind, charge), size))
    }

    fn make_object(
        &self,
        value: &Value,
        obj: &Object,
        inner: bool,
        lazy_unserialize: bool,
    ) -> Result<(Handle, usize), AllocError> {
        let unsafe_shape = !inner && {
            let f = inspect::inspect(value);
            f.is_circular || f.has_collection
        };
        if lazy_unserialize || unsafe_shape {
            return self.serialized(codec::serialize(value), ValueType::Object);
        }
        let block = HANDLE_HEADER_SIZE + obj.class.len()
            + HashedSharedArray::table_size(obj.props.len());
        let charge = self.charge(block)?;
        let (props, children) = HashedSharedArray::build(
            self,
            obj.props.len(),
            obj.props.iter().map(|(k, v)| (k.clone(), v.clone())),
            lazy_unserialize,
        )?;
        let kind = HandleKind::Object(SharedObject {
            class: Arc::from(&*obj.class),
            props,
        });
        Ok((Handle::new(kind, charge), block + children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::MemoryBudget;

    #[test]
    fn scalar_and_string_handles_report_sizes() {
        let f = HandleFactory::default();
        let (h, size) = f.create(&Value::Int(7), false, false).unwrap();
        assert_eq!(h.value_type(), ValueType::Int64);
        assert_eq!(h.as_int(), Some(7));
        assert_eq!(size, HANDLE_HEADER_SIZE);

        let (s, size) = f.create(&Value::str("hello"), false, false).unwrap();
        assert_eq!(s.as_str(), Some("hello"));
        assert_eq!(size, HANDLE_HEADER_SIZE + 5);
        match s.kind() {
            HandleKind::Str(ss) => assert_eq!(ss.hash(), string_hash("hello")),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn string_hash_is_deterministic() {
        assert_eq!(string_hash("abc"), string_hash("abc"));
        assert_ne!(string_hash("abc"), string_hash("abd"));
    }

    #[test]
    fn resources_become_empty_arrays() {
        let f = HandleFactory::default();
        let (h, _) = f.create(&Value::Resource(3), true, false).unwrap();
        let arr = h.as_shared_array().unwrap();
        assert!(arr.is_empty());
        assert_eq!(h.value_type(), ValueType::Array);
    }

    #[test]
    fn lazy_objects_are_stored_serialized() {
        let f = HandleFactory::default();
        let obj = Value::object(Object::new("Point").with_prop("x", Value::Int(1)));
        let (lazy, _) = f.create(&obj, true, true).unwrap();
        assert_eq!(lazy.value_type(), ValueType::Object);
        assert!(matches!(lazy.kind(), HandleKind::Serialized { .. }));

        let (eager, _) = f.create(&obj, true, false).unwrap();
        match eager.kind() {
            HandleKind::Object(o) => {
                assert_eq!(o.class(), "Point");
                assert!(o.props().index_of_str("x").is_some());
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn release_credits_budget() {
        let budget = Arc::new(MemoryBudget::new(1 << 20));
        let f = HandleFactory::new(SharedConfig::new().budget(budget.clone()));
        let (h, size) = f.create(&Value::str("payload"), false, false).unwrap();
        assert_eq!(budget.used(), size);
        let weak = h.downgrade();
        drop(h);
        assert!(weak.is_released());
        assert_eq!(budget.used(), 0);
    }
}
