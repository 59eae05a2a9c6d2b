//! shared-array: immutable, reference-counted array representations for a
//! process-wide value cache, plus the policy that picks one and the code
//! that turns a cached handle back into a live value.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: store a request-local array graph once, read it from any thread
//!   without copying, and release every piece of it when the last reader
//!   lets go.
//! - Layers:
//!   - `Value`/`Array`: the request-local model. Arrays are insertion
//!     ordered maps with copy-on-write views over cached data.
//!   - `Handle`: an atomically counted, immutable cached value. Scalars,
//!     strings, objects, serialized blobs and arrays all sit behind one.
//!   - `HashedSharedArray`/`PackedSharedArray`: the structural array
//!     layouts. Hashed arrays own a key handle and a value handle per
//!     element and chain collisions through bucket indices; packed arrays
//!     own one value handle per element and use the position as the key.
//!   - `UncountedArray`: a flattened copy of a pure scalar graph with no
//!     per-element counting at all.
//!   - `HandleFactory::make_shared`: inspects a graph and chooses among
//!     serialized, uncounted, packed and hashed.
//!   - `make_array`/`Handle::to_value`: materialization back into `Value`.
//!
//! Constraints
//! - Cached data is never mutated after construction. Writes land on a
//!   request-local copy made on first write.
//! - Every handle draws its bytes from an optional `MemoryBudget`; running
//!   out is the allocation-failure path.
//! - Construction is all-or-nothing. A failed attempt releases every child
//!   handle it created before the error reaches the caller.
//!
//! Invariants
//! - Hashed capacity is a power of two `>= 2` and `>= len`; slot index is
//!   `hash & capacity_mask`.
//! - Every bucket is on exactly one chain, the chain of its key's slot.
//!   Chains are newest-first; iteration is insertion order.
//! - A hashed array owns `2 * len` child handles, a packed array `len`.
//!   All of them are released when the array is, and only then is the
//!   array's own block returned to the budget.
//! - Integer keys hash to their own value; string keys carry a hash cached
//!   at creation. Integer and string keys never compare equal.
//!
//! Notes and non-goals
//! - Key uniqueness is the caller's contract. Duplicate keys are stored
//!   as given and lookup finds the most recently inserted one.
//! - Cycles and collections survive only through the serialized form;
//!   the structural layouts never hold a back edge.

mod budget;
pub mod codec;
mod config;
mod error;
mod handle;
mod inspect;
mod local;
mod policy;
mod shared_array;
mod shared_array_proptest;
mod uncounted;
mod value;

// Public surface
pub use budget::MemoryBudget;
pub use config::SharedConfig;
pub use error::{AllocError, DecodeError, DecodeErrorKind};
pub use handle::{
    string_hash, Handle, HandleFactory, HandleKind, SharedObject, SharedString, ValueType,
    WeakHandle, HANDLE_HEADER_SIZE,
};
pub use inspect::{inspect, GraphFeatures};
pub use local::make_array;
pub use shared_array::{
    capacity_for, Bucket, Chain, HashedSharedArray, PackedSharedArray, SharedArray,
};
pub use uncounted::{UncountedArray, UncountedKey, UncountedValue};
pub use value::{
    Array, ArrayKey, ArrayRef, Collection, CollectionKind, CollectionRef, Iter, KeyRef, Object,
    ObjectRef, Value,
};
