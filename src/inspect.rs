//! Graph inspection ahead of a top-level cache insertion.
//!
//! One depth-first walk reports whether the graph loops back on itself,
//! whether it holds collection objects (which have no structural form in
//! the cache), and whether anything in it needs counted ownership.

use crate::value::{Array, ArrayKey, Value};
use hashbrown::HashSet;
use indexmap::IndexMap;

/// Shape facts about a value graph.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphFeatures {
    /// Some container is reachable from itself.
    pub is_circular: bool,
    pub has_collection: bool,
    pub has_object_or_resource: bool,
}

/// Walk the graph rooted at `value`.
pub fn inspect(value: &Value) -> GraphFeatures {
    let mut w = Walker::default();
    w.visit(value);
    w.features
}

pub(crate) fn inspect_array(arr: &Array) -> GraphFeatures {
    let mut w = Walker::default();
    w.visit_array(arr);
    w.features
}

#[derive(Default)]
struct Walker {
    // Containers on the current path; meeting one again is a cycle.
    on_path: HashSet<usize>,
    // Containers fully explored; shared sub-graphs are walked once.
    done: HashSet<usize>,
    // Containers built on the fly by shared views, held so their addresses
    // stay unique for the rest of the walk.
    pinned: Vec<Value>,
    features: GraphFeatures,
}

impl Walker {
    fn enter(&mut self, id: usize) -> bool {
        if self.on_path.contains(&id) {
            self.features.is_circular = true;
            return false;
        }
        if self.done.contains(&id) {
            return false;
        }
        self.on_path.insert(id);
        true
    }

    fn leave(&mut self, id: usize) {
        self.on_path.remove(&id);
        self.done.insert(id);
    }

    fn visit(&mut self, v: &Value) {
        match v {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Double(_) | Value::Str(_) => {}
            Value::Array(a) => self.visit_array(&a.borrow()),
            Value::Object(o) => {
                self.features.has_object_or_resource = true;
                let id = o.as_ptr() as *const () as usize;
                if self.enter(id) {
                    self.visit_map(&o.borrow().props);
                    self.leave(id);
                }
            }
            Value::Resource(_) => self.features.has_object_or_resource = true,
            Value::Collection(c) => {
                self.features.has_collection = true;
                let id = c.as_ptr() as *const () as usize;
                if self.enter(id) {
                    self.visit_map(&c.borrow().items);
                    self.leave(id);
                }
            }
        }
    }

    fn visit_array(&mut self, arr: &Array) {
        let id = arr as *const Array as *const () as usize;
        if !self.enter(id) {
            return;
        }
        for (_, v) in arr.iter() {
            self.visit(&v);
            if arr.is_shared() && v.is_container() {
                self.pinned.push(v);
            }
        }
        self.leave(id);
    }

    fn visit_map(&mut self, map: &IndexMap<ArrayKey, Value>) {
        for v in map.values() {
            self.visit(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Collection, CollectionKind, Object};

    #[test]
    fn scalars_have_no_features() {
        let v = Value::array([Value::Int(1), Value::str("a")].into_iter().collect());
        assert_eq!(inspect(&v), GraphFeatures::default());
    }

    #[test]
    fn self_reference_is_circular() {
        let v = Value::new_array();
        let a = v.as_array().unwrap().clone();
        a.borrow_mut().push(v.clone());
        assert!(inspect(&v).is_circular);
        assert!(inspect_array(&a.borrow()).is_circular);
    }

    #[test]
    fn shared_subarray_is_not_circular() {
        let shared = Value::array([Value::Int(1)].into_iter().collect());
        let v = Value::array([shared.clone(), shared].into_iter().collect());
        assert!(!inspect(&v).is_circular);
    }

    #[test]
    fn objects_resources_and_collections_are_reported() {
        let obj = Value::object(Object::new("C"));
        let v = Value::array([obj].into_iter().collect());
        let f = inspect(&v);
        assert!(f.has_object_or_resource);
        assert!(!f.has_collection);

        let v = Value::array([Value::Resource(1)].into_iter().collect());
        assert!(inspect(&v).has_object_or_resource);

        let c = Value::collection(Collection::new(CollectionKind::Vector));
        let v = Value::array([c].into_iter().collect());
        assert!(inspect(&v).has_collection);
    }

    #[test]
    fn cycle_through_object_is_circular() {
        let obj = Value::object(Object::new("Node"));
        if let Value::Object(o) = &obj {
            o.borrow_mut().props.insert(ArrayKey::from("self"), obj.clone());
        }
        let v = Value::array([obj].into_iter().collect());
        assert!(inspect(&v).is_circular);
    }
}
