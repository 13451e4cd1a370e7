//! Introspection of cached values
//!
//! The engine never inspects a cached value directly. Pointer expirations
//! read scalars through [`ValueTree::lookup`] and exit stacks find managed
//! resources through [`ValueTree::resource`]. Both default to "nothing
//! here", so a type only implements the half it needs.
//!
//! Serializable types can delegate `lookup` to [`lookup_serialized`]:
//!
//! ```
//! use memoria::cache::path::PathSegment;
//! use memoria::cache::tree::lookup_serialized;
//! use memoria::ValueTree;
//! use serde::Serialize;
//!
//! #[derive(Clone, Serialize)]
//! struct Token {
//!     expiration: String,
//! }
//!
//! impl ValueTree for Token {
//!     fn lookup(&self, path: &[PathSegment]) -> Option<serde_json::Value> {
//!         lookup_serialized(self, path)
//!     }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::exit_stack::ManagedResource;
use super::path::PathSegment;

/// Read access into a cached value for pointers and exit stacks
pub trait ValueTree {
    /// The scalar found at `path`, if any
    #[must_use]
    fn lookup(&self, path: &[PathSegment]) -> Option<Value> {
        let _ = path;
        None
    }

    /// The managed resource found at `path`, if any
    #[must_use]
    fn resource(&self, path: &[PathSegment]) -> Option<Arc<dyn ManagedResource>> {
        let _ = path;
        None
    }
}

/// Walk a JSON value along `path`
///
/// An index segment also matches an object key spelled as that number.
#[must_use]
pub fn navigate<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match (segment, current) {
        (PathSegment::Field(name), Value::Object(map)) => map.get(name),
        (PathSegment::Index(index), Value::Array(items)) => items.get(*index),
        (PathSegment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
        _ => None,
    })
}

/// `lookup` implementation for any serializable value
#[must_use]
pub fn lookup_serialized<T: Serialize + ?Sized>(value: &T, path: &[PathSegment]) -> Option<Value> {
    let tree = serde_json::to_value(value).ok()?;
    navigate(&tree, path).cloned()
}

impl ValueTree for Value {
    fn lookup(&self, path: &[PathSegment]) -> Option<Value> {
        navigate(self, path).cloned()
    }
}

macro_rules! scalar_value_tree {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ValueTree for $ty {
                fn lookup(&self, path: &[PathSegment]) -> Option<Value> {
                    if path.is_empty() {
                        serde_json::to_value(self).ok()
                    } else {
                        None
                    }
                }
            }
        )*
    };
}

scalar_value_tree!(
    (),
    bool,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    &'static str
);

impl<T: ValueTree> ValueTree for Option<T> {
    fn lookup(&self, path: &[PathSegment]) -> Option<Value> {
        match self {
            Some(inner) => inner.lookup(path),
            None if path.is_empty() => Some(Value::Null),
            None => None,
        }
    }

    fn resource(&self, path: &[PathSegment]) -> Option<Arc<dyn ManagedResource>> {
        self.as_ref().and_then(|inner| inner.resource(path))
    }
}

impl<T: ValueTree> ValueTree for Vec<T> {
    fn lookup(&self, path: &[PathSegment]) -> Option<Value> {
        match path.split_first() {
            Some((PathSegment::Index(index), rest)) => self.get(*index)?.lookup(rest),
            _ => None,
        }
    }

    fn resource(&self, path: &[PathSegment]) -> Option<Arc<dyn ManagedResource>> {
        match path.split_first() {
            Some((PathSegment::Index(index), rest)) => self.get(*index)?.resource(rest),
            _ => None,
        }
    }
}

fn map_key(segment: &PathSegment) -> String {
    match segment {
        PathSegment::Field(name) => name.clone(),
        PathSegment::Index(index) => index.to_string(),
    }
}

impl<T: ValueTree, S: std::hash::BuildHasher> ValueTree for HashMap<String, T, S> {
    fn lookup(&self, path: &[PathSegment]) -> Option<Value> {
        let (head, rest) = path.split_first()?;
        self.get(&map_key(head))?.lookup(rest)
    }

    fn resource(&self, path: &[PathSegment]) -> Option<Arc<dyn ManagedResource>> {
        let (head, rest) = path.split_first()?;
        self.get(&map_key(head))?.resource(rest)
    }
}

impl<T: ValueTree> ValueTree for BTreeMap<String, T> {
    fn lookup(&self, path: &[PathSegment]) -> Option<Value> {
        let (head, rest) = path.split_first()?;
        self.get(&map_key(head))?.lookup(rest)
    }

    fn resource(&self, path: &[PathSegment]) -> Option<Arc<dyn ManagedResource>> {
        let (head, rest) = path.split_first()?;
        self.get(&map_key(head))?.resource(rest)
    }
}

/// A shared resource is itself the root of its tree.
impl<R: ManagedResource + 'static> ValueTree for Arc<R> {
    fn resource(&self, path: &[PathSegment]) -> Option<Arc<dyn ManagedResource>> {
        if path.is_empty() {
            let resource: Arc<dyn ManagedResource> = self.clone();
            Some(resource)
        } else {
            None
        }
    }
}
