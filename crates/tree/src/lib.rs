//! The attributed ordered map: the universal in-memory value of the control
//! plane. A `Tree` maps string keys to tagged values in insertion order, and
//! every entry carries its own ordered attribute map.
//!
//! Values are addressed by separator-delimited paths with optional bracketed
//! indices into sequences of trees (`"motor.axes[2].position"`). Typed access
//! is explicit (`get::<T>`) or converting (`get_as::<T>`), with structured
//! errors carrying path context.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

mod cast;
pub mod codec;
mod compare;
mod error;
mod flatten;
mod merge;
mod path;
#[allow(clippy::module_inception)]
mod tree;
mod value;

pub use cast::{cast_value, to_text};
pub use compare::{fully_equals, similar};
pub use error::{Error, Result};
pub use merge::MergePolicy;
pub use path::{Path, Segment, DEFAULT_SEPARATOR};
pub use tree::{Attributes, Node, Target, Tree};
pub use value::{SchemaValue, TypeTag, Value, Variant, C32, C64};

/// Attribute naming the constructed class of a composite node. Nodes with
/// this attribute may be claimed by a registered handled class, which then
/// controls deep copying and sub-path enumeration.
pub const CLASS_ID_ATTR: &str = "__classId";

/// Hooks for composite payloads (array-like, image-like) that need more than
/// a member-wise copy.
#[derive(Clone, Copy)]
pub struct HandledClass {
    pub deep_copy: fn(&Tree) -> Tree,
    /// Substructure paths of the payload, relative to its node.
    pub deep_paths: fn(&Tree) -> Vec<String>,
}

lazy_static::lazy_static! {
    static ref HANDLED_CLASSES: RwLock<HashMap<String, HandledClass>> = RwLock::new(HashMap::new());
}

pub fn register_handled_class(class_id: &str, handler: HandledClass) {
    HANDLED_CLASSES
        .write()
        .expect("handled-class registry poisoned")
        .insert(class_id.to_string(), handler);
}

pub fn handled_class(class_id: &str) -> Option<HandledClass> {
    HANDLED_CLASSES
        .read()
        .expect("handled-class registry poisoned")
        .get(class_id)
        .copied()
}

impl Tree {
    /// A deep copy that consults the handled-class registry: a tree node
    /// whose `__classId` attribute names a registered class is copied by
    /// that class's hook instead of member-wise.
    pub fn deep_clone(&self) -> Tree {
        let mut out = Tree::new();
        for (key, node) in self.iter() {
            let value = match node.value() {
                Value::Tree(t) => {
                    let handler = node
                        .attributes()
                        .get_typed::<String>(CLASS_ID_ATTR)
                        .and_then(|id| handled_class(id));
                    match handler {
                        Some(h) => Value::Tree((h.deep_copy)(t)),
                        None => Value::Tree(t.deep_clone()),
                    }
                }
                Value::VecTree(v) => Value::VecTree(v.iter().map(Tree::deep_clone).collect()),
                Value::SharedTree(t) => Value::SharedTree(Arc::new(t.deep_clone())),
                Value::VecSharedTree(v) => Value::VecSharedTree(
                    v.iter().map(|t| Arc::new(t.deep_clone())).collect(),
                ),
                other => other.clone(),
            };
            out.insert(key, value).set_attributes(node.attributes().clone());
        }
        out
    }
}

/// Build a tree from path/value pairs:
///
/// ```
/// use tree::tree;
///
/// let t = tree! {
///     "device.id" => "motor/1",
///     "device.targets[0].position" => 1.5f64,
/// };
/// assert!(t.has("device.targets[0].position"));
/// ```
#[macro_export]
macro_rules! tree {
    () => { $crate::Tree::new() };
    ($($path:expr => $value:expr),+ $(,)?) => {{
        let mut t = $crate::Tree::new();
        $( t.set($path, $value).expect("valid tree literal"); )+
        t
    }};
}
