//! Canonical tree form of multi-dimensional array payloads, and the
//! handled-class hooks that teach the tree layer how to copy them.

use std::sync::Once;

use tree::{HandledClass, Tree, TypeTag, Value, CLASS_ID_ATTR};

pub const NDARRAY_CLASS_ID: &str = "NDArray";
pub const SLOT_CLASS_ID: &str = "Slot";

/// Keys of the canonical array form.
pub const NDARRAY_DATA: &str = "data";
pub const NDARRAY_SHAPE: &str = "shape";
pub const NDARRAY_TYPE: &str = "type";

/// Build the canonical array tree: raw bytes, a shape vector, and the
/// element type literal.
pub fn ndarray(data: bytes::Bytes, shape: Vec<u64>, element: TypeTag) -> Tree {
    let mut t = Tree::new();
    t.insert(NDARRAY_DATA, Value::ByteArray(data));
    t.insert(NDARRAY_SHAPE, shape);
    t.insert(NDARRAY_TYPE, element.literal());
    t
}

/// Re-wrap a user-supplied array payload into the canonical form, tagging
/// it with the class attribute.
pub(crate) fn canonicalize(payload: &Tree) -> Tree {
    let mut out = Tree::new();
    for key in [NDARRAY_DATA, NDARRAY_SHAPE, NDARRAY_TYPE] {
        if let Some(node) = payload.get_node(key) {
            out.insert(key, node.value().clone())
                .set_attributes(node.attributes().clone());
        }
    }
    out
}

pub(crate) fn shape_of(payload: &Tree) -> Option<Vec<u64>> {
    payload.get_as::<Vec<u64>>(NDARRAY_SHAPE).ok()
}

pub(crate) fn element_type_of(payload: &Tree) -> Option<TypeTag> {
    let literal = payload.get::<String>(NDARRAY_TYPE).ok()?;
    TypeTag::from_literal(literal)
}

static REGISTER: Once = Once::new();

/// Install the array hooks into the tree layer's handled-class registry.
/// Idempotent; the validator calls this on construction.
pub fn register_handled_classes() {
    REGISTER.call_once(|| {
        tree::register_handled_class(
            NDARRAY_CLASS_ID,
            HandledClass {
                deep_copy: |payload| canonicalize(payload),
                deep_paths: |_payload| {
                    vec![
                        NDARRAY_DATA.to_string(),
                        NDARRAY_SHAPE.to_string(),
                        NDARRAY_TYPE.to_string(),
                    ]
                },
            },
        );
    });
}

/// Whether a node's `__classId` marks it as a canonical array.
pub(crate) fn is_ndarray_node(tree_node: &tree::Node) -> bool {
    tree_node
        .attributes()
        .get_typed::<String>(CLASS_ID_ATTR)
        .map(|id| id == NDARRAY_CLASS_ID)
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonical_form_round_trips() {
        let arr = ndarray(bytes::Bytes::from_static(&[1, 2, 3, 4]), vec![2, 2], TypeTag::UInt8);
        assert_eq!(shape_of(&arr), Some(vec![2, 2]));
        assert_eq!(element_type_of(&arr), Some(TypeTag::UInt8));

        let mut noisy = arr.clone();
        noisy.insert("junk", 1i32);
        let canonical = canonicalize(&noisy);
        assert!(!canonical.has("junk"));
        assert_eq!(shape_of(&canonical), Some(vec![2, 2]));
    }

    #[test]
    fn deep_copy_goes_through_the_registry() {
        register_handled_classes();
        let mut t = Tree::new();
        t.set(
            "image",
            ndarray(bytes::Bytes::from_static(&[9]), vec![1], TypeTag::UInt8),
        )
        .unwrap();
        t.set("image.junk", 5i32).unwrap();
        t.set_attribute("image", CLASS_ID_ATTR, NDARRAY_CLASS_ID)
            .unwrap();

        let copy = t.deep_clone();
        assert!(!copy.has("image.junk"));
        assert!(copy.has("image.shape"));
    }
}
