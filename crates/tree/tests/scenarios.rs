//! End-to-end behavior of the attributed ordered map.

use pretty_assertions::assert_eq;
use tree::{tree, Error, Tree, TypeTag, Value};

#[test]
fn insertion_order_survives_overwrite_but_not_reinsertion() {
    let t = tree! {
        "should" => 1i32,
        "be" => 2i32,
        "iterated" => 3i32,
        "in" => 4i32,
        "correct" => 5i32,
        "order" => 6i32,
    };
    let keys: Vec<&str> = t.keys().collect();
    assert_eq!(keys, vec!["should", "be", "iterated", "in", "correct", "order"]);
    let values: Vec<i32> = t
        .iter()
        .map(|(_, n)| *n.get_typed::<i32>().unwrap())
        .collect();
    assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);

    // Overwriting in place does not reorder, also across a variant change.
    let mut t = t;
    t.set("be", "2").unwrap();
    let keys: Vec<&str> = t.keys().collect();
    assert_eq!(keys, vec!["should", "be", "iterated", "in", "correct", "order"]);
    assert_eq!(t.type_of("be").unwrap(), TypeTag::String);

    // Erase and re-set moves the key to the end.
    t.erase("be");
    t.set("be", "2").unwrap();
    let keys: Vec<&str> = t.keys().collect();
    assert_eq!(keys, vec!["should", "iterated", "in", "correct", "order", "be"]);

    // The lexical order is the secondary index.
    assert_eq!(
        t.keys_lexical(),
        vec!["be", "correct", "in", "iterated", "order", "should"]
    );
}

#[test]
fn erasing_while_traversing_yields_the_next_key() {
    let mut t = tree! { "a" => 1i32, "b" => 2i32, "c" => 3i32 };
    assert_eq!(t.erase_then_next("b").as_deref(), Some("c"));
    assert_eq!(t.erase_then_next("c"), None);

    let mut t = tree! { "b" => 1i32, "c" => 2i32, "a" => 3i32 };
    assert_eq!(t.erase_then_next_lexical("b").as_deref(), Some("c"));
    assert_eq!(t.erase_then_next_lexical("c"), None);
    assert!(t.has("a"));
}

#[test]
fn indexed_set_extends_with_empty_trees() {
    let mut t = Tree::new();
    t.set("a.b[2]", Tree::new()).unwrap();

    assert!(t.has("a.b[0]"));
    assert!(t.has("a.b[1]"));
    assert!(t.has("a.b[2]"));
    assert!(!t.has("a.b[3]"));
    assert_eq!(t.get::<Vec<Tree>>("a.b").unwrap().len(), 3);
    assert!(t.get::<Tree>("a.b[2]").unwrap().is_empty());

    // Reads never extend: beyond-length access is a structured failure.
    assert!(matches!(
        t.get::<Tree>("a.b[3]"),
        Err(Error::PathNotFound { .. })
    ));
    assert!(matches!(
        t.is::<Tree>("a.b[3]"),
        Err(Error::PathNotFound { .. })
    ));

    // Indexed erase shrinks the owning sequence.
    assert!(t.erase("a.b[1]"));
    assert_eq!(t.get::<Vec<Tree>>("a.b").unwrap().len(), 2);
}

#[test]
fn set_then_get_round_trips() {
    let mut t = Tree::new();
    t.set("a.b.c1.d", 1i32).unwrap();
    assert!(t.get::<Tree>("a").unwrap().has("b"));
    assert!(t.get::<Tree>("a.b").unwrap().has("c1.d"));
    assert_eq!(*t.get::<i32>("a.b.c1.d").unwrap(), 1);
    assert!(t.has("a.b.c1.d"));
    assert!(t.is::<i32>("a.b.c1.d").unwrap());
    assert!(!t.is::<i64>("a.b.c1.d").unwrap());

    // A read with the wrong type names both sides.
    match t.get::<String>("a.b.c1.d") {
        Err(Error::TypeMismatch {
            path,
            requested,
            stored,
        }) => {
            assert_eq!(path, "a.b.c1.d");
            assert_eq!(requested, TypeTag::String);
            assert_eq!(stored, TypeTag::Int32);
        }
        other => panic!("expected a type mismatch, got {other:?}"),
    }

    // Converting reads follow the cast matrix.
    assert_eq!(t.get_as::<String>("a.b.c1.d").unwrap(), "1");
    assert_eq!(t.get_as::<u8>("a.b.c1.d").unwrap(), 1);
}

#[test]
fn overwrite_keeps_attributes() {
    let mut t = tree! { "speed" => 4.2f64 };
    t.set_attribute("speed", "unit", "m/s").unwrap();

    t.set("speed", 5i32).unwrap();
    assert_eq!(t.type_of("speed").unwrap(), TypeTag::Int32);
    assert_eq!(
        t.attributes("speed").unwrap().get("unit"),
        Some(&Value::from("m/s"))
    );

    // An erase-and-set starts from a clean attribute slate.
    t.erase("speed");
    t.set("speed", 5i32).unwrap();
    assert!(t.attributes("speed").unwrap().is_empty());
}

#[test]
fn erase_path_prunes_emptied_ancestors() {
    let mut t = tree! { "a.b.c.d" => 1i32, "a.keep" => 2i32 };

    // erase removes only the terminal node.
    let mut plain = t.clone();
    plain.erase("a.b.c.d");
    assert!(plain.has("a.b.c"));
    assert!(plain.get::<Tree>("a.b.c").unwrap().is_empty());

    // erase_path also removes ancestors that became empty.
    t.erase_path("a.b.c.d");
    assert!(!t.has("a.b"));
    assert!(t.has("a.keep"));
}

#[test]
fn empty_keys_are_ordinary_keys() {
    let mut t = Tree::new();
    t.set(".i[1].j", 200i32).unwrap();
    assert!(t.has(""));
    assert!(t.has(".i[0]"));
    assert_eq!(*t.get::<i32>(".i[1].j").unwrap(), 200);
}

#[test]
fn leaf_paths_enumerate_sequences() {
    let t = tree! {
        "a.b" => 1i32,
        "c[0].d" => 2i32,
        "c[1]" => Tree::new(),
        "e" => Tree::new(),
    };
    assert_eq!(t.leaf_paths(), vec!["a.b", "c[0].d", "c[1]", "e"]);
}

#[test]
fn shared_trees_read_like_values() {
    use std::sync::Arc;

    let inner = tree! { "x" => 1i32 };
    let mut t = Tree::new();
    t.set("shared", Arc::new(inner)).unwrap();

    // Paths descend transparently through the shared reference.
    assert_eq!(*t.get::<i32>("shared.x").unwrap(), 1);
    assert_eq!(t.type_of("shared").unwrap(), TypeTag::TreePointer);

    // A converting read materializes an owned copy.
    let owned: Tree = t.get_as::<Tree>("shared").unwrap();
    assert_eq!(*owned.get::<i32>("x").unwrap(), 1);
}
