//! Structural similarity and full equality over trees.

use crate::tree::{Node, Tree};
use crate::value::Value;

/// Structural similarity: same shape, same types, same values. Attribute
/// maps and key ordering are ignored.
pub fn similar(a: &Tree, b: &Tree) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(key, an)| match b.get_node(key) {
        Some(bn) => value_similar(an.value(), bn.value()),
        None => false,
    })
}

fn value_similar(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Tree(at), Value::Tree(bt)) => similar(at, bt),
        (Value::SharedTree(at), Value::SharedTree(bt)) => similar(at, bt),
        (Value::VecTree(av), Value::VecTree(bv)) => {
            av.len() == bv.len() && av.iter().zip(bv).all(|(x, y)| similar(x, y))
        }
        (Value::VecSharedTree(av), Value::VecSharedTree(bv)) => {
            av.len() == bv.len() && av.iter().zip(bv).all(|(x, y)| similar(x, y))
        }
        _ => a == b,
    }
}

/// Full equality: similarity plus equal attribute maps, and equal key and
/// attribute ordering when `ordered`.
pub fn fully_equals(a: &Tree, b: &Tree, ordered: bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    if ordered {
        a.iter()
            .zip(b.iter())
            .all(|((ak, an), (bk, bn))| ak == bk && node_equal(an, bn, true))
    } else {
        a.iter().all(|(key, an)| match b.get_node(key) {
            Some(bn) => node_equal(an, bn, false),
            None => false,
        })
    }
}

fn node_equal(a: &Node, b: &Node, ordered: bool) -> bool {
    if a.attributes().len() != b.attributes().len() {
        return false;
    }
    let attrs_equal = if ordered {
        a.attributes()
            .iter()
            .zip(b.attributes().iter())
            .all(|((ak, av), (bk, bv))| ak == bk && av == bv)
    } else {
        a.attributes()
            .iter()
            .all(|(key, av)| b.attributes().get(key) == Some(av))
    };
    attrs_equal && value_equal(a.value(), b.value(), ordered)
}

fn value_equal(a: &Value, b: &Value, ordered: bool) -> bool {
    match (a, b) {
        (Value::Tree(at), Value::Tree(bt)) => fully_equals(at, bt, ordered),
        (Value::SharedTree(at), Value::SharedTree(bt)) => fully_equals(at, bt, ordered),
        (Value::VecTree(av), Value::VecTree(bv)) => {
            av.len() == bv.len()
                && av.iter().zip(bv).all(|(x, y)| fully_equals(x, y, ordered))
        }
        (Value::VecSharedTree(av), Value::VecSharedTree(bv)) => {
            av.len() == bv.len()
                && av.iter().zip(bv).all(|(x, y)| fully_equals(x, y, ordered))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tree;

    #[test]
    fn similarity_ignores_attributes() {
        let mut a = tree! { "x.y" => 1i32, "z" => vec!["s".to_string()] };
        let b = a.clone();
        a.set_attribute("x.y", "unit", "m").unwrap();
        assert!(similar(&a, &b));
        assert!(!fully_equals(&a, &b, false));
    }

    #[test]
    fn similarity_requires_same_types() {
        let a = tree! { "x" => 1i32 };
        let b = tree! { "x" => 1i64 };
        assert!(!similar(&a, &b));
    }

    #[test]
    fn full_equality_is_reflexive_and_copy_stable() {
        let mut a = tree! { "a" => 1i32, "b.c[1].d" => "deep" };
        a.set_attribute("a", "alias", 7i32).unwrap();
        assert!(fully_equals(&a, &a, true));
        assert!(fully_equals(&a, &a.clone(), true));
        assert!(similar(&a, &a.clone()));
    }

    #[test]
    fn ordered_equality_sees_key_order() {
        let mut a = Tree::new();
        a.set("x", 1i32).unwrap();
        a.set("y", 2i32).unwrap();
        let mut b = Tree::new();
        b.set("y", 2i32).unwrap();
        b.set("x", 1i32).unwrap();
        assert!(fully_equals(&a, &b, false));
        assert!(!fully_equals(&a, &b, true));
    }
}
