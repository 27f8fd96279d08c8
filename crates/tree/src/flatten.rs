//! Flatten a tree to a single level of full-path keys, and back.

use crate::path::DEFAULT_SEPARATOR;
use crate::tree::Tree;
use crate::value::Value;
use crate::Result;

impl Tree {
    /// Produce a single-level tree whose keys are the full paths of this
    /// tree's leaves. Leaf attributes are preserved; attributes of interior
    /// nodes are not part of the flattened form.
    pub fn flatten(&self) -> Tree {
        self.flatten_with(DEFAULT_SEPARATOR)
    }

    pub fn flatten_with(&self, sep: char) -> Tree {
        let mut out = Tree::new();
        flatten_into(self, None, sep, &mut out);
        out
    }

    /// Rebuild the nested form from a flattened tree. The inverse of
    /// `flatten` up to structural similarity.
    pub fn unflatten(&self) -> Result<Tree> {
        self.unflatten_with(DEFAULT_SEPARATOR)
    }

    pub fn unflatten_with(&self, sep: char) -> Result<Tree> {
        let mut out = Tree::new();
        for (key, node) in self.iter() {
            out.set_with(key, sep, node.value().clone())?;
            if !node.attributes().is_empty() {
                if let Some(target) = out.find_mut_with(key, sep) {
                    target.set_attributes(node.attributes().clone());
                }
            }
        }
        Ok(out)
    }
}

// The prefix is optional rather than empty so that an empty-string key at
// the root still gets its separator.
fn flatten_into(tree: &Tree, prefix: Option<&str>, sep: char, out: &mut Tree) {
    for (key, node) in tree.iter() {
        let full = match prefix {
            None => key.to_string(),
            Some(prefix) => format!("{prefix}{sep}{key}"),
        };
        match node.value() {
            Value::Tree(t) if !t.is_empty() => flatten_into(t, Some(&full), sep, out),
            Value::VecTree(v) if !v.is_empty() => {
                for (i, elem) in v.iter().enumerate() {
                    let slot = format!("{full}[{i}]");
                    if elem.is_empty() {
                        out.insert(slot, Tree::new());
                    } else {
                        flatten_into(elem, Some(&slot), sep, out);
                    }
                }
            }
            value => {
                let flat = out.insert(full, value.clone());
                flat.set_attributes(node.attributes().clone());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::compare::similar;
    use crate::tree;
    use crate::value::Value;
    use crate::Tree;

    #[test]
    fn flatten_keys_are_full_paths() {
        let mut t = tree! {
            "a.b.c" => 1i32,
            "a.b.d" => vec![1.0f64, 2.0],
            "e[0].f" => "row",
            "g" => Tree::new(),
        };
        t.set_attribute("a.b.c", "unit", "m").unwrap();

        let flat = t.flatten();
        let keys: Vec<&str> = flat.keys().collect();
        assert_eq!(keys, vec!["a.b.c", "a.b.d", "e[0].f", "g"]);
        // Leaf attributes survive.
        assert_eq!(
            flat.get_node("a.b.c").unwrap().attributes().get("unit"),
            Some(&Value::from("m"))
        );
    }

    #[test]
    fn unflatten_inverts_flatten() {
        let t = tree! {
            "a.b" => 12u64,
            "a.c[0].d" => true,
            "a.c[2]" => Tree::new(),
            "" => -1i32,
        };
        let round = t.flatten().unflatten().unwrap();
        assert!(similar(&t, &round));
    }

    #[test]
    fn empty_sequence_elements_survive() {
        let mut t = Tree::new();
        t.set("x[1]", Tree::new()).unwrap();
        let flat = t.flatten();
        let keys: Vec<&str> = flat.keys().collect();
        assert_eq!(keys, vec!["x[0]", "x[1]"]);
        assert!(similar(&t, &flat.unflatten().unwrap()));
    }
}
