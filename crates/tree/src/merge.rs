//! Overlay and removal of one tree onto another.

use std::collections::BTreeSet;

use crate::path::{Path, Segment};
use crate::tree::{Node, Tree};
use crate::value::Value;

/// How attributes of nodes present on both sides are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// The target node's attribute map is replaced wholesale.
    #[default]
    ReplaceAttributes,
    /// Union-merge with per-key overwrite from the source.
    MergeAttributes,
}

impl Tree {
    /// Overlay `other` onto self. Scalar leaves take the source value,
    /// nested trees recurse, sequences-of-trees are replaced wholesale.
    pub fn merge(&mut self, other: &Tree, policy: MergePolicy) {
        merge_impl(self, other, policy, None)
    }

    /// Overlay only the listed paths of `other`. A path selecting a
    /// sequence index takes that source element alone; selected elements
    /// are compacted to a dense prefix. Invalid indices are tolerated
    /// no-ops.
    pub fn merge_selected(
        &mut self,
        other: &Tree,
        policy: MergePolicy,
        selected_paths: &BTreeSet<String>,
    ) {
        let parsed: Vec<Path> = selected_paths.iter().map(|p| Path::parse(p)).collect();
        let selection: Vec<&[Segment]> = parsed.iter().map(|p| p.segments()).collect();
        merge_impl(self, other, policy, Some(&selection))
    }

    /// Remove from self every path present in `other`. An `other` entry
    /// whose value is an empty tree leaves the corresponding target
    /// sub-tree present but empty. Removal is by path, never by value
    /// equality.
    pub fn subtract(&mut self, other: &Tree) {
        for (key, onode) in other.iter() {
            match onode.value() {
                Value::Tree(ot) => {
                    if let Some(node) = self.get_node_mut(key) {
                        if let Value::Tree(tt) = node.value_mut() {
                            if ot.is_empty() {
                                tt.clear();
                            } else {
                                tt.subtract(ot);
                            }
                        }
                    }
                }
                Value::VecTree(ov) => {
                    // Walk element paths deepest-first so erased indices
                    // stay valid.
                    for (i, oelem) in ov.iter().enumerate().rev() {
                        let slot = format!("{key}[{i}]");
                        if oelem.is_empty() {
                            self.erase(&slot);
                        } else if let Ok(telem) = self.get_mut::<Tree>(&slot) {
                            telem.subtract(oelem);
                        }
                    }
                }
                _ => {
                    self.remove(key);
                }
            }
        }
    }
}

impl std::ops::AddAssign<&Tree> for Tree {
    fn add_assign(&mut self, other: &Tree) {
        self.merge(other, MergePolicy::ReplaceAttributes)
    }
}

impl std::ops::SubAssign<&Tree> for Tree {
    fn sub_assign(&mut self, other: &Tree) {
        self.subtract(other)
    }
}

/// The suffixes of the selection that apply below one source node.
struct Applicable<'a> {
    /// Deeper selections, with their leading segment stripped.
    tails: Vec<&'a [Segment]>,
    /// Tails grouped by the index the leading segment carried.
    indexed_tails: Vec<(usize, &'a [Segment])>,
    /// Indices selected terminally (`"a[2]"`).
    indices: Vec<usize>,
    /// A terminal index-less selection (`"a"`): the node is taken whole.
    whole: bool,
}

fn applicable<'a>(selection: &[&'a [Segment]], key: &str) -> Applicable<'a> {
    let mut out = Applicable {
        tails: Vec::new(),
        indexed_tails: Vec::new(),
        indices: Vec::new(),
        whole: false,
    };
    for path in selection {
        let (first, tail) = match path.split_first() {
            Some(split) => split,
            None => continue,
        };
        if first.key != key {
            continue;
        }
        match (first.index, tail.is_empty()) {
            (None, true) => out.whole = true,
            (None, false) => out.tails.push(tail),
            (Some(i), true) => out.indices.push(i),
            (Some(i), false) => out.indexed_tails.push((i, tail)),
        }
    }
    out
}

impl Applicable<'_> {
    fn selects_nothing(&self) -> bool {
        !self.whole && self.tails.is_empty() && self.indexed_tails.is_empty() && self.indices.is_empty()
    }
}

fn apply_attributes(target: &mut Node, source: &Node, policy: MergePolicy, existed: bool) {
    if !existed {
        target.set_attributes(source.attributes().clone());
        return;
    }
    match policy {
        MergePolicy::ReplaceAttributes => target.set_attributes(source.attributes().clone()),
        MergePolicy::MergeAttributes => target.attributes_mut().merge(source.attributes()),
    }
}

fn merge_impl(
    target: &mut Tree,
    source: &Tree,
    policy: MergePolicy,
    selection: Option<&[&[Segment]]>,
) {
    for (key, snode) in source.iter() {
        let sel = selection.map(|s| applicable(s, key));
        if let Some(sel) = &sel {
            if sel.selects_nothing() {
                continue;
            }
        }

        match snode.value() {
            Value::Tree(st) => {
                // Index selections do not apply to tree nodes.
                let child_selection = match &sel {
                    None => None,
                    Some(s) if s.whole => None,
                    Some(s) => {
                        if s.tails.is_empty() {
                            continue;
                        }
                        Some(s.tails.as_slice())
                    }
                };
                let existed = target.get_node(key).is_some();
                let tnode = target.insert_node_default(key);
                apply_attributes(tnode, snode, policy, existed);
                if !tnode.value().is_tree() {
                    tnode.set_value(Tree::new());
                }
                let tt = match tnode.value_mut() {
                    Value::Tree(t) => t,
                    _ => unreachable!("just ensured a tree value"),
                };
                merge_impl(tt, st, policy, child_selection);
            }
            Value::VecTree(sv) => {
                let rows = match &sel {
                    None => Some(sv.clone()),
                    Some(s) if s.whole => Some(sv.clone()),
                    Some(s) => {
                        // Selected source elements, in index order,
                        // compacted to a dense prefix.
                        let mut picked: Vec<usize> = s
                            .indices
                            .iter()
                            .copied()
                            .chain(s.indexed_tails.iter().map(|(i, _)| *i))
                            .filter(|i| *i < sv.len())
                            .collect();
                        picked.sort_unstable();
                        picked.dedup();
                        if picked.is_empty() {
                            None
                        } else {
                            Some(
                                picked
                                    .into_iter()
                                    .map(|i| {
                                        if s.indices.contains(&i) {
                                            return sv[i].clone();
                                        }
                                        let tails: Vec<&[Segment]> = s
                                            .indexed_tails
                                            .iter()
                                            .filter(|(j, _)| *j == i)
                                            .map(|(_, tail)| *tail)
                                            .collect();
                                        let mut row = Tree::new();
                                        merge_impl(&mut row, &sv[i], policy, Some(&tails));
                                        row
                                    })
                                    .collect(),
                            )
                        }
                    }
                };
                let Some(rows) = rows else {
                    continue;
                };
                let existed = target.get_node(key).is_some();
                let tnode = target.insert_node_default(key);
                apply_attributes(tnode, snode, policy, existed);
                tnode.set_value(rows);
            }
            scalar => {
                // Leaves merge only on a whole selection; indices are
                // invalid for leaves and tolerated as no-ops.
                if let Some(sel) = &sel {
                    if !sel.whole {
                        continue;
                    }
                }
                let existed = target.get_node(key).is_some();
                let tnode = target.insert_node_default(key);
                apply_attributes(tnode, snode, policy, existed);
                tnode.set_value(scalar.clone());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compare::{fully_equals, similar};
    use crate::tree;

    #[test]
    fn scalars_overwrite_and_trees_recurse() {
        let mut target = tree! { "a" => 1i32, "f.g" => 5i32 };
        let source = tree! { "a" => 21i32, "f" => Tree::new(), "b.c" => 22i32 };
        target += &source;

        assert_eq!(*target.get::<i32>("a").unwrap(), 21);
        assert_eq!(*target.get::<i32>("b.c").unwrap(), 22);
        // An empty source tree does not wipe an existing target tree.
        assert_eq!(*target.get::<i32>("f.g").unwrap(), 5);
    }

    #[test]
    fn attribute_policies() {
        let mut replace = tree! { "f.g" => 1i32 };
        replace.set_attribute("f", "kept", 6i32).unwrap();
        let mut merged = replace.clone();

        let mut source = tree! { "f.h" => 2i32 };
        source.set_attribute("f", "new", 77u32).unwrap();

        replace.merge(&source, MergePolicy::ReplaceAttributes);
        assert_eq!(replace.attributes("f").unwrap().len(), 1);
        assert!(replace.has_attribute("f", "new"));

        merged.merge(&source, MergePolicy::MergeAttributes);
        assert_eq!(merged.attributes("f").unwrap().len(), 2);
        assert!(merged.has_attribute("f", "kept"));
        assert!(merged.has_attribute("f", "new"));
    }

    #[test]
    fn merge_with_selected_paths() {
        let mut target = tree! {
            "a" => 1i32,
            "b" => 2i32,
            "c.b[0].g" => 3i32,
            "c.c[0].d" => 4i32,
            "c.c[1].a.b.c" => 6i32,
            "d.e" => 7i32,
        };
        let source = tree! {
            "a" => 21i32,
            "b.c" => 22i32,
            "c.b[0].key" => "value",
            "c.b[1].d" => 24i32,
            "e" => 27i32,
            "g.h.i" => -88i32,
            "g.h.j" => -188i32,
            "h.i" => -199i32,
            "h.j" => 199i32,
            ".i[1].j" => 200i32,
            ".i[2].k.l" => 5.0f64,
            ".i[3]" => Tree::new(),
        };
        let selected: BTreeSet<String> = ["a", "b.c", "g.h.i", "h.i", ".i[2]", ".i[5]"]
            .into_iter()
            .map(String::from)
            .collect();
        target.merge_selected(&source, MergePolicy::MergeAttributes, &selected);

        // Everything the target had is preserved.
        for path in ["b", "c.b[0].g", "c.c[0].d", "c.c[1].a.b.c", "d.e"] {
            assert!(target.has(path), "lost {path}");
        }
        // The selected source paths arrived.
        assert_eq!(*target.get::<i32>("a").unwrap(), 21);
        assert_eq!(*target.get::<i32>("b.c").unwrap(), 22);
        assert_eq!(*target.get::<i32>("g.h.i").unwrap(), -88);
        assert_eq!(*target.get::<i32>("h.i").unwrap(), -199);
        // Row 2 was selected and compacted to index 0.
        assert_eq!(*target.get::<f64>(".i[0].k.l").unwrap(), 5.0);
        assert!(!target.has(".i[1]"));
        // Unselected source content stayed out, also under shared parents.
        assert!(!target.has("c.b[0].key"));
        assert!(!target.has("c.b[1]"));
        assert!(!target.has("e"));
        assert!(!target.has("g.h.j"));
        assert!(!target.has("h.j"));
    }

    #[test]
    fn selected_indices_beyond_source_are_tolerated() {
        let target_template = tree! { "a[1].b" => 1i32, "c" => "scalar" };
        let source = tree! { "a[2].a" => 33i32, "ha" => 9i32 };

        let mut target = target_template.clone();
        let selected: BTreeSet<String> = ["a[10]", "c[10]", "d[10]", "ha[0]"]
            .into_iter()
            .map(String::from)
            .collect();
        target.merge_selected(&source, MergePolicy::MergeAttributes, &selected);
        assert!(similar(&target, &target_template));
    }

    #[test]
    fn tables_replace_wholesale() {
        let mut target = tree! {
            "table[0].a" => 1i32,
            "table[1].a" => 12i32,
        };
        let mut source = tree! {
            "table[0].a" => 101i32,
            "table[1].a" => 102i32,
            "table[2].a" => 103i32,
        };
        source
            .set_attribute("table", "rowSchema", true)
            .unwrap();

        let mut replaced = target.clone();
        replaced += &source;
        assert!(fully_equals(&replaced, &source, false));

        // Selecting rows keeps only those, compacted.
        let selected: BTreeSet<String> = ["table[0]", "table[2]"]
            .into_iter()
            .map(String::from)
            .collect();
        target.merge_selected(&source, MergePolicy::MergeAttributes, &selected);
        let rows = target.get::<Vec<Tree>>("table").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(*rows[0].get::<i32>("a").unwrap(), 101);
        assert_eq!(*rows[1].get::<i32>("a").unwrap(), 103);
    }

    #[test]
    fn subtract_removes_by_path() {
        let mut target = tree! {
            "a" => 1i32,
            "b" => 2i32,
            "c.c[0].d" => 4i32,
            "c.c[1].a.b.c" => 6i32,
            "d.e" => 7i32,
        };
        let source = tree! { "a" => 21i32, "b.c" => 22i32, "e" => 27i32 };
        target += &source;
        target -= &source;

        // "a" is removed although it pre-existed: removal is by path.
        assert!(!target.has("a"));
        assert!(target.get::<Tree>("b").unwrap().is_empty());
        assert!(!target.has("e"));
        assert_eq!(*target.get::<i32>("c.c[0].d").unwrap(), 4);
        assert_eq!(*target.get::<i32>("d.e").unwrap(), 7);
    }

    #[test]
    fn subtract_with_empty_tree_clears_but_keeps() {
        let mut target = tree! { "sub.x" => 1i32, "sub.y" => 2i32, "other" => 3i32 };
        let source = tree! { "sub" => Tree::new() };
        target -= &source;
        assert!(target.has("sub"));
        assert!(target.get::<Tree>("sub").unwrap().is_empty());
        assert!(target.has("other"));
    }
}
