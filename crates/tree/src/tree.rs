use indexmap::IndexMap;

use crate::path::{Path, Segment, DEFAULT_SEPARATOR};
use crate::value::{TypeTag, Value, Variant};
use crate::{Error, Result};

/// Attributes is an insertion-ordered `key → Value` map attached to every
/// tree node. By convention attribute values are non-composite variants;
/// schema-valued attributes (`rowSchema`) are the exception.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    map: IndexMap<String, Value>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.map.get_mut(key)
    }

    pub fn get_typed<T: Variant>(&self, key: &str) -> Option<&T> {
        self.get(key).and_then(T::variant_ref)
    }

    /// Converting read, applying the scalar conversion matrix.
    pub fn get_as<T: Variant>(&self, key: &str) -> Result<T> {
        let value = self.get(key).ok_or_else(|| Error::AttributeNotFound {
            path: String::new(),
            key: key.to_string(),
        })?;
        let cast = crate::cast::cast_value(value, T::TAG)?;
        Ok(T::unwrap_value(cast).expect("cast_value returns the requested variant"))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.map.insert(key.into(), value.into());
    }

    /// Remove an attribute, preserving the order of the remaining ones.
    pub fn erase(&mut self, key: &str) -> bool {
        self.map.shift_remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.map.clear()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Union-merge `other` into self with per-key overwrite.
    pub fn merge(&mut self, other: &Attributes) {
        for (key, value) in other.iter() {
            self.set(key, value.clone());
        }
    }
}

impl FromIterator<(String, Value)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Attributes {
            map: iter.into_iter().collect(),
        }
    }
}

/// A tree node: a tagged value plus its attribute map. The key lives in the
/// owning tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    value: Value,
    attributes: Attributes,
}

impl Node {
    pub fn new(value: impl Into<Value>) -> Self {
        Node {
            value: value.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(value: impl Into<Value>, attributes: Attributes) -> Self {
        Node {
            value: value.into(),
            attributes,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// Replace the value. The attribute map survives, also when the variant
    /// changes; callers wanting a clean slate erase the node first.
    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn tag(&self) -> TypeTag {
        self.value.tag()
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }

    pub fn get_typed<T: Variant>(&self) -> Option<&T> {
        T::variant_ref(&self.value)
    }
}

/// What a path resolves to: a named node, or one tree element inside a
/// sequence-of-trees value (`a.b[2]`). Elements carry no attributes.
pub enum Target<'a> {
    Node(&'a Node),
    Element(&'a Tree),
}

enum TargetMut<'a> {
    Node(&'a mut Node),
    Element(&'a mut Tree),
}

/// Tree is the attributed ordered map: unique string keys, insertion order
/// preserved, each entry holding a tagged value and an attribute map.
///
/// A tree instance is owned by one logical actor at a time; it is not
/// internally synchronized. Shared-pointer variants may be read concurrently
/// but must not be mutated after publication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tree {
    nodes: IndexMap<String, Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear()
    }

    // ---- root-level access, no path interpretation ----

    /// Insert or overwrite a root-level key verbatim: the key is not parsed,
    /// so it may contain separators or brackets. Used by `flatten`, whose
    /// output keys are whole paths.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Node {
        let key = key.into();
        match self.nodes.entry(key) {
            indexmap::map::Entry::Occupied(e) => {
                let node = e.into_mut();
                node.set_value(value);
                node
            }
            indexmap::map::Entry::Vacant(e) => e.insert(Node::new(value)),
        }
    }

    /// Remove a root-level key verbatim, preserving the order of the rest.
    pub fn remove(&mut self, key: &str) -> Option<Node> {
        self.nodes.shift_remove(key)
    }

    /// Fetch the node for a root-level key, inserting an empty (`None`)
    /// node first if absent. An existing node is untouched.
    pub(crate) fn insert_node_default(&mut self, key: &str) -> &mut Node {
        self.nodes
            .entry(key.to_string())
            .or_insert_with(|| Node::new(Value::None))
    }

    pub fn get_node(&self, key: &str) -> Option<&Node> {
        self.nodes.get(key)
    }

    pub fn get_node_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    // ---- iteration ----

    /// Insertion-order iteration, the primary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(k, n)| (k.as_str(), n))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Node)> {
        self.nodes.iter_mut().map(|(k, n)| (k.as_str(), n))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Lexical-order keys, the secondary order. The returned set is a
    /// snapshot: erasing while traversing it is well-defined.
    pub fn keys_lexical(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        keys
    }

    pub fn iter_lexical(&self) -> impl Iterator<Item = (&str, &Node)> {
        let mut entries: Vec<(&str, &Node)> = self.iter().collect();
        entries.sort_unstable_by_key(|(k, _)| *k);
        entries.into_iter()
    }

    /// Erase a root-level key while traversing in insertion order: returns
    /// the key that now follows the erased position.
    pub fn erase_then_next(&mut self, key: &str) -> Option<String> {
        let index = self.nodes.get_index_of(key)?;
        self.nodes.shift_remove(key);
        self.nodes.get_index(index).map(|(k, _)| k.clone())
    }

    /// Erase while traversing in lexical order: returns the lexically next
    /// key after the erased one.
    pub fn erase_then_next_lexical(&mut self, key: &str) -> Option<String> {
        self.nodes.shift_remove(key)?;
        self.nodes
            .keys()
            .filter(|k| k.as_str() > key)
            .min()
            .cloned()
    }

    // ---- path resolution ----

    /// Follow one non-terminal segment downward for reading. Shared trees
    /// are transparently dereferenced.
    fn child(&self, segment: &Segment) -> Option<&Tree> {
        let node = self.nodes.get(&segment.key)?;
        match (segment.index, node.value()) {
            (None, Value::Tree(t)) => Some(t),
            (None, Value::SharedTree(t)) => Some(t),
            (Some(i), Value::VecTree(v)) => v.get(i),
            (Some(i), Value::VecSharedTree(v)) => v.get(i).map(|t| &**t),
            _ => None,
        }
    }

    fn child_mut(&mut self, segment: &Segment) -> Option<&mut Tree> {
        let node = self.nodes.get_mut(&segment.key)?;
        match (segment.index, node.value_mut()) {
            (None, Value::Tree(t)) => Some(t),
            (Some(i), Value::VecTree(v)) => v.get_mut(i),
            _ => None,
        }
    }

    fn descend_mut_segments<'a>(
        mut cur: &'a mut Tree,
        segments: &[Segment],
    ) -> Option<&'a mut Tree> {
        for segment in segments {
            cur = cur.child_mut(segment)?;
        }
        Some(cur)
    }

    fn descend(&self, path: &Path) -> Result<Target<'_>> {
        let (init, last) = path.split_last();
        let mut cur = self;
        for segment in init {
            cur = cur
                .child(segment)
                .ok_or_else(|| Error::not_found(path.to_string()))?;
        }
        let node = cur
            .nodes
            .get(&last.key)
            .ok_or_else(|| Error::not_found(path.to_string()))?;
        match last.index {
            None => Ok(Target::Node(node)),
            Some(i) => match node.value() {
                Value::VecTree(v) => v
                    .get(i)
                    .map(Target::Element)
                    .ok_or_else(|| Error::not_found(path.to_string())),
                Value::VecSharedTree(v) => v
                    .get(i)
                    .map(|t| Target::Element(&**t))
                    .ok_or_else(|| Error::not_found(path.to_string())),
                _ => Err(Error::not_found(path.to_string())),
            },
        }
    }

    fn descend_mut(&mut self, path: &Path) -> Result<TargetMut<'_>> {
        let (init, last) = path.split_last();
        let mut cur = self;
        for segment in init {
            cur = cur
                .child_mut(segment)
                .ok_or_else(|| Error::not_found(path.to_string()))?;
        }
        let node = cur
            .nodes
            .get_mut(&last.key)
            .ok_or_else(|| Error::not_found(path.to_string()))?;
        match last.index {
            None => Ok(TargetMut::Node(node)),
            Some(i) => match node.value_mut() {
                Value::VecTree(v) => v
                    .get_mut(i)
                    .map(TargetMut::Element)
                    .ok_or_else(|| Error::not_found(path.to_string())),
                _ => Err(Error::not_found(path.to_string())),
            },
        }
    }

    /// Follow one segment downward for writing, creating what is missing.
    /// A wrong-variant intermediate is replaced by an empty tree (or
    /// sequence), keeping the node's attributes.
    fn ensure_child(&mut self, segment: &Segment) -> &mut Tree {
        let node = self
            .nodes
            .entry(segment.key.clone())
            .or_insert_with(|| match segment.index {
                None => Node::new(Tree::new()),
                Some(_) => Node::new(Vec::<Tree>::new()),
            });
        match segment.index {
            None => {
                if !node.value().is_tree() {
                    node.set_value(Tree::new());
                }
                match node.value_mut() {
                    Value::Tree(t) => t,
                    _ => unreachable!("just ensured a tree value"),
                }
            }
            Some(i) => {
                if !matches!(node.value(), Value::VecTree(_)) {
                    node.set_value(Vec::<Tree>::new());
                }
                match node.value_mut() {
                    Value::VecTree(v) => {
                        while v.len() <= i {
                            v.push(Tree::new());
                        }
                        &mut v[i]
                    }
                    _ => unreachable!("just ensured a sequence value"),
                }
            }
        }
    }

    // ---- typed path API ----

    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        self.set_with(path, DEFAULT_SEPARATOR, value)
    }

    /// Set the value at `path`, creating intermediate trees and extending
    /// sequences with empty trees as needed. An existing terminal node keeps
    /// its attributes, also across a variant change.
    pub fn set_with(&mut self, path: &str, sep: char, value: impl Into<Value>) -> Result<()> {
        let path = Path::parse_with(path, sep);
        let (init, last) = path.split_last();
        let mut cur = self;
        for segment in init {
            cur = cur.ensure_child(segment);
        }
        match last.index {
            None => {
                cur.insert(last.key.clone(), value);
                Ok(())
            }
            Some(i) => {
                let tree = match value.into() {
                    Value::Tree(t) => t,
                    Value::SharedTree(t) => (*t).clone(),
                    other => {
                        return Err(Error::Logic(format!(
                            "cannot place a {} at indexed path '{path}'; sequence slots hold trees",
                            other.tag()
                        )))
                    }
                };
                let slot = cur.ensure_child(&Segment::indexed(last.key.clone(), i));
                *slot = tree;
                Ok(())
            }
        }
    }

    pub fn get<T: Variant>(&self, path: &str) -> Result<&T> {
        self.get_with(path, DEFAULT_SEPARATOR)
    }

    pub fn get_with<T: Variant>(&self, path: &str, sep: char) -> Result<&T> {
        let parsed = Path::parse_with(path, sep);
        match self.descend(&parsed)? {
            Target::Node(node) => T::variant_ref(node.value())
                .ok_or_else(|| Error::mismatch(path, T::TAG, node.tag())),
            Target::Element(tree) => {
                T::from_element(tree).ok_or_else(|| Error::mismatch(path, T::TAG, TypeTag::Tree))
            }
        }
    }

    pub fn get_mut<T: Variant>(&mut self, path: &str) -> Result<&mut T> {
        let parsed = Path::parse(path);
        match self.descend_mut(&parsed)? {
            TargetMut::Node(node) => {
                let tag = node.tag();
                T::variant_mut(node.value_mut()).ok_or_else(|| Error::mismatch(path, T::TAG, tag))
            }
            TargetMut::Element(tree) => T::from_element_mut(tree)
                .ok_or_else(|| Error::mismatch(path, T::TAG, TypeTag::Tree)),
        }
    }

    /// Converting read: a copy of the value at `path` cast to `T` following
    /// the conversion matrix.
    pub fn get_as<T: Variant>(&self, path: &str) -> Result<T> {
        self.get_as_with(path, DEFAULT_SEPARATOR)
    }

    pub fn get_as_with<T: Variant>(&self, path: &str, sep: char) -> Result<T> {
        let parsed = Path::parse_with(path, sep);
        let cast = match self.descend(&parsed)? {
            Target::Node(node) => crate::cast::cast_value(node.value(), T::TAG)?,
            Target::Element(tree) => {
                crate::cast::cast_value(&Value::Tree(tree.clone()), T::TAG)?
            }
        };
        Ok(T::unwrap_value(cast).expect("cast_value returns the requested variant"))
    }

    /// A reference to the raw value at `path`.
    pub fn value(&self, path: &str) -> Result<&Value> {
        match self.descend(&Path::parse(path))? {
            Target::Node(node) => Ok(node.value()),
            Target::Element(_) => Err(Error::Logic(format!(
                "'{path}' addresses a sequence element, not a value"
            ))),
        }
    }

    pub fn has(&self, path: &str) -> bool {
        self.has_with(path, DEFAULT_SEPARATOR)
    }

    pub fn has_with(&self, path: &str, sep: char) -> bool {
        self.descend(&Path::parse_with(path, sep)).is_ok()
    }

    /// Whether the value at `path` has variant `T`. Unlike `get`, a mere
    /// type mismatch is a plain `false`; an unresolvable path is an error.
    pub fn is<T: Variant>(&self, path: &str) -> Result<bool> {
        match self.descend(&Path::parse(path))? {
            Target::Node(node) => Ok(node.tag() == T::TAG),
            Target::Element(_) => Ok(T::TAG == TypeTag::Tree),
        }
    }

    pub fn type_of(&self, path: &str) -> Result<TypeTag> {
        match self.descend(&Path::parse(path))? {
            Target::Node(node) => Ok(node.tag()),
            Target::Element(_) => Ok(TypeTag::Tree),
        }
    }

    /// Non-creating lookup of the node at `path`. A path addressing a
    /// sequence element resolves to `None`: elements are not nodes.
    pub fn find(&self, path: &str) -> Option<&Node> {
        match self.descend(&Path::parse(path)) {
            Ok(Target::Node(node)) => Some(node),
            _ => None,
        }
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut Node> {
        self.find_mut_with(path, DEFAULT_SEPARATOR)
    }

    pub fn find_mut_with(&mut self, path: &str, sep: char) -> Option<&mut Node> {
        match self.descend_mut(&Path::parse_with(path, sep)) {
            Ok(TargetMut::Node(node)) => Some(node),
            _ => None,
        }
    }

    pub fn node(&self, path: &str) -> Result<&Node> {
        match self.descend(&Path::parse(path))? {
            Target::Node(node) => Ok(node),
            Target::Element(_) => Err(Error::Logic(format!(
                "'{path}' addresses a sequence element, not a node"
            ))),
        }
    }

    pub fn node_mut(&mut self, path: &str) -> Result<&mut Node> {
        match self.descend_mut(&Path::parse(path))? {
            TargetMut::Node(node) => Ok(node),
            TargetMut::Element(_) => Err(Error::Logic(format!(
                "'{path}' addresses a sequence element, not a node"
            ))),
        }
    }

    /// Remove the terminal node (or sequence element, shrinking the owning
    /// sequence). Ancestors stay. Returns whether something was removed.
    pub fn erase(&mut self, path: &str) -> bool {
        self.erase_with(path, DEFAULT_SEPARATOR)
    }

    pub fn erase_with(&mut self, path: &str, sep: char) -> bool {
        let path = Path::parse_with(path, sep);
        let (init, last) = path.split_last();
        let mut cur = self;
        for segment in init {
            match cur.child_mut(segment) {
                Some(next) => cur = next,
                None => return false,
            }
        }
        match last.index {
            None => cur.nodes.shift_remove(&last.key).is_some(),
            Some(i) => match cur.nodes.get_mut(&last.key).map(Node::value_mut) {
                Some(Value::VecTree(v)) if i < v.len() => {
                    v.remove(i);
                    true
                }
                _ => false,
            },
        }
    }

    /// Remove the terminal node and every ancestor left empty by that
    /// removal.
    pub fn erase_path(&mut self, path: &str) {
        self.erase_path_with(path, DEFAULT_SEPARATOR)
    }

    pub fn erase_path_with(&mut self, path: &str, sep: char) {
        let parsed = Path::parse_with(path, sep);
        if !self.erase_with(path, sep) {
            return;
        }
        // Peel ancestors from the deepest upward while they are empty.
        let mut segments = parsed.segments().to_vec();
        segments.pop();
        while let Some(last) = segments.last().cloned() {
            let parent = match Self::descend_mut_segments(self, &segments[..segments.len() - 1]) {
                Some(p) => p,
                None => return,
            };
            let emptied = match (last.index, parent.nodes.get(&last.key).map(Node::value)) {
                (None, Some(Value::Tree(t))) => t.is_empty(),
                (Some(i), Some(Value::VecTree(v))) => v.get(i).map(Tree::is_empty).unwrap_or(false),
                _ => false,
            };
            if !emptied {
                return;
            }
            match last.index {
                None => {
                    parent.nodes.shift_remove(&last.key);
                }
                Some(i) => {
                    if let Some(Value::VecTree(v)) =
                        parent.nodes.get_mut(&last.key).map(Node::value_mut)
                    {
                        v.remove(i);
                    }
                }
            }
            segments.pop();
        }
    }

    // ---- attribute access by path ----

    pub fn attributes(&self, path: &str) -> Result<&Attributes> {
        Ok(self.node(path)?.attributes())
    }

    pub fn attributes_mut(&mut self, path: &str) -> Result<&mut Attributes> {
        Ok(self.node_mut(path)?.attributes_mut())
    }

    pub fn set_attribute(
        &mut self,
        path: &str,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.node_mut(path)?.attributes_mut().set(key, value);
        Ok(())
    }

    pub fn get_attribute<T: Variant>(&self, path: &str, key: &str) -> Result<&T> {
        let attrs = self.attributes(path)?;
        let value = attrs.get(key).ok_or_else(|| Error::AttributeNotFound {
            path: path.to_string(),
            key: key.to_string(),
        })?;
        T::variant_ref(value).ok_or_else(|| Error::mismatch(path, T::TAG, value.tag()))
    }

    pub fn get_attribute_as<T: Variant>(&self, path: &str, key: &str) -> Result<T> {
        let attrs = self.attributes(path)?;
        let value = attrs.get(key).ok_or_else(|| Error::AttributeNotFound {
            path: path.to_string(),
            key: key.to_string(),
        })?;
        let cast = crate::cast::cast_value(value, T::TAG)?;
        Ok(T::unwrap_value(cast).expect("cast_value returns the requested variant"))
    }

    pub fn has_attribute(&self, path: &str, key: &str) -> bool {
        self.attributes(path)
            .map(|attrs| attrs.has(key))
            .unwrap_or(false)
    }

    // ---- whole-tree views ----

    /// Full paths of every leaf, descending trees and sequence elements.
    /// Empty trees and empty sequences appear as leaves themselves.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_leaf_paths(None, DEFAULT_SEPARATOR, &mut out);
        out
    }

    // The prefix is optional rather than empty so that an empty-string key
    // at the root still gets its separator.
    pub(crate) fn collect_leaf_paths(
        &self,
        prefix: Option<&str>,
        sep: char,
        out: &mut Vec<String>,
    ) {
        for (key, node) in self.iter() {
            let full = match prefix {
                None => key.to_string(),
                Some(prefix) => format!("{prefix}{sep}{key}"),
            };
            match node.value() {
                Value::Tree(t) if !t.is_empty() => t.collect_leaf_paths(Some(&full), sep, out),
                Value::VecTree(v) if !v.is_empty() => {
                    for (i, elem) in v.iter().enumerate() {
                        let slot = format!("{full}[{i}]");
                        if elem.is_empty() {
                            out.push(slot);
                        } else {
                            elem.collect_leaf_paths(Some(&slot), sep, out);
                        }
                    }
                }
                _ => out.push(full),
            }
        }
    }
}

impl std::fmt::Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn indent(f: &mut std::fmt::Formatter<'_>, depth: usize) -> std::fmt::Result {
            for _ in 0..depth {
                f.write_str("  ")?;
            }
            Ok(())
        }

        fn fmt_tree(
            tree: &Tree,
            f: &mut std::fmt::Formatter<'_>,
            depth: usize,
        ) -> std::fmt::Result {
            for (key, node) in tree.iter() {
                indent(f, depth)?;
                write!(f, "{key}")?;
                for (akey, avalue) in node.attributes().iter() {
                    write!(f, " {akey}=\"{}\"", crate::cast::to_text(avalue))?;
                }
                match node.value() {
                    Value::Tree(t) => {
                        writeln!(f, " +")?;
                        fmt_tree(t, f, depth + 1)?;
                    }
                    Value::SharedTree(t) => {
                        writeln!(f, " &+")?;
                        fmt_tree(t, f, depth + 1)?;
                    }
                    Value::VecTree(v) => {
                        writeln!(f, " [{}]", v.len())?;
                        for elem in v {
                            fmt_tree(elem, f, depth + 1)?;
                        }
                    }
                    other => {
                        writeln!(f, " => {} {}", crate::cast::to_text(other), other.tag())?;
                    }
                }
            }
            Ok(())
        }

        fmt_tree(self, f, 0)
    }
}
