//! Schema model for the control plane: a description tree that says what a
//! configuration should look like and what it means, plus the validator
//! that enforces it.
//!
//! A schema is itself an attributed tree. Leaves are `None`-valued nodes
//! whose attributes carry the vocabulary of [`attrs`]; interior nodes hold
//! nested trees. The schema adds a root name (the class id), assembly rules
//! used for projections, and a reverse alias index.

use std::collections::HashMap;

use tree::{MergePolicy, Node, SchemaValue, Tree, Value};

pub mod attrs;
mod alarm;
pub mod elements;
mod ndarray;
mod state;
mod timestamp;
mod units;
mod validator;

pub use alarm::AlarmCondition;
pub use attrs::{AccessLevel, AccessMode, ArchivePolicy, Assignment, LeafKind, NodeKind};
pub use tree::{TypeTag, Value as TreeValue};
pub use ndarray::{ndarray, NDARRAY_CLASS_ID, SLOT_CLASS_ID};
pub use state::State;
pub use timestamp::Timestamp;
pub use units::{MetricPrefix, Unit};
pub use validator::{ValidationOutcome, ValidationRules, Validator};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Misuse of the schema API: missing keys, conflicting declarations,
    /// restricted overwrites.
    #[error("parameter error: {0}")]
    Parameter(String),

    #[error(transparent)]
    Tree(#[from] tree::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Filter applied when a schema is assembled or projected for a client:
/// which access modes to keep, an optional state the device is in, and the
/// caller's privilege ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyRules {
    pub access_mode_mask: i32,
    pub state: Option<String>,
    pub access_level: Option<AccessLevel>,
}

impl Default for AssemblyRules {
    fn default() -> Self {
        AssemblyRules {
            access_mode_mask: AccessMode::ANY,
            state: None,
            access_level: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    name: String,
    body: Tree,
    rules: AssemblyRules,
    /// Rendered alias text → path, maintained incrementally.
    aliases: HashMap<String, String>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_rules(name: impl Into<String>, rules: AssemblyRules) -> Self {
        Schema {
            name: name.into(),
            rules,
            ..Default::default()
        }
    }

    pub fn root_name(&self) -> &str {
        &self.name
    }

    pub fn set_root_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn assembly_rules(&self) -> &AssemblyRules {
        &self.rules
    }

    /// The raw description tree.
    pub fn parameters(&self) -> &Tree {
        &self.body
    }

    pub(crate) fn body_mut(&mut self) -> &mut Tree {
        &mut self.body
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    // ---- structural queries ----

    pub fn has(&self, path: &str) -> bool {
        self.body.has(path)
    }

    pub fn node_kind(&self, path: &str) -> Result<NodeKind> {
        let raw = self.body.get_attribute_as::<i32>(path, attrs::NODE_TYPE)?;
        NodeKind::from_i32(raw)
            .ok_or_else(|| Error::Parameter(format!("invalid nodeType {raw} at '{path}'")))
    }

    pub fn is_leaf(&self, path: &str) -> bool {
        matches!(self.node_kind(path), Ok(NodeKind::Leaf))
    }

    pub fn is_node(&self, path: &str) -> bool {
        matches!(self.node_kind(path), Ok(NodeKind::Node))
    }

    pub fn leaf_kind(&self, path: &str) -> Result<LeafKind> {
        let raw = self.body.get_attribute_as::<i32>(path, attrs::LEAF_TYPE)?;
        LeafKind::from_i32(raw)
            .ok_or_else(|| Error::Parameter(format!("invalid leafType {raw} at '{path}'")))
    }

    pub fn value_type(&self, path: &str) -> Result<TypeTag> {
        let literal = self
            .body
            .get_attribute::<String>(path, attrs::VALUE_TYPE)?;
        TypeTag::from_literal(literal)
            .ok_or_else(|| Error::Parameter(format!("unknown valueType '{literal}' at '{path}'")))
    }

    /// Keys directly below `path`, or the root keys for an empty path.
    pub fn keys(&self, path: &str) -> Vec<String> {
        let tree = if path.is_empty() {
            Some(&self.body)
        } else {
            self.body.get::<Tree>(path).ok()
        };
        tree.map(|t| t.keys().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Full paths of every leaf and empty node.
    pub fn paths(&self) -> Vec<String> {
        self.body.leaf_paths()
    }

    /// Like `paths`, additionally descending into handled composites
    /// (array-like payloads) to expose their substructure.
    pub fn deep_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for path in self.paths() {
            out.push(path.clone());
            if let Some(handler) = self
                .class_id(&path)
                .and_then(|id| tree::handled_class(&id))
            {
                let payload = self.body.get::<Tree>(&path).cloned().unwrap_or_default();
                for sub in (handler.deep_paths)(&payload) {
                    out.push(format!("{path}.{sub}"));
                }
            }
        }
        out
    }

    // ---- attribute accessors ----

    fn attr(&self, path: &str, name: &str) -> Option<&Value> {
        self.body.attributes(path).ok().and_then(|a| a.get(name))
    }

    fn attr_i32(&self, path: &str, name: &str) -> Option<i32> {
        self.body.get_attribute_as::<i32>(path, name).ok()
    }

    pub fn access_mode(&self, path: &str) -> Option<AccessMode> {
        AccessMode::from_i32(self.attr_i32(path, attrs::ACCESS_MODE)?)
    }

    pub fn is_reconfigurable(&self, path: &str) -> bool {
        self.access_mode(path) == Some(AccessMode::Write)
    }

    pub fn assignment(&self, path: &str) -> Option<Assignment> {
        Assignment::from_i32(self.attr_i32(path, attrs::ASSIGNMENT)?)
    }

    pub fn default_value(&self, path: &str) -> Option<&Value> {
        self.attr(path, attrs::DEFAULT_VALUE)
    }

    pub fn has_default_value(&self, path: &str) -> bool {
        self.default_value(path).is_some()
    }

    pub fn options(&self, path: &str) -> Option<&Value> {
        self.attr(path, attrs::OPTIONS)
    }

    pub fn min_inc(&self, path: &str) -> Option<f64> {
        self.body.get_attribute_as::<f64>(path, attrs::MIN_INC).ok()
    }

    pub fn max_inc(&self, path: &str) -> Option<f64> {
        self.body.get_attribute_as::<f64>(path, attrs::MAX_INC).ok()
    }

    pub fn min_exc(&self, path: &str) -> Option<f64> {
        self.body.get_attribute_as::<f64>(path, attrs::MIN_EXC).ok()
    }

    pub fn max_exc(&self, path: &str) -> Option<f64> {
        self.body.get_attribute_as::<f64>(path, attrs::MAX_EXC).ok()
    }

    pub fn min_size(&self, path: &str) -> Option<u32> {
        self.body.get_attribute_as::<u32>(path, attrs::MIN_SIZE).ok()
    }

    pub fn max_size(&self, path: &str) -> Option<u32> {
        self.body.get_attribute_as::<u32>(path, attrs::MAX_SIZE).ok()
    }

    pub fn allowed_states(&self, path: &str) -> Option<Vec<State>> {
        let names = self
            .body
            .get_attribute::<Vec<String>>(path, attrs::ALLOWED_STATES)
            .ok()?;
        Some(names.iter().filter_map(|n| State::from_name(n)).collect())
    }

    /// The privilege needed to touch this entry. Absent means observable by
    /// anyone.
    pub fn required_access_level(&self, path: &str) -> AccessLevel {
        self.attr_i32(path, attrs::REQUIRED_ACCESS_LEVEL)
            .and_then(AccessLevel::from_i32)
            .unwrap_or(AccessLevel::Observer)
    }

    pub fn tags(&self, path: &str) -> Option<&Vec<String>> {
        self.body
            .get_attribute::<Vec<String>>(path, attrs::TAGS)
            .ok()
    }

    pub fn class_id(&self, path: &str) -> Option<String> {
        self.body
            .get_attribute::<String>(path, attrs::CLASS_ID)
            .ok()
            .cloned()
    }

    pub fn display_type(&self, path: &str) -> Option<String> {
        self.body
            .get_attribute::<String>(path, attrs::DISPLAY_TYPE)
            .ok()
            .cloned()
    }

    pub fn displayed_name(&self, path: &str) -> Option<String> {
        self.body
            .get_attribute::<String>(path, attrs::DISPLAYED_NAME)
            .ok()
            .cloned()
    }

    pub fn description(&self, path: &str) -> Option<String> {
        self.body
            .get_attribute::<String>(path, attrs::DESCRIPTION)
            .ok()
            .cloned()
    }

    pub fn row_schema(&self, path: &str) -> Option<Schema> {
        let value = self.attr(path, attrs::ROW_SCHEMA)?;
        match value {
            Value::Schema(s) => Some(Schema::from_value((**s).clone())),
            _ => None,
        }
    }

    pub fn archive_policy(&self, path: &str) -> Option<ArchivePolicy> {
        ArchivePolicy::from_i32(self.attr_i32(path, attrs::ARCHIVE_POLICY)?)
    }

    pub fn unit(&self, path: &str) -> Option<Unit> {
        Unit::from_i32(self.attr_i32(path, attrs::UNIT_ENUM)?)
    }

    pub fn metric_prefix(&self, path: &str) -> Option<MetricPrefix> {
        MetricPrefix::from_i32(self.attr_i32(path, attrs::METRIC_PREFIX_ENUM)?)
    }

    pub fn allowed_actions(&self, path: &str) -> Option<&Vec<String>> {
        self.body
            .get_attribute::<Vec<String>>(path, attrs::ALLOWED_ACTIONS)
            .ok()
    }

    pub fn is_output_schema(&self, path: &str) -> bool {
        self.display_type(path).as_deref() == Some(attrs::DISPLAY_TYPE_OUTPUT_SCHEMA)
    }

    // ---- aliases ----

    /// Set (or overwrite) the alias of `path`, keeping the reverse index in
    /// step. A previous alias of the same path is dropped from the index.
    pub fn set_alias(&mut self, path: &str, alias: impl Into<Value>) -> Result<()> {
        let alias = alias.into();
        let stale = self.attr(path, attrs::ALIAS).map(tree::to_text);
        if let Some(stale) = stale {
            self.aliases.remove(&stale);
        }
        self.aliases
            .insert(tree::to_text(&alias), path.to_string());
        self.body.set_attribute(path, attrs::ALIAS, alias)?;
        Ok(())
    }

    pub fn alias(&self, path: &str) -> Option<&Value> {
        self.attr(path, attrs::ALIAS)
    }

    /// Reverse lookup: the path an alias value points at.
    pub fn path_from_alias(&self, alias: &Value) -> Option<&str> {
        self.aliases.get(&tree::to_text(alias)).map(String::as_str)
    }

    fn rebuild_alias_index(&mut self) {
        let mut aliases = HashMap::new();
        visit_nodes(&self.body, "", &mut |path, node| {
            if let Some(alias) = node.attributes().get(attrs::ALIAS) {
                aliases.insert(tree::to_text(alias), path.to_string());
            }
        });
        self.aliases = aliases;
    }

    // ---- composition and projection ----

    /// Structurally merge `other` into self: union of entries, attributes
    /// union-merged with overwrite on conflict.
    pub fn merge(&mut self, other: &Schema) {
        self.body
            .merge(other.parameters(), MergePolicy::MergeAttributes);
        self.rebuild_alias_index();
    }

    /// The sub-schema rooted at `path`. With a tag filter, only leaves
    /// whose `tags` intersect the filter survive; interior nodes without
    /// retained descendants are pruned.
    pub fn sub_schema(&self, path: &str, tag_filter: Option<&[&str]>) -> Result<Schema> {
        let root = self.body.get::<Tree>(path)?;
        let body = match tag_filter {
            None => root.clone(),
            Some(filter) => filter_tree(root, &mut |_, node| {
                let tagged = node
                    .attributes()
                    .get_typed::<Vec<String>>(attrs::TAGS)
                    .map(|tags| tags.iter().any(|t| filter.contains(&t.as_str())))
                    .unwrap_or(false);
                if is_interior(node) {
                    Verdict::Recurse
                } else if tagged {
                    Verdict::Keep
                } else {
                    Verdict::Drop
                }
            }),
        };
        Ok(self.derived(body))
    }

    /// Project by assembly rules: access-mode mask, state filter, and
    /// access-level ceiling.
    pub fn sub_schema_by_rules(&self, rules: &AssemblyRules) -> Schema {
        let body = filter_tree(&self.body, &mut |path, node| {
            // The level ceiling prunes whole subtrees.
            if let Some(ceiling) = rules.access_level {
                if self.required_access_level(path) > ceiling {
                    return Verdict::Drop;
                }
            }
            if is_interior(node) {
                return Verdict::Recurse;
            }
            if let Some(mode) = node
                .attributes()
                .get_typed::<i32>(attrs::ACCESS_MODE)
                .copied()
            {
                if mode & rules.access_mode_mask == 0 {
                    return Verdict::Drop;
                }
            }
            if let (Some(state), Some(Value::VecStr(allowed))) =
                (&rules.state, node.attributes().get(attrs::ALLOWED_STATES))
            {
                if !allowed.iter().any(|s| s == state) {
                    return Verdict::Drop;
                }
            }
            Verdict::Keep
        });
        self.derived(body)
    }

    /// Retain exactly the listed paths and their descendants.
    pub fn sub_schema_by_paths(&self, paths: &[&str]) -> Schema {
        let body = filter_tree(&self.body, &mut |path, node| {
            if paths.iter().any(|p| *p == path) {
                return Verdict::Keep;
            }
            let is_prefix = paths
                .iter()
                .any(|p| p.starts_with(path) && p[path.len()..].starts_with('.'));
            if is_prefix && is_interior(node) {
                Verdict::Recurse
            } else {
                Verdict::Drop
            }
        });
        self.derived(body)
    }

    fn derived(&self, body: Tree) -> Schema {
        let mut out = Schema {
            name: self.name.clone(),
            body,
            rules: self.rules.clone(),
            aliases: HashMap::new(),
        };
        out.rebuild_alias_index();
        out
    }

    // ---- value form ----

    pub fn from_value(value: SchemaValue) -> Schema {
        let mut out = Schema {
            name: value.name,
            body: value.body,
            rules: AssemblyRules::default(),
            aliases: HashMap::new(),
        };
        out.rebuild_alias_index();
        out
    }

    pub fn into_value(self) -> SchemaValue {
        SchemaValue {
            name: self.name,
            body: self.body,
        }
    }

    pub fn to_value(&self) -> SchemaValue {
        SchemaValue {
            name: self.name.clone(),
            body: self.body.clone(),
        }
    }
}

impl From<Schema> for Value {
    fn from(schema: Schema) -> Value {
        Value::Schema(Box::new(schema.into_value()))
    }
}

/// An interior node: one that holds children rather than describing a leaf.
fn is_interior(node: &Node) -> bool {
    node.value().is_tree()
}

enum Verdict {
    Keep,
    Drop,
    Recurse,
}

/// Copy `src`, asking the predicate per entry. `Recurse` descends and prunes
/// interior nodes that end up with no children.
fn filter_tree(src: &Tree, pred: &mut impl FnMut(&str, &Node) -> Verdict) -> Tree {
    fn walk(src: &Tree, prefix: &str, pred: &mut impl FnMut(&str, &Node) -> Verdict) -> Tree {
        let mut out = Tree::new();
        for (key, node) in src.iter() {
            let path = if prefix.is_empty() {
                key.to_string()
            } else {
                format!("{prefix}.{key}")
            };
            match pred(&path, node) {
                Verdict::Keep => {
                    out.insert(key, node.value().clone())
                        .set_attributes(node.attributes().clone());
                }
                Verdict::Drop => {}
                Verdict::Recurse => {
                    if let Value::Tree(inner) = node.value() {
                        let filtered = walk(inner, &path, pred);
                        if !filtered.is_empty() {
                            out.insert(key, filtered)
                                .set_attributes(node.attributes().clone());
                        }
                    }
                }
            }
        }
        out
    }
    walk(src, "", pred)
}

/// Visit every entry of a schema body (interior nodes included), depth
/// first in insertion order.
fn visit_nodes(tree: &Tree, prefix: &str, f: &mut impl FnMut(&str, &Node)) {
    for (key, node) in tree.iter() {
        let path = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        };
        f(&path, node);
        if let Value::Tree(inner) = node.value() {
            visit_nodes(inner, &path, f);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::elements::{Leaf, NodeElement};
    use pretty_assertions::assert_eq;

    fn motor_schema() -> Schema {
        let mut s = Schema::new("Motor");
        Leaf::<String>::new(&mut s)
            .key("deviceId")
            .assignment_mandatory()
            .init()
            .commit()
            .unwrap();
        Leaf::<f64>::new(&mut s)
            .key("position")
            .displayed_name("Position")
            .unit(Unit::Meter, MetricPrefix::Milli)
            .read_only()
            .commit()
            .unwrap();
        NodeElement::new(&mut s).key("limits").commit().unwrap();
        Leaf::<f64>::new(&mut s)
            .key("limits.low")
            .assignment_optional()
            .default_value(-10.0)
            .tags(&["safety"])
            .reconfigurable()
            .commit()
            .unwrap();
        Leaf::<f64>::new(&mut s)
            .key("limits.high")
            .assignment_optional()
            .default_value(10.0)
            .required_access_level(AccessLevel::Expert)
            .reconfigurable()
            .commit()
            .unwrap();
        s
    }

    #[test]
    fn structure_queries() {
        let s = motor_schema();
        assert_eq!(s.root_name(), "Motor");
        assert!(s.is_leaf("deviceId"));
        assert!(s.is_node("limits"));
        assert_eq!(s.value_type("position").unwrap(), TypeTag::Double);
        assert_eq!(
            s.paths(),
            vec!["deviceId", "position", "limits.low", "limits.high"]
        );
        assert_eq!(s.keys(""), vec!["deviceId", "position", "limits"]);
        assert_eq!(s.unit("position"), Some(Unit::Meter));
        assert_eq!(s.metric_prefix("position"), Some(MetricPrefix::Milli));
    }

    #[test]
    fn projection_by_rules() {
        let s = motor_schema();

        // Only reconfigurable entries.
        let writable = s.sub_schema_by_rules(&AssemblyRules {
            access_mode_mask: AccessMode::Write as i32,
            state: None,
            access_level: None,
        });
        assert_eq!(writable.paths(), vec!["limits.low", "limits.high"]);

        // An operator does not see expert-only entries.
        let operator = s.sub_schema_by_rules(&AssemblyRules {
            access_mode_mask: AccessMode::ANY,
            state: None,
            access_level: Some(AccessLevel::Operator),
        });
        assert!(operator.has("limits.low"));
        assert!(!operator.has("limits.high"));
    }

    #[test]
    fn projection_by_tags_and_paths() {
        let s = motor_schema();

        let safety = s.sub_schema("limits", Some(&["safety"])).unwrap();
        assert_eq!(safety.paths(), vec!["low"]);

        let picked = s.sub_schema_by_paths(&["deviceId", "limits.high"]);
        assert_eq!(picked.paths(), vec!["deviceId", "limits.high"]);
    }

    #[test]
    fn alias_index_stays_in_step() {
        let mut s = motor_schema();
        s.set_alias("position", 0x10i32).unwrap();
        assert_eq!(s.path_from_alias(&Value::Int32(0x10)), Some("position"));

        // Overwriting drops the stale entry.
        s.set_alias("position", "POS").unwrap();
        assert_eq!(s.path_from_alias(&Value::Int32(0x10)), None);
        assert_eq!(s.path_from_alias(&Value::from("POS")), Some("position"));

        // Merging rebuilds the index.
        let mut other = Schema::new("Motor");
        Leaf::<i32>::new(&mut other)
            .key("steps")
            .alias(7i32)
            .read_only()
            .commit()
            .unwrap();
        s.merge(&other);
        assert_eq!(s.path_from_alias(&Value::Int32(7)), Some("steps"));
        assert_eq!(s.path_from_alias(&Value::from("POS")), Some("position"));
    }

    #[test]
    fn merge_overwrites_attributes_per_key() {
        let mut base = Schema::new("Device");
        Leaf::<i32>::new(&mut base)
            .key("count")
            .assignment_optional()
            .default_value(1)
            .reconfigurable()
            .commit()
            .unwrap();

        let mut derived = Schema::new("Device");
        Leaf::<i32>::new(&mut derived)
            .key("count")
            .assignment_optional()
            .default_value(5)
            .max_inc(10)
            .reconfigurable()
            .commit()
            .unwrap();

        base.merge(&derived);
        assert_eq!(base.default_value("count"), Some(&Value::Int32(5)));
        assert_eq!(base.max_inc("count"), Some(10.0));
    }
}
