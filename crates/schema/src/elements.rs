//! Fluent element builders used by schema-description functions.
//!
//! ```
//! use schema::{elements::Leaf, Schema};
//!
//! let mut expected = Schema::new("Oscilloscope");
//! Leaf::<u32>::new(&mut expected)
//!     .key("averages")
//!     .displayed_name("Averages")
//!     .assignment_optional()
//!     .default_value(16)
//!     .min_inc(1)
//!     .max_inc(4096)
//!     .reconfigurable()
//!     .commit()
//!     .unwrap();
//! ```

use std::marker::PhantomData;

use tree::{Attributes, Tree, Value, Variant};

use crate::attrs;
use crate::{AccessLevel, AccessMode, ArchivePolicy, Assignment, LeafKind, NodeKind};
use crate::{AlarmCondition, Error, Result, Schema, State};

/// Shared staging area of all builders.
struct Staged<'a> {
    schema: &'a mut Schema,
    key: Option<String>,
    attributes: Attributes,
    alias: Option<Value>,
}

impl<'a> Staged<'a> {
    fn new(schema: &'a mut Schema) -> Self {
        Staged {
            schema,
            key: None,
            attributes: Attributes::new(),
            alias: None,
        }
    }

    fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.attributes.set(name, value);
    }

    fn commit(self, value: Value) -> Result<()> {
        let key = self
            .key
            .ok_or_else(|| Error::Parameter("element committed without a key".into()))?;
        self.schema.body_mut().set(&key, value)?;
        let node = self
            .schema
            .body_mut()
            .node_mut(&key)
            .expect("the node was just set");
        // A re-declaration (derived class re-opening a key) keeps attributes
        // it does not restate.
        for (name, value) in self.attributes.iter() {
            node.attributes_mut().set(name, value.clone());
        }
        if let Some(alias) = self.alias {
            self.schema.set_alias(&key, alias)?;
        }
        Ok(())
    }
}

macro_rules! common_methods {
    () => {
        pub fn key(mut self, key: &str) -> Self {
            self.staged.key = Some(key.to_string());
            self
        }

        pub fn displayed_name(mut self, name: &str) -> Self {
            self.staged.set(attrs::DISPLAYED_NAME, name);
            self
        }

        pub fn description(mut self, text: &str) -> Self {
            self.staged.set(attrs::DESCRIPTION, text);
            self
        }

        pub fn required_access_level(mut self, level: AccessLevel) -> Self {
            self.staged.set(attrs::REQUIRED_ACCESS_LEVEL, level as i32);
            self
        }

        pub fn tags(mut self, tags: &[&str]) -> Self {
            let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
            self.staged.set(attrs::TAGS, tags);
            self
        }

        pub fn alias(mut self, alias: impl Into<Value>) -> Self {
            self.staged.alias = Some(alias.into());
            self
        }

        pub fn allowed_states(mut self, states: &[State]) -> Self {
            let names: Vec<String> = states.iter().map(|s| s.name().to_string()).collect();
            self.staged.set(attrs::ALLOWED_STATES, names);
            self
        }

        pub fn allowed_actions(mut self, actions: &[&str]) -> Self {
            let actions: Vec<String> = actions.iter().map(|a| a.to_string()).collect();
            self.staged.set(attrs::ALLOWED_ACTIONS, actions);
            self
        }

        pub fn display_type(mut self, hint: &str) -> Self {
            self.staged.set(attrs::DISPLAY_TYPE, hint);
            self
        }
    };
}

macro_rules! access_methods {
    () => {
        /// Set once at instantiation, immutable afterwards.
        pub fn init(mut self) -> Self {
            self.staged.set(attrs::ACCESS_MODE, AccessMode::Init as i32);
            self
        }

        /// Published by the device; never configured.
        pub fn read_only(mut self) -> Self {
            self.staged.set(attrs::ACCESS_MODE, AccessMode::Read as i32);
            self
        }

        /// Writable while the device runs.
        pub fn reconfigurable(mut self) -> Self {
            self.staged.set(attrs::ACCESS_MODE, AccessMode::Write as i32);
            self
        }

        pub fn assignment_mandatory(mut self) -> Self {
            self.staged.set(attrs::ASSIGNMENT, Assignment::Mandatory as i32);
            self
        }

        pub fn assignment_optional(mut self) -> Self {
            self.staged.set(attrs::ASSIGNMENT, Assignment::Optional as i32);
            self
        }

        /// Supplied by the framework, not by users.
        pub fn assignment_internal(mut self) -> Self {
            self.staged.set(attrs::ASSIGNMENT, Assignment::Internal as i32);
            self
        }

        pub fn archive_policy(mut self, policy: ArchivePolicy) -> Self {
            self.staged.set(attrs::ARCHIVE_POLICY, policy as i32);
            self
        }
    };
}

/// Builder for a typed property leaf.
pub struct Leaf<'a, T: Variant> {
    staged: Staged<'a>,
    _marker: PhantomData<T>,
}

impl<'a, T: Variant> Leaf<'a, T> {
    pub fn new(schema: &'a mut Schema) -> Self {
        let mut staged = Staged::new(schema);
        staged.set(attrs::NODE_TYPE, NodeKind::Leaf as i32);
        staged.set(attrs::LEAF_TYPE, LeafKind::Property as i32);
        staged.set(attrs::VALUE_TYPE, T::TAG.literal());
        staged.set(attrs::ACCESS_MODE, AccessMode::Init as i32);
        staged.set(attrs::ASSIGNMENT, Assignment::Optional as i32);
        Leaf {
            staged,
            _marker: PhantomData,
        }
    }

    common_methods!();
    access_methods!();

    pub fn default_value(mut self, value: T) -> Self {
        self.staged.set(attrs::DEFAULT_VALUE, value.wrap());
        self
    }

    pub fn options(mut self, options: Vec<T>) -> Self
    where
        Value: From<Vec<T>>,
    {
        self.staged.set(attrs::OPTIONS, Value::from(options));
        self
    }

    pub fn min_inc(mut self, bound: T) -> Self {
        self.staged.set(attrs::MIN_INC, bound.wrap());
        self
    }

    pub fn max_inc(mut self, bound: T) -> Self {
        self.staged.set(attrs::MAX_INC, bound.wrap());
        self
    }

    pub fn min_exc(mut self, bound: T) -> Self {
        self.staged.set(attrs::MIN_EXC, bound.wrap());
        self
    }

    pub fn max_exc(mut self, bound: T) -> Self {
        self.staged.set(attrs::MAX_EXC, bound.wrap());
        self
    }

    pub fn min_size(mut self, size: u32) -> Self {
        self.staged.set(attrs::MIN_SIZE, size);
        self
    }

    pub fn max_size(mut self, size: u32) -> Self {
        self.staged.set(attrs::MAX_SIZE, size);
        self
    }

    pub fn unit(mut self, unit: crate::Unit, prefix: crate::MetricPrefix) -> Self {
        self.staged.set(attrs::UNIT_ENUM, unit as i32);
        self.staged.set(attrs::UNIT_NAME, unit.name());
        self.staged.set(attrs::UNIT_SYMBOL, unit.symbol());
        self.staged.set(attrs::METRIC_PREFIX_ENUM, prefix as i32);
        self.staged.set(attrs::METRIC_PREFIX_NAME, prefix.name());
        self.staged.set(attrs::METRIC_PREFIX_SYMBOL, prefix.symbol());
        self
    }

    pub fn daq_data_type(mut self, kind: &str) -> Self {
        self.staged.set(attrs::DAQ_DATA_TYPE, kind);
        self
    }

    pub fn commit(self) -> Result<()> {
        self.staged.commit(Value::None)
    }
}

/// Builder for an interior node, optionally standing for a configurable
/// sub-object (`class_id`) or an embedded data schema.
pub struct NodeElement<'a> {
    staged: Staged<'a>,
    children: Tree,
}

impl<'a> NodeElement<'a> {
    pub fn new(schema: &'a mut Schema) -> Self {
        let mut staged = Staged::new(schema);
        staged.set(attrs::NODE_TYPE, NodeKind::Node as i32);
        NodeElement {
            staged,
            children: Tree::new(),
        }
    }

    common_methods!();

    pub fn class_id(mut self, class_id: &str) -> Self {
        self.staged.set(attrs::CLASS_ID, class_id);
        self
    }

    /// Embed another schema's entries as this node's children. Used for
    /// channel data schemas and composite classes.
    pub fn append_schema(mut self, schema: &Schema) -> Self {
        self.children
            .merge(schema.parameters(), tree::MergePolicy::MergeAttributes);
        self
    }

    pub fn commit(self) -> Result<()> {
        let children = self.children;
        self.staged.commit(Value::Tree(children))
    }
}

/// Builder for a tabular leaf: a sequence of trees, each row constrained by
/// a row schema.
pub struct TableElement<'a> {
    staged: Staged<'a>,
    row_schema: Option<Schema>,
}

impl<'a> TableElement<'a> {
    pub fn new(schema: &'a mut Schema) -> Self {
        let mut staged = Staged::new(schema);
        staged.set(attrs::NODE_TYPE, NodeKind::Leaf as i32);
        staged.set(attrs::LEAF_TYPE, LeafKind::Property as i32);
        staged.set(attrs::VALUE_TYPE, tree::TypeTag::VectorTree.literal());
        staged.set(attrs::ACCESS_MODE, AccessMode::Init as i32);
        staged.set(attrs::ASSIGNMENT, Assignment::Optional as i32);
        TableElement {
            staged,
            row_schema: None,
        }
    }

    common_methods!();
    access_methods!();

    pub fn row_schema(mut self, rows: Schema) -> Self {
        self.row_schema = Some(rows);
        self
    }

    pub fn default_rows(mut self, rows: Vec<Tree>) -> Self {
        self.staged.set(attrs::DEFAULT_VALUE, rows);
        self
    }

    pub fn min_size(mut self, size: u32) -> Self {
        self.staged.set(attrs::MIN_SIZE, size);
        self
    }

    pub fn max_size(mut self, size: u32) -> Self {
        self.staged.set(attrs::MAX_SIZE, size);
        self
    }

    pub fn commit(mut self) -> Result<()> {
        let rows = self
            .row_schema
            .take()
            .ok_or_else(|| Error::Parameter("a table element needs a row schema".into()))?;
        // Rows must be flat: a table inside a table row is invalid.
        for path in rows.paths() {
            if rows.row_schema(&path).is_some() {
                return Err(Error::Parameter(format!(
                    "row schema column '{path}' is itself a table"
                )));
            }
        }
        self.staged.set(attrs::ROW_SCHEMA, rows.to_value());
        self.staged.commit(Value::None)
    }
}

/// Builder for a state leaf. State leaves are read-only string leaves whose
/// accepted values come from the unified state set.
pub struct StateElement<'a> {
    staged: Staged<'a>,
}

impl<'a> StateElement<'a> {
    pub fn new(schema: &'a mut Schema) -> Self {
        let mut staged = Staged::new(schema);
        staged.set(attrs::NODE_TYPE, NodeKind::Leaf as i32);
        staged.set(attrs::LEAF_TYPE, LeafKind::State as i32);
        staged.set(attrs::VALUE_TYPE, tree::TypeTag::String.literal());
        staged.set(attrs::ACCESS_MODE, AccessMode::Read as i32);
        staged.set(attrs::ASSIGNMENT, Assignment::Optional as i32);
        staged.set(attrs::DISPLAY_TYPE, "State");
        staged.set(attrs::DEFAULT_VALUE, State::Unknown.name());
        StateElement { staged }
    }

    common_methods!();

    /// Restrict the leaf to these states. Without this, any token of the
    /// unified set is accepted.
    pub fn options(mut self, states: &[State]) -> Self {
        let names: Vec<String> = states.iter().map(|s| s.name().to_string()).collect();
        self.staged.set(attrs::OPTIONS, names);
        self
    }

    pub fn initial_value(mut self, state: State) -> Self {
        self.staged.set(attrs::DEFAULT_VALUE, state.name());
        self
    }

    pub fn commit(self) -> Result<()> {
        self.staged.commit(Value::None)
    }
}

/// Builder for an alarm-condition leaf.
pub struct AlarmElement<'a> {
    staged: Staged<'a>,
}

impl<'a> AlarmElement<'a> {
    pub fn new(schema: &'a mut Schema) -> Self {
        let mut staged = Staged::new(schema);
        staged.set(attrs::NODE_TYPE, NodeKind::Leaf as i32);
        staged.set(attrs::LEAF_TYPE, LeafKind::AlarmCondition as i32);
        staged.set(attrs::VALUE_TYPE, tree::TypeTag::String.literal());
        staged.set(attrs::ACCESS_MODE, AccessMode::Read as i32);
        staged.set(attrs::ASSIGNMENT, Assignment::Optional as i32);
        staged.set(attrs::DEFAULT_VALUE, AlarmCondition::None.name());
        AlarmElement { staged }
    }

    common_methods!();

    pub fn initial_value(mut self, condition: AlarmCondition) -> Self {
        self.staged.set(attrs::DEFAULT_VALUE, condition.name());
        self
    }

    pub fn commit(self) -> Result<()> {
        self.staged.commit(Value::None)
    }
}

/// Builder for a callable slot. A slot is an interior node with class id
/// `Slot`; it never carries configuration.
pub struct SlotElement<'a> {
    staged: Staged<'a>,
}

impl<'a> SlotElement<'a> {
    pub fn new(schema: &'a mut Schema) -> Self {
        let mut staged = Staged::new(schema);
        staged.set(attrs::NODE_TYPE, NodeKind::Node as i32);
        staged.set(attrs::CLASS_ID, crate::SLOT_CLASS_ID);
        staged.set(attrs::DISPLAY_TYPE, "Slot");
        staged.set(attrs::REQUIRED_ACCESS_LEVEL, AccessLevel::User as i32);
        SlotElement { staged }
    }

    common_methods!();

    pub fn commit(self) -> Result<()> {
        self.staged.commit(Value::Tree(Tree::new()))
    }
}

/// Re-opens an existing entry of a base declaration and overrides selected
/// attributes. A base class may restrict which attributes derived classes
/// are allowed to override.
pub struct OverwriteElement<'a> {
    schema: &'a mut Schema,
    key: Option<String>,
    changes: Vec<(&'static str, Value)>,
    alias: Option<Value>,
    restrictions: Vec<String>,
}

impl<'a> OverwriteElement<'a> {
    pub fn new(schema: &'a mut Schema) -> Self {
        OverwriteElement {
            schema,
            key: None,
            changes: Vec::new(),
            alias: None,
            restrictions: Vec::new(),
        }
    }

    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    pub fn new_default_value(mut self, value: impl Into<Value>) -> Self {
        self.changes.push((attrs::DEFAULT_VALUE, value.into()));
        self
    }

    pub fn new_displayed_name(mut self, name: &str) -> Self {
        self.changes.push((attrs::DISPLAYED_NAME, name.into()));
        self
    }

    pub fn new_description(mut self, text: &str) -> Self {
        self.changes.push((attrs::DESCRIPTION, text.into()));
        self
    }

    pub fn new_min_inc(mut self, bound: impl Into<Value>) -> Self {
        self.changes.push((attrs::MIN_INC, bound.into()));
        self
    }

    pub fn new_max_inc(mut self, bound: impl Into<Value>) -> Self {
        self.changes.push((attrs::MAX_INC, bound.into()));
        self
    }

    pub fn new_min_exc(mut self, bound: impl Into<Value>) -> Self {
        self.changes.push((attrs::MIN_EXC, bound.into()));
        self
    }

    pub fn new_max_exc(mut self, bound: impl Into<Value>) -> Self {
        self.changes.push((attrs::MAX_EXC, bound.into()));
        self
    }

    pub fn new_options(mut self, options: impl Into<Value>) -> Self {
        self.changes.push((attrs::OPTIONS, options.into()));
        self
    }

    pub fn new_allowed_states(mut self, states: &[State]) -> Self {
        let names: Vec<String> = states.iter().map(|s| s.name().to_string()).collect();
        self.changes.push((attrs::ALLOWED_STATES, names.into()));
        self
    }

    pub fn new_tags(mut self, tags: &[&str]) -> Self {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        self.changes.push((attrs::TAGS, tags.into()));
        self
    }

    pub fn new_alias(mut self, alias: impl Into<Value>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn new_access_mode(mut self, mode: AccessMode) -> Self {
        self.changes.push((attrs::ACCESS_MODE, (mode as i32).into()));
        self
    }

    pub fn new_assignment(mut self, assignment: Assignment) -> Self {
        self.changes
            .push((attrs::ASSIGNMENT, (assignment as i32).into()));
        self
    }

    pub fn new_required_access_level(mut self, level: AccessLevel) -> Self {
        self.changes
            .push((attrs::REQUIRED_ACCESS_LEVEL, (level as i32).into()));
        self
    }

    /// Forbid further overrides of the listed attributes by classes deriving
    /// from the one issuing this overwrite.
    pub fn restrict(mut self, attribute_names: &[&str]) -> Self {
        self.restrictions
            .extend(attribute_names.iter().map(|n| n.to_string()));
        self
    }

    pub fn commit(self) -> Result<()> {
        let key = self
            .key
            .ok_or_else(|| Error::Parameter("overwrite committed without a key".into()))?;
        if !self.schema.has(&key) {
            return Err(Error::Parameter(format!(
                "cannot overwrite '{key}': not declared by any base class"
            )));
        }
        let restricted: Vec<String> = self
            .schema
            .parameters()
            .get_attribute::<Vec<String>>(&key, attrs::OVERWRITE_RESTRICTIONS)
            .map(|v| v.clone())
            .unwrap_or_default();
        for (name, _) in &self.changes {
            if restricted.iter().any(|r| r.as_str() == *name) {
                return Err(Error::Parameter(format!(
                    "attribute '{name}' of '{key}' is restricted against overwriting"
                )));
            }
        }
        for (name, value) in self.changes {
            self.schema.body_mut().set_attribute(&key, name, value)?;
        }
        if let Some(alias) = self.alias {
            if restricted.iter().any(|r| r.as_str() == attrs::ALIAS) {
                return Err(Error::Parameter(format!(
                    "attribute 'alias' of '{key}' is restricted against overwriting"
                )));
            }
            self.schema.set_alias(&key, alias)?;
        }
        if !self.restrictions.is_empty() {
            let mut merged = restricted;
            for r in self.restrictions {
                if !merged.contains(&r) {
                    merged.push(r);
                }
            }
            self.schema
                .body_mut()
                .set_attribute(&key, attrs::OVERWRITE_RESTRICTIONS, merged)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::TypeTag;

    #[test]
    fn leaf_defaults_and_vocabulary() {
        let mut s = Schema::new("Sensor");
        Leaf::<i64>::new(&mut s)
            .key("offset")
            .description("Calibration offset")
            .assignment_optional()
            .default_value(0)
            .min_exc(-100)
            .max_exc(100)
            .reconfigurable()
            .commit()
            .unwrap();

        assert!(s.is_leaf("offset"));
        assert_eq!(s.value_type("offset").unwrap(), TypeTag::Int64);
        assert_eq!(s.assignment("offset"), Some(Assignment::Optional));
        assert_eq!(s.access_mode("offset"), Some(AccessMode::Write));
        assert_eq!(s.min_exc("offset"), Some(-100.0));
        assert_eq!(s.default_value("offset"), Some(&Value::Int64(0)));
    }

    #[test]
    fn commit_without_key_is_refused() {
        let mut s = Schema::new("Sensor");
        let result = Leaf::<bool>::new(&mut s).commit();
        assert!(matches!(result, Err(Error::Parameter(_))));
    }

    #[test]
    fn state_element_carries_the_state_vocabulary() {
        let mut s = Schema::new("Pump");
        StateElement::new(&mut s)
            .key("state")
            .options(&[State::Unknown, State::On, State::Off, State::Error])
            .initial_value(State::Unknown)
            .commit()
            .unwrap();

        assert_eq!(s.leaf_kind("state").unwrap(), LeafKind::State);
        assert_eq!(s.access_mode("state"), Some(AccessMode::Read));
        assert_eq!(s.default_value("state"), Some(&Value::from("UNKNOWN")));
    }

    #[test]
    fn table_requires_flat_rows() {
        let mut rows = Schema::new("Row");
        Leaf::<i32>::new(&mut rows)
            .key("int")
            .assignment_optional()
            .default_value(1)
            .commit()
            .unwrap();

        let mut nested_rows = Schema::new("Nested");
        TableElement::new(&mut nested_rows)
            .key("inner")
            .row_schema(rows.clone())
            .commit()
            .unwrap();

        let mut s = Schema::new("Device");
        let result = TableElement::new(&mut s)
            .key("table")
            .row_schema(nested_rows)
            .commit();
        assert!(matches!(result, Err(Error::Parameter(_))));
    }

    #[test]
    fn overwrite_honors_restrictions() {
        let mut s = Schema::new("Base");
        Leaf::<u32>::new(&mut s)
            .key("interval")
            .assignment_optional()
            .default_value(10)
            .reconfigurable()
            .commit()
            .unwrap();

        OverwriteElement::new(&mut s)
            .key("interval")
            .new_default_value(20u32)
            .restrict(&[attrs::ACCESS_MODE])
            .commit()
            .unwrap();
        assert_eq!(s.default_value("interval"), Some(&Value::UInt32(20)));

        // A later overwrite of the restricted attribute is refused.
        let result = OverwriteElement::new(&mut s)
            .key("interval")
            .new_access_mode(AccessMode::Init)
            .commit();
        assert!(matches!(result, Err(Error::Parameter(_))));

        // Overwriting an undeclared key is a parameter error.
        let result = OverwriteElement::new(&mut s)
            .key("missing")
            .new_default_value(1u32)
            .commit();
        assert!(matches!(result, Err(Error::Parameter(_))));
    }
}
