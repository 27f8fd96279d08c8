//! Rule-driven validation of configuration trees against a schema.
//!
//! The validator reshapes an unvalidated tree into a validated one: casting
//! values to their declared types, injecting defaults and timestamps,
//! enforcing bounds, options, sizes and state vocabularies. Ordinary
//! rejection is not an error path: the outcome carries an accumulated
//! diagnostic report instead.

use tree::{Tree, TypeTag, Value, CLASS_ID_ATTR};

use crate::alarm::AlarmCondition;
use crate::ndarray;
use crate::state::State;
use crate::timestamp::Timestamp;
use crate::{attrs, Assignment, LeafKind, Schema};

/// Six orthogonal switches governing what the validator may fix and what it
/// must reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    /// Missing optional leaves receive their schema default.
    pub inject_defaults: bool,
    /// Accept input that is not wrapped in a single root key.
    pub allow_unrooted_configuration: bool,
    /// Accept keys the schema does not declare.
    pub allow_additional_keys: bool,
    /// Accept absent mandatory leaves.
    pub allow_missing_keys: bool,
    /// Attach a timestamp to every validated leaf lacking one.
    pub inject_timestamps: bool,
    /// With `inject_timestamps`, overwrite existing stamps too.
    pub force_injected_timestamp: bool,
    /// Exact-presence, exact-variant checking; nothing is fixed and the
    /// validated output stays empty.
    pub strict: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        ValidationRules {
            inject_defaults: true,
            allow_unrooted_configuration: true,
            allow_additional_keys: false,
            allow_missing_keys: false,
            inject_timestamps: false,
            force_injected_timestamp: false,
            strict: false,
        }
    }
}

impl ValidationRules {
    /// The fixed rule set applied to table rows.
    fn for_table_rows() -> Self {
        ValidationRules::default()
    }

    /// Reconfiguration rules: partial input is fine, nothing is injected.
    pub fn for_reconfiguration() -> Self {
        ValidationRules {
            inject_defaults: false,
            allow_unrooted_configuration: true,
            allow_additional_keys: false,
            allow_missing_keys: true,
            inject_timestamps: false,
            force_injected_timestamp: false,
            strict: false,
        }
    }

    /// Whether only the user's input needs walking: nothing is injected and
    /// absence is fine, so untouched schema parts cannot matter.
    fn fast_path(&self) -> bool {
        self.allow_missing_keys
            && !self.inject_defaults
            && !self.allow_additional_keys
            && !self.inject_timestamps
            && !self.strict
    }
}

/// The result of one validation run.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    report: Vec<String>,
    validated: Tree,
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        self.report.is_empty()
    }

    /// Accumulated `"<path>: what and why"` lines, newline-joined without a
    /// trailing newline. Stable enough to assert against.
    pub fn report(&self) -> String {
        self.report.join("\n")
    }

    /// The validated tree. Meaningful only on acceptance; empty in strict
    /// mode.
    pub fn validated(&self) -> &Tree {
        &self.validated
    }

    pub fn into_validated(self) -> Tree {
        self.validated
    }
}

pub struct Validator {
    rules: ValidationRules,
    timestamp: Option<Timestamp>,
}

impl Default for Validator {
    fn default() -> Self {
        Validator::new(ValidationRules::default())
    }
}

impl Validator {
    pub fn new(rules: ValidationRules) -> Self {
        ndarray::register_handled_classes();
        Validator {
            rules,
            timestamp: None,
        }
    }

    /// Use this timestamp for injection instead of the wall clock.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    pub fn validate(&self, schema: &Schema, input: &Tree) -> ValidationOutcome {
        let mut outcome = ValidationOutcome {
            report: Vec::new(),
            validated: Tree::new(),
        };

        // Unwrap a rooted configuration, or insist on one.
        let body = if input.len() == 1 && input.keys().next() == Some(schema.root_name()) {
            match input.get_node(schema.root_name()).map(tree::Node::value) {
                Some(Value::Tree(t)) => t,
                _ => {
                    outcome.report.push(format!(
                        "{}: the root key must hold a configuration node",
                        schema.root_name()
                    ));
                    return outcome;
                }
            }
        } else if self.rules.allow_unrooted_configuration {
            input
        } else {
            outcome.report.push(format!(
                "expected a configuration rooted at '{}'",
                schema.root_name()
            ));
            return outcome;
        };

        if self.rules.fast_path() {
            let mut validated = Tree::new();
            self.walk_user(schema, schema.parameters(), body, &mut validated, "", &mut outcome.report);
            outcome.validated = validated;
        } else {
            let mut validated = Tree::new();
            self.walk_schema(schema, schema.parameters(), Some(body), &mut validated, "", &mut outcome.report);
            if self.rules.strict {
                outcome.validated = Tree::new();
            } else {
                outcome.validated = validated;
            }
        }
        outcome
    }

    /// Full walk: every schema entry is visited, injecting and checking.
    fn walk_schema(
        &self,
        schema: &Schema,
        level: &Tree,
        user: Option<&Tree>,
        out: &mut Tree,
        scope: &str,
        report: &mut Vec<String>,
    ) {
        for (key, snode) in level.iter() {
            let path = join_scope(scope, key);
            let unode = user.and_then(|u| u.get_node(key));

            match snode.value() {
                Value::Tree(children) => {
                    self.walk_node(schema, &path, key, children, snode, unode, out, report)
                }
                _ => {
                    // A leaf declaration.
                    match unode {
                        Some(unode) => self.validate_leaf(
                            schema,
                            &path,
                            key,
                            unode.value(),
                            Some(unode.attributes()),
                            out,
                            report,
                        ),
                        None => self.handle_absent_leaf(schema, &path, key, out, report),
                    }
                }
            }
        }

        // Keys the schema does not declare.
        if let Some(user) = user {
            for (key, unode) in user.iter() {
                if level.get_node(key).is_some() {
                    continue;
                }
                let path = join_scope(scope, key);
                if self.rules.allow_additional_keys && !self.rules.strict {
                    out.insert(key, unode.value().clone())
                        .set_attributes(unode.attributes().clone());
                } else {
                    report.push(format!("{path}: unexpected configuration parameter"));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_node(
        &self,
        schema: &Schema,
        path: &str,
        key: &str,
        children: &Tree,
        snode: &tree::Node,
        unode: Option<&tree::Node>,
        out: &mut Tree,
        report: &mut Vec<String>,
    ) {
        let class_id = snode.attributes().get_typed::<String>(attrs::CLASS_ID);

        // Slots carry no configuration at all.
        if class_id.map(String::as_str) == Some(ndarray::SLOT_CLASS_ID) {
            if let Some(unode) = unode {
                let empty = matches!(unode.value(), Value::Tree(t) if t.is_empty());
                if !empty {
                    report.push(format!("{path}: configuration provided for a slot"));
                }
            }
            return;
        }

        // Output-channel schema subtrees are produced by the system; the
        // user may at most echo empty nodes into them.
        if schema
            .display_type(path)
            .as_deref()
            == Some(attrs::DISPLAY_TYPE_OUTPUT_SCHEMA)
        {
            if let Some(unode) = unode {
                let harmless = match unode.value() {
                    Value::Tree(t) => only_empty_tree_leaves(t),
                    _ => false,
                };
                if !harmless {
                    report.push(format!(
                        "{path}: an output schema is produced by the system, not configured"
                    ));
                }
            }
            return;
        }

        if class_id.map(String::as_str) == Some(ndarray::NDARRAY_CLASS_ID) {
            self.validate_ndarray(schema, path, key, unode, out, report);
            return;
        }

        // A non-tree value against a classed node is an already-constructed
        // instance: copied through, marked with the class attribute.
        if let (Some(class_id), Some(unode)) = (class_id, unode) {
            if !unode.value().is_tree() {
                if !self.rules.strict {
                    let copied = out.insert(key, unode.value().clone());
                    copied.set_attributes(unode.attributes().clone());
                    copied.attributes_mut().set(CLASS_ID_ATTR, class_id.clone());
                }
                return;
            }
        }

        let user_children = match unode.map(tree::Node::value) {
            Some(Value::Tree(t)) => Some(t),
            Some(other) => {
                report.push(format!(
                    "{path}: expected a configuration node, got {}",
                    other.tag()
                ));
                return;
            }
            None => None,
        };

        let mut sub = Tree::new();
        self.walk_schema(schema, children, user_children, &mut sub, path, report);
        if !self.rules.strict {
            out.insert(key, sub)
                .set_attributes(snode_projection(snode));
        }
    }

    fn validate_ndarray(
        &self,
        schema: &Schema,
        path: &str,
        key: &str,
        unode: Option<&tree::Node>,
        out: &mut Tree,
        report: &mut Vec<String>,
    ) {
        let Some(unode) = unode else {
            // Arrays are read-only payloads and may be missing, except when
            // presence is checked strictly.
            if self.rules.strict {
                report.push(format!("{path}: array payload is lacking"));
            }
            return;
        };
        let payload = match unode.value() {
            Value::Tree(t) => t,
            other => {
                report.push(format!(
                    "{path}: expected an array payload, got {}",
                    other.tag()
                ));
                return;
            }
        };

        let expected_shape = schema
            .default_value(&format!("{path}.{}", ndarray::NDARRAY_SHAPE))
            .and_then(|v| match tree::cast_value(v, TypeTag::VectorUInt64) {
                Ok(Value::VecUInt64(s)) => Some(s),
                _ => None,
            });
        if let (Some(expected), Some(actual)) = (expected_shape, ndarray::shape_of(payload)) {
            if !expected.is_empty() && expected != actual {
                report.push(format!(
                    "{path}: array shape mismatch: expected {}, got {}",
                    join_u64(&expected),
                    join_u64(&actual)
                ));
                return;
            }
        }

        let expected_type = schema
            .default_value(&format!("{path}.{}", ndarray::NDARRAY_TYPE))
            .and_then(|v| match v {
                Value::Str(s) => TypeTag::from_literal(s),
                _ => None,
            });
        if let (Some(expected), Some(actual)) = (expected_type, ndarray::element_type_of(payload)) {
            if expected != actual {
                report.push(format!(
                    "{path}: array type mismatch: expected {expected}, got {actual}"
                ));
                return;
            }
        }

        if !self.rules.strict {
            let rewrapped = out.insert(key, ndarray::canonicalize(payload));
            rewrapped
                .attributes_mut()
                .set(CLASS_ID_ATTR, ndarray::NDARRAY_CLASS_ID);
        }
    }

    fn handle_absent_leaf(
        &self,
        schema: &Schema,
        path: &str,
        key: &str,
        out: &mut Tree,
        report: &mut Vec<String>,
    ) {
        if self.rules.strict {
            report.push(format!("{path}: parameter is lacking"));
            return;
        }
        let assignment = schema.assignment(path);
        if assignment == Some(Assignment::Mandatory) && !self.rules.allow_missing_keys {
            report.push(format!("{path}: missing mandatory parameter"));
            return;
        }
        if self.rules.inject_defaults {
            if let Some(default) = schema.default_value(path) {
                self.validate_leaf(schema, path, key, default, None, out, report);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_leaf(
        &self,
        schema: &Schema,
        path: &str,
        key: &str,
        value: &Value,
        user_attrs: Option<&tree::Attributes>,
        out: &mut Tree,
        report: &mut Vec<String>,
    ) {
        let leaf_kind = schema.leaf_kind(path).unwrap_or(LeafKind::Property);

        // Indicator attributes are owned by the validator; users may only
        // echo them back on the matching leaf kinds.
        if let Some(user_attrs) = user_attrs {
            if user_attrs.has(attrs::INDICATE_STATE) && leaf_kind != LeafKind::State {
                report.push(format!(
                    "{path}: the indicateState attribute is only valid on state leaves"
                ));
                return;
            }
            if user_attrs.has(attrs::INDICATE_ALARM) && leaf_kind != LeafKind::AlarmCondition {
                report.push(format!(
                    "{path}: the indicateAlarm attribute is only valid on alarm leaves"
                ));
                return;
            }
        }

        if schema.row_schema(path).is_some() {
            self.validate_table(schema, path, key, value, report, out);
            return;
        }

        let target = match schema.value_type(path) {
            Ok(t) => t,
            Err(_) => {
                report.push(format!("{path}: schema entry lacks a value type"));
                return;
            }
        };

        if self.rules.strict {
            if value.tag() != target {
                report.push(format!(
                    "{path}: declared as {target} but provided as {}",
                    value.tag()
                ));
            }
            return;
        }

        // An aliased placeholder is left for downstream resolution.
        if value.is_none()
            && schema
                .parameters()
                .has_attribute(path, attrs::IS_ALIASING)
        {
            out.insert(key, Value::None);
            return;
        }

        // Text-based sources deliver empty sequences as empty string
        // vectors, also where a sequence of nodes is declared.
        let empty_vecstr = matches!(value, Value::VecStr(v) if v.is_empty());
        let cast = if target == TypeTag::VectorTree && empty_vecstr {
            Value::VecTree(Vec::new())
        } else {
            match tree::cast_value(value, target) {
                Ok(cast) => cast,
                Err(err) => {
                    report.push(format!("{path}: {err}"));
                    return;
                }
            }
        };

        if let Err(line) = self.check_bounds(schema, path, &cast) {
            report.push(line);
            return;
        }

        match leaf_kind {
            LeafKind::State => {
                let token = match &cast {
                    Value::Str(s) => s.clone(),
                    _ => tree::to_text(&cast),
                };
                if State::from_name(&token).is_none() {
                    report.push(format!("{path}: '{token}' is not a valid state string"));
                    return;
                }
                if let Err(line) = check_options(schema, path, &cast) {
                    report.push(line);
                    return;
                }
                let node = self.emit(out, key, cast, user_attrs);
                node.attributes_mut().set(attrs::INDICATE_STATE, true);
            }
            LeafKind::AlarmCondition => {
                let token = match &cast {
                    Value::Str(s) => s.clone(),
                    _ => tree::to_text(&cast),
                };
                if AlarmCondition::from_name(&token).is_none() {
                    report.push(format!(
                        "{path}: '{token}' is not a valid alarm condition string"
                    ));
                    return;
                }
                let node = self.emit(out, key, cast, user_attrs);
                node.attributes_mut().set(attrs::INDICATE_ALARM, true);
            }
            _ => {
                if let Err(line) = check_options(schema, path, &cast) {
                    report.push(line);
                    return;
                }
                self.emit(out, key, cast, user_attrs);
            }
        }
    }

    /// Write a validated leaf, carrying user attributes and stamping
    /// timestamps per the rules.
    fn emit<'t>(
        &self,
        out: &'t mut Tree,
        key: &str,
        value: Value,
        user_attrs: Option<&tree::Attributes>,
    ) -> &'t mut tree::Node {
        let node = out.insert(key, value);
        if let Some(user_attrs) = user_attrs {
            node.set_attributes(user_attrs.clone());
        }
        if self.rules.inject_timestamps {
            let stamp = self.timestamp.unwrap_or_else(Timestamp::now);
            stamp.apply(node.attributes_mut(), self.rules.force_injected_timestamp);
        }
        node
    }

    fn check_bounds(&self, schema: &Schema, path: &str, cast: &Value) -> Result<(), String> {
        if cast.tag().is_numeric() {
            let v = match tree::cast_value(cast, TypeTag::Double) {
                Ok(Value::Double(v)) => v,
                _ => return Ok(()),
            };
            if let Some(bound) = schema.min_inc(path) {
                if v < bound {
                    return Err(format!("{path}: value {v} must be at least {bound}"));
                }
            }
            if let Some(bound) = schema.min_exc(path) {
                if v <= bound {
                    return Err(format!("{path}: value {v} must be greater than {bound}"));
                }
            }
            if let Some(bound) = schema.max_inc(path) {
                if v > bound {
                    return Err(format!("{path}: value {v} must be at most {bound}"));
                }
            }
            if let Some(bound) = schema.max_exc(path) {
                if v >= bound {
                    return Err(format!("{path}: value {v} must be less than {bound}"));
                }
            }
        }
        if cast.tag().is_sequence() {
            let len = sequence_len(cast).unwrap_or(0);
            if let Some(min) = schema.min_size(path) {
                if (len as u32) < min {
                    return Err(format!(
                        "{path}: sequence must have at least {min} element(s), got {len}"
                    ));
                }
            }
            if let Some(max) = schema.max_size(path) {
                if (len as u32) > max {
                    return Err(format!(
                        "{path}: sequence must have no more than {max} element(s), got {len}"
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_table(
        &self,
        schema: &Schema,
        path: &str,
        key: &str,
        value: &Value,
        report: &mut Vec<String>,
        out: &mut Tree,
    ) {
        let row_schema = schema
            .row_schema(path)
            .expect("caller checked the row schema");

        let rows: Vec<Tree> = match value {
            Value::VecTree(rows) => rows.clone(),
            // An empty sequence of strings is how an empty table arrives
            // from text-based sources.
            Value::VecStr(v) if v.is_empty() => Vec::new(),
            other => {
                report.push(format!(
                    "{path}: cannot interpret {} as table rows",
                    other.tag()
                ));
                return;
            }
        };

        if let Some(min) = schema.min_size(path) {
            if (rows.len() as u32) < min {
                report.push(format!(
                    "{path}: table must have at least {min} row(s), got {}",
                    rows.len()
                ));
                return;
            }
        }
        if let Some(max) = schema.max_size(path) {
            if (rows.len() as u32) > max {
                report.push(format!(
                    "{path}: table must have no more than {max} row(s), got {}",
                    rows.len()
                ));
                return;
            }
        }

        if self.rules.strict {
            return;
        }

        let row_validator = Validator::new(ValidationRules::for_table_rows());
        let mut validated_rows = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            let outcome = row_validator.validate(&row_schema, row);
            if !outcome.is_accepted() {
                // The first bad row decides; later rows are not inspected.
                report.push(format!("{path}[{i}]: {}", outcome.report()));
                return;
            }
            validated_rows.push(outcome.into_validated());
        }
        self.emit(out, key, Value::VecTree(validated_rows), None);
    }

    /// Fast path: only what the user supplied is walked.
    fn walk_user(
        &self,
        schema: &Schema,
        level: &Tree,
        user: &Tree,
        out: &mut Tree,
        scope: &str,
        report: &mut Vec<String>,
    ) {
        for (key, unode) in user.iter() {
            let path = join_scope(scope, key);
            let Some(snode) = level.get_node(key) else {
                report.push(format!("{path}: unexpected configuration parameter"));
                continue;
            };
            match (snode.value(), unode.value()) {
                (Value::Tree(schildren), Value::Tree(uchildren)) => {
                    let class_id = snode.attributes().get_typed::<String>(attrs::CLASS_ID);
                    if class_id.map(String::as_str) == Some(ndarray::SLOT_CLASS_ID) {
                        if !uchildren.is_empty() {
                            report.push(format!("{path}: configuration provided for a slot"));
                        }
                        continue;
                    }
                    let mut sub = Tree::new();
                    self.walk_user(schema, schildren, uchildren, &mut sub, &path, report);
                    out.insert(key, sub);
                }
                (Value::Tree(_), other) => {
                    report.push(format!(
                        "{path}: expected a configuration node, got {}",
                        other.tag()
                    ));
                }
                _ => self.validate_leaf(
                    schema,
                    &path,
                    key,
                    unode.value(),
                    Some(unode.attributes()),
                    out,
                    report,
                ),
            }
        }
    }
}

fn join_scope(scope: &str, key: &str) -> String {
    if scope.is_empty() {
        key.to_string()
    } else {
        format!("{scope}.{key}")
    }
}

fn join_u64(v: &[u64]) -> String {
    use itertools::Itertools as _;
    v.iter().join(",")
}

fn sequence_len(value: &Value) -> Option<usize> {
    match tree::cast_value(value, TypeTag::VectorString) {
        Ok(Value::VecStr(v)) => Some(v.len()),
        _ => None,
    }
}

/// Membership check against the `options` attribute, comparing canonical
/// textual forms so numeric widths do not matter.
fn check_options(schema: &Schema, path: &str, cast: &Value) -> Result<(), String> {
    let Some(options) = schema.options(path) else {
        return Ok(());
    };
    if cast.tag().is_sequence() {
        return Ok(());
    }
    let rendered = match tree::cast_value(cast, TypeTag::String) {
        Ok(Value::Str(s)) => s,
        _ => return Ok(()),
    };
    let allowed = match tree::cast_value(options, TypeTag::VectorString) {
        Ok(Value::VecStr(v)) => v,
        _ => return Ok(()),
    };
    if allowed.iter().any(|o| *o == rendered) {
        Ok(())
    } else {
        Err(format!(
            "{path}: value '{rendered}' is not one of the allowed options"
        ))
    }
}

/// Whether a user-supplied subtree consists of nothing but empty tree
/// leaves, at any depth.
fn only_empty_tree_leaves(tree_value: &Tree) -> bool {
    tree_value.iter().all(|(_, node)| match node.value() {
        Value::Tree(t) => only_empty_tree_leaves(t),
        _ => false,
    })
}

/// Attributes of a schema node worth carrying onto the validated node.
fn snode_projection(snode: &tree::Node) -> tree::Attributes {
    let mut attrs_out = tree::Attributes::new();
    if let Some(class_id) = snode.attributes().get_typed::<String>(attrs::CLASS_ID) {
        attrs_out.set(CLASS_ID_ATTR, class_id.clone());
    }
    attrs_out
}
