//! The fixed schema attribute vocabulary and its enumerations. The short
//! attribute names are used verbatim on the wire.

pub const NODE_TYPE: &str = "nodeType";
pub const LEAF_TYPE: &str = "leafType";
pub const VALUE_TYPE: &str = "valueType";
pub const CLASS_ID: &str = "classId";
pub const DISPLAYED_NAME: &str = "displayedName";
pub const DESCRIPTION: &str = "description";
pub const DEFAULT_VALUE: &str = "defaultValue";
pub const DISPLAY_TYPE: &str = "displayType";
pub const ACCESS_MODE: &str = "accessMode";
pub const ALIAS: &str = "alias";
pub const ALLOWED_STATES: &str = "allowedStates";
pub const ASSIGNMENT: &str = "assignment";
pub const TAGS: &str = "tags";
pub const ROW_SCHEMA: &str = "rowSchema";
pub const OPTIONS: &str = "options";
pub const REQUIRED_ACCESS_LEVEL: &str = "requiredAccessLevel";
pub const UNIT_ENUM: &str = "unitEnum";
pub const UNIT_NAME: &str = "unitName";
pub const UNIT_SYMBOL: &str = "unitSymbol";
pub const METRIC_PREFIX_ENUM: &str = "metricPrefixEnum";
pub const METRIC_PREFIX_NAME: &str = "metricPrefixName";
pub const METRIC_PREFIX_SYMBOL: &str = "metricPrefixSymbol";
pub const MIN_INC: &str = "minInc";
pub const MAX_INC: &str = "maxInc";
pub const MIN_EXC: &str = "minExc";
pub const MAX_EXC: &str = "maxExc";
pub const MIN_SIZE: &str = "minSize";
pub const MAX_SIZE: &str = "maxSize";
pub const ARCHIVE_POLICY: &str = "archivePolicy";
pub const OVERWRITE_RESTRICTIONS: &str = "overwriteRestrictions";
pub const DAQ_DATA_TYPE: &str = "daqDataType";
pub const DAQ_POLICY: &str = "daqPolicy";
pub const ALLOWED_ACTIONS: &str = "allowedActions";

/// Display type marking a pipeline-output schema subtree.
pub const DISPLAY_TYPE_OUTPUT_SCHEMA: &str = "OutputSchema";

/// Attributes the validator stamps onto accepted state / alarm leaves.
pub const INDICATE_STATE: &str = "indicateState";
pub const INDICATE_ALARM: &str = "indicateAlarm";

/// Attribute telling the validator a `None` leaf is resolved downstream.
pub const IS_ALIASING: &str = "isAliasing";

/// Timestamp attributes, matching the message-header vocabulary.
pub const TS_SEC: &str = "ts";
pub const TS_FRAC: &str = "tsFrac";

macro_rules! int_enum {
    ($(#[$doc:meta])* $name:ident { $($var:ident = $val:expr),+ $(,)? }) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(i32)]
        pub enum $name {
            $($var = $val),+
        }

        impl $name {
            pub fn from_i32(raw: i32) -> Option<Self> {
                match raw {
                    $($val => Some($name::$var),)+
                    _ => None,
                }
            }
        }
    };
}

int_enum! {
    /// Whether a schema entry describes a leaf value or an interior node.
    NodeKind {
        Leaf = 0,
        Node = 1,
    }
}

int_enum! {
    /// What kind of leaf this is.
    LeafKind {
        Property = 0,
        Command = 1,
        State = 2,
        AlarmCondition = 3,
    }
}

int_enum! {
    /// When a parameter may be written. The discriminants are or-able into
    /// the access-mode masks used by schema projection.
    AccessMode {
        Init = 1,
        Read = 2,
        Write = 4,
    }
}

impl AccessMode {
    pub const ANY: i32 = AccessMode::Init as i32 | AccessMode::Read as i32 | AccessMode::Write as i32;
}

int_enum! {
    /// Whether a parameter must be given, may be given, or is supplied by
    /// the framework itself.
    Assignment {
        Optional = 0,
        Mandatory = 1,
        Internal = 2,
    }
}

int_enum! {
    /// Monotonic operator privilege scale.
    AccessLevel {
        Observer = 0,
        User = 1,
        Operator = 2,
        Expert = 3,
        Admin = 4,
    }
}

int_enum! {
    /// How a logger samples updates of this parameter.
    ArchivePolicy {
        EveryEvent = 0,
        Every100Ms = 1,
        Every1S = 2,
        Every5S = 3,
        Every10S = 4,
        NoArchiving = 5,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn access_levels_are_monotonic() {
        assert!(AccessLevel::Observer < AccessLevel::User);
        assert!(AccessLevel::User < AccessLevel::Operator);
        assert!(AccessLevel::Operator < AccessLevel::Expert);
        assert!(AccessLevel::Expert < AccessLevel::Admin);
    }

    #[test]
    fn access_modes_form_a_mask() {
        assert_eq!(AccessMode::ANY, 7);
        assert_eq!(AccessMode::from_i32(4), Some(AccessMode::Write));
        assert_eq!(AccessMode::from_i32(3), None);
    }
}
