use std::sync::Arc;

use crate::Tree;

/// 32-bit complex scalar.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct C32 {
    pub re: f32,
    pub im: f32,
}

/// 64-bit complex scalar.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct C64 {
    pub re: f64,
    pub im: f64,
}

impl C32 {
    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }
}

impl C64 {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }
}

impl std::fmt::Display for C32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.re, self.im)
    }
}

impl std::fmt::Display for C64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.re, self.im)
    }
}

/// A schema carried as a value: a named description tree.
///
/// The schema crate layers its projection and alias machinery on top of this;
/// at the tree level it is just a root name and a body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaValue {
    pub name: String,
    pub body: Tree,
}

/// Value is the closed sum over every variant a tree node may hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    ComplexFloat(C32),
    ComplexDouble(C64),
    Str(String),
    ByteArray(bytes::Bytes),
    VecBool(Vec<bool>),
    VecInt8(Vec<i8>),
    VecUInt8(Vec<u8>),
    VecInt16(Vec<i16>),
    VecUInt16(Vec<u16>),
    VecInt32(Vec<i32>),
    VecUInt32(Vec<u32>),
    VecInt64(Vec<i64>),
    VecUInt64(Vec<u64>),
    VecFloat(Vec<f32>),
    VecDouble(Vec<f64>),
    VecComplexFloat(Vec<C32>),
    VecComplexDouble(Vec<C64>),
    VecStr(Vec<String>),
    Tree(Tree),
    VecTree(Vec<Tree>),
    SharedTree(Arc<Tree>),
    VecSharedTree(Vec<Arc<Tree>>),
    Schema(Box<SchemaValue>),
    None,
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

/// TypeTag names each Value variant. The literal token and the integer
/// discriminant are both stable: the integer is written verbatim by the wire
/// codec and the literal is the `valueType` vocabulary of schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum TypeTag {
    Bool = 0,
    VectorBool = 1,
    Int8 = 2,
    VectorInt8 = 3,
    UInt8 = 4,
    VectorUInt8 = 5,
    Int16 = 6,
    VectorInt16 = 7,
    UInt16 = 8,
    VectorUInt16 = 9,
    Int32 = 10,
    VectorInt32 = 11,
    UInt32 = 12,
    VectorUInt32 = 13,
    Int64 = 14,
    VectorInt64 = 15,
    UInt64 = 16,
    VectorUInt64 = 17,
    Float = 18,
    VectorFloat = 19,
    Double = 20,
    VectorDouble = 21,
    ComplexFloat = 22,
    VectorComplexFloat = 23,
    ComplexDouble = 24,
    VectorComplexDouble = 25,
    String = 26,
    VectorString = 27,
    ByteArray = 28,
    Tree = 29,
    VectorTree = 30,
    TreePointer = 31,
    VectorTreePointer = 32,
    Schema = 33,
    None = 34,
}

impl TypeTag {
    /// The literal token, used as the on-wire `valueType` discriminator.
    pub fn literal(&self) -> &'static str {
        use TypeTag::*;
        match self {
            Bool => "BOOL",
            VectorBool => "VECTOR_BOOL",
            Int8 => "INT8",
            VectorInt8 => "VECTOR_INT8",
            UInt8 => "UINT8",
            VectorUInt8 => "VECTOR_UINT8",
            Int16 => "INT16",
            VectorInt16 => "VECTOR_INT16",
            UInt16 => "UINT16",
            VectorUInt16 => "VECTOR_UINT16",
            Int32 => "INT32",
            VectorInt32 => "VECTOR_INT32",
            UInt32 => "UINT32",
            VectorUInt32 => "VECTOR_UINT32",
            Int64 => "INT64",
            VectorInt64 => "VECTOR_INT64",
            UInt64 => "UINT64",
            VectorUInt64 => "VECTOR_UINT64",
            Float => "FLOAT",
            VectorFloat => "VECTOR_FLOAT",
            Double => "DOUBLE",
            VectorDouble => "VECTOR_DOUBLE",
            ComplexFloat => "COMPLEX_FLOAT",
            VectorComplexFloat => "VECTOR_COMPLEX_FLOAT",
            ComplexDouble => "COMPLEX_DOUBLE",
            VectorComplexDouble => "VECTOR_COMPLEX_DOUBLE",
            String => "STRING",
            VectorString => "VECTOR_STRING",
            ByteArray => "BYTE_ARRAY",
            Tree => "TREE",
            VectorTree => "VECTOR_TREE",
            TreePointer => "TREE_POINTER",
            VectorTreePointer => "VECTOR_TREE_POINTER",
            Schema => "SCHEMA",
            None => "NONE",
        }
    }

    pub fn from_literal(s: &str) -> Option<Self> {
        use TypeTag::*;
        Some(match s {
            "BOOL" => Bool,
            "VECTOR_BOOL" => VectorBool,
            "INT8" => Int8,
            "VECTOR_INT8" => VectorInt8,
            "UINT8" => UInt8,
            "VECTOR_UINT8" => VectorUInt8,
            "INT16" => Int16,
            "VECTOR_INT16" => VectorInt16,
            "UINT16" => UInt16,
            "VECTOR_UINT16" => VectorUInt16,
            "INT32" => Int32,
            "VECTOR_INT32" => VectorInt32,
            "UINT32" => UInt32,
            "VECTOR_UINT32" => VectorUInt32,
            "INT64" => Int64,
            "VECTOR_INT64" => VectorInt64,
            "UINT64" => UInt64,
            "VECTOR_UINT64" => VectorUInt64,
            "FLOAT" => Float,
            "VECTOR_FLOAT" => VectorFloat,
            "DOUBLE" => Double,
            "VECTOR_DOUBLE" => VectorDouble,
            "COMPLEX_FLOAT" => ComplexFloat,
            "VECTOR_COMPLEX_FLOAT" => VectorComplexFloat,
            "COMPLEX_DOUBLE" => ComplexDouble,
            "VECTOR_COMPLEX_DOUBLE" => VectorComplexDouble,
            "STRING" => String,
            "VECTOR_STRING" => VectorString,
            "BYTE_ARRAY" => ByteArray,
            "TREE" => Tree,
            "VECTOR_TREE" => VectorTree,
            "TREE_POINTER" => TreePointer,
            "VECTOR_TREE_POINTER" => VectorTreePointer,
            "SCHEMA" => Schema,
            "NONE" => None,
            _ => return Option::None,
        })
    }

    pub fn from_wire(tag: u32) -> Option<Self> {
        use TypeTag::*;
        Some(match tag {
            0 => Bool,
            1 => VectorBool,
            2 => Int8,
            3 => VectorInt8,
            4 => UInt8,
            5 => VectorUInt8,
            6 => Int16,
            7 => VectorInt16,
            8 => UInt16,
            9 => VectorUInt16,
            10 => Int32,
            11 => VectorInt32,
            12 => UInt32,
            13 => VectorUInt32,
            14 => Int64,
            15 => VectorInt64,
            16 => UInt64,
            17 => VectorUInt64,
            18 => Float,
            19 => VectorFloat,
            20 => Double,
            21 => VectorDouble,
            22 => ComplexFloat,
            23 => VectorComplexFloat,
            24 => ComplexDouble,
            25 => VectorComplexDouble,
            26 => String,
            27 => VectorString,
            28 => ByteArray,
            29 => Tree,
            30 => VectorTree,
            31 => TreePointer,
            32 => VectorTreePointer,
            33 => Schema,
            34 => None,
            _ => return Option::None,
        })
    }

    /// Whether this tag is a sequence-of-scalar variant.
    pub fn is_sequence(&self) -> bool {
        use TypeTag::*;
        matches!(
            self,
            VectorBool
                | VectorInt8
                | VectorUInt8
                | VectorInt16
                | VectorUInt16
                | VectorInt32
                | VectorUInt32
                | VectorInt64
                | VectorUInt64
                | VectorFloat
                | VectorDouble
                | VectorComplexFloat
                | VectorComplexDouble
                | VectorString
        )
    }

    /// Whether this tag is a numeric scalar (bounds apply to these).
    pub fn is_numeric(&self) -> bool {
        use TypeTag::*;
        matches!(
            self,
            Int8 | UInt8
                | Int16
                | UInt16
                | Int32
                | UInt32
                | Int64
                | UInt64
                | Float
                | Double
        )
    }

    /// The element tag of a sequence variant, if any.
    pub fn element(&self) -> Option<TypeTag> {
        use TypeTag::*;
        Some(match self {
            VectorBool => Bool,
            VectorInt8 => Int8,
            VectorUInt8 => UInt8,
            VectorInt16 => Int16,
            VectorUInt16 => UInt16,
            VectorInt32 => Int32,
            VectorUInt32 => UInt32,
            VectorInt64 => Int64,
            VectorUInt64 => UInt64,
            VectorFloat => Float,
            VectorDouble => Double,
            VectorComplexFloat => ComplexFloat,
            VectorComplexDouble => ComplexDouble,
            VectorString => String,
            _ => return Option::None,
        })
    }

    /// The sequence tag whose element is this scalar, if any.
    pub fn sequence_of(&self) -> Option<TypeTag> {
        use TypeTag::*;
        Some(match self {
            Bool => VectorBool,
            Int8 => VectorInt8,
            UInt8 => VectorUInt8,
            Int16 => VectorInt16,
            UInt16 => VectorUInt16,
            Int32 => VectorInt32,
            UInt32 => VectorUInt32,
            Int64 => VectorInt64,
            UInt64 => VectorUInt64,
            Float => VectorFloat,
            Double => VectorDouble,
            ComplexFloat => VectorComplexFloat,
            ComplexDouble => VectorComplexDouble,
            String => VectorString,
            _ => return Option::None,
        })
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.literal())
    }
}

impl std::str::FromStr for TypeTag {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeTag::from_literal(s)
            .ok_or_else(|| crate::Error::Logic(format!("unknown type literal '{s}'")))
    }
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::Bool(_) => TypeTag::Bool,
            Value::Int8(_) => TypeTag::Int8,
            Value::UInt8(_) => TypeTag::UInt8,
            Value::Int16(_) => TypeTag::Int16,
            Value::UInt16(_) => TypeTag::UInt16,
            Value::Int32(_) => TypeTag::Int32,
            Value::UInt32(_) => TypeTag::UInt32,
            Value::Int64(_) => TypeTag::Int64,
            Value::UInt64(_) => TypeTag::UInt64,
            Value::Float(_) => TypeTag::Float,
            Value::Double(_) => TypeTag::Double,
            Value::ComplexFloat(_) => TypeTag::ComplexFloat,
            Value::ComplexDouble(_) => TypeTag::ComplexDouble,
            Value::Str(_) => TypeTag::String,
            Value::ByteArray(_) => TypeTag::ByteArray,
            Value::VecBool(_) => TypeTag::VectorBool,
            Value::VecInt8(_) => TypeTag::VectorInt8,
            Value::VecUInt8(_) => TypeTag::VectorUInt8,
            Value::VecInt16(_) => TypeTag::VectorInt16,
            Value::VecUInt16(_) => TypeTag::VectorUInt16,
            Value::VecInt32(_) => TypeTag::VectorInt32,
            Value::VecUInt32(_) => TypeTag::VectorUInt32,
            Value::VecInt64(_) => TypeTag::VectorInt64,
            Value::VecUInt64(_) => TypeTag::VectorUInt64,
            Value::VecFloat(_) => TypeTag::VectorFloat,
            Value::VecDouble(_) => TypeTag::VectorDouble,
            Value::VecComplexFloat(_) => TypeTag::VectorComplexFloat,
            Value::VecComplexDouble(_) => TypeTag::VectorComplexDouble,
            Value::VecStr(_) => TypeTag::VectorString,
            Value::Tree(_) => TypeTag::Tree,
            Value::VecTree(_) => TypeTag::VectorTree,
            Value::SharedTree(_) => TypeTag::TreePointer,
            Value::VecSharedTree(_) => TypeTag::VectorTreePointer,
            Value::Schema(_) => TypeTag::Schema,
            Value::None => TypeTag::None,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Value::Tree(_))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }
}

/// Variant relates a Rust type to the Value variant that stores it,
/// enabling `get::<T>` / `set` without going through Value explicitly.
pub trait Variant: Sized {
    const TAG: TypeTag;

    fn variant_ref(value: &Value) -> Option<&Self>;
    fn variant_mut(value: &mut Value) -> Option<&mut Self>;
    fn wrap(self) -> Value;
    fn unwrap_value(value: Value) -> Option<Self>;

    /// Borrow from an indexed sequence element: `a.b[2]` resolves to a tree
    /// inside a `VecTree`, not to a stand-alone Value. Only `Tree` itself
    /// supports this.
    fn from_element(_element: &Tree) -> Option<&Self> {
        None
    }

    fn from_element_mut(_element: &mut Tree) -> Option<&mut Self> {
        None
    }
}

macro_rules! variant {
    ($ty:ty, $var:ident, $tag:ident) => {
        impl Variant for $ty {
            const TAG: TypeTag = TypeTag::$tag;

            fn variant_ref(value: &Value) -> Option<&Self> {
                match value {
                    Value::$var(v) => Some(v),
                    _ => None,
                }
            }

            fn variant_mut(value: &mut Value) -> Option<&mut Self> {
                match value {
                    Value::$var(v) => Some(v),
                    _ => None,
                }
            }

            fn wrap(self) -> Value {
                Value::$var(self)
            }

            fn unwrap_value(value: Value) -> Option<Self> {
                match value {
                    Value::$var(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Value {
                Value::$var(v)
            }
        }
    };
}

variant!(bool, Bool, Bool);
variant!(i8, Int8, Int8);
variant!(u8, UInt8, UInt8);
variant!(i16, Int16, Int16);
variant!(u16, UInt16, UInt16);
variant!(i32, Int32, Int32);
variant!(u32, UInt32, UInt32);
variant!(i64, Int64, Int64);
variant!(u64, UInt64, UInt64);
variant!(f32, Float, Float);
variant!(f64, Double, Double);
variant!(C32, ComplexFloat, ComplexFloat);
variant!(C64, ComplexDouble, ComplexDouble);
variant!(String, Str, String);
variant!(bytes::Bytes, ByteArray, ByteArray);
variant!(Vec<bool>, VecBool, VectorBool);
variant!(Vec<i8>, VecInt8, VectorInt8);
variant!(Vec<u8>, VecUInt8, VectorUInt8);
variant!(Vec<i16>, VecInt16, VectorInt16);
variant!(Vec<u16>, VecUInt16, VectorUInt16);
variant!(Vec<i32>, VecInt32, VectorInt32);
variant!(Vec<u32>, VecUInt32, VectorUInt32);
variant!(Vec<i64>, VecInt64, VectorInt64);
variant!(Vec<u64>, VecUInt64, VectorUInt64);
variant!(Vec<f32>, VecFloat, VectorFloat);
variant!(Vec<f64>, VecDouble, VectorDouble);
variant!(Vec<C32>, VecComplexFloat, VectorComplexFloat);
variant!(Vec<C64>, VecComplexDouble, VectorComplexDouble);
variant!(Vec<String>, VecStr, VectorString);
variant!(Vec<Tree>, VecTree, VectorTree);
variant!(Arc<Tree>, SharedTree, TreePointer);
variant!(Vec<Arc<Tree>>, VecSharedTree, VectorTreePointer);
variant!(Box<SchemaValue>, Schema, Schema);

impl Variant for Tree {
    const TAG: TypeTag = TypeTag::Tree;

    fn variant_ref(value: &Value) -> Option<&Self> {
        match value {
            Value::Tree(t) => Some(t),
            _ => None,
        }
    }

    fn variant_mut(value: &mut Value) -> Option<&mut Self> {
        match value {
            Value::Tree(t) => Some(t),
            _ => None,
        }
    }

    fn wrap(self) -> Value {
        Value::Tree(self)
    }

    fn unwrap_value(value: Value) -> Option<Self> {
        match value {
            Value::Tree(t) => Some(t),
            _ => None,
        }
    }

    fn from_element(element: &Tree) -> Option<&Self> {
        Some(element)
    }

    fn from_element_mut(element: &mut Tree) -> Option<&mut Self> {
        Some(element)
    }
}

impl From<Tree> for Value {
    fn from(v: Tree) -> Value {
        Value::Tree(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_string())
    }
}

impl From<SchemaValue> for Value {
    fn from(v: SchemaValue) -> Value {
        Value::Schema(Box::new(v))
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Value {
        Value::VecStr(v.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn literal_round_trip() {
        for tag in 0.. {
            let Some(t) = TypeTag::from_wire(tag) else {
                break;
            };
            assert_eq!(TypeTag::from_literal(t.literal()), Some(t));
            assert_eq!(t as u32, tag);
        }
        assert_eq!(TypeTag::from_literal("VECTOR_TREE"), Some(TypeTag::VectorTree));
        assert_eq!(TypeTag::from_literal("vector_tree"), None);
    }

    #[test]
    fn element_tags_pair_up() {
        for tag in 0.. {
            let Some(t) = TypeTag::from_wire(tag) else {
                break;
            };
            if let Some(elem) = t.element() {
                assert_eq!(elem.sequence_of(), Some(t));
            }
        }
    }

    #[test]
    fn wrap_and_tag_agree() {
        assert_eq!(Value::from(true).tag(), TypeTag::Bool);
        assert_eq!(Value::from(1u16).tag(), TypeTag::UInt16);
        assert_eq!(Value::from("x").tag(), TypeTag::String);
        assert_eq!(Value::from(vec![1i64]).tag(), TypeTag::VectorInt64);
        assert_eq!(Value::from(C64::new(1.0, -1.0)).tag(), TypeTag::ComplexDouble);
        assert_eq!(Value::None.tag(), TypeTag::None);
    }
}
