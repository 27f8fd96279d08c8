//! The conversion matrix behind `get_as`: a total function over
//! `(source tag, target tag)` pairs that either produces a value of the
//! target variant or fails with `CastFailed`.

use crate::value::{TypeTag, Value, C32, C64};
use crate::{Error, Result};

/// Cast `value` to the `target` variant.
///
/// Arithmetic pairs convert totally: narrower integer targets wrap, float
/// targets round, integer targets from floats truncate toward zero with
/// saturation at the bounds. Strings parse the canonical textual form of the
/// target. Sequences convert element-wise; a one-element sequence converts to
/// its element's scalar. `None` converts to nothing.
pub fn cast_value(value: &Value, target: TypeTag) -> Result<Value> {
    let source = value.tag();
    if source == target {
        return Ok(value.clone());
    }

    // String source: parse the canonical form of the target.
    if let Value::Str(s) = value {
        return from_text(s, target)
            .ok_or_else(|| Error::cast(source, target, format!("cannot parse '{s}'")));
    }

    // String target: render the canonical form of the source.
    if target == TypeTag::String {
        return render(value)
            .map(Value::Str)
            .ok_or_else(|| Error::cast(source, target, "no textual form"));
    }

    // Byte arrays interchange with u8 sequences.
    match (value, target) {
        (Value::ByteArray(b), TypeTag::VectorUInt8) => return Ok(Value::VecUInt8(b.to_vec())),
        (Value::VecUInt8(v), TypeTag::ByteArray) => {
            return Ok(Value::ByteArray(bytes::Bytes::from(v.clone())))
        }
        _ => {}
    }

    // Shared trees interchange with owned ones.
    match (value, target) {
        (Value::Tree(t), TypeTag::TreePointer) => {
            return Ok(Value::SharedTree(std::sync::Arc::new(t.clone())))
        }
        (Value::SharedTree(t), TypeTag::Tree) => return Ok(Value::Tree((**t).clone())),
        (Value::VecTree(v), TypeTag::VectorTreePointer) => {
            return Ok(Value::VecSharedTree(
                v.iter().cloned().map(std::sync::Arc::new).collect(),
            ))
        }
        (Value::VecSharedTree(v), TypeTag::VectorTree) => {
            return Ok(Value::VecTree(v.iter().map(|t| (**t).clone()).collect()))
        }
        _ => {}
    }

    // Scalar source.
    if let Some(num) = num_of(value) {
        if let Some(cast) = num_into(num, target) {
            return Ok(cast);
        }
        if let Some(elem) = target.element() {
            // Scalar to sequence: a one-element sequence.
            let one = cast_value(value, elem)?;
            return seq_of(elem, vec![one])
                .ok_or_else(|| Error::cast(source, target, "unsupported element"));
        }
        return Err(Error::cast(source, target, "no conversion defined"));
    }
    if let Value::ComplexFloat(c) = value {
        if target == TypeTag::ComplexDouble {
            return Ok(Value::ComplexDouble(C64::new(c.re as f64, c.im as f64)));
        }
    }
    if let Value::ComplexDouble(c) = value {
        if target == TypeTag::ComplexFloat {
            return Ok(Value::ComplexFloat(C32::new(c.re as f32, c.im as f32)));
        }
    }

    // Sequence source.
    if let Some(elements) = seq_elements(value) {
        if let Some(elem) = target.element() {
            let cast = elements
                .iter()
                .map(|e| cast_value(e, elem))
                .collect::<Result<Vec<_>>>()?;
            return seq_of(elem, cast)
                .ok_or_else(|| Error::cast(source, target, "unsupported element"));
        }
        // One-element sequence to scalar.
        if elements.len() == 1 {
            return cast_value(&elements[0], target);
        }
        return Err(Error::cast(
            source,
            target,
            format!("sequence of length {} is not a scalar", elements.len()),
        ));
    }

    Err(Error::cast(source, target, "no conversion defined"))
}

/// The canonical textual form: what `get_as::<String>` yields and what the
/// string parser accepts back. Scalar sequences are comma-separated without
/// spaces; a byte array is a comma-separated list of integer codepoints.
fn render(value: &Value) -> Option<String> {
    Some(match value {
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int8(v) => v.to_string(),
        Value::UInt8(v) => v.to_string(),
        Value::Int16(v) => v.to_string(),
        Value::UInt16(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::UInt32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::UInt64(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::ComplexFloat(c) => c.to_string(),
        Value::ComplexDouble(c) => c.to_string(),
        Value::Str(s) => s.clone(),
        Value::ByteArray(b) => itertools::Itertools::join(&mut b.iter(), ","),
        seq => {
            let elements = seq_elements(seq)?;
            let mut parts = Vec::with_capacity(elements.len());
            for e in &elements {
                parts.push(render(e)?);
            }
            parts.join(",")
        }
    })
}

/// Text shown for a value in displays and diagnostics. Unlike `render` this
/// is total: byte arrays use base64 and composites show a summary.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::ByteArray(b) => base64::encode(b),
        Value::Tree(t) => format!("TREE[{}]", t.len()),
        Value::SharedTree(t) => format!("TREE[{}]", t.len()),
        Value::VecTree(v) => format!("VECTOR_TREE[{}]", v.len()),
        Value::VecSharedTree(v) => format!("VECTOR_TREE[{}]", v.len()),
        Value::Schema(s) => format!("SCHEMA[{}]", s.name),
        Value::None => String::new(),
        other => render(other).unwrap_or_default(),
    }
}

/// Unified arithmetic carrier for the scalar matrix.
#[derive(Clone, Copy)]
enum Num {
    I(i128),
    F(f64),
}

fn num_of(value: &Value) -> Option<Num> {
    Some(match value {
        Value::Bool(b) => Num::I(*b as i128),
        Value::Int8(v) => Num::I(*v as i128),
        Value::UInt8(v) => Num::I(*v as i128),
        Value::Int16(v) => Num::I(*v as i128),
        Value::UInt16(v) => Num::I(*v as i128),
        Value::Int32(v) => Num::I(*v as i128),
        Value::UInt32(v) => Num::I(*v as i128),
        Value::Int64(v) => Num::I(*v as i128),
        Value::UInt64(v) => Num::I(*v as i128),
        Value::Float(v) => Num::F(*v as f64),
        Value::Double(v) => Num::F(*v),
        _ => return None,
    })
}

fn num_into(num: Num, target: TypeTag) -> Option<Value> {
    macro_rules! int {
        ($ty:ty, $var:ident) => {
            Some(match num {
                Num::I(i) => Value::$var(i as $ty),
                Num::F(f) => Value::$var(f as $ty),
            })
        };
    }
    match target {
        TypeTag::Bool => Some(Value::Bool(match num {
            Num::I(i) => i != 0,
            Num::F(f) => f != 0.0,
        })),
        TypeTag::Int8 => int!(i8, Int8),
        TypeTag::UInt8 => int!(u8, UInt8),
        TypeTag::Int16 => int!(i16, Int16),
        TypeTag::UInt16 => int!(u16, UInt16),
        TypeTag::Int32 => int!(i32, Int32),
        TypeTag::UInt32 => int!(u32, UInt32),
        TypeTag::Int64 => int!(i64, Int64),
        TypeTag::UInt64 => int!(u64, UInt64),
        TypeTag::Float => Some(Value::Float(match num {
            Num::I(i) => i as f32,
            Num::F(f) => f as f32,
        })),
        TypeTag::Double => Some(Value::Double(match num {
            Num::I(i) => i as f64,
            Num::F(f) => f,
        })),
        TypeTag::ComplexFloat => Some(Value::ComplexFloat(match num {
            Num::I(i) => C32::new(i as f32, 0.0),
            Num::F(f) => C32::new(f as f32, 0.0),
        })),
        TypeTag::ComplexDouble => Some(Value::ComplexDouble(match num {
            Num::I(i) => C64::new(i as f64, 0.0),
            Num::F(f) => C64::new(f, 0.0),
        })),
        _ => None,
    }
}

/// Copy a sequence out as scalar element values.
fn seq_elements(value: &Value) -> Option<Vec<Value>> {
    Some(match value {
        Value::VecBool(v) => v.iter().map(|e| Value::Bool(*e)).collect(),
        Value::VecInt8(v) => v.iter().map(|e| Value::Int8(*e)).collect(),
        Value::VecUInt8(v) => v.iter().map(|e| Value::UInt8(*e)).collect(),
        Value::VecInt16(v) => v.iter().map(|e| Value::Int16(*e)).collect(),
        Value::VecUInt16(v) => v.iter().map(|e| Value::UInt16(*e)).collect(),
        Value::VecInt32(v) => v.iter().map(|e| Value::Int32(*e)).collect(),
        Value::VecUInt32(v) => v.iter().map(|e| Value::UInt32(*e)).collect(),
        Value::VecInt64(v) => v.iter().map(|e| Value::Int64(*e)).collect(),
        Value::VecUInt64(v) => v.iter().map(|e| Value::UInt64(*e)).collect(),
        Value::VecFloat(v) => v.iter().map(|e| Value::Float(*e)).collect(),
        Value::VecDouble(v) => v.iter().map(|e| Value::Double(*e)).collect(),
        Value::VecComplexFloat(v) => v.iter().map(|e| Value::ComplexFloat(*e)).collect(),
        Value::VecComplexDouble(v) => v.iter().map(|e| Value::ComplexDouble(*e)).collect(),
        Value::VecStr(v) => v.iter().map(|e| Value::Str(e.clone())).collect(),
        _ => return None,
    })
}

/// Assemble a sequence value of element tag `elem` from scalar values which
/// are already of that variant.
fn seq_of(elem: TypeTag, elements: Vec<Value>) -> Option<Value> {
    macro_rules! gather {
        ($scalar:ident, $var:ident) => {
            Some(Value::$var(
                elements
                    .into_iter()
                    .map(|e| match e {
                        Value::$scalar(v) => v,
                        _ => unreachable!("elements were cast to the element tag"),
                    })
                    .collect(),
            ))
        };
    }
    match elem {
        TypeTag::Bool => gather!(Bool, VecBool),
        TypeTag::Int8 => gather!(Int8, VecInt8),
        TypeTag::UInt8 => gather!(UInt8, VecUInt8),
        TypeTag::Int16 => gather!(Int16, VecInt16),
        TypeTag::UInt16 => gather!(UInt16, VecUInt16),
        TypeTag::Int32 => gather!(Int32, VecInt32),
        TypeTag::UInt32 => gather!(UInt32, VecUInt32),
        TypeTag::Int64 => gather!(Int64, VecInt64),
        TypeTag::UInt64 => gather!(UInt64, VecUInt64),
        TypeTag::Float => gather!(Float, VecFloat),
        TypeTag::Double => gather!(Double, VecDouble),
        TypeTag::ComplexFloat => gather!(ComplexFloat, VecComplexFloat),
        TypeTag::ComplexDouble => gather!(ComplexDouble, VecComplexDouble),
        TypeTag::String => gather!(Str, VecStr),
        _ => None,
    }
}

/// Parse the canonical textual form of `target` from `s`. A non-empty string
/// converting to a sequence splits on `,` with interior whitespace trimmed;
/// an empty string is an empty sequence, never one empty element.
fn from_text(s: &str, target: TypeTag) -> Option<Value> {
    if let Some(elem) = target.element() {
        if s.is_empty() {
            return seq_of(elem, Vec::new());
        }
        let parts = s
            .split(',')
            .map(|p| scalar_from_text(p.trim(), elem))
            .collect::<Option<Vec<_>>>()?;
        return seq_of(elem, parts);
    }
    if target == TypeTag::ByteArray {
        if s.is_empty() {
            return Some(Value::ByteArray(bytes::Bytes::new()));
        }
        let bytes = s
            .split(',')
            .map(|p| p.trim().parse::<u8>().ok())
            .collect::<Option<Vec<u8>>>()?;
        return Some(Value::ByteArray(bytes::Bytes::from(bytes)));
    }
    scalar_from_text(s.trim(), target)
}

fn scalar_from_text(s: &str, target: TypeTag) -> Option<Value> {
    macro_rules! parse {
        ($ty:ty, $var:ident) => {
            s.parse::<$ty>().ok().map(Value::$var)
        };
    }
    match target {
        TypeTag::Bool => match s.to_ascii_lowercase().as_str() {
            "1" | "true" | "y" | "yes" => Some(Value::Bool(true)),
            "0" | "false" | "n" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        TypeTag::Int8 => parse!(i8, Int8),
        TypeTag::UInt8 => parse!(u8, UInt8),
        TypeTag::Int16 => parse!(i16, Int16),
        TypeTag::UInt16 => parse!(u16, UInt16),
        TypeTag::Int32 => parse!(i32, Int32),
        TypeTag::UInt32 => parse!(u32, UInt32),
        TypeTag::Int64 => parse!(i64, Int64),
        TypeTag::UInt64 => parse!(u64, UInt64),
        TypeTag::Float => parse!(f32, Float),
        TypeTag::Double => parse!(f64, Double),
        TypeTag::ComplexFloat => parse_complex(s).map(|(re, im)| {
            Value::ComplexFloat(C32::new(re as f32, im as f32))
        }),
        TypeTag::ComplexDouble => {
            parse_complex(s).map(|(re, im)| Value::ComplexDouble(C64::new(re, im)))
        }
        TypeTag::String => Some(Value::Str(s.to_string())),
        _ => None,
    }
}

/// Complex scalars render and parse as `(re,im)`.
fn parse_complex(s: &str) -> Option<(f64, f64)> {
    let inner = s.strip_prefix('(')?.strip_suffix(')')?;
    let (re, im) = inner.split_once(',')?;
    Some((re.trim().parse().ok()?, im.trim().parse().ok()?))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic_pairs_are_total() {
        let v = Value::Int32(300);
        // Narrower integer targets wrap.
        assert_eq!(cast_value(&v, TypeTag::UInt8).unwrap(), Value::UInt8(44));
        assert_eq!(cast_value(&v, TypeTag::Int64).unwrap(), Value::Int64(300));
        assert_eq!(
            cast_value(&Value::Double(2.9), TypeTag::Int32).unwrap(),
            Value::Int32(2)
        );
        assert_eq!(
            cast_value(&Value::Bool(true), TypeTag::UInt64).unwrap(),
            Value::UInt64(1)
        );
    }

    #[test]
    fn string_round_trips() {
        assert_eq!(
            cast_value(&Value::from("42"), TypeTag::Int16).unwrap(),
            Value::Int16(42)
        );
        assert_eq!(
            cast_value(&Value::Int16(42), TypeTag::String).unwrap(),
            Value::from("42")
        );
        assert_eq!(
            cast_value(&Value::Bool(true), TypeTag::String).unwrap(),
            Value::from("1")
        );
        assert_eq!(
            cast_value(&Value::from("TRUE"), TypeTag::Bool).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn sequences_split_and_join_on_comma() {
        assert_eq!(
            cast_value(&Value::from("1, 2,3"), TypeTag::VectorInt32).unwrap(),
            Value::VecInt32(vec![1, 2, 3])
        );
        assert_eq!(
            cast_value(&Value::VecInt32(vec![1, 2, 3]), TypeTag::String).unwrap(),
            Value::from("1,2,3")
        );
        // Empty string is an empty sequence, not one empty element.
        assert_eq!(
            cast_value(&Value::from(""), TypeTag::VectorString).unwrap(),
            Value::VecStr(vec![])
        );
    }

    #[test]
    fn byte_arrays_render_codepoints() {
        let b = Value::ByteArray(bytes::Bytes::from_static(&[1, 2, 255]));
        assert_eq!(
            cast_value(&b, TypeTag::String).unwrap(),
            Value::from("1,2,255")
        );
        assert_eq!(
            cast_value(&Value::from("1,2,255"), TypeTag::ByteArray).unwrap(),
            b
        );
        // The display form is base64 instead.
        assert_eq!(to_text(&b), base64::encode([1u8, 2, 255]));
    }

    #[test]
    fn one_element_sequences_convert_to_scalars() {
        assert_eq!(
            cast_value(&Value::VecDouble(vec![2.5]), TypeTag::Double).unwrap(),
            Value::Double(2.5)
        );
        assert!(cast_value(&Value::VecDouble(vec![1.0, 2.0]), TypeTag::Double).is_err());
    }

    #[test]
    fn none_converts_to_nothing() {
        assert!(cast_value(&Value::None, TypeTag::Int32).is_err());
        assert!(cast_value(&Value::Int32(1), TypeTag::None).is_err());
        assert_eq!(cast_value(&Value::None, TypeTag::None).unwrap(), Value::None);
    }

    #[test]
    fn complex_parses_pair_form() {
        assert_eq!(
            cast_value(&Value::from("(1.5,-2)"), TypeTag::ComplexDouble).unwrap(),
            Value::ComplexDouble(C64::new(1.5, -2.0))
        );
        assert_eq!(
            cast_value(&Value::ComplexDouble(C64::new(1.5, -2.0)), TypeTag::String).unwrap(),
            Value::from("(1.5,-2)")
        );
    }
}
