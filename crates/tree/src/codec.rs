//! Binary wire form of a tree.
//!
//! Little-endian, insertion order. Per node: key length (u16), key bytes,
//! type tag (u32), attribute count (u32), each attribute analogously, then
//! the value. Sequences and strings prepend their element count (u32). A
//! whole tree is its node count (u32) followed by its nodes; there is no
//! outer framing beyond what the transport provides.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::tree::{Attributes, Tree};
use crate::value::{SchemaValue, TypeTag, Value, C32, C64};
use crate::{Error, Result};

pub fn encode(tree: &Tree) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_into(tree, &mut buf)?;
    Ok(buf.freeze())
}

pub fn encode_into(tree: &Tree, buf: &mut BytesMut) -> Result<()> {
    buf.put_u32_le(tree.len() as u32);
    for (key, node) in tree.iter() {
        put_key(buf, key)?;
        buf.put_u32_le(node.tag() as u32);
        buf.put_u32_le(node.attributes().len() as u32);
        for (akey, avalue) in node.attributes().iter() {
            put_key(buf, akey)?;
            buf.put_u32_le(avalue.tag() as u32);
            put_value(buf, avalue)?;
        }
        put_value(buf, node.value())?;
    }
    Ok(())
}

pub fn decode(data: &[u8]) -> Result<Tree> {
    let mut reader = Reader { data };
    let tree = read_tree(&mut reader)?;
    if !reader.data.is_empty() {
        return Err(Error::Codec(format!(
            "{} trailing bytes after tree",
            reader.data.len()
        )));
    }
    Ok(tree)
}

fn put_key(buf: &mut BytesMut, key: &str) -> Result<()> {
    let len = u16::try_from(key.len())
        .map_err(|_| Error::Codec(format!("key of {} bytes exceeds the wire limit", key.len())))?;
    buf.put_u16_le(len);
    buf.put_slice(key.as_bytes());
    Ok(())
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_value(buf: &mut BytesMut, value: &Value) -> Result<()> {
    match value {
        Value::Bool(v) => buf.put_u8(*v as u8),
        Value::Int8(v) => buf.put_i8(*v),
        Value::UInt8(v) => buf.put_u8(*v),
        Value::Int16(v) => buf.put_i16_le(*v),
        Value::UInt16(v) => buf.put_u16_le(*v),
        Value::Int32(v) => buf.put_i32_le(*v),
        Value::UInt32(v) => buf.put_u32_le(*v),
        Value::Int64(v) => buf.put_i64_le(*v),
        Value::UInt64(v) => buf.put_u64_le(*v),
        Value::Float(v) => buf.put_f32_le(*v),
        Value::Double(v) => buf.put_f64_le(*v),
        Value::ComplexFloat(c) => {
            buf.put_f32_le(c.re);
            buf.put_f32_le(c.im);
        }
        Value::ComplexDouble(c) => {
            buf.put_f64_le(c.re);
            buf.put_f64_le(c.im);
        }
        Value::Str(s) => put_str(buf, s),
        Value::ByteArray(b) => {
            buf.put_u32_le(b.len() as u32);
            buf.put_slice(b);
        }
        Value::VecBool(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_u8(*e as u8);
            }
        }
        Value::VecInt8(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_i8(*e);
            }
        }
        Value::VecUInt8(v) => {
            buf.put_u32_le(v.len() as u32);
            buf.put_slice(v);
        }
        Value::VecInt16(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_i16_le(*e);
            }
        }
        Value::VecUInt16(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_u16_le(*e);
            }
        }
        Value::VecInt32(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_i32_le(*e);
            }
        }
        Value::VecUInt32(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_u32_le(*e);
            }
        }
        Value::VecInt64(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_i64_le(*e);
            }
        }
        Value::VecUInt64(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_u64_le(*e);
            }
        }
        Value::VecFloat(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_f32_le(*e);
            }
        }
        Value::VecDouble(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_f64_le(*e);
            }
        }
        Value::VecComplexFloat(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_f32_le(e.re);
                buf.put_f32_le(e.im);
            }
        }
        Value::VecComplexDouble(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                buf.put_f64_le(e.re);
                buf.put_f64_le(e.im);
            }
        }
        Value::VecStr(v) => {
            buf.put_u32_le(v.len() as u32);
            for e in v {
                put_str(buf, e);
            }
        }
        Value::Tree(t) => encode_into(t, buf)?,
        Value::SharedTree(t) => encode_into(t, buf)?,
        Value::VecTree(v) => {
            buf.put_u32_le(v.len() as u32);
            for t in v {
                encode_into(t, buf)?;
            }
        }
        Value::VecSharedTree(v) => {
            buf.put_u32_le(v.len() as u32);
            for t in v {
                encode_into(t, buf)?;
            }
        }
        Value::Schema(s) => {
            put_str(buf, &s.name);
            encode_into(&s.body, buf)?;
        }
        Value::None => {}
    }
    Ok(())
}

/// Checked reads over the raw input. Truncation is an error, never a panic.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(Error::Codec(format!(
                "truncated input: wanted {n} bytes, {} remain",
                self.data.len()
            )));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// An element count. Bounded by the remaining input so a hostile count
    /// cannot drive preallocation.
    fn count(&mut self) -> Result<usize> {
        let n = self.u32()? as usize;
        if n > self.data.len() {
            return Err(Error::Codec(format!(
                "element count {n} exceeds {} remaining bytes",
                self.data.len()
            )));
        }
        Ok(n)
    }

    fn string(&mut self) -> Result<String> {
        let n = self.count()?;
        let raw = self.take(n)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::Codec("string payload is not valid UTF-8".into()))
    }

    fn key(&mut self) -> Result<String> {
        let n = self.u16()? as usize;
        let raw = self.take(n)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::Codec("key is not valid UTF-8".into()))
    }
}

fn read_tree(reader: &mut Reader<'_>) -> Result<Tree> {
    let count = reader.count()?;
    let mut tree = Tree::new();
    for _ in 0..count {
        let key = reader.key()?;
        let tag = read_tag(reader)?;
        let attr_count = reader.count()?;
        let mut attributes = Attributes::new();
        for _ in 0..attr_count {
            let akey = reader.key()?;
            let atag = read_tag(reader)?;
            attributes.set(akey, read_value(reader, atag)?);
        }
        let value = read_value(reader, tag)?;
        let node = tree.insert(key, value);
        node.set_attributes(attributes);
    }
    Ok(tree)
}

fn read_tag(reader: &mut Reader<'_>) -> Result<TypeTag> {
    let raw = reader.u32()?;
    TypeTag::from_wire(raw).ok_or_else(|| Error::Codec(format!("unknown type tag {raw}")))
}

fn read_value(reader: &mut Reader<'_>, tag: TypeTag) -> Result<Value> {
    macro_rules! seq {
        ($var:ident, $read:ident) => {{
            let n = reader.count()?;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.$read()? as _);
            }
            Value::$var(v)
        }};
    }
    Ok(match tag {
        TypeTag::Bool => Value::Bool(reader.u8()? != 0),
        TypeTag::Int8 => Value::Int8(reader.u8()? as i8),
        TypeTag::UInt8 => Value::UInt8(reader.u8()?),
        TypeTag::Int16 => Value::Int16(reader.u16()? as i16),
        TypeTag::UInt16 => Value::UInt16(reader.u16()?),
        TypeTag::Int32 => Value::Int32(reader.u32()? as i32),
        TypeTag::UInt32 => Value::UInt32(reader.u32()?),
        TypeTag::Int64 => Value::Int64(reader.u64()? as i64),
        TypeTag::UInt64 => Value::UInt64(reader.u64()?),
        TypeTag::Float => Value::Float(reader.f32()?),
        TypeTag::Double => Value::Double(reader.f64()?),
        TypeTag::ComplexFloat => Value::ComplexFloat(C32::new(reader.f32()?, reader.f32()?)),
        TypeTag::ComplexDouble => Value::ComplexDouble(C64::new(reader.f64()?, reader.f64()?)),
        TypeTag::String => Value::Str(reader.string()?),
        TypeTag::ByteArray => {
            let n = reader.count()?;
            Value::ByteArray(Bytes::copy_from_slice(reader.take(n)?))
        }
        TypeTag::VectorBool => {
            let n = reader.count()?;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.u8()? != 0);
            }
            Value::VecBool(v)
        }
        TypeTag::VectorInt8 => seq!(VecInt8, u8),
        TypeTag::VectorUInt8 => {
            let n = reader.count()?;
            Value::VecUInt8(reader.take(n)?.to_vec())
        }
        TypeTag::VectorInt16 => seq!(VecInt16, u16),
        TypeTag::VectorUInt16 => seq!(VecUInt16, u16),
        TypeTag::VectorInt32 => seq!(VecInt32, u32),
        TypeTag::VectorUInt32 => seq!(VecUInt32, u32),
        TypeTag::VectorInt64 => seq!(VecInt64, u64),
        TypeTag::VectorUInt64 => seq!(VecUInt64, u64),
        TypeTag::VectorFloat => seq!(VecFloat, f32),
        TypeTag::VectorDouble => seq!(VecDouble, f64),
        TypeTag::VectorComplexFloat => {
            let n = reader.count()?;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(C32::new(reader.f32()?, reader.f32()?));
            }
            Value::VecComplexFloat(v)
        }
        TypeTag::VectorComplexDouble => {
            let n = reader.count()?;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(C64::new(reader.f64()?, reader.f64()?));
            }
            Value::VecComplexDouble(v)
        }
        TypeTag::VectorString => {
            let n = reader.count()?;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(reader.string()?);
            }
            Value::VecStr(v)
        }
        TypeTag::Tree => Value::Tree(read_tree(reader)?),
        TypeTag::TreePointer => Value::SharedTree(Arc::new(read_tree(reader)?)),
        TypeTag::VectorTree => {
            let n = reader.count()?;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(read_tree(reader)?);
            }
            Value::VecTree(v)
        }
        TypeTag::VectorTreePointer => {
            let n = reader.count()?;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Arc::new(read_tree(reader)?));
            }
            Value::VecSharedTree(v)
        }
        TypeTag::Schema => {
            let name = reader.string()?;
            let body = read_tree(reader)?;
            Value::Schema(Box::new(SchemaValue { name, body }))
        }
        TypeTag::None => Value::None,
    })
}
