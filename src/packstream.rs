//! PackStream: Bolt's self-describing value encoding.
//!
//! A single closed sum type (`Value`) covers nil, bool, integers, doubles,
//! strings, lists, maps and structures; the encoder always picks the
//! narrowest marker that fits, the decoder accepts any valid encoding.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{BoltError, Result};

// Markers.
const NULL: u8 = 0xC0;
const FALSE: u8 = 0xC2;
const TRUE: u8 = 0xC3;
const FLOAT64: u8 = 0xC1;
const INT8: u8 = 0xC8;
const INT16: u8 = 0xC9;
const INT32: u8 = 0xCA;
const INT64: u8 = 0xCB;

const TINY_STRING: u8 = 0x80;
const STRING8: u8 = 0xD0;
const STRING16: u8 = 0xD1;
const STRING32: u8 = 0xD2;

const TINY_LIST: u8 = 0x90;
const LIST8: u8 = 0xD4;
const LIST16: u8 = 0xD5;
const LIST32: u8 = 0xD6;

const TINY_MAP: u8 = 0xA0;
const MAP8: u8 = 0xD8;
const MAP16: u8 = 0xD9;
const MAP32: u8 = 0xDA;

const TINY_STRUCT: u8 = 0xB0;
const STRUCT8: u8 = 0xDC;
const STRUCT16: u8 = 0xDD;

/// One-byte discriminators for the structures this protocol version knows
/// about, spanning both domain entities (`Node`, ...) and wire messages
/// (`Run`, ...): both kinds share the same marker+signature mechanism and
/// are told apart only by this byte.
#[derive(IntoPrimitive, TryFromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum StructSig {
    /// `Node(id, labels, properties)`
    Node = 0x4E,
    /// `Relationship(id, startId, endId, type, properties)`
    Relationship = 0x52,
    /// `Path(nodes, relationships, sequence)`
    Path = 0x50,
    /// `UnboundRelationship(id, type, properties)`
    UnboundRelationship = 0x72,
    /// `Init(clientName, authToken)`
    Init = 0x01,
    /// `Run(statement, parameters)`
    Run = 0x10,
    /// `DiscardAll()`
    DiscardAll = 0x2F,
    /// `PullAll()`
    PullAll = 0x3F,
    /// `AckFailure()`
    AckFailure = 0x0E,
    /// `Reset()`
    Reset = 0x0F,
    /// `Record(fields)`
    Record = 0x71,
    /// `Success(meta)`
    Success = 0x70,
    /// `Ignored()`
    Ignored = 0x7E,
    /// `Failure(meta)`
    Failure = 0x7F,
}

/// A tagged structure: a known signature plus its ordered field values.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    /// Which structure this is.
    pub signature: StructSig,
    /// Ordered field values, per the signature's fixed field sequence.
    pub fields: Vec<Value>,
}

impl Structure {
    /// Build a structure, checked only by signature; field arity is the
    /// caller's responsibility (enforced by `message.rs`/`graph.rs`).
    pub fn new(signature: StructSig, fields: Vec<Value>) -> Self {
        Structure { signature, fields }
    }
}

/// The closed set of PackStream value kinds.
///
/// Maps are represented as an ordered `Vec<(String, Value)>` rather than a
/// `HashMap`: the wire treats key order as insignificant, but keeping encode
/// output deterministic makes round-trip tests simple to write.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The PackStream nil value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed 64-bit integer; the encoder narrows it to the smallest marker.
    Int(i64),
    /// An IEEE-754 binary64 float.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A string-keyed map; key order is preserved but not protocol-significant.
    Map(Vec<(String, Value)>),
    /// A signed structure (domain entity or protocol message).
    Structure(Structure),
}

impl Value {
    /// Shorthand for `Value::String(s.into())`.
    pub fn string<S: Into<String>>(s: S) -> Self {
        Value::String(s.into())
    }

    /// Look up a key in a `Map` value; `None` if this isn't a map or the key
    /// is absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// View this value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// View this value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// View this value as a list, if it is one.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Encode `value` onto `out`, choosing the narrowest marker at every level.
pub fn encode<W: Write>(out: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.write_u8(NULL).map_err(BoltError::from),
        Value::Bool(false) => out.write_u8(FALSE).map_err(BoltError::from),
        Value::Bool(true) => out.write_u8(TRUE).map_err(BoltError::from),
        Value::Int(n) => encode_int(out, *n),
        Value::Float(f) => {
            out.write_u8(FLOAT64)?;
            out.write_f64::<BE>(*f).map_err(BoltError::from)
        }
        Value::String(s) => encode_string(out, s),
        Value::List(items) => encode_list(out, items),
        Value::Map(entries) => encode_map(out, entries),
        Value::Structure(s) => encode_structure(out, s),
    }
}

/// Encode a value to a fresh byte vector.
pub fn encode_to_vec(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode(&mut buf, value)?;
    Ok(buf)
}

fn encode_int<W: Write>(out: &mut W, n: i64) -> Result<()> {
    if (-16..=127).contains(&n) {
        out.write_i8(n as i8)?;
    } else if (-128..=-17).contains(&n) {
        out.write_u8(INT8)?;
        out.write_i8(n as i8)?;
    } else if (-32768..=32767).contains(&n) {
        out.write_u8(INT16)?;
        out.write_i16::<BE>(n as i16)?;
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&n) {
        out.write_u8(INT32)?;
        out.write_i32::<BE>(n as i32)?;
    } else {
        out.write_u8(INT64)?;
        out.write_i64::<BE>(n)?;
    }
    Ok(())
}

fn encode_string<W: Write>(out: &mut W, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    let len = bytes.len();
    if len <= 15 {
        out.write_u8(TINY_STRING | len as u8)?;
    } else if len <= 0xFF {
        out.write_u8(STRING8)?;
        out.write_u8(len as u8)?;
    } else if len <= 0xFFFF {
        out.write_u8(STRING16)?;
        out.write_u16::<BE>(len as u16)?;
    } else if len as u64 <= 0xFFFF_FFFF {
        out.write_u8(STRING32)?;
        out.write_u32::<BE>(len as u32)?;
    } else {
        return Err(BoltError::protocol("value too large: string"));
    }
    out.write_all(bytes)?;
    Ok(())
}

fn encode_list<W: Write>(out: &mut W, items: &[Value]) -> Result<()> {
    let len = items.len();
    if len <= 15 {
        out.write_u8(TINY_LIST | len as u8)?;
    } else if len <= 0xFF {
        out.write_u8(LIST8)?;
        out.write_u8(len as u8)?;
    } else if len <= 0xFFFF {
        out.write_u8(LIST16)?;
        out.write_u16::<BE>(len as u16)?;
    } else if len as u64 <= 0xFFFF_FFFF {
        out.write_u8(LIST32)?;
        out.write_u32::<BE>(len as u32)?;
    } else {
        return Err(BoltError::protocol("value too large: list"));
    }
    for item in items {
        encode(out, item)?;
    }
    Ok(())
}

fn encode_map<W: Write>(out: &mut W, entries: &[(String, Value)]) -> Result<()> {
    let len = entries.len();
    if len <= 15 {
        out.write_u8(TINY_MAP | len as u8)?;
    } else if len <= 0xFF {
        out.write_u8(MAP8)?;
        out.write_u8(len as u8)?;
    } else if len <= 0xFFFF {
        out.write_u8(MAP16)?;
        out.write_u16::<BE>(len as u16)?;
    } else if len as u64 <= 0xFFFF_FFFF {
        out.write_u8(MAP32)?;
        out.write_u32::<BE>(len as u32)?;
    } else {
        return Err(BoltError::protocol("value too large: map"));
    }
    for (key, value) in entries {
        encode_string(out, key)?;
        encode(out, value)?;
    }
    Ok(())
}

fn encode_structure<W: Write>(out: &mut W, s: &Structure) -> Result<()> {
    let len = s.fields.len();
    if len <= 15 {
        out.write_u8(TINY_STRUCT | len as u8)?;
    } else if len <= 0xFF {
        out.write_u8(STRUCT8)?;
        out.write_u8(len as u8)?;
    } else if len <= 0xFFFF {
        out.write_u8(STRUCT16)?;
        out.write_u16::<BE>(len as u16)?;
    } else {
        return Err(BoltError::protocol("value too large: structure field count"));
    }
    out.write_u8(s.signature.into())?;
    for field in &s.fields {
        encode(out, field)?;
    }
    Ok(())
}

/// Decode one value from `input`. Accepts any valid marker, even ones the
/// encoder in this crate would never emit for a given value: the decoder
/// accepts any valid encoding, not just the ones this encoder produces.
pub fn decode<R: Read>(input: &mut R) -> Result<Value> {
    let marker = input.read_u8()?;
    decode_with_marker(input, marker)
}

fn decode_with_marker<R: Read>(input: &mut R, marker: u8) -> Result<Value> {
    match marker {
        NULL => Ok(Value::Null),
        FALSE => Ok(Value::Bool(false)),
        TRUE => Ok(Value::Bool(true)),
        FLOAT64 => Ok(Value::Float(input.read_f64::<BE>()?)),
        INT8 => Ok(Value::Int(input.read_i8()? as i64)),
        INT16 => Ok(Value::Int(input.read_i16::<BE>()? as i64)),
        INT32 => Ok(Value::Int(input.read_i32::<BE>()? as i64)),
        INT64 => Ok(Value::Int(input.read_i64::<BE>()?)),
        // tiny int: 0x00..0x7F is a plain positive byte, 0xF0..0xFF is
        // -16..-1 as a signed byte.
        0x00..=0x7F => Ok(Value::Int(marker as i64)),
        0xF0..=0xFF => Ok(Value::Int((marker as i8) as i64)),
        _ if marker & 0xF0 == TINY_STRING => decode_string(input, (marker & 0x0F) as u64),
        STRING8 => {
            let len = input.read_u8()? as u64;
            decode_string(input, len)
        }
        STRING16 => {
            let len = input.read_u16::<BE>()? as u64;
            decode_string(input, len)
        }
        STRING32 => {
            let len = input.read_u32::<BE>()? as u64;
            decode_string(input, len)
        }
        _ if marker & 0xF0 == TINY_LIST => decode_list(input, (marker & 0x0F) as u64),
        LIST8 => {
            let len = input.read_u8()? as u64;
            decode_list(input, len)
        }
        LIST16 => {
            let len = input.read_u16::<BE>()? as u64;
            decode_list(input, len)
        }
        LIST32 => {
            let len = input.read_u32::<BE>()? as u64;
            decode_list(input, len)
        }
        _ if marker & 0xF0 == TINY_MAP => decode_map(input, (marker & 0x0F) as u64),
        MAP8 => {
            let len = input.read_u8()? as u64;
            decode_map(input, len)
        }
        MAP16 => {
            let len = input.read_u16::<BE>()? as u64;
            decode_map(input, len)
        }
        MAP32 => {
            let len = input.read_u32::<BE>()? as u64;
            decode_map(input, len)
        }
        _ if marker & 0xF0 == TINY_STRUCT => decode_structure(input, (marker & 0x0F) as u64),
        STRUCT8 => {
            let len = input.read_u8()? as u64;
            decode_structure(input, len)
        }
        STRUCT16 => {
            let len = input.read_u16::<BE>()? as u64;
            decode_structure(input, len)
        }
        other => Err(BoltError::protocol(format!("unknown marker 0x{other:02X}"))),
    }
}

fn decode_string<R: Read>(input: &mut R, len: u64) -> Result<Value> {
    let mut buf = vec![0u8; len as usize];
    input.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map(Value::String)
        .map_err(|e| BoltError::protocol(format!("invalid utf-8 in string: {e}")))
}

fn decode_list<R: Read>(input: &mut R, len: u64) -> Result<Value> {
    let mut items = Vec::with_capacity(len.min(4096) as usize);
    for _ in 0..len {
        items.push(decode(input)?);
    }
    Ok(Value::List(items))
}

fn decode_map<R: Read>(input: &mut R, len: u64) -> Result<Value> {
    let mut entries = Vec::with_capacity(len.min(4096) as usize);
    for _ in 0..len {
        let key = match decode(input)? {
            Value::String(s) => s,
            other => {
                return Err(BoltError::protocol(format!(
                    "map key must be a string, got {other:?}"
                )))
            }
        };
        let value = decode(input)?;
        entries.push((key, value));
    }
    Ok(Value::Map(entries))
}

fn decode_structure<R: Read>(input: &mut R, field_count: u64) -> Result<Value> {
    let sig_byte = input.read_u8()?;
    let signature = StructSig::try_from(sig_byte)
        .map_err(|_| BoltError::protocol(format!("unknown structure signature 0x{sig_byte:02X}")))?;
    let mut fields = Vec::with_capacity(field_count.min(4096) as usize);
    for _ in 0..field_count {
        fields.push(decode(input)?);
    }
    Ok(Value::Structure(Structure { signature, fields }))
}

/// Read errors specific to truncated PackStream input surface as
/// `io::ErrorKind::UnexpectedEof`, which `BoltError::from(io::Error)` already
/// covers; this helper exists so callers can match on it without digging
/// into `io::Error` themselves.
pub fn is_truncated(err: &BoltError) -> bool {
    matches!(err, BoltError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let bytes = encode_to_vec(&v).unwrap();
        let mut cursor = io::Cursor::new(bytes);
        let decoded = decode(&mut cursor).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn roundtrips_nil_and_bools() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
    }

    #[test]
    fn roundtrips_floats() {
        roundtrip(Value::Float(3.14159));
        roundtrip(Value::Float(-0.0));
    }

    #[test]
    fn roundtrips_strings_lists_maps() {
        roundtrip(Value::string("hello"));
        roundtrip(Value::string(""));
        roundtrip(Value::string("x".repeat(200)));
        roundtrip(Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
        roundtrip(Value::Map(vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::string("two")),
        ]));
    }

    #[test]
    fn roundtrips_structures() {
        let s = Structure::new(StructSig::Success, vec![Value::Map(vec![])]);
        roundtrip(Value::Structure(s));
    }

    #[test]
    fn tiny_int_boundaries() {
        assert_eq!(encode_to_vec(&Value::Int(1)).unwrap(), vec![0x01]);
        assert_eq!(encode_to_vec(&Value::Int(-1)).unwrap(), vec![0xFF]);
        assert_eq!(encode_to_vec(&Value::Int(-16)).unwrap(), vec![0xF0]);
        assert_eq!(encode_to_vec(&Value::Int(127)).unwrap(), vec![0x7F]);
    }

    #[test]
    fn int8_boundaries() {
        assert_eq!(encode_to_vec(&Value::Int(-17)).unwrap(), vec![0xC8, 0xEF]);
        assert_eq!(encode_to_vec(&Value::Int(-128)).unwrap(), vec![0xC8, 0x80]);
    }

    #[test]
    fn int16_boundaries() {
        assert_eq!(encode_to_vec(&Value::Int(128)).unwrap()[0], INT16);
        assert_eq!(encode_to_vec(&Value::Int(32767)).unwrap()[0], INT16);
        assert_eq!(encode_to_vec(&Value::Int(-129)).unwrap()[0], INT16);
        assert_eq!(encode_to_vec(&Value::Int(-32768)).unwrap()[0], INT16);
    }

    #[test]
    fn int32_boundaries() {
        assert_eq!(encode_to_vec(&Value::Int(32768)).unwrap()[0], INT32);
        assert_eq!(encode_to_vec(&Value::Int(i32::MAX as i64)).unwrap()[0], INT32);
        assert_eq!(encode_to_vec(&Value::Int(i32::MIN as i64)).unwrap()[0], INT32);
    }

    #[test]
    fn int64_boundaries() {
        assert_eq!(
            encode_to_vec(&Value::Int(i32::MAX as i64 + 1)).unwrap()[0],
            INT64
        );
        assert_eq!(encode_to_vec(&Value::Int(i64::MIN)).unwrap()[0], INT64);
        assert_eq!(encode_to_vec(&Value::Int(i64::MAX)).unwrap()[0], INT64);
    }

    #[test]
    fn rejects_unknown_marker() {
        let mut cursor = io::Cursor::new(vec![0xC7]);
        let err = decode(&mut cursor).unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[test]
    fn rejects_non_string_map_key() {
        // tiny map with 1 entry whose key is boolean true instead of a string
        let mut cursor = io::Cursor::new(vec![0xA1, TRUE, 0x01]);
        let err = decode(&mut cursor).unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[test]
    fn rejects_unknown_struct_signature() {
        // tiny struct, 0 fields, signature byte 0xAA is unknown
        let mut cursor = io::Cursor::new(vec![0xB0, 0xAA]);
        let err = decode(&mut cursor).unwrap_err();
        assert!(matches!(err, BoltError::Protocol(_)));
    }

    #[test]
    fn truncated_input_is_an_io_error() {
        // string8 marker claiming 5 bytes but only 2 are present
        let mut cursor = io::Cursor::new(vec![STRING8, 0x05, b'h', b'i']);
        let err = decode(&mut cursor).unwrap_err();
        assert!(is_truncated(&err));
    }
}
