//! `TypedValue`: a tagged union over the 12 primitive types the KVS layer
//! stores values as, plus the `to_display`/`parse_as` string codec pair.

use crate::error::Error;
use serde_derive::{Deserialize, Serialize};

/// Discriminant for a [`TypedValue`]. Numeric order is fixed (0..11) and is
/// part of the on-disk/on-wire contract: every backend's type-tag byte is
/// derived from `TypeTag as u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeTag {
    Int8 = 0,
    UInt8 = 1,
    Int16 = 2,
    UInt16 = 3,
    Int32 = 4,
    UInt32 = 5,
    Int64 = 6,
    UInt64 = 7,
    Bool = 8,
    Float32 = 9,
    Float64 = 10,
    String = 11,
}

impl TypeTag {
    pub const ALL: [TypeTag; 12] = [
        TypeTag::Int8,
        TypeTag::UInt8,
        TypeTag::Int16,
        TypeTag::UInt16,
        TypeTag::Int32,
        TypeTag::UInt32,
        TypeTag::Int64,
        TypeTag::UInt64,
        TypeTag::Bool,
        TypeTag::Float32,
        TypeTag::Float64,
        TypeTag::String,
    ];

    /// The single-character backend encoding used by the single-file and
    /// embedded-DB backends: `'a' + tag_index`.
    pub fn as_char(&self) -> char {
        (b'a' + (*self as u8)) as char
    }

    pub fn from_char(c: char) -> Option<TypeTag> {
        let idx = (c as u32).checked_sub('a' as u32)?;
        Self::ALL.get(idx as usize).copied()
    }

    pub fn from_index(idx: u8) -> Option<TypeTag> {
        Self::ALL.get(idx as usize).copied()
    }
}

/// A typed scalar or string value moved through KVS operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Bool(bool),
    Float32(f32),
    Float64(f64),
    String(String),
}

impl TypedValue {
    pub fn tag(&self) -> TypeTag {
        match self {
            TypedValue::Int8(_) => TypeTag::Int8,
            TypedValue::UInt8(_) => TypeTag::UInt8,
            TypedValue::Int16(_) => TypeTag::Int16,
            TypedValue::UInt16(_) => TypeTag::UInt16,
            TypedValue::Int32(_) => TypeTag::Int32,
            TypedValue::UInt32(_) => TypeTag::UInt32,
            TypedValue::Int64(_) => TypeTag::Int64,
            TypedValue::UInt64(_) => TypeTag::UInt64,
            TypedValue::Bool(_) => TypeTag::Bool,
            TypedValue::Float32(_) => TypeTag::Float32,
            TypedValue::Float64(_) => TypeTag::Float64,
            TypedValue::String(_) => TypeTag::String,
        }
    }

    /// The raw text portion, without quoting, used as the backend payload
    /// in its `[tag_char, raw_value]` short form.
    pub fn raw_text(&self) -> String {
        match self {
            TypedValue::Int8(v) => v.to_string(),
            TypedValue::UInt8(v) => v.to_string(),
            TypedValue::Int16(v) => v.to_string(),
            TypedValue::UInt16(v) => v.to_string(),
            TypedValue::Int32(v) => v.to_string(),
            TypedValue::UInt32(v) => v.to_string(),
            TypedValue::Int64(v) => v.to_string(),
            TypedValue::UInt64(v) => v.to_string(),
            TypedValue::Bool(v) => v.to_string(),
            TypedValue::Float32(v) => v.to_string(),
            TypedValue::Float64(v) => v.to_string(),
            TypedValue::String(v) => v.clone(),
        }
    }

    /// Human-readable rendering. Strings are double-quoted; booleans render
    /// `"true"`/`"false"`; floats use full round-trip precision. Not a
    /// contract for on-disk bytes — backends use their own encodings.
    pub fn to_display(&self) -> String {
        match self {
            TypedValue::String(v) => format!("\"{}\"", v),
            other => other.raw_text(),
        }
    }
}

/// Parses `s` (the raw text portion, no surrounding quotes) into the variant
/// named by `tag`. Returns [`Error::WrongDataType`] on parse failure.
pub fn parse_as(s: &str, tag: TypeTag) -> Result<TypedValue, Error> {
    fn bad(tag_name: &str, e: impl std::fmt::Display) -> Error {
        Error::WrongDataType(format!("{}: {}", tag_name, e))
    }
    match tag {
        TypeTag::Int8 => s.parse::<i8>().map(TypedValue::Int8).map_err(|e| bad("Int8", e)),
        TypeTag::UInt8 => s.parse::<u8>().map(TypedValue::UInt8).map_err(|e| bad("UInt8", e)),
        TypeTag::Int16 => s.parse::<i16>().map(TypedValue::Int16).map_err(|e| bad("Int16", e)),
        TypeTag::UInt16 => s.parse::<u16>().map(TypedValue::UInt16).map_err(|e| bad("UInt16", e)),
        TypeTag::Int32 => s.parse::<i32>().map(TypedValue::Int32).map_err(|e| bad("Int32", e)),
        TypeTag::UInt32 => s.parse::<u32>().map(TypedValue::UInt32).map_err(|e| bad("UInt32", e)),
        TypeTag::Int64 => s.parse::<i64>().map(TypedValue::Int64).map_err(|e| bad("Int64", e)),
        TypeTag::UInt64 => s.parse::<u64>().map(TypedValue::UInt64).map_err(|e| bad("UInt64", e)),
        TypeTag::Bool => s.parse::<bool>().map(TypedValue::Bool).map_err(|e| bad("Bool", e)),
        TypeTag::Float32 => s.parse::<f32>().map(TypedValue::Float32).map_err(|e| bad("Float32", e)),
        TypeTag::Float64 => s.parse::<f64>().map(TypedValue::Float64).map_err(|e| bad("Float64", e)),
        TypeTag::String => Ok(TypedValue::String(s.to_string())),
    }
}

/// Strips the surrounding quotes `to_display` adds for strings, for callers
/// that round-trip through `parse_as`.
pub fn to_display_without_quotes(v: &TypedValue) -> String {
    v.raw_text()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_char_round_trips() {
        for tag in TypeTag::ALL {
            let c = tag.as_char();
            assert_eq!(TypeTag::from_char(c), Some(tag));
        }
        assert_eq!(TypeTag::Int8.as_char(), 'a');
        assert_eq!(TypeTag::String.as_char(), 'l');
    }

    #[test]
    fn display_quotes_strings_and_not_others() {
        assert_eq!(TypedValue::String("demo".into()).to_display(), "\"demo\"");
        assert_eq!(TypedValue::Bool(true).to_display(), "true");
        assert_eq!(TypedValue::Int32(-7).to_display(), "-7");
    }

    #[test]
    fn round_trip_all_variants() {
        let samples = vec![
            TypedValue::Int8(-12),
            TypedValue::UInt8(200),
            TypedValue::Int16(-1234),
            TypedValue::UInt16(5000),
            TypedValue::Int32(-123456),
            TypedValue::UInt32(123456),
            TypedValue::Int64(-123456789),
            TypedValue::UInt64(123456789),
            TypedValue::Bool(false),
            TypedValue::Float32(3.25),
            TypedValue::Float32(1e-30),
            TypedValue::Float64(2.5_f64.powi(10)),
            TypedValue::Float64(1e-300),
            TypedValue::String("round trip".into()),
        ];
        for v in samples {
            let text = to_display_without_quotes(&v);
            let parsed = parse_as(&text, v.tag()).unwrap();
            assert_eq!(parsed, v);
        }
    }

    #[test]
    fn wrong_data_type_on_bad_parse() {
        let err = parse_as("not-a-number", TypeTag::Int32).unwrap_err();
        assert!(matches!(err, Error::WrongDataType(_)));
    }
}
