//! Cache key construction
//!
//! Arguments are serialized to canonical JSON (object keys sorted), so two
//! calls with equal arguments always produce equal keys and distinct
//! arguments never collide. A key template renders selected argument
//! fields instead, which lets callers share entries across arguments that
//! differ only in irrelevant fields.

use std::fmt;

use serde::ser::{self, Serialize, Serializer};
use serde_json::Value;

use super::path::PathSegment;
use super::tree::navigate;
use crate::error::{MemoError, MemoResult};

/// Identity of one memoized call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    /// The fixed key used for zero-argument or singleton computations
    Single,
    /// Canonical JSON of the call arguments
    Args(String),
    /// A rendered key template
    Template(String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => write!(f, "default_key"),
            Self::Args(args) => write!(f, "{args}"),
            Self::Template(rendered) => write!(f, "{rendered}"),
        }
    }
}

/// How a façade derives keys from its arguments
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// Serialize the full argument value
    #[default]
    Hashed,
    /// Ignore arguments; every call shares one entry
    Single,
    /// Render a template such as `"user:{id}"` or `"{0}/{1.region}"`
    Template(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Placeholder(Vec<PathSegment>),
}

/// Compiled key strategy
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    strategy: KeyStrategy,
    template: Vec<TemplatePart>,
}

impl KeyBuilder {
    /// Compile `strategy`, validating any template
    pub fn new(strategy: &KeyStrategy) -> MemoResult<Self> {
        let template = match strategy {
            KeyStrategy::Template(raw) => {
                compile_template(raw).map_err(MemoError::config)?
            }
            _ => Vec::new(),
        };
        Ok(Self { strategy: strategy.clone(), template })
    }

    /// Build the key for one call
    pub fn build<A: Serialize + ?Sized>(&self, args: &A) -> MemoResult<CacheKey> {
        match &self.strategy {
            KeyStrategy::Single => Ok(CacheKey::Single),
            KeyStrategy::Hashed => {
                // serde_json writes NaN and both infinities as null.
                args.serialize(FiniteFloats)
                    .map_err(|error| MemoError::key_formatting(error.to_string()))?;
                let value = to_value(args)?;
                if value.is_null() {
                    return Ok(CacheKey::Single);
                }
                let mut canonical = String::new();
                write_canonical(&value, &mut canonical);
                Ok(CacheKey::Args(canonical))
            }
            KeyStrategy::Template(raw) => {
                let value = to_value(args)?;
                self.render(raw, &value).map(CacheKey::Template)
            }
        }
    }

    fn render(&self, raw: &str, args: &Value) -> MemoResult<String> {
        let mut rendered = String::new();
        for part in &self.template {
            match part {
                TemplatePart::Literal(text) => rendered.push_str(text),
                TemplatePart::Placeholder(path) => {
                    let found = resolve_placeholder(args, path).ok_or_else(|| {
                        MemoError::key_formatting(format!(
                            "template '{raw}' references a missing argument"
                        ))
                    })?;
                    match found {
                        Value::String(text) => rendered.push_str(text),
                        other => rendered.push_str(&other.to_string()),
                    }
                }
            }
        }
        Ok(rendered)
    }
}

fn to_value<A: Serialize + ?Sized>(args: &A) -> MemoResult<Value> {
    serde_json::to_value(args).map_err(|e| MemoError::key_formatting(e.to_string()))
}

/// JSON text with object keys sorted, independent of map iteration order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[derive(Debug)]
enum FloatCheckError {
    NonFinite(f64),
    Custom(String),
}

impl fmt::Display for FloatCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFinite(value) => {
                write!(f, "argument contains the non-finite float {value}, which has no JSON form")
            }
            Self::Custom(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for FloatCheckError {}

impl ser::Error for FloatCheckError {
    fn custom<M: fmt::Display>(message: M) -> Self {
        Self::Custom(message.to_string())
    }
}

/// Walks a value and fails on the first `NaN` or infinity.
#[derive(Clone, Copy)]
struct FiniteFloats;

macro_rules! accept {
    ($($method:ident: $ty:ty),* $(,)?) => {
        $(
            fn $method(self, _value: $ty) -> Result<(), FloatCheckError> {
                Ok(())
            }
        )*
    };
}

impl Serializer for FiniteFloats {
    type Ok = ();
    type Error = FloatCheckError;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    accept!(
        serialize_bool: bool,
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_i128: i128,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_u128: u128,
        serialize_char: char,
        serialize_str: &str,
        serialize_bytes: &[u8],
        serialize_unit_struct: &'static str,
    );

    fn serialize_f32(self, value: f32) -> Result<(), FloatCheckError> {
        self.serialize_f64(f64::from(value))
    }

    fn serialize_f64(self, value: f64) -> Result<(), FloatCheckError> {
        if value.is_finite() {
            Ok(())
        } else {
            Err(FloatCheckError::NonFinite(value))
        }
    }

    fn serialize_none(self) -> Result<(), FloatCheckError> {
        Ok(())
    }

    fn serialize_some<V: ?Sized + Serialize>(self, value: &V) -> Result<(), FloatCheckError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), FloatCheckError> {
        Ok(())
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
    ) -> Result<(), FloatCheckError> {
        Ok(())
    }

    fn serialize_newtype_struct<V: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &V,
    ) -> Result<(), FloatCheckError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<V: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &V,
    ) -> Result<(), FloatCheckError> {
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self, FloatCheckError> {
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self, FloatCheckError> {
        Ok(self)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self, FloatCheckError> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, FloatCheckError> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self, FloatCheckError> {
        Ok(self)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self, FloatCheckError> {
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self, FloatCheckError> {
        Ok(self)
    }
}

macro_rules! compound {
    ($($trait:ident :: $method:ident),* $(,)?) => {
        $(
            impl ser::$trait for FiniteFloats {
                type Ok = ();
                type Error = FloatCheckError;

                fn $method<V: ?Sized + Serialize>(&mut self, value: &V) -> Result<(), FloatCheckError> {
                    value.serialize(*self)
                }

                fn end(self) -> Result<(), FloatCheckError> {
                    Ok(())
                }
            }
        )*
    };
}

compound!(
    SerializeSeq::serialize_element,
    SerializeTuple::serialize_element,
    SerializeTupleStruct::serialize_field,
    SerializeTupleVariant::serialize_field,
);

impl ser::SerializeMap for FiniteFloats {
    type Ok = ();
    type Error = FloatCheckError;

    fn serialize_key<V: ?Sized + Serialize>(&mut self, key: &V) -> Result<(), FloatCheckError> {
        key.serialize(*self)
    }

    fn serialize_value<V: ?Sized + Serialize>(&mut self, value: &V) -> Result<(), FloatCheckError> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), FloatCheckError> {
        Ok(())
    }
}

impl ser::SerializeStruct for FiniteFloats {
    type Ok = ();
    type Error = FloatCheckError;

    fn serialize_field<V: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &V,
    ) -> Result<(), FloatCheckError> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), FloatCheckError> {
        Ok(())
    }
}

impl ser::SerializeStructVariant for FiniteFloats {
    type Ok = ();
    type Error = FloatCheckError;

    fn serialize_field<V: ?Sized + Serialize>(
        &mut self,
        _key: &'static str,
        value: &V,
    ) -> Result<(), FloatCheckError> {
        value.serialize(*self)
    }

    fn end(self) -> Result<(), FloatCheckError> {
        Ok(())
    }
}

/// `{}` and `{0}` address a scalar argument itself.
fn resolve_placeholder<'a>(args: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    if let Some(found) = navigate(args, path) {
        return Some(found);
    }
    match path {
        [] | [PathSegment::Index(0)] if !args.is_array() && !args.is_object() => Some(args),
        _ => None,
    }
}

fn compile_template(raw: &str) -> Result<Vec<TemplatePart>, String> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    name.push(inner);
                }
                if !closed {
                    return Err(format!("key template '{raw}' has an unclosed placeholder"));
                }
                if !literal.is_empty() {
                    parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(TemplatePart::Placeholder(placeholder_path(raw, name.trim())?));
            }
            '}' => return Err(format!("key template '{raw}' has an unmatched '}}'")),
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }
    Ok(parts)
}

fn placeholder_path(raw: &str, name: &str) -> Result<Vec<PathSegment>, String> {
    if name.is_empty() {
        return Ok(Vec::new());
    }
    name.split('.')
        .map(|part| match part {
            "" => Err(format!("key template '{raw}' has an empty placeholder segment")),
            digits if digits.chars().all(|c| c.is_ascii_digit()) => digits
                .parse()
                .map(PathSegment::Index)
                .map_err(|_| format!("key template '{raw}' has an invalid index")),
            field => Ok(PathSegment::Field(field.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    //! Unit tests for cache::key.

    use std::collections::HashMap;

    use serde::Serialize;

    use super::*;

    #[derive(Serialize)]
    struct Lookup {
        user_id: u64,
        region: &'static str,
        verbose: bool,
    }

    /// Validates hashed keys for equal and distinct arguments.
    ///
    /// Assertions:
    /// - Confirms equal arguments yield equal keys.
    /// - Confirms distinct arguments yield distinct keys.
    /// - Confirms unit arguments map to `CacheKey::Single`.
    #[test]
    fn test_hashed_keys() {
        let keys = KeyBuilder::new(&KeyStrategy::Hashed).unwrap();
        assert_eq!(keys.build(&(1, "a")).unwrap(), keys.build(&(1, "a")).unwrap());
        assert_ne!(keys.build(&(1, "a")).unwrap(), keys.build(&(1, "b")).unwrap());
        assert_eq!(keys.build(&()).unwrap(), CacheKey::Single);
        assert_eq!(keys.build(&(1, "a")).unwrap(), CacheKey::Args(r#"[1,"a"]"#.to_string()));
    }

    /// Validates hashed keys for map arguments.
    ///
    /// Assertions:
    /// - Ensures insertion order does not affect the key.
    #[test]
    fn test_hashed_keys_are_canonical_for_maps() {
        let keys = KeyBuilder::new(&KeyStrategy::Hashed).unwrap();
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            first.insert(k, v);
        }
        for (k, v) in [("c", 3), ("a", 1), ("b", 2)] {
            second.insert(k, v);
        }
        assert_eq!(keys.build(&first).unwrap(), keys.build(&second).unwrap());
    }

    /// Validates hashed keys for non-finite float arguments.
    ///
    /// Assertions:
    /// - Confirms `NaN` and both infinities are rejected with
    ///   `MemoError::KeyFormatting`, alone and nested.
    /// - Confirms finite floats still produce distinct keys.
    #[test]
    fn test_hashed_keys_reject_non_finite_floats() {
        let keys = KeyBuilder::new(&KeyStrategy::Hashed).unwrap();
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(keys.build(&value), Err(MemoError::KeyFormatting { .. })));
            assert!(matches!(keys.build(&(1.0, value)), Err(MemoError::KeyFormatting { .. })));
            assert!(matches!(keys.build(&Some(vec![value])), Err(MemoError::KeyFormatting { .. })));
        }
        assert!(matches!(keys.build(&f32::NAN), Err(MemoError::KeyFormatting { .. })));
        assert_ne!(keys.build(&1.5).unwrap(), keys.build(&-1.5).unwrap());
    }

    /// Validates template keys for struct and tuple arguments.
    ///
    /// Assertions:
    /// - Confirms named fields, positional indices and nested paths render.
    /// - Confirms strings render without quotes and `{{` escapes a brace.
    /// - Confirms a scalar argument renders through `{}`.
    #[test]
    fn test_template_keys() {
        let by_user = KeyBuilder::new(&KeyStrategy::Template("user:{user_id}@{region}".into()))
            .unwrap();
        let key = by_user.build(&Lookup { user_id: 7, region: "eu", verbose: true }).unwrap();
        assert_eq!(key, CacheKey::Template("user:7@eu".into()));
        assert_eq!(
            key,
            by_user.build(&Lookup { user_id: 7, region: "eu", verbose: false }).unwrap()
        );

        let positional = KeyBuilder::new(&KeyStrategy::Template("{{{0}}}-{1}".into())).unwrap();
        assert_eq!(
            positional.build(&("x", 2)).unwrap(),
            CacheKey::Template("{x}-2".into())
        );

        let scalar = KeyBuilder::new(&KeyStrategy::Template("id={}".into())).unwrap();
        assert_eq!(scalar.build(&42).unwrap(), CacheKey::Template("id=42".into()));
    }

    /// Validates template errors.
    ///
    /// Assertions:
    /// - Ensures malformed templates fail at construction with
    ///   `MemoError::Configuration`.
    /// - Ensures a missing argument fails with `MemoError::KeyFormatting`.
    #[test]
    fn test_template_errors() {
        for raw in ["user:{id", "user:}", "{a..b}"] {
            assert!(matches!(
                KeyBuilder::new(&KeyStrategy::Template(raw.into())),
                Err(MemoError::Configuration { .. })
            ));
        }

        let keys = KeyBuilder::new(&KeyStrategy::Template("{missing}".into())).unwrap();
        assert!(matches!(
            keys.build(&Lookup { user_id: 1, region: "us", verbose: false }),
            Err(MemoError::KeyFormatting { .. })
        ));
    }

    /// Validates the single key strategy and display forms.
    ///
    /// Assertions:
    /// - Confirms every call maps to `CacheKey::Single`.
    /// - Confirms `CacheKey::Single` displays as `default_key`.
    #[test]
    fn test_single_key() {
        let keys = KeyBuilder::new(&KeyStrategy::Single).unwrap();
        assert_eq!(keys.build(&"anything").unwrap(), CacheKey::Single);
        assert_eq!(CacheKey::Single.to_string(), "default_key");
    }
}
