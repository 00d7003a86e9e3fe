// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::marker::{CelFragment, PathSegment, Reference, CEL_BRAND, REFERENCE_BRAND};

use core::cell::RefCell;
use core::fmt;
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Number;

pub type Object = IndexMap<String, Value>;

/// A node of the proxy value graph handed to the converter.
///
/// Arrays and objects are shared and interior-mutable so that a graph can be
/// built incrementally and may contain cycles; every walker in this crate
/// tracks container identity to terminate on them. `Debug` output is depth
/// limited for the same reason. Equality and serialization are not
/// cycle-aware.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<Object>>),

    // Marker for a field of a resource or of the schema.
    Reference(Reference),

    // Already converted CEL text.
    Cel(CelFragment),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Reference(a), Value::Reference(b)) => a == b,
            (Value::Cel(a), Value::Cel(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    fn fmt_depth(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        if depth > 16 {
            return f.write_str("…");
        }
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(a) => {
                f.write_str("[")?;
                for (idx, v) in a.borrow().iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    v.fmt_depth(f, depth + 1)?;
                }
                f.write_str("]")
            }
            Value::Object(o) => {
                f.write_str("{")?;
                for (idx, (k, v)) in o.borrow().iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: ")?;
                    v.fmt_depth(f, depth + 1)?;
                }
                f.write_str("}")
            }
            Value::Reference(r) => write!(f, "Ref({r})"),
            Value::Cel(c) => write!(f, "Cel({})", c.expression),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_depth(f, 0)
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::String(s) => serializer.serialize_str(s.as_ref()),
            Value::Number(n) => n.serialize(serializer),
            Value::Array(a) => a.borrow().serialize(serializer),
            Value::Object(fields) => {
                let fields = fields.borrow();
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields.iter() {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Reference(r) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(REFERENCE_BRAND, r)?;
                map.end()
            }
            Value::Cel(c) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(CEL_BRAND, c)?;
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a value")
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Null)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Bool(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(v))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::from(v))
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::String(s.into()))
    }

    fn visit_string<E>(self, s: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Value::String(s.into()))
    }

    fn visit_seq<V>(self, mut visitor: V) -> Result<Self::Value, V::Error>
    where
        V: SeqAccess<'de>,
    {
        let mut arr = vec![];
        while let Some(v) = visitor.next_element()? {
            arr.push(v);
        }
        Ok(Value::from(arr))
    }

    fn visit_map<V>(self, mut visitor: V) -> Result<Self::Value, V::Error>
    where
        V: MapAccess<'de>,
    {
        let Some(first) = visitor.next_key::<String>()? else {
            return Ok(Value::new_object());
        };

        // A marker is an object whose only key is the brand.
        if first == REFERENCE_BRAND {
            let r: Reference = visitor.next_value()?;
            if visitor.next_key::<String>()?.is_some() {
                return Err(de::Error::custom("reference marker must be the only key"));
            }
            return Ok(Value::Reference(r));
        }
        if first == CEL_BRAND {
            let c: CelFragment = visitor.next_value()?;
            if visitor.next_key::<String>()?.is_some() {
                return Err(de::Error::custom("cel fragment must be the only key"));
            }
            return Ok(Value::Cel(c));
        }

        let mut map = Object::new();
        map.insert(first, visitor.next_value()?);
        while let Some(key) = visitor.next_key::<String>()? {
            if key == REFERENCE_BRAND || key == CEL_BRAND {
                return Err(de::Error::custom(format!("`{key}` must be the only key")));
            }
            map.insert(key, visitor.next_value()?);
        }
        Ok(Value::from(map))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => write!(f, "{s}"),
            Err(_e) => Err(fmt::Error),
        }
    }
}

impl Value {
    pub fn new_object() -> Value {
        Value::from(Object::new())
    }

    pub fn new_array() -> Value {
        Value::from(vec![])
    }

    pub fn from_json_str(json: &str) -> Result<Value> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_str(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(yaml: &str) -> Result<Value> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// The single brand check shared by every component.
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Reference(_))
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_cel(&self) -> Option<&CelFragment> {
        match self {
            Value::Cel(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Identity of a container, used for cycle detection.
    pub(crate) fn container_id(&self) -> Option<*const ()> {
        match self {
            Value::Array(a) => Some(Rc::as_ptr(a) as *const ()),
            Value::Object(o) => Some(Rc::as_ptr(o) as *const ()),
            _ => None,
        }
    }

    /// Insert a property. Fails when `self` is not an object.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        match self {
            Value::Object(o) => {
                o.borrow_mut().insert(key.into(), value);
                Ok(())
            }
            _ => bail!("not an object"),
        }
    }

    /// Append an element. Fails when `self` is not an array.
    pub fn push(&self, value: Value) -> Result<()> {
        match self {
            Value::Array(a) => {
                a.borrow_mut().push(value);
                Ok(())
            }
            _ => bail!("not an array"),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(o) => o.borrow().get(key).cloned(),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<Value> {
        match self {
            Value::Array(a) => a.borrow().get(index).cloned(),
            _ => None,
        }
    }

    pub fn len(&self) -> Result<usize> {
        match self {
            Value::Array(a) => Ok(a.borrow().len()),
            Value::Object(o) => Ok(o.borrow().len()),
            Value::String(s) => Ok(s.chars().count()),
            _ => Err(anyhow!("value has no length")),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len().map(|l| l == 0).unwrap_or(true)
    }

    /// Follow one path segment through static data.
    pub fn step(&self, segment: &PathSegment) -> Option<Value> {
        match (self, segment) {
            (Value::Object(_), PathSegment::Field(f) | PathSegment::Key(f)) => self.get(f),
            (Value::Array(_), PathSegment::Index(i)) => self.at(*i as usize),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(Number::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        match Number::from_f64(n) {
            Some(n) => Value::Number(n),
            None => Value::Null,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(a)))
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(Rc::new(RefCell::new(o)))
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Reference(r)
    }
}

impl From<CelFragment> for Value {
    fn from(c: CelFragment) -> Self {
        Value::Cel(c)
    }
}
