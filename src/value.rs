//! Value and record shapes exchanged with the engine.
//!
//! A [`Record`] is an ordered map from attribute name to [`Field`]. Fields are
//! either primitive [`Value`]s or nested related records (`ToOne`/`ToMany`).
//! Link-record data for a related record travels under the reserved
//! [`LINK_KEY`] (`&`) inside that related record.
//!
//! Payloads and query results are both expressed as records, so the same
//! type flows into `create`/`update` and out of `find`. Conversion from and
//! to `serde_json::Value` is structural; schema validation happens at the
//! executor boundary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value as JsonValue};

use crate::db::schema::DataType;

/// Reserved attribute name carrying link-record data inside a related record.
pub const LINK_KEY: &str = "&";

/// Reserved attribute name holding the record identifier.
pub const ID_ATTR: &str = "id";

/// A primitive attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(JsonValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
            Value::Json(_) => "json",
        }
    }

    /// Coerce a value into the representation declared for a column.
    ///
    /// Returns `None` when the value cannot represent the data type. Drivers
    /// use this to decode storage-level values (SQLite stores booleans as
    /// integers and JSON as text).
    pub fn coerce(self, data_type: DataType) -> Option<Value> {
        match (data_type, self) {
            (_, Value::Null) => Some(Value::Null),
            (DataType::String, Value::Text(s)) => Some(Value::Text(s)),
            (DataType::Int, Value::Int(i)) => Some(Value::Int(i)),
            (DataType::Int, Value::Float(f)) if f.fract() == 0.0 => Some(Value::Int(f as i64)),
            (DataType::Float, Value::Float(f)) => Some(Value::Float(f)),
            (DataType::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
            (DataType::Bool, Value::Bool(b)) => Some(Value::Bool(b)),
            (DataType::Bool, Value::Int(i)) => Some(Value::Bool(i != 0)),
            (DataType::Json, Value::Json(j)) => Some(Value::Json(j)),
            (DataType::Json, Value::Text(s)) => {
                Some(Value::Json(serde_json::from_str(&s).unwrap_or(JsonValue::String(s))))
            }
            (DataType::Json, other) => Some(Value::Json(other.to_json())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Json(j) => j.clone(),
        }
    }

    /// Convert a scalar JSON value. Arrays and objects become `Value::Json`.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Value::Text(s.clone()),
            other => Value::Json(other.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One attribute slot of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Value(Value),
    ToOne(Box<Record>),
    ToMany(Vec<Record>),
}

impl Field {
    /// The structured null: for a relation attribute, "remove this relation".
    pub fn null() -> Self {
        Field::Value(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Value(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Field::ToOne(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            Field::ToMany(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Field::ToOne(r) => Some(r),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Field::Value(v) => v.to_json(),
            Field::ToOne(r) => r.to_json(),
            Field::ToMany(rs) => JsonValue::Array(rs.iter().map(Record::to_json).collect()),
        }
    }

    /// Structural conversion: objects become `ToOne`, non-empty arrays of
    /// objects become `ToMany`, everything else a `Value`.
    pub fn from_json(json: &JsonValue) -> Field {
        match json {
            JsonValue::Object(_) => Field::ToOne(Box::new(Record::from_json_lossy(json))),
            JsonValue::Array(items) if !items.is_empty() && items.iter().all(JsonValue::is_object) => {
                Field::ToMany(items.iter().map(Record::from_json_lossy).collect())
            }
            other => Field::Value(Value::from_json(other)),
        }
    }
}

macro_rules! field_from_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Field {
            fn from(v: $ty) -> Self {
                Field::Value(v.into())
            }
        })*
    };
}

field_from_value!(Value, bool, i64, i32, f64, &str, String, JsonValue);

impl From<Record> for Field {
    fn from(r: Record) -> Self {
        Field::ToOne(Box::new(r))
    }
}

impl From<Vec<Record>> for Field {
    fn from(rs: Vec<Record>) -> Self {
        Field::ToMany(rs)
    }
}

/// An ordered attribute map; used for payloads, query results and event
/// snapshots alike.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record(BTreeMap<String, Field>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, field: impl Into<Field>) -> Self {
        self.0.insert(name.into(), field.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, field: impl Into<Field>) -> Option<Field> {
        self.0.insert(name.into(), field.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Field> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.0.get_mut(name)
    }

    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.0.get(name).and_then(Field::as_value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn id(&self) -> Option<i64> {
        self.get_value(ID_ATTR).and_then(Value::as_i64)
    }

    /// Link-record data attached under `&`.
    pub fn link(&self) -> Option<&Record> {
        self.get(LINK_KEY).and_then(Field::as_record)
    }

    /// Follow a dotted path of to-one relations.
    pub fn path(&self, path: &[&str]) -> Option<&Field> {
        let (last, init) = path.split_last()?;
        let mut current = self;
        for segment in init {
            current = current.get(segment)?.as_record()?;
        }
        current.get(last)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Field)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert a JSON object into a record.
    ///
    /// Returns `None` if `json` is not an object.
    pub fn from_json(json: &JsonValue) -> Option<Record> {
        json.is_object().then(|| Self::from_json_lossy(json))
    }

    fn from_json_lossy(json: &JsonValue) -> Record {
        let mut record = Record::new();
        if let JsonValue::Object(map) = json {
            for (key, value) in map {
                record.0.insert(key.clone(), Field::from_json(value));
            }
        }
        record
    }

    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

impl FromIterator<(String, Field)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Field)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, Field);
    type IntoIter = std::collections::btree_map::IntoIter<String, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        Record::from_json(&json).ok_or_else(|| serde::de::Error::custom("expected a JSON object"))
    }
}
