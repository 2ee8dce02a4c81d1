//! The tuple (LXP): a labelled, identity-bearing record.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{TupleError, TupleResult};
use crate::oid::{Oid, OidGenerator};
use crate::reference::StoreReference;
use crate::schema::StaticSchema;
use crate::value::{Value, ValueKind};

/// Where a tuple currently lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TupleLocation {
    pub repository: String,
    pub bucket: String,
}

#[derive(Clone, Debug)]
enum Fields {
    /// Labels discovered as they are written.
    Dynamic(BTreeMap<String, Value>),
    /// Labels fixed by a schema; values live in the schema's slots.
    Static {
        schema: Arc<StaticSchema>,
        slots: Vec<Option<Value>>,
    },
}

/// A map from field label to [`Value`], identified by an [`Oid`].
///
/// Equality, ordering, and hashing consider only the oid.
#[derive(Clone, Debug)]
pub struct Tuple {
    oid: Oid,
    fields: Fields,
    location: Option<TupleLocation>,
}

impl Tuple {
    /// Create an empty dynamic tuple.
    pub fn new(oid: Oid) -> Self {
        Self {
            oid,
            fields: Fields::Dynamic(BTreeMap::new()),
            location: None,
        }
    }

    /// Create an empty static tuple bound to `schema`.
    pub fn new_static(oid: Oid, schema: Arc<StaticSchema>) -> Self {
        let slots = vec![None; schema.len()];
        Self {
            oid,
            fields: Fields::Static { schema, slots },
            location: None,
        }
    }

    /// Create an empty dynamic tuple with a freshly generated oid.
    pub fn generate(ids: &dyn OidGenerator) -> Self {
        Self::new(ids.next_oid())
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn is_static(&self) -> bool {
        matches!(self.fields, Fields::Static { .. })
    }

    pub fn schema(&self) -> Option<&Arc<StaticSchema>> {
        match &self.fields {
            Fields::Static { schema, .. } => Some(schema),
            Fields::Dynamic(_) => None,
        }
    }

    /// The bucket this tuple was last read from or written to.
    pub fn location(&self) -> Option<&TupleLocation> {
        self.location.as_ref()
    }

    /// Record the bucket this tuple now belongs to. Called by buckets.
    pub fn place(&mut self, repository: &str, bucket: &str) {
        self.location = Some(TupleLocation {
            repository: repository.to_string(),
            bucket: bucket.to_string(),
        });
    }

    /// A reference to this tuple's canonical location, if it has one.
    pub fn reference(&self) -> Option<StoreReference> {
        self.location
            .as_ref()
            .map(|loc| StoreReference::new(&loc.repository, &loc.bucket, self.oid))
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Set a field.
    ///
    /// Dynamic tuples accept any non-empty label. Static tuples accept only
    /// schema labels, and the value must match (or widen to) the slot kind.
    pub fn put(&mut self, label: &str, value: impl Into<Value>) -> TupleResult<()> {
        if label.is_empty() {
            return Err(TupleError::IllegalKey {
                label: String::new(),
                reason: "label must not be empty".into(),
            });
        }
        let value = value.into();
        match &mut self.fields {
            Fields::Dynamic(map) => {
                map.insert(label.to_string(), value);
                Ok(())
            }
            Fields::Static { schema, slots } => {
                let spec = schema.field(label).ok_or_else(|| TupleError::IllegalKey {
                    label: label.to_string(),
                    reason: format!("not a field of {}", schema.name()),
                })?;
                let actual = value.kind();
                let coerced = value.coerce(spec.kind).ok_or_else(|| TupleError::TypeMismatch {
                    label: label.to_string(),
                    expected: spec.kind,
                    actual,
                })?;
                slots[spec.slot] = Some(coerced);
                Ok(())
            }
        }
    }

    /// Remove a field, returning its old value.
    pub fn remove(&mut self, label: &str) -> Option<Value> {
        match &mut self.fields {
            Fields::Dynamic(map) => map.remove(label),
            Fields::Static { schema, slots } => {
                let slot = schema.slot(label)?;
                slots[slot].take()
            }
        }
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    fn lookup(&self, label: &str) -> Option<&Value> {
        match &self.fields {
            Fields::Dynamic(map) => map.get(label),
            Fields::Static { schema, slots } => {
                schema.slot(label).and_then(|s| slots[s].as_ref())
            }
        }
    }

    pub fn get(&self, label: &str) -> TupleResult<&Value> {
        self.lookup(label)
            .ok_or_else(|| TupleError::KeyNotFound(label.to_string()))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.lookup(label).is_some()
    }

    fn mismatch(label: &str, expected: ValueKind, actual: &Value) -> TupleError {
        TupleError::TypeMismatch {
            label: label.to_string(),
            expected,
            actual: actual.kind(),
        }
    }

    pub fn get_string(&self, label: &str) -> TupleResult<&str> {
        match self.get(label)? {
            Value::String(s) => Ok(s),
            other => Err(Self::mismatch(label, ValueKind::String, other)),
        }
    }

    pub fn get_long(&self, label: &str) -> TupleResult<i64> {
        match self.get(label)? {
            Value::Long(v) => Ok(*v),
            other => Err(Self::mismatch(label, ValueKind::Long, other)),
        }
    }

    pub fn get_double(&self, label: &str) -> TupleResult<f64> {
        match self.get(label)? {
            Value::Double(v) => Ok(*v),
            other => Err(Self::mismatch(label, ValueKind::Double, other)),
        }
    }

    pub fn get_boolean(&self, label: &str) -> TupleResult<bool> {
        match self.get(label)? {
            Value::Boolean(v) => Ok(*v),
            other => Err(Self::mismatch(label, ValueKind::Boolean, other)),
        }
    }

    pub fn get_list(&self, label: &str) -> TupleResult<&[Value]> {
        match self.get(label)? {
            Value::List(items) => Ok(items),
            other => Err(Self::mismatch(label, ValueKind::List, other)),
        }
    }

    /// Read a reference field.
    ///
    /// Dynamic tuples decode references as plain strings, so a string in
    /// `repository/bucket/oid` form is accepted too.
    pub fn get_reference(&self, label: &str) -> TupleResult<StoreReference> {
        match self.get(label)? {
            Value::Reference(r) => Ok(r.clone()),
            Value::String(s) => StoreReference::parse(s),
            other => Err(Self::mismatch(label, ValueKind::Reference, other)),
        }
    }

    /// Field labels in storage order (sorted for dynamic, slot order for static).
    pub fn labels(&self) -> Vec<&str> {
        self.iter().map(|(label, _)| label).collect()
    }

    /// Iterate over the fields that are set.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (&str, &Value)> + '_> {
        match &self.fields {
            Fields::Dynamic(map) => Box::new(map.iter().map(|(k, v)| (k.as_str(), v))),
            Fields::Static { schema, slots } => Box::new(
                schema
                    .fields()
                    .iter()
                    .zip(slots.iter())
                    .filter_map(|(spec, v)| v.as_ref().map(|v| (spec.label.as_str(), v))),
            ),
        }
    }

    /// Number of fields that are set.
    pub fn len(&self) -> usize {
        match &self.fields {
            Fields::Dynamic(map) => map.len(),
            Fields::Static { slots, .. } => slots.iter().filter(|s| s.is_some()).count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---------------------------------------------------------------
    // JSON codec
    // ---------------------------------------------------------------

    /// Encode as a JSON object (one key per field).
    pub fn to_json_object(&self) -> TupleResult<serde_json::Map<String, serde_json::Value>> {
        let mut map = serde_json::Map::new();
        for (label, value) in self.iter() {
            map.insert(label.to_string(), value.to_json()?);
        }
        Ok(map)
    }

    /// Serialize to record-file text.
    pub fn serialize(&self) -> TupleResult<String> {
        let object = serde_json::Value::Object(self.to_json_object()?);
        serde_json::to_string(&object).map_err(|e| TupleError::Malformed(e.to_string()))
    }

    /// Decode a dynamic tuple from record-file text.
    pub fn deserialize(oid: Oid, text: &str) -> TupleResult<Self> {
        let object = parse_object(text)?;
        let mut tuple = Self::new(oid);
        for (label, json) in &object {
            tuple
                .put(label, Value::from_json(json)?)
                .map_err(|e| TupleError::Malformed(e.to_string()))?;
        }
        Ok(tuple)
    }

    /// Decode a static tuple. Labels outside the schema are rejected and
    /// string fields declared as references are parsed into references.
    pub fn deserialize_static(oid: Oid, text: &str, schema: Arc<StaticSchema>) -> TupleResult<Self> {
        let object = parse_object(text)?;
        let mut tuple = Self::new_static(oid, schema);
        for (label, json) in &object {
            tuple
                .put(label, Value::from_json(json)?)
                .map_err(|e| TupleError::Malformed(e.to_string()))?;
        }
        Ok(tuple)
    }
}

fn parse_object(text: &str) -> TupleResult<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(TupleError::Malformed(format!(
            "expected a JSON object, found {}",
            json_type_name(&other)
        ))),
        Err(e) => Err(TupleError::Malformed(e.to_string())),
    }
}

fn json_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid
    }
}

impl Eq for Tuple {}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.oid.cmp(&other.oid)
    }
}

impl Hash for Tuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.oid.hash(state);
    }
}
