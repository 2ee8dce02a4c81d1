//! Named structural type descriptors and their persisted tuple form.

use std::collections::BTreeMap;

use lxp_types::{Oid, StaticSchema, Tuple, Value, ValueKind};

use crate::error::{MetaError, MetaResult};

/// Reserved tuple field through which a tuple declares its own type id.
pub const TYPE_LABEL: &str = "TYPELABEL";

/// Descriptor tuple field holding the type name.
pub const NAME_LABEL: &str = "NAME";

/// Descriptor tuple field holding `label:KIND` strings.
pub const LABELS_LABEL: &str = "LABELS";

/// An immutable, named set of required field labels and their kinds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: String,
    type_id: Oid,
    fields: BTreeMap<String, ValueKind>,
}

impl TypeDescriptor {
    /// Build a descriptor. The reserved [`TYPE_LABEL`] is never a required
    /// field and is dropped if present.
    pub fn new<I, S>(name: impl Into<String>, type_id: Oid, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, ValueKind)>,
        S: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(label, kind)| (label.into(), kind))
            .filter(|(label, _)| label != TYPE_LABEL)
            .collect();
        Self {
            name: name.into(),
            type_id,
            fields,
        }
    }

    /// Describe a static record type.
    pub fn from_schema(type_id: Oid, schema: &StaticSchema) -> Self {
        Self::new(
            schema.name(),
            type_id,
            schema.fields().iter().map(|f| (f.label.clone(), f.kind)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> Oid {
        self.type_id
    }

    pub fn fields(&self) -> &BTreeMap<String, ValueKind> {
        &self.fields
    }

    pub fn kind_of(&self, label: &str) -> Option<ValueKind> {
        self.fields.get(label).copied()
    }

    /// Same name and same field set, ignoring the id.
    pub fn same_shape(&self, other: &TypeDescriptor) -> bool {
        self.name == other.name && self.fields == other.fields
    }

    /// The tuple stored in the registry bucket for this descriptor.
    pub fn to_tuple(&self) -> MetaResult<Tuple> {
        let mut tuple = Tuple::new(self.type_id);
        tuple.put(NAME_LABEL, self.name.as_str())?;
        let labels = self
            .fields
            .iter()
            .map(|(label, kind)| Value::String(format!("{label}:{kind}")))
            .collect::<Vec<_>>();
        tuple.put(LABELS_LABEL, labels)?;
        Ok(tuple)
    }

    /// Rebuild a descriptor from its registry tuple.
    pub fn from_tuple(tuple: &Tuple) -> MetaResult<Self> {
        let name = tuple.get_string(NAME_LABEL)?.to_string();
        let mut fields = Vec::new();
        for entry in tuple.get_list(LABELS_LABEL)? {
            let Value::String(entry) = entry else {
                return Err(MetaError::Malformed(format!(
                    "{name}: label entry is not a string"
                )));
            };
            let (label, kind) = entry.rsplit_once(':').ok_or_else(|| {
                MetaError::Malformed(format!("{name}: label entry {entry:?} has no kind"))
            })?;
            let kind = kind
                .parse::<ValueKind>()
                .map_err(|e| MetaError::Malformed(format!("{name}: {e}")))?;
            fields.push((label.to_string(), kind));
        }
        Ok(Self::new(name, tuple.oid(), fields))
    }
}
