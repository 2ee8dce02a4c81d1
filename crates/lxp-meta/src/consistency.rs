//! The structural gate applied to every tuple before it is written.

use lxp_types::{Oid, StoreReference, Tuple, Value, ValueKind};

use crate::descriptor::{TypeDescriptor, TYPE_LABEL};
use crate::error::{MetaError, MetaResult};

/// Whether `value` satisfies a field declared as `kind`.
///
/// Longs satisfy doubles, and reference-shaped strings satisfy references
/// (dynamic tuples decode references as strings).
pub fn kind_compatible(value: &Value, kind: ValueKind) -> bool {
    match (value, kind) {
        (v, k) if v.kind() == k => true,
        (Value::Long(_), ValueKind::Double) => true,
        (Value::String(s), ValueKind::Reference) => StoreReference::parse(s).is_ok(),
        _ => false,
    }
}

/// Check that `tuple` carries every field `descriptor` requires, each with a
/// value of the expected kind. Extra fields are allowed.
pub fn check_structural_consistency(tuple: &Tuple, descriptor: &TypeDescriptor) -> MetaResult<()> {
    for (label, kind) in descriptor.fields() {
        let value = tuple.get(label).map_err(|_| MetaError::MissingField {
            type_name: descriptor.name().to_string(),
            label: label.clone(),
        })?;
        if !kind_compatible(value, *kind) {
            return Err(MetaError::WrongKind {
                type_name: descriptor.name().to_string(),
                label: label.clone(),
                expected: *kind,
                actual: value.kind(),
            });
        }
    }
    Ok(())
}

/// The type id a tuple declares through its [`TYPE_LABEL`] field, if any.
pub fn declared_type(tuple: &Tuple) -> MetaResult<Option<Oid>> {
    if !tuple.contains(TYPE_LABEL) {
        return Ok(None);
    }
    let raw = tuple.get_long(TYPE_LABEL)?;
    let oid = Oid::try_from(raw)
        .map_err(|_| MetaError::Malformed(format!("{TYPE_LABEL} holds invalid type id {raw}")))?;
    Ok(Some(oid))
}

/// A tuple that declares its own type must declare the bucket's bound type.
pub fn check_label_consistency(tuple: &Tuple, bound: Oid) -> MetaResult<()> {
    if !tuple.contains(TYPE_LABEL) {
        return Ok(());
    }
    let found = tuple.get_long(TYPE_LABEL)?;
    if found != bound.get() as i64 {
        return Err(MetaError::LabelIncompatibility {
            expected: bound,
            found,
        });
    }
    Ok(())
}
