//! Compile-time field tables for static tuples.
//!
//! A [`StaticSchema`] is an immutable `(label, kind, slot)` table shared by
//! every tuple of one record type. Declare one with [`static_schema!`]:
//!
//! ```
//! use lxp_types::{static_schema, Oid, Tuple};
//!
//! static_schema!(pub PERSON = "Person" {
//!     "forename" => String,
//!     "age" => Long,
//! });
//!
//! let mut t = Tuple::new_static(Oid::new(1).unwrap(), PERSON.clone());
//! t.put("age", 41i64).unwrap();
//! assert!(t.put("height", 1.8).is_err());
//! ```

use std::collections::HashMap;

use crate::value::ValueKind;

/// One entry of a static schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub label: String,
    pub kind: ValueKind,
    pub slot: usize,
}

/// Fixed label-to-slot mapping for a static record type.
#[derive(Debug)]
pub struct StaticSchema {
    name: String,
    fields: Vec<FieldSpec>,
    slots: HashMap<String, usize>,
}

impl StaticSchema {
    /// Build from a `(label, kind)` table. Slots follow table order; a
    /// repeated label keeps its first slot.
    pub fn from_table(name: &str, table: &[(&str, ValueKind)]) -> Self {
        let mut fields = Vec::with_capacity(table.len());
        let mut slots = HashMap::with_capacity(table.len());
        for (label, kind) in table {
            if slots.contains_key(*label) {
                continue;
            }
            let slot = fields.len();
            slots.insert(label.to_string(), slot);
            fields.push(FieldSpec {
                label: label.to_string(),
                kind: *kind,
                slot,
            });
        }
        Self {
            name: name.to_string(),
            fields,
            slots,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Slot for `label`, if the schema has it.
    pub fn slot(&self, label: &str) -> Option<usize> {
        self.slots.get(label).copied()
    }

    /// Field spec for `label`, if the schema has it.
    pub fn field(&self, label: &str) -> Option<&FieldSpec> {
        self.slot(label).map(|s| &self.fields[s])
    }
}

/// Declare a shared `LazyLock<Arc<StaticSchema>>`.
#[macro_export]
macro_rules! static_schema {
    ($vis:vis $ident:ident = $name:literal { $($label:literal => $kind:ident),* $(,)? }) => {
        $vis static $ident: ::std::sync::LazyLock<::std::sync::Arc<$crate::StaticSchema>> =
            ::std::sync::LazyLock::new(|| {
                ::std::sync::Arc::new($crate::StaticSchema::from_table(
                    $name,
                    &[$(($label, $crate::ValueKind::$kind)),*],
                ))
            });
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    static_schema!(BIRTH = "Birth" {
        "child" => String,
        "year" => Long,
        "father" => Reference,
    });

    #[test]
    fn slots_follow_declaration_order() {
        assert_eq!(BIRTH.name(), "Birth");
        assert_eq!(BIRTH.len(), 3);
        assert_eq!(BIRTH.slot("child"), Some(0));
        assert_eq!(BIRTH.slot("father"), Some(2));
        assert_eq!(BIRTH.field("year").unwrap().kind, ValueKind::Long);
        assert_eq!(BIRTH.slot("mother"), None);
    }

    #[test]
    fn duplicate_labels_keep_first_slot() {
        let s = StaticSchema::from_table(
            "Dup",
            &[("a", ValueKind::Long), ("a", ValueKind::String), ("b", ValueKind::Boolean)],
        );
        assert_eq!(s.len(), 2);
        assert_eq!(s.field("a").unwrap().kind, ValueKind::Long);
        assert_eq!(s.slot("b"), Some(1));
    }
}
