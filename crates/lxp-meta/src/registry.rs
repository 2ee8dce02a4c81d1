//! Process-lifetime cache of registered type descriptors.
//!
//! The registry itself is persisted by the store (as tuples in its system
//! repository); this type only holds the name and id lookups in memory and
//! applies the structural gate.

use std::collections::HashMap;
use std::sync::Arc;

use lxp_types::{Oid, Tuple};
use parking_lot::RwLock;
use tracing::debug;

use crate::consistency::{check_label_consistency, check_structural_consistency, declared_type};
use crate::descriptor::TypeDescriptor;
use crate::error::{MetaError, MetaResult};

#[derive(Default)]
struct Tables {
    by_name: HashMap<String, Arc<TypeDescriptor>>,
    by_id: HashMap<Oid, Arc<TypeDescriptor>>,
}

/// Name- and id-keyed lookup of type descriptors.
#[derive(Default)]
pub struct TypeRegistry {
    tables: RwLock<Tables>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor.
    ///
    /// Registering a name again with the same shape returns the descriptor
    /// already held; a different shape is a [`MetaError::DuplicateType`].
    pub fn insert(&self, descriptor: TypeDescriptor) -> MetaResult<Arc<TypeDescriptor>> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.by_name.get(descriptor.name()) {
            if existing.same_shape(&descriptor) {
                return Ok(existing.clone());
            }
            return Err(MetaError::DuplicateType(descriptor.name().to_string()));
        }
        let descriptor = Arc::new(descriptor);
        debug!(name = descriptor.name(), type_id = %descriptor.type_id(), "type registered");
        tables
            .by_name
            .insert(descriptor.name().to_string(), descriptor.clone());
        tables.by_id.insert(descriptor.type_id(), descriptor.clone());
        Ok(descriptor)
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.tables.read().by_name.get(name).cloned()
    }

    pub fn by_id(&self, type_id: Oid) -> Option<Arc<TypeDescriptor>> {
        self.tables.read().by_id.get(&type_id).cloned()
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the write gate for a bucket bound to `bound` (or unbound).
    ///
    /// A bound bucket checks label consistency and then structure against
    /// its type. An unbound bucket checks only tuples that declare a type.
    pub fn validate(&self, tuple: &Tuple, bound: Option<Oid>) -> MetaResult<()> {
        let type_id = match bound {
            Some(type_id) => {
                check_label_consistency(tuple, type_id)?;
                type_id
            }
            None => match declared_type(tuple)? {
                Some(type_id) => type_id,
                None => return Ok(()),
            },
        };
        let descriptor = self
            .by_id(type_id)
            .ok_or(MetaError::UnknownTypeId(type_id))?;
        check_structural_consistency(tuple, &descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TYPE_LABEL;
    use lxp_types::ValueKind;

    fn oid(n: u64) -> Oid {
        Oid::new(n).unwrap()
    }

    fn registry() -> TypeRegistry {
        let r = TypeRegistry::new();
        r.insert(TypeDescriptor::new("Place", oid(7), [("town", ValueKind::String)]))
            .unwrap();
        r
    }

    #[test]
    fn lookup_by_name_and_id() {
        let r = registry();
        assert_eq!(r.by_name("Place").unwrap().type_id(), oid(7));
        assert_eq!(r.by_id(oid(7)).unwrap().name(), "Place");
        assert!(r.by_name("Nowhere").is_none());
        assert_eq!(r.names(), vec!["Place".to_string()]);
    }

    #[test]
    fn reregistering_same_shape_is_idempotent() {
        let r = registry();
        let again = r
            .insert(TypeDescriptor::new("Place", oid(99), [("town", ValueKind::String)]))
            .unwrap();
        assert_eq!(again.type_id(), oid(7));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn reregistering_different_shape_fails() {
        let r = registry();
        let err = r
            .insert(TypeDescriptor::new("Place", oid(8), [("county", ValueKind::String)]))
            .unwrap_err();
        assert_eq!(err, MetaError::DuplicateType("Place".into()));
    }

    #[test]
    fn validate_bound_bucket() {
        let r = registry();
        let mut t = Tuple::new(oid(1));
        assert!(matches!(
            r.validate(&t, Some(oid(7))),
            Err(MetaError::MissingField { .. })
        ));
        t.put("town", "Leith").unwrap();
        r.validate(&t, Some(oid(7))).unwrap();
        t.put(TYPE_LABEL, 8i64).unwrap();
        assert!(matches!(
            r.validate(&t, Some(oid(7))),
            Err(MetaError::LabelIncompatibility { .. })
        ));
    }

    #[test]
    fn validate_unbound_bucket_uses_declared_type() {
        let r = registry();
        let mut t = Tuple::new(oid(1));
        r.validate(&t, None).unwrap();
        t.put(TYPE_LABEL, 7i64).unwrap();
        assert!(matches!(r.validate(&t, None), Err(MetaError::MissingField { .. })));
        t.put(TYPE_LABEL, 1234i64).unwrap();
        assert_eq!(r.validate(&t, None), Err(MetaError::UnknownTypeId(oid(1234))));
    }
}
