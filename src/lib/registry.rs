use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    error::{RequestError, Result},
    request_type::{self, RequestType},
};

/// Catalog of request kinds, built at startup and read-only afterwards.
#[derive(Debug, Default)]
pub struct RequestTypeRegistry {
    types: HashMap<String, Arc<RequestType>>,
}

impl RequestTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in kinds.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(request_type::generic_request()?)?;
        registry.register(request_type::access_request()?)?;
        registry.register(request_type::invitation()?)?;
        Ok(registry)
    }

    pub fn register(&mut self, kind: RequestType) -> Result<()> {
        if self.types.contains_key(kind.type_id()) {
            return Err(RequestError::DuplicateType(kind.type_id().to_string()));
        }
        debug!(type_id = kind.type_id(), name = kind.name(), "registered request type");
        self.types.insert(kind.type_id().to_string(), Arc::new(kind));
        Ok(())
    }

    pub fn resolve(&self, type_id: &str) -> Result<Arc<RequestType>> {
        self.types
            .get(type_id)
            .cloned()
            .ok_or_else(|| RequestError::UnknownType(type_id.to_string()))
    }

    /// Registered kinds ordered by type id.
    pub fn list(&self) -> Vec<Arc<RequestType>> {
        let mut types: Vec<_> = self.types.values().cloned().collect();
        types.sort_by(|a, b| a.type_id().cmp(b.type_id()));
        types
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_type::{ACCESS_REQUEST_TYPE_ID, GENERIC_TYPE_ID};

    #[test]
    fn resolves_registered_types() {
        let registry = RequestTypeRegistry::with_defaults().unwrap();
        let kind = registry.resolve(ACCESS_REQUEST_TYPE_ID).unwrap();
        assert_eq!(kind.type_id(), ACCESS_REQUEST_TYPE_ID);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = RequestTypeRegistry::with_defaults().unwrap();
        assert!(matches!(
            registry.resolve("acme.nothing"),
            Err(RequestError::UnknownType(id)) if id == "acme.nothing"
        ));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = RequestTypeRegistry::with_defaults().unwrap();
        let err = registry
            .register(request_type::generic_request().unwrap())
            .unwrap_err();
        assert!(matches!(err, RequestError::DuplicateType(id) if id == GENERIC_TYPE_ID));
    }

    #[test]
    fn list_is_sorted() {
        let registry = RequestTypeRegistry::with_defaults().unwrap();
        let ids: Vec<_> = registry
            .list()
            .iter()
            .map(|kind| kind.type_id().to_string())
            .collect();
        assert_eq!(
            ids,
            vec![
                "reqflow.access-request",
                "reqflow.invitation",
                "reqflow.request"
            ]
        );
    }
}
