//! Schema registry: identity (lower-cased) -> schema plus its compiled validator.

use crate::error::AdapterError;
use crate::schema::Schema;
use crate::service::CompiledValidator;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A registered schema and the validator compiled from it.
#[derive(Debug)]
pub struct RegisteredSchema {
    pub identity: String,
    pub schema: Schema,
    pub validator: CompiledValidator,
}

/// Process-wide schema table. Built at startup and shared with the adapter
/// through `Arc`; lookups hand out `Arc` snapshots so no lock outlives the call.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    by_identity: RwLock<HashMap<String, Arc<RegisteredSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Store `schema` under the lower-cased identity, replacing any prior registration.
    pub fn register(&self, identity: &str, schema: Schema) {
        let identity = identity.to_lowercase();
        let validator = CompiledValidator::compile(&identity, &schema);
        tracing::info!(identity = %identity, properties = schema.properties.len(), "schema registered");
        let entry = Arc::new(RegisteredSchema {
            identity: identity.clone(),
            schema,
            validator,
        });
        self.by_identity.write().insert(identity, entry);
    }

    pub fn get(&self, identity: &str) -> Result<Arc<RegisteredSchema>, AdapterError> {
        let key = identity.to_lowercase();
        self.by_identity
            .read()
            .get(&key)
            .cloned()
            .ok_or(AdapterError::SchemaNotFound(key))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.by_identity.read().contains_key(&identity.to_lowercase())
    }

    /// Registered identities, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_identity.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(v: serde_json::Value) -> Schema {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn identities_are_case_insensitive() {
        let registry = SchemaRegistry::new();
        registry.register("AccessPoint", schema(json!({ "properties": { "name": { "type": "string" } } })));
        assert!(registry.contains("accesspoint"));
        assert_eq!(registry.get("ACCESSPOINT").unwrap().identity, "accesspoint");
        assert_eq!(registry.identities(), vec!["accesspoint".to_string()]);
    }

    #[test]
    fn last_registration_wins() {
        let registry = SchemaRegistry::new();
        registry.register("door", schema(json!({ "properties": { "name": { "type": "string" } } })));
        registry.register("door", schema(json!({ "properties": { "title": { "type": "string" } } })));
        let door = registry.get("door").unwrap();
        assert!(door.schema.properties.contains("title"));
        assert!(!door.schema.properties.contains("name"));
    }

    #[test]
    fn missing_identity_is_schema_not_found() {
        let registry = SchemaRegistry::new();
        match registry.get("Ghost") {
            Err(AdapterError::SchemaNotFound(id)) => assert_eq!(id, "ghost"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
