//! Bastion ECS -- entity storage, schema-checked components and reference
//! integrity for a single-threaded game runtime.
//!
//! Entities are opaque ids owned by the [`EntityManager`](manager::EntityManager),
//! which pools entity objects per type, issues never-reused ids and keeps
//! by-type and by-component indices for fast multi-component queries.
//! Components are versioned bags of [`Value`](value::Value) data, built and
//! (de)serialized through the [`ComponentRegistry`](registry::ComponentRegistry)
//! which validates them against declarative [`ComponentSchema`](schema::ComponentSchema)s
//! and migrates older records. Entity-to-entity references live inside
//! component data and are tracked by the [`ReferenceTracker`](references::ReferenceTracker)
//! and audited by the [`EntityValidator`](validator::EntityValidator).
//!
//! # Quick Start
//!
//! ```
//! use bastion_ecs::prelude::*;
//! use serde_json::json;
//!
//! let mut registry = ComponentRegistry::new();
//! registry
//!     .register(ComponentType::from_schema(
//!         ComponentSchema::new("Health")
//!             .with_field(FieldDef::required("value", ValueKind::Float).with_range(0.0, 1000.0)),
//!     ))
//!     .unwrap();
//!
//! let mut entities = EntityManager::default();
//! let knight = entities.create(EntityType::Unit).unwrap();
//! let health = registry
//!     .create_with("Health", data_from_json(&json!({"value": 50.0})).unwrap())
//!     .unwrap();
//! entities.add_component(knight, health).unwrap();
//!
//! assert_eq!(entities.query_all(&["Health"]), vec![knight]);
//! ```

pub mod component;
pub mod entity;
pub mod manager;
pub mod references;
pub mod registry;
pub mod schema;
pub mod snapshot;
pub mod validator;
pub mod value;

use entity::EntityId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by data-layer operations.
///
/// Every failing call leaves the state it was given exactly as it was.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EcsError {
    /// An entity ceiling or id space is exhausted; nothing was created.
    #[error("entity limit reached for {scope} (limit {limit})")]
    LimitReached { scope: String, limit: usize },

    /// A component type name has no registration.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownType { name: String, registered: String },

    /// Data does not satisfy a component schema or self-check.
    #[error("component '{component}' failed validation: {}", reasons.join("; "))]
    ValidationFailed {
        component: String,
        reasons: Vec<String>,
    },

    /// A record's version cannot be upgraded to the registry's version.
    #[error("no migration for component '{component}' from version {from} to {to}")]
    MigrationUnavailable { component: String, from: u32, to: u32 },

    /// The registered migrator rejected the data.
    #[error("migrating component '{component}' from version {from} to {to} failed: {details}")]
    MigrationFailed {
        component: String,
        from: u32,
        to: u32,
        details: String,
    },

    /// The entity already has a component of this type.
    #[error("entity {entity} already has a '{component}' component")]
    DuplicateComponent { entity: EntityId, component: String },

    /// The entity does not have a component of this type.
    #[error("entity {entity} has no '{component}' component")]
    MissingComponent { entity: EntityId, component: String },

    /// The entity does not exist (destroyed or never created).
    #[error("entity {0} does not exist")]
    NoSuchEntity(EntityId),

    /// Serialized input has the wrong shape.
    #[error("malformed data: {details}")]
    MalformedData { details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{Component, ComponentHooks};
    pub use crate::entity::{Entity, EntityId, EntityType, IdIssuer, INVALID_REFERENCE};
    pub use crate::manager::{BatchReport, EntityManager, ManagerConfig, PoolStats};
    pub use crate::references::{
        reference_slots, FieldPath, ReferenceEdge, ReferenceEvent, ReferenceSlot, ReferenceTracker,
    };
    pub use crate::registry::{ComponentRegistry, ComponentType};
    pub use crate::schema::{ComponentSchema, FieldDef, PredicateOutcome, ReferenceRole};
    pub use crate::snapshot::{ComponentRecord, EntityRecord, ManagerSnapshot};
    pub use crate::validator::EntityValidator;
    pub use crate::value::{data_from_json, data_to_json, ComponentData, Value, ValueKind};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use serde_json::json;

    fn health_registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry
            .register(ComponentType::from_schema(
                ComponentSchema::new("Health")
                    .with_field(FieldDef::required("value", ValueKind::Float).with_range(0.0, 1000.0)),
            ))
            .unwrap();
        registry
    }

    #[test]
    fn health_lifecycle_scenario() {
        let mut registry = health_registry();
        let mut entities = EntityManager::default();

        let e = entities.create(EntityType::Unit).unwrap();
        let health = registry
            .create_with("Health", data_from_json(&json!({"value": 50.0})).unwrap())
            .unwrap();
        entities.add_component(e, health).unwrap();
        assert_eq!(entities.query_all(&["Health"]), vec![e]);

        assert!(entities.destroy(e));
        assert!(entities.query_all(&["Health"]).is_empty());

        let next = entities.create(EntityType::Unit).unwrap();
        assert!(next > e);
    }

    #[test]
    fn dangling_reference_scenario() {
        let mut entities = EntityManager::default();
        let mut tracker = ReferenceTracker::new();
        let validator = EntityValidator::new();

        let a = entities.create(EntityType::Unit).unwrap();
        let b = entities.create(EntityType::Building).unwrap();
        let mut attack = Component::new("Attack", ComponentData::new());
        attack.set("target_id", b);
        entities.add_component(a, attack).unwrap();

        assert_eq!(tracker.scan_entity(entities.get(a).unwrap()), 1);
        tracker.on_entity_destroyed(b, &mut entities);
        entities.destroy(b);

        assert_eq!(
            entities.component(a, "Attack").unwrap().get("target_id"),
            Some(&Value::Int(INVALID_REFERENCE))
        );
        assert!(!tracker.is_referenced(b));
        assert!(validator.find_all_dangling_references(&entities).is_empty());
    }

    #[test]
    fn schema_round_trip_through_registry() {
        let mut registry = health_registry();
        let original = registry
            .create_with("Health", data_from_json(&json!({"value": 999.5})).unwrap())
            .unwrap();
        let once = registry.deserialize(&registry.serialize(&original)).unwrap();
        let twice = registry.deserialize(&registry.serialize(&once)).unwrap();
        assert_eq!(once.data(), original.data());
        assert_eq!(twice.data(), once.data());
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = EcsError::ValidationFailed {
            component: "Health".into(),
            reasons: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "component 'Health' failed validation: a; b");
        let err = EcsError::NoSuchEntity(EntityId::new(0, 3));
        assert_eq!(err.to_string(), "entity 3 does not exist");
    }
}
