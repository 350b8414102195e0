//! Serialized forms of components, entities and whole managers.
//!
//! These records are the persistence and network boundary of the data
//! layer. A [`ManagerSnapshot`] captures everything needed to rebuild an
//! [`EntityManager`] that keeps issuing fresh ids: the issuer state, the
//! clock, and one [`EntityRecord`] per live entity in ascending id order.
//!
//! Restoring is all-or-nothing. [`EntityManager::restore`] builds a new
//! manager and only returns it once every record has been checked and every
//! component rebuilt through the registry, so a bad snapshot never leaves a
//! half-populated manager behind.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::{Entity, EntityId, EntityType, IdIssuer};
use crate::manager::{EntityManager, ManagerConfig};
use crate::registry::ComponentRegistry;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Serialized component: `{ type, version, entity_id, data }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    #[serde(rename = "type")]
    pub type_name: String,
    pub version: u32,
    /// Owner at the time of serialization, or `-1` when detached.
    pub entity_id: i64,
    pub data: serde_json::Value,
}

/// Serialized entity with its components keyed by type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub type_tag: EntityType,
    pub active: bool,
    pub spawned: bool,
    pub spawn_time: u64,
    pub despawn_time: u64,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentRecord>,
}

impl EntityRecord {
    pub fn capture(entity: &Entity, registry: &ComponentRegistry) -> Self {
        Self {
            id: entity.id(),
            type_tag: entity.entity_type().clone(),
            active: entity.is_active(),
            spawned: entity.is_spawned(),
            spawn_time: entity.spawn_time(),
            despawn_time: entity.despawn_time(),
            components: entity
                .components()
                .map(|c| (c.type_name().to_owned(), registry.serialize(c)))
                .collect(),
        }
    }
}

/// Full state of an [`EntityManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    pub issuer: IdIssuer,
    pub clock: u64,
    pub entities: Vec<EntityRecord>,
}

// ---------------------------------------------------------------------------
// Capture / restore
// ---------------------------------------------------------------------------

impl EntityManager {
    /// Record every live entity, ascending by id.
    pub fn capture(&self, registry: &ComponentRegistry) -> ManagerSnapshot {
        let entities = self
            .ids()
            .into_iter()
            .filter_map(|id| self.get(id))
            .map(|entity| EntityRecord::capture(entity, registry))
            .collect();
        ManagerSnapshot {
            issuer: self.issuer().clone(),
            clock: self.clock(),
            entities,
        }
    }

    /// Build a new manager from a snapshot.
    ///
    /// Components are rebuilt with [`ComponentRegistry::deserialize`], so
    /// older data is migrated and everything is validated against the
    /// current schemas. Lifecycle flags are restored verbatim and no hooks
    /// fire.
    ///
    /// # Errors
    ///
    /// - [`EcsError::MalformedData`] for duplicate ids, ids that do not
    ///   belong to the recorded type, or component keys that disagree with
    ///   the embedded type name.
    /// - [`EcsError::LimitReached`] if the snapshot holds more entities than
    ///   `config` allows.
    /// - Any error from [`ComponentRegistry::deserialize`].
    pub fn restore(
        config: ManagerConfig,
        snapshot: &ManagerSnapshot,
        registry: &mut ComponentRegistry,
    ) -> Result<Self, EcsError> {
        if snapshot.entities.len() > config.max_entities {
            return Err(EcsError::LimitReached {
                scope: "all entity types".to_owned(),
                limit: config.max_entities,
            });
        }
        let mut manager = Self::with_issuer(config, snapshot.issuer.clone(), snapshot.clock);
        let mut seen = HashSet::with_capacity(snapshot.entities.len());

        for record in &snapshot.entities {
            if !seen.insert(record.id) {
                return Err(EcsError::MalformedData {
                    details: format!("entity {} appears more than once", record.id),
                });
            }
            manager.issuer_mut().observe(record.id, &record.type_tag)?;

            let mut entity = Entity::vacant();
            entity.initialize(record.id, record.type_tag.clone());
            entity.restore_lifecycle(
                record.active,
                record.spawned,
                record.spawn_time,
                record.despawn_time,
            );
            for (key, component) in &record.components {
                if *key != component.type_name {
                    return Err(EcsError::MalformedData {
                        details: format!(
                            "entity {} stores a '{}' component under key '{key}'",
                            record.id, component.type_name
                        ),
                    });
                }
                entity.insert_restored(registry.deserialize(component)?);
            }
            manager.insert_restored(entity);
        }

        for (ty, &limit) in &manager.config().type_limits {
            if manager.count_by_type(ty) > limit {
                return Err(EcsError::LimitReached {
                    scope: format!("type {ty}"),
                    limit,
                });
            }
        }
        debug!(entities = manager.len(), "restored entity manager");
        Ok(manager)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
