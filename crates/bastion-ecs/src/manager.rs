//! Entity storage, pooling, id issuance and indexed queries.
//!
//! The [`EntityManager`] is the only owner of [`Entity`] objects and the only
//! place their indices are mutated. Three indices are maintained:
//!
//! - by id (the entity table itself),
//! - by [`EntityType`],
//! - by component type name.
//!
//! All three are consistent whenever a public method returns. Index sets are
//! ordered, so every query returns ids in ascending order and repeated runs
//! with the same inputs observe the same iteration order.
//!
//! ```
//! use bastion_ecs::prelude::*;
//!
//! let mut entities = EntityManager::default();
//! let a = entities.create(EntityType::Unit).unwrap();
//! let b = entities.create(EntityType::Unit).unwrap();
//! entities.add_component(a, Component::new("Armor", ComponentData::new())).unwrap();
//!
//! assert_eq!(entities.query_all(&["Armor"]), vec![a]);
//! assert_eq!(entities.query_by_type(&EntityType::Unit), vec![a, b]);
//!
//! assert!(entities.destroy(a));
//! assert!(entities.query_all(&["Armor"]).is_empty());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::component::Component;
use crate::entity::{Entity, EntityId, EntityType, IdIssuer};
use crate::EcsError;

// ---------------------------------------------------------------------------
// ManagerConfig
// ---------------------------------------------------------------------------

/// Limits and pooling behaviour of an [`EntityManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Ceiling on live entities across all types.
    pub max_entities: usize,
    /// Per-type ceilings. Types without an entry are only bound by
    /// `max_entities`.
    pub type_limits: BTreeMap<EntityType, usize>,
    /// Recycled entity objects kept per type; extras are dropped.
    pub pool_capacity: usize,
    /// Seed for reproducible id ranges. `None` starts every type at 1.
    pub id_seed: Option<u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_entities: 100_000,
            type_limits: BTreeMap::new(),
            pool_capacity: 256,
            id_seed: None,
        }
    }
}

impl ManagerConfig {
    pub fn with_type_limit(mut self, ty: EntityType, limit: usize) -> Self {
        self.type_limits.insert(ty, limit);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.id_seed = Some(seed);
        self
    }

    /// Reject ceilings that would make every creation fail.
    pub fn validate(&self) -> Result<(), EcsError> {
        if self.max_entities == 0 {
            return Err(EcsError::MalformedData {
                details: "max_entities must be at least 1".to_owned(),
            });
        }
        if let Some((ty, _)) = self.type_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(EcsError::MalformedData {
                details: format!("entity limit for type {ty} must be at least 1"),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PoolStats / BatchReport
// ---------------------------------------------------------------------------

/// Counters describing pool behaviour since the manager was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Entity objects created because the pool was empty.
    pub allocated: u64,
    /// Entity objects taken from a pool.
    pub reused: u64,
    /// Destroyed entities returned to a pool.
    pub returned: u64,
    /// Destroyed entities dropped because the pool was full.
    pub discarded: u64,
}

/// Per-item outcome of a batch operation.
///
/// Batches never stop early: every item is attempted and failures are not
/// rolled back.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<T> {
    pub results: Vec<Result<T, EcsError>>,
}

impl<T> BatchReport<T> {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }

    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.results.iter().filter_map(|r| r.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &EcsError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }
}

impl<T> FromIterator<Result<T, EcsError>> for BatchReport<T> {
    fn from_iter<I: IntoIterator<Item = Result<T, EcsError>>>(iter: I) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityManager
// ---------------------------------------------------------------------------

/// Owns all entities, their pools and the lookup indices.
#[derive(Debug)]
pub struct EntityManager {
    config: ManagerConfig,
    issuer: IdIssuer,
    entities: HashMap<EntityId, Entity>,
    by_type: HashMap<EntityType, BTreeSet<EntityId>>,
    by_component: HashMap<String, BTreeSet<EntityId>>,
    pools: HashMap<EntityType, Vec<Entity>>,
    pool_stats: PoolStats,
    destroy_queue: Vec<EntityId>,
    /// Current time in milliseconds, stamped on spawn/despawn.
    clock: u64,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl EntityManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            issuer: IdIssuer::new(config.id_seed),
            config,
            entities: HashMap::new(),
            by_type: HashMap::new(),
            by_component: HashMap::new(),
            pools: HashMap::new(),
            pool_stats: PoolStats::default(),
            destroy_queue: Vec::new(),
            clock: 0,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn issuer(&self) -> &IdIssuer {
        &self.issuer
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn set_clock(&mut self, now: u64) {
        self.clock = now;
    }

    pub fn advance_clock(&mut self, millis: u64) {
        self.clock = self.clock.saturating_add(millis);
    }

    // -- lifecycle ------------------------------------------------------------

    /// Create an entity of the given type.
    ///
    /// # Errors
    ///
    /// [`EcsError::LimitReached`] if the global or per-type ceiling is hit.
    /// Nothing is mutated on failure.
    pub fn create(&mut self, ty: impl Into<EntityType>) -> Result<EntityId, EcsError> {
        let ty = ty.into();
        if self.entities.len() >= self.config.max_entities {
            warn!(entity_type = %ty, limit = self.config.max_entities, "global entity limit reached");
            return Err(EcsError::LimitReached {
                scope: "all entity types".to_owned(),
                limit: self.config.max_entities,
            });
        }
        if let Some(&limit) = self.config.type_limits.get(&ty) {
            if self.count_by_type(&ty) >= limit {
                warn!(entity_type = %ty, limit, "per-type entity limit reached");
                return Err(EcsError::LimitReached {
                    scope: format!("type {ty}"),
                    limit,
                });
            }
        }

        let id = self.issuer.issue(&ty)?;
        let mut entity = match self.pools.get_mut(&ty).and_then(Vec::pop) {
            Some(pooled) => {
                self.pool_stats.reused += 1;
                pooled
            }
            None => {
                self.pool_stats.allocated += 1;
                Entity::vacant()
            }
        };
        entity.initialize(id, ty.clone());
        self.entities.insert(id, entity);
        self.by_type.entry(ty.clone()).or_default().insert(id);
        debug!(entity = %id, entity_type = %ty, "created entity");
        Ok(id)
    }

    /// Destroy an entity: despawn it if needed, detach its components,
    /// unindex it and return its object to the pool.
    ///
    /// Returns `false` if the entity does not exist.
    pub fn destroy(&mut self, id: EntityId) -> bool {
        let Some(mut entity) = self.entities.remove(&id) else {
            return false;
        };
        entity.despawn(self.clock);

        for type_name in entity.component_types() {
            unindex(&mut self.by_component, type_name, id);
        }
        unindex(&mut self.by_type, entity.entity_type(), id);

        let ty = entity.entity_type().clone();
        entity.reset();
        let pool = self.pools.entry(ty.clone()).or_default();
        if pool.len() < self.config.pool_capacity {
            pool.push(entity);
            self.pool_stats.returned += 1;
        } else {
            self.pool_stats.discarded += 1;
        }
        debug!(entity = %id, entity_type = %ty, "destroyed entity");
        true
    }

    /// Fill the pool for `ty` with up to `count` blank objects, bounded by
    /// the pool capacity. Returns how many were added.
    pub fn prewarm(&mut self, ty: impl Into<EntityType>, count: usize) -> usize {
        let capacity = self.config.pool_capacity;
        let pool = self.pools.entry(ty.into()).or_default();
        let room = capacity.saturating_sub(pool.len()).min(count);
        pool.extend(std::iter::repeat_with(Entity::vacant).take(room));
        room
    }

    pub fn pool_size(&self, ty: &EntityType) -> usize {
        self.pools.get(ty).map_or(0, Vec::len)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool_stats
    }

    /// Start an entity's spawn lifecycle. Returns `false` if it does not
    /// exist or is already spawned.
    pub fn spawn(&mut self, id: EntityId) -> bool {
        let now = self.clock;
        self.entities.get_mut(&id).is_some_and(|e| e.spawn(now))
    }

    /// Pause an entity's lifecycle. Returns `false` if it does not exist or
    /// is not spawned.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        let now = self.clock;
        self.entities.get_mut(&id).is_some_and(|e| e.despawn(now))
    }

    /// Include or exclude an entity from queries without destroying it.
    pub fn set_active(&mut self, id: EntityId, active: bool) -> bool {
        match self.entities.get_mut(&id) {
            Some(entity) => {
                entity.set_active(active);
                true
            }
            None => false,
        }
    }

    /// Run the update hooks of every spawned, active entity.
    pub fn update_components(&mut self, dt: f64) {
        for entity in self.entities.values_mut() {
            entity.update(dt);
        }
    }

    // -- components -----------------------------------------------------------

    /// Attach a component.
    ///
    /// # Errors
    ///
    /// - [`EcsError::NoSuchEntity`] if `id` is not alive.
    /// - [`EcsError::DuplicateComponent`] if that type is already attached.
    /// - [`EcsError::ValidationFailed`] if the component's self-check fails.
    pub fn add_component(&mut self, id: EntityId, component: Component) -> Result<(), EcsError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(EcsError::NoSuchEntity(id))?;
        let type_name = component.type_name().to_owned();
        entity.add_component(component)?;
        trace!(entity = %id, component = %type_name, "attached component");
        self.by_component.entry(type_name).or_default().insert(id);
        Ok(())
    }

    /// Detach and return a component, if present.
    pub fn remove_component(&mut self, id: EntityId, type_name: &str) -> Option<Component> {
        let component = self.entities.get_mut(&id)?.remove_component(type_name)?;
        unindex(&mut self.by_component, type_name, id);
        trace!(entity = %id, component = %type_name, "detached component");
        Some(component)
    }

    pub fn component(&self, id: EntityId, type_name: &str) -> Option<&Component> {
        self.entities.get(&id)?.component(type_name)
    }

    /// Mutable access to a component's data in place.
    pub fn component_mut(&mut self, id: EntityId, type_name: &str) -> Option<&mut Component> {
        self.entities.get_mut(&id)?.component_mut(type_name)
    }

    pub fn has_component(&self, id: EntityId, type_name: &str) -> bool {
        self.entities
            .get(&id)
            .is_some_and(|e| e.has_component(type_name))
    }

    // -- lookup & queries -----------------------------------------------------

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// All live entities, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// All live entity ids, ascending.
    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn count_by_type(&self, ty: &EntityType) -> usize {
        self.by_type.get(ty).map_or(0, BTreeSet::len)
    }

    pub fn count_with_component(&self, type_name: &str) -> usize {
        self.by_component.get(type_name).map_or(0, BTreeSet::len)
    }

    /// Active entities having every listed component type.
    ///
    /// Iterates the smallest of the requested indices and checks membership
    /// in the others, so cost follows the rarest component. An empty list
    /// matches every active entity.
    pub fn query_all<S: AsRef<str>>(&self, types: &[S]) -> Vec<EntityId> {
        if types.is_empty() {
            let mut ids: Vec<_> = self
                .entities
                .values()
                .filter(|e| e.is_active())
                .map(Entity::id)
                .collect();
            ids.sort_unstable();
            return ids;
        }
        let Some(indices) = types
            .iter()
            .map(|t| self.by_component.get(t.as_ref()))
            .collect::<Option<Vec<_>>>()
        else {
            return Vec::new();
        };
        let Some(smallest) = indices.iter().min_by_key(|set| set.len()) else {
            return Vec::new();
        };
        smallest
            .iter()
            .filter(|id| indices.iter().all(|set| set.contains(id)))
            .filter(|id| self.entities.get(id).is_some_and(Entity::is_active))
            .copied()
            .collect()
    }

    /// Active entities having at least one listed component type.
    pub fn query_any<S: AsRef<str>>(&self, types: &[S]) -> Vec<EntityId> {
        let union: BTreeSet<EntityId> = types
            .iter()
            .filter_map(|t| self.by_component.get(t.as_ref()))
            .flatten()
            .copied()
            .collect();
        union
            .into_iter()
            .filter(|id| self.entities.get(id).is_some_and(Entity::is_active))
            .collect()
    }

    /// Every live entity of the given type, ascending.
    pub fn query_by_type(&self, ty: &EntityType) -> Vec<EntityId> {
        self.by_type
            .get(ty)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    // -- deferred destruction -------------------------------------------------

    /// Mark an entity for destruction at the next explicit drain.
    pub fn queue_destroy(&mut self, id: EntityId) {
        if !self.destroy_queue.contains(&id) {
            self.destroy_queue.push(id);
        }
    }

    pub fn pending_destroy(&self) -> &[EntityId] {
        &self.destroy_queue
    }

    /// Take the queued ids, leaving the queue empty.
    pub fn take_destroy_queue(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.destroy_queue)
    }

    // -- batch operations -----------------------------------------------------

    pub fn batch_create(&mut self, ty: impl Into<EntityType>, count: usize) -> BatchReport<EntityId> {
        let ty = ty.into();
        (0..count).map(|_| self.create(ty.clone())).collect()
    }

    pub fn batch_destroy(&mut self, ids: &[EntityId]) -> BatchReport<()> {
        ids.iter()
            .map(|&id| {
                if self.destroy(id) {
                    Ok(())
                } else {
                    Err(EcsError::NoSuchEntity(id))
                }
            })
            .collect()
    }

    /// Spawn each entity. `Ok(false)` marks one that was already spawned.
    pub fn batch_spawn(&mut self, ids: &[EntityId]) -> BatchReport<bool> {
        ids.iter()
            .map(|&id| {
                if self.contains(id) {
                    Ok(self.spawn(id))
                } else {
                    Err(EcsError::NoSuchEntity(id))
                }
            })
            .collect()
    }

    /// Despawn each entity. `Ok(false)` marks one that was not spawned.
    pub fn batch_despawn(&mut self, ids: &[EntityId]) -> BatchReport<bool> {
        ids.iter()
            .map(|&id| {
                if self.contains(id) {
                    Ok(self.despawn(id))
                } else {
                    Err(EcsError::NoSuchEntity(id))
                }
            })
            .collect()
    }

    pub fn batch_add_component(
        &mut self,
        items: impl IntoIterator<Item = (EntityId, Component)>,
    ) -> BatchReport<()> {
        items
            .into_iter()
            .map(|(id, component)| self.add_component(id, component))
            .collect()
    }

    pub fn batch_remove_component(&mut self, ids: &[EntityId], type_name: &str) -> BatchReport<Component> {
        ids.iter()
            .map(|&id| {
                if !self.contains(id) {
                    return Err(EcsError::NoSuchEntity(id));
                }
                self.remove_component(id, type_name)
                    .ok_or_else(|| EcsError::MissingComponent {
                        entity: id,
                        component: type_name.to_owned(),
                    })
            })
            .collect()
    }

    // -- consistency ----------------------------------------------------------

    /// Cross-check the three indices. Returns one line per inconsistency.
    pub fn verify_indices(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (id, entity) in &self.entities {
            if entity.id() != *id {
                problems.push(format!("entity stored under {id} reports id {}", entity.id()));
            }
            if !self
                .by_type
                .get(entity.entity_type())
                .is_some_and(|set| set.contains(id))
            {
                problems.push(format!("entity {id} missing from type index {}", entity.entity_type()));
            }
            for type_name in entity.component_types() {
                if !self
                    .by_component
                    .get(type_name)
                    .is_some_and(|set| set.contains(id))
                {
                    problems.push(format!("entity {id} missing from component index {type_name}"));
                }
            }
        }
        for (ty, ids) in &self.by_type {
            for id in ids {
                match self.entities.get(id) {
                    Some(e) if e.entity_type() == ty => {}
                    Some(_) => problems.push(format!("entity {id} indexed under wrong type {ty}")),
                    None => problems.push(format!("type index {ty} holds dead entity {id}")),
                }
            }
        }
        for (type_name, ids) in &self.by_component {
            for id in ids {
                if !self.has_component(*id, type_name) {
                    problems.push(format!("component index {type_name} holds {id} without that component"));
                }
            }
        }
        problems
    }

    // -- restore support ------------------------------------------------------

    /// Build a manager around an existing issuer, e.g. one taken from a
    /// snapshot.
    pub(crate) fn with_issuer(config: ManagerConfig, issuer: IdIssuer, clock: u64) -> Self {
        Self {
            issuer,
            clock,
            ..Self::new(config)
        }
    }

    pub(crate) fn issuer_mut(&mut self) -> &mut IdIssuer {
        &mut self.issuer
    }

    /// Insert a fully built entity, indexing it and its components.
    pub(crate) fn insert_restored(&mut self, entity: Entity) {
        let id = entity.id();
        self.by_type
            .entry(entity.entity_type().clone())
            .or_default()
            .insert(id);
        for type_name in entity.component_types() {
            self.by_component
                .entry(type_name.to_owned())
                .or_default()
                .insert(id);
        }
        self.entities.insert(id, entity);
    }
}

/// Remove `id` from the set under `key`, dropping the set once empty.
fn unindex<K, Q>(index: &mut HashMap<K, BTreeSet<EntityId>>, key: &Q, id: EntityId)
where
    K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
    Q: std::hash::Hash + Eq + ?Sized,
{
    if let Some(set) = index.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ComponentData, Value};

    fn tagged(name: &str) -> Component {
        Component::new(name, ComponentData::new())
    }

    #[test]
    fn create_registers_in_type_index() {
        let mut m = EntityManager::default();
        let u = m.create(EntityType::Unit).unwrap();
        let b = m.create("Building").unwrap();
        assert_eq!(m.query_by_type(&EntityType::Unit), vec![u]);
        assert_eq!(m.query_by_type(&EntityType::Building), vec![b]);
        assert!(m.get(u).unwrap().is_active());
        assert!(!m.get(u).unwrap().is_spawned());
        assert!(m.verify_indices().is_empty());
    }

    #[test]
    fn global_limit_refuses_without_mutation() {
        let mut m = EntityManager::new(ManagerConfig {
            max_entities: 2,
            ..Default::default()
        });
        m.create(EntityType::Unit).unwrap();
        m.create(EntityType::Unit).unwrap();
        let next_before = m.issuer().peek(&EntityType::Unit);
        let err = m.create(EntityType::Unit).unwrap_err();
        assert!(matches!(err, EcsError::LimitReached { limit: 2, .. }));
        assert_eq!(m.len(), 2);
        assert_eq!(m.issuer().peek(&EntityType::Unit), next_before);
    }

    #[test]
    fn per_type_limit_only_affects_that_type() {
        let mut m = EntityManager::new(ManagerConfig::default().with_type_limit(EntityType::Projectile, 1));
        m.create(EntityType::Projectile).unwrap();
        assert!(m.create(EntityType::Projectile).is_err());
        assert!(m.create(EntityType::Unit).is_ok());
    }

    #[test]
    fn destroyed_ids_are_never_reissued() {
        let mut m = EntityManager::default();
        let first = m.create(EntityType::Unit).unwrap();
        assert!(m.destroy(first));
        let second = m.create(EntityType::Unit).unwrap();
        assert!(second > first);
        assert_eq!(m.pool_stats().reused, 1, "entity object was recycled");
    }

    #[test]
    fn destroy_unknown_is_noop() {
        let mut m = EntityManager::default();
        assert!(!m.destroy(EntityId::new(0, 99)));
    }

    #[test]
    fn pool_capacity_bounds_recycling() {
        let mut m = EntityManager::new(ManagerConfig {
            pool_capacity: 1,
            ..Default::default()
        });
        let a = m.create(EntityType::Effect).unwrap();
        let b = m.create(EntityType::Effect).unwrap();
        m.destroy(a);
        m.destroy(b);
        assert_eq!(m.pool_size(&EntityType::Effect), 1);
        assert_eq!(m.pool_stats().discarded, 1);
    }

    #[test]
    fn prewarm_respects_capacity() {
        let mut m = EntityManager::new(ManagerConfig {
            pool_capacity: 4,
            ..Default::default()
        });
        assert_eq!(m.prewarm(EntityType::Projectile, 10), 4);
        assert_eq!(m.prewarm(EntityType::Projectile, 10), 0);
        m.create(EntityType::Projectile).unwrap();
        assert_eq!(m.pool_stats().reused, 1);
        assert_eq!(m.pool_stats().allocated, 0);
    }

    #[test]
    fn query_all_intersects_and_filters_inactive() {
        let mut m = EntityManager::default();
        let a = m.create(EntityType::Unit).unwrap();
        let b = m.create(EntityType::Unit).unwrap();
        let c = m.create(EntityType::Unit).unwrap();
        for id in [a, b, c] {
            m.add_component(id, tagged("Position")).unwrap();
        }
        m.add_component(a, tagged("Velocity")).unwrap();
        m.add_component(b, tagged("Velocity")).unwrap();

        assert_eq!(m.query_all(&["Position", "Velocity"]), vec![a, b]);
        assert!(m.query_all(&["Position", "Missing"]).is_empty());

        m.set_active(b, false);
        assert_eq!(m.query_all(&["Position", "Velocity"]), vec![a]);
        assert_eq!(m.query_all::<&str>(&[]), vec![a, c]);
    }

    #[test]
    fn query_any_unions_without_duplicates() {
        let mut m = EntityManager::default();
        let a = m.create(EntityType::Unit).unwrap();
        let b = m.create(EntityType::Unit).unwrap();
        m.add_component(a, tagged("X")).unwrap();
        m.add_component(a, tagged("Y")).unwrap();
        m.add_component(b, tagged("Y")).unwrap();
        assert_eq!(m.query_any(&["X", "Y", "Z"]), vec![a, b]);
    }

    #[test]
    fn add_component_errors() {
        let mut m = EntityManager::default();
        let a = m.create(EntityType::Unit).unwrap();
        m.add_component(a, tagged("X")).unwrap();
        assert!(matches!(
            m.add_component(a, tagged("X")),
            Err(EcsError::DuplicateComponent { .. })
        ));
        assert!(matches!(
            m.add_component(EntityId::new(0, 500), tagged("X")),
            Err(EcsError::NoSuchEntity(_))
        ));
        assert!(matches!(
            m.add_component(a, tagged("")),
            Err(EcsError::ValidationFailed { .. })
        ));
        assert_eq!(m.count_with_component("X"), 1);
        assert!(m.verify_indices().is_empty());
    }

    #[test]
    fn remove_component_updates_index() {
        let mut m = EntityManager::default();
        let a = m.create(EntityType::Unit).unwrap();
        let mut c = tagged("X");
        c.set("n", 3);
        m.add_component(a, c).unwrap();
        let removed = m.remove_component(a, "X").unwrap();
        assert_eq!(removed.get("n"), Some(&Value::Int(3)));
        assert!(removed.owner().is_none());
        assert!(m.query_all(&["X"]).is_empty());
        assert!(m.remove_component(a, "X").is_none());
        assert!(m.verify_indices().is_empty());
    }

    #[test]
    fn destroy_clears_component_indices() {
        let mut m = EntityManager::default();
        let a = m.create(EntityType::Unit).unwrap();
        m.add_component(a, tagged("X")).unwrap();
        m.spawn(a);
        assert!(m.destroy(a));
        assert_eq!(m.count_with_component("X"), 0);
        assert_eq!(m.count_by_type(&EntityType::Unit), 0);
        assert!(m.verify_indices().is_empty());
    }

    #[test]
    fn spawn_stamps_clock() {
        let mut m = EntityManager::default();
        let a = m.create(EntityType::Unit).unwrap();
        m.set_clock(1_500);
        assert!(m.spawn(a));
        assert!(!m.spawn(a));
        m.advance_clock(500);
        assert!(m.despawn(a));
        let e = m.get(a).unwrap();
        assert_eq!((e.spawn_time(), e.despawn_time()), (1_500, 2_000));
    }

    #[test]
    fn batch_operations_report_each_item() {
        let mut m = EntityManager::new(ManagerConfig::default().with_type_limit(EntityType::Unit, 3));
        let created = m.batch_create(EntityType::Unit, 5);
        assert_eq!(created.succeeded(), 3);
        assert_eq!(created.failed(), 2);

        let ids: Vec<_> = created.successes().copied().collect();
        let ghost = EntityId::new(0, 9_999);

        let spawned = m.batch_spawn(&[ids[0], ids[0], ghost]);
        assert_eq!(spawned.results[0], Ok(true));
        assert_eq!(spawned.results[1], Ok(false));
        assert_eq!(spawned.results[2], Err(EcsError::NoSuchEntity(ghost)));

        let added = m.batch_add_component(ids.iter().map(|&id| (id, tagged("Armor"))));
        assert!(added.all_succeeded());

        let removed = m.batch_remove_component(&[ids[0], ghost], "Armor");
        assert_eq!(removed.succeeded(), 1);

        let destroyed = m.batch_destroy(&[ids[1], ids[1]]);
        assert_eq!(destroyed.succeeded(), 1);
        assert!(m.verify_indices().is_empty());
    }

    #[test]
    fn destroy_queue_deduplicates() {
        let mut m = EntityManager::default();
        let a = m.create(EntityType::Unit).unwrap();
        m.queue_destroy(a);
        m.queue_destroy(a);
        assert_eq!(m.pending_destroy(), &[a]);
        assert_eq!(m.take_destroy_queue(), vec![a]);
        assert!(m.pending_destroy().is_empty());
    }

    #[test]
    fn config_validation_rejects_zero_limits() {
        assert!(ManagerConfig::default().validate().is_ok());
        assert!(ManagerConfig {
            max_entities: 0,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(ManagerConfig::default()
            .with_type_limit(EntityType::Unit, 0)
            .validate()
            .is_err());
    }
}
