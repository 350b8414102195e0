//! The [`World`] facade: one coordinator API for the host game loop.
//!
//! A world owns the entity manager, component registry, system manager,
//! reference tracker and validator, and keeps them in step:
//!
//! - every structural change made through the world rescans the affected
//!   entity for references,
//! - destroying an entity repairs inbound references before the manager
//!   recycles it,
//! - [`tick`](World::tick) and [`fixed_tick`](World::fixed_tick) run the
//!   systems, rescan what they touched and drain the deferred-destroy
//!   queue.
//!
//! ```
//! use bastion_engine::prelude::*;
//! use serde_json::json;
//!
//! let mut world = World::default();
//! world
//!     .register_component_type(ComponentType::from_schema(
//!         ComponentSchema::new("Health")
//!             .with_field(FieldDef::required("value", ValueKind::Float).with_range(0.0, 1000.0)),
//!     ))
//!     .unwrap();
//!
//! let knight = world.create_entity(EntityType::Unit).unwrap();
//! world
//!     .attach(knight, "Health", data_from_json(&json!({"value": 50.0})).unwrap())
//!     .unwrap();
//! assert_eq!(world.query(&["Health"]), vec![knight]);
//!
//! let blob = world.serialize_world().unwrap();
//! assert!(world.destroy_entity(knight));
//! world.deserialize_world(&blob).unwrap();
//! assert_eq!(world.query(&["Health"]), vec![knight]);
//! ```

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use tracing::{debug, info};

use bastion_ecs::component::Component;
use bastion_ecs::entity::{Entity, EntityId, EntityType};
use bastion_ecs::manager::EntityManager;
use bastion_ecs::references::{ReferenceEvent, ReferenceTracker};
use bastion_ecs::registry::{ComponentRegistry, ComponentType};
use bastion_ecs::validator::{DanglingMap, EntityValidator};
use bastion_ecs::value::ComponentData;
use bastion_ecs::EcsError;

use crate::config::{ConfigError, WorldConfig};
use crate::scheduler::{ScheduleError, SystemManager, TickDiagnostics};
use crate::snapshot::WorldSnapshot;
use crate::system::{System, SystemSettings};

/// Owns all runtime state and coordinates the collaborators.
#[derive(Debug)]
pub struct World {
    config: WorldConfig,
    entities: EntityManager,
    registry: ComponentRegistry,
    systems: SystemManager,
    tracker: ReferenceTracker,
    validator: EntityValidator,
    tick_count: u64,
    fixed_tick_count: u64,
    /// Seconds of variable-step time accumulated by `tick`.
    elapsed: f64,
}

impl Default for World {
    fn default() -> Self {
        Self::from_valid_config(WorldConfig::default())
    }
}

impl World {
    /// Build a world after validating `config`.
    pub fn new(config: WorldConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: WorldConfig) -> Self {
        let mut tracker = ReferenceTracker::new();
        tracker.set_auto_clean(config.auto_clean_references);
        Self {
            entities: EntityManager::new(config.manager.clone()),
            registry: ComponentRegistry::new(),
            systems: SystemManager::new(),
            tracker,
            validator: EntityValidator::new(),
            tick_count: 0,
            fixed_tick_count: 0,
            elapsed: 0.0,
            config,
        }
    }

    // -- accessors ------------------------------------------------------------

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Mutable registry access, e.g. for migrators and version bumps.
    pub fn registry_mut(&mut self) -> &mut ComponentRegistry {
        &mut self.registry
    }

    pub fn systems(&self) -> &SystemManager {
        &self.systems
    }

    /// Mutable scheduler access for enable/disable, priorities and budgets.
    pub fn systems_mut(&mut self) -> &mut SystemManager {
        &mut self.systems
    }

    pub fn tracker(&self) -> &ReferenceTracker {
        &self.tracker
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn fixed_tick_count(&self) -> u64 {
        self.fixed_tick_count
    }

    /// Entity clock in milliseconds.
    pub fn clock(&self) -> u64 {
        self.entities.clock()
    }

    // -- registration ---------------------------------------------------------

    pub fn register_component_type(&mut self, ty: ComponentType) -> Result<(), EcsError> {
        self.registry.register(ty)
    }

    pub fn register_system(
        &mut self,
        system: impl System + 'static,
        settings: SystemSettings,
    ) -> Result<(), ScheduleError> {
        self.systems.register(system, settings)
    }

    // -- entities -------------------------------------------------------------

    pub fn create_entity(&mut self, ty: impl Into<EntityType>) -> Result<EntityId, EcsError> {
        self.entities.create(ty)
    }

    /// Create an entity, attach `components`, spawn it and scan it for
    /// references.
    ///
    /// If any component is rejected the entity is destroyed again and the
    /// error returned, so no partially built entity remains.
    pub fn spawn_entity(
        &mut self,
        ty: impl Into<EntityType>,
        components: impl IntoIterator<Item = Component>,
    ) -> Result<EntityId, EcsError> {
        let id = self.entities.create(ty)?;
        for component in components {
            if let Err(err) = self.entities.add_component(id, component) {
                self.entities.destroy(id);
                return Err(err);
            }
        }
        self.entities.spawn(id);
        self.rescan_entity(id);
        Ok(id)
    }

    /// Destroy an entity, repairing references to it first.
    pub fn destroy_entity(&mut self, id: EntityId) -> bool {
        if !self.entities.contains(id) {
            return false;
        }
        self.tracker.on_entity_destroyed(id, &mut self.entities);
        self.entities.destroy(id)
    }

    /// Destroy `id` at the end of the current or next tick.
    pub fn queue_destroy(&mut self, id: EntityId) {
        self.entities.queue_destroy(id);
    }

    /// Destroy every queued entity. Returns how many were destroyed.
    pub fn flush_destroy_queue(&mut self) -> usize {
        let queued = self.entities.take_destroy_queue();
        queued
            .into_iter()
            .filter(|&id| self.destroy_entity(id))
            .count()
    }

    pub fn get_entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains(id)
    }

    pub fn spawn(&mut self, id: EntityId) -> bool {
        self.entities.spawn(id)
    }

    pub fn despawn(&mut self, id: EntityId) -> bool {
        self.entities.despawn(id)
    }

    pub fn set_active(&mut self, id: EntityId, active: bool) -> bool {
        self.entities.set_active(id, active)
    }

    /// Active entities having every listed component type, ascending.
    pub fn query<S: AsRef<str>>(&self, types: &[S]) -> Vec<EntityId> {
        self.entities.query_all(types)
    }

    pub fn query_any<S: AsRef<str>>(&self, types: &[S]) -> Vec<EntityId> {
        self.entities.query_any(types)
    }

    pub fn query_by_type(&self, ty: &EntityType) -> Vec<EntityId> {
        self.entities.query_by_type(ty)
    }

    // -- components -----------------------------------------------------------

    pub fn add_component(&mut self, id: EntityId, component: Component) -> Result<(), EcsError> {
        self.entities.add_component(id, component)?;
        self.rescan_entity(id);
        Ok(())
    }

    /// Build a registered component from `data` and attach it.
    pub fn attach(&mut self, id: EntityId, type_name: &str, data: ComponentData) -> Result<(), EcsError> {
        if !self.entities.contains(id) {
            return Err(EcsError::NoSuchEntity(id));
        }
        let component = self.registry.create_with(type_name, data)?;
        self.add_component(id, component)
    }

    pub fn remove_component(&mut self, id: EntityId, type_name: &str) -> Option<Component> {
        let removed = self.entities.remove_component(id, type_name)?;
        self.rescan_entity(id);
        Some(removed)
    }

    pub fn component(&self, id: EntityId, type_name: &str) -> Option<&Component> {
        self.entities.component(id, type_name)
    }

    /// Mutable component access. Call [`rescan_entity`](Self::rescan_entity)
    /// after changing reference fields so the tracker sees them.
    pub fn component_mut(&mut self, id: EntityId, type_name: &str) -> Option<&mut Component> {
        self.entities.component_mut(id, type_name)
    }

    // -- references & validation ----------------------------------------------

    /// Re-register the references held by `id`. Returns the edge count.
    pub fn rescan_entity(&mut self, id: EntityId) -> usize {
        match self.entities.get(id) {
            Some(entity) => self.tracker.scan_entity(entity),
            None => self.tracker.unregister_all_from(id),
        }
    }

    pub fn is_entity_referenced(&self, id: EntityId) -> bool {
        self.tracker.is_referenced(id)
    }

    pub fn referencing_entities(&self, id: EntityId) -> Vec<EntityId> {
        self.tracker.get_referencing_entities(id)
    }

    pub fn drain_reference_events(&mut self) -> Vec<ReferenceEvent> {
        self.tracker.drain_events()
    }

    /// Audit every entity for references to missing entities.
    pub fn find_dangling_references(&self) -> BTreeMap<EntityId, DanglingMap> {
        self.validator.find_all_dangling_references(&self.entities)
    }

    /// Rewrite every dangling reference to the sentinel. Returns the count.
    pub fn clean_dangling_references(&mut self) -> usize {
        self.validator.clean_all(&mut self.entities, &mut self.tracker)
    }

    /// Check one entity's structure and components; see
    /// [`validation_errors`](Self::validation_errors) on failure.
    pub fn validate_entity(&mut self, id: EntityId) -> bool {
        match self.entities.get(id) {
            Some(entity) => self.validator.validate_entity(entity),
            None => false,
        }
    }

    pub fn validation_errors(&self) -> &[String] {
        self.validator.last_errors()
    }

    // -- simulation -----------------------------------------------------------

    /// Advance by `dt` seconds: component updates, variable-phase systems,
    /// reference rescans, then the deferred-destroy queue.
    ///
    /// Negative or NaN `dt` is treated as zero.
    pub fn tick(&mut self, dt: f64) -> TickDiagnostics {
        let dt = dt.max(0.0);
        self.elapsed += dt;
        self.entities.set_clock((self.elapsed * 1000.0).round() as u64);
        if self.config.run_component_updates {
            self.entities.update_components(dt);
        }
        let diagnostics = self
            .systems
            .tick(&mut self.entities, &self.registry, self.tick_count, dt)
            .clone();
        self.finish_pass();
        self.tick_count += 1;
        diagnostics
    }

    /// Run the fixed-phase systems once with the configured timestep.
    pub fn fixed_tick(&mut self) -> TickDiagnostics {
        let dt = self.config.fixed_dt;
        let diagnostics = self
            .systems
            .fixed_tick(&mut self.entities, &self.registry, self.fixed_tick_count, dt)
            .clone();
        self.finish_pass();
        self.fixed_tick_count += 1;
        diagnostics
    }

    fn finish_pass(&mut self) {
        for id in self.systems.take_touched() {
            self.rescan_entity(id);
        }
        let destroyed = self.flush_destroy_queue();
        if destroyed > 0 {
            debug!(destroyed, "flushed destroy queue");
        }
    }

    // -- persistence ----------------------------------------------------------

    pub fn capture_snapshot(&self) -> anyhow::Result<WorldSnapshot> {
        WorldSnapshot::new(
            self.entities.capture(&self.registry),
            self.tick_count,
            self.fixed_tick_count,
        )
        .context("failed to hash world snapshot")
    }

    /// BLAKE3 digest of the current state.
    pub fn state_hash(&self) -> anyhow::Result<String> {
        Ok(self.capture_snapshot()?.hash)
    }

    /// Serialize the full state to a JSON document.
    pub fn serialize_world(&self) -> anyhow::Result<String> {
        let snapshot = self.capture_snapshot()?;
        serde_json::to_string(&snapshot).context("failed to encode world snapshot")
    }

    /// Replace the full state with a document from
    /// [`serialize_world`](Self::serialize_world).
    ///
    /// Each entity record is shape-checked, every component is rebuilt
    /// through the registry (migrating older versions) and references are
    /// rescanned. On any error the world is left untouched.
    pub fn deserialize_world(&mut self, blob: &str) -> anyhow::Result<()> {
        let raw: serde_json::Value = serde_json::from_str(blob).context("world blob is not valid JSON")?;
        let records = raw
            .get("entities")
            .and_then(serde_json::Value::as_array)
            .context("world blob has no entity list")?;
        for (i, record) in records.iter().enumerate() {
            if !self.validator.validate_raw(record) {
                bail!(
                    "entity record {i} is malformed: {}",
                    self.validator.last_errors().join("; ")
                );
            }
        }
        let snapshot: WorldSnapshot =
            serde_json::from_value(raw).context("world blob does not match the snapshot format")?;
        self.restore_snapshot(&snapshot)
    }

    /// Restore from a snapshot after verifying its hash.
    pub fn restore_snapshot(&mut self, snapshot: &WorldSnapshot) -> anyhow::Result<()> {
        let recomputed = snapshot
            .recompute_hash()
            .context("failed to hash snapshot contents")?;
        if recomputed != snapshot.hash {
            bail!(
                "snapshot hash mismatch: recorded {} but recomputed {recomputed}",
                snapshot.hash
            );
        }
        let entities = EntityManager::restore(
            self.config.manager.clone(),
            &snapshot.manager_snapshot(),
            &mut self.registry,
        )
        .context("failed to rebuild entities from snapshot")?;

        self.entities = entities;
        self.tick_count = snapshot.tick_count;
        self.fixed_tick_count = snapshot.fixed_tick_count;
        self.elapsed = snapshot.clock as f64 / 1000.0;
        self.tracker.clear();
        let edges = self.tracker.rescan(&self.entities);
        info!(
            entities = self.entities.len(),
            edges,
            tick = self.tick_count,
            "restored world"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
