//! Systems: stateless per-entity processors filtered by component types.
//!
//! A [`System`] declares the component types it needs and processes one
//! matching entity at a time through a [`SystemContext`]. Scheduling
//! metadata (priority, enable flag, time budget, phase) is held by the
//! [`SystemManager`](crate::scheduler::SystemManager) in [`SystemSettings`],
//! not by the system itself.
//!
//! Closures become systems with [`FnSystem`]:
//!
//! ```
//! use bastion_engine::prelude::*;
//!
//! let gravity = FnSystem::new("gravity", &["Velocity"], |id, ctx, dt| {
//!     if let Some(vel) = ctx.component_mut(id, "Velocity") {
//!         let vy = vel.get("vy").and_then(Value::as_float).unwrap_or(0.0);
//!         vel.set("vy", vy - 9.8 * dt);
//!     }
//! });
//! assert_eq!(gravity.name(), "gravity");
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use bastion_ecs::component::Component;
use bastion_ecs::entity::{Entity, EntityId, EntityType};
use bastion_ecs::manager::EntityManager;
use bastion_ecs::registry::ComponentRegistry;
use bastion_ecs::EcsError;

// ---------------------------------------------------------------------------
// Phase / SystemSettings
// ---------------------------------------------------------------------------

/// Which entry point runs a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Runs from `tick(dt)` with the caller's frame time.
    #[default]
    Variable,
    /// Runs from `fixed_tick(dt)` with the fixed timestep.
    Fixed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Variable => f.write_str("variable"),
            Phase::Fixed => f.write_str("fixed"),
        }
    }
}

/// Scheduling metadata for one registered system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemSettings {
    /// Lower runs earlier.
    pub priority: i32,
    pub enabled: bool,
    /// Soft per-pass time limit. `None` or zero means unlimited.
    pub budget: Option<Duration>,
    pub phase: Phase,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            priority: 0,
            enabled: true,
            budget: None,
            phase: Phase::Variable,
        }
    }
}

impl SystemSettings {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn fixed(mut self) -> Self {
        self.phase = Phase::Fixed;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The budget if it actually limits anything.
    pub(crate) fn effective_budget(&self) -> Option<Duration> {
        self.budget.filter(|b| !b.is_zero())
    }
}

// ---------------------------------------------------------------------------
// SystemContext
// ---------------------------------------------------------------------------

/// What a system may touch while processing an entity.
///
/// Entity destruction is deferred through [`queue_destroy`](Self::queue_destroy)
/// so inbound references are repaired once the pass is over. Entities created
/// or structurally changed through the context are remembered and rescanned
/// for references after the pass.
pub struct SystemContext<'a> {
    entities: &'a mut EntityManager,
    registry: &'a ComponentRegistry,
    touched: &'a mut BTreeSet<EntityId>,
    tick: u64,
    phase: Phase,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(
        entities: &'a mut EntityManager,
        registry: &'a ComponentRegistry,
        touched: &'a mut BTreeSet<EntityId>,
        tick: u64,
        phase: Phase,
    ) -> Self {
        Self {
            entities,
            registry,
            touched,
            tick,
            phase,
        }
    }

    /// Index of the pass being run (tick or fixed-tick count).
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Read-only view of every entity, for queries and lookups.
    pub fn entities(&self) -> &EntityManager {
        self.entities
    }

    pub fn registry(&self) -> &ComponentRegistry {
        self.registry
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn component(&self, id: EntityId, type_name: &str) -> Option<&Component> {
        self.entities.component(id, type_name)
    }

    /// Mutable access to a component. The owner is rescanned for references
    /// after the pass.
    pub fn component_mut(&mut self, id: EntityId, type_name: &str) -> Option<&mut Component> {
        let component = self.entities.component_mut(id, type_name)?;
        self.touched.insert(id);
        Some(component)
    }

    pub fn create(&mut self, ty: impl Into<EntityType>) -> Result<EntityId, EcsError> {
        let id = self.entities.create(ty)?;
        self.touched.insert(id);
        Ok(id)
    }

    pub fn add_component(&mut self, id: EntityId, component: Component) -> Result<(), EcsError> {
        self.entities.add_component(id, component)?;
        self.touched.insert(id);
        Ok(())
    }

    pub fn remove_component(&mut self, id: EntityId, type_name: &str) -> Option<Component> {
        let removed = self.entities.remove_component(id, type_name)?;
        self.touched.insert(id);
        Some(removed)
    }

    pub fn spawn(&mut self, id: EntityId) -> bool {
        self.entities.spawn(id)
    }

    pub fn despawn(&mut self, id: EntityId) -> bool {
        self.entities.despawn(id)
    }

    /// Destroy `id` once the current pass has finished.
    pub fn queue_destroy(&mut self, id: EntityId) {
        self.entities.queue_destroy(id);
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// A per-tick processor over entities having every required component.
///
/// Systems hold no game state; everything they change lives in component
/// data reached through the context.
pub trait System {
    /// Unique name within a [`SystemManager`](crate::scheduler::SystemManager).
    fn name(&self) -> &str;

    /// Component types an entity must have to be processed.
    fn required_components(&self) -> &[String];

    /// Process one matching entity.
    fn process(&self, entity: EntityId, ctx: &mut SystemContext<'_>, dt: f64);
}

/// A [`System`] backed by a closure.
pub struct FnSystem<F> {
    name: String,
    required: Vec<String>,
    func: F,
}

impl<F> FnSystem<F>
where
    F: Fn(EntityId, &mut SystemContext<'_>, f64),
{
    pub fn new(name: &str, required: &[&str], func: F) -> Self {
        Self {
            name: name.to_owned(),
            required: required.iter().map(|s| (*s).to_owned()).collect(),
            func,
        }
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(EntityId, &mut SystemContext<'_>, f64),
{
    fn name(&self) -> &str {
        &self.name
    }

    fn required_components(&self) -> &[String] {
        &self.required
    }

    fn process(&self, entity: EntityId, ctx: &mut SystemContext<'_>, dt: f64) {
        (self.func)(entity, ctx, dt)
    }
}

impl<F> fmt::Debug for FnSystem<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSystem")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_ecs::value::{ComponentData, Value};

    #[test]
    fn settings_builders() {
        let s = SystemSettings::default()
            .with_priority(-5)
            .with_budget(Duration::from_millis(2))
            .fixed()
            .disabled();
        assert_eq!(s.priority, -5);
        assert_eq!(s.phase, Phase::Fixed);
        assert!(!s.enabled);
        assert_eq!(s.effective_budget(), Some(Duration::from_millis(2)));
        assert_eq!(
            SystemSettings::default().with_budget(Duration::ZERO).effective_budget(),
            None
        );
    }

    #[test]
    fn context_marks_structural_changes() {
        let mut entities = EntityManager::default();
        let registry = ComponentRegistry::new();
        let mut touched = BTreeSet::new();
        let existing = entities.create(EntityType::Unit).unwrap();

        let mut ctx = SystemContext::new(&mut entities, &registry, &mut touched, 3, Phase::Variable);
        let spawned = ctx.create(EntityType::Effect).unwrap();
        ctx.add_component(existing, Component::new("Tag", ComponentData::new()))
            .unwrap();
        ctx.queue_destroy(spawned);
        assert_eq!(ctx.tick(), 3);
        assert!(ctx.entity(spawned).is_some(), "destruction is deferred");

        assert_eq!(touched.into_iter().collect::<Vec<_>>(), vec![existing, spawned]);
        assert_eq!(entities.pending_destroy(), &[spawned]);
    }

    #[test]
    fn fn_system_invokes_closure() {
        let mut entities = EntityManager::default();
        let registry = ComponentRegistry::new();
        let mut touched = BTreeSet::new();
        let id = entities.create(EntityType::Unit).unwrap();
        entities
            .add_component(id, Component::new("Counter", ComponentData::new()))
            .unwrap();

        let system = FnSystem::new("count", &["Counter"], |id, ctx, dt| {
            if let Some(c) = ctx.component_mut(id, "Counter") {
                c.set("dt", dt);
            }
        });
        assert_eq!(system.required_components(), &["Counter".to_owned()]);

        let mut ctx = SystemContext::new(&mut entities, &registry, &mut touched, 0, Phase::Fixed);
        system.process(id, &mut ctx, 0.5);
        assert_eq!(
            entities.component(id, "Counter").unwrap().get("dt"),
            Some(&Value::Float(0.5))
        );
    }
}
