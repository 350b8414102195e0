//! Components: typed, versioned bags of data owned by one entity.
//!
//! A [`Component`] carries its type name, the schema version its data was
//! written against, a weak back-reference to the owning entity and the data
//! itself. Components built by the [`ComponentRegistry`](crate::registry::ComponentRegistry)
//! also carry the type's schema (used by [`Component::self_check`] and for
//! reference discovery) and its [`ComponentHooks`].

use std::fmt;
use std::sync::Arc;

use crate::entity::EntityId;
use crate::schema::ComponentSchema;
use crate::value::{data_depth, find_reserved_key, ComponentData, Value, MAX_DEPTH};

// ---------------------------------------------------------------------------
// ComponentHooks
// ---------------------------------------------------------------------------

/// Lifecycle callback receiving the component data and its owner.
pub type HookFn = Arc<dyn Fn(&mut ComponentData, EntityId) + Send + Sync>;

/// Per-tick callback receiving the component data, its owner and `dt`.
pub type UpdateFn = Arc<dyn Fn(&mut ComponentData, EntityId, f64) + Send + Sync>;

/// The closed set of optional lifecycle callbacks a component type can have.
///
/// Slots left empty are skipped.
#[derive(Clone, Default)]
pub struct ComponentHooks {
    pub on_attach: Option<HookFn>,
    pub on_detach: Option<HookFn>,
    pub on_spawn: Option<HookFn>,
    pub on_despawn: Option<HookFn>,
    pub on_update: Option<UpdateFn>,
}

impl ComponentHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_attach(mut self, f: impl Fn(&mut ComponentData, EntityId) + Send + Sync + 'static) -> Self {
        self.on_attach = Some(Arc::new(f));
        self
    }

    pub fn on_detach(mut self, f: impl Fn(&mut ComponentData, EntityId) + Send + Sync + 'static) -> Self {
        self.on_detach = Some(Arc::new(f));
        self
    }

    pub fn on_spawn(mut self, f: impl Fn(&mut ComponentData, EntityId) + Send + Sync + 'static) -> Self {
        self.on_spawn = Some(Arc::new(f));
        self
    }

    pub fn on_despawn(mut self, f: impl Fn(&mut ComponentData, EntityId) + Send + Sync + 'static) -> Self {
        self.on_despawn = Some(Arc::new(f));
        self
    }

    pub fn on_update(
        mut self,
        f: impl Fn(&mut ComponentData, EntityId, f64) + Send + Sync + 'static,
    ) -> Self {
        self.on_update = Some(Arc::new(f));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.on_attach.is_none()
            && self.on_detach.is_none()
            && self.on_spawn.is_none()
            && self.on_despawn.is_none()
            && self.on_update.is_none()
    }
}

impl fmt::Debug for ComponentHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHooks")
            .field("on_attach", &self.on_attach.is_some())
            .field("on_detach", &self.on_detach.is_some())
            .field("on_spawn", &self.on_spawn.is_some())
            .field("on_despawn", &self.on_despawn.is_some())
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Component
// ---------------------------------------------------------------------------

/// A typed, versioned data payload attached to at most one entity.
#[derive(Debug, Clone)]
pub struct Component {
    type_name: String,
    version: u32,
    owner: Option<EntityId>,
    data: ComponentData,
    schema: Option<Arc<ComponentSchema>>,
    hooks: ComponentHooks,
}

impl Component {
    /// An ad-hoc component with no schema or hooks, at version 1.
    ///
    /// Prefer [`ComponentRegistry::create`](crate::registry::ComponentRegistry::create)
    /// for registered types so the schema travels with the component.
    pub fn new(type_name: &str, data: ComponentData) -> Self {
        Self {
            type_name: type_name.to_owned(),
            version: 1,
            owner: None,
            data,
            schema: None,
            hooks: ComponentHooks::default(),
        }
    }

    pub(crate) fn from_parts(
        type_name: &str,
        version: u32,
        data: ComponentData,
        schema: Option<Arc<ComponentSchema>>,
        hooks: ComponentHooks,
    ) -> Self {
        Self {
            type_name: type_name.to_owned(),
            version,
            owner: None,
            data,
            schema,
            hooks,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The entity this component is attached to, if any.
    pub fn owner(&self) -> Option<EntityId> {
        self.owner
    }

    pub fn data(&self) -> &ComponentData {
        &self.data
    }

    /// Mutable access to the data. Schema compliance is only re-checked at
    /// the next explicit validation.
    pub fn data_mut(&mut self) -> &mut ComponentData {
        &mut self.data
    }

    pub fn into_data(self) -> ComponentData {
        self.data
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Set a top-level field, returning the previous value.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(field.to_owned(), value.into())
    }

    pub fn schema(&self) -> Option<&ComponentSchema> {
        self.schema.as_deref()
    }

    pub fn hooks(&self) -> &ComponentHooks {
        &self.hooks
    }

    /// Structural checks plus schema validation when a schema is attached.
    pub fn self_check(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.type_name.is_empty() {
            errors.push("component type name is empty".to_owned());
        }
        if self.version == 0 {
            errors.push(format!("{}: version must be at least 1", self.type_name));
        }
        let depth = data_depth(&self.data);
        if depth > MAX_DEPTH {
            errors.push(format!(
                "{}: data nests {depth} levels deep (max {MAX_DEPTH})",
                self.type_name
            ));
        }
        if let Some(path) = find_reserved_key(&self.data) {
            errors.push(format!(
                "{}.{path}: map keys starting with '$' are reserved",
                self.type_name
            ));
        }
        if let Some(schema) = &self.schema {
            if let Err(mut schema_errors) = schema.validate(&self.data) {
                errors.append(&mut schema_errors);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    // -- lifecycle (driven by Entity) ---------------------------------------

    pub(crate) fn attach(&mut self, owner: EntityId) {
        self.owner = Some(owner);
        if let Some(hook) = self.hooks.on_attach.clone() {
            hook(&mut self.data, owner);
        }
    }

    pub(crate) fn detach(&mut self) {
        if let Some(owner) = self.owner {
            if let Some(hook) = self.hooks.on_detach.clone() {
                hook(&mut self.data, owner);
            }
        }
        self.owner = None;
    }

    pub(crate) fn run_spawn(&mut self) {
        if let (Some(owner), Some(hook)) = (self.owner, self.hooks.on_spawn.clone()) {
            hook(&mut self.data, owner);
        }
    }

    pub(crate) fn run_despawn(&mut self) {
        if let (Some(owner), Some(hook)) = (self.owner, self.hooks.on_despawn.clone()) {
            hook(&mut self.data, owner);
        }
    }

    pub(crate) fn run_update(&mut self, dt: f64) {
        if let (Some(owner), Some(hook)) = (self.owner, self.hooks.on_update.clone()) {
            hook(&mut self.data, owner, dt);
        }
    }

    /// Re-point the back-reference without firing hooks (snapshot restore).
    pub(crate) fn set_owner_silently(&mut self, owner: EntityId) {
        self.owner = Some(owner);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
