//! Component type registration, construction, validation and migration.
//!
//! Every component type used through the registry is described by a
//! [`ComponentType`]: a factory producing its initial data, an optional
//! [`ComponentSchema`], a schema version and optional [`ComponentHooks`].
//! Serialized components carry the version they were written with; on
//! [`deserialize`](ComponentRegistry::deserialize) older data is upgraded by
//! the type's registered migrator before being validated against the current
//! schema.
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
//! let health = registry
//!     .create_with("Health", data_from_json(&json!({"value": 50})).unwrap())
//!     .unwrap();
//! let record = registry.serialize(&health);
//! let restored = registry.deserialize(&record).unwrap();
//! assert_eq!(restored.data(), health.data());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::component::{Component, ComponentHooks};
use crate::schema::ComponentSchema;
use crate::snapshot::ComponentRecord;
use crate::value::{data_from_json, data_to_json, ComponentData};
use crate::EcsError;

/// Produces the initial data of a new component.
pub type Factory = Arc<dyn Fn() -> ComponentData + Send + Sync>;

/// Upgrades serialized data: `(data, from_version, to_version) -> data`.
pub type Migrator =
    Arc<dyn Fn(ComponentData, u32, u32) -> Result<ComponentData, String> + Send + Sync>;

/// Cached validation results kept per type before the cache is flushed.
const VALIDATION_CACHE_CAP: usize = 1024;

// ---------------------------------------------------------------------------
// ComponentType
// ---------------------------------------------------------------------------

/// Everything the registry needs to know about one component type.
#[derive(Clone)]
pub struct ComponentType {
    name: String,
    factory: Factory,
    schema: Option<ComponentSchema>,
    version: u32,
    hooks: ComponentHooks,
}

impl ComponentType {
    pub fn new(name: &str, factory: impl Fn() -> ComponentData + Send + Sync + 'static) -> Self {
        Self {
            name: name.to_owned(),
            factory: Arc::new(factory),
            schema: None,
            version: 1,
            hooks: ComponentHooks::default(),
        }
    }

    /// New components start as copies of `prototype`.
    pub fn from_prototype(name: &str, prototype: ComponentData) -> Self {
        Self::new(name, move || prototype.clone())
    }

    /// Named after the schema; new components start from its defaults.
    pub fn from_schema(schema: ComponentSchema) -> Self {
        let defaults = schema.default_data();
        Self::from_prototype(schema.name(), defaults).with_schema(schema)
    }

    pub fn with_schema(mut self, schema: ComponentSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_hooks(mut self, hooks: ComponentHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentType")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("schema", &self.schema.as_ref().map(ComponentSchema::name))
            .field("hooks", &self.hooks)
            .finish()
    }
}

struct Registration {
    factory: Factory,
    schema: Option<Arc<ComponentSchema>>,
    version: u32,
    hooks: ComponentHooks,
}

/// `None` for valid data, otherwise the reasons it failed.
type CachedOutcome = Option<Vec<String>>;

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Maps component type names to their factories, schemas and versions.
#[derive(Default)]
pub struct ComponentRegistry {
    types: BTreeMap<String, Registration>,
    migrators: HashMap<String, Migrator>,
    validation_cache: HashMap<String, HashMap<[u8; 32], CachedOutcome>>,
    last_errors: Vec<String>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("types", &self.type_names())
            .field("migrators", &self.migrators.len())
            .finish()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a component type.
    ///
    /// Replacing a type discards any cached validation results for it.
    ///
    /// # Errors
    ///
    /// [`EcsError::MalformedData`] for an empty name or a version of 0.
    pub fn register(&mut self, ty: ComponentType) -> Result<(), EcsError> {
        if ty.name.is_empty() {
            return Err(EcsError::MalformedData {
                details: "component type name is empty".to_owned(),
            });
        }
        if ty.version == 0 {
            return Err(EcsError::MalformedData {
                details: format!("component type '{}' must have version >= 1", ty.name),
            });
        }
        let replaced = self.types.contains_key(&ty.name);
        self.validation_cache.remove(&ty.name);
        debug!(component = %ty.name, version = ty.version, replaced, "registered component type");
        self.types.insert(
            ty.name,
            Registration {
                factory: ty.factory,
                schema: ty.schema.map(Arc::new),
                version: ty.version,
                hooks: ty.hooks,
            },
        );
        Ok(())
    }

    /// Register a type whose components start as copies of `prototype`.
    pub fn register_prototype(
        &mut self,
        name: &str,
        prototype: ComponentData,
        schema: Option<ComponentSchema>,
        version: u32,
    ) -> Result<(), EcsError> {
        let mut ty = ComponentType::from_prototype(name, prototype).with_version(version);
        ty.schema = schema;
        self.register(ty)
    }

    /// Bump (or otherwise change) the current version of a registered type.
    pub fn set_version(&mut self, name: &str, version: u32) -> Result<(), EcsError> {
        if version == 0 {
            return Err(EcsError::MalformedData {
                details: format!("component type '{name}' must have version >= 1"),
            });
        }
        let registered = self.registered_names();
        let reg = self
            .types
            .get_mut(name)
            .ok_or_else(|| EcsError::UnknownType {
                name: name.to_owned(),
                registered,
            })?;
        reg.version = version;
        self.validation_cache.remove(name);
        debug!(component = %name, version, "component version changed");
        Ok(())
    }

    /// Register the upgrade path for serialized data of type `name`.
    pub fn register_migrator(
        &mut self,
        name: &str,
        migrator: impl Fn(ComponentData, u32, u32) -> Result<ComponentData, String> + Send + Sync + 'static,
    ) {
        self.migrators.insert(name.to_owned(), Arc::new(migrator));
    }

    // -- lookups --------------------------------------------------------------

    pub fn has_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn has_migrator(&self, name: &str) -> bool {
        self.migrators.contains_key(name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        self.types.keys().map(String::as_str).collect()
    }

    pub fn current_version(&self, name: &str) -> Option<u32> {
        self.types.get(name).map(|r| r.version)
    }

    pub fn schema(&self, name: &str) -> Option<&ComponentSchema> {
        self.types.get(name)?.schema.as_deref()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn registered_names(&self) -> String {
        self.type_names().join(", ")
    }

    fn lookup(&self, name: &str) -> Result<&Registration, EcsError> {
        self.types.get(name).ok_or_else(|| EcsError::UnknownType {
            name: name.to_owned(),
            registered: self.registered_names(),
        })
    }

    // -- construction ---------------------------------------------------------

    /// Build a component from the type's factory, with schema defaults filled.
    ///
    /// The result is not validated; attaching it to an entity is.
    pub fn create(&self, name: &str) -> Result<Component, EcsError> {
        let reg = self.lookup(name)?;
        let mut data = (reg.factory)();
        if let Some(schema) = &reg.schema {
            data = schema.apply_defaults(&data);
        }
        Ok(Component::from_parts(
            name,
            reg.version,
            data,
            reg.schema.clone(),
            reg.hooks.clone(),
        ))
    }

    /// Build a component from caller-supplied data.
    ///
    /// Schema defaults fill absent fields and the result must validate.
    pub fn create_with(&mut self, name: &str, data: ComponentData) -> Result<Component, EcsError> {
        let (version, schema, hooks) = {
            let reg = self.lookup(name)?;
            (reg.version, reg.schema.clone(), reg.hooks.clone())
        };
        let data = match &schema {
            Some(schema) => schema.apply_defaults(&data),
            None => data,
        };
        self.ensure_valid(name, &data)?;
        Ok(Component::from_parts(name, version, data, schema, hooks))
    }

    // -- validation -----------------------------------------------------------

    /// Validate `data` against the current schema of `name`.
    ///
    /// Reasons for a `false` result are available from
    /// [`last_errors`](Self::last_errors). Types without a schema accept any
    /// data.
    pub fn validate(&mut self, name: &str, data: &ComponentData) -> bool {
        self.last_errors.clear();
        let schema = match self.lookup(name) {
            Ok(reg) => reg.schema.clone(),
            Err(err) => {
                self.last_errors.push(err.to_string());
                return false;
            }
        };
        let Some(schema) = schema else {
            return true;
        };

        let key = *blake3::hash(data_to_json(data).to_string().as_bytes()).as_bytes();
        let cache = self.validation_cache.entry(name.to_owned()).or_default();
        let outcome = match cache.get(&key) {
            Some(cached) => cached.clone(),
            None => {
                let outcome = schema.validate(data).err();
                if cache.len() >= VALIDATION_CACHE_CAP {
                    cache.clear();
                }
                cache.insert(key, outcome.clone());
                outcome
            }
        };
        match outcome {
            None => true,
            Some(reasons) => {
                self.last_errors = reasons;
                false
            }
        }
    }

    /// Reasons collected by the most recent [`validate`](Self::validate).
    pub fn last_errors(&self) -> &[String] {
        &self.last_errors
    }

    /// Number of cached validation results for `name`.
    pub fn cached_validations(&self, name: &str) -> usize {
        self.validation_cache.get(name).map_or(0, HashMap::len)
    }

    fn ensure_valid(&mut self, name: &str, data: &ComponentData) -> Result<(), EcsError> {
        if self.validate(name, data) {
            Ok(())
        } else {
            Err(EcsError::ValidationFailed {
                component: name.to_owned(),
                reasons: self.last_errors.clone(),
            })
        }
    }

    // -- serialization --------------------------------------------------------

    /// Serialize a component, stamped with the registry's current version
    /// for its type.
    pub fn serialize(&self, component: &Component) -> ComponentRecord {
        ComponentRecord {
            type_name: component.type_name().to_owned(),
            version: self
                .current_version(component.type_name())
                .unwrap_or_else(|| component.version()),
            entity_id: component
                .owner()
                .map_or(crate::entity::INVALID_REFERENCE, |id| id.as_reference()),
            data: data_to_json(component.data()),
        }
    }

    /// Rebuild a component from its record, migrating older data first.
    ///
    /// The returned component is detached; the record's `entity_id` is
    /// informational only.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnknownType`] if the type is not registered.
    /// - [`EcsError::MigrationUnavailable`] if the record is older than the
    ///   current version and no migrator is registered, or newer than it.
    /// - [`EcsError::MigrationFailed`] if the migrator rejects the data.
    /// - [`EcsError::ValidationFailed`] if the (migrated) data does not match
    ///   the current schema.
    /// - [`EcsError::MalformedData`] for unparseable data or version 0.
    pub fn deserialize(&mut self, record: &ComponentRecord) -> Result<Component, EcsError> {
        let name = record.type_name.as_str();
        let current = self.lookup(name)?.version;
        let from = record.version;
        if from == 0 {
            return Err(EcsError::MalformedData {
                details: format!("component '{name}' record has version 0"),
            });
        }

        let mut data = data_from_json(&record.data)?;
        if from != current {
            let migrator = match self.migrators.get(name) {
                Some(m) if from < current => m.clone(),
                _ => {
                    return Err(EcsError::MigrationUnavailable {
                        component: name.to_owned(),
                        from,
                        to: current,
                    })
                }
            };
            data = migrator(data, from, current).map_err(|details| EcsError::MigrationFailed {
                component: name.to_owned(),
                from,
                to: current,
                details,
            })?;
            debug!(component = %name, from, to = current, "migrated component data");
        }

        let reg = self.lookup(name)?;
        let (schema, hooks) = (reg.schema.clone(), reg.hooks.clone());
        if let Some(schema) = &schema {
            data = schema.apply_defaults(&data);
        }
        self.ensure_valid(name, &data)?;
        Ok(Component::from_parts(name, current, data, schema, hooks))
    }

    /// [`deserialize`](Self::deserialize) from the JSON form of a record.
    pub fn deserialize_json(&mut self, json: &serde_json::Value) -> Result<Component, EcsError> {
        let record: ComponentRecord =
            serde_json::from_value(json.clone()).map_err(|e| EcsError::MalformedData {
                details: format!("invalid component record: {e}"),
            })?;
        self.deserialize(&record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
