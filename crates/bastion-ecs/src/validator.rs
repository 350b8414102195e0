//! Structural checks and reference-integrity audits.
//!
//! The validator re-derives broken references from the data itself rather
//! than trusting the [`ReferenceTracker`]'s edges. It is the periodic audit
//! that catches anything the tracker's event-driven cleanup missed, for
//! example references written directly into component data after the last
//! scan.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::entity::{Entity, EntityId};
use crate::manager::EntityManager;
use crate::references::{entity_reference_slots, invalidate_slot, FieldPath, ReferenceTracker};

/// Top-level fields of a raw entity record and the JSON kind each must have.
const RAW_FIELDS: &[(&str, RawKind, bool)] = &[
    ("id", RawKind::UnsignedInt, true),
    ("type_tag", RawKind::String, true),
    ("active", RawKind::Bool, false),
    ("spawned", RawKind::Bool, false),
    ("spawn_time", RawKind::UnsignedInt, false),
    ("despawn_time", RawKind::UnsignedInt, false),
];

#[derive(Debug, Clone, Copy)]
enum RawKind {
    UnsignedInt,
    String,
    Bool,
}

impl RawKind {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            RawKind::UnsignedInt => value.is_u64(),
            RawKind::String => value.is_string(),
            RawKind::Bool => value.is_boolean(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            RawKind::UnsignedInt => "non-negative integer",
            RawKind::String => "string",
            RawKind::Bool => "bool",
        }
    }
}

/// Dangling references of one entity: field path -> missing target.
pub type DanglingMap = BTreeMap<FieldPath, EntityId>;

/// Accumulates validation errors; audits and repairs dangling references.
#[derive(Debug, Default)]
pub struct EntityValidator {
    errors: Vec<String>,
}

impl EntityValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors collected by the most recent `validate_*` call.
    pub fn last_errors(&self) -> &[String] {
        &self.errors
    }

    /// Check a live entity: a real id, a non-empty type tag, and components
    /// that pass their own self-check and point back at this entity.
    pub fn validate_entity(&mut self, entity: &Entity) -> bool {
        self.errors.clear();
        let id = entity.id();
        if id.serial() == 0 {
            self.errors.push(format!("entity {id}: id has no serial"));
        }
        if entity.entity_type().as_str().is_empty() {
            self.errors.push(format!("entity {id}: type tag is empty"));
        }
        for component in entity.components() {
            if let Err(reasons) = component.self_check() {
                self.errors
                    .extend(reasons.into_iter().map(|r| format!("entity {id}: {r}")));
            }
            if component.owner() != Some(id) {
                self.errors.push(format!(
                    "entity {id}: component {} is not owned by this entity",
                    component.type_name()
                ));
            }
        }
        self.errors.is_empty()
    }

    /// Check the shape of a serialized entity before building anything
    /// from it.
    ///
    /// `id` and `type_tag` are required; the lifecycle fields are optional
    /// but must have the right kind when present. A `components` entry must
    /// be an object mapping type names to component records, and each
    /// record's embedded `type` (when present) must match its key.
    pub fn validate_raw(&mut self, raw: &serde_json::Value) -> bool {
        self.errors.clear();
        let Some(object) = raw.as_object() else {
            self.errors.push("entity record is not an object".to_owned());
            return false;
        };
        for &(field, kind, required) in RAW_FIELDS {
            match object.get(field) {
                None if required => self.errors.push(format!("missing required field '{field}'")),
                None => {}
                Some(value) if !kind.matches(value) => self
                    .errors
                    .push(format!("field '{field}' must be a {}", kind.name())),
                Some(_) => {}
            }
        }
        if object
            .get("type_tag")
            .and_then(serde_json::Value::as_str)
            .is_some_and(str::is_empty)
        {
            self.errors.push("field 'type_tag' is empty".to_owned());
        }
        match object.get("components") {
            None => {}
            Some(serde_json::Value::Object(components)) => {
                for (name, record) in components {
                    self.check_raw_component(name, record);
                }
            }
            Some(_) => self
                .errors
                .push("field 'components' must map type names to component data".to_owned()),
        }
        self.errors.is_empty()
    }

    fn check_raw_component(&mut self, name: &str, record: &serde_json::Value) {
        if name.is_empty() {
            self.errors.push("component with empty type name".to_owned());
        }
        let Some(record) = record.as_object() else {
            self.errors.push(format!("component '{name}' is not an object"));
            return;
        };
        if let Some(embedded) = record.get("type") {
            if embedded.as_str() != Some(name) {
                self.errors
                    .push(format!("component '{name}' embeds mismatched type {embedded}"));
            }
        }
        if record.get("version").is_some_and(|v| !v.is_u64()) {
            self.errors
                .push(format!("component '{name}' version must be a non-negative integer"));
        }
        if record.get("data").is_some_and(|d| !d.is_object()) {
            self.errors.push(format!("component '{name}' data must be an object"));
        }
    }

    // -- reference audits -----------------------------------------------------

    /// References held by `entity` whose target no longer exists.
    pub fn find_dangling_references(&self, entity: &Entity, manager: &EntityManager) -> DanglingMap {
        entity_reference_slots(entity)
            .into_iter()
            .filter_map(|slot| {
                let target = slot.target()?;
                (!manager.contains(target)).then_some((slot.path, target))
            })
            .collect()
    }

    /// Dangling references across the whole manager, keyed by source entity.
    /// Entities without any are omitted.
    pub fn find_all_dangling_references(&self, manager: &EntityManager) -> BTreeMap<EntityId, DanglingMap> {
        manager
            .ids()
            .into_iter()
            .filter_map(|id| {
                let entity = manager.get(id)?;
                let dangling = self.find_dangling_references(entity, manager);
                (!dangling.is_empty()).then_some((id, dangling))
            })
            .collect()
    }

    /// Rewrite every dangling reference of `id` to the sentinel and drop the
    /// matching tracker edges. Returns the number of fields rewritten.
    pub fn clean_dangling_references(
        &self,
        id: EntityId,
        manager: &mut EntityManager,
        tracker: &mut ReferenceTracker,
    ) -> usize {
        let Some(entity) = manager.get(id) else {
            return 0;
        };
        let dangling = self.find_dangling_references(entity, manager);
        let mut cleaned = 0;
        for (path, target) in dangling {
            if invalidate_slot(manager, id, &path, target) {
                warn!(source = %id, entity = %target, field = %path, "cleaned dangling reference");
                tracker.unregister_reference(id, target, &path);
                cleaned += 1;
            }
        }
        cleaned
    }

    /// [`clean_dangling_references`](Self::clean_dangling_references) for
    /// every entity. Returns the total number of fields rewritten.
    pub fn clean_all(&self, manager: &mut EntityManager, tracker: &mut ReferenceTracker) -> usize {
        let sources: Vec<EntityId> = self.find_all_dangling_references(manager).into_keys().collect();
        let cleaned = sources
            .into_iter()
            .map(|id| self.clean_dangling_references(id, manager, tracker))
            .sum();
        debug!(cleaned, "dangling reference audit complete");
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
