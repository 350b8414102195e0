//! Cross-entity reference discovery and integrity tracking.
//!
//! Components refer to other entities by storing their id as a plain integer.
//! [`reference_slots`] finds those integers inside a component:
//!
//! - If the component's schema declares reference fields
//!   ([`FieldDef::entity_ref`](crate::schema::FieldDef::entity_ref) /
//!   [`FieldDef::entity_refs`](crate::schema::FieldDef::entity_refs)), only
//!   those fields are considered.
//! - Otherwise any field named `*_id` holding an integer, or `*_ids` holding
//!   a list of integers, is a reference. Nested maps and lists of maps are
//!   searched too.
//!
//! The [`ReferenceTracker`] keeps the reverse graph "who points at X" so a
//! destroyed entity's inbound references can be found without scanning the
//! world, and rewrites them to [`INVALID_REFERENCE`] when auto-clean is on.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::{debug, warn};

use crate::component::Component;
use crate::entity::{Entity, EntityId, INVALID_REFERENCE};
use crate::manager::EntityManager;
use crate::schema::ReferenceRole;
use crate::value::{ComponentData, Value};

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// One step into component data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a reference: component type plus the steps into its data.
///
/// Displays as `Type.field`, `Type.list_ids[2]` or `Type.outer.inner_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    pub component: String,
    pub segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_owned(),
            segments: Vec::new(),
        }
    }

    pub fn key(mut self, key: &str) -> Self {
        self.segments.push(PathSegment::Key(key.to_owned()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(PathSegment::Index(index));
        self
    }

    fn child(&self, segment: PathSegment) -> Self {
        let mut path = self.clone();
        path.segments.push(segment);
        path
    }

    /// The value this path points at inside `data`.
    pub fn resolve<'a>(&self, data: &'a ComponentData) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let PathSegment::Key(key) = first else {
            return None;
        };
        rest.iter().try_fold(data.get(key)?, |value, segment| match (segment, value) {
            (PathSegment::Key(k), Value::Map(map)) => map.get(k),
            (PathSegment::Index(i), Value::List(items)) => items.get(*i),
            _ => None,
        })
    }

    fn resolve_mut<'a>(&self, data: &'a mut ComponentData) -> Option<&'a mut Value> {
        let (first, rest) = self.segments.split_first()?;
        let PathSegment::Key(key) = first else {
            return None;
        };
        rest.iter()
            .try_fold(data.get_mut(key)?, |value, segment| match (segment, value) {
                (PathSegment::Key(k), Value::Map(map)) => map.get_mut(k),
                (PathSegment::Index(i), Value::List(items)) => items.get_mut(*i),
                _ => None,
            })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.component)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Key(k) => write!(f, ".{k}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// A reference-holding location found inside a component.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSlot {
    pub path: FieldPath,
    /// The raw integer stored there.
    pub raw: i64,
}

impl ReferenceSlot {
    /// The referenced entity, or `None` for the sentinel and other
    /// non-positive values.
    pub fn target(&self) -> Option<EntityId> {
        EntityId::from_reference(self.raw)
    }
}

/// Every reference slot in `component`, in deterministic order.
pub fn reference_slots(component: &Component) -> Vec<ReferenceSlot> {
    let root = FieldPath::new(component.type_name());
    let mut slots = Vec::new();
    match component.schema().filter(|s| s.declares_references()) {
        Some(schema) => {
            for field in schema.reference_fields() {
                let path = root.child(PathSegment::Key(field.name.clone()));
                match (field.reference, component.get(&field.name)) {
                    (ReferenceRole::Single, Some(Value::Int(raw))) => slots.push(ReferenceSlot { path, raw: *raw }),
                    (ReferenceRole::Many, Some(Value::List(items))) => collect_list(&path, items, &mut slots),
                    _ => {}
                }
            }
        }
        None => collect_by_convention(&root, component.data(), &mut slots),
    }
    slots
}

fn collect_list(path: &FieldPath, items: &[Value], slots: &mut Vec<ReferenceSlot>) {
    for (i, item) in items.iter().enumerate() {
        if let Value::Int(raw) = item {
            slots.push(ReferenceSlot {
                path: path.child(PathSegment::Index(i)),
                raw: *raw,
            });
        }
    }
}

fn collect_by_convention(path: &FieldPath, map: &ComponentData, slots: &mut Vec<ReferenceSlot>) {
    for (key, value) in map {
        let here = path.child(PathSegment::Key(key.clone()));
        match value {
            Value::Int(raw) if key.ends_with("_id") => slots.push(ReferenceSlot {
                path: here,
                raw: *raw,
            }),
            Value::List(items) if key.ends_with("_ids") => collect_list(&here, items, slots),
            Value::Map(inner) => collect_by_convention(&here, inner, slots),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if let Value::Map(inner) = item {
                        collect_by_convention(&here.child(PathSegment::Index(i)), inner, slots);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Every reference slot across all of an entity's components.
pub fn entity_reference_slots(entity: &Entity) -> Vec<ReferenceSlot> {
    entity.components().flat_map(reference_slots).collect()
}

/// Overwrite the reference at `path` on entity `source` with the sentinel,
/// but only if it still holds `expected`. Returns whether a write happened.
pub(crate) fn invalidate_slot(
    manager: &mut EntityManager,
    source: EntityId,
    path: &FieldPath,
    expected: EntityId,
) -> bool {
    let Some(component) = manager.component_mut(source, &path.component) else {
        return false;
    };
    match path.resolve_mut(component.data_mut()) {
        Some(value) if *value == Value::Int(expected.as_reference()) => {
            *value = Value::Int(INVALID_REFERENCE);
            true
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// ReferenceTracker
// ---------------------------------------------------------------------------

/// A recorded reference from a field of `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReferenceEdge {
    pub source: EntityId,
    pub path: FieldPath,
    pub target: EntityId,
}

/// Observable outcome of reference maintenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceEvent {
    /// `target` was destroyed while `source` still pointed at it.
    DanglingDetected {
        source: EntityId,
        path: FieldPath,
        target: EntityId,
    },
    /// The field was rewritten to [`INVALID_REFERENCE`].
    Cleaned {
        source: EntityId,
        path: FieldPath,
        target: EntityId,
    },
}

/// Reverse index of entity references with event-driven cleanup.
#[derive(Debug)]
pub struct ReferenceTracker {
    /// target -> (source, path)
    inbound: HashMap<EntityId, BTreeSet<(EntityId, FieldPath)>>,
    /// source -> (path, target)
    outbound: HashMap<EntityId, BTreeSet<(FieldPath, EntityId)>>,
    auto_clean: bool,
    events: Vec<ReferenceEvent>,
}

impl Default for ReferenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceTracker {
    pub fn new() -> Self {
        Self {
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            auto_clean: true,
            events: Vec::new(),
        }
    }

    pub fn auto_clean(&self) -> bool {
        self.auto_clean
    }

    pub fn set_auto_clean(&mut self, enabled: bool) {
        self.auto_clean = enabled;
    }

    /// Record an edge. Returns `false` if it was already known.
    pub fn register_reference(&mut self, source: EntityId, target: EntityId, path: FieldPath) -> bool {
        let added = self
            .inbound
            .entry(target)
            .or_default()
            .insert((source, path.clone()));
        if added {
            self.outbound.entry(source).or_default().insert((path, target));
        }
        added
    }

    pub fn unregister_reference(&mut self, source: EntityId, target: EntityId, path: &FieldPath) -> bool {
        let key = (source, path.clone());
        let removed = remove_from(&mut self.inbound, &target, &key);
        if removed {
            remove_from(&mut self.outbound, &source, &(path.clone(), target));
        }
        removed
    }

    /// Drop every edge originating at `source`. Returns how many were removed.
    pub fn unregister_all_from(&mut self, source: EntityId) -> usize {
        let Some(edges) = self.outbound.remove(&source) else {
            return 0;
        };
        for (path, target) in &edges {
            remove_from(&mut self.inbound, target, &(source, path.clone()));
        }
        edges.len()
    }

    /// Replace the edges originating at `entity` with the references its
    /// components currently hold. Returns the number of edges registered.
    pub fn scan_entity(&mut self, entity: &Entity) -> usize {
        let source = entity.id();
        self.unregister_all_from(source);
        let mut registered = 0;
        for slot in entity_reference_slots(entity) {
            if let Some(target) = slot.target() {
                if self.register_reference(source, target, slot.path) {
                    registered += 1;
                }
            }
        }
        registered
    }

    /// Rebuild the whole graph from the manager's current contents.
    pub fn rescan(&mut self, manager: &EntityManager) -> usize {
        self.inbound.clear();
        self.outbound.clear();
        manager
            .ids()
            .into_iter()
            .filter_map(|id| manager.get(id))
            .map(|entity| self.scan_entity(entity))
            .sum()
    }

    /// Handle the destruction of `target`: report and optionally clean every
    /// inbound reference, then forget all edges touching it.
    ///
    /// Call before the manager destroys the entity. Returns the number of
    /// inbound references that were found.
    pub fn on_entity_destroyed(&mut self, target: EntityId, manager: &mut EntityManager) -> usize {
        self.unregister_all_from(target);
        let Some(inbound) = self.inbound.remove(&target) else {
            return 0;
        };
        for (source, path) in &inbound {
            remove_from(&mut self.outbound, source, &(path.clone(), target));
            warn!(entity = %target, source = %source, field = %path, "dangling reference detected");
            self.events.push(ReferenceEvent::DanglingDetected {
                source: *source,
                path: path.clone(),
                target,
            });
            if self.auto_clean && invalidate_slot(manager, *source, path, target) {
                debug!(entity = %target, source = %source, field = %path, "dangling reference cleaned");
                self.events.push(ReferenceEvent::Cleaned {
                    source: *source,
                    path: path.clone(),
                    target,
                });
            }
        }
        inbound.len()
    }

    /// Entities with at least one reference to `target`, ascending.
    pub fn get_referencing_entities(&self, target: EntityId) -> Vec<EntityId> {
        let sources: BTreeSet<EntityId> = self
            .inbound
            .get(&target)
            .into_iter()
            .flatten()
            .map(|(source, _)| *source)
            .collect();
        sources.into_iter().collect()
    }

    /// Every edge pointing at `target`.
    pub fn references_to(&self, target: EntityId) -> Vec<ReferenceEdge> {
        self.inbound
            .get(&target)
            .into_iter()
            .flatten()
            .map(|(source, path)| ReferenceEdge {
                source: *source,
                path: path.clone(),
                target,
            })
            .collect()
    }

    pub fn is_referenced(&self, target: EntityId) -> bool {
        self.inbound.get(&target).is_some_and(|set| !set.is_empty())
    }

    pub fn edge_count(&self) -> usize {
        self.inbound.values().map(BTreeSet::len).sum()
    }

    pub fn events(&self) -> &[ReferenceEvent] {
        &self.events
    }

    /// Take the accumulated events, oldest first.
    pub fn drain_events(&mut self) -> Vec<ReferenceEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn clear(&mut self) {
        self.inbound.clear();
        self.outbound.clear();
        self.events.clear();
    }
}

fn remove_from<K, V>(index: &mut HashMap<K, BTreeSet<V>>, key: &K, value: &V) -> bool
where
    K: std::hash::Hash + Eq,
    V: Ord,
{
    let Some(set) = index.get_mut(key) else {
        return false;
    };
    let removed = set.remove(value);
    if set.is_empty() {
        index.remove(key);
    }
    removed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentHooks;
    use crate::entity::EntityType;
    use crate::schema::{ComponentSchema, FieldDef};
    use crate::value::{data_from_json, ValueKind};
    use serde_json::json;
    use std::sync::Arc;

    fn component(name: &str, json: serde_json::Value) -> Component {
        Component::new(name, data_from_json(&json).unwrap())
    }

    #[test]
    fn convention_finds_nested_and_list_references() {
        let c = component(
            "Orders",
            json!({
                "target_id": 5,
                "escort_ids": [6, -1, 7],
                "route": {"waypoint_id": 8},
                "squads": [{"leader_id": 9}],
                "count": 3,
                "identity": 4
            }),
        );
        let found: Vec<(String, i64)> = reference_slots(&c)
            .into_iter()
            .map(|s| (s.path.to_string(), s.raw))
            .collect();
        assert_eq!(
            found,
            vec![
                ("Orders.escort_ids[0]".to_owned(), 6),
                ("Orders.escort_ids[1]".to_owned(), -1),
                ("Orders.escort_ids[2]".to_owned(), 7),
                ("Orders.route.waypoint_id".to_owned(), 8),
                ("Orders.squads[0].leader_id".to_owned(), 9),
                ("Orders.target_id".to_owned(), 5),
            ]
        );
    }

    #[test]
    fn declared_references_override_convention() {
        let schema = ComponentSchema::new("Link")
            .with_field(FieldDef::entity_ref("anchor"))
            .with_field(FieldDef::optional("legacy_id", ValueKind::Int, 0));
        let c = Component::from_parts(
            "Link",
            1,
            data_from_json(&json!({"anchor": 11, "legacy_id": 12})).unwrap(),
            Some(Arc::new(schema)),
            ComponentHooks::new(),
        );
        let slots = reference_slots(&c);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].path.to_string(), "Link.anchor");
        assert_eq!(slots[0].target(), EntityId::from_reference(11));
    }

    #[test]
    fn register_is_idempotent() {
        let mut t = ReferenceTracker::new();
        let (a, b) = (EntityId::new(0, 1), EntityId::new(0, 2));
        let path = FieldPath::new("Attack").key("target_id");
        assert!(t.register_reference(a, b, path.clone()));
        assert!(!t.register_reference(a, b, path.clone()));
        assert_eq!(t.edge_count(), 1);
        assert!(t.unregister_reference(a, b, &path));
        assert!(!t.is_referenced(b));
    }

    fn scenario() -> (EntityManager, ReferenceTracker, EntityId, EntityId, EntityId) {
        let mut m = EntityManager::default();
        let a = m.create(EntityType::Unit).unwrap();
        let b = m.create(EntityType::Unit).unwrap();
        let c = m.create(EntityType::Unit).unwrap();
        m.add_component(
            a,
            component("Attack", json!({"target_id": b.as_reference(), "ally_ids": [c.as_reference(), b.as_reference()]})),
        )
        .unwrap();
        m.add_component(c, component("Follow", json!({"leader_id": a.as_reference()})))
            .unwrap();
        let mut t = ReferenceTracker::new();
        assert_eq!(t.rescan(&m), 4);
        (m, t, a, b, c)
    }

    #[test]
    fn destroy_cleans_inbound_references() {
        let (mut m, mut t, a, b, c) = scenario();
        assert_eq!(t.get_referencing_entities(b), vec![a]);

        assert_eq!(t.on_entity_destroyed(b, &mut m), 2);
        m.destroy(b);

        let attack = m.component(a, "Attack").unwrap();
        assert_eq!(attack.get("target_id"), Some(&Value::Int(INVALID_REFERENCE)));
        assert_eq!(
            attack.get("ally_ids"),
            Some(&Value::List(vec![Value::Int(c.as_reference()), Value::Int(INVALID_REFERENCE)]))
        );
        assert!(!t.is_referenced(b));
        assert!(t.is_referenced(c), "unrelated edges survive");

        let events = t.drain_events();
        let cleaned = events
            .iter()
            .filter(|e| matches!(e, ReferenceEvent::Cleaned { .. }))
            .count();
        assert_eq!(cleaned, 2);
        assert!(t.events().is_empty());
    }

    #[test]
    fn destroy_without_auto_clean_only_reports() {
        let (mut m, mut t, a, b, _) = scenario();
        t.set_auto_clean(false);
        t.on_entity_destroyed(b, &mut m);
        assert_eq!(
            m.component(a, "Attack").unwrap().get("target_id"),
            Some(&Value::Int(b.as_reference()))
        );
        assert!(t
            .drain_events()
            .iter()
            .all(|e| matches!(e, ReferenceEvent::DanglingDetected { .. })));
    }

    #[test]
    fn destroyed_source_drops_outbound_edges() {
        let (mut m, mut t, a, b, c) = scenario();
        t.on_entity_destroyed(a, &mut m);
        assert!(!t.is_referenced(b));
        assert_eq!(
            m.component(c, "Follow").unwrap().get("leader_id"),
            Some(&Value::Int(INVALID_REFERENCE))
        );
    }

    #[test]
    fn rescan_replaces_stale_edges() {
        let (mut m, mut t, a, b, _) = scenario();
        m.component_mut(a, "Attack")
            .unwrap()
            .set("target_id", INVALID_REFERENCE);
        t.scan_entity(m.get(a).unwrap());
        assert_eq!(t.references_to(b).len(), 1);
        assert_eq!(t.references_to(b)[0].path.to_string(), "Attack.ally_ids[1]");
    }

    #[test]
    fn path_resolution() {
        let data = data_from_json(&json!({"a": {"b": [1, {"c_id": 4}]}})).unwrap();
        let path = FieldPath::new("X").key("a").key("b").index(1).key("c_id");
        assert_eq!(path.resolve(&data), Some(&Value::Int(4)));
        assert_eq!(FieldPath::new("X").key("missing").resolve(&data), None);
    }
}
