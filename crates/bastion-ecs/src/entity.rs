//! Entity identifiers, type tags, id issuance and the [`Entity`] record.
//!
//! An [`EntityId`] packs a *type slot* in bits 48..63 and a *serial* in the
//! low 48 bits. The top bit is always clear, so every id is a positive `i64`
//! and can be stored in component data as a plain integer reference.
//!
//! Serials are issued per type by the [`IdIssuer`] from a strictly increasing
//! counter. Destroying an entity never rewinds the counter, so an id is never
//! handed out twice, even though the in-memory [`Entity`] object is recycled
//! through the manager's pools.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::value::Value;
use crate::EcsError;

/// Value written into reference fields whose target no longer exists.
pub const INVALID_REFERENCE: i64 = -1;

const SERIAL_BITS: u32 = 48;
const SERIAL_MASK: u64 = (1 << SERIAL_BITS) - 1;
/// Slots are limited to 15 bits to keep the sign bit clear.
const MAX_SLOTS: usize = 1 << 15;
/// Upper bound of the seeded starting offset for a type's serials.
const SEED_OFFSET_SPAN: u64 = 1 << 32;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Unique entity identifier.
///
/// Layout: `[0 | type slot: 15 bits | serial: 48 bits]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Construct an id from a type slot and serial. Out-of-range bits are
    /// masked off.
    #[inline]
    pub fn new(type_slot: u16, serial: u64) -> Self {
        let slot = u64::from(type_slot) & (MAX_SLOTS as u64 - 1);
        Self(slot << SERIAL_BITS | (serial & SERIAL_MASK))
    }

    #[inline]
    pub fn type_slot(self) -> u16 {
        (self.0 >> SERIAL_BITS) as u16
    }

    #[inline]
    pub fn serial(self) -> u64 {
        self.0 & SERIAL_MASK
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The integer stored in component data to refer to this entity.
    #[inline]
    pub fn as_reference(self) -> i64 {
        self.0 as i64
    }

    /// Interpret a reference field value. Only positive integers are ids.
    #[inline]
    pub fn from_reference(value: i64) -> Option<Self> {
        (value > 0).then(|| Self(value as u64))
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({}:{})", self.type_slot(), self.serial())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Int(id.as_reference())
    }
}

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// The type tag of an entity. Open-ended through [`EntityType::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
    Unit,
    Building,
    Projectile,
    Effect,
    District,
    Resource,
    Factory,
    Custom(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Unit => "Unit",
            EntityType::Building => "Building",
            EntityType::Projectile => "Projectile",
            EntityType::Effect => "Effect",
            EntityType::District => "District",
            EntityType::Resource => "Resource",
            EntityType::Factory => "Factory",
            EntityType::Custom(name) => name,
        }
    }
}

impl From<&str> for EntityType {
    fn from(tag: &str) -> Self {
        match tag {
            "Unit" => EntityType::Unit,
            "Building" => EntityType::Building,
            "Projectile" => EntityType::Projectile,
            "Effect" => EntityType::Effect,
            "District" => EntityType::District,
            "Resource" => EntityType::Resource,
            "Factory" => EntityType::Factory,
            other => EntityType::Custom(other.to_owned()),
        }
    }
}

impl From<String> for EntityType {
    fn from(tag: String) -> Self {
        EntityType::from(tag.as_str())
    }
}

impl From<EntityType> for String {
    fn from(ty: EntityType) -> Self {
        ty.as_str().to_owned()
    }
}

impl FromStr for EntityType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EntityType::from(s))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// IdIssuer
// ---------------------------------------------------------------------------

/// Issues ids from one monotonic counter per entity type.
///
/// Type slots are assigned in first-use order, so the same sequence of calls
/// yields the same ids. With a seed, each type's first serial is offset by a
/// value drawn from a PCG stream keyed on the seed and slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IssuerTables")]
pub struct IdIssuer {
    /// Slot index -> type tag.
    slots: Vec<EntityType>,
    /// Slot index -> next serial to hand out.
    next_serial: Vec<u64>,
    seed: Option<u64>,
}

impl IdIssuer {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            slots: Vec::new(),
            next_serial: Vec::new(),
            seed,
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// The slot assigned to `ty`, if it has issued any id yet.
    pub fn slot_of(&self, ty: &EntityType) -> Option<u16> {
        self.slots.iter().position(|t| t == ty).map(|i| i as u16)
    }

    pub fn type_of_slot(&self, slot: u16) -> Option<&EntityType> {
        self.slots.get(usize::from(slot))
    }

    /// The id the next call to [`issue`](Self::issue) would return for `ty`,
    /// if the type already has a slot.
    pub fn peek(&self, ty: &EntityType) -> Option<EntityId> {
        let slot = self.slot_of(ty)?;
        let serial = *self.next_serial.get(usize::from(slot))?;
        Some(EntityId::new(slot, serial))
    }

    /// Issue a fresh id for `ty`.
    ///
    /// # Errors
    ///
    /// [`EcsError::LimitReached`] when the slot table or the type's serial
    /// space is exhausted. Nothing is mutated in that case.
    pub fn issue(&mut self, ty: &EntityType) -> Result<EntityId, EcsError> {
        let slot = match self.slot_of(ty) {
            Some(slot) => usize::from(slot),
            None => {
                if self.slots.len() >= MAX_SLOTS {
                    return Err(EcsError::LimitReached {
                        scope: "entity type slots".to_owned(),
                        limit: MAX_SLOTS,
                    });
                }
                let slot = self.slots.len();
                self.slots.push(ty.clone());
                self.next_serial.push(self.first_serial(slot));
                slot
            }
        };
        let Some(counter) = self.next_serial.get_mut(slot) else {
            return Err(EcsError::MalformedData {
                details: format!("type slot {slot} has no serial counter"),
            });
        };
        let serial = *counter;
        if serial > SERIAL_MASK {
            return Err(EcsError::LimitReached {
                scope: format!("id space of type {ty}"),
                limit: SERIAL_MASK as usize,
            });
        }
        *counter = serial + 1;
        Ok(EntityId::new(slot as u16, serial))
    }

    /// Check that `id` was issued for `ty` and make sure the counter has
    /// moved past it. Used when rebuilding state from records.
    pub fn observe(&mut self, id: EntityId, ty: &EntityType) -> Result<(), EcsError> {
        let slot = usize::from(id.type_slot());
        match self.slots.get(slot) {
            Some(known) if known == ty => {
                let Some(counter) = self.next_serial.get_mut(slot) else {
                    return Err(EcsError::MalformedData {
                        details: format!("type slot {slot} has no serial counter"),
                    });
                };
                if *counter <= id.serial() {
                    *counter = id.serial() + 1;
                }
                Ok(())
            }
            Some(known) => Err(EcsError::MalformedData {
                details: format!("entity {id} is tagged {ty} but its id belongs to type {known}"),
            }),
            None => Err(EcsError::MalformedData {
                details: format!("entity {id} uses unknown type slot {slot}"),
            }),
        }
    }

    fn first_serial(&self, slot: usize) -> u64 {
        match self.seed {
            Some(seed) => {
                let mut rng = Pcg64::seed_from_u64(seed.wrapping_add(slot as u64));
                1 + rng.gen_range(0..SEED_OFFSET_SPAN)
            }
            None => 1,
        }
    }
}

/// Wire form of [`IdIssuer`], checked before it becomes one.
#[derive(Deserialize)]
struct IssuerTables {
    slots: Vec<EntityType>,
    next_serial: Vec<u64>,
    seed: Option<u64>,
}

impl TryFrom<IssuerTables> for IdIssuer {
    type Error = EcsError;

    fn try_from(tables: IssuerTables) -> Result<Self, Self::Error> {
        let malformed = |details: String| EcsError::MalformedData { details };
        if tables.slots.len() != tables.next_serial.len() {
            return Err(malformed(format!(
                "id issuer has {} type slots but {} serial counters",
                tables.slots.len(),
                tables.next_serial.len()
            )));
        }
        if tables.slots.len() > MAX_SLOTS {
            return Err(malformed(format!(
                "id issuer has {} type slots (max {MAX_SLOTS})",
                tables.slots.len()
            )));
        }
        for (slot, ty) in tables.slots.iter().enumerate() {
            if tables.slots[..slot].contains(ty) {
                return Err(malformed(format!("id issuer assigns type {ty} to two slots")));
            }
        }
        if let Some(&bad) = tables.next_serial.iter().find(|&&s| s == 0 || s > SERIAL_MASK + 1) {
            return Err(malformed(format!("id issuer counter {bad} is out of range")));
        }
        Ok(Self {
            slots: tables.slots,
            next_serial: tables.next_serial,
            seed: tables.seed,
        })
    }
}

impl Default for IdIssuer {
    fn default() -> Self {
        Self::new(None)
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// An identity plus the components it owns.
///
/// Entities are owned by the [`EntityManager`](crate::manager::EntityManager);
/// everything else refers to them by [`EntityId`]. Structural mutation goes
/// through the manager so its indices stay consistent.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    entity_type: EntityType,
    active: bool,
    spawned: bool,
    spawn_time: u64,
    despawn_time: u64,
    components: BTreeMap<String, Component>,
}

impl Entity {
    /// A blank, inactive entity suitable for pooling.
    pub(crate) fn vacant() -> Self {
        Self {
            id: EntityId::from_raw(0),
            entity_type: EntityType::Custom(String::new()),
            active: false,
            spawned: false,
            spawn_time: 0,
            despawn_time: 0,
            components: BTreeMap::new(),
        }
    }

    pub(crate) fn initialize(&mut self, id: EntityId, entity_type: EntityType) {
        self.id = id;
        self.entity_type = entity_type;
        self.active = true;
        self.spawned = false;
        self.spawn_time = 0;
        self.despawn_time = 0;
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_spawned(&self) -> bool {
        self.spawned
    }

    pub fn spawn_time(&self) -> u64 {
        self.spawn_time
    }

    pub fn despawn_time(&self) -> u64 {
        self.despawn_time
    }

    pub fn has_component(&self, type_name: &str) -> bool {
        self.components.contains_key(type_name)
    }

    pub fn component(&self, type_name: &str) -> Option<&Component> {
        self.components.get(type_name)
    }

    /// Attached component type names, sorted.
    pub fn component_types(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub(crate) fn component_mut(&mut self, type_name: &str) -> Option<&mut Component> {
        self.components.get_mut(type_name)
    }

    /// Attach a component. On failure the entity is left unchanged.
    pub(crate) fn add_component(&mut self, mut component: Component) -> Result<(), EcsError> {
        if self.components.contains_key(component.type_name()) {
            return Err(EcsError::DuplicateComponent {
                entity: self.id,
                component: component.type_name().to_owned(),
            });
        }
        if let Err(reasons) = component.self_check() {
            return Err(EcsError::ValidationFailed {
                component: component.type_name().to_owned(),
                reasons,
            });
        }
        component.attach(self.id);
        if self.spawned {
            component.run_spawn();
        }
        self.components
            .insert(component.type_name().to_owned(), component);
        Ok(())
    }

    pub(crate) fn remove_component(&mut self, type_name: &str) -> Option<Component> {
        let mut component = self.components.remove(type_name)?;
        component.detach();
        Some(component)
    }

    /// Start the spawn lifecycle. Returns `false` if already spawned.
    pub(crate) fn spawn(&mut self, now: u64) -> bool {
        if self.spawned {
            return false;
        }
        self.spawned = true;
        self.spawn_time = now;
        for component in self.components.values_mut() {
            component.run_spawn();
        }
        true
    }

    /// Pause the lifecycle without destroying. Returns `false` if not spawned.
    pub(crate) fn despawn(&mut self, now: u64) -> bool {
        if !self.spawned {
            return false;
        }
        self.spawned = false;
        self.despawn_time = now;
        for component in self.components.values_mut() {
            component.run_despawn();
        }
        true
    }

    /// Run update hooks; only spawned, active entities update.
    pub(crate) fn update(&mut self, dt: f64) {
        if !(self.active && self.spawned) {
            return;
        }
        for component in self.components.values_mut() {
            component.run_update(dt);
        }
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Detach everything and return to the blank pooled state.
    pub(crate) fn reset(&mut self) -> Vec<Component> {
        let detached = std::mem::take(&mut self.components)
            .into_values()
            .map(|mut c| {
                c.detach();
                c
            })
            .collect();
        *self = Self::vacant();
        detached
    }

    /// Restore lifecycle flags verbatim, without firing hooks.
    pub(crate) fn restore_lifecycle(
        &mut self,
        active: bool,
        spawned: bool,
        spawn_time: u64,
        despawn_time: u64,
    ) {
        self.active = active;
        self.spawned = spawned;
        self.spawn_time = spawn_time;
        self.despawn_time = despawn_time;
    }

    /// Attach a component without hooks or validation (snapshot restore).
    pub(crate) fn insert_restored(&mut self, mut component: Component) {
        component.set_owner_silently(self.id);
        self.components
            .insert(component.type_name().to_owned(), component);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentHooks;
    use crate::value::ComponentData;

    #[test]
    fn entity_id_packing_roundtrip() {
        let id = EntityId::new(3, 42);
        assert_eq!(id.type_slot(), 3);
        assert_eq!(id.serial(), 42);
        assert_eq!(EntityId::from_raw(id.to_raw()), id);
        assert!(id.as_reference() > 0);
        assert_eq!(EntityId::from_reference(id.as_reference()), Some(id));
    }

    #[test]
    fn non_positive_references_are_not_ids() {
        assert_eq!(EntityId::from_reference(INVALID_REFERENCE), None);
        assert_eq!(EntityId::from_reference(0), None);
    }

    #[test]
    fn largest_slot_keeps_ids_positive() {
        let id = EntityId::new(u16::MAX, SERIAL_MASK);
        assert!(id.as_reference() > 0);
    }

    #[test]
    fn entity_type_string_roundtrip() {
        for tag in ["Unit", "Factory", "Barricade"] {
            let ty = EntityType::from(tag);
            assert_eq!(ty.as_str(), tag);
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{tag}\""));
            assert_eq!(serde_json::from_str::<EntityType>(&json).unwrap(), ty);
        }
        assert_eq!(EntityType::from("Barricade"), EntityType::Custom("Barricade".into()));
    }

    #[test]
    fn issuer_counters_are_per_type_and_monotonic() {
        let mut issuer = IdIssuer::default();
        let u1 = issuer.issue(&EntityType::Unit).unwrap();
        let b1 = issuer.issue(&EntityType::Building).unwrap();
        let u2 = issuer.issue(&EntityType::Unit).unwrap();

        assert_eq!(u1.serial(), 1);
        assert_eq!(u2.serial(), 2);
        assert_eq!(b1.serial(), 1);
        assert_ne!(u1, b1, "same serial in different types must not collide");
        assert!(u2 > u1);
    }

    #[test]
    fn seeded_issuers_are_reproducible() {
        let mut a = IdIssuer::new(Some(99));
        let mut b = IdIssuer::new(Some(99));
        let mut c = IdIssuer::new(Some(100));
        let ids_a: Vec<_> = (0..5).map(|_| a.issue(&EntityType::Unit).unwrap()).collect();
        let ids_b: Vec<_> = (0..5).map(|_| b.issue(&EntityType::Unit).unwrap()).collect();
        let ids_c: Vec<_> = (0..5).map(|_| c.issue(&EntityType::Unit).unwrap()).collect();
        assert_eq!(ids_a, ids_b);
        assert_ne!(ids_a, ids_c);
        assert!(ids_a.windows(2).all(|w| w[1].serial() == w[0].serial() + 1));
    }

    #[test]
    fn observe_advances_counter_and_rejects_mismatched_slots() {
        let mut issuer = IdIssuer::default();
        let first = issuer.issue(&EntityType::Unit).unwrap();
        let foreign = EntityId::new(first.type_slot(), 50);
        issuer.observe(foreign, &EntityType::Unit).unwrap();
        assert_eq!(issuer.issue(&EntityType::Unit).unwrap().serial(), 51);

        assert!(issuer.observe(foreign, &EntityType::Building).is_err());
        assert!(issuer.observe(EntityId::new(9, 1), &EntityType::Unit).is_err());
    }

    #[test]
    fn issuer_json_roundtrip() {
        let mut issuer = IdIssuer::new(Some(5));
        issuer.issue(&EntityType::Unit).unwrap();
        issuer.issue(&EntityType::Effect).unwrap();
        let json = serde_json::to_value(&issuer).unwrap();
        assert_eq!(serde_json::from_value::<IdIssuer>(json).unwrap(), issuer);
    }

    #[test]
    fn inconsistent_issuer_tables_are_rejected() {
        let cases = [
            serde_json::json!({"slots": ["Unit"], "next_serial": [], "seed": null}),
            serde_json::json!({"slots": [], "next_serial": [4], "seed": null}),
            serde_json::json!({"slots": ["Unit", "Unit"], "next_serial": [1, 1], "seed": null}),
            serde_json::json!({"slots": ["Unit"], "next_serial": [0], "seed": null}),
        ];
        for json in cases {
            let err = serde_json::from_value::<IdIssuer>(json.clone()).unwrap_err();
            assert!(err.to_string().contains("id issuer"), "{json}: {err}");
        }
    }

    #[test]
    fn duplicate_component_is_rejected_and_original_kept() {
        let mut entity = Entity::vacant();
        entity.initialize(EntityId::new(0, 1), EntityType::Unit);

        let mut first = Component::new("Health", ComponentData::new());
        first.set("value", 10);
        entity.add_component(first).unwrap();

        let mut second = Component::new("Health", ComponentData::new());
        second.set("value", 99);
        let err = entity.add_component(second).unwrap_err();
        assert!(matches!(err, EcsError::DuplicateComponent { .. }));
        assert_eq!(
            entity.component("Health").unwrap().get("value"),
            Some(&Value::Int(10))
        );
    }

    #[test]
    fn spawn_and_despawn_run_hooks_once() {
        let hooks = ComponentHooks::new()
            .on_spawn(|data, _| {
                let n = data.get("spawns").and_then(Value::as_int).unwrap_or(0);
                data.insert("spawns".into(), Value::Int(n + 1));
            })
            .on_despawn(|data, _| {
                data.insert("despawned".into(), Value::Bool(true));
            });
        let mut entity = Entity::vacant();
        entity.initialize(EntityId::new(0, 1), EntityType::Unit);
        entity
            .add_component(Component::from_parts("Life", 1, ComponentData::new(), None, hooks))
            .unwrap();

        assert!(entity.spawn(100));
        assert!(!entity.spawn(200));
        assert_eq!(entity.spawn_time(), 100);
        assert_eq!(entity.component("Life").unwrap().get("spawns"), Some(&Value::Int(1)));

        assert!(entity.despawn(300));
        assert!(!entity.is_spawned());
        assert_eq!(entity.despawn_time(), 300);
        assert_eq!(
            entity.component("Life").unwrap().get("despawned"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn reset_detaches_and_blanks() {
        let mut entity = Entity::vacant();
        entity.initialize(EntityId::new(0, 1), EntityType::Unit);
        entity
            .add_component(Component::new("A", ComponentData::new()))
            .unwrap();
        entity.spawn(5);

        let detached = entity.reset();
        assert_eq!(detached.len(), 1);
        assert!(detached[0].owner().is_none());
        assert_eq!(entity.component_count(), 0);
        assert!(!entity.is_active());
        assert!(!entity.is_spawned());
    }
}
