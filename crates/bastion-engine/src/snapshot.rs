//! Whole-world snapshots with BLAKE3 integrity hashes.
//!
//! A [`WorldSnapshot`] holds the id issuer, the entity clock, the tick count
//! and every entity record, plus a BLAKE3 hex digest over the canonical JSON
//! of those fields. The digest doubles as a state fingerprint: two worlds
//! that evolved identically produce identical hashes.
//!
//! # What Is NOT Serialized
//!
//! - **Component types and migrators** -- the restoring world must have them
//!   registered; records are rebuilt through its registry.
//! - **Systems** -- closures are not serializable and stay registered on the
//!   world being restored.
//! - **Reference edges** -- rebuilt by rescanning after restore.
//! - **Diagnostics and pending events** -- transient.

use serde::{Deserialize, Serialize};

use bastion_ecs::entity::IdIssuer;
use bastion_ecs::snapshot::{EntityRecord, ManagerSnapshot};

/// A serializable snapshot of a [`World`](crate::world::World).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub issuer: IdIssuer,
    /// Entity clock in milliseconds.
    pub clock: u64,
    pub tick_count: u64,
    pub fixed_tick_count: u64,
    pub entities: Vec<EntityRecord>,
    /// BLAKE3 hex digest (64 lowercase hex chars) of the other fields.
    pub hash: String,
}

#[derive(Serialize)]
struct HashableState<'a> {
    issuer: &'a IdIssuer,
    clock: u64,
    tick_count: u64,
    fixed_tick_count: u64,
    entities: &'a [EntityRecord],
}

impl WorldSnapshot {
    pub(crate) fn new(
        manager: ManagerSnapshot,
        tick_count: u64,
        fixed_tick_count: u64,
    ) -> Result<Self, serde_json::Error> {
        let hash = compute_hash(&manager.issuer, manager.clock, tick_count, fixed_tick_count, &manager.entities)?;
        Ok(Self {
            issuer: manager.issuer,
            clock: manager.clock,
            tick_count,
            fixed_tick_count,
            entities: manager.entities,
            hash,
        })
    }

    /// Recompute the digest from the snapshot's contents.
    pub fn recompute_hash(&self) -> Result<String, serde_json::Error> {
        compute_hash(
            &self.issuer,
            self.clock,
            self.tick_count,
            self.fixed_tick_count,
            &self.entities,
        )
    }

    /// Whether the recorded hash matches the contents.
    pub fn verify(&self) -> bool {
        self.recompute_hash().is_ok_and(|h| h == self.hash)
    }

    pub(crate) fn manager_snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            issuer: self.issuer.clone(),
            clock: self.clock,
            entities: self.entities.clone(),
        }
    }
}

fn compute_hash(
    issuer: &IdIssuer,
    clock: u64,
    tick_count: u64,
    fixed_tick_count: u64,
    entities: &[EntityRecord],
) -> Result<String, serde_json::Error> {
    let json_bytes = serde_json::to_vec(&HashableState {
        issuer,
        clock,
        tick_count,
        fixed_tick_count,
        entities,
    })?;
    Ok(blake3::hash(&json_bytes).to_hex().to_string())
}
