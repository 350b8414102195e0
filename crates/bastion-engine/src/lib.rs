//! Bastion Engine -- system scheduling and the world facade on top of
//! [`bastion_ecs`].
//!
//! Systems are registered with a priority, an optional time budget and a
//! phase, and run over every active entity that has their required
//! components. The [`World`](world::World) ties entities, registry,
//! scheduler and reference tracking together and serializes the whole state
//! to a hashed JSON snapshot.
//!
//! # Quick Start
//!
//! ```
//! use bastion_engine::prelude::*;
//! use serde_json::json;
//!
//! let mut world = World::default();
//! world
//!     .register_system(
//!         FnSystem::new("decay", &["Health"], |id, ctx, dt| {
//!             if let Some(health) = ctx.component_mut(id, "Health") {
//!                 let hp = health.get("value").and_then(Value::as_float).unwrap_or(0.0);
//!                 health.set("value", hp - 10.0 * dt);
//!             }
//!         }),
//!         SystemSettings::default(),
//!     )
//!     .unwrap();
//!
//! let health = Component::new("Health", data_from_json(&json!({"value": 100.0})).unwrap());
//! let unit = world.spawn_entity(EntityType::Unit, [health]).unwrap();
//!
//! for _ in 0..10 {
//!     world.tick(0.1);
//! }
//! let hp = world.component(unit, "Health").unwrap().get("value").and_then(Value::as_float);
//! assert!((hp.unwrap() - 90.0).abs() < 1e-9);
//! assert_eq!(world.tick_count(), 10);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod scheduler;
pub mod snapshot;
pub mod system;
pub mod world;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use bastion_ecs;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use bastion_ecs::prelude::*;

    pub use crate::config::{ConfigError, WorldConfig};
    pub use crate::scheduler::{
        BudgetExceeded, ScheduleError, SystemManager, SystemStats, TickDiagnostics,
    };
    pub use crate::snapshot::WorldSnapshot;
    pub use crate::system::{FnSystem, Phase, System, SystemContext, SystemSettings};
    pub use crate::world::World;
}
