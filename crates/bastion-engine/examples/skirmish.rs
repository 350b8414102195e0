//! Headless skirmish -- archers shoot a gate until it falls, then the world
//! is saved and restored.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example skirmish -p bastion-engine

use std::time::Duration;

use anyhow::Context;
use bastion_engine::prelude::*;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn register_types(world: &mut World) -> anyhow::Result<()> {
    world.register_component_type(ComponentType::from_schema(
        ComponentSchema::new("Health")
            .with_field(FieldDef::required("value", ValueKind::Float).with_range(0.0, 1000.0)),
    ))?;
    world.register_component_type(ComponentType::from_schema(
        ComponentSchema::new("Ranged")
            .with_field(FieldDef::entity_ref("target"))
            .with_field(FieldDef::optional("damage", ValueKind::Float, 12.5))
            .with_field(FieldDef::optional("cooldown", ValueKind::Float, 0.0)),
    ))?;
    Ok(())
}

fn volley_system() -> FnSystem<impl Fn(EntityId, &mut SystemContext<'_>, f64)> {
    FnSystem::new("volley", &["Ranged"], |id, ctx, dt| {
        let Some(ranged) = ctx.component_mut(id, "Ranged") else {
            return;
        };
        let cooldown = ranged.get("cooldown").and_then(Value::as_float).unwrap_or(0.0) - dt;
        if cooldown > 0.0 {
            ranged.set("cooldown", cooldown);
            return;
        }
        ranged.set("cooldown", 0.5);
        let damage = ranged.get("damage").and_then(Value::as_float).unwrap_or(0.0);
        let Some(target) = ranged
            .get("target")
            .and_then(Value::as_int)
            .and_then(EntityId::from_reference)
        else {
            return;
        };

        if let Some(health) = ctx.component_mut(target, "Health") {
            let hp = health.get("value").and_then(Value::as_float).unwrap_or(0.0);
            let left = (hp - damage).max(0.0);
            health.set("value", left);
            if left == 0.0 {
                ctx.queue_destroy(target);
            }
        }
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WorldConfig::from_json_str(r#"{"fixed_dt": 0.1, "manager": {"id_seed": 1308}}"#)?;
    let mut world = World::new(config)?;
    register_types(&mut world)?;
    world.register_system(
        volley_system(),
        SystemSettings::default()
            .fixed()
            .with_budget(Duration::from_millis(2)),
    )?;

    let gate = world.create_entity(EntityType::Building)?;
    world.attach(gate, "Health", data_from_json(&json!({"value": 200.0}))?)?;
    world.spawn(gate);

    for _ in 0..3 {
        let archer = world.create_entity(EntityType::Unit)?;
        world.attach(
            archer,
            "Ranged",
            data_from_json(&json!({"target": gate.as_reference()}))?,
        )?;
        world.spawn(archer);
    }
    info!(
        archers = world.query(&["Ranged"]).len(),
        gate = %gate,
        "skirmish ready"
    );

    while world.contains(gate) {
        world.fixed_tick();
        if world.fixed_tick_count() > 1_000 {
            anyhow::bail!("gate never fell");
        }
    }
    info!(ticks = world.fixed_tick_count(), "gate destroyed");

    for event in world.drain_reference_events() {
        info!(?event, "reference event");
    }
    anyhow::ensure!(
        world.find_dangling_references().is_empty(),
        "dangling references survived cleanup"
    );

    let blob = world.serialize_world()?;
    let hash = world.state_hash()?;

    let mut restored = World::new(world.config().clone())?;
    register_types(&mut restored)?;
    restored
        .deserialize_world(&blob)
        .context("failed to restore the skirmish")?;
    anyhow::ensure!(restored.state_hash()? == hash, "restored state differs");

    info!(bytes = blob.len(), %hash, "saved and restored");
    Ok(())
}
