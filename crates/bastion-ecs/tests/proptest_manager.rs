//! Property tests for the entity manager.
//!
//! Random sequences of create/add/remove/destroy/toggle operations are
//! applied to a manager and a simple shadow model; after every step the
//! indices must be consistent and queries must agree with the model.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use bastion_ecs::prelude::*;
use proptest::prelude::*;

const COMPONENTS: [&str; 3] = ["Position", "Velocity", "Armor"];
const TYPES: [&str; 3] = ["Unit", "Building", "Projectile"];

/// Operations we can perform on the manager.
#[derive(Debug, Clone)]
enum Op {
    Create(usize),
    Destroy(usize),
    Add(usize, usize),
    Remove(usize, usize),
    SetActive(usize, bool),
    Query(Vec<usize>),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..TYPES.len()).prop_map(Op::Create),
        (0..64usize).prop_map(Op::Destroy),
        (0..64usize, 0..COMPONENTS.len()).prop_map(|(e, c)| Op::Add(e, c)),
        (0..64usize, 0..COMPONENTS.len()).prop_map(|(e, c)| Op::Remove(e, c)),
        (0..64usize, proptest::bool::ANY).prop_map(|(e, a)| Op::SetActive(e, a)),
        prop::collection::vec(0..COMPONENTS.len(), 0..3).prop_map(Op::Query),
    ]
}

#[derive(Debug, Default)]
struct Shadow {
    active: bool,
    components: BTreeSet<&'static str>,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn random_ops_preserve_indices_and_query_semantics(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut manager = EntityManager::default();
        let mut alive: Vec<EntityId> = Vec::new();
        let mut model: BTreeMap<EntityId, Shadow> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Create(t) => {
                    let id = manager.create(TYPES[t]).unwrap();
                    prop_assert!(!model.contains_key(&id));
                    alive.push(id);
                    model.insert(id, Shadow { active: true, ..Default::default() });
                }
                Op::Destroy(i) if !alive.is_empty() => {
                    let id = alive.remove(i % alive.len());
                    prop_assert!(manager.destroy(id));
                    model.remove(&id);
                    prop_assert!(!manager.destroy(id));
                }
                Op::Add(i, c) if !alive.is_empty() => {
                    let id = alive[i % alive.len()];
                    let result = manager.add_component(id, Component::new(COMPONENTS[c], ComponentData::new()));
                    let shadow = model.get_mut(&id).unwrap();
                    if shadow.components.insert(COMPONENTS[c]) {
                        prop_assert!(result.is_ok());
                    } else {
                        let is_duplicate = matches!(result, Err(EcsError::DuplicateComponent { .. }));
                        prop_assert!(is_duplicate);
                    }
                }
                Op::Remove(i, c) if !alive.is_empty() => {
                    let id = alive[i % alive.len()];
                    let removed = manager.remove_component(id, COMPONENTS[c]);
                    let had = model.get_mut(&id).unwrap().components.remove(COMPONENTS[c]);
                    prop_assert_eq!(removed.is_some(), had);
                }
                Op::SetActive(i, active) if !alive.is_empty() => {
                    let id = alive[i % alive.len()];
                    prop_assert!(manager.set_active(id, active));
                    model.get_mut(&id).unwrap().active = active;
                }
                Op::Query(cs) => {
                    let names: Vec<&str> = cs.iter().map(|&c| COMPONENTS[c]).collect();
                    let expected: Vec<EntityId> = model
                        .iter()
                        .filter(|(_, s)| s.active && names.iter().all(|n| s.components.contains(n)))
                        .map(|(id, _)| *id)
                        .collect();
                    prop_assert_eq!(manager.query_all(&names), expected);
                }
                _ => {}
            }

            let problems = manager.verify_indices();
            prop_assert!(problems.is_empty(), "index problems: {:?}", problems);
            prop_assert_eq!(manager.len(), alive.len());
        }
    }

    /// Destroyed ids never come back, whatever the mix of types created
    /// afterwards.
    #[test]
    fn destroyed_ids_are_never_reissued(
        initial in 1..30usize,
        destroy_picks in prop::collection::vec(0..30usize, 1..15),
        later_types in prop::collection::vec(0..TYPES.len(), 1..40),
        seed in proptest::option::of(any::<u64>()),
    ) {
        let config = ManagerConfig { id_seed: seed, ..Default::default() };
        let mut manager = EntityManager::new(config);
        let mut alive: Vec<EntityId> = (0..initial)
            .map(|i| manager.create(TYPES[i % TYPES.len()]).unwrap())
            .collect();

        let mut destroyed = HashSet::new();
        for pick in destroy_picks {
            if alive.is_empty() {
                break;
            }
            let id = alive.remove(pick % alive.len());
            manager.destroy(id);
            destroyed.insert(id);
        }

        for t in later_types {
            let id = manager.create(TYPES[t]).unwrap();
            prop_assert!(!destroyed.contains(&id));
            prop_assert!(!alive.contains(&id));
            alive.push(id);
        }
    }

    /// The same seed and call sequence always produce the same ids.
    #[test]
    fn seeded_creation_is_reproducible(
        seed in any::<u64>(),
        types in prop::collection::vec(0..TYPES.len(), 1..30),
    ) {
        let run = |seed: u64| {
            let mut manager = EntityManager::new(ManagerConfig::default().with_seed(seed));
            types.iter().map(|&t| manager.create(TYPES[t]).unwrap()).collect::<Vec<_>>()
        };
        prop_assert_eq!(run(seed), run(seed));
    }

    /// `query_any` is the union of the single-component queries.
    #[test]
    fn query_any_is_union(assignments in prop::collection::vec(prop::collection::vec(proptest::bool::ANY, 3), 0..25)) {
        let mut manager = EntityManager::default();
        for flags in &assignments {
            let id = manager.create(EntityType::Unit).unwrap();
            for (c, &on) in flags.iter().enumerate() {
                if on {
                    manager.add_component(id, Component::new(COMPONENTS[c], ComponentData::new())).unwrap();
                }
            }
        }
        let union: BTreeSet<EntityId> = COMPONENTS[..2]
            .iter()
            .flat_map(|c| manager.query_all(&[*c]))
            .collect();
        prop_assert_eq!(manager.query_any(&COMPONENTS[..2]), union.into_iter().collect::<Vec<_>>());
    }
}
