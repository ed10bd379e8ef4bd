//! The `World` container: entity lifecycle plus component stores.

use crate::components::{Player, Replicated, RigidBody, Transform};
use crate::entity::{Entity, EntityAllocator};
use std::collections::HashMap;

/// Default fixed simulation step (seconds). Hosts running a different sim
/// rate set [`World::fixed_delta`] explicitly.
pub const DEFAULT_FIXED_DELTA: f32 = 1.0 / 60.0;

/// Dense-enough storage for one component type keyed by entity.
#[derive(Debug)]
pub struct ComponentStore<T> {
    items: HashMap<Entity, T>,
}

impl<T> ComponentStore<T> {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    /// Insert or replace; returns the previous value if any.
    pub fn insert(&mut self, entity: Entity, value: T) -> Option<T> {
        self.items.insert(entity, value)
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.items.get(&entity)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.items.get_mut(&entity)
    }

    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        self.items.remove(&entity)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.items.contains_key(&entity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.items.iter().map(|(entity, value)| (*entity, value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.items.iter_mut().map(|(entity, value)| (*entity, value))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Entity registry with the replicated component set and the fixed
/// simulation step the server tick derives from.
pub struct World {
    entities: EntityAllocator,
    pub transforms: ComponentStore<Transform>,
    pub rigid_bodies: ComponentStore<RigidBody>,
    pub players: ComponentStore<Player>,
    pub replicated: ComponentStore<Replicated>,
    pub fixed_delta: f32,
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: EntityAllocator::default(),
            transforms: ComponentStore::new(),
            rigid_bodies: ComponentStore::new(),
            players: ComponentStore::new(),
            replicated: ComponentStore::new(),
            fixed_delta: DEFAULT_FIXED_DELTA,
        }
    }

    pub fn spawn(&mut self) -> Entity {
        self.entities.spawn()
    }

    /// Despawn the entity and drop all of its components.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.entities.despawn(entity) {
            log::debug!("despawn of dead entity {entity:?} ignored");
            return false;
        }
        self.transforms.remove(entity);
        self.rigid_bodies.remove(entity);
        self.players.remove(entity);
        self.replicated.remove(entity);
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.alive_count()
    }

    /// Entities carrying both the replication marker and a transform — the
    /// set captured into world snapshots.
    pub fn replicated_entities(&self) -> impl Iterator<Item = (Entity, &Replicated, &Transform)> {
        self.replicated.iter().filter_map(|(entity, replicated)| {
            self.transforms
                .get(entity)
                .map(|transform| (entity, replicated, transform))
        })
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
