//! World snapshots, per-client history rings, and delta generation.

use crate::protocol::{ComponentFlags, EntityUpdate};
use glam::Vec3;
use std::collections::HashMap;

/// Distance under which two snapshots of a component count as identical.
pub const IDENTITY_EPSILON: f32 = 0.001;
/// Change threshold for setting a delta flag.
pub const DELTA_EPSILON: f32 = 0.01;

/// Replicated state of one entity at a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentSnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
    pub grounded: bool,
    pub ground_normal: Vec3,
}

impl Default for ComponentSnapshot {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            grounded: false,
            ground_normal: Vec3::Y,
        }
    }
}

impl ComponentSnapshot {
    /// Equality under [`IDENTITY_EPSILON`]; ground normal is advisory and
    /// not compared.
    pub fn approx_eq(&self, other: &ComponentSnapshot) -> bool {
        self.position.distance(other.position) < IDENTITY_EPSILON
            && self.velocity.distance(other.velocity) < IDENTITY_EPSILON
            && self.grounded == other.grounded
    }
}

#[derive(Debug, Clone)]
pub struct EntitySnapshot {
    pub network_id: u32,
    pub components: ComponentSnapshot,
    /// `false` once the entity has been deleted at this tick.
    pub exists: bool,
}

/// All replicated entities at one server tick.
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub tick: u32,
    entities: HashMap<u32, EntitySnapshot>,
}

impl WorldSnapshot {
    pub fn new(tick: u32) -> Self {
        Self {
            tick,
            entities: HashMap::new(),
        }
    }

    pub fn set_entity(&mut self, network_id: u32, components: ComponentSnapshot) {
        self.entities.insert(
            network_id,
            EntitySnapshot {
                network_id,
                components,
                exists: true,
            },
        );
    }

    pub fn remove_entity(&mut self, network_id: u32) {
        if let Some(entity) = self.entities.get_mut(&network_id) {
            entity.exists = false;
        }
    }

    pub fn has_entity(&self, network_id: u32) -> bool {
        self.entity(network_id).is_some()
    }

    /// Lookup ignoring deleted markers.
    pub fn entity(&self, network_id: u32) -> Option<&EntitySnapshot> {
        self.entities.get(&network_id).filter(|entity| entity.exists)
    }

    /// Whether the id has any entry at all, deleted markers included.
    pub fn has_entry(&self, network_id: u32) -> bool {
        self.entities.contains_key(&network_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Bounded ring of recent snapshots kept per client for delta baselines.
#[derive(Debug)]
pub struct SnapshotHistory {
    ring: std::collections::VecDeque<WorldSnapshot>,
    cap: usize,
    prune_window: u32,
}

impl SnapshotHistory {
    pub fn new(cap: usize, prune_window: u32) -> Self {
        Self {
            ring: std::collections::VecDeque::with_capacity(cap),
            cap,
            prune_window,
        }
    }

    pub fn push(&mut self, snapshot: WorldSnapshot) {
        self.ring.push_back(snapshot);
        while self.ring.len() > self.cap {
            self.ring.pop_front();
        }
    }

    pub fn get(&self, tick: u32) -> Option<&WorldSnapshot> {
        self.ring.iter().find(|snapshot| snapshot.tick == tick)
    }

    /// Drop snapshots older than `acknowledged_tick - prune_window`.
    pub fn acknowledge(&mut self, acknowledged_tick: u32) {
        let min_tick = acknowledged_tick.saturating_sub(self.prune_window);
        while self
            .ring
            .front()
            .is_some_and(|snapshot| snapshot.tick < min_tick)
        {
            self.ring.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Per-entity deltas from `baseline` to `current`.
///
/// Without a baseline every entity ships in full. Entities present in the
/// baseline but missing from `current` become deleted-only updates;
/// unchanged entities are omitted entirely.
pub fn delta_against(baseline: Option<&WorldSnapshot>, current: &WorldSnapshot) -> Vec<EntityUpdate> {
    let mut updates = Vec::new();

    for entity in current.iter() {
        let baseline_entity = baseline.and_then(|snapshot| snapshot.entity(entity.network_id));

        let mut update = EntityUpdate {
            network_id: entity.network_id,
            flags: ComponentFlags::empty(),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            grounded: false,
        };

        match baseline_entity {
            None => {
                // New to this client (or no baseline at all): ship everything.
                update.flags =
                    ComponentFlags::TRANSFORM | ComponentFlags::VELOCITY | ComponentFlags::GROUNDED;
                update.position = entity.components.position;
                update.velocity = entity.components.velocity;
                update.grounded = entity.components.grounded;
                if !entity.exists {
                    update.flags |= ComponentFlags::DELETED;
                }
            }
            Some(_) if !entity.exists => {
                update.flags = ComponentFlags::DELETED;
            }
            Some(baseline_entity) => {
                if entity
                    .components
                    .position
                    .distance(baseline_entity.components.position)
                    > DELTA_EPSILON
                {
                    update.flags |= ComponentFlags::TRANSFORM;
                    update.position = entity.components.position;
                }
                if entity
                    .components
                    .velocity
                    .distance(baseline_entity.components.velocity)
                    > DELTA_EPSILON
                {
                    update.flags |= ComponentFlags::VELOCITY;
                    update.velocity = entity.components.velocity;
                }
                if entity.components.grounded != baseline_entity.components.grounded {
                    update.flags |= ComponentFlags::GROUNDED;
                    update.grounded = entity.components.grounded;
                }
            }
        }

        if !update.flags.is_empty() {
            updates.push(update);
        }
    }

    if let Some(baseline) = baseline {
        for entity in baseline.iter() {
            // Entities still present but marked deleted were handled above.
            if entity.exists && !current.has_entry(entity.network_id) {
                updates.push(EntityUpdate::deleted(entity.network_id));
            }
        }
    }

    updates
}

/// Apply one update batch onto a reconstruction snapshot; used for
/// equivalence checks and by tools replaying recorded streams.
pub fn apply_updates(target: &mut WorldSnapshot, tick: u32, updates: &[EntityUpdate]) {
    target.tick = tick;
    for update in updates {
        if update.is_deleted() {
            target.entities.remove(&update.network_id);
            continue;
        }
        let entity = target
            .entities
            .entry(update.network_id)
            .or_insert_with(|| EntitySnapshot {
                network_id: update.network_id,
                components: ComponentSnapshot::default(),
                exists: true,
            });
        entity.exists = true;
        if update.has_transform() {
            entity.components.position = update.position;
        }
        if update.has_velocity() {
            entity.components.velocity = update.velocity;
        }
        if update.has_grounded() {
            entity.components.grounded = update.grounded;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(tick: u32, entries: &[(u32, Vec3)]) -> WorldSnapshot {
        let mut snapshot = WorldSnapshot::new(tick);
        for &(id, position) in entries {
            snapshot.set_entity(
                id,
                ComponentSnapshot {
                    position,
                    ..ComponentSnapshot::default()
                },
            );
        }
        snapshot
    }

    #[test]
    fn no_baseline_ships_full_snapshot() {
        let current = snapshot_with(5, &[(1, Vec3::ZERO), (2, Vec3::X)]);
        let updates = delta_against(None, &current);
        assert_eq!(updates.len(), 2);
        for update in &updates {
            assert!(update.has_transform());
            assert!(update.has_velocity());
            assert!(update.has_grounded());
            assert!(!update.is_deleted());
        }
    }

    #[test]
    fn unchanged_entities_are_omitted() {
        let baseline = snapshot_with(100, &[(1, Vec3::ZERO), (2, Vec3::ONE)]);
        let mut current = snapshot_with(103, &[(1, Vec3::new(1.0, 0.0, 0.0)), (2, Vec3::ONE)]);
        current.tick = 103;

        let updates = delta_against(Some(&baseline), &current);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].network_id, 1);
        assert_eq!(updates[0].flags, ComponentFlags::TRANSFORM);
        assert_eq!(updates[0].position, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn sub_epsilon_movement_is_not_a_delta() {
        let baseline = snapshot_with(1, &[(1, Vec3::ZERO)]);
        let current = snapshot_with(2, &[(1, Vec3::new(0.005, 0.0, 0.0))]);
        assert!(delta_against(Some(&baseline), &current).is_empty());
    }

    #[test]
    fn grounded_flip_sets_grounded_flag_only() {
        let mut baseline = WorldSnapshot::new(1);
        baseline.set_entity(
            1,
            ComponentSnapshot {
                grounded: false,
                ..ComponentSnapshot::default()
            },
        );
        let mut current = WorldSnapshot::new(2);
        current.set_entity(
            1,
            ComponentSnapshot {
                grounded: true,
                ..ComponentSnapshot::default()
            },
        );

        let updates = delta_against(Some(&baseline), &current);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].flags, ComponentFlags::GROUNDED);
        assert!(updates[0].grounded);
    }

    #[test]
    fn entity_marked_deleted_in_current_snapshot() {
        let baseline = snapshot_with(1, &[(1, Vec3::ZERO)]);
        let mut current = snapshot_with(2, &[(1, Vec3::ZERO)]);
        current.remove_entity(1);

        let updates = delta_against(Some(&baseline), &current);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].flags, ComponentFlags::DELETED);

        // Without a baseline the deletion still rides along with full data.
        let updates = delta_against(None, &current);
        assert_eq!(updates.len(), 1);
        assert!(updates[0].is_deleted());
        assert!(updates[0].has_transform());
    }

    #[test]
    fn missing_entity_becomes_deleted_update() {
        let baseline = snapshot_with(1, &[(1, Vec3::ZERO), (2, Vec3::ONE)]);
        let current = snapshot_with(2, &[(1, Vec3::ZERO)]);

        let updates = delta_against(Some(&baseline), &current);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].network_id, 2);
        assert_eq!(updates[0].flags, ComponentFlags::DELETED);
    }

    #[test]
    fn history_caps_and_prunes() {
        let mut history = SnapshotHistory::new(64, 32);
        for tick in 0..80 {
            history.push(WorldSnapshot::new(tick));
        }
        assert_eq!(history.len(), 64);
        assert!(history.get(10).is_none());
        assert!(history.get(79).is_some());

        history.acknowledge(70);
        // Everything older than 70 - 32 = 38 is gone.
        assert!(history.get(37).is_none());
        assert!(history.get(38).is_some());
    }

    #[test]
    fn applying_same_update_twice_is_idempotent() {
        let baseline = snapshot_with(1, &[(1, Vec3::ZERO)]);
        let current = snapshot_with(2, &[(1, Vec3::new(3.0, 0.0, 0.0))]);
        let updates = delta_against(Some(&baseline), &current);

        let mut once = baseline.clone();
        apply_updates(&mut once, 2, &updates);
        let mut twice = baseline.clone();
        apply_updates(&mut twice, 2, &updates);
        apply_updates(&mut twice, 2, &updates);

        let entity_once = once.entity(1).expect("entity");
        let entity_twice = twice.entity(1).expect("entity");
        assert!(entity_once.components.approx_eq(&entity_twice.components));
    }

    #[test]
    fn baseline_chain_reconstructs_authoritative_state() {
        // Apply deltas B+1..T on top of baseline B and compare against the
        // authoritative snapshot at T.
        let mut authoritative = vec![snapshot_with(0, &[(1, Vec3::ZERO), (2, Vec3::ONE)])];
        for tick in 1..6u32 {
            let position = Vec3::new(tick as f32, 0.0, 0.0);
            let mut snapshot = snapshot_with(tick, &[(1, position)]);
            if tick < 4 {
                snapshot.set_entity(2, ComponentSnapshot {
                    position: Vec3::ONE,
                    ..ComponentSnapshot::default()
                });
            }
            authoritative.push(snapshot);
        }

        let mut reconstruction = authoritative[0].clone();
        for tick in 1..6usize {
            let updates = delta_against(Some(&authoritative[tick - 1]), &authoritative[tick]);
            apply_updates(&mut reconstruction, tick as u32, &updates);
        }

        let last = &authoritative[5];
        assert_eq!(reconstruction.tick, last.tick);
        assert!(reconstruction
            .entity(1)
            .expect("entity 1")
            .components
            .approx_eq(&last.entity(1).expect("entity 1").components));
        assert!(reconstruction.entity(2).is_none());
        assert!(last.entity(2).is_none());
    }
}
