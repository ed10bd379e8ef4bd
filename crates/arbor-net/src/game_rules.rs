//! Spawn placement and player tuning applied when a client joins.

use glam::Vec3;

/// Round-robin spawn points plus the stats stamped onto new player
/// entities. Levels override the defaults from their own data.
#[derive(Debug, Clone)]
pub struct GameRules {
    spawn_points: Vec<Vec3>,
    next_spawn: usize,
    pub player_speed: f32,
    pub player_jump_force: f32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            spawn_points: vec![
                Vec3::new(0.0, 5.0, 0.0),
                Vec3::new(10.0, 5.0, 0.0),
                Vec3::new(-10.0, 5.0, 0.0),
                Vec3::new(0.0, 5.0, 10.0),
                Vec3::new(0.0, 5.0, -10.0),
            ],
            next_spawn: 0,
            player_speed: 10.0,
            player_jump_force: 5.0,
        }
    }
}

impl GameRules {
    pub fn next_spawn_point(&mut self) -> Vec3 {
        if self.spawn_points.is_empty() {
            return Vec3::new(0.0, 5.0, 0.0);
        }
        let spawn = self.spawn_points[self.next_spawn];
        self.next_spawn = (self.next_spawn + 1) % self.spawn_points.len();
        spawn
    }

    /// Replace the spawn ring; empty input is ignored.
    pub fn set_spawn_points(&mut self, points: Vec<Vec3>) {
        if points.is_empty() {
            return;
        }
        self.spawn_points = points;
        self.next_spawn = 0;
    }
}
