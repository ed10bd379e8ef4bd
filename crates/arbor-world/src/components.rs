//! The replicated component set.

use glam::Vec3;

/// Position, Euler rotation (degrees, YXZ application order), and scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

/// Linear motion state integrated by the physics step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidBody {
    pub velocity: Vec3,
    pub force: Vec3,
    pub mass: f32,
    pub apply_gravity: bool,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            mass: 1.0,
            apply_gravity: true,
        }
    }
}

/// Player movement tuning and ground contact state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Player {
    pub speed: f32,
    pub jump_force: f32,
    pub mouse_sensitivity: f32,
    pub grounded: bool,
    pub ground_normal: Vec3,
    pub input_enabled: bool,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            speed: 1.5,
            jump_force: 3.0,
            mouse_sensitivity: 1.0,
            grounded: false,
            ground_normal: Vec3::Y,
            input_enabled: true,
        }
    }
}

/// Marks an entity as replicated over the network.
///
/// The network id is the only identity that crosses the wire; it is assigned
/// by the server and never reused while a connected client may still hold a
/// baseline referencing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Replicated {
    pub network_id: u32,
    /// `0` means server-owned.
    pub owner_client_id: u16,
    pub is_player: bool,
}

impl Replicated {
    pub fn new(network_id: u32, owner_client_id: u16, is_player: bool) -> Self {
        Self {
            network_id,
            owner_client_id,
            is_player,
        }
    }

    pub fn is_server_owned(&self) -> bool {
        self.owner_client_id == 0
    }
}
