//! Shared world model for the arbor engine core.
//!
//! A deliberately small entity registry carrying exactly the component set
//! the replication core and asset consumers touch. The full scene graph and
//! physics integration live outside the core and consume this same registry.

pub mod components;
pub mod entity;
pub mod world;

pub use components::{Player, Replicated, RigidBody, Transform};
pub use entity::Entity;
pub use world::{World, DEFAULT_FIXED_DELTA};
