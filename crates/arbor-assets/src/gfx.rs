//! The `RenderDevice` capability consumed by the upload stage.
//!
//! The concrete device is provided by the host. All of its operations are
//! main-thread-only: the scheduler routes upload jobs through the
//! main-thread queue, and the `Send + Sync` bound exists solely so the
//! shared handle can ride inside job closures.

use glam::{Vec2, Vec3};

/// Opaque GPU mesh identity owned by the render device. `0` is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuMeshHandle(pub u64);

impl GpuMeshHandle {
    pub const INVALID: GpuMeshHandle = GpuMeshHandle(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for GpuMeshHandle {
    fn default() -> Self {
        GpuMeshHandle::INVALID
    }
}

/// Opaque GPU texture identity owned by the render device. `0` is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

impl TextureHandle {
    pub const INVALID: TextureHandle = TextureHandle(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for TextureHandle {
    fn default() -> Self {
        TextureHandle::INVALID
    }
}

/// Interleaved vertex layout shared between CPU parsing and GPU upload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[repr(C)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

/// GPU upload surface provided by the host renderer.
pub trait RenderDevice: Send + Sync {
    fn create_mesh(&self) -> GpuMeshHandle;

    fn upload_mesh_data(&self, mesh: GpuMeshHandle, vertices: &[Vertex], indices: &[u32]) -> bool;

    #[allow(clippy::too_many_arguments)]
    fn load_texture_from_memory(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        channels: u32,
        flip_vertically: bool,
        generate_mipmaps: bool,
    ) -> TextureHandle;

    fn delete_texture(&self, handle: TextureHandle);
}
