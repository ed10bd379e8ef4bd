//! CPU-side asset payloads and the tagged payload union.
//!
//! Payloads hold platform-independent buffers until upload; a successful GPU
//! upload releases the CPU buffers so steady-state memory tracks GPU
//! residence.

use crate::gfx::{GpuMeshHandle, TextureHandle, Vertex};
use crate::types::AssetType;
use glam::{Vec3, Vec4};
use parking_lot::RwLock;
use std::sync::Arc;

/// Range of a mesh rendered with one material.
#[derive(Debug, Clone, Default)]
pub struct SubMesh {
    pub start_vertex: usize,
    pub vertex_count: usize,
    pub material_index: i32,
    pub material_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub use_indices: bool,
    pub submeshes: Vec<SubMesh>,
    pub aabb_min: Vec3,
    pub aabb_max: Vec3,
    pub gpu_mesh: GpuMeshHandle,
    pub uploaded: bool,
    pub source_path: String,
}

impl MeshData {
    pub fn compute_bounds(&mut self) {
        let Some(first) = self.vertices.first() else {
            return;
        };
        let mut min = first.position;
        let mut max = first.position;
        for vertex in &self.vertices {
            min = min.min(vertex.position);
            max = max.max(vertex.position);
        }
        self.aabb_min = min;
        self.aabb_max = max;
    }

    /// Drop the CPU-side buffers once the GPU owns the geometry.
    pub fn free_cpu_buffers(&mut self) {
        self.vertices = Vec::new();
        self.indices = Vec::new();
    }

    pub fn triangle_count(&self) -> usize {
        if self.use_indices {
            self.indices.len() / 3
        } else {
            self.vertices.len() / 3
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextureData {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub generate_mipmaps: bool,
    pub flip_vertically: bool,
    pub is_embedded: bool,
    pub source_uri: String,
    pub gpu_handle: TextureHandle,
    pub uploaded: bool,
}

impl Default for TextureData {
    fn default() -> Self {
        Self {
            pixels: Vec::new(),
            width: 0,
            height: 0,
            channels: 0,
            generate_mipmaps: true,
            flip_vertically: true,
            is_embedded: false,
            source_uri: String::new(),
            gpu_handle: TextureHandle::INVALID,
            uploaded: false,
        }
    }
}

impl TextureData {
    pub fn has_data(&self) -> bool {
        !self.pixels.is_empty() && self.width > 0 && self.height > 0
    }

    pub fn free_pixels(&mut self) {
        self.pixels = Vec::new();
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaterialData {
    pub name: String,
    pub base_color: Vec4,
    pub texture_paths: Vec<String>,
}

/// A model groups previously-loaded sub-assets by id.
#[derive(Debug, Clone, Default)]
pub struct ModelData {
    pub meshes: Vec<crate::types::AssetId>,
    pub materials: Vec<crate::types::AssetId>,
}

/// Tagged payload union. Exactly one variant is populated; a Ready asset's
/// variant matches its type tag.
///
/// Variants are shared (`Arc<RwLock<..>>`): parsing populates the value on a
/// worker, the main-thread upload job mutates it, and consumers read it
/// after `Ready`.
#[derive(Clone, Default)]
pub enum AssetPayload {
    #[default]
    None,
    Mesh(Arc<RwLock<MeshData>>),
    Texture(Arc<RwLock<TextureData>>),
    Material(Arc<RwLock<MaterialData>>),
    Model(Arc<RwLock<ModelData>>),
}

impl AssetPayload {
    pub fn mesh(data: MeshData) -> Self {
        AssetPayload::Mesh(Arc::new(RwLock::new(data)))
    }

    pub fn texture(data: TextureData) -> Self {
        AssetPayload::Texture(Arc::new(RwLock::new(data)))
    }

    pub fn material(data: MaterialData) -> Self {
        AssetPayload::Material(Arc::new(RwLock::new(data)))
    }

    pub fn model(data: ModelData) -> Self {
        AssetPayload::Model(Arc::new(RwLock::new(data)))
    }

    pub fn type_tag(&self) -> AssetType {
        match self {
            AssetPayload::None => AssetType::Unknown,
            AssetPayload::Mesh(_) => AssetType::Mesh,
            AssetPayload::Texture(_) => AssetType::Texture,
            AssetPayload::Material(_) => AssetType::Material,
            AssetPayload::Model(_) => AssetType::Model,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AssetPayload::None)
    }

    pub fn as_mesh(&self) -> Option<&Arc<RwLock<MeshData>>> {
        match self {
            AssetPayload::Mesh(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_texture(&self) -> Option<&Arc<RwLock<TextureData>>> {
        match self {
            AssetPayload::Texture(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_material(&self) -> Option<&Arc<RwLock<MaterialData>>> {
        match self {
            AssetPayload::Material(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&Arc<RwLock<ModelData>>> {
        match self {
            AssetPayload::Model(data) => Some(data),
            _ => None,
        }
    }

    /// Release CPU-side buffers after a successful upload.
    pub(crate) fn free_cpu_buffers(&self) {
        match self {
            AssetPayload::Mesh(data) => data.write().free_cpu_buffers(),
            AssetPayload::Texture(data) => data.write().free_pixels(),
            AssetPayload::None | AssetPayload::Material(_) | AssetPayload::Model(_) => {}
        }
    }
}

impl std::fmt::Debug for AssetPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_tag().as_str())
    }
}
