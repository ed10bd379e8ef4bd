//! Asynchronous asset pipeline for the arbor engine.
//!
//! Assets are requested by path through the [`AssetManager`] and progress
//! through a fixed state machine: file IO and parsing run on scheduler
//! workers, GPU upload runs on the main thread, and observers follow along
//! via polled handles, completion signals, or callbacks. Loads are
//! deduplicated per canonical path.

pub mod data;
pub mod gfx;
pub mod handle;
pub mod loader;
pub mod manager;
pub mod types;

pub use data::{AssetPayload, MaterialData, MeshData, ModelData, SubMesh, TextureData};
pub use gfx::{GpuMeshHandle, RenderDevice, TextureHandle, Vertex};
pub use handle::AssetHandle;
pub use loader::{AssetLoader, LoadContext, LoadResult, LoadedAsset};
pub use manager::{AssetManager, LoadCallback, ProgressCallback, UnloadError};
pub use types::{AssetError, AssetId, AssetType, LoadPriority, LoadState};
