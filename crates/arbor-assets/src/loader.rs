//! The loader capability: one implementation per asset type.

use crate::data::AssetPayload;
use crate::gfx::RenderDevice;
use crate::types::{AssetError, AssetType};
use std::sync::Arc;

/// Ambient inputs for a load running on a worker.
#[derive(Clone)]
pub struct LoadContext {
    /// Shared render device handle; some loaders need it to size or validate
    /// GPU-bound data ahead of upload. May be absent in headless runs.
    pub render_device: Option<Arc<dyn RenderDevice>>,
    /// Directory of the file being loaded; sibling references (e.g. textures
    /// named by a model) resolve against this.
    pub base_path: String,
    pub verbose_logging: bool,
}

/// Successful parse output: the populated payload variant plus any sibling
/// assets the file references (queued separately by the caller).
pub struct LoadedAsset {
    pub payload: AssetPayload,
    pub referenced_assets: Vec<String>,
}

impl LoadedAsset {
    pub fn new(payload: AssetPayload) -> Self {
        Self {
            payload,
            referenced_assets: Vec::new(),
        }
    }
}

pub type LoadResult = Result<LoadedAsset, AssetError>;

/// Capability implemented once per on-disk format.
///
/// `load_from_file` may block and runs on a scheduler worker;
/// `upload_to_gpu` runs on the main thread only.
pub trait AssetLoader: Send + Sync {
    fn asset_type(&self) -> AssetType;

    /// Extensions including the leading dot, e.g. `".gltf"`.
    fn supported_extensions(&self) -> &[&str];

    /// Case-insensitive extension match by default.
    fn can_load(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        self.supported_extensions()
            .iter()
            .any(|extension| lower.ends_with(&extension.to_ascii_lowercase()))
    }

    fn load_from_file(&self, path: &str, context: &LoadContext) -> LoadResult;

    /// Upload the payload's CPU buffers to the GPU, recording opaque handles
    /// on the payload. Returns `false` on failure.
    fn upload_to_gpu(&self, payload: &AssetPayload, device: &dyn RenderDevice) -> bool;
}

/// Directory portion of `path`, trailing separator included; empty when the
/// path has no directory component.
pub(crate) fn base_path_of(path: &str) -> String {
    match path.rfind(['/', '\\']) {
        Some(index) => path[..=index].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MaterialData;

    struct StubLoader;

    impl AssetLoader for StubLoader {
        fn asset_type(&self) -> AssetType {
            AssetType::Material
        }

        fn supported_extensions(&self) -> &[&str] {
            &[".mat", ".material"]
        }

        fn load_from_file(&self, _path: &str, _context: &LoadContext) -> LoadResult {
            Ok(LoadedAsset::new(AssetPayload::material(MaterialData::default())))
        }

        fn upload_to_gpu(&self, _payload: &AssetPayload, _device: &dyn RenderDevice) -> bool {
            true
        }
    }

    #[test]
    fn default_can_load_is_case_insensitive() {
        let loader = StubLoader;
        assert!(loader.can_load("props/barrel.mat"));
        assert!(loader.can_load("PROPS/BARREL.MAT"));
        assert!(loader.can_load("a.MaTeRiAl"));
        assert!(!loader.can_load("props/barrel.png"));
        assert!(!loader.can_load("mat"));
    }

    #[test]
    fn base_path_extraction() {
        assert_eq!(base_path_of("models/crates/heavy.gltf"), "models/crates/");
        assert_eq!(base_path_of("models\\crates\\heavy.gltf"), "models\\crates\\");
        assert_eq!(base_path_of("heavy.gltf"), "");
    }
}
