//! Asset identities, state machine, priorities, and the error record.

/// Identity of a loaded (or loading) asset. `0` is reserved as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetId(u64);

impl AssetId {
    pub const INVALID: AssetId = AssetId(0);

    pub(crate) fn from_raw(raw: u64) -> Self {
        AssetId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssetType {
    #[default]
    Unknown,
    Mesh,
    Texture,
    Material,
    Model,
    Shader,
    Sound,
    Animation,
}

impl AssetType {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetType::Mesh => "Mesh",
            AssetType::Texture => "Texture",
            AssetType::Material => "Material",
            AssetType::Model => "Model",
            AssetType::Shader => "Shader",
            AssetType::Sound => "Sound",
            AssetType::Animation => "Animation",
            AssetType::Unknown => "Unknown",
        }
    }
}

/// Load-state machine. States advance monotonically toward `Ready`; `Failed`
/// is reachable from any non-terminal state and is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    NotLoaded = 0,
    Queued = 1,
    LoadingIo = 2,
    Parsing = 3,
    Processing = 4,
    UploadingGpu = 5,
    Ready = 6,
    Failed = 7,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadState::Ready | LoadState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoadState::NotLoaded => "NotLoaded",
            LoadState::Queued => "Queued",
            LoadState::LoadingIo => "LoadingIO",
            LoadState::Parsing => "Parsing",
            LoadState::Processing => "Processing",
            LoadState::UploadingGpu => "UploadingGPU",
            LoadState::Ready => "Ready",
            LoadState::Failed => "Failed",
        }
    }

    pub(crate) fn from_u8(value: u8) -> LoadState {
        match value {
            0 => LoadState::NotLoaded,
            1 => LoadState::Queued,
            2 => LoadState::LoadingIo,
            3 => LoadState::Parsing,
            4 => LoadState::Processing,
            5 => LoadState::UploadingGpu,
            6 => LoadState::Ready,
            _ => LoadState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LoadPriority {
    Background,
    #[default]
    Normal,
    High,
    Immediate,
}

/// Error record attached to a Failed asset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({path})")]
pub struct AssetError {
    pub message: String,
    pub path: String,
    pub code: i32,
}

impl AssetError {
    pub fn new(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: path.into(),
            code: 0,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }
}
