//! Caller-facing asset handles.

use crate::data::AssetPayload;
use crate::manager::ManagerRef;
use crate::types::{AssetError, AssetId, LoadState};
use std::sync::Weak;
use std::time::Duration;

/// Lightweight reference to an asset owned by the [`crate::AssetManager`].
///
/// Handles stay cheap to clone and never keep the manager alive; queries
/// against a torn-down manager report `Failed`.
#[derive(Clone)]
pub struct AssetHandle {
    id: AssetId,
    manager: ManagerRef,
}

impl AssetHandle {
    pub(crate) fn new(id: AssetId, manager: ManagerRef) -> Self {
        Self { id, manager }
    }

    pub fn invalid() -> Self {
        Self {
            id: AssetId::INVALID,
            manager: Weak::new(),
        }
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_valid()
    }

    pub fn state(&self) -> LoadState {
        match self.manager.upgrade() {
            Some(inner) => inner.state_of(self.id),
            None => LoadState::Failed,
        }
    }

    pub fn progress(&self) -> f32 {
        self.manager
            .upgrade()
            .map(|inner| inner.progress_of(self.id))
            .unwrap_or(0.0)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LoadState::Ready
    }

    pub fn has_failed(&self) -> bool {
        self.state() == LoadState::Failed
    }

    pub fn is_loading(&self) -> bool {
        !matches!(
            self.state(),
            LoadState::NotLoaded | LoadState::Ready | LoadState::Failed
        )
    }

    pub fn error(&self) -> Option<AssetError> {
        self.manager.upgrade().and_then(|inner| inner.error_of(self.id))
    }

    /// Current payload. `AssetPayload::None` until the asset is Ready.
    pub fn data(&self) -> AssetPayload {
        self.manager
            .upgrade()
            .map(|inner| inner.data_of(self.id))
            .unwrap_or(AssetPayload::None)
    }

    /// Block until the load reaches a terminal state; returns success.
    pub fn wait(&self) -> bool {
        match self.manager.upgrade().and_then(|inner| inner.signal_of(self.id)) {
            Some(signal) => signal.wait(),
            None => false,
        }
    }

    /// Block up to `timeout`; `None` when still loading.
    pub fn wait_for(&self, timeout: Duration) -> Option<bool> {
        match self.manager.upgrade().and_then(|inner| inner.signal_of(self.id)) {
            Some(signal) => signal.wait_timeout(timeout),
            None => Some(false),
        }
    }
}

impl std::fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetHandle")
            .field("id", &self.id.raw())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_handle_reports_failed() {
        let handle = AssetHandle::invalid();
        assert!(!handle.is_valid());
        assert_eq!(handle.state(), LoadState::Failed);
        assert!(!handle.is_loading());
        assert!(handle.data().is_none());
        assert_eq!(handle.wait_for(Duration::from_millis(1)), Some(false));
    }
}
