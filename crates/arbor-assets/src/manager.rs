//! The asset manager: dedup, staged loading, and observer bookkeeping.

use crate::data::AssetPayload;
use crate::gfx::RenderDevice;
use crate::handle::AssetHandle;
use crate::loader::{base_path_of, AssetLoader, LoadContext};
use crate::types::{AssetError, AssetId, AssetType, LoadPriority, LoadState};
use arbor_jobs::{CompletionSignal, JobContext, JobHandle, JobPriority, JobSystem};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Fired once when an asset reaches a terminal state.
pub type LoadCallback = Box<dyn FnOnce(AssetId, bool, &AssetPayload) + Send>;
/// Fired on every progress checkpoint from the executing thread.
pub type ProgressCallback = Arc<dyn Fn(AssetId, f32, LoadState) + Send + Sync>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnloadError {
    #[error("unknown asset id {0}")]
    UnknownAsset(u64),
    #[error("asset '{0}' is still loading")]
    LoadInFlight(String),
}

pub(crate) struct AssetRecord {
    pub id: AssetId,
    pub path: String,
    pub asset_type: AssetType,
    state: AtomicU8,
    progress_bits: AtomicU32,
    pub payload: Mutex<AssetPayload>,
    pub error: Mutex<Option<AssetError>>,
    pub signal: CompletionSignal,
    /// Chained completion observers; later `load_async` calls for the same
    /// in-flight path append here.
    pub on_complete: Mutex<Vec<LoadCallback>>,
    pub on_progress: Mutex<Vec<ProgressCallback>>,
    pub parse_job: Mutex<JobHandle>,
    pub upload_job: Mutex<JobHandle>,
}

impl AssetRecord {
    fn new(id: AssetId, path: String, asset_type: AssetType) -> Self {
        Self {
            id,
            path,
            asset_type,
            state: AtomicU8::new(LoadState::Queued as u8),
            progress_bits: AtomicU32::new(0),
            payload: Mutex::new(AssetPayload::None),
            error: Mutex::new(None),
            signal: CompletionSignal::new(),
            on_complete: Mutex::new(Vec::new()),
            on_progress: Mutex::new(Vec::new()),
            parse_job: Mutex::new(JobHandle::INVALID),
            upload_job: Mutex::new(JobHandle::INVALID),
        }
    }

    pub fn state(&self) -> LoadState {
        LoadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LoadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn progress(&self) -> f32 {
        f32::from_bits(self.progress_bits.load(Ordering::Acquire))
    }

    /// Progress is advisory and never decreases while non-terminal.
    fn bump_progress(&self, progress: f32) {
        let mut current = self.progress_bits.load(Ordering::Acquire);
        while f32::from_bits(current) < progress {
            match self.progress_bits.compare_exchange_weak(
                current,
                progress.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

pub(crate) struct ManagerInner {
    jobs: Arc<JobSystem>,
    device: RwLock<Option<Arc<dyn RenderDevice>>>,
    loaders: RwLock<Vec<Arc<dyn AssetLoader>>>,
    assets: RwLock<HashMap<AssetId, Arc<AssetRecord>>>,
    path_to_id: Mutex<HashMap<String, AssetId>>,
    next_id: AtomicU64,
    initialized: AtomicBool,
}

/// Handle-based asynchronous asset manager.
///
/// IO and parsing run on scheduler workers; GPU uploads run on the main
/// thread via the scheduler's main-thread queue. At most one load is in
/// flight per canonical path.
pub struct AssetManager {
    inner: Arc<ManagerInner>,
}

impl AssetManager {
    pub fn new(jobs: Arc<JobSystem>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                jobs,
                device: RwLock::new(None),
                loaders: RwLock::new(Vec::new()),
                assets: RwLock::new(HashMap::new()),
                path_to_id: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Bind the GPU upload target. Idempotent; the first device wins.
    pub fn initialize(&self, device: Arc<dyn RenderDevice>) {
        if self.inner.initialized.swap(true, Ordering::AcqRel) {
            log::warn!("asset manager: already initialized");
            return;
        }
        *self.inner.device.write() = Some(device);
        log::info!("asset manager: initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Drain outstanding work and drop every record. Call before shutting
    /// down the job system.
    pub fn shutdown(&self) {
        if !self.inner.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        log::info!("asset manager: shutting down");
        self.inner.jobs.barrier();
        self.inner.assets.write().clear();
        self.inner.path_to_id.lock().clear();
        self.inner.loaders.write().clear();
        *self.inner.device.write() = None;
        log::info!("asset manager: shutdown complete");
    }

    pub fn register_loader(&self, loader: Arc<dyn AssetLoader>) {
        log::info!(
            "asset manager: registered loader for {} assets",
            loader.asset_type().as_str()
        );
        self.inner.loaders.write().push(loader);
    }

    pub fn load_async(&self, path: &str, priority: LoadPriority) -> AssetHandle {
        self.load_async_with(path, priority, None, None)
    }

    pub fn load_async_with(
        &self,
        path: &str,
        priority: LoadPriority,
        on_complete: Option<LoadCallback>,
        on_progress: Option<ProgressCallback>,
    ) -> AssetHandle {
        let inner = &self.inner;
        if !inner.initialized.load(Ordering::Acquire) {
            log::error!("asset manager: load of '{path}' before initialization");
            return AssetHandle::invalid();
        }

        // Resolve or create under the path lock so two racing loads of the
        // same canonical path can never mint two records. Lock order is
        // always path map, then asset table.
        enum Resolution {
            Join(Arc<AssetRecord>),
            Created(Arc<AssetRecord>, Arc<dyn AssetLoader>),
        }
        let resolution = {
            let mut paths = inner.path_to_id.lock();
            let existing = paths.get(path).copied().and_then(|id| inner.record(id));
            match existing {
                Some(record) => Resolution::Join(record),
                None => {
                    let Some(loader) = inner.find_loader(path) else {
                        log::error!("asset manager: no loader accepts '{path}'");
                        return AssetHandle::invalid();
                    };
                    let id = AssetId::from_raw(inner.next_id.fetch_add(1, Ordering::Relaxed));
                    let record =
                        Arc::new(AssetRecord::new(id, path.to_string(), loader.asset_type()));
                    inner.assets.write().insert(id, record.clone());
                    paths.insert(path.to_string(), id);
                    Resolution::Created(record, loader)
                }
            }
        };

        let record = match resolution {
            // Callbacks fire outside the path lock; a callback may re-enter
            // the manager.
            Resolution::Join(record) => return self.join_existing(record, on_complete, on_progress),
            Resolution::Created(record, loader) => {
                if let Some(callback) = on_complete {
                    record.on_complete.lock().push(callback);
                }
                if let Some(callback) = on_progress {
                    record.on_progress.lock().push(callback);
                }

                let job_priority = match priority {
                    LoadPriority::Background => JobPriority::Low,
                    LoadPriority::Normal => JobPriority::Normal,
                    LoadPriority::High | LoadPriority::Immediate => JobPriority::High,
                };
                let id = record.id;
                let parse_inner = inner.clone();
                let parse_path = record.path.clone();
                let parse_job = inner
                    .jobs
                    .create_job()
                    .name(format!("asset-parse:{path}"))
                    .priority(job_priority)
                    .context(JobContext::Worker)
                    .work(move || parse_inner.run_parse_job(id, parse_path, loader))
                    .submit();
                *record.parse_job.lock() = parse_job;
                record
            }
        };

        self.handle_for(record.id)
    }

    /// `load_async` plus a blocking wait.
    ///
    /// The wait pumps the scheduler's main-thread queue so the upload stage
    /// makes progress even when called from the thread that owns it.
    pub fn load_sync(&self, path: &str) -> AssetHandle {
        let handle = self.load_async(path, LoadPriority::Immediate);
        if !handle.is_valid() {
            return handle;
        }
        let Some(signal) = self.inner.signal_of(handle.id()) else {
            return handle;
        };
        while signal.try_get().is_none() {
            self.inner.jobs.process_main_thread_jobs();
            if signal.wait_timeout(Duration::from_millis(1)).is_some() {
                break;
            }
        }
        handle
    }

    pub fn load_batch(&self, paths: &[&str], priority: LoadPriority) -> Vec<AssetHandle> {
        paths.iter().map(|path| self.load_async(path, priority)).collect()
    }

    pub fn is_loaded(&self, path: &str) -> bool {
        let id = self.inner.path_to_id.lock().get(path).copied();
        id.and_then(|id| self.inner.record(id))
            .is_some_and(|record| record.state() == LoadState::Ready)
    }

    /// Remove an asset. In-flight loads are rejected; callers wait for a
    /// terminal state first.
    pub fn unload(&self, id: AssetId) -> Result<(), UnloadError> {
        let record = self
            .inner
            .record(id)
            .ok_or(UnloadError::UnknownAsset(id.raw()))?;
        if !record.state().is_terminal() {
            return Err(UnloadError::LoadInFlight(record.path.clone()));
        }
        // Path map before asset table, matching load_async's lock order.
        let mut paths = self.inner.path_to_id.lock();
        self.inner.assets.write().remove(&id);
        paths.remove(&record.path);
        drop(paths);
        log::debug!("asset manager: unloaded '{}'", record.path);
        Ok(())
    }

    /// Drop every terminal record. In-flight loads are left to finish and
    /// stay cached.
    pub fn clear_cache(&self) {
        let mut paths = self.inner.path_to_id.lock();
        let mut assets = self.inner.assets.write();
        let before = assets.len();
        assets.retain(|_, record| !record.state().is_terminal());
        paths.retain(|_, id| assets.contains_key(id));
        let in_flight = assets.len();
        log::info!(
            "asset manager: cleared {} cached assets ({in_flight} still loading)",
            before - in_flight
        );
    }

    pub fn cached_count(&self) -> usize {
        self.inner.assets.read().len()
    }

    pub fn loading_count(&self) -> usize {
        self.inner
            .assets
            .read()
            .values()
            .filter(|record| !record.state().is_terminal())
            .count()
    }

    pub fn handle_for(&self, id: AssetId) -> AssetHandle {
        AssetHandle::new(id, Arc::downgrade(&self.inner))
    }

    fn join_existing(
        &self,
        record: Arc<AssetRecord>,
        on_complete: Option<LoadCallback>,
        on_progress: Option<ProgressCallback>,
    ) -> AssetHandle {
        if let Some(callback) = on_progress {
            record.on_progress.lock().push(callback);
        }
        if let Some(callback) = on_complete {
            // The state check shares the on_complete lock with the terminal
            // transition, so a concurrent completion either drains this
            // callback or we observe the terminal state and fire now.
            let mut observers = record.on_complete.lock();
            if record.state().is_terminal() {
                drop(observers);
                let success = record.state() == LoadState::Ready;
                let payload = if success {
                    record.payload.lock().clone()
                } else {
                    AssetPayload::None
                };
                callback(record.id, success, &payload);
            } else {
                observers.push(callback);
            }
        }
        self.handle_for(record.id)
    }
}

impl ManagerInner {
    pub(crate) fn record(&self, id: AssetId) -> Option<Arc<AssetRecord>> {
        self.assets.read().get(&id).cloned()
    }

    pub(crate) fn state_of(&self, id: AssetId) -> LoadState {
        self.record(id)
            .map(|record| record.state())
            .unwrap_or(LoadState::Failed)
    }

    pub(crate) fn progress_of(&self, id: AssetId) -> f32 {
        self.record(id).map(|record| record.progress()).unwrap_or(0.0)
    }

    pub(crate) fn data_of(&self, id: AssetId) -> AssetPayload {
        self.record(id)
            .map(|record| record.payload.lock().clone())
            .unwrap_or(AssetPayload::None)
    }

    pub(crate) fn error_of(&self, id: AssetId) -> Option<AssetError> {
        self.record(id).and_then(|record| record.error.lock().clone())
    }

    pub(crate) fn signal_of(&self, id: AssetId) -> Option<CompletionSignal> {
        self.record(id).map(|record| record.signal.clone())
    }

    fn find_loader(&self, path: &str) -> Option<Arc<dyn AssetLoader>> {
        self.loaders
            .read()
            .iter()
            .find(|loader| loader.can_load(path))
            .cloned()
    }

    fn run_parse_job(self: Arc<Self>, id: AssetId, path: String, loader: Arc<dyn AssetLoader>) {
        self.update_progress(id, 0.1, LoadState::LoadingIo);

        let context = LoadContext {
            render_device: self.device.read().clone(),
            base_path: base_path_of(&path),
            verbose_logging: false,
        };

        self.update_progress(id, 0.3, LoadState::Parsing);

        match loader.load_from_file(&path, &context) {
            Err(error) => self.fail_load(id, error),
            Ok(loaded) => {
                self.update_progress(id, 0.7, LoadState::Processing);
                let Some(record) = self.record(id) else {
                    // Evicted while parsing; drop the result.
                    return;
                };
                *record.payload.lock() = loaded.payload;
                if !loaded.referenced_assets.is_empty() {
                    log::debug!(
                        "asset '{path}' references {} sibling assets",
                        loaded.referenced_assets.len()
                    );
                }

                self.update_progress(id, 0.8, LoadState::UploadingGpu);

                let upload_inner = self.clone();
                let upload_path = path.clone();
                let upload_job = self
                    .jobs
                    .create_job()
                    .name(format!("asset-upload:{path}"))
                    .priority(JobPriority::High)
                    .context(JobContext::MainThread)
                    .work(move || upload_inner.run_upload_job(id, upload_path, loader))
                    .submit();
                if let Some(record) = self.record(id) {
                    *record.upload_job.lock() = upload_job;
                }
            }
        }
    }

    fn run_upload_job(self: Arc<Self>, id: AssetId, path: String, loader: Arc<dyn AssetLoader>) {
        let Some(record) = self.record(id) else {
            return;
        };
        let Some(device) = self.device.read().clone() else {
            self.fail_load(id, AssetError::new("render device unavailable for upload", path));
            return;
        };
        let payload = record.payload.lock().clone();
        if payload.is_none() {
            self.fail_load(id, AssetError::new("payload missing at upload", path));
            return;
        }
        if loader.upload_to_gpu(&payload, device.as_ref()) {
            payload.free_cpu_buffers();
            self.complete_load(id);
        } else {
            self.fail_load(id, AssetError::new("GPU upload failed", path));
        }
    }

    fn update_progress(&self, id: AssetId, progress: f32, state: LoadState) {
        let Some(record) = self.record(id) else {
            return;
        };
        record.set_state(state);
        record.bump_progress(progress);
        let observers: Vec<ProgressCallback> = record.on_progress.lock().clone();
        for observer in &observers {
            observer(id, record.progress(), state);
        }
    }

    fn complete_load(&self, id: AssetId) {
        let Some(record) = self.record(id) else {
            return;
        };
        let (callbacks, payload) = {
            let mut observers = record.on_complete.lock();
            record.set_state(LoadState::Ready);
            record.bump_progress(1.0);
            (std::mem::take(&mut *observers), record.payload.lock().clone())
        };
        record.signal.set(true);
        log::info!("asset manager: loaded '{}'", record.path);

        let progress_observers: Vec<ProgressCallback> = record.on_progress.lock().clone();
        for observer in &progress_observers {
            observer(id, 1.0, LoadState::Ready);
        }
        for callback in callbacks {
            callback(id, true, &payload);
        }
    }

    fn fail_load(&self, id: AssetId, error: AssetError) {
        let Some(record) = self.record(id) else {
            return;
        };
        log::error!("asset manager: failed to load '{}': {error}", record.path);
        let callbacks = {
            let mut observers = record.on_complete.lock();
            record.set_state(LoadState::Failed);
            *record.error.lock() = Some(error);
            std::mem::take(&mut *observers)
        };
        record.signal.set(false);
        for callback in callbacks {
            callback(id, false, &AssetPayload::None);
        }
    }
}

pub(crate) type ManagerRef = Weak<ManagerInner>;
