//! The engine handle: one open vault, its key state, medium and manifests.
//!
//! All shared state lives behind the handle: no globals, no singletons, no
//! ambient thread-local configuration. Gathers take the manifest index read
//! lock; scatter and re-scatter publication take the write lock only to
//! install a sealed manifest. The long mixing/projection work runs outside
//! any lock against the immutable key state.

use crate::advisor::{AccessEvent, AccessOp, ParameterAdvisor};
use crate::error::{Result, VaultError};
use crate::hardening::disable_core_dumps;
use crate::keys::{HybridKey, KeyState};
use crate::manifest::{Manifest, ManifestId};
use crate::medium::BlockMedium;
use crate::params::ParameterSet;
use crate::pipeline;
use crate::rescatter;
use crate::stats::{Statistics, StatisticsSnapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default per-operation buffer cap, 1 MiB.
pub const DEFAULT_MEMORY_CAP: usize = 1024 * 1024;

/// Default re-scatter pass interval.
pub const DEFAULT_RESCATTER_INTERVAL: Duration = Duration::from_secs(3600);

/// Cooperative cancellation flag, checked at every chunk boundary.
#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(VaultError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Engine configuration fixed at `open_vault`.
#[derive(Clone)]
pub struct VaultConfig {
    /// Default parameter set; per-file overrides and advisor advice merge
    /// over it.
    pub parameters: ParameterSet,
    /// Cap on per-operation data buffers.
    pub memory_cap: usize,
    /// Re-scatter cadence; `None` disables the background task.
    pub rescatter_interval: Option<Duration>,
    /// Optional adaptive parameter advisor.
    pub advisor: Option<Arc<dyn ParameterAdvisor>>,
    /// Optional bounded access-event channel to the adaptive layer.
    pub access_events: Option<tokio::sync::mpsc::Sender<AccessEvent>>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        VaultConfig {
            parameters: ParameterSet::default(),
            memory_cap: DEFAULT_MEMORY_CAP,
            rescatter_interval: Some(DEFAULT_RESCATTER_INTERVAL),
            advisor: None,
            access_events: None,
        }
    }
}

pub(crate) struct EngineInner {
    pub(crate) keys: KeyState,
    pub(crate) medium: Arc<dyn BlockMedium>,
    pub(crate) defaults: ParameterSet,
    pub(crate) memory_cap: usize,
    pub(crate) advisor: Option<Arc<dyn ParameterAdvisor>>,
    pub(crate) events: Option<tokio::sync::mpsc::Sender<AccessEvent>>,
    pub(crate) index: RwLock<HashMap<ManifestId, Arc<Manifest>>>,
    pub(crate) stats: Statistics,
    pub(crate) shutdown: Cancellation,
    closed: AtomicBool,
    rescatter_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) shutdown_notify: Arc<Notify>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // Key state zeroizes via its own drop; the medium gets a final sync
        // on every exit path, panics included.
        self.medium.sync().ok();
    }
}

/// Handle to an open vault. Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

/// Open a vault over `medium` with the externally derived 64-byte hybrid key.
pub async fn open_vault(
    medium: Arc<dyn BlockMedium>,
    hybrid_key: &[u8],
    config: VaultConfig,
) -> Result<Engine> {
    disable_core_dumps().ok();

    let key = HybridKey::from_bytes(hybrid_key)?;
    if medium.size() == 0 {
        return Err(VaultError::MediumUnavailable("medium has zero capacity".into()));
    }
    let caps = medium.capabilities();
    if !(caps.range_read && caps.seekable) {
        return Err(VaultError::MediumUnavailable(
            "medium lacks range_read/seekable capabilities".into(),
        ));
    }
    config.parameters.validate()?;

    let inner = Arc::new(EngineInner {
        keys: KeyState::derive(&key),
        medium,
        defaults: config.parameters,
        memory_cap: config.memory_cap,
        advisor: config.advisor,
        events: config.access_events,
        index: RwLock::new(HashMap::new()),
        stats: Statistics::default(),
        shutdown: Cancellation::new(),
        closed: AtomicBool::new(false),
        rescatter_task: Mutex::new(None),
        shutdown_notify: Arc::new(Notify::new()),
    });

    if let Some(interval) = config.rescatter_interval {
        let task = rescatter::spawn(Arc::downgrade(&inner), inner.shutdown_notify.clone(), interval);
        *inner.rescatter_task.lock() = Some(task);
    }

    Ok(Engine { inner })
}

/// Idempotent shutdown: stops the re-scatter task, syncs the medium.
pub async fn close_vault(engine: &Engine) -> Result<()> {
    engine.close().await
}

impl Engine {
    /// Scatter a source stream; the returned manifest is the only handle to
    /// the stored bytes.
    pub async fn scatter<R: AsyncRead + Unpin>(
        &self,
        name: &str,
        reader: &mut R,
    ) -> Result<Arc<Manifest>> {
        self.scatter_inner(name, reader, None, &Cancellation::new()).await
    }

    /// Scatter with caller-controlled cancellation. A cancelled scatter
    /// discards its partial manifest; stray cells already written are
    /// indistinguishable from noise.
    pub async fn scatter_with<R: AsyncRead + Unpin>(
        &self,
        name: &str,
        reader: &mut R,
        cancel: &Cancellation,
    ) -> Result<Arc<Manifest>> {
        self.scatter_inner(name, reader, None, cancel).await
    }

    /// Scatter with an explicit per-file parameter override record, which
    /// wins over both the engine defaults and the advisor.
    pub async fn scatter_with_overrides<R: AsyncRead + Unpin>(
        &self,
        name: &str,
        reader: &mut R,
        overrides: &crate::params::ParameterOverrides,
    ) -> Result<Arc<Manifest>> {
        self.scatter_inner(name, reader, Some(overrides), &Cancellation::new()).await
    }

    async fn scatter_inner<R: AsyncRead + Unpin>(
        &self,
        name: &str,
        reader: &mut R,
        overrides: Option<&crate::params::ParameterOverrides>,
        cancel: &Cancellation,
    ) -> Result<Arc<Manifest>> {
        let inner = self.ensure_open()?;
        let started = Instant::now();

        let params = inner.select_parameters(name, overrides)?;
        let manifest = pipeline::scatter_stream(
            &inner.keys,
            inner.medium.as_ref(),
            &inner.stats,
            params,
            inner.memory_cap,
            cancel,
            reader,
        )
        .await?;
        let manifest = Arc::new(manifest);

        inner.index.write().insert(manifest.manifest_id, manifest.clone());
        inner.stats.add(&inner.stats.scatter_ops, 1);
        inner.emit(AccessEvent {
            manifest_id: manifest.manifest_id,
            op: AccessOp::Scatter,
            bytes: manifest.logical_size,
            latency: started.elapsed(),
        });
        debug!(
            manifest = %manifest.manifest_id,
            bytes = manifest.logical_size,
            "scatter sealed"
        );
        Ok(manifest)
    }

    /// Reconstruct a file into `writer`, in strict logical order. Never
    /// writes to the medium, and never hands `writer` a byte before the
    /// whole stream has verified against the manifest's integrity root: a
    /// failed gather delivers nothing.
    pub async fn gather<W: AsyncWrite + Unpin>(
        &self,
        manifest: &Manifest,
        writer: &mut W,
    ) -> Result<()> {
        self.gather_with(manifest, writer, &Cancellation::new()).await
    }

    pub async fn gather_with<W: AsyncWrite + Unpin>(
        &self,
        manifest: &Manifest,
        writer: &mut W,
        cancel: &Cancellation,
    ) -> Result<()> {
        let inner = self.ensure_open()?;
        let started = Instant::now();

        pipeline::gather_stream(
            &inner.keys,
            inner.medium.as_ref(),
            &inner.stats,
            manifest,
            inner.memory_cap,
            cancel,
            writer,
        )
        .await?;

        inner.stats.add(&inner.stats.gather_ops, 1);
        inner.emit(AccessEvent {
            manifest_id: manifest.manifest_id,
            op: AccessOp::Gather,
            bytes: manifest.logical_size,
            latency: started.elapsed(),
        });
        Ok(())
    }

    /// Current manifest for an id, if the engine still tracks it.
    pub fn manifest(&self, id: &ManifestId) -> Option<Arc<Manifest>> {
        self.inner.index.read().get(id).cloned()
    }

    /// Snapshot of every tracked manifest.
    pub fn manifests(&self) -> Vec<Arc<Manifest>> {
        self.inner.index.read().values().cloned().collect()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Re-scatter every tracked manifest that fits the buffer cap, now,
    /// regardless of staleness. The background task does the same on its
    /// interval for stale buckets only.
    pub async fn rescatter_now(&self) -> Result<()> {
        let inner = self.ensure_open()?;
        rescatter::run_pass(inner, true).await;
        Ok(())
    }

    /// Idempotent shutdown. Signals the re-scatter task, lets it finish its
    /// current file, then syncs the medium. Key state zeroizes when the last
    /// handle drops.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.shutdown.cancel();
        // notify_one stores a permit, so the signal is not lost if the task
        // is mid-pass rather than parked on the interval.
        self.inner.shutdown_notify.notify_one();
        let task = self.inner.rescatter_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("re-scatter task did not shut down cleanly: {e}");
            }
        }
        self.inner.medium.sync()?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<&EngineInner> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(VaultError::MediumUnavailable("vault is closed".into()));
        }
        Ok(&self.inner)
    }
}

impl EngineInner {
    /// Parameter selection: defaults, then advisor advice, then the explicit
    /// per-file override, each merge re-validated; always a fresh topology
    /// salt.
    fn select_parameters(
        &self,
        name: &str,
        explicit: Option<&crate::params::ParameterOverrides>,
    ) -> Result<ParameterSet> {
        let mut params = self.defaults;
        if let Some(advisor) = &self.advisor {
            if let Some(overrides) = advisor.advise(name, &self.defaults) {
                params = overrides.apply(params)?;
            }
        }
        if let Some(overrides) = explicit {
            params = overrides.apply(params)?;
        }
        params.randomize_salt();
        Ok(params)
    }

    pub(crate) fn emit(&self, event: AccessEvent) {
        if let Some(tx) = &self.events {
            // Lossy on a full channel.
            let _ = tx.try_send(event);
        }
    }
}
