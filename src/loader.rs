//! # Loader
//!
//! The registry and lifecycle manager at the center of the host.
//!
//! ## Overview
//!
//! The `Loader` owns the mapping from component name to loaded instance,
//! the shared worker pool servicing every instance's task queues, and
//! (optionally) the TCP control surface. All lifecycle operations
//! (`load`, `unload`, `clear`, `list`) serialize on one registry lock, so
//! instance presence and absence are atomic: no two loads of the same name
//! can both succeed, and an unload observes either the fully-registered
//! instance or nothing.
//!
//! The lock is held across instance `initialize`/`disable` calls. That
//! bounds load/unload throughput to one instance transition at a time,
//! which is acceptable for a control plane and keeps the registry free of
//! torn states.
//!
//! ## Liveness
//!
//! A load request may carry a [`LivenessMonitor`]. The loader registers an
//! unload of that name as the monitor's broken callback; the callback
//! posts the name to an internal mailbox consumed by a reaper task rather
//! than touching the registry from the watchdog, so a broken-peer event
//! can never deadlock against an in-progress load. The monitor is started
//! only after the load has completed and the registry lock is released.
//!
//! ## Shutdown
//!
//! [`Loader::shutdown`] runs the strict teardown sequence: control surface
//! first, then worker pool (drain and join), then instance teardown, with
//! the pool object released last. See the method docs.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::component::{Component, ComponentContext};
use crate::config::HostConfig;
use crate::control::ControlServer;
use crate::error::{HostError, Result};
use crate::factory::ComponentFactory;
use crate::liveness::LivenessMonitor;
use crate::pool::WorkerPool;
use crate::queue::{QueueKind, TaskQueue};

/// Parameters of one load request.
#[derive(Default)]
pub struct LoadParams {
    pub name: String,
    pub type_name: String,
    pub remappings: HashMap<String, String>,
    pub args: Vec<String>,
    pub liveness: Option<LivenessMonitor>,
}

impl LoadParams {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Self::default()
        }
    }
}

/// One loaded component instance and the resources it exclusively owns.
struct Entry {
    type_name: String,
    instance: Box<dyn Component>,
    st_queue: TaskQueue,
    mt_queue: TaskQueue,
    liveness: Option<LivenessMonitor>,
    loaded_at: DateTime<Utc>,
}

impl Entry {
    /// Release owned resources: stop the liveness watchdog and disable
    /// both queues, waiting out in-flight tasks.
    async fn release_resources(&mut self) {
        if let Some(liveness) = &self.liveness {
            liveness.stop();
        }
        self.st_queue.disable().await;
        self.mt_queue.disable().await;
    }
}

/// Registry state shared with the control surface and the unload reaper.
pub(crate) struct LoaderShared {
    entries: Mutex<HashMap<String, Entry>>,
    factory: Arc<ComponentFactory>,
    pool: Arc<WorkerPool>,
    unload_tx: mpsc::UnboundedSender<String>,
}

impl LoaderShared {
    /// Load a new instance under `params.name`.
    ///
    /// The entry is inserted before initialization runs, and removed again
    /// if initialization fails, all under the registry lock.
    pub(crate) async fn load(&self, params: LoadParams) -> Result<()> {
        let LoadParams {
            name,
            type_name,
            remappings,
            args,
            liveness,
        } = params;

        let mut entries = self.entries.lock().await;
        if entries.contains_key(&name) {
            error!(%name, "cannot load component, one exists with that name already");
            return Err(HostError::DuplicateName { name });
        }

        let instance = match self.factory.create(&type_name) {
            Ok(instance) => instance,
            Err(err) => {
                error!(%name, %type_name, %err, "failed to create component instance");
                return Err(err);
            }
        };

        let st_queue = self.pool.queue(QueueKind::Exclusive);
        let mt_queue = self.pool.queue(QueueKind::Concurrent);

        let entry = entries.entry(name.clone()).or_insert(Entry {
            type_name: type_name.clone(),
            instance,
            st_queue: st_queue.clone(),
            mt_queue: mt_queue.clone(),
            liveness: liveness.clone(),
            loaded_at: Utc::now(),
        });
        debug!(%name, "component instance registered");

        let context = ComponentContext {
            name: name.clone(),
            remappings,
            args,
            st_queue,
            mt_queue,
            pool: Arc::clone(&self.pool),
            liveness: liveness.clone(),
        };

        if let Err(err) = entry.instance.initialize(context).await {
            error!(%name, %type_name, %err, "component failed to initialize");
            if let Some(mut entry) = entries.remove(&name) {
                entry.release_resources().await;
            }
            return Err(HostError::InitializationFailed {
                name,
                reason: err.to_string(),
            });
        }

        if let Some(monitor) = &liveness {
            let unload_tx = self.unload_tx.clone();
            let broken_name = name.clone();
            monitor.on_broken(move || {
                let _ = unload_tx.send(broken_name);
            });
        }

        info!(%name, %type_name, "component loaded");
        Ok(())
    }

    /// Remove an instance. Returns false when the name is not loaded.
    pub(crate) async fn unload(&self, name: &str) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(name) {
            Some(mut entry) => {
                entry.instance.disable().await;
                entry.release_resources().await;
                info!(
                    name,
                    type_name = %entry.type_name,
                    loaded_at = %entry.loaded_at,
                    "component unloaded"
                );
                true
            }
            None => false,
        }
    }

    /// Remove every instance, each through the same disable discipline as
    /// `unload`, so worker tasks cannot touch instance state after removal
    /// even while the pool keeps running.
    pub(crate) async fn clear(&self) -> bool {
        let mut entries = self.entries.lock().await;
        let names: Vec<String> = entries.keys().cloned().collect();
        for name in names {
            if let Some(mut entry) = entries.remove(&name) {
                entry.instance.disable().await;
                entry.release_resources().await;
                debug!(%name, "component cleared");
            }
        }
        true
    }

    /// Snapshot of loaded names at one consistent point, sorted.
    pub(crate) async fn list(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut names: Vec<String> = entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Refresh the liveness channel with the given identifier. Returns
    /// false when no loaded instance carries that identifier.
    pub(crate) async fn heartbeat(&self, liveness_id: &str) -> bool {
        let entries = self.entries.lock().await;
        for entry in entries.values() {
            if let Some(monitor) = &entry.liveness {
                if monitor.id() == liveness_id {
                    monitor.heartbeat();
                    return true;
                }
            }
        }
        false
    }
}

/// The component host: registry, worker pool, and optional control surface.
///
/// Construct with [`Loader::new`]; call [`Loader::shutdown`] before
/// dropping to run the ordered teardown sequence.
pub struct Loader {
    shared: Arc<LoaderShared>,
    control: Option<ControlServer>,
    reaper: Option<JoinHandle<()>>,
}

impl Loader {
    /// Start a host with the given factory and configuration.
    ///
    /// When `config.control.enabled` is false no listener is bound and the
    /// host runs as a pure embedded library.
    pub async fn new(factory: Arc<ComponentFactory>, config: HostConfig) -> Result<Self> {
        let worker_count = config.worker_threads.unwrap_or_else(default_worker_count);
        let pool = Arc::new(WorkerPool::new(worker_count));

        let (unload_tx, unload_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(LoaderShared {
            entries: Mutex::new(HashMap::new()),
            factory,
            pool,
            unload_tx,
        });
        let reaper = spawn_unload_reaper(&shared, unload_rx);

        let control = if config.control.enabled {
            Some(ControlServer::start(Arc::clone(&shared), &config.control, &config.liveness).await?)
        } else {
            None
        };

        info!(
            workers = worker_count,
            control = config.control.enabled,
            "component host started"
        );

        Ok(Self {
            shared,
            control,
            reaper: Some(reaper),
        })
    }

    /// Load a component instance; on success its liveness monitor (if any)
    /// is started once the registry lock has been released.
    pub async fn load(&self, params: LoadParams) -> Result<()> {
        let monitor = params.liveness.clone();
        self.shared.load(params).await?;
        if let Some(monitor) = monitor {
            monitor.start();
        }
        Ok(())
    }

    /// Unload a component instance by name. Returns false when the name is
    /// not loaded; a repeated unload of the same name returns false.
    pub async fn unload(&self, name: &str) -> bool {
        self.shared.unload(name).await
    }

    /// Unload every component instance.
    pub async fn clear(&self) -> bool {
        self.shared.clear().await
    }

    /// Names of all loaded component instances, sorted.
    pub async fn list(&self) -> Vec<String> {
        self.shared.list().await
    }

    /// Refresh a liveness channel by identifier.
    pub async fn heartbeat(&self, liveness_id: &str) -> bool {
        self.shared.heartbeat(liveness_id).await
    }

    /// The address the control surface is listening on, when enabled.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control.as_ref().map(ControlServer::local_addr)
    }

    pub fn worker_pool(&self) -> Arc<WorkerPool> {
        Arc::clone(&self.shared.pool)
    }

    pub fn factory(&self) -> Arc<ComponentFactory> {
        Arc::clone(&self.shared.factory)
    }

    /// Tear the host down in the required order.
    ///
    /// Order is a correctness invariant: the control surface stops
    /// accepting requests first; the worker pool is drained and its
    /// workers joined before any instance is torn down; entries are
    /// cleared while the pool object is still alive so queue teardown has
    /// a live pool to unregister from.
    pub async fn shutdown(&mut self) {
        info!("component host shutting down");
        if let Some(control) = self.control.take() {
            control.stop().await;
        }
        self.shared.pool.stop().await;
        self.shared.clear().await;
        if let Some(reaper) = self.reaper.take() {
            reaper.abort();
        }
        info!("component host stopped");
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(2)
}

fn spawn_unload_reaper(
    shared: &Arc<LoaderShared>,
    mut unload_rx: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    tokio::spawn(async move {
        while let Some(name) = unload_rx.recv().await {
            let Some(shared) = weak.upgrade() else { break };
            warn!(%name, "liveness lost, unloading component");
            if !shared.unload(&name).await {
                debug!(%name, "liveness unload raced an explicit unload, nothing to do");
            }
        }
    })
}
