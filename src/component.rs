//! The capability surface every loadable component implements, plus the
//! context bundle handed to it at initialization.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::liveness::LivenessMonitor;
use crate::pool::WorkerPool;
use crate::queue::TaskQueue;

/// A loadable unit of behavior, identified by a unique name once loaded.
///
/// Implementations are constructed by the
/// [`ComponentFactory`](crate::factory::ComponentFactory) and driven by the
/// [`Loader`](crate::loader::Loader): `initialize` is called exactly once
/// after the instance becomes visible in the registry, and `disable` is
/// called exactly once when the instance is unloaded. Work scheduled through
/// the context queues keeps running between the two calls.
///
/// `initialize` errors are reported at the plugin boundary as
/// [`anyhow::Error`] and converted to a load failure; they never unwind
/// through the host.
#[async_trait]
pub trait Component: Send + 'static {
    async fn initialize(&mut self, context: ComponentContext) -> anyhow::Result<()>;

    /// Stop producing work. Tasks already queued may still run until the
    /// owning entry's queues are disabled.
    async fn disable(&mut self);
}

impl std::fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Component")
    }
}

/// Everything a component receives at initialization time.
pub struct ComponentContext {
    /// The unique name this instance was loaded under.
    pub name: String,

    /// Resolved source-name to target-name remappings for this instance.
    pub remappings: HashMap<String, String>,

    /// Free-form arguments from the load request.
    pub args: Vec<String>,

    /// Ordered queue: tasks run strictly one at a time, in push order.
    pub st_queue: TaskQueue,

    /// Concurrent queue: tasks start in push order and may overlap.
    pub mt_queue: TaskQueue,

    /// The shared worker pool servicing both queues.
    pub pool: Arc<WorkerPool>,

    /// Present when the load request asked for liveness monitoring.
    pub liveness: Option<LivenessMonitor>,
}

impl ComponentContext {
    /// Apply the instance's remapping table to a resolved name.
    ///
    /// Names without a remapping pass through unchanged.
    pub fn remapped_name(&self, name: &str) -> String {
        self.remappings
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}
