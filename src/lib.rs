#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections

//! # Component Host
//!
//! A process-local plugin host: named component instances are loaded into
//! the same address space, each gets a pair of task queues drawn from a
//! shared worker pool, and remote load/unload/list control is exposed over
//! a TCP surface with optional heartbeat-based auto-unload.
//!
//! ## Architecture
//!
//! The [`Loader`] is the registry and lifecycle manager: it owns the
//! name-to-instance map behind one lock, talks to the
//! [`ComponentFactory`] to construct instances, and hands each instance
//! two [`TaskQueue`]s serviced by the shared [`WorkerPool`]. The optional
//! [control surface](control) translates remote requests into loader
//! calls, and a [`LivenessMonitor`] per remote client unloads that
//! client's components automatically when its heartbeats stop.
//!
//! Shutdown is strictly ordered: control surface, then worker pool
//! (drained and joined), then instance teardown, then the pool object.
//!
//! ## Module Organization
//!
//! - [`component`] - the `Component` trait and initialization context
//! - [`factory`] - registry of component constructors
//! - [`loader`] - the registry/lifecycle core
//! - [`pool`] / [`queue`] - shared worker pool and per-instance queues
//! - [`liveness`] - heartbeat watchdogs
//! - [`control`] - TCP control surface and wire protocol
//! - [`config`] - host configuration
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use component_host::{ComponentFactory, HostConfig, LoadParams, Loader};
//!
//! # async fn example() -> component_host::Result<()> {
//! let factory = Arc::new(ComponentFactory::new());
//! // factory.register("driver::Camera", || Ok(Box::new(Camera::default())));
//!
//! let mut config = HostConfig::default();
//! config.control.enabled = false; // embedded, no TCP listener
//!
//! let mut loader = Loader::new(factory, config).await?;
//! loader.load(LoadParams::new("cam", "driver::Camera")).await?;
//! assert_eq!(loader.list().await, vec!["cam".to_string()]);
//!
//! loader.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod config;
pub mod control;
pub mod error;
pub mod factory;
pub mod liveness;
pub mod loader;
pub mod logging;
pub mod pool;
pub mod queue;

pub use component::{Component, ComponentContext};
pub use config::{ConfigError, ControlConfig, HostConfig, LivenessConfig};
pub use control::{ControlRequest, ControlResponse, ControlServer};
pub use error::{HostError, Result};
pub use factory::ComponentFactory;
pub use liveness::LivenessMonitor;
pub use loader::{LoadParams, Loader};
pub use logging::init_logging;
pub use pool::WorkerPool;
pub use queue::{QueueKind, TaskQueue};
