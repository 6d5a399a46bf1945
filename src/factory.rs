//! # Component Factory
//!
//! Registry of constructors keyed by type name, with thread-safe
//! registration and lookup.
//!
//! ## Overview
//!
//! The factory maps a type identifier (for example `"driver::Camera"`) to a
//! constructor closure producing a fresh boxed [`Component`]. The
//! [`Loader`](crate::loader::Loader) asks the factory for an instance on
//! every load request; nothing here holds per-instance state.
//!
//! Constructors are fallible: a constructor returning an error surfaces as
//! an instantiation failure on the load request, not as a panic.
//!
//! ## Usage
//!
//! ```rust
//! use component_host::{Component, ComponentContext, ComponentFactory};
//! use async_trait::async_trait;
//!
//! #[derive(Default)]
//! struct Camera;
//!
//! #[async_trait]
//! impl Component for Camera {
//!     async fn initialize(&mut self, _context: ComponentContext) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!     async fn disable(&mut self) {}
//! }
//!
//! let factory = ComponentFactory::new();
//! factory.register("driver::Camera", || Ok(Box::new(Camera)));
//! assert!(factory.is_registered("driver::Camera"));
//! ```

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::component::Component;
use crate::error::HostError;

type Constructor = Box<dyn Fn() -> anyhow::Result<Box<dyn Component>> + Send + Sync>;

/// Registry of component constructors keyed by type name.
#[derive(Default)]
pub struct ComponentFactory {
    constructors: RwLock<HashMap<String, Constructor>>,
}

impl ComponentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a type name, replacing any previous one.
    pub fn register<F>(&self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn() -> anyhow::Result<Box<dyn Component>> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        let replaced = self
            .constructors
            .write()
            .insert(type_name.clone(), Box::new(constructor))
            .is_some();

        if replaced {
            warn!(%type_name, "replacing existing component constructor");
        } else {
            debug!(%type_name, "component type registered");
        }
    }

    /// Produce a fresh instance for a type name.
    pub fn create(&self, type_name: &str) -> Result<Box<dyn Component>, HostError> {
        let constructors = self.constructors.read();
        let constructor =
            constructors
                .get(type_name)
                .ok_or_else(|| HostError::UnknownType {
                    type_name: type_name.to_string(),
                })?;

        constructor().map_err(|err| HostError::InstantiationFailed {
            type_name: type_name.to_string(),
            reason: err.to_string(),
        })
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.constructors.read().contains_key(type_name)
    }

    /// Sorted list of registered type names.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.read().keys().cloned().collect();
        types.sort();
        types
    }
}
