//! # ModKit - Supervised Module System
//!
//! Hosts pluggable modules inside one process and keeps them healthy.
//!
//! ## Features
//!
//! - **Auto-discovery**: module types are registered via `inventory` at build time
//! - **Dependency-aware loading**: dependencies load first, cycles fail fast
//! - **Priority ordering**: start and stop follow each module's [`Priority`]
//! - **Stall detection**: lifecycle calls are timed and slow modules restarted
//!
//! ## Basic Module Example
//!
//! ```rust,ignore
//! use modkit::{async_trait, inventory, Module, ModuleDescriptor, Priority, Registrator};
//!
//! #[derive(Default)]
//! pub struct Economy;
//!
//! #[async_trait]
//! impl Module for Economy {
//!     async fn initialize(&self) -> anyhow::Result<()> { Ok(()) }
//!     async fn start(&self) -> anyhow::Result<()> { Ok(()) }
//! }
//!
//! inventory::submit! {
//!     Registrator(|| {
//!         ModuleDescriptor::of::<Economy>("economy")
//!             .with_deps(&["logger"])
//!             .with_priority(Priority::High)
//!     })
//! }
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

// Re-export inventory for user convenience
pub use inventory;

// Core module contracts and traits
pub mod contracts;
pub use crate::contracts::*;

pub mod discovery;
pub mod error;
pub mod registry;
pub mod runtime;

pub use discovery::{InventoryDiscovery, ModuleDiscovery, StaticDiscovery};
pub use error::{error_chain, Phase, SupervisorError};
pub use registry::{ModuleCatalog, ModuleDescriptor, ModuleFactory, ModuleName, Priority, Registrator};
pub use runtime::{
    run, CleanupReport, InstanceState, LoadFailure, LoadReport, ModuleSupervisor, RunOptions,
    ShutdownOptions,
};

#[cfg(test)]
mod tests;
