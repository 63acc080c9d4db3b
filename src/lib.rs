//! # Kubesmith - Cluster-Lifecycle Automation Engine
//!
//! Kubesmith executes declarative playbooks — hierarchical trees of tasks —
//! against a fleet of hosts (bare machines, Kubernetes-API endpoints,
//! monitoring endpoints) to install and configure distributed
//! infrastructure.
//!
//! ## Core Concepts
//!
//! - **Playbooks**: YAML-defined trees of plays, blocks and tasks
//! - **Inventory**: hosts and nested groups with layered variables
//! - **Variable Store**: per-host variable records with deterministic scope
//!   precedence, mutated concurrently and synced to a persistence backend
//! - **Modules**: named, idempotent operations invoked per host
//! - **Connectors**: transport abstraction for reaching hosts (local shell,
//!   SSH, kubectl-driven clusters, Prometheus HTTP)
//! - **Tasks**: per-host gating (`when`), looping, `failed_when` and
//!   `register` around a module dispatch
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      CLI Interface                         │
//! │                (clap-based command parsing)                │
//! └────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                   Pipeline Executor                        │
//! │        (plays → blocks → tasks, serial batching)           │
//! └────────────────────────────────────────────────────────────┘
//!           │                  │                    │
//!           ▼                  ▼                    ▼
//! ┌─────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │  Variable Store │ │ Module Registry  │ │ Template Engine  │
//! │ (precedence +   │ │ (explicit table, │ │ (minijinja +     │
//! │  diff-synced)   │ │  built-ins)      │ │  filter library) │
//! └─────────────────┘ └──────────────────┘ └──────────────────┘
//!                              │
//!                              ▼
//! ┌────────────────────────────────────────────────────────────┐
//! │                    Connector Layer                         │
//! │        (local, SSH, kubernetes, prometheus)                │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use kubesmith::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!     let inventory = Inventory::from_file("inventory.yaml")?;
//!     let playbook = Playbook::from_file("create-cluster.yaml")?;
//!
//!     let store = Arc::new(VariableStore::new(
//!         "create-cluster",
//!         config,
//!         inventory,
//!         Box::new(MemorySource::new()),
//!     )?);
//!     let registry = Arc::new(ModuleRegistry::with_builtins());
//!
//!     let mut executor = PipelineExecutor::new(store, registry);
//!     executor.run(&playbook).await?;
//!     println!("{}", executor.status.summary());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connector;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod modules;
pub mod playbook;
pub mod task;
pub mod template;
pub mod vars;

pub use error::{Error, Result};

pub mod prelude {
    //! Convenient re-exports of the most commonly used types.

    pub use crate::config::Config;
    pub use crate::connector::{connect, Connector};
    pub use crate::error::{Error, Result};
    pub use crate::executor::PipelineExecutor;
    pub use crate::inventory::Inventory;
    pub use crate::modules::{ExecOptions, Module, ModuleOutput, ModuleRegistry};
    pub use crate::playbook::Playbook;
    pub use crate::task::{PipelineStatus, Task, TaskStatus};
    pub use crate::vars::source::{FileSource, MemorySource, Source};
    pub use crate::vars::store::VariableStore;
    pub use crate::vars::{combine_variables, Vars};
}
