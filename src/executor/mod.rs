//! Execution engine: pipeline → play → block → task.
//!
//! The pipeline executor walks plays sequentially. Per play it resolves
//! host patterns, optionally gathers facts (seeding each host's remote
//! variables once), groups hosts into serial batches, merges play
//! variables, and hands the task tree to the block walker.

mod block;
mod task;

pub use task::TaskExecutor;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::connector;
use crate::error::{Error, Result};
use crate::modules::ModuleRegistry;
use crate::playbook::{collapse_run_once, group_hosts_by_serial, Play, Playbook};
use crate::task::{PipelinePhase, PipelineStatus};
use crate::vars::store::{all_vars, hostnames, merge_remote_facts, merge_runtime, VariableStore};
use crate::vars::Vars;

/// Shared state threaded through the executor layers.
pub struct ExecutorOptions {
    /// The run's variable store.
    pub store: Arc<VariableStore>,
    /// The module catalog.
    pub registry: Arc<ModuleRegistry>,
    /// Wall-clock bound per module dispatch.
    pub task_timeout: Duration,
}

/// Executes a playbook and accumulates pipeline status.
pub struct PipelineExecutor {
    /// Shared executor state.
    pub options: ExecutorOptions,
    /// Monotonic run status.
    pub status: PipelineStatus,
}

impl PipelineExecutor {
    /// Create an executor over a store and module registry.
    pub fn new(store: Arc<VariableStore>, registry: Arc<ModuleRegistry>) -> Self {
        Self {
            options: ExecutorOptions {
                store,
                registry,
                task_timeout: crate::task::DEFAULT_TASK_TIMEOUT,
            },
            status: PipelineStatus::default(),
        }
    }

    /// Override the per-dispatch timeout.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.options.task_timeout = timeout;
        self
    }

    /// Run every play; a failed task halts execution with its error while
    /// the accumulated status stays inspectable.
    pub async fn run(&mut self, playbook: &Playbook) -> Result<()> {
        self.status.phase = PipelinePhase::Running;
        let result = self.run_plays(playbook).await;
        match &result {
            Ok(()) if self.status.phase != PipelinePhase::Failed => {
                self.status.phase = PipelinePhase::Succeeded;
            }
            Ok(()) => {}
            Err(_) => self.status.phase = PipelinePhase::Failed,
        }
        result
    }

    async fn run_plays(&mut self, playbook: &Playbook) -> Result<()> {
        for play in &playbook.plays {
            self.run_play(play).await?;
        }
        Ok(())
    }

    async fn run_play(&mut self, play: &Play) -> Result<()> {
        info!(play = %play.name, "starting play");
        let hosts = self.options.store.get(hostnames(play.hosts.clone()))?;
        if hosts.is_empty() {
            return Err(Error::EmptyHosts(play.name.clone()));
        }

        if play.gather_facts {
            for host in &hosts {
                let facts = gather_host_facts(&self.options.store, host).await?;
                self.options
                    .store
                    .merge(merge_remote_facts(facts, host.clone()))?;
            }
        }

        let batches = if play.run_once {
            collapse_run_once(&[hosts.clone()], true, &[])
        } else {
            group_hosts_by_serial(&hosts, play.serial.as_ref())?
        };

        for batch in batches {
            debug!(play = %play.name, hosts = ?batch, "running batch");
            if !play.vars.is_empty() {
                self.options
                    .store
                    .merge(merge_runtime(play.vars.clone(), batch.clone()))?;
            }
            block::exec_blocks(
                &self.options,
                &mut self.status,
                &batch,
                None,
                &[],
                &play.tasks,
            )
            .await?;
        }

        Ok(())
    }
}

/// Gather facts from one host through its connector.
async fn gather_host_facts(store: &Arc<VariableStore>, host: &str) -> Result<Vars> {
    let vars = store.get(all_vars(host))?;
    let mut conn = connector::connect(host, &vars).await?;
    let info = conn.host_info().await;
    let _ = conn.close().await;
    info
}
