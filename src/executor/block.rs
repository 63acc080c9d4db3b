//! Block execution: walking the task tree.
//!
//! Blocks run sequentially. A grouping block executes `block` children,
//! falls to `rescue` on failure (a successful rescue clears the failure),
//! and runs `always` regardless. `when` conditions and the tolerate-errors
//! flag inherit downwards; `run_once` collapses the batch for one node.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use super::ExecutorOptions;
use crate::error::{Error, Result};
use crate::playbook::{collapse_run_once, Block};
use crate::task::{ModuleSpec, PipelinePhase, PipelineStatus, Task};
use crate::vars::store::merge_runtime;

/// Execute a list of blocks against a host batch.
///
/// Boxed because grouping blocks recurse.
pub(crate) fn exec_blocks<'a>(
    options: &'a ExecutorOptions,
    status: &'a mut PipelineStatus,
    hosts: &'a [String],
    ignore_errors: Option<bool>,
    when: &'a [String],
    blocks: &'a [Block],
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        for block in blocks {
            let batch: Vec<String> = collapse_run_once(&[hosts.to_vec()], block.run_once, &[])
                .into_iter()
                .flatten()
                .collect();
            if batch.is_empty() {
                continue;
            }

            let ignore = block.ignore_errors.or(ignore_errors);
            let mut inherited_when = when.to_vec();
            for condition in &block.when {
                if !inherited_when.contains(condition) {
                    inherited_when.push(condition.clone());
                }
            }

            if !block.vars.is_empty() {
                options
                    .store
                    .merge(merge_runtime(block.vars.clone(), batch.clone()))?;
            }

            if !block.block.is_empty() {
                let mut block_err = exec_blocks(
                    options,
                    status,
                    &batch,
                    ignore,
                    &inherited_when,
                    &block.block,
                )
                .await
                .err();

                if block_err.is_some() && !block.rescue.is_empty() {
                    match exec_blocks(
                        options,
                        status,
                        &batch,
                        ignore,
                        &inherited_when,
                        &block.rescue,
                    )
                    .await
                    {
                        Ok(()) => {
                            // Rescue recovered the block.
                            block_err = None;
                            status.phase = PipelinePhase::Running;
                        }
                        Err(e) => warn!(block = %block.name, error = %e, "rescue failed"),
                    }
                }

                let always_err = if block.always.is_empty() {
                    None
                } else {
                    exec_blocks(
                        options,
                        status,
                        &batch,
                        ignore,
                        &inherited_when,
                        &block.always,
                    )
                    .await
                    .err()
                };

                if let Some(e) = block_err {
                    return Err(e);
                }
                if let Some(e) = always_err {
                    return Err(e);
                }
            } else {
                exec_task(options, status, &batch, ignore, &inherited_when, block).await?;
            }
        }

        Ok(())
    })
}

/// Execute a leaf block as a task.
///
/// The module is detected from the block's unrecognized keys: the first
/// key naming a registered module wins.
async fn exec_task(
    options: &ExecutorOptions,
    status: &mut PipelineStatus,
    hosts: &[String],
    ignore_errors: Option<bool>,
    when: &[String],
    block: &Block,
) -> Result<()> {
    let module = block
        .unknown
        .iter()
        .find(|(name, _)| options.registry.contains(name))
        .map(|(name, args)| ModuleSpec {
            name: name.clone(),
            args: args.clone(),
        })
        .ok_or_else(|| Error::NoModuleDetected(block.name.clone()))?;

    let name = if block.name.is_empty() {
        module.name.clone()
    } else {
        block.name.clone()
    };
    let mut task = Task::new(name, hosts.to_vec(), module);
    task.when = when.to_vec();
    task.failed_when = block.failed_when.clone();
    task.loop_ = block.loop_.clone();
    task.register = block.register.clone();
    task.ignore_error = ignore_errors;

    super::TaskExecutor {
        store: options.store.clone(),
        registry: options.registry.clone(),
        status,
        task: Arc::new(task),
        task_timeout: options.task_timeout,
    }
    .exec()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::inventory::Inventory;
    use crate::modules::ModuleRegistry;
    use crate::playbook::Playbook;
    use crate::vars::source::MemorySource;
    use crate::vars::store::{all_vars, VariableStore};
    use serde_json::json;
    use std::time::Duration;

    fn options(hosts: &[&str]) -> ExecutorOptions {
        let inventory_yaml = format!(
            "hosts:\n{}",
            hosts
                .iter()
                .map(|h| format!("  {h}: {{}}\n"))
                .collect::<String>()
        );
        ExecutorOptions {
            store: Arc::new(
                VariableStore::new(
                    "test",
                    Config::default(),
                    Inventory::from_yaml(&inventory_yaml).unwrap(),
                    Box::new(MemorySource::new()),
                )
                .unwrap(),
            ),
            registry: Arc::new(ModuleRegistry::with_builtins()),
            task_timeout: Duration::from_secs(5),
        }
    }

    fn tasks_of(yaml: &str) -> Vec<Block> {
        Playbook::from_yaml(yaml).unwrap().plays.remove(0).tasks
    }

    #[tokio::test]
    async fn test_rescue_recovers_block_failure() {
        let opts = options(&["h1"]);
        let blocks = tasks_of(
            r#"
- hosts: h1
  tasks:
    - name: guarded
      block:
        - name: boom
          assert:
            that: "1 == 2"
      rescue:
        - name: recover
          set_fact:
            rescued: true
      always:
        - name: cleanup
          set_fact:
            cleaned: true
"#,
        );
        let mut status = PipelineStatus::default();
        let hosts = vec!["h1".to_string()];
        exec_blocks(&opts, &mut status, &hosts, None, &[], &blocks)
            .await
            .unwrap();

        let resolved = opts.store.get(all_vars("h1")).unwrap();
        assert_eq!(resolved["rescued"], json!(true));
        assert_eq!(resolved["cleaned"], json!(true));
        assert_ne!(status.phase, PipelinePhase::Failed);
    }

    #[tokio::test]
    async fn test_run_once_collapses_to_first_host() {
        let opts = options(&["h1", "h2"]);
        let blocks = tasks_of(
            r#"
- hosts: all
  tasks:
    - name: only once
      run_once: true
      set_fact:
        touched: true
"#,
        );
        let mut status = PipelineStatus::default();
        let hosts = vec!["h1".to_string(), "h2".to_string()];
        exec_blocks(&opts, &mut status, &hosts, None, &[], &blocks)
            .await
            .unwrap();

        let h1 = opts.store.get(all_vars("h1")).unwrap();
        let h2 = opts.store.get(all_vars("h2")).unwrap();
        assert_eq!(h1["touched"], json!(true));
        assert!(!h2.contains_key("touched"));
    }

    #[tokio::test]
    async fn test_unknown_module_is_rejected() {
        let opts = options(&["h1"]);
        let blocks = tasks_of(
            r#"
- hosts: h1
  tasks:
    - name: bogus
      frobnicate:
        level: 11
"#,
        );
        let mut status = PipelineStatus::default();
        let hosts = vec!["h1".to_string()];
        let err = exec_blocks(&opts, &mut status, &hosts, None, &[], &blocks).await;
        assert!(matches!(err, Err(Error::NoModuleDetected(_))));
    }
}
