//! Task execution: per-host fan-out and outcome aggregation.
//!
//! One tokio task is launched per target host — no pool bound at this
//! layer, the fan-out equals the host count. Each per-host unit runs the
//! task lifecycle (`when` → loop expansion → `failed_when` → module
//! dispatch → `register`) independently and writes its outcome into a
//! pre-sized, per-host-indexed slot. After the join barrier the outcomes
//! fold into the task phase and the pipeline counters.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use colored::Colorize;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::modules::{ExecOptions, ModuleRegistry, STDOUT_FALSE, STDOUT_SKIP};
use crate::task::{
    FailedDetail, PipelinePhase, PipelineStatus, Task, TaskHostResult, TaskPhase, TaskStatus,
};
use crate::template;
use crate::vars::store::{all_vars, host_name_max_len, merge_runtime, VariableStore};
use crate::vars::{keys, value_to_items, Vars};

/// Executes one task across its target hosts.
pub struct TaskExecutor<'a> {
    /// The run's variable store.
    pub store: Arc<VariableStore>,
    /// The module catalog.
    pub registry: Arc<ModuleRegistry>,
    /// Pipeline state receiving counters and the failure log.
    pub status: &'a mut PipelineStatus,
    /// The task to execute.
    pub task: Arc<Task>,
    /// Wall-clock bound for each per-host module dispatch.
    pub task_timeout: Duration,
}

impl TaskExecutor<'_> {
    /// Fan the task out, join, aggregate, and fold into pipeline status.
    ///
    /// Returns the task status on anything but the failed phase; a failed
    /// task appends to the pipeline failure log and returns a terminal
    /// error so the enclosing block halts.
    pub async fn exec(&mut self) -> Result<TaskStatus> {
        println!("{} {}", Local::now().format("%H:%M:%S"), self.task.name);

        let mut status = TaskStatus::running(self.task.hosts.len());
        let mut units = Vec::with_capacity(self.task.hosts.len());
        for (index, host) in self.task.hosts.iter().enumerate() {
            let store = self.store.clone();
            let registry = self.registry.clone();
            let task = self.task.clone();
            let host = host.clone();
            let timeout = self.task_timeout;
            units.push(tokio::spawn(async move {
                (index, exec_task_host(store, registry, task, host, timeout).await)
            }));
        }

        // Join barrier; outcomes land by index, never by append.
        for (spawn_index, unit) in join_all(units).await.into_iter().enumerate() {
            match unit {
                Ok((index, result)) => status.host_results[index] = result,
                Err(e) => {
                    status.host_results[spawn_index] = TaskHostResult {
                        host: self.task.hosts[spawn_index].clone(),
                        stdout: String::new(),
                        stderr: format!("host unit aborted: {e}"),
                    }
                }
            }
        }

        status.phase = TaskPhase::Success;
        for result in &status.host_results {
            if !result.stderr.is_empty() {
                status.phase = if self.task.tolerates_errors() {
                    TaskPhase::Ignored
                } else {
                    TaskPhase::Failed
                };
                break;
            }
        }
        self.print_host_results(&status);

        self.status.task_result.total += 1;
        match status.phase {
            TaskPhase::Success => self.status.task_result.success += 1,
            TaskPhase::Ignored => self.status.task_result.ignored += 1,
            TaskPhase::Failed => self.status.task_result.failed += 1,
            TaskPhase::Running => {}
        }

        if status.is_failed() {
            self.status.failed_detail.push(FailedDetail {
                task: self.task.name.clone(),
                hosts: status.host_results.clone(),
            });
            self.status.phase = PipelinePhase::Failed;
            return Err(Error::TaskFailed(self.task.name.clone()));
        }

        Ok(status)
    }

    /// One colored status line per host, aligned on the longest hostname.
    fn print_host_results(&self, status: &TaskStatus) {
        let max_len = self.store.get(host_name_max_len()).unwrap_or_default();
        for result in &status.host_results {
            let padding = " ".repeat(max_len.saturating_sub(result.host.len()));
            let outcome = if !result.stderr.is_empty() {
                if self.task.tolerates_errors() {
                    "ignored".blue()
                } else {
                    "failed".red()
                }
            } else if result.stdout == STDOUT_SKIP {
                "skip".blue()
            } else {
                "success".green()
            };
            println!("  [{}]{} {}", result.host.cyan(), padding, outcome);
        }
    }
}

/// One host's full evaluation; faults here never escape as panics, so one
/// host can never corrupt another's outcome.
async fn exec_task_host(
    store: Arc<VariableStore>,
    registry: Arc<ModuleRegistry>,
    task: Arc<Task>,
    host: String,
    timeout: Duration,
) -> TaskHostResult {
    let (stdout, mut stderr) =
        run_host_lifecycle(&store, &registry, &task, &host, timeout).await;

    if let Err(e) = deal_register(&store, &task, &host, &stdout, &stderr) {
        stderr = e.to_string();
    }
    if !stderr.is_empty() {
        if task.tolerates_errors() {
            debug!(host = %host, stdout = %stdout, stderr = %stderr, task = %task.name, "task run failed (tolerated)");
        } else {
            error!(host = %host, stdout = %stdout, stderr = %stderr, task = %task.name, "task run failed");
        }
    }

    TaskHostResult { host, stdout, stderr }
}

/// `when` gating, loop expansion, per-iteration dispatch.
async fn run_host_lifecycle(
    store: &Arc<VariableStore>,
    registry: &Arc<ModuleRegistry>,
    task: &Arc<Task>,
    host: &str,
    timeout: Duration,
) -> (String, String) {
    let host_vars = match store.get(all_vars(host)) {
        Ok(vars) => vars,
        Err(e) => {
            return (
                String::new(),
                format!("failed to get host {host} variables: {e}"),
            )
        }
    };

    // An unevaluable condition fails closed; a false condition skips the
    // host without failing it.
    if !task.when.is_empty() {
        match template::parse_bool(&host_vars, &task.when) {
            Err(e) => return (String::new(), format!("parse when condition error: {e}")),
            Ok(false) => return (STDOUT_SKIP.to_string(), String::new()),
            Ok(true) => {}
        }
    }

    let items = match &task.loop_ {
        None => vec![Value::Null],
        Some(raw) => value_to_items(&host_vars, raw),
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    for item in items {
        let mut patch = Vars::new();
        patch.insert(keys::ITEM.to_string(), item);
        if let Err(e) = store.merge(merge_runtime(patch, vec![host.to_string()])) {
            return (stdout, format!("set loop item error: {e}"));
        }

        let dispatch = dispatch_module(store, registry, task, host, timeout).await;
        stdout = dispatch.stdout;
        stderr = dispatch.stderr;

        let mut clear = Vars::new();
        clear.insert(keys::ITEM.to_string(), Value::Null);
        if let Err(e) = store.merge(merge_runtime(clear, vec![host.to_string()])) {
            return (stdout, format!("clear loop item error: {e}"));
        }

        if dispatch.halt {
            break;
        }
    }

    (stdout, stderr)
}

struct ModuleDispatch {
    stdout: String,
    stderr: String,
    /// Stop iterating loop items (failed_when fired or dispatch aborted).
    halt: bool,
}

/// `failed_when` gate plus the actual module call, bounded by the timeout.
async fn dispatch_module(
    store: &Arc<VariableStore>,
    registry: &Arc<ModuleRegistry>,
    task: &Arc<Task>,
    host: &str,
    timeout: Duration,
) -> ModuleDispatch {
    // Re-resolve: the loop item is part of the context now.
    let host_vars = match store.get(all_vars(host)) {
        Ok(vars) => vars,
        Err(e) => {
            return ModuleDispatch {
                stdout: String::new(),
                stderr: format!("failed to get host {host} variables: {e}"),
                halt: true,
            }
        }
    };

    if !task.failed_when.is_empty() {
        match template::parse_bool(&host_vars, &task.failed_when) {
            Err(e) => {
                return ModuleDispatch {
                    stdout: String::new(),
                    stderr: format!("parse failed_when condition error: {e}"),
                    halt: true,
                }
            }
            Ok(true) => {
                return ModuleDispatch {
                    stdout: STDOUT_FALSE.to_string(),
                    stderr: "reach failed_when, failed".to_string(),
                    halt: true,
                }
            }
            Ok(false) => {}
        }
    }

    let Some(module) = registry.get(&task.module.name) else {
        return ModuleDispatch {
            stdout: String::new(),
            stderr: format!("module {:?} not found", task.module.name),
            halt: true,
        };
    };

    let options = ExecOptions {
        host: host.to_string(),
        store: store.clone(),
        args: task.module.args.clone(),
        task: task.clone(),
    };
    match tokio::time::timeout(timeout, module.execute(&options)).await {
        Ok(output) => ModuleDispatch {
            stdout: output.stdout,
            stderr: output.stderr,
            halt: false,
        },
        // A cancelled dispatch records a failure instead of stalling the
        // join barrier.
        Err(_) => ModuleDispatch {
            stdout: String::new(),
            stderr: format!(
                "module {:?} timed out after {}s",
                task.module.name,
                timeout.as_secs()
            ),
            halt: true,
        },
    }
}

/// Merge `{register: {stdout, stderr}}` into the host's runtime scope,
/// decoding each stream as JSON when possible.
fn deal_register(
    store: &Arc<VariableStore>,
    task: &Arc<Task>,
    host: &str,
    stdout: &str,
    stderr: &str,
) -> Result<()> {
    let Some(register) = &task.register else {
        return Ok(());
    };

    let stdout_value =
        serde_json::from_str::<Value>(stdout).unwrap_or_else(|_| Value::String(stdout.to_string()));
    let stderr_value =
        serde_json::from_str::<Value>(stderr).unwrap_or_else(|_| Value::String(stderr.to_string()));

    let mut data = Vars::new();
    data.insert(
        register.clone(),
        serde_json::json!({"stdout": stdout_value, "stderr": stderr_value}),
    );
    store.merge(merge_runtime(data, vec![host.to_string()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::inventory::Inventory;
    use crate::task::ModuleSpec;
    use crate::vars::source::MemorySource;
    use serde_json::json;

    fn fixture(hosts: &[&str]) -> (Arc<VariableStore>, Arc<ModuleRegistry>) {
        let inventory_yaml = format!(
            "hosts:\n{}",
            hosts
                .iter()
                .map(|h| format!("  {h}: {{}}\n"))
                .collect::<String>()
        );
        let store = Arc::new(
            VariableStore::new(
                "test",
                Config::default(),
                Inventory::from_yaml(&inventory_yaml).unwrap(),
                Box::new(MemorySource::new()),
            )
            .unwrap(),
        );
        (store, Arc::new(ModuleRegistry::with_builtins()))
    }

    fn debug_task(hosts: &[&str], msg: &str) -> Task {
        Task::new(
            "print",
            hosts.iter().map(|h| h.to_string()).collect(),
            ModuleSpec {
                name: "debug".to_string(),
                args: json!({"msg": msg}),
            },
        )
    }

    #[tokio::test]
    async fn test_when_false_skips_without_failing() {
        let (store, registry) = fixture(&["h1"]);
        let mut task = debug_task(&["h1"], "hello");
        task.when = vec!["1 == 2".to_string()];
        let mut pipeline = PipelineStatus::default();
        let status = TaskExecutor {
            store,
            registry,
            status: &mut pipeline,
            task: Arc::new(task),
            task_timeout: Duration::from_secs(5),
        }
        .exec()
        .await
        .unwrap();

        assert_eq!(status.phase, TaskPhase::Success);
        assert_eq!(status.host_results[0].stdout, STDOUT_SKIP);
        assert!(status.host_results[0].stderr.is_empty());
    }

    #[tokio::test]
    async fn test_loop_items_visible_during_iteration() {
        let (store, registry) = fixture(&["h1"]);
        let mut task = debug_task(&["h1"], "unit-{{ item }}");
        task.loop_ = Some(json!(["a", "b"]));
        task.register = Some("out".to_string());
        let mut pipeline = PipelineStatus::default();
        TaskExecutor {
            store: store.clone(),
            registry,
            status: &mut pipeline,
            task: Arc::new(task),
            task_timeout: Duration::from_secs(5),
        }
        .exec()
        .await
        .unwrap();

        let resolved = store.get(all_vars("h1")).unwrap();
        // Last iteration's output was registered; the item itself cleared.
        assert_eq!(resolved["out"]["stdout"], json!("unit-b"));
        assert_eq!(resolved[keys::ITEM], json!(null));
    }

    #[tokio::test]
    async fn test_failed_when_marks_host_failed() {
        let (store, registry) = fixture(&["h1"]);
        let mut task = debug_task(&["h1"], "never printed");
        task.failed_when = vec!["1 == 1".to_string()];
        let mut pipeline = PipelineStatus::default();
        let err = TaskExecutor {
            store,
            registry,
            status: &mut pipeline,
            task: Arc::new(task),
            task_timeout: Duration::from_secs(5),
        }
        .exec()
        .await;

        assert!(err.is_err());
        assert_eq!(pipeline.task_result.failed, 1);
        assert_eq!(pipeline.failed_detail.len(), 1);
        assert_eq!(pipeline.phase, PipelinePhase::Failed);
    }

    #[tokio::test]
    async fn test_ignored_task_does_not_fail_pipeline() {
        let (store, registry) = fixture(&["h1", "h2"]);
        let mut task = Task::new(
            "tolerated",
            vec!["h1".to_string(), "h2".to_string()],
            ModuleSpec {
                name: "assert".to_string(),
                args: json!({"that": "hostname == 'h1'"}),
            },
        );
        task.ignore_error = Some(true);
        let mut pipeline = PipelineStatus::default();
        let status = TaskExecutor {
            store,
            registry,
            status: &mut pipeline,
            task: Arc::new(task),
            task_timeout: Duration::from_secs(5),
        }
        .exec()
        .await
        .unwrap();

        assert_eq!(status.phase, TaskPhase::Ignored);
        assert_eq!(pipeline.task_result.ignored, 1);
        assert_eq!(pipeline.task_result.failed, 0);
        assert_ne!(pipeline.phase, PipelinePhase::Failed);
    }
}
