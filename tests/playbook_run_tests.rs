//! End-to-end playbook execution tests (control-node modules only).

use std::sync::Arc;
use std::time::Duration;

use kubesmith::config::Config;
use kubesmith::executor::{PipelineExecutor, TaskExecutor};
use kubesmith::inventory::Inventory;
use kubesmith::modules::ModuleRegistry;
use kubesmith::playbook::Playbook;
use kubesmith::task::{ModuleSpec, PipelinePhase, PipelineStatus, Task, TaskPhase};
use kubesmith::vars::source::MemorySource;
use kubesmith::vars::store::{all_vars, merge_runtime, VariableStore};
use kubesmith::vars::Vars;
use pretty_assertions::assert_eq;
use serde_json::json;

fn new_store(inventory: &str) -> Arc<VariableStore> {
    Arc::new(
        VariableStore::new(
            "e2e",
            Config::default(),
            Inventory::from_yaml(inventory).unwrap(),
            Box::new(MemorySource::new()),
        )
        .unwrap(),
    )
}

fn vars(value: serde_json::Value) -> Vars {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_debug_records_rendered_stdout_per_host() {
    let store = new_store("hosts:\n  h1: {}\n  h2: {}\n");
    store
        .merge(merge_runtime(vars(json!({"k": "v"})), vec!["h1".into()]))
        .unwrap();

    let task = Task::new(
        "print k",
        vec!["h1".into(), "h2".into()],
        ModuleSpec {
            name: "debug".into(),
            args: json!({"msg": "{{ k }}"}),
        },
    );
    let mut pipeline = PipelineStatus::default();
    let status = TaskExecutor {
        store,
        registry: Arc::new(ModuleRegistry::with_builtins()),
        status: &mut pipeline,
        task: Arc::new(task),
        task_timeout: Duration::from_secs(5),
    }
    .exec()
    .await
    .unwrap();

    assert_eq!(status.phase, TaskPhase::Success);
    let h1 = status.host_results.iter().find(|r| r.host == "h1").unwrap();
    assert_eq!(h1.stdout, "v");
    let h2 = status.host_results.iter().find(|r| r.host == "h2").unwrap();
    assert_eq!(h2.stdout, "");
}

#[tokio::test]
async fn test_playbook_with_register_when_and_facts() {
    let store = new_store("hosts:\n  h1: {}\n");
    let playbook = Playbook::from_yaml(
        r#"
- name: prepare
  hosts: h1
  vars:
    cluster_name: smithy
  tasks:
    - name: compute the join address
      set_fact:
        join_address: "{{ cluster_name }}.local"
    - name: echo it back
      debug:
        msg: "{{ join_address }}"
      register: echoed
    - name: verify the echo
      assert:
        that: "echoed.stdout == 'smithy.local'"
      when: "echoed | defined"
"#,
    )
    .unwrap();

    let mut executor = PipelineExecutor::new(store.clone(), Arc::new(ModuleRegistry::with_builtins()))
        .with_task_timeout(Duration::from_secs(5));
    executor.run(&playbook).await.unwrap();

    assert_eq!(executor.status.phase, PipelinePhase::Succeeded);
    assert_eq!(executor.status.task_result.total, 3);
    assert_eq!(executor.status.task_result.success, 3);

    let resolved = store.get(all_vars("h1")).unwrap();
    assert_eq!(resolved["join_address"], json!("smithy.local"));
    assert_eq!(resolved["echoed"]["stdout"], json!("smithy.local"));
}

#[tokio::test]
async fn test_failed_task_halts_remaining_execution() {
    let store = new_store("hosts:\n  h1: {}\n");
    let playbook = Playbook::from_yaml(
        r#"
- hosts: h1
  tasks:
    - name: doomed
      assert:
        that: "1 == 2"
    - name: never reached
      set_fact:
        reached: true
"#,
    )
    .unwrap();

    let mut executor =
        PipelineExecutor::new(store.clone(), Arc::new(ModuleRegistry::with_builtins()));
    assert!(executor.run(&playbook).await.is_err());

    assert_eq!(executor.status.phase, PipelinePhase::Failed);
    assert_eq!(executor.status.task_result.total, 1);
    assert_eq!(executor.status.task_result.failed, 1);
    assert_eq!(executor.status.failed_detail.len(), 1);
    assert_eq!(executor.status.failed_detail[0].task, "doomed");

    let resolved = store.get(all_vars("h1")).unwrap();
    assert!(!resolved.contains_key("reached"));
}

#[tokio::test]
async fn test_tolerated_failure_increments_ignored_and_continues() {
    let store = new_store("hosts:\n  h1: {}\n");
    let playbook = Playbook::from_yaml(
        r#"
- hosts: h1
  tasks:
    - name: flaky but tolerated
      assert:
        that: "1 == 2"
      ignore_errors: true
    - name: still runs
      set_fact:
        reached: true
"#,
    )
    .unwrap();

    let mut executor =
        PipelineExecutor::new(store.clone(), Arc::new(ModuleRegistry::with_builtins()));
    executor.run(&playbook).await.unwrap();

    assert_eq!(executor.status.phase, PipelinePhase::Succeeded);
    assert_eq!(executor.status.task_result.ignored, 1);
    assert_eq!(executor.status.task_result.failed, 0);
    assert!(executor.status.failed_detail.is_empty());

    let resolved = store.get(all_vars("h1")).unwrap();
    assert_eq!(resolved["reached"], json!(true));
}

#[tokio::test]
async fn test_loop_over_templated_group_list() {
    let store = new_store(
        r#"
hosts:
  h1: {}
  h2: {}
groups:
  workers:
    hosts: [h1, h2]
"#,
    );
    let playbook = Playbook::from_yaml(
        r#"
- hosts: localhost
  tasks:
    - name: record the last worker seen
      set_fact:
        last_worker: "{{ item }}"
      loop: "{{ groups.workers | to_json }}"
"#,
    )
    .unwrap();

    let mut executor =
        PipelineExecutor::new(store.clone(), Arc::new(ModuleRegistry::with_builtins()));
    executor.run(&playbook).await.unwrap();

    let resolved = store.get(all_vars("localhost")).unwrap();
    assert_eq!(resolved["last_worker"], json!("h2"));
}
