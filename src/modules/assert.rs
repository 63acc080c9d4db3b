//! Assert module: fail the host unless every condition holds.

use async_trait::async_trait;
use serde_json::Value;

use super::{ExecOptions, Module, ModuleOutput, STDOUT_FALSE, STDOUT_TRUE};
use crate::error::{Error, Result};
use crate::template;

/// Evaluate gating conditions as an explicit task.
pub struct AssertModule;

#[async_trait]
impl Module for AssertModule {
    fn name(&self) -> &'static str {
        "assert"
    }

    async fn execute(&self, options: &ExecOptions) -> ModuleOutput {
        match run(options).await {
            Ok(output) => output,
            Err(e) => ModuleOutput::fail(e.to_string()),
        }
    }
}

async fn run(options: &ExecOptions) -> Result<ModuleOutput> {
    let host_vars = options.host_vars()?;
    let args = options.args_map()?;

    let conditions: Vec<String> = match args.get("that") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(seq)) => seq
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    Error::module_args("assert", "'that' must hold condition strings")
                })
            })
            .collect::<Result<_>>()?,
        _ => return Err(Error::module_args("assert", "'that' is required")),
    };

    match template::parse_bool(&host_vars, &conditions) {
        Ok(true) => {
            let msg = match args.get("success_msg").and_then(Value::as_str) {
                Some(m) => template::parse_string(&host_vars, m)?,
                None => STDOUT_TRUE.to_string(),
            };
            Ok(ModuleOutput::ok(msg))
        }
        Ok(false) => {
            let msg = match args.get("fail_msg").and_then(Value::as_str) {
                Some(m) => template::parse_string(&host_vars, m)?,
                None => "assert failed".to_string(),
            };
            Ok(ModuleOutput {
                stdout: STDOUT_FALSE.to_string(),
                stderr: msg,
            })
        }
        Err(e) => Ok(ModuleOutput::fail(format!("parse condition error: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::support::exec_options;
    use serde_json::json;

    #[tokio::test]
    async fn test_holding_condition_succeeds() {
        let options = exec_options(
            &["n1"],
            json!({"replicas": 3}),
            json!({"that": "replicas == 3"}),
        );
        let output = AssertModule.execute(&options).await;
        assert_eq!(output.stdout, STDOUT_TRUE);
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_failing_condition_uses_fail_msg() {
        let options = exec_options(
            &["n1"],
            json!({"replicas": 1}),
            json!({"that": ["replicas == 3"], "fail_msg": "want 3 replicas"}),
        );
        let output = AssertModule.execute(&options).await;
        assert_eq!(output.stdout, STDOUT_FALSE);
        assert_eq!(output.stderr, "want 3 replicas");
    }

    #[tokio::test]
    async fn test_unevaluable_condition_fails_closed() {
        let options = exec_options(&["n1"], json!({}), json!({"that": "{{ %%% }}"}));
        let output = AssertModule.execute(&options).await;
        assert!(!output.stderr.is_empty());
    }
}
