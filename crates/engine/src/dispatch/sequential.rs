//! SEQUENTIAL backend: delegates to an external sequential execution service.

use anyhow::{Result, bail};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use stepwise_types::Value;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

/// One step of a sequential (recorded UI) action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SequentialStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

/// Everything the service needs to replay one sequential action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequentialParameters {
    /// Whether the steps run outside the engine's own session.
    pub external: bool,
    pub steps: Vec<SequentialStep>,
    pub arguments: IndexMap<String, Value>,
}

pub trait SequentialExecutionService: Send + Sync {
    fn execute(
        &self,
        coordinate: &str,
        parameters: SequentialParameters,
        context_token: Option<&str>,
    ) -> Result<IndexMap<String, Value>>;
}

/// Service for hosts without a sequential runtime; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedSequentialExecution;

impl SequentialExecutionService for UnsupportedSequentialExecution {
    fn execute(&self, coordinate: &str, _: SequentialParameters, _: Option<&str>) -> Result<IndexMap<String, Value>> {
        bail!("no sequential execution service is configured for '{coordinate}'")
    }
}

pub fn execute_sequential(
    service: &dyn SequentialExecutionService,
    coordinate: &str,
    parameters: SequentialParameters,
    context_token: Option<&str>,
) -> RuntimeResult<IndexMap<String, Value>> {
    debug!(coordinate, steps = parameters.steps.len(), external = parameters.external, "delegating sequential action");
    service
        .execute(coordinate, parameters, context_token)
        .map_err(|source| RuntimeError::SequentialFailed {
            coordinate: coordinate.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;

    struct EchoService;

    impl SequentialExecutionService for EchoService {
        fn execute(&self, _: &str, parameters: SequentialParameters, token: Option<&str>) -> Result<IndexMap<String, Value>> {
            let mut outputs = parameters.arguments;
            outputs.insert("steps".to_string(), Value::new(parameters.steps.len() as i64));
            outputs.insert("token".to_string(), Value::new(token.unwrap_or_default()));
            Ok(outputs)
        }
    }

    #[test]
    fn service_outputs_become_step_outputs() {
        let parameters = SequentialParameters {
            external: false,
            steps: vec![SequentialStep {
                name: "click login".to_string(),
                ..SequentialStep::default()
            }],
            arguments: indexmap! { "user".to_string() => Value::new("ops") },
        };
        let outputs = execute_sequential(&EchoService, "acme:ui:1.0", parameters, Some("ctx-1")).expect("outputs");

        assert_eq!(outputs["user"], Value::new("ops"));
        assert_eq!(outputs["steps"], Value::new(1_i64));
        assert_eq!(outputs["token"], Value::new("ctx-1"));
    }

    #[test]
    fn service_failures_are_wrapped() {
        let error = execute_sequential(&UnsupportedSequentialExecution, "acme:ui:1.0", SequentialParameters::default(), None)
            .expect_err("unsupported");
        assert!(matches!(error, RuntimeError::SequentialFailed { ref coordinate, .. } if coordinate == "acme:ui:1.0"));
    }
}
