//! Parallel loop split and join bookkeeping.
//!
//! [`ParallelLoopController::add_branches`] binds the loop expression once,
//! then hands out branches in throttled batches. Every branch gets its own
//! copy of the run environment whose only context is the flow context plus
//! the loop variables. The embedding scheduler runs the branches and passes
//! the finished copies to [`ParallelLoopController::join_branches`], which
//! folds their variables and results back into the flow once every branch
//! has reported.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use stepwise_types::events::keys;
use stepwise_types::{EventType, Output, StepType, Value};
use tracing::{debug, info, warn};

use crate::bindings::{ReadOnlyContextAccessor, bind_outputs};
use crate::env::{Context, ReturnValues, RunEnvironment};
use crate::error::{RuntimeError, RuntimeResult, StackError};
use crate::events::{EventPayload, ExecutionRuntimeServices, masked_map};
use crate::expression::{Scope, evaluate, expression_body, resolve_declared};

/// Variable holding the finished branches' contexts while publish values are bound.
pub const BRANCHES_CONTEXT: &str = "branches_context";
/// Entry of a branch context holding that branch's result.
pub const BRANCH_RESULT: &str = "branch_result";
pub const SUCCESS_RESULT: &str = "SUCCESS";
pub const FAILURE_RESULT: &str = "FAILURE";

/// Loop header of a parallel step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopStatement {
    /// One branch per list item, bound to `var_name`.
    List { var_name: String, expression: String },
    /// One branch per map entry, bound to `key_name` and `value_name`.
    Map {
        key_name: String,
        value_name: String,
        expression: String,
    },
}

impl LoopStatement {
    pub fn expression(&self) -> &str {
        match self {
            LoopStatement::List { expression, .. } | LoopStatement::Map { expression, .. } => expression,
        }
    }

    fn binding_name(&self) -> &str {
        match self {
            LoopStatement::List { var_name, .. } => var_name,
            LoopStatement::Map { value_name, .. } => value_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParallelLoop {
    #[serde(flatten)]
    pub statement: LoopStatement,
    /// Maximum number of branches started per batch; a literal or expression.
    #[serde(default)]
    pub throttle: Option<Value>,
}

impl ParallelLoop {
    pub fn list(var_name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            statement: LoopStatement::List {
                var_name: var_name.into(),
                expression: expression.into(),
            },
            throttle: None,
        }
    }

    pub fn map(key_name: impl Into<String>, value_name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            statement: LoopStatement::Map {
                key_name: key_name.into(),
                value_name: value_name.into(),
                expression: expression.into(),
            },
            throttle: None,
        }
    }

    pub fn throttled(mut self, throttle: impl Into<Value>) -> Self {
        self.throttle = Some(throttle.into());
        self
    }
}

/// Where the flow continues for one loop result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultNavigation {
    pub next_step_position: u64,
    /// Result reported instead of the loop result.
    #[serde(default)]
    pub preset_result: Option<String>,
}

impl ResultNavigation {
    pub fn new(next_step_position: u64) -> Self {
        Self {
            next_step_position,
            preset_result: None,
        }
    }
}

/// Split data and collected branch results of the loop in progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParallelLoopState {
    pending: Vec<Value>,
    split_size: usize,
    throttle: Option<usize>,
    started: usize,
    branch_contexts: Vec<IndexMap<String, Value>>,
    failed_branches: usize,
}

impl ParallelLoopState {
    pub fn split_size(&self) -> usize {
        self.split_size
    }

    pub fn throttle(&self) -> Option<usize> {
        self.throttle
    }

    /// Split items not handed out yet.
    pub fn pending(&self) -> &[Value] {
        &self.pending
    }

    pub fn started(&self) -> usize {
        self.started
    }

    pub fn finished(&self) -> usize {
        self.branch_contexts.len() + self.failed_branches
    }

    /// Branches that have not reported to a join yet.
    pub fn remaining(&self) -> usize {
        self.split_size.saturating_sub(self.finished())
    }

    fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.remaining() == 0
    }

    /// Branches to start in the next batch: the remainder of an uneven split
    /// goes first so that every later batch is full.
    fn lanes_to_start(&self) -> usize {
        let pending = self.pending.len();
        let lanes = match self.throttle {
            None => pending,
            Some(throttle) if pending % throttle == 0 => throttle,
            Some(throttle) => pending % throttle,
        };
        lanes.min(pending)
    }
}

/// One branch ready to be scheduled.
#[derive(Debug, Clone)]
pub struct Branch {
    pub run_env: RunEnvironment,
    pub split_item: Value,
    /// First step the branch runs.
    pub begin_position: u64,
    pub ref_id: String,
}

/// A branch as reported back to the join.
#[derive(Debug)]
pub enum FinishedBranch {
    /// The branch ran to completion; its run environment holds its context and return values.
    Completed(RunEnvironment),
    Failed { branch_id: String, error: String },
}

#[derive(Debug, Clone)]
pub struct AddBranchesRequest<'a> {
    pub parallel_loop: &'a ParallelLoop,
    pub step_name: &'a str,
    /// Identifier of the sub-flow each branch runs.
    pub ref_id: &'a str,
    /// Position the flow waits at while branches run.
    pub next_step_position: u64,
    pub branch_begin_position: u64,
}

#[derive(Debug, Clone)]
pub struct JoinBranchesRequest<'a> {
    pub publish: &'a [Output],
    pub navigation: &'a IndexMap<String, ResultNavigation>,
    pub step_name: &'a str,
    /// Position of the split step, revisited until every branch has reported.
    pub current_step_position: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Some branches are still pending; the flow returns to the split step.
    Waiting { remaining: usize },
    Joined(ReturnValues),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelLoopController;

impl ParallelLoopController {
    pub fn new() -> Self {
        Self
    }

    /// Start the next batch of branches.
    ///
    /// On the first call the loop expression and throttle are bound against
    /// the flow's variables and `EVENT_SPLIT_BRANCHES` is emitted. Each
    /// started branch emits `EVENT_BRANCH_START`.
    ///
    /// # Arguments
    /// * `request` - Loop header, step identity and continuation positions.
    /// * `run_env` - Flow run state; its innermost context is the flow context.
    /// * `services` - Sink for split and branch events.
    ///
    /// # Returns
    /// The branches to schedule, each with its own run environment.
    ///
    /// # Errors
    /// Binding failures and [`RuntimeError::InvalidParallelLoop`] leave the
    /// run environment untouched.
    pub fn add_branches(
        &self,
        request: &AddBranchesRequest<'_>,
        run_env: &mut RunEnvironment,
        services: &mut ExecutionRuntimeServices,
    ) -> RuntimeResult<Vec<Branch>> {
        let in_progress = run_env.parallel_loop().cloned();
        let mut state = match in_progress {
            Some(state) => state,
            None => {
                let variables = run_env.top_variables().ok_or(StackError::EmptyStack)?;
                let state = split(request, variables, run_env)?;
                let payload = event_payload(run_env, request.step_name, "parallel loop expression bound")
                    .with(keys::BOUND_PARALLEL_LOOP_EXPRESSION, masked_list(&state.pending));
                services.emit(EventType::SplitBranches, payload);
                run_env.execution_path_mut().down();
                state
            }
        };

        let flow_context = run_env.pop_context()?;
        run_env.enter_parallel_loop();
        run_env.set_next_step_position(Some(request.next_step_position));

        let lanes = state.lanes_to_start();
        let mut branches = Vec::with_capacity(lanes);
        for split_item in state.pending.drain(..lanes) {
            let payload = event_payload(run_env, request.step_name, "parallel loop branch created")
                .with(keys::REF_ID, json!(request.ref_id))
                .with(keys::SPLIT_ITEM, split_item.masked());
            services.emit(EventType::BranchStart, payload);

            run_env.execution_path_mut().down();
            let mut branch_env = run_env.branch();
            let mut branch_context = flow_context.clone();
            bind_loop_variables(&request.parallel_loop.statement, &split_item, &mut branch_context);
            branch_env.push_context(branch_context);
            branch_env.put_call_arguments(IndexMap::new());
            run_env.execution_path_mut().up()?;
            run_env.execution_path_mut().forward();

            branches.push(Branch {
                run_env: branch_env,
                split_item,
                begin_position: request.branch_begin_position,
                ref_id: request.ref_id.to_string(),
            });
        }
        state.started += branches.len();

        info!(
            step = request.step_name,
            started = branches.len(),
            pending = state.pending.len(),
            "parallel loop branches added"
        );
        run_env.push_context(flow_context);
        run_env.put_call_arguments(IndexMap::new());
        run_env.set_parallel_loop(state);
        Ok(branches)
    }

    /// Collect finished branches and, once all have reported, publish the
    /// loop's outputs and navigate.
    ///
    /// # Arguments
    /// * `request` - Publish declarations, navigation table and step identity.
    /// * `finished` - Branches that completed since the previous join.
    /// * `run_env` - Flow run state holding the loop bookkeeping.
    /// * `services` - Sink for branch-end and join events.
    ///
    /// # Returns
    /// [`JoinOutcome::Waiting`] while branches are outstanding, otherwise the
    /// loop's return values, which are also put in the return-value slot.
    ///
    /// # Errors
    /// [`RuntimeError::BranchFailed`] when any branch failed,
    /// [`RuntimeError::MissingNavigation`] when the loop result has no
    /// navigation, and publish binding failures.
    pub fn join_branches(
        &self,
        request: &JoinBranchesRequest<'_>,
        finished: Vec<FinishedBranch>,
        run_env: &mut RunEnvironment,
        services: &mut ExecutionRuntimeServices,
    ) -> RuntimeResult<JoinOutcome> {
        let mut state = run_env.take_parallel_loop().ok_or(StackError::NoParallelLoop)?;
        run_env.leave_parallel_loop();

        for branch in finished {
            match branch {
                FinishedBranch::Completed(mut branch_env) => {
                    let context = branch_env.pop_context()?;
                    let returned = branch_env.remove_return_values()?;
                    let result = returned.result.clone().unwrap_or_else(|| FAILURE_RESULT.to_string());
                    let mut entry = context.variables().clone();
                    entry.insert(BRANCH_RESULT.to_string(), Value::new(result.as_str()));
                    state.branch_contexts.push(entry);

                    branch_env.execution_path_mut().up()?;
                    let payload = event_payload(&branch_env, request.step_name, "Parallel loop branch ended").with(
                        keys::BRANCH_RETURN_VALUES,
                        json!({ "outputs": masked_map(&returned.outputs), "result": returned.result }),
                    );
                    services.emit(EventType::BranchEnd, payload);
                }
                FinishedBranch::Failed { branch_id, error } => {
                    warn!(step = request.step_name, branch = %branch_id, %error, "parallel loop branch failed");
                    state.failed_branches += 1;
                }
            }
        }

        if !state.is_complete() {
            let remaining = state.remaining();
            debug!(step = request.step_name, remaining, "waiting for parallel loop branches");
            run_env.set_next_step_position(Some(request.current_step_position));
            run_env.set_parallel_loop(state);
            run_env.execution_path_mut().forward();
            return Ok(JoinOutcome::Waiting { remaining });
        }

        run_env.execution_path_mut().up()?;
        if state.failed_branches > 0 {
            return Err(RuntimeError::BranchFailed {
                step_name: request.step_name.to_string(),
                failed: state.failed_branches,
            });
        }

        let payload = event_payload(run_env, request.step_name, "Parallel loop output binding started")
            .with(keys::STEP_PUBLISH, json!(request.publish))
            .with(keys::STEP_NAVIGATION, json!(request.navigation));
        services.emit(EventType::JoinBranchesStart, payload);

        let publish_context = IndexMap::from([(BRANCHES_CONTEXT.to_string(), branches_value(&state.branch_contexts))]);
        let publish_values = {
            let variables = run_env.top_variables().ok_or(StackError::EmptyStack)?;
            let accessor = ReadOnlyContextAccessor::new(variables, Some(&publish_context));
            bind_outputs(&accessor, run_env.system_properties(), request.publish)?
        };

        let loop_result = loop_result(&state.branch_contexts);
        let navigation = request
            .navigation
            .get(loop_result)
            .ok_or_else(|| RuntimeError::MissingNavigation {
                step_name: request.step_name.to_string(),
                result: loop_result.to_string(),
            })?;
        let result = navigation.preset_result.clone().unwrap_or_else(|| loop_result.to_string());
        let return_values = ReturnValues::new(publish_values, Some(result));

        let payload = event_payload(run_env, request.step_name, "Parallel loop output binding finished")
            .with_values(keys::OUTPUTS, &return_values.outputs)
            .with(keys::RESULT, json!(return_values.result))
            .with(keys::NEXT_STEP_POSITION, json!(navigation.next_step_position));
        services.emit(EventType::JoinBranchesEnd, payload);

        if let Some(flow_context) = run_env.stack_mut().peek_mut() {
            for (name, value) in &return_values.outputs {
                flow_context.put_variable(name.clone(), value.clone());
            }
        }
        run_env.put_return_values(return_values.clone());
        run_env.set_next_step_position(Some(navigation.next_step_position));
        run_env.execution_path_mut().forward();
        info!(step = request.step_name, result = ?return_values.result, "parallel loop joined");
        Ok(JoinOutcome::Joined(return_values))
    }
}

fn split(request: &AddBranchesRequest<'_>, variables: &IndexMap<String, Value>, run_env: &RunEnvironment) -> RuntimeResult<ParallelLoopState> {
    let statement = &request.parallel_loop.statement;
    let invalid = |message: String| RuntimeError::InvalidParallelLoop {
        step_name: request.step_name.to_string(),
        message,
    };
    let scope = Scope::new(run_env.system_properties()).with_layer(variables);

    let source = Value::new(statement.expression());
    let body = expression_body(&source).unwrap_or(statement.expression().trim());
    let bound = evaluate(body, &scope).map_err(|error| RuntimeError::binding(statement.binding_name(), error))?;

    let items: Vec<JsonValue> = match (statement, bound.content()) {
        (LoopStatement::List { .. }, JsonValue::Array(items)) => items.clone(),
        (LoopStatement::List { .. }, JsonValue::String(text)) => text.chars().map(|c| JsonValue::String(c.to_string())).collect(),
        (LoopStatement::Map { .. }, JsonValue::Object(entries)) => entries
            .iter()
            .map(|(key, value)| json!([key, value]))
            .collect(),
        (LoopStatement::List { .. }, _) => return Err(invalid(format!("expected a list, got {}", bound.value_type()))),
        (LoopStatement::Map { .. }, _) => return Err(invalid(format!("expected a map, got {}", bound.value_type()))),
    };
    if items.is_empty() {
        return Err(invalid("the loop expression produced no items".to_string()));
    }

    let throttle = match &request.parallel_loop.throttle {
        None => None,
        Some(declared) => {
            let resolved = resolve_declared(declared, &scope).map_err(|error| RuntimeError::binding("throttle", error))?;
            let throttle = match resolved.content() {
                JsonValue::Number(number) => number.as_i64(),
                JsonValue::String(text) => text.trim().parse::<i64>().ok(),
                _ => None,
            };
            match throttle.and_then(|throttle| usize::try_from(throttle).ok()) {
                Some(throttle) if throttle > 0 => Some(throttle),
                _ => return Err(invalid(format!("throttle must be a positive integer, got {}", resolved.masked()))),
            }
        }
    };

    let sensitive = bound.is_sensitive();
    let pending: Vec<Value> = items
        .into_iter()
        .map(|item| Value::new(item).with_sensitivity(sensitive))
        .collect();
    debug!(step = request.step_name, split_size = pending.len(), ?throttle, "parallel loop split");
    Ok(ParallelLoopState {
        split_size: pending.len(),
        pending,
        throttle,
        ..ParallelLoopState::default()
    })
}

fn bind_loop_variables(statement: &LoopStatement, split_item: &Value, context: &mut Context) {
    match statement {
        LoopStatement::List { var_name, .. } => context.put_variable(var_name.clone(), split_item.clone()),
        LoopStatement::Map { key_name, value_name, .. } => {
            let pair = split_item.content().as_array();
            let part = |index: usize| {
                let content = pair.and_then(|pair| pair.get(index)).cloned().unwrap_or(JsonValue::Null);
                Value::new(content).with_sensitivity(split_item.is_sensitive())
            };
            context.put_variable(key_name.clone(), part(0));
            context.put_variable(value_name.clone(), part(1));
        }
    }
}

/// `FAILURE` when any branch failed, `SUCCESS` otherwise.
fn loop_result(branch_contexts: &[IndexMap<String, Value>]) -> &'static str {
    let failed = branch_contexts.iter().any(|context| {
        context
            .get(BRANCH_RESULT)
            .is_some_and(|result| result.content().as_str() == Some(FAILURE_RESULT))
    });
    if failed { FAILURE_RESULT } else { SUCCESS_RESULT }
}

fn branches_value(branch_contexts: &[IndexMap<String, Value>]) -> Value {
    let sensitive = branch_contexts.iter().flat_map(IndexMap::values).any(Value::is_sensitive);
    let contexts = branch_contexts
        .iter()
        .map(|context| {
            JsonValue::Object(
                context
                    .iter()
                    .map(|(name, value)| (name.clone(), value.content().clone()))
                    .collect(),
            )
        })
        .collect();
    Value::new(JsonValue::Array(contexts)).with_sensitivity(sensitive)
}

fn masked_list(values: &[Value]) -> JsonValue {
    JsonValue::Array(values.iter().map(Value::masked).collect())
}

fn event_payload(run_env: &RunEnvironment, step_name: &str, description: &str) -> EventPayload {
    EventPayload::new(step_name, StepType::Step, run_env.execution_path().current_path(), description)
}
