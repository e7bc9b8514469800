use indexmap::{IndexMap, indexmap};
use serde_json::json;
use stepwise_engine::bindings::resolve_result;
use stepwise_engine::{
    ActionDescriptor, ActionDispatcher, ExecutableController, ExecutableRunner, ExecutionRuntimeServices, FinishRequest,
    GLOBAL_SESSION_OBJECT, ParentFlowData, Parameter, Routine, RoutineMethod, RoutineRegistry, RunEnvironment, RunOutcome,
    RuntimeError, SessionObjects, StackError, StartOutcome, StartRequest, parse_executable,
};
use stepwise_types::events::keys;
use stepwise_types::{
    EventType, ExecutableResult, ExecutableType, Input, Output, SENSITIVE_VALUE_MASK, Value, WorkerGroupMetadata,
};
use stepwise_util::RuntimeSettings;

fn routines() -> RoutineRegistry {
    let echo = RoutineMethod::action(|call| {
        Ok(indexmap! {
            "name".to_string() => call.input("name").cloned().unwrap_or_else(Value::null),
            "role".to_string() => call.input("role").cloned().unwrap_or_else(Value::null),
        })
    })
    .with_parameter(Parameter::input("name"))
    .with_parameter(Parameter::input("role"));

    let connect = RoutineMethod::action(|call| {
        let Some(connection) = call.session("connection") else {
            anyhow::bail!("connection session not bound");
        };
        let uses = connection.get::<u32>().unwrap_or(0) + 1;
        connection.set(uses);
        Ok(indexmap! { "uses".to_string() => Value::new(uses) })
    })
    .with_parameter(Parameter::global_session("connection"));

    RoutineRegistry::new().with_routine(
        "acme.Users",
        Routine::new().with_method("echo", echo).with_method("connect", connect),
    )
}

fn dispatcher() -> ActionDispatcher {
    ActionDispatcher::new(&RuntimeSettings::default()).with_routines(routines())
}

fn dispatch(
    run_env: &mut RunEnvironment,
    services: &mut ExecutionRuntimeServices,
    arguments: IndexMap<String, Value>,
    action: &ActionDescriptor,
) -> Result<(), RuntimeError> {
    run_env.put_call_arguments(arguments);
    dispatcher().dispatch(services, run_env, &mut SessionObjects::new(), Some(2), action)
}

fn start(
    run_env: &mut RunEnvironment,
    services: &mut ExecutionRuntimeServices,
    inputs: &[Input],
) -> Result<StartOutcome, RuntimeError> {
    let request = StartRequest {
        inputs,
        step_name: "login",
        next_step_position: Some(1),
        executable_type: ExecutableType::Operation,
    };
    ExecutableController::new().start_executable(&request, run_env, services)
}

fn finish(
    run_env: &mut RunEnvironment,
    services: &mut ExecutionRuntimeServices,
    outputs: &[Output],
    results: &[ExecutableResult],
) -> Result<(), RuntimeError> {
    let request = FinishRequest {
        outputs,
        results,
        step_name: "login",
        executable_type: ExecutableType::Operation,
    };
    ExecutableController::new().finish_executable(&request, run_env, services).map(|_| ())
}

#[test]
fn native_outputs_pass_through_unchanged() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();
    let arguments = indexmap! {
        "name".to_string() => Value::new("nameTest"),
        "role".to_string() => Value::new("roleTest"),
    };

    dispatch(&mut run_env, &mut services, arguments.clone(), &ActionDescriptor::native("acme.Users", "echo")).expect("dispatch");

    let returned = run_env.remove_return_values().expect("return values");
    assert_eq!(returned.outputs, arguments);
}

#[test]
fn absent_native_parameter_binds_to_null() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();

    dispatch(
        &mut run_env,
        &mut services,
        indexmap! { "name".to_string() => Value::new("nameTest") },
        &ActionDescriptor::native("acme.Users", "echo"),
    )
    .expect("missing role is not an error");

    let returned = run_env.remove_return_values().expect("return values");
    assert_eq!(returned.outputs["name"], Value::new("nameTest"));
    assert!(returned.outputs["role"].is_null(), "role should be null: {:?}", returned.outputs);
}

#[test]
fn unknown_routine_emits_action_error_without_action_end() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();

    let error = dispatch(&mut run_env, &mut services, IndexMap::new(), &ActionDescriptor::native("acme.Nope", "run"))
        .expect_err("unknown routine");

    assert!(matches!(error, RuntimeError::RoutineNotFound { .. }), "unexpected error: {error}");
    assert_eq!(services.event_types(), vec![EventType::ActionStart, EventType::ActionError]);
    assert_eq!(services.events_of(EventType::ActionEnd).count(), 0);
}

#[test]
fn script_rebinding_overrides_argument_value_and_type() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();

    dispatch(
        &mut run_env,
        &mut services,
        indexmap! { "port".to_string() => Value::new("8080") },
        &ActionDescriptor::scripted("port = 8081"),
    )
    .expect("dispatch");

    let returned = run_env.remove_return_values().expect("return values");
    assert_eq!(returned.outputs["port"].content(), &json!(8081));
}

#[test]
fn shadowing_an_argument_with_an_object_is_a_serialization_error() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();

    let error = dispatch(
        &mut run_env,
        &mut services,
        indexmap! { "started".to_string() => Value::new("yesterday") },
        &ActionDescriptor::scripted("started = now()\nlabel = 'run'"),
    )
    .expect_err("datetime cannot be serialized");

    assert!(matches!(error, RuntimeError::Serialization { ref variable, .. } if variable == "started"));
    assert_eq!(services.event_types(), vec![EventType::ActionStart, EventType::ActionError]);
}

#[test]
fn finish_binds_outputs_and_result_from_the_executable_context() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();
    run_env.put_call_arguments(indexmap! { "name".to_string() => Value::new("John") });
    start(&mut run_env, &mut services, &[Input::new("name")]).expect("start");
    run_env.take_call_arguments();

    finish(
        &mut run_env,
        &mut services,
        &[Output::new("name", Some(Value::new("${ name }")))],
        &[ExecutableResult::new("SUCCESS", Some(Value::new("true")))],
    )
    .expect("finish");

    let returned = run_env.remove_return_values().expect("return values");
    assert_eq!(returned.outputs, indexmap! { "name".to_string() => Value::new("John") });
    assert_eq!(returned.result.as_deref(), Some("SUCCESS"));
    assert_eq!(run_env.stack().depth(), 0);
}

#[test]
fn bound_inputs_keep_declaration_order_and_see_earlier_inputs() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();
    run_env.put_call_arguments(indexmap! { "host".to_string() => Value::new("db") });
    let inputs = [
        Input::new("host"),
        Input::new("port").with_value(5432_i64),
        Input::new("url").with_value("${ 'pg://' + host + ':' + str(port) }"),
    ];

    start(&mut run_env, &mut services, &inputs).expect("start");

    let end = services.events_of(EventType::InputEnd).next().expect("input end event");
    assert_eq!(end.get(keys::BOUND_INPUTS), Some(&json!({ "host": "db", "port": 5432, "url": "pg://db:5432" })));
    let bound = run_env.call_arguments().expect("call arguments");
    assert_eq!(bound.keys().collect::<Vec<_>>(), vec!["host", "port", "url"]);
}

#[test]
fn sensitive_inputs_are_masked_in_events() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();
    run_env.put_call_arguments(indexmap! { "pin".to_string() => Value::new(1234_i64) });

    start(&mut run_env, &mut services, &[Input::new("pin").sensitive()]).expect("start");

    let end = services.events_of(EventType::InputEnd).next().expect("input end event");
    assert_eq!(end.get(keys::BOUND_INPUTS), Some(&json!({ "pin": SENSITIVE_VALUE_MASK })));
    let serialized = serde_json::to_string(&end.data).expect("serialize payload");
    assert!(!serialized.contains("1234"), "leaked secret: {serialized}");
}

#[test]
fn second_strict_consume_of_call_arguments_fails() {
    let mut run_env = RunEnvironment::new(Vec::new());
    run_env.put_call_arguments(indexmap! { "a".to_string() => Value::new(1_i64) });

    assert_eq!(run_env.remove_call_arguments().expect("first consume").len(), 1);
    assert!(matches!(run_env.remove_call_arguments(), Err(StackError::EmptySlot { .. })));
}

#[test]
fn failed_start_keeps_stack_depth() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();
    run_env.put_call_arguments(IndexMap::new());
    start(&mut run_env, &mut services, &[]).expect("outer start");
    let depth = run_env.stack().depth();

    run_env.put_call_arguments(indexmap! { "count".to_string() => Value::new("many") });
    let error = start(&mut run_env, &mut services, &[Input::new("count").typed(stepwise_types::InputType::Number)])
        .expect_err("type mismatch");

    assert!(matches!(error, RuntimeError::TypeMismatch { .. }));
    assert_eq!(run_env.stack().depth(), depth);
}

#[test]
fn finish_resolves_the_continuation() {
    let mut run_env = RunEnvironment::new(Vec::new());
    let mut services = ExecutionRuntimeServices::new();

    run_env.push_parent_flow_data(ParentFlowData::new("flow-1", 7, WorkerGroupMetadata::default()));
    start(&mut run_env, &mut services, &[]).expect("nested start");
    finish(&mut run_env, &mut services, &[], &[]).expect("nested finish");
    assert_eq!(run_env.next_step_position(), Some(7));
    assert_eq!(run_env.parent_flow_depth(), 0);

    start(&mut run_env, &mut services, &[]).expect("outer start");
    finish(&mut run_env, &mut services, &[], &[]).expect("outer finish");
    assert_eq!(run_env.next_step_position(), None);
}

#[test]
fn first_true_result_wins() {
    let results = [
        ExecutableResult::new("FAILURE", Some(Value::new("false"))),
        ExecutableResult::new("SUCCESS", Some(Value::new("true"))),
    ];
    let selected = resolve_result(&IndexMap::new(), &IndexMap::new(), &[], &results, None).expect("result");
    assert_eq!(selected.as_deref(), Some("SUCCESS"));
}

#[test]
fn global_session_objects_are_shared_through_the_store() {
    let dispatcher = dispatcher();
    let mut sessions = SessionObjects::new();
    let mut services = ExecutionRuntimeServices::new();
    let mut run_env = RunEnvironment::new(Vec::new());
    let action = ActionDescriptor::native("acme.Users", "connect");

    for _ in 0..2 {
        run_env.put_call_arguments(IndexMap::new());
        dispatcher.dispatch(&mut services, &mut run_env, &mut sessions, None, &action).expect("dispatch");
    }

    let returned = run_env.remove_return_values().expect("return values");
    assert_eq!(returned.outputs["uses"], Value::new(2_u32));
    let connection = sessions.get(GLOBAL_SESSION_OBJECT, "connection").expect("connection resource");
    assert_eq!(connection.get::<u32>(), Some(2));

    // A fresh store starts empty.
    run_env.put_call_arguments(IndexMap::new());
    dispatcher
        .dispatch(&mut services, &mut run_env, &mut SessionObjects::new(), None, &action)
        .expect("dispatch");
    assert_eq!(run_env.remove_return_values().expect("return values").outputs["uses"], Value::new(1_u32));
}

#[test]
fn runner_emits_the_full_lifecycle_in_order() {
    let document = parse_executable(
        r#"
name: provision
inputs:
  - name: user
  - name: password
    sensitive: true
action:
  type: SCRIPTED
  script: |
    import hashlib
    account = user + '@example.com'
    attempts = 1
outputs:
  - name: account
  - name: password
results:
  - name: FAILURE
    value: "${ attempts > 3 }"
  - name: SUCCESS
"#,
    )
    .expect("document");
    let runner = ExecutableRunner::new(dispatcher(), ExecutableController::new());
    let mut services = ExecutionRuntimeServices::new();
    let arguments = indexmap! {
        "user".to_string() => Value::new("ada"),
        "password".to_string() => Value::new("hunter2"),
    };

    let outcome = runner
        .run(&document, arguments, &mut services, &mut SessionObjects::new())
        .expect("run");

    let RunOutcome::Finished(returned) = outcome else {
        panic!("run paused unexpectedly");
    };
    assert_eq!(returned.result.as_deref(), Some("SUCCESS"));
    assert_eq!(returned.outputs["account"], Value::new("ada@example.com"));
    assert!(returned.outputs["password"].is_sensitive());
    assert_eq!(
        services.event_types(),
        vec![
            EventType::InputStart,
            EventType::InputEnd,
            EventType::ActionStart,
            EventType::ActionEnd,
            EventType::OutputStart,
            EventType::OutputEnd,
            EventType::ExecutionFinished,
        ]
    );
    let finished = services.events_of(EventType::ExecutionFinished).next().expect("finished event");
    assert_eq!(finished.get(keys::RESULT), Some(&json!("SUCCESS")));
    assert_eq!(finished.get(keys::OUTPUTS).and_then(|outputs| outputs.get("password")), Some(&json!(SENSITIVE_VALUE_MASK)));
    assert!(services.events().windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
}
