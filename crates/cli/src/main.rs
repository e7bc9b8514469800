use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use indexmap::IndexMap;
use serde_json::json;
use stepwise_engine::{
    ActionDispatcher, ExecutableController, ExecutableRunner, ExecutionRuntimeServices, RunOutcome, SessionObjects,
    parse_executable_file,
};
use stepwise_types::Value;
use stepwise_util::{RuntimeSettings, redact_sensitive, settings::default_settings_path};
use tokio::sync::mpsc;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("run", sub)) => run_executable_cmd(sub).await,
        Some(("settings", _)) => print_settings(),
        _ => {
            println!("Available subcommands: run, settings");
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    Command::new("stepwise")
        .about("Run workflow executables step by step")
        .subcommand(
            Command::new("run")
                .about("Run one executable document")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .short('f')
                        .required(true)
                        .action(ArgAction::Set)
                        .help("Path to executable YAML/JSON"),
                )
                .arg(
                    Arg::new("input")
                        .long("input")
                        .short('i')
                        .action(ArgAction::Append)
                        .help("Call argument as name=value; JSON values are parsed, anything else is a string"),
                )
                .arg(
                    Arg::new("secret")
                        .long("secret")
                        .action(ArgAction::Append)
                        .help("Sensitive call argument as name=value"),
                )
                .arg(
                    Arg::new("events")
                        .long("events")
                        .action(ArgAction::SetTrue)
                        .help("Print the event stream as JSON lines"),
                ),
        )
        .subcommand(Command::new("settings").about("Print the effective runtime settings"))
}

async fn run_executable_cmd(matches: &ArgMatches) -> Result<()> {
    let file = matches.get_one::<String>("file").context("--file is required")?;
    let document = parse_executable_file(file)?;
    let settings = RuntimeSettings::load().context("failed to load runtime settings")?;

    let mut arguments = IndexMap::new();
    for raw in matches.get_many::<String>("input").into_iter().flatten() {
        let (name, value) = parse_assignment(raw)?;
        arguments.insert(name, value);
    }
    for raw in matches.get_many::<String>("secret").into_iter().flatten() {
        let (name, value) = parse_assignment(raw)?;
        arguments.insert(name, value.with_sensitivity(true));
    }

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let mut services = ExecutionRuntimeServices::with_subscriber(sender);
    let runner = ExecutableRunner::new(ActionDispatcher::new(&settings), ExecutableController::new());
    debug!(executable = %document.name, arguments = arguments.len(), "running executable");
    let outcome = runner.run(&document, arguments, &mut services, &mut SessionObjects::new());
    drop(services);

    if matches.get_flag("events") {
        while let Some(event) = receiver.recv().await {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    match outcome {
        Ok(RunOutcome::Finished(returned)) => {
            let out = json!({
                "executable": document.name,
                "outputs": returned.outputs,
                "result": returned.result,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        Ok(RunOutcome::Paused) => {
            println!("Executable '{}' paused at a breakpoint", document.name);
            Ok(())
        }
        Err(error) => bail!("executable '{}' failed: {}", document.name, redact_sensitive(&error.to_string())),
    }
}

fn print_settings() -> Result<()> {
    let settings = RuntimeSettings::load().context("failed to load runtime settings")?;
    let out = json!({
        "path": default_settings_path().display().to_string(),
        "settings": settings,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected name=value, got '{raw}'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("argument name is empty in '{raw}'");
    }
    let content = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((name.to_string(), Value::new(content)))
}
