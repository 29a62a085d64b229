//! Stepwise CLI Entry Point
//!
//! Runs a workflow definition with the built-in step handlers.
//!
//! # Usage
//!
//! ```bash
//! # Execute a workflow
//! stepwise workflow.yaml
//!
//! # Provide variables (values are parsed as JSON when possible)
//! stepwise workflow.yaml --var topic=rust --var limit=5
//!
//! # Strict ordering with cycle detection
//! stepwise workflow.yaml --strict
//!
//! # Load settings from a file
//! stepwise workflow.yaml --config stepwise.yaml
//! ```

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colored::Colorize;
use log::{error, info, warn};
use serde_json::Value;

use stepwise::execution::{ExecutionStatus, StepStatus, WorkflowExecution};
use stepwise::monitoring::{MetricsAggregator, ResourceMonitor};
use stepwise::workflow::{OrderingMode, Variables};
use stepwise::{
    load_definition, Engine, EngineError, HandlerRegistry, NotificationHub, Settings, APP_NAME, VERSION,
};

const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    workflow_path: Option<String>,
    settings_path: Option<String>,
    variables: Variables,
    strict: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Workflow Execution Engine");
    println!();
}

fn print_usage() {
    println!("Usage: stepwise [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to workflow YAML file");
    println!();
    println!("Options:");
    println!("  --var KEY=VALUE     Set an initial variable (repeatable)");
    println!("  --config PATH       Load settings from a YAML file");
    println!("  --strict            Order steps topologically and reject cycles");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  stepwise research.yaml");
    println!("  stepwise research.yaml --var topic=rust --var limit=5 --strict");
}

/// Parses `KEY=VALUE`; the value is JSON when it parses as JSON.
fn parse_variable(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Invalid variable '{}', expected KEY=VALUE", raw))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Invalid variable '{}', empty key", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--strict" => config.strict = true,
            "--verbose" | "-v" => config.verbose = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path argument")?;
                config.settings_path = Some(path.clone());
            }
            "--var" => {
                i += 1;
                let raw = args.get(i).ok_or("--var requires a KEY=VALUE argument")?;
                let (key, value) = parse_variable(raw)?;
                config.variables.insert(key, value);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.workflow_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.workflow_path = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.workflow_path.is_none() {
        return Err("Missing <WORKFLOW_FILE> argument".to_string());
    }
    Ok(config)
}

/// Prints one line per step followed by the totals.
fn print_summary(execution: &WorkflowExecution) {
    println!();
    println!("{}", "Steps".bold());
    for record in &execution.steps {
        let status = match record.status {
            StepStatus::Completed => "completed".green(),
            StepStatus::Skipped => "skipped".yellow(),
            StepStatus::Failed => "failed".red(),
            StepStatus::Running => "running".cyan(),
            StepStatus::Pending => "pending".dimmed(),
        };
        let retries = if record.retry_count > 0 {
            format!(" ({} retries)", record.retry_count)
        } else {
            String::new()
        };
        println!("  {:<24} {}{}", record.step_id, status, retries);
        if let Some(error) = &record.error {
            println!("  {:<24} {}", "", error.dimmed());
        }
    }

    let metrics = &execution.metrics;
    let status = match execution.status {
        ExecutionStatus::Completed if execution.is_successful() => "completed".green().bold(),
        ExecutionStatus::Completed => "completed (nothing ran)".yellow().bold(),
        ExecutionStatus::Paused => "paused".yellow().bold(),
        other => other.as_str().red().bold(),
    };

    println!();
    println!("Execution {} {}", execution.id, status);
    println!(
        "  {} completed, {} skipped, {} failed, {} retries in {}ms",
        metrics.completed_steps,
        metrics.skipped_steps,
        metrics.failed_steps,
        metrics.total_retries,
        execution.elapsed_ms()
    );
    if !execution.fallback_steps.is_empty() {
        println!("  Fallback steps: {}", execution.fallback_steps.join(", "));
    }
}

/// Runs one workflow while the hub and the aggregator follow its events.
///
/// Listeners subscribe before the run starts and keep going past a lag, so
/// the terminal events always reach them. Timeouts and resource usage are
/// checked while the run is in flight. The engine is consumed: dropping it
/// closes the bus, which lets both listeners drain and exit.
async fn execute_observed(
    engine: Engine,
    workflow_id: &str,
    variables: Variables,
    hub: &Arc<NotificationHub>,
    metrics: &Arc<MetricsAggregator>,
    monitor: &mut ResourceMonitor,
) -> Result<WorkflowExecution, EngineError> {
    let hub_listener = Arc::clone(hub).spawn_listener(engine.events());
    let metrics_listener = Arc::clone(metrics).spawn_listener(engine.events());
    monitor.sample();

    let outcome = {
        let run = engine.execute(workflow_id, variables);
        tokio::pin!(run);
        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                _ = ticker.tick() => {
                    metrics.check_timeouts(Utc::now());
                    metrics.sample_resources(monitor);
                }
            }
        }
    };

    let outcome = match outcome {
        Ok(execution) => Ok(execution),
        Err(e) => {
            error!("{}", e);
            engine.list_executions().pop().ok_or(e)
        }
    };

    drop(engine);
    for listener in [hub_listener, metrics_listener] {
        if let Err(e) = listener.await {
            warn!("Event listener stopped abnormally: {}", e);
        }
    }
    outcome
}

/// Main application entry point.
async fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    let mut settings = match &config.settings_path {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if config.strict {
        settings.engine.ordering = OrderingMode::Topological;
    }

    let workflow_path = config.workflow_path.unwrap_or_default();
    let definition = load_definition(&workflow_path, settings.engine.ordering).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!("Could not load workflow from '{}': {}", workflow_path, e)
    })?;

    let engine = Engine::new(&settings.engine, HandlerRegistry::with_builtins());
    let definition = engine.register(definition)?;
    info!(
        "Workflow '{}' v{} loaded: {} steps",
        definition.name,
        definition.version,
        definition.steps.len()
    );

    let hub = Arc::new(NotificationHub::new(settings.notifications.clone()));
    let metrics = Arc::new(MetricsAggregator::new(settings.monitoring.clone()));
    let mut monitor = ResourceMonitor::new();

    let execution = execute_observed(
        engine,
        &definition.id,
        config.variables,
        &hub,
        &metrics,
        &mut monitor,
    )
    .await?;
    info!("{}", monitor.get_summary());

    print_summary(&execution);

    let notifications = hub.list();
    if !notifications.is_empty() {
        println!();
        println!("{}", "Notifications".bold());
        for notification in notifications.iter().rev() {
            println!("  [{:?}] {}: {}", notification.kind, notification.title, notification.message);
        }
    }
    for alert in metrics.active_alerts() {
        warn!("{}", alert.message);
    }

    Ok(execution.status == ExecutionStatus::Completed)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stepwise::config::EngineConfig;
    use stepwise::execution::{StepError, StepHandler};
    use stepwise::workflow::{Results, StepConfig, StepType};
    use stepwise::{WorkflowDefinition, WorkflowStep};

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("stepwise")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_parse_variable_json_or_string() {
        assert_eq!(parse_variable("limit=5").unwrap(), ("limit".to_string(), Value::from(5)));
        assert_eq!(
            parse_variable("topic=rust lang").unwrap().1,
            Value::String("rust lang".to_string())
        );
        assert!(parse_variable("novalue").is_err());
        assert!(parse_variable("=1").is_err());
    }

    #[test]
    fn test_parse_arguments() {
        let config = parse_arguments(&args(&["wf.yaml", "--var", "a=1", "--strict", "--config", "s.yaml"])).unwrap();
        assert_eq!(config.workflow_path.as_deref(), Some("wf.yaml"));
        assert_eq!(config.settings_path.as_deref(), Some("s.yaml"));
        assert!(config.strict);
        assert_eq!(config.variables["a"], Value::from(1));
    }

    #[test]
    fn test_parse_arguments_errors() {
        assert!(parse_arguments(&args(&[])).is_err());
        assert!(parse_arguments(&args(&["a.yaml", "b.yaml"])).is_err());
        assert!(parse_arguments(&args(&["a.yaml", "--bogus"])).is_err());
        assert!(parse_arguments(&args(&["a.yaml", "--var"])).is_err());
    }

    struct FailOnFlag;

    #[async_trait]
    impl StepHandler for FailOnFlag {
        async fn execute(&self, config: &StepConfig, _variables: &Variables, _results: &Results) -> Result<Value, StepError> {
            if config.bool("fail")?.unwrap_or(false) {
                return Err(StepError::collaborator("internal error in tool"));
            }
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_execute_observed_survives_lagging_listeners() {
        let mut definition = WorkflowDefinition::new("wf", "wf");
        for i in 0..40 {
            definition = definition.with_step(WorkflowStep::new(format!("s{}", i), StepType::ToolInvoke));
        }
        definition = definition.with_step(WorkflowStep::new("last", StepType::ToolInvoke).with_config("fail", true));

        let engine_config = EngineConfig {
            event_capacity: 4,
            ..EngineConfig::default()
        };
        let engine = Engine::new(
            &engine_config,
            HandlerRegistry::with_builtins().with(StepType::ToolInvoke, FailOnFlag),
        );
        engine.register(definition).unwrap();

        let hub = Arc::new(NotificationHub::default());
        let metrics = Arc::new(MetricsAggregator::default());
        let mut monitor = ResourceMonitor::new();

        let execution = execute_observed(engine, "wf", Variables::new(), &hub, &metrics, &mut monitor)
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        let notifications = hub.list();
        assert!(notifications
            .iter()
            .any(|n| n.title == "Workflow failed" && n.execution_id.as_deref() == Some(execution.id.as_str())));
    }
}
