use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pantryadapters::{standard_adapters, FileStore};
use pantrycore::{
    ExecutionResult, Flow, FlowEvent, InventoryItem, NodeKind, NodeSpec, Payload, RunMode,
    TriggerEvent,
};
use pantryruntime::{CredentialVault, EngineConfig, FlowRuntime, InMemoryDedupLedger, RunReport};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pantry")]
#[command(about = "Pantry flow automation CLI", long_about = None)]
struct Cli {
    /// Show debug logs and live run events
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow file against one inventory item
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Inventory item as inline JSON or a path to a JSON file
        #[arg(short, long)]
        item: String,

        /// Trigger event to simulate
        #[arg(short, long, default_value = "expiration")]
        event: String,

        /// Call real adapters instead of the demo path
        #[arg(long)]
        live: bool,

        /// Data directory holding credentials.json (live runs)
        #[arg(long, env = "PANTRY_DATA_DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create an example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },

    /// Encrypt a secret for storage in credentials.json
    Encrypt {
        plaintext: String,

        /// 64 hex characters
        #[arg(long, env = "PANTRY_VAULT_KEY", hide_env_values = true)]
        key: String,
    },

    /// Run the trigger scheduler over a data directory
    Schedule {
        #[arg(long, env = "PANTRY_DATA_DIR")]
        data_dir: PathBuf,

        /// Run a single tick and exit
        #[arg(long)]
        once: bool,

        /// Override the tick interval
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Comma-separated organization ids
        #[arg(long)]
        orgs: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Run {
            file,
            item,
            event,
            live,
            data_dir,
        } => {
            run_flow(&file, &item, &event, live, data_dir, cli.verbose).await?;
        }

        Commands::Validate { file } => {
            validate_flow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_flow(&output)?;
        }

        Commands::Encrypt { plaintext, key } => {
            let vault = CredentialVault::from_hex(&key)?;
            println!("{}", vault.encrypt(&plaintext)?);
        }

        Commands::Schedule {
            data_dir,
            once,
            interval_secs,
            orgs,
        } => {
            schedule(data_dir, once, interval_secs, orgs).await?;
        }
    }

    Ok(())
}

fn load_flow(file: &Path) -> Result<Flow> {
    let json = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", file.display()))
}

fn parse_item(arg: &str) -> Result<InventoryItem> {
    let json = if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        std::fs::read_to_string(arg).with_context(|| format!("reading item file {}", arg))?
    };
    serde_json::from_str(&json).context("item must be an inventory item JSON object")
}

async fn run_flow(
    file: &Path,
    item: &str,
    event: &str,
    live: bool,
    data_dir: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let flow = load_flow(file)?;
    let event: TriggerEvent = event.parse().map_err(anyhow::Error::msg)?;
    let item = parse_item(item)?;

    println!("Flow: {} ({} nodes, {} edges)", flow.name, flow.nodes.len(), flow.edges.len());

    let config = EngineConfig::from_env();
    let runtime = if live {
        let mut builder = FlowRuntime::builder(config.clone()).adapters(standard_adapters(&config));
        if let Some(dir) = data_dir {
            builder = builder.credentials(Arc::new(FileStore::new(dir)?));
        }
        builder.build().context("live runs need PANTRY_VAULT_KEY")?
    } else {
        FlowRuntime::new()
    };

    let event_task = verbose.then(|| {
        let mut events = runtime.subscribe_events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                print_event(&event);
            }
        })
    });

    let payload = Payload::new(event, item, chrono::Utc::now());
    let mode = if live { RunMode::Live } else { RunMode::Test };
    let result = runtime.interpreter().run_flow(&flow, payload, mode).await?;

    if let Some(task) = event_task {
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();
    }

    print_result(&result);
    Ok(())
}

fn print_event(event: &FlowEvent) {
    match event {
        FlowEvent::RunStarted { flow_id, mode, .. } => println!("> run started: {} ({:?})", flow_id, mode),
        FlowEvent::NodeEntered { node_id, kind, .. } => println!("  > {} ({})", node_id, kind),
        FlowEvent::DemoFallback { node_id, reason, .. } => println!("    demo [{}]: {}", node_id, reason),
        FlowEvent::ActionDispatched { node_id, .. } => println!("    dispatched [{}]", node_id),
        FlowEvent::ActionFailed { node_id, error, .. } => println!("    failed [{}]: {}", node_id, error),
        FlowEvent::ActionSkipped { node_id, .. } => println!("    duplicate [{}]", node_id),
        FlowEvent::RunCompleted { visited, duration_ms, .. } => {
            println!("> run completed: {} nodes in {}ms", visited, duration_ms)
        }
    }
}

fn print_result(result: &ExecutionResult) {
    println!();
    println!("Trace: {}", result.trace.join(" -> "));
    println!("Log:");
    for line in &result.log {
        println!("  {}", line);
    }
    if !result.final_payload.related_data.is_empty() {
        println!("Related data:");
        for (key, value) in &result.final_payload.related_data {
            println!("  {}: {}", key, pantrycore::display_value(value));
        }
    }
}

fn validate_flow(file: &Path) -> Result<()> {
    let flow = load_flow(file)?;
    let runtime = FlowRuntime::new();

    match runtime.validate(&flow) {
        Ok(graph) => {
            let roots: Vec<_> = graph.roots().iter().map(|n| n.id.as_str()).collect();
            println!("Flow is valid: {}", flow.name);
            println!("  Nodes: {}", flow.nodes.len());
            println!("  Edges: {}", flow.edges.len());
            println!("  Triggers: {}", roots.join(", "));
            Ok(())
        }
        Err(e) => bail!("flow {} is invalid: {}", flow.id, e),
    }
}

fn list_nodes() {
    let runtime = FlowRuntime::new();
    let registry = runtime.registry();

    println!("Available node kinds:");
    for kind in registry.list_node_kinds() {
        let Some(metadata) = registry.get_metadata(kind) else {
            continue;
        };
        println!();
        println!("  {} ({:?})", kind, metadata.capability);
        println!("    {}", metadata.description);
        for field in metadata.fields {
            let required = if field.required { "required" } else { "optional" };
            if field.options.is_empty() {
                println!("    - {} [{:?}, {}]", field.key, field.field_type, required);
            } else {
                println!(
                    "    - {} [{:?}, {}] one of: {}",
                    field.key,
                    field.field_type,
                    required,
                    field.options.join(", ")
                );
            }
        }
    }
}

/// Expiring dairy gets a recipe suggestion and an email; anything else gets a note.
fn example_flow() -> Flow {
    let mut flow = Flow::new("flow-dairy-alert", "Dairy spoilage alert");
    flow.add_node(
        NodeSpec::new("trigger-1", NodeKind::ExpirationTrigger)
            .with_config("timeOffset", 3)
            .with_position(100.0, 100.0),
    );
    flow.add_node(
        NodeSpec::new("cond-1", NodeKind::ConditionalBranch)
            .with_config("checkField", "inventory_item.category")
            .with_config("operator", "==")
            .with_config("checkValue", "Dairy")
            .with_position(300.0, 100.0),
    );
    flow.add_node(
        NodeSpec::new("recipe-1", NodeKind::GenerateRecipe)
            .with_config("servings", 4)
            .with_position(500.0, 50.0),
    );
    flow.add_node(
        NodeSpec::new("notify-1", NodeKind::SendNotification)
            .with_config("channel", "email")
            .with_config("recipient", "chef@example.com")
            .with_config("subject", "{{name}} expires in {{remaining_days}} days")
            .with_config("message", "Suggested use: {{related_data.recipe_suggestion}}")
            .with_position(700.0, 50.0),
    );
    flow.add_node(
        NodeSpec::new("update-1", NodeKind::UpdateData)
            .with_config("targetField", "note")
            .with_config("value", "{{name}} is expiring; check the {{location}}")
            .with_position(500.0, 200.0),
    );
    flow.connect("trigger-1", "cond-1");
    flow.connect_branch("cond-1", true, "recipe-1");
    flow.connect("recipe-1", "notify-1");
    flow.connect_branch("cond-1", false, "update-1");
    flow.publish(chrono::Utc::now());
    flow
}

fn create_example_flow(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_flow())?;
    std::fs::write(output, json)?;

    println!("Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  pantry run --file {} --item '{{\"id\":\"item-101\",\"name\":\"Milk (Gallon)\",\"category\":\"Dairy\",\"remaining_days\":2}}'",
        output.display()
    );
    Ok(())
}

async fn schedule(
    data_dir: PathBuf,
    once: bool,
    interval_secs: Option<u64>,
    orgs: Option<String>,
) -> Result<()> {
    let mut config = EngineConfig::from_env();
    if let Some(secs) = interval_secs {
        if secs == 0 {
            bail!("--interval-secs must be positive");
        }
        config.scheduler.tick_interval = Duration::from_secs(secs);
    }
    if let Some(orgs) = orgs {
        config.scheduler.organizations = orgs
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();
    }

    let store = Arc::new(FileStore::new(&data_dir)?);
    let runtime = FlowRuntime::builder(config.clone())
        .adapters(standard_adapters(&config))
        .credentials(store.clone())
        .build()
        .context("the scheduler needs PANTRY_VAULT_KEY")?;
    let scheduler = runtime.scheduler(store, Arc::new(InMemoryDedupLedger::new()));

    if once {
        let report = scheduler.tick(chrono::Utc::now()).await;
        print_report(&report)?;
        return Ok(());
    }

    scheduler
        .run_forever(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}

fn print_report(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_flow_is_valid() {
        let runtime = FlowRuntime::new();
        let graph = runtime.validate(&example_flow()).unwrap();
        assert_eq!(graph.roots().len(), 1);
    }

    #[test]
    fn test_parse_inline_item() {
        let item = parse_item(r#"{"id":"item-101","name":"Milk (Gallon)","remaining_days":2}"#).unwrap();
        assert_eq!(item.remaining_days, Some(2));
        assert_eq!(item.category, None);
        assert!(parse_item("{not json").is_err());
    }

    #[tokio::test]
    async fn test_example_flow_dry_run() {
        let runtime = FlowRuntime::new();
        let item = parse_item(r#"{"id":"item-101","name":"Milk (Gallon)","category":"Dairy","remaining_days":2}"#)
            .unwrap();
        let payload = Payload::new(TriggerEvent::Expiration, item, chrono::Utc::now());
        let result = runtime.test_run(&example_flow(), payload).await.unwrap();
        assert_eq!(result.trace, vec!["trigger-1", "cond-1", "recipe-1", "notify-1"]);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "pantry", "run", "--file", "flow.json", "--item", "{}", "--event", "inventory_status",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Run { live: false, .. }));
    }
}
