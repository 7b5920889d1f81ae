//! remote-exec - plugin execution core for remote workflow tasks
//!
//! This is the main entry point for the remote-exec binary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use remote_exec::admission::{InMemoryResourceManager, LabelResolver, ResourceManager};
use remote_exec::cache::{AutoRefreshCache, PluginRefresher};
use remote_exec::cli::{Cli, Commands, ConfigSubcommand, RunArgs, SimulatedOutcome};
use remote_exec::config::{self, EngineConfig};
use remote_exec::context::CallContext;
use remote_exec::error::{Error, Result};
use remote_exec::executor::{ExecutionEngine, ReconcilerConfig, TaskOutcome, TaskReconciler};
use remote_exec::logging::{self, LogGuards};
use remote_exec::metrics::{ExecutorMetrics, MetricsScope};
use remote_exec::plugin::{
    CommandStatus, HttpQueryClient, MockQueryClient, MockQueryConfig, PluginRegistry, PluginSetupContext,
    QueryClient, QueryPlugin, TaskExecutionContext,
};
use remote_exec::secrets::{EnvSecretManager, SecretManager, StaticSecretManager};
use remote_exec::types::{
    MemoryInputReader, MemoryOutputWriter, OwnerReference, Phase, StaticTaskReader, TaskExecutionId,
    TaskExecutionMetadata, TaskTemplate, TaskType,
};
use remote_exec::version;

/// Refresh period used against the simulated service unless overridden
const SIMULATED_RESYNC_MS: u64 = 200;

fn main() -> Result<()> {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version { json } => {
            let build = version::build_info();
            if *json {
                println!("{}", serde_json::to_string_pretty(&build)?);
            } else {
                print!("{}", build);
            }
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN);
            return handle_config_command(subcommand.clone());
        }
        _ => {}
    }

    let config_path = match &cli.command {
        Commands::Run(args) => args.config.clone(),
        Commands::Namespace { config, .. } => config.clone(),
        _ => None,
    };

    let config = match EngineConfig::load(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    };

    // The guards must be kept alive for the lifetime of the program
    let _log_guards: LogGuards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    debug!(version = %build.full_version(), target = %build.target, "Starting remote-exec");

    match cli.command {
        Commands::Run(args) => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;
            rt.block_on(run_tasks(config, args))
        }
        Commands::Namespace {
            project,
            domain,
            label,
            ..
        } => {
            let resolver = LabelResolver::from_settings(&config.clusters);
            println!("{}", resolver.namespace(label.as_deref(), &project, &domain));
            Ok(())
        }
        Commands::Version { .. } | Commands::Config { .. } => {
            // Already handled above
            unreachable!();
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Run Command
// ─────────────────────────────────────────────────────────────────

async fn run_tasks(mut config: EngineConfig, args: RunArgs) -> Result<()> {
    let scope = MetricsScope::new("remote_exec");
    let resolver = Arc::new(LabelResolver::from_settings(&config.clusters));

    let (client, secrets) = if args.live {
        if let Some(ms) = args.resync_ms {
            config.cache.resync_period_ms = ms;
        }
        let client: Arc<dyn QueryClient> = Arc::new(HttpQueryClient::new(config.service.clone())?);
        let secrets: Arc<dyn SecretManager> = Arc::new(EnvSecretManager::new());
        (client, secrets)
    } else {
        config.cache.resync_period_ms = args.resync_ms.unwrap_or(SIMULATED_RESYNC_MS);
        let secrets: Arc<dyn SecretManager> =
            Arc::new(StaticSecretManager::new().with_secret(config.engine.token_key.as_str(), "simulated"));
        (simulated_client(&args), secrets)
    };
    config.validate()?;

    let mut builder = PluginRegistry::builder();
    builder.register(QueryPlugin::entry(client, resolver, config.engine.token_key.clone()))?;
    let registry = builder.build();

    let setup = PluginSetupContext::new(scope.clone(), secrets.clone());
    let plugins = registry.load(&setup).await?;
    let plugin = plugins.resolve(&TaskType::from(args.task_type.as_str()))?;

    let cache = Arc::new(AutoRefreshCache::new(
        plugin.properties().id,
        config.cache.clone(),
        &scope,
    ));
    let refresh_token = CancellationToken::new();
    let refresh_loop = cache.start(Arc::new(PluginRefresher::new(plugin.clone())), refresh_token.clone());

    let engine = Arc::new(ExecutionEngine::new(
        plugin,
        cache,
        ExecutorMetrics::new(&scope.sub_scope("executor")),
        &config.engine,
    ));
    let reconciler = TaskReconciler::new(
        ReconcilerConfig {
            tick: Duration::from_millis(args.tick_ms),
            max_ticks: args.max_ticks,
            call_timeout: config.engine.call_timeout(),
        },
        engine,
    );

    let manager: Arc<dyn ResourceManager> = Arc::new(InMemoryResourceManager::new(config.quotas.clone()));
    let execution_name = format!("e{}", &Uuid::new_v4().simple().to_string()[..12]);
    let tasks: Vec<TaskExecutionContext> = (0..args.tasks)
        .map(|i| simulated_task(&args, &execution_name, i, manager.clone(), secrets.clone()))
        .collect();

    // Ctrl+C cancels in-flight calls; teardown still runs
    let ctx = CallContext::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling tasks");
            interrupt.cancel();
        }
    });

    info!(tasks = args.tasks, execution = %execution_name, live = args.live, "Running tasks");
    let outcomes = reconciler.reconcile_all(&ctx, tasks).await?;

    refresh_token.cancel();
    if let Err(e) = refresh_loop.await {
        warn!(error = %e, "Refresh loop did not shut down cleanly");
    }

    print_outcomes(&outcomes, args.json)?;
    for (name, value) in scope.snapshot() {
        debug!(metric = %name, value = ?value, "Metric");
    }
    Ok(())
}

fn simulated_client(args: &RunArgs) -> Arc<dyn QueryClient> {
    let client = MockQueryClient::with_config(MockQueryConfig {
        final_status: match args.outcome {
            SimulatedOutcome::Done => CommandStatus::Done,
            SimulatedOutcome::Error => CommandStatus::Error,
        },
        latency: Duration::from_millis(5),
        ..Default::default()
    });
    client.fail_next_submits(args.fail_submits);
    Arc::new(client)
}

fn simulated_task(
    args: &RunArgs,
    execution_name: &str,
    index: u32,
    manager: Arc<dyn ResourceManager>,
    secrets: Arc<dyn SecretManager>,
) -> TaskExecutionContext {
    let node_id = format!("n{}", index);
    let metadata = TaskExecutionMetadata {
        task_execution_id: TaskExecutionId {
            project: args.project.clone(),
            domain: args.domain.clone(),
            execution_name: execution_name.to_string(),
            node_id: node_id.clone(),
            task_name: "query".to_string(),
            retry_attempt: 0,
        },
        namespace: format!("{}-{}", args.project, args.domain),
        labels: BTreeMap::new(),
        generated_name: format!("{}-{}-0", execution_name, node_id),
        owner_reference: OwnerReference {
            kind: "WorkflowExecution".to_string(),
            name: execution_name.to_string(),
            namespace: format!("{}-{}", args.project, args.domain),
        },
    };

    let custom = json!({
        "cluster_label": args.label.clone().unwrap_or_default(),
        "query": { "query": args.query, "timeout_sec": 0 },
        "tags": ["remote-exec-run"],
    });
    let mut inputs = Map::new();
    inputs.insert(
        "ds".to_string(),
        Value::String(chrono::Utc::now().format("%Y-%m-%d").to_string()),
    );

    TaskExecutionContext::new(
        metadata,
        Arc::new(StaticTaskReader::new(TaskTemplate::new(args.task_type.as_str(), custom))),
        Arc::new(MemoryInputReader::new(inputs)),
        Arc::new(MemoryOutputWriter::new()),
        manager,
        secrets,
    )
}

fn print_outcomes(outcomes: &[TaskOutcome], as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(outcomes)?);
        return Ok(());
    }

    for outcome in outcomes {
        println!(
            "{:<28} {:<18} {:<8} ticks={:<4} {}",
            outcome.generated_name,
            format!("{:?}", outcome.phase.phase),
            outcome.state.command_id().unwrap_or("-"),
            outcome.ticks,
            outcome.phase.error_code().unwrap_or_default(),
        );
    }
    let succeeded = outcomes.iter().filter(|o| o.phase.phase == Phase::Success).count();
    println!("{}/{} tasks succeeded", succeeded, outcomes.len());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Config Command
// ─────────────────────────────────────────────────────────────────

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = EngineConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Wrote {}", written.display());
        }
        ConfigSubcommand::Validate { config } => match EngineConfig::load(config.as_deref()) {
            Ok(_) => {
                println!("Configuration is valid.");
            }
            Err(e) => {
                eprint!("{}", e.format_for_terminal());
                std::process::exit(e.exit_code());
            }
        },
    }

    Ok(())
}
