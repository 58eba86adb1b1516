use std::io::{BufRead, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fleet_broker::{Broker, NatsBroker};
use fleet_channels::ChannelLayer;
use fleet_core::config::Config;
use fleet_core::IdentityResolver;
use fleet_tools::{IdentityCache, ToolRouter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet Mesh coordination daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tool-dispatch loop over stdio (default).
    Serve,
    /// Check broker connectivity and configuration, then exit.
    Doctor,
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the build version.
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Validate,
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .json()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = Config::load()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Version => {
            println!("fleetd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Show => {
                    println!("{}", toml::to_string_pretty(&config)?);
                }
                ConfigAction::Validate => {
                    let errors = config.validate();
                    if errors.is_empty() {
                        println!("{config_path}: ok");
                    } else {
                        for e in &errors {
                            println!("{e}");
                        }
                        anyhow::bail!("{} configuration problem(s) in {config_path}", errors.len());
                    }
                }
            }
            Ok(())
        }
        Command::Doctor => run_doctor(&config).await,
        Command::Serve => run_serve(config).await,
    }
}

async fn run_doctor(config: &Config) -> anyhow::Result<()> {
    init_tracing(&config.log_level);
    let mut failures = 0usize;

    print!("broker connection ({})... ", config.broker.broker_url);
    std::io::stdout().flush().ok();
    let broker = match NatsBroker::connect(
        &config.broker.broker_url,
        config.broker.broker_user.as_deref(),
        config.broker.broker_pass.as_deref(),
    )
    .await
    {
        Ok(b) => {
            println!("ok");
            Arc::new(b)
        }
        Err(e) => {
            println!("FAILED: {e}");
            anyhow::bail!("doctor: cannot continue without a broker connection");
        }
    };

    print!("registry KV bucket... ");
    match broker.ensure_kv_bucket("registry").await {
        Ok(()) => println!("ok"),
        Err(e) => {
            println!("FAILED: {e}");
            failures += 1;
        }
    }

    let project_id = resolve_project_id(config);
    let channels = ChannelLayer::new(broker.clone(), project_id);
    for ch in &config.channels.channels {
        print!("channel stream {:?}... ", ch.name);
        match channels.ensure(&ch.name, &ch.retention).await {
            Ok(_) => println!("ok"),
            Err(e) => {
                println!("FAILED: {e}");
                failures += 1;
            }
        }
    }

    if failures == 0 {
        println!("doctor: all checks passed");
        Ok(())
    } else {
        anyhow::bail!("doctor: {failures} check(s) failed");
    }
}

fn resolve_project_id(config: &Config) -> String {
    let resolver = identity_resolver(config);
    resolver.project_id()
}

fn identity_resolver(config: &Config) -> IdentityResolver {
    IdentityResolver {
        hostname: hostname(),
        project_path: project_path(),
        project_id_override: config.broker.project_id_override.clone(),
        agent_id_override: config.broker.agent_id_override.clone(),
        subagent_type: config.broker.subagent_type.clone(),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into())
}

fn project_path() -> String {
    config_override_project_path()
        .or_else(|| std::env::current_dir().ok().map(|p| p.display().to_string()))
        .unwrap_or_else(|| ".".into())
}

fn config_override_project_path() -> Option<String> {
    std::env::var("FLEET_PROJECT_PATH").ok()
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    init_tracing(&config.log_level);
    tracing::info!(broker_url = %config.broker.broker_url, "fleetd starting");

    let broker = Arc::new(
        NatsBroker::connect(
            &config.broker.broker_url,
            config.broker.broker_user.as_deref(),
            config.broker.broker_pass.as_deref(),
        )
        .await?,
    );

    let mut resolver = identity_resolver(&config);
    if let Some(path) = &config.broker.project_path_override {
        resolver.project_path = path.clone();
    }
    let project_id = resolver.project_id();

    let identity_cache = IdentityCache::new(broker.clone());
    let caller = identity_cache.resolve(&resolver).await?;
    tracing::info!(agent_id = %caller, project_id, "identity resolved");

    let router = ToolRouter::new(broker, project_id, config);

    // Minimal newline-delimited-JSON stdio loop: one request per line
    // ({"tool": "...", "args": {...}}), one response per line
    // ({"result": ...} or {"error": {...}}). The real transport adapter
    // that fronts this loop is out of scope here.
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(request) => handle_request(&router, request, &caller).await,
            Err(e) => serde_json::json!({ "error": { "kind": "InvalidArgument", "message": e.to_string() } }),
        };
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}

async fn handle_request(
    router: &ToolRouter<NatsBroker>,
    request: serde_json::Value,
    caller: &fleet_core::AgentId,
) -> serde_json::Value {
    let Some(tool) = request.get("tool").and_then(|v| v.as_str()) else {
        return serde_json::json!({
            "error": { "kind": "InvalidArgument", "message": "missing \"tool\" field" }
        });
    };
    let args = request.get("args").cloned().unwrap_or(serde_json::json!({}));
    match router.dispatch(tool, args, caller).await {
        Ok(result) => serde_json::json!({ "result": result }),
        Err(envelope) => serde_json::json!({ "error": envelope }),
    }
}
