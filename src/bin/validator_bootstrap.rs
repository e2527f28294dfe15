use std::path::PathBuf;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use validator_bootstrap::core::config::CONFIG_PATH_ENV;
use validator_bootstrap::{
    init_tracing, BootstrapConfig, BootstrapOrchestrator, KeyPair, NodeEventBus, ProcessNode,
    SessionHandle, SessionSnapshot, Stage,
};

const PRIVATE_KEY_ENV: &str = "VALIDATOR_PRIVATE_KEY";
const PUBLIC_KEY_ENV: &str = "VALIDATOR_PUBLIC_KEY";

#[derive(Debug, Default)]
struct CliOptions {
    private_key: Option<String>,
    public_key: Option<String>,
    config_path: Option<PathBuf>,
    assume_yes: bool,
    exit_on_ready: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Err(error) = run().await {
        eprintln!("validator bootstrap failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let Some(options) = parse_args()? else {
        return Ok(());
    };

    let config = load_config(&options)?;
    let node_config = config.node.clone().ok_or_else(|| {
        "no node process configured; set `node.program` in the config file or BOOTSTRAP_NODE_PROGRAM"
            .to_string()
    })?;

    let private_key = options
        .private_key
        .or_else(|| std::env::var(PRIVATE_KEY_ENV).ok())
        .unwrap_or_default();
    let public_key = options
        .public_key
        .or_else(|| std::env::var(PUBLIC_KEY_ENV).ok())
        .unwrap_or_default();
    let keys = KeyPair::new(private_key, public_key).map_err(|e| e.to_string())?;

    let bus = Arc::new(NodeEventBus::with_policy(config.replay, config.bus_capacity));
    let node = Arc::new(
        ProcessNode::spawn(&node_config, bus.clone(), config.min_memory_gib)
            .map_err(|e| e.to_string())?,
    );
    let orchestrator = BootstrapOrchestrator::new(bus, node.clone(), config);
    let session = orchestrator.start_session(keys);

    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .map_err(|e| e.to_string())?
            .progress_chars("=> "),
    );
    let renderer = tokio::spawn(render(session.clone(), progress.clone()));

    if wait_for_stage(&session, Stage::AwaitingStart).await {
        if !options.assume_yes {
            progress.suspend(|| println!("Memory check passed. Press Enter to START the node."));
            wait_for_enter().await?;
        }
        session.confirm_start().map_err(|e| e.to_string())?;
    }

    let outcome = session.wait_outcome().await;
    renderer.abort();
    let handoff = match outcome {
        Ok(handoff) => {
            progress.finish_with_message("ready");
            handoff
        }
        Err(error) => {
            progress.abandon_with_message(format!("{}", session.stage()));
            node.shutdown().await;
            return Err(error.to_string());
        }
    };

    let summary = serde_json::json!({
        "public_key": handoff.public_key,
        "relay_address": handoff.relay_address,
        "peer_id": handoff.peer_id,
        "is_leader": handoff.is_leader,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?
    );

    if !options.exit_on_ready {
        eprintln!("node is running; press Ctrl-C to stop it");
        tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
    }
    node.shutdown().await;
    Ok(())
}

fn parse_args() -> Result<Option<CliOptions>, String> {
    let mut options = CliOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            print_help();
            return Ok(None);
        }
        if arg == "--yes" || arg == "-y" {
            options.assume_yes = true;
            continue;
        }
        if arg == "--exit-on-ready" {
            options.exit_on_ready = true;
            continue;
        }

        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg.clone(), None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match flag.as_str() {
            "--private-key" => options.private_key = Some(value()?),
            "--public-key" => options.public_key = Some(value()?),
            "--config" => options.config_path = Some(PathBuf::from(value()?)),
            _ => return Err(format!("unknown argument '{arg}'. Use --help for usage")),
        }
    }
    Ok(Some(options))
}

fn load_config(options: &CliOptions) -> Result<BootstrapConfig, String> {
    match &options.config_path {
        Some(path) => {
            let mut config = BootstrapConfig::from_file(path).map_err(|e| e.to_string())?;
            config
                .apply_overrides(|key| std::env::var(key).ok())
                .map_err(|e| e.to_string())?;
            Ok(config)
        }
        None => BootstrapConfig::load().map_err(|e| e.to_string()),
    }
}

/// Returns true once the session reaches `target`, false if it ends first.
async fn wait_for_stage(session: &SessionHandle, target: Stage) -> bool {
    let mut rx = session.watch();
    loop {
        let (stage, abandoned) = {
            let snapshot = rx.borrow_and_update();
            (snapshot.stage, snapshot.abandoned)
        };
        if stage == target {
            return true;
        }
        if abandoned || stage.is_terminal() || stage.rank() > target.rank() {
            return false;
        }
        if rx.changed().await.is_err() {
            return false;
        }
    }
}

async fn wait_for_enter() -> Result<(), String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| ())
    })
    .await
    .map_err(|e| e.to_string())?
    .map_err(|e| e.to_string())
}

async fn render(session: SessionHandle, progress: ProgressBar) {
    let mut rx = session.watch();
    let mut last_stage = None;
    loop {
        let snapshot: SessionSnapshot = rx.borrow_and_update().clone();
        if last_stage != Some(snapshot.stage) {
            progress.println(format!("stage: {}", snapshot.stage));
            last_stage = Some(snapshot.stage);
        }
        progress.set_position(u64::from(snapshot.download_percent));
        let message = match (&snapshot.last_error, &snapshot.last_status) {
            (Some(error), _) if snapshot.is_terminal() => error.message.clone(),
            (_, Some(status)) => status.clone(),
            _ => snapshot.stage.to_string(),
        };
        progress.set_message(message);
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn print_help() {
    println!("Validator node bootstrap");
    println!();
    println!("Usage:");
    println!("  validator-bootstrap [options]");
    println!();
    println!("Options:");
    println!("  --private-key <key>   Validator private key (or {PRIVATE_KEY_ENV})");
    println!("  --public-key <key>    Validator public key (or {PUBLIC_KEY_ENV})");
    println!("  --config <path>       JSON config file (or {CONFIG_PATH_ENV})");
    println!("  -y, --yes             Start without waiting for confirmation");
    println!("  --exit-on-ready       Stop the node and exit after printing the handoff");
    println!("  -h, --help            Show this help");
}
