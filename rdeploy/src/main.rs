//! rdeploy - Entry Point
//!
//! Syncs, deploys, starts and stops projects on remote hosts over SSH.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use tracing::{error, info};

use rdeploy::deploy::{Coordinator, DeployRequest, DeploymentStatus, Operation};
use rdeploy::filesys::File;
use rdeploy::logs::{init_logging, LogOptions};
use rdeploy::models::Deployment;
use rdeploy::progress::{ProgressBroadcaster, ProgressEvent, ProgressStatus};
use rdeploy::remote::SshConnector;
use rdeploy::storage::{DeploymentStore, FileStore, Settings, StorageLayout};
use rdeploy::utils::version_info;

const USAGE: &str = "usage: rdeploy [--config=<settings.json>] [--data-dir=<dir>] \
(--sync=<id> | --deploy=<id> [--path=<dir>] [--environment=<name>] | --start=<id> | \
--stop=<id> | --status=<id> | --associate=<project_id>,<machine_id> | --version)";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let mut cli_args: HashMap<String, String> = HashMap::new();
    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            cli_args.insert(key.trim_start_matches('-').to_string(), value.to_string());
        } else if arg.starts_with("--") {
            cli_args.insert(arg.trim_start_matches('-').to_string(), "true".to_string());
        }
    }

    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{}", e),
        }
        return ExitCode::SUCCESS;
    }

    let layout = match cli_args.get("data-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "Unable to read settings:".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let store = match FileStore::open(layout).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Unable to open the record store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(pair) = cli_args.get("associate") {
        return associate(&store, pair).await;
    }

    let (deployment_id, operation) = match parse_operation(&cli_args) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => {
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{}\n{}", e.red(), USAGE);
            return ExitCode::FAILURE;
        }
    };

    let deployment = match store.deployment(deployment_id).await {
        Ok(deployment) => deployment,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            return ExitCode::FAILURE;
        }
    };
    let Some(operation) = operation else {
        print_status(&deployment);
        return ExitCode::SUCCESS;
    };

    let connector = Arc::new(SshConnector::new(settings.ssh.options()));
    let broadcaster = Arc::new(ProgressBroadcaster::new());
    let coordinator = Coordinator::new(store, connector, broadcaster.clone(), settings);

    let mut subscription = broadcaster.subscribe(deployment.project_id);
    let printer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            print_event(&event);
            if event.status.is_terminal() {
                break;
            }
        }
    });

    info!("Running {} for deployment {}", operation, deployment_id);
    let handle = match coordinator.submit(deployment_id, operation).await {
        Ok(handle) => handle,
        Err(e) => {
            printer.abort();
            eprintln!("{}", e.to_string().red());
            return ExitCode::FAILURE;
        }
    };

    let result = handle.await;
    // The terminal event is published before the final commit returns
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        info!("Progress stream ended without a terminal event");
    }

    match result {
        Ok(Ok(deployment)) => {
            print_status(&deployment);
            if deployment.status.is_failure() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Ok(Err(e)) => {
            eprintln!("{}", e.to_string().red());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Operation task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// `Ok(None)` when no operation flag was given; `Some((id, None))` for `--status`
fn parse_operation(
    cli_args: &HashMap<String, String>,
) -> Result<Option<(u64, Option<Operation>)>, String> {
    let flags = ["sync", "deploy", "start", "stop", "status"];
    let given: Vec<&str> = flags
        .iter()
        .copied()
        .filter(|f| cli_args.contains_key(*f))
        .collect();
    let flag = match given.as_slice() {
        [] => return Ok(None),
        [flag] => *flag,
        _ => return Err(format!("Only one of --{} may be given", flags.join(", --"))),
    };

    let raw = &cli_args[flag];
    let id: u64 = raw
        .parse()
        .map_err(|_| format!("--{} expects a deployment id, got `{}`", flag, raw))?;

    let operation = match flag {
        "sync" => Some(Operation::Sync),
        "deploy" => Some(Operation::Deploy(DeployRequest {
            deploy_path: cli_args.get("path").cloned(),
            environment: cli_args.get("environment").cloned(),
        })),
        "start" => Some(Operation::Start),
        "stop" => Some(Operation::Stop),
        _ => None,
    };
    Ok(Some((id, operation)))
}

async fn associate(store: &FileStore, pair: &str) -> ExitCode {
    let ids = pair
        .split_once(',')
        .and_then(|(p, m)| Some((p.trim().parse::<u64>().ok()?, m.trim().parse::<u64>().ok()?)));
    let Some((project_id, machine_id)) = ids else {
        eprintln!("--associate expects <project_id>,<machine_id>");
        return ExitCode::FAILURE;
    };
    match store.associate(project_id, machine_id, None, None).await {
        Ok(deployment) => {
            print_status(&deployment);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            ExitCode::FAILURE
        }
    }
}

fn print_event(event: &ProgressEvent) {
    let line = format!("[{:>3}%] {}", event.progress, event.message);
    match event.status {
        ProgressStatus::Complete => println!("{}", line.green()),
        ProgressStatus::Error => println!("{}", line.red()),
        ProgressStatus::Start | ProgressStatus::Progress => println!("{}", line),
    }
}

fn print_status(deployment: &Deployment) {
    let status = deployment.status.as_str();
    let status = match deployment.status {
        DeploymentStatus::Success | DeploymentStatus::Running | DeploymentStatus::Stopped => {
            status.green()
        }
        s if s.is_failure() => status.red(),
        _ => status.yellow(),
    };
    println!(
        "deployment {}: {} ({}, path {})",
        deployment.id,
        status.bold(),
        deployment.environment,
        deployment.deploy_path().unwrap_or("unset")
    );
    if let Some(last) = deployment.log.rsplit("\n\n").next().filter(|b| !b.is_empty()) {
        println!("{}", last.dimmed());
    }
}
