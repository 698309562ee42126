use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use otelcheck::cancel::CancellationToken;
use otelcheck::cluster::KubectlClient;
use otelcheck::diagnoser::{Diagnoser, TriageRequest};
use otelcheck::discovery::{FeatureSnapshot, FeatureWatcher, Features};
use otelcheck::settings::Settings;
use otelcheck::{DiagnosticReport, Severity};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Command-line arguments for the collector diagnostic tool
#[derive(Parser)]
#[command(
    name = "otelcheck",
    about = "OpenTelemetry Collector diagnostics for Kubernetes",
    long_about = "Inspects OpenTelemetry Collector deployments on Kubernetes: detects how a \
                  collector is deployed, checks its configuration against a catalog of known \
                  misconfigurations, and classifies collector and operator logs."
)]
struct Cli {
    /// Path to settings file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Settings file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        global = true,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report which optional operator features the cluster serves
    Features {
        /// Keep running and print every change until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// List collector instances in one namespace or the whole cluster
    List {
        /// Namespace to search; all namespaces when omitted
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Detect the deployment type of a collector workload
    Detect {
        #[arg(short, long)]
        namespace: String,
        #[arg(long)]
        name: String,
    },
    /// Print the raw and parsed collector configuration
    GetConfig {
        #[arg(short, long)]
        namespace: String,
        #[arg(long)]
        configmap: String,
    },
    /// Run the configuration checks without log analysis
    CheckConfig {
        #[arg(short, long)]
        namespace: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        configmap: String,
    },
    /// Run every check and print a prioritized issue list
    Triage {
        #[arg(short, long)]
        namespace: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        configmap: String,
        /// Collector pod whose logs are analyzed
        #[arg(long)]
        pod: Option<String>,
    },
    /// Classify a collector pod's recent logs
    ParseLogs {
        #[arg(short, long)]
        namespace: String,
        #[arg(long)]
        pod: String,
        #[arg(long, value_name = "N")]
        tail_lines: Option<usize>,
    },
    /// Classify the operator's recent logs
    ParseOperatorLogs {
        /// Operator namespace, defaults to the configured one
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// Missing settings files are allowed and fall back to defaults.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref path) = self.config {
            if path.exists() {
                if !path.is_file() {
                    return Err(format!("Settings path is not a file: {}", path.display()));
                }

                if let Some(extension) = path.extension() {
                    if extension != "toml" {
                        warn!("Settings file does not have .toml extension: {}", path.display());
                    }
                }
            }
        }

        if let Command::ParseLogs {
            tail_lines: Some(0),
            ..
        } = self.command
        {
            return Err("--tail-lines must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureStatus {
    #[serde(flatten)]
    snapshot: FeatureSnapshot,
    ready: bool,
    generation: u64,
}

impl FeatureStatus {
    fn of(snapshot: FeatureSnapshot, features: &Features) -> Self {
        Self {
            snapshot,
            ready: features.is_ready(),
            generation: features.generation(),
        }
    }
}

fn print_json_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to serialize feature status: {}", e),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

/// Print a report; reports carrying a structured error make the process fail
fn emit_report(report: &DiagnosticReport) -> Result<bool> {
    info!(
        "{}: {} critical, {} warning, {} info findings",
        report.tool,
        report.count(Severity::Critical),
        report.count(Severity::Warning),
        report.count(Severity::Info)
    );
    print_json(report)?;
    Ok(report.error.is_none())
}

/// One discovery pass for commands that need the operator flag
fn discover_once(
    client: Arc<KubectlClient>,
    settings: &Settings,
    cancel: &CancellationToken,
) -> Features {
    let watcher = FeatureWatcher::new(client, settings.discovery.interval());
    if let Err(e) = watcher.refresh(cancel) {
        warn!("Feature discovery failed, assuming no operator: {}", e);
    }
    watcher.features()
}

fn run_features(
    client: Arc<KubectlClient>,
    settings: &Settings,
    watch: bool,
    cancel: &CancellationToken,
) -> Result<bool> {
    let watcher = FeatureWatcher::new(client, settings.discovery.interval());
    let features = watcher.features();

    if !watch {
        let snapshot = watcher
            .refresh(cancel)
            .context("Feature discovery failed")?;
        let status = FeatureStatus {
            ready: true,
            ..FeatureStatus::of(snapshot, &features)
        };
        print_json(&status)?;
        return Ok(true);
    }

    // The initial state is printed once the first pass is done; changes found
    // by that pass are already part of it.
    let initial_printed = Arc::new(AtomicBool::new(false));
    let change_printed = Arc::clone(&initial_printed);
    let change_features = features.clone();
    let ready_features = features;

    let watcher = watcher
        .with_on_change(move |snapshot| {
            if change_printed.load(Ordering::SeqCst) {
                print_json_line(&FeatureStatus::of(snapshot, &change_features));
            }
        })
        .with_on_ready(move |snapshot| {
            print_json_line(&FeatureStatus::of(snapshot, &ready_features));
            initial_printed.store(true, Ordering::SeqCst);
        });

    info!("Watching cluster features. Press Ctrl+C to stop.");
    let handle = watcher
        .spawn(cancel.clone())
        .context("Failed to start feature watcher")?;
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("Feature watcher thread panicked"))?;

    Ok(true)
}

fn run(cli: Cli, cancel: CancellationToken) -> Result<bool> {
    let settings = Settings::load_or_default(cli.config.as_deref());
    let client = Arc::new(KubectlClient::from_settings(&settings.cluster));

    if let Command::Features { watch } = cli.command {
        return run_features(client, &settings, watch, &cancel);
    }

    let features = discover_once(Arc::clone(&client), &settings, &cancel);
    let diagnoser = Diagnoser::new(client.as_ref(), client.as_ref(), client.as_ref(), features)
        .with_settings(&settings);

    match cli.command {
        Command::Features { .. } => Ok(true),
        Command::List { namespace } => {
            match diagnoser.list_collectors(namespace.as_deref(), &cancel) {
                Ok(listing) => {
                    print_json(&listing)?;
                    Ok(true)
                }
                Err(report) => {
                    emit_report(&report)?;
                    Ok(false)
                }
            }
        }
        Command::Detect { namespace, name } => {
            emit_report(&diagnoser.detect_deployment(&namespace, &name, &cancel))
        }
        Command::GetConfig {
            namespace,
            configmap,
        } => match diagnoser.get_config(&namespace, &configmap, &cancel) {
            Ok(view) => {
                print_json(&view)?;
                Ok(true)
            }
            Err(report) => {
                emit_report(&report)?;
                Ok(false)
            }
        },
        Command::CheckConfig {
            namespace,
            name,
            configmap,
        } => emit_report(&diagnoser.check_config(&namespace, &name, &configmap, &cancel)),
        Command::Triage {
            namespace,
            name,
            configmap,
            pod,
        } => {
            let request = TriageRequest {
                namespace,
                name,
                config_map: configmap,
                pod,
            };
            emit_report(&diagnoser.triage(&request, &cancel))
        }
        Command::ParseLogs {
            namespace,
            pod,
            tail_lines,
        } => emit_report(&diagnoser.parse_collector_logs(
            &namespace,
            &pod,
            tail_lines,
            &cancel,
        )),
        Command::ParseOperatorLogs { namespace } => {
            emit_report(&diagnoser.parse_operator_logs(namespace.as_deref(), &cancel))
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(2);
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), cancelling...");
        signal_token.cancel();
    }) {
        warn!("Failed to install SIGINT handler: {}", e);
    }

    match run(cli, cancel) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
