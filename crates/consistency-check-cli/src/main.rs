//! consistency-check CLI - chunked consistency checks between a replication
//! source and its replicas.

use clap::{Parser, Subcommand};
use consistency_check::core::value::SqlValue;
use consistency_check::drivers;
use consistency_check::{
    CheckError, CheckMode, ChunkSize, Config, NodeConfig, ScanOrchestrator, ScanStatus, ScanSummary,
    TableRef,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "consistency-check")]
#[command(about = "Chunked consistency checks between a replication source and its replicas")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare tables between the reference and every target
    Check(CheckArgs),

    /// Create the result store on every node
    InitStore,

    /// Test database connections
    HealthCheck,
}

/// Scan overrides. Anything unset keeps the value from the configuration file.
#[derive(clap::Args)]
struct CheckArgs {
    /// Check mode: direct or replicated
    #[arg(long)]
    mode: Option<String>,

    /// Digest method: pk (primary key ranges) or limit (row positions)
    #[arg(long)]
    method: Option<String>,

    /// Schema to check
    #[arg(long)]
    schema: Option<String>,

    /// Table to check (repeatable; default: every table in the schema)
    #[arg(long = "table", short = 't')]
    tables: Vec<String>,

    /// First row position or key to check
    #[arg(long)]
    row_from: Option<i64>,

    /// End of the checked range, exclusive
    #[arg(long)]
    row_till: Option<i64>,

    /// Rows per chunk (rounded up to a power of two) or "single"
    #[arg(long)]
    chunk_size: Option<String>,

    /// Pause between chunks in milliseconds
    #[arg(long)]
    chunk_pause: Option<u64>,

    /// Stop drilling down at blocks of this many rows
    #[arg(long)]
    granularity: Option<u64>,

    /// Seconds to wait for a target to answer a check
    #[arg(long)]
    timeout: Option<u64>,

    /// Include the rows of every inconsistent block in the report
    #[arg(long)]
    show_rows: bool,
}

impl CheckArgs {
    fn apply(self, config: &mut Config) -> Result<(), CheckError> {
        let check = &mut config.check;
        if let Some(mode) = self.mode {
            check.mode = CheckMode::from_str(&mode)?;
        }
        if let Some(method) = self.method {
            check.method = method;
        }
        if let Some(schema) = self.schema {
            check.schema = Some(schema);
        }
        if !self.tables.is_empty() {
            check.tables = self.tables;
        }
        if self.row_from.is_some() {
            check.row_from = self.row_from;
        }
        if self.row_till.is_some() {
            check.row_till = self.row_till;
        }
        if let Some(size) = self.chunk_size {
            check.chunk_size = ChunkSize::from_str(&size)?;
        }
        if let Some(pause) = self.chunk_pause {
            check.chunk_pause_ms = pause;
        }
        if let Some(granularity) = self.granularity {
            check.granularity = granularity;
        }
        if let Some(timeout) = self.timeout {
            check.timeout_secs = timeout;
        }
        if self.show_rows {
            check.show_rows = true;
        }
        config.validate()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

/// Returns `Ok(false)` when the command completed but found a problem.
async fn run() -> Result<bool, CheckError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Check(args) => {
            args.apply(&mut config)?;
            let cancel = setup_signal_handler();
            run_check(&config, cancel, cli.output_json, cli.progress).await
        }

        Commands::InitStore => {
            let scan = ScanOrchestrator::connect(&config, CancellationToken::new()).await?;
            let result = scan.init_stores().await;
            scan.close().await;
            result?;
            println!(
                "Result store {}.consistency ready on {} node(s)",
                config.store.metadata_schema,
                1 + config.targets.len()
            );
            Ok(true)
        }

        Commands::HealthCheck => {
            let mut nodes = vec![("reference", &config.reference)];
            nodes.extend(config.targets.iter().map(|t| ("target", t)));

            let mut reports = Vec::with_capacity(nodes.len());
            for (role, node) in nodes {
                reports.push(probe(role, node).await);
            }
            let healthy = reports.iter().all(|r| r.error.is_none());

            if cli.output_json {
                let nodes: Vec<_> = reports
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "role": r.role,
                            "name": r.name,
                            "connected": r.error.is_none(),
                            "latency_ms": r.latency_ms,
                            "error": r.error,
                        })
                    })
                    .collect();
                let report = serde_json::json!({ "healthy": healthy, "nodes": nodes });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Health Check Results:");
                for r in &reports {
                    println!(
                        "  {} ({}): {} ({}ms)",
                        r.name,
                        r.role,
                        if r.error.is_none() { "OK" } else { "FAILED" },
                        r.latency_ms
                    );
                    if let Some(ref err) = r.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }
            Ok(healthy)
        }
    }
}

async fn run_check(
    config: &Config,
    cancel: CancellationToken,
    output_json: bool,
    progress: bool,
) -> Result<bool, CheckError> {
    let mut scan = ScanOrchestrator::connect(config, cancel).await?;

    if progress {
        let (tx, mut rx) = mpsc::channel(64);
        scan = scan.with_progress(tx);
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&update) {
                    eprintln!("{}", line);
                }
            }
        });
    }

    let result = scan_tables(&scan, config).await;
    scan.close().await;
    let summary = result?;

    if output_json {
        println!("{}", summary.to_json()?);
    } else {
        print_summary(&summary);
    }
    Ok(summary.passed())
}

async fn scan_tables(scan: &ScanOrchestrator, config: &Config) -> Result<ScanSummary, CheckError> {
    scan.init_stores().await?;
    if let Some(days) = config.store.retention_days {
        let removed = scan.purge_results(days).await?;
        info!("Purged {} result rows older than {} days", removed, days);
    }

    let schema = config.check_schema();
    let tables = if config.check.tables.is_empty() {
        scan.list_tables(&schema).await?
    } else {
        config
            .check
            .tables
            .iter()
            .map(|t| match t.split_once('.') {
                Some((s, name)) => TableRef::new(s, name),
                None => TableRef::new(schema.as_str(), t.as_str()),
            })
            .collect()
    };
    if tables.is_empty() {
        warn!("No tables found in schema {}", schema);
    }

    scan.scan(&tables).await
}

fn print_summary(summary: &ScanSummary) {
    println!("\nConsistency Check Results:");
    for table in &summary.tables {
        let status = match table.status() {
            ScanStatus::Consistent => "✓ Consistent",
            ScanStatus::Inconsistent => "✗ Inconsistent",
            ScanStatus::Failed => "✗ Failed",
        };
        println!(
            "  {} {} ({} chunks, {} checks)",
            status, table.table, table.chunks_checked, table.checks_issued
        );
        if let Some(ref err) = table.error {
            println!("      Error: {}", err);
        }
        for found in &table.inconsistencies {
            println!(
                "      rows [{}, {}) differ on {} (check #{})",
                found.start,
                found.start + found.size,
                found.target,
                found.check_id
            );
            for row in &found.reference_rows {
                println!("        reference: {}", row.join(", "));
            }
            for row in &found.target_rows {
                println!("        {}: {}", found.target, row.join(", "));
            }
        }
        for failure in &table.failures {
            println!(
                "      check of [{}, {}) failed: {}",
                failure.start,
                failure.start + failure.size,
                failure.error
            );
        }
    }

    println!("\nSummary:");
    println!("  Tables checked: {}", summary.tables_checked);
    println!("  Consistent: {}", summary.tables_consistent);
    println!("  Inconsistent: {}", summary.tables_inconsistent);
    println!("  Failed: {}", summary.tables_failed);
    println!("  Checks issued: {}", summary.checks_issued);
    println!("  Duration: {:.2}s", summary.duration_ms as f64 / 1000.0);
    println!("\n  Overall: {}", summary.status().to_string().to_uppercase());
}

struct NodeReport {
    role: &'static str,
    name: String,
    latency_ms: u64,
    error: Option<String>,
}

async fn probe(role: &'static str, node: &NodeConfig) -> NodeReport {
    let start = Instant::now();
    let error = match drivers::connect(node).await {
        Ok(conn) => {
            let result = conn.query("SELECT 1", &[] as &[SqlValue]).await;
            conn.close().await;
            result.err().map(|e| e.to_string())
        }
        Err(e) => Some(e.to_string()),
    };
    NodeReport {
        role,
        name: node.display_name(),
        latency_ms: start.elapsed().as_millis() as u64,
        error,
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the scan on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping scan...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Cancel the scan on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping scan...");
            token.cancel();
        }
    });

    cancel_token
}
