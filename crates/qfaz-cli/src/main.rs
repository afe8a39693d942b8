//! Q-FAZ - Storm and bank report reconciliation client

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LoggingConfig};
use qfaz_client::{BackendList, BankProcessingResult, ResilientClient, StormSummary};
use qfaz_core::{CoreError, Operation, ReportService};

/// Q-FAZ - uploads Storm and bank reports to the processing backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Single backend origin
    #[arg(long, env = "QFAZ_BACKEND_URL")]
    backend_url: Option<String>,

    /// Ordered, comma separated backend origins
    #[arg(long, env = "QFAZ_BACKEND_URLS", value_delimiter = ',')]
    backend_urls: Option<Vec<String>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the resolved backend candidates and whether they answer
    Backends,

    /// Upload a Storm report and print its summary
    Storm {
        /// Storm report (.csv, .xlsx or .xls)
        file: PathBuf,
    },

    /// Upload the Storm report, process bank reports and download the result
    Run {
        /// Storm report
        #[arg(long)]
        storm: PathBuf,

        /// Bank report; repeat for several banks
        #[arg(long = "bank", required = true)]
        banks: Vec<PathBuf>,

        /// Directory the final CSV is saved into
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Print the download link instead of downloading
        #[arg(long)]
        no_download: bool,
    },

    /// Query the state of a processing job
    Status {
        job_id: String,
    },

    /// Download a generated file by its server path
    Download {
        /// Server path such as /api/download/relatorio_final_storm.csv
        path: String,

        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    config.apply_overrides(args.backend_urls, args.backend_url);

    init_logging(&config.logging);

    info!("Starting Q-FAZ v{}", env!("CARGO_PKG_VERSION"));
    config.log_summary(&args.config);
    config.validate();

    let backends = BackendList::resolve(&config.backend_sources());
    if backends.is_empty() {
        info!(
            "No backend configured, using same-origin requests against {}",
            config.backends.same_origin
        );
    } else {
        info!("Backend candidates: {:?}", backends.origins());
    }

    let client = ResilientClient::new(backends, config.client_config())?;
    let mut service = ReportService::new(client);

    run(&mut service, args.command).await.map_err(|e| {
        error!("{}", error_chain(&e));
        anyhow::anyhow!(e.user_message())
    })
}

async fn run(service: &mut ReportService, command: Command) -> Result<(), CoreError> {
    match command {
        Command::Backends => {
            for probe in service.client().probe().await {
                let origin = if probe.origin.is_empty() {
                    "(same origin)"
                } else {
                    probe.origin.as_str()
                };
                match probe.status {
                    Some(status) => println!(
                        "{:<40} reachable   HTTP {} in {:?}",
                        origin, status, probe.latency
                    ),
                    None => println!(
                        "{:<40} unreachable {}",
                        origin,
                        probe.error.as_deref().unwrap_or("")
                    ),
                }
            }
        }

        Command::Storm { file } => {
            let summary = service.upload_storm(&file).await?;
            print_storm(summary);
        }

        Command::Run {
            storm,
            banks,
            out,
            no_download,
        } => {
            let summary = service.upload_storm(&storm).await?;
            print_storm(summary);

            let result = service.process_banks(&banks).await?;
            print_result(result);

            if no_download {
                if let Some(link) = service.download_link() {
                    println!("Download: {}", link);
                }
            } else {
                let file = service.download_result(&out).await?;
                println!("Saved {} ({} bytes)", file.path.display(), file.size);
            }
        }

        Command::Status { job_id } => {
            let job = service
                .client()
                .processing_status(service.session(), &job_id)
                .await
                .map_err(CoreError::backend(Operation::StatusQuery))?;

            println!("Job {}: {}", job.id, job.status);
            if !job.message.is_empty() {
                println!("  {}", job.message);
            }
            println!("  {}/{} records", job.processed_records, job.total_records);
            if let Some(file) = &job.result_file {
                println!("  Result: {}", file);
            }
        }

        Command::Download { path, out } => {
            tokio::fs::create_dir_all(&out).await?;
            let file = service
                .client()
                .download(service.session(), &path, &out)
                .await
                .map_err(CoreError::backend(Operation::Download))?;
            println!("Saved {} ({} bytes)", file.path.display(), file.size);
        }
    }

    Ok(())
}

fn print_storm(summary: &StormSummary) {
    println!("Storm report {}", summary.filename);
    println!("  Proposals:         {}", summary.total_proposals);
    println!("  Paid or cancelled: {}", summary.paid_cancelled);
}

fn print_result(result: &BankProcessingResult) {
    if !result.message.is_empty() {
        println!("{}", result.message);
    }
    println!("  Records:            {}", result.total_records);
    println!("  Mapped:             {}", result.total_mapped());
    println!("  Duplicates removed: {}", result.total_duplicates_removed());

    for bank in &result.bank_summaries {
        println!(
            "  {:<20} {} records, {} mapped, {} unmapped",
            bank.bank_name, bank.total_records, bank.mapped_records, bank.unmapped_records
        );
        for (status, count) in &bank.status_distribution {
            println!("    {:<18} {}", status, count);
        }
    }
}

/// Error message followed by each of its sources
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Initialize logging. Logs go to stderr so command output stays clean.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
