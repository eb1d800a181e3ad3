use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use simlady_crm::config::Config;
use simlady_crm::invoice::TrailingPolicy;
use simlady_crm::llm::ChatClient;
use simlady_crm::reports::ReportKind;
use simlady_crm::store::CatalogStore;
use simlady_crm::{Result, import, pdf, reports, seed};
use time::OffsetDateTime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simlady_crm", about = "Invoice intake and sales reports")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, global = true, default_value = "crm.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the product table from a supplier invoice PDF
    Extract {
        pdf: PathBuf,
        /// Vendor layout tag (e.g. "boticario")
        #[arg(long)]
        module: String,
        /// Drop an incomplete trailing row instead of failing
        #[arg(long)]
        drop_partial: bool,
        /// Also ask the model for catalog entries
        #[arg(long)]
        enrich: bool,
    },
    /// Extract an invoice and file its products into the catalog
    Import {
        pdf: PathBuf,
        #[arg(long)]
        module: String,
        #[arg(long)]
        drop_partial: bool,
    },
    /// Generate a report: financial-summary, restock-alerts, demand-forecast, next-best-action
    Report { kind: String },
    /// Fill an empty database with demo data
    Seed,
    /// Row counts per table
    Stats,
}

fn policy(drop_partial: bool) -> TrailingPolicy {
    if drop_partial {
        TrailingPolicy::DropPartial
    } else {
        TrailingPolicy::FailFast
    }
}

fn open_store(cfg: &Config) -> Result<CatalogStore> {
    if let Some(parent) = cfg.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(CatalogStore::new(&cfg.db_path)?)
}

async fn run(command: Commands, config_path: &Path) -> Result<Value> {
    let cfg = Config::load_or_default(config_path)?;
    let now = OffsetDateTime::now_utc();

    match command {
        Commands::Extract {
            pdf: path,
            module,
            drop_partial,
            enrich,
        } => {
            let invoice = pdf::process_file(&cfg.upload_dir, &path, &module, policy(drop_partial))?;
            if !enrich {
                return Ok(serde_json::to_value(&invoice)?);
            }
            let client = ChatClient::connect(&cfg.llm).await?;
            let drafts = import::enrich_products(&client, &invoice).await?;
            Ok(json!({ "invoice": invoice, "drafts": drafts }))
        }
        Commands::Import {
            pdf: path,
            module,
            drop_partial,
        } => {
            let invoice = pdf::process_file(&cfg.upload_dir, &path, &module, policy(drop_partial))?;
            let store = open_store(&cfg)?;
            Ok(serde_json::to_value(import::import_invoice(&store, &invoice, now)?)?)
        }
        Commands::Report { kind } => {
            let kind: ReportKind = kind.parse()?;
            let store = open_store(&cfg)?;
            let client = ChatClient::connect(&cfg.llm).await?;
            reports::generate_report(&store, &client, kind, now).await
        }
        Commands::Seed => {
            let store = open_store(&cfg)?;
            let seeded = seed::seed(&store, now)?;
            Ok(json!({ "seeded": seeded, "counts": store.get_counts()? }))
        }
        Commands::Stats => {
            let store = open_store(&cfg)?;
            Ok(serde_json::to_value(store.get_counts()?)?)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // init tracing
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli.command, &cli.config).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()));
            info!("Done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            match serde_json::to_string(&e.to_body()) {
                Ok(body) => println!("{body}"),
                Err(_) => println!("{e}"),
            }
            ExitCode::FAILURE
        }
    }
}
