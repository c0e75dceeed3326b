use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use evaluation_export::config::{ExportConfig, TEMPLATE_FILE_ENV};
use evaluation_export::memory_store::{MemoryDocumentStore, SheetSnapshot};
use evaluation_export::{export, identity, layout, projection, records, report};

#[derive(Parser)]
#[command(name = "evaluation-export")]
#[command(about = "Export multi-rater evaluation records into per-employee sheets", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one sheet per employee from the template document
    Export {
        #[arg(long)]
        period: String,
        #[arg(long)]
        records: PathBuf,
        /// Folder the output document is created in
        #[arg(long)]
        folder: String,
        /// Overrides ADMIN_VIEW_TEMPLATE_FILE_ID
        #[arg(long)]
        template_file_id: Option<String>,
        /// Template document sheets as JSON; a blank template sheet when omitted
        #[arg(long)]
        template: Option<PathBuf>,
        #[arg(long, default_value = "document.json")]
        out: PathBuf,
        /// Markdown run summary
        #[arg(long)]
        summary: Option<PathBuf>,
        /// CSV table of per-employee outcomes
        #[arg(long)]
        summary_csv: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        concurrency: usize,
    },
    /// Print the values each employee sheet would receive
    Preview {
        #[arg(long)]
        period: String,
        #[arg(long)]
        records: PathBuf,
        #[arg(long)]
        employee: Option<String>,
    },
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer())
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Commands::Export {
            period,
            records,
            folder,
            template_file_id,
            template,
            out,
            summary,
            summary_csv,
            concurrency,
        } => {
            let config = ExportConfig::from_lookup(|key| match (key, &template_file_id) {
                (TEMPLATE_FILE_ENV, Some(id)) => Some(id.clone()),
                _ => std::env::var(key).ok(),
            })?
            .with_concurrency(concurrency);

            let record_set = records::load_records(&records)?;
            let template_sheets = match template {
                Some(path) => records::load_template_sheets(&path)?,
                None => vec![SheetSnapshot::blank(&config.template_sheet_title)],
            };
            let store =
                MemoryDocumentStore::new().with_template(&config.template_file_id, template_sheets);

            let run = export::run_export(&store, &config, &period, &record_set, &folder).await?;

            let document = store
                .document(&run.document_id)
                .context("exported document missing from store")?;
            std::fs::write(&out, serde_json::to_string_pretty(&document)?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Exported {} of {} employees to {}.",
                run.succeeded(),
                run.outcomes.len(),
                out.display()
            );

            if let Some(path) = summary {
                std::fs::write(&path, report::build_report(&run))?;
                println!("Report written to {}.", path.display());
            }
            if let Some(path) = summary_csv {
                report::write_outcomes_csv(&run, &path)?;
                println!("Outcomes written to {}.", path.display());
            }
        }
        Commands::Preview {
            period,
            records,
            employee,
        } => {
            let record_set = records::load_records(&records)?;
            let employees = identity::resolve_identities(&record_set);

            if employees.is_empty() {
                println!("No employees found in {}.", records.display());
                return Ok(());
            }

            for name in employees
                .iter()
                .filter(|name| employee.as_deref().map_or(true, |wanted| wanted == name.as_str()))
            {
                let projection = projection::project(name, &period, &record_set);
                println!("{name} ({period})");
                for block in layout::employee_blocks(name, &period, &projection) {
                    let rows: Vec<String> = block
                        .values
                        .iter()
                        .map(|row| {
                            row.iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join(" | ")
                        })
                        .collect();
                    println!("  {}: {}", block.range, rows.join(" / "));
                }
            }
        }
    }

    Ok(())
}
