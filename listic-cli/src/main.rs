mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use listic_ingest::scrape::ScrapeConfig;

#[derive(Parser)]
#[command(name = "listic")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Where documents are stored
    #[arg(long, global = true, env = "LISTIC_STORE", value_enum, default_value_t = StoreKind::Memory)]
    pub store: StoreKind,

    /// Bucket of the S3 store
    #[arg(long, global = true, env = "STORE_BUCKET")]
    pub bucket: Option<String>,

    /// AWS region of the S3 store
    #[arg(long, global = true, env = "REGION")]
    pub region: Option<String>,

    /// Database name, overriding the dataset's own
    #[arg(long, global = true, env = "LISTIC_DATABASE")]
    pub database: Option<String>,

    /// Pages fetched at once
    #[arg(long, global = true, env = "LISTIC_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Seconds each worker waits after a fetch
    #[arg(long, global = true, env = "LISTIC_DELAY", default_value_t = 1.0)]
    pub delay: f64,

    /// Seconds before a request is abandoned
    #[arg(long, global = true, env = "LISTIC_TIMEOUT", default_value_t = 15)]
    pub timeout: u64,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalOpts {
    pub fn scrape_config(&self) -> ScrapeConfig {
        ScrapeConfig {
            workers: self.workers.max(1),
            delay: Duration::from_secs_f64(self.delay.max(0.0)),
            timeout: Duration::from_secs(self.timeout),
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// In-process store, gone when the command exits (dry runs)
    Memory,
    /// One JSON object per document in an S3 bucket
    S3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Publications {
    /// HAL open archive
    Hal,
    /// DBLP computer science bibliography
    Dblp,
    /// HAL, then DBLP
    All,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape member contact pages listed in a sources file
    ScrapePeople {
        /// JSON object: category -> list of profile URLs
        #[arg(long)]
        sources: PathBuf,

        /// Staff directory page whose table fills `administratif_et_technique`
        #[arg(long)]
        staff_page: Option<String>,

        #[arg(long, default_value = "data/Enseignants.json")]
        output: PathBuf,

        /// Also load the result into the store
        #[arg(long)]
        ingest: bool,
    },

    /// Scrape the project tables
    ScrapeProjects {
        #[arg(long, default_value = listic_ingest::scrape::projects::PROJECTS_URL)]
        url: String,

        #[arg(long, default_value = "data/Projets.json")]
        output: PathBuf,

        #[arg(long)]
        ingest: bool,
    },

    /// Scrape the job offer listing and the offer PDFs
    ScrapeOffers {
        #[arg(long, default_value = listic_ingest::scrape::offers::OFFERS_URL)]
        url: String,

        #[arg(long, default_value = "data/Offres_Emploi.json")]
        output: PathBuf,

        /// Keep listing fields only, without downloading the PDFs
        #[arg(long)]
        no_pdf: bool,

        #[arg(long)]
        ingest: bool,
    },

    /// Load a data file into the store and refresh the dataset snapshot
    Import {
        /// personnel, projects or offers
        #[arg(long)]
        dataset: String,

        #[arg(long)]
        input: PathBuf,
    },

    /// Add publication data to the people already in the store
    Enrich {
        #[arg(long, value_enum, default_value_t = Publications::All)]
        source: Publications,

        /// Look up people that already have data from the source
        #[arg(long)]
        refresh: bool,
    },

    /// Write one CSV file per category of a data file
    ExportCsv {
        #[arg(long)]
        input: PathBuf,

        #[arg(long, default_value = "csv")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .init();

    let global = &cli.global;
    let result = match cli.command {
        Commands::ScrapePeople {
            sources,
            staff_page,
            output,
            ingest,
        } => commands::scrape_people(global, &sources, staff_page.as_deref(), &output, ingest).await,
        Commands::ScrapeProjects { url, output, ingest } => {
            commands::scrape_projects(global, &url, &output, ingest).await
        }
        Commands::ScrapeOffers {
            url,
            output,
            no_pdf,
            ingest,
        } => commands::scrape_offers(global, &url, &output, !no_pdf, ingest).await,
        Commands::Import { dataset, input } => commands::import(global, &dataset, &input).await,
        Commands::Enrich { source, refresh } => commands::enrich(global, source, refresh).await,
        Commands::ExportCsv { input, output_dir } => commands::export_csv(&input, &output_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{}", err.msg);
            ExitCode::FAILURE
        }
    }
}
