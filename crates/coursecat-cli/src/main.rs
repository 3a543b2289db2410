use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use coursecat_core::{load_catalog, query, seed_catalog, CourseRecord, QuerySpec, SortBy};
use coursecat_widget::{
    resolve, CatalogClient, ClientConfig, ResolvedSource, SharedWidget, WidgetConfig, WidgetState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "coursecat")]
#[command(about = "Course catalog widget command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a query against the mock catalog and print matching records.
    Query {
        #[command(flatten)]
        filters: Filters,
        /// JSON array of course records to use instead of the seed catalog.
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Show whether an endpoint is served from the mock catalog or remotely.
    Resolve { endpoint: Option<String> },
    /// Load a widget end to end and print the normalized course list.
    Fetch {
        #[arg(long)]
        endpoint: Option<String>,
        #[command(flatten)]
        filters: Filters,
    },
    Serve,
}

#[derive(Debug, clap::Args)]
struct Filters {
    #[arg(long)]
    sort: Option<String>,
    #[arg(long)]
    university: Option<String>,
    #[arg(long)]
    country: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    limit: Option<i64>,
}

impl Filters {
    fn spec(&self) -> QuerySpec {
        QuerySpec {
            sort_by: self.sort.as_deref().map(SortBy::parse),
            university: self.university.clone(),
            country: self.country.clone(),
            category: self.category.clone(),
            limit: self.limit,
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Query { filters, catalog } => {
            let catalog: Vec<CourseRecord> = match catalog {
                Some(path) => load_catalog(path)?,
                None => seed_catalog(),
            };
            let rows = query(&catalog, &filters.spec());
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Resolve { endpoint } => match resolve(endpoint.as_deref()) {
            ResolvedSource::Mock => println!("mock"),
            ResolvedSource::Remote(url) => println!("remote {url}"),
        },
        Commands::Fetch { endpoint, filters } => {
            let spec = filters.spec();
            let config = WidgetConfig {
                api_endpoint_url: endpoint,
                sort_by: spec.sort_by,
                university: spec.university,
                country: spec.country,
                category: spec.category,
                limit: spec.limit,
            };
            let client = CatalogClient::with_seed_catalog(&ClientConfig::from_env())?;
            let widget = SharedWidget::new(WidgetConfig::default());
            widget.reconfigure(&client, config).await;
            match widget.state().await {
                WidgetState::Success(loaded) => {
                    if loaded.unrecognized_shape {
                        eprintln!("warning: response held no recognizable course list");
                    }
                    println!("{}", serde_json::to_string_pretty(&loaded.courses)?);
                }
                WidgetState::Failed(failure) => bail!("{}", failure.message),
                other => bail!("widget did not settle: {other:?}"),
            }
        }
        Commands::Serve => coursecat_web::serve_from_env().await?,
    }

    Ok(())
}
