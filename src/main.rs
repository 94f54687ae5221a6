//! Property valuation engine CLI.

use clap::{Parser, Subcommand};
use propval::{
    api::{self, AppState},
    config::Config,
    growth::HistoricalGrowthStore,
    registry::ModelRegistry,
    service::{PredictionService, ValuationRequest},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "propval")]
#[command(about = "Property price estimation engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve,
    /// Train the model roster from the historical sales dataset
    Train {
        /// Only train models without a usable on-disk artifact
        #[arg(long)]
        missing_only: bool,
    },
    /// Produce a single valuation from the command line
    Predict {
        #[arg(long)]
        city: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        neighbourhood: Option<String>,
        #[arg(long)]
        property_type: String,
        #[arg(long)]
        year_built: i32,
        #[arg(long)]
        area_marla: f64,
        #[arg(long)]
        bedrooms: f64,
        #[arg(long)]
        bathrooms: f64,
        #[arg(long)]
        province: Option<String>,
    },
    /// Show training state and the currently selected model
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let registry = Arc::new(ModelRegistry::new(&config));
    let growth = Arc::new(HistoricalGrowthStore::load(&config.growth_rates_path));
    let service = Arc::new(PredictionService::new(registry.clone(), growth));

    match cli.command {
        Commands::Serve => {
            let state = Arc::new(AppState { service });
            api::serve(state, &config.server.bind).await?;
            Ok(())
        }
        Commands::Train { missing_only } => {
            let summaries =
                tokio::task::spawn_blocking(move || registry.train(missing_only)).await??;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            Ok(())
        }
        Commands::Predict {
            city,
            location,
            neighbourhood,
            property_type,
            year_built,
            area_marla,
            bedrooms,
            bathrooms,
            province,
        } => {
            let request = ValuationRequest {
                city,
                location,
                neighbourhood,
                property_type,
                year_built,
                area_marla,
                bedrooms,
                bathrooms,
                province,
            };
            let response =
                tokio::task::spawn_blocking(move || service.predict_price(&request)).await??;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&registry.status())?);
            Ok(())
        }
    }
}
