mod batch;
mod clock;
mod config;
mod imagen;
mod models;
mod rate_limit;
mod retry;
mod routes;
mod storage;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tracing_subscriber::{fmt, EnvFilter};

use crate::{
    batch::{write_results, BatchDriver},
    clock::{Clock, SystemClock},
    config::{ServerSettings, SupabaseSettings, VertexSettings},
    imagen::{ImagenClient, RateLimitedGenerator},
    models::GenerateOptions,
    rate_limit::RateLimiter,
    retry::RetryPolicy,
    routes::AppState,
    storage::StorageClient,
};

#[derive(Parser)]
#[command(name = "imagen-batch", version, about = "Generate site imagery with Vertex AI Imagen and publish it to Supabase Storage")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate and upload one image per CSV row
    Batch(BatchArgs),
    /// Serve the admin generation endpoint
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Args)]
struct BatchArgs {
    /// CSV with original_url,target_url,image_type,prompt columns
    #[arg(default_value = "Supabase/test-data/test-images.csv")]
    csv: PathBuf,
    #[arg(long, default_value = "Supabase/test-data/generation-results.json")]
    output: PathBuf,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    bucket: Option<String>,
    /// Pause between rows
    #[arg(long, default_value_t = 1500)]
    delay_ms: u64,
    #[arg(long)]
    aspect_ratio: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    match Cli::parse().command {
        Command::Batch(args) => run_batch(args).await,
        Command::Serve { port } => serve(port).await,
    }
}

async fn run_batch(args: BatchArgs) -> anyhow::Result<()> {
    let mut vertex = VertexSettings::from_env().context("Vertex AI configuration")?;
    if let Some(model) = args.model {
        vertex.model = model;
    }
    let mut supabase = SupabaseSettings::from_env().context("Supabase configuration")?;
    if let Some(bucket) = args.bucket {
        supabase.bucket = bucket;
    }
    tracing::info!(project = %vertex.project, location = %vertex.location, model = %vertex.model, "Starting batch image generation");
    tracing::info!("Using CSV file: {}", args.csv.display());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let limiter = Arc::new(RateLimiter::with_imagen_quotas(clock.clone()));
    let generator = RateLimitedGenerator::new(ImagenClient::new(&vertex), limiter, RetryPolicy::default(), clock.clone());
    let store = StorageClient::new(&supabase);
    let options = GenerateOptions { aspect_ratio: args.aspect_ratio, ..Default::default() };

    let driver = BatchDriver::new(Arc::new(generator), Arc::new(store), clock, supabase.bucket)
        .with_item_delay(Duration::from_millis(args.delay_ms))
        .with_options(options);
    let records = driver
        .process_csv(&args.csv)
        .await
        .context("batch image generation failed")?;
    write_results(&args.output, &records)?;
    tracing::info!("Batch image generation finished.");
    Ok(())
}

async fn serve(port: Option<u16>) -> anyhow::Result<()> {
    let vertex = VertexSettings::from_env().context("Vertex AI configuration")?;
    let server = ServerSettings::from_env().context("server configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let state = AppState {
        imagen: ImagenClient::new(&vertex),
        limiter: Arc::new(RateLimiter::with_imagen_quotas(clock.clone())),
        retry: RetryPolicy::default(),
        clock,
        admin_token: Arc::from(server.admin_token.as_str()),
    };
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(server.port)));
    tracing::info!(%addr, "Starting admin server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}
