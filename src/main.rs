use anyhow::Result;
use clap::Parser;
use crop_weed_vision::{
    config::{Config, DevicePreference},
    web::serve,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crop-weed-vision")]
#[command(about = "Crop classification and crop/weed detection service")]
struct Args {
    /// Server bind address
    #[arg(long, env = "CWV_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Number of worker threads
    #[arg(long, env = "CWV_WORKERS")]
    workers: Option<usize>,

    /// Log level
    #[arg(long, env = "CWV_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Model directory path
    #[arg(long, env = "CWV_MODELS_DIR", default_value = "models")]
    models_dir: String,

    /// Inference device: auto, cpu or cuda
    #[arg(long, env = "CWV_DEVICE", default_value = "auto")]
    device: DevicePreference,

    /// Concurrent inference calls allowed on the accelerator
    #[arg(long, env = "CWV_ACCELERATOR_PERMITS", default_value_t = 1)]
    accelerator_permits: usize,

    /// Disable knowledge enrichment of classification results
    #[arg(long, env = "CWV_NO_ENRICHMENT")]
    no_enrichment: bool,

    /// Knowledge lookup timeout in seconds
    #[arg(long, env = "CWV_ENRICHMENT_TIMEOUT_SECS", default_value_t = 5)]
    enrichment_timeout_secs: u64,

    /// Enable development mode
    #[arg(long, env = "CWV_DEV")]
    dev: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting crop/weed vision service...");
    tracing::info!("Bind address: {}", args.bind);
    tracing::info!("Models directory: {}", args.models_dir);

    let config = Config::new(args.bind, args.models_dir, args.workers, args.dev)?
        .with_device(args.device, args.accelerator_permits)?
        .with_enrichment(!args.no_enrichment, args.enrichment_timeout_secs);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()?;

    runtime.block_on(serve(config))?;

    tracing::info!("Service stopped");
    Ok(())
}
