//! pyrastream - an on-demand tile and region server for gigapixel pyramidal images.
//!
//! This binary parses the CLI, builds the storage/cache/processing stack, and
//! starts the HTTP server (or runs a one-shot storage connectivity probe).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pyrastream::config::{Cli, Command, ProbeConfig, ServeConfig, StorageBackend};
use pyrastream::io::create_s3_client;
use pyrastream::server::{create_router, AppState, RouterConfig};
use pyrastream::slide::{FsSlideSource, S3SlideSource, SlideRegistry, SlideSource};
use pyrastream::tile::{Jp2kCache, RegionComposer, TileCache, TileManager, Watermark};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Probe(config) => run_probe(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("storage backend: {:?}", config.source);
    info!(
        "cache: {} sources, {} blocks/source, {}MB tiles",
        config.cache_sources, config.cache_blocks, config.max_image_cache_mb
    );

    let result = match config.source {
        StorageBackend::Fs => {
            let root = config.root.clone().expect("validated above");
            info!("root: {}", root.display());
            let source = FsSlideSource::new(root);
            serve_with_source(source, &config).await
        }
        StorageBackend::S3 => {
            let bucket = config.s3_bucket.clone().expect("validated above");
            info!("bucket: {}", bucket);
            if let Some(ref endpoint) = config.s3_endpoint {
                info!("endpoint: {}", endpoint);
            }
            let client = create_s3_client(config.s3_endpoint.as_deref()).await;
            let source = S3SlideSource::new(client, bucket);
            serve_with_source(source, &config).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve_with_source<S>(source: S, config: &ServeConfig) -> Result<(), String>
where
    S: SlideSource + 'static,
    S::Reader: pyrastream::io::RangeReader + 'static,
{
    let registry = Arc::new(SlideRegistry::with_capacity(
        source,
        config.cache_sources,
        config.block_size,
        config.cache_blocks,
    ));

    let cache = Arc::new(TileCache::new(config.max_image_cache_mb * 1024 * 1024));

    let jp2k_cache = Arc::new(Jp2kCache::new(config.max_metadata_cache_entries));

    let watermark = match &config.watermark_image {
        Some(path) => {
            info!("watermark: {}", path.display());
            let w = Watermark::load(path, config.watermark_opacity, config.watermark_probability)
                .map_err(|e| format!("failed to load watermark: {e}"))?;
            Some(Arc::new(w))
        }
        None => None,
    };

    let manager = Arc::new(TileManager::new(
        Arc::clone(&registry),
        jp2k_cache,
        Arc::clone(&cache),
        watermark,
        config.codec_passthrough,
    ));

    let composer = Arc::new(RegionComposer::new(Arc::clone(&registry), Arc::clone(&manager)));

    let app_state = AppState {
        registry,
        manager,
        composer,
        cache_max_age: config.cache_max_age,
        max_output_dimension: config.max_output_dimension,
        allow_upscaling: config.allow_upscaling,
        default_jpeg_quality: config.jpeg_quality,
        interpolation_kind: config.interpolation_kind,
    };

    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);
    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }
    router_config = router_config.with_tracing(!config.no_tracing);

    let router = create_router(app_state, router_config);
    let addr = config.bind_address();

    info!("────────────────────────────────────────────────────────");
    info!("  listening on http://{}", addr);
    info!("    curl http://{}/healthz", addr);
    info!("    curl http://{}/info/<slide_id>", addr);
    info!("    open http://{}/viewer/<slide_id>", addr);
    info!("────────────────────────────────────────────────────────");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("failed to bind to {addr}: {e}"))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| format!("server error: {e}"))
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pyrastream=debug,tower_http=debug"
    } else {
        "pyrastream=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Probe Command
// =============================================================================

async fn run_probe(config: ProbeConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    println!("pyrastream storage probe");
    println!("════════════════════════");
    println!();

    let result = match config.source {
        StorageBackend::Fs => probe_fs(&config).await,
        StorageBackend::S3 => probe_s3(&config).await,
    };

    match result {
        Ok(()) => {
            println!();
            println!("✓ all checks passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("✗ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn probe_fs(config: &ProbeConfig) -> Result<(), String> {
    let root = config.root.as_ref().ok_or("no --root configured")?;
    println!("root: {}", root.display());

    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| format!("cannot read {}: {e}", root.display()))?;

    let mut slides = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| format!("error reading directory: {e}"))?
    {
        if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            if let Some(name) = entry.file_name().to_str() {
                if is_slide_name(name) {
                    slides.push(name.to_string());
                }
            }
        }
    }

    println!("found {} source image(s)", slides.len());
    if config.list {
        for slide in &slides {
            println!("  {slide}");
        }
    }

    Ok(())
}

async fn probe_s3(config: &ProbeConfig) -> Result<(), String> {
    let bucket = config.s3_bucket.as_deref().ok_or("no --s3-bucket configured")?;
    println!("bucket: {bucket}");
    if let Some(ref endpoint) = config.s3_endpoint {
        println!("endpoint: {endpoint}");
    }
    println!("region: {}", config.s3_region);

    let client = create_s3_client(config.s3_endpoint.as_deref()).await;

    let result = client
        .list_objects_v2()
        .bucket(bucket)
        .max_keys(1000)
        .send()
        .await
        .map_err(|e| format!("failed to connect to S3: {e}"))?;

    let slides: Vec<String> = result
        .contents()
        .iter()
        .filter_map(|obj| obj.key())
        .filter(|key| is_slide_name(key))
        .map(|key| key.to_string())
        .collect();

    println!("found {} source image(s)", slides.len());
    if config.list {
        for slide in &slides {
            println!("  {slide}");
        }
    }

    Ok(())
}

fn is_slide_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".svs")
        || lower.ends_with(".tif")
        || lower.ends_with(".tiff")
        || lower.ends_with(".jp2")
        || lower.ends_with(".j2k")
}
