//! CLI for Portrait Recolor.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use portrait_recolor::image::{DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION};
use portrait_recolor::{
    GeminiModel, GeminiRecolorProvider, Normalizer, ProcessingState, RawUpload, RecolorController,
    RecolorError, RecolorProvider, UploadedImage,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portrait-recolor")]
#[command(about = "Restyle a portrait via Gemini: recolor the apparel, paint a new background")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a portrait and send it for restyling
    Recolor(RecolorArgs),

    /// Normalize a portrait locally without contacting the service
    Normalize(NormalizeArgs),

    /// Check that the API key and model are usable
    Health(HealthArgs),
}

#[derive(Args)]
struct RecolorArgs {
    /// Portrait to restyle (JPG, PNG, WEBP or HEIC)
    input: PathBuf,

    /// Output file path [default: <input>_recolored.<ext>]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Gemini model
    #[arg(short, long, value_enum, default_value = "flash-image")]
    model: ModelArg,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

#[derive(Args)]
struct NormalizeArgs {
    /// Portrait to normalize
    input: PathBuf,

    /// Output JPEG path
    #[arg(short, long)]
    output: PathBuf,

    /// Longest edge in pixels
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION)]
    max_dimension: u32,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    quality: u8,
}

#[derive(Args)]
struct HealthArgs {
    /// Gemini model
    #[arg(short, long, value_enum, default_value = "flash-image")]
    model: ModelArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    FlashImage,
    FlashImagePreview,
}

impl From<ModelArg> for GeminiModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::FlashImage => GeminiModel::FlashImage,
            ModelArg::FlashImagePreview => GeminiModel::FlashImagePreview,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("portrait_recolor=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Recolor(args) => recolor(args, cli.json).await,
        Commands::Normalize(args) => normalize(args, cli.json),
        Commands::Health(args) => health(args, cli.json).await,
    }
}

/// Prints a failure the way the user should see it and returns the error
/// for the exit status.
fn fail(err: &RecolorError, json_output: bool) -> anyhow::Error {
    tracing::debug!(error = %err, "command failed");
    if json_output {
        let result = serde_json::json!({
            "success": false,
            "kind": err.kind(),
            "message": err.user_message(),
        });
        println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
    }
    anyhow::anyhow!(err.user_message())
}

fn load(input: &Path, normalizer: &Normalizer, json_output: bool) -> anyhow::Result<UploadedImage> {
    RawUpload::from_path_limited(input, normalizer.options().max_bytes)
        .and_then(|upload| normalizer.normalize(&upload))
        .map_err(|e| fail(&e, json_output))
}

fn build_provider(model: ModelArg, timeout: Duration) -> anyhow::Result<GeminiRecolorProvider> {
    GeminiRecolorProvider::builder()
        .model(model.into())
        .timeout(timeout)
        .build()
        .context("startup configuration")
}

async fn recolor(args: RecolorArgs, json_output: bool) -> anyhow::Result<()> {
    // Missing credentials abort before any work is done.
    let provider = build_provider(args.model, Duration::from_secs(args.timeout))?;
    let provider_name = provider.name().to_string();

    let image = load(&args.input, &Normalizer::new(), json_output)?;
    tracing::info!(
        width = image.width,
        height = image.height,
        provider = %provider_name,
        "restyling portrait"
    );

    let controller = RecolorController::spawn(Arc::new(provider));
    controller.upload(image).await?;
    controller
        .start()
        .await
        .map_err(|e| fail(&e, json_output))?;

    let snapshot = controller.settled().await?;
    let result = match (snapshot.state, snapshot.result, snapshot.error) {
        (ProcessingState::Success, Some(result), _) => result,
        (_, _, Some(failure)) => {
            tracing::debug!(detail = %failure.detail, "recolor failed");
            if json_output {
                let result = serde_json::json!({
                    "success": false,
                    "kind": failure.kind,
                    "message": failure.message,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            anyhow::bail!(failure.message);
        }
        (state, _, _) => anyhow::bail!("session settled in unexpected state: {state}"),
    };

    let output = args
        .output
        .unwrap_or_else(|| default_output_path(&args.input, result.extension()));
    result.save(&output).map_err(|e| fail(&e, json_output))?;

    if json_output {
        let result = serde_json::json!({
            "success": true,
            "output": output.display().to_string(),
            "mime_type": result.image.mime_type(),
            "provider": provider_name,
            "model": result.model,
            "duration_ms": result.duration_ms,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Restyled portrait: {} via {}",
            output.display(),
            provider_name
        );
        if let Some(duration) = result.duration_ms {
            println!("Duration: {}ms", duration);
        }
    }

    Ok(())
}

fn normalize(args: NormalizeArgs, json_output: bool) -> anyhow::Result<()> {
    let normalizer = Normalizer::builder()
        .max_dimension(args.max_dimension)
        .jpeg_quality(args.quality)
        .build()
        .context("invalid normalization options")?;

    let image = load(&args.input, &normalizer, json_output)?;
    let bytes = image.image.decode()?;
    std::fs::write(&args.output, &bytes)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    if json_output {
        let result = serde_json::json!({
            "success": true,
            "output": args.output.display().to_string(),
            "source_format": image.source_format,
            "width": image.width,
            "height": image.height,
            "size_bytes": bytes.len(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Normalized {} ({}) -> {} ({}x{}, {} bytes)",
            args.input.display(),
            image.source_format,
            args.output.display(),
            image.width,
            image.height,
            bytes.len()
        );
    }

    Ok(())
}

async fn health(args: HealthArgs, json_output: bool) -> anyhow::Result<()> {
    let provider = build_provider(args.model, Duration::from_secs(30))?;
    provider
        .health_check()
        .await
        .map_err(|e| fail(&e, json_output))?;

    if json_output {
        let result = serde_json::json!({
            "success": true,
            "provider": provider.name(),
            "model": provider.model().as_str(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{} is reachable ({})", provider.name(), provider.model());
    }

    Ok(())
}

/// `photo.heic` becomes `photo_recolored.png` for a PNG result.
fn default_output_path(input: &Path, extension: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_recolored.{extension}"))
}
