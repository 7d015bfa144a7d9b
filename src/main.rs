use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use imgfit::config::{self, CONFIG_FILENAME, ImgfitConfig};
use imgfit::engine::EngineOperation;
use imgfit::hash::{request_key, tokey};
use imgfit::image_file::{ImageFile, parse_format};
use imgfit::imaging::{Operation, Quality, TransformOptions};
use imgfit::processor::{Outcome, ProcessRequest, Processor};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Release version on a clean tagged build, `dev@<hash>[-dirty]` otherwise.
fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG") == "true";
    let dirty = env!("GIT_DIRTY") == "true";
    let hash = env!("GIT_HASH");
    match (on_tag && !dirty, hash.is_empty()) {
        (true, _) => env!("CARGO_PKG_VERSION"),
        (false, true) => "dev@unknown",
        (false, false) => {
            let suffix = if dirty { "-dirty" } else { "" };
            // Called once per process
            Box::leak(format!("dev@{hash}{suffix}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "imgfit")]
#[command(about = "On-demand image transform cache")]
#[command(long_about = "\
On-demand image transform cache

Source images live in the source storage. Derived variants (thumbnails,
resizes, rotations...) are generated on first request, written to the
destination storage under a sharded path derived from the cache key, and
served from there afterwards.

Operations:
  resize     scale to width/height (0 derives one side from the aspect ratio)
  thumbnail  centre-crop to the target aspect ratio, then scale
  fit        scale to fit inside width x height
  rotate     rotate by --degree (90, 180, 270)
  flip       mirror along --position (h or v)
  blur       gaussian blur with --sigma
  flat       flatten transparency onto white

Run 'imgfit gen-config' to generate a documented imgfit.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file
    #[arg(long, default_value = CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Log filter, e.g. "info" or "imgfit=debug" (RUST_LOG wins if set)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

/// Which variant of a source image to produce.
#[derive(Args, Clone)]
struct TransformArgs {
    /// Source path in the source storage
    path: String,

    /// Operation; repeat to give fallbacks tried in order
    #[arg(long = "op", default_value = "thumbnail")]
    operations: Vec<Operation>,

    #[arg(long, default_value_t = 0)]
    width: u32,

    #[arg(long, default_value_t = 0)]
    height: u32,

    /// Output format (jpg, png, gif, webp...); defaults to the source format
    #[arg(long)]
    format: Option<String>,

    /// Encoding quality (1-100)
    #[arg(long)]
    quality: Option<u32>,

    /// Allow resizing beyond the source dimensions
    #[arg(long)]
    upscale: bool,

    /// Rotation in degrees
    #[arg(long, default_value_t = 0)]
    degree: u32,

    /// Flip axis
    #[arg(long, default_value = "")]
    position: String,

    /// Blur strength
    #[arg(long, default_value_t = 0.0)]
    sigma: f32,
}

impl TransformArgs {
    fn candidates(&self, processor: &Processor) -> Result<Vec<EngineOperation>, String> {
        let requested = match &self.format {
            Some(name) => {
                Some(parse_format(name).ok_or_else(|| format!("unknown format: {name}"))?)
            }
            None => None,
        };
        // Only the path matters for picking the output format
        let source = ImageFile::new(self.path.as_str(), Bytes::new());
        let options = TransformOptions {
            width: self.width,
            height: self.height,
            upscale: self.upscale,
            format: processor.engine().output_format(&source, requested),
            quality: self
                .quality
                .map(Quality::new)
                .unwrap_or_else(|| processor.engine().quality()),
            degree: self.degree,
            position: self.position.clone(),
            sigma: self.sigma,
        };
        Ok(self
            .operations
            .iter()
            .map(|op| EngineOperation::new(*op, options.clone()))
            .collect())
    }
}

/// Cache key for a list of candidates: the request key of a single
/// operation, or a hash over all of them.
fn candidates_key(path: &str, candidates: &[EngineOperation]) -> String {
    let keys: Vec<String> = candidates
        .iter()
        .map(|c| request_key(path, c.operation, &c.options))
        .collect();
    match keys.as_slice() {
        [single] => single.clone(),
        _ => tokey(&keys),
    }
}

#[derive(Subcommand)]
enum Command {
    /// Store an image in the source storage under a new random name
    Upload {
        /// Image file to upload
        file: PathBuf,
    },
    /// Produce (or fetch from cache) a derived variant
    Get {
        #[command(flatten)]
        transform: TransformArgs,

        /// Regenerate even if cached
        #[arg(long)]
        force: bool,

        /// Write the bytes here instead of printing the stored path
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Delete a source image and, with cascade delete on, its variants
    Delete {
        /// Source path in the source storage
        path: String,
    },
    /// Print the cache key and stored path of a variant
    Key {
        #[command(flatten)]
        transform: TransformArgs,
    },
    /// Print a stock imgfit.toml with all options documented
    GenConfig,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Command, config: ImgfitConfig) -> Result<(), Box<dyn std::error::Error>> {
    let processor = Processor::from_config(&config);

    match command {
        Command::Upload { file } => {
            let content = tokio::fs::read(&file).await?;
            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let (image, width, height) = processor.upload(filename, content.into()).await?;
            println!("{} {}x{}", image.filepath, width, height);
        }
        Command::Get {
            transform,
            force,
            output,
        } => {
            let candidates = transform.candidates(&processor)?;
            let key = candidates_key(&transform.path, &candidates);
            let mut request = ProcessRequest::new(key, transform.path.as_str(), candidates);
            request.force = force;
            request.load = output.is_some();

            let image = match processor.process(request).await? {
                Outcome::NotModified => return Ok(()),
                Outcome::Cached(image) => image,
                Outcome::Fresh { image, persist } => {
                    if let Some(handle) = persist {
                        handle.wait().await;
                    }
                    image
                }
            };
            match output {
                Some(path) => tokio::fs::write(&path, image.content()).await?,
                None => println!("{}", image.filepath),
            }
        }
        Command::Delete { path } => {
            let removed = processor.delete(&path).await?;
            println!("deleted {path} ({removed} derived files)");
        }
        Command::Key { transform } => {
            let candidates = transform.candidates(&processor)?;
            let key = candidates_key(&transform.path, &candidates);
            match processor.get_key(&key).await? {
                Some(stored) => println!("{key} {stored}"),
                None => println!("{key} -"),
            }
        }
        Command::GenConfig => print!("{}", config::stock_config_toml()),
    }

    Ok(())
}
