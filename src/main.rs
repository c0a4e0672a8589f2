use log::{error, info};
use mimalloc::MiMalloc;
use std::env;
use std::sync::Arc;

use preview_cache::{
    FileIndex, FileStore, ImageProvider, LocalFileStore, MemoryFileIndex, PreviewConfig,
    PreviewMode, PreviewRequest, PreviewResolver,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const USAGE: &str = "usage:
  preview-cache resolve <file-id> <path> <width> <height> [--upscale] [--aspect] [--cover]
  preview-cache invalidate <file-id>";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = PreviewConfig::from_env()?;
    info!("Data path: {}", config.data_path);
    info!(
        "Max preview size: {}x{}, max scale factor: {}",
        config.max_width, config.max_height, config.max_scale_factor
    );

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("resolve") => resolve(config, &args[1..]).await,
        Some("invalidate") => invalidate(config, &args[1..]).await,
        _ => {
            eprintln!("{}", USAGE);
            Err("missing or unknown command".into())
        }
    }
}

fn initialize_resolver(
    config: PreviewConfig,
) -> Result<(PreviewResolver, Arc<MemoryFileIndex>), Box<dyn std::error::Error>> {
    let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(&config.data_path));
    let index = Arc::new(MemoryFileIndex::new());

    let resolver = PreviewResolver::builder(config, store, index.clone() as Arc<dyn FileIndex>)
        .registration(ImageProvider::registration())
        .build()?;
    info!("Preview resolver initialized");

    Ok((resolver, index))
}

async fn resolve(config: PreviewConfig, args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let positional: Vec<&String> = args.iter().filter(|a| !a.starts_with("--")).collect();
    if positional.len() != 4 {
        eprintln!("{}", USAGE);
        return Err("resolve expects <file-id> <path> <width> <height>".into());
    }

    let file_id: u64 = positional[0].parse()?;
    let path = positional[1];
    let width: u32 = positional[2].parse()?;
    let height: u32 = positional[3].parse()?;

    let mut request = PreviewRequest::new(width, height).allow_upscale(false);
    for flag in args.iter().filter(|a| a.starts_with("--")) {
        request = match flag.as_str() {
            "--upscale" => request.allow_upscale(true),
            "--aspect" => request.keep_aspect(true),
            "--cover" => request.mode(PreviewMode::Cover),
            other => return Err(format!("unknown flag {}", other).into()),
        };
    }

    let (resolver, index) = initialize_resolver(config)?;
    if index.add_file_with_id(file_id, path).is_none() {
        return Err(format!("cannot register {} as file {}", path, file_id).into());
    }

    info!("Resolving {} for {}", request, path);
    let preview = resolver.resolve_preview(file_id, request).await?;

    match (preview.dimensions(), preview.path()) {
        (Some((w, h)), Some(cache_path)) => println!("{} {}x{}", cache_path, w, h),
        (Some((w, h)), None) => println!("(not cached) {}x{}", w, h),
        (None, _) => {
            error!("No preview available for {}", path);
            return Err("no preview available".into());
        }
    }

    Ok(())
}

async fn invalidate(
    config: PreviewConfig,
    args: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let file_id: u64 = match args.first() {
        Some(arg) => arg.parse()?,
        None => {
            eprintln!("{}", USAGE);
            return Err("invalidate expects <file-id>".into());
        }
    };

    let (resolver, _index) = initialize_resolver(config)?;
    resolver.invalidate(file_id).await?;
    info!("Previews of file {} removed", file_id);

    Ok(())
}
