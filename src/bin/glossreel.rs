use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use glossreel::{
    CacheStore, Pipeline, PipelineConfig, SourceCatalog, SourcePriority, Token, is_ffmpeg_on_path,
};

#[derive(Parser, Debug)]
#[command(name = "glossreel", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "GLOSSREEL_CONFIG")]
    config: Option<PathBuf>,

    /// Override `catalog.metadata_path`.
    #[arg(long, global = true)]
    metadata: Option<PathBuf>,

    /// Override `cache.dir`.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve tokens and compose them into one MP4 (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Resolve tokens into the cache without composing.
    Resolve(TokensArgs),
    /// Print catalog tokens similar to the given ones.
    Suggest(SuggestArgs),
    /// Inspect or prune the media cache.
    Cache {
        #[command(subcommand)]
        cmd: CacheCommand,
    },
}

#[derive(Parser, Debug)]
struct TokensArgs {
    /// Gloss tokens, in signing order.
    #[arg(required = true)]
    tokens: Vec<String>,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    #[command(flatten)]
    tokens: TokensArgs,

    /// Override `composition.output_dir`.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Override `pipeline.deadline_secs`.
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Parser, Debug)]
struct SuggestArgs {
    #[command(flatten)]
    tokens: TokensArgs,

    /// Suggestions per token.
    #[arg(long, default_value_t = 3)]
    max: usize,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Entry count and byte totals.
    Stats,
    /// Remove one cached origin.
    Purge { origin_id: String },
    /// Remove every cached origin.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(m) = cli.metadata {
        cfg.catalog.metadata_path = m;
    }
    if let Some(d) = cli.cache_dir {
        cfg.cache.dir = d;
    }

    match cli.cmd {
        Command::Render(args) => cmd_render(cfg, args).await,
        Command::Resolve(args) => cmd_resolve(cfg, args).await,
        Command::Suggest(args) => cmd_suggest(cfg, args),
        Command::Cache { cmd } => cmd_cache(cfg, cmd),
    }
}

async fn cmd_render(mut cfg: PipelineConfig, args: RenderArgs) -> anyhow::Result<()> {
    if let Some(dir) = args.out_dir {
        cfg.composition.output_dir = dir;
    }
    if args.deadline_secs.is_some() {
        cfg.pipeline.deadline_secs = args.deadline_secs;
    }
    if !is_ffmpeg_on_path() {
        anyhow::bail!("ffmpeg not found on PATH");
    }
    let tokens = Token::parse_all(&args.tokens.tokens)?;
    let pipeline = Pipeline::from_config(&cfg)?;

    match pipeline.run(&tokens).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(failure) => {
            println!("{}", serde_json::to_string_pretty(&failure.unresolved)?);
            Err(failure).context("render failed")
        }
    }
}

async fn cmd_resolve(cfg: PipelineConfig, args: TokensArgs) -> anyhow::Result<()> {
    let tokens = Token::parse_all(&args.tokens)?;
    let pipeline = Pipeline::from_config(&cfg)?;
    let results = pipeline.resolve_all(&tokens, None).await;
    println!("{}", serde_json::to_string_pretty(&results)?);
    eprintln!("{:?}", pipeline.engine().retriever().stats());
    Ok(())
}

fn cmd_suggest(cfg: PipelineConfig, args: SuggestArgs) -> anyhow::Result<()> {
    let priority = SourcePriority::new(cfg.catalog.preferred_sources.clone());
    let catalog = SourceCatalog::from_path(&cfg.catalog.metadata_path, &priority)?;
    for raw in &args.tokens.tokens {
        let similar: Vec<String> = catalog
            .similar(raw, args.max)
            .iter()
            .map(|t| t.to_string())
            .collect();
        println!("{raw}: {}", similar.join(", "));
    }
    Ok(())
}

fn cmd_cache(cfg: PipelineConfig, cmd: CacheCommand) -> anyhow::Result<()> {
    let cache = CacheStore::open(&cfg.cache.dir, cfg.cache.capacity_bytes)?;
    match cmd {
        CacheCommand::Stats => {
            println!("{}", serde_json::to_string_pretty(&cache.stats())?);
        }
        CacheCommand::Purge { origin_id } => {
            if !cache.purge(&origin_id)? {
                eprintln!("'{origin_id}' is not cached");
            }
        }
        CacheCommand::Clear => {
            let n = cache.clear()?;
            eprintln!("removed {n} entries from {}", cache.root().display());
        }
    }
    Ok(())
}
