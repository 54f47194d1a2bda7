use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use thumbnail_cache::{
    CacheConfig, CacheStats, GenerationOutcome, GenerationRequest, PageSize, PageSource,
    Thumbnail, ThumbnailCache, ThumbnailSize, BYTES_PER_PIXEL,
};
use thumbnail_scheduler::{
    MaintenanceTimer, PageRenderer, RenderError, RenderPool, WorkerPoolConfig,
};

const OUTCOME_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "thumbcache")]
#[command(about = "Drive the thumbnail cache against a synthetic document")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scroll through a synthetic document and print cache statistics as JSON.
    Simulate(SimulateArgs),
    /// Print the effective configuration as TOML.
    DefaultConfig {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, clap::Args)]
struct SimulateArgs {
    /// Number of pages in the synthetic document.
    #[arg(long, default_value_t = 200)]
    pages: usize,
    /// Number of viewport moves.
    #[arg(long, default_value_t = 100)]
    steps: usize,
    /// Pages visible at once.
    #[arg(long, default_value_t = 6)]
    visible: usize,
    #[arg(long, value_enum, default_value_t = Pattern::Sequential)]
    pattern: Pattern,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 2)]
    workers: usize,
    /// Run cleanup every N steps (0 disables).
    #[arg(long, default_value_t = 25)]
    cleanup_every: usize,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    max_entries: Option<usize>,
    #[arg(long)]
    max_memory_mb: Option<u64>,
    #[arg(long)]
    no_lazy_loading: bool,
    /// Pages whose render always fails.
    #[arg(long = "fail-page", value_name = "PAGE")]
    fail_pages: Vec<usize>,
    /// Run preloading and cleanup on the maintenance timer instead of inline.
    #[arg(long)]
    background_maintenance: bool,
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum Pattern {
    /// Scroll forward one page per step, wrapping at the end.
    Sequential,
    /// Jump to a random position every step.
    Random,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    pages: usize,
    steps: usize,
    pattern: Pattern,
    thumbnail_size: ThumbnailSize,
    failed_pages: Vec<usize>,
    efficiency: f64,
    memory_utilization: f64,
    stats: CacheStats,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Simulate(args) => run_simulate(args),
        Commands::DefaultConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Configuration from a file when given, otherwise from the environment
fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    match path {
        Some(path) => CacheConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => CacheConfig::from_env().context("invalid THUMBCACHE_* environment variable"),
    }
}

fn resolve_config(args: &SimulateArgs) -> Result<CacheConfig> {
    let mut config = load_config(args.config.as_deref())?;

    if args.width.is_some() || args.height.is_some() {
        let width = args.width.unwrap_or(config.thumbnail_size.width);
        let height = args.height.unwrap_or(config.thumbnail_size.height);
        config = config.with_thumbnail_size(width, height);
    }
    if let Some(max_entries) = args.max_entries {
        let max_memory_bytes = config.max_memory_bytes;
        config = config.with_budget(max_entries, max_memory_bytes);
    }
    if let Some(mb) = args.max_memory_mb {
        config = config.with_memory_mb(mb);
    }
    if args.no_lazy_loading {
        config = config.with_lazy_loading(false);
    }

    Ok(config)
}

fn run_simulate(args: SimulateArgs) -> Result<()> {
    if args.pages == 0 {
        anyhow::bail!("--pages must be >= 1");
    }
    if args.visible == 0 {
        anyhow::bail!("--visible must be >= 1");
    }

    let config = resolve_config(&args)?;
    let renderer = SyntheticRenderer {
        fail_pages: args.fail_pages.iter().copied().collect(),
    };
    let (pool, outcomes) =
        RenderPool::start(Arc::new(renderer), WorkerPoolConfig::new(args.workers))
            .context("failed to start render workers")?;
    let pool = Arc::new(pool);

    let cache = Arc::new(ThumbnailCache::new(config.clone(), pool.clone()));
    cache.set_document(Some(Arc::new(SyntheticDocument { pages: args.pages })));

    let timer = if args.background_maintenance {
        Some(
            MaintenanceTimer::from_config(cache.clone(), &config)
                .context("failed to start maintenance timer")?,
        )
    } else {
        None
    };

    info!(
        "simulating {} steps over {} pages ({:?})",
        args.steps, args.pages, args.pattern
    );

    let visible = args.visible.min(args.pages);
    let mut rng = StdRng::seed_from_u64(args.seed);

    for step in 0..args.steps {
        let first = match args.pattern {
            Pattern::Sequential => step % (args.pages - visible + 1),
            Pattern::Random => rng.gen_range(0..=args.pages - visible),
        };
        let last = first + visible - 1;

        cache.set_viewport_range(first, last, config.viewport_margin);
        cache.preload_visible_range(first, last);
        for page in first..=last {
            cache.get(page);
        }

        wait_for_visible(&cache, &outcomes, first, last)?;

        if timer.is_none() {
            while cache.preload_tick().is_some() {}
            if args.cleanup_every > 0 && (step + 1) % args.cleanup_every == 0 {
                cache.cleanup_cache();
            }
        }
        cache.drain_outcomes(&outcomes);
    }

    if let Some(timer) = timer {
        timer.shutdown();
    }
    pool.shutdown();
    let late = cache.drain_outcomes(&outcomes);
    debug!("{} outcomes delivered after shutdown", late);

    let failed_pages: Vec<usize> = (0..args.pages)
        .filter(|page| cache.error_message(*page).is_some())
        .collect();

    let stats = cache.stats();
    let report = SimulationReport {
        pages: args.pages,
        steps: args.steps,
        pattern: args.pattern,
        thumbnail_size: cache.thumbnail_size(),
        failed_pages,
        efficiency: stats.efficiency(),
        memory_utilization: stats.memory_utilization(),
        stats,
    };

    let json = serde_json::to_string_pretty(&report)?;
    println!("{json}");

    Ok(())
}

/// Feed outcomes to the cache until no visible page is still loading
fn wait_for_visible(
    cache: &ThumbnailCache,
    outcomes: &Receiver<GenerationOutcome>,
    first: usize,
    last: usize,
) -> Result<()> {
    while (first..=last).any(|page| cache.is_loading(page)) {
        match outcomes.recv_timeout(OUTCOME_TIMEOUT) {
            Ok(outcome) => cache.handle_outcome(outcome),
            Err(RecvTimeoutError::Timeout) => {
                anyhow::bail!("render workers produced nothing for {:?}", OUTCOME_TIMEOUT)
            }
            Err(RecvTimeoutError::Disconnected) => anyhow::bail!("render workers exited"),
        }
    }
    Ok(())
}

struct SyntheticDocument {
    pages: usize,
}

impl PageSource for SyntheticDocument {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn page_size(&self, page_index: usize) -> Option<PageSize> {
        // Every fifth page is landscape
        (page_index < self.pages).then(|| match page_index % 5 {
            4 => PageSize::new(792.0, 612.0),
            _ => PageSize::new(612.0, 792.0),
        })
    }
}

/// Fills each thumbnail with a page-dependent gradient
struct SyntheticRenderer {
    fail_pages: HashSet<usize>,
}

impl PageRenderer for SyntheticRenderer {
    fn render(&self, request: &GenerationRequest) -> Result<Thumbnail, RenderError> {
        if self.fail_pages.contains(&request.page_index) {
            return Err(RenderError::Failed(format!(
                "page {} is marked as broken",
                request.page_index
            )));
        }

        let ThumbnailSize { width, height } = request.size;
        if request.size.is_empty() {
            return Err(RenderError::InvalidSize { width, height });
        }

        let shade = (request.page_index % 256) as u8;
        let capacity = width as usize * height as usize * BYTES_PER_PIXEL as usize;
        let mut pixels = Vec::with_capacity(capacity);
        for y in 0..height {
            let row = (y * 255 / height.max(1)) as u8;
            for _ in 0..width {
                pixels.extend_from_slice(&[shade, row, 255 - shade, 255]);
            }
        }

        Ok(Thumbnail::new(width, height, pixels))
    }
}
