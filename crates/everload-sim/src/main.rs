// Everload simulator
//
// Design Decision: Build the runtime from PoolConfig so the worker sizing flags
// and EVERLOAD_* variables drive the same threads the engine runs on.
// Design Decision: Use a synthetic source with latency and transient misses so
// retries, eviction and survivable handover show up in the logs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use everload::{
    loader_fn, Engine, EngineConfig, LoadError, Page, PageSource, Pager, RetryingTask,
    WindowChange,
};

#[derive(Parser)]
#[command(name = "everload-sim")]
#[command(about = "Scroll a synthetic list through the everload pager")]
#[command(version)]
struct Cli {
    /// Items in the synthetic list
    #[arg(long, default_value = "500")]
    items: usize,

    /// Items per page (overrides EVERLOAD_PAGE_SIZE)
    #[arg(long)]
    page_size: Option<usize>,

    /// Items held before eviction (overrides EVERLOAD_MAX_IN_MEMORY)
    #[arg(long)]
    max_in_memory: Option<usize>,

    /// Simulated latency per page in milliseconds
    #[arg(long, default_value = "20")]
    latency_ms: u64,

    /// Every nth fetch comes back empty and is retried (0 disables)
    #[arg(long, default_value = "7")]
    flaky_every: usize,

    /// Scroll back to the top after reaching the end
    #[arg(long)]
    scroll_back: bool,

    /// Disable the delay between retry attempts
    #[arg(long)]
    no_retry_delay: bool,
}

/// Integers `0..total`, served slowly and sometimes not at all
struct SyntheticSource {
    total: usize,
    latency: Duration,
    flaky_every: usize,
    fetches: AtomicUsize,
}

#[async_trait]
impl PageSource<u64> for SyntheticSource {
    async fn fetch(&self, offset: usize, page_size: usize) -> anyhow::Result<Option<Page<u64>>> {
        let fetch = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;

        if self.flaky_every > 0 && fetch % self.flaky_every == 0 {
            tracing::debug!(offset, fetch, "Synthetic miss");
            return Ok(None);
        }

        let end = (offset + page_size).min(self.total);
        let items = (offset.min(end)..end).map(|i| i as u64).collect();
        Ok(Some(Page::new(items, page_size)))
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "everload=debug,everload_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env().context("Invalid EVERLOAD_* configuration")?;
    if let Some(page_size) = cli.page_size {
        config.pager.page_size = page_size;
        if cli.max_in_memory.is_none() {
            config.pager.max_in_memory = page_size * 4;
        }
    }
    if let Some(max) = cli.max_in_memory {
        config.pager.max_in_memory = max;
    }
    if cli.no_retry_delay {
        config.pool.retry_delay_enabled = false;
    }
    config.validate().context("Invalid configuration")?;

    let runtime = config
        .pool
        .build_runtime()
        .context("Failed to build runtime")?;
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: EngineConfig) -> Result<()> {
    tracing::info!(
        items = cli.items,
        page_size = config.pager.page_size,
        max_in_memory = config.pager.max_in_memory,
        "everload-sim starting..."
    );

    let engine = Engine::new(config).context("Failed to start engine")?;
    let source = Arc::new(SyntheticSource {
        total: cli.items,
        latency: Duration::from_millis(cli.latency_ms),
        flaky_every: cli.flaky_every,
        fetches: AtomicUsize::new(0),
    });

    let pager = engine.pager(Arc::clone(&source))?;
    scroll_forward(&pager).await?;
    if cli.scroll_back {
        scroll_backward(&pager).await?;
    }
    tracing::info!(
        fetches = source.fetches.load(Ordering::SeqCst),
        "Scroll finished"
    );

    survivable_handover(&engine, Arc::clone(&source)).await?;

    engine.flush().await;
    tracing::info!("Simulation complete");
    Ok(())
}

/// Wait for a page merge and log the resulting window
async fn settle(
    pager: &Pager<u64>,
    rx: oneshot::Receiver<Result<WindowChange, LoadError>>,
) -> Result<Option<WindowChange>> {
    let Ok(result) = rx.await else {
        // Nothing was dispatched for this request
        return Ok(None);
    };
    let change = result.context("Page load failed")?;
    tracing::info!(
        offset = pager.offset(),
        size = pager.len(),
        size_change = change.size_change,
        offset_change = change.offset_change,
        "Window updated"
    );
    Ok(Some(change))
}

fn completion() -> (
    impl FnOnce(Result<WindowChange, LoadError>) + Send + 'static,
    oneshot::Receiver<Result<WindowChange, LoadError>>,
) {
    let (tx, rx) = oneshot::channel();
    (
        move |result| {
            let _ = tx.send(result);
        },
        rx,
    )
}

async fn scroll_forward(pager: &Pager<u64>) -> Result<()> {
    let (done, rx) = completion();
    pager.load(done);
    settle(pager, rx).await?;

    let mut position = 0usize;
    while position < pager.len() {
        let (done, rx) = completion();
        pager.get(position, done);
        if let Some(change) = settle(pager, rx).await? {
            position = position.saturating_add_signed(-change.offset_change);
        }
        position += 1;
    }
    tracing::info!(
        presumed_total_size = ?pager.presumed_total_size(),
        "Reached end of list"
    );
    Ok(())
}

async fn scroll_backward(pager: &Pager<u64>) -> Result<()> {
    let mut position = pager.len().saturating_sub(1);
    loop {
        let (done, rx) = completion();
        pager.get(position, done);
        if let Some(change) = settle(pager, rx).await? {
            position = position.saturating_add_signed(-change.offset_change);
        }
        if position == 0 && !pager.has_previous() {
            break;
        }
        position = position.saturating_sub(1);
    }
    tracing::info!(offset = pager.offset(), "Reached start of list");
    Ok(())
}

/// Start a load, drop its owner, and let a new owner adopt the result
async fn survivable_handover(engine: &Engine, source: Arc<SyntheticSource>) -> Result<()> {
    let registry = engine.slot_registry::<Vec<u64>>();
    let page_size = engine.config().pager.page_size;
    let loader = loader_fn(move |offset: usize| {
        let source = Arc::clone(&source);
        async move { Ok(source.fetch(offset, page_size).await?.map(|page| page.items)) }
    });

    let first = registry.owner();
    let mut task = RetryingTask::new(loader, engine.config().retry.clone());
    first.load_in_background(async move { task.run(&0).await }, "header", |_| {
        tracing::warn!("Dropped owner received a result");
    });
    drop(first);
    tracing::info!("First owner dropped while loading");

    let second = registry.owner();
    let (tx, rx) = oneshot::channel();
    second.load_in_background(
        async { Err(LoadError::fatal(anyhow::anyhow!("handover restarted the load"))) },
        "header",
        move |result| {
            let _ = tx.send(result);
        },
    );

    let items = rx
        .await
        .context("Survivable load was dropped")?
        .context("Survivable load failed")?;
    tracing::info!(items = items.len(), first = ?items.first(), "Second owner adopted the load");
    Ok(())
}
