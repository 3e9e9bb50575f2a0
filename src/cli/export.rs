//! Export command implementation
//!
//! Crawls the seller's active listings, enriches each listing on the worker
//! pool (detail lookup plus optional windowed sales history), and writes one
//! CSV row per listing or per sale.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::CliError;
use crate::exporter::config::{
    DEFAULT_CONCURRENCY, DEFAULT_LAUNCH_DELAY, DEFAULT_MAX_WINDOWS, DEFAULT_PAGE_SIZE,
    DEFAULT_REQUESTS_PER_SECOND, DEFAULT_WINDOW_DAYS, INITIAL_BACKOFF_MS, MAX_CONCURRENCY,
    MAX_PAGES, STREAMING_THRESHOLD,
};
use crate::exporter::{
    ExportOrchestrator, ExportSummary, RateLimiter, RetryPolicy, RetryingExecutor, WorkItem,
    WorkerPool,
};
use crate::fetcher::ebay_http::{build_http_client, EbayHttpClient, DEFAULT_BASE_URL};
use crate::fetcher::ebay_listings::EbayListingsFetcher;
use crate::fetcher::token::AccessToken;
use crate::fetcher::{
    CrawlRequest, CrawlStrategy, FetcherError, FetcherResult, ListingApi, PaginationCrawler,
    StopReason,
};
use crate::metrics::{init_metrics, RequestCounters};
use crate::output::CsvSink;
use crate::{export_columns, Listing, ListingRow};

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Listing Exporter CLI
#[derive(Parser, Debug)]
#[command(name = "listing-exporter")]
#[command(about = "Export active marketplace listings to CSV", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Number of listings enriched concurrently (default: 50, max: 100)
    ///
    /// All workers share one rate limiter, so raising this only helps while
    /// requests spend most of their time waiting on the network.
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Total attempts per request, first one included (default: 3, range: 1-10)
    #[arg(long, global = true, default_value = "3", value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: u32,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export active listings to a CSV file
    Export(ExportArgs),
}

/// Export command arguments
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Destination CSV file (truncated if it exists)
    #[arg(long, short)]
    pub output: PathBuf,

    /// Maximum requests per second across all workers
    #[arg(long, default_value_t = DEFAULT_REQUESTS_PER_SECOND, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub rate: u32,

    /// Listings (and transactions) per page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u32).range(1..=200))]
    pub page_size: u32,

    /// Stop the listing crawl after this many pages
    #[arg(long, default_value_t = MAX_PAGES, value_parser = clap::value_parser!(u32).range(1..=10_000))]
    pub max_pages: u32,

    /// Add one row per sale, crawled in date windows walking back from now
    #[arg(long, default_value_t = false)]
    pub sales_history: bool,

    /// Width of each sales-history window in days
    #[arg(long, default_value_t = DEFAULT_WINDOW_DAYS, value_parser = clap::value_parser!(i64).range(1..=365))]
    pub window_days: i64,

    /// Number of sales-history windows to try
    #[arg(long, default_value_t = DEFAULT_MAX_WINDOWS, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub max_windows: u32,

    /// Stream rows to disk as listings complete, regardless of count
    #[arg(long, default_value_t = false)]
    pub stream: bool,

    /// Listing count above which rows are streamed
    #[arg(long, default_value_t = STREAMING_THRESHOLD)]
    pub stream_threshold: usize,

    /// Listing API host
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Sales-history crawl parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SalesHistory {
    /// End of the most recent window
    pub anchor: DateTime<Utc>,
    /// Window width in days
    pub window_days: i64,
    /// Windows to try
    pub max_windows: u32,
    /// Transactions per page
    pub page_size: u32,
}

impl SalesHistory {
    fn strategy(&self) -> CrawlStrategy {
        CrawlStrategy::windows(self.anchor, self.window_days, self.max_windows, self.page_size)
    }
}

/// Resolved settings for one export run
#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Destination CSV file
    pub output: PathBuf,
    /// Worker pool size
    pub concurrency: usize,
    /// Shared request rate
    pub requests_per_second: u32,
    /// Attempts per request
    pub max_attempts: u32,
    /// Listings per page
    pub page_size: u32,
    /// Listing crawl page ceiling
    pub max_pages: u32,
    /// Sales-history crawl, when enabled
    pub sales: Option<SalesHistory>,
    /// Stream regardless of count
    pub force_streaming: bool,
    /// Count above which the run streams
    pub streaming_threshold: usize,
    /// Delay between job launches
    pub launch_delay: Duration,
    /// Draw a progress bar on stderr
    pub show_progress: bool,
}

impl ExportSettings {
    /// Settings with defaults for everything but the destination
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            concurrency: DEFAULT_CONCURRENCY,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            max_attempts: RetryPolicy::default().max_attempts(),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: MAX_PAGES,
            sales: None,
            force_streaming: false,
            streaming_threshold: STREAMING_THRESHOLD,
            launch_delay: DEFAULT_LAUNCH_DELAY,
            show_progress: false,
        }
    }
}

impl ExportArgs {
    /// Resolve arguments against global flags
    pub fn settings(&self, cli: &Cli) -> ExportSettings {
        let sales = self.sales_history.then(|| SalesHistory {
            anchor: Utc::now(),
            window_days: self.window_days,
            max_windows: self.max_windows,
            page_size: self.page_size,
        });

        ExportSettings {
            output: self.output.clone(),
            concurrency: cli.concurrency,
            requests_per_second: self.rate,
            max_attempts: cli.max_retries,
            page_size: self.page_size,
            max_pages: self.max_pages,
            sales,
            force_streaming: self.stream,
            streaming_threshold: self.stream_threshold,
            launch_delay: DEFAULT_LAUNCH_DELAY,
            show_progress: cli.output_format == OutputFormat::Human,
        }
    }

    /// Execute the export using the credential from the environment
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        self.execute_with(cli, AccessToken::from_env()).await.map(|_| ())
    }

    /// Execute the export with an already-resolved credential
    ///
    /// A missing or expired credential fails before the output file is
    /// created.
    pub async fn execute_with(
        &self,
        cli: &Cli,
        token: FetcherResult<AccessToken>,
    ) -> Result<ExportSummary, CliError> {
        let token = token?;
        token.ensure_valid()?;

        if let Some(addr) = self.metrics_addr {
            init_metrics(addr).map_err(|e| CliError::ConfigurationError(e.to_string()))?;
        }

        let settings = self.settings(cli);
        let counters = Arc::new(RequestCounters::new());
        let executor = RetryingExecutor::new(
            RateLimiter::per_second(settings.requests_per_second)?,
            Arc::clone(&counters),
        )
        .with_policy(RetryPolicy::new(
            settings.max_attempts,
            Duration::from_millis(INITIAL_BACKOFF_MS),
        ));

        let http = EbayHttpClient::new(
            Arc::new(build_http_client()?),
            self.base_url.as_str(),
            token,
            executor,
        );
        let api: Arc<dyn ListingApi> = Arc::new(EbayListingsFetcher::new(http));

        info!(
            output = %settings.output.display(),
            base_url = %self.base_url,
            concurrency = settings.concurrency,
            rate = settings.requests_per_second,
            sales_history = settings.sales.is_some(),
            "Starting listing export"
        );

        let result = run_export(&settings, api, counters).await;

        match cli.output_format {
            OutputFormat::Json => output_json(&settings, &result),
            OutputFormat::Human => output_human(&settings, &result),
        }

        result
    }
}

/// Crawl listings, enrich each on the worker pool, and write the CSV
///
/// # Errors
/// Fails when the listing crawl produces nothing but failures, or when the
/// sink fails. Individual listings that fail enrichment are dropped and
/// counted in the summary.
pub async fn run_export(
    settings: &ExportSettings,
    api: Arc<dyn ListingApi>,
    counters: Arc<RequestCounters>,
) -> Result<ExportSummary, CliError> {
    let listings = crawl_listings(api.as_ref(), settings).await?;
    let items = WorkItem::enumerate(listings, |listing| listing.listing_id.clone());

    let mut pool = WorkerPool::new(settings.concurrency)?.with_launch_delay(settings.launch_delay);
    if settings.show_progress {
        pool = pool.with_progress(create_progress_bar(items.len() as u64));
    }

    let sink = CsvSink::new(&settings.output, export_columns(settings.sales.is_some()));
    let orchestrator = ExportOrchestrator::new(pool, sink, counters)
        .with_streaming_threshold(settings.streaming_threshold)
        .force_streaming(settings.force_streaming);

    let sales = settings.sales;
    let summary = orchestrator
        .run(items, |item: WorkItem<Listing>| {
            let api = Arc::clone(&api);
            async move { enrich_listing(api.as_ref(), item.payload, sales).await }
        })
        .await?;

    Ok(summary)
}

/// Crawl every active listing, dropping repeated ids
///
/// # Errors
/// [`CliError::CrawlFailed`] when every page failed.
pub async fn crawl_listings(
    api: &dyn ListingApi,
    settings: &ExportSettings,
) -> Result<Vec<Listing>, CliError> {
    let crawler = PaginationCrawler::new(
        CrawlStrategy::pages(settings.page_size).with_max_pages(settings.max_pages),
    );
    let outcome = crawler
        .collect(|request: CrawlRequest| api.fetch_listings_page(request.page()))
        .await;

    info!(
        listings = outcome.items.len(),
        requests = outcome.requests,
        failed_pages = outcome.failed_requests,
        stop_reason = ?outcome.stop_reason,
        "Listing crawl finished"
    );

    if outcome.items.is_empty() && outcome.stop_reason == StopReason::TooManyFailures {
        return Err(CliError::CrawlFailed(format!(
            "{} listing page(s) failed and none succeeded",
            outcome.failed_requests
        )));
    }
    if !outcome.stop_reason.is_exhausted() {
        warn!(
            stop_reason = ?outcome.stop_reason,
            "Listing crawl ended before the collection was exhausted"
        );
    }

    // Offset pagination can repeat a listing when the collection shifts mid-crawl
    let mut seen = HashSet::new();
    let mut listings = outcome.items;
    let before = listings.len();
    listings.retain(|listing| seen.insert(listing.listing_id.clone()));
    if listings.len() < before {
        debug!(duplicates = before - listings.len(), "Dropped repeated listings");
    }

    Ok(listings)
}

/// Enrich one listing into its output rows
///
/// Fetches the full listing record and, when enabled, crawls its sales
/// history window by window. Failing sales windows are skipped; a failing
/// detail lookup fails the listing.
pub async fn enrich_listing(
    api: &dyn ListingApi,
    summary: Listing,
    sales: Option<SalesHistory>,
) -> FetcherResult<Vec<ListingRow>> {
    let listing = api
        .fetch_listing(&summary.listing_id)
        .await?
        .merge_summary(&summary);

    let Some(history) = sales else {
        return Ok(vec![ListingRow::listing_only(listing)]);
    };

    let listing_id = listing.listing_id.as_str();
    let outcome = PaginationCrawler::new(history.strategy())
        .collect(move |request: CrawlRequest| async move {
            let window = request.window().ok_or_else(|| {
                FetcherError::InvalidPage(format!("sales crawl issued {request}"))
            })?;
            api.fetch_sales(listing_id, window, request.page()).await
        })
        .await;

    debug!(
        listing_id,
        sales = outcome.items.len(),
        requests = outcome.requests,
        stop_reason = ?outcome.stop_reason,
        "Sales history crawled"
    );

    Ok(ListingRow::expand(listing, outcome.items))
}

/// Progress bar for the enrichment phase
fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("Exporting listings");
    pb
}

/// Output result as JSON
fn output_json(settings: &ExportSettings, result: &Result<ExportSummary, CliError>) {
    let output = match result {
        Ok(summary) => serde_json::json!({
            "success": true,
            "output_path": settings.output.display().to_string(),
            "mode": summary.mode,
            "items_completed": summary.pool.completed(),
            "items_failed": summary.items_failed(),
            "rows_written": summary.rows_written,
            "peak_concurrency": summary.pool.peak_active(),
            "api_requests": summary.requests.requests,
            "api_errors": summary.requests.errors,
            "retries": summary.requests.retries,
            "error": null,
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "output_path": settings.output.display().to_string(),
            "error": e.to_string(),
        }),
    };

    println!("{output}");
}

/// Output result in human-readable format
fn output_human(settings: &ExportSettings, result: &Result<ExportSummary, CliError>) {
    match result {
        Ok(summary) => {
            println!("\nExport completed successfully!");
            println!("Output: {}", settings.output.display());
            println!("Mode: {}", summary.mode);
            println!("Listings exported: {}", summary.items_succeeded());
            if summary.items_failed() > 0 {
                println!("Listings failed: {} (see log for details)", summary.items_failed());
            }
            println!("Rows written: {}", summary.rows_written);
            println!(
                "API requests: {} ({} errors, {} retries)",
                summary.requests.requests, summary.requests.errors, summary.requests.retries
            );
        }
        Err(e) => {
            eprintln!("\nExport failed!");
            eprintln!("Error: {e}");
            error!("Export failed: {}", e);
        }
    }
}
