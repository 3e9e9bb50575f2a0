//! Pagination crawler for the listing API
//!
//! Provides one crawl loop for both cursor shapes the API exposes:
//! - Page-number pagination (`limit`/`offset`) for listing collections
//! - Time-window pagination for resources that only accept bounded date
//!   ranges, walking backwards from an anchor one window at a time
//!
//! Includes safety mechanisms:
//! - Hard iteration ceilings for every strategy
//! - Each page/window is requested at most once
//! - A failing page/window is logged and skipped, not retried here
//! - Date-range boundary errors end the crawl cleanly

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use std::future::Future;
use tracing::{debug, info, warn};

use crate::exporter::config::{
    MAX_CONSECUTIVE_FAILURES, MAX_EMPTY_WINDOWS, MAX_PAGES, MAX_PAGES_PER_WINDOW,
};
use crate::fetcher::{FetcherError, FetcherResult, Page};

/// 1-based page number plus page size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Page number, starting at 1
    pub number: u32,
    /// Items per page
    pub size: u32,
}

impl PageRequest {
    /// First page with the given size
    pub fn first(size: u32) -> Self {
        Self { number: 1, size }
    }

    /// Zero-based item offset of this page
    pub fn offset(&self) -> u64 {
        u64::from(self.number.saturating_sub(1)) * u64::from(self.size)
    }
}

/// Half-open date range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// How the crawler walks the remote collection
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlStrategy {
    /// Pages 1, 2, 3, ... of a fixed size
    PageNumber {
        /// Items per page
        page_size: u32,
        /// Hard page ceiling
        max_pages: u32,
    },
    /// Fixed-width windows walking backwards from `anchor`
    TimeWindow {
        /// End of the first (most recent) window
        anchor: DateTime<Utc>,
        /// Width of every window
        width: ChronoDuration,
        /// Number of windows tried before stopping
        max_windows: u32,
        /// Items per page inside a window
        page_size: u32,
        /// Hard page ceiling inside one window
        max_pages_per_window: u32,
        /// Consecutive empty windows that end the crawl
        max_empty_windows: u32,
    },
}

impl CrawlStrategy {
    /// Page-number strategy with the default ceiling
    pub fn pages(page_size: u32) -> Self {
        Self::PageNumber {
            page_size: page_size.max(1),
            max_pages: MAX_PAGES,
        }
    }

    /// Time-window strategy ending at `anchor`
    pub fn windows(anchor: DateTime<Utc>, width_days: i64, max_windows: u32, page_size: u32) -> Self {
        Self::TimeWindow {
            anchor,
            width: ChronoDuration::days(width_days.max(1)),
            max_windows: max_windows.max(1),
            page_size: page_size.max(1),
            max_pages_per_window: MAX_PAGES_PER_WINDOW,
            max_empty_windows: MAX_EMPTY_WINDOWS,
        }
    }

    /// Override the page ceiling (total pages, or pages per window)
    pub fn with_max_pages(mut self, limit: u32) -> Self {
        match &mut self {
            Self::PageNumber { max_pages, .. } => *max_pages = limit.max(1),
            Self::TimeWindow {
                max_pages_per_window,
                ..
            } => *max_pages_per_window = limit.max(1),
        }
        self
    }

    /// Upper bound on the number of requests this strategy can issue
    pub fn request_ceiling(&self) -> u64 {
        match self {
            Self::PageNumber { max_pages, .. } => u64::from(*max_pages),
            Self::TimeWindow {
                max_windows,
                max_pages_per_window,
                ..
            } => u64::from(*max_windows) * u64::from(*max_pages_per_window),
        }
    }
}

/// One request issued by the crawler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlRequest {
    /// A page of a page-number crawl
    Page(PageRequest),
    /// A page inside one date window
    Window {
        /// Date range being queried
        window: TimeWindow,
        /// Page inside that range
        page: PageRequest,
    },
}

impl CrawlRequest {
    /// Page part of the request
    pub fn page(&self) -> PageRequest {
        match self {
            Self::Page(page) => *page,
            Self::Window { page, .. } => *page,
        }
    }

    /// Date range of a windowed request
    pub fn window(&self) -> Option<TimeWindow> {
        match self {
            Self::Page(_) => None,
            Self::Window { window, .. } => Some(*window),
        }
    }
}

impl std::fmt::Display for CrawlRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(page) => write!(f, "page {}", page.number),
            Self::Window { window, page } => write!(f, "window {window} page {}", page.number),
        }
    }
}

/// Why a crawl ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page returned fewer items than the page size
    ShortPage,
    /// The server reported no further results
    NoMoreResults,
    /// The server rejected the page number as past the end
    InvalidPage,
    /// Page ceiling reached
    PageLimit,
    /// Configured number of windows tried
    WindowLimit,
    /// Too many consecutive windows returned nothing
    EmptyWindows,
    /// The server rejected the date range as outside its history
    DateRangeBoundary,
    /// Too many consecutive page/window failures
    TooManyFailures,
}

impl StopReason {
    /// Whether the crawl reached the natural end of the data
    pub fn is_exhausted(&self) -> bool {
        !matches!(self, Self::PageLimit | Self::TooManyFailures)
    }
}

/// Crawl position, owned by exactly one crawl
#[derive(Debug, Clone)]
pub struct PageCursor {
    strategy: CrawlStrategy,
    max_consecutive_failures: Option<u32>,
    page: u32,
    window_index: u32,
    window_items: u64,
    has_more: bool,
    items_seen: u64,
    requests: u32,
    failed_requests: u32,
    consecutive_empty: u32,
    consecutive_failures: u32,
    stopped: Option<StopReason>,
}

impl PageCursor {
    fn new(strategy: CrawlStrategy, max_consecutive_failures: Option<u32>) -> Self {
        Self {
            strategy,
            max_consecutive_failures: max_consecutive_failures.map(|limit| limit.max(1)),
            page: 1,
            window_index: 0,
            window_items: 0,
            has_more: true,
            items_seen: 0,
            requests: 0,
            failed_requests: 0,
            consecutive_empty: 0,
            consecutive_failures: 0,
            stopped: None,
        }
    }

    /// Raw records received so far
    pub fn items_seen(&self) -> u64 {
        self.items_seen
    }

    /// Requests issued so far
    pub fn requests(&self) -> u32 {
        self.requests
    }

    /// Requests that failed and were skipped
    pub fn failed_requests(&self) -> u32 {
        self.failed_requests
    }

    /// Whether the last page reported more results
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Stop reason, once the crawl has ended
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    /// Next request to issue, or `None` once the crawl has stopped
    pub fn next_request(&self) -> Option<CrawlRequest> {
        if self.stopped.is_some() {
            return None;
        }
        match &self.strategy {
            CrawlStrategy::PageNumber { page_size, .. } => Some(CrawlRequest::Page(PageRequest {
                number: self.page,
                size: *page_size,
            })),
            CrawlStrategy::TimeWindow {
                anchor,
                width,
                page_size,
                ..
            } => {
                let end = *anchor - *width * self.window_index as i32;
                Some(CrawlRequest::Window {
                    window: TimeWindow {
                        start: end - *width,
                        end,
                    },
                    page: PageRequest {
                        number: self.page,
                        size: *page_size,
                    },
                })
            }
        }
    }

    /// Record a successful page that carried `received` raw records.
    ///
    /// Page-size checks use the raw count so records dropped during parsing
    /// never make a full page look short.
    pub fn record_page(&mut self, received: usize, has_more: bool) {
        self.requests += 1;
        self.consecutive_failures = 0;
        self.items_seen += received as u64;
        self.has_more = has_more;

        match self.strategy.clone() {
            CrawlStrategy::PageNumber {
                page_size,
                max_pages,
            } => {
                if received < page_size as usize {
                    self.stop(StopReason::ShortPage);
                } else if !has_more {
                    self.stop(StopReason::NoMoreResults);
                } else {
                    self.advance_page(max_pages);
                }
            }
            CrawlStrategy::TimeWindow {
                page_size,
                max_pages_per_window,
                ..
            } => {
                self.window_items += received as u64;
                let window_has_more = has_more && received >= page_size as usize;
                if window_has_more && self.page < max_pages_per_window {
                    self.page += 1;
                } else {
                    if window_has_more {
                        warn!(
                            window = self.window_index + 1,
                            pages = self.page,
                            "Window page ceiling reached with results remaining"
                        );
                    }
                    self.finish_window(true);
                }
            }
        }
    }

    /// Record a failed request; decides whether the crawl goes on
    pub fn record_failure(&mut self, error: &FetcherError) {
        self.requests += 1;

        if error.is_date_range_boundary() {
            info!(error = %error, "Date range boundary reached, ending crawl");
            self.stop(StopReason::DateRangeBoundary);
            return;
        }

        if error.is_invalid_page() {
            match self.strategy.clone() {
                CrawlStrategy::PageNumber { .. } => {
                    debug!(page = self.page, "Invalid page number, treating as exhaustion");
                    self.stop(StopReason::InvalidPage);
                }
                CrawlStrategy::TimeWindow { .. } => {
                    debug!(
                        window = self.window_index + 1,
                        page = self.page,
                        "Invalid page inside window, moving to next window"
                    );
                    self.finish_window(true);
                }
            }
            return;
        }

        self.failed_requests += 1;
        self.consecutive_failures += 1;
        let limit_reached = self
            .max_consecutive_failures
            .is_some_and(|limit| self.consecutive_failures >= limit);
        if limit_reached {
            warn!(
                failures = self.consecutive_failures,
                error = %error,
                "Too many consecutive failures, ending crawl"
            );
            self.stop(StopReason::TooManyFailures);
            return;
        }

        match self.strategy.clone() {
            CrawlStrategy::PageNumber { max_pages, .. } => {
                warn!(page = self.page, error = %error, "Page failed, skipping to next page");
                self.advance_page(max_pages);
            }
            CrawlStrategy::TimeWindow { .. } => {
                warn!(
                    window = self.window_index + 1,
                    page = self.page,
                    error = %error,
                    "Window failed, skipping to next window"
                );
                self.finish_window(false);
            }
        }
    }

    fn advance_page(&mut self, max_pages: u32) {
        if self.page >= max_pages {
            warn!(max_pages, "Page ceiling reached");
            self.stop(StopReason::PageLimit);
        } else {
            self.page += 1;
        }
    }

    fn finish_window(&mut self, completed: bool) {
        let CrawlStrategy::TimeWindow {
            max_windows,
            max_empty_windows,
            ..
        } = self.strategy
        else {
            return;
        };

        if completed {
            if self.window_items == 0 {
                self.consecutive_empty += 1;
            } else {
                self.consecutive_empty = 0;
            }
        }

        self.window_index += 1;
        self.page = 1;
        self.window_items = 0;

        if self.consecutive_empty >= max_empty_windows {
            debug!(
                empty_windows = self.consecutive_empty,
                "Consecutive empty windows, history exhausted"
            );
            self.stop(StopReason::EmptyWindows);
        } else if self.window_index >= max_windows {
            self.stop(StopReason::WindowLimit);
        }
    }

    fn stop(&mut self, reason: StopReason) {
        if self.stopped.is_none() {
            self.stopped = Some(reason);
        }
    }
}

/// Result of a fully collected crawl
#[derive(Debug, Clone)]
pub struct CrawlOutcome<T> {
    /// Items in fetch order
    pub items: Vec<T>,
    /// Why the crawl ended
    pub stop_reason: StopReason,
    /// Requests issued
    pub requests: u32,
    /// Requests that failed and were skipped
    pub failed_requests: u32,
}

/// Drives a paged or windowed crawl against one logical resource
#[derive(Debug, Clone)]
pub struct PaginationCrawler {
    strategy: CrawlStrategy,
    max_consecutive_failures: Option<u32>,
}

impl PaginationCrawler {
    /// Crawler using `strategy`.
    ///
    /// Page-number crawls end after three consecutive failed pages. Window
    /// crawls have no failure cutoff since `max_windows` already bounds them.
    pub fn new(strategy: CrawlStrategy) -> Self {
        let max_consecutive_failures = match strategy {
            CrawlStrategy::PageNumber { .. } => Some(MAX_CONSECUTIVE_FAILURES),
            CrawlStrategy::TimeWindow { .. } => None,
        };
        Self {
            strategy,
            max_consecutive_failures,
        }
    }

    /// End the crawl after `failures` consecutive failed requests
    pub fn with_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.max_consecutive_failures = Some(failures.max(1));
        self
    }

    /// Strategy in use
    pub fn strategy(&self) -> &CrawlStrategy {
        &self.strategy
    }

    /// Lazily crawl, yielding items as pages arrive.
    ///
    /// `fetch` is called once per request; nothing is fetched until the
    /// stream is polled.
    pub fn crawl<T, F, Fut>(&self, fetch: F) -> impl Stream<Item = T>
    where
        F: FnMut(CrawlRequest) -> Fut,
        Fut: Future<Output = FetcherResult<Page<T>>>,
    {
        let cursor = PageCursor::new(self.strategy.clone(), self.max_consecutive_failures);

        stream::unfold((cursor, fetch), |(mut cursor, mut fetch)| async move {
            let Some(request) = cursor.next_request() else {
                return None;
            };
            debug!(%request, "Fetching");
            let items = match fetch(request).await {
                Ok(page) => {
                    cursor.record_page(page.received, page.has_more);
                    page.items
                }
                Err(e) => {
                    cursor.record_failure(&e);
                    Vec::new()
                }
            };
            Some((items, (cursor, fetch)))
        })
        .flat_map(stream::iter)
    }

    /// Crawl to completion and collect every item
    pub async fn collect<T, F, Fut>(&self, mut fetch: F) -> CrawlOutcome<T>
    where
        F: FnMut(CrawlRequest) -> Fut,
        Fut: Future<Output = FetcherResult<Page<T>>>,
    {
        let mut cursor = PageCursor::new(self.strategy.clone(), self.max_consecutive_failures);
        let mut items = Vec::new();
        debug!(
            strategy = ?self.strategy,
            request_ceiling = self.strategy.request_ceiling(),
            "Crawl starting"
        );

        while let Some(request) = cursor.next_request() {
            debug!(%request, collected = items.len(), "Fetching");
            match fetch(request).await {
                Ok(page) => {
                    debug!(
                        %request,
                        received = page.received,
                        parsed = page.items.len(),
                        has_more = page.has_more,
                        "Page received"
                    );
                    cursor.record_page(page.received, page.has_more);
                    items.extend(page.items);
                }
                Err(e) => cursor.record_failure(&e),
            }
        }

        // next_request() only returns None once a stop reason is set
        let stop_reason = cursor.stop_reason().unwrap_or(StopReason::NoMoreResults);
        debug!(
            ?stop_reason,
            requests = cursor.requests(),
            items = items.len(),
            "Crawl completed"
        );

        CrawlOutcome {
            items,
            stop_reason,
            requests: cursor.requests(),
            failed_requests: cursor.failed_requests(),
        }
    }
}
