//! Unit tests for the pagination crawler

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures::StreamExt;
use listing_exporter::fetcher::ebay_parser::EbayParser;
use listing_exporter::fetcher::{
    CrawlRequest, CrawlStrategy, FetcherError, FetcherResult, Page, PaginationCrawler, StopReason,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Records every request the crawler issues
#[derive(Clone, Default)]
struct FetchTracker {
    requests: Arc<Mutex<Vec<CrawlRequest>>>,
}

impl FetchTracker {
    fn record(&self, request: CrawlRequest) -> usize {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request);
        requests.len()
    }

    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<CrawlRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn items(start: u32, count: u32) -> Vec<u32> {
    (start..start + count).collect()
}

fn server_error() -> FetcherError {
    FetcherError::ServerError {
        status: 500,
        message: "Internal Server Error".to_string(),
    }
}

#[tokio::test]
async fn test_short_page_ends_crawl() {
    // Pages of P, P, then K < P
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::pages(50));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            let page = request.page();
            async move {
                let count = if call < 3 { page.size } else { 17 };
                FetcherResult::Ok(Page::new(items(page.offset() as u32, count), true))
            }
        })
        .await;

    assert_eq!(tracker.count(), 3);
    assert_eq!(outcome.items.len(), 50 + 50 + 17);
    assert_eq!(outcome.stop_reason, StopReason::ShortPage);
    assert_eq!(outcome.items, items(0, 117));

    let numbers: Vec<u32> = tracker.requests().iter().map(|r| r.page().number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_no_more_results_ends_crawl() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::pages(10));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            async move { FetcherResult::Ok(Page::new(items(0, 10), call < 2)) }
        })
        .await;

    assert_eq!(tracker.count(), 2);
    assert_eq!(outcome.items.len(), 20);
    assert_eq!(outcome.stop_reason, StopReason::NoMoreResults);
    assert!(outcome.stop_reason.is_exhausted());
}

#[tokio::test]
async fn test_invalid_page_is_exhaustion() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::pages(10));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            async move {
                if call == 3 {
                    Err(FetcherError::InvalidPage("offset out of range".to_string()))
                } else {
                    Ok(Page::new(items(0, 10), true))
                }
            }
        })
        .await;

    assert_eq!(tracker.count(), 3);
    assert_eq!(outcome.items.len(), 20);
    assert_eq!(outcome.stop_reason, StopReason::InvalidPage);
    assert_eq!(outcome.failed_requests, 0);
}

#[tokio::test]
async fn test_page_ceiling_ends_crawl() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::pages(5).with_max_pages(4));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            tracker.record(request);
            async { FetcherResult::Ok(Page::new(items(0, 5), true)) }
        })
        .await;

    assert_eq!(tracker.count(), 4);
    assert_eq!(outcome.items.len(), 20);
    assert_eq!(outcome.stop_reason, StopReason::PageLimit);
    assert!(!outcome.stop_reason.is_exhausted());
}

#[tokio::test]
async fn test_failed_page_is_skipped() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::pages(10));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            async move {
                match call {
                    2 => Err(server_error()),
                    4 => Ok(Page::new(items(30, 3), true)),
                    _ => Ok(Page::new(items(0, 10), true)),
                }
            }
        })
        .await;

    // Page 2 lost, pages 1 and 3 full, page 4 short
    assert_eq!(tracker.count(), 4);
    assert_eq!(outcome.items.len(), 23);
    assert_eq!(outcome.failed_requests, 1);
    assert_eq!(outcome.stop_reason, StopReason::ShortPage);
}

#[tokio::test]
async fn test_consecutive_failures_end_crawl() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::pages(10));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            tracker.record(request);
            async { FetcherResult::<Page<u32>>::Err(server_error()) }
        })
        .await;

    assert_eq!(tracker.count(), 3);
    assert!(outcome.items.is_empty());
    assert_eq!(outcome.failed_requests, 3);
    assert_eq!(outcome.stop_reason, StopReason::TooManyFailures);
}

#[tokio::test]
async fn test_windows_walk_backwards_until_empty() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::windows(anchor(), 120, 8, 100));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            async move {
                if call == 1 {
                    FetcherResult::Ok(Page::new(items(0, 4), false))
                } else {
                    Ok(Page::last(Vec::new()))
                }
            }
        })
        .await;

    // One window with data, then three empty windows
    assert_eq!(tracker.count(), 4);
    assert_eq!(outcome.items.len(), 4);
    assert_eq!(outcome.stop_reason, StopReason::EmptyWindows);

    let windows: Vec<_> = tracker
        .requests()
        .iter()
        .map(|r| r.window().unwrap())
        .collect();
    assert_eq!(windows[0].end, anchor());
    for pair in windows.windows(2) {
        assert_eq!(pair[1].end, pair[0].start);
        assert_eq!(pair[0].end - pair[0].start, ChronoDuration::days(120));
    }
}

#[tokio::test]
async fn test_empty_window_count_resets_on_data() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::windows(anchor(), 30, 8, 100));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            async move {
                // Windows 1, 2 empty; 3 has data; 4, 5, 6 empty
                if call == 3 {
                    FetcherResult::Ok(Page::new(items(0, 2), false))
                } else {
                    Ok(Page::last(Vec::new()))
                }
            }
        })
        .await;

    assert_eq!(tracker.count(), 6);
    assert_eq!(outcome.items.len(), 2);
    assert_eq!(outcome.stop_reason, StopReason::EmptyWindows);
}

#[tokio::test]
async fn test_date_range_boundary_ends_window_crawl() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::windows(anchor(), 120, 8, 100));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            async move {
                if call == 3 {
                    Err(FetcherError::DateRangeOutOfBounds(
                        "createdFrom is older than supported".to_string(),
                    ))
                } else {
                    Ok(Page::new(items(0, 1), false))
                }
            }
        })
        .await;

    assert_eq!(tracker.count(), 3);
    assert_eq!(outcome.items.len(), 2);
    assert_eq!(outcome.stop_reason, StopReason::DateRangeBoundary);
    assert!(outcome.stop_reason.is_exhausted());
}

#[tokio::test]
async fn test_window_limit_ends_crawl() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::windows(anchor(), 7, 3, 100));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            tracker.record(request);
            async { FetcherResult::Ok(Page::new(items(0, 1), false)) }
        })
        .await;

    assert_eq!(tracker.count(), 3);
    assert_eq!(outcome.stop_reason, StopReason::WindowLimit);
}

#[tokio::test]
async fn test_full_window_is_paged_before_moving_on() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::windows(anchor(), 30, 1, 2));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            async move {
                match call {
                    1 | 2 => FetcherResult::Ok(Page::new(items(0, 2), true)),
                    _ => Ok(Page::new(items(0, 1), false)),
                }
            }
        })
        .await;

    let requests = tracker.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests
        .iter()
        .all(|r| r.window() == requests[0].window()));
    let numbers: Vec<u32> = requests.iter().map(|r| r.page().number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(outcome.items.len(), 5);
    assert_eq!(outcome.stop_reason, StopReason::WindowLimit);
}

#[tokio::test]
async fn test_failed_window_is_skipped() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::windows(anchor(), 30, 3, 100));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            async move {
                if call == 2 {
                    Err(server_error())
                } else {
                    Ok(Page::new(items(0, 1), false))
                }
            }
        })
        .await;

    assert_eq!(tracker.count(), 3);
    assert_eq!(outcome.items.len(), 2);
    assert_eq!(outcome.failed_requests, 1);
    assert_eq!(outcome.stop_reason, StopReason::WindowLimit);
}

#[tokio::test]
async fn test_lazy_crawl_fetches_on_demand() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::pages(10));

    let stream = crawler.crawl(|request: CrawlRequest| {
        tracker.record(request);
        let page = request.page();
        async move { FetcherResult::Ok(Page::new(items(page.offset() as u32, 10), true)) }
    });
    futures::pin_mut!(stream);

    // Nothing fetched before the first poll
    assert_eq!(tracker.count(), 0);

    let first: Vec<u32> = stream.as_mut().take(15).collect().await;
    assert_eq!(first, items(0, 15));
    assert_eq!(tracker.count(), 2);
}

#[tokio::test]
async fn test_skipped_records_do_not_shorten_a_full_page() {
    // Ten listings served four per page; the second record has no id
    let remote: Vec<serde_json::Value> = (0..10)
        .map(|n| {
            if n == 1 {
                json!({ "title": "missing id" })
            } else {
                json!({ "listingId": format!("1100{n:02}") })
            }
        })
        .collect();

    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::pages(4));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            tracker.record(request);
            let page = request.page();
            let start = (page.offset() as usize).min(remote.len());
            let end = (start + page.size as usize).min(remote.len());
            let body = json!({ "listings": remote[start..end].to_vec(), "total": 10 });
            async move { EbayParser::parse_listings_page(&body, page) }
        })
        .await;

    assert_eq!(tracker.count(), 3);
    assert_eq!(outcome.items.len(), 9);
    assert_eq!(outcome.stop_reason, StopReason::ShortPage);
    assert!(outcome
        .items
        .iter()
        .all(|listing| listing.listing_id != "110001"));
}

#[tokio::test]
async fn test_window_of_skipped_records_is_not_empty() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::windows(anchor(), 30, 8, 2));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            let call = tracker.record(request);
            async move {
                match call {
                    // Full page whose records were all dropped by the parser
                    1 => FetcherResult::Ok(Page::new(Vec::new(), true).with_received(2)),
                    2 => Ok(Page::new(items(0, 1), false)),
                    _ => Ok(Page::last(Vec::new())),
                }
            }
        })
        .await;

    let requests = tracker.requests();
    assert_eq!(requests[0].window(), requests[1].window());
    assert_eq!(requests[1].page().number, 2);
    // Window 1 had data, then three empty windows
    assert_eq!(tracker.count(), 5);
    assert_eq!(outcome.items.len(), 1);
    assert_eq!(outcome.stop_reason, StopReason::EmptyWindows);
}

#[tokio::test]
async fn test_window_crawl_survives_consecutive_failures() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::windows(anchor(), 30, 5, 100));

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            tracker.record(request);
            async { FetcherResult::<Page<u32>>::Err(server_error()) }
        })
        .await;

    assert_eq!(tracker.count(), 5);
    assert_eq!(outcome.failed_requests, 5);
    assert_eq!(outcome.stop_reason, StopReason::WindowLimit);
}

#[tokio::test]
async fn test_window_failure_cutoff_is_opt_in() {
    let tracker = FetchTracker::default();
    let crawler = PaginationCrawler::new(CrawlStrategy::windows(anchor(), 30, 5, 100))
        .with_max_consecutive_failures(2);

    let outcome = crawler
        .collect(|request: CrawlRequest| {
            tracker.record(request);
            async { FetcherResult::<Page<u32>>::Err(server_error()) }
        })
        .await;

    assert_eq!(tracker.count(), 2);
    assert_eq!(outcome.stop_reason, StopReason::TooManyFailures);
}
