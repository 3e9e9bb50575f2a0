//! Listing API fetcher
//!
//! Implements [`ListingApi`] over [`EbayHttpClient`]:
//! - `GET /sell/listing/v1/listing?listingStatus=ACTIVE&limit&offset`
//! - `GET /sell/listing/v1/listing/{id}`
//! - `GET /sell/listing/v1/listing/{id}/transaction?createdFrom&createdTo&limit&offset`

use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::Value;
use tracing::debug;

use super::ebay_http::EbayHttpClient;
use super::ebay_parser::EbayParser;
use super::{FetcherResult, ListingApi, Page, PageRequest, TimeWindow};
use crate::{Listing, Sale};

const LISTINGS_PATH: [&str; 4] = ["sell", "listing", "v1", "listing"];

/// Metric/log label for the listing collection endpoint
pub const LISTINGS_LABEL: &str = "listings";
/// Metric/log label for the listing detail endpoint
pub const LISTING_DETAIL_LABEL: &str = "listing_detail";
/// Metric/log label for the transaction endpoint
pub const TRANSACTIONS_LABEL: &str = "listing_transactions";

/// Listing status filter sent with every collection request
const ACTIVE_STATUS: &str = "ACTIVE";

/// Fetcher for a seller's listings and their sales
pub struct EbayListingsFetcher {
    http: EbayHttpClient,
}

impl EbayListingsFetcher {
    /// Create a fetcher over an authenticated client
    pub fn new(http: EbayHttpClient) -> Self {
        Self { http }
    }
}

/// Path segments for one listing, followed by `rest`
fn listing_path<'a>(listing_id: &'a str, rest: &[&'a str]) -> Vec<&'a str> {
    let mut segments = LISTINGS_PATH.to_vec();
    segments.push(listing_id);
    segments.extend_from_slice(rest);
    segments
}

#[async_trait]
impl ListingApi for EbayListingsFetcher {
    async fn fetch_listings_page(&self, page: PageRequest) -> FetcherResult<Page<Listing>> {
        let params = [
            ("listingStatus", ACTIVE_STATUS.to_string()),
            ("limit", page.size.to_string()),
            ("offset", page.offset().to_string()),
        ];

        let body: Value = self.http.get(LISTINGS_LABEL, &LISTINGS_PATH, &params).await?;
        let parsed = EbayParser::parse_listings_page(&body, page)?;

        debug!(
            page = page.number,
            received = parsed.items.len(),
            has_more = parsed.has_more,
            "Listings page fetched"
        );
        Ok(parsed)
    }

    async fn fetch_listing(&self, listing_id: &str) -> FetcherResult<Listing> {
        let endpoint = listing_path(listing_id, &[]);
        let body: Value = self.http.get(LISTING_DETAIL_LABEL, &endpoint, &[]).await?;
        EbayParser::parse_listing(&body)
    }

    async fn fetch_sales(
        &self,
        listing_id: &str,
        window: TimeWindow,
        page: PageRequest,
    ) -> FetcherResult<Page<Sale>> {
        let endpoint = listing_path(listing_id, &["transaction"]);
        let params = [
            (
                "createdFrom",
                window.start.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            (
                "createdTo",
                window.end.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            ("limit", page.size.to_string()),
            ("offset", page.offset().to_string()),
        ];

        let body: Value = self.http.get(TRANSACTIONS_LABEL, &endpoint, &params).await?;
        let parsed = EbayParser::parse_sales_page(&body, page)?;

        debug!(
            listing_id,
            %window,
            page = page.number,
            received = parsed.items.len(),
            "Sales page fetched"
        );
        Ok(parsed)
    }

    fn base_url(&self) -> &str {
        self.http.base_url()
    }
}
