//! # Listing Exporter Library
//!
//! Bulk export of a seller's marketplace listings into CSV, built on a
//! bounded-concurrency, rate-limited crawl-and-export engine.
//!
//! ## Features
//!
//! - **Rate Limiting**: Sliding-window admission control shared by every request
//! - **Retries**: Bounded exponential backoff for transient failures
//! - **Pagination**: Page-number and backwards time-window crawls with hard ceilings
//! - **Bounded Concurrency**: Fixed-size worker pool with backpressure
//! - **Streaming Output**: Incremental CSV sink, header written exactly once
//!
//! ## Quick Start
//!
//! ```no_run
//! use listing_exporter::exporter::{ExportOrchestrator, WorkItem, WorkerPool};
//! use listing_exporter::metrics::RequestCounters;
//! use listing_exporter::output::CsvSink;
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let items = WorkItem::enumerate(vec!["a", "b"], |p| p.to_string());
//! let sink = CsvSink::new("./out.csv", ["id"]);
//! let orchestrator = ExportOrchestrator::new(
//!     WorkerPool::new(8)?,
//!     sink,
//!     Arc::new(RequestCounters::new()),
//! );
//!
//! let summary = orchestrator
//!     .run(items, |item| async move {
//!         let mut row = BTreeMap::new();
//!         row.insert("id".to_string(), item.id);
//!         Ok::<_, String>(vec![row])
//!     })
//!     .await?;
//! println!("{} rows", summary.rows_written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`exporter`] - Rate limiter, retry executor, worker pool, orchestrator
//! - [`fetcher`] - Listing API client, response parsing, pagination crawler
//! - [`output`] - Incremental CSV sink
//! - [`metrics`] - Request counters and Prometheus exporter
//! - [`cli`] - Command-line interface
//!
//! ## Data Types
//!
//! - [`Listing`] - One active listing
//! - [`Sale`] - One sale (transaction) of a listing
//! - [`ListingRow`] - A listing joined with at most one sale, one CSV row

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// CLI command implementations
pub mod cli;

/// Crawl-and-export engine
pub mod exporter;

/// Listing API access
pub mod fetcher;

/// Metrics and observability
pub mod metrics;

/// Export sinks
pub mod output;

use output::ExportRecord;

/// Listing columns, in output order
pub const LISTING_COLUMNS: [&str; 11] = [
    "listing_id",
    "sku",
    "title",
    "price",
    "currency",
    "quantity_available",
    "quantity_sold",
    "status",
    "start_time",
    "category_id",
    "watch_count",
];

/// Sale columns appended when sales history is exported
pub const SALE_COLUMNS: [&str; 6] = [
    "transaction_id",
    "sold_at",
    "sale_quantity",
    "sale_unit_price",
    "sale_currency",
    "buyer_country",
];

/// Header for an export, with or without sales columns
pub fn export_columns(include_sales: bool) -> Vec<&'static str> {
    let mut columns = LISTING_COLUMNS.to_vec();
    if include_sales {
        columns.extend_from_slice(&SALE_COLUMNS);
    }
    columns
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Active listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    /// Listing identifier
    pub listing_id: String,
    /// Seller SKU
    pub sku: Option<String>,
    /// Listing title
    pub title: Option<String>,
    /// Current price
    pub price: Option<Decimal>,
    /// Price currency (ISO 4217)
    pub currency: Option<String>,
    /// Units still available
    pub quantity_available: u64,
    /// Units sold so far
    pub quantity_sold: u64,
    /// Listing status as reported
    pub status: Option<String>,
    /// Listing start
    pub start_time: Option<DateTime<Utc>>,
    /// Leaf category
    pub category_id: Option<String>,
    /// Watchers
    pub watch_count: u64,
}

impl Listing {
    /// Listing with only its identifier set
    pub fn new(listing_id: impl Into<String>) -> Self {
        Self {
            listing_id: listing_id.into(),
            sku: None,
            title: None,
            price: None,
            currency: None,
            quantity_available: 0,
            quantity_sold: 0,
            status: None,
            start_time: None,
            category_id: None,
            watch_count: 0,
        }
    }

    /// Fill fields the detail record lacks from the summary record
    pub fn merge_summary(mut self, summary: &Listing) -> Self {
        self.sku = self.sku.or_else(|| summary.sku.clone());
        self.title = self.title.or_else(|| summary.title.clone());
        if self.price.is_none() {
            self.price = summary.price;
            self.currency = self.currency.or_else(|| summary.currency.clone());
        }
        self.status = self.status.or_else(|| summary.status.clone());
        self.start_time = self.start_time.or(summary.start_time);
        self.category_id = self.category_id.or_else(|| summary.category_id.clone());
        self
    }
}

impl ExportRecord for Listing {
    fn field(&self, column: &str) -> Option<String> {
        match column {
            "listing_id" => Some(self.listing_id.clone()),
            "sku" => self.sku.clone(),
            "title" => self.title.clone(),
            "price" => self.price.map(|p| p.to_string()),
            "currency" => self.currency.clone(),
            "quantity_available" => Some(self.quantity_available.to_string()),
            "quantity_sold" => Some(self.quantity_sold.to_string()),
            "status" => self.status.clone(),
            "start_time" => self.start_time.as_ref().map(format_time),
            "category_id" => self.category_id.clone(),
            "watch_count" => Some(self.watch_count.to_string()),
            _ => None,
        }
    }
}

/// One sale of a listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sale {
    /// Transaction identifier
    pub transaction_id: String,
    /// Sale time
    pub sold_at: Option<DateTime<Utc>>,
    /// Units purchased
    pub quantity: u64,
    /// Price per unit
    pub unit_price: Option<Decimal>,
    /// Price currency (ISO 4217)
    pub currency: Option<String>,
    /// Buyer country code
    pub buyer_country: Option<String>,
}

impl ExportRecord for Sale {
    fn field(&self, column: &str) -> Option<String> {
        match column {
            "transaction_id" => Some(self.transaction_id.clone()),
            "sold_at" => self.sold_at.as_ref().map(format_time),
            "sale_quantity" => Some(self.quantity.to_string()),
            "sale_unit_price" => self.unit_price.map(|p| p.to_string()),
            "sale_currency" => self.currency.clone(),
            "buyer_country" => self.buyer_country.clone(),
            _ => None,
        }
    }
}

/// A listing joined with at most one sale
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ListingRow {
    /// Listing fields
    pub listing: Listing,
    /// Sale fields, if any
    pub sale: Option<Sale>,
}

impl ListingRow {
    /// Row without sale fields
    pub fn listing_only(listing: Listing) -> Self {
        Self {
            listing,
            sale: None,
        }
    }

    /// One row per sale, or a single listing-only row when there are none
    pub fn expand(listing: Listing, sales: Vec<Sale>) -> Vec<Self> {
        if sales.is_empty() {
            return vec![Self::listing_only(listing)];
        }
        sales
            .into_iter()
            .map(|sale| Self {
                listing: listing.clone(),
                sale: Some(sale),
            })
            .collect()
    }
}

impl ExportRecord for ListingRow {
    fn field(&self, column: &str) -> Option<String> {
        if LISTING_COLUMNS.contains(&column) {
            self.listing.field(column)
        } else {
            self.sale.as_ref().and_then(|sale| sale.field(column))
        }
    }
}
