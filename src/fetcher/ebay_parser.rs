//! Listing API response parser
//!
//! Stateless conversion of raw JSON into [`Listing`] and [`Sale`] records.
//! This is the single place absent fields receive their defaults.

use crate::fetcher::{FetcherError, FetcherResult, Page, PageRequest};
use crate::{Listing, Sale};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tracing::warn;

/// Stateless parser for listing API responses
pub struct EbayParser;

impl EbayParser {
    /// Parse one page of `{ "listings": [...], "total", "next" }`
    ///
    /// Records without a `listingId` are skipped with a warning.
    ///
    /// # Errors
    /// Returns [`FetcherError::MalformedResponse`] if the body is not an
    /// object or `listings` is not an array.
    pub fn parse_listings_page(body: &Value, request: PageRequest) -> FetcherResult<Page<Listing>> {
        let entries = Self::collection(body, "listings")?;
        let listings: Vec<Listing> = entries
            .iter()
            .filter_map(|entry| match Self::parse_listing(entry) {
                Ok(listing) => Some(listing),
                Err(e) => {
                    warn!(error = %e, "Skipping listing record");
                    None
                }
            })
            .collect();

        Ok(Self::page(body, request, entries.len(), listings))
    }

    /// Parse a single listing object
    ///
    /// # Errors
    /// Returns [`FetcherError::MalformedResponse`] when `listingId` is missing
    /// or a present field has the wrong type.
    ///
    /// # Format
    /// `{ "listingId", "sku", "title", "price": { "value", "currency" },
    ///    "quantityAvailable", "quantitySold", "listingStatus", "startTime",
    ///    "categoryId", "watchCount" }`
    pub fn parse_listing(value: &Value) -> FetcherResult<Listing> {
        let listing_id = Self::string(value, "listingId").ok_or_else(|| {
            FetcherError::MalformedResponse("Invalid or missing listingId".to_string())
        })?;

        let (price, currency) = Self::amount(value.get("price"), "price")?;

        Ok(Listing {
            listing_id,
            sku: Self::string(value, "sku"),
            title: Self::string(value, "title"),
            price,
            currency,
            quantity_available: Self::count(value, "quantityAvailable")?.unwrap_or(0),
            quantity_sold: Self::count(value, "quantitySold")?.unwrap_or(0),
            status: Self::string(value, "listingStatus"),
            start_time: Self::timestamp(value, "startTime")?,
            category_id: Self::string(value, "categoryId"),
            watch_count: Self::count(value, "watchCount")?.unwrap_or(0),
        })
    }

    /// Parse one page of `{ "transactions": [...], "total", "next" }`
    ///
    /// Records without a `transactionId` are skipped with a warning.
    ///
    /// # Errors
    /// Returns [`FetcherError::MalformedResponse`] if `transactions` is not an
    /// array.
    pub fn parse_sales_page(body: &Value, request: PageRequest) -> FetcherResult<Page<Sale>> {
        let entries = Self::collection(body, "transactions")?;
        let sales: Vec<Sale> = entries
            .iter()
            .filter_map(|entry| match Self::parse_sale(entry) {
                Ok(sale) => Some(sale),
                Err(e) => {
                    warn!(error = %e, "Skipping transaction record");
                    None
                }
            })
            .collect();

        Ok(Self::page(body, request, entries.len(), sales))
    }

    /// Parse a single transaction object
    ///
    /// # Format
    /// `{ "transactionId", "createdDate", "quantityPurchased",
    ///    "transactionPrice": { "value", "currency" }, "buyer": { "countryCode" } }`
    pub fn parse_sale(value: &Value) -> FetcherResult<Sale> {
        let transaction_id = Self::string(value, "transactionId").ok_or_else(|| {
            FetcherError::MalformedResponse("Invalid or missing transactionId".to_string())
        })?;

        let (unit_price, currency) =
            Self::amount(value.get("transactionPrice"), "transactionPrice")?;

        Ok(Sale {
            transaction_id,
            sold_at: Self::timestamp(value, "createdDate")?,
            quantity: Self::count(value, "quantityPurchased")?.unwrap_or(1),
            unit_price,
            currency,
            buyer_country: value
                .get("buyer")
                .and_then(|buyer| Self::string(buyer, "countryCode")),
        })
    }

    fn collection<'a>(body: &'a Value, key: &str) -> FetcherResult<&'a [Value]> {
        if !body.is_object() {
            return Err(FetcherError::MalformedResponse(
                "Response body is not an object".to_string(),
            ));
        }
        match body.get(key) {
            None | Some(Value::Null) => Ok(&[]),
            Some(Value::Array(entries)) => Ok(entries.as_slice()),
            Some(_) => Err(FetcherError::MalformedResponse(format!(
                "Field '{key}' is not an array"
            ))),
        }
    }

    /// `has_more` from `next`, else from `total`, else from a full page
    fn page<T>(body: &Value, request: PageRequest, raw_len: usize, items: Vec<T>) -> Page<T> {
        let total = body.get("total").and_then(Value::as_u64);
        let has_more = match body.get("next") {
            Some(Value::String(next)) => !next.is_empty(),
            Some(Value::Null) => false,
            _ => match total {
                Some(total) => request.offset() + (raw_len as u64) < total,
                None => raw_len >= request.size as usize,
            },
        };

        let page = Page::new(items, has_more).with_received(raw_len);
        match total {
            Some(total) => page.with_total(total),
            None => page,
        }
    }

    fn string(value: &Value, key: &str) -> Option<String> {
        match value.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn count(value: &Value, key: &str) -> FetcherResult<Option<u64>> {
        match value.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                FetcherError::MalformedResponse(format!("Field '{key}' is not a count: {n}"))
            }),
            Some(Value::String(s)) => s.trim().parse::<u64>().map(Some).map_err(|e| {
                FetcherError::MalformedResponse(format!("Field '{key}' is not a count: {e}"))
            }),
            Some(other) => Err(FetcherError::MalformedResponse(format!(
                "Field '{key}' has unexpected type: {other}"
            ))),
        }
    }

    fn timestamp(value: &Value, key: &str) -> FetcherResult<Option<DateTime<Utc>>> {
        match value.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| {
                    FetcherError::MalformedResponse(format!("Field '{key}' is not RFC 3339: {e}"))
                }),
            Some(other) => Err(FetcherError::MalformedResponse(format!(
                "Field '{key}' has unexpected type: {other}"
            ))),
        }
    }

    fn amount(
        value: Option<&Value>,
        field_name: &str,
    ) -> FetcherResult<(Option<Decimal>, Option<String>)> {
        let Some(amount) = value.filter(|v| !v.is_null()) else {
            return Ok((None, None));
        };
        let price = match amount.get("value") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(Self::parse_decimal(raw, field_name)?),
        };
        Ok((price, Self::string(amount, "currency")))
    }

    /// Parse decimal from a JSON string or number
    fn parse_decimal(value: &Value, field_name: &str) -> FetcherResult<Decimal> {
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            other => {
                return Err(FetcherError::MalformedResponse(format!(
                    "Invalid {field_name}: {other}"
                )))
            }
        };
        Decimal::from_str(&text).map_err(|e| {
            FetcherError::MalformedResponse(format!("Failed to parse {field_name}: {e}"))
        })
    }
}
