//! Unit tests for the incremental CSV sink

use futures::future::join_all;
use listing_exporter::output::csv::SinkStatus;
use listing_exporter::output::{CsvSink, OutputError};
use listing_exporter::{export_columns, Listing, ListingRow};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use tempfile::TempDir;

fn listing_rows(count: usize) -> Vec<ListingRow> {
    (0..count)
        .map(|i| {
            let mut listing = Listing::new(format!("11000{i}"));
            listing.title = Some(format!("Vintage \"Item\" #{i}, boxed"));
            listing.price = Some(Decimal::from_str("12.50").unwrap());
            listing.currency = Some("USD".to_string());
            listing.quantity_available = i as u64;
            ListingRow::listing_only(listing)
        })
        .collect()
}

#[tokio::test]
async fn test_batch_boundaries_do_not_change_output() {
    let temp_dir = TempDir::new().unwrap();
    let split_path = temp_dir.path().join("split.csv");
    let whole_path = temp_dir.path().join("whole.csv");
    let rows = listing_rows(22);

    let split = CsvSink::new(&split_path, export_columns(false));
    split.open().await.unwrap();
    split.append(&rows[..10]).await.unwrap();
    split.append(&rows[10..15]).await.unwrap();
    split.append(&rows[15..]).await.unwrap();
    assert_eq!(split.close().await.unwrap(), 22);

    let whole = CsvSink::new(&whole_path, export_columns(false));
    whole.open().await.unwrap();
    whole.append(&rows).await.unwrap();
    assert_eq!(whole.close().await.unwrap(), 22);

    let split_bytes = std::fs::read(&split_path).unwrap();
    let whole_bytes = std::fs::read(&whole_path).unwrap();
    assert_eq!(split_bytes, whole_bytes);
    assert_eq!(String::from_utf8(whole_bytes).unwrap().lines().count(), 23);
}

#[tokio::test]
async fn test_header_written_once() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("listings.csv");
    let sink = CsvSink::new(&path, export_columns(true));

    sink.open().await.unwrap();
    sink.open().await.unwrap();
    sink.append(&listing_rows(3)).await.unwrap();
    sink.close().await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let header = export_columns(true)
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(",");
    assert_eq!(content.matches(&header).count(), 1);
    assert!(content.starts_with(&header));
}

#[tokio::test]
async fn test_every_field_quoted_and_escaped() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("quoted.csv");
    let sink = CsvSink::new(&path, ["listing_id", "title", "note"]);

    let mut row = BTreeMap::new();
    row.insert("listing_id".to_string(), "7".to_string());
    row.insert("title".to_string(), "Lamp, \"brass\"\nwith shade".to_string());

    sink.open().await.unwrap();
    sink.append(&[row]).await.unwrap();
    sink.close().await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        content,
        "\"listing_id\",\"title\",\"note\"\n\"7\",\"Lamp, \"\"brass\"\"\nwith shade\",\"\"\n"
    );

    // Reads back as three columns
    let mut reader = csv::Reader::from_path(&path).unwrap();
    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 1);
    assert_eq!(&records[0][1], "Lamp, \"brass\"\nwith shade");
}

#[tokio::test]
async fn test_concurrent_appends_do_not_interleave() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("concurrent.csv");
    let sink = CsvSink::new(&path, ["batch", "row"]);
    sink.open().await.unwrap();

    let batches: Vec<Vec<serde_json::Value>> = (0..16)
        .map(|b| (0..25).map(|r| json!({"batch": b, "row": r})).collect())
        .collect();
    let results = join_all(batches.iter().map(|batch| sink.append(batch))).await;
    assert!(results.iter().all(|r| matches!(r, Ok(25))));
    assert_eq!(sink.close().await.unwrap(), 400);

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 400);

    // Each batch occupies one contiguous run of 25 rows
    for chunk in records.chunks(25) {
        let batch = &chunk[0][0];
        assert!(chunk.iter().all(|record| &record[0] == batch));
        let rows: Vec<&str> = chunk.iter().map(|record| &record[1]).collect();
        let expected: Vec<String> = (0..25).map(|r| r.to_string()).collect();
        assert_eq!(rows, expected);
    }
}

#[tokio::test]
async fn test_no_writes_after_close() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("closed.csv");
    let sink = CsvSink::new(&path, export_columns(false));

    sink.open().await.unwrap();
    sink.append(&listing_rows(4)).await.unwrap();
    sink.close().await.unwrap();
    let before = std::fs::read(&path).unwrap();

    assert!(matches!(
        sink.append(&listing_rows(1)).await,
        Err(OutputError::SinkClosed(_))
    ));
    assert!(matches!(sink.open().await, Err(OutputError::SinkClosed(_))));
    assert!(matches!(sink.close().await, Err(OutputError::SinkClosed(_))));
    assert_eq!(sink.status().await, SinkStatus::Closed);
    assert_eq!(sink.rows_written().await, 4);

    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn test_append_before_open_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("never.csv");
    let sink = CsvSink::new(&path, export_columns(false));

    assert_eq!(sink.status().await, SinkStatus::Unopened);
    assert!(matches!(
        sink.append(&listing_rows(1)).await,
        Err(OutputError::SinkNotOpen(_))
    ));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_rows_visible_before_close() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("streaming.csv");
    let sink = CsvSink::new(&path, export_columns(false));

    sink.open().await.unwrap();
    sink.append(&listing_rows(5)).await.unwrap();

    // Each append is flushed, so a reader sees it while the sink is open
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 6);
    assert_eq!(sink.status().await, SinkStatus::Open);

    sink.close().await.unwrap();
}
