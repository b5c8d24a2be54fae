//! Run the full backfill pipeline against the mock collaborators and print
//! the aggregate result as JSON.
//!
//! ```sh
//! cargo run -p backfill --example run_pipeline
//! ```

use std::sync::Arc;

use backfill::{BackfillManager, JsonReportSink};
use backfill_core::{BackfillConfig, OutlierTreatment};
use backfill_mock::{MemoryStore, MockSource, WeekdayCalendar};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let source = Arc::new(
        MockSource::new()
            .with_spike("AAPL", "2023-03-15".parse()?, 8.0)
            .fail_first_attempts("MSFT", "2023-02-01".parse()?, 1),
    );

    let manager = BackfillManager::builder()
        .with_source(source)
        .with_calendar(Arc::new(WeekdayCalendar))
        .with_store(Arc::new(MemoryStore::new()))
        .with_report_sink(Arc::new(JsonReportSink::new("target/reports")))
        .config(BackfillConfig {
            treatment: OutlierTreatment::Clip,
            persist: true,
            ..BackfillConfig::default()
        })
        .build()?;

    let symbols = vec!["AAPL".to_string(), "MSFT".to_string(), "GOOG".to_string()];
    let result = manager
        .run(&symbols, "2023-01-02".parse()?, "2023-06-30".parse()?)
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
