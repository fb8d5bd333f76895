//! Batch entry point: load config, crawl every seeded source, report.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use homecrawl::application::{CrawlRun, MemorySink, RecordSink};
use homecrawl::infrastructure::config::AppConfig;
use homecrawl::infrastructure::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "homecrawl.json".to_string());
    let config = AppConfig::load_or_default(&config_path).await?;
    init_logging(&config.logging)?;

    if config.seeds.is_empty() {
        warn!("No seeds configured; add a seed list to {config_path}");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling crawl");
                cancel.cancel();
            }
        });
    }

    let report = CrawlRun::new(config).with_cancel(cancel).execute().await?;

    // Downstream writers consume the stream through the sink seam; the
    // in-memory sink stands in when no exporter is attached.
    let mut sink = MemorySink::new();
    for record in &report.records {
        sink.append(record)?;
    }

    for stats in &report.source_stats {
        info!(
            source = %stats.source,
            visited = stats.nodes_visited,
            skipped = stats.nodes_skipped,
            failed = stats.nodes_failed,
            truncated = stats.children_truncated,
            records = stats.records_emitted,
            "Source summary"
        );
    }
    if report.records.is_empty() {
        warn!(run_id = %report.run_id, "Run finished with zero records");
    } else {
        info!(
            run_id = %report.run_id,
            total = report.total_records(),
            "Run finished"
        );
    }

    Ok(())
}
