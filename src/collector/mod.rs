//! Background data collection.
//!
//! Periodic tasks that poll the traffic API for every supported city and
//! persist incidents and flow samples for model training, plus retention
//! cleanup and collection statistics. The equivalent of a beat-scheduled
//! task queue, run as plain tokio interval loops: each run is independently
//! retried and one failing city never takes down the others.

use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use crate::{base::types::CollectionType, runtime::Runtime};

pub mod tasks;

/// Delay between retries of a failed collection run.
const RETRY_DELAY: Duration = Duration::from_secs(60);

/// Spawn the periodic collection and cleanup loops.
#[instrument(skip_all)]
pub fn spawn_collectors(runtime: &Runtime) {
    let collect_runtime = runtime.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(collect_runtime.config.collection_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let results = tasks::collect_all_cities(&collect_runtime.db, &collect_runtime.traffic, CollectionType::Combined, RETRY_DELAY).await;

            let successful: Vec<&str> = results.iter().filter(|r| r.error.is_none()).map(|r| r.city.as_str()).collect();
            let failed: Vec<&str> = results.iter().filter(|r| r.error.is_some()).map(|r| r.city.as_str()).collect();

            info!("Data collection completed. Success: {successful:?}, Failed: {failed:?}");
        }
    });

    let cleanup_runtime = runtime.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_runtime.config.cleanup_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick fires immediately; skip it so startup isn't a cleanup.
        interval.tick().await;

        loop {
            interval.tick().await;

            match tasks::cleanup_old_data(&cleanup_runtime.db, cleanup_runtime.config.retention_days).await {
                Ok(counts) => info!(
                    "Cleanup completed: {} incidents, {} traffic records, {} logs deleted",
                    counts.incidents_deleted, counts.traffic_records_deleted, counts.logs_deleted
                ),
                Err(err) => error!("Cleanup task failed: {err}"),
            }

            match cleanup_runtime.db.collection_statistics(Utc::now() - chrono::Duration::hours(24)).await {
                Ok(stats) => info!(
                    "Collection report: {} runs ({} ok, {} failed), {} records collected",
                    stats.collection_runs, stats.successful_runs, stats.failed_runs, stats.total_records
                ),
                Err(err) => error!("Collection report generation failed: {err}"),
            }
        }
    });

    info!("Background collectors started.");
}
