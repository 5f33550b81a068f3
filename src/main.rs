use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use livesports_grader::config::{Config, OneShot};
use livesports_grader::db::Database;
use livesports_grader::provider::HttpFetcher;
use livesports_grader::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let settings = config.scheduler_settings()?;
    info!(
        "Following {} league(s) via {}",
        settings.leagues.len(),
        settings.provider_base_url
    );
    let fetcher = Arc::new(HttpFetcher::new(config.http_timeout())?);
    let mut scheduler = Scheduler::new(settings, db, fetcher);

    if let Some(op) = config.once {
        scheduler.start_workers();
        let result = match op {
            OneShot::FullRefresh => scheduler.run_full_refresh().await.map(|n| info!("{} event(s) refreshed", n)),
            OneShot::UpdateLive => scheduler.update_live().await.map(|n| info!("{} live event(s)", n)),
            OneShot::Reconcile => scheduler.reconcile_statuses().await.map(|n| info!("{} game(s) reconciled", n)),
            OneShot::BackfillStats => scheduler.backfill_stats().await.map(|n| info!("{} statistic(s) fetched", n)),
            OneShot::Grade => scheduler.grade_pending().await,
        };
        scheduler.stop().await;
        let writes = scheduler.write_counts();
        let alerts = scheduler.alert_counts();
        info!(
            "Done: {} write(s), {} failed; {} alert(s) persisted",
            writes.executed, writes.failed, alerts.persisted
        );
        if let Err(e) = &result {
            error!("{:?} failed: {:#}", op, e);
        }
        return result;
    }

    scheduler.start();
    info!("Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    scheduler.stop().await;
    Ok(())
}
