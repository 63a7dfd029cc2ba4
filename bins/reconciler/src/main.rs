//! Tally reconciliation worker.
//!
//! Runs the hourly and daily reconciliation schedule until interrupted.
//! `tally once` performs a single manual run and exits.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_clients::{HttpBrokerageClient, HttpCustodianClient, alert_sink_from_config};
use tally_core::ledger::LedgerEngine;
use tally_core::reconciliation::{
    CheckSources, ReconciliationScheduler, ReconciliationService, RetryPolicy, RetryingBrokerage,
    RetryingCustodian, RunOptions, Schedule, SeverityPolicy, Tolerances, default_checks,
};
use tally_db::{FundingRepository, LedgerRepository, ReportRepository, connect};
use tally_shared::AppConfig;

const DEFAULT_LOG_FILTER: &str = "tally=debug,sqlx=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config);

    let db = connect(&config.database).await?;
    info!("Connected to database");

    let service = build_service(&config, &db)?;
    let schedule = Schedule::try_from(&config.scheduler)?;
    let scheduler = ReconciliationScheduler::new(service, schedule);

    if std::env::args().nth(1).as_deref() == Some("once") {
        let report = scheduler.trigger_manual().await?;
        info!(
            report_id = %report.id,
            status = %report.status,
            passed = report.passed_checks,
            failed = report.failed_checks,
            exceptions = report.exceptions_count,
            "Manual reconciliation finished"
        );
        return Ok(());
    }

    if !config.reconciliation.enabled {
        warn!("Reconciliation is disabled; nothing to schedule");
        return Ok(());
    }

    scheduler.start()?;
    info!(
        daily_run_time = %config.scheduler.daily_run_time,
        hourly_interval_secs = config.scheduler.hourly_interval_secs,
        "Reconciliation scheduler running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    scheduler.stop().await;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .log
            .filter
            .as_deref()
            .unwrap_or(DEFAULT_LOG_FILTER)
            .into()
    });
    let json = config.log.json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

fn build_service(
    config: &AppConfig,
    db: &sea_orm::DatabaseConnection,
) -> anyhow::Result<ReconciliationService> {
    let recon = &config.reconciliation;
    let retry = RetryPolicy::from(&config.retry);

    let ledger_repo = Arc::new(LedgerRepository::new(db.clone()));
    let funding = Arc::new(FundingRepository::new(db.clone()));
    let ledger = LedgerEngine::new(ledger_repo.clone(), config.ledger.balancing);

    let custodian = HttpCustodianClient::new(&config.custodian)?;
    let brokerage = HttpBrokerageClient::new(&config.brokerage)?;

    let sources = CheckSources {
        ledger,
        aggregates: ledger_repo,
        custodian: Arc::new(RetryingCustodian::new(Arc::new(custodian), retry)),
        brokerage: Arc::new(RetryingBrokerage::new(Arc::new(brokerage), retry)),
        deposits: funding.clone(),
        withdrawals: funding.clone(),
        conversions: funding,
    };
    let tolerances = Tolerances {
        custodian: recon.tolerance_custodian,
        brokerage: recon.tolerance_brokerage,
    };
    let severity = Arc::new(SeverityPolicy::from_config(recon).map_err(anyhow::Error::msg)?);

    let mut service = ReconciliationService::new(
        default_checks(sources, tolerances, severity),
        Arc::new(ReportRepository::new(db.clone())),
        RunOptions::from(recon),
    );
    if let Some(sink) = alert_sink_from_config(recon)? {
        service = service.with_alert_sink(Arc::new(sink));
    }
    Ok(service)
}
