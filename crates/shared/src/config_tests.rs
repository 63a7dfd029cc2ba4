use super::*;
use rust_decimal_macros::dec;
use rstest::rstest;

const DB_URL: (&str, Option<&str>) = ("TALLY__DATABASE__URL", Some("postgres://localhost/tally_test"));

fn base_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: "postgres://localhost/tally".to_string(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        },
        log: LogConfig::default(),
        ledger: LedgerConfig::default(),
        reconciliation: ReconciliationConfig::default(),
        scheduler: SchedulerConfig::default(),
        custodian: ExternalApiConfig::default(),
        brokerage: ExternalApiConfig::default(),
        retry: RetryConfig::default(),
    }
}

#[test]
fn test_load_applies_defaults() {
    temp_env::with_vars(vec![DB_URL, ("RUN_MODE", Some("unit-test"))], || {
        let config = AppConfig::load().unwrap();

        assert_eq!(config.database.url, "postgres://localhost/tally_test");
        assert_eq!(config.database.max_connections, 10);
        assert!(config.reconciliation.enabled);
        assert_eq!(config.reconciliation.tolerance_custodian, dec!(10));
        assert_eq!(config.reconciliation.tolerance_brokerage, dec!(100));
        assert!(!config.reconciliation.auto_correct_low_severity);
        assert!(!config.reconciliation.enable_alerting);
        assert_eq!(
            config.reconciliation.pagerduty_events_url,
            "https://events.pagerduty.com/v2/enqueue"
        );
        assert_eq!(config.reconciliation.run_timeout(), Duration::from_secs(600));
        assert_eq!(config.scheduler.hourly_interval(), Duration::from_secs(3600));
        assert_eq!(config.scheduler.daily_interval(), Duration::from_secs(86400));
        assert_eq!(
            config.scheduler.daily_run_time().unwrap(),
            NaiveTime::from_hms_opt(2, 0, 0).unwrap()
        );
        assert_eq!(config.ledger.balancing, BalancingPolicy::RequireEqualAmounts);
        assert_eq!(config.retry.max_attempts, 3);
    });
}

#[test]
fn test_load_reads_environment_overrides() {
    temp_env::with_vars(
        vec![
            DB_URL,
            ("RUN_MODE", Some("unit-test")),
            ("TALLY__RECONCILIATION__TOLERANCE_CUSTODIAN", Some("25.5")),
            ("TALLY__RECONCILIATION__CONCURRENT_CHECKS", Some("true")),
            ("TALLY__SCHEDULER__DAILY_RUN_TIME", Some("03:30")),
            ("TALLY__LEDGER__BALANCING", Some("linked_pair")),
        ],
        || {
            let config = AppConfig::load().unwrap();

            assert_eq!(config.reconciliation.tolerance_custodian, dec!(25.5));
            assert!(config.reconciliation.concurrent_checks);
            assert_eq!(
                config.scheduler.daily_run_time().unwrap(),
                NaiveTime::from_hms_opt(3, 30, 0).unwrap()
            );
            assert_eq!(config.ledger.balancing, BalancingPolicy::LinkedPair);
        },
    );
}

#[test]
fn test_load_rejects_bad_daily_run_time() {
    temp_env::with_vars(
        vec![
            DB_URL,
            ("RUN_MODE", Some("unit-test")),
            ("TALLY__SCHEDULER__DAILY_RUN_TIME", Some("25:99")),
        ],
        || {
            assert!(AppConfig::load().is_err());
        },
    );
}

#[test]
fn test_load_requires_database_url() {
    temp_env::with_vars(
        vec![("TALLY__DATABASE__URL", None::<&str>), ("RUN_MODE", Some("unit-test"))],
        || {
            assert!(AppConfig::load().is_err());
        },
    );
}

#[test]
fn test_validate_accepts_defaults() {
    assert!(base_config().validate().is_ok());
}

#[test]
fn test_validate_rejects_negative_tolerance() {
    let mut config = base_config();
    config.reconciliation.tolerance_brokerage = dec!(-1);
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_unordered_severity_bands() {
    let mut config = base_config();
    config.reconciliation.severity.medium_max = dec!(0.5);
    assert!(config.validate().is_err());

    let mut config = base_config();
    config.reconciliation.severity_overrides.insert(
        "USDC".to_string(),
        SeverityThresholds {
            low_max: dec!(10),
            medium_max: dec!(10),
            high_max: dec!(20),
        },
    );
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_requires_a_destination_when_alerting() {
    let mut config = base_config();
    config.reconciliation.enable_alerting = true;
    assert!(config.validate().is_err());

    config.reconciliation.slack_webhook_url = Some(String::new());
    assert!(config.validate().is_err());

    config.reconciliation.alert_webhook_url = Some("https://hooks.example.com/recon".to_string());
    assert!(config.validate().is_ok());
}

#[rstest]
#[case::webhook("TALLY__RECONCILIATION__ALERT_WEBHOOK_URL", "https://hooks.example.com/recon")]
#[case::slack("TALLY__RECONCILIATION__SLACK_WEBHOOK_URL", "https://hooks.slack.com/services/T/B/X")]
#[case::pagerduty("TALLY__RECONCILIATION__PAGERDUTY_ROUTING_KEY", "R0UT1NG")]
fn test_any_alert_destination_satisfies_validation(#[case] key: &str, #[case] value: &str) {
    temp_env::with_vars(
        vec![
            DB_URL,
            ("RUN_MODE", Some("unit-test")),
            ("TALLY__RECONCILIATION__ENABLE_ALERTING", Some("true")),
            (key, Some(value)),
        ],
        || {
            let config = AppConfig::load().unwrap();
            assert!(config.reconciliation.has_alert_destination());
            assert!(config.validate().is_ok());
        },
    );
}

#[test]
fn test_validate_rejects_zero_intervals() {
    let mut config = base_config();
    config.scheduler.hourly_interval_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_default_severity_bands() {
    let bands = SeverityThresholds::default();
    assert_eq!(bands.low_max, dec!(1));
    assert_eq!(bands.medium_max, dec!(100));
    assert_eq!(bands.high_max, dec!(1000));
    assert!(bands.is_ordered());
}
