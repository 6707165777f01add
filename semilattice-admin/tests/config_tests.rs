use pretty_assertions::assert_eq;
use semilattice_admin::MirrorConfig;
use std::time::Duration;

#[test]
fn defaults() {
    let config = MirrorConfig::default();
    assert_eq!(config.retry_interval(), Duration::from_secs(1));
    assert_eq!(config.bootstrap_timeout(), Duration::from_secs(30));
    assert_eq!(config.mutation_timeout(), Duration::from_secs(10));
    assert_eq!(config.blueprint_timeout(), Duration::from_secs(600));
    assert_eq!(config.default_primary_key, "id");
    assert_eq!(config.default_database, "test");
}

#[test]
fn attempts_fit_the_budget() {
    let config = MirrorConfig::default();
    assert_eq!(config.attempts_for(Duration::from_secs(3)), 3);
    assert_eq!(config.attempts_for(Duration::from_millis(2_500)), 3);
    assert_eq!(config.attempts_for(Duration::ZERO), 1);
}

#[test]
fn zero_interval_does_not_divide_by_zero() {
    let config = MirrorConfig {
        retry_interval_ms: 0,
        ..MirrorConfig::default()
    };
    assert_eq!(config.attempts_for(Duration::from_millis(5)), 5);
}

#[test]
fn missing_fields_take_defaults() {
    let config: MirrorConfig = serde_json::from_str(r#"{ "mutation_timeout_secs": 2 }"#).unwrap();
    assert_eq!(config.mutation_timeout_secs, 2);
    assert_eq!(config.request_timeout_secs, 120);

    let empty: MirrorConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(empty, MirrorConfig::default());
}

mod prop {
    use proptest::prelude::*;
    use semilattice_admin::MirrorConfig;
    use std::time::Duration;

    proptest! {
        #[test]
        fn attempts_cover_the_budget(interval in 1u64..5_000, budget_ms in 0u64..600_000) {
            let config = MirrorConfig { retry_interval_ms: interval, ..MirrorConfig::default() };
            let attempts = config.attempts_for(Duration::from_millis(budget_ms)) as u64;
            prop_assert!(attempts >= 1);
            prop_assert!(attempts * interval >= budget_ms);
            prop_assert!(attempts == 1 || (attempts - 1) * interval < budget_ms);
        }
    }
}
