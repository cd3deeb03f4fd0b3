//! Tests for tracing subscriber setup.

use super::*;

#[test]
fn test_second_initialisation_fails() {
    let config = LoggingConfig::default();

    // Another test thread may already have installed a subscriber; either
    // way the second call must report the conflict.
    let _ = init_logging(&config);

    assert!(matches!(
        init_logging(&config),
        Err(ConfigurationError::Invalid { .. })
    ));
}

#[test]
fn test_json_initialisation_reports_conflict_too() {
    let config = LoggingConfig {
        level: "DEBUG".to_string(),
        json: true,
    };

    let _ = init_logging(&LoggingConfig::default());

    let error = init_logging(&config).unwrap_err();
    assert!(error.to_string().contains("logging already initialised"));
}
