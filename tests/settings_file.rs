//! Loading subscription settings from JSON files.

use chronicle_catchup::{EventFilter, SubscriptionError, SubscriptionSettings};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_settings_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("subscription.json");
    fs::write(
        &path,
        r#"{
            "subscription_name": "invoices-projection",
            "read_batch_size": 250,
            "filter": { "on": "event_type_prefix", "prefixes": ["Invoice"] },
            "checkpoint_interval": 8
        }"#,
    )
    .unwrap();

    let settings = SubscriptionSettings::from_json_file(&path).unwrap();
    assert_eq!(settings.subscription_name, "invoices-projection");
    assert_eq!(settings.read_batch_size, 250);
    assert_eq!(settings.checkpoint_interval, 8);
    assert_eq!(settings.max_live_queue_size, 10_000);
    assert!(settings.resolve_link_tos);
    assert_eq!(
        settings.filter,
        Some(EventFilter::event_type_prefix(["Invoice"]))
    );
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let result = SubscriptionSettings::from_json_file(dir.path().join("absent.json"));
    assert!(matches!(result, Err(SubscriptionError::Io(_))));
}

#[test]
fn test_invalid_values_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("subscription.json");
    fs::write(&path, r#"{ "max_live_queue_size": 0 }"#).unwrap();

    let result = SubscriptionSettings::from_json_file(&path);
    assert!(matches!(result, Err(SubscriptionError::InvalidSettings(_))));
}

#[test]
fn test_malformed_json_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("subscription.json");
    fs::write(&path, "{ not json").unwrap();

    let result = SubscriptionSettings::from_json_file(&path);
    assert!(matches!(result, Err(SubscriptionError::Config(_))));
}
