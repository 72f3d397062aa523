//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use packet_relay::config::{ListenerConfig, LoggingConfig, ProxyConfig, WorldRoute};
use std::path::PathBuf;
use tracing::Level;

fn valid() -> ProxyConfig {
    ProxyConfig::default_with_overrides(|c| {
        c.listeners = vec![ListenerConfig::new(
            "login",
            "127.0.0.1:6600",
            "login.example.net:6600",
        )];
    })
}

#[test]
fn test_minimal_config_validates() {
    let errors = valid().validate();
    assert!(
        errors.is_empty(),
        "Minimal config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_default_config_needs_a_listener() {
    let errors = ProxyConfig::default().validate();
    assert!(errors.iter().any(|e| e.contains("At least one listener")));
}

#[test]
fn test_invalid_listen_address() {
    let mut config = valid();
    config.listeners[0].listen_address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid listen address")));
}

#[test]
fn test_remote_needs_port() {
    let mut config = valid();
    config.listeners[0].remote_address = "login.example.net".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid remote address")));
}

#[test]
fn test_duplicate_listeners() {
    let mut config = valid();
    config
        .listeners
        .push(ListenerConfig::new("login", "127.0.0.1:6600", "other.example.net:1"));

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Duplicate listener name")));
    assert!(errors.iter().any(|e| e.contains("Duplicate listen address")));
}

#[test]
fn test_empty_schema_path() {
    let mut config = valid();
    config.schema.path = PathBuf::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Schema path cannot be empty")));
}

#[test]
fn test_redirect_listener_must_exist() {
    let mut config = valid();
    config.redirect.login_listener = Some("auth".to_string());

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("'auth' is not configured")));
}

#[test]
fn test_world_routes_need_login_listener() {
    let mut config = valid();
    config.redirect.worlds = vec![WorldRoute::new("worldIP1", "127.0.0.1:6610")];

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("World routes require redirect.login_listener")));
}

#[test]
fn test_world_route_address_and_duplicates() {
    let mut config = valid();
    config.redirect.login_listener = Some("login".to_string());
    config.redirect.worlds = vec![
        WorldRoute::new("worldIP1", "not-an-address"),
        WorldRoute::new("worldIP1", "127.0.0.1:6611"),
    ];

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid world local address")));
    assert!(errors.iter().any(|e| e.contains("Duplicate world route field")));
}

#[test]
fn test_log_file_without_path() {
    let mut config = valid();
    config.logging = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_log_output() {
    let mut config = valid();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_lists_every_error() {
    let mut config = valid();
    config.listeners[0].listen_address = String::new();
    config.schema.path = PathBuf::new();

    let err = config.validate_strict().unwrap_err().to_string();
    assert!(err.contains("listen address cannot be empty"), "{err}");
    assert!(err.contains("Schema path cannot be empty"), "{err}");
}

#[test]
fn test_from_toml_with_sections() {
    let config = ProxyConfig::from_toml(
        r#"
        [[listeners]]
        name = "login"
        listen_address = "127.0.0.1:6600"
        remote_address = "203.0.113.10:6600"

        [schema]
        path = "data/schema.toml"

        [keystream]
        directory = "data/keystream"
        initial_table = 31
        table_version = 31

        [redirect]
        login_listener = "login"
        worlds = [{ field = "worldIP1", local_address = "127.0.0.1:6610" }]
        "#,
    )
    .unwrap();

    assert_eq!(config.listeners.len(), 1);
    assert_eq!(config.keystream.initial_table, Some(31));
    assert_eq!(config.keystream.table_version, Some(31));
    assert_eq!(config.redirect.server_name_suffix, "(Proxy)");
    assert!(config.redirect.spawn_world_listeners);
    assert_eq!(config.logging.log_level, Level::INFO);
    assert!(config.validate().is_empty(), "{:?}", config.validate());
}

#[test]
fn test_malformed_toml_is_config_error() {
    let err = ProxyConfig::from_toml("[[listeners]]\nname = 5").unwrap_err();
    assert!(err.to_string().contains("Failed to parse TOML"));
}

#[test]
fn test_example_config_parses_and_validates() {
    let example = ProxyConfig::example_config();
    let config = ProxyConfig::from_toml(&example).unwrap();
    assert!(config.validate().is_empty(), "{:?}", config.validate());
    assert_eq!(config.redirect.worlds.len(), 2);
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.toml");
    let config = valid();
    config.save_to_file(&path).unwrap();

    let loaded = ProxyConfig::from_file(&path).unwrap();
    assert_eq!(loaded.listeners, config.listeners);
    assert_eq!(loaded.schema.path, config.schema.path);
}
