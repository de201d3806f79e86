use crate::config::{DEFAULT_SOCKET_PATH, GypsyConfig};
use std::path::PathBuf;

#[test]
fn empty_config_uses_defaults() {
    let config = GypsyConfig::from_json("{}").unwrap();
    assert_eq!(config, GypsyConfig::default());
    assert!(config.allowed_device_globs.is_empty());
    assert!(!config.auto_terminate);
    assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
}

#[test]
fn parse_complete_config() {
    let config = GypsyConfig::from_json(
        r#"
        {
            "allowed_device_globs": ["/dev/tty*", "bluetooth"],
            "auto_terminate": true,
            "socket_path": "/tmp/gypsy.sock",
            "nmea_log": "/var/log/nmea"
        }
        "#,
    )
    .unwrap_or_else(|e| panic!("Failed to parse config. Reason: {e}"));
    assert_eq!(config.allowed_device_globs, vec!["/dev/tty*", "bluetooth"]);
    assert!(config.auto_terminate);
    assert_eq!(config.socket_path, PathBuf::from("/tmp/gypsy.sock"));
    assert_eq!(config.nmea_log, Some(PathBuf::from("/var/log/nmea")));
}

#[test]
fn reject_malformed_config() {
    assert!(GypsyConfig::from_json(r#"{ "allowed_device_globs": "/dev/tty*" }"#).is_err());
}

#[test]
fn report_missing_config_file() {
    let err = GypsyConfig::load(std::path::Path::new("/nonexistent/gypsy.json")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/gypsy.json"));
}
