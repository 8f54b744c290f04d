//! Core infrastructure tests.

mod common;

use groupcast::{Connection, GcsConfig, GcsError, TlsOptions};
use std::io::Write;
use tempfile::NamedTempFile;

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_config_file() {
    let config_content = r#"
packet_size = 8192
recv_queue_cap = 128
fc_upper = 64
fc_lower = 32

[log]
level = "debug"
self_timestamp = false
"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(config_content.as_bytes()).unwrap();

    let config = GcsConfig::from_file(file.path()).unwrap();
    assert_eq!(config.packet_size, 8192);
    assert_eq!(config.recv_queue_cap, 128);
    assert_eq!(config.log.level, "debug");
    assert!(!config.log.self_timestamp);
}

#[test]
fn watermarks_must_fit_queue() {
    let result = GcsConfig::from_toml("recv_queue_cap = 16\nfc_upper = 64\nfc_lower = 8\n");
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("fc_upper"));
}

#[test]
fn bad_log_level_rejected() {
    let result = GcsConfig::from_toml("[log]\nlevel = \"loud\"\n");
    assert!(result.is_err());
}

#[test]
fn tls_requires_cert_and_key_pair() {
    let mut config = GcsConfig::default();
    config.tls = Some(TlsOptions {
        verify_path: None,
        cert_path: Some("cert.pem".into()),
        key_path: None,
        password_file: None,
    });
    assert!(config.validate().is_err());
}

// ============================================================================
// Connection lifecycle tests
// ============================================================================

#[test]
fn create_rejects_malformed_url() {
    assert!(matches!(
        Connection::create("nonsense", GcsConfig::default()),
        Err(GcsError::InvalidUrl(_))
    ));
    assert!(matches!(
        Connection::create("tcp://somewhere", GcsConfig::default()),
        Err(GcsError::UnsupportedScheme(_))
    ));
}

#[test]
fn external_driver_reported_at_open() {
    let conn = Connection::create("spread://localhost:4803", GcsConfig::default()).unwrap();
    assert!(matches!(
        conn.open("c"),
        Err(GcsError::BackendUnavailable(_))
    ));
}

#[test]
fn init_is_rejected_while_open() {
    let channel = common::unique_channel("init-busy");
    let conn = common::open_node("a", &channel, GcsConfig::default());

    assert!(matches!(
        conn.init(3, uuid::Uuid::nil()),
        Err(GcsError::Busy(_))
    ));
    conn.close().unwrap();
    conn.init(3, uuid::Uuid::nil()).unwrap();
}

#[test]
fn operations_require_open_connection() {
    let conn = Connection::create("dummy://", GcsConfig::default()).unwrap();
    assert!(matches!(conn.recv(), Err(GcsError::NotConnected)));
    assert!(matches!(
        conn.repl(bytes::Bytes::from_static(b"x")),
        Err(GcsError::NotConnected)
    ));
    assert!(matches!(conn.congested(), Err(GcsError::NotConnected)));
    assert!(matches!(conn.close(), Err(GcsError::NotConnected)));
}
