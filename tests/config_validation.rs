//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use control_channel::config::{ControlChannelConfig, WrapModeConfig};
use control_channel::protocol::tls_crypt::{V2ClientKey, V2ServerKey};
use control_channel::utils::static_key::{KeyDirection, StaticKey};
use control_channel::{TlsAuthStandalone, WrapMode};
use std::path::PathBuf;
use tracing::Level;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("control-channel-{}-{name}", std::process::id()))
}

#[test]
fn test_default_config_validates() {
    let config = ControlChannelConfig::default();
    let errors = config.validate();
    assert!(
        errors.iter().all(|e| e.starts_with("WARNING:")),
        "Default config should only warn, but got errors: {:?}",
        errors
    );
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_unwrapped_channel_warns() {
    let config = ControlChannelConfig::default();
    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("WARNING: Control channel is not wrapped")));
}

#[test]
fn test_auth_without_key() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.wrap.mode = WrapModeConfig::Auth;
    });

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Static key must be given as a file or inline")));
    assert!(config.validate_strict().is_err());
}

#[test]
fn test_missing_key_file() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.wrap.mode = WrapModeConfig::Crypt;
        c.wrap.key_file = Some("/nonexistent/ta.key".to_string());
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("file does not exist")));
}

#[test]
fn test_empty_inline_key() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.wrap.mode = WrapModeConfig::Auth;
        c.wrap.key_inline = Some("   ".to_string());
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("given inline is empty")));
}

#[test]
fn test_unknown_digest_and_cipher() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.wrap.mode = WrapModeConfig::Auth;
        c.wrap.key_inline = Some(StaticKey::generate().unwrap().to_text());
        c.wrap.auth_digest = "MD4".to_string();
    });
    assert!(!config.validate().is_empty());

    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.wrap.mode = WrapModeConfig::Crypt;
        c.wrap.key_inline = Some(StaticKey::generate().unwrap().to_text());
        c.wrap.crypt_cipher = "DES-CBC".to_string();
    });
    assert!(!config.validate().is_empty());
}

#[test]
fn test_both_mtus_set() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.frame.link_mtu = Some(1500);
        c.frame.tun_mtu = Some(1500);
    });

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Only one of link_mtu and tun_mtu may be set")));
}

#[test]
fn test_no_mtu_set() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.frame.tun_mtu = None;
    });

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("One of link_mtu and tun_mtu must be set")));
}

#[test]
fn test_tiny_mtu() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.frame.tun_mtu = Some(64);
    });
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("TUN MTU too small")));

    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.frame.tun_mtu = None;
        c.frame.link_mtu = Some(99);
    });
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Link MTU too small")));
}

#[test]
fn test_excessive_mssfix() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.frame.mssfix = 70_000;
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("mssfix too large")));
}

#[test]
fn test_replay_window_bounds() {
    for size in [0, 65_537] {
        let config = ControlChannelConfig::default_with_overrides(|c| {
            c.replay.window_size = size;
        });
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| e.contains("Invalid replay window size")));
    }
}

#[test]
fn test_empty_app_name() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.logging.app_name = String::new();
    });

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_no_logging_output() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.logging.log_to_console = false;
        c.logging.log_to_file = false;
    });

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_log_to_file_without_path() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.logging.log_to_file = true;
        c.logging.log_file_path = None;
    });

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_wrap_mode_names() {
    assert_eq!(WrapModeConfig::from_name("tls-auth").unwrap(), WrapModeConfig::Auth);
    assert_eq!(WrapModeConfig::from_name("CRYPT").unwrap(), WrapModeConfig::Crypt);
    assert_eq!(WrapModeConfig::from_name("tls-crypt-v2").unwrap(), WrapModeConfig::CryptV2);
    assert!(WrapModeConfig::from_name("secretbox").is_err());
}

#[test]
fn test_from_toml() {
    let key = StaticKey::generate().unwrap();
    let text = format!(
        r#"
[wrap]
mode = "auth"
auth_digest = "SHA1"
key_direction = "inverse"
key_inline = """
{}"""

[frame]
link_mtu = 1400
mssfix = 0

[replay]
window_size = 128
"#,
        key.to_text()
    );

    let config = ControlChannelConfig::from_toml(&text).expect("Should parse");
    assert_eq!(config.wrap.mode, WrapModeConfig::Auth);
    assert_eq!(config.wrap.key_direction, KeyDirection::Inverse);
    assert_eq!(config.frame.link_mtu, Some(1400));
    assert_eq!(config.frame.tun_mtu, None);
    assert_eq!(config.replay.window_size, 128);
    assert_eq!(config.logging.log_level, Level::INFO);
    assert!(config.validate_strict().is_ok());

    let tas = TlsAuthStandalone::from_config(&config).expect("Should build");
    assert_eq!(tas.tls_wrap().mode(), WrapMode::Auth);
    assert_eq!(tas.tls_wrap().replay_window().size(), 128);
    assert!(tas.frame().is_defined());
}

#[test]
fn test_invalid_toml() {
    let result = ControlChannelConfig::from_toml("[wrap]\nmode = \"rot13\"\n");
    assert!(result.is_err());
}

#[test]
fn test_example_config_roundtrip() {
    let text = ControlChannelConfig::example_config();
    let config = ControlChannelConfig::from_toml(&text).expect("Example config should parse");
    assert_eq!(config.frame.tun_mtu, Some(1500));
    assert_eq!(config.frame.link_mtu, None);
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_save_and_load() {
    let path = temp_path("saved.toml");
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.replay.window_size = 256;
        c.logging.log_level = Level::DEBUG;
    });
    config.save_to_file(&path).expect("Should save");

    let loaded = ControlChannelConfig::from_file(&path).expect("Should load");
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.replay.window_size, 256);
    assert_eq!(loaded.logging.log_level, Level::DEBUG);
}

#[test]
fn test_from_missing_file() {
    assert!(ControlChannelConfig::from_file("/nonexistent/control-channel.toml").is_err());
}

#[test]
fn test_standalone_from_key_file() {
    let path = temp_path("ta.key");
    std::fs::write(&path, StaticKey::generate().unwrap().to_text()).unwrap();

    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.wrap.mode = WrapModeConfig::Crypt;
        c.wrap.key_file = Some(path.to_string_lossy().into_owned());
    });
    let tas = TlsAuthStandalone::from_config(&config);
    std::fs::remove_file(&path).ok();

    let tas = tas.expect("Should build from key file");
    assert_eq!(tas.tls_wrap().mode(), WrapMode::Crypt);
}

#[test]
fn test_standalone_crypt_v2() {
    let server_key = V2ServerKey::generate().unwrap();
    let client_key = V2ClientKey::generate(&server_key, b"").unwrap();

    let server = ControlChannelConfig::default_with_overrides(|c| {
        c.wrap.mode = WrapModeConfig::CryptV2;
        c.wrap.v2_server_key_inline = Some(server_key.to_pem());
    });
    let tas = TlsAuthStandalone::from_config(&server).expect("Server should build");
    assert!(tas.tls_wrap().has_v2_server_key());
    assert_eq!(tas.tls_wrap().mode(), WrapMode::None);

    let client = ControlChannelConfig::default_with_overrides(|c| {
        c.wrap.mode = WrapModeConfig::CryptV2;
        c.wrap.server = false;
        c.wrap.v2_client_key_inline = Some(client_key.to_pem());
    });
    let tas = TlsAuthStandalone::from_config(&client).expect("Client should build");
    assert_eq!(tas.tls_wrap().mode(), WrapMode::Crypt);
}

#[test]
fn test_standalone_rejects_invalid_config() {
    let config = ControlChannelConfig::default_with_overrides(|c| {
        c.frame.tun_mtu = None;
    });
    assert!(TlsAuthStandalone::from_config(&config).is_err());
}
