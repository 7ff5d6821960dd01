//! # Configuration Management
//!
//! Configuration for the control-channel core: the wrap mode and its key
//! material, the frame geometry inputs, the replay window and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides (`CONTROL_CHANNEL_*`)
//!
//! ## Security Considerations
//! - Key material may be given inline; inline keys end up in serialized
//!   configs, so prefer key files outside of tests
//! - A plain (unwrapped) control channel is accepted but reported by
//!   `validate()` as a warning

use crate::core::frame::{FrameOptions, MtuSpec, TransportProto, MSSFIX_DEFAULT, TUN_MTU_DEFAULT, TUN_MTU_MIN};
use crate::error::{ProtocolError, Result};
use crate::protocol::tls_crypt::{CryptCipher, V2ClientKey, V2ServerKey};
use crate::utils::crypto::{Digest, KeyType};
use crate::utils::replay_window::{DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE};
use crate::utils::static_key::{KeyDirection, StaticKey};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Default HMAC digest for tls-auth
pub const DEFAULT_AUTH_DIGEST: &str = "SHA256";

/// Default tls-crypt cipher suite
pub const DEFAULT_CRYPT_CIPHER: &str = "AES-256-CTR";

/// Data channel cipher assumed for MSS clamping
pub const DEFAULT_DATA_CIPHER: &str = "AES-256-GCM";

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ControlChannelConfig {
    /// Control record wrapping
    #[serde(default)]
    pub wrap: WrapConfig,

    /// Frame geometry
    #[serde(default)]
    pub frame: FrameConfig,

    /// Replay protection
    #[serde(default)]
    pub replay: ReplayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ControlChannelConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(mode) = std::env::var("CONTROL_CHANNEL_WRAP_MODE") {
            config.wrap.mode = WrapModeConfig::from_name(&mode)?;
        }

        if let Ok(path) = std::env::var("CONTROL_CHANNEL_KEY_FILE") {
            config.wrap.key_file = Some(path);
        }

        if let Ok(direction) = std::env::var("CONTROL_CHANNEL_KEY_DIRECTION") {
            config.wrap.key_direction = KeyDirection::from_name(&direction)?;
        }

        if let Ok(path) = std::env::var("CONTROL_CHANNEL_V2_SERVER_KEY_FILE") {
            config.wrap.v2_server_key_file = Some(path);
        }

        if let Ok(mtu) = std::env::var("CONTROL_CHANNEL_TUN_MTU") {
            if let Ok(val) = mtu.parse::<usize>() {
                config.frame.tun_mtu = Some(val);
                config.frame.link_mtu = None;
            }
        }

        // a link MTU replaces the tunnel MTU, never both
        if let Ok(mtu) = std::env::var("CONTROL_CHANNEL_LINK_MTU") {
            if let Ok(val) = mtu.parse::<usize>() {
                config.frame.link_mtu = Some(val);
                config.frame.tun_mtu = None;
            }
        }

        if let Ok(size) = std::env::var("CONTROL_CHANNEL_REPLAY_WINDOW") {
            if let Ok(val) = size.parse::<usize>() {
                config.replay.window_size = val;
            }
        }

        if let Ok(level) = std::env::var("CONTROL_CHANNEL_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                config.logging.log_level = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    /// Entries starting with `WARNING:` do not make the configuration unusable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.wrap.validate());
        errors.extend(self.frame.validate());
        errors.extend(self.replay.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result, ignoring warnings
    pub fn validate_strict(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|e| !e.starts_with("WARNING:"))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Wrap mode as written in configuration files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WrapModeConfig {
    #[default]
    None,
    Auth,
    Crypt,
    /// tls-crypt with client-specific keys
    CryptV2,
}

impl WrapModeConfig {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "auth" | "tls-auth" => Ok(Self::Auth),
            "crypt" | "tls-crypt" => Ok(Self::Crypt),
            "crypt-v2" | "tls-crypt-v2" => Ok(Self::CryptV2),
            other => Err(ProtocolError::ConfigError(format!("Unknown wrap mode: {other}"))),
        }
    }
}

/// Control record wrapping configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WrapConfig {
    pub mode: WrapModeConfig,

    /// HMAC digest for `auth` mode
    pub auth_digest: String,

    /// Cipher suite for `crypt` and `crypt-v2` modes
    pub crypt_cipher: String,

    /// Static key file for `auth` and `crypt` modes
    pub key_file: Option<String>,

    /// Static key text, takes precedence over `key_file`
    pub key_inline: Option<String>,

    /// Key direction for `auth` mode
    pub key_direction: KeyDirection,

    /// Server side of the channel; selects the tls-crypt key direction
    pub server: bool,

    pub v2_server_key_file: Option<String>,
    pub v2_server_key_inline: Option<String>,
    pub v2_client_key_file: Option<String>,
    pub v2_client_key_inline: Option<String>,
}

impl Default for WrapConfig {
    fn default() -> Self {
        Self {
            mode: WrapModeConfig::None,
            auth_digest: String::from(DEFAULT_AUTH_DIGEST),
            crypt_cipher: String::from(DEFAULT_CRYPT_CIPHER),
            key_file: None,
            key_inline: None,
            key_direction: KeyDirection::default(),
            server: true,
            v2_server_key_file: None,
            v2_server_key_inline: None,
            v2_client_key_file: None,
            v2_client_key_inline: None,
        }
    }
}

impl WrapConfig {
    /// Validate wrap configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.mode {
            WrapModeConfig::None => {
                errors.push(
                    "WARNING: Control channel is not wrapped - not recommended for production"
                        .to_string(),
                );
            }
            WrapModeConfig::Auth => {
                if let Err(e) = Digest::from_name(&self.auth_digest) {
                    errors.push(e.to_string());
                }
                errors.extend(key_source_errors("Static key", &self.key_file, &self.key_inline));
            }
            WrapModeConfig::Crypt => {
                if let Err(e) = CryptCipher::from_name(&self.crypt_cipher) {
                    errors.push(e.to_string());
                }
                errors.extend(key_source_errors("Static key", &self.key_file, &self.key_inline));
            }
            WrapModeConfig::CryptV2 => {
                if let Err(e) = CryptCipher::from_name(&self.crypt_cipher) {
                    errors.push(e.to_string());
                }
                if self.server {
                    errors.extend(key_source_errors(
                        "tls-crypt-v2 server key",
                        &self.v2_server_key_file,
                        &self.v2_server_key_inline,
                    ));
                } else {
                    errors.extend(key_source_errors(
                        "tls-crypt-v2 client key",
                        &self.v2_client_key_file,
                        &self.v2_client_key_inline,
                    ));
                }
            }
        }

        errors
    }

    /// The static key for `auth` and `crypt` modes
    pub fn static_key(&self) -> Result<StaticKey> {
        match (&self.key_inline, &self.key_file) {
            (Some(text), _) => StaticKey::parse(text),
            (None, Some(path)) => StaticKey::from_file(path),
            (None, None) => Err(ProtocolError::ConfigError("No static key configured".to_string())),
        }
    }

    pub fn v2_server_key(&self) -> Result<V2ServerKey> {
        match (&self.v2_server_key_inline, &self.v2_server_key_file) {
            (Some(text), _) => V2ServerKey::from_pem(text),
            (None, Some(path)) => V2ServerKey::from_file(path),
            (None, None) => Err(ProtocolError::ConfigError(
                "No tls-crypt-v2 server key configured".to_string(),
            )),
        }
    }

    pub fn v2_client_key(&self) -> Result<V2ClientKey> {
        match (&self.v2_client_key_inline, &self.v2_client_key_file) {
            (Some(text), _) => V2ClientKey::from_pem(text),
            (None, Some(path)) => V2ClientKey::from_file(path),
            (None, None) => Err(ProtocolError::ConfigError(
                "No tls-crypt-v2 client key configured".to_string(),
            )),
        }
    }
}

fn key_source_errors(what: &str, file: &Option<String>, inline: &Option<String>) -> Vec<String> {
    let mut errors = Vec::new();
    match (inline, file) {
        (Some(text), _) if text.trim().is_empty() => {
            errors.push(format!("{what} given inline is empty"));
        }
        (Some(_), _) => {}
        (None, Some(path)) => {
            if !Path::new(path).exists() {
                errors.push(format!("{what} file does not exist: {path}"));
            }
        }
        (None, None) => {
            errors.push(format!("{what} must be given as a file or inline"));
        }
    }
    errors
}

/// Frame geometry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Explicit link MTU; exclusive with `tun_mtu`
    #[serde(default)]
    pub link_mtu: Option<usize>,

    /// Explicit tunnel-device MTU; exclusive with `link_mtu`
    #[serde(default)]
    pub tun_mtu: Option<usize>,

    /// Bytes the tunnel device may exceed its MTU by (TAP devices)
    pub tun_mtu_extra: usize,

    /// Target link size for MSS clamping, 0 disables
    pub mssfix: usize,

    pub proto: TransportProto,
    pub socks_proxy: bool,
    pub use_peer_id: bool,
    pub compression: bool,
    pub fragment: bool,
    pub replay: bool,

    /// Data channel cipher used for MSS clamping
    pub cipher: String,

    /// Data channel digest used for MSS clamping
    pub auth: String,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            link_mtu: None,
            tun_mtu: Some(TUN_MTU_DEFAULT),
            tun_mtu_extra: 0,
            mssfix: MSSFIX_DEFAULT,
            proto: TransportProto::Udp,
            socks_proxy: false,
            use_peer_id: true,
            compression: false,
            fragment: false,
            replay: true,
            cipher: String::from(DEFAULT_DATA_CIPHER),
            auth: String::from(DEFAULT_AUTH_DIGEST),
        }
    }
}

impl FrameConfig {
    /// Validate frame configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match (self.link_mtu, self.tun_mtu) {
            (Some(_), Some(_)) => {
                errors.push("Only one of link_mtu and tun_mtu may be set".to_string());
            }
            (None, None) => {
                errors.push("One of link_mtu and tun_mtu must be set".to_string());
            }
            (None, Some(tun_mtu)) if tun_mtu < TUN_MTU_MIN => {
                errors.push(format!(
                    "TUN MTU too small: {tun_mtu} (minimum: {TUN_MTU_MIN})"
                ));
            }
            (Some(link_mtu), None) if link_mtu < TUN_MTU_MIN => {
                errors.push(format!(
                    "Link MTU too small: {link_mtu} (minimum: {TUN_MTU_MIN})"
                ));
            }
            _ => {}
        }

        if self.mssfix > u16::MAX as usize {
            errors.push(format!("mssfix too large: {} (maximum: 65535)", self.mssfix));
        }

        if let Err(e) = KeyType::from_names(&self.cipher, &self.auth) {
            errors.push(e.to_string());
        }

        errors
    }

    /// The configured MTU, if exactly one side is set
    pub fn mtu_spec(&self) -> Option<MtuSpec> {
        match (self.link_mtu, self.tun_mtu) {
            (Some(link_mtu), None) => Some(MtuSpec::Link(link_mtu)),
            (None, Some(tun_mtu)) => Some(MtuSpec::Tun(tun_mtu)),
            _ => None,
        }
    }

    pub fn frame_options(&self) -> FrameOptions {
        FrameOptions {
            proto: self.proto,
            socks_proxy: self.socks_proxy,
            tls_mode: true,
            use_peer_id: self.use_peer_id,
            replay: self.replay,
            compression: self.compression,
            fragment: self.fragment,
            tun_mtu: self.tun_mtu.unwrap_or(TUN_MTU_DEFAULT),
            mssfix: self.mssfix,
        }
    }
}

/// Replay protection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Packets tracked behind the highest id seen
    pub window_size: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl ReplayConfig {
    /// Validate replay configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            errors.push(format!(
                "Invalid replay window size: {} (valid range: 1-{MAX_WINDOW_SIZE})",
                self.window_size
            ));
        }
        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("control-channel"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
