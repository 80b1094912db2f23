//! Configuration system for the beacon service.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BEACON_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/beacon/config.toml
//!   3. ~/.config/beacon/config.toml

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::addr::{IfId, IsdAs, LinkType};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub general: GeneralConfig,
    pub keys: KeysConfig,
    pub beaconing: BeaconingConfig,
    pub ifstate: IfStateConfig,
    pub api: ApiConfig,
    /// Static topology: one entry per inter-domain link.
    pub interfaces: Vec<InterfaceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// The local ISD-AS.
    pub ia: IsdAs,
    /// Core ASes originate beacons and register core segments.
    pub core: bool,
    /// MTU advertised in our AS entries. 0 = unset (extension fails).
    pub mtu: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Hex master secret for hop MACs. Auto-generated on first run.
    pub master_secret_path: PathBuf,
    /// Hex Ed25519 secret for AS entry signatures. Auto-generated on first run.
    pub signing_key_path: PathBuf,
}

/// Which hop authentication scheme the extenders use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacScheme {
    /// 3-byte MACs chained over the packed previous hop field.
    Legacy,
    /// 6-byte MACs chained over the rolling segment-id value.
    Current,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconingConfig {
    pub scheme: MacScheme,
    /// Relative expiration put into every hop field we create.
    pub max_exp_time: u8,
    pub originate_interval_secs: u64,
    pub propagate_interval_secs: u64,
    pub register_interval_secs: u64,
    /// How often expired beacons are purged from the store.
    pub expiry_check_interval_secs: u64,
    /// Beacons kept per origin AS when selecting.
    pub best_set_size: usize,
    /// Beacons longer than this are filtered before storage.
    pub max_hops: usize,
    /// Capacity of every beacon result channel.
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IfStateConfig {
    pub keepalive_interval_secs: u64,
    /// Active interfaces without a keepalive for this long expire.
    pub keepalive_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Status API port on 127.0.0.1. 0 = disabled.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub ifid: IfId,
    pub link_type: LinkType,
    pub remote_ia: IsdAs,
    pub remote_ifid: IfId,
    pub mtu: u16,
    /// Local underlay address for this link.
    pub local_addr: SocketAddr,
    /// Underlay address of the remote border router.
    pub remote_addr: SocketAddr,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            keys: KeysConfig::default(),
            beaconing: BeaconingConfig::default(),
            ifstate: IfStateConfig::default(),
            api: ApiConfig::default(),
            interfaces: Vec::new(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            ia: IsdAs::WILDCARD,
            core: false,
            mtu: 1472,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            master_secret_path: config_dir().join("master.key"),
            signing_key_path: config_dir().join("signing.key"),
        }
    }
}

impl Default for BeaconingConfig {
    fn default() -> Self {
        Self {
            scheme: MacScheme::Current,
            max_exp_time: 63, // ~6 hours
            originate_interval_secs: 5,
            propagate_interval_secs: 5,
            register_interval_secs: 5,
            expiry_check_interval_secs: 30,
            best_set_size: 20,
            max_hops: 32,
            channel_capacity: 64,
        }
    }
}

impl Default for IfStateConfig {
    fn default() -> Self {
        Self {
            keepalive_interval_secs: 1,
            keepalive_timeout_secs: 3,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 30252 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("beacon")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BeaconConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            BeaconConfig::default()
        };
        config.apply_env_overrides();
        config.check()?;
        Ok(config)
    }

    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BEACON_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&BeaconConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject topologies the services cannot work with.
    pub fn check(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for intf in &self.interfaces {
            if intf.ifid == 0 {
                return Err(ConfigError::Invalid("interface id 0 is reserved".into()));
            }
            if !seen.insert(intf.ifid) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate interface id {}",
                    intf.ifid
                )));
            }
        }
        if self.beaconing.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Apply BEACON_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BEACON_GENERAL__IA") {
            if let Ok(ia) = v.parse() {
                self.general.ia = ia;
            }
        }
        if let Ok(v) = std::env::var("BEACON_GENERAL__CORE") {
            self.general.core = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("BEACON_GENERAL__MTU") {
            if let Ok(mtu) = v.parse() {
                self.general.mtu = mtu;
            }
        }
        if let Ok(v) = std::env::var("BEACON_BEACONING__SCHEME") {
            match v.as_str() {
                "legacy" => self.beaconing.scheme = MacScheme::Legacy,
                "current" => self.beaconing.scheme = MacScheme::Current,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("BEACON_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [general]
        ia = "1-ff00:0:110"
        core = true
        mtu = 1400

        [beaconing]
        scheme = "legacy"
        max_exp_time = 10

        [[interfaces]]
        ifid = 5
        link_type = "child"
        remote_ia = "1-ff00:0:111"
        remote_ifid = 1
        mtu = 1280
        local_addr = "127.0.0.1:50000"
        remote_addr = "127.0.0.1:50001"
    "#;

    #[test]
    fn default_config_uses_current_scheme() {
        let config = BeaconConfig::default();
        assert_eq!(config.beaconing.scheme, MacScheme::Current);
        assert!(!config.general.core);
        assert!(config.interfaces.is_empty());
        assert!(config.check().is_ok());
    }

    #[test]
    fn parses_sample_with_partial_sections() {
        let config: BeaconConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.general.ia.to_string(), "1-ff00:0:110");
        assert!(config.general.core);
        assert_eq!(config.beaconing.scheme, MacScheme::Legacy);
        assert_eq!(config.beaconing.max_exp_time, 10);
        // unspecified fields keep their defaults
        assert_eq!(config.beaconing.best_set_size, 20);
        assert_eq!(config.interfaces.len(), 1);
        assert_eq!(config.interfaces[0].link_type, LinkType::Child);
    }

    #[test]
    fn check_rejects_reserved_and_duplicate_ifids() {
        let mut config: BeaconConfig = toml::from_str(SAMPLE).unwrap();
        let dup = config.interfaces[0].clone();
        config.interfaces.push(dup);
        assert!(matches!(config.check(), Err(ConfigError::Invalid(_))));

        config.interfaces.truncate(1);
        config.interfaces[0].ifid = 0;
        assert!(matches!(config.check(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn default_config_survives_toml_roundtrip() {
        let text = toml::to_string_pretty(&BeaconConfig::default()).unwrap();
        let back: BeaconConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.api.port, BeaconConfig::default().api.port);
        assert_eq!(back.general.ia, IsdAs::WILDCARD);
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir()
            .join(format!("beacon-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        // Set env to point to our temp path
        unsafe {
            std::env::set_var("BEACON_CONFIG", config_path.to_str().unwrap());
        }

        let path = BeaconConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = BeaconConfig::load().expect("load should succeed");
        assert_eq!(config.beaconing.scheme, MacScheme::Current);

        unsafe {
            std::env::remove_var("BEACON_CONFIG");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
