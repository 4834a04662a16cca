//! Loads `wakeup.json` into a validated, read-only [`Config`].
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ConfigError, Error};
use crate::mac::MacAddress;

pub const DEFAULT_CONFIG_PATH: &str = "wakeup.json";
pub const DEFAULT_PORT: u16 = 443;

/// The file as written, before validation.
#[derive(Deserialize, Debug)]
struct RawConfig {
    host: Option<String>,
    port: Option<i64>,
    username: Option<String>,
    password: Option<String>,
    devices: Option<DeviceEntries>,
}

/// `devices` in file order, repeated keys included.
#[derive(Debug)]
struct DeviceEntries(Vec<(String, String)>);

impl<'de> Deserialize<'de> for DeviceEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = DeviceEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of device names to MAC addresses")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, String>()? {
                    entries.push(entry);
                }
                Ok(DeviceEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// Lower-cased device name to MAC.
    pub devices: BTreeMap<String, MacAddress>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            },
        })?;

        let raw: RawConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let config = Config::validate(raw)?;
        debug!(
            path = %path.display(),
            host = %config.host,
            port = config.port,
            devices = config.devices.len(),
            "loaded config"
        );
        Ok(config)
    }

    fn validate(raw: RawConfig) -> Result<Config, ConfigError> {
        let host = required_text("host", raw.host)?;
        let username = required_text("username", raw.username)?;

        let port = match raw.port {
            None => DEFAULT_PORT,
            Some(port) => u16::try_from(port)
                .ok()
                .filter(|&p| p != 0)
                .ok_or_else(|| ConfigError::InvalidField {
                    field: "port",
                    reason: format!("{port} is not between 1 and 65535"),
                })?,
        };

        let raw_devices = raw.devices.ok_or(ConfigError::MissingField("devices"))?;
        let mut devices = BTreeMap::new();
        for (name, mac) in raw_devices.0 {
            let key = name.trim().to_lowercase();
            if key.is_empty() {
                return Err(ConfigError::InvalidField {
                    field: "devices",
                    reason: "device names must not be empty".to_string(),
                });
            }

            let address = mac.parse::<MacAddress>().map_err(|source| ConfigError::InvalidMac {
                device: name.clone(),
                mac: mac.clone(),
                source,
            })?;

            if devices.insert(key, address).is_some() {
                return Err(ConfigError::DuplicateDevice(name));
            }
        }

        Ok(Config {
            host,
            port,
            username,
            password: raw.password.filter(|p| !p.is_empty()),
            devices,
        })
    }

    /// Looks a device up by name, ignoring case.
    pub fn device(&self, name: &str) -> Result<MacAddress, Error> {
        self.devices
            .get(&name.trim().to_lowercase())
            .copied()
            .ok_or_else(|| Error::UnknownDevice {
                name: name.to_string(),
                available: self
                    .devices
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

fn required_text(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    let value = value.ok_or(ConfigError::MissingField(field))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::InvalidField {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(value.to_string())
}

#[cfg(test)]
fn load_str(json: &str) -> Result<Config, ConfigError> {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    Config::load(file.path())
}

#[test]
fn test_load_full_config() {
    let config = load_str(
        r#"{
            "host": "fritz.box",
            "port": 8443,
            "username": "admin",
            "password": "secret",
            "devices": { "Desktop": "aa-bb-cc-dd-ee-ff", "nas": "00:11:22:33:44:55" }
        }"#,
    )
    .unwrap();

    assert_eq!(config.host, "fritz.box");
    assert_eq!(config.port, 8443);
    assert_eq!(config.username, "admin");
    assert_eq!(config.password.as_deref(), Some("secret"));

    let devices: Vec<(String, String)> = config
        .devices
        .iter()
        .map(|(name, mac)| (name.clone(), mac.to_string()))
        .collect();
    assert_eq!(
        devices,
        vec![
            ("desktop".to_string(), "AA:BB:CC:DD:EE:FF".to_string()),
            ("nas".to_string(), "00:11:22:33:44:55".to_string()),
        ]
    );
}

#[test]
fn test_port_defaults_and_empty_password_prompts() {
    let config = load_str(
        r#"{ "host": "192.168.178.1", "username": "u", "password": "", "devices": {} }"#,
    )
    .unwrap();

    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.password, None);
}

#[test]
fn test_missing_required_fields() {
    for (json, field) in [
        (r#"{ "username": "u", "devices": {} }"#, "host"),
        (r#"{ "host": "h", "devices": {} }"#, "username"),
        (r#"{ "host": "h", "username": "u" }"#, "devices"),
    ] {
        match load_str(json) {
            Err(ConfigError::MissingField(missing)) => assert_eq!(missing, field),
            other => panic!("expected missing {field}, got {other:?}"),
        }
    }
}

#[test]
fn test_empty_host_is_rejected() {
    assert!(matches!(
        load_str(r#"{ "host": "  ", "username": "u", "devices": {} }"#),
        Err(ConfigError::InvalidField { field: "host", .. })
    ));
}

#[test]
fn test_port_out_of_range() {
    for port in ["0", "65536", "-1"] {
        let json = format!(r#"{{ "host": "h", "port": {port}, "username": "u", "devices": {{}} }}"#);
        assert!(matches!(
            load_str(&json),
            Err(ConfigError::InvalidField { field: "port", .. })
        ));
    }
}

#[test]
fn test_invalid_mac_names_the_device() {
    match load_str(r#"{ "host": "h", "username": "u", "devices": { "pc": "aa:bb:cc:dd:ee" } }"#) {
        Err(ConfigError::InvalidMac { device, mac, .. }) => {
            assert_eq!(device, "pc");
            assert_eq!(mac, "aa:bb:cc:dd:ee");
        }
        other => panic!("expected invalid MAC, got {other:?}"),
    }
}

#[test]
fn test_names_colliding_by_case() {
    let json = r#"{ "host": "h", "username": "u",
        "devices": { "PC": "aa:bb:cc:dd:ee:ff", "pc": "aa:bb:cc:dd:ee:00" } }"#;
    assert!(matches!(load_str(json), Err(ConfigError::DuplicateDevice(_))));
}

#[test]
fn test_repeated_name_is_rejected() {
    let json = r#"{ "host": "h", "username": "u",
        "devices": { "pc": "aa:bb:cc:dd:ee:ff", "pc": "aa:bb:cc:dd:ee:00" } }"#;
    match load_str(json) {
        Err(ConfigError::DuplicateDevice(name)) => assert_eq!(name, "pc"),
        other => panic!("expected duplicate device, got {other:?}"),
    }
}

#[test]
fn test_padded_mac_is_rejected() {
    let json = r#"{ "host": "h", "username": "u", "devices": { "pc": " aa:bb:cc:dd:ee:ff" } }"#;
    assert!(matches!(load_str(json), Err(ConfigError::InvalidMac { .. })));
}

#[test]
fn test_malformed_and_missing_files() {
    assert!(matches!(load_str("{ not json"), Err(ConfigError::Malformed { .. })));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Config::load(&dir.path().join("wakeup.json")),
        Err(ConfigError::NotFound(_))
    ));
}

#[test]
fn test_device_lookup_ignores_case() {
    let config = load_str(
        r#"{ "host": "h", "username": "u", "devices": { "Desktop": "aa-bb-cc-dd-ee-ff", "nas": "00:11:22:33:44:55" } }"#,
    )
    .unwrap();

    assert_eq!(config.device("DESKTOP").unwrap().to_string(), "AA:BB:CC:DD:EE:FF");
    match config.device("laptop") {
        Err(Error::UnknownDevice { name, available }) => {
            assert_eq!(name, "laptop");
            assert_eq!(available, "desktop, nas");
        }
        other => panic!("expected unknown device, got {other:?}"),
    }
}
