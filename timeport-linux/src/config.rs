//! The TOML configuration of the daemon

use std::{
    fs::read_to_string,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use log::warn;
use serde::{Deserialize, Deserializer};
use timeport::{
    config::{ClockIdentity, DelayMechanism, FaultInterval},
    time::{Duration, Interval},
};
use timestamped_socket::interface::InterfaceName;

use crate::tracing::LogLevel;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub loglevel: LogLevel,
    #[serde(default = "default_sdo_id")]
    pub sdo_id: u16,
    #[serde(default = "default_domain")]
    pub domain: u8,
    #[serde(default, deserialize_with = "deserialize_clock_identity")]
    pub identity: Option<ClockIdentity>,
    #[serde(default = "default_priority1")]
    pub priority1: u8,
    #[serde(default = "default_priority2")]
    pub priority2: u8,
    #[serde(default)]
    pub slave_only: bool,
    #[serde(default)]
    pub path_trace: bool,
    #[serde(default = "default_true")]
    pub gm_capable: bool,
    #[serde(rename = "port")]
    pub ports: Vec<PortConfig>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PortConfig {
    pub interface: InterfaceName,
    #[serde(default, deserialize_with = "deserialize_acceptable_master_list")]
    pub acceptable_master_list: Option<Vec<ClockIdentity>>,
    #[serde(default)]
    pub hardware_clock: Option<u32>,
    #[serde(default)]
    pub network_mode: NetworkMode,
    #[serde(default = "default_announce_interval")]
    pub announce_interval: i8,
    #[serde(default = "default_sync_interval")]
    pub sync_interval: i8,
    #[serde(default = "default_announce_receipt_timeout")]
    pub announce_receipt_timeout: u8,
    #[serde(default = "default_sync_receipt_timeout")]
    pub sync_receipt_timeout: u8,
    #[serde(default)]
    pub master_only: bool,
    #[serde(default = "default_delay_asymmetry")]
    pub delay_asymmetry: i64,
    #[serde(default)]
    pub delay_mechanism: DelayType,
    #[serde(default = "default_delay_interval")]
    pub delay_interval: i8,
    #[serde(default)]
    pub gptp_profile: bool,
    #[serde(default = "default_neighbor_prop_delay_thresh")]
    pub neighbor_prop_delay_thresh: i64,
    #[serde(default = "default_min_neighbor_prop_delay")]
    pub min_neighbor_prop_delay: i64,
    #[serde(default)]
    pub freq_est_interval: i8,
    #[serde(default)]
    pub skip_sync_check: bool,
    /// Only meaningful together with the end to end delay mechanism
    #[serde(default)]
    pub hybrid_e2e: bool,
    #[serde(default = "default_fault_reset_interval")]
    pub fault_reset_interval: i16,
    #[serde(default = "default_fault_badpeernet_interval")]
    pub fault_badpeernet_interval: u32,
}

fn deserialize_acceptable_master_list<'de, D>(
    deserializer: D,
) -> Result<Option<Vec<ClockIdentity>>, D::Error>
where
    D: Deserializer<'de>,
{
    use hex::FromHex;
    use serde::de::Error;

    let raw: Vec<String> = Deserialize::deserialize(deserializer)?;
    let mut result = Vec::with_capacity(raw.len());

    for identity in raw {
        result.push(ClockIdentity(<[u8; 8]>::from_hex(identity).map_err(
            |e| D::Error::custom(format!("Invalid clock identifier: {}", e)),
        )?));
    }

    Ok(Some(result))
}

fn deserialize_clock_identity<'de, D>(deserializer: D) -> Result<Option<ClockIdentity>, D::Error>
where
    D: Deserializer<'de>,
{
    use hex::FromHex;
    use serde::de::Error;
    let raw: String = Deserialize::deserialize(deserializer)?;
    Ok(Some(ClockIdentity(<[u8; 8]>::from_hex(raw).map_err(
        |e| D::Error::custom(format!("Invalid clock identifier: {}", e)),
    )?)))
}

impl PortConfig {
    /// The core library's view of this port configuration
    pub fn as_port_config(
        &self,
        description: timeport::config::PortDescription,
    ) -> timeport::config::PortConfig<Option<Vec<ClockIdentity>>> {
        let delay_interval = Interval::from_log_2(self.delay_interval);

        timeport::config::PortConfig {
            acceptable_master_list: self.acceptable_master_list.clone(),
            announce_interval: Interval::from_log_2(self.announce_interval),
            sync_interval: Interval::from_log_2(self.sync_interval),
            announce_receipt_timeout: self.announce_receipt_timeout,
            sync_receipt_timeout: self.sync_receipt_timeout,
            master_only: self.master_only,
            delay_asymmetry: Duration::from_nanos(self.delay_asymmetry),
            delay_mechanism: match self.delay_mechanism {
                DelayType::E2E => DelayMechanism::E2E {
                    interval: delay_interval,
                },
                DelayType::P2P => DelayMechanism::P2P {
                    interval: delay_interval,
                },
                DelayType::Auto => DelayMechanism::Auto {
                    interval: delay_interval,
                },
                DelayType::None => DelayMechanism::None,
            },
            gptp_profile: self.gptp_profile,
            neighbor_prop_delay_thresh: Duration::from_nanos(self.neighbor_prop_delay_thresh),
            min_neighbor_prop_delay: Duration::from_nanos(self.min_neighbor_prop_delay),
            freq_est_interval: Interval::from_log_2(self.freq_est_interval),
            skip_sync_check: self.skip_sync_check,
            fault_reset_interval: match self.fault_reset_interval {
                -128 => FaultInterval::Asap,
                log => FaultInterval::Log(Interval::from_log_2(log.clamp(-128, 127) as i8)),
            },
            fault_badpeernet_interval: match self.fault_badpeernet_interval {
                0 => FaultInterval::Asap,
                seconds => FaultInterval::Seconds(seconds),
            },
            port_description: description,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Ipv4,
    Ipv6,
    Ethernet,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DelayType {
    #[default]
    E2E,
    P2P,
    Auto,
    None,
}

impl Config {
    /// Parse config from file
    pub fn from_file(file: &Path) -> Result<Config, ConfigError> {
        let meta = std::fs::metadata(file).map_err(ConfigError::Io)?;
        let perm = meta.permissions();

        if perm.mode() as libc::mode_t & libc::S_IWOTH != 0 {
            warn!("Unrestricted config file permissions: Others can write.");
        }

        let contents = read_to_string(file).map_err(ConfigError::Io)?;
        let config: Config = toml::de::from_str(&contents).map_err(ConfigError::Toml)?;
        config.warn_when_unreasonable();
        Ok(config)
    }

    /// Warns about unreasonable config values
    pub fn warn_when_unreasonable(&self) {
        if self.ports.is_empty() {
            warn!("No ports configured.");
        }

        if self.ports.len() > 16 {
            warn!("Too many ports are configured.");
        }

        for port in &self.ports {
            if port.hybrid_e2e && port.delay_mechanism != DelayType::E2E {
                // Documented to only work with E2E, but not enforced
                warn!(
                    "hybrid-e2e configured on interface {} which does not use \
                     the E2E delay mechanism",
                    port.interface
                );
            }

            if port.gptp_profile && port.delay_mechanism != DelayType::P2P {
                warn!(
                    "the gPTP profile on interface {} requires the P2P delay \
                     mechanism",
                    port.interface
                );
            }
        }
    }

    /// Path of the config file when none was given on the command line
    pub fn default_path() -> PathBuf {
        PathBuf::from("/etc/timeport/timeport.toml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => writeln!(f, "io error while reading config: {e}"),
            ConfigError::Toml(e) => writeln!(f, "config toml parsing error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_domain() -> u8 {
    0
}

fn default_sdo_id() -> u16 {
    0x000
}

fn default_announce_interval() -> i8 {
    1
}

fn default_sync_interval() -> i8 {
    0
}

fn default_announce_receipt_timeout() -> u8 {
    3
}

fn default_sync_receipt_timeout() -> u8 {
    3
}

fn default_priority1() -> u8 {
    128
}

fn default_priority2() -> u8 {
    128
}

fn default_delay_asymmetry() -> i64 {
    0
}

fn default_delay_interval() -> i8 {
    0
}

fn default_neighbor_prop_delay_thresh() -> i64 {
    20_000_000
}

fn default_min_neighbor_prop_delay() -> i64 {
    -20_000_000
}

fn default_fault_reset_interval() -> i16 {
    4
}

fn default_fault_badpeernet_interval() -> u32 {
    16
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use timestamped_socket::interface::InterfaceName;

    use crate::tracing::LogLevel;

    // Minimal amount of config results in default values
    #[test]
    fn minimal_config() {
        const MINIMAL_CONFIG: &str = r#"
[[port]]
interface = "enp0s31f6"
"#;

        let expected_port = crate::config::PortConfig {
            interface: InterfaceName::from_str("enp0s31f6").unwrap(),
            acceptable_master_list: None,
            hardware_clock: None,
            network_mode: crate::config::NetworkMode::Ipv4,
            announce_interval: 1,
            sync_interval: 0,
            announce_receipt_timeout: 3,
            sync_receipt_timeout: 3,
            master_only: false,
            delay_asymmetry: 0,
            delay_mechanism: crate::config::DelayType::E2E,
            delay_interval: 0,
            gptp_profile: false,
            neighbor_prop_delay_thresh: 20_000_000,
            min_neighbor_prop_delay: -20_000_000,
            freq_est_interval: 0,
            skip_sync_check: false,
            hybrid_e2e: false,
            fault_reset_interval: 4,
            fault_badpeernet_interval: 16,
        };

        let expected = crate::config::Config {
            loglevel: LogLevel::Info,
            sdo_id: 0x000,
            domain: 0,
            identity: None,
            priority1: 128,
            priority2: 128,
            slave_only: false,
            path_trace: false,
            gm_capable: true,
            ports: vec![expected_port],
        };

        let actual = toml::from_str(MINIMAL_CONFIG).unwrap();

        assert_eq!(expected, actual);
    }

    #[test]
    fn gptp_port_config() {
        const GPTP_CONFIG: &str = r#"
path-trace = true

[[port]]
interface = "eth0"
delay-mechanism = "P2P"
delay-interval = -3
gptp-profile = true
neighbor-prop-delay-thresh = 800
"#;

        let actual: crate::config::Config = toml::from_str(GPTP_CONFIG).unwrap();
        assert!(actual.path_trace);

        let port = &actual.ports[0];
        assert!(port.gptp_profile);
        assert_eq!(port.delay_mechanism, crate::config::DelayType::P2P);
        assert_eq!(port.neighbor_prop_delay_thresh, 800);

        let core = port.as_port_config(Default::default());
        assert!(matches!(
            core.delay_mechanism,
            timeport::config::DelayMechanism::P2P { .. }
        ));
    }
}
