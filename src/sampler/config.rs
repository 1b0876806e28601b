//! Sampling run configuration
//!
//! Loaded from and saved back to `appsettings.json`. The configuration is
//! immutable once a run has started; changing it requires a
//! stop/reconfigure/start cycle.

use std::fs;
use std::io::{self, Error, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Well-known datagram port used for inbound samples and outbound probes.
pub const DEFAULT_INGEST_PORT: u16 = 1667;

/// Periodic-interrupt character device for HardwareInterrupt mode.
pub const DEFAULT_RTC_DEVICE: &str = "/dev/rtc";

const MAX_PERIOD_MILLIS: u64 = 60_000;

/// Which wakeup source drives the sampling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ClockMode {
    /// Cooperative event loop driven by a software timer deadline.
    TimerEvent,
    /// Blocking sleep loop (or bounded socket waits when the period is 0).
    SleepWait,
    /// Blocking reads of a periodic hardware interrupt device.
    HardwareInterrupt,
}

/// Requested scheduling level for the sampling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ThreadPriority {
    Idle,
    Lowest,
    Low,
    Normal,
    High,
    Highest,
    /// The host's real-time scheduling class. Granting this level is
    /// mandatory: if elevation fails the run aborts rather than silently
    /// degrading to ordinary scheduling.
    TimeCritical,
}

/// Requested process priority class, applied best-effort for the duration
/// of a run and restored afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ProcessPriority {
    Idle,
    Normal,
    High,
    Realtime,
}

fn validate_period_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = u64::deserialize(deserializer)?;
    if value <= MAX_PERIOD_MILLIS {
        Ok(value)
    } else {
        Err(serde::de::Error::custom("PeriodMillis must be 60000 or less"))
    }
}

fn validate_positive_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = u64::deserialize(deserializer)?;
    if value > 0 {
        Ok(value)
    } else {
        Err(serde::de::Error::custom("Value must be positive"))
    }
}

fn default_ingest_port() -> u16 {
    DEFAULT_INGEST_PORT
}

fn default_rtc_device() -> String {
    DEFAULT_RTC_DEVICE.to_string()
}

/// Everything a sampling run needs, fixed before `start`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplingConfig {
    #[serde(rename = "ClockMode")]
    pub mode: ClockMode,
    /// Wakeup period in milliseconds. 0 disables the periodic source and
    /// relies solely on inbound samples.
    #[serde(rename = "PeriodMillis", deserialize_with = "validate_period_millis")]
    pub period_millis: u64,
    /// How long the console front end lets the run go before stopping it.
    #[serde(rename = "DurationSecs", deserialize_with = "validate_positive_u64")]
    pub duration_secs: u64,
    /// Probe destination, `ip` or `ip:port`. A bare address uses the
    /// ingest port.
    #[serde(rename = "DestinationAddr", default)]
    pub destination: Option<String>,
    #[serde(rename = "SendProbe", default)]
    pub send_probe: bool,
    #[serde(rename = "ThreadPriority")]
    pub thread_priority: ThreadPriority,
    #[serde(rename = "ProcessPriority")]
    pub process_priority: ProcessPriority,
    #[serde(rename = "IngestPort", default = "default_ingest_port")]
    pub ingest_port: u16,
    #[serde(rename = "RtcDevice", default = "default_rtc_device")]
    pub rtc_device: String,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            mode: ClockMode::SleepWait,
            period_millis: 10,
            duration_secs: 10,
            destination: Some("127.0.0.1".to_string()),
            send_probe: false,
            thread_priority: ThreadPriority::TimeCritical,
            process_priority: ProcessPriority::Realtime,
            ingest_port: DEFAULT_INGEST_PORT,
            rtc_device: DEFAULT_RTC_DEVICE.to_string(),
        }
    }
}

impl SamplingConfig {
    /// The wakeup period, or `None` when the periodic source is disabled.
    pub fn period(&self) -> Option<Duration> {
        if self.period_millis == 0 {
            None
        } else {
            Some(Duration::from_millis(self.period_millis))
        }
    }

    /// Resolve the probe destination. A destination without an explicit
    /// port gets the ingest port, matching loopback/peer testing setups.
    pub fn probe_destination(&self) -> io::Result<Option<SocketAddr>> {
        let Some(dest) = self.destination.as_deref() else {
            return Ok(None);
        };
        let dest = dest.trim();
        if dest.is_empty() {
            return Ok(None);
        }
        if let Ok(addr) = dest.parse::<SocketAddr>() {
            return Ok(Some(addr));
        }
        let ip: IpAddr = dest.parse().map_err(|e| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("invalid destination address '{dest}': {e}"),
            )
        })?;
        Ok(Some(SocketAddr::new(ip, self.ingest_port)))
    }

    /// Load the configuration from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    /// Save the configuration back to a JSON file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_fields() {
        let config = SamplingConfig {
            mode: ClockMode::TimerEvent,
            period_millis: 0,
            duration_secs: 5,
            destination: Some("192.168.1.10:2000".to_string()),
            send_probe: true,
            thread_priority: ThreadPriority::Normal,
            process_priority: ProcessPriority::High,
            ingest_port: 1800,
            rtc_device: "/dev/rtc0".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SamplingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode, ClockMode::TimerEvent);
        assert_eq!(back.period_millis, 0);
        assert_eq!(back.ingest_port, 1800);
        assert!(back.send_probe);
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let json = r#"{
            "ClockMode": "SleepWait",
            "PeriodMillis": 10,
            "DurationSecs": 10,
            "ThreadPriority": "Normal",
            "ProcessPriority": "Normal"
        }"#;
        let config: SamplingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ingest_port, DEFAULT_INGEST_PORT);
        assert_eq!(config.rtc_device, DEFAULT_RTC_DEVICE);
        assert_eq!(config.destination, None);
        assert!(!config.send_probe);
    }

    #[test]
    fn oversized_period_is_rejected() {
        let json = r#"{
            "ClockMode": "SleepWait",
            "PeriodMillis": 3600000,
            "DurationSecs": 10,
            "ThreadPriority": "Normal",
            "ProcessPriority": "Normal"
        }"#;
        assert!(serde_json::from_str::<SamplingConfig>(json).is_err());
    }

    #[test]
    fn zero_duration_is_rejected() {
        let json = r#"{
            "ClockMode": "SleepWait",
            "PeriodMillis": 10,
            "DurationSecs": 0,
            "ThreadPriority": "Normal",
            "ProcessPriority": "Normal"
        }"#;
        assert!(serde_json::from_str::<SamplingConfig>(json).is_err());
    }

    #[test]
    fn bare_destination_gets_ingest_port() {
        let config = SamplingConfig {
            destination: Some("10.0.0.7".to_string()),
            ingest_port: 1667,
            ..SamplingConfig::default()
        };
        let addr = config.probe_destination().unwrap().unwrap();
        assert_eq!(addr.to_string(), "10.0.0.7:1667");
    }

    #[test]
    fn explicit_destination_port_wins() {
        let config = SamplingConfig {
            destination: Some("10.0.0.7:2500".to_string()),
            ..SamplingConfig::default()
        };
        let addr = config.probe_destination().unwrap().unwrap();
        assert_eq!(addr.port(), 2500);
    }

    #[test]
    fn garbage_destination_is_an_error() {
        let config = SamplingConfig {
            destination: Some("not-an-address".to_string()),
            ..SamplingConfig::default()
        };
        assert!(config.probe_destination().is_err());
    }

    #[test]
    fn empty_destination_means_no_probe_target() {
        let config = SamplingConfig {
            destination: Some("  ".to_string()),
            ..SamplingConfig::default()
        };
        assert!(config.probe_destination().unwrap().is_none());
    }

    #[test]
    fn period_zero_disables_periodic_wakeup() {
        let config = SamplingConfig {
            period_millis: 0,
            ..SamplingConfig::default()
        };
        assert!(config.period().is_none());
    }
}
