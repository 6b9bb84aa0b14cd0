use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use config::{Config as ConfigBuilder, ConfigError, Environment, File, FileFormat};

use super::{LoggingConfig, PollConfig, RtuConfig, ServerConfig, TcpConfig};

/// Main application configuration
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// RTU (serial) side
    pub rtu: RtuConfig,

    /// TCP client side
    pub tcp: TcpConfig,

    /// TCP server side
    pub server: ServerConfig,

    /// Polled-device timer
    pub poll: PollConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Default configuration directory
    pub const CONFIG_DIR: &'static str = "config";

    /// Environment variable prefix
    const ENV_PREFIX: &'static str = "MODBUS_LINK";

    /// Build configuration using the following priority (highest to lowest):
    /// 1. Environment variables (MODBUS_LINK_*)
    /// 2. Local configuration file (config/local.yaml)
    /// 3. Default configuration (config/default.yaml)
    /// 4. Built-in defaults
    pub fn new() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let builder = ConfigBuilder::builder()
            // RTU configuration
            .set_default("rtu.device", defaults.rtu.device)?
            .set_default("rtu.baud_rate", defaults.rtu.baud_rate)?
            .set_default("rtu.data_bits", i64::from(defaults.rtu.data_bits.get()))?
            .set_default("rtu.parity", defaults.rtu.parity.to_string())?
            .set_default("rtu.stop_bits", defaults.rtu.stop_bits.to_string())?
            .set_default(
                "rtu.timeout",
                format!("{}s", defaults.rtu.timeout.as_secs()),
            )?
            .set_default(
                "rtu.serial_timeout",
                format!("{}ms", defaults.rtu.serial_timeout.as_millis()),
            )?
            .set_default(
                "rtu.turnaround_delay",
                format!("{}ms", defaults.rtu.turnaround_delay.as_millis()),
            )?
            // TCP client configuration
            .set_default("tcp.host", defaults.tcp.host)?
            .set_default("tcp.port", defaults.tcp.port)?
            .set_default(
                "tcp.timeout",
                format!("{}s", defaults.tcp.timeout.as_secs()),
            )?
            // TCP server configuration
            .set_default("server.bind_addr", defaults.server.bind_addr)?
            .set_default("server.bind_port", defaults.server.bind_port)?
            // Poll configuration
            .set_default(
                "poll.period",
                format!("{}s", defaults.poll.period.as_secs()),
            )?
            // Logging configuration
            .set_default("logging.log_dir", defaults.logging.log_dir)?
            .set_default("logging.trace_frames", defaults.logging.trace_frames)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?
            .set_default(
                "logging.include_location",
                defaults.logging.include_location,
            )?
            .set_default("logging.thread_ids", defaults.logging.thread_ids)?
            .set_default("logging.thread_names", defaults.logging.thread_names)?;

        let config = builder
            // Load default config file
            .add_source(
                File::new(&format!("{}/default", Self::CONFIG_DIR), FileFormat::Yaml)
                    .required(false),
            )
            // Load local overrides
            .add_source(
                File::new(&format!("{}/local", Self::CONFIG_DIR), FileFormat::Yaml)
                    .required(false),
            )
            // Add environment variables
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .add_source(
                Environment::with_prefix(Self::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn validation_error(msg: &str) -> ConfigError {
            ConfigError::Message(msg.to_string())
        }

        if self.rtu.device.is_empty() {
            return Err(validation_error("RTU device must not be empty"));
        }
        if self.rtu.baud_rate == 0 {
            return Err(validation_error("RTU baud rate must be non-zero"));
        }
        if self.rtu.timeout.is_zero() {
            return Err(validation_error("RTU timeout must be non-zero"));
        }
        if self.rtu.serial_timeout.is_zero() {
            return Err(validation_error("RTU serial timeout must be non-zero"));
        }

        if self.tcp.host.is_empty() {
            return Err(validation_error("TCP host must not be empty"));
        }
        if self.tcp.port == 0 {
            return Err(validation_error("TCP port must be non-zero"));
        }
        if self.tcp.timeout.is_zero() {
            return Err(validation_error("TCP timeout must be non-zero"));
        }

        if self.server.bind_addr.is_empty() {
            return Err(validation_error("Server bind address must not be empty"));
        }
        if self.server.bind_port == 0 {
            return Err(validation_error("Server port must be non-zero"));
        }

        if self.poll.period.is_zero() {
            return Err(validation_error("Poll period must be non-zero"));
        }

        self.logging
            .validate()
            .map_err(|e| validation_error(&e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataBits, Parity, StopBits};
    use std::{fs, time::Duration};
    use tempfile::tempdir;

    #[test]
    #[serial_test::serial]
    fn test_default_config() {
        let config = Config::new().unwrap();
        assert_eq!(config.tcp.port, 502);
        assert_eq!(config.server.bind_port, 502);
        assert_eq!(config.poll.period, Duration::from_secs(5));
        assert_eq!(config.rtu.baud_rate, 9600);
    }

    #[test]
    #[serial_test::serial]
    fn test_env_override() {
        std::env::set_var("MODBUS_LINK_TCP__PORT", "5020");
        let config = Config::new().unwrap();
        assert_eq!(config.tcp.port, 5020);
        std::env::remove_var("MODBUS_LINK_TCP__PORT");
    }

    #[test]
    #[serial_test::serial]
    fn test_file_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");

        fs::write(
            &config_path,
            r#"
            rtu:
              device: "/dev/ttyUSB0"
              baud_rate: 19200
              data_bits: 8
              parity: "even"
              stop_bits: "two"
              timeout: "2s"
              serial_timeout: "50ms"
              turnaround_delay: "3ms"
            tcp:
              host: "192.168.1.100"
              port: 1502
              timeout: "1s"
            server:
              bind_addr: "127.0.0.1"
              bind_port: 8502
            poll:
              period: "500ms"
            logging:
              log_dir: "logs"
              trace_frames: true
              level: "trace"
              format: "pretty"
              include_location: false
              thread_ids: false
              thread_names: true
            "#,
        )
        .unwrap();

        let config = Config::from_file(config_path).unwrap();
        assert_eq!(config.rtu.device, "/dev/ttyUSB0");
        assert_eq!(config.rtu.baud_rate, 19200);
        assert_eq!(config.rtu.data_bits, DataBits::new(8).unwrap());
        assert_eq!(config.rtu.parity, Parity::Even);
        assert_eq!(config.rtu.stop_bits, StopBits::Two);
        assert_eq!(config.rtu.timeout, Duration::from_secs(2));
        assert_eq!(config.rtu.serial_timeout, Duration::from_millis(50));
        assert_eq!(config.rtu.turnaround_delay, Duration::from_millis(3));
        assert_eq!(config.tcp.host, "192.168.1.100");
        assert_eq!(config.tcp.port, 1502);
        assert_eq!(config.tcp.timeout, Duration::from_secs(1));
        assert_eq!(config.server.bind_addr, "127.0.0.1");
        assert_eq!(config.server.bind_port, 8502);
        assert_eq!(config.poll.period, Duration::from_millis(500));
        assert_eq!(config.logging.log_dir.as_deref(), Some("logs"));
        assert!(config.logging.trace_frames);
        assert_eq!(config.logging.level, "trace");
        assert!(config.logging.thread_names);
    }

    #[test]
    #[serial_test::serial]
    fn test_validation() {
        std::env::set_var("MODBUS_LINK_TCP__PORT", "0");
        assert!(Config::new().is_err());
        std::env::remove_var("MODBUS_LINK_TCP__PORT");
    }
}
