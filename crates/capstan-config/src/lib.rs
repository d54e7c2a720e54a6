//! KDL configuration parsing for Capstan.
//!
//! This crate handles parsing of the system configuration file (`capstan.kdl`):
//! database connection, logging, readiness requirements, the task runner and
//! deployment listing defaults.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, DeploymentsConfig, LogFormat, LoggingConfig, ReadinessConfig, SystemConfig,
    TaskRunnerConfig, load_system_config, parse_system_config,
};
