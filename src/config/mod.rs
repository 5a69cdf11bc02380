//! # Configuration Management
//!
//! Harness configuration is read from the environment (optionally seeded
//! from a `.env` file) so the same test binary can target a local compose
//! setup or a CI deployment.

pub mod settings;

pub use settings::{
    BackendConfig, DeviceConfig, HarnessConfig, LoggingConfig, MigrationConfig, SmtpConfig,
    TimeoutConfig,
};

use crate::errors::Result;

impl HarnessConfig {
    /// Load and validate configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // A missing .env file is the normal case
        let _ = dotenvy::dotenv();

        let config = Self {
            backend: BackendConfig::from_env(),
            smtp: SmtpConfig::from_env(),
            devices: DeviceConfig::from_env(),
            migration: MigrationConfig::from_env(),
            timeouts: TimeoutConfig::from_env(),
            logging: LoggingConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }
}
