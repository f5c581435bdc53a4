//! Configuration loading for the command-line front-end.
//!
//! Settings come from a `config.toml` layered with `AZMGMT__`-prefixed
//! environment variables, so `AZMGMT__MANAGEMENT__CLIENT_ID` overrides
//! `management.client_id`.

use azmgmt_client::settings::ManagementSettings;
use azmgmt_client::utils::EnvUtils;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const ENV_PREFIX: &str = "AZMGMT";

/// Password of the PKCS#12 blobs in publish settings files.
pub const CERTIFICATE_PASSWORD_VAR: &str = "AZMGMT_CERTIFICATE_PASSWORD";
/// Publish settings file imported at start-up.
pub const PUBLISH_SETTINGS_VAR: &str = "AZMGMT_PUBLISH_SETTINGS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}. Please check your config.toml file and environment variables.")]
    Load(String),

    #[error("Failed to deserialize config: {0}")]
    Deserialize(String),

}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    level: Option<String>,
    file: Option<String>,
}

impl LoggingConfig {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }
}

/// Where management certificates come from in certificate mode.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct CertificateConfig {
    publish_settings: Option<String>,
    password: Option<String>,
}

impl CertificateConfig {
    /// Publish settings file, the environment taking precedence.
    pub fn publish_settings(&self) -> Option<PathBuf> {
        EnvUtils::get_optional_var(PUBLISH_SETTINGS_VAR)
            .or_else(|| self.publish_settings.clone())
            .map(PathBuf::from)
    }

    pub fn password(&self) -> String {
        EnvUtils::get_optional_var(CERTIFICATE_PASSWORD_VAR)
            .or_else(|| self.password.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    management: ManagementSettings,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    certificates: CertificateConfig,
}

impl AppConfig {
    pub fn management(&self) -> &ManagementSettings {
        &self.management
    }

    pub fn management_mut(&mut self) -> &mut ManagementSettings {
        &mut self.management
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    pub fn certificates(&self) -> &CertificateConfig {
        &self.certificates
    }
}

/// Picks the configuration file: `explicit` when given, else the user
/// configuration directory when it holds one, else the working directory.
/// Only an explicit path is required to exist.
pub fn config_file(explicit: Option<&Path>) -> (PathBuf, bool) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), true);
    }
    if let Some(path) = dirs::config_dir().map(|dir| dir.join("azmgmt").join(CONFIG_FILE_NAME)) {
        if path.is_file() {
            return (path, false);
        }
    }
    (PathBuf::from(CONFIG_FILE_NAME), false)
}

pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    dotenv::dotenv().ok();
    let (path, required) = config_file(explicit);
    log::debug!("Loading configuration from {}", path.display());
    load_from(&path, required)
}

/// Builds the configuration from `path` and the environment.
///
/// The management settings are not validated here: command-line overrides
/// such as `--auth-mode certificate` may still change what is required.
pub fn load_from(path: &Path, required: bool) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path.to_path_buf()).required(required))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Deserialize(e.to_string()))?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use azmgmt_client::auth::AuthMode;
    use claims::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reads_sections_from_file() {
        let file = write_config(
            r#"
            [management]
            client_id = "app-1"
            tenant_name = "contoso.onmicrosoft.com"
            auth_mode = "certificate_based"

            [management.poll]
            interval_ms = 500
            max_polls = 20

            [logging]
            level = "debug"
            file = "azmgmt.log"

            [certificates]
            publish_settings = "/tmp/subscriptions.publishsettings"
            "#,
        );

        let config = assert_ok!(load_from(file.path(), true));

        assert_eq!(config.management().client_id, "app-1");
        assert_eq!(config.management().tenant_name, "contoso.onmicrosoft.com");
        assert_eq!(config.management().auth_mode, AuthMode::CertificateBased);
        assert_eq!(config.management().poll.interval_ms, 500);
        assert_eq!(config.management().poll.max_polls, Some(20));
        assert_eq!(
            config.management().service_management_uri,
            "https://management.core.windows.net/"
        );
        assert_eq!(config.logging().level(), "debug");
        assert_eq!(config.logging().file(), Some("azmgmt.log"));
        assert_eq!(
            config.certificates.publish_settings.as_deref(),
            Some("/tmp/subscriptions.publishsettings")
        );
    }

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = assert_ok!(load_from(&path, false));

        assert_eq!(config.management().auth_mode, AuthMode::AzureAd);
        assert_eq!(config.management().tenant_name, "common");
        assert!(config.management().client_id.is_empty());
        assert_err!(load_from(&path, true));
    }

    #[test]
    fn test_certificate_mode_without_client_id_loads() {
        let file = write_config(
            r#"
            [management]
            auth_mode = "certificate_based"
            "#,
        );

        let config = assert_ok!(load_from(file.path(), true));

        assert_eq!(config.management().auth_mode, AuthMode::CertificateBased);
        assert_ok!(config.management().validate());
    }

    #[test]
    fn test_zero_interval_loads_but_fails_validation() {
        let file = write_config(
            r#"
            [management]
            client_id = "app-1"
            [management.poll]
            interval_ms = 0
            "#,
        );

        let config = assert_ok!(load_from(file.path(), true));
        let error = assert_err!(config.management().validate());
        assert!(error.to_string().contains("interval_ms"));
    }

    #[test]
    fn test_explicit_path_is_required() {
        let (path, required) = config_file(Some(Path::new("/etc/azmgmt.toml")));
        assert_eq!(path, PathBuf::from("/etc/azmgmt.toml"));
        assert!(required);

        let (_, required) = config_file(None);
        assert!(!required);
    }

    #[test]
    fn test_logging_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.level(), "info");
        assert_none!(logging.file());
    }
}
