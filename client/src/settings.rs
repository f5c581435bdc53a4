//! Settings the core reads from its host application.
//!
//! [`ManagementSettings`] carries the identity provider authority, the
//! client registration and the Service Management endpoint. It
//! deserializes from any serde source; the CLI layers a `config.toml` with
//! environment variables.

use crate::auth::AuthMode;
use crate::common::ManagementError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_AD_AUTHORITY: &str = "login.windows.net";
pub const DEFAULT_TENANT_NAME: &str = "common";
pub const DEFAULT_SERVICE_MANAGEMENT_URI: &str = "https://management.core.windows.net/";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Service Management API version sent as `x-ms-version`.
pub const AZURE_API_VERSION: &str = "2014-06-01";

fn default_ad_authority() -> String {
    DEFAULT_AD_AUTHORITY.to_string()
}

fn default_tenant_name() -> String {
    DEFAULT_TENANT_NAME.to_string()
}

fn default_service_management_uri() -> String {
    DEFAULT_SERVICE_MANAGEMENT_URI.to_string()
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// Polling behaviour for asynchronous operations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between status requests in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    /// Give up after this many status requests; unbounded when absent
    #[serde(default)]
    pub max_polls: Option<u32>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_polls: None,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Authentication and endpoint settings for management calls.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagementSettings {
    /// Identity provider host, e.g. `login.windows.net`
    #[serde(default = "default_ad_authority")]
    pub ad_authority: String,
    /// Application (client) id registered with Azure AD
    #[serde(default)]
    pub client_id: String,
    /// Redirect URI registered for the application
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Service Management endpoint, also the OAuth2 resource
    #[serde(default = "default_service_management_uri")]
    pub service_management_uri: String,
    /// Tenant used for tenant-wide sign-in
    #[serde(default = "default_tenant_name")]
    pub tenant_name: String,
    /// Initial authentication mode
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// Overrides the generated `User-Agent`
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub poll: PollSettings,
}

impl Default for ManagementSettings {
    fn default() -> Self {
        Self {
            ad_authority: default_ad_authority(),
            client_id: String::new(),
            redirect_uri: default_redirect_uri(),
            service_management_uri: default_service_management_uri(),
            tenant_name: default_tenant_name(),
            auth_mode: AuthMode::default(),
            user_agent: None,
            poll: PollSettings::default(),
        }
    }
}

impl ManagementSettings {
    /// Checks that Azure AD mode has what it needs to sign in.
    pub fn validate(&self) -> Result<(), ManagementError> {
        if self.service_management_uri.trim().is_empty() {
            return Err(ManagementError::Configuration {
                reason: "service_management_uri must not be empty".to_string(),
            });
        }
        if self.poll.interval_ms == 0 {
            return Err(ManagementError::Configuration {
                reason: "poll.interval_ms must be greater than zero".to_string(),
            });
        }
        if self.auth_mode == AuthMode::AzureAd {
            if self.client_id.trim().is_empty() {
                return Err(ManagementError::Configuration {
                    reason: "client_id is required for Azure AD authentication".to_string(),
                });
            }
            if self.ad_authority.trim().is_empty() {
                return Err(ManagementError::Configuration {
                    reason: "ad_authority is required for Azure AD authentication".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Value sent as `User-Agent` and `X-ClientService-ClientTag`.
    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            let version = env!("CARGO_PKG_VERSION");
            format!(
                "azmgmt/{version} (lang=Rust; os={}; version={version})",
                std::env::consts::OS
            )
        })
    }
}
