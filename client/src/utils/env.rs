//! Validated access to individual environment variables.

use thiserror::Error;

/// Why an environment variable could not be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvVarError {
    #[error("Environment variable '{name}' not found. Set it in your .env file or environment.")]
    NotFound { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8 characters.")]
    InvalidUtf8 { name: String },

    /// Set, but blank after trimming
    #[error("Environment variable '{name}' is empty. Please provide a valid value.")]
    Empty { name: String },
}

/// Reads environment variables, trimming whitespace and rejecting blank
/// values.
///
/// # Examples
///
/// ```no_run
/// use client::utils::EnvUtils;
///
/// let password = EnvUtils::get_optional_var("AZMGMT_CERTIFICATE_PASSWORD").unwrap_or_default();
/// if EnvUtils::has_non_empty_var("AZURE_CLIENT_ID") {
///     let client_id = EnvUtils::get_validated_var("AZURE_CLIENT_ID")?;
///     println!("Signing in as application {client_id}");
/// }
/// # Ok::<(), client::utils::EnvVarError>(())
/// ```
pub struct EnvUtils;

impl EnvUtils {
    pub fn has_non_empty_var(name: &str) -> bool {
        Self::get_validated_var(name).is_ok()
    }

    /// Returns the trimmed value of `name`.
    ///
    /// # Errors
    ///
    /// [`EnvVarError`] when the variable is unset, blank or not UTF-8.
    pub fn get_validated_var(name: &str) -> Result<String, EnvVarError> {
        match std::env::var(name) {
            Ok(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Err(EnvVarError::Empty {
                        name: name.to_string(),
                    })
                } else {
                    Ok(trimmed.to_string())
                }
            }
            Err(std::env::VarError::NotPresent) => Err(EnvVarError::NotFound {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(EnvVarError::InvalidUtf8 {
                name: name.to_string(),
            }),
        }
    }

    /// Like [`EnvUtils::get_validated_var`], treating every failure as absent.
    pub fn get_optional_var(name: &str) -> Option<String> {
        Self::get_validated_var(name).ok()
    }
}
