use thiserror::Error;

/// Why an asynchronous operation poll stopped without success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollFailureReason {
    /// The status endpoint reported a terminal status other than `Succeeded`
    Status(String),
    /// The status endpoint answered with a non-2xx response
    Http { http_status: u16, body: String },
    /// The status request could not be sent or its body could not be read
    Request(String),
    /// The optional poll bound was reached before a terminal status
    Exhausted { polls: u32 },
}

impl std::fmt::Display for PollFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollFailureReason::Status(status) => write!(f, "operation ended with status {status}"),
            PollFailureReason::Http { http_status, body } => {
                write!(f, "status endpoint returned HTTP {http_status}: {body}")
            }
            PollFailureReason::Request(reason) => write!(f, "status request failed: {reason}"),
            PollFailureReason::Exhausted { polls } => {
                write!(f, "operation still in progress after {polls} polls")
            }
        }
    }
}

/// Errors surfaced by the authentication and management-call core.
///
/// Every failure of a single HTTP attempt is translated into one of these
/// variants where it happens. Only the two 401 transitions of
/// [`ManagementCallExecutor`](crate::management::ManagementCallExecutor)
/// lead to another attempt; everything else propagates to the caller as-is.
///
/// # Examples
///
/// ```no_run
/// use client::common::ManagementError;
///
/// fn describe(error: &ManagementError) -> &'static str {
///     match error {
///         ManagementError::AuthenticationCancelled | ManagementError::AuthFailure { .. } => {
///             "sign-in did not complete"
///         }
///         ManagementError::HttpError { http_status: 401, .. } => "still unauthorized",
///         ManagementError::PollFailure { .. } => "operation failed",
///         _ => "management call failed",
///     }
/// }
/// ```
#[derive(Debug, Clone, Error)]
pub enum ManagementError {
    /// The identity provider rejected the login or returned no code.
    #[error("Authentication failed: {error}{}", description_suffix(.description))]
    AuthFailure {
        error: String,
        description: Option<String>,
    },

    /// The token endpoint answered with something other than HTTP 200.
    ///
    /// A 400 on a refresh-token exchange means the refresh token can no
    /// longer be redeemed; see [`ManagementError::is_refresh_rejection`].
    #[error("Token endpoint returned HTTP {http_status}: {body}")]
    TokenEndpointFailure { http_status: u16, body: String },

    /// The user closed the sign-in window before completing the login.
    #[error("Authentication was cancelled")]
    AuthenticationCancelled,

    /// A tenant-wide call was made in Azure AD mode without a default token.
    #[error("No valid access token found. Please sign in to your account.")]
    NotSignedIn,

    /// No credential is configured for the requested subscription.
    #[error("{}", no_subscription_message(.subscription_id))]
    NoSubscriptionConfigured { subscription_id: Option<String> },

    /// The management call failed after exhausting the retry protocol.
    #[error("Error connecting to service (HTTP {http_status}): {body}")]
    HttpError { http_status: u16, body: String },

    /// An asynchronous operation did not reach `Succeeded`.
    #[error("Asynchronous operation failed: {reason}")]
    PollFailure { reason: PollFailureReason },

    /// The caller's cancellation signal fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// A single request could not be sent or its response not read.
    #[error("Request failed: {url} - {reason}")]
    Transport { url: String, reason: String },

    /// A response arrived but did not have the expected shape.
    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// The management certificate could not be decoded or used.
    #[error("Management certificate error: {reason}")]
    Certificate { reason: String },

    /// The loopback callback listener could not be started or served.
    #[error("Callback listener error: {reason}")]
    Listener { reason: String },

    /// The system browser could not be opened.
    #[error("Failed to open browser: {reason}")]
    Browser { reason: String },

    /// Required settings are missing or malformed.
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl ManagementError {
    /// `true` when the token endpoint refused to redeem a refresh token,
    /// which means the caller has to fall back to an interactive login.
    pub fn is_refresh_rejection(&self) -> bool {
        matches!(
            self,
            ManagementError::TokenEndpointFailure {
                http_status: 400,
                ..
            }
        )
    }

    /// `true` for failures that a fresh sign-in could resolve.
    pub fn is_auth_related(&self) -> bool {
        matches!(
            self,
            ManagementError::AuthFailure { .. }
                | ManagementError::TokenEndpointFailure { .. }
                | ManagementError::AuthenticationCancelled
                | ManagementError::NotSignedIn
                | ManagementError::HttpError {
                    http_status: 401,
                    ..
                }
        )
    }

    /// HTTP status carried by the error, if any.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ManagementError::TokenEndpointFailure { http_status, .. }
            | ManagementError::HttpError { http_status, .. } => Some(*http_status),
            ManagementError::PollFailure {
                reason: PollFailureReason::Http { http_status, .. },
            } => Some(*http_status),
            _ => None,
        }
    }

    pub(crate) fn transport(url: &str, error: impl std::fmt::Display) -> Self {
        ManagementError::Transport {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }

    pub(crate) fn invalid_response(reason: impl Into<String>) -> Self {
        ManagementError::InvalidResponse {
            reason: reason.into(),
        }
    }
}

fn description_suffix(description: &Option<String>) -> String {
    description
        .as_ref()
        .map(|d| format!(" - {d}"))
        .unwrap_or_default()
}

fn no_subscription_message(subscription_id: &Option<String>) -> String {
    match subscription_id {
        Some(id) => format!("No management certificate configured for subscription {id}"),
        None => "A valid Azure subscription has not been configured yet.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_rejection_only_for_400() {
        let rejected = ManagementError::TokenEndpointFailure {
            http_status: 400,
            body: "invalid_grant".to_string(),
        };
        let unavailable = ManagementError::TokenEndpointFailure {
            http_status: 503,
            body: String::new(),
        };
        let transport = ManagementError::transport("https://login", "connection reset");

        assert!(rejected.is_refresh_rejection());
        assert!(!unavailable.is_refresh_rejection());
        assert!(!transport.is_refresh_rejection());
    }

    #[test]
    fn test_http_status_extraction() {
        let http = ManagementError::HttpError {
            http_status: 404,
            body: "not found".to_string(),
        };
        let poll = ManagementError::PollFailure {
            reason: PollFailureReason::Http {
                http_status: 500,
                body: String::new(),
            },
        };

        assert_eq!(http.http_status(), Some(404));
        assert_eq!(poll.http_status(), Some(500));
        assert_eq!(ManagementError::Cancelled.http_status(), None);
    }

    #[test]
    fn test_display_messages() {
        let failure = ManagementError::AuthFailure {
            error: "access_denied".to_string(),
            description: Some("User declined".to_string()),
        };
        assert_eq!(
            failure.to_string(),
            "Authentication failed: access_denied - User declined"
        );

        let missing = ManagementError::NoSubscriptionConfigured {
            subscription_id: Some("sub-1".to_string()),
        };
        assert!(missing.to_string().contains("sub-1"));
    }
}
