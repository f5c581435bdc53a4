use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::common::ManagementError;

/// Value stored in [`AuthenticationResult::expires_on`] when the token
/// endpoint did not report an expiry.
pub const EXPIRES_ON_UNKNOWN: i64 = i64::MIN;

/// How management calls authenticate, chosen process-wide.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Nothing has been configured yet; every call is rejected
    Unconfigured,
    /// Management certificates imported from publish settings
    CertificateBased,
    /// Bearer tokens obtained from Azure Active Directory
    #[default]
    AzureAd,
}

/// Value of the `prompt` parameter on the authorization request.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptBehavior {
    /// Always show the login page
    Login,
    /// Re-validate the existing session
    RefreshSession,
    /// Sign in silently when the identity provider can
    AttemptNone,
}

impl PromptBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptBehavior::Login => "login",
            PromptBehavior::RefreshSession => "refresh_session",
            PromptBehavior::AttemptNone => "attempt_none",
        }
    }
}

/// Identity claims decoded from an `id_token`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    #[serde(rename = "oid", default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(rename = "idp", default)]
    pub identity_provider: Option<String>,
    #[serde(default)]
    pub upn: Option<String>,
    #[serde(default)]
    pub unique_name: Option<String>,
}

impl UserInfo {
    /// Decodes the claims of an `id_token` without verifying its signature.
    ///
    /// Returns `Ok(None)` for a missing or blank token.
    pub fn parse(id_token: Option<&str>) -> Result<Option<Self>, ManagementError> {
        let id_token = match id_token.map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => return Ok(None),
        };

        let payload = id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| ManagementError::invalid_response("id_token is not a JWT"))?;

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .or_else(|_| URL_SAFE.decode(payload))
            .map_err(|e| {
                ManagementError::invalid_response(format!("id_token payload is not base64: {e}"))
            })?;

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            ManagementError::invalid_response(format!("id_token claims are not valid JSON: {e}"))
        })
    }

    /// Best name to show for the signed-in user.
    pub fn display_name(&self) -> Option<&str> {
        self.upn
            .as_deref()
            .or(self.unique_name.as_deref())
            .or(self.given_name.as_deref())
    }
}

/// Outcome of a successful token exchange.
///
/// Immutable: a refresh produces a new value that replaces the old one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticationResult {
    token_type: String,
    access_token: String,
    refresh_token: String,
    expires_on: i64,
    user_info: Option<UserInfo>,
}

impl AuthenticationResult {
    pub fn new(
        token_type: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_on: i64,
        user_info: Option<UserInfo>,
    ) -> Self {
        Self {
            token_type: token_type.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_on,
            user_info,
        }
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Expiry in epoch seconds, [`EXPIRES_ON_UNKNOWN`] when absent.
    pub fn expires_on(&self) -> i64 {
        self.expires_on
    }

    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.trim().is_empty()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if self.expires_on == EXPIRES_ON_UNKNOWN {
            return None;
        }
        DateTime::from_timestamp(self.expires_on, 0)
    }

    /// Tokens without a known expiry are never considered expired; the
    /// server's 401 is the authority for those.
    pub fn is_expired(&self) -> bool {
        self.expires_at()
            .map(|expires_at| Utc::now() >= expires_at)
            .unwrap_or(false)
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Caller-supplied identity of the subscription a call targets.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionIdentity {
    pub subscription_id: String,
    pub tenant_id: String,
    pub management_endpoint: String,
}

impl SubscriptionIdentity {
    pub fn new(
        subscription_id: impl Into<String>,
        tenant_id: impl Into<String>,
        management_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            tenant_id: tenant_id.into(),
            management_endpoint: management_endpoint.into(),
        }
    }
}

/// Key under which the token store keeps a token.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TokenScope {
    /// Tenant-wide calls use the default token
    Tenant,
    Subscription(String),
}

impl TokenScope {
    pub fn for_subscription(subscription: Option<&SubscriptionIdentity>) -> Self {
        match subscription {
            Some(identity) if !identity.subscription_id.trim().is_empty() => {
                TokenScope::Subscription(identity.subscription_id.clone())
            }
            _ => TokenScope::Tenant,
        }
    }
}

impl std::fmt::Display for TokenScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenScope::Tenant => write!(f, "tenant"),
            TokenScope::Subscription(id) => write!(f, "subscription {id}"),
        }
    }
}

/// A management certificate imported from publish settings.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ManagementCertificate {
    pub pkcs12: Vec<u8>,
    pub password: String,
    #[zeroize(skip)]
    pub management_uri: String,
}

impl std::fmt::Debug for ManagementCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementCertificate")
            .field("pkcs12", &format_args!("<{} bytes>", self.pkcs12.len()))
            .field("management_uri", &self.management_uri)
            .finish()
    }
}

/// The credential a single call attempt authenticates with.
#[derive(Clone, Debug)]
pub enum Credential {
    Certificate(ManagementCertificate),
    BearerToken(AuthenticationResult),
}

impl Credential {
    pub fn is_certificate(&self) -> bool {
        matches!(self, Credential::Certificate(_))
    }

    pub fn bearer_token(&self) -> Option<&AuthenticationResult> {
        match self {
            Credential::BearerToken(token) => Some(token),
            Credential::Certificate(_) => None,
        }
    }
}

/// Parameters of one interactive sign-in.
#[derive(Clone, Debug)]
pub struct InteractiveRequest {
    pub tenant: String,
    pub resource: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub prompt: PromptBehavior,
}
