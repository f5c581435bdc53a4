use super::browser::BrowserLauncher;
use super::callback_listener::{CallbackListener, CallbackOutcome};
use super::provider::TokenAuthority;
use super::types::{AuthenticationResult, EXPIRES_ON_UNKNOWN, InteractiveRequest, UserInfo};
use crate::common::ManagementError;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
const GRANT_REFRESH_TOKEN: &str = "refresh_token";

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_on: Option<serde_json::Value>,
    #[serde(default)]
    id_token: Option<String>,
}

/// OAuth2 client for one Azure AD authority.
///
/// Runs the authorization-code flow through the system browser and a loopback
/// listener, and redeems refresh tokens. The listener is started on the first
/// interactive sign-in and reused until [`AuthenticationContext::dispose`].
pub struct AuthenticationContext {
    authority: String,
    http_client: reqwest::Client,
    browser: Arc<dyn BrowserLauncher>,
    listener: Mutex<Option<CallbackListener>>,
}

impl AuthenticationContext {
    /// `authority` is the identity provider host (`login.windows.net`) or a
    /// full base URL including the scheme.
    pub fn new(authority: &str, browser: Arc<dyn BrowserLauncher>) -> Self {
        Self::with_http_client(authority, browser, reqwest::Client::new())
    }

    pub fn with_http_client(
        authority: &str,
        browser: Arc<dyn BrowserLauncher>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            authority: normalize_authority(authority),
            http_client,
            browser,
            listener: Mutex::new(None),
        }
    }

    pub fn authorize_endpoint(&self, tenant: &str) -> String {
        format!("{}/{tenant}/oauth2/authorize", self.authority)
    }

    pub fn token_endpoint(&self, tenant: &str) -> String {
        format!("{}/{tenant}/oauth2/token", self.authority)
    }

    /// Builds the authorization URL the browser is sent to.
    pub fn authorization_url(
        &self,
        request: &InteractiveRequest,
        redirect_uri: &str,
        state: &str,
    ) -> String {
        let query = encode_form(&[
            ("resource", request.resource.as_str()),
            ("client_id", request.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri),
            ("state", state),
            ("prompt", request.prompt.as_str()),
        ]);
        format!("{}?{query}", self.authorize_endpoint(&request.tenant))
    }

    /// Stops the loopback listener and releases its port.
    ///
    /// A sign-in still waiting for its callback resolves as cancelled. Safe to
    /// call more than once.
    pub async fn dispose(&self) {
        if let Some(listener) = self.listener.lock().await.take() {
            listener.close();
        }
    }

    async fn wait_for_authorization_code(
        &self,
        request: &InteractiveRequest,
    ) -> Result<Option<(String, String)>, ManagementError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();

        let (callback_url, receiver, redirect_uri, authorize_url) = {
            let mut guard = self.listener.lock().await;
            let listener = match guard.take() {
                Some(listener) if !listener.is_closed() => listener,
                _ => CallbackListener::bind().await?,
            };

            let callback_url = listener.callback_url();
            let redirect_uri = if is_loopback_uri(&request.redirect_uri) {
                callback_url.clone()
            } else {
                request.redirect_uri.clone()
            };
            let authorize_url = self.authorization_url(request, &redirect_uri, &correlation_id);
            let receiver = listener.arm(correlation_id.clone());

            *guard = Some(listener);
            (callback_url, receiver, redirect_uri, authorize_url)
        };

        log::info!(
            "Starting interactive sign-in for tenant '{}' (correlation id {correlation_id})",
            request.tenant
        );

        if let Err(e) = self.browser.launch(&authorize_url, &callback_url) {
            if let Some(listener) = self.listener.lock().await.as_ref() {
                listener.disarm();
            }
            return Err(e);
        }

        match receiver.await {
            Ok(CallbackOutcome::Code(code)) => Ok(Some((code, redirect_uri))),
            Ok(CallbackOutcome::Failure { error, description }) => {
                log::warn!("Identity provider returned an error: {error}");
                Err(ManagementError::AuthFailure { error, description })
            }
            Ok(CallbackOutcome::Closed) | Err(_) => {
                log::info!("Interactive sign-in was cancelled");
                Ok(None)
            }
        }
    }

    async fn request_token(
        &self,
        tenant: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, ManagementError> {
        let url = self.token_endpoint(tenant);

        let response = self
            .http_client
            .post(&url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded; charset=UTF-8",
            )
            .body(encode_form(params))
            .send()
            .await
            .map_err(|e| ManagementError::transport(&url, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ManagementError::transport(&url, e))?;

        if status != 200 {
            return Err(ManagementError::TokenEndpointFailure {
                http_status: status,
                body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            ManagementError::invalid_response(format!("Failed to parse token response: {e}"))
        })?;

        if token.access_token.trim().is_empty() {
            return Err(ManagementError::invalid_response(
                "Token response did not contain an access_token",
            ));
        }

        Ok(token)
    }
}

#[async_trait]
impl TokenAuthority for AuthenticationContext {
    async fn acquire_token_interactive(
        &self,
        request: &InteractiveRequest,
    ) -> Result<Option<AuthenticationResult>, ManagementError> {
        let (code, redirect_uri) = match self.wait_for_authorization_code(request).await? {
            Some(code) => code,
            None => return Ok(None),
        };

        let token = self
            .request_token(
                &request.tenant,
                &[
                    ("client_id", request.client_id.as_str()),
                    ("code", code.as_str()),
                    ("grant_type", GRANT_AUTHORIZATION_CODE),
                    ("redirect_uri", redirect_uri.as_str()),
                    ("resource", request.resource.as_str()),
                ],
            )
            .await?;

        let user_info = UserInfo::parse(token.id_token.as_deref())?;
        log::info!(
            "Interactive sign-in completed{}",
            user_info
                .as_ref()
                .and_then(|u| u.display_name())
                .map(|name| format!(" for {name}"))
                .unwrap_or_default()
        );

        Ok(Some(AuthenticationResult::new(
            token.token_type,
            token.access_token,
            token.refresh_token,
            parse_expires_on(token.expires_on.as_ref()),
            user_info,
        )))
    }

    async fn acquire_token_by_refresh_token(
        &self,
        previous: &AuthenticationResult,
        tenant: &str,
        resource: &str,
        client_id: &str,
    ) -> Result<AuthenticationResult, ManagementError> {
        let mut params = vec![
            ("client_id", client_id),
            ("grant_type", GRANT_REFRESH_TOKEN),
            ("refresh_token", previous.refresh_token()),
        ];
        if !resource.is_empty() {
            params.push(("resource", resource));
        }

        let token = self.request_token(tenant, &params).await.inspect_err(|e| {
            if e.is_refresh_rejection() {
                log::info!("Refresh token was rejected; interactive sign-in required");
            }
        })?;

        let user_info = match UserInfo::parse(token.id_token.as_deref())? {
            Some(info) => Some(info),
            None => previous.user_info().cloned(),
        };

        log::debug!("Access token refreshed for tenant '{tenant}'");
        Ok(AuthenticationResult::new(
            token.token_type,
            token.access_token,
            token.refresh_token,
            parse_expires_on(token.expires_on.as_ref()),
            user_info,
        ))
    }
}

fn normalize_authority(authority: &str) -> String {
    let authority = authority.trim().trim_end_matches('/');
    if authority.starts_with("http://") || authority.starts_with("https://") {
        authority.to_string()
    } else {
        format!("https://{authority}")
    }
}

/// Loopback redirect URIs are replaced by the listener's own address.
fn is_loopback_uri(uri: &str) -> bool {
    let rest = match uri.trim().strip_prefix("http://") {
        Some(rest) => rest,
        None => return false,
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = if host.ends_with(']') {
        host
    } else {
        host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
    };
    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" || host == "[::1]"
}

fn encode_form(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// `expires_on` arrives as a number or as a numeric string depending on the
/// endpoint version.
fn parse_expires_on(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(EXPIRES_ON_UNKNOWN),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(EXPIRES_ON_UNKNOWN),
        _ => EXPIRES_ON_UNKNOWN,
    }
}
