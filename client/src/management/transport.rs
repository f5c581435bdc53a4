use super::request::ContentKind;
use crate::auth::Credential;
use crate::common::ManagementError;
use crate::settings::AZURE_API_VERSION;
use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::time::Duration;

/// A fully addressed HTTP request, headers included.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Builds a request carrying the headers every management call sends.
    ///
    /// Bearer credentials become an `Authorization` header here; certificate
    /// credentials are applied by the transport at the TLS layer.
    pub fn management(
        method: Method,
        url: String,
        content: ContentKind,
        user_agent: &str,
        credential: &Credential,
        body: Option<String>,
    ) -> Self {
        let mut headers = vec![
            ("User-Agent".to_string(), user_agent.to_string()),
            ("X-ClientService-ClientTag".to_string(), user_agent.to_string()),
            ("x-ms-version".to_string(), AZURE_API_VERSION.to_string()),
            ("Accept".to_string(), content.mime_type().to_string()),
            ("Content-Type".to_string(), content.mime_type().to_string()),
        ];
        if let Some(token) = credential.bearer_token() {
            headers.push(("Authorization".to_string(), token.authorization_header()));
        }

        Self {
            method,
            url,
            headers,
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status, headers and body of one response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a single HTTP attempt authenticated with `credential`.
///
/// Implementations never retry; the executor owns the retry protocol.
#[async_trait]
pub trait ManagementTransport: Send + Sync {
    async fn send(
        &self,
        request: &HttpRequest,
        credential: &Credential,
    ) -> Result<HttpResponse, ManagementError>;
}

/// [`ManagementTransport`] over `reqwest`.
///
/// A new client is built for every attempt, so a certificate identity or a
/// rejected connection never leaks into the next attempt.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn build_client(&self, credential: &Credential) -> Result<reqwest::Client, ManagementError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        if let Credential::Certificate(certificate) = credential {
            let identity =
                reqwest::Identity::from_pkcs12_der(&certificate.pkcs12, &certificate.password)
                    .map_err(|e| ManagementError::Certificate {
                        reason: e.to_string(),
                    })?;
            builder = builder.use_native_tls().identity(identity);
        }

        builder.build().map_err(|e| ManagementError::Configuration {
            reason: format!("Failed to build HTTP client: {e}"),
        })
    }
}

#[async_trait]
impl ManagementTransport for HttpTransport {
    async fn send(
        &self,
        request: &HttpRequest,
        credential: &Credential,
    ) -> Result<HttpResponse, ManagementError> {
        let client = self.build_client(credential)?;

        let mut builder = client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        log::debug!("{} {}", request.method, request.url);
        let response = builder
            .send()
            .await
            .map_err(|e| ManagementError::transport(&request.url, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| ManagementError::transport(&request.url, e))?;

        log::debug!("{} {} -> {status}", request.method, request.url);
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
