//! Scripted fakes shared by the unit tests.

use crate::auth::{
    AuthenticationResult, Credential, EXPIRES_ON_UNKNOWN, InteractiveRequest,
    ManagementCertificate, SubscriptionStore, TokenAuthority,
};
use crate::common::ManagementError;
use crate::management::{HttpRequest, HttpResponse, ManagementTransport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn bearer(access: &str, refresh: &str) -> AuthenticationResult {
    AuthenticationResult::new("Bearer", access, refresh, EXPIRES_ON_UNKNOWN, None)
}

pub(crate) fn certificate(management_uri: &str) -> ManagementCertificate {
    ManagementCertificate {
        pkcs12: vec![1, 2, 3],
        password: String::new(),
        management_uri: management_uri.to_string(),
    }
}

type Scripted<T> = Mutex<VecDeque<Result<T, ManagementError>>>;

/// Token authority answering from queues. Empty queues fall back to a
/// fixed successful token.
#[derive(Default)]
pub(crate) struct ScriptedAuthority {
    interactive: Scripted<Option<AuthenticationResult>>,
    refresh: Scripted<AuthenticationResult>,
    interactive_requests: Mutex<Vec<InteractiveRequest>>,
    refreshed_tokens: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
    /// Interactive sign-in never returns, like a browser left open
    hang: bool,
}

impl ScriptedAuthority {
    pub(crate) fn with(
        interactive: Vec<Result<Option<AuthenticationResult>, ManagementError>>,
    ) -> Arc<Self> {
        Self::scripted(interactive, vec![])
    }

    pub(crate) fn scripted(
        interactive: Vec<Result<Option<AuthenticationResult>, ManagementError>>,
        refresh: Vec<Result<AuthenticationResult, ManagementError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            interactive: Mutex::new(interactive.into()),
            refresh: Mutex::new(refresh.into()),
            ..Default::default()
        })
    }

    pub(crate) fn never_completing() -> Arc<Self> {
        Arc::new(Self {
            hang: true,
            ..Default::default()
        })
    }

    pub(crate) fn requests(&self) -> Vec<InteractiveRequest> {
        self.interactive_requests.lock().unwrap().clone()
    }

    /// Access tokens of the results handed to refresh, in call order.
    pub(crate) fn refreshed(&self) -> Vec<String> {
        self.refreshed_tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenAuthority for ScriptedAuthority {
    async fn acquire_token_interactive(
        &self,
        request: &InteractiveRequest,
    ) -> Result<Option<AuthenticationResult>, ManagementError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.interactive_requests
            .lock()
            .unwrap()
            .push(request.clone());
        if self.hang {
            std::future::pending::<()>().await;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.interactive
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Some(bearer("AT-interactive", "RT-interactive"))))
    }

    async fn acquire_token_by_refresh_token(
        &self,
        previous: &AuthenticationResult,
        _tenant: &str,
        _resource: &str,
        _client_id: &str,
    ) -> Result<AuthenticationResult, ManagementError> {
        self.refreshed_tokens
            .lock()
            .unwrap()
            .push(previous.access_token().to_string());
        self.refresh
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(bearer("AT-refreshed", "RT-refreshed")))
    }
}

/// Transport answering from a queue, recording every request.
pub(crate) struct ScriptedTransport {
    responses: Scripted<HttpResponse>,
    fallback: HttpResponse,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: Vec<Result<HttpResponse, ManagementError>>) -> Arc<Self> {
        Self::with_fallback(responses, HttpResponse::new(200, ""))
    }

    pub(crate) fn with_fallback(
        responses: Vec<Result<HttpResponse, ManagementError>>,
        fallback: HttpResponse,
    ) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManagementTransport for ScriptedTransport {
    async fn send(
        &self,
        request: &HttpRequest,
        _credential: &Credential,
    ) -> Result<HttpResponse, ManagementError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[derive(Default)]
pub(crate) struct FixedSubscriptions(pub(crate) HashMap<String, ManagementCertificate>);

#[async_trait]
impl SubscriptionStore for FixedSubscriptions {
    async fn certificate(&self, subscription_id: &str) -> Option<ManagementCertificate> {
        self.0.get(subscription_id).cloned()
    }
}
