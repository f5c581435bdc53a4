use super::poller::AsyncOperationPoller;
use super::request::ManagementRequest;
use super::transport::{HttpRequest, HttpResponse, ManagementTransport};
use crate::auth::{Credential, CredentialResolver, Resolution, SubscriptionIdentity, TokenScope};
use crate::common::ManagementError;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback for fatal call failures, invoked before the error is returned
pub type ErrorReporter = Arc<dyn Fn(&ManagementError) + Send + Sync>;

/// HTTP attempts per call: first try, after a silent refresh, after an
/// interactive sign-in.
pub const MAX_ATTEMPTS: u32 = 3;

const REQUEST_ID_HEADER: &str = "x-ms-request-id";

/// Runs management calls under the 401 retry protocol.
///
/// ```text
/// resolve ─▶ attempt 1 ─401─▶ silent refresh ─▶ attempt 2 ─401─▶ interactive ─▶ attempt 3
///                │                  │                │                              │
///               2xx         no refresh token /      2xx                          2xx / fail
///                           refresh rejected ───────────────▶ interactive
/// ```
///
/// Certificate credentials are never refreshed: their 401 is final. Any other
/// non-2xx answer is final at every step.
pub struct ManagementCallExecutor {
    resolver: Arc<CredentialResolver>,
    transport: Arc<dyn ManagementTransport>,
    poller: AsyncOperationPoller,
    user_agent: String,
    error_reporter: Option<ErrorReporter>,
}

impl ManagementCallExecutor {
    pub fn new(
        resolver: Arc<CredentialResolver>,
        transport: Arc<dyn ManagementTransport>,
        poller: AsyncOperationPoller,
    ) -> Self {
        let user_agent = resolver.settings().user_agent();
        Self {
            resolver,
            transport,
            poller,
            user_agent,
            error_reporter: None,
        }
    }

    /// Set a callback to be invoked when a call fails
    pub fn with_error_reporter(mut self, reporter: ErrorReporter) -> Self {
        self.error_reporter = Some(reporter);
        self
    }

    pub fn resolver(&self) -> &Arc<CredentialResolver> {
        &self.resolver
    }

    /// Executes `request` against `subscription` (tenant-wide when `None`)
    /// and returns the response body.
    ///
    /// A 202 answer to a request with an
    /// [`async_base_url`](ManagementRequest::async_base_url) is only returned
    /// once the operation has succeeded.
    ///
    /// # Errors
    ///
    /// [`ManagementError::HttpError`] carries the final non-2xx answer. The
    /// error reporter sees every failure except [`ManagementError::Cancelled`].
    pub async fn execute(
        &self,
        subscription: Option<&SubscriptionIdentity>,
        request: &ManagementRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ManagementError> {
        let result = self.run(subscription, request, cancel).await;

        if let Err(error) = &result {
            if matches!(error, ManagementError::Cancelled) {
                log::info!("{} {} cancelled", request.method, request.path);
            } else {
                log::error!("{} {} failed: {error}", request.method, request.path);
                if let Some(reporter) = &self.error_reporter {
                    reporter(error);
                }
            }
        }

        result
    }

    async fn run(
        &self,
        subscription: Option<&SubscriptionIdentity>,
        request: &ManagementRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ManagementError> {
        let scope = TokenScope::for_subscription(subscription);
        let tokens = self.resolver.tokens();

        let resolution = cancellable(cancel, self.resolver.resolve(subscription, false)).await?;
        let mut credential = self.adopt(&scope, resolution).await;

        let response = self
            .attempt(1, subscription, request, &credential, cancel)
            .await?;
        if response.status != 401 {
            return self
                .complete(subscription, request, &credential, response, cancel)
                .await;
        }

        // Silent refresh
        let refreshed = match &credential {
            Credential::Certificate(_) => {
                log::warn!("Management certificate rejected for {scope}");
                return Err(http_error(response));
            }
            Credential::BearerToken(token) if !token.has_refresh_token() => {
                log::debug!("No refresh token for {scope}, signing in again");
                None
            }
            Credential::BearerToken(token) => {
                match cancellable(cancel, self.resolver.refresh(token, subscription)).await {
                    Ok(refreshed) => Some(refreshed),
                    Err(e) if e.is_refresh_rejection() => {
                        log::info!("Refresh token for {scope} rejected, signing in again");
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        if let Some(token) = refreshed {
            log::info!("Refreshed token for {scope}");
            tokens.store(&scope, token.clone()).await;
            credential = Credential::BearerToken(token);

            let response = self
                .attempt(2, subscription, request, &credential, cancel)
                .await?;
            if response.status != 401 {
                return self
                    .complete(subscription, request, &credential, response, cancel)
                    .await;
            }
        }

        // Interactive re-authentication
        log::warn!("Invalidating token for {scope} after repeated 401");
        self.resolver.invalidate(&scope).await;
        let resolution = cancellable(cancel, self.resolver.resolve(subscription, true)).await?;
        credential = self.adopt(&scope, resolution).await;

        let response = self
            .attempt(MAX_ATTEMPTS, subscription, request, &credential, cancel)
            .await?;
        if !response.is_success() {
            log::warn!("Invalidating token for {scope} after final attempt");
            self.resolver.invalidate(&scope).await;
            return Err(http_error(response));
        }
        self.complete(subscription, request, &credential, response, cancel)
            .await
    }

    /// Persists a token obtained during resolution and returns the credential.
    async fn adopt(&self, scope: &TokenScope, resolution: Resolution) -> Credential {
        if let Some(token) = resolution.acquired {
            self.resolver.tokens().store(scope, token).await;
        }
        resolution.credential
    }

    async fn attempt(
        &self,
        attempt: u32,
        subscription: Option<&SubscriptionIdentity>,
        request: &ManagementRequest,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ManagementError> {
        if cancel.is_cancelled() {
            return Err(ManagementError::Cancelled);
        }

        let url = request.url(&self.endpoint(subscription, credential));
        log::debug!(
            "{} {url} (attempt {attempt}/{MAX_ATTEMPTS})",
            request.method
        );

        let http_request = HttpRequest::management(
            request.method.clone(),
            url,
            request.content,
            &self.user_agent,
            credential,
            request.body.clone(),
        );

        let response = cancellable(cancel, self.transport.send(&http_request, credential)).await?;
        log::debug!("Attempt {attempt} answered HTTP {}", response.status);
        Ok(response)
    }

    async fn complete(
        &self,
        subscription: Option<&SubscriptionIdentity>,
        request: &ManagementRequest,
        credential: &Credential,
        response: HttpResponse,
        cancel: &CancellationToken,
    ) -> Result<String, ManagementError> {
        if !response.is_success() {
            return Err(http_error(response));
        }
        if response.status != 202 || request.async_base_url.is_none() {
            return Ok(response.body);
        }

        let request_id = response
            .header(REQUEST_ID_HEADER)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ManagementError::invalid_response(format!(
                    "HTTP 202 without a valid {REQUEST_ID_HEADER} header"
                ))
            })?;

        let endpoint = self.endpoint(subscription, credential);
        if let Some(url) = request.operation_url(&endpoint, request_id) {
            log::info!("Waiting for operation {request_id}");
            self.poller
                .poll_until_terminal(&url, credential, request.content, cancel)
                .await?;
        }

        Ok(response.body)
    }

    fn endpoint(
        &self,
        subscription: Option<&SubscriptionIdentity>,
        credential: &Credential,
    ) -> String {
        if let Some(endpoint) = subscription
            .map(|s| s.management_endpoint.trim())
            .filter(|e| !e.is_empty())
        {
            return endpoint.to_string();
        }
        if let Credential::Certificate(certificate) = credential {
            if !certificate.management_uri.trim().is_empty() {
                return certificate.management_uri.clone();
            }
        }
        self.resolver.settings().service_management_uri.clone()
    }
}

/// Races `work` against `cancel`; a sign-in waiting on the browser is
/// abandoned as soon as the caller gives up.
async fn cancellable<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, ManagementError>>,
) -> Result<T, ManagementError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ManagementError::Cancelled),
        result = work => result,
    }
}

fn http_error(response: HttpResponse) -> ManagementError {
    ManagementError::HttpError {
        http_status: response.status,
        body: response.body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthMode, AuthModeHandle, AuthenticationResult, TokenStore};
    use crate::management::poller::PollerConfig;
    use crate::settings::ManagementSettings;
    use crate::test_support::{
        FixedSubscriptions, ScriptedAuthority, ScriptedTransport, bearer, certificate,
    };
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const ENDPOINT: &str = "https://management.core.windows.net/";

    struct Harness {
        executor: ManagementCallExecutor,
        tokens: TokenStore,
        authority: Arc<ScriptedAuthority>,
        transport: Arc<ScriptedTransport>,
    }

    fn harness(
        mode: AuthMode,
        authority: Arc<ScriptedAuthority>,
        transport: Arc<ScriptedTransport>,
    ) -> Harness {
        let settings = Arc::new(ManagementSettings {
            client_id: "client-id".to_string(),
            ..Default::default()
        });
        let tokens = TokenStore::new();
        let mut certificates = HashMap::new();
        certificates.insert("sub-cert".to_string(), certificate(ENDPOINT));

        let resolver = Arc::new(CredentialResolver::new(
            settings,
            AuthModeHandle::new(mode),
            tokens.clone(),
            authority.clone(),
            Arc::new(FixedSubscriptions(certificates)),
        ));
        let poller = AsyncOperationPoller::new(
            transport.clone(),
            PollerConfig {
                interval: Duration::from_millis(2000),
                max_polls: None,
            },
            "azmgmt/test",
        );

        Harness {
            executor: ManagementCallExecutor::new(resolver, transport.clone(), poller),
            tokens,
            authority,
            transport,
        }
    }

    fn subscription() -> SubscriptionIdentity {
        SubscriptionIdentity::new("sub-1", "tenant-1", ENDPOINT)
    }

    fn scope() -> TokenScope {
        TokenScope::Subscription("sub-1".to_string())
    }

    fn authorization(transport: &ScriptedTransport) -> Vec<String> {
        transport
            .requests()
            .iter()
            .map(|r| r.header("Authorization").unwrap_or_default().to_string())
            .collect()
    }

    async fn seeded(harness: &Harness, token: AuthenticationResult) {
        harness.tokens.store(&scope(), token).await;
    }

    async fn call(h: &Harness, request: &ManagementRequest) -> Result<String, ManagementError> {
        h.executor
            .execute(Some(&subscription()), request, &CancellationToken::new())
            .await
    }

    fn ok(body: &str) -> Result<HttpResponse, ManagementError> {
        Ok(HttpResponse::new(200, body))
    }

    fn unauthorized() -> Result<HttpResponse, ManagementError> {
        Ok(HttpResponse::new(401, "unauthorized"))
    }

    mod retry_protocol {
        use super::*;

        #[tokio::test]
        async fn test_success_on_first_attempt() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![ok("body")]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;

            let body = call(&h, &ManagementRequest::get("/sub-1/services"))
                .await
                .unwrap();

            assert_eq!(body, "body");
            assert_eq!(authorization(&h.transport), vec!["Bearer AT-1"]);
            assert!(h.authority.refreshed().is_empty());
            assert!(h.authority.requests().is_empty());
        }

        #[tokio::test]
        async fn test_refresh_after_first_401() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![unauthorized(), ok("after refresh")]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;

            let body = call(&h, &ManagementRequest::get("/sub-1/services"))
                .await
                .unwrap();

            assert_eq!(body, "after refresh");
            assert_eq!(
                authorization(&h.transport),
                vec!["Bearer AT-1", "Bearer AT-refreshed"]
            );
            assert_eq!(h.authority.refreshed(), vec!["AT-1"]);
            assert!(h.authority.requests().is_empty());
            assert_eq!(
                h.tokens.get(&scope()).await.unwrap().access_token(),
                "AT-refreshed"
            );
        }

        #[tokio::test]
        async fn test_refresh_rejected_falls_back_to_interactive() {
            let authority = ScriptedAuthority::scripted(
                vec![Ok(Some(bearer("AT-2", "RT-2")))],
                vec![Err(ManagementError::TokenEndpointFailure {
                    http_status: 400,
                    body: "invalid_grant".to_string(),
                })],
            );
            let h = harness(
                AuthMode::AzureAd,
                authority,
                ScriptedTransport::new(vec![unauthorized(), ok("after login")]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;

            let body = call(&h, &ManagementRequest::get("/sub-1/services"))
                .await
                .unwrap();

            assert_eq!(body, "after login");
            assert_eq!(
                authorization(&h.transport),
                vec!["Bearer AT-1", "Bearer AT-2"]
            );
            assert_eq!(h.authority.requests().len(), 1);
            assert_eq!(
                h.tokens.get(&scope()).await.unwrap().access_token(),
                "AT-2"
            );
        }

        #[tokio::test]
        async fn test_second_401_after_refresh_signs_in() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![Ok(Some(bearer("AT-3", "RT-3")))]),
                ScriptedTransport::new(vec![unauthorized(), unauthorized(), ok("third")]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;

            let body = call(&h, &ManagementRequest::get("/sub-1/services"))
                .await
                .unwrap();

            assert_eq!(body, "third");
            assert_eq!(
                authorization(&h.transport),
                vec!["Bearer AT-1", "Bearer AT-refreshed", "Bearer AT-3"]
            );
            assert_eq!(
                h.tokens.get(&scope()).await.unwrap().access_token(),
                "AT-3"
            );
        }

        #[tokio::test]
        async fn test_never_more_than_three_attempts() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![
                    unauthorized(),
                    unauthorized(),
                    unauthorized(),
                    ok("unused"),
                ]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;

            let error = call(&h, &ManagementRequest::get("/sub-1/services"))
                .await
                .unwrap_err();

            assert!(matches!(
                error,
                ManagementError::HttpError {
                    http_status: 401,
                    ..
                }
            ));
            assert_eq!(h.transport.requests().len(), MAX_ATTEMPTS as usize);
            assert!(h.tokens.get(&scope()).await.is_none());
        }

        #[tokio::test]
        async fn test_missing_refresh_token_skips_refresh() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![unauthorized(), ok("after login")]),
            );
            seeded(&h, bearer("AT-1", "")).await;

            call(&h, &ManagementRequest::get("/sub-1/services"))
                .await
                .unwrap();

            assert!(h.authority.refreshed().is_empty());
            assert_eq!(h.authority.requests().len(), 1);
            assert_eq!(h.transport.requests().len(), 2);
        }

        #[tokio::test]
        async fn test_other_refresh_failures_are_fatal() {
            let authority = ScriptedAuthority::scripted(
                vec![],
                vec![Err(ManagementError::TokenEndpointFailure {
                    http_status: 503,
                    body: "unavailable".to_string(),
                })],
            );
            let h = harness(
                AuthMode::AzureAd,
                authority,
                ScriptedTransport::new(vec![unauthorized()]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;

            let error = call(&h, &ManagementRequest::get("/sub-1/services"))
                .await
                .unwrap_err();

            assert_eq!(error.http_status(), Some(503));
            assert_eq!(h.transport.requests().len(), 1);
            assert!(h.authority.requests().is_empty());
        }

        #[tokio::test]
        async fn test_non_401_failure_is_not_retried() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![Ok(HttpResponse::new(404, "missing"))]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;

            let error = call(&h, &ManagementRequest::get("/sub-1/nothing"))
                .await
                .unwrap_err();

            assert!(matches!(
                error,
                ManagementError::HttpError { http_status: 404, ref body } if body == "missing"
            ));
            assert_eq!(h.transport.requests().len(), 1);
            assert!(h.tokens.get(&scope()).await.is_some());
        }

        #[tokio::test]
        async fn test_certificate_401_is_final() {
            let h = harness(
                AuthMode::CertificateBased,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![unauthorized()]),
            );
            let sub = SubscriptionIdentity::new("sub-cert", "", "");

            let error = h
                .executor
                .execute(
                    Some(&sub),
                    &ManagementRequest::get("/sub-cert/services"),
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();

            assert!(matches!(
                error,
                ManagementError::HttpError {
                    http_status: 401,
                    ..
                }
            ));
            assert_eq!(h.transport.requests().len(), 1);
            assert!(h.authority.refreshed().is_empty());
            assert!(h.authority.requests().is_empty());
        }
    }

    mod attempt_bound {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Copy, Debug)]
        enum Refresh {
            Renewed,
            Rejected,
            Unavailable,
        }

        fn refresh_result(refresh: Refresh) -> Result<AuthenticationResult, ManagementError> {
            match refresh {
                Refresh::Renewed => Ok(bearer("AT-refreshed", "RT-refreshed")),
                Refresh::Rejected => Err(ManagementError::TokenEndpointFailure {
                    http_status: 400,
                    body: "invalid_grant".to_string(),
                }),
                Refresh::Unavailable => Err(ManagementError::TokenEndpointFailure {
                    http_status: 503,
                    body: "unavailable".to_string(),
                }),
            }
        }

        /// Attempts the protocol makes when the transport answers `statuses`
        /// in order, and whether the call succeeds.
        fn expected(statuses: &[u16], refresh: Refresh) -> (usize, bool) {
            let success = |status: u16| (200..300).contains(&status);
            if statuses[0] != 401 {
                return (1, success(statuses[0]));
            }
            match refresh {
                Refresh::Unavailable => (1, false),
                Refresh::Rejected => (2, success(statuses[1])),
                Refresh::Renewed if statuses[1] != 401 => (2, success(statuses[1])),
                Refresh::Renewed => (3, success(statuses[2])),
            }
        }

        proptest! {
            #[test]
            fn test_attempts_follow_protocol(
                statuses in prop::collection::vec(
                    prop::sample::select(vec![200u16, 201, 204, 401, 403, 404, 500, 503]),
                    4
                ),
                refresh in prop_oneof![
                    Just(Refresh::Renewed),
                    Just(Refresh::Rejected),
                    Just(Refresh::Unavailable)
                ]
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .start_paused(true)
                    .build()
                    .unwrap();

                let (sent, refreshed, sign_ins, succeeded) = runtime.block_on(async {
                    let h = harness(
                        AuthMode::AzureAd,
                        ScriptedAuthority::scripted(vec![], vec![refresh_result(refresh)]),
                        ScriptedTransport::new(
                            statuses
                                .iter()
                                .map(|status| Ok(HttpResponse::new(*status, "body")))
                                .collect(),
                        ),
                    );
                    seeded(&h, bearer("AT-1", "RT-1")).await;

                    let result = call(&h, &ManagementRequest::get("/sub-1/services")).await;
                    (
                        h.transport.requests().len(),
                        h.authority.refreshed().len(),
                        h.authority.requests().len(),
                        result.is_ok(),
                    )
                });

                let (attempts, success) = expected(&statuses, refresh);
                prop_assert!(sent <= MAX_ATTEMPTS as usize);
                prop_assert_eq!(sent, attempts);
                prop_assert_eq!(succeeded, success);
                // Each recovery step runs at most once per call
                prop_assert!(refreshed <= 1);
                prop_assert!(sign_ins <= 1);
            }
        }
    }

    mod requests {
        use super::*;

        #[tokio::test]
        async fn test_first_call_signs_in_and_stores_token() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![Ok(Some(bearer("AT-new", "RT-new")))]),
                ScriptedTransport::new(vec![ok("body")]),
            );

            call(&h, &ManagementRequest::get("/sub-1/services"))
                .await
                .unwrap();

            assert_eq!(
                h.tokens.get(&scope()).await.unwrap().access_token(),
                "AT-new"
            );
            assert!(h.tokens.default_token().await.is_none());
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn test_concurrent_calls_share_one_sign_in() {
            let h = Arc::new(harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![Ok(Some(bearer("AT-new", "RT-new")))]),
                ScriptedTransport::new(vec![]),
            ));

            let calls: Vec<_> = (0..2)
                .map(|_| {
                    let h = h.clone();
                    tokio::spawn(async move {
                        call(&h, &ManagementRequest::get("/sub-1/services")).await
                    })
                })
                .collect();
            for handle in calls {
                handle.await.unwrap().unwrap();
            }

            assert_eq!(h.authority.requests().len(), 1);
            assert_eq!(
                authorization(&h.transport),
                vec!["Bearer AT-new", "Bearer AT-new"]
            );
            assert_eq!(
                h.tokens.get(&scope()).await.unwrap().access_token(),
                "AT-new"
            );
        }

        #[tokio::test]
        async fn test_certificate_calls_use_certificate_endpoint() {
            let h = harness(
                AuthMode::CertificateBased,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![ok("<Services/>")]),
            );
            let sub = SubscriptionIdentity::new("sub-cert", "", "");
            let request = ManagementRequest::get("/sub-cert/services")
                .with_content(crate::management::ContentKind::Xml);

            h.executor
                .execute(Some(&sub), &request, &CancellationToken::new())
                .await
                .unwrap();

            let sent = &h.transport.requests()[0];
            assert_eq!(
                sent.url,
                "https://management.core.windows.net/sub-cert/services"
            );
            assert!(sent.header("Authorization").is_none());
            assert_eq!(sent.header("Accept"), Some("application/xml"));
        }

        #[tokio::test]
        async fn test_tenant_call_without_sign_in() {
            let reported = Arc::new(Mutex::new(Vec::new()));
            let sink = reported.clone();
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![]),
            );
            let executor = h
                .executor
                .with_error_reporter(Arc::new(move |e: &ManagementError| {
                    sink.lock().unwrap().push(e.to_string());
                }));

            let error = executor
                .execute(
                    None,
                    &ManagementRequest::get("/subscriptions"),
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();

            assert!(matches!(error, ManagementError::NotSignedIn));
            assert!(h.transport.requests().is_empty());
            assert_eq!(reported.lock().unwrap().len(), 1);
        }
    }

    mod cancellation {
        use super::*;

        #[tokio::test]
        async fn test_cancelled_before_first_attempt() {
            let reported = Arc::new(Mutex::new(0));
            let sink = reported.clone();
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;
            let executor = h
                .executor
                .with_error_reporter(Arc::new(move |_: &ManagementError| {
                    *sink.lock().unwrap() += 1;
                }));
            let cancel = CancellationToken::new();
            cancel.cancel();

            let error = executor
                .execute(
                    Some(&subscription()),
                    &ManagementRequest::get("/sub-1/services"),
                    &cancel,
                )
                .await
                .unwrap_err();

            assert!(matches!(error, ManagementError::Cancelled));
            assert!(h.transport.requests().is_empty());
            assert_eq!(*reported.lock().unwrap(), 0);
        }

        #[tokio::test]
        async fn test_cancel_while_waiting_for_sign_in() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::never_completing(),
                ScriptedTransport::new(vec![]),
            );
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            });

            let outcome = tokio::time::timeout(
                Duration::from_secs(2),
                h.executor.execute(
                    Some(&subscription()),
                    &ManagementRequest::get("/sub-1/services"),
                    &cancel,
                ),
            )
            .await
            .expect("sign-in was not abandoned after cancellation");

            assert!(matches!(outcome, Err(ManagementError::Cancelled)));
            assert_eq!(h.authority.requests().len(), 1);
            assert!(h.transport.requests().is_empty());
            assert!(h.tokens.get(&scope()).await.is_none());
        }

        #[tokio::test]
        async fn test_cancel_while_waiting_for_interactive_retry() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::never_completing(),
                ScriptedTransport::new(vec![unauthorized()]),
            );
            seeded(&h, bearer("AT-1", "")).await;
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                trigger.cancel();
            });

            let outcome = tokio::time::timeout(
                Duration::from_secs(2),
                h.executor.execute(
                    Some(&subscription()),
                    &ManagementRequest::get("/sub-1/services"),
                    &cancel,
                ),
            )
            .await
            .expect("interactive retry was not abandoned after cancellation");

            assert!(matches!(outcome, Err(ManagementError::Cancelled)));
            assert_eq!(h.transport.requests().len(), 1);
        }
    }

    mod async_operations {
        use super::*;

        fn accepted(request_id: Option<&str>) -> Result<HttpResponse, ManagementError> {
            let response = HttpResponse::new(202, "<Accepted/>");
            Ok(match request_id {
                Some(id) => response.with_header("x-ms-request-id", id),
                None => response,
            })
        }

        fn status(status: &str) -> Result<HttpResponse, ManagementError> {
            Ok(HttpResponse::new(
                200,
                format!("<Operation><Status>{status}</Status></Operation>"),
            ))
        }

        #[tokio::test(start_paused = true)]
        async fn test_202_polls_until_succeeded() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![
                    accepted(Some("req-9")),
                    status("InProgress"),
                    status("Succeeded"),
                ]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;
            let request = ManagementRequest::delete("/sub-1/services/hostedservices/web")
                .with_async_base_url("/sub-1/operations/");

            let body = call(&h, &request).await.unwrap();

            assert_eq!(body, "<Accepted/>");
            let sent = h.transport.requests();
            assert_eq!(sent.len(), 3);
            assert_eq!(
                sent[1].url,
                "https://management.core.windows.net/sub-1/operations/req-9"
            );
            assert_eq!(sent[2].header("Authorization"), Some("Bearer AT-1"));
        }

        #[tokio::test]
        async fn test_202_without_request_id() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![accepted(None)]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;
            let request =
                ManagementRequest::delete("/sub-1/x").with_async_base_url("/sub-1/operations/");

            let error = call(&h, &request).await.unwrap_err();

            assert!(matches!(error, ManagementError::InvalidResponse { .. }));
        }

        #[tokio::test]
        async fn test_202_without_async_base_url_returns_immediately() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![accepted(None)]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;

            let body = call(&h, &ManagementRequest::delete("/sub-1/x"))
                .await
                .unwrap();

            assert_eq!(body, "<Accepted/>");
            assert_eq!(h.transport.requests().len(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn test_failed_operation() {
            let h = harness(
                AuthMode::AzureAd,
                ScriptedAuthority::with(vec![]),
                ScriptedTransport::new(vec![accepted(Some("req-1")), status("Failed")]),
            );
            seeded(&h, bearer("AT-1", "RT-1")).await;
            let request = ManagementRequest::post("/sub-1/x", "<x/>")
                .with_async_base_url("/sub-1/operations/");

            let error = call(&h, &request).await.unwrap_err();

            assert!(matches!(error, ManagementError::PollFailure { .. }));
        }
    }
}
