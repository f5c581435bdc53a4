use reqwest::Method;

/// Body format of a management call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentKind {
    #[default]
    Json,
    Xml,
}

impl ContentKind {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ContentKind::Json => "application/json",
            ContentKind::Xml => "application/xml",
        }
    }
}

/// One management-plane call as issued by a caller.
///
/// `path` is appended to the management endpoint of the target
/// subscription; an absolute `http(s)://` URL is used verbatim.
#[derive(Clone, Debug)]
pub struct ManagementRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<String>,
    pub content: ContentKind,
    /// Operation status path prefix. When set, a 202 answer is followed by
    /// polling `{async_base_url}{x-ms-request-id}` until the operation ends.
    pub async_base_url: Option<String>,
}

impl ManagementRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            content: ContentKind::default(),
            async_base_url: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_content(mut self, content: ContentKind) -> Self {
        self.content = content;
        self
    }

    pub fn with_async_base_url(mut self, async_base_url: impl Into<String>) -> Self {
        self.async_base_url = Some(async_base_url.into());
        self
    }

    pub fn url(&self, management_endpoint: &str) -> String {
        join_url(management_endpoint, &self.path)
    }

    /// Status URL of the operation identified by `request_id`, if this
    /// request asked for polling.
    pub fn operation_url(&self, management_endpoint: &str, request_id: &str) -> Option<String> {
        self.async_base_url
            .as_deref()
            .map(|base| join_url(management_endpoint, &format!("{base}{request_id}")))
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("https://") || path.starts_with("http://") {
        return path.to_string();
    }
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
