use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_RESPONSE_BODY_SIZE: usize = 20 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;
pub const MAX_HEADERS_COUNT: usize = 32;

/// Transport the platform shell provides.
///
/// Implementations perform exactly one network round trip per call and never
/// retry on their own. Status codes are reported in the response, not as
/// errors; `Err` is for requests that produced no response at all.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedUrl {
    url: String,
    host: String,
}

impl ValidatedUrl {
    pub fn new(url: impl AsRef<str>) -> Result<Self, HttpError> {
        let raw = url.as_ref().trim();
        if raw.is_empty() {
            return Err(HttpError::InvalidUrl {
                url: String::new(),
                reason: "empty URL".to_string(),
            });
        }
        if raw.len() > MAX_URL_LENGTH {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(raw),
                reason: format!("longer than {} bytes", MAX_URL_LENGTH),
            });
        }
        let parsed = Url::parse(raw).map_err(|e| HttpError::InvalidUrl {
            url: Self::truncate_url(raw),
            reason: e.to_string(),
        })?;
        Self::from_url(parsed)
    }

    pub fn from_url(parsed: Url) -> Result<Self, HttpError> {
        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(parsed.as_str()),
                reason: format!(
                    "scheme '{}' is not http(s)",
                    scheme
                ),
            });
        }

        let host = match parsed.host_str() {
            Some(host) => host.to_lowercase(),
            None => {
                return Err(HttpError::InvalidUrl {
                    url: Self::truncate_url(parsed.as_str()),
                    reason: "no host".to_string(),
                })
            }
        };

        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(HttpError::InvalidUrl {
                url: Self::truncate_url(parsed.as_str()),
                reason: "embedded credentials".to_string(),
            });
        }

        Ok(Self {
            url: parsed.to_string(),
            host,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn truncate_url(url: &str) -> String {
        if url.len() <= 100 {
            url.to_string()
        } else {
            let mut end = 100;
            while !url.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &url[..end])
        }
    }
}

/// A GET request. Searches and image downloads are the only traffic the core
/// generates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    url: ValidatedUrl,
    headers: Vec<(String, String)>,
    timeout_ms: u64,
    request_id: String,
    max_response_size: usize,
}

impl HttpRequest {
    pub fn new(url: ValidatedUrl) -> Self {
        Self {
            url,
            headers: Vec::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_id: uuid::Uuid::new_v4().to_string(),
            max_response_size: MAX_RESPONSE_BODY_SIZE,
        }
    }

    pub fn get(url: impl AsRef<str>) -> Result<Self, HttpError> {
        Ok(Self::new(ValidatedUrl::new(url)?))
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, HttpError> {
        let name = name.into();
        let value = value.into();

        if self.headers.len() >= MAX_HEADERS_COUNT {
            return Err(HttpError::InvalidRequest {
                reason: format!("too many headers (max {})", MAX_HEADERS_COUNT),
            });
        }
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(HttpError::InvalidRequest {
                reason: format!("invalid header name '{}'", name),
            });
        }
        if value.contains(['\r', '\n', '\0']) {
            return Err(HttpError::InvalidRequest {
                reason: format!("header '{}' contains CR, LF or NUL", name),
            });
        }

        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value));
        Ok(self)
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Result<Self, HttpError> {
        if timeout_ms == 0 {
            return Err(HttpError::InvalidRequest {
                reason: "zero timeout".to_string(),
            });
        }
        if timeout_ms > MAX_TIMEOUT_MS {
            return Err(HttpError::InvalidRequest {
                reason: format!("timeout above {}ms", MAX_TIMEOUT_MS),
            });
        }
        self.timeout_ms = timeout_ms;
        Ok(self)
    }

    pub fn with_max_response_size(mut self, max_bytes: usize) -> Self {
        self.max_response_size = max_bytes.min(MAX_RESPONSE_BODY_SIZE);
        self
    }

    pub fn url(&self) -> &ValidatedUrl {
        &self.url
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn max_response_size(&self) -> usize {
        self.max_response_size
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum HttpError {
    #[error("rejected URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("malformed request: {reason}")]
    InvalidRequest { reason: String },

    #[error("could not resolve {host}: {message}")]
    DnsError { host: String, message: String },

    #[error("could not reach {host}: {message}")]
    ConnectionError { host: String, message: String },

    #[error("secure connection to {host} failed: {message}")]
    TlsError { host: String, message: String },

    #[error("no response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64, request_id: String },

    #[error("request was cancelled")]
    Cancelled { request_id: String },

    #[error("response of {size} bytes is over the {max} byte limit")]
    ResponseTooLarge { size: usize, max: usize },

    #[error("unreadable response: {reason}")]
    InvalidResponse { reason: String, request_id: String },
}

impl HttpError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HttpError::Timeout { .. }
                | HttpError::ConnectionError { .. }
                | HttpError::DnsError { .. }
        )
    }

    /// True when no usable response reached the core.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HttpError::DnsError { .. }
                | HttpError::ConnectionError { .. }
                | HttpError::TlsError { .. }
                | HttpError::Timeout { .. }
                | HttpError::Cancelled { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    body: Bytes,
    request_id: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            request_id: request_id.into(),
        }
    }

    /// Convenience for shells and tests answering `request`.
    pub fn for_request(request: &HttpRequest, status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(status, body, request.request_id())
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}
