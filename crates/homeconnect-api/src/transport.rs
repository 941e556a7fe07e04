// Transport core: one HTTP request in, one classified response out.
//
// Builds the shared `reqwest::Client`, turns a `Request` into a wire call,
// wraps failures uniformly, and provides the body decoders (JSON, redirect,
// empty, event stream). Retry policy lives one layer up in `retry`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{Error, ErrorBody};
use crate::sse::{self, EventStream};

/// Media type of the data API.
pub const VENDOR_JSON: &str = "application/vnd.bsh.sdk.v1+json";
/// Media type of the server-sent event stream.
pub const EVENT_STREAM: &str = "text/event-stream";

const USER_AGENT: &str = concat!("homeconnect-rs/", env!("CARGO_PKG_VERSION"));

// Form and JSON fields never written to debug logs.
const SECRET_FIELDS: &[&str] = &[
    "access_token",
    "refresh_token",
    "id_token",
    "client_secret",
    "device_code",
    "code",
];

// ── Endpoint ─────────────────────────────────────────────────────────

/// Which deployment of the service to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// Production servers (rest of world).
    #[default]
    Production,
    /// Developer simulator (virtual appliances, unattended auth).
    Simulator,
    /// Production servers for mainland China.
    China,
}

impl Endpoint {
    pub fn base_url(self) -> Result<Url, Error> {
        let raw = match self {
            Self::Production => "https://api.home-connect.com",
            Self::Simulator => "https://simulator.home-connect.com",
            Self::China => "https://api.home-connect.cn",
        };
        Ok(Url::parse(raw)?)
    }

    pub fn is_simulator(self) -> bool {
        matches!(self, Self::Simulator)
    }
}

// ── Request ──────────────────────────────────────────────────────────

/// Body of an outbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A single logical request. Immutable once sent; a retry sends a fresh
/// clone of the original template.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path relative to the base URL, including any query string.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    /// Safe to repeat automatically on failure.
    pub idempotent: bool,
    /// Long-lived streaming response: no total request timeout.
    pub streaming: bool,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let idempotent = matches!(
            method,
            Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
        );
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            idempotent,
            streaming: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// JSON body in the vendor media type.
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(VENDOR_JSON));
        self.body = Some(RequestBody::Json(body));
        self
    }

    /// `application/x-www-form-urlencoded` body.
    pub fn form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Some(RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ));
        self
    }

    /// Request a server-sent event stream.
    pub fn event_stream(mut self) -> Self {
        self.headers
            .insert(header::ACCEPT, HeaderValue::from_static(EVENT_STREAM));
        self.streaming = true;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a bearer token. The header is marked sensitive so it is
    /// never printed by the debug logger.
    pub fn with_bearer(mut self, access_token: &str) -> Result<Self, Error> {
        let mut value = HeaderValue::from_str(&format!("Bearer {access_token}")).map_err(|e| {
            Error::Authorisation {
                message: format!("access token is not a valid header value: {e}"),
                source: None,
            }
        })?;
        value.set_sensitive(true);
        self.headers.insert(header::AUTHORIZATION, value);
        Ok(self)
    }

    /// The bearer token this request carries, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

// ── Validation seam ──────────────────────────────────────────────────

/// Inspects every decoded JSON body before it is handed to the caller.
///
/// Implementations must never fail the call; they only observe.
pub trait BodyValidator: Send + Sync {
    fn validate(&self, request: &Request, body: &serde_json::Value);
}

// ── TransportConfig ──────────────────────────────────────────────────

/// Shared transport configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: Url,
    /// Total timeout for ordinary (non-streaming) requests.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Maximum silence on the event stream. Must exceed the server's
    /// keep-alive interval (about 55 s).
    pub stream_read_timeout: Duration,
    /// `Accept-Language` for translated names in responses.
    pub language: Option<String>,
    /// Log outbound/inbound headers at debug level.
    pub log_headers: bool,
    /// Log outbound/inbound bodies at debug level.
    pub log_bodies: bool,
}

impl TransportConfig {
    /// Defaults for one of the built-in deployments.
    pub fn for_endpoint(endpoint: Endpoint) -> Result<Self, Error> {
        Ok(Self::new(endpoint.base_url()?))
    }

    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
            stream_read_timeout: Duration::from_secs(120),
            language: None,
            log_headers: false,
            log_bodies: false,
        }
    }

    /// Build a `reqwest::Client` from this config.
    ///
    /// Redirects are not followed: the authorization code flow needs to
    /// see the 302 itself.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        if let Some(ref language) = self.language {
            let value = HeaderValue::from_str(language)
                .map_err(|e| Error::Config(format!("invalid language tag '{language}': {e}")))?;
            headers.insert(header::ACCEPT_LANGUAGE, value);
        }

        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(self.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::HttpClient(e.to_string()))
    }
}

// ── Transport ────────────────────────────────────────────────────────

/// Issues individual requests and decodes their responses.
pub struct Transport {
    http: reqwest::Client,
    config: TransportConfig,
    validator: Option<Arc<dyn BodyValidator>>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Result<Self, Error> {
        let http = config.build_client()?;
        Ok(Self {
            http,
            config,
            validator: None,
        })
    }

    /// Wrap a pre-built `reqwest::Client` (tests, custom TLS).
    pub fn with_client(http: reqwest::Client, config: TransportConfig) -> Self {
        Self {
            http,
            config,
            validator: None,
        }
    }

    /// Install the validator every JSON body passes through.
    pub fn with_validator(mut self, validator: Arc<dyn BodyValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Resolve a request path against the base URL.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.config.base_url.join(path)?)
    }

    /// Send one request. Statuses outside 2xx (except 302) become
    /// [`Error::StatusCode`] with the parsed error body.
    pub async fn send(&self, request: &Request) -> Result<reqwest::Response, Error> {
        let url = self.url(&request.path)?;
        self.log_request(request, &url);

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if !request.headers.contains_key(header::ACCEPT) {
            builder = builder.header(header::ACCEPT, VENDOR_JSON);
        }
        if !request.streaming {
            builder = builder.timeout(self.config.timeout);
        }
        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.body(value.to_string()),
            Some(RequestBody::Form(fields)) => builder.form(fields),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status();
        if self.config.log_headers {
            debug!(
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                headers = ?response.headers(),
                "response headers"
            );
        }

        if status.is_success() || status == StatusCode::FOUND {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        self.log_body(request, "error body", &text);
        Err(Error::StatusCode {
            status: status.as_u16(),
            method: request.method.to_string(),
            path: request.path.clone(),
            body: ErrorBody::parse(&text),
            retry_after,
        })
    }

    // ── Decoders ─────────────────────────────────────────────────────

    /// Decode a JSON body. Requires a JSON content type and a status
    /// other than 204; the parsed value passes through the installed
    /// [`BodyValidator`] before deserialisation.
    pub async fn decode_json<T: DeserializeOwned>(
        &self,
        request: &Request,
        response: reqwest::Response,
    ) -> Result<T, Error> {
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if status == StatusCode::NO_CONTENT || !content_type.as_deref().is_some_and(is_json) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Validation {
                message: format!(
                    "expected a JSON body for {} {}, got HTTP {} with content type {}",
                    request.method,
                    request.path,
                    status.as_u16(),
                    content_type.as_deref().unwrap_or("<none>"),
                ),
                body,
            });
        }

        let text = response.text().await?;
        self.log_body(request, "response body", &text);

        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| Error::Validation {
                message: e.to_string(),
                body: text.clone(),
            })?;

        if let Some(ref validator) = self.validator {
            validator.validate(request, &value);
        }

        serde_json::from_value(value).map_err(|e| Error::Validation {
            message: format!("{} {}: {e}", request.method, request.path),
            body: text,
        })
    }

    /// Require a 302 with a `location` header and return its target.
    pub async fn decode_redirect(
        &self,
        request: &Request,
        response: reqwest::Response,
    ) -> Result<String, Error> {
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        match location {
            Some(location) if status == StatusCode::FOUND => Ok(location),
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(Error::StatusCode {
                    status: status.as_u16(),
                    method: request.method.to_string(),
                    path: request.path.clone(),
                    body: ErrorBody::Raw(text),
                    retry_after: None,
                })
            }
        }
    }

    /// Require an empty body. The body is read in full, so chunked and
    /// unlabelled responses are checked too.
    pub async fn decode_empty(
        &self,
        request: &Request,
        response: reqwest::Response,
    ) -> Result<(), Error> {
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(());
        }
        Err(Error::Validation {
            message: format!(
                "expected an empty body for {} {}, got {} bytes",
                request.method,
                request.path,
                body.len()
            ),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    /// Hand the live body to the event stream parser.
    pub fn open_event_stream(&self, request: &Request, response: reqwest::Response) -> EventStream {
        debug!(path = %request.path, "event stream opened");
        sse::event_stream(response, self.config.stream_read_timeout)
    }

    // ── Debug logging ────────────────────────────────────────────────

    fn log_request(&self, request: &Request, url: &Url) {
        if self.config.log_headers {
            debug!(method = %request.method, %url, headers = ?request.headers, "request headers");
        } else {
            debug!("{} {}", request.method, url);
        }
        if self.config.log_bodies {
            if let Some(ref body) = request.body {
                debug!(
                    method = %request.method,
                    path = %request.path,
                    body = %Redacted(body),
                    "request body"
                );
            }
        }
    }

    fn log_body(&self, request: &Request, what: &str, text: &str) {
        if !self.config.log_bodies {
            return;
        }
        let shown = serde_json::from_str::<serde_json::Value>(text)
            .map(|mut v| {
                redact_json(&mut v);
                v.to_string()
            })
            .unwrap_or_else(|_| text.to_owned());
        debug!(method = %request.method, path = %request.path, body = %shown, "{what}");
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn is_json(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    essence.eq_ignore_ascii_case("application/json") || essence.eq_ignore_ascii_case(VENDOR_JSON)
}

/// `retry-after` as delta-seconds. HTTP-date values are not used by
/// this service and are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn redact_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if SECRET_FIELDS.contains(&key.as_str()) {
                    *v = serde_json::Value::String("<redacted>".into());
                } else {
                    redact_json(v);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact_json),
        _ => {}
    }
}

struct Redacted<'a>(&'a RequestBody);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            RequestBody::Json(value) => {
                let mut value = value.clone();
                redact_json(&mut value);
                write!(f, "{value}")
            }
            RequestBody::Form(fields) => {
                let mut first = true;
                for (key, value) in fields {
                    if !first {
                        f.write_str("&")?;
                    }
                    first = false;
                    if SECRET_FIELDS.contains(&key.as_str()) {
                        write!(f, "{key}=<redacted>")?;
                    } else {
                        write!(f, "{key}={value}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_follows_method() {
        assert!(Request::get("/api/homeappliances").idempotent);
        assert!(Request::put("/api/x").idempotent);
        assert!(Request::delete("/api/x").idempotent);
        assert!(!Request::post("/security/oauth/token").idempotent);
    }

    #[test]
    fn bearer_round_trips_and_is_sensitive() {
        let request = Request::get("/api/homeappliances")
            .with_bearer("abc123")
            .unwrap();
        assert_eq!(request.bearer(), Some("abc123"));
        assert!(request.headers[header::AUTHORIZATION].is_sensitive());
    }

    #[test]
    fn json_content_types() {
        assert!(is_json("application/json"));
        assert!(is_json("application/json; charset=utf-8"));
        assert!(is_json("application/vnd.bsh.sdk.v1+json"));
        assert!(!is_json("text/html"));
    }

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn redacts_secret_form_fields() {
        let body = RequestBody::Form(vec![
            ("grant_type".into(), "refresh_token".into()),
            ("refresh_token".into(), "secret".into()),
        ]);
        assert_eq!(
            Redacted(&body).to_string(),
            "grant_type=refresh_token&refresh_token=<redacted>"
        );
    }

    #[test]
    fn redacts_nested_json_tokens() {
        let mut value = serde_json::json!({
            "access_token": "a",
            "nested": [{ "refresh_token": "r", "scope": "Monitor" }]
        });
        redact_json(&mut value);
        assert_eq!(value["access_token"], "<redacted>");
        assert_eq!(value["nested"][0]["refresh_token"], "<redacted>");
        assert_eq!(value["nested"][0]["scope"], "Monitor");
    }

    #[test]
    fn endpoints_resolve() {
        for endpoint in [Endpoint::Production, Endpoint::Simulator, Endpoint::China] {
            let config = TransportConfig::for_endpoint(endpoint).unwrap();
            assert_eq!(config.base_url.scheme(), "https");
        }
        assert_eq!(
            Endpoint::Simulator.base_url().unwrap().as_str(),
            "https://simulator.home-connect.com/"
        );
        assert!(Endpoint::Simulator.is_simulator());
        assert!(!Endpoint::China.is_simulator());
    }
}
