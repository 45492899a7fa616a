//! HTTP request and response descriptors and the request builder.
//!
//! # Design
//! `RequestBuilder` turns an operation name and its `CallParameters` into a
//! fully specified `HttpRequest`: absolute URL, origin-form target, ordered
//! headers and a body description. Nothing here touches the network, so the
//! URL-length guard fires before any connection is attempted.
//!
//! Parameter placement follows the method: `POST` sends them as a
//! form-encoded body, every other method appends them as a query string.
//! A streaming upload declares `Transfer-Encoding: chunked` and never a
//! `Content-Length`.

use std::fmt;
use std::io::{self, Read};

use tracing::debug;

use crate::config::ClientConfig;
use crate::error::IdsError;
use crate::params::CallParameters;

/// Longest absolute URL (scheme, authority, path and query) the client sends.
pub const MAX_URL_LENGTH: usize = 2048;

const FIXED_HEADERS: [(&str, &str); 4] = [
    ("Cache-Control", "no-cache"),
    ("Pragma", "no-cache"),
    ("Accept", "text/html, image/gif, image/jpeg, */*;q=.2"),
    ("Connection", "keep-alive"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the request body is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    /// Form-encoded parameters, sent with an exact `Content-Length`.
    Form(String),
    /// Bytes from a caller-supplied source, framed with chunked encoding.
    Chunked,
}

/// A fully built request, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Absolute URL, as checked against `MAX_URL_LENGTH`.
    pub url: String,
    /// Path and query sent on the request line.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    /// First header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Builds an `HttpRequest` for one service operation.
pub struct RequestBuilder<'a> {
    config: &'a ClientConfig,
    operation: &'a str,
    method: HttpMethod,
    params: CallParameters,
    headers: Vec<(String, String)>,
    streaming: bool,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(config: &'a ClientConfig, operation: &'a str, method: HttpMethod) -> Self {
        Self {
            config,
            operation,
            method,
            params: CallParameters::new(),
            headers: Vec::new(),
            streaming: false,
        }
    }

    pub fn params(mut self, params: CallParameters) -> Self {
        self.params = params;
        self
    }

    /// Add a caller header. Headers are applied after the fixed ones; a name
    /// that is already present (case-insensitively) has its value replaced in
    /// place, so the last write wins.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Mark the request as carrying a chunked byte stream as its body.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn build(self) -> Result<HttpRequest, IdsError> {
        let path = format!("{}{}", self.config.base_path(), self.operation);
        let encoded = (!self.params.is_empty()).then(|| self.params.encode());

        let (target, form) = match (self.method, encoded) {
            (HttpMethod::Post, Some(form)) => (path, Some(form)),
            (_, Some(query)) => (format!("{path}?{query}"), None),
            (_, None) => (path, None),
        };

        let url = format!("{}{}", self.config.origin(), target);
        if url.len() > MAX_URL_LENGTH {
            return Err(IdsError::bad_request(format!(
                "Generated URL is of length {} which exceeds {MAX_URL_LENGTH}",
                url.len()
            )));
        }

        let mut headers = vec![("Host".to_string(), self.config.authority().to_string())];
        headers.extend(FIXED_HEADERS.iter().map(|(n, v)| (n.to_string(), v.to_string())));

        let body = if self.streaming {
            headers.push(("Transfer-Encoding".to_string(), "chunked".to_string()));
            RequestBody::Chunked
        } else if let Some(form) = form {
            headers.push((
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ));
            headers.push(("Content-Length".to_string(), form.len().to_string()));
            RequestBody::Form(form)
        } else {
            if matches!(self.method, HttpMethod::Post | HttpMethod::Put) {
                headers.push(("Content-Length".to_string(), "0".to_string()));
            }
            RequestBody::Empty
        };

        for (name, value) in self.headers {
            match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
                Some(existing) => {
                    debug!(header = %name, "caller header replaces a built-in value");
                    existing.1 = value;
                }
                None => headers.push((name, value)),
            }
        }

        Ok(HttpRequest {
            method: self.method,
            url,
            target,
            headers,
            body,
        })
    }
}

/// Readable handle to a response body, decoded from its transfer framing.
pub struct ResponseBody {
    inner: Box<dyn Read + Send>,
    content_length: Option<u64>,
}

impl ResponseBody {
    pub fn new(inner: Box<dyn Read + Send>, content_length: Option<u64>) -> Self {
        Self { inner, content_length }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Self::new(Box::new(io::Cursor::new(bytes)), Some(len))
    }

    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Length announced by the server, when it sent one.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Read the remainder of the body and decode it lossily as UTF-8.
    pub fn read_to_text(&mut self) -> io::Result<String> {
        let mut bytes = Vec::new();
        self.inner.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Status, headers and a live body handle.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn find_header<'h>(headers: &'h [(String, String)], name: &str) -> Option<&'h str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DataSelection;

    fn config() -> ClientConfig {
        ClientConfig::from_url("http://localhost:8181").unwrap()
    }

    fn params() -> CallParameters {
        let mut params = CallParameters::new();
        params.insert("sessionId", "S");
        params.insert_selection(&DataSelection::new().datasets([1, 2]));
        params
    }

    #[test]
    fn get_puts_parameters_in_query() {
        let config = config();
        let req = RequestBuilder::new(&config, "getStatus", HttpMethod::Get)
            .params(params())
            .build()
            .unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.target, "/ids/getStatus?sessionId=S&datasetIds=1%2C2");
        assert_eq!(req.url, "http://localhost:8181/ids/getStatus?sessionId=S&datasetIds=1%2C2");
        assert_eq!(req.body, RequestBody::Empty);
        assert_eq!(req.header("content-length"), None);
    }

    #[test]
    fn get_without_parameters_has_bare_path() {
        let config = config();
        let req = RequestBuilder::new(&config, "ping", HttpMethod::Get).build().unwrap();
        assert_eq!(req.target, "/ids/ping");
    }

    #[test]
    fn post_puts_parameters_in_form_body() {
        let config = config();
        let req = RequestBuilder::new(&config, "restore", HttpMethod::Post)
            .params(params())
            .build()
            .unwrap();
        assert_eq!(req.target, "/ids/restore");
        let form = "sessionId=S&datasetIds=1%2C2";
        assert_eq!(req.body, RequestBody::Form(form.to_string()));
        assert_eq!(req.header("Content-Type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(req.header("Content-Length"), Some(form.len().to_string().as_str()));
        assert_eq!(req.header("Transfer-Encoding"), None);
    }

    #[test]
    fn delete_uses_query() {
        let config = config();
        let req = RequestBuilder::new(&config, "delete", HttpMethod::Delete)
            .params(params())
            .build()
            .unwrap();
        assert!(req.target.starts_with("/ids/delete?sessionId=S"));
        assert_eq!(req.body, RequestBody::Empty);
    }

    #[test]
    fn streaming_sets_chunked_and_no_length() {
        let config = config();
        let req = RequestBuilder::new(&config, "put", HttpMethod::Put)
            .params(params())
            .streaming()
            .build()
            .unwrap();
        assert_eq!(req.body, RequestBody::Chunked);
        assert_eq!(req.header("Transfer-Encoding"), Some("chunked"));
        assert_eq!(req.header("Content-Length"), None);
        assert!(req.target.starts_with("/ids/put?"));
    }

    #[test]
    fn fixed_headers_come_first_in_order() {
        let config = config();
        let req = RequestBuilder::new(&config, "ping", HttpMethod::Get).build().unwrap();
        let names: Vec<&str> = req.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Host", "Cache-Control", "Pragma", "Accept", "Connection"]);
        assert_eq!(req.header("host"), Some("localhost:8181"));
        assert_eq!(req.header("Accept"), Some("text/html, image/gif, image/jpeg, */*;q=.2"));
    }

    #[test]
    fn caller_headers_are_appended() {
        let config = config();
        let req = RequestBuilder::new(&config, "getData", HttpMethod::Get)
            .header("Range", "bytes=10-")
            .build()
            .unwrap();
        assert_eq!(req.headers.last().unwrap(), &("Range".to_string(), "bytes=10-".to_string()));
    }

    #[test]
    fn colliding_caller_header_replaces_in_place() {
        let config = config();
        let req = RequestBuilder::new(&config, "ping", HttpMethod::Get)
            .header("cache-control", "max-age=0")
            .build()
            .unwrap();
        let matching: Vec<_> = req
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("Cache-Control"))
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(req.header("Cache-Control"), Some("max-age=0"));
        assert_eq!(req.headers[1].0, "Cache-Control");
    }

    #[test]
    fn url_length_guard_boundary() {
        let config = config();
        let prefix = "http://localhost:8181/ids/getData?sessionId=".len();

        let mut exact = CallParameters::new();
        exact.insert("sessionId", "a".repeat(MAX_URL_LENGTH - prefix));
        let req = RequestBuilder::new(&config, "getData", HttpMethod::Get)
            .params(exact)
            .build()
            .unwrap();
        assert_eq!(req.url.len(), MAX_URL_LENGTH);

        let mut over = CallParameters::new();
        over.insert("sessionId", "a".repeat(MAX_URL_LENGTH - prefix + 1));
        let err = RequestBuilder::new(&config, "getData", HttpMethod::Get)
            .params(over)
            .build()
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::BadRequest);
        assert!(err.message.contains("2049"), "{}", err.message);
    }

    #[test]
    fn long_post_body_is_not_limited() {
        let config = config();
        let mut params = CallParameters::new();
        params.insert("sessionId", "a".repeat(5000));
        let req = RequestBuilder::new(&config, "restore", HttpMethod::Post)
            .params(params)
            .build()
            .unwrap();
        assert_eq!(req.url, "http://localhost:8181/ids/restore");
    }

    #[test]
    fn response_body_reads_text() {
        let mut body = ResponseBody::from_bytes("IdsOK");
        assert_eq!(body.content_length(), Some(5));
        assert_eq!(body.read_to_text().unwrap(), "IdsOK");
    }
}
