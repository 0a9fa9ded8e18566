use crate::{
    errors::ErrorKind,
    http::types::{HeaderMap, Method, Scheme, Url, Version},
    limits::ReqLimits,
    metric::Metric,
};

/// High-performance HTTP request representation.
///
/// All data is zero-copy, referenced from the connection's receive buffer
/// (or, for header names, from a small per-connection scratch area used to
/// hold the lowercased copy). Populated incrementally by
/// [`crate::http::parser::Parser`] as bytes arrive.
#[derive(Debug, Clone, PartialEq)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    scheme: Scheme,
    url: Url,
    version: Version,
    port: u16,
    host: &'static [u8],
    headers: HeaderMap,
    content_length: Option<usize>,
    keep_alive_hint: Option<bool>,
    body: Option<&'static [u8]>,
    name_scratch: Vec<u8>,
    pub metric: Metric,
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            scheme: Scheme::Unknown,
            url: Url::new(limits),
            version: Version::Http11,
            port: 80,
            host: b"",
            headers: HeaderMap::new(limits.header_count),
            content_length: None,
            keep_alive_hint: None,
            body: None,
            name_scratch: Vec::with_capacity(limits.header_count * limits.header_name_size),
            metric: Metric::new(),
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.scheme = Scheme::Unknown;
        self.url.clear();
        self.version = Version::Http11;
        self.port = 80;
        self.host = b"";
        self.headers.reset();
        self.content_length = None;
        self.keep_alive_hint = None;
        self.body = None;
        self.name_scratch.clear();
        self.metric.reset();
    }
}

// Mutators used by the parser while assembling a request.
impl Request {
    #[inline(always)]
    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    #[inline(always)]
    pub(crate) fn set_scheme(&mut self, scheme: Scheme) {
        self.scheme = scheme;
    }

    #[inline(always)]
    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    #[inline(always)]
    pub(crate) fn set_authority(&mut self, host: &'static [u8], port: u16) {
        self.host = host;
        self.port = port;
    }

    #[inline(always)]
    pub(crate) fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    #[inline(always)]
    pub(crate) fn scratch_name_mut(&mut self) -> &mut Vec<u8> {
        &mut self.name_scratch
    }

    #[inline(always)]
    pub(crate) fn push_header(
        &mut self,
        name: &'static [u8],
        value: &'static [u8],
    ) -> Result<(), ErrorKind> {
        self.headers.push(name, value);
        Ok(())
    }

    #[inline(always)]
    pub(crate) fn set_content_length(&mut self, len: Option<usize>) {
        self.content_length = len;
    }

    #[inline(always)]
    pub(crate) fn content_length_raw(&self) -> Option<usize> {
        self.content_length
    }

    #[inline(always)]
    pub(crate) fn set_keep_alive_hint(&mut self, hint: Option<bool>) {
        self.keep_alive_hint = hint;
    }

    #[inline(always)]
    pub(crate) fn keep_alive_hint(&self) -> Option<bool> {
        self.keep_alive_hint
    }

    #[inline(always)]
    pub(crate) fn set_body(&mut self, body: &'static [u8]) {
        self.body = Some(body);
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request-target scheme; [`Scheme::Unknown`] for origin-form targets.
    #[inline(always)]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Host from an absolute-form target, or from the `Host` header
    /// otherwise. Empty if neither was present.
    #[inline(always)]
    pub const fn host(&self) -> &[u8] {
        self.host
    }

    /// Port from an absolute-form target, or the scheme's default (`80`
    /// unless an absolute-form `https://` target was used).
    #[inline(always)]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// All values for a given (case-insensitive) header name, in the order
    /// they appeared on the wire.
    #[inline(always)]
    pub fn headers(&self, name: &[u8]) -> impl Iterator<Item = &[u8]> {
        self.headers.get_all(name)
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// The `Connection` header's parsed value, if present and recognized:
    /// `Some(true)` for `keep-alive`, `Some(false)` for `close`.
    #[inline(always)]
    pub const fn connection_keep_alive(&self) -> Option<bool> {
        self.keep_alive_hint
    }

    /// Returns the request body if present.
    #[inline(always)]
    pub const fn body(&self) -> Option<&[u8]> {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_defaults() {
        let limits = ReqLimits::default().precalculate();
        let mut request = Request::new(&limits);

        request.set_method(Method::Post);
        request.set_content_length(Some(4));
        request.push_header(b"x", b"y").unwrap();

        request.reset();

        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.content_length(), None);
        assert_eq!(request.header(b"x"), None);
    }
}
