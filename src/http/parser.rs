//! Incremental, restartable byte-level parser for HTTP/1.x request messages.
//!
//! `Parser` holds all state needed to resume parsing a message across an
//! arbitrary split of its bytes across many socket reads: which top-level
//! production it's in, and how many headers it has already accepted. Nothing
//! is consumed from the caller's buffer until a full production (the
//! start-line, one header, or the whole body) has been recognized, so a
//! production's bytes are always found starting at the same relative offset
//! of whatever view is passed to [`Parser::parse`] on the next call -
//! re-scanning from the front is therefore always correct, never redundant
//! work that changes the result.

use memchr::memchr;

use crate::{
    errors::ErrorKind,
    http::{
        request::Request,
        types::{self, is_token_slice, is_uri_char, Method, Scheme, Url, Version},
    },
    limits::ReqLimits,
    query::Query,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StartLine,
    Header,
    Body,
    Completed,
}

/// Outcome of a single [`Parser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// The message is fully parsed; `Request` is complete.
    Complete,
    /// More bytes are required; nothing further can be done with `view`.
    NeedMore,
}

/// Coarse parser phase, exposed so the connection lifecycle can classify a
/// deadline expiry without reaching into [`Parser`]'s private state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    StartLine,
    HeaderOrBody,
}

#[derive(Debug)]
pub(crate) struct Parser {
    state: State,
    headers_seen: usize,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new() -> Self {
        Self {
            state: State::StartLine,
            headers_seen: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.state = State::StartLine;
        self.headers_seen = 0;
    }

    #[inline(always)]
    pub(crate) fn phase(&self) -> Phase {
        match self.state {
            State::StartLine => Phase::StartLine,
            State::Header | State::Body | State::Completed => Phase::HeaderOrBody,
        }
    }

    /// Parses as much of `view` as currently possible, writing recognized
    /// fields directly into `request`.
    ///
    /// Returns the number of leading bytes of `view` that are now fully
    /// accounted for and safe to remove from the caller's buffer via
    /// [`crate::buffer::FlatBuffer::consume`]. The caller must present the
    /// unconsumed remainder (plus whatever new bytes arrived) verbatim on
    /// the next call; bytes already reported as consumed must never be
    /// re-presented.
    pub(crate) fn parse(
        &mut self,
        view: &[u8],
        request: &mut Request,
        limits: &ReqLimits,
    ) -> Result<(usize, Progress), ErrorKind> {
        let mut consumed = 0;

        loop {
            match self.state {
                State::StartLine => match take_line(&view[consumed..], limits.precalc.first_line)?
                {
                    None => return Ok((consumed, Progress::NeedMore)),
                    Some((line, n)) => {
                        parse_request_line(line, request, limits)?;
                        consumed += n;
                        self.state = State::Header;
                    }
                },
                State::Header => {
                    match take_line(&view[consumed..], limits.precalc.h_line)? {
                        None => return Ok((consumed, Progress::NeedMore)),
                        Some((b"", n)) => {
                            // Blank line: end of headers.
                            consumed += n;
                            finalize_headers(request, limits)?;
                            self.state = State::Body;
                        }
                        Some((line, n)) => {
                            self.headers_seen += 1;
                            if self.headers_seen > limits.header_count {
                                return Err(ErrorKind::TooManyHeaders);
                            }
                            parse_header_line(line, request, limits)?;
                            consumed += n;
                        }
                    }
                }
                State::Body => {
                    let needed = request.content_length_raw().unwrap_or(0);
                    let available = view.len() - consumed;
                    if available < needed {
                        return Ok((consumed, Progress::NeedMore));
                    }
                    if needed > 0 {
                        request.set_body(slice_to_static(&view[consumed..consumed + needed]));
                        consumed += needed;
                    }
                    self.state = State::Completed;
                    return Ok((consumed, Progress::Complete));
                }
                State::Completed => return Ok((consumed, Progress::Complete)),
            }
        }
    }
}

/// Finds a complete `\n`-terminated line within `view`, bounded by `limit`
/// bytes (guards against an attacker withholding the delimiter forever).
/// Returns the line with its terminator stripped (bare `\n` as well as
/// `\r\n`), and the number of bytes (including the terminator) consumed.
/// A stray `\r` anywhere but immediately before the final `\n` is rejected.
fn take_line(view: &[u8], limit: usize) -> Result<Option<(&[u8], usize)>, ErrorKind> {
    let bound = view.len().min(limit);
    let Some(nl) = memchr(b'\n', &view[..bound]) else {
        if view.len() >= limit {
            return Err(ErrorKind::HeaderTooLarge);
        }
        return Ok(None);
    };

    let content_end = if nl > 0 && view[nl - 1] == b'\r' {
        nl - 1
    } else {
        nl
    };

    if memchr(b'\r', &view[..content_end]).is_some() {
        return Err(ErrorKind::BadLineEnding);
    }

    Ok(Some((&view[..content_end], nl + 1)))
}

fn parse_request_line(
    line: &[u8],
    request: &mut Request,
    limits: &ReqLimits,
) -> Result<(), ErrorKind> {
    let sp1 = memchr(b' ', line).ok_or(ErrorKind::InvalidMethod)?;
    let method_tok = &line[..sp1];
    if !is_token_slice(method_tok) {
        return Err(ErrorKind::InvalidMethod);
    }
    request.set_method(Method::from_token(method_tok));

    let rest = &line[sp1 + 1..];
    let sp2 = memchr(b' ', rest).ok_or(ErrorKind::InvalidUrl)?;
    let target = &rest[..sp2];
    if target.len() > limits.url_size {
        return Err(ErrorKind::UrlTooLong);
    }
    parse_target(target, request, limits)?;

    let version = &rest[sp2 + 1..];
    request.set_version(Version::from_bytes(version)?);

    Ok(())
}

/// Parses a request-target: absolute-form (`scheme://host[:port]/path`) or
/// origin-form (`/path`).
fn parse_target(target: &[u8], request: &mut Request, limits: &ReqLimits) -> Result<(), ErrorKind> {
    if !target.iter().all(|&b| is_uri_char(b)) {
        return Err(ErrorKind::InvalidUrl);
    }

    let path_start = match memchr(b':', target) {
        Some(colon) if target[colon..].starts_with(b"://") => {
            let scheme = Scheme::from_token(&target[..colon]);
            let authority_start = colon + 3;
            let authority_end = memchr(b'/', &target[authority_start..])
                .map(|p| authority_start + p)
                .unwrap_or(target.len());
            let authority = &target[authority_start..authority_end];

            let (host, port) = match memchr(b':', authority) {
                Some(p) => {
                    let port = types::slice_to_usize(&authority[p + 1..])
                        .and_then(|n| u16::try_from(n).ok())
                        .ok_or(ErrorKind::InvalidUrl)?;
                    (&authority[..p], port)
                }
                None => (authority, scheme.default_port()),
            };
            if host.is_empty() {
                return Err(ErrorKind::InvalidUrl);
            }

            request.set_scheme(scheme);
            request.set_authority(slice_to_static(host), port);
            authority_end
        }
        _ => path_start_origin_form(target)?,
    };

    let path_part = &target[path_start..];
    if path_part.is_empty() || path_part[0] != b'/' {
        return Err(ErrorKind::InvalidUrl);
    }

    fill_url(request.url_mut(), path_part, limits)?;
    Ok(())
}

/// Splits an already-isolated `path[?query]` slice into [`crate::http::types::Url`]'s
/// segments and query parameters. Consecutive `/` are collapsed (an empty
/// segment contributes nothing), matching [`crate::query::Query`]'s handling
/// of adjacent `&` in the query string.
fn fill_url(url: &mut Url, target: &[u8], limits: &ReqLimits) -> Result<(), ErrorKind> {
    url.target = slice_to_static(target);

    let (path, query) = match memchr(b'?', target) {
        Some(q) => (&target[..q], Some(&target[q..])),
        None => (target, None),
    };
    url.path = slice_to_static(path);

    if let Some(q) = query {
        let limit = url.query_parts.capacity();
        Query::parse_into(&mut url.query_parts, slice_to_static(q), limit)?;
        url.query = Some(slice_to_static(q));
    }

    for segment in path.split(|&b| b == b'/') {
        if segment.is_empty() {
            continue;
        }
        if url.parts.len() == limits.url_parts {
            return Err(ErrorKind::InvalidUrl);
        }
        url.parts.push(slice_to_static(segment));
    }

    Ok(())
}

fn path_start_origin_form(target: &[u8]) -> Result<usize, ErrorKind> {
    if target.first() != Some(&b'/') {
        return Err(ErrorKind::InvalidUrl);
    }
    Ok(0)
}

fn parse_header_line(line: &[u8], request: &mut Request, limits: &ReqLimits) -> Result<(), ErrorKind> {
    let colon = memchr(b':', line).ok_or(ErrorKind::InvalidHeader)?;
    let name = &line[..colon];
    if name.is_empty() || name.len() > limits.header_name_size || !is_token_slice(name) {
        return Err(ErrorKind::InvalidHeader);
    }

    let mut value = &line[colon + 1..];
    while value.first() == Some(&b' ') || value.first() == Some(&b'\t') {
        value = &value[1..];
    }
    while value.last() == Some(&b' ') || value.last() == Some(&b'\t') {
        value = &value[..value.len() - 1];
    }
    if value.len() > limits.header_value_size {
        return Err(ErrorKind::InvalidHeader);
    }

    let mut lower_name = [0u8; 64];
    let n = types::into_lower_case(name, &mut lower_name);
    let name_static = slice_to_static_owned(&lower_name[..n], request.scratch_name_mut());

    request.push_header(name_static, slice_to_static(value))?;
    Ok(())
}

/// Special headers (`Content-Length`, `Connection`, `Host`) require
/// post-processing once the full header block is known.
fn finalize_headers(request: &mut Request, limits: &ReqLimits) -> Result<(), ErrorKind> {
    if let Some(value) = request.header(b"content-length") {
        if request.headers(b"content-length").count() > 1 {
            return Err(ErrorKind::MultipleContentLength);
        }
        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        if len > limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        request.set_content_length(Some(len));
    }

    if let Some(value) = request.header(b"connection") {
        let mut normalized = [0u8; 10];
        let n = types::into_lower_case(value, &mut normalized);
        match &normalized[..n] {
            b"keep-alive" => request.set_keep_alive_hint(Some(true)),
            b"close" => request.set_keep_alive_hint(Some(false)),
            _ => return Err(ErrorKind::InvalidConnection),
        }
    }

    if request.host().is_empty() {
        if let Some(host_header) = request.header(b"host") {
            request.set_authority(slice_to_static(host_header), request.port());
        }
    }

    Ok(())
}

/// SAFETY: the byte range named by `src` lives inside a connection's
/// [`crate::buffer::FlatBuffer`], which outlives every `Request` borrowing
/// from it and is only ever overwritten after the request using it has been
/// fully handled and reset.
#[inline(always)]
fn slice_to_static(src: &[u8]) -> &'static [u8] {
    unsafe { std::mem::transmute(src) }
}

/// Copies a transient (stack-local, already-lowercased) header name into the
/// request's per-connection scratch storage so it can be handed out with a
/// `'static` lifetime like every other zero-copy field.
#[inline(always)]
fn slice_to_static_owned<'a>(src: &[u8], scratch: &'a mut Vec<u8>) -> &'static [u8] {
    let start = scratch.len();
    scratch.extend_from_slice(src);
    slice_to_static(&scratch[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::ReqLimits;

    fn run(bytes: &[u8]) -> Result<Request, ErrorKind> {
        let limits = ReqLimits::default().precalculate();
        let mut request = Request::new(&limits);
        let mut parser = Parser::new();

        let mut consumed_total = 0;
        loop {
            let (consumed, progress) = parser.parse(&bytes[consumed_total..], &mut request, &limits)?;
            consumed_total += consumed;
            if progress == Progress::Complete {
                return Ok(request);
            }
            if consumed == 0 {
                panic!("parser made no progress before input exhausted");
            }
        }
    }

    #[test]
    fn simple_get() {
        let req = run(b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.url().path(), b"/hello");
        assert_eq!(req.version(), Version::Http11);
        assert_eq!(req.header(b"host"), Some(b"example.com" as &[u8]));
    }

    #[test]
    fn restartable_byte_by_byte_matches_whole() {
        let whole = b"GET /a?x=1 HTTP/1.1\r\nHost: h\r\nContent-Length: 3\r\n\r\nabc";
        let one_shot = run(whole).unwrap();

        let limits = ReqLimits::default().precalculate();
        let mut request = Request::new(&limits);
        let mut parser = Parser::new();
        let mut staged = Vec::new();
        let mut consumed_total = 0;

        for &byte in whole {
            staged.push(byte);
            loop {
                let (consumed, progress) =
                    parser.parse(&staged[consumed_total..], &mut request, &limits).unwrap();
                consumed_total += consumed;
                if progress == Progress::Complete {
                    assert_eq!(request.method(), one_shot.method());
                    assert_eq!(request.url().path(), one_shot.url().path());
                    assert_eq!(request.body(), one_shot.body());
                    return;
                }
                if consumed == 0 {
                    break;
                }
            }
        }
        panic!("never completed");
    }

    #[test]
    fn split_across_calls_matches_whole() {
        let whole: &[u8] = b"GE";
        let rest1: &[u8] = b"T /a HTT";
        let rest2: &[u8] = b"P/1.1\r\nHost: x\r\n\r\n";

        let limits = ReqLimits::default().precalculate();
        let mut request = Request::new(&limits);
        let mut parser = Parser::new();
        let mut buf = Vec::new();
        let mut consumed_total = 0;

        for chunk in [whole, rest1, rest2] {
            buf.extend_from_slice(chunk);
            loop {
                let (consumed, progress) =
                    parser.parse(&buf[consumed_total..], &mut request, &limits).unwrap();
                consumed_total += consumed;
                if progress == Progress::Complete {
                    assert_eq!(request.method(), Method::Get);
                    assert_eq!(request.url().path(), b"/a");
                    return;
                }
                if consumed == 0 {
                    break;
                }
            }
        }
        panic!("never completed");
    }

    #[test]
    fn body_surplus_left_unconsumed() {
        let limits = ReqLimits::default().precalculate();
        let mut request = Request::new(&limits);
        let mut parser = Parser::new();
        let whole = b"POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcEXTRA";

        let (consumed, progress) = parser.parse(whole, &mut request, &limits).unwrap();
        assert_eq!(progress, Progress::Complete);
        assert_eq!(request.body(), Some(b"abc" as &[u8]));
        assert_eq!(&whole[consumed..], b"EXTRA");
    }

    #[test]
    fn bad_line_ending_rejected() {
        let limits = ReqLimits::default().precalculate();
        let mut request = Request::new(&limits);
        let mut parser = Parser::new();
        let err = parser
            .parse(b"GET / HTTP/1.1\r extra\n", &mut request, &limits)
            .unwrap_err();
        assert_eq!(err, ErrorKind::BadLineEnding);
    }

    #[test]
    fn absolute_form_target() {
        let req = run(b"GET http://example.com:8080/a/b HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.scheme(), Scheme::Http);
        assert_eq!(req.host(), b"example.com");
        assert_eq!(req.port(), 8080);
        assert_eq!(req.url().path(), b"/a/b");
    }

    #[test]
    fn completion_is_idempotent() {
        let limits = ReqLimits::default().precalculate();
        let mut request = Request::new(&limits);
        let mut parser = Parser::new();
        let whole = b"GET /a HTTP/1.1\r\n\r\n";

        let (consumed, progress) = parser.parse(whole, &mut request, &limits).unwrap();
        assert_eq!(progress, Progress::Complete);

        let (consumed_again, progress_again) =
            parser.parse(&whole[consumed..], &mut request, &limits).unwrap();
        assert_eq!(consumed_again, 0);
        assert_eq!(progress_again, Progress::Complete);
        assert_eq!(request.url().path(), b"/a");
    }

    #[test]
    fn repeated_content_length_rejected() {
        let limits = ReqLimits::default().precalculate();
        let mut request = Request::new(&limits);
        let mut parser = Parser::new();
        let err = parser
            .parse(
                b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 3\r\n\r\nabc",
                &mut request,
                &limits,
            )
            .unwrap_err();
        assert_eq!(err, ErrorKind::MultipleContentLength);
    }

    #[test]
    fn malformed_version_rejected() {
        let limits = ReqLimits::default().precalculate();
        let mut request = Request::new(&limits);
        let mut parser = Parser::new();
        let err = parser
            .parse(b"GET / HTTP/1x1\r\n\r\n", &mut request, &limits)
            .unwrap_err();
        assert_eq!(err, ErrorKind::BadVersion);
    }
}
