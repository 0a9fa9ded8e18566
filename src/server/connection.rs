//! Per-connection request lifecycle: receive, dispatch, send, repeat.
//!
//! `HttpConnection` owns everything a single TCP connection needs —
//! buffer, parser, request, response — and is reused across every
//! keep-alive request on that socket rather than reallocated.

use crate::{
    buffer::FlatBuffer,
    clock::{Deadline, Elapsed},
    errors::ErrorKind,
    http::{
        parser::{Parser, Phase, Progress},
        request::Request,
        response::Response,
        types::Version,
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    metric::{ConnectionMetric, ServerMetrics},
    server::server_impl::{AllLimits, Handler},
    Handled,
};
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    buffer: FlatBuffer,
    metric: ConnectionMetric,
    server_metrics: Arc<ServerMetrics>,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits, server_metrics: Arc<ServerMetrics>) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            buffer: FlatBuffer::new(&limits.2),
            metric: ConnectionMetric::new(),
            server_metrics,
            parser: Parser::new(),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
    }

    /// `true` once the connection has served its request budget or outlived
    /// its configured lifetime and must not be handed another request.
    #[inline]
    fn is_expired(&self) -> bool {
        self.metric.request_count >= self.conn_limits.max_requests_per_connection
            || self.metric.created_at.elapsed() > self.conn_limits.connection_lifetime
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Drives the keep-alive loop for one accepted socket until the peer
    /// disconnects, a deadline fires, the request budget is exhausted, or an
    /// I/O error makes the socket unusable.
    ///
    /// Every non-I/O error is logged via `tracing` and ends the loop without
    /// writing an automatic error response; only a handler's own `Response`
    /// ever puts bytes on the wire.
    #[inline]
    pub(crate) async fn run(&mut self, stream: &mut TcpStream) -> Result<(), io::Error> {
        self.buffer.reset();
        self.metric.reset();

        while !self.is_expired() {
            self.reset_request_response();

            if let Err(error) = self.recv_request(stream).await {
                return self.close_on_error(error);
            }

            if !matches!(self.request.version(), Version::Http10 | Version::Http11) {
                tracing::debug!(version = ?self.request.version(), "unsupported version, closing");
                break;
            }

            self.handle_request().await;

            if !self.response.is_complete() || !self.response.is_valid() {
                tracing::warn!("handler produced an invalid response, closing connection");
                break;
            }

            if let Err(error) = self.send_response(stream).await {
                return self.close_on_error(error);
            }

            tracing::trace!(
                requests = self.metric.request_count,
                keep_alive = self.response.keep_alive,
                "request served"
            );

            if !self.response.keep_alive {
                break;
            }
            self.metric.request_count += 1;
        }

        Ok(())
    }

    /// Maps a terminal [`ErrorKind`] to the `run` return value, logging at a
    /// level appropriate to the kind (an idle keep-alive disconnect is
    /// routine; a mid-message I/O failure is not).
    #[inline]
    fn close_on_error(&self, error: ErrorKind) -> Result<(), io::Error> {
        match error {
            ErrorKind::EndOfStream => {
                tracing::trace!("peer closed the connection");
                Ok(())
            }
            ErrorKind::Io(e) => {
                tracing::warn!(error = %e.0, "I/O error on connection");
                Err(e.0)
            }
            other => {
                tracing::debug!(error = %other, "closing connection after error");
                Ok(())
            }
        }
    }

    /// Receive stage (C5): loops `read_some` + incremental parse until the
    /// request is complete, classifying any deadline expiry by the parser's
    /// current phase.
    async fn recv_request(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        let mut deadline = Deadline::new(self.conn_limits.socket_read_timeout);

        loop {
            if self.buffer.is_full() {
                self.buffer.prepare();
                if self.buffer.overflowed() {
                    return Err(ErrorKind::BufferOverflow);
                }
            }

            let started = Instant::now();
            let n = match deadline.race(stream.read(self.buffer.writable())).await {
                Ok(result) => result?,
                Err(Elapsed) => return Err(self.classify_timeout()),
            };
            if n == 0 {
                return Err(ErrorKind::EndOfStream);
            }

            self.request.metric.record(started.elapsed(), n);
            self.buffer.commit(n);

            let (consumed, progress) =
                self.parser
                    .parse(self.buffer.readable(), &mut self.request, &self.req_limits)?;
            self.buffer.consume(consumed);
            self.buffer.prepare();

            if progress == Progress::Complete {
                self.server_metrics.add_bytes_in(self.request.metric.bytes());
                return Ok(());
            }
        }
    }

    /// A deadline firing with nothing yet read for this request is a routine
    /// idle keep-alive timeout; firing partway through is a slow/stalled
    /// peer and is reported with the phase it stalled in.
    #[inline]
    fn classify_timeout(&self) -> ErrorKind {
        if self.request.metric.ops() == 0 {
            ErrorKind::TimeoutIdle
        } else {
            match self.parser.phase() {
                Phase::StartLine => ErrorKind::TimeoutStartLine,
                Phase::HeaderOrBody => ErrorKind::TimeoutHeaderOrBody,
            }
        }
    }

    /// Dispatch stage (C6): decides the keep-alive intent for this exchange
    /// and invokes the registered handler. `Connection: close`/`keep-alive`
    /// overrides the version-implied default when present.
    async fn handle_request(&mut self) {
        self.response.version = self.request.version();
        self.response.keep_alive = match self.request.connection_keep_alive() {
            Some(explicit) => explicit,
            None => self.request.version() == Version::Http11,
        };

        self.handler
            .handle(&mut self.connection_data, &self.request, &mut self.response)
            .await;
    }

    /// Send stage (C7): writes the already-serialized response buffer,
    /// looping `write_some` until the whole slice is drained.
    async fn send_response(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        let mut deadline = Deadline::new(self.conn_limits.socket_write_timeout);
        let mut offset = 0;
        let total = self.response.buffer().len();

        while offset < total {
            let started = Instant::now();
            let n = match deadline
                .race(stream.write(&self.response.buffer()[offset..]))
                .await
            {
                Ok(result) => result?,
                Err(Elapsed) => return Err(ErrorKind::TimeoutSend),
            };
            if n == 0 {
                return Err(ErrorKind::EndOfStream);
            }
            self.response.metric.record(started.elapsed(), n);
            offset += n;
        }

        self.server_metrics
            .add_bytes_out(self.response.metric.bytes());
        Ok(())
    }
}

impl ConnLimits {
    /// Writes a response that isn't associated with a live `HttpConnection`
    /// (the connection-filter rejection path and the overflow alarmist both
    /// only ever hold a bare stream).
    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        let mut deadline = Deadline::new(self.socket_write_timeout);
        let mut remaining = response;

        while !remaining.is_empty() {
            let n = deadline
                .race(stream.write(remaining))
                .await
                .map_err(|Elapsed| io::Error::new(io::ErrorKind::TimedOut, "write timeout"))??;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write zero"));
            }
            remaining = &remaining[n..];
        }

        Ok(())
    }
}

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use corehttpd::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use corehttpd::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds. Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{limits::ServerLimits, Handled, StatusCode};

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        /// Builds a connection pre-seeded with `value` already staged in its
        /// buffer, so a single [`HttpConnection::recv_request`]-shaped drive
        /// loop can be exercised without a real socket.
        #[inline]
        pub(crate) fn from_bytes(value: &[u8]) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            let mut buffer = FlatBuffer::new(&req_limits);
            buffer.writable()[..value.len()].copy_from_slice(value);
            buffer.commit(value.len());

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                buffer,
                metric: ConnectionMetric::new(),
                server_metrics: Arc::new(ServerMetrics::new()),
                parser: Parser::new(),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,
            }
        }
    }

    #[test]
    fn parses_staged_request_without_a_socket() {
        let mut conn = HttpConnection::from_bytes(b"GET /hi HTTP/1.1\r\nHost: x\r\n\r\n");
        let (consumed, progress) = conn
            .parser
            .parse(conn.buffer.readable(), &mut conn.request, &conn.req_limits)
            .unwrap();
        conn.buffer.consume(consumed);

        assert_eq!(progress, Progress::Complete);
        assert_eq!(conn.request.url().path(), b"/hi");
    }

    #[test]
    fn classify_timeout_distinguishes_idle_from_mid_message() {
        let conn = HttpConnection::from_bytes(b"");
        assert_eq!(conn.classify_timeout(), ErrorKind::TimeoutIdle);

        let mut conn = HttpConnection::from_bytes(b"GET /hi HTTP/1.1\r\n");
        conn.request
            .metric
            .record(std::time::Duration::ZERO, conn.buffer.readable().len());
        let (consumed, _) = conn
            .parser
            .parse(conn.buffer.readable(), &mut conn.request, &conn.req_limits)
            .unwrap();
        conn.buffer.consume(consumed);
        assert_eq!(conn.classify_timeout(), ErrorKind::TimeoutHeaderOrBody);
    }

    #[test]
    fn is_expired_after_request_budget_exhausted() {
        let mut conn = HttpConnection::from_bytes(b"");
        conn.conn_limits.max_requests_per_connection = 1;
        assert!(!conn.is_expired());
        conn.metric.request_count = 1;
        assert!(conn.is_expired());
    }
}
