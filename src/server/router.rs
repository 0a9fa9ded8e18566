//! Per-method, ordered path registry that itself implements [`Handler`].
//!
//! This is the dispatch stage's concrete realization of "select a user
//! handler by method+path": register handlers with [`Router::register`]
//! (or [`Router::register_methods`] for a bitmask of methods at once), then
//! hand the router itself to [`crate::ServerBuilder::handler`] — it is a
//! `Handler` like any other.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{
    http::{
        request::Request,
        response::{Handled, Response},
        types::{Method, StatusCode},
    },
    server::{connection::ConnectionData, server_impl::Handler},
};

type Routed<'a> = Pin<Box<dyn Future<Output = Handled> + Send + 'a>>;
type HandlerFn<S> = Arc<dyn for<'a> Fn(&'a mut S, &'a Request, &'a mut Response) -> Routed<'a> + Send + Sync>;

/// Every method whose bit is set in a bitmask passed to
/// [`Router::register_methods`]. Bit *i* is [`Method::index`] *i*.
#[inline]
fn methods_from_mask(mask: u16) -> impl Iterator<Item = Method> {
    const ALL: [Method; Method::COUNT] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Trace,
        Method::Control,
        Method::Purge,
        Method::Options,
        Method::Connect,
        Method::Unknown,
    ];
    ALL.into_iter().filter(move |m| mask & (1 << m.index()) != 0)
}

/// A single method's registered `(path, handler)` pairs, scanned
/// last-match-wins on dispatch.
struct Routes<S>(Vec<(Vec<u8>, HandlerFn<S>)>);

impl<S> Routes<S> {
    const fn new() -> Self {
        Routes(Vec::new())
    }
}

/// Ordered, per-method `(path, handler)` registry. Lookup scans the method's
/// route list from the end, so a later [`register`](Router::register) call
/// for an already-registered path shadows the earlier one rather than
/// erroring or being ignored.
pub struct Router<S: ConnectionData = ()> {
    table: [Routes<S>; Method::COUNT],
}

impl<S: ConnectionData> Default for Router<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ConnectionData> Router<S> {
    #[inline]
    pub fn new() -> Self {
        Self {
            table: std::array::from_fn(|_| Routes::new()),
        }
    }

    /// Registers `handler` for `method` at the exact path `url` (no wildcard
    /// matching). If `url` is already registered for `method`, the new
    /// registration is preferred on dispatch (last-equal-match scan).
    #[inline]
    pub fn register<H: Handler<S>>(&mut self, method: Method, url: impl Into<Vec<u8>>, handler: H) {
        self.push(method, url.into(), wrap(handler));
    }

    /// Registers the same `handler` for every method whose bit is set in
    /// `mask` (bit *i* = [`Method::index`] *i*).
    #[inline]
    pub fn register_methods<H: Handler<S>>(&mut self, mask: u16, url: impl Into<Vec<u8>>, handler: H) {
        let url = url.into();
        let wrapped = wrap(handler);
        for method in methods_from_mask(mask) {
            self.push(method, url.clone(), wrapped.clone());
        }
    }

    #[inline]
    fn push(&mut self, method: Method, url: Vec<u8>, handler: HandlerFn<S>) {
        self.table[method.index()].0.push((url, handler));
    }
}

#[inline]
fn wrap<S: ConnectionData, H: Handler<S>>(handler: H) -> HandlerFn<S> {
    let handler = Arc::new(handler);
    Arc::new(move |data: &mut S, request: &Request, response: &mut Response| {
        let handler = handler.clone();
        Box::pin(async move { handler.handle(data, request, response).await }) as Routed<'_>
    })
}

impl<S: ConnectionData> Handler<S> for Router<S> {
    /// No route for the request's method ⇒ `501 Not Implemented`; a route
    /// list exists but none match the path ⇒ `404 Not Found`. Realizing the
    /// dispatch stage's abstract `no_handler`/`no_route` outcomes as ordinary
    /// responses (rather than a connection-terminating error) matches how
    /// every production HTTP router treats an unmatched route.
    async fn handle(&self, data: &mut S, request: &Request, response: &mut Response) -> Handled {
        let routes = &self.table[request.method().index()].0;
        if routes.is_empty() {
            return response
                .status(StatusCode::NotImplemented)
                .body("no handler registered for this method");
        }

        let target = request.url().path();
        match routes.iter().rev().find(|(path, _)| path.as_slice() == target) {
            Some((_, handler)) => handler(data, request, response).await,
            None => response.status(StatusCode::NotFound).body("no matching route"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::types::Version;
    use crate::limits::{ReqLimits, RespLimits};

    struct Ok200;
    impl Handler<()> for Ok200 {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("ok")
        }
    }

    fn request_for(path: &'static [u8]) -> Request {
        let limits = ReqLimits::default().precalculate();
        let mut req = Request::new(&limits);
        req.url_mut().path = path;
        req
    }

    #[tokio::test]
    async fn last_registration_wins_on_equal_path() {
        let mut router: Router<()> = Router::new();
        router.register(Method::Get, "/a", Ok200);

        struct Forbidden;
        impl Handler<()> for Forbidden {
            async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
                r.status(StatusCode::Forbidden).body("forbidden")
            }
        }
        router.register(Method::Get, "/a", Forbidden);

        let req = request_for(b"/a");
        let mut resp = Response::new(&RespLimits::default());
        resp.version = Version::Http11;
        router.handle(&mut (), &req, &mut resp).await;
        assert!(resp.buffer().starts_with(b"HTTP/1.1 403"));
    }

    #[tokio::test]
    async fn unmatched_path_is_404() {
        let mut router: Router<()> = Router::new();
        router.register(Method::Get, "/a", Ok200);

        let req = request_for(b"/nope");
        let mut resp = Response::new(&RespLimits::default());
        resp.version = Version::Http11;
        router.handle(&mut (), &req, &mut resp).await;
        assert!(resp.buffer().starts_with(b"HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn empty_method_table_is_501() {
        let router: Router<()> = Router::new();
        let req = request_for(b"/a");
        let mut resp = Response::new(&RespLimits::default());
        resp.version = Version::Http11;
        router.handle(&mut (), &req, &mut resp).await;
        assert!(resp.buffer().starts_with(b"HTTP/1.1 501"));
    }

    #[test]
    fn mask_expands_to_methods() {
        let mask = (1 << Method::Get.index()) | (1 << Method::Post.index());
        let got: Vec<_> = methods_from_mask(mask).collect();
        assert_eq!(got, vec![Method::Get, Method::Post]);
    }
}
