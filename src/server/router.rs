//! Deciding what to answer to a request.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use http::Method;
use log::{debug, error};
use crate::context::Context;
use crate::handler::Handler;
use crate::message::{Request, Response};


//------------ Router --------------------------------------------------------

/// Turns requests into responses.
///
/// The router accepts GET and POST requests whose target starts with
/// `/call` and turns everything else away with a 404. An accepted request
/// becomes an invocation of the registered handler or, if no handler was
/// registered, receives the default response.
pub struct Router {
    /// The handler serving invocations if one was registered.
    handler: Option<Arc<dyn Handler>>,
}

impl Router {
    /// Creates a new router with an optional handler.
    pub fn new(handler: Option<Arc<dyn Handler>>) -> Self {
        Router { handler }
    }

    /// Produces the response for a request.
    pub fn respond(&self, request: Request) -> Response {
        if !Self::is_invoke(&request) {
            debug!("rejecting {} {}", request.method(), request.target());
            return Response::not_found()
        }
        let context = match Context::from_request(&request) {
            Ok(context) => context,
            Err(err) => {
                debug!("rejecting invocation: {}", err);
                return Response::bad_request(err.to_string())
            }
        };
        let handler = match self.handler {
            Some(ref handler) => handler.clone(),
            None => return Response::ok(Some("default ok".into()))
        };
        let body = request.into_body();
        match panic::catch_unwind(
            AssertUnwindSafe(|| handler.handle(&context, body))
        ) {
            Ok(body) => Response::ok(body),
            Err(_) => {
                error!(
                    "Handler panicked while serving call {}.",
                    context.call_id()
                );
                Response::internal_error()
            }
        }
    }

    /// Returns whether a request is an invocation request.
    ///
    /// Only GET and POST requests with a target starting with `/call`
    /// are. Note that this is a plain prefix match, so query parameters
    /// and even targets like `/callback` pass.
    fn is_invoke(request: &Request) -> bool {
        (
            request.method() == Method::GET
            || request.method() == Method::POST
        )
        && request.target().starts_with("/call")
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use std::sync::Mutex;
    use http::{HeaderMap, Version};
    use http::header::HeaderValue;
    use crate::context;
    use crate::message::Body;
    use super::*;

    fn call_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            context::CALL_ID, HeaderValue::from_static("01ABC")
        );
        headers.insert(
            context::DEADLINE,
            HeaderValue::from_static("2026-01-01T00:00:00Z")
        );
        headers.insert(
            context::HTTP_METHOD, HeaderValue::from_static("PUT")
        );
        headers.insert(
            context::REQUEST_URL,
            HeaderValue::from_static("http://localhost:8080/t/app/hello")
        );
        headers
    }

    fn call(target: &str) -> Request {
        Request::new(
            Method::POST, target, Version::HTTP_11, call_headers(),
            Some(Body::text("payload"))
        )
    }

    fn echo_router() -> Router {
        let handler: Arc<dyn Handler> = Arc::new(
            |_: &Context, body: Option<Body>| body
        );
        Router::new(Some(handler))
    }

    #[test]
    fn routing() {
        let router = echo_router();
        assert_eq!(router.respond(call("/call")).status().as_u16(), 200);
        assert_eq!(router.respond(call("/call?x=1")).status().as_u16(), 200);

        // The target check is a prefix match.
        assert_eq!(router.respond(call("/callback")).status().as_u16(), 200);

        assert_eq!(router.respond(call("/")).status().as_u16(), 404);
        assert_eq!(router.respond(call("/other")).status().as_u16(), 404);
        assert_eq!(router.respond(call("/CALL")).status().as_u16(), 404);
    }

    #[test]
    fn methods() {
        let router = echo_router();
        for method in [Method::GET, Method::POST] {
            let request = Request::new(
                method, "/call", Version::HTTP_11, call_headers(), None
            );
            assert_eq!(router.respond(request).status().as_u16(), 200);
        }
        for method in [Method::PUT, Method::DELETE, Method::HEAD] {
            let request = Request::new(
                method, "/call", Version::HTTP_11, call_headers(), None
            );
            assert_eq!(router.respond(request).status().as_u16(), 404);
        }
    }

    #[test]
    fn handler_arguments() {
        let seen = Arc::new(Mutex::new(None));
        let inner = seen.clone();
        let handler: Arc<dyn Handler> = Arc::new(
            move |context: &Context, body: Option<Body>| {
                *inner.lock().unwrap() = Some((
                    context.call_id().to_string(),
                    context.method().to_string(),
                    body.as_ref().and_then(|body| body.to_text()),
                ));
                body
            }
        );
        let router = Router::new(Some(handler));
        let response = router.respond(call("/call"));
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response.body().unwrap().data().as_ref(), b"payload"
        );
        let seen = seen.lock().unwrap().take().unwrap();
        assert_eq!(seen.0, "01ABC");
        assert_eq!(seen.1, "PUT");
        assert_eq!(seen.2.as_deref(), Some("payload"));
    }

    #[test]
    fn no_handler() {
        let router = Router::new(None);
        let response = router.respond(call("/call"));
        assert_eq!(response.status().as_u16(), 200);
        let body = response.body().unwrap();
        assert_eq!(body.data().as_ref(), b"default ok");
        assert_eq!(body.mime_type(), Some("text/plain"));
    }

    #[test]
    fn missing_header() {
        let router = echo_router();
        let mut headers = call_headers();
        headers.remove(context::REQUEST_URL);
        let request = Request::new(
            Method::POST, "/call", Version::HTTP_11, headers, None
        );
        let response = router.respond(request);
        assert_eq!(response.status().as_u16(), 400);
        assert_eq!(
            response.body().unwrap().data().as_ref(),
            b"missing required header Fn-Http-Request-Url"
        );
    }

    #[test]
    fn handler_panic() {
        let handler: Arc<dyn Handler> = Arc::new(
            |_: &Context, _: Option<Body>| -> Option<Body> {
                panic!("function failed")
            }
        );
        let router = Router::new(Some(handler));
        let response = router.respond(call("/call"));
        assert_eq!(response.status().as_u16(), 500);
        assert_eq!(
            response.body().unwrap().data().as_ref(), b"internal error"
        );
    }
}
