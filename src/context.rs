//! The invocation context.
//!
//! Every call to a function comes with metadata the platform sends along
//! in a set of headers. The type [`Context`] collects this metadata and
//! gives the function access to the complete inbound header set.
//!
//! [`Context`]: struct.Context.html

use std::{error, fmt};
use std::sync::OnceLock;
use http::{HeaderMap, Uri};
use http::header::CONTENT_TYPE;
use crate::message::Request;


//------------ Required Headers ----------------------------------------------

/// The header carrying the unique ID of a call.
pub const CALL_ID: &str = "Fn-Call-Id";

/// The header carrying the deadline of a call.
pub const DEADLINE: &str = "Fn-Deadline";

/// The header carrying the method of the original request.
pub const HTTP_METHOD: &str = "Fn-Http-Method";

/// The header carrying the URL of the original request.
pub const REQUEST_URL: &str = "Fn-Http-Request-Url";


//------------ Context -------------------------------------------------------

/// The metadata of a single invocation.
///
/// A context is handed to the function alongside the request body. It
/// provides the values of the four required invocation headers plus the
/// complete header set of the request, which includes any `Fn-Http-H-*`
/// headers the gateway copied over from the original request.
#[derive(Debug)]
pub struct Context {
    /// The unique ID of this call.
    call_id: String,

    /// The deadline of this call.
    deadline: String,

    /// The method of the request made to the platform.
    method: String,

    /// The URL of the request made to the platform.
    request_url: String,

    /// All headers of the invocation request.
    headers: HeaderMap,

    /// The parsed request URL.
    ///
    /// This is only created when first asked for.
    parsed_url: OnceLock<Option<Uri>>,

    /// The content type of the request body.
    ///
    /// This is only created when first asked for.
    content_type: OnceLock<Option<String>>,
}

impl Context {
    /// Creates a context from an assembled request.
    ///
    /// If one of the required invocation headers is missing or unreadable,
    /// returns an error naming that header.
    pub fn from_request(request: &Request) -> Result<Self, MissingHeader> {
        let headers = request.headers();
        Ok(Context {
            call_id: required_header(headers, CALL_ID)?,
            deadline: required_header(headers, DEADLINE)?,
            method: required_header(headers, HTTP_METHOD)?,
            request_url: required_header(headers, REQUEST_URL)?,
            headers: headers.clone(),
            parsed_url: OnceLock::new(),
            content_type: OnceLock::new(),
        })
    }

    /// Returns the unique ID of this call.
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Returns the deadline of this call.
    ///
    /// The deadline is passed along as an RFC 3339 timestamp string.
    pub fn deadline(&self) -> &str {
        &self.deadline
    }

    /// Returns the method of the request made to the platform.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the raw URL of the request made to the platform.
    pub fn request_url(&self) -> &str {
        &self.request_url
    }

    /// Returns all headers of the invocation request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the parsed URL of the request made to the platform.
    ///
    /// Returns `None` if the URL does not parse. The URL is parsed at most
    /// once, on the first call.
    pub fn parsed_url(&self) -> Option<&Uri> {
        self.parsed_url.get_or_init(|| {
            self.request_url.parse().ok()
        }).as_ref()
    }

    /// Returns the content type of the request body if there is one.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.get_or_init(|| {
            self.headers.get(CONTENT_TYPE).and_then(|value| {
                value.to_str().ok()
            }).map(Into::into)
        }).as_deref()
    }
}


//------------ MissingHeader -------------------------------------------------

/// A required invocation header was missing from a request.
#[derive(Clone, Copy, Debug)]
pub struct MissingHeader(&'static str);

impl MissingHeader {
    /// Returns the name of the missing header.
    pub fn header(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for MissingHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "missing required header {}", self.0)
    }
}

impl error::Error for MissingHeader { }


//------------ Helpers -------------------------------------------------------

/// Returns the value of a required header as a string.
///
/// A header with a value that isn’t valid UTF-8 is treated like a missing
/// header since the function could not do anything useful with it anyway.
fn required_header(
    headers: &HeaderMap, name: &'static str
) -> Result<String, MissingHeader> {
    headers.get(name)
        .and_then(|value| value.to_str().ok())
        .map(Into::into)
        .ok_or(MissingHeader(name))
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use http::{Method, Version};
    use http::header::HeaderValue;

    fn invoke_request() -> Request {
        let mut headers = HeaderMap::new();
        headers.insert(
            "fn-call-id", HeaderValue::from_static("01D9Y")
        );
        headers.insert(
            "fn-deadline", HeaderValue::from_static("2026-01-01T00:00:30Z")
        );
        headers.insert("fn-http-method", HeaderValue::from_static("PUT"));
        headers.insert(
            "fn-http-request-url",
            HeaderValue::from_static("http://example.com/t/app/fn?x=1")
        );
        headers.insert(
            "content-type", HeaderValue::from_static("application/json")
        );
        Request::new(Method::POST, "/call", Version::HTTP_11, headers, None)
    }

    #[test]
    fn complete_context() {
        let request = invoke_request();
        let ctx = Context::from_request(&request).unwrap();
        assert_eq!(ctx.call_id(), "01D9Y");
        assert_eq!(ctx.deadline(), "2026-01-01T00:00:30Z");
        assert_eq!(ctx.method(), "PUT");
        assert_eq!(ctx.request_url(), "http://example.com/t/app/fn?x=1");
        assert!(ctx.headers().contains_key("fn-call-id"));
    }

    #[test]
    fn missing_header() {
        let request = invoke_request();
        let mut headers = request.headers().clone();
        headers.remove("fn-deadline");
        let request = Request::new(
            Method::POST, "/call", Version::HTTP_11, headers, None
        );
        let err = Context::from_request(&request).unwrap_err();
        assert_eq!(err.header(), DEADLINE);
        assert_eq!(
            err.to_string(), "missing required header Fn-Deadline"
        );
    }

    #[test]
    fn parsed_url() {
        let ctx = Context::from_request(&invoke_request()).unwrap();
        let url = ctx.parsed_url().unwrap();
        assert_eq!(url.path(), "/t/app/fn");
        assert_eq!(url.query(), Some("x=1"));

        // An unparsable URL turns into None.
        let mut headers = invoke_request().headers().clone();
        headers.insert(
            "fn-http-request-url", HeaderValue::from_static("http://[")
        );
        let request = Request::new(
            Method::POST, "/call", Version::HTTP_11, headers, None
        );
        let ctx = Context::from_request(&request).unwrap();
        assert!(ctx.parsed_url().is_none());
    }

    #[test]
    fn content_type() {
        let ctx = Context::from_request(&invoke_request()).unwrap();
        assert_eq!(ctx.content_type(), Some("application/json"));

        let mut headers = invoke_request().headers().clone();
        headers.remove("content-type");
        let request = Request::new(
            Method::POST, "/call", Version::HTTP_11, headers, None
        );
        let ctx = Context::from_request(&request).unwrap();
        assert_eq!(ctx.content_type(), None);
    }
}
