//! The messages exchanged with a function.
//!
//! This module contains the model types for the invoke protocol: a fully
//! assembled [`Request`], the [`Response`] produced for it, and the
//! [`Body`] payload both of them may carry.
//!
//! [`Request`]: struct.Request.html
//! [`Response`]: struct.Response.html
//! [`Body`]: struct.Body.html

use std::str;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Version};
use serde::Serialize;
use serde::de::DeserializeOwned;


//------------ Media Types ---------------------------------------------------

/// The media type of plain text bodies.
const TEXT_MIME: &str = "text/plain";

/// The media type of JSON bodies.
const JSON_MIME: &str = "application/json";


//------------ Request -------------------------------------------------------

/// A fully assembled invocation request.
///
/// A value of this type only exists once all body chunks of a request have
/// been received, so the body is always complete.
#[derive(Clone, Debug)]
pub struct Request {
    /// The request method.
    method: Method,

    /// The raw request target from the request line.
    target: String,

    /// The protocol version of the request.
    version: Version,

    /// The headers of the request.
    headers: HeaderMap,

    /// The request body if there was one.
    body: Option<Body>,
}

impl Request {
    /// Creates a new request from its parts.
    pub fn new(
        method: Method,
        target: impl Into<String>,
        version: Version,
        headers: HeaderMap,
        body: Option<Body>,
    ) -> Self {
        Request {
            method,
            target: target.into(),
            version,
            headers,
            body,
        }
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the raw request target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the protocol version of the request.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the headers of the request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a reference to the body if there is one.
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Converts the request into its body.
    pub fn into_body(self) -> Option<Body> {
        self.body
    }
}


//------------ Response ------------------------------------------------------

/// A response to an invocation request.
///
/// The content length and, if the body carries a media type, the content
/// type headers are derived from the body when the response is written.
/// Any such headers set on the response itself are replaced at that point.
#[derive(Clone, Debug)]
pub struct Response {
    /// The response status.
    status: StatusCode,

    /// The headers of the response.
    headers: HeaderMap,

    /// The response body if there is one.
    body: Option<Body>,
}

impl Response {
    /// Creates a new response with the given status and body.
    pub fn new(status: StatusCode, body: Option<Body>) -> Self {
        Response {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Creates a 200 OK response with an optional body.
    pub fn ok(body: Option<Body>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// Creates a plain text response with the given status and message.
    pub fn message(
        status: StatusCode, message: impl Into<String>
    ) -> Self {
        Self::new(status, Some(Body::text(message)))
    }

    /// Returns a Not Found response.
    pub fn not_found() -> Self {
        Self::message(StatusCode::NOT_FOUND, "Not found")
    }

    /// Returns a Bad Request response with the given message.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::message(StatusCode::BAD_REQUEST, message)
    }

    /// Returns an Internal Server Error response.
    pub fn internal_error() -> Self {
        Self::message(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }

    /// Returns the response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers of the response.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a mutable reference to the headers of the response.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns a reference to the body if there is one.
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Converts the response into its parts.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Option<Body>) {
        (self.status, self.headers, self.body)
    }
}


//------------ Body ----------------------------------------------------------

/// The payload of a request or response.
///
/// A body is a chunk of raw bytes plus an optional media type. Convenience
/// constructors exist for the three ways a function typically produces a
/// body: raw bytes, plain text, and JSON.
#[derive(Clone, Debug)]
pub struct Body {
    /// The raw bytes of the body.
    data: Bytes,

    /// The media type of the body if one is known.
    mime_type: Option<String>,
}

impl Body {
    /// Creates a body from raw bytes without a media type.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Body {
            data: data.into(),
            mime_type: None,
        }
    }

    /// Creates a body from raw bytes with the given media type.
    pub fn with_mime_type(
        data: impl Into<Bytes>, mime_type: impl Into<String>
    ) -> Self {
        Body {
            data: data.into(),
            mime_type: Some(mime_type.into()),
        }
    }

    /// Creates a plain text body.
    ///
    /// The media type will be `text/plain`.
    pub fn text(text: impl Into<String>) -> Self {
        Body {
            data: Bytes::from(text.into()),
            mime_type: Some(TEXT_MIME.into()),
        }
    }

    /// Creates a JSON body from a serializable value.
    ///
    /// The media type will be `application/json`.
    pub fn json<T: Serialize + ?Sized>(
        value: &T
    ) -> Result<Self, serde_json::Error> {
        Ok(Body {
            data: serde_json::to_vec(value)?.into(),
            mime_type: Some(JSON_MIME.into()),
        })
    }

    /// Creates a pretty-printed JSON body from a serializable value.
    ///
    /// The media type will be `application/json`.
    pub fn json_pretty<T: Serialize + ?Sized>(
        value: &T
    ) -> Result<Self, serde_json::Error> {
        Ok(Body {
            data: serde_json::to_vec_pretty(value)?.into(),
            mime_type: Some(JSON_MIME.into()),
        })
    }

    /// Decodes the body as JSON into a value.
    pub fn decode_json<T: DeserializeOwned>(
        &self
    ) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// Returns the raw bytes of the body.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Converts the body into its raw bytes.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Returns the body as text if it is valid UTF-8.
    pub fn to_text(&self) -> Option<String> {
        str::from_utf8(&self.data).ok().map(Into::into)
    }

    /// Returns the media type of the body if one is known.
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Returns the length of the body in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}


//--- From

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::text(text)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::text(text)
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Body::new(data)
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Body::new(data)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Greeting {
        name: String,
        count: u32,
    }

    #[test]
    fn text_body() {
        let body = Body::text("hello");
        assert_eq!(body.data().as_ref(), b"hello");
        assert_eq!(body.mime_type(), Some("text/plain"));
        assert_eq!(body.to_text().unwrap(), "hello");
        assert_eq!(body.len(), 5);
    }

    #[test]
    fn raw_body() {
        let body = Body::new(vec![0u8, 159, 146, 150]);
        assert_eq!(body.mime_type(), None);
        assert!(body.to_text().is_none());

        let body = Body::with_mime_type(
            b"\x00\x01".as_ref(), "application/octet-stream"
        );
        assert_eq!(body.mime_type(), Some("application/octet-stream"));
    }

    #[test]
    fn body_from_str() {
        let body = Body::from("hello");
        assert_eq!(body.mime_type(), Some("text/plain"));
        assert_eq!(body.data().as_ref(), b"hello");
    }

    #[test]
    fn json_body() {
        let value = Greeting { name: "world".into(), count: 3 };
        let body = Body::json(&value).unwrap();
        assert_eq!(body.mime_type(), Some("application/json"));
        assert_eq!(body.decode_json::<Greeting>().unwrap(), value);

        // The pretty variant encodes the same value, just with whitespace.
        let pretty = Body::json_pretty(&value).unwrap();
        assert!(pretty.len() > body.len());
        assert_eq!(pretty.decode_json::<Greeting>().unwrap(), value);
    }

    #[test]
    fn decode_bad_json() {
        assert!(Body::text("not json").decode_json::<Greeting>().is_err());
    }

    #[test]
    fn canned_responses() {
        let response = Response::not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().unwrap().data().as_ref(), b"Not found");

        let response = Response::ok(None);
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_none());
    }
}
