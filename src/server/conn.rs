//! Serving a single connection.
//!
//! The type [`Connection`] is the request state machine of a connection:
//! it assembles the framing signals produced by [`wire::Reader`] into
//! complete requests, hands them to the router, and decides what is to
//! happen to the connection afterwards. The async function [`serve`] drives
//! the state machine over an actual socket. Keeping the two apart means
//! the state machine can be tested without any IO at all.
//!
//! [`Connection`]: struct.Connection.html
//! [`wire::Reader`]: ../wire/struct.Reader.html
//! [`serve`]: fn.serve.html

use std::io;
use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Version};
use http::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use crate::message::{Body, Request, Response};
use super::router::Router;
use super::wire::{self, Reader, RequestHead, Signal};


//------------ Constants -----------------------------------------------------

/// The largest declared request body size we accept in bytes.
///
/// A request declaring a larger body terminates its connection right away
/// and no response is sent.
pub const MAX_BODY_LEN: u64 = 50_000_000;


//------------ serve ---------------------------------------------------------

/// Serves a connection until it is closed.
///
/// Any IO error as well as a request we cannot parse simply ends the
/// connection. Clients misbehaving is an entirely normal part of serving
/// a socket, so all we do is log at debug level.
pub async fn serve<Sock>(mut sock: Sock, router: Arc<Router>)
where Sock: AsyncRead + AsyncWrite + Unpin {
    if let Err(err) = try_serve(&mut sock, router).await {
        debug!("connection closed: {}", err);
    }
}

/// Serves the connection, letting errors escape.
async fn try_serve<Sock>(
    sock: &mut Sock, router: Arc<Router>
) -> Result<(), io::Error>
where Sock: AsyncRead + AsyncWrite + Unpin {
    let mut reader = Reader::new();
    let mut conn = Connection::new(router);
    loop {
        let signal = match reader.read_signal(sock).await? {
            Some(signal) => signal,
            None => return Ok(())
        };
        match conn.apply(signal) {
            Step::Continue => {}
            Step::Close => return Ok(()),
            Step::Respond { response, version, keep_alive } => {
                if !write_response(
                    sock, version, keep_alive, response
                ).await? {
                    return Ok(())
                }
            }
        }
    }
}


//------------ Connection ----------------------------------------------------

/// The request state machine of a connection.
///
/// A connection starts out idle. A head signal starts a pending request,
/// chunk signals extend its body, and the end signal completes it and
/// produces the response. The state machine never touches a socket itself.
pub struct Connection {
    /// The router producing the responses.
    router: Arc<Router>,

    /// The request currently being assembled.
    pending: Option<Pending>,
}

/// A request of which the head but not yet the full body has arrived.
struct Pending {
    /// The head of the request.
    head: RequestHead,

    /// The body data received so far.
    body: BytesMut,
}

impl Connection {
    /// Creates the state machine for a new connection.
    pub fn new(router: Arc<Router>) -> Self {
        Connection {
            router,
            pending: None,
        }
    }

    /// Applies a signal to the state machine.
    pub fn apply(&mut self, signal: Signal) -> Step {
        match signal {
            Signal::Head(head) => self.start_request(head),
            Signal::Chunk(chunk) => self.extend_body(chunk),
            Signal::End => self.finish_request(),
        }
    }

    /// Starts assembling a new request.
    ///
    /// If the declared body size exceeds [`MAX_BODY_LEN`], the connection
    /// is closed without a response.
    ///
    /// [`MAX_BODY_LEN`]: constant.MAX_BODY_LEN.html
    fn start_request(&mut self, head: RequestHead) -> Step {
        let declared = head.content_length();
        if declared > MAX_BODY_LEN {
            warn!(
                "Dropping connection: declared body of {} bytes exceeds \
                 the limit of {} bytes.",
                declared, MAX_BODY_LEN
            );
            return Step::Close
        }
        self.pending = Some(Pending {
            head,
            body: BytesMut::with_capacity(declared as usize),
        });
        Step::Continue
    }

    /// Appends a chunk of body data to the pending request.
    ///
    /// A chunk without a pending request is quietly dropped.
    fn extend_body(&mut self, chunk: Bytes) -> Step {
        if let Some(pending) = self.pending.as_mut() {
            pending.body.extend_from_slice(&chunk);
        }
        Step::Continue
    }

    /// Completes the pending request and produces the response.
    ///
    /// An end signal without a pending request is ignored.
    fn finish_request(&mut self) -> Step {
        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => return Step::Continue
        };
        debug!(
            "request {} {}: {} body bytes",
            pending.head.method(), pending.head.target(), pending.body.len()
        );
        let version = pending.head.version();
        let keep_alive = pending.head.is_keep_alive();
        let body = if pending.body.is_empty() {
            None
        }
        else {
            Some(Body::new(pending.body.freeze()))
        };
        let (method, target, _, headers) = pending.head.into_parts();
        let request = Request::new(method, target, version, headers, body);
        let response = self.router.respond(request);
        Step::Respond { response, version, keep_alive }
    }
}


//------------ Step ----------------------------------------------------------

/// What is to happen to a connection after applying a signal.
pub enum Step {
    /// Nothing, keep reading.
    Continue,

    /// Write this response.
    Respond {
        /// The response to write.
        response: Response,

        /// The protocol version of the request being answered.
        version: Version,

        /// Whether the client asked for the connection to stay open.
        keep_alive: bool,
    },

    /// Close the connection without a response.
    Close,
}


//------------ Writing Responses ---------------------------------------------

/// Writes a response and returns whether to keep the connection open.
///
/// The content length header is always derived from the actual body,
/// overriding whatever may be set on the response, and is present even for
/// an empty body. If the body carries a media type, it becomes the content
/// type header.
///
/// If the response itself specifies a connection header, that header
/// decides the fate of the connection. Otherwise the client’s wish decides
/// and is made explicit in the header wherever it deviates from the
/// default of the protocol version.
async fn write_response<Sock: AsyncWrite + Unpin>(
    sock: &mut Sock,
    version: Version,
    request_keep_alive: bool,
    response: Response,
) -> Result<bool, io::Error> {
    let (status, mut headers, body) = response.into_parts();

    let body_len = body.as_ref().map_or(0, |body| body.len());
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len as u64));
    if let Some(mime_type) = body.as_ref().and_then(|body| body.mime_type()) {
        match HeaderValue::from_str(mime_type) {
            Ok(value) => {
                headers.insert(CONTENT_TYPE, value);
            }
            Err(_) => {
                warn!("Ignoring invalid response media type '{}'.", mime_type);
            }
        }
    }
    let keep_alive = connection_policy(
        &mut headers, version, request_keep_alive
    );

    let mut out = BytesMut::with_capacity(256 + body_len);
    wire::encode_response_head(&mut out, version, status, &headers);
    if let Some(body) = body.as_ref() {
        out.extend_from_slice(body.data());
    }
    sock.write_all(&out).await?;
    sock.flush().await?;
    Ok(keep_alive)
}

/// Decides the fate of the connection and patches up the headers.
fn connection_policy(
    headers: &mut HeaderMap,
    version: Version,
    request_keep_alive: bool,
) -> bool {
    if wire::connection_contains(headers, "keep-alive") {
        return true
    }
    if wire::connection_contains(headers, "close") {
        return false
    }
    if request_keep_alive {
        if version == Version::HTTP_10 {
            headers.append(CONNECTION, HeaderValue::from_static("keep-alive"));
        }
        true
    }
    else {
        if version >= Version::HTTP_11 {
            headers.append(CONNECTION, HeaderValue::from_static("close"));
        }
        false
    }
}


//============ Tests =========================================================
