//! Reading requests and writing responses.
//!
//! This module implements the HTTP/1.x wire format of the invoke protocol.
//! The type [`Reader`] turns the byte stream of a connection into a
//! sequence of framing signals, [`encode_response_head`] produces the
//! bytes of a response head. Everything in between, that is, deciding what
//! the signals mean and what to respond, lives in the [`conn`] module.
//!
//! [`Reader`]: struct.Reader.html
//! [`encode_response_head`]: fn.encode_response_head.html
//! [`conn`]: ../conn/index.html

use std::{cmp, io};
use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode, Version};
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH};
use tokio::io::{AsyncRead, AsyncReadExt};


//------------ Constants -----------------------------------------------------

/// The maximum accepted size of a request head in bytes.
const MAX_HEAD_LEN: usize = 32 * 1024;

/// The maximum number of headers accepted in a request.
const MAX_HEADERS: usize = 64;

/// The initial size of the read buffer of a connection.
const INITIAL_BUF_LEN: usize = 4096;


//------------ Signal --------------------------------------------------------

/// A framing event read from a connection.
///
/// For every request, a reader produces an ordered sequence of signals:
/// one `Head`, any number of `Chunk`s carrying body data, and a final
/// `End`.
#[derive(Clone, Debug)]
pub enum Signal {
    /// The request head has been received.
    Head(RequestHead),

    /// A chunk of the request body has been received.
    Chunk(Bytes),

    /// The request is complete.
    End,
}


//------------ RequestHead ---------------------------------------------------

/// The head of a request as read from a connection.
#[derive(Clone, Debug)]
pub struct RequestHead {
    /// The request method.
    method: Method,

    /// The raw request target from the request line.
    target: String,

    /// The protocol version of the request.
    version: Version,

    /// The headers of the request.
    headers: HeaderMap,
}

impl RequestHead {
    /// Creates a new request head from its parts.
    pub fn new(
        method: Method,
        target: impl Into<String>,
        version: Version,
        headers: HeaderMap,
    ) -> Self {
        RequestHead {
            method,
            target: target.into(),
            version,
            headers,
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

    /// Converts the head into its parts.
    pub fn into_parts(self) -> (Method, String, Version, HeaderMap) {
        (self.method, self.target, self.version, self.headers)
    }

    /// Returns the declared length of the request body.
    ///
    /// A missing or unparsable content length header is treated as zero.
    pub fn content_length(&self) -> u64 {
        self.headers.get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Returns whether the client asked for the connection to stay open.
    ///
    /// For HTTP/1.1, keeping the connection open is the default and a
    /// `Connection: close` header switches it off. For HTTP/1.0 it has to
    /// be requested explicitly via `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        if self.version == Version::HTTP_10 {
            connection_contains(&self.headers, "keep-alive")
        }
        else {
            !connection_contains(&self.headers, "close")
        }
    }
}


//------------ Reader --------------------------------------------------------

/// The reading side of a connection.
///
/// A reader turns the raw byte stream into the signal sequence described
/// at [`Signal`]. It only reads from the socket when the buffered data
/// doesn’t already contain the next signal, so a request pipelined behind
/// the current one simply sits in the buffer until the current one has
/// been answered.
///
/// [`Signal`]: enum.Signal.html
pub struct Reader {
    /// Bytes read from the socket but not yet consumed.
    buf: BytesMut,

    /// What we expect to read next.
    state: ReaderState,
}

/// The read state of a connection.
#[derive(Clone, Copy, Debug)]
enum ReaderState {
    /// Expecting a request head.
    Head,

    /// Expecting this many more bytes of request body.
    Body(u64),
}

impl Reader {
    /// Creates a reader for a new connection.
    pub fn new() -> Self {
        Reader {
            buf: BytesMut::with_capacity(INITIAL_BUF_LEN),
            state: ReaderState::Head,
        }
    }

    /// Reads the next signal from the socket.
    ///
    /// Returns `None` if the peer closed the connection cleanly between
    /// requests. A close in the middle of a request or a head that cannot
    /// be parsed results in an error.
    pub async fn read_signal<Sock: AsyncRead + Unpin>(
        &mut self, sock: &mut Sock
    ) -> Result<Option<Signal>, io::Error> {
        loop {
            match self.state {
                ReaderState::Head => {
                    if let Some(head) = self.parse_head()? {
                        self.state = ReaderState::Body(head.content_length());
                        return Ok(Some(Signal::Head(head)))
                    }
                    if self.buf.len() > MAX_HEAD_LEN {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "request head too large"
                        ))
                    }
                    if sock.read_buf(&mut self.buf).await? == 0 {
                        if self.buf.is_empty() {
                            return Ok(None)
                        }
                        return Err(io::ErrorKind::UnexpectedEof.into())
                    }
                }
                ReaderState::Body(0) => {
                    self.state = ReaderState::Head;
                    return Ok(Some(Signal::End))
                }
                ReaderState::Body(remaining) => {
                    if !self.buf.is_empty() {
                        let take = cmp::min(
                            self.buf.len() as u64, remaining
                        ) as usize;
                        self.state = ReaderState::Body(
                            remaining - take as u64
                        );
                        return Ok(Some(
                            Signal::Chunk(self.buf.split_to(take).freeze())
                        ))
                    }
                    if sock.read_buf(&mut self.buf).await? == 0 {
                        return Err(io::ErrorKind::UnexpectedEof.into())
                    }
                }
            }
        }
    }

    /// Tries to parse a complete request head from the buffer.
    ///
    /// Returns `Ok(None)` if the buffer does not yet contain a complete
    /// head. On success, the head’s bytes are removed from the buffer.
    fn parse_head(&mut self) -> Result<Option<RequestHead>, io::Error> {
        let mut parsed_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut parsed_headers);
        let len = match parsed.parse(&self.buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(err) => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, err))
            }
        };
        let method = parsed.method
            .and_then(|method| Method::from_bytes(method.as_bytes()).ok())
            .ok_or_else(|| invalid_data("invalid request method"))?;
        let target = parsed.path
            .ok_or_else(|| invalid_data("missing request target"))?
            .to_string();
        let version = match parsed.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        };
        let mut headers = HeaderMap::with_capacity(parsed.headers.len());
        for header in parsed.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| invalid_data("invalid header name"))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|_| invalid_data("invalid header value"))?;
            headers.append(name, value);
        }
        self.buf.advance(len);
        Ok(Some(RequestHead { method, target, version, headers }))
    }
}


//------------ Response Encoding ---------------------------------------------

/// Appends an encoded response head to a buffer.
///
/// The status line mirrors the protocol version of the request and uses
/// the canonical reason phrase of the status. The headers are written in
/// their order in the map.
pub fn encode_response_head(
    target: &mut BytesMut,
    version: Version,
    status: StatusCode,
    headers: &HeaderMap,
) {
    target.extend_from_slice(version_str(version).as_bytes());
    target.extend_from_slice(b" ");
    target.extend_from_slice(status.as_str().as_bytes());
    target.extend_from_slice(b" ");
    target.extend_from_slice(
        status.canonical_reason().unwrap_or("Unknown").as_bytes()
    );
    target.extend_from_slice(b"\r\n");
    for (name, value) in headers.iter() {
        target.extend_from_slice(name.as_str().as_bytes());
        target.extend_from_slice(b": ");
        target.extend_from_slice(value.as_bytes());
        target.extend_from_slice(b"\r\n");
    }
    target.extend_from_slice(b"\r\n");
}


//------------ Helpers -------------------------------------------------------

/// Returns whether a connection header lists the given token.
///
/// The header may appear multiple times and each value may be a comma
/// separated list of tokens. Tokens match case-insensitively.
pub(crate) fn connection_contains(headers: &HeaderMap, token: &str) -> bool {
    headers.get_all(CONNECTION).iter().any(|value| {
        value.to_str().map(|value| {
            value.split(',').any(|part| {
                part.trim().eq_ignore_ascii_case(token)
            })
        }).unwrap_or(false)
    })
}

/// Creates an invalid data error with the given message.
fn invalid_data(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Returns the string for a protocol version.
fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    }
    else {
        "HTTP/1.1"
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    async fn collect_signals(mut sock: &[u8]) -> Vec<Signal> {
        let mut reader = Reader::new();
        let mut res = Vec::new();
        while let Some(signal) = reader.read_signal(&mut sock).await.unwrap() {
            res.push(signal)
        }
        res
    }

    #[tokio::test]
    async fn signal_sequence() {
        let signals = collect_signals(
            b"POST /call HTTP/1.1\r\n\
              Host: fn\r\n\
              Content-Length: 5\r\n\r\n\
              hello"
        ).await;
        assert_eq!(signals.len(), 3);
        match signals[0] {
            Signal::Head(ref head) => {
                assert_eq!(head.method(), &Method::POST);
                assert_eq!(head.target(), "/call");
                assert_eq!(head.version(), Version::HTTP_11);
                assert_eq!(head.content_length(), 5);
                assert_eq!(
                    head.headers().get("host").unwrap().as_bytes(), b"fn"
                );
            }
            _ => panic!("expected head"),
        }
        match signals[1] {
            Signal::Chunk(ref chunk) => {
                assert_eq!(chunk.as_ref(), b"hello")
            }
            _ => panic!("expected chunk"),
        }
        assert!(matches!(signals[2], Signal::End));
    }

    #[tokio::test]
    async fn empty_body_sequence() {
        let signals = collect_signals(
            b"GET /call HTTP/1.0\r\n\r\n"
        ).await;
        assert_eq!(signals.len(), 2);
        match signals[0] {
            Signal::Head(ref head) => {
                assert_eq!(head.version(), Version::HTTP_10);
                assert_eq!(head.content_length(), 0);
            }
            _ => panic!("expected head"),
        }
        assert!(matches!(signals[1], Signal::End));
    }

    #[tokio::test]
    async fn pipelined_requests() {
        // The second request only gets parsed once the first one is done.
        let signals = collect_signals(
            b"GET /call HTTP/1.1\r\n\r\nGET /other HTTP/1.1\r\n\r\n"
        ).await;
        assert_eq!(signals.len(), 4);
        assert!(matches!(signals[0], Signal::Head(_)));
        assert!(matches!(signals[1], Signal::End));
        match signals[2] {
            Signal::Head(ref head) => assert_eq!(head.target(), "/other"),
            _ => panic!("expected head"),
        }
        assert!(matches!(signals[3], Signal::End));
    }

    #[tokio::test]
    async fn eof_mid_request() {
        let mut sock: &[u8] =
            b"POST /call HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        let mut reader = Reader::new();
        assert!(matches!(
            reader.read_signal(&mut sock).await.unwrap(),
            Some(Signal::Head(_))
        ));
        assert!(matches!(
            reader.read_signal(&mut sock).await.unwrap(),
            Some(Signal::Chunk(_))
        ));
        let err = reader.read_signal(&mut sock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn bad_head() {
        let mut sock: &[u8] = b"\x00\xff\r\n\r\n";
        let mut reader = Reader::new();
        let err = reader.read_signal(&mut sock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn head_too_large() {
        let mut bytes = b"GET /call HTTP/1.1\r\nx-filler: ".to_vec();
        bytes.extend_from_slice(&vec![b'a'; MAX_HEAD_LEN + 1]);
        let mut sock: &[u8] = &bytes;
        let mut reader = Reader::new();
        let err = reader.read_signal(&mut sock).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn partial_head() {
        let mut reader = Reader::new();
        reader.buf.extend_from_slice(b"GET /call HT");
        assert!(reader.parse_head().unwrap().is_none());
        reader.buf.extend_from_slice(b"TP/1.1\r\nHost: fn\r\n\r\nrest");
        let head = reader.parse_head().unwrap().unwrap();
        assert_eq!(head.target(), "/call");
        // Only the head bytes are consumed.
        assert_eq!(reader.buf.as_ref(), b"rest");
    }

    #[test]
    fn content_length() {
        fn head_with(value: Option<&'static str>) -> RequestHead {
            let mut headers = HeaderMap::new();
            if let Some(value) = value {
                headers.insert(
                    CONTENT_LENGTH, HeaderValue::from_static(value)
                );
            }
            RequestHead::new(Method::POST, "/call", Version::HTTP_11, headers)
        }

        assert_eq!(head_with(None).content_length(), 0);
        assert_eq!(head_with(Some("17")).content_length(), 17);
        assert_eq!(head_with(Some(" 17 ")).content_length(), 17);
        assert_eq!(head_with(Some("50000001")).content_length(), 50_000_001);

        // Unparsable lengths count as zero.
        assert_eq!(head_with(Some("banana")).content_length(), 0);
        assert_eq!(head_with(Some("-1")).content_length(), 0);
        assert_eq!(
            head_with(Some("99999999999999999999999")).content_length(), 0
        );
    }

    #[test]
    fn keep_alive() {
        fn head_with(
            version: Version, connection: Option<&'static str>
        ) -> RequestHead {
            let mut headers = HeaderMap::new();
            if let Some(value) = connection {
                headers.insert(CONNECTION, HeaderValue::from_static(value));
            }
            RequestHead::new(Method::GET, "/call", version, headers)
        }

        assert!(!head_with(Version::HTTP_10, None).is_keep_alive());
        assert!(
            head_with(Version::HTTP_10, Some("keep-alive")).is_keep_alive()
        );
        assert!(
            head_with(Version::HTTP_10, Some("Keep-Alive")).is_keep_alive()
        );
        assert!(head_with(Version::HTTP_11, None).is_keep_alive());
        assert!(!head_with(Version::HTTP_11, Some("close")).is_keep_alive());
        assert!(
            !head_with(Version::HTTP_11, Some("Upgrade, Close")).is_keep_alive()
        );
    }

    #[test]
    fn encode_head() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_LENGTH, HeaderValue::from_static("2")
        );
        let mut target = BytesMut::new();
        encode_response_head(
            &mut target, Version::HTTP_11, StatusCode::OK, &headers
        );
        assert_eq!(
            target.as_ref(),
            b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n".as_ref()
        );

        let mut target = BytesMut::new();
        encode_response_head(
            &mut target, Version::HTTP_10, StatusCode::NOT_FOUND,
            &HeaderMap::new()
        );
        assert_eq!(
            target.as_ref(),
            b"HTTP/1.0 404 Not Found\r\n\r\n".as_ref()
        );
    }
}
