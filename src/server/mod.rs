//! The server answering invoke requests.
//!
//! This module and its children implement the actual server. The
//! [`listener`] module binds the sockets and runs the event loops, the
//! [`conn`] module serves an individual connection, the [`wire`] module
//! implements the HTTP/1.x wire format, and the [`router`] module decides
//! what to answer to a request.
//!
//! The only thing you typically need from here is [`Server`].
//!
//! [`listener`]: listener/index.html
//! [`conn`]: conn/index.html
//! [`wire`]: wire/index.html
//! [`router`]: router/index.html
//! [`Server`]: struct.Server.html

pub use self::listener::{BoundServer, Server};
pub use self::router::Router;

pub mod conn;
pub mod listener;
pub mod router;
pub mod wire;
