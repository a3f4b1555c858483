//! A host for a function served over the Fn invoke protocol.
//!
//! This crate contains all the moving parts of fnhost. The application
//! itself, via `main.rs`, is only a very tiny frontend that hooks a
//! built-in function into the library.
//!
//! The library hosts exactly one function. It listens on a TCP or Unix
//! domain socket, accepts HTTP requests for targets below `/call`, turns
//! each of them into an invocation of the function, and writes the result
//! back as the response. The platform-specific parts of a call, delivered
//! in `Fn-*` request headers, are made available through a [`Context`].
//!
//! A minimal program hosting an echoing function looks like this:
//!
//! ```no_run
//! use fnhost::{Body, Config, Context, Server};
//!
//! fn echo(_context: &Context, body: Option<Body>) -> Option<Body> {
//!     body
//! }
//!
//! fn main() {
//!     fnhost::log::Logger::init().unwrap();
//!     let config = Config::from_env().unwrap();
//!     Server::new(config).with_handler(echo).run().unwrap();
//! }
//! ```
//!
//! [`Context`]: context/struct.Context.html

pub use self::config::Config;
pub use self::context::Context;
pub use self::error::{ExitError, Failed};
pub use self::handler::Handler;
pub use self::message::{Body, Request, Response};
pub use self::server::Server;

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod log;
pub mod message;
pub mod server;
