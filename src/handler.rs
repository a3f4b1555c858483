//! The trait for the hosted function.

use crate::context::Context;
use crate::message::Body;


//------------ Handler -------------------------------------------------------

/// A type that can serve invocations.
///
/// The handler is called once for every accepted invocation, receiving the
/// [`Context`] describing the call and the request body if there was one.
/// Whatever body it returns is sent back in a 200 OK response.
///
/// The call happens right on the event loop serving the connection, so a
/// handler that blocks for long stalls every other connection assigned to
/// the same worker thread. If the handler panics, the panic is caught and
/// the client receives a 500 response instead.
///
/// The trait is implemented for all matching `Fn` closures, so a plain
/// function can be used wherever a handler is expected.
///
/// [`Context`]: ../context/struct.Context.html
pub trait Handler: Send + Sync {
    /// Handles a single invocation.
    fn handle(&self, context: &Context, body: Option<Body>) -> Option<Body>;
}

impl<F> Handler for F
where F: Fn(&Context, Option<Body>) -> Option<Body> + Send + Sync {
    fn handle(&self, context: &Context, body: Option<Body>) -> Option<Body> {
        (self)(context, body)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    struct Echo;

    impl Handler for Echo {
        fn handle(
            &self, _context: &Context, body: Option<Body>
        ) -> Option<Body> {
            body
        }
    }

    fn assert_handler<H: Handler>(_: &H) { }

    #[test]
    fn impls() {
        fn echo(_: &Context, body: Option<Body>) -> Option<Body> {
            body
        }

        assert_handler(&Echo);
        assert_handler(&echo);
        assert_handler(&|_: &Context, body: Option<Body>| body);
    }
}
