//! Contract between the lifecycle controller and the served application.

use std::future::Future;
use std::io;

use tokio::time::Instant;

use crate::net::Acceptor;

/// A server the lifecycle controller can run and drain.
///
/// The controller runs [`Server::serve`] on its own task and, once a stop or
/// restart is decided, calls [`Server::shutdown`] from the controller task.
pub trait Server: Send + Sync + 'static {
    /// Accept connections from `acceptor` and serve them. Returns after a
    /// shutdown has stopped the accept loop and in-flight work has finished,
    /// or when serving fails.
    fn serve(&self, acceptor: Acceptor) -> impl Future<Output = io::Result<()>> + Send;

    /// Stop accepting, let in-flight work finish, then return.
    ///
    /// The returned future is dropped if it is still pending at `deadline`;
    /// implementations should not rely on running to completion.
    fn shutdown(&self, deadline: Instant) -> impl Future<Output = ()> + Send;
}
