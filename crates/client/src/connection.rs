//! Transport abstraction used by the transfer driver.

use std::future::Future;
use std::pin::Pin;

use chunkline_protocol::{
    AppendHeader, CloseRequest, OpenRequest, OpenResponse, RemoveRequest, RemoveResponse,
    SizeResponse,
};

use crate::error::RequestError;

/// A boxed future resolving to one request's outcome.
pub type RequestFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RequestError>> + Send + 'a>>;

/// Request/response channel to an upload server.
///
/// [`WsConnection`](crate::WsConnection) implements this over WebSocket.
/// Keeping the driver behind a trait lets it run against any transport and
/// against in-memory mocks in tests.
pub trait UploadConnection: Send + Sync {
    /// Starts a session.
    fn open<'a>(&'a self, req: &'a OpenRequest) -> RequestFuture<'a, OpenResponse>;

    /// Sends one chunk. The header's `id` may be left empty; the transport
    /// assigns correlation ids.
    fn append<'a>(
        &'a self,
        header: &'a AppendHeader,
        data: &'a [u8],
    ) -> RequestFuture<'a, SizeResponse>;

    /// Finalizes a session.
    fn close<'a>(&'a self, req: &'a CloseRequest) -> RequestFuture<'a, SizeResponse>;

    /// Aborts a session.
    fn remove<'a>(&'a self, req: &'a RemoveRequest) -> RequestFuture<'a, RemoveResponse>;
}

impl<T: UploadConnection + ?Sized> UploadConnection for std::sync::Arc<T> {
    fn open<'a>(&'a self, req: &'a OpenRequest) -> RequestFuture<'a, OpenResponse> {
        (**self).open(req)
    }

    fn append<'a>(
        &'a self,
        header: &'a AppendHeader,
        data: &'a [u8],
    ) -> RequestFuture<'a, SizeResponse> {
        (**self).append(header, data)
    }

    fn close<'a>(&'a self, req: &'a CloseRequest) -> RequestFuture<'a, SizeResponse> {
        (**self).close(req)
    }

    fn remove<'a>(&'a self, req: &'a RemoveRequest) -> RequestFuture<'a, RemoveResponse> {
        (**self).remove(req)
    }
}
