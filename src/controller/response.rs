//! Relays a stored object to the client.
use std::future;

use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;

use crate::storage::GetResult;

/// Status and headers of `result`, with its stream as the body.
///
/// A failure while streaming is logged and ends the body; the status line has
/// already been sent by then.
#[must_use]
pub fn send_stream(result: GetResult) -> Response {
    let GetResult {
        header,
        status,
        stream,
    } = result;

    let body = stream.scan((), |_, chunk| {
        future::ready(match chunk {
            Ok(bytes) => Some(Ok::<_, std::io::Error>(bytes)),
            Err(err) => {
                tracing::error!(error = %err, "stream failed while sending the response");
                None
            }
        })
    });

    (status, header, Body::from_stream(body)).into_response()
}
