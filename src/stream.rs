/*!
 * Realtime object subscriptions
 *
 * A subscription pulls messages off a server stream and hands each one (or
 * each error) to a caller-supplied handler until the caller cancels, the
 * handler breaks, or the server ends the stream.
 */

use std::ops::ControlFlow;

use geodb_proto::api::{ObjectDetail, StreamPrefixResponse, StreamRegexResponse, StreamResponse};
use tokio_util::sync::CancellationToken;
use tonic::{Status, Streaming};
use tracing::{debug, warn};

use crate::error::{GeoDbError, Result};
use crate::metrics::ClientMetrics;

/// A streamed message that carries an object update
pub trait ObjectStream {
    fn object(&self) -> Option<&ObjectDetail>;
}

impl ObjectStream for StreamResponse {
    fn object(&self) -> Option<&ObjectDetail> {
        self.object.as_ref()
    }
}

impl ObjectStream for StreamRegexResponse {
    fn object(&self) -> Option<&ObjectDetail> {
        self.object.as_ref()
    }
}

impl ObjectStream for StreamPrefixResponse {
    fn object(&self) -> Option<&ObjectDetail> {
        self.object.as_ref()
    }
}

/// Logic executed for every message (or error) received on a subscription.
///
/// Returning `ControlFlow::Break(())` ends the subscription. Errors are
/// delivered here rather than ending the call, so the handler decides
/// whether an error is fatal.
pub trait StreamHandler<T> {
    fn handle(&mut self, event: Result<T>) -> ControlFlow<()>;
}

impl<T, F> StreamHandler<T> for F
where
    F: FnMut(Result<T>) -> ControlFlow<()>,
{
    fn handle(&mut self, event: Result<T>) -> ControlFlow<()> {
        self(event)
    }
}

/// Why a subscription stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopReason {
    Cancelled,
    HandlerBreak,
    Exhausted,
}

/// Owns an open server stream; the stream is released when the `Streaming`
/// field drops, on every exit path of `run`
pub(crate) struct Subscription<T> {
    method: &'static str,
    stream: Streaming<T>,
    received: u64,
}

impl<T> Subscription<T> {
    pub(crate) fn new(method: &'static str, stream: Streaming<T>) -> Self {
        Self {
            method,
            stream,
            received: 0,
        }
    }

    /// Drive the receive loop to completion.
    ///
    /// Returns why the loop stopped and the last stream error, if any.
    pub(crate) async fn run<H>(
        mut self,
        cancel: &CancellationToken,
        metrics: Option<&ClientMetrics>,
        handler: &mut H,
    ) -> (StopReason, Option<Status>)
    where
        H: StreamHandler<T>,
    {
        let mut last_error = None;

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                next = self.stream.message() => next,
            };

            let event = match next {
                Ok(Some(message)) => {
                    self.received += 1;
                    if let Some(metrics) = metrics {
                        metrics.record_stream_msg(self.method);
                    }
                    Ok(message)
                }
                Ok(None) => break StopReason::Exhausted,
                Err(status) => {
                    warn!(method = self.method, code = ?status.code(), "geodb stream error: {}", status.message());
                    last_error = Some(status.clone());
                    Err(GeoDbError::Status(status))
                }
            };

            if handler.handle(event).is_break() {
                break StopReason::HandlerBreak;
            }
        };

        debug!(
            method = self.method,
            received = self.received,
            ?reason,
            "geodb subscription finished"
        );

        (reason, last_error)
    }
}
