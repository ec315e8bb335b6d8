/*!
 * Client-side Prometheus metrics for geodb calls
 *
 * Collector names and labels follow the go-grpc-prometheus client
 * conventions so existing dashboards keep working. Collectors are registered
 * into a caller-supplied `Registry` as a set: registering twice into the same
 * registry fails with `prometheus::Error::AlreadyReg` and leaves none of this
 * set behind.
 */

use std::time::Instant;

use prometheus::core::Collector;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use tonic::{Code, Status};

use crate::error::Result;
use crate::retry::code_name;

/// Fully qualified service name used for the `grpc_service` label
pub const SERVICE_NAME: &str = "api.GeoDB";

/// Kind of RPC, reported as the `grpc_type` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    ServerStream,
}

impl CallKind {
    /// String representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Unary => "unary",
            CallKind::ServerStream => "server_stream",
        }
    }
}

/// Per-call collectors shared by every clone of a client
#[derive(Clone)]
pub struct ClientMetrics {
    started: IntCounterVec,
    handled: IntCounterVec,
    handling_seconds: HistogramVec,
    msg_received: IntCounterVec,
}

impl ClientMetrics {
    /// Create the collectors and register them with `registry`
    pub fn register(registry: &Registry) -> Result<Self> {
        let labels = &["grpc_type", "grpc_service", "grpc_method"];

        let started = IntCounterVec::new(
            Opts::new(
                "grpc_client_started_total",
                "Total number of RPCs started on the client.",
            ),
            labels,
        )?;
        let handled = IntCounterVec::new(
            Opts::new(
                "grpc_client_handled_total",
                "Total number of RPCs completed by the client, regardless of success or failure.",
            ),
            &["grpc_type", "grpc_service", "grpc_method", "grpc_code"],
        )?;
        let handling_seconds = HistogramVec::new(
            HistogramOpts::new(
                "grpc_client_handling_seconds",
                "Histogram of response latency (seconds) of the gRPC until it is finished by the application.",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            labels,
        )?;
        let msg_received = IntCounterVec::new(
            Opts::new(
                "grpc_client_msg_received_total",
                "Total number of RPC stream messages received by the client.",
            ),
            labels,
        )?;

        let metrics = Self {
            started,
            handled,
            handling_seconds,
            msg_received,
        };

        for (registered, collector) in metrics.collectors().into_iter().enumerate() {
            if let Err(e) = registry.register(collector) {
                for collector in metrics.collectors().into_iter().take(registered) {
                    let _ = registry.unregister(collector);
                }
                return Err(e.into());
            }
        }

        Ok(metrics)
    }

    fn collectors(&self) -> Vec<Box<dyn Collector>> {
        vec![
            Box::new(self.started.clone()),
            Box::new(self.handled.clone()),
            Box::new(self.handling_seconds.clone()),
            Box::new(self.msg_received.clone()),
        ]
    }

    /// Record the start of a call; finish the returned timer when it completes.
    ///
    /// A timer dropped unfinished records the call as `cancelled`.
    pub fn start(&self, kind: CallKind, method: &'static str) -> CallTimer<'_> {
        self.started
            .with_label_values(&[kind.as_str(), SERVICE_NAME, method])
            .inc();
        CallTimer {
            metrics: self,
            kind,
            method,
            started_at: Instant::now(),
            finished: false,
        }
    }

    /// Count one message received on a server stream
    pub fn record_stream_msg(&self, method: &'static str) {
        self.msg_received
            .with_label_values(&[CallKind::ServerStream.as_str(), SERVICE_NAME, method])
            .inc();
    }
}

/// In-flight call measurement
pub struct CallTimer<'a> {
    metrics: &'a ClientMetrics,
    kind: CallKind,
    method: &'static str,
    started_at: Instant,
    finished: bool,
}

impl CallTimer<'_> {
    /// Record the outcome and latency of the call
    pub fn finish(mut self, error: Option<&Status>) {
        self.record(error.map(Status::code).unwrap_or(Code::Ok));
    }

    fn record(&mut self, code: Code) {
        self.finished = true;
        let labels = [self.kind.as_str(), SERVICE_NAME, self.method];

        self.metrics
            .handled
            .with_label_values(&[labels[0], labels[1], labels[2], code_name(code)])
            .inc();
        self.metrics
            .handling_seconds
            .with_label_values(&labels)
            .observe(self.started_at.elapsed().as_secs_f64());
    }
}

impl Drop for CallTimer<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.record(Code::Cancelled);
        }
    }
}
