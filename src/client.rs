/*!
 * geodb client: one method per remote operation
 */

use std::future::Future;

use geodb_proto::api::geo_db_client::GeoDbClient;
use geodb_proto::api::{
    DeleteRequest, DeleteResponse, GetKeysRequest, GetKeysResponse, GetPointRequest,
    GetPointResponse, GetPrefixKeysRequest, GetPrefixKeysResponse, GetPrefixRequest,
    GetPrefixResponse, GetRegexKeysRequest, GetRegexKeysResponse, GetRegexRequest,
    GetRegexResponse, GetRequest, GetResponse, PingRequest, PingResponse, ScanBoundRequest,
    ScanBoundResponse, ScanPrefixBoundRequest, ScanPrefixBoundResponse, ScanRegexBoundRequest,
    ScanRegexBoundResponse, SetRequest, SetResponse, StreamPrefixRequest, StreamPrefixResponse,
    StreamRegexRequest, StreamRegexResponse, StreamRequest, StreamResponse,
};
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::auth::AuthStrategy;
use crate::config::ClientConfig;
use crate::error::{GeoDbError, Result};
use crate::metrics::{CallKind, ClientMetrics};
use crate::retry::{with_retry, RetryPolicy};
use crate::stream::{StreamHandler, Subscription};

type Inner = GeoDbClient<InterceptedService<Channel, AuthStrategy>>;

/// A geodb client.
///
/// Cheap to clone; clones share the underlying HTTP/2 connection and may be
/// used concurrently from many tasks. Subscriptions occupy the calling task
/// until they end, so run each one on its own task.
///
/// # Example
///
/// ```rust,no_run
/// use geodb::{Client, ClientConfig};
///
/// # async fn example() -> geodb::Result<()> {
/// let client = Client::connect(&ClientConfig::new("localhost:8080")).await?;
/// let health = client.ping().await?;
/// assert!(health.ok);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Inner,
    host: String,
    metrics: Option<ClientMetrics>,
    retry: Option<RetryPolicy>,
}

impl Client {
    /// Create a client, registering metrics (if enabled) with the process
    /// default prometheus registry.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        Self::connect_with_registry(config, prometheus::default_registry()).await
    }

    /// Create a client, registering metrics (if enabled) with `registry`.
    ///
    /// The channel connects lazily: an unreachable server surfaces on the
    /// first call as an `Unavailable` status.
    ///
    /// # Errors
    ///
    /// - the host is not a valid URI
    /// - the password cannot be carried in a header
    /// - the metrics collectors are already registered with `registry`
    pub async fn connect_with_registry(config: &ClientConfig, registry: &Registry) -> Result<Self> {
        let uri = config.endpoint_uri();
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| GeoDbError::InvalidEndpoint {
                host: config.host.clone(),
                reason: e.to_string(),
            })?
            .connect_timeout(config.connect_timeout());

        let auth = AuthStrategy::from_password(&config.password)?;

        let metrics = if config.metrics {
            Some(ClientMetrics::register(registry)?)
        } else {
            None
        };

        let retry = config.retry.then(|| config.retry_policy.clone());

        let channel = endpoint.connect_lazy();

        info!(
            host = %uri,
            authenticated = auth.is_authenticated(),
            metrics = metrics.is_some(),
            retry = retry.is_some(),
            "geodb client created"
        );

        Ok(Self {
            inner: GeoDbClient::with_interceptor(channel, auth),
            host: uri,
            metrics,
            retry,
        })
    }

    /// Endpoint this client talks to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Release this handle. The connection closes once every clone is gone.
    pub fn close(self) {
        debug!(host = %self.host, "closing geodb client");
    }

    /// Ping - output: returns ok if the server is healthy.
    pub async fn ping(&self) -> Result<PingResponse> {
        self.unary("Ping", PingRequest {}, |mut c, r| async move { c.ping(r).await })
            .await
    }

    /// Set - input: an object, output: the upserted object's current detail.
    ///
    /// Objects are upserted in the order they are sent.
    pub async fn set(&self, request: SetRequest) -> Result<SetResponse> {
        self.unary("Set", request, |mut c, r| async move { c.set(r).await })
            .await
    }

    /// Get - input: object keys (empty for all), output: an indexed map of
    /// current object details.
    pub async fn get(&self, request: GetRequest) -> Result<GetResponse> {
        self.unary("Get", request, |mut c, r| async move { c.get(r).await })
            .await
    }

    /// GetRegex - object details whose keys match the regex.
    pub async fn get_regex(&self, request: GetRegexRequest) -> Result<GetRegexResponse> {
        self.unary("GetRegex", request, |mut c, r| async move {
            c.get_regex(r).await
        })
        .await
    }

    /// GetPrefix - object details whose keys have the prefix.
    pub async fn get_prefix(&self, request: GetPrefixRequest) -> Result<GetPrefixResponse> {
        self.unary("GetPrefix", request, |mut c, r| async move {
            c.get_prefix(r).await
        })
        .await
    }

    /// GetKeys - every key in the database.
    pub async fn get_keys(&self, request: GetKeysRequest) -> Result<GetKeysResponse> {
        self.unary("GetKeys", request, |mut c, r| async move {
            c.get_keys(r).await
        })
        .await
    }

    /// GetRegexKeys - every key matching the regex.
    pub async fn get_regex_keys(
        &self,
        request: GetRegexKeysRequest,
    ) -> Result<GetRegexKeysResponse> {
        self.unary("GetRegexKeys", request, |mut c, r| async move {
            c.get_regex_keys(r).await
        })
        .await
    }

    /// GetPrefixKeys - every key with the prefix.
    pub async fn get_prefix_keys(
        &self,
        request: GetPrefixKeysRequest,
    ) -> Result<GetPrefixKeysResponse> {
        self.unary("GetPrefixKeys", request, |mut c, r| async move {
            c.get_prefix_keys(r).await
        })
        .await
    }

    /// Delete - removes objects by key. If the first key is `*`, the server
    /// drops every object.
    pub async fn delete(&self, request: DeleteRequest) -> Result<DeleteResponse> {
        self.unary("Delete", request, |mut c, r| async move { c.delete(r).await })
            .await
    }

    /// ScanBound - object details inside a circular boundary, optionally
    /// restricted to the given keys.
    pub async fn scan_bound(&self, request: ScanBoundRequest) -> Result<ScanBoundResponse> {
        self.unary("ScanBound", request, |mut c, r| async move {
            c.scan_bound(r).await
        })
        .await
    }

    /// ScanRegexBound - object details inside the boundary whose keys match
    /// the regex.
    pub async fn scan_regex_bound(
        &self,
        request: ScanRegexBoundRequest,
    ) -> Result<ScanRegexBoundResponse> {
        self.unary("ScanRegexBound", request, |mut c, r| async move {
            c.scan_regex_bound(r).await
        })
        .await
    }

    /// ScanPrefixBound - object details inside the boundary whose keys have
    /// the prefix.
    pub async fn scan_prefix_bound(
        &self,
        request: ScanPrefixBoundRequest,
    ) -> Result<ScanPrefixBoundResponse> {
        self.unary("ScanPrefixBound", request, |mut c, r| async move {
            c.scan_prefix_bound(r).await
        })
        .await
    }

    /// GetPoint - latitude/longitude of a human readable address.
    pub async fn get_point(&self, request: GetPointRequest) -> Result<GetPointResponse> {
        self.unary("GetPoint", request, |mut c, r| async move {
            c.get_point(r).await
        })
        .await
    }

    /// Stream - input: a client id (optional) and object keys (optional),
    /// output: realtime updates for the targeted objects, each passed to
    /// `handler`.
    ///
    /// Runs until `cancel` fires, the handler breaks, or the server ends the
    /// stream.
    pub async fn stream<H>(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
        handler: H,
    ) -> Result<()>
    where
        H: StreamHandler<StreamResponse>,
    {
        self.subscribe("Stream", request, cancel, handler, |mut c, r| async move {
            c.stream(r).await
        })
        .await
    }

    /// StreamRegex - realtime updates for objects whose keys match the regex.
    pub async fn stream_regex<H>(
        &self,
        request: StreamRegexRequest,
        cancel: &CancellationToken,
        handler: H,
    ) -> Result<()>
    where
        H: StreamHandler<StreamRegexResponse>,
    {
        self.subscribe("StreamRegex", request, cancel, handler, |mut c, r| async move {
            c.stream_regex(r).await
        })
        .await
    }

    /// StreamPrefix - realtime updates for objects whose keys have the prefix.
    pub async fn stream_prefix<H>(
        &self,
        request: StreamPrefixRequest,
        cancel: &CancellationToken,
        handler: H,
    ) -> Result<()>
    where
        H: StreamHandler<StreamPrefixResponse>,
    {
        self.subscribe("StreamPrefix", request, cancel, handler, |mut c, r| async move {
            c.stream_prefix(r).await
        })
        .await
    }

    /// Forward a unary call, wrapped by metrics (outermost) and retry.
    async fn unary<Req, Resp, F, Fut>(
        &self,
        method: &'static str,
        request: Req,
        call: F,
    ) -> Result<Resp>
    where
        Req: Clone,
        F: Fn(Inner, Request<Req>) -> Fut,
        Fut: Future<Output = std::result::Result<Response<Resp>, Status>>,
    {
        debug!(method, "geodb call");

        let timer = self
            .metrics
            .as_ref()
            .map(|m| m.start(CallKind::Unary, method));

        let result = self.invoke(method, &request, &call).await;

        if let Some(timer) = timer {
            timer.finish(result.as_ref().err());
        }

        result.map(Response::into_inner).map_err(GeoDbError::from)
    }

    /// Open a server stream and drive it through `handler`.
    async fn subscribe<Req, Resp, F, Fut, H>(
        &self,
        method: &'static str,
        request: Req,
        cancel: &CancellationToken,
        mut handler: H,
        call: F,
    ) -> Result<()>
    where
        Req: Clone,
        F: Fn(Inner, Request<Req>) -> Fut,
        Fut: Future<Output = std::result::Result<Response<Streaming<Resp>>, Status>>,
        H: StreamHandler<Resp>,
    {
        if cancel.is_cancelled() {
            debug!(method, "subscription cancelled before it was opened");
            return Ok(());
        }

        let timer = self
            .metrics
            .as_ref()
            .map(|m| m.start(CallKind::ServerStream, method));

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Some(timer) = timer {
                    timer.finish(Some(&Status::cancelled("subscription cancelled")));
                }
                return Ok(());
            }
            opened = self.invoke(method, &request, &call) => opened,
        };

        let stream = match opened {
            Ok(response) => response.into_inner(),
            Err(status) => {
                if let Some(timer) = timer {
                    timer.finish(Some(&status));
                }
                return Err(status.into());
            }
        };

        info!(method, host = %self.host, "geodb subscription opened");

        let (_reason, last_error) = Subscription::new(method, stream)
            .run(cancel, self.metrics.as_ref(), &mut handler)
            .await;

        if let Some(timer) = timer {
            timer.finish(last_error.as_ref());
        }

        Ok(())
    }

    async fn invoke<Req, Resp, F, Fut>(
        &self,
        method: &'static str,
        request: &Req,
        call: &F,
    ) -> std::result::Result<Response<Resp>, Status>
    where
        Req: Clone,
        F: Fn(Inner, Request<Req>) -> Fut,
        Fut: Future<Output = std::result::Result<Response<Resp>, Status>>,
    {
        match &self.retry {
            Some(policy) => {
                with_retry(policy, method, |_| {
                    call(self.inner.clone(), Request::new(request.clone()))
                })
                .await
            }
            None => call(self.inner.clone(), Request::new(request.clone())).await,
        }
    }
}
