//! In-memory geodb server used by the integration tests.
//!
//! Implements just enough of the GeoDB service to exercise the client:
//! objects live in a map, regex/prefix filters are applied server side, and
//! every `Set` is broadcast to open subscriptions.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geodb::api::geo_db_server::{GeoDb, GeoDbServer};
use geodb::api::*;
use geodb::CancellationToken;
use regex::Regex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_stream::Stream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

pub const COORS_FIELD: (f64, f64) = (39.756378173828125, -104.99414825439453);
pub const PEPSI_CENTER: (f64, f64) = (39.74863815307617, -105.00762176513672);
pub const CHERRY_CREEK_MALL: (f64, f64) = (39.71670913696289, -104.95344543457031);
pub const CHEYENNE_WYOMING: (f64, f64) = (41.1353874206543, -104.8226089477539);

/// What open subscriptions receive from the fake
#[derive(Clone)]
enum StreamEvent {
    Update(ObjectDetail),
    Fault(Status),
}

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Shared state of the fake; clones observe the same database
#[derive(Clone)]
pub struct FakeGeoDb {
    objects: Arc<RwLock<BTreeMap<String, Object>>>,
    updates: broadcast::Sender<StreamEvent>,
    password: Option<String>,
    /// Number of upcoming calls to reject with `Unavailable`
    fail_next: Arc<AtomicU32>,
    calls: Arc<AtomicUsize>,
    live_streams: Arc<AtomicUsize>,
    last_authorization: Arc<Mutex<Option<String>>>,
    shutdown_streams: CancellationToken,
}

impl FakeGeoDb {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            updates,
            password: None,
            fail_next: Arc::new(AtomicU32::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            live_streams: Arc::new(AtomicUsize::new(0)),
            last_authorization: Arc::new(Mutex::new(None)),
            shutdown_streams: CancellationToken::new(),
        }
    }

    /// Require `authorization: basic <password>` on every call
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn fail_next(&self, calls: u32) {
        self.fail_next.store(calls, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::SeqCst)
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.last_authorization.lock().unwrap().clone()
    }

    /// Fail every open subscription with `status`
    pub fn fail_streams(&self, status: Status) {
        let _ = self.updates.send(StreamEvent::Fault(status));
    }

    /// End every open subscription from the server side
    pub fn close_streams(&self) {
        self.shutdown_streams.cancel();
    }

    /// Bind to an ephemeral port and serve in the background
    pub async fn spawn(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = GeoDbServer::new(self.clone());

        tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .expect("fake geodb server failed");
        });

        addr
    }

    fn check<T>(&self, request: &Request<T>) -> Result<(), Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let authorization = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *self.last_authorization.lock().unwrap() = authorization.clone();

        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Status::unavailable("injected failure"));
        }

        if let Some(password) = &self.password {
            if authorization.as_deref() != Some(format!("basic {}", password).as_str()) {
                return Err(Status::unauthenticated("invalid or missing authorization"));
            }
        }

        Ok(())
    }

    async fn matching<F>(&self, keep: F) -> BTreeMap<String, Object>
    where
        F: Fn(&Object) -> bool,
    {
        self.objects
            .read()
            .await
            .iter()
            .filter(|&(_, o)| keep(o))
            .map(|(k, o)| (k.clone(), o.clone()))
            .collect()
    }

    fn open_stream<T, F, W>(&self, keep: F, wrap: W) -> ResponseStream<T>
    where
        T: Send + 'static,
        F: Fn(&str) -> bool + Send + 'static,
        W: Fn(ObjectDetail) -> T + Send + 'static,
    {
        let mut updates = self.updates.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let live = self.live_streams.clone();
        let shutdown = self.shutdown_streams.clone();
        live.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = shutdown.cancelled() => break,
                    update = updates.recv() => match update {
                        Ok(StreamEvent::Update(detail)) => {
                            let key = detail.object.as_ref().map(|o| o.key.clone()).unwrap_or_default();
                            if keep(&key) && tx.send(Ok(wrap(detail))).await.is_err() {
                                break;
                            }
                        }
                        Ok(StreamEvent::Fault(status)) => {
                            let _ = tx.send(Err(status)).await;
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            live.fetch_sub(1, Ordering::SeqCst);
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

fn detail(object: Object) -> ObjectDetail {
    let timezone = if object.get_timezone {
        "America/Denver".to_string()
    } else {
        String::new()
    };
    ObjectDetail {
        object: Some(object),
        address: None,
        timezone,
        tracker_events: vec![],
    }
}

fn details(objects: BTreeMap<String, Object>) -> std::collections::HashMap<String, ObjectDetail> {
    objects.into_iter().map(|(k, o)| (k, detail(o))).collect()
}

fn compile(regex: &str) -> Result<Regex, Status> {
    Regex::new(regex).map_err(|e| Status::invalid_argument(e.to_string()))
}

/// Great-circle distance in meters
pub fn distance_meters(a: &Point, b: &Point) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

fn within(bound: &Option<Bound>, object: &Object) -> bool {
    match (bound.as_ref().and_then(|b| b.center.as_ref().map(|c| (c, b.radius))), &object.point) {
        (Some((center, radius)), Some(point)) => distance_meters(center, point) <= radius as f64,
        _ => false,
    }
}

#[tonic::async_trait]
impl GeoDb for FakeGeoDb {
    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        self.check(&request)?;
        Ok(Response::new(PingResponse { ok: true }))
    }

    async fn set(&self, request: Request<SetRequest>) -> Result<Response<SetResponse>, Status> {
        self.check(&request)?;
        let mut object = request
            .into_inner()
            .object
            .ok_or_else(|| Status::invalid_argument("missing object"))?;
        if object.key.is_empty() {
            return Err(Status::invalid_argument("missing object key"));
        }
        object.updated_unix = 1;

        self.objects
            .write()
            .await
            .insert(object.key.clone(), object.clone());
        let detail = detail(object);
        let _ = self.updates.send(StreamEvent::Update(detail.clone()));

        Ok(Response::new(SetResponse {
            object: Some(detail),
        }))
    }

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        self.check(&request)?;
        let keys = request.into_inner().keys;
        let objects = self
            .matching(|o| keys.is_empty() || keys.contains(&o.key))
            .await;
        Ok(Response::new(GetResponse {
            objects: details(objects),
        }))
    }

    async fn get_regex(
        &self,
        request: Request<GetRegexRequest>,
    ) -> Result<Response<GetRegexResponse>, Status> {
        self.check(&request)?;
        let re = compile(&request.into_inner().regex)?;
        let objects = self.matching(|o| re.is_match(&o.key)).await;
        Ok(Response::new(GetRegexResponse {
            objects: details(objects),
        }))
    }

    async fn get_prefix(
        &self,
        request: Request<GetPrefixRequest>,
    ) -> Result<Response<GetPrefixResponse>, Status> {
        self.check(&request)?;
        let prefix = request.into_inner().prefix;
        let objects = self.matching(|o| o.key.starts_with(&prefix)).await;
        Ok(Response::new(GetPrefixResponse {
            objects: details(objects),
        }))
    }

    async fn get_keys(
        &self,
        request: Request<GetKeysRequest>,
    ) -> Result<Response<GetKeysResponse>, Status> {
        self.check(&request)?;
        let keys = self.objects.read().await.keys().cloned().collect();
        Ok(Response::new(GetKeysResponse { keys }))
    }

    async fn get_regex_keys(
        &self,
        request: Request<GetRegexKeysRequest>,
    ) -> Result<Response<GetRegexKeysResponse>, Status> {
        self.check(&request)?;
        let re = compile(&request.into_inner().regex)?;
        let keys = self.matching(|o| re.is_match(&o.key)).await.into_keys().collect();
        Ok(Response::new(GetRegexKeysResponse { keys }))
    }

    async fn get_prefix_keys(
        &self,
        request: Request<GetPrefixKeysRequest>,
    ) -> Result<Response<GetPrefixKeysResponse>, Status> {
        self.check(&request)?;
        let prefix = request.into_inner().prefix;
        let keys = self
            .matching(|o| o.key.starts_with(&prefix))
            .await
            .into_keys()
            .collect();
        Ok(Response::new(GetPrefixKeysResponse { keys }))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        self.check(&request)?;
        let keys = request.into_inner().keys;
        let mut objects = self.objects.write().await;
        if keys.first().map(String::as_str) == Some("*") {
            objects.clear();
        } else {
            for key in &keys {
                objects.remove(key);
            }
        }
        Ok(Response::new(DeleteResponse {}))
    }

    type StreamStream = ResponseStream<StreamResponse>;

    async fn stream(
        &self,
        request: Request<StreamRequest>,
    ) -> Result<Response<Self::StreamStream>, Status> {
        self.check(&request)?;
        let keys = request.into_inner().keys;
        Ok(Response::new(self.open_stream(
            move |key| keys.is_empty() || keys.iter().any(|k| k == key),
            |detail| StreamResponse {
                object: Some(detail),
            },
        )))
    }

    type StreamRegexStream = ResponseStream<StreamRegexResponse>;

    async fn stream_regex(
        &self,
        request: Request<StreamRegexRequest>,
    ) -> Result<Response<Self::StreamRegexStream>, Status> {
        self.check(&request)?;
        let re = compile(&request.into_inner().regex)?;
        Ok(Response::new(self.open_stream(
            move |key| re.is_match(key),
            |detail| StreamRegexResponse {
                object: Some(detail),
            },
        )))
    }

    type StreamPrefixStream = ResponseStream<StreamPrefixResponse>;

    async fn stream_prefix(
        &self,
        request: Request<StreamPrefixRequest>,
    ) -> Result<Response<Self::StreamPrefixStream>, Status> {
        self.check(&request)?;
        let prefix = request.into_inner().prefix;
        Ok(Response::new(self.open_stream(
            move |key| key.starts_with(&prefix),
            |detail| StreamPrefixResponse {
                object: Some(detail),
            },
        )))
    }

    async fn scan_bound(
        &self,
        request: Request<ScanBoundRequest>,
    ) -> Result<Response<ScanBoundResponse>, Status> {
        self.check(&request)?;
        let req = request.into_inner();
        let objects = self
            .matching(|o| (req.keys.is_empty() || req.keys.contains(&o.key)) && within(&req.bound, o))
            .await;
        Ok(Response::new(ScanBoundResponse {
            objects: details(objects),
        }))
    }

    async fn scan_regex_bound(
        &self,
        request: Request<ScanRegexBoundRequest>,
    ) -> Result<Response<ScanRegexBoundResponse>, Status> {
        self.check(&request)?;
        let req = request.into_inner();
        let re = compile(&req.regex)?;
        let objects = self
            .matching(|o| re.is_match(&o.key) && within(&req.bound, o))
            .await;
        Ok(Response::new(ScanRegexBoundResponse {
            objects: details(objects),
        }))
    }

    async fn scan_prefix_bound(
        &self,
        request: Request<ScanPrefixBoundRequest>,
    ) -> Result<Response<ScanPrefixBoundResponse>, Status> {
        self.check(&request)?;
        let req = request.into_inner();
        let objects = self
            .matching(|o| o.key.starts_with(&req.prefix) && within(&req.bound, o))
            .await;
        Ok(Response::new(ScanPrefixBoundResponse {
            objects: details(objects),
        }))
    }

    async fn get_point(
        &self,
        request: Request<GetPointRequest>,
    ) -> Result<Response<GetPointResponse>, Status> {
        self.check(&request)?;
        match request.into_inner().address.as_str() {
            "1000 Chopper Cir, Denver, CO 80204" => Ok(Response::new(GetPointResponse {
                point: Some(Point::new(PEPSI_CENTER.0, PEPSI_CENTER.1)),
            })),
            other => Err(Status::not_found(format!("no match for address: {}", other))),
        }
    }
}

/// Poll `cond` until it holds or `timeout` elapses
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
