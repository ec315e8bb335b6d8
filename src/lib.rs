/*!
 * geodb - client library for the geodb geolocation database
 *
 * A thin gRPC client for a remote geodb server with:
 * - Object upsert, lookup by keys, regex and prefix
 * - Key listings and deletion (`*` drops everything)
 * - Geofenced boundary scans
 * - Realtime object update subscriptions
 * - Optional basic-auth header, client-side prometheus metrics and retry
 *
 * Spatial indexing, tracking and persistence all live on the server.
 */

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod stream;

// Re-export commonly used types
pub use auth::AuthStrategy;
pub use client::Client;
pub use config::{ClientConfig, LogLevel};
pub use error::{GeoDbError, Result};
pub use retry::RetryPolicy;
pub use stream::{ObjectStream, StreamHandler};

/// Generated wire types (requests, responses, objects)
pub use geodb_proto::api;
pub use tokio_util::sync::CancellationToken;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
